//! LM chat provider capability interface (spec.md §6), grounded on
//! `ai_service.py`/`modules/ai/base.py`. Concrete wire protocols (OpenAI,
//! local models, ...) are out of scope for the core; callers depend only on
//! this trait.

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub content: String,
    pub usage: Option<ChatUsage>,
    pub model: Option<String>,
    pub finish_reason: Option<String>,
}

/// Whether the caller wants a plain-text completion or a JSON-object
/// response (used by the script assembler, which always asks for JSON).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseFormat {
    Text,
    JsonObject,
}

#[async_trait]
pub trait LmChatProvider: Send + Sync {
    async fn chat(&self, messages: &[ChatMessage], response_format: ResponseFormat) -> Result<ChatResponse, AppError>;

    /// Streaming variant; each item is an incremental content delta.
    async fn chat_stream(
        &self,
        messages: &[ChatMessage],
        response_format: ResponseFormat,
    ) -> Result<BoxStream<'static, Result<String, AppError>>, AppError>;
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::sync::Mutex;

    /// A scripted provider that returns queued responses in order, used by
    /// `script::assemble` tests to exercise retry and tolerant-parse paths
    /// without a real HTTP call.
    pub struct ScriptedLm {
        pub responses: Mutex<Vec<Result<String, String>>>,
    }

    impl ScriptedLm {
        pub fn new(responses: Vec<Result<String, String>>) -> Self {
            Self {
                responses: Mutex::new(responses),
            }
        }
    }

    #[async_trait]
    impl LmChatProvider for ScriptedLm {
        async fn chat(&self, _messages: &[ChatMessage], _response_format: ResponseFormat) -> Result<ChatResponse, AppError> {
            let mut responses = self.responses.lock().unwrap();
            let next = if responses.is_empty() { None } else { Some(responses.remove(0)) };
            drop(responses);
            match next {
                Some(Ok(content)) => Ok(ChatResponse {
                    content,
                    usage: None,
                    model: None,
                    finish_reason: None,
                }),
                Some(Err(msg)) => Err(AppError::provider_unavailable(msg)),
                None => Err(AppError::provider_unavailable("no scripted response left")),
            }
        }

        async fn chat_stream(
            &self,
            _messages: &[ChatMessage],
            _response_format: ResponseFormat,
        ) -> Result<BoxStream<'static, Result<String, AppError>>, AppError> {
            Err(AppError::provider_unavailable("streaming not used in tests"))
        }
    }
}
