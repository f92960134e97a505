//! TTS capability interface (spec.md §1: providers are external; only the
//! call shape the core depends on is defined here, grounded on
//! `modules/tts_service.py`'s synth entry point).

use async_trait::async_trait;

use crate::error::AppError;

#[derive(Debug, Clone)]
pub struct TtsRequest {
    pub text: String,
    pub voice: Option<String>,
    pub speed: Option<f32>,
}

#[derive(Debug, Clone)]
pub struct TtsResult {
    /// Path to the synthesized audio file on local disk.
    pub audio_path: String,
    pub duration_secs: f64,
}

#[async_trait]
pub trait TtsProvider: Send + Sync {
    async fn synthesize(&self, request: TtsRequest, output_dir: &std::path::Path) -> Result<TtsResult, AppError>;
}
