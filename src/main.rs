use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use autocut_engine::asr::{AsrCache, AsrProvider, AsrCue};
use autocut_engine::config::{Args, CONFIG};
use autocut_engine::error::AppError;
use autocut_engine::facade::Facades;
use autocut_engine::lm::{ChatMessage, ChatResponse, LmChatProvider, ResponseFormat};
use autocut_engine::model_download::{DownloadProgressFn, ModelDownloadProvider};
use autocut_engine::progress::{CancelRegistry, EventBus, ProgressStore};
use autocut_engine::project::InMemoryProjectStore;
use autocut_engine::scheduler::TaskScheduler;
use autocut_engine::server::{self, AppState};
use autocut_engine::tts::{TtsProvider, TtsRequest, TtsResult};
use clap::Parser;
use futures::stream::BoxStream;
use tokio_util::sync::CancellationToken;

/// Placeholder provider wired in until a real LM/TTS/ASR/model-download
/// backend is configured for a deployment. The concrete wire protocols are
/// out of scope for this crate (spec.md §1); routes that need one fail with
/// `provider_unavailable` rather than the process refusing to start.
struct Unconfigured;

#[async_trait]
impl LmChatProvider for Unconfigured {
    async fn chat(&self, _messages: &[ChatMessage], _response_format: ResponseFormat) -> Result<ChatResponse, AppError> {
        Err(AppError::provider_unavailable("no LM chat provider configured"))
    }

    async fn chat_stream(&self, _messages: &[ChatMessage], _response_format: ResponseFormat) -> Result<BoxStream<'static, Result<String, AppError>>, AppError> {
        Err(AppError::provider_unavailable("no LM chat provider configured"))
    }
}

#[async_trait]
impl TtsProvider for Unconfigured {
    async fn synthesize(&self, _request: TtsRequest, _output_dir: &Path) -> Result<TtsResult, AppError> {
        Err(AppError::provider_unavailable("no TTS provider configured"))
    }
}

#[async_trait]
impl AsrProvider for Unconfigured {
    async fn transcribe(&self, _audio_path: &Path) -> Result<Vec<AsrCue>, AppError> {
        Err(AppError::provider_unavailable("no ASR provider configured"))
    }
}

#[async_trait]
impl ModelDownloadProvider for Unconfigured {
    async fn download(&self, _key: &str, _dest_dir: &Path, _on_progress: DownloadProgressFn) -> Result<PathBuf, AppError> {
        Err(AppError::provider_unavailable("no model download provider configured"))
    }
}

#[tokio::main]
async fn main() {
    let log_channel = autocut_engine::log_channel::init_tracer();

    CONFIG.apply_args(&Args::parse());

    if let Ok(path) = dotenvy::dotenv() {
        tracing::info!("loaded env variables from {}", path.display());
    }

    let uploads_dir = CONFIG.uploads_dir();
    for sub in autocut_engine::layout::BOOTSTRAP_DIRS {
        if let Err(err) = tokio::fs::create_dir_all(uploads_dir.join(sub)).await {
            tracing::warn!("could not create uploads subdir {sub}: {err}");
        }
    }

    let event_bus = Arc::new(EventBus::new());
    let progress_store = Arc::new(ProgressStore::new());
    let cancel_registry = Arc::new(CancelRegistry::new());
    let scheduler = Arc::new(TaskScheduler::new(event_bus.clone(), progress_store.clone(), cancel_registry));

    let asr_cache = Arc::new(AsrCache::new(512));

    let facades = Arc::new(Facades {
        project_store: Arc::new(InMemoryProjectStore::new()),
        scheduler,
        event_bus: event_bus.clone(),
        progress_store,
        lm: Arc::new(Unconfigured),
        tts: Arc::new(Unconfigured),
        asr: Arc::new(Unconfigured),
        asr_cache,
        asr_model_download: Arc::new(Unconfigured),
        tts_model_download: Arc::new(Unconfigured),
    });

    let app = server::router(AppState {
        facades,
        event_bus,
        log_channel,
    });

    let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)), 8787);
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(err) => {
            tracing::error!("failed to bind {addr}: {err}");
            return;
        }
    };
    tracing::info!("listening on {addr}");

    let cancellation_token = CancellationToken::new();
    {
        let cancellation_token = cancellation_token.clone();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(cancellation_token.cancelled_owned())
                .await
                .unwrap();
        });
    }

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            cancellation_token.cancel();
        }
        _ = cancellation_token.cancelled() => {}
    }
    tracing::info!("shutting down");
}
