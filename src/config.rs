use std::path::PathBuf;
use std::str::FromStr;
use std::sync::LazyLock;

use clap::Parser;
use serde::{de::DeserializeOwned, Serialize};

/// A single typed configuration cell resolved `cli -> env -> default`.
///
/// Mirrors the resolution order in the teacher's `config::SettingValue`,
/// trimmed to what this crate needs: no dynamic registry, no live TOML/JSON
/// patching, because those exist in the teacher to back a settings HTTP
/// route this spec explicitly excludes from the core.
pub trait ConfigValue: 'static + Send + Sync + Sized + Clone + Serialize + DeserializeOwned {
    /// Environment variable consulted when no CLI override is present.
    const ENV_KEY: Option<&'static str> = None;

    fn default_value() -> Self;
}

#[derive(Debug, Clone)]
pub struct Setting<T> {
    default: T,
    env: Option<T>,
    cli: Option<T>,
}

impl<T: ConfigValue + FromStr> Setting<T> {
    fn construct() -> Self {
        let env = T::ENV_KEY.and_then(|key| {
            std::env::var(key).ok().and_then(|v| match v.parse::<T>() {
                Ok(parsed) => Some(parsed),
                Err(_) => {
                    tracing::warn!("could not parse env var {key}={v}");
                    None
                }
            })
        });
        Self {
            default: T::default_value(),
            env,
            cli: None,
        }
    }

    pub fn get(&self) -> &T {
        self.cli.as_ref().or(self.env.as_ref()).unwrap_or(&self.default)
    }

    pub fn set_cli_override(&mut self, value: T) {
        self.cli = Some(value);
    }
}

#[derive(Debug, Clone, Serialize, serde::Deserialize)]
pub struct FfmpegPath(pub String);

impl FromStr for FfmpegPath {
    type Err = std::convert::Infallible;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.to_string()))
    }
}

impl ConfigValue for FfmpegPath {
    const ENV_KEY: Option<&'static str> = Some("AUTOCUT_FFMPEG_PATH");
    fn default_value() -> Self {
        Self("ffmpeg".to_string())
    }
}

#[derive(Debug, Clone, Serialize, serde::Deserialize)]
pub struct FfprobePath(pub String);

impl FromStr for FfprobePath {
    type Err = std::convert::Infallible;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.to_string()))
    }
}

impl ConfigValue for FfprobePath {
    const ENV_KEY: Option<&'static str> = Some("AUTOCUT_FFPROBE_PATH");
    fn default_value() -> Self {
        Self("ffprobe".to_string())
    }
}

#[derive(Debug, Clone, Serialize, serde::Deserialize)]
pub struct UploadsDir(pub PathBuf);

impl FromStr for UploadsDir {
    type Err = std::convert::Infallible;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(PathBuf::from(s)))
    }
}

impl ConfigValue for UploadsDir {
    const ENV_KEY: Option<&'static str> = Some("AUTOCUT_UPLOADS_DIR");
    fn default_value() -> Self {
        Self(PathBuf::from("uploads"))
    }
}

/// Scope names used by the scoped scheduler (spec.md glossary: "Scope").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    GenerateVideo,
    GenerateJianyingDraft,
    Tts,
    GenerateScript,
    FunAsrModels,
    Qwen3TtsModels,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::GenerateVideo => "generate_video",
            Scope::GenerateJianyingDraft => "generate_jianying_draft",
            Scope::Tts => "tts",
            Scope::GenerateScript => "generate_script",
            Scope::FunAsrModels => "fun_asr_models",
            Scope::Qwen3TtsModels => "qwen3_tts_models",
        }
    }

    /// Recommended worker count absent a user override or env var, derived
    /// the same way `generate_concurrency_config.py::recommend_concurrency`
    /// derives it but without the optional GPU/VRAM probe (that probe is a
    /// provider-acceleration detail out of scope for the core scheduler;
    /// only the RAM/core heuristic is kept here).
    pub fn recommended_concurrency(&self) -> usize {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        let by_core = (cores / 2).max(1);
        match self {
            Scope::GenerateVideo => by_core.min(2),
            Scope::GenerateJianyingDraft => by_core.min(4),
            Scope::Tts => by_core.min(4),
            Scope::GenerateScript => by_core.min(4),
            Scope::FunAsrModels | Scope::Qwen3TtsModels => 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, serde::Deserialize)]
pub struct ProviderTimeoutSecs(pub u64);

impl FromStr for ProviderTimeoutSecs {
    type Err = std::num::ParseIntError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

impl ConfigValue for ProviderTimeoutSecs {
    const ENV_KEY: Option<&'static str> = Some("AUTOCUT_PROVIDER_TIMEOUT_SECS");
    fn default_value() -> Self {
        Self(600)
    }
}

/// Bound on concurrent TTS synthesis calls inside one video-generation task
/// (spec.md 4.8: "semaphore bound of 5").
pub const TTS_FANOUT_LIMIT: usize = 5;

/// Bound on concurrent LM chunk calls inside one script-assembly task
/// (`asyncio.Semaphore(5)` in `service.py`).
pub const SCRIPT_CHUNK_FANOUT_LIMIT: usize = 5;

#[derive(Debug, Parser)]
#[command(name = "autocut-engine", about = "AI narration/video pipeline engine")]
pub struct Args {
    /// Override the ffmpeg binary path.
    #[arg(long)]
    pub ffmpeg: Option<String>,

    /// Override the ffprobe binary path.
    #[arg(long)]
    pub ffprobe: Option<String>,

    /// Override the uploads root directory.
    #[arg(long)]
    pub uploads_dir: Option<PathBuf>,
}

pub struct ConfigStore {
    pub ffmpeg_path: std::sync::Mutex<Setting<FfmpegPath>>,
    pub ffprobe_path: std::sync::Mutex<Setting<FfprobePath>>,
    pub uploads_dir: std::sync::Mutex<Setting<UploadsDir>>,
    pub provider_timeout: std::sync::Mutex<Setting<ProviderTimeoutSecs>>,
}

impl ConfigStore {
    fn construct() -> Self {
        Self {
            ffmpeg_path: std::sync::Mutex::new(Setting::construct()),
            ffprobe_path: std::sync::Mutex::new(Setting::construct()),
            uploads_dir: std::sync::Mutex::new(Setting::construct()),
            provider_timeout: std::sync::Mutex::new(Setting::construct()),
        }
    }

    pub fn apply_args(&self, args: &Args) {
        if let Some(ffmpeg) = &args.ffmpeg {
            self.ffmpeg_path.lock().unwrap().set_cli_override(FfmpegPath(ffmpeg.clone()));
        }
        if let Some(ffprobe) = &args.ffprobe {
            self.ffprobe_path.lock().unwrap().set_cli_override(FfprobePath(ffprobe.clone()));
        }
        if let Some(dir) = &args.uploads_dir {
            self.uploads_dir.lock().unwrap().set_cli_override(UploadsDir(dir.clone()));
        }
    }

    pub fn ffmpeg_path(&self) -> String {
        self.ffmpeg_path.lock().unwrap().get().0.clone()
    }

    pub fn ffprobe_path(&self) -> String {
        self.ffprobe_path.lock().unwrap().get().0.clone()
    }

    pub fn uploads_dir(&self) -> PathBuf {
        self.uploads_dir.lock().unwrap().get().0.clone()
    }

    pub fn provider_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.provider_timeout.lock().unwrap().get().0)
    }
}

pub static CONFIG: LazyLock<ConfigStore> = LazyLock::new(ConfigStore::construct);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_overrides_default_but_not_cli() {
        let mut setting: Setting<FfmpegPath> = Setting {
            default: FfmpegPath::default_value(),
            env: Some(FfmpegPath("from-env".into())),
            cli: None,
        };
        assert_eq!(setting.get().0, "from-env");
        setting.set_cli_override(FfmpegPath("from-cli".into()));
        assert_eq!(setting.get().0, "from-cli");
    }

    #[test]
    fn recommended_concurrency_is_at_least_one() {
        for scope in [
            Scope::GenerateVideo,
            Scope::GenerateJianyingDraft,
            Scope::Tts,
            Scope::GenerateScript,
            Scope::FunAsrModels,
            Scope::Qwen3TtsModels,
        ] {
            assert!(scope.recommended_concurrency() >= 1);
        }
    }
}
