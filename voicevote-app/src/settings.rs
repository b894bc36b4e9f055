//! Persistent voting settings (JSON file in the app data directory).

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;
use voicevote_core::{
    engine::BackendKind,
    inference::{cloud::DEFAULT_SPEECH_API_URL, SpeechServiceConfig},
    vad::energy::DEFAULT_ENERGY_THRESHOLD,
    EngineConfig, SessionConfig, VoiceKind,
};

pub const SETTINGS_ENV: &str = "VOICEVOTE_SETTINGS";
pub const SPEECH_API_KEY_ENV: &str = "VOICEVOTE_SPEECH_API_KEY";
pub const STATUS_DIR_ENV: &str = "VOICEVOTE_STATUS_DIR";
pub const DB_PATH_ENV: &str = "VOICEVOTE_DB_PATH";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct VoteSettings {
    /// Index or exact name; `None` selects the system default input.
    pub input_device: Option<String>,
    /// Try the offline recognizer before the speech service.
    pub prefer_offline: bool,
    pub vosk_model_path: Option<PathBuf>,
    pub primary_sample_rate: u32,
    pub secondary_sample_rate: u32,
    /// Fixed threshold in 16-bit RMS units. Ignored while `dynamic_energy`.
    pub energy_threshold: Option<f32>,
    pub dynamic_energy: bool,
    pub step_timeout_secs: u64,
    pub announcement_pause_ms: u64,
    pub speech_language: String,
    pub speech_api_url: String,
    pub speech_api_key: Option<String>,
    pub voice_order: Vec<VoiceKind>,
    pub status_dir: Option<PathBuf>,
    pub db_path: Option<PathBuf>,
    pub cancel_grace_ms: u64,
}

impl Default for VoteSettings {
    fn default() -> Self {
        Self {
            input_device: None,
            prefer_offline: true,
            vosk_model_path: None,
            primary_sample_rate: 16_000,
            secondary_sample_rate: 44_100,
            energy_threshold: None,
            dynamic_energy: true,
            step_timeout_secs: 15,
            announcement_pause_ms: 300,
            speech_language: "en-US".into(),
            speech_api_url: DEFAULT_SPEECH_API_URL.into(),
            speech_api_key: None,
            voice_order: VoiceKind::ALL.to_vec(),
            status_dir: None,
            db_path: None,
            cancel_grace_ms: 2_000,
        }
    }
}

impl VoteSettings {
    pub fn normalize(&mut self) {
        self.input_device = trimmed(self.input_device.take());
        self.speech_api_key = trimmed(self.speech_api_key.take());
        self.energy_threshold = self.energy_threshold.map(|t| t.clamp(50.0, 4000.0));
        self.step_timeout_secs = self.step_timeout_secs.clamp(3, 120);
        self.announcement_pause_ms = self.announcement_pause_ms.min(5_000);
        self.cancel_grace_ms = self.cancel_grace_ms.clamp(100, 30_000);
        if !(8_000..=96_000).contains(&self.primary_sample_rate) {
            self.primary_sample_rate = 16_000;
        }
        if !(8_000..=96_000).contains(&self.secondary_sample_rate) {
            self.secondary_sample_rate = 44_100;
        }
        self.speech_language = match self.speech_language.trim() {
            "" => "en-US".into(),
            lang => lang.to_string(),
        };
        if self.speech_api_url.trim().is_empty() {
            self.speech_api_url = DEFAULT_SPEECH_API_URL.into();
        }
        let mut order = Vec::new();
        for kind in &self.voice_order {
            if !order.contains(kind) {
                order.push(*kind);
            }
        }
        self.voice_order = if order.is_empty() {
            VoiceKind::ALL.to_vec()
        } else {
            order
        };
    }

    /// Environment variables win over the file.
    pub fn apply_env_overrides(&mut self) {
        if let Some(key) = env_value(SPEECH_API_KEY_ENV) {
            self.speech_api_key = Some(key);
        }
        if let Some(dir) = env_value(STATUS_DIR_ENV) {
            self.status_dir = Some(PathBuf::from(dir));
        }
        if let Some(path) = env_value(DB_PATH_ENV) {
            self.db_path = Some(PathBuf::from(path));
        }
    }

    /// Threshold handed to the capture request; `None` means calibrate.
    pub fn capture_threshold(&self) -> Option<f32> {
        if self.dynamic_energy {
            None
        } else {
            Some(self.energy_threshold.unwrap_or(DEFAULT_ENERGY_THRESHOLD))
        }
    }

    pub fn backend_preference(&self) -> Vec<BackendKind> {
        if self.prefer_offline {
            vec![BackendKind::Offline, BackendKind::Online]
        } else {
            vec![BackendKind::Online, BackendKind::Offline]
        }
    }

    pub fn step_timeout(&self) -> Duration {
        Duration::from_secs(self.step_timeout_secs)
    }

    pub fn cancel_grace(&self) -> Duration {
        Duration::from_millis(self.cancel_grace_ms)
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            primary_sample_rate: self.primary_sample_rate,
            secondary_sample_rate: self.secondary_sample_rate,
            ..EngineConfig::default()
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            step_timeout: self.step_timeout(),
            announcement_pause: Duration::from_millis(self.announcement_pause_ms),
        }
    }

    pub fn speech_service(&self) -> SpeechServiceConfig {
        SpeechServiceConfig {
            url: self.speech_api_url.clone(),
            api_key: self.speech_api_key.clone(),
            language: self.speech_language.clone(),
            ..SpeechServiceConfig::default()
        }
    }

    pub fn status_dir(&self) -> PathBuf {
        self.status_dir
            .clone()
            .unwrap_or_else(|| data_dir().join("status"))
    }

    pub fn db_path(&self) -> PathBuf {
        self.db_path
            .clone()
            .unwrap_or_else(|| data_dir().join("voting.db"))
    }
}

fn trimmed(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_value(name: &str) -> Option<String> {
    trimmed(std::env::var(name).ok())
}

/// Per-user data directory for settings, status files and the database.
pub fn data_dir() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("VoiceVote")
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var_os("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                std::env::var_os("HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("/tmp"))
                    .join(".local")
                    .join("share")
            })
            .join("voicevote")
    }
}

pub fn default_settings_path() -> PathBuf {
    std::env::var_os(SETTINGS_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| data_dir().join("settings.json"))
}

/// Read settings, falling back to defaults on a missing or malformed file.
pub fn load_settings(path: &Path) -> VoteSettings {
    let mut settings = match fs::read_to_string(path) {
        Ok(raw) => serde_json::from_str::<VoteSettings>(&raw).unwrap_or_else(|e| {
            warn!(path = %path.display(), "ignoring malformed settings: {e}");
            VoteSettings::default()
        }),
        Err(_) => VoteSettings::default(),
    };
    settings.normalize();
    settings
}

/// Settings file plus environment overrides.
pub fn effective_settings() -> VoteSettings {
    let mut settings = load_settings(&default_settings_path());
    settings.apply_env_overrides();
    settings
}

pub fn save_settings(path: &Path, settings: &VoteSettings) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(settings).map_err(std::io::Error::other)?;
    fs::write(path, json)
}
