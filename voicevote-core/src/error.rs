use thiserror::Error;

/// All errors produced by voicevote-core.
#[derive(Debug, Error)]
pub enum VoteError {
    #[error("audio device error: {0}")]
    AudioDevice(String),

    #[error("audio stream error: {0}")]
    AudioStream(String),

    #[error("no default input device found")]
    NoDefaultInputDevice,

    #[error("recognizer error: {0}")]
    Recognizer(String),

    #[error("speech service error: {0}")]
    SpeechService(String),

    #[error("model not found: {path}")]
    ModelNotFound { path: std::path::PathBuf },

    #[error("vote store error: {0}")]
    Store(String),

    #[error("speech output failed: {0}")]
    SpeechOutput(String),

    #[error("invalid session id: {0:?}")]
    InvalidSessionId(String),

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("a worker is already running for session {0}")]
    AlreadyRunning(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, VoteError>;
