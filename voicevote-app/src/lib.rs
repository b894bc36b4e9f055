//! VoiceVote host side: settings, the SQLite vote store, the worker manager
//! and the frontend API mirrored by the `voicevote` binary.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod commands;
pub mod manager;
pub mod settings;
pub mod state;
pub mod storage;
pub mod worker;

/// Default `EnvFilter` directive for both binaries.
pub const DEFAULT_LOG_FILTER: &str = "voicevote=info,voicevote_core=info,voicevote_app=info";

/// Install the `tracing` subscriber, writing to stderr.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
