//! # voicevote-core
//!
//! Speech capture, spoken voting dialogue and worker status reporting.
//!
//! ## Architecture
//!
//! ```text
//! Microphone → AudioCapture → SPSC RingBuffer → capture loop (worker thread)
//!                                                    │
//!                                  OfflineBackend ──► OnlineBackend
//!                                  (streaming model)   (energy gate → HTTP)
//!                                                    │
//!                                          SpeechEngine::listen
//!                                                    │
//!                      VoiceSession ── Speaker (espeak-ng, say, SAPI, ...)
//!                           │   └───── VoteStore
//!                           ▼
//!                  StatusChannel (status_<session>.json)
//! ```
//!
//! The audio callback only down-mixes and pushes. Everything else runs on the
//! worker's blocking thread, one capture at a time.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod audio;
pub mod buffering;
pub mod engine;
pub mod error;
pub mod inference;
pub mod ipc;
pub mod session;
pub mod store;
pub mod strategy;
pub mod tts;
pub mod vad;

// Convenience re-exports for downstream crates
pub use engine::{EngineConfig, Listener, RecognitionRequest, SpeechEngine, StopSignal, Transcript};
pub use error::{Result, VoteError};
pub use ipc::{FileStatusChannel, StatusChannel, StatusRecord, StepStatus};
pub use session::{SessionConfig, SessionId, SessionOutcome, VoiceSession};
pub use store::{Candidate, VoteStore};
pub use tts::{Speaker, VoiceKind, VoiceOutput};

#[cfg(feature = "vosk")]
pub use inference::VoskModel;
