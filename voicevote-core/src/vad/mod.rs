//! Voice Activity Detection (VAD) abstraction.
//!
//! The online backend segments microphone audio into phrases with a
//! `VoiceActivityDetector`: onset when a block turns `Speech`, phrase end
//! after enough consecutive `Silence`.

pub mod energy;

pub use energy::{EnergyGate, ThresholdMode};

use crate::buffering::chunk::AudioChunk;

/// Whether a given audio block contains speech or silence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadDecision {
    /// The block's energy is at or above threshold.
    Speech,
    /// The block is below threshold.
    Silence,
}

impl VadDecision {
    pub fn is_speech(self) -> bool {
        self == VadDecision::Speech
    }
}

/// Trait for all VAD implementations.
pub trait VoiceActivityDetector: Send {
    /// Analyse a block and return a speech/silence decision.
    fn classify(&mut self, chunk: &AudioChunk) -> VadDecision;
}
