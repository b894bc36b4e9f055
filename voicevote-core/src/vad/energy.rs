//! Energy gate with optional ambient-noise calibration.
//!
//! ## Algorithm
//!
//! Energy is the RMS of a block expressed in 16-bit PCM units (0..32767), so
//! thresholds read the same as on any 16-bit capture pipeline.
//!
//! - `Fixed(t)`: a block is speech iff energy ≥ `t`. Never adjusted.
//! - `Dynamic`: the threshold starts at a default, is calibrated against
//!   ambient noise before listening, and keeps tracking ambient energy while
//!   no speech has started:
//!
//!   ```text
//!   damping   = DAMPING ^ block_seconds
//!   target    = energy * RATIO
//!   threshold = threshold * damping + target * (1 - damping)
//!   ```

use super::{VadDecision, VoiceActivityDetector};
use crate::buffering::chunk::AudioChunk;

/// Starting threshold for dynamic mode, in 16-bit RMS units.
pub const DEFAULT_ENERGY_THRESHOLD: f32 = 300.0;

/// Per-second damping of the previous threshold during adaptation.
const DAMPING: f32 = 0.15;

/// How far above ambient energy the threshold settles.
const RATIO: f32 = 1.5;

/// Minimum threshold in dynamic mode; keeps digital silence from collapsing
/// the gate to zero.
const DYNAMIC_FLOOR: f32 = 50.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ThresholdMode {
    /// Use exactly this threshold for the whole capture.
    Fixed(f32),
    /// Calibrate and adapt starting from the given threshold.
    Dynamic(f32),
}

impl ThresholdMode {
    /// `Some(t)` pins the threshold; `None` means auto-calibrate.
    pub fn from_option(fixed: Option<f32>) -> Self {
        match fixed {
            Some(t) => Self::Fixed(t),
            None => Self::Dynamic(DEFAULT_ENERGY_THRESHOLD),
        }
    }
}

/// An energy-threshold speech detector.
#[derive(Debug, Clone)]
pub struct EnergyGate {
    threshold: f32,
    dynamic: bool,
}

impl EnergyGate {
    pub fn new(mode: ThresholdMode) -> Self {
        match mode {
            ThresholdMode::Fixed(t) => Self {
                threshold: t,
                dynamic: false,
            },
            ThresholdMode::Dynamic(t) => Self {
                threshold: t,
                dynamic: true,
            },
        }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn is_dynamic(&self) -> bool {
        self.dynamic
    }

    /// Root-mean-square of `samples` in 16-bit PCM units.
    pub fn energy(samples: &[f32]) -> f32 {
        if samples.is_empty() {
            return 0.0;
        }
        let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
        (sum_sq / samples.len() as f32).sqrt() * i16::MAX as f32
    }

    /// Calibrate against a stretch of ambient audio. No-op when fixed.
    pub fn calibrate(&mut self, ambient: &[AudioChunk]) {
        for chunk in ambient {
            self.adapt(chunk);
        }
        if self.dynamic {
            tracing::debug!(threshold = self.threshold, "energy threshold calibrated");
        }
    }

    /// Move the threshold toward the block's ambient energy. No-op when fixed.
    pub fn adapt(&mut self, chunk: &AudioChunk) {
        if !self.dynamic || chunk.is_empty() {
            return;
        }
        let damping = DAMPING.powf(chunk.duration_secs() as f32);
        let target = Self::energy(&chunk.samples) * RATIO;
        self.threshold = (self.threshold * damping + target * (1.0 - damping)).max(DYNAMIC_FLOOR);
    }
}

impl Default for EnergyGate {
    fn default() -> Self {
        Self::new(ThresholdMode::Dynamic(DEFAULT_ENERGY_THRESHOLD))
    }
}

impl VoiceActivityDetector for EnergyGate {
    fn classify(&mut self, chunk: &AudioChunk) -> VadDecision {
        if !chunk.is_empty() && Self::energy(&chunk.samples) >= self.threshold {
            VadDecision::Speech
        } else {
            VadDecision::Silence
        }
    }
}
