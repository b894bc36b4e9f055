//! `SpeechEngine`: one capture call over two recognition backends.
//!
//! ## Capture flow
//!
//! ```text
//! capture(request)
//!     ├─► OfflineBackend   (streaming recognizer, 4 000-sample chunks)
//!     │       └─ None / Err ─┐
//!     └─► OnlineBackend  ◄───┘  (calibrate → onset ≤ 1 s → phrase → HTTP)
//! ```
//!
//! Backends run strictly one after the other, in the request's preference
//! order, through a [`StrategyList`]. Every expected failure (no speech, no
//! model, no network, service error) surfaces as `None`; the cause is
//! logged, never returned.
//!
//! ## Cancellation
//!
//! The request carries a stop predicate that the capture loops poll between
//! chunks. Once it fires the current backend returns promptly and the
//! microphone is released on drop.

pub mod offline;
pub mod online;

pub use offline::OfflineBackend;
pub use online::OnlineBackend;

use std::fmt;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
    audio::{AudioOpener, DeviceSelector},
    error::Result,
    inference::{CloudRecognizer, OfflineModel},
    strategy::{Strategy, StrategyList},
};

/// Sleep between polls of an empty audio source.
pub(crate) const IDLE_POLL: Duration = Duration::from_millis(5);

/// Cancellation predicate polled between audio chunks.
pub type StopPredicate = Arc<dyn Fn() -> bool + Send + Sync>;

/// A shareable stop flag that produces [`StopPredicate`]s.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn predicate(&self) -> StopPredicate {
        let flag = Arc::clone(&self.0);
        Arc::new(move || flag.load(Ordering::SeqCst))
    }
}

/// Recognition backend kinds, in the vocabulary used by settings files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Offline,
    Online,
}

impl BackendKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Offline => "offline",
            Self::Online => "online",
        }
    }
}

/// Parameters of one capture attempt.
#[derive(Clone)]
pub struct RecognitionRequest {
    /// Wall-clock budget for the whole attempt, shared by all backends.
    pub timeout: Duration,
    /// End of the attempt, pinned once by [`SpeechEngine::capture`].
    deadline: Option<Instant>,
    /// Input device; `None` selects the system default.
    pub device: Option<DeviceSelector>,
    /// Fixed energy threshold in 16-bit RMS units; `None` auto-calibrates.
    pub energy_threshold: Option<f32>,
    pub should_stop: StopPredicate,
    /// Backends to try, in order.
    pub preference: Vec<BackendKind>,
}

impl RecognitionRequest {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            deadline: None,
            device: None,
            energy_threshold: None,
            should_stop: Arc::new(|| false),
            preference: vec![BackendKind::Offline, BackendKind::Online],
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self.deadline = None;
        self
    }

    /// Pin the deadline to now plus the timeout, unless already pinned.
    pub fn anchored(mut self) -> Self {
        if self.deadline.is_none() {
            self.deadline = Some(Instant::now() + self.timeout);
        }
        self
    }

    /// The pinned deadline, or now plus the timeout for an unpinned request.
    pub fn deadline(&self) -> Instant {
        self.deadline
            .unwrap_or_else(|| Instant::now() + self.timeout)
    }

    pub fn is_expired(&self) -> bool {
        self.deadline.is_some_and(|deadline| Instant::now() >= deadline)
    }

    pub fn with_device(mut self, device: Option<DeviceSelector>) -> Self {
        self.device = device;
        self
    }

    pub fn with_energy_threshold(mut self, threshold: Option<f32>) -> Self {
        self.energy_threshold = threshold;
        self
    }

    pub fn with_stop(mut self, should_stop: StopPredicate) -> Self {
        self.should_stop = should_stop;
        self
    }

    pub fn with_preference(mut self, preference: Vec<BackendKind>) -> Self {
        self.preference = preference;
        self
    }

    pub fn stop_requested(&self) -> bool {
        (self.should_stop)()
    }
}

impl fmt::Debug for RecognitionRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecognitionRequest")
            .field("timeout", &self.timeout)
            .field("deadline", &self.deadline)
            .field("device", &self.device)
            .field("energy_threshold", &self.energy_threshold)
            .field("preference", &self.preference)
            .finish_non_exhaustive()
    }
}

/// A normalized (trimmed, lowercase, non-empty) transcript.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Transcript(String);

impl Transcript {
    /// Normalize raw recognizer output; blank input yields `None`.
    pub fn normalize(raw: &str) -> Option<Self> {
        let text = raw.trim().to_lowercase();
        if text.is_empty() {
            None
        } else {
            Some(Self(text))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for Transcript {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Timing and rate parameters shared by both backends.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Rate the offline backend asks for first (Hz). Default: 16 000.
    pub primary_sample_rate: u32,
    /// Rate tried when the device rejects the primary one, and the rate the
    /// online backend asks for first (Hz). Default: 44 100.
    pub secondary_sample_rate: u32,
    /// Offline feed size in samples. Default: 4 000.
    pub offline_chunk_samples: usize,
    /// Online analysis block length. Default: 50 ms.
    pub block_duration: Duration,
    /// Ambient calibration length when no fixed threshold is given.
    pub calibration: Duration,
    /// Longest wait for speech onset per slice.
    pub onset_timeout: Duration,
    /// Lower bound on a phrase slice.
    pub min_phrase: Duration,
    /// Upper bound on a phrase slice.
    pub phrase_limit: Duration,
    /// Trailing silence that ends a phrase.
    pub pause_threshold: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            primary_sample_rate: 16_000,
            secondary_sample_rate: 44_100,
            offline_chunk_samples: 4_000,
            block_duration: Duration::from_millis(50),
            calibration: Duration::from_millis(500),
            onset_timeout: Duration::from_secs(1),
            min_phrase: Duration::from_millis(500),
            phrase_limit: Duration::from_secs(5),
            pause_threshold: Duration::from_millis(800),
        }
    }
}

/// A speech recognition backend taking part in the fallback chain.
pub trait RecognitionBackend: Strategy {
    fn kind(&self) -> BackendKind;

    /// Run one capture attempt.
    ///
    /// `Ok(None)` means nothing was heard or the backend is unavailable;
    /// `Err` is logged by the engine and treated the same way.
    fn recognize(&mut self, request: &RecognitionRequest) -> Result<Option<String>>;
}

/// Something that can listen for one utterance.
pub trait Listener {
    fn listen(&mut self, timeout: Duration) -> Option<Transcript>;
}

/// Ordered offline → online speech capture.
pub struct SpeechEngine {
    backends: StrategyList<dyn RecognitionBackend>,
    /// Device, threshold, stop predicate and preference used by `listen`.
    defaults: RecognitionRequest,
}

impl SpeechEngine {
    pub fn new(backends: Vec<Box<dyn RecognitionBackend>>) -> Self {
        Self {
            backends: StrategyList::new(backends),
            defaults: RecognitionRequest::new(Duration::from_secs(15)),
        }
    }

    /// The standard two-backend engine sharing one audio opener.
    pub fn with_backends(
        config: EngineConfig,
        offline_model: Option<Box<dyn OfflineModel>>,
        cloud: Box<dyn CloudRecognizer>,
        opener: Arc<dyn AudioOpener>,
    ) -> Self {
        Self::new(vec![
            Box::new(OfflineBackend::new(
                offline_model,
                Arc::clone(&opener),
                config.clone(),
            )),
            Box::new(OnlineBackend::new(cloud, opener, config)),
        ])
    }

    /// Template for requests built by [`Listener::listen`]; its timeout is
    /// replaced per call.
    pub fn with_defaults(mut self, defaults: RecognitionRequest) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn backend_names(&self) -> Vec<&str> {
        self.backends.names()
    }

    /// Capture one utterance.
    ///
    /// The deadline is fixed on entry; a backend that falls through leaves
    /// only the remainder to the next one.
    pub fn capture(&mut self, request: &RecognitionRequest) -> Option<Transcript> {
        let started = Instant::now();
        let request = request.clone().anchored();
        let transcript = self.backends.first_success_by_key(
            request.preference.as_slice(),
            |backend| backend.kind(),
            |backend| {
                if request.stop_requested() {
                    debug!(backend = backend.name(), "capture cancelled, skipping backend");
                    return Ok(None);
                }
                if request.is_expired() {
                    debug!(backend = backend.name(), "capture deadline passed, skipping backend");
                    return Ok(None);
                }
                debug!(backend = backend.name(), "capture attempt");
                let raw = backend.recognize(&request)?;
                Ok(raw.as_deref().and_then(Transcript::normalize))
            },
        );
        match &transcript {
            Some(text) => info!(
                elapsed_ms = started.elapsed().as_millis() as u64,
                transcript = text.as_str(),
                "speech captured"
            ),
            None => info!(
                elapsed_ms = started.elapsed().as_millis() as u64,
                "no speech captured"
            ),
        }
        transcript
    }
}

impl Listener for SpeechEngine {
    fn listen(&mut self, timeout: Duration) -> Option<Transcript> {
        let request = self.defaults.clone().with_timeout(timeout);
        self.capture(&request)
    }
}
