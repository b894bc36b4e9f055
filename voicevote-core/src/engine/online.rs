//! Online backend: energy-gated phrase capture sent to a speech service.
//!
//! ## Listening loop
//!
//! ```text
//! open mic ─► calibrate (unless fixed) ─► slice ─► slice ─► ...
//!                                           │
//!               wait for onset ≤ onset_timeout (threshold adapts)
//!               record until pause or clamp(remaining, min, limit)
//!               recognize ─► text: done
//!                          ─► unintelligible: next slice
//!                          ─► error: attempt over
//! ```
//!
//! Phrase and onset limits are counted in samples so they hold regardless
//! of how fast the source delivers audio; the overall deadline is wall-clock.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::{BackendKind, EngineConfig, RecognitionBackend, RecognitionRequest, IDLE_POLL};
use crate::{
    audio::{AudioOpener, AudioSource},
    buffering::chunk::AudioChunk,
    error::Result,
    inference::CloudRecognizer,
    strategy::Strategy,
    vad::{EnergyGate, ThresholdMode, VoiceActivityDetector},
};

pub struct OnlineBackend {
    recognizer: Box<dyn CloudRecognizer>,
    opener: Arc<dyn AudioOpener>,
    config: EngineConfig,
}

enum Block {
    Audio(AudioChunk),
    Stopped,
    Expired,
}

enum Slice {
    Phrase(Vec<f32>),
    NoOnset,
    Stopped,
    Expired,
}

/// Pulls fixed-length blocks from a source, honoring stop and deadline.
struct BlockReader<'a> {
    source: Box<dyn AudioSource>,
    request: &'a RecognitionRequest,
    deadline: Instant,
    block_samples: usize,
}

impl BlockReader<'_> {
    fn sample_rate(&self) -> u32 {
        self.source.sample_rate()
    }

    fn samples_for(&self, duration: Duration) -> usize {
        (duration.as_secs_f64() * self.sample_rate() as f64).round() as usize
    }

    fn next(&mut self) -> Block {
        let mut samples = vec![0f32; self.block_samples];
        let mut filled = 0;
        while filled < samples.len() {
            if self.request.stop_requested() {
                return Block::Stopped;
            }
            if Instant::now() >= self.deadline {
                return Block::Expired;
            }
            let n = self.source.read(&mut samples[filled..]);
            if n == 0 {
                std::thread::sleep(IDLE_POLL);
            }
            filled += n;
        }
        Block::Audio(AudioChunk::new(samples, self.sample_rate()))
    }
}

impl OnlineBackend {
    pub fn new(
        recognizer: Box<dyn CloudRecognizer>,
        opener: Arc<dyn AudioOpener>,
        config: EngineConfig,
    ) -> Self {
        Self {
            recognizer,
            opener,
            config,
        }
    }

    fn calibrate(&self, reader: &mut BlockReader<'_>, gate: &mut EnergyGate) -> Option<Block> {
        let wanted = reader.samples_for(self.config.calibration);
        let mut ambient = Vec::new();
        let mut collected = 0;
        while collected < wanted {
            match reader.next() {
                Block::Audio(chunk) => {
                    collected += chunk.samples.len();
                    ambient.push(chunk);
                }
                other => return Some(other),
            }
        }
        gate.calibrate(&ambient);
        debug!(threshold = gate.threshold(), "ambient calibration done");
        None
    }

    fn listen_slice(
        &self,
        reader: &mut BlockReader<'_>,
        gate: &mut EnergyGate,
        phrase_limit: Duration,
    ) -> Slice {
        let onset_budget = reader.samples_for(self.config.onset_timeout);
        let phrase_budget = reader.samples_for(phrase_limit);
        let pause_budget = reader.samples_for(self.config.pause_threshold);

        let mut waited = 0;
        let mut phrase = loop {
            match reader.next() {
                Block::Audio(chunk) => {
                    if gate.classify(&chunk).is_speech() {
                        break chunk.samples;
                    }
                    gate.adapt(&chunk);
                    waited += chunk.samples.len();
                    if waited >= onset_budget {
                        return Slice::NoOnset;
                    }
                }
                Block::Stopped => return Slice::Stopped,
                Block::Expired => return Slice::Expired,
            }
        };

        let mut trailing_silence = 0;
        while phrase.len() < phrase_budget && trailing_silence < pause_budget {
            match reader.next() {
                Block::Audio(chunk) => {
                    if gate.classify(&chunk).is_speech() {
                        trailing_silence = 0;
                    } else {
                        trailing_silence += chunk.samples.len();
                    }
                    phrase.extend_from_slice(&chunk.samples);
                }
                Block::Stopped => return Slice::Stopped,
                // Recognize what was heard before the deadline.
                Block::Expired => break,
            }
        }
        Slice::Phrase(phrase)
    }
}

impl Strategy for OnlineBackend {
    fn name(&self) -> &str {
        "online"
    }
}

impl RecognitionBackend for OnlineBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Online
    }

    fn recognize(&mut self, request: &RecognitionRequest) -> Result<Option<String>> {
        if !self.recognizer.is_available() {
            warn!("online recognizer unavailable, skipping");
            return Ok(None);
        }

        let deadline = request.deadline();
        let source = self.opener.open(
            request.device.as_ref(),
            self.config.secondary_sample_rate,
            self.config.primary_sample_rate,
        )?;
        let sample_rate = source.sample_rate();
        let block_samples =
            ((self.config.block_duration.as_secs_f64() * sample_rate as f64) as usize).max(1);
        let mut reader = BlockReader {
            source,
            request,
            deadline,
            block_samples,
        };

        let mut gate = EnergyGate::new(ThresholdMode::from_option(request.energy_threshold));
        if gate.is_dynamic() && self.calibrate(&mut reader, &mut gate).is_some() {
            debug!("capture ended during calibration");
            return Ok(None);
        }
        info!(sample_rate, threshold = gate.threshold(), "online listening");

        let min_phrase = self.config.min_phrase;
        let max_phrase = self.config.phrase_limit.max(min_phrase);
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            let phrase_limit = remaining.clamp(min_phrase, max_phrase);
            match self.listen_slice(&mut reader, &mut gate, phrase_limit) {
                Slice::Phrase(samples) => {
                    debug!(samples = samples.len(), "phrase captured");
                    match self.recognizer.recognize(&samples, sample_rate)? {
                        Some(text) => return Ok(Some(text)),
                        None => debug!("speech service could not understand phrase"),
                    }
                }
                Slice::NoOnset => continue,
                Slice::Stopped => {
                    info!("online capture cancelled");
                    return Ok(None);
                }
                Slice::Expired => return Ok(None),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::stub::ScriptedOpener;
    use crate::engine::StopSignal;
    use crate::inference::stub::{CloudReply, ScriptedCloud};
    use std::sync::atomic::{AtomicUsize, Ordering};

    const RATE: u32 = 44_100;

    fn seconds(level: f32, secs: f32) -> Vec<f32> {
        vec![level; (RATE as f32 * secs) as usize]
    }

    fn backend(cloud: Arc<ScriptedCloud>, opener: ScriptedOpener) -> OnlineBackend {
        OnlineBackend::new(Box::new(cloud), Arc::new(opener), EngineConfig::default())
    }

    fn fixed_request(timeout: Duration) -> RecognitionRequest {
        RecognitionRequest::new(timeout).with_energy_threshold(Some(300.0))
    }

    #[test]
    fn recognizes_first_phrase() {
        let cloud = Arc::new(ScriptedCloud::new([CloudReply::Text("Candidate 2".into())]));
        let opener = ScriptedOpener::new(vec![], vec![seconds(0.3, 0.6)], Some(0.0));
        let mut online = backend(Arc::clone(&cloud), opener);
        let got = online.recognize(&fixed_request(Duration::from_secs(5))).unwrap();
        assert_eq!(got.as_deref(), Some("Candidate 2"));
        assert_eq!(cloud.calls(), 1);
    }

    #[test]
    fn unintelligible_keeps_listening() {
        let cloud = Arc::new(ScriptedCloud::new([
            CloudReply::Unintelligible,
            CloudReply::Text("confirm".into()),
        ]));
        let opener = ScriptedOpener::new(
            vec![],
            vec![seconds(0.3, 0.5), seconds(0.0, 1.0), seconds(0.3, 0.5)],
            Some(0.0),
        );
        let mut online = backend(Arc::clone(&cloud), opener);
        let got = online.recognize(&fixed_request(Duration::from_secs(5))).unwrap();
        assert_eq!(got.as_deref(), Some("confirm"));
        assert_eq!(cloud.calls(), 2);
    }

    #[test]
    fn service_error_ends_attempt_without_retry() {
        let cloud = Arc::new(ScriptedCloud::new([
            CloudReply::Fail("no network".into()),
            CloudReply::Text("never".into()),
        ]));
        let opener = ScriptedOpener::new(
            vec![],
            vec![seconds(0.3, 0.5), seconds(0.0, 1.0), seconds(0.3, 0.5)],
            Some(0.0),
        );
        let mut online = backend(Arc::clone(&cloud), opener);
        assert!(online.recognize(&fixed_request(Duration::from_secs(5))).is_err());
        assert_eq!(cloud.calls(), 1);
    }

    #[test]
    fn silence_until_deadline_yields_none() {
        let cloud = Arc::new(ScriptedCloud::new([]));
        let mut online = backend(Arc::clone(&cloud), ScriptedOpener::silent());
        let started = Instant::now();
        let got = online
            .recognize(&RecognitionRequest::new(Duration::from_millis(200)))
            .unwrap();
        assert_eq!(got, None);
        assert_eq!(cloud.calls(), 0);
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[test]
    fn stop_signal_ends_capture() {
        let cloud = Arc::new(ScriptedCloud::new([]));
        let stop = StopSignal::new();
        stop.raise();
        let mut online = backend(Arc::clone(&cloud), ScriptedOpener::silent());
        let request = fixed_request(Duration::from_secs(30)).with_stop(stop.predicate());
        let started = Instant::now();
        assert_eq!(online.recognize(&request).unwrap(), None);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn stop_raised_mid_capture_ends_within_one_block() {
        let cloud = Arc::new(ScriptedCloud::new([]));
        let polls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&polls);
        // Silence keeps the onset wait going; the flag flips on the sixth poll.
        let request = fixed_request(Duration::from_secs(30))
            .with_stop(Arc::new(move || counter.fetch_add(1, Ordering::SeqCst) >= 5));
        let mut online = backend(Arc::clone(&cloud), ScriptedOpener::silent());

        let started = Instant::now();
        assert_eq!(online.recognize(&request).unwrap(), None);
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(polls.load(Ordering::SeqCst), 6);
        assert_eq!(cloud.calls(), 0);
    }

    #[test]
    fn unavailable_service_skips_microphone() {
        let cloud = Arc::new(ScriptedCloud::unavailable());
        let opener = ScriptedOpener::silent();
        let mut online = backend(cloud, opener.clone());
        assert_eq!(
            online
                .recognize(&fixed_request(Duration::from_secs(1)))
                .unwrap(),
            None
        );
        assert_eq!(opener.opens(), 0);
    }

    #[test]
    fn dynamic_threshold_calibrates_before_listening() {
        // Calibration eats the first half second of steady hum; the louder
        // phrase after it is still detected.
        let cloud = Arc::new(ScriptedCloud::new([CloudReply::Text("first one".into())]));
        let opener = ScriptedOpener::new(
            vec![],
            vec![seconds(0.02, 0.5), seconds(0.4, 0.6)],
            Some(0.02),
        );
        let mut online = backend(Arc::clone(&cloud), opener);
        let got = online
            .recognize(&RecognitionRequest::new(Duration::from_secs(5)))
            .unwrap();
        assert_eq!(got.as_deref(), Some("first one"));
    }
}
