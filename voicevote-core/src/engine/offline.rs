//! Offline backend: a streaming recognizer fed straight from the microphone.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info};

use super::{BackendKind, EngineConfig, RecognitionBackend, RecognitionRequest, IDLE_POLL};
use crate::{
    audio::AudioOpener,
    buffering::chunk::to_pcm16,
    error::Result,
    inference::{join_fragments, OfflineModel},
    strategy::Strategy,
};

pub struct OfflineBackend {
    /// `None` when no model directory was found; the backend then yields
    /// nothing and the engine falls through.
    model: Option<Box<dyn OfflineModel>>,
    opener: Arc<dyn AudioOpener>,
    config: EngineConfig,
}

impl OfflineBackend {
    pub fn new(
        model: Option<Box<dyn OfflineModel>>,
        opener: Arc<dyn AudioOpener>,
        config: EngineConfig,
    ) -> Self {
        Self {
            model,
            opener,
            config,
        }
    }

}

impl Strategy for OfflineBackend {
    fn name(&self) -> &str {
        "offline"
    }
}

impl RecognitionBackend for OfflineBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Offline
    }

    fn recognize(&mut self, request: &RecognitionRequest) -> Result<Option<String>> {
        let Some(model) = self.model.as_ref() else {
            debug!("no offline model loaded, skipping offline backend");
            return Ok(None);
        };

        let deadline = request.deadline();
        let mut source = self.opener.open(
            request.device.as_ref(),
            self.config.primary_sample_rate,
            self.config.secondary_sample_rate,
        )?;
        let sample_rate = source.sample_rate();
        let mut recognizer = model.recognizer(sample_rate)?;
        info!(sample_rate, "offline listening");

        let mut chunk = vec![0f32; self.config.offline_chunk_samples.max(1)];
        let mut fragments: Vec<String> = Vec::new();
        loop {
            if request.stop_requested() {
                info!("offline capture cancelled");
                break;
            }
            if Instant::now() >= deadline {
                debug!("offline capture deadline reached");
                break;
            }
            let n = source.read(&mut chunk);
            if n == 0 {
                std::thread::sleep(IDLE_POLL);
                continue;
            }
            if let Some(text) = recognizer.accept(&to_pcm16(&chunk[..n]))? {
                debug!(text = text.as_str(), "offline partial utterance");
                fragments.push(text);
            }
        }
        fragments.push(recognizer.finish()?);

        let text = join_fragments(fragments.iter().map(String::as_str));
        Ok(Some(text).filter(|t| !t.is_empty()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::stub::ScriptedOpener;
    use crate::engine::StopSignal;
    use crate::inference::stub::ScriptedModel;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn backend(model: Option<ScriptedModel>, opener: ScriptedOpener) -> OfflineBackend {
        OfflineBackend::new(
            model.map(|m| Box::new(m) as Box<dyn OfflineModel>),
            Arc::new(opener),
            EngineConfig::default(),
        )
    }

    #[test]
    fn missing_model_yields_none_without_opening_audio() {
        let opener = ScriptedOpener::silent();
        let mut offline = backend(None, opener.clone());
        let request = RecognitionRequest::new(Duration::from_millis(50));
        assert_eq!(offline.recognize(&request).unwrap(), None);
        assert_eq!(opener.opens(), 0);
    }

    #[test]
    fn joins_partial_and_final_utterances() {
        let model = ScriptedModel {
            utterances: vec!["first".into()],
            final_text: "one".into(),
            ..ScriptedModel::default()
        };
        let mut offline = backend(Some(model), ScriptedOpener::silent());
        let request = RecognitionRequest::new(Duration::from_millis(100));
        assert_eq!(offline.recognize(&request).unwrap().as_deref(), Some("first one"));
    }

    #[test]
    fn empty_result_is_none() {
        let mut offline = backend(Some(ScriptedModel::with_final("")), ScriptedOpener::silent());
        let request = RecognitionRequest::new(Duration::from_millis(50));
        assert_eq!(offline.recognize(&request).unwrap(), None);
    }

    #[test]
    fn falls_back_to_secondary_rate() {
        let model = ScriptedModel::with_final("hello");
        let opener = ScriptedOpener::new(vec![44_100], vec![], Some(0.0));
        let mut offline = backend(Some(model.clone()), opener);
        let request = RecognitionRequest::new(Duration::from_millis(50));
        offline.recognize(&request).unwrap();
        assert_eq!(model.opened_rates(), vec![44_100]);
    }

    #[test]
    fn stop_predicate_ends_capture_within_one_chunk() {
        let model = ScriptedModel::with_final("partial");
        let polls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&polls);
        let request = RecognitionRequest::new(Duration::from_secs(30))
            .with_stop(Arc::new(move || counter.fetch_add(1, Ordering::SeqCst) >= 3));
        let mut offline = backend(Some(model.clone()), ScriptedOpener::silent());

        let started = Instant::now();
        let got = offline.recognize(&request).unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(got.as_deref(), Some("partial"));
        // Three chunks were fed before the fourth poll fired.
        assert!(model.accepted_samples() <= 3 * EngineConfig::default().offline_chunk_samples);
    }

    #[test]
    fn raised_signal_stops_before_first_chunk() {
        let model = ScriptedModel::with_final("");
        let stop = StopSignal::new();
        stop.raise();
        let request = RecognitionRequest::new(Duration::from_secs(30)).with_stop(stop.predicate());
        let mut offline = backend(Some(model.clone()), ScriptedOpener::silent());
        assert_eq!(offline.recognize(&request).unwrap(), None);
        assert_eq!(model.accepted_samples(), 0);
    }

    #[test]
    fn recognizer_error_propagates() {
        let model = ScriptedModel {
            fail_on_accept: true,
            ..ScriptedModel::default()
        };
        let mut offline = backend(Some(model), ScriptedOpener::silent());
        let request = RecognitionRequest::new(Duration::from_secs(1));
        assert!(offline.recognize(&request).is_err());
    }
}
