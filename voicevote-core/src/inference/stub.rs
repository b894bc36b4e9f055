//! Deterministic recognizers for exercising the engine without a model
//! directory or network access.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::error::{Result, VoteError};
use crate::inference::{CloudRecognizer, OfflineModel, StreamingRecognizer};

/// Offline model whose recognizers replay a fixed script.
///
/// Every recognizer it creates emits `utterances` one per accepted chunk,
/// then `final_text` on finish.
#[derive(Debug, Clone, Default)]
pub struct ScriptedModel {
    pub utterances: Vec<String>,
    pub final_text: String,
    /// Fail the first `accept` call with a recognizer error.
    pub fail_on_accept: bool,
    pub(crate) opened_rates: Arc<Mutex<Vec<u32>>>,
    pub(crate) accepted_samples: Arc<AtomicUsize>,
}

impl ScriptedModel {
    pub fn with_final(text: &str) -> Self {
        Self {
            final_text: text.to_string(),
            ..Self::default()
        }
    }

    /// Sample rates passed to `recognizer`, in call order.
    pub fn opened_rates(&self) -> Vec<u32> {
        self.opened_rates.lock().clone()
    }

    /// Total PCM samples fed to all recognizers so far.
    pub fn accepted_samples(&self) -> usize {
        self.accepted_samples.load(Ordering::SeqCst)
    }
}

impl OfflineModel for ScriptedModel {
    fn recognizer(&self, sample_rate: u32) -> Result<Box<dyn StreamingRecognizer>> {
        self.opened_rates.lock().push(sample_rate);
        Ok(Box::new(ScriptedRecognizer {
            pending: self.utterances.iter().cloned().collect(),
            final_text: self.final_text.clone(),
            fail_on_accept: self.fail_on_accept,
            accepted_samples: Arc::clone(&self.accepted_samples),
        }))
    }
}

struct ScriptedRecognizer {
    pending: VecDeque<String>,
    final_text: String,
    fail_on_accept: bool,
    accepted_samples: Arc<AtomicUsize>,
}

impl StreamingRecognizer for ScriptedRecognizer {
    fn accept(&mut self, pcm: &[i16]) -> Result<Option<String>> {
        if self.fail_on_accept {
            return Err(VoteError::Recognizer("scripted failure".into()));
        }
        self.accepted_samples.fetch_add(pcm.len(), Ordering::SeqCst);
        Ok(self.pending.pop_front())
    }

    fn finish(&mut self) -> Result<String> {
        debug!("scripted recognizer finished");
        Ok(std::mem::take(&mut self.final_text))
    }
}

/// One scripted answer from [`ScriptedCloud`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloudReply {
    Text(String),
    Unintelligible,
    Fail(String),
}

/// Cloud recognizer replaying queued replies; `Unintelligible` once drained.
#[derive(Debug, Default)]
pub struct ScriptedCloud {
    replies: Mutex<VecDeque<CloudReply>>,
    calls: AtomicUsize,
    unavailable: bool,
}

impl ScriptedCloud {
    pub fn new(replies: impl IntoIterator<Item = CloudReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().collect()),
            ..Self::default()
        }
    }

    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl CloudRecognizer for ScriptedCloud {
    fn is_available(&self) -> bool {
        !self.unavailable
    }

    fn recognize(&self, _samples: &[f32], _sample_rate: u32) -> Result<Option<String>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.replies.lock().pop_front() {
            Some(CloudReply::Text(text)) => Ok(Some(text)),
            Some(CloudReply::Fail(reason)) => Err(VoteError::SpeechService(reason)),
            Some(CloudReply::Unintelligible) | None => Ok(None),
        }
    }
}
