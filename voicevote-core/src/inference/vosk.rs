//! Offline recognition with a prepackaged Vosk model.
//!
//! Requires `libvosk` at link time; compiled only with the `vosk` feature.

use std::path::{Path, PathBuf};

use tracing::{debug, info};
use vosk::{DecodingState, Model, Recognizer};

use crate::error::{Result, VoteError};
use crate::inference::{OfflineModel, StreamingRecognizer};

/// A Vosk model directory loaded into memory.
pub struct VoskModel {
    model: Model,
    path: PathBuf,
}

impl VoskModel {
    /// Load the model at `path`.
    ///
    /// # Errors
    /// `ModelNotFound` if the directory is missing or Vosk rejects it.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.is_dir() {
            return Err(VoteError::ModelNotFound {
                path: path.to_path_buf(),
            });
        }
        let model = Model::new(path.to_string_lossy()).ok_or_else(|| VoteError::ModelNotFound {
            path: path.to_path_buf(),
        })?;
        info!(path = %path.display(), "vosk model loaded");
        Ok(Self {
            model,
            path: path.to_path_buf(),
        })
    }
}

impl OfflineModel for VoskModel {
    fn recognizer(&self, sample_rate: u32) -> Result<Box<dyn StreamingRecognizer>> {
        let recognizer = Recognizer::new(&self.model, sample_rate as f32).ok_or_else(|| {
            VoteError::Recognizer(format!("vosk rejected sample rate {sample_rate}"))
        })?;
        debug!(model = %self.path.display(), sample_rate, "vosk recognizer created");
        Ok(Box::new(VoskRecognizer { recognizer }))
    }
}

struct VoskRecognizer {
    recognizer: Recognizer,
}

impl StreamingRecognizer for VoskRecognizer {
    fn accept(&mut self, pcm: &[i16]) -> Result<Option<String>> {
        let state = self
            .recognizer
            .accept_waveform(pcm)
            .map_err(|e| VoteError::Recognizer(format!("{e:?}")))?;
        match state {
            DecodingState::Finalized => {
                let text = self
                    .recognizer
                    .result()
                    .single()
                    .map(|r| r.text.to_string())
                    .unwrap_or_default();
                debug!(text = text.as_str(), "vosk utterance finalized");
                Ok(Some(text))
            }
            DecodingState::Running => Ok(None),
            DecodingState::Failed => Err(VoteError::Recognizer("vosk decoding failed".into())),
        }
    }

    fn finish(&mut self) -> Result<String> {
        Ok(self
            .recognizer
            .final_result()
            .single()
            .map(|r| r.text.to_string())
            .unwrap_or_default())
    }
}
