//! Recognizer abstractions for the two speech backends.
//!
//! - [`StreamingRecognizer`]: stateful decoder fed incrementally with 16-bit
//!   PCM, produced per capture by an [`OfflineModel`]. The Vosk binding lives
//!   behind the `vosk` feature.
//! - [`CloudRecognizer`]: one-shot phrase recognition over HTTP.
//!
//! `&mut self` on the streaming calls expresses that decoders carry state
//! between chunks; a recognizer is never shared across captures.

pub mod cloud;
pub mod stub;

#[cfg(feature = "vosk")]
pub mod vosk;

pub use cloud::{CloudRecognizer, SpeechServiceClient, SpeechServiceConfig};

#[cfg(feature = "vosk")]
pub use self::vosk::VoskModel;

use crate::error::Result;

/// Incremental recognizer for one capture.
pub trait StreamingRecognizer {
    /// Feed mono 16-bit PCM at the rate the recognizer was created with.
    ///
    /// Returns `Some(text)` when the decoder closed an utterance on this chunk.
    fn accept(&mut self, pcm: &[i16]) -> Result<Option<String>>;

    /// Flush the decoder and return the text of the trailing utterance
    /// (possibly empty).
    fn finish(&mut self) -> Result<String>;
}

/// A loaded offline model that can open recognizers.
pub trait OfflineModel {
    /// Create a fresh recognizer for audio at `sample_rate`.
    fn recognizer(&self, sample_rate: u32) -> Result<Box<dyn StreamingRecognizer>>;
}

/// Join utterance fragments with single spaces, skipping blanks.
pub(crate) fn join_fragments<'a>(parts: impl IntoIterator<Item = &'a str>) -> String {
    parts
        .into_iter()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::join_fragments;

    #[test]
    fn joins_non_blank_fragments() {
        assert_eq!(join_fragments(["first", "  ", " one "]), "first one");
        assert_eq!(join_fragments(Vec::<&str>::new()), "");
    }
}
