//! Online phrase recognition over HTTP.
//!
//! The shipped client talks to the chunked speech-api v2 endpoint: raw
//! 16 kHz little-endian PCM in, newline-separated JSON objects out. The
//! first object is usually an empty `{"result":[]}`; the transcript is the
//! first alternative of the first non-empty result.
//!
//! ## Outcomes
//!
//! - `Ok(Some(text))`: recognized.
//! - `Ok(None)`: the service answered but found nothing intelligible.
//! - `Err(SpeechService)`: transport failure, non-success status, or
//!   unusable payload. Callers end the capture attempt on this.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::audio::resample::RateConverter;
use crate::buffering::chunk::to_pcm16;
use crate::error::{Result, VoteError};

/// Rate the speech service expects.
pub const SERVICE_SAMPLE_RATE: u32 = 16_000;

pub const DEFAULT_SPEECH_API_URL: &str = "https://www.google.com/speech-api/v2/recognize";

/// One-shot recognizer for a captured phrase.
pub trait CloudRecognizer {
    /// Whether the service can be called at all (e.g. credentials present).
    fn is_available(&self) -> bool {
        true
    }

    fn recognize(&self, samples: &[f32], sample_rate: u32) -> Result<Option<String>>;
}

impl<T: CloudRecognizer + ?Sized> CloudRecognizer for Arc<T> {
    fn is_available(&self) -> bool {
        (**self).is_available()
    }

    fn recognize(&self, samples: &[f32], sample_rate: u32) -> Result<Option<String>> {
        (**self).recognize(samples, sample_rate)
    }
}

/// Connection settings for [`SpeechServiceClient`].
#[derive(Debug, Clone)]
pub struct SpeechServiceConfig {
    pub url: String,
    /// API key; `None` makes the online backend unavailable.
    pub api_key: Option<String>,
    /// BCP-47 language tag, e.g. `en-US`.
    pub language: String,
    pub request_timeout: Duration,
}

impl Default for SpeechServiceConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_SPEECH_API_URL.to_string(),
            api_key: None,
            language: "en-US".to_string(),
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// Blocking HTTP client for the speech service.
pub struct SpeechServiceClient {
    config: SpeechServiceConfig,
    http: reqwest::blocking::Client,
}

impl SpeechServiceClient {
    pub fn new(config: SpeechServiceConfig) -> Result<Self> {
        let http = reqwest::blocking::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| VoteError::SpeechService(format!("client build failed: {e}")))?;
        Ok(Self { config, http })
    }

    fn api_key(&self) -> Option<&str> {
        self.config
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
    }
}

impl CloudRecognizer for SpeechServiceClient {
    fn is_available(&self) -> bool {
        self.api_key().is_some()
    }

    fn recognize(&self, samples: &[f32], sample_rate: u32) -> Result<Option<String>> {
        let Some(key) = self.api_key() else {
            return Err(VoteError::SpeechService("no API key configured".into()));
        };
        if samples.is_empty() {
            return Ok(None);
        }

        let mut converter = RateConverter::new(sample_rate, SERVICE_SAMPLE_RATE, 1024)?;
        let prepared = converter.convert_all(samples);
        let body: Vec<u8> = to_pcm16(&prepared)
            .into_iter()
            .flat_map(i16::to_le_bytes)
            .collect();

        debug!(
            bytes = body.len(),
            sample_rate,
            resampled = !converter.is_passthrough(),
            "uploading phrase to speech service"
        );

        let response = self
            .http
            .post(&self.config.url)
            .query(&[
                ("client", "chromium"),
                ("lang", self.config.language.as_str()),
                ("key", key),
            ])
            .header(
                reqwest::header::CONTENT_TYPE,
                format!("audio/l16; rate={SERVICE_SAMPLE_RATE}"),
            )
            .body(body)
            .send()
            .map_err(|e| {
                warn!(error = %e, "speech service request failed");
                VoteError::SpeechService(format!("request failed: {e}"))
            })?;

        let status = response.status();
        if !status.is_success() {
            warn!(%status, "speech service returned non-success status");
            return Err(VoteError::SpeechService(format!("status {status}")));
        }

        let text = response
            .text()
            .map_err(|e| VoteError::SpeechService(format!("body read failed: {e}")))?;
        parse_transcript(&text)
    }
}

/// Extract the best transcript from a newline-delimited JSON response.
///
/// Lines that fail to parse are an error; a well-formed response without any
/// alternative is `Ok(None)`.
pub fn parse_transcript(body: &str) -> Result<Option<String>> {
    for line in body.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let value: serde_json::Value = serde_json::from_str(line)
            .map_err(|e| VoteError::SpeechService(format!("malformed response: {e}")))?;
        let transcript = value
            .get("result")
            .and_then(|r| r.as_array())
            .and_then(|results| results.first())
            .and_then(|first| first.get("alternative"))
            .and_then(|a| a.as_array())
            .and_then(|alternatives| {
                alternatives
                    .iter()
                    .find_map(|alt| alt.get("transcript").and_then(|t| t.as_str()))
            });
        if let Some(text) = transcript {
            let text = text.trim();
            if !text.is_empty() {
                return Ok(Some(text.to_string()));
            }
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_first_alternative_after_empty_result() {
        let body = concat!(
            "{\"result\":[]}\n",
            "{\"result\":[{\"alternative\":[{\"transcript\":\"first one\",\"confidence\":0.92},",
            "{\"transcript\":\"first won\"}],\"final\":true}],\"result_index\":0}\n"
        );
        assert_eq!(parse_transcript(body).unwrap().as_deref(), Some("first one"));
    }

    #[test]
    fn empty_results_are_unintelligible() {
        assert_eq!(parse_transcript("{\"result\":[]}\n").unwrap(), None);
        assert_eq!(parse_transcript("").unwrap(), None);
    }

    #[test]
    fn malformed_body_is_service_error() {
        let err = parse_transcript("<html>quota</html>").unwrap_err();
        assert!(matches!(err, VoteError::SpeechService(_)));
    }

    #[test]
    fn missing_key_means_unavailable() {
        let client = SpeechServiceClient::new(SpeechServiceConfig::default()).unwrap();
        assert!(!client.is_available());
        assert!(client.recognize(&[0.1; 160], 16_000).is_err());

        let keyed = SpeechServiceClient::new(SpeechServiceConfig {
            api_key: Some("  ".into()),
            ..SpeechServiceConfig::default()
        })
        .unwrap();
        assert!(!keyed.is_available());
    }
}
