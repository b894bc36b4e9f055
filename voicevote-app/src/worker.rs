//! Assembly of one voting session inside the worker process.

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};
use voicevote_core::{
    audio::{DeviceSelector, MicrophoneOpener},
    inference::{OfflineModel, SpeechServiceClient},
    ipc::{FileStatusChannel, StatusChannel, StatusRecord},
    tts::DEFAULT_SPEECH_TIMEOUT,
    RecognitionRequest, SessionId, SessionOutcome, SpeechEngine, StopSignal, VoiceOutput,
    VoiceSession,
};

use crate::settings::VoteSettings;
use crate::storage::SqliteVoteStore;

/// The offline model named in settings, if this build can load one.
pub fn load_offline_model(settings: &VoteSettings) -> Option<Box<dyn OfflineModel>> {
    let path = settings.vosk_model_path.as_deref()?;

    #[cfg(feature = "vosk")]
    {
        match voicevote_core::VoskModel::load(path) {
            Ok(model) => Some(Box::new(model)),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "offline model unavailable");
                None
            }
        }
    }
    #[cfg(not(feature = "vosk"))]
    {
        warn!(path = %path.display(), "built without offline recognizer support");
        None
    }
}

/// Capture template derived from settings: device, threshold, backend order
/// and the stop flag.
pub fn capture_defaults(settings: &VoteSettings, stop: &StopSignal) -> RecognitionRequest {
    RecognitionRequest::new(settings.step_timeout())
        .with_device(settings.input_device.as_deref().and_then(DeviceSelector::parse))
        .with_energy_threshold(settings.capture_threshold())
        .with_preference(settings.backend_preference())
        .with_stop(stop.predicate())
}

/// Speech engine over the real microphone.
///
/// Must be called on the thread that will capture; see
/// [`voicevote_core::audio`].
pub fn build_engine(settings: &VoteSettings, stop: &StopSignal) -> anyhow::Result<SpeechEngine> {
    let cloud = SpeechServiceClient::new(settings.speech_service())
        .context("creating speech service client")?;
    let engine = SpeechEngine::with_backends(
        settings.engine_config(),
        load_offline_model(settings),
        Box::new(cloud),
        Arc::new(MicrophoneOpener),
    )
    .with_defaults(capture_defaults(settings, stop));
    info!(backends = ?engine.backend_names(), "speech engine ready");
    Ok(engine)
}

/// Publish a terminal failure, logging instead of failing.
pub fn publish_failure(channel: &dyn StatusChannel, id: &SessionId, step: u8, message: &str) {
    if let Err(e) = channel.publish(id, &StatusRecord::failed(step, message)) {
        warn!(session = %id, error = %e, "could not publish failure");
    }
}

/// Run one complete session for `id`.
///
/// Setup failures after the status directory is available are published as
/// a terminal record before being returned.
pub fn run_worker(
    id: &SessionId,
    settings: &VoteSettings,
    stop: StopSignal,
) -> anyhow::Result<SessionOutcome> {
    let status_dir = settings.status_dir();
    let channel = FileStatusChannel::new(&status_dir)
        .with_context(|| format!("opening status directory {}", status_dir.display()))?;

    let setup = || -> anyhow::Result<(SpeechEngine, SqliteVoteStore)> {
        let store = SqliteVoteStore::open(settings.db_path()).context("opening vote store")?;
        let engine = build_engine(settings, &stop)?;
        Ok((engine, store))
    };
    let (mut engine, store) = match setup() {
        Ok(parts) => parts,
        Err(e) => {
            publish_failure(&channel, id, 1, &format!("Error during voice voting: {e:#}"));
            return Err(e);
        }
    };
    let voice = VoiceOutput::from_kinds(&settings.voice_order, DEFAULT_SPEECH_TIMEOUT);

    let outcome = VoiceSession::new(id.clone(), &mut engine, &voice, &store, &channel)
        .with_config(settings.session_config())
        .with_stop(stop)
        .run();
    Ok(outcome)
}
