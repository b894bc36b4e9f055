use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use voicevote_core::audio::stub::ScriptedOpener;
use voicevote_core::inference::stub::{CloudReply, ScriptedCloud, ScriptedModel};
use voicevote_core::ipc::{FileStatusChannel, StatusChannel, StepStatus};
use voicevote_core::store::{MemoryVoteStore, VoteStore};
use voicevote_core::{
    EngineConfig, RecognitionRequest, SessionConfig, SessionId, Speaker, SpeechEngine,
    StopSignal, VoiceSession,
};

#[derive(Default)]
struct TranscriptSpeaker {
    lines: Mutex<Vec<String>>,
}

impl Speaker for TranscriptSpeaker {
    fn speak(&self, text: &str) -> voicevote_core::Result<()> {
        self.lines.lock().push(text.to_string());
        Ok(())
    }
}

/// Loud 0.6 s phrase followed by endless silence.
fn one_phrase_opener() -> ScriptedOpener {
    ScriptedOpener::new(vec![], vec![vec![0.3; 26_460]], Some(0.0))
}

fn quiet_session(step_timeout: Duration) -> SessionConfig {
    SessionConfig {
        step_timeout,
        announcement_pause: Duration::ZERO,
    }
}

#[test]
fn spoken_vote_through_online_backend_reaches_store_and_status_file() {
    let dir = tempfile::tempdir().unwrap();
    let channel = FileStatusChannel::new(dir.path()).unwrap();
    let store = MemoryVoteStore::demo();
    let speaker = TranscriptSpeaker::default();

    let cloud = Arc::new(ScriptedCloud::new([
        CloudReply::Text("First One".into()),
        CloudReply::Text("I pick 3".into()),
        CloudReply::Text("Confirm".into()),
    ]));
    let mut engine = SpeechEngine::with_backends(
        EngineConfig::default(),
        None,
        Box::new(Arc::clone(&cloud)),
        Arc::new(one_phrase_opener()),
    )
    .with_defaults(RecognitionRequest::new(Duration::from_secs(5)).with_energy_threshold(Some(300.0)));

    let id = SessionId::parse("1760870400").unwrap();
    let outcome = VoiceSession::new(id.clone(), &mut engine, &speaker, &store, &channel)
        .with_config(quiet_session(Duration::from_secs(5)))
        .run();

    assert!(outcome.is_success(), "{outcome:?}");
    assert_eq!(cloud.calls(), 3);
    assert_eq!(store.tally().unwrap().get(&3), Some(&1));

    let record = channel.fetch(&id).unwrap().expect("terminal record on disk");
    assert_eq!(record.step, 3);
    assert_eq!(record.status, StepStatus::Completed);
    assert_eq!(record.message, "Vote successfully recorded for Charlie!");
    assert_eq!(record.voter_id.as_deref(), Some("first one"));
    assert_eq!(record.candidate.as_deref(), Some("Charlie"));

    let spoken = speaker.lines.lock().clone();
    assert!(spoken.contains(&"Candidate number 1 is Alice".to_string()));
    assert!(spoken.contains(&"Thank you for voting!".to_string()));
}

#[test]
fn offline_transcript_is_used_without_touching_the_service() {
    let dir = tempfile::tempdir().unwrap();
    let channel = FileStatusChannel::new(dir.path()).unwrap();
    let store = MemoryVoteStore::demo();
    let speaker = TranscriptSpeaker::default();

    let model = ScriptedModel::with_final("first one");
    let cloud = Arc::new(ScriptedCloud::new([CloudReply::Text("2".into())]));
    let mut engine = SpeechEngine::with_backends(
        EngineConfig::default(),
        Some(Box::new(model.clone())),
        Box::new(Arc::clone(&cloud)),
        Arc::new(ScriptedOpener::silent()),
    );

    let id = SessionId::parse("offline-only").unwrap();
    let outcome = VoiceSession::new(id.clone(), &mut engine, &speaker, &store, &channel)
        .with_config(quiet_session(Duration::from_millis(150)))
        .run();

    // Every offline capture hears the same phrase, so step two rejects it.
    assert_eq!(
        outcome.message(),
        "Invalid candidate choice: I heard 'first one'. Please say just the number: 1, 2, or 3."
    );
    assert_eq!(cloud.calls(), 0);
    assert_eq!(model.opened_rates(), vec![16_000, 16_000]);

    let record = channel.fetch(&id).unwrap().unwrap();
    assert_eq!(record.step, 2);
    assert_eq!(record.status, StepStatus::Error);
    assert_eq!(record.success, Some(false));
    assert!(store.tally().unwrap().is_empty());
}

#[test]
fn raised_stop_signal_cancels_before_listening() {
    let dir = tempfile::tempdir().unwrap();
    let channel = FileStatusChannel::new(dir.path()).unwrap();
    let store = MemoryVoteStore::demo();
    let speaker = TranscriptSpeaker::default();
    let opener = Arc::new(ScriptedOpener::silent());

    let stop = StopSignal::new();
    let mut engine = SpeechEngine::with_backends(
        EngineConfig::default(),
        None,
        Box::new(ScriptedCloud::new([])),
        Arc::clone(&opener) as Arc<dyn voicevote_core::audio::AudioOpener>,
    )
    .with_defaults(RecognitionRequest::new(Duration::from_secs(5)).with_stop(stop.predicate()));
    stop.raise();

    let id = SessionId::parse("stopped").unwrap();
    let outcome = VoiceSession::new(id.clone(), &mut engine, &speaker, &store, &channel)
        .with_config(quiet_session(Duration::from_secs(5)))
        .with_stop(stop)
        .run();

    assert_eq!(outcome.message(), "Voice voting cancelled.");
    assert_eq!(opener.opens(), 0);
    let record = channel.fetch(&id).unwrap().unwrap();
    assert_eq!(record.step, 1);
    assert!(record.is_terminal());
}
