//! The three-step spoken voting dialogue.
//!
//! ## States
//!
//! ```text
//! AwaitingIdentity ──► AwaitingChoice ──► AwaitingConfirmation ──► Completed
//!        │                   │                     │
//!        └───────────────────┴─────────────────────┴──► Completed(failure)
//! ```
//!
//! Strictly forward. Each step publishes a `listening` record before it
//! captures speech and a `success` record when its answer is accepted. Any
//! rejection, silence, cancellation, error or panic ends the session with
//! exactly one terminal record.

pub mod parse;

use std::fmt;
use std::ops::ControlFlow;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::{
    engine::{Listener, StopSignal, Transcript},
    error::{Result, VoteError},
    ipc::{StatusChannel, StatusRecord},
    store::{Candidate, VoteStore},
    strategy::panic_message,
    tts::Speaker,
};

use parse::{echo_safe, is_confirmation, match_identity, parse_choice, Choice};

const MAX_SESSION_ID_LEN: usize = 64;

/// Opaque per-attempt token, safe to embed in file names.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionId(String);

impl SessionId {
    /// A fresh id: microsecond timestamp plus random suffix.
    pub fn generate() -> Self {
        let micros = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros())
            .unwrap_or(0);
        Self(format!("{micros}-{:08x}", rand::random::<u32>()))
    }

    /// Validate `[A-Za-z0-9_-]{1,64}`.
    pub fn parse(raw: &str) -> Result<Self> {
        let valid = !raw.is_empty()
            && raw.len() <= MAX_SESSION_ID_LEN
            && raw
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if valid {
            Ok(Self(raw.to_string()))
        } else {
            Err(VoteError::InvalidSessionId(raw.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for SessionId {
    type Err = VoteError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for SessionId {
    type Error = VoteError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<SessionId> for String {
    fn from(id: SessionId) -> Self {
        id.0
    }
}

/// Dialogue steps, numbered as they appear on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Identify = 1,
    Choose = 2,
    Confirm = 3,
}

impl Step {
    pub fn number(self) -> u8 {
        self as u8
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Phase {
    AwaitingIdentity,
    AwaitingChoice,
    AwaitingConfirmation,
    Completed(SessionOutcome),
}

impl Phase {
    fn step(&self) -> Step {
        match self {
            Phase::AwaitingIdentity => Step::Identify,
            Phase::AwaitingChoice => Step::Choose,
            Phase::AwaitingConfirmation | Phase::Completed(_) => Step::Confirm,
        }
    }
}

/// How a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    Voted {
        voter_id: String,
        candidate: Candidate,
        message: String,
    },
    Failed {
        step: Step,
        message: String,
    },
}

impl SessionOutcome {
    fn failed(step: Step, message: impl Into<String>) -> Self {
        Self::Failed {
            step,
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Voted { .. })
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Voted { message, .. } | Self::Failed { message, .. } => message,
        }
    }

    pub fn step(&self) -> Step {
        match self {
            Self::Voted { .. } => Step::Confirm,
            Self::Failed { step, .. } => *step,
        }
    }

    /// The terminal wire record for this outcome.
    pub fn to_record(&self) -> StatusRecord {
        match self {
            Self::Voted {
                voter_id,
                candidate,
                message,
            } => StatusRecord::completed(
                Step::Confirm.number(),
                message.as_str(),
                voter_id.as_str(),
                candidate.name.as_str(),
            ),
            Self::Failed { step, message } => StatusRecord::failed(step.number(), message.as_str()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Capture budget for each step. Default: 15 s.
    pub step_timeout: Duration,
    /// Pause after each spoken instruction line. Default: 300 ms.
    pub announcement_pause: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            step_timeout: Duration::from_secs(15),
            announcement_pause: Duration::from_millis(300),
        }
    }
}

type Flow<T> = Result<ControlFlow<SessionOutcome, T>>;

/// One voter's pass through the dialogue.
pub struct VoiceSession<'a> {
    id: SessionId,
    config: SessionConfig,
    listener: &'a mut dyn Listener,
    speaker: &'a dyn Speaker,
    store: &'a dyn VoteStore,
    channel: &'a dyn StatusChannel,
    stop: StopSignal,
    phase: Phase,
}

impl<'a> VoiceSession<'a> {
    pub fn new(
        id: SessionId,
        listener: &'a mut dyn Listener,
        speaker: &'a dyn Speaker,
        store: &'a dyn VoteStore,
        channel: &'a dyn StatusChannel,
    ) -> Self {
        Self {
            id,
            config: SessionConfig::default(),
            listener,
            speaker,
            store,
            channel,
            stop: StopSignal::new(),
            phase: Phase::AwaitingIdentity,
        }
    }

    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Flag checked after every capture; raising it ends the session as
    /// cancelled.
    pub fn with_stop(mut self, stop: StopSignal) -> Self {
        self.stop = stop;
        self
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.phase, Phase::Completed(_))
    }

    /// Run the dialogue to completion and publish its terminal record.
    ///
    /// Calling `run` on a finished session returns the original outcome and
    /// has no side effects.
    pub fn run(&mut self) -> SessionOutcome {
        if let Phase::Completed(outcome) = &self.phase {
            warn!(session = %self.id, "session already finished");
            return outcome.clone();
        }

        info!(session = %self.id, "voice session started");
        let outcome = match catch_unwind(AssertUnwindSafe(|| self.drive())) {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => {
                error!(session = %self.id, step = self.phase.step().number(), error = %e, "voice session failed");
                SessionOutcome::failed(self.phase.step(), format!("Error during voice voting: {e}"))
            }
            Err(panic) => {
                let reason = panic_message(panic.as_ref()).to_string();
                error!(session = %self.id, step = self.phase.step().number(), panic = reason.as_str(), "voice session panicked");
                SessionOutcome::failed(
                    self.phase.step(),
                    format!("Error during voice voting: {reason}"),
                )
            }
        };
        self.finish(outcome)
    }

    fn drive(&mut self) -> Result<SessionOutcome> {
        let voter_id = match self.identify()? {
            ControlFlow::Continue(voter_id) => voter_id,
            ControlFlow::Break(outcome) => return Ok(outcome),
        };
        let candidate = match self.choose()? {
            ControlFlow::Continue(candidate) => candidate,
            ControlFlow::Break(outcome) => return Ok(outcome),
        };
        self.confirm(voter_id, candidate)
    }

    fn identify(&mut self) -> Flow<String> {
        self.phase = Phase::AwaitingIdentity;
        self.publish(StatusRecord::listening(
            Step::Identify.number(),
            "🎤 LISTENING: Say your voter ID",
        ));
        self.announce(&[
            "Welcome to the voice voting system.",
            "You need to provide a voter ID first.",
            "Please say your voter ID clearly now.",
        ]);
        self.say("I am listening...");

        let heard = match self.capture(Step::Identify) {
            ControlFlow::Continue(Some(heard)) => heard,
            ControlFlow::Continue(None) => {
                self.say("I didn't hear you speak. Please make sure you are speaking clearly into your microphone.");
                return Ok(ControlFlow::Break(SessionOutcome::failed(
                    Step::Identify,
                    "No speech detected - please speak clearly and say your voter ID.",
                )));
            }
            ControlFlow::Break(outcome) => return Ok(ControlFlow::Break(outcome)),
        };
        let echo = echo_safe(heard.as_str());
        self.say(&format!("I heard you say: {echo}"));

        let Some(voter_id) = match_identity(heard.as_str()) else {
            return Ok(ControlFlow::Break(SessionOutcome::failed(
                Step::Identify,
                format!("Invalid Voter ID: I heard '{echo}'. Please provide a valid voter ID."),
            )));
        };

        info!(session = %self.id, voter_id, "voter identified");
        self.publish(StatusRecord::step_success(
            Step::Identify.number(),
            format!("Voter ID confirmed: {voter_id}"),
        ));
        self.say(&format!("Voter ID {voter_id} confirmed"));
        Ok(ControlFlow::Continue(voter_id.to_string()))
    }

    fn choose(&mut self) -> Flow<Candidate> {
        self.phase = Phase::AwaitingChoice;
        let candidates = self.store.list_candidates()?;
        if candidates.is_empty() {
            return Ok(ControlFlow::Break(SessionOutcome::failed(
                Step::Choose,
                "No candidates are available.",
            )));
        }
        let numbers = spoken_list(&candidates);

        self.publish(StatusRecord::listening(
            Step::Choose.number(),
            format!("🎤 LISTENING: Say your candidate choice ({numbers})"),
        ));
        self.announce(&["Now I will read the list of candidates."]);
        let lines: Vec<String> = candidates
            .iter()
            .map(|c| format!("Candidate number {} is {}", c.id, c.name))
            .collect();
        self.announce(lines.as_slice());
        self.announce(&["Please say just the number of your chosen candidate."]);
        self.say("I am listening for your choice...");

        let heard = match self.capture(Step::Choose) {
            ControlFlow::Continue(Some(heard)) => heard,
            ControlFlow::Continue(None) => {
                self.say("I didn't hear your candidate choice clearly.");
                return Ok(ControlFlow::Break(SessionOutcome::failed(
                    Step::Choose,
                    format!("No candidate choice heard - please say {numbers} clearly."),
                )));
            }
            ControlFlow::Break(outcome) => return Ok(ControlFlow::Break(outcome)),
        };
        let echo = echo_safe(heard.as_str());
        self.say(&format!("I heard you say: {echo}"));

        let number = match parse_choice(heard.as_str()) {
            Choice::Number(n) => n,
            Choice::NoDigits => {
                return Ok(ControlFlow::Break(SessionOutcome::failed(
                    Step::Choose,
                    format!(
                        "Invalid candidate choice: I heard '{echo}'. Please say just the number: {numbers}."
                    ),
                )))
            }
            Choice::Overflow(digits) => {
                return Ok(ControlFlow::Break(SessionOutcome::failed(
                    Step::Choose,
                    format!("Invalid candidate number: {digits}"),
                )))
            }
        };
        let Some(candidate) = candidates.into_iter().find(|c| c.id == number) else {
            return Ok(ControlFlow::Break(SessionOutcome::failed(
                Step::Choose,
                format!("Invalid candidate number: {number}"),
            )));
        };

        info!(session = %self.id, candidate = candidate.name.as_str(), "candidate selected");
        self.publish(StatusRecord::step_success(
            Step::Choose.number(),
            format!("Candidate selected: {}", candidate.name),
        ));
        self.say(&format!("You selected {}", candidate.name));
        Ok(ControlFlow::Continue(candidate))
    }

    fn confirm(&mut self, voter_id: String, candidate: Candidate) -> Result<SessionOutcome> {
        self.phase = Phase::AwaitingConfirmation;
        self.publish(StatusRecord::listening(
            Step::Confirm.number(),
            "🎤 LISTENING: Say \"confirm\" to cast your vote or \"cancel\" to abort",
        ));
        let chosen = format!("You have chosen {}.", candidate.name);
        self.announce(&[
            chosen.as_str(),
            "Say 'confirm' to cast your vote for this candidate.",
            "Or say 'cancel' to abort and not vote.",
        ]);
        self.say("I am listening for your confirmation...");

        let heard = match self.capture(Step::Confirm) {
            ControlFlow::Continue(Some(heard)) => heard,
            ControlFlow::Continue(None) => {
                self.say("I didn't hear your confirmation clearly.");
                return Ok(SessionOutcome::failed(
                    Step::Confirm,
                    "No confirmation heard. Say 'confirm' to vote or 'cancel' to abort.",
                ));
            }
            ControlFlow::Break(outcome) => return Ok(outcome),
        };
        let echo = echo_safe(heard.as_str());
        self.say(&format!("I heard you say: {echo}"));

        if !is_confirmation(heard.as_str()) {
            return Ok(SessionOutcome::failed(
                Step::Confirm,
                format!("Vote cancelled: I heard '{echo}' but need 'confirm' to vote."),
            ));
        }

        self.store.record_vote(&voter_id, candidate.id)?;
        info!(session = %self.id, candidate = candidate.name.as_str(), "vote recorded");
        let message = format!("Vote successfully recorded for {}!", candidate.name);
        Ok(SessionOutcome::Voted {
            voter_id,
            candidate,
            message,
        })
    }

    /// Listen once; a stop raised during capture ends the session.
    fn capture(&mut self, step: Step) -> ControlFlow<SessionOutcome, Option<Transcript>> {
        if self.stop.is_raised() {
            return ControlFlow::Break(cancelled(step));
        }
        let heard = self.listener.listen(self.config.step_timeout);
        if self.stop.is_raised() {
            info!(session = %self.id, step = step.number(), "session cancelled during capture");
            return ControlFlow::Break(cancelled(step));
        }
        ControlFlow::Continue(heard)
    }

    fn finish(&mut self, outcome: SessionOutcome) -> SessionOutcome {
        let record = outcome.to_record();
        if let Err(e) = self.channel.publish(&self.id, &record) {
            error!(session = %self.id, error = %e, "failed to publish terminal status");
        }
        info!(
            session = %self.id,
            step = outcome.step().number(),
            success = outcome.is_success(),
            message = outcome.message(),
            "voice session finished"
        );

        self.say(outcome.message());
        if outcome.is_success() {
            self.say("Thank you for voting!");
        } else {
            self.say("Please start again if you want to vote.");
        }
        self.phase = Phase::Completed(outcome.clone());
        outcome
    }

    fn publish(&self, record: StatusRecord) {
        if let Err(e) = self.channel.publish(&self.id, &record) {
            warn!(session = %self.id, error = %e, "failed to publish status");
        }
    }

    fn say(&self, text: &str) {
        if let Err(e) = self.speaker.speak(text) {
            warn!(session = %self.id, error = %e, "prompt not spoken");
        }
    }

    /// Speak `lines` with a pause after each; stops early once cancelled.
    fn announce<S: AsRef<str>>(&self, lines: &[S]) {
        for line in lines {
            if self.stop.is_raised() {
                debug!(session = %self.id, "announcement cut short");
                return;
            }
            self.say(line.as_ref());
            if !self.config.announcement_pause.is_zero() && !self.stop.is_raised() {
                std::thread::sleep(self.config.announcement_pause);
            }
        }
    }
}

fn cancelled(step: Step) -> SessionOutcome {
    SessionOutcome::failed(step, "Voice voting cancelled.")
}

/// "1", "1 or 2", "1, 2, or 3".
fn spoken_list(candidates: &[Candidate]) -> String {
    let ids: Vec<String> = candidates.iter().map(|c| c.id.to_string()).collect();
    match ids.as_slice() {
        [] => String::new(),
        [only] => only.clone(),
        [first, second] => format!("{first} or {second}"),
        [init @ .., last] => format!("{}, or {last}", init.join(", ")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryVoteStore;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    struct ScriptedListener {
        replies: VecDeque<Option<&'static str>>,
        timeouts: Vec<Duration>,
        stop_after: Option<(usize, StopSignal)>,
    }

    impl ScriptedListener {
        fn new(replies: &[Option<&'static str>]) -> Self {
            Self {
                replies: replies.iter().copied().collect(),
                timeouts: Vec::new(),
                stop_after: None,
            }
        }
    }

    impl Listener for ScriptedListener {
        fn listen(&mut self, timeout: Duration) -> Option<Transcript> {
            self.timeouts.push(timeout);
            if let Some((n, stop)) = &self.stop_after {
                if self.timeouts.len() >= *n {
                    stop.raise();
                }
            }
            self.replies
                .pop_front()
                .flatten()
                .and_then(Transcript::normalize)
        }
    }

    struct PanickingListener;

    impl Listener for PanickingListener {
        fn listen(&mut self, _timeout: Duration) -> Option<Transcript> {
            panic!("microphone driver crashed")
        }
    }

    #[derive(Default)]
    struct RecordingSpeaker {
        lines: Mutex<Vec<String>>,
    }

    impl Speaker for RecordingSpeaker {
        fn speak(&self, text: &str) -> Result<()> {
            self.lines.lock().push(text.to_string());
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingChannel {
        history: Mutex<Vec<StatusRecord>>,
    }

    impl RecordingChannel {
        fn terminals(&self) -> Vec<StatusRecord> {
            self.history
                .lock()
                .iter()
                .filter(|r| r.is_terminal())
                .cloned()
                .collect()
        }
    }

    impl StatusChannel for RecordingChannel {
        fn publish(&self, _id: &SessionId, record: &StatusRecord) -> Result<()> {
            self.history.lock().push(record.clone());
            Ok(())
        }

        fn fetch(&self, _id: &SessionId) -> Result<Option<StatusRecord>> {
            Ok(self.history.lock().last().cloned())
        }

        fn remove(&self, _id: &SessionId) -> Result<()> {
            self.history.lock().clear();
            Ok(())
        }
    }

    struct BrokenStore;

    impl VoteStore for BrokenStore {
        fn list_candidates(&self) -> Result<Vec<Candidate>> {
            Ok(crate::store::demo_candidates())
        }

        fn record_vote(&self, _voter_id: &str, _candidate_id: u32) -> Result<()> {
            Err(VoteError::Store("database is locked".into()))
        }

        fn tally(&self) -> Result<std::collections::BTreeMap<u32, u64>> {
            Ok(Default::default())
        }
    }

    fn quiet() -> SessionConfig {
        SessionConfig {
            step_timeout: Duration::from_secs(15),
            announcement_pause: Duration::ZERO,
        }
    }

    struct Harness {
        speaker: RecordingSpeaker,
        store: MemoryVoteStore,
        channel: RecordingChannel,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                speaker: RecordingSpeaker::default(),
                store: MemoryVoteStore::demo(),
                channel: RecordingChannel::default(),
            }
        }

        fn run(&self, listener: &mut dyn Listener) -> SessionOutcome {
            let id = SessionId::parse("test-session").unwrap();
            VoiceSession::new(id, listener, &self.speaker, &self.store, &self.channel)
                .with_config(quiet())
                .run()
        }
    }

    #[test]
    fn full_dialogue_records_one_vote() {
        let h = Harness::new();
        let mut listener =
            ScriptedListener::new(&[Some("First One"), Some("candidate number 2"), Some("confirm")]);
        let outcome = h.run(&mut listener);

        assert!(outcome.is_success());
        assert_eq!(outcome.message(), "Vote successfully recorded for Bob!");
        assert_eq!(h.store.votes(), vec![("first one".to_string(), 2)]);
        assert_eq!(listener.timeouts, vec![Duration::from_secs(15); 3]);

        let terminals = h.channel.terminals();
        assert_eq!(terminals.len(), 1);
        assert_eq!(terminals[0].voter_id.as_deref(), Some("first one"));
        assert_eq!(terminals[0].candidate.as_deref(), Some("Bob"));

        let statuses: Vec<(u8, crate::ipc::StepStatus)> = h
            .channel
            .history
            .lock()
            .iter()
            .map(|r| (r.step, r.status))
            .collect();
        use crate::ipc::StepStatus::*;
        assert_eq!(
            statuses,
            vec![
                (1, Listening),
                (1, Success),
                (2, Listening),
                (2, Success),
                (3, Listening),
                (3, Completed)
            ]
        );
    }

    #[test]
    fn silence_at_identity_fails_step_one() {
        let h = Harness::new();
        let outcome = h.run(&mut ScriptedListener::new(&[None]));
        assert_eq!(outcome.step(), Step::Identify);
        assert!(outcome.message().starts_with("No speech detected"));
        assert_eq!(h.channel.terminals().len(), 1);
        assert!(h.store.votes().is_empty());
    }

    #[test]
    fn unknown_identity_echoes_what_was_heard() {
        let h = Harness::new();
        let outcome = h.run(&mut ScriptedListener::new(&[Some("last one")]));
        assert_eq!(
            outcome.message(),
            "Invalid Voter ID: I heard 'last one'. Please provide a valid voter ID."
        );
        let spoken = h.speaker.lines.lock().clone();
        assert!(spoken.contains(&outcome.message().to_string()));
    }

    #[test]
    fn spelled_out_number_is_rejected() {
        let h = Harness::new();
        let outcome = h.run(&mut ScriptedListener::new(&[Some("first one"), Some("two")]));
        assert_eq!(outcome.step(), Step::Choose);
        assert_eq!(
            outcome.message(),
            "Invalid candidate choice: I heard 'two'. Please say just the number: 1, 2, or 3."
        );
    }

    #[test]
    fn unknown_candidate_number_is_named() {
        let h = Harness::new();
        let outcome = h.run(&mut ScriptedListener::new(&[Some("first one"), Some("9")]));
        assert_eq!(outcome.message(), "Invalid candidate number: 9");
        let terminal = &h.channel.terminals()[0];
        assert_eq!(terminal.step, 2);
        assert_eq!(terminal.success, Some(false));
    }

    #[test]
    fn anything_but_confirm_cancels_the_vote() {
        for reply in ["cancel", "nope"] {
            let h = Harness::new();
            let outcome = h.run(&mut ScriptedListener::new(&[
                Some("first one"),
                Some("1"),
                Some(reply),
            ]));
            assert!(!outcome.is_success());
            assert_eq!(
                outcome.message(),
                format!("Vote cancelled: I heard '{reply}' but need 'confirm' to vote.")
            );
            assert!(h.store.votes().is_empty());
        }
    }

    #[test]
    fn missing_confirmation_fails_without_vote() {
        let h = Harness::new();
        let outcome = h.run(&mut ScriptedListener::new(&[Some("first one"), Some("3"), None]));
        assert_eq!(
            outcome.message(),
            "No confirmation heard. Say 'confirm' to vote or 'cancel' to abort."
        );
        assert!(h.store.votes().is_empty());
    }

    #[test]
    fn finished_session_does_not_run_again() {
        let h = Harness::new();
        let mut listener =
            ScriptedListener::new(&[Some("first one"), Some("1"), Some("confirm"), Some("confirm")]);
        let id = SessionId::parse("once").unwrap();
        let mut session = VoiceSession::new(id, &mut listener, &h.speaker, &h.store, &h.channel)
            .with_config(quiet());
        let first = session.run();
        let second = session.run();
        assert!(session.is_finished());
        assert_eq!(first, second);
        assert_eq!(h.store.votes().len(), 1);
        assert_eq!(h.channel.terminals().len(), 1);
    }

    #[test]
    fn panic_in_capture_becomes_terminal_failure() {
        let h = Harness::new();
        let outcome = h.run(&mut PanickingListener);
        assert_eq!(
            outcome.message(),
            "Error during voice voting: microphone driver crashed"
        );
        assert_eq!(h.channel.terminals().len(), 1);
    }

    #[test]
    fn store_error_becomes_terminal_failure() {
        let speaker = RecordingSpeaker::default();
        let channel = RecordingChannel::default();
        let mut listener =
            ScriptedListener::new(&[Some("first one"), Some("1"), Some("confirm")]);
        let id = SessionId::parse("broken-store").unwrap();
        let outcome = VoiceSession::new(id, &mut listener, &speaker, &BrokenStore, &channel)
            .with_config(quiet())
            .run();
        assert_eq!(outcome.step(), Step::Confirm);
        assert!(outcome
            .message()
            .starts_with("Error during voice voting: vote store error"));
        assert_eq!(channel.terminals().len(), 1);
    }

    #[test]
    fn stop_during_capture_cancels_session() {
        let h = Harness::new();
        let stop = StopSignal::new();
        let mut listener = ScriptedListener::new(&[Some("first one"), Some("1")]);
        listener.stop_after = Some((2, stop.clone()));
        let id = SessionId::parse("cancel-me").unwrap();
        let outcome = VoiceSession::new(id, &mut listener, &h.speaker, &h.store, &h.channel)
            .with_config(quiet())
            .with_stop(stop)
            .run();
        assert_eq!(outcome.step(), Step::Choose);
        assert_eq!(outcome.message(), "Voice voting cancelled.");
        assert_eq!(h.channel.terminals().len(), 1);
    }

    /// Raises the stop flag once it has spoken `after` lines.
    struct InterruptedSpeaker {
        lines: Mutex<Vec<String>>,
        after: usize,
        stop: StopSignal,
    }

    impl Speaker for InterruptedSpeaker {
        fn speak(&self, text: &str) -> Result<()> {
            let mut lines = self.lines.lock();
            lines.push(text.to_string());
            if lines.len() >= self.after {
                self.stop.raise();
            }
            Ok(())
        }
    }

    #[test]
    fn stop_during_announcements_cancels_before_listening() {
        let h = Harness::new();
        let stop = StopSignal::new();
        let speaker = InterruptedSpeaker {
            lines: Mutex::default(),
            after: 1,
            stop: stop.clone(),
        };
        let mut listener = ScriptedListener::new(&[Some("first one")]);
        let id = SessionId::parse("hang-up").unwrap();
        let started = std::time::Instant::now();
        let outcome = VoiceSession::new(id, &mut listener, &speaker, &h.store, &h.channel)
            .with_config(SessionConfig {
                announcement_pause: Duration::from_secs(5),
                ..quiet()
            })
            .with_stop(stop)
            .run();

        assert_eq!(outcome.step(), Step::Identify);
        assert_eq!(outcome.message(), "Voice voting cancelled.");
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(listener.timeouts.is_empty());
        assert_eq!(h.channel.terminals().len(), 1);
        let spoken = speaker.lines.lock().clone();
        assert!(!spoken.iter().any(|l| l == "You need to provide a voter ID first."));
    }

    #[test]
    fn session_ids_are_validated() {
        assert!(SessionId::parse("1700000000").is_ok());
        assert!(SessionId::parse("a_b-C9").is_ok());
        assert!(SessionId::parse("").is_err());
        assert!(SessionId::parse("../etc/passwd").is_err());
        assert!(SessionId::parse("has space").is_err());
        assert!(SessionId::parse(&"x".repeat(65)).is_err());

        let generated = SessionId::generate();
        assert!(SessionId::parse(generated.as_str()).is_ok());
        assert_ne!(generated, SessionId::generate());
    }

    #[test]
    fn session_id_serde_validates() {
        let id: SessionId = serde_json::from_str("\"abc-1\"").unwrap();
        assert_eq!(id.as_str(), "abc-1");
        assert!(serde_json::from_str::<SessionId>("\"a/b\"").is_err());
    }

    #[test]
    fn spoken_list_formats() {
        let c = |ids: &[u32]| -> Vec<Candidate> {
            ids.iter().map(|id| Candidate::new(*id, "x")).collect()
        };
        assert_eq!(spoken_list(&c(&[1])), "1");
        assert_eq!(spoken_list(&c(&[1, 2])), "1 or 2");
        assert_eq!(spoken_list(&c(&[1, 2, 3])), "1, 2, or 3");
    }
}
