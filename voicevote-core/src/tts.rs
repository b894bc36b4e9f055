//! Spoken prompts through whatever speech synthesizer the host has.
//!
//! [`VoiceOutput`] walks a fixed preference list of command-line voices and
//! stops at the first one that speaks the text successfully. Utterances are
//! serialized: the voice list sits behind a mutex held for the whole
//! utterance, so prompts never overlap.

use std::io;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Result, VoteError};
use crate::strategy::{Strategy, StrategyList};

/// Upper bound on a single utterance.
pub const DEFAULT_SPEECH_TIMEOUT: Duration = Duration::from_secs(30);

const WAIT_POLL: Duration = Duration::from_millis(20);

/// Anything that can say a line of text out loud.
pub trait Speaker {
    /// Speak `text`, returning once playback finished or timed out.
    fn speak(&self, text: &str) -> Result<()>;
}

/// A single synthesizer taking part in the fallback list.
pub trait Voice: Strategy + Send {
    fn say(&mut self, text: &str) -> Result<()>;
}

/// Supported command-line synthesizers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VoiceKind {
    EspeakNg,
    Espeak,
    SpdSay,
    /// macOS `say`.
    Say,
    /// Windows SAPI through PowerShell.
    Sapi,
}

impl VoiceKind {
    /// Preference order used when settings do not override it.
    pub const ALL: [VoiceKind; 5] = [
        VoiceKind::EspeakNg,
        VoiceKind::Espeak,
        VoiceKind::SpdSay,
        VoiceKind::Say,
        VoiceKind::Sapi,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::EspeakNg => "espeak-ng",
            Self::Espeak => "espeak",
            Self::SpdSay => "spd-say",
            Self::Say => "say",
            Self::Sapi => "sapi",
        }
    }
}

/// Program candidates and arguments for speaking `text` with `kind`.
///
/// The text always travels as a single argument; no shell is involved.
pub fn command_spec(kind: VoiceKind, text: &str) -> (Vec<PathBuf>, Vec<String>) {
    match kind {
        VoiceKind::EspeakNg => (vec!["espeak-ng".into()], vec![text.to_string()]),
        VoiceKind::Espeak => (vec!["espeak".into()], vec![text.to_string()]),
        VoiceKind::SpdSay => (vec!["spd-say".into()], vec!["-w".into(), text.to_string()]),
        VoiceKind::Say => (vec!["say".into()], vec![text.to_string()]),
        VoiceKind::Sapi => {
            let script = format!(
                "Add-Type -AssemblyName System.Speech; \
                 $s = New-Object System.Speech.Synthesis.SpeechSynthesizer; \
                 $s.Speak('{}')",
                powershell_quote(text)
            );
            (
                vec![
                    PathBuf::from(r"C:\Windows\System32\WindowsPowerShell\v1.0\powershell.exe"),
                    PathBuf::from("powershell.exe"),
                    PathBuf::from("pwsh.exe"),
                ],
                vec![
                    "-NoProfile".into(),
                    "-NonInteractive".into(),
                    "-ExecutionPolicy".into(),
                    "Bypass".into(),
                    "-Command".into(),
                    script,
                ],
            )
        }
    }
}

/// Escape text for a single-quoted PowerShell string.
fn powershell_quote(text: &str) -> String {
    text.replace('\'', "''")
}

/// A synthesizer run as a child process per utterance.
pub struct CommandVoice {
    kind: VoiceKind,
    timeout: Duration,
}

impl CommandVoice {
    pub fn new(kind: VoiceKind, timeout: Duration) -> Self {
        Self { kind, timeout }
    }

    fn spawn(&self, text: &str) -> io::Result<Child> {
        let (programs, args) = command_spec(self.kind, text);
        let mut last_err: Option<io::Error> = None;
        for program in programs {
            match Command::new(&program)
                .args(&args)
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .spawn()
            {
                Ok(child) => return Ok(child),
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err.unwrap_or_else(|| io::Error::other("no program candidates")))
    }
}

impl Strategy for CommandVoice {
    fn name(&self) -> &str {
        self.kind.as_str()
    }
}

impl Voice for CommandVoice {
    fn say(&mut self, text: &str) -> Result<()> {
        let mut child = self
            .spawn(text)
            .map_err(|e| VoteError::SpeechOutput(format!("{}: {e}", self.kind.as_str())))?;
        let status = wait_with_timeout(&mut child, self.timeout)?;
        if status.success() {
            Ok(())
        } else {
            Err(VoteError::SpeechOutput(format!(
                "{} exited with {status}",
                self.kind.as_str()
            )))
        }
    }
}

/// Wait for `child`, killing it once `timeout` elapses.
pub fn wait_with_timeout(child: &mut Child, timeout: Duration) -> Result<std::process::ExitStatus> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(status);
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            return Err(VoteError::SpeechOutput(format!(
                "timed out after {}s",
                timeout.as_secs()
            )));
        }
        std::thread::sleep(WAIT_POLL);
    }
}

/// Serialized speech output over an ordered list of voices.
pub struct VoiceOutput {
    voices: Mutex<StrategyList<dyn Voice>>,
}

impl VoiceOutput {
    pub fn new(voices: Vec<Box<dyn Voice>>) -> Self {
        Self {
            voices: Mutex::new(StrategyList::new(voices)),
        }
    }

    /// Command voices for `order`, each bounded by `timeout`.
    pub fn from_kinds(order: &[VoiceKind], timeout: Duration) -> Self {
        Self::new(
            order
                .iter()
                .map(|kind| Box::new(CommandVoice::new(*kind, timeout)) as Box<dyn Voice>)
                .collect(),
        )
    }
}

impl Speaker for VoiceOutput {
    fn speak(&self, text: &str) -> Result<()> {
        let mut voices = self.voices.lock();
        match voices.first_success(|voice| voice.say(text).map(|()| Some(voice.name().to_string())))
        {
            Some(voice) => {
                debug!(voice = voice.as_str(), "spoke prompt");
                Ok(())
            }
            None => {
                warn!("no speech synthesizer succeeded");
                Err(VoteError::SpeechOutput("no voice available".into()))
            }
        }
    }
}
