//! Worker process lifecycle, one child per session id.
//!
//! The manager never talks to a worker directly. It spawns
//! `voicevote-worker <session>` with the status directory in the
//! environment, then reads whatever the worker published through the
//! [`FileStatusChannel`]. Exit is detected with `try_wait` on every poll.
//!
//! Bookkeeping lives only in memory: restarting the frontend forgets every
//! session.

use std::collections::HashMap;
use std::ffi::OsString;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{info, warn};
use voicevote_core::{
    ipc::{FileStatusChannel, StatusChannel, StatusRecord},
    Result, SessionId, VoteError,
};

use crate::settings::STATUS_DIR_ENV;

const EXIT_POLL: Duration = Duration::from_millis(20);

/// Program and leading arguments used to launch a worker. The session id is
/// appended as the final argument.
#[derive(Debug, Clone)]
pub struct WorkerCommand {
    pub program: PathBuf,
    pub args: Vec<OsString>,
}

impl WorkerCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// `voicevote-worker` next to the running executable, else from `PATH`.
    pub fn sibling() -> Self {
        let name = format!("voicevote-worker{}", std::env::consts::EXE_SUFFIX);
        let program = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(|dir| dir.join(&name)))
            .filter(|path| path.is_file())
            .unwrap_or_else(|| PathBuf::from(&name));
        Self::new(program)
    }
}

/// What [`WorkerManager::poll`] observed.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerState {
    /// The worker is alive; the record is its latest publication.
    Running(StatusRecord),
    /// The worker has exited; the record is terminal and stable.
    Finished(StatusRecord),
}

impl WorkerState {
    pub fn record(&self) -> &StatusRecord {
        match self {
            Self::Running(record) | Self::Finished(record) => record,
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Finished(_))
    }
}

enum Slot {
    Live {
        child: Child,
        started: Instant,
        last_seen: Option<StatusRecord>,
    },
    Finished(StatusRecord),
}

pub struct WorkerManager {
    command: WorkerCommand,
    channel: Arc<FileStatusChannel>,
    grace: Duration,
    env: Vec<(String, OsString)>,
    sessions: Mutex<HashMap<SessionId, Slot>>,
}

impl WorkerManager {
    pub fn new(command: WorkerCommand, channel: Arc<FileStatusChannel>, grace: Duration) -> Self {
        Self {
            command,
            channel,
            grace,
            env: Vec::new(),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Extra environment passed to every worker.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<OsString>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn status_dir(&self) -> &Path {
        self.channel.dir()
    }

    pub fn log_path(&self, id: &SessionId) -> PathBuf {
        self.channel.dir().join(format!("subprocess_{id}.log"))
    }

    /// Spawn a worker for `id`.
    ///
    /// # Errors
    /// `AlreadyRunning` while a previous worker for `id` is still alive.
    pub fn start(&self, id: &SessionId) -> Result<()> {
        let mut sessions = self.sessions.lock();
        if let Some(Slot::Live { child, .. }) = sessions.get_mut(id) {
            if child.try_wait()?.is_none() {
                return Err(VoteError::AlreadyRunning(id.to_string()));
            }
        }

        if let Err(e) = self.channel.remove(id) {
            warn!(session = %id, error = %e, "could not clear stale status");
        }
        let log = File::create(self.log_path(id))?;
        let mut command = Command::new(&self.command.program);
        command
            .args(&self.command.args)
            .arg(id.as_str())
            .env(STATUS_DIR_ENV, self.channel.dir())
            .stdin(Stdio::null())
            .stdout(log.try_clone()?)
            .stderr(log);
        for (key, value) in &self.env {
            command.env(key, value);
        }
        let child = command.spawn().map_err(|e| {
            warn!(program = %self.command.program.display(), error = %e, "worker spawn failed");
            VoteError::Io(e)
        })?;

        info!(session = %id, pid = child.id(), "worker started");
        sessions.insert(
            id.clone(),
            Slot::Live {
                child,
                started: Instant::now(),
                last_seen: None,
            },
        );
        Ok(())
    }

    /// Current state of `id`'s worker. Once finished, every call returns
    /// the same snapshot until [`reset`](Self::reset).
    pub fn poll(&self, id: &SessionId) -> Result<WorkerState> {
        let mut sessions = self.sessions.lock();
        let slot = sessions
            .get_mut(id)
            .ok_or_else(|| VoteError::SessionNotFound(id.to_string()))?;

        let (status, last_seen, started) = match slot {
            Slot::Finished(record) => return Ok(WorkerState::Finished(record.clone())),
            Slot::Live {
                child,
                started,
                last_seen,
            } => {
                let exited = child.try_wait()?;
                match self.channel.fetch(id) {
                    Ok(Some(record)) => *last_seen = Some(record),
                    Ok(None) => {}
                    Err(e) => warn!(session = %id, error = %e, "unreadable status record"),
                }
                match exited {
                    None => {
                        let record = last_seen.clone().unwrap_or_else(StatusRecord::starting);
                        return Ok(WorkerState::Running(record));
                    }
                    Some(status) => (status, last_seen.take(), *started),
                }
            }
        };

        let record = terminal_record(status, last_seen);
        info!(
            session = %id,
            %status,
            elapsed_ms = started.elapsed().as_millis() as u64,
            message = record.message.as_str(),
            "worker finished"
        );
        if let Err(e) = self.channel.remove(id) {
            warn!(session = %id, error = %e, "could not remove status record");
        }
        *slot = Slot::Finished(record.clone());
        Ok(WorkerState::Finished(record))
    }

    /// Ask `id`'s worker to stop: SIGTERM, then a forced kill after the
    /// grace period. The session stays known; the next poll reports its end.
    ///
    /// The session table is locked only around each exit check, so other
    /// sessions keep polling during the grace period.
    pub fn cancel(&self, id: &SessionId) -> Result<()> {
        match self.sessions.lock().get_mut(id) {
            Some(Slot::Live { child, .. }) => {
                if let Some(status) = request_stop(child)? {
                    info!(session = %id, %status, "worker already exited");
                    return Ok(());
                }
            }
            Some(Slot::Finished(_)) => return Ok(()),
            None => return Err(VoteError::SessionNotFound(id.to_string())),
        }

        let deadline = Instant::now() + self.grace;
        loop {
            {
                let mut sessions = self.sessions.lock();
                // Reset or polled to completion meanwhile.
                let Some(Slot::Live { child, .. }) = sessions.get_mut(id) else {
                    return Ok(());
                };
                if let Some(status) = child.try_wait()? {
                    info!(session = %id, %status, "worker cancelled");
                    return Ok(());
                }
                if Instant::now() >= deadline {
                    warn!(session = %id, pid = child.id(), "worker ignored SIGTERM, killing");
                    let status = force_kill(child)?;
                    info!(session = %id, %status, "worker cancelled");
                    return Ok(());
                }
            }
            std::thread::sleep(EXIT_POLL);
        }
    }

    /// Stop `id`'s worker if it is alive and forget the session.
    pub fn reset(&self, id: &SessionId) -> Result<()> {
        let slot = self.sessions.lock().remove(id);
        if let Some(Slot::Live { mut child, .. }) = slot {
            if let Err(e) = terminate(&mut child, self.grace) {
                warn!(session = %id, error = %e, "worker did not stop cleanly");
            }
        }
        self.channel.remove(id)?;
        info!(session = %id, "session reset");
        Ok(())
    }

    pub fn is_running(&self, id: &SessionId) -> bool {
        match self.sessions.lock().get_mut(id) {
            Some(Slot::Live { child, .. }) => matches!(child.try_wait(), Ok(None)),
            _ => false,
        }
    }

    /// Terminate every live worker.
    pub fn shutdown(&self) {
        let live: Vec<(SessionId, Slot)> = self.sessions.lock().drain().collect();
        for (id, slot) in live {
            if let Slot::Live { mut child, .. } = slot {
                if let Err(e) = terminate(&mut child, self.grace) {
                    warn!(session = %id, error = %e, "worker did not stop on shutdown");
                }
            }
        }
    }
}

impl Drop for WorkerManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// The record to keep once a worker has exited.
fn terminal_record(status: ExitStatus, last_seen: Option<StatusRecord>) -> StatusRecord {
    match last_seen {
        Some(record) if record.is_terminal() => record,
        last => {
            let step = last.map(|r| r.step).unwrap_or(1);
            StatusRecord::failed(
                step,
                format!("Worker exited with {status} before reporting a result"),
            )
        }
    }
}

/// Send SIGTERM unless the child already exited. Without signals the child
/// is killed outright.
fn request_stop(child: &mut Child) -> Result<Option<ExitStatus>> {
    if let Some(status) = child.try_wait()? {
        return Ok(Some(status));
    }

    #[cfg(unix)]
    {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        if let Err(e) = kill(Pid::from_raw(child.id() as i32), Signal::SIGTERM) {
            warn!(pid = child.id(), "SIGTERM failed: {e}");
        }
    }
    #[cfg(not(unix))]
    {
        if let Err(e) = child.kill() {
            warn!(pid = child.id(), "kill failed: {e}");
        }
    }
    Ok(None)
}

fn force_kill(child: &mut Child) -> Result<ExitStatus> {
    if let Err(e) = child.kill() {
        warn!(pid = child.id(), "kill failed: {e}");
    }
    Ok(child.wait()?)
}

/// SIGTERM, wait up to `grace`, then kill. For children no longer in the
/// session table.
fn terminate(child: &mut Child, grace: Duration) -> Result<ExitStatus> {
    if let Some(status) = request_stop(child)? {
        return Ok(status);
    }
    let deadline = Instant::now() + grace;
    while Instant::now() < deadline {
        if let Some(status) = child.try_wait()? {
            return Ok(status);
        }
        std::thread::sleep(EXIT_POLL);
    }
    warn!(pid = child.id(), "worker ignored SIGTERM, killing");
    force_kill(child)
}
