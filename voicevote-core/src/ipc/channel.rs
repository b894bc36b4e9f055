//! Status transport: publish / fetch / remove keyed by session.
//!
//! Semantics shared by every implementation: last write wins, a fetch sees
//! either the previous or the next complete record (never a torn one), no
//! expiry, no history.

use std::collections::HashMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::{debug, warn};

use super::status::StatusRecord;
use crate::error::Result;
use crate::session::SessionId;

pub trait StatusChannel: Send + Sync {
    /// Atomically replace the session's record.
    fn publish(&self, id: &SessionId, record: &StatusRecord) -> Result<()>;

    /// Latest record, or `None` if nothing was published (or it was removed).
    fn fetch(&self, id: &SessionId) -> Result<Option<StatusRecord>>;

    /// Delete the session's record. Removing a missing record is not an error.
    fn remove(&self, id: &SessionId) -> Result<()>;
}

/// Distinguishes temp files written concurrently by one process.
static TEMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// One JSON file per session, `status_{id}.json`, inside a status directory.
///
/// Writes go to a unique temp file in the same directory, are fsynced, then
/// renamed over the target, so readers only ever observe whole files.
#[derive(Debug, Clone)]
pub struct FileStatusChannel {
    dir: PathBuf,
}

impl FileStatusChannel {
    /// Use `dir`, creating it if needed.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, id: &SessionId) -> PathBuf {
        self.dir.join(format!("status_{id}.json"))
    }

    fn temp_path_for(&self, id: &SessionId) -> PathBuf {
        let seq = TEMP_SEQ.fetch_add(1, Ordering::Relaxed);
        self.dir
            .join(format!(".status_{id}.json.{}.{seq}.tmp", std::process::id()))
    }
}

impl StatusChannel for FileStatusChannel {
    fn publish(&self, id: &SessionId, record: &StatusRecord) -> Result<()> {
        let bytes = serde_json::to_vec(record)?;
        let tmp = self.temp_path_for(id);
        let write = || -> std::io::Result<()> {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
            fs::rename(&tmp, self.path_for(id))
        };
        if let Err(e) = write() {
            let _ = fs::remove_file(&tmp);
            warn!(session = %id, error = %e, "status publish failed");
            return Err(e.into());
        }
        debug!(session = %id, step = record.step, status = ?record.status, "status published");
        Ok(())
    }

    fn fetch(&self, id: &SessionId) -> Result<Option<StatusRecord>> {
        match fs::read(self.path_for(id)) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn remove(&self, id: &SessionId) -> Result<()> {
        match fs::remove_file(self.path_for(id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-process map; for tests and single-process embedding.
#[derive(Debug, Default)]
pub struct MemoryStatusChannel {
    records: Mutex<HashMap<SessionId, StatusRecord>>,
}

impl MemoryStatusChannel {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StatusChannel for MemoryStatusChannel {
    fn publish(&self, id: &SessionId, record: &StatusRecord) -> Result<()> {
        self.records.lock().insert(id.clone(), record.clone());
        Ok(())
    }

    fn fetch(&self, id: &SessionId) -> Result<Option<StatusRecord>> {
        Ok(self.records.lock().get(id).cloned())
    }

    fn remove(&self, id: &SessionId) -> Result<()> {
        self.records.lock().remove(id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn sid(raw: &str) -> SessionId {
        SessionId::parse(raw).unwrap()
    }

    #[test]
    fn file_channel_round_trip_and_remove() {
        let dir = tempfile::tempdir().unwrap();
        let channel = FileStatusChannel::new(dir.path().join("status")).unwrap();
        let id = sid("1700000000");

        assert_eq!(channel.fetch(&id).unwrap(), None);
        channel
            .publish(&id, &StatusRecord::listening(1, "Say your voter ID"))
            .unwrap();
        channel
            .publish(&id, &StatusRecord::step_success(1, "Voter ID confirmed: first one"))
            .unwrap();

        let latest = channel.fetch(&id).unwrap().unwrap();
        assert_eq!(latest.message, "Voter ID confirmed: first one");
        assert!(channel.path_for(&id).ends_with("status_1700000000.json"));

        channel.remove(&id).unwrap();
        assert_eq!(channel.fetch(&id).unwrap(), None);
        channel.remove(&id).unwrap();
    }

    #[test]
    fn file_channel_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let channel = FileStatusChannel::new(dir.path()).unwrap();
        let id = sid("abc");
        for step in 1..=3 {
            channel
                .publish(&id, &StatusRecord::listening(step, "listening"))
                .unwrap();
        }
        let names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["status_abc.json".to_string()]);
    }

    #[test]
    fn concurrent_reader_never_sees_torn_record() {
        let dir = tempfile::tempdir().unwrap();
        let channel = Arc::new(FileStatusChannel::new(dir.path()).unwrap());
        let id = sid("race");
        channel.publish(&id, &StatusRecord::listening(1, "start")).unwrap();

        let writer = {
            let channel = Arc::clone(&channel);
            let id = id.clone();
            std::thread::spawn(move || {
                for i in 0..200 {
                    let message = format!("update {i} {}", "x".repeat(i * 10));
                    channel
                        .publish(&id, &StatusRecord::listening(2, message))
                        .unwrap();
                }
                channel
                    .publish(&id, &StatusRecord::completed(3, "done", "first one", "Alice"))
                    .unwrap();
            })
        };

        let mut reads = 0;
        loop {
            let record = channel.fetch(&id).expect("reader saw a partial write");
            reads += 1;
            if record.as_ref().is_some_and(StatusRecord::is_terminal) {
                break;
            }
        }
        writer.join().unwrap();
        assert!(reads > 0);
    }

    #[test]
    fn memory_channel_last_write_wins() {
        let channel = MemoryStatusChannel::new();
        let id = sid("mem");
        channel.publish(&id, &StatusRecord::listening(1, "a")).unwrap();
        channel.publish(&id, &StatusRecord::failed(1, "b")).unwrap();
        assert_eq!(channel.fetch(&id).unwrap().unwrap().message, "b");
        channel.remove(&id).unwrap();
        assert_eq!(channel.fetch(&id).unwrap(), None);
    }
}
