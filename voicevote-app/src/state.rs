//! Frontend state shared by every command handler.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use voicevote_core::ipc::FileStatusChannel;

use crate::manager::{WorkerCommand, WorkerManager};
use crate::settings::{load_settings, VoteSettings, DB_PATH_ENV, SETTINGS_ENV};
use crate::storage::SqliteVoteStore;

pub struct AppState {
    /// Settings as loaded at startup; workers re-read the same file.
    pub settings: VoteSettings,
    /// Absolute path to `settings.json`.
    pub settings_path: PathBuf,
    pub store: SqliteVoteStore,
    pub workers: WorkerManager,
}

impl AppState {
    pub fn new(
        settings: VoteSettings,
        settings_path: PathBuf,
        store: SqliteVoteStore,
        workers: WorkerManager,
    ) -> Self {
        Self {
            settings,
            settings_path,
            store,
            workers,
        }
    }

    /// Load settings from `settings_path`, open the store and prepare the
    /// worker manager pointing at the sibling `voicevote-worker` binary.
    pub fn open(settings_path: &Path) -> anyhow::Result<Self> {
        let mut settings = load_settings(settings_path);
        settings.apply_env_overrides();

        let db_path = settings.db_path();
        let store = SqliteVoteStore::open(&db_path)
            .with_context(|| format!("opening vote store at {}", db_path.display()))?;
        let status_dir = settings.status_dir();
        let channel = FileStatusChannel::new(&status_dir)
            .with_context(|| format!("creating status directory {}", status_dir.display()))?;

        let workers = WorkerManager::new(
            WorkerCommand::sibling(),
            Arc::new(channel),
            settings.cancel_grace(),
        )
        .with_env(SETTINGS_ENV, settings_path.as_os_str())
        .with_env(DB_PATH_ENV, db_path.as_os_str());

        Ok(Self::new(
            settings,
            settings_path.to_path_buf(),
            store,
            workers,
        ))
    }
}
