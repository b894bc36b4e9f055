//! SQLite vote store.
//!
//! One connection per call; WAL keeps the worker's insert from blocking the
//! frontend's tally reads.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use rusqlite::{params, Connection};
use tracing::{debug, info};
use voicevote_core::{
    store::{demo_candidates, Candidate, VoteStore},
    Result, VoteError,
};

/// Voter token seeded for demonstrations.
pub const DEMO_VOTER: (&str, &str) = ("TEST1", "Test Voter");

#[derive(Debug, Clone)]
pub struct SqliteVoteStore {
    db_path: PathBuf,
}

fn store_err(e: rusqlite::Error) -> VoteError {
    VoteError::Store(e.to_string())
}

impl SqliteVoteStore {
    /// Open (creating if needed) the database at `db_path` and seed the demo
    /// candidates into an empty candidate table.
    pub fn open(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let store = Self { db_path };
        store.init_schema()?;
        info!(path = %store.db_path.display(), "vote store ready");
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn connect(&self) -> Result<Connection> {
        Connection::open(&self.db_path).map_err(store_err)
    }

    fn init_schema(&self) -> Result<()> {
        let mut conn = self.connect()?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            CREATE TABLE IF NOT EXISTS voters (
              id TEXT PRIMARY KEY,
              name TEXT
            );

            CREATE TABLE IF NOT EXISTS candidates (
              id INTEGER PRIMARY KEY,
              name TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS votes (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              voter_token TEXT NOT NULL,
              candidate_id INTEGER NOT NULL,
              ts TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            );

            CREATE INDEX IF NOT EXISTS idx_votes_candidate ON votes(candidate_id);
            "#,
        )
        .map_err(store_err)?;

        let tx = conn.transaction().map_err(store_err)?;
        let existing: i64 = tx
            .query_row("SELECT COUNT(*) FROM candidates", [], |row| row.get(0))
            .map_err(store_err)?;
        if existing == 0 {
            for candidate in demo_candidates() {
                tx.execute(
                    "INSERT OR IGNORE INTO candidates (id, name) VALUES (?1, ?2)",
                    params![candidate.id, candidate.name],
                )
                .map_err(store_err)?;
            }
            debug!("seeded demo candidates");
        }
        tx.execute(
            "INSERT OR IGNORE INTO voters (id, name) VALUES (?1, ?2)",
            params![DEMO_VOTER.0, DEMO_VOTER.1],
        )
        .map_err(store_err)?;
        tx.commit().map_err(store_err)?;
        Ok(())
    }

    /// Total number of recorded votes.
    pub fn vote_count(&self) -> Result<u64> {
        let conn = self.connect()?;
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM votes", [], |row| row.get(0))
            .map_err(store_err)?;
        Ok(count.max(0) as u64)
    }
}

impl VoteStore for SqliteVoteStore {
    fn list_candidates(&self) -> Result<Vec<Candidate>> {
        let conn = self.connect()?;
        let mut stmt = conn
            .prepare("SELECT id, name FROM candidates ORDER BY id")
            .map_err(store_err)?;
        let rows = stmt
            .query_map([], |row| Ok(Candidate::new(row.get(0)?, row.get::<_, String>(1)?)))
            .map_err(store_err)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(store_err)
    }

    fn record_vote(&self, voter_id: &str, candidate_id: u32) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO votes (voter_token, candidate_id) VALUES (?1, ?2)",
            params![voter_id, candidate_id],
        )
        .map_err(store_err)?;
        info!(voter_id, candidate_id, "vote inserted");
        Ok(())
    }

    fn tally(&self) -> Result<BTreeMap<u32, u64>> {
        let conn = self.connect()?;
        let mut stmt = conn
            .prepare("SELECT candidate_id, COUNT(*) FROM votes GROUP BY candidate_id")
            .map_err(store_err)?;
        let mut rows = stmt.query([]).map_err(store_err)?;
        let mut tally = BTreeMap::new();
        while let Some(row) = rows.next().map_err(store_err)? {
            let id: u32 = row.get(0).map_err(store_err)?;
            let count: i64 = row.get(1).map_err(store_err)?;
            tally.insert(id, count.max(0) as u64);
        }
        Ok(tally)
    }
}
