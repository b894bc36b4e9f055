//! Vote store seam.
//!
//! The session only needs three operations; the SQLite implementation lives
//! in the app crate, the in-memory one here.

use std::collections::BTreeMap;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{Result, VoteError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub id: u32,
    pub name: String,
}

impl Candidate {
    pub fn new(id: u32, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

/// Seed candidates used when a store is created empty.
pub fn demo_candidates() -> Vec<Candidate> {
    vec![
        Candidate::new(1, "Alice"),
        Candidate::new(2, "Bob"),
        Candidate::new(3, "Charlie"),
    ]
}

pub trait VoteStore {
    /// All candidates, ordered by id.
    fn list_candidates(&self) -> Result<Vec<Candidate>>;

    /// Append one vote. Never updates or deduplicates.
    fn record_vote(&self, voter_id: &str, candidate_id: u32) -> Result<()>;

    /// Votes per candidate id. Candidates without votes are absent.
    fn tally(&self) -> Result<BTreeMap<u32, u64>>;
}

/// In-memory store; for tests and embedding.
#[derive(Debug)]
pub struct MemoryVoteStore {
    candidates: Vec<Candidate>,
    votes: Mutex<Vec<(String, u32)>>,
}

impl MemoryVoteStore {
    pub fn new(mut candidates: Vec<Candidate>) -> Self {
        candidates.sort_by_key(|c| c.id);
        Self {
            candidates,
            votes: Mutex::new(Vec::new()),
        }
    }

    pub fn demo() -> Self {
        Self::new(demo_candidates())
    }

    /// Every recorded `(voter_id, candidate_id)` pair, in insertion order.
    pub fn votes(&self) -> Vec<(String, u32)> {
        self.votes.lock().clone()
    }
}

impl VoteStore for MemoryVoteStore {
    fn list_candidates(&self) -> Result<Vec<Candidate>> {
        Ok(self.candidates.clone())
    }

    fn record_vote(&self, voter_id: &str, candidate_id: u32) -> Result<()> {
        if !self.candidates.iter().any(|c| c.id == candidate_id) {
            return Err(VoteError::Store(format!("unknown candidate {candidate_id}")));
        }
        self.votes.lock().push((voter_id.to_string(), candidate_id));
        Ok(())
    }

    fn tally(&self) -> Result<BTreeMap<u32, u64>> {
        let mut counts = BTreeMap::new();
        for (_, candidate_id) in self.votes.lock().iter() {
            *counts.entry(*candidate_id).or_insert(0) += 1;
        }
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidates_are_sorted_by_id() {
        let store = MemoryVoteStore::new(vec![Candidate::new(3, "C"), Candidate::new(1, "A")]);
        let ids: Vec<u32> = store.list_candidates().unwrap().iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![1, 3]);
    }

    #[test]
    fn tally_counts_appended_votes() {
        let store = MemoryVoteStore::demo();
        store.record_vote("first one", 2).unwrap();
        store.record_vote("first one", 2).unwrap();
        store.record_vote("first one", 1).unwrap();
        let tally = store.tally().unwrap();
        assert_eq!(tally.get(&1), Some(&1));
        assert_eq!(tally.get(&2), Some(&2));
        assert_eq!(tally.get(&3), None);
    }

    #[test]
    fn unknown_candidate_is_rejected() {
        let store = MemoryVoteStore::demo();
        assert!(store.record_vote("first one", 9).is_err());
        assert!(store.votes().is_empty());
    }
}
