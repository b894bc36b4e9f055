//! Frontend API handlers.
//!
//! One function per endpoint of the voting web frontend. Each returns a
//! serializable [`ApiResponse`]; failures become `{"success": false,
//! "error": "..."}` instead of propagating.

use std::fmt::Display;

use serde::Serialize;
use tracing::{info, warn};
use voicevote_core::{
    ipc::{StatusRecord, StepStatus},
    store::{Candidate, VoteStore},
    SessionId, VoteError,
};

use crate::manager::WorkerState;
use crate::state::AppState;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(flatten)]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(error: impl Display) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.to_string()),
        }
    }
}

impl ApiResponse<Empty> {
    pub fn done() -> Self {
        Self {
            success: true,
            data: None,
            error: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Empty {}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CandidateList {
    pub candidates: Vec<Candidate>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Started {
    pub session_id: String,
    pub message: String,
}

/// Terminal vote details, present once the worker has finished.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VoteResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voter_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub candidate: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VotingStatus {
    pub status: StepStatus,
    pub step: u8,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<VoteResult>,
}

impl VotingStatus {
    fn from_state(state: WorkerState) -> Self {
        let finished = state.is_finished();
        let record = match state {
            WorkerState::Running(record) | WorkerState::Finished(record) => record,
        };
        let result = finished.then(|| vote_result(&record));
        Self {
            status: record.status,
            step: record.step,
            message: record.message,
            result,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.result.is_some()
    }
}

fn vote_result(record: &StatusRecord) -> VoteResult {
    VoteResult {
        success: record.is_success(),
        voter_id: record.voter_id.clone(),
        candidate: record.candidate.clone(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Results {
    /// `[candidate_id, votes]` pairs; candidates without votes are absent.
    pub results: Vec<(u32, u64)>,
}

const SESSION_NOT_FOUND: &str = "Session not found";

/// `GET /api/candidates`
pub fn candidates(state: &AppState) -> ApiResponse<CandidateList> {
    match state.store.list_candidates() {
        Ok(candidates) => ApiResponse::ok(CandidateList { candidates }),
        Err(e) => ApiResponse::err(e),
    }
}

/// `POST /api/start-voice-voting`
pub fn start_voice_voting(state: &AppState) -> ApiResponse<Started> {
    let id = SessionId::generate();
    match state.workers.start(&id) {
        Ok(()) => {
            info!(session = %id, "voice voting started");
            ApiResponse::ok(Started {
                session_id: id.to_string(),
                message: "Voice voting started".into(),
            })
        }
        Err(e) => {
            warn!(session = %id, error = %e, "could not start worker");
            ApiResponse::err(e)
        }
    }
}

/// `GET /api/voting-status/<session_id>`
pub fn voting_status(state: &AppState, session_id: &str) -> ApiResponse<VotingStatus> {
    let Ok(id) = SessionId::parse(session_id) else {
        return ApiResponse::err(SESSION_NOT_FOUND);
    };
    match state.workers.poll(&id) {
        Ok(worker) => ApiResponse::ok(VotingStatus::from_state(worker)),
        Err(VoteError::SessionNotFound(_)) => ApiResponse::err(SESSION_NOT_FOUND),
        Err(e) => ApiResponse::err(e),
    }
}

/// `GET /api/results`
pub fn results(state: &AppState) -> ApiResponse<Results> {
    match state.store.tally() {
        Ok(tally) => ApiResponse::ok(Results {
            results: tally.into_iter().collect(),
        }),
        Err(e) => ApiResponse::err(e),
    }
}

/// `GET /api/reset-session/<session_id>`; succeeds for unknown sessions.
pub fn reset_session(state: &AppState, session_id: &str) -> ApiResponse<Empty> {
    let Ok(id) = SessionId::parse(session_id) else {
        return ApiResponse::done();
    };
    if let Err(e) = state.workers.reset(&id) {
        warn!(session = %id, error = %e, "reset left status behind");
    }
    ApiResponse::done()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::manager::{WorkerCommand, WorkerManager};
    use crate::settings::VoteSettings;
    use crate::storage::SqliteVoteStore;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::{Duration, Instant};
    use voicevote_core::ipc::FileStatusChannel;

    const VOTE_FOR_BOB: &str = r#"printf '{"step":3,"status":"completed","message":"Vote successfully recorded for Bob!","timestamp":1.0,"success":true,"voter_id":"first one","candidate":"Bob"}' > "$VOICEVOTE_STATUS_DIR/status_$1.json""#;

    fn state(dir: &std::path::Path, script: &str) -> AppState {
        let store = SqliteVoteStore::open(dir.join("voting.db")).unwrap();
        let channel = Arc::new(FileStatusChannel::new(dir.join("status")).unwrap());
        let workers = WorkerManager::new(
            WorkerCommand::new("sh").with_args(["-c", script, "worker"]),
            channel,
            Duration::from_millis(500),
        );
        AppState::new(VoteSettings::default(), dir.join("settings.json"), store, workers)
    }

    #[test]
    fn candidates_match_endpoint_shape() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(dir.path(), "exit 0");
        let body = serde_json::to_value(candidates(&state)).unwrap();
        assert_eq!(
            body,
            json!({"success": true, "candidates": [
                {"id": 1, "name": "Alice"}, {"id": 2, "name": "Bob"}, {"id": 3, "name": "Charlie"}
            ]})
        );
    }

    #[test]
    fn results_are_id_count_pairs() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(dir.path(), "exit 0");
        state.store.record_vote("first one", 1).unwrap();
        state.store.record_vote("first one", 1).unwrap();
        let body = serde_json::to_value(results(&state)).unwrap();
        assert_eq!(body, json!({"success": true, "results": [[1, 2]]}));
    }

    #[test]
    fn unknown_or_malformed_session_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(dir.path(), "exit 0");
        for raw in ["1760870400", "../../etc"] {
            let body = serde_json::to_value(voting_status(&state, raw)).unwrap();
            assert_eq!(body, json!({"success": false, "error": "Session not found"}));
        }
        assert_eq!(
            serde_json::to_value(reset_session(&state, "nope")).unwrap(),
            json!({"success": true})
        );
    }

    #[test]
    fn started_session_reports_terminal_result() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(dir.path(), VOTE_FOR_BOB);
        let started = start_voice_voting(&state);
        assert!(started.success);
        let id = started.data.unwrap().session_id;

        let deadline = Instant::now() + Duration::from_secs(10);
        let status = loop {
            let status = voting_status(&state, &id).data.unwrap();
            if status.is_terminal() || Instant::now() > deadline {
                break status;
            }
            std::thread::sleep(Duration::from_millis(20));
        };

        let body = serde_json::to_value(ApiResponse::ok(status)).unwrap();
        assert_eq!(
            body,
            json!({
                "success": true,
                "status": "completed",
                "step": 3,
                "message": "Vote successfully recorded for Bob!",
                "result": {"success": true, "voter_id": "first one", "candidate": "Bob"}
            })
        );

        assert_eq!(
            serde_json::to_value(reset_session(&state, &id)).unwrap(),
            json!({"success": true})
        );
        assert!(!voting_status(&state, &id).success);
    }
}
