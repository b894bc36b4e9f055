//! Status snapshots published by a voting worker.

use serde::{Deserialize, Serialize};

/// Progress state of the current step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    /// Waiting for the voter to speak.
    Listening,
    /// The step's answer was accepted.
    Success,
    /// Terminal failure.
    Error,
    /// Terminal success: the vote is recorded.
    Completed,
}

/// One complete, self-consistent session snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusRecord {
    /// 1 = identify, 2 = choose, 3 = confirm.
    pub step: u8,
    pub status: StepStatus,
    pub message: String,
    /// Seconds since the Unix epoch.
    pub timestamp: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voter_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidate: Option<String>,
}

impl StatusRecord {
    fn new(step: u8, status: StepStatus, message: impl Into<String>) -> Self {
        Self {
            step,
            status,
            message: message.into(),
            timestamp: now_secs(),
            success: None,
            voter_id: None,
            candidate: None,
        }
    }

    pub fn listening(step: u8, message: impl Into<String>) -> Self {
        Self::new(step, StepStatus::Listening, message)
    }

    pub fn step_success(step: u8, message: impl Into<String>) -> Self {
        Self::new(step, StepStatus::Success, message)
    }

    /// Terminal success carrying the recorded vote.
    pub fn completed(
        step: u8,
        message: impl Into<String>,
        voter_id: impl Into<String>,
        candidate: impl Into<String>,
    ) -> Self {
        Self {
            success: Some(true),
            voter_id: Some(voter_id.into()),
            candidate: Some(candidate.into()),
            ..Self::new(step, StepStatus::Completed, message)
        }
    }

    /// Terminal failure.
    pub fn failed(step: u8, message: impl Into<String>) -> Self {
        Self {
            success: Some(false),
            ..Self::new(step, StepStatus::Error, message)
        }
    }

    /// Placeholder shown before a freshly spawned worker publishes anything.
    pub fn starting() -> Self {
        Self::listening(1, "Starting voice voting...")
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.status, StepStatus::Completed | StepStatus::Error)
    }

    pub fn is_success(&self) -> bool {
        self.status == StepStatus::Completed
    }
}

/// Current wall-clock time as fractional Unix seconds.
pub fn now_secs() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}
