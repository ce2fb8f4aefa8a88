use serde::{Deserialize, Serialize};

use crate::domain::matrix::MatrixRecord;
use crate::domain::policy::PolicyId;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AllocationState {
    Idle,
    Loading,
    Ready,
    Blocked { reason: String },
    Saving,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AllocationEvent {
    LoadRequested,
    LoadSucceeded,
    LoadFailed { reason: String },
    SaveRequested,
    SaveSucceeded,
    SaveFailed,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub from: AllocationState,
    pub to: AllocationState,
    pub event: AllocationEvent,
}

/// Parent records plus whatever child records the backend already holds.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationSnapshot {
    pub parent: Vec<MatrixRecord>,
    pub child: Option<Vec<MatrixRecord>>,
}

/// Body of the save call: `{policy_id, matrix: [...]}`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveMatrixRequest {
    pub policy_id: PolicyId,
    pub matrix: Vec<MatrixRecord>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveAck {
    pub message: Option<String>,
}

/// Non-blocking acknowledgment shown after a save attempt.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionNotice {
    Saved { message: Option<String> },
    SaveFailed { message: String },
}
