use std::collections::BTreeMap;

use thiserror::Error;

use crate::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use crate::cascade::{AllocationPair, CellEditError, InitReport};
use crate::domain::matrix::CellKey;
use crate::domain::policy::{PolicyContext, PolicyId};
use crate::matrix::RebateMatrix;
use crate::session::states::{
    AllocationEvent, AllocationSnapshot, AllocationState, SaveAck, SaveMatrixRequest,
    SessionNotice, TransitionOutcome,
};

const NO_PARENT_DATA: &str = "no parent rebate matrix to allocate against";

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum AllocationTransitionError {
    #[error("invalid allocation transition from {state:?} using event {event:?}")]
    InvalidTransition { state: AllocationState, event: AllocationEvent },
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error(transparent)]
    Transition(#[from] AllocationTransitionError),
    #[error("a save is already in progress for policy {0}")]
    SaveInFlight(PolicyId),
    #[error("allocation is not editable while {0:?}")]
    NotEditable(AllocationState),
    #[error(transparent)]
    CellEdit(#[from] CellEditError),
}

/// Issued by [`AllocationSession::begin_load`]; only the newest ticket may
/// complete a load.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LoadTicket {
    generation: u64,
}

impl LoadTicket {
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LoadApplied {
    Ready { report: InitReport, unparsed_parent: usize },
    Blocked { reason: String },
    /// A newer load was started; this response was discarded.
    Stale { ticket: u64, current: u64 },
}

pub fn transition(
    current: &AllocationState,
    event: &AllocationEvent,
) -> Result<TransitionOutcome, AllocationTransitionError> {
    use AllocationEvent::{
        LoadFailed, LoadRequested, LoadSucceeded, SaveFailed, SaveRequested, SaveSucceeded,
    };
    use AllocationState::{Blocked, Loading, Ready, Saving};

    let to = match (current, event) {
        (Saving, LoadRequested) => {
            return Err(AllocationTransitionError::InvalidTransition {
                state: current.clone(),
                event: event.clone(),
            });
        }
        (_, LoadRequested) => Loading,
        (Loading, LoadSucceeded) => Ready,
        (Loading, LoadFailed { reason }) => Blocked { reason: reason.clone() },
        (Ready, SaveRequested) => Saving,
        (Saving, SaveSucceeded) | (Saving, SaveFailed) => Ready,
        _ => {
            return Err(AllocationTransitionError::InvalidTransition {
                state: current.clone(),
                event: event.clone(),
            });
        }
    };

    Ok(TransitionOutcome { from: current.clone(), to, event: event.clone() })
}

/// One policy's allocation editing session.
///
/// Network calls happen outside; the session only sequences their results.
/// Loads are guarded by a generation counter so an older response never
/// replaces a newer one, and a second save is refused while one is in flight.
#[derive(Clone, Debug)]
pub struct AllocationSession {
    context: PolicyContext,
    state: AllocationState,
    generation: u64,
    pair: Option<AllocationPair>,
    saved: BTreeMap<CellKey, u64>,
    pending_save: Option<BTreeMap<CellKey, u64>>,
    notice: Option<SessionNotice>,
}

impl AllocationSession {
    pub fn new(context: PolicyContext) -> Self {
        Self {
            context,
            state: AllocationState::Idle,
            generation: 0,
            pair: None,
            saved: BTreeMap::new(),
            pending_save: None,
            notice: None,
        }
    }

    pub fn context(&self) -> &PolicyContext {
        &self.context
    }

    pub fn state(&self) -> &AllocationState {
        &self.state
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn pair(&self) -> Option<&AllocationPair> {
        self.pair.as_ref()
    }

    pub fn notice(&self) -> Option<&SessionNotice> {
        self.notice.as_ref()
    }

    pub fn is_editable(&self) -> bool {
        self.state == AllocationState::Ready && self.pair.is_some()
    }

    pub fn is_saving(&self) -> bool {
        self.state == AllocationState::Saving
    }

    pub fn has_unsaved_changes(&self) -> bool {
        self.pair.as_ref().map(|pair| amounts(pair.child()) != self.saved).unwrap_or(false)
    }

    pub fn begin_load(&mut self) -> Result<LoadTicket, SessionError> {
        self.apply(AllocationEvent::LoadRequested)?;
        self.generation += 1;
        Ok(LoadTicket { generation: self.generation })
    }

    pub fn complete_load(
        &mut self,
        ticket: LoadTicket,
        result: Result<AllocationSnapshot, String>,
    ) -> Result<LoadApplied, SessionError> {
        if ticket.generation != self.generation {
            return Ok(LoadApplied::Stale { ticket: ticket.generation, current: self.generation });
        }

        let snapshot = match result {
            Ok(snapshot) => snapshot,
            Err(reason) => return self.block(reason),
        };
        if snapshot.parent.is_empty() {
            return self.block(NO_PARENT_DATA.to_owned());
        }
        let (parent, records_report) = match RebateMatrix::from_records(&snapshot.parent) {
            Ok(parsed) => parsed,
            Err(error) => return self.block(format!("{NO_PARENT_DATA}: {error}")),
        };

        self.apply(AllocationEvent::LoadSucceeded)?;
        let (pair, report) = AllocationPair::initialize(parent, snapshot.child.as_deref());
        self.saved = amounts(pair.child());
        self.pair = Some(pair);
        self.pending_save = None;
        self.notice = None;

        Ok(LoadApplied::Ready { report, unparsed_parent: records_report.unparsed.len() })
    }

    pub fn edit_cell(&mut self, key: CellKey, new_value: u64) -> Result<u64, SessionError> {
        if self.state != AllocationState::Ready {
            return Err(SessionError::NotEditable(self.state.clone()));
        }
        let pair = self.pair.as_mut().ok_or_else(|| SessionError::NotEditable(self.state.clone()))?;
        Ok(pair.edit_cell(key, new_value)?)
    }

    pub fn edit_cell_with_audit<S>(
        &mut self,
        key: CellKey,
        new_value: u64,
        sink: &S,
        audit: &AuditContext,
    ) -> Result<u64, SessionError>
    where
        S: AuditSink,
    {
        let result = self.edit_cell(key, new_value);
        let (event_type, outcome) = match &result {
            Ok(_) => ("allocation.cell_edit_applied", AuditOutcome::Success),
            Err(_) => ("allocation.cell_edit_rejected", AuditOutcome::Rejected),
        };
        let mut event = AuditEvent::new(
            Some(self.context.policy_id.clone()),
            audit.correlation_id.clone(),
            event_type,
            AuditCategory::Allocation,
            audit.actor.clone(),
            outcome,
        )
        .with_metadata("cell", key.to_string())
        .with_metadata("requested", new_value.to_string());
        if let Err(error) = &result {
            event = event.with_metadata("error", error.to_string());
        }
        sink.emit(event);
        result
    }

    pub fn fill_from_parent(&mut self, percent: u32) -> Result<usize, SessionError> {
        if self.state != AllocationState::Ready {
            return Err(SessionError::NotEditable(self.state.clone()));
        }
        let pair = self.pair.as_mut().ok_or_else(|| SessionError::NotEditable(self.state.clone()))?;
        Ok(pair.fill_from_parent(percent)?)
    }

    /// Moves to `Saving` and returns the full child grid to post.
    pub fn begin_save(&mut self) -> Result<SaveMatrixRequest, SessionError> {
        if self.is_saving() {
            return Err(SessionError::SaveInFlight(self.context.policy_id.clone()));
        }
        self.apply(AllocationEvent::SaveRequested)?;

        let Some(pair) = self.pair.as_ref() else {
            self.state = AllocationState::Ready;
            return Err(SessionError::NotEditable(AllocationState::Ready));
        };
        self.pending_save = Some(amounts(pair.child()));
        Ok(SaveMatrixRequest {
            policy_id: self.context.policy_id.clone(),
            matrix: pair.child().full_records(),
        })
    }

    /// Returns to `Ready` either way; failed saves keep the local edits.
    pub fn complete_save(
        &mut self,
        result: Result<SaveAck, String>,
    ) -> Result<SessionNotice, SessionError> {
        let event = match &result {
            Ok(_) => AllocationEvent::SaveSucceeded,
            Err(_) => AllocationEvent::SaveFailed,
        };
        self.apply(event)?;

        let pending = self.pending_save.take();
        let notice = match result {
            Ok(ack) => {
                if let Some(pending) = pending {
                    if let Some(pair) = self.pair.as_mut() {
                        pair.settle_saved(pending.keys().copied());
                    }
                    self.saved = pending;
                }
                SessionNotice::Saved { message: ack.message }
            }
            Err(message) => SessionNotice::SaveFailed { message },
        };
        self.notice = Some(notice.clone());
        Ok(notice)
    }

    fn block(&mut self, reason: String) -> Result<LoadApplied, SessionError> {
        self.apply(AllocationEvent::LoadFailed { reason: reason.clone() })?;
        self.pair = None;
        self.saved.clear();
        self.pending_save = None;
        Ok(LoadApplied::Blocked { reason })
    }

    fn apply(&mut self, event: AllocationEvent) -> Result<TransitionOutcome, SessionError> {
        let outcome = transition(&self.state, &event)?;
        self.state = outcome.to.clone();
        Ok(outcome)
    }
}

fn amounts(matrix: &RebateMatrix) -> BTreeMap<CellKey, u64> {
    matrix.cells().map(|(key, cell)| (key, cell.amount)).collect()
}
