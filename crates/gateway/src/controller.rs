use std::sync::Arc;

use rebate_core::audit::{
    AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink, NoopAuditSink,
};
use rebate_core::domain::matrix::{coerce_amount_input, CellKey, MatrixRecord};
use rebate_core::domain::policy::{PolicyContext, PolicyId};
use rebate_core::errors::ApplicationError;
use rebate_core::session::{
    AllocationSession, AllocationSnapshot, LoadApplied, SaveMatrixRequest, SessionNotice,
};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{GatewayError, MatrixGateway};

/// Drives one [`AllocationSession`] through a [`MatrixGateway`].
///
/// The session lock is released for the duration of every network call. The
/// session's own state and guards decide whether an edit, a second save or a
/// late load result is accepted while a call is in flight.
pub struct AllocationController<G, S = NoopAuditSink> {
    gateway: Arc<G>,
    session: Mutex<AllocationSession>,
    audit: S,
    actor: String,
}

impl<G> AllocationController<G, NoopAuditSink>
where
    G: MatrixGateway,
{
    pub fn new(gateway: Arc<G>, context: PolicyContext) -> Self {
        Self::with_audit(gateway, context, NoopAuditSink, "console")
    }
}

impl<G, S> AllocationController<G, S>
where
    G: MatrixGateway,
    S: AuditSink,
{
    pub fn with_audit(
        gateway: Arc<G>,
        context: PolicyContext,
        audit: S,
        actor: impl Into<String>,
    ) -> Self {
        Self {
            gateway,
            session: Mutex::new(AllocationSession::new(context)),
            audit,
            actor: actor.into(),
        }
    }

    /// Runs `read` against the current session state.
    pub async fn with_session<R>(&self, read: impl FnOnce(&AllocationSession) -> R) -> R {
        let session = self.session.lock().await;
        read(&session)
    }

    /// Fetches parent and stored child concurrently and applies the result.
    ///
    /// A missing or empty parent matrix leaves the session blocked and is
    /// returned as [`ApplicationError::Fetch`]. A load overtaken by a newer
    /// one returns [`LoadApplied::Stale`] without touching the session.
    pub async fn load(&self) -> Result<LoadApplied, ApplicationError> {
        let (ticket, policy_id) = {
            let mut session = self.session.lock().await;
            (session.begin_load()?, session.context().policy_id.clone())
        };
        info!(
            event_name = "allocation.load_started",
            policy_id = %policy_id,
            generation = ticket.generation(),
            "loading allocation matrices"
        );

        let (allocation, child) = tokio::join!(
            self.gateway.fetch_allocation(&policy_id),
            self.gateway.fetch_child_matrix(&policy_id)
        );
        let snapshot = merge_snapshot(&policy_id, allocation, child);
        if let Err(reason) = &snapshot {
            self.emit_fetch_failure(&policy_id, reason);
        }

        let applied = self.session.lock().await.complete_load(ticket, snapshot)?;
        match &applied {
            LoadApplied::Ready { report, unparsed_parent } => info!(
                event_name = "allocation.load_ready",
                policy_id = %policy_id,
                backfilled = report.backfilled.len(),
                dropped = report.dropped.len(),
                over_ceiling = report.over_ceiling.len(),
                unparsed_parent = *unparsed_parent,
                "allocation ready for editing"
            ),
            LoadApplied::Blocked { reason } => {
                warn!(
                    event_name = "allocation.load_blocked",
                    policy_id = %policy_id,
                    reason = %reason,
                    "allocation blocked"
                );
                return Err(ApplicationError::Fetch(reason.clone()));
            }
            LoadApplied::Stale { ticket, current } => debug!(
                event_name = "allocation.load_stale",
                policy_id = %policy_id,
                ticket = *ticket,
                current = *current,
                "discarding superseded load"
            ),
        }
        Ok(applied)
    }

    pub async fn edit_cell(&self, key: CellKey, new_value: u64) -> Result<u64, ApplicationError> {
        let mut session = self.session.lock().await;
        let audit = AuditContext::new(
            Some(session.context().policy_id.clone()),
            Uuid::new_v4().to_string(),
            self.actor.clone(),
        );
        Ok(session.edit_cell_with_audit(key, new_value, &self.audit, &audit)?)
    }

    /// Same as [`Self::edit_cell`] for raw text input.
    pub async fn edit_cell_input(&self, key: CellKey, raw: &str) -> Result<u64, ApplicationError> {
        self.edit_cell(key, coerce_amount_input(raw)).await
    }

    pub async fn fill_from_parent(&self, percent: u32) -> Result<usize, ApplicationError> {
        Ok(self.session.lock().await.fill_from_parent(percent)?)
    }

    /// Posts the full child grid. A failed save keeps local edits and is
    /// returned as [`ApplicationError::Save`].
    pub async fn save(&self) -> Result<SessionNotice, ApplicationError> {
        let request = self.session.lock().await.begin_save()?;
        let correlation_id = Uuid::new_v4().to_string();
        info!(
            event_name = "allocation.save_started",
            policy_id = %request.policy_id,
            correlation_id = %correlation_id,
            records = request.matrix.len(),
            "saving child matrix"
        );

        let result = self.gateway.save_matrix(&request).await.map_err(|error| {
            error!(
                event_name = "allocation.save_failed",
                policy_id = %request.policy_id,
                correlation_id = %correlation_id,
                error = %error,
                "child matrix save failed"
            );
            error.to_string()
        });

        let notice = self.session.lock().await.complete_save(result)?;
        self.emit_save_event(&request, &correlation_id, &notice);

        match notice {
            SessionNotice::SaveFailed { message } => Err(ApplicationError::Save(message)),
            saved => Ok(saved),
        }
    }

    fn emit_fetch_failure(&self, policy_id: &PolicyId, reason: &str) {
        self.audit.emit(
            AuditEvent::new(
                Some(policy_id.clone()),
                Uuid::new_v4().to_string(),
                "gateway.fetch_failed",
                AuditCategory::Gateway,
                self.actor.clone(),
                AuditOutcome::Failed,
            )
            .with_metadata("error", reason),
        );
    }

    fn emit_save_event(
        &self,
        request: &SaveMatrixRequest,
        correlation_id: &str,
        notice: &SessionNotice,
    ) {
        let (event_type, outcome) = match notice {
            SessionNotice::Saved { .. } => ("allocation.save_succeeded", AuditOutcome::Success),
            SessionNotice::SaveFailed { .. } => ("allocation.save_failed", AuditOutcome::Failed),
        };
        let mut event = AuditEvent::new(
            Some(request.policy_id.clone()),
            correlation_id,
            event_type,
            AuditCategory::Allocation,
            self.actor.clone(),
            outcome,
        )
        .with_metadata("records", request.matrix.len().to_string());
        if let SessionNotice::SaveFailed { message } = notice {
            event = event.with_metadata("error", message.clone());
        }
        self.audit.emit(event);
    }
}

/// Prefers a child matrix embedded in the parent response; the dedicated
/// child fetch only matters when nothing was embedded.
fn merge_snapshot(
    policy_id: &PolicyId,
    allocation: Result<AllocationSnapshot, GatewayError>,
    child: Result<Option<Vec<MatrixRecord>>, GatewayError>,
) -> Result<AllocationSnapshot, String> {
    let mut snapshot = allocation.map_err(|error| error.to_string())?;
    match child {
        Ok(child) if snapshot.child.is_none() => snapshot.child = child,
        Ok(_) => {}
        Err(error) if snapshot.child.is_none() => return Err(error.to_string()),
        Err(error) => warn!(
            event_name = "allocation.child_fetch_ignored",
            policy_id = %policy_id,
            error = %error,
            "child fetch failed but the parent response embedded a child matrix"
        ),
    }
    Ok(snapshot)
}
