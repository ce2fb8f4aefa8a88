use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use rebate_core::domain::matrix::{ContractPeriod, MatrixRecord, RecordId};
use rebate_core::domain::policy::PolicyId;
use rebate_core::session::{AllocationSnapshot, SaveAck, SaveMatrixRequest};
use tokio::sync::RwLock;

use crate::{GatewayError, MatrixGateway};

#[derive(Debug, Default)]
struct PendingFailures {
    fetch: Option<String>,
    child_fetch: Option<String>,
    save: Option<String>,
}

/// Gateway that keeps matrices in process memory. Saved child matrices get
/// persisted ids in place of synthetic ones, as the real backend does.
pub struct InMemoryMatrixGateway {
    parents: RwLock<HashMap<String, Vec<MatrixRecord>>>,
    children: RwLock<HashMap<String, Vec<MatrixRecord>>>,
    saved_requests: RwLock<Vec<SaveMatrixRequest>>,
    failures: RwLock<PendingFailures>,
    embed_child: AtomicBool,
    next_id: AtomicU64,
}

impl Default for InMemoryMatrixGateway {
    fn default() -> Self {
        Self {
            parents: RwLock::default(),
            children: RwLock::default(),
            saved_requests: RwLock::default(),
            failures: RwLock::default(),
            embed_child: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
        }
    }
}

impl InMemoryMatrixGateway {
    pub async fn seed_parent(&self, policy_id: &PolicyId, records: Vec<MatrixRecord>) {
        self.parents.write().await.insert(policy_id.0.clone(), records);
    }

    pub async fn seed_child(&self, policy_id: &PolicyId, records: Vec<MatrixRecord>) {
        self.children.write().await.insert(policy_id.0.clone(), records);
    }

    /// Return the saved child inside the parent response instead of only from
    /// the dedicated child endpoint.
    pub fn set_embed_child(&self, embed: bool) {
        self.embed_child.store(embed, Ordering::SeqCst);
    }

    pub async fn fail_next_fetch(&self, message: impl Into<String>) {
        self.failures.write().await.fetch = Some(message.into());
    }

    pub async fn fail_next_child_fetch(&self, message: impl Into<String>) {
        self.failures.write().await.child_fetch = Some(message.into());
    }

    pub async fn fail_next_save(&self, message: impl Into<String>) {
        self.failures.write().await.save = Some(message.into());
    }

    pub async fn saved_requests(&self) -> Vec<SaveMatrixRequest> {
        self.saved_requests.read().await.clone()
    }

    pub async fn stored_child(&self, policy_id: &PolicyId) -> Option<Vec<MatrixRecord>> {
        self.children.read().await.get(&policy_id.0).cloned()
    }

    /// Keeps a persisted id, else reuses the id already stored for the same
    /// cell, else allocates a fresh one.
    fn persist_id(&self, record: &MatrixRecord, stored: &HashMap<StoredKey, u64>) -> RecordId {
        match record.id {
            Some(RecordId::Persisted(id)) => RecordId::Persisted(id),
            _ => stored
                .get(&stored_key(record))
                .copied()
                .map(RecordId::Persisted)
                .unwrap_or_else(|| RecordId::Persisted(self.next_id.fetch_add(1, Ordering::SeqCst))),
        }
    }
}

type StoredKey = (Option<u64>, ContractPeriod);

fn stored_key(record: &MatrixRecord) -> StoredKey {
    (record.plan_range.resolve(), record.contract_period)
}

fn stored_ids(records: &[MatrixRecord]) -> HashMap<StoredKey, u64> {
    records
        .iter()
        .filter_map(|record| match record.id {
            Some(RecordId::Persisted(id)) => Some((stored_key(record), id)),
            _ => None,
        })
        .collect()
}

#[async_trait]
impl MatrixGateway for InMemoryMatrixGateway {
    async fn fetch_allocation(
        &self,
        policy_id: &PolicyId,
    ) -> Result<AllocationSnapshot, GatewayError> {
        if let Some(message) = self.failures.write().await.fetch.take() {
            return Err(GatewayError::Unavailable(message));
        }

        let parent = self.parents.read().await.get(&policy_id.0).cloned().unwrap_or_default();
        let child = if self.embed_child.load(Ordering::SeqCst) {
            self.children.read().await.get(&policy_id.0).cloned()
        } else {
            None
        };
        Ok(AllocationSnapshot { parent, child })
    }

    async fn fetch_child_matrix(
        &self,
        policy_id: &PolicyId,
    ) -> Result<Option<Vec<MatrixRecord>>, GatewayError> {
        if let Some(message) = self.failures.write().await.child_fetch.take() {
            return Err(GatewayError::Unavailable(message));
        }
        Ok(self.children.read().await.get(&policy_id.0).cloned())
    }

    async fn save_matrix(&self, request: &SaveMatrixRequest) -> Result<SaveAck, GatewayError> {
        if let Some(message) = self.failures.write().await.save.take() {
            return Err(GatewayError::Unavailable(message));
        }

        let mut children = self.children.write().await;
        let existing = children.get(&request.policy_id.0).map(|records| stored_ids(records));
        let existing = existing.unwrap_or_default();
        let stored = request
            .matrix
            .iter()
            .map(|record| {
                let id = self.persist_id(record, &existing);
                record.clone().with_id(id)
            })
            .collect();
        children.insert(request.policy_id.0.clone(), stored);
        drop(children);
        self.saved_requests.write().await.push(request.clone());

        Ok(SaveAck { message: Some("saved".to_owned()) })
    }
}
