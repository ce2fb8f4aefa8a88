//! Network side of the allocation console: fetching and saving rebate
//! matrices, and driving an [`rebate_core::AllocationSession`] through those
//! calls.

pub mod controller;
pub mod http;
pub mod memory;
pub mod telemetry;

use async_trait::async_trait;
use rebate_core::domain::matrix::MatrixRecord;
use rebate_core::domain::policy::PolicyId;
use rebate_core::envelope::EnvelopeError;
use rebate_core::session::{AllocationSnapshot, SaveAck, SaveMatrixRequest};
use thiserror::Error;

pub use controller::AllocationController;
pub use http::HttpMatrixGateway;
pub use memory::InMemoryMatrixGateway;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("endpoint returned {status}: {message}")]
    Status { status: u16, message: String },
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("gateway configuration error: {0}")]
    Configuration(String),
    #[error("gateway unavailable: {0}")]
    Unavailable(String),
}

/// Persistence collaborator for one policy's rebate matrices.
#[async_trait]
pub trait MatrixGateway: Send + Sync {
    /// Parent matrix, plus the child matrix when the endpoint embeds it.
    async fn fetch_allocation(
        &self,
        policy_id: &PolicyId,
    ) -> Result<AllocationSnapshot, GatewayError>;

    /// Previously saved child matrix; `None` when nothing was saved yet.
    async fn fetch_child_matrix(
        &self,
        policy_id: &PolicyId,
    ) -> Result<Option<Vec<MatrixRecord>>, GatewayError>;

    async fn save_matrix(&self, request: &SaveMatrixRequest) -> Result<SaveAck, GatewayError>;
}
