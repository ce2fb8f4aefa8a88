pub mod audit;
pub mod cascade;
pub mod config;
pub mod domain;
pub mod envelope;
pub mod errors;
pub mod matrix;
pub mod session;

pub use cascade::{AllocationPair, CellEditError, CellMargin, InitReport};
pub use domain::matrix::{
    CellKey, ContractPeriod, MatrixRecord, PlanRange, PlanRangeKey, RecordId,
};
pub use domain::policy::{PolicyContext, PolicyId, Tier};
pub use envelope::{unwrap_envelope, EnvelopeError};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use matrix::{MatrixError, MatrixSummary, QuickFillTemplate, RebateMatrix};
pub use session::{
    AllocationSession, AllocationSnapshot, AllocationState, LoadApplied, SaveAck,
    SaveMatrixRequest, SessionError, SessionNotice,
};
