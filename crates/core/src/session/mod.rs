pub mod engine;
pub mod states;

pub use engine::{
    transition, AllocationSession, AllocationTransitionError, LoadApplied, LoadTicket,
    SessionError,
};
pub use states::{
    AllocationEvent, AllocationSnapshot, AllocationState, SaveAck, SaveMatrixRequest,
    SessionNotice, TransitionOutcome,
};
