use thiserror::Error;

use crate::{
    cascade::CellEditError, config::ConfigError, envelope::EnvelopeError, matrix::MatrixError,
    session::SessionError,
};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error(transparent)]
    Matrix(#[from] MatrixError),
    #[error(transparent)]
    CellEdit(#[from] CellEditError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("fetch failure: {0}")]
    Fetch(String),
    #[error("save failure: {0}")]
    Save(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

impl From<SessionError> for ApplicationError {
    fn from(value: SessionError) -> Self {
        Self::Domain(DomainError::Session(value))
    }
}

impl From<EnvelopeError> for ApplicationError {
    fn from(value: EnvelopeError) -> Self {
        Self::Fetch(value.to_string())
    }
}

impl From<ConfigError> for ApplicationError {
    fn from(value: ConfigError) -> Self {
        Self::Configuration(value.to_string())
    }
}

/// How an error is presented: inline next to a control, as a page-level block
/// that disables editing, or as a dismissible notification.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("validation failed: {message}")]
    Validation { message: String, correlation_id: String },
    #[error("allocation unavailable: {message}")]
    Blocking { message: String, correlation_id: String },
    #[error("save not completed: {message}")]
    Notification { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> String {
        match self {
            Self::Validation { message, .. } => message.clone(),
            Self::Blocking { .. } => {
                "The parent rebate matrix could not be loaded, so allocation is disabled. Reload to try again."
                    .to_owned()
            }
            Self::Notification { .. } => {
                "Your changes were not saved. They are still here; try saving again.".to_owned()
            }
            Self::Internal { .. } => "An unexpected internal error occurred.".to_owned(),
        }
    }

    pub fn is_blocking(&self) -> bool {
        matches!(self, Self::Blocking { .. })
    }
}

impl ApplicationError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::Validation { correlation_id: id, .. }
            | InterfaceError::Blocking { correlation_id: id, .. }
            | InterfaceError::Notification { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        let correlation_id = "unassigned".to_owned();
        match value {
            ApplicationError::Domain(DomainError::Matrix(error)) => {
                Self::Validation { message: error.user_message(), correlation_id }
            }
            ApplicationError::Domain(DomainError::CellEdit(error))
            | ApplicationError::Domain(DomainError::Session(SessionError::CellEdit(error))) => {
                Self::Validation { message: error.user_message(), correlation_id }
            }
            ApplicationError::Domain(error) => {
                Self::Validation { message: error.to_string(), correlation_id }
            }
            ApplicationError::Fetch(message) => Self::Blocking { message, correlation_id },
            ApplicationError::Save(message) => Self::Notification { message, correlation_id },
            ApplicationError::Configuration(message) => Self::Internal { message, correlation_id },
        }
    }
}
