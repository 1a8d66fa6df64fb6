use serde::{Deserialize, Serialize};
use thiserror::Error;

use shared_models::error::AppError;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConsultationError {
    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("Consultation cannot start because payment is not completed (status: {status})")]
    PaymentIncomplete { status: String },

    #[error("{0} not found")]
    NotFound(String),

    #[error("Consultation has not started or has already ended")]
    NotActive,

    #[error("Consultation has already started")]
    AlreadyActive,

    #[error("Consultation has already ended and cannot be restarted")]
    AlreadyEnded,

    #[error("{0}")]
    MessageStateConflict(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Authentication,
    Authorization,
    Precondition,
    Validation,
    NotFound,
    Storage,
}

impl ConsultationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ConsultationError::Authentication(_) => ErrorKind::Authentication,
            ConsultationError::Forbidden(_) | ConsultationError::PaymentIncomplete { .. } => {
                ErrorKind::Authorization
            }
            ConsultationError::NotActive
            | ConsultationError::AlreadyActive
            | ConsultationError::AlreadyEnded
            | ConsultationError::MessageStateConflict(_) => ErrorKind::Precondition,
            ConsultationError::Validation(_) => ErrorKind::Validation,
            ConsultationError::NotFound(_) => ErrorKind::NotFound,
            ConsultationError::Storage(_) => ErrorKind::Storage,
        }
    }
}

impl From<anyhow::Error> for ConsultationError {
    fn from(err: anyhow::Error) -> Self {
        ConsultationError::Storage(err.to_string())
    }
}

impl From<ConsultationError> for AppError {
    fn from(err: ConsultationError) -> Self {
        let message = err.to_string();
        match err.kind() {
            ErrorKind::Authentication => AppError::Auth(message),
            ErrorKind::Authorization => AppError::Forbidden(message),
            ErrorKind::NotFound => AppError::NotFound(message),
            ErrorKind::Precondition => AppError::Conflict(message),
            ErrorKind::Validation => AppError::BadRequest(message),
            ErrorKind::Storage => AppError::Database(message),
        }
    }
}
