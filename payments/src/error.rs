//! Payments service errors.

use gym_core::ErrorKind;
use gym_core::domain::PaymentStatus;
use gym_web::AppError;
use thiserror::Error;

/// Errors from payment operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PaymentError {
    /// No such payment.
    #[error("Payment {0} not found")]
    NotFound(String),

    /// Malformed request.
    #[error("Invalid request: {0}")]
    Validation(String),

    /// The idempotency key already names a payment with a different payload.
    #[error("Idempotency key {key} was already used for payment {existing} with a different payload")]
    IdempotencyConflict {
        /// Reused key.
        key: String,
        /// Payment recorded under it.
        existing: String,
    },

    /// Illegal status change.
    #[error("Payment {id} cannot move from {from:?} to {to:?}")]
    InvalidTransition {
        /// Payment id.
        id: String,
        /// Current status.
        from: PaymentStatus,
        /// Requested status.
        to: PaymentStatus,
    },

    /// Concurrent writers kept winning the status compare-and-set.
    #[error("Payment {0} is being updated concurrently")]
    Contended(String),

    /// Store failure.
    #[error("Database error: {message}")]
    Database {
        /// Classified kind.
        kind: ErrorKind,
        /// Driver message.
        message: String,
    },
}

impl PaymentError {
    /// Wrap a driver error, classifying it.
    #[must_use]
    pub fn database(error: &sqlx::Error, context: &str) -> Self {
        Self::Database {
            kind: gym_postgres::classify(error),
            message: format!("{context}: {error}"),
        }
    }

    /// Taxonomy kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Validation(_) => ErrorKind::Validation,
            Self::IdempotencyConflict { .. } | Self::InvalidTransition { .. } => ErrorKind::Conflict,
            Self::Contended(_) => ErrorKind::Transient,
            Self::Database { kind, .. } => *kind,
        }
    }
}

impl From<PaymentError> for AppError {
    fn from(err: PaymentError) -> Self {
        let error = Self::from_kind(err.kind(), err.to_string());
        match err {
            PaymentError::IdempotencyConflict { .. } => error.with_code("IDEMPOTENCY_CONFLICT"),
            _ => error,
        }
    }
}
