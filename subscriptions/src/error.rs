//! Subscriptions service errors.

use gym_core::ErrorKind;
use gym_core::domain::SubscriptionState;
use gym_runtime::UserLookupError;
use gym_web::AppError;
use thiserror::Error;

/// Errors from subscription lifecycle operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionError {
    /// No such subscription.
    #[error("Subscription {0} not found")]
    NotFound(String),

    /// No such plan.
    #[error("Plan {0} not found")]
    PlanNotFound(String),

    /// The plan exists but cannot be purchased.
    #[error("Plan {0} is not active")]
    PlanInactive(String),

    /// The requested change is illegal from the current state.
    #[error("Subscription {id} cannot {change} from state {from:?}")]
    InvalidTransition {
        /// Subscription id.
        id: String,
        /// Current state.
        from: SubscriptionState,
        /// Attempted change.
        change: &'static str,
    },

    /// Lost every compare-and-set attempt to concurrent writers.
    #[error("Subscription {0} kept changing underneath the update")]
    Contended(String),

    /// Malformed input.
    #[error("Invalid request: {0}")]
    Validation(String),

    /// The users service refused or failed.
    #[error(transparent)]
    User(#[from] UserLookupError),

    /// Store failure.
    #[error("Database error: {message}")]
    Database {
        /// Classified kind.
        kind: ErrorKind,
        /// Driver message.
        message: String,
    },
}

impl SubscriptionError {
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
            Self::NotFound(_) | Self::PlanNotFound(_) => ErrorKind::NotFound,
            Self::PlanInactive(_) | Self::Validation(_) => ErrorKind::Validation,
            Self::InvalidTransition { .. } => ErrorKind::Conflict,
            Self::Contended(_) => ErrorKind::Transient,
            Self::User(e) => e.kind(),
            Self::Database { kind, .. } => *kind,
        }
    }
}

impl From<SubscriptionError> for AppError {
    fn from(err: SubscriptionError) -> Self {
        Self::from_kind(err.kind(), err.to_string())
    }
}
