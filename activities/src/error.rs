//! Activities service errors.

use gym_core::ErrorKind;
use gym_runtime::UserLookupError;
use gym_web::{AppError, CAPACITY_CONFLICT, CAPACITY_EXCEEDED};
use thiserror::Error;

/// Errors from inscription and capacity operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ActivityError {
    /// No such activity (or it was soft-deleted).
    #[error("Activity {0} not found")]
    ActivityNotFound(i64),

    /// No active inscription for the pair.
    #[error("No active inscription for user {user_id} in activity {activity_id}")]
    InscriptionNotFound {
        /// User id.
        user_id: u64,
        /// Activity id.
        activity_id: i64,
    },

    /// Every seat is taken.
    #[error("Activity {activity_id} has no remaining seats")]
    CapacityExceeded {
        /// Activity id.
        activity_id: i64,
    },

    /// The new capacity is below the current active count.
    #[error(
        "Activity {activity_id} has {active} active inscriptions, capacity cannot drop to {requested}"
    )]
    CapacityConflict {
        /// Activity id.
        activity_id: i64,
        /// Requested capacity.
        requested: i32,
        /// Active inscriptions right now.
        active: i64,
    },

    /// The user already holds an active inscription.
    #[error("User {user_id} is already enrolled in activity {activity_id}")]
    AlreadyEnrolled {
        /// User id.
        user_id: u64,
        /// Activity id.
        activity_id: i64,
    },

    /// Malformed input.
    #[error("Invalid request: {0}")]
    Validation(String),

    /// The users service refused or failed.
    #[error(transparent)]
    User(#[from] UserLookupError),

    /// Store failure.
    #[error("Database error: {message}")]
    Database {
        /// Classified kind (transient for connectivity).
        kind: ErrorKind,
        /// Driver message.
        message: String,
    },
}

impl ActivityError {
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
            Self::ActivityNotFound(_) | Self::InscriptionNotFound { .. } => ErrorKind::NotFound,
            Self::CapacityExceeded { .. }
            | Self::CapacityConflict { .. }
            | Self::AlreadyEnrolled { .. } => ErrorKind::Conflict,
            Self::Validation(_) => ErrorKind::Validation,
            Self::User(e) => e.kind(),
            Self::Database { kind, .. } => *kind,
        }
    }
}

impl From<ActivityError> for AppError {
    fn from(err: ActivityError) -> Self {
        let app = Self::from_kind(err.kind(), err.to_string());
        match err {
            ActivityError::CapacityExceeded { .. } => app.with_code(CAPACITY_EXCEEDED),
            ActivityError::CapacityConflict { .. } => app.with_code(CAPACITY_CONFLICT),
            _ => app,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn capacity_errors_are_conflicts_with_specific_codes() {
        let full: AppError = ActivityError::CapacityExceeded { activity_id: 3 }.into();
        assert_eq!(full.status(), StatusCode::CONFLICT);
        assert_eq!(full.code(), "CAPACITY_EXCEEDED");

        let shrink: AppError = ActivityError::CapacityConflict {
            activity_id: 3,
            requested: 4,
            active: 5,
        }
        .into();
        assert_eq!(shrink.code(), "CAPACITY_CONFLICT");
    }

    #[test]
    fn users_service_outage_is_transient() {
        let err = ActivityError::from(UserLookupError::Unavailable("timeout".into()));
        assert_eq!(err.kind(), ErrorKind::Transient);
        assert_eq!(ActivityError::from(UserLookupError::NotFound(9)).kind(), ErrorKind::NotFound);
    }
}
