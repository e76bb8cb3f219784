//! Search service errors.

use gym_core::ErrorKind;
use gym_web::AppError;
use thiserror::Error;

/// Errors from the search layers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SearchError {
    /// The primary backend failed or answered with an error.
    #[error("Search backend error: {0}")]
    Backend(String),

    /// The relational store failed.
    #[error("Database error: {message}")]
    Database {
        /// Classified kind.
        kind: ErrorKind,
        /// Driver message.
        message: String,
    },

    /// The distributed cache failed.
    #[error("Cache error: {0}")]
    Cache(String),

    /// No such document.
    #[error("Document {0} not found")]
    NotFound(String),

    /// Malformed request.
    #[error("Invalid request: {0}")]
    Validation(String),
}

impl SearchError {
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
            Self::Backend(_) | Self::Cache(_) => ErrorKind::Transient,
            Self::Database { kind, .. } => *kind,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Validation(_) => ErrorKind::Validation,
        }
    }
}

impl From<SearchError> for AppError {
    fn from(err: SearchError) -> Self {
        Self::from_kind(err.kind(), err.to_string())
    }
}
