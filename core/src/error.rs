//! Cross-service error taxonomy.
//!
//! Each service defines its own `thiserror` enum; every variant maps to one
//! [`ErrorKind`], which decides how the error propagates:
//!
//! | Kind | Origin | Propagation |
//! |------|--------|-------------|
//! | Validation | request shape | 400, never retried |
//! | NotFound | lookup by id | 404, never retried |
//! | Conflict | unique key, capacity, state transition | 409, never retried |
//! | Transient | bus, network, store timeout | requeue (bus) or 503 (HTTP) |
//! | Permanent | malformed event, unknown action | logged and acked |
//! | Credential | gateway rejects keys | surfaced to the operator |

use serde::{Deserialize, Serialize};
use std::fmt;

/// Classification of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Request shape is wrong.
    Validation,
    /// Referenced entity does not exist.
    NotFound,
    /// Unique key, capacity or state-transition clash.
    Conflict,
    /// Infrastructure hiccup; retrying may succeed.
    Transient,
    /// Malformed input that will never succeed.
    Permanent,
    /// External provider rejected our credentials.
    Credential,
}

impl ErrorKind {
    /// Whether a bus handler should requeue on this kind.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::Transient)
    }

    /// Stable upper-case code used in HTTP error bodies.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Validation => "VALIDATION_ERROR",
            Self::NotFound => "NOT_FOUND",
            Self::Conflict => "CONFLICT",
            Self::Transient => "SERVICE_UNAVAILABLE",
            Self::Permanent => "INTERNAL_ERROR",
            Self::Credential => "CREDENTIAL_ERROR",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_is_retryable() {
        for kind in [
            ErrorKind::Validation,
            ErrorKind::NotFound,
            ErrorKind::Conflict,
            ErrorKind::Permanent,
            ErrorKind::Credential,
        ] {
            assert!(!kind.is_retryable(), "{kind} must not be retried");
        }
        assert!(ErrorKind::Transient.is_retryable());
    }
}
