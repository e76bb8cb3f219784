//! Client for the users service.
//!
//! Subscriptions and inscriptions must reference an existing user. The users
//! service answers `GET /users/{id}` with a JSON object carrying the integer
//! id; `404` means the user does not exist and any other non-2xx answer is a
//! transient failure.

use async_trait::async_trait;
use gym_core::ErrorKind;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

/// Default timeout for calls to sibling services.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors from user validation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UserLookupError {
    /// The users service does not know the id.
    #[error("User {0} not found")]
    NotFound(u64),

    /// The id can never be valid.
    #[error("Invalid user id: {0}")]
    InvalidId(String),

    /// Network failure, timeout, or non-2xx answer.
    #[error("Users service unavailable: {0}")]
    Unavailable(String),

    /// The answer did not carry a usable id.
    #[error("Unexpected users service response: {0}")]
    InvalidResponse(String),
}

impl UserLookupError {
    /// Taxonomy kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::InvalidId(_) => ErrorKind::Validation,
            Self::Unavailable(_) | Self::InvalidResponse(_) => ErrorKind::Transient,
        }
    }
}

/// Existence check against the users service.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Succeed only if `user_id` refers to an existing user.
    ///
    /// # Errors
    ///
    /// See [`UserLookupError`].
    async fn ensure_exists(&self, user_id: u64) -> Result<(), UserLookupError>;
}

#[derive(Debug, Deserialize)]
struct UserRecord {
    #[serde(alias = "id")]
    id_usuario: i64,
}

/// HTTP implementation of [`UserDirectory`].
#[derive(Debug, Clone)]
pub struct HttpUserDirectory {
    client: reqwest::Client,
    base_url: String,
}

impl HttpUserDirectory {
    /// Create a client for `base_url` (e.g. `http://localhost:8080`).
    ///
    /// # Errors
    ///
    /// Returns [`UserLookupError::Unavailable`] if the HTTP client cannot be built.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, UserLookupError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| UserLookupError::Unavailable(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl UserDirectory for HttpUserDirectory {
    async fn ensure_exists(&self, user_id: u64) -> Result<(), UserLookupError> {
        if user_id == 0 {
            return Err(UserLookupError::InvalidId("0".to_string()));
        }

        let url = format!("{}/users/{user_id}", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| UserLookupError::Unavailable(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(UserLookupError::NotFound(user_id));
        }
        if !status.is_success() {
            return Err(UserLookupError::Unavailable(format!("status {status}")));
        }

        let record: UserRecord = response
            .json()
            .await
            .map_err(|e| UserLookupError::InvalidResponse(e.to_string()))?;

        if record.id_usuario <= 0 {
            return Err(UserLookupError::InvalidResponse(format!(
                "non-positive id {}",
                record.id_usuario
            )));
        }

        tracing::debug!(user_id, "User validated");
        Ok(())
    }
}

/// Directory that accepts every non-zero id.
///
/// Used when no users service is configured (local development).
#[derive(Debug, Clone, Copy, Default)]
pub struct PermissiveUserDirectory;

#[async_trait]
impl UserDirectory for PermissiveUserDirectory {
    async fn ensure_exists(&self, user_id: u64) -> Result<(), UserLookupError> {
        if user_id == 0 {
            return Err(UserLookupError::InvalidId("0".to_string()));
        }
        tracing::warn!(user_id, "User validation disabled, accepting id");
        Ok(())
    }
}
