use thiserror::Error;

use crate::storage::StoreError;

/// Failure of an operation against the hub.
///
/// Authorization decisions themselves are booleans; `Denied` is produced by
/// the services once a decision came back false.
#[derive(Debug, Error)]
pub enum HubError {
    /// Malformed input, rejected before the store is touched.
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Denied(String),
    #[error("{0} not found")]
    NotFound(&'static str),
    /// A domain rule such as last-manager protection.
    #[error("{0}")]
    Precondition(String),
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("credential hashing failed: {0}")]
    Credential(String),
    #[error("token encoding failed: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl HubError {
    pub fn validation(msg: impl Into<String>) -> Self {
        HubError::Validation(msg.into())
    }

    pub fn denied(msg: impl Into<String>) -> Self {
        HubError::Denied(msg.into())
    }

    /// Infrastructure faults are opaque to callers and never retried.
    pub fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            HubError::Store(_) | HubError::Credential(_) | HubError::Token(_)
        )
    }
}

pub type Result<T, E = HubError> = std::result::Result<T, E>;

/// Trim a required text field, rejecting it when blank.
pub(crate) fn required(field: &str, value: &str) -> Result<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(HubError::validation(format!("{field} is required")));
    }
    Ok(value.to_string())
}
