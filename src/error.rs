//! Error taxonomy shared by the store, gateway and sync engine.

use thiserror::Error;

/// Coarse classification the sync engine's retry policy keys on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GatewayErrorKind {
    Unauthenticated,
    NetworkUnavailable,
    BackendRejected,
}

/// Failure of a remote operation.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum GatewayError {
    /// No active session; needs the user to sign in again.
    #[error("not authenticated")]
    Unauthenticated,

    #[error("network unavailable: {0}")]
    NetworkUnavailable(String),

    /// The backend answered but refused the operation (constraint, RLS, bad payload).
    #[error("backend rejected request{}: {message}", status.map(|s| format!(" (HTTP {s})")).unwrap_or_default())]
    BackendRejected { status: Option<u16>, message: String },
}

impl GatewayError {
    pub fn rejected(message: impl Into<String>) -> Self {
        GatewayError::BackendRejected {
            status: None,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> GatewayErrorKind {
        match self {
            GatewayError::Unauthenticated => GatewayErrorKind::Unauthenticated,
            GatewayError::NetworkUnavailable(_) => GatewayErrorKind::NetworkUnavailable,
            GatewayError::BackendRejected { .. } => GatewayErrorKind::BackendRejected,
        }
    }

    /// Whether the next scheduled pass should try again without user action.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, GatewayError::Unauthenticated)
    }

    /// Maps an HTTP status + body from the backend.
    pub fn from_status(status: u16, body: impl Into<String>) -> Self {
        match status {
            401 => GatewayError::Unauthenticated,
            _ => GatewayError::BackendRejected {
                status: Some(status),
                message: body.into(),
            },
        }
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            GatewayError::rejected(format!("unreadable response: {e}"))
        } else if let Some(status) = e.status() {
            GatewayError::from_status(status.as_u16(), e.to_string())
        } else {
            GatewayError::NetworkUnavailable(e.to_string())
        }
    }
}

/// Local store failure.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The database itself could not be opened, read or written.
    #[error("local database error: {0}")]
    Database(String),

    /// A namespace's payload did not deserialize.
    #[error("local store corrupt at '{key}': {message}")]
    Corrupt { key: String, message: String },
}

impl From<native_db::db_type::Error> for StoreError {
    fn from(e: native_db::db_type::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

/// Hard faults that abort a sync pass.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} environment variable is required")]
    Missing(&'static str),

    #[error("invalid value for {name}: {message}")]
    Invalid { name: &'static str, message: String },
}
