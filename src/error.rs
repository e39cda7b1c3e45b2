//! Error types for habit-ledger

use thiserror::Error;

#[derive(Error, Debug)]
pub enum HabitError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid username or password")]
    AccessDenied,

    #[error("Session expired - please log in again")]
    SessionExpired,

    #[error("Cloud sync is not configured")]
    RemoteNotConfigured,

    #[error("Cloud sync client is not initialized")]
    RemoteNotInitialized,

    #[error("Cloud sync has no signed-in identity")]
    RemoteNotAuthenticated,

    #[error("Invalid remote configuration: {0}")]
    RemoteConfig(String),

    #[error("Remote operation failed: {0}")]
    Remote(String),

    #[error("Remote request failed with status {status}: {message}")]
    RemoteRequest { status: u16, message: String },

    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl HabitError {
    /// Whether this error came from talking to the remote service
    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            HabitError::Remote(_) | HabitError::RemoteRequest { .. } | HabitError::Http(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, HabitError>;
