//! Remote document service
//!
//! The sync engine talks to the cloud through [`RemoteStore`], a small
//! auth + document-store contract. Documents are flat JSON objects
//! addressed by slash-separated paths; per-user data lives under
//! `users/{uid}/...` (see [`paths`]).
//!
//! Two implementations ship with the crate:
//! - [`memory::MemoryRemote`]: in-process, with failure injection
//! - [`http::HttpRemote`]: JSON-over-HTTP client for a document service

pub mod http;
pub mod memory;

use crate::config::RemoteConfig;
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tokio::sync::watch;

pub use http::{HttpConnector, HttpRemote};
pub use memory::{MemoryConnector, MemoryRemote};

/// A remote document: top-level field name -> value
pub type Document = Map<String, Value>;

/// Signed-in remote identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub uid: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub anonymous: bool,
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.email {
            Some(email) => write!(f, "{} ({})", email, self.uid),
            None if self.anonymous => write!(f, "anonymous ({})", self.uid),
            None => write!(f, "{}", self.uid),
        }
    }
}

/// Placeholder the backend replaces with its own clock on write
pub fn server_timestamp() -> Value {
    json!({ ".sv": "timestamp" })
}

pub fn is_server_timestamp(value: &Value) -> bool {
    *value == server_timestamp()
}

/// Document layout of per-user data
pub mod paths {
    pub fn habits(uid: &str) -> String {
        format!("users/{}/app/habits", uid)
    }

    pub fn days(uid: &str) -> String {
        format!("users/{}/days", uid)
    }

    pub fn day(uid: &str, date: &str) -> String {
        format!("users/{}/days/{}", uid, date)
    }
}

/// Auth and document operations of the remote service
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Identity currently signed in, if any
    fn current_identity(&self) -> Option<Identity>;

    /// Receiver that observes every identity change
    fn subscribe_identity(&self) -> watch::Receiver<Option<Identity>>;

    async fn sign_in_anonymously(&self) -> Result<Identity>;

    async fn sign_in_with_email(&self, email: &str, password: &str) -> Result<Identity>;

    async fn create_account(&self, email: &str, password: &str) -> Result<Identity>;

    async fn sign_out(&self) -> Result<()>;

    /// Write a document. With `merge`, fields not present in `fields` keep
    /// their remote values; without it the document is replaced.
    async fn set_document(&self, path: &str, fields: Document, merge: bool) -> Result<()>;

    async fn get_document(&self, path: &str) -> Result<Option<Document>>;

    /// All documents directly inside `collection`, as `(id, fields)`
    async fn list_documents(&self, collection: &str) -> Result<Vec<(String, Document)>>;
}

/// Builds a [`RemoteStore`] client from the stored remote configuration
pub trait Connector: Send + Sync {
    fn connect(&self, config: &RemoteConfig) -> Result<Arc<dyn RemoteStore>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths() {
        assert_eq!(paths::habits("u1"), "users/u1/app/habits");
        assert_eq!(paths::days("u1"), "users/u1/days");
        assert_eq!(paths::day("u1", "2024-01-05"), "users/u1/days/2024-01-05");
    }

    #[test]
    fn test_identity_display() {
        let anon = Identity {
            uid: "a1".to_string(),
            email: None,
            anonymous: true,
        };
        assert_eq!(anon.to_string(), "anonymous (a1)");

        let named = Identity {
            uid: "u1".to_string(),
            email: Some("me@example.com".to_string()),
            anonymous: false,
        };
        assert_eq!(named.to_string(), "me@example.com (u1)");
    }

    #[test]
    fn test_server_timestamp_sentinel() {
        assert!(is_server_timestamp(&server_timestamp()));
        assert!(!is_server_timestamp(&json!("2024-01-01T00:00:00Z")));
    }
}
