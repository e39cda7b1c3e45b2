//! In-process document service for development and testing.
//!
//! Behaves like the real service (merge writes, server timestamps,
//! anonymous and email accounts) and can be told to fail, either
//! everything at once (`set_offline`) or writes to specific paths
//! (`fail_path`).

use super::{is_server_timestamp, Connector, Document, Identity, RemoteStore};
use crate::config::RemoteConfig;
use crate::error::{HabitError, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Default)]
struct Failures {
    offline: bool,
    paths: HashSet<String>,
}

struct Account {
    uid: String,
    password: String,
}

pub struct MemoryRemote {
    docs: Mutex<BTreeMap<String, Document>>,
    accounts: Mutex<HashMap<String, Account>>,
    identity: watch::Sender<Option<Identity>>,
    failures: Mutex<Failures>,
    requests: AtomicUsize,
    next_uid: AtomicU64,
}

impl MemoryRemote {
    pub fn new() -> Self {
        let (identity, _) = watch::channel(None);
        Self {
            docs: Mutex::new(BTreeMap::new()),
            accounts: Mutex::new(HashMap::new()),
            identity,
            failures: Mutex::new(Failures::default()),
            requests: AtomicUsize::new(0),
            next_uid: AtomicU64::new(1),
        }
    }

    /// Make every request fail (or succeed again)
    pub fn set_offline(&self, offline: bool) {
        self.failures.lock().offline = offline;
    }

    /// Make writes to `path` fail
    pub fn fail_path(&self, path: impl Into<String>) {
        self.failures.lock().paths.insert(path.into());
    }

    pub fn clear_failures(&self) {
        *self.failures.lock() = Failures::default();
    }

    /// Number of requests received, failed ones included
    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    /// Stored document, bypassing failure injection
    pub fn document(&self, path: &str) -> Option<Document> {
        self.docs.lock().get(path).cloned()
    }

    /// Seed a document, bypassing failure injection
    pub fn insert_document(&self, path: impl Into<String>, fields: Document) {
        self.docs.lock().insert(path.into(), fields);
    }

    fn begin(&self, path: Option<&str>) -> Result<()> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        let failures = self.failures.lock();
        if failures.offline {
            return Err(HabitError::Remote("service unreachable".to_string()));
        }
        if let Some(path) = path {
            if failures.paths.contains(path) {
                return Err(HabitError::Remote(format!("write to {} rejected", path)));
            }
        }
        Ok(())
    }

    fn new_uid(&self, prefix: &str) -> String {
        format!("{}-{}", prefix, self.next_uid.fetch_add(1, Ordering::SeqCst))
    }

    fn signed_in(&self, identity: Identity) -> Identity {
        self.identity.send_replace(Some(identity.clone()));
        identity
    }
}

impl Default for MemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

fn resolve_timestamps(fields: &mut Document) {
    let now = Value::String(chrono::Utc::now().to_rfc3339());
    for value in fields.values_mut() {
        if is_server_timestamp(value) {
            *value = now.clone();
        }
    }
}

#[async_trait]
impl RemoteStore for MemoryRemote {
    fn current_identity(&self) -> Option<Identity> {
        self.identity.borrow().clone()
    }

    fn subscribe_identity(&self) -> watch::Receiver<Option<Identity>> {
        self.identity.subscribe()
    }

    async fn sign_in_anonymously(&self) -> Result<Identity> {
        self.begin(None)?;
        let identity = Identity {
            uid: self.new_uid("anon"),
            email: None,
            anonymous: true,
        };
        Ok(self.signed_in(identity))
    }

    async fn sign_in_with_email(&self, email: &str, password: &str) -> Result<Identity> {
        self.begin(None)?;
        let uid = {
            let accounts = self.accounts.lock();
            match accounts.get(email) {
                Some(account) if account.password == password => account.uid.clone(),
                _ => return Err(HabitError::Remote("invalid email or password".to_string())),
            }
        };

        Ok(self.signed_in(Identity {
            uid,
            email: Some(email.to_string()),
            anonymous: false,
        }))
    }

    async fn create_account(&self, email: &str, password: &str) -> Result<Identity> {
        self.begin(None)?;
        if password.len() < 6 {
            return Err(HabitError::Remote(
                "password must be at least 6 characters".to_string(),
            ));
        }

        let uid = {
            let mut accounts = self.accounts.lock();
            if accounts.contains_key(email) {
                return Err(HabitError::Remote("email already in use".to_string()));
            }
            let uid = self.new_uid("user");
            accounts.insert(
                email.to_string(),
                Account {
                    uid: uid.clone(),
                    password: password.to_string(),
                },
            );
            uid
        };

        Ok(self.signed_in(Identity {
            uid,
            email: Some(email.to_string()),
            anonymous: false,
        }))
    }

    async fn sign_out(&self) -> Result<()> {
        self.begin(None)?;
        self.identity.send_replace(None);
        Ok(())
    }

    async fn set_document(&self, path: &str, mut fields: Document, merge: bool) -> Result<()> {
        self.begin(Some(path))?;
        resolve_timestamps(&mut fields);

        let mut docs = self.docs.lock();
        if merge {
            if let Some(existing) = docs.get_mut(path) {
                existing.extend(fields);
                return Ok(());
            }
        }
        docs.insert(path.to_string(), fields);
        Ok(())
    }

    async fn get_document(&self, path: &str) -> Result<Option<Document>> {
        self.begin(None)?;
        Ok(self.docs.lock().get(path).cloned())
    }

    async fn list_documents(&self, collection: &str) -> Result<Vec<(String, Document)>> {
        self.begin(None)?;
        let prefix = format!("{}/", collection.trim_end_matches('/'));

        let docs = self.docs.lock();
        Ok(docs
            .iter()
            .filter_map(|(path, fields)| {
                let id = path.strip_prefix(&prefix)?;
                (!id.contains('/')).then(|| (id.to_string(), fields.clone()))
            })
            .collect())
    }
}

/// Connector that always hands out the same [`MemoryRemote`]
pub struct MemoryConnector {
    remote: Arc<MemoryRemote>,
    connects: AtomicUsize,
}

impl MemoryConnector {
    pub fn new(remote: Arc<MemoryRemote>) -> Self {
        Self {
            remote,
            connects: AtomicUsize::new(0),
        }
    }

    pub fn remote(&self) -> &Arc<MemoryRemote> {
        &self.remote
    }

    /// How many clients were handed out
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

impl Connector for MemoryConnector {
    fn connect(&self, config: &RemoteConfig) -> Result<Arc<dyn RemoteStore>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        log::debug!("Connecting in-memory remote for project {}", config.project_id);
        Ok(self.remote.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_merge_preserves_remote_fields() {
        let remote = MemoryRemote::new();
        remote.insert_document("users/u/app/habits", doc(json!({"theme": "dark", "habits": []})));

        remote
            .set_document(
                "users/u/app/habits",
                doc(json!({"habits": [1], "updatedAt": crate::remote::server_timestamp()})),
                true,
            )
            .await
            .unwrap();

        let stored = remote.document("users/u/app/habits").unwrap();
        assert_eq!(stored["theme"], json!("dark"));
        assert_eq!(stored["habits"], json!([1]));
        assert!(stored["updatedAt"].is_string());
    }

    #[tokio::test]
    async fn test_replace_drops_fields() {
        let remote = MemoryRemote::new();
        remote.insert_document("a/b", doc(json!({"x": 1})));
        remote.set_document("a/b", doc(json!({"y": 2})), false).await.unwrap();
        assert_eq!(remote.document("a/b").unwrap(), doc(json!({"y": 2})));
    }

    #[tokio::test]
    async fn test_list_documents_direct_children_only() {
        let remote = MemoryRemote::new();
        remote.insert_document("users/u/days/2024-01-01", doc(json!({"date": "2024-01-01"})));
        remote.insert_document("users/u/days/2024-01-02", doc(json!({"date": "2024-01-02"})));
        remote.insert_document("users/u/days/2024-01-02/notes/n", doc(json!({})));
        remote.insert_document("users/other/days/2024-01-03", doc(json!({})));

        let listed = remote.list_documents("users/u/days").await.unwrap();
        let ids: Vec<&str> = listed.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["2024-01-01", "2024-01-02"]);
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let remote = MemoryRemote::new();
        remote.fail_path("bad/doc");
        assert!(remote.set_document("bad/doc", Document::new(), true).await.is_err());
        assert!(remote.set_document("good/doc", Document::new(), true).await.is_ok());

        remote.set_offline(true);
        assert!(remote.get_document("good/doc").await.is_err());

        remote.clear_failures();
        assert!(remote.get_document("good/doc").await.unwrap().is_some());
        assert_eq!(remote.request_count(), 4);
    }

    #[tokio::test]
    async fn test_accounts_and_identity_updates() {
        let remote = MemoryRemote::new();
        let mut rx = remote.subscribe_identity();

        let created = remote.create_account("me@example.com", "hunter22").await.unwrap();
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().as_ref(), Some(&created));

        remote.sign_out().await.unwrap();
        assert!(remote.current_identity().is_none());

        assert!(remote.sign_in_with_email("me@example.com", "wrong").await.is_err());
        let again = remote.sign_in_with_email("me@example.com", "hunter22").await.unwrap();
        assert_eq!(again.uid, created.uid);
        assert!(remote.create_account("me@example.com", "hunter22").await.is_err());
        assert!(remote.create_account("x@example.com", "short").await.is_err());
    }
}
