//! JSON-over-HTTP document service client
//!
//! Endpoints, relative to `{endpoint}/v1/projects/{projectId}`:
//!
//! | Operation            | Request                                   |
//! |----------------------|-------------------------------------------|
//! | anonymous sign-in    | `POST auth/anonymous`                     |
//! | email sign-in        | `POST auth/sign-in` `{email, password}`   |
//! | account creation     | `POST auth/sign-up` `{email, password}`   |
//! | read document        | `GET documents/{path}` (404 = absent)     |
//! | write document       | `PUT documents/{path}?merge=bool` `{fields}` |
//! | list collection      | `GET collections/{path}`                  |
//!
//! Every request carries the project API key in `x-api-key`; document
//! requests also carry the session token as a bearer token. Path segments
//! are percent-encoded one by one.

use super::{Connector, Document, Identity, RemoteStore};
use crate::config::RemoteConfig;
use crate::error::{HabitError, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::{Client, Response, StatusCode, Url};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

#[derive(Debug, Deserialize)]
struct AuthResponse {
    uid: String,
    token: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    anonymous: bool,
}

#[derive(Serialize)]
struct Credentials<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize, Serialize)]
struct DocumentBody {
    #[serde(default)]
    fields: Document,
}

#[derive(Debug, Deserialize)]
struct ListedDocument {
    id: String,
    #[serde(default)]
    fields: Document,
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(default)]
    documents: Vec<ListedDocument>,
}

struct AuthSession {
    token: String,
    identity: Identity,
}

pub struct HttpRemote {
    client: Client,
    base_url: Url,
    api_key: String,
    session: RwLock<Option<AuthSession>>,
    identity: watch::Sender<Option<Identity>>,
}

impl HttpRemote {
    pub fn new(config: &RemoteConfig, timeout: Duration) -> Result<Self> {
        let endpoint = config
            .endpoint
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .ok_or_else(|| {
                HabitError::RemoteConfig("endpoint is required for the HTTP service".to_string())
            })?;

        let mut base_url = Url::parse(endpoint)
            .map_err(|e| HabitError::RemoteConfig(format!("invalid endpoint: {}", e)))?;
        base_url
            .path_segments_mut()
            .map_err(|_| HabitError::RemoteConfig(format!("endpoint {} has no path", endpoint)))?
            .pop_if_empty()
            .extend(["v1", "projects", config.project_id.trim()]);

        let client = Client::builder().timeout(timeout).build()?;
        let (identity, _) = watch::channel(None);

        Ok(Self {
            client,
            base_url,
            api_key: config.api_key.clone(),
            session: RwLock::new(None),
            identity,
        })
    }

    /// `base_url` followed by `route` and then the `/`-separated `path`
    fn url(&self, route: &str, path: &str) -> Url {
        let mut url = self.base_url.clone();
        // base_url was checked to have a path in `new`
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .push(route)
                .extend(path.split('/').filter(|segment| !segment.is_empty()));
        }
        url
    }

    fn token(&self) -> Result<String> {
        self.session
            .read()
            .as_ref()
            .map(|s| s.token.clone())
            .ok_or(HabitError::RemoteNotAuthenticated)
    }

    async fn check(response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let message = response.text().await.unwrap_or_default();
        Err(HabitError::RemoteRequest {
            status: status.as_u16(),
            message,
        })
    }

    async fn authenticate(&self, action: &str, body: serde_json::Value) -> Result<Identity> {
        let response = self
            .client
            .post(self.url("auth", action))
            .header("x-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;
        let auth: AuthResponse = Self::check(response).await?.json().await?;

        let identity = Identity {
            uid: auth.uid,
            email: auth.email,
            anonymous: auth.anonymous,
        };
        *self.session.write() = Some(AuthSession {
            token: auth.token,
            identity: identity.clone(),
        });
        self.identity.send_replace(Some(identity.clone()));
        log::info!("Signed in to remote as {}", identity);

        Ok(identity)
    }
}

#[async_trait]
impl RemoteStore for HttpRemote {
    fn current_identity(&self) -> Option<Identity> {
        self.session.read().as_ref().map(|s| s.identity.clone())
    }

    fn subscribe_identity(&self) -> watch::Receiver<Option<Identity>> {
        self.identity.subscribe()
    }

    async fn sign_in_anonymously(&self) -> Result<Identity> {
        self.authenticate("anonymous", serde_json::json!({})).await
    }

    async fn sign_in_with_email(&self, email: &str, password: &str) -> Result<Identity> {
        let body = serde_json::to_value(Credentials { email, password })?;
        self.authenticate("sign-in", body).await
    }

    async fn create_account(&self, email: &str, password: &str) -> Result<Identity> {
        let body = serde_json::to_value(Credentials { email, password })?;
        self.authenticate("sign-up", body).await
    }

    async fn sign_out(&self) -> Result<()> {
        *self.session.write() = None;
        self.identity.send_replace(None);
        Ok(())
    }

    async fn set_document(&self, path: &str, fields: Document, merge: bool) -> Result<()> {
        let response = self
            .client
            .put(self.url("documents", path))
            .query(&[("merge", merge)])
            .header("x-api-key", &self.api_key)
            .bearer_auth(self.token()?)
            .json(&DocumentBody { fields })
            .send()
            .await?;
        Self::check(response).await?;
        log::debug!("Wrote remote document {}", path);
        Ok(())
    }

    async fn get_document(&self, path: &str) -> Result<Option<Document>> {
        let response = self
            .client
            .get(self.url("documents", path))
            .header("x-api-key", &self.api_key)
            .bearer_auth(self.token()?)
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body: DocumentBody = Self::check(response).await?.json().await?;
        Ok(Some(body.fields))
    }

    async fn list_documents(&self, collection: &str) -> Result<Vec<(String, Document)>> {
        let response = self
            .client
            .get(self.url("collections", collection))
            .header("x-api-key", &self.api_key)
            .bearer_auth(self.token()?)
            .send()
            .await?;

        let listed: ListResponse = Self::check(response).await?.json().await?;
        Ok(listed
            .documents
            .into_iter()
            .map(|doc| (doc.id, doc.fields))
            .collect())
    }
}

/// Connector for [`HttpRemote`]
pub struct HttpConnector {
    timeout: Duration,
}

impl HttpConnector {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Connector for HttpConnector {
    fn connect(&self, config: &RemoteConfig) -> Result<Arc<dyn RemoteStore>> {
        Ok(Arc::new(HttpRemote::new(config, self.timeout)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(endpoint: Option<&str>) -> RemoteConfig {
        RemoteConfig {
            api_key: "key".to_string(),
            project_id: "habits-prod".to_string(),
            endpoint: endpoint.map(String::from),
        }
    }

    #[test]
    fn test_requires_endpoint() {
        let result = HttpRemote::new(&config(None), Duration::from_secs(5));
        assert!(matches!(result, Err(HabitError::RemoteConfig(_))));

        let result = HttpRemote::new(&config(Some("  ")), Duration::from_secs(5));
        assert!(matches!(result, Err(HabitError::RemoteConfig(_))));
    }

    fn remote(endpoint: &str) -> HttpRemote {
        HttpRemote::new(&config(Some(endpoint)), Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_rejects_unusable_endpoint() {
        let result = HttpRemote::new(&config(Some("not a url")), Duration::from_secs(5));
        assert!(matches!(result, Err(HabitError::RemoteConfig(_))));

        let result =
            HttpRemote::new(&config(Some("mailto:me@example.com")), Duration::from_secs(5));
        assert!(matches!(result, Err(HabitError::RemoteConfig(_))));
    }

    #[test]
    fn test_url_building() {
        let remote = remote("https://docs.example.com/");
        assert_eq!(
            remote.url("documents", "users/u/days/2024-01-05").as_str(),
            "https://docs.example.com/v1/projects/habits-prod/documents/users/u/days/2024-01-05"
        );
        assert_eq!(
            remote.url("auth", "sign-in").as_str(),
            "https://docs.example.com/v1/projects/habits-prod/auth/sign-in"
        );

        let nested = self::remote("https://example.com/api");
        assert_eq!(
            nested.url("collections", "users/u/days").as_str(),
            "https://example.com/api/v1/projects/habits-prod/collections/users/u/days"
        );
    }

    #[test]
    fn test_url_escapes_segments() {
        let remote = remote("https://docs.example.com");
        let url = remote.url("documents", "users/a?b#c d/app/habits");

        assert_eq!(
            url.as_str(),
            "https://docs.example.com/v1/projects/habits-prod/documents/users/a%3Fb%23c%20d/app/habits"
        );
        assert!(url.query().is_none());
        assert!(url.fragment().is_none());
    }

    #[test]
    fn test_document_calls_need_session() {
        let remote = remote("https://docs.example.com");
        assert!(matches!(remote.token(), Err(HabitError::RemoteNotAuthenticated)));
        assert!(remote.current_identity().is_none());
    }

    #[test]
    fn test_decode_list_response() {
        let listed: ListResponse = serde_json::from_str(
            r#"{"documents":[{"id":"2024-01-05","fields":{"date":"2024-01-05"}},{"id":"x"}]}"#,
        )
        .unwrap();
        assert_eq!(listed.documents.len(), 2);
        assert_eq!(listed.documents[0].fields["date"], "2024-01-05");
        assert!(listed.documents[1].fields.is_empty());

        let empty: ListResponse = serde_json::from_str("{}").unwrap();
        assert!(empty.documents.is_empty());
    }
}
