//! Boundary to the remote identity and project services.
//!
//! Both are external collaborators. The control plane only reads projects;
//! creating, renaming and deleting them happens elsewhere.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;

use crate::errors::HostingError;
use crate::models::Project;

/// An authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    /// Owner identity (the email projects are filed under).
    pub owner: String,
    /// The bearer token the caller presented, forwarded to the store.
    pub token: String,
}

#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Verify a bearer token. Fails with [`HostingError::Unauthorized`].
    async fn authenticate(&self, token: &str) -> Result<Principal, HostingError>;
}

#[async_trait]
pub trait ProjectStore: Send + Sync {
    /// Fetch one project. Projects owned by someone else are reported as
    /// absent.
    async fn get_project(
        &self,
        principal: &Principal,
        id: &str,
    ) -> Result<Option<Project>, HostingError>;

    async fn list_projects(&self, principal: &Principal) -> Result<Vec<Project>, HostingError>;
}

// ── Remote store ────────────────────────────────────────────────────

/// HTTP client for the remote table and identity services.
#[derive(Debug, Clone)]
pub struct RemoteStore {
    client: reqwest::Client,
    database_url: String,
    auth_url: String,
}

impl RemoteStore {
    /// Every request to either service gives up after `timeout`.
    pub fn new(database_url: &str, auth_url: &str, timeout: Duration) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            database_url: database_url.trim_end_matches('/').to_string(),
            auth_url: auth_url.trim_end_matches('/').to_string(),
        })
    }

    async fn read_projects(
        &self,
        principal: &Principal,
        filter: (&str, &str),
    ) -> Result<Vec<Project>, HostingError> {
        let url = format!("{}/read", self.database_url);
        let resp = self
            .client
            .get(&url)
            .bearer_auth(&principal.token)
            .query(&[("tableName", "projects"), filter])
            .send()
            .await
            .map_err(|e| HostingError::ProjectStore(e.to_string()))?;

        if resp.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(HostingError::Unauthorized("token rejected by project store".into()));
        }
        let body: serde_json::Value = resp
            .error_for_status()
            .map_err(|e| HostingError::ProjectStore(e.to_string()))?
            .json()
            .await
            .map_err(|e| HostingError::ProjectStore(e.to_string()))?;

        // Any non-list body means "no rows".
        let rows = match body {
            serde_json::Value::Array(rows) => rows,
            _ => return Ok(Vec::new()),
        };
        let mut projects = Vec::with_capacity(rows.len());
        for row in rows {
            match serde_json::from_value::<Project>(row) {
                Ok(project) => projects.push(project),
                Err(e) => tracing::warn!(error = %e, "Skipping malformed project row"),
            }
        }
        Ok(projects)
    }
}

#[derive(Debug, Deserialize)]
struct VerifyResponse {
    #[serde(default)]
    data: Option<VerifiedIdentity>,
    #[serde(default)]
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VerifiedIdentity {
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    sub: Option<String>,
}

#[async_trait]
impl Authenticator for RemoteStore {
    async fn authenticate(&self, token: &str) -> Result<Principal, HostingError> {
        if token.is_empty() {
            return Err(HostingError::Unauthorized("missing token".into()));
        }
        let url = format!("{}/verify-token", self.auth_url);
        let resp = self
            .client
            .get(&url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| HostingError::ProjectStore(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(HostingError::Unauthorized(format!(
                "token verification returned {}",
                resp.status()
            )));
        }
        let verified: VerifyResponse = resp
            .json()
            .await
            .map_err(|e| HostingError::Unauthorized(format!("unreadable verification: {}", e)))?;

        let owner = verified
            .data
            .and_then(|d| d.email.or(d.sub))
            .or(verified.email)
            .ok_or_else(|| HostingError::Unauthorized("token carries no identity".into()))?;
        Ok(Principal {
            owner,
            token: token.to_string(),
        })
    }
}

#[async_trait]
impl ProjectStore for RemoteStore {
    async fn get_project(
        &self,
        principal: &Principal,
        id: &str,
    ) -> Result<Option<Project>, HostingError> {
        let rows = self.read_projects(principal, ("_id", id)).await?;
        Ok(rows
            .into_iter()
            .find(|p| p.id == id && p.owner == principal.owner))
    }

    async fn list_projects(&self, principal: &Principal) -> Result<Vec<Project>, HostingError> {
        let rows = self
            .read_projects(principal, ("email", principal.owner.as_str()))
            .await?;
        Ok(rows
            .into_iter()
            .filter(|p| p.owner == principal.owner)
            .collect())
    }
}

// ── Static store ────────────────────────────────────────────────────

/// In-memory store for local use and tests.
///
/// File format:
/// ```json
/// { "tokens": { "dev-token": "alice@example.com" }, "projects": [ ... ] }
/// ```
#[derive(Debug, Default, Deserialize)]
pub struct StaticStore {
    #[serde(default)]
    tokens: HashMap<String, String>,
    #[serde(default)]
    projects: Vec<Project>,
}

impl StaticStore {
    pub fn new(projects: Vec<Project>) -> Self {
        Self {
            tokens: HashMap::new(),
            projects,
        }
    }

    pub fn with_token(mut self, token: &str, owner: &str) -> Self {
        self.tokens.insert(token.to_string(), owner.to_string());
        self
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse project file {}", path.display()))
    }

    pub fn project_count(&self) -> usize {
        self.projects.len()
    }
}

#[async_trait]
impl Authenticator for StaticStore {
    async fn authenticate(&self, token: &str) -> Result<Principal, HostingError> {
        self.tokens
            .get(token)
            .map(|owner| Principal {
                owner: owner.clone(),
                token: token.to_string(),
            })
            .ok_or_else(|| HostingError::Unauthorized("unknown token".into()))
    }
}

#[async_trait]
impl ProjectStore for StaticStore {
    async fn get_project(
        &self,
        principal: &Principal,
        id: &str,
    ) -> Result<Option<Project>, HostingError> {
        Ok(self
            .projects
            .iter()
            .find(|p| p.id == id && p.owner == principal.owner)
            .cloned())
    }

    async fn list_projects(&self, principal: &Principal) -> Result<Vec<Project>, HostingError> {
        Ok(self
            .projects
            .iter()
            .filter(|p| p.owner == principal.owner)
            .cloned()
            .collect())
    }
}
