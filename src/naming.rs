//! Project URL → container name mapping.
//!
//! Every component that talks to the runtime about a project (lifecycle,
//! activity monitor, reconciliation, proxy) derives the container name with
//! [`resolve`], so they agree on identity without sharing storage.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::models::Project;

/// Name returned when a URL yields no usable characters.
pub const FALLBACK_NAME: &str = "default_id";

/// Derive the container name for a project's public URL.
///
/// `app.alice.localhost` → `app-alice`. Only the first two dot-separated
/// labels are used; anything outside `[A-Za-z0-9_-]` is dropped.
pub fn resolve(url: &str) -> String {
    if url.is_empty() {
        return FALLBACK_NAME.to_string();
    }

    let mut labels = url.split('.');
    let joined = match (labels.next(), labels.next()) {
        (Some(first), Some(second)) => format!("{}-{}", first, second),
        (Some(first), None) => first.to_string(),
        _ => String::new(),
    };

    let name: String = joined
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect();

    if name.is_empty() {
        FALLBACK_NAME.to_string()
    } else {
        name
    }
}

/// Cached identity of one project's runtime resources.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub owner: String,
    pub container_name: String,
    pub github_url: Option<String>,
}

impl CacheEntry {
    pub fn for_project(project: &Project) -> Self {
        Self {
            owner: project.owner.clone(),
            container_name: resolve(&project.public_url),
            github_url: project.github_url.clone().filter(|u| !u.is_empty()),
        }
    }
}

/// Project id → container identity, rebuilt from the project store on demand.
///
/// Never the source of truth: every entry can be re-derived from a
/// [`Project`]. Locks are held only for map access, never across an await.
#[derive(Debug, Default)]
pub struct ContainerNameCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl ContainerNameCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, project_id: &str) -> Option<CacheEntry> {
        self.entries
            .read()
            .ok()
            .and_then(|entries| entries.get(project_id).cloned())
    }

    /// Insert (or overwrite) the entry derived from `project`.
    pub fn remember(&self, project: &Project) -> CacheEntry {
        let entry = CacheEntry::for_project(project);
        if let Ok(mut entries) = self.entries.write() {
            entries.insert(project.id.clone(), entry.clone());
        }
        entry
    }

    /// Replace every entry belonging to `owner` with the given project list.
    pub fn refresh_owner(&self, owner: &str, projects: &[Project]) {
        if let Ok(mut entries) = self.entries.write() {
            entries.retain(|_, entry| entry.owner != owner);
            for project in projects {
                entries.insert(project.id.clone(), CacheEntry::for_project(project));
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
