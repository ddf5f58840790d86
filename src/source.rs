//! Source acquisition for image builds.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use git2::FetchOptions;
use git2::build::RepoBuilder;

/// Fetches a repository's working tree into a local directory.
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    /// Clone `url` into `dest` with only the latest commit.
    async fn shallow_clone(&self, url: &str, dest: &Path) -> Result<()>;
}

/// `git2`-backed fetcher. Clones run on the blocking pool.
#[derive(Debug, Default, Clone)]
pub struct GitFetcher;

impl GitFetcher {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SourceFetcher for GitFetcher {
    async fn shallow_clone(&self, url: &str, dest: &Path) -> Result<()> {
        let url = url.to_string();
        let dest: PathBuf = dest.to_path_buf();
        tokio::task::spawn_blocking(move || clone_depth_one(&url, &dest))
            .await
            .context("Clone task panicked")?
    }
}

fn clone_depth_one(url: &str, dest: &Path) -> Result<()> {
    let mut fetch = FetchOptions::new();
    fetch.depth(1);
    RepoBuilder::new()
        .fetch_options(fetch)
        .clone(url, dest)
        .with_context(|| format!("git clone --depth 1 {}", url))?;
    tracing::debug!(url = %url, dest = %dest.display(), "Shallow clone complete");
    Ok(())
}
