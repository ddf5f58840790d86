//! Control plane server (`shipyard serve`).

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use shipyard::config::{HostingConfig, ReconcileStrategy};
use shipyard::hosting::Hosting;
use shipyard::runtime::DockerRuntime;
use shipyard::server::{self, AppState};
use shipyard::source::GitFetcher;
use shipyard::store::{Authenticator, ProjectStore, RemoteStore, StaticStore};

pub struct ServeOptions {
    pub config_path: PathBuf,
    pub port: Option<u16>,
    pub strategy: Option<ReconcileStrategy>,
    pub projects: Option<PathBuf>,
}

type Stores = (Arc<dyn ProjectStore>, Arc<dyn Authenticator>);

fn stores(config: &HostingConfig, projects: Option<&PathBuf>) -> Result<Stores> {
    if let Some(path) = projects {
        let store = Arc::new(StaticStore::load(path)?);
        tracing::info!(
            file = %path.display(),
            projects = store.project_count(),
            "Using local project file"
        );
        let projects: Arc<dyn ProjectStore> = store.clone();
        return Ok((projects, store));
    }

    if config.store.database_url.is_empty() || config.store.auth_url.is_empty() {
        anyhow::bail!(
            "No project store configured. Set [store] database_url and auth_url in {}, \
             SHIPYARD_STORE_URL / SHIPYARD_AUTH_URL, or pass --projects <file.json>",
            HostingConfig::default_path().display()
        );
    }
    let store = Arc::new(
        RemoteStore::new(
            &config.store.database_url,
            &config.store.auth_url,
            config.store.timeout(),
        )
        .context("Failed to build project store client")?,
    );
    let projects: Arc<dyn ProjectStore> = store.clone();
    Ok((projects, store))
}

pub async fn cmd_serve(options: ServeOptions) -> Result<()> {
    let mut config = HostingConfig::load(&options.config_path)?;
    if let Some(port) = options.port {
        config.server.port = port;
    }
    if let Some(strategy) = options.strategy {
        config.reconcile.strategy = strategy;
    }

    let (store, auth) = stores(&config, options.projects.as_ref())?;
    let runtime = DockerRuntime::connect()
        .await
        .context("Failed to connect to the container runtime")?;

    let hosting = Hosting::new(&config, Arc::new(runtime), store, Arc::new(GitFetcher::new()))?;
    let state = AppState {
        hosting,
        auth,
        control_hosts: config.server.control_hosts.clone(),
        shutdown: CancellationToken::new(),
    };
    server::start_server(&config, state).await
}
