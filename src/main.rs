use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use shipyard::config::ReconcileStrategy;

mod cmd;

#[derive(Parser)]
#[command(name = "shipyard")]
#[command(version, about = "Build, run and route per-project containers")]
pub struct Cli {
    /// Debug-level logging for this crate
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Path to hosting.toml (defaults to .shipyard/hosting.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the control API, event stream, proxy and activity monitor
    Serve {
        /// Listen port (overrides the config file)
        #[arg(short, long)]
        port: Option<u16>,

        /// Reconciliation strategy: poll or events
        #[arg(long)]
        strategy: Option<ReconcileStrategy>,

        /// Serve projects and tokens from a local JSON file instead of the remote store
        #[arg(long)]
        projects: Option<PathBuf>,
    },
    /// Print the container name derived from a project URL
    Resolve {
        /// Project URL, e.g. app.alice.localhost
        url: String,
    },
    /// Print the effective configuration
    Config,
}

fn init_tracing(verbose: bool, json: bool) {
    let default = if verbose { "shipyard=debug,info" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_json);

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(shipyard::config::HostingConfig::default_path);

    match &cli.command {
        Commands::Serve {
            port,
            strategy,
            projects,
        } => {
            cmd::cmd_serve(cmd::ServeOptions {
                config_path,
                port: *port,
                strategy: *strategy,
                projects: projects.clone(),
            })
            .await?
        }
        Commands::Resolve { url } => cmd::cmd_resolve(url),
        Commands::Config => cmd::cmd_config(&config_path)?,
    }

    Ok(())
}
