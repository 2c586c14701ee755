//! sealhost CLI
//!
//! Provisions cluster infrastructure from an infra file and distributes
//! artifacts to its hosts

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;

use config::Config;

#[derive(Parser)]
#[command(name = "sealhost")]
#[command(about = "Cluster infrastructure reconciler and artifact distributor", long_about = None)]
struct Cli {
    /// Config file (defaults to $SEALHOST_CONFIG, ./sealhost.toml, ...)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG is set
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or converge the infrastructure described by an infra file
    Apply {
        /// Infra file (TOML)
        #[arg(short, long)]
        file: PathBuf,
    },
    /// Tear down everything the infra file's cluster owns
    Delete {
        #[arg(short, long)]
        file: PathBuf,
    },
    /// Show the recorded status of the infra file's cluster
    Status {
        #[arg(short, long)]
        file: PathBuf,
    },
    /// Copy a file, directory or URL to the given hosts
    Copy {
        /// Local path or http(s) URL
        source: String,
        /// Target host (`addr` or `addr:port`), repeatable
        #[arg(long = "host", required = true)]
        hosts: Vec<String>,
        /// Remote directory
        #[arg(long)]
        dest: String,
        /// Command run on each host before the transfer
        #[arg(long)]
        before: Option<String>,
        /// Command run on each host after the transfer
        #[arg(long)]
        after: Option<String>,
    },
    /// Copy an artifact to the ready hosts of a provisioned cluster
    Install {
        #[arg(short, long)]
        file: PathBuf,
        source: String,
        #[arg(long)]
        dest: String,
        /// Only hosts of groups carrying this role
        #[arg(long)]
        role: Option<String>,
        #[arg(long)]
        before: Option<String>,
        #[arg(long)]
        after: Option<String>,
    },
}

fn init_tracing(config: &Config, debug: bool) {
    let level = if debug { "debug" } else { config.log.level.as_str() };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if config.log.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::load_default()?,
    };
    init_tracing(&config, cli.debug);

    match cli.command {
        Commands::Apply { file } => commands::apply(&config, &file, false).await,
        Commands::Delete { file } => commands::apply(&config, &file, true).await,
        Commands::Status { file } => commands::status(&config, &file).await,
        Commands::Copy {
            source,
            hosts,
            dest,
            before,
            after,
        } => {
            let request = sealhost_dist::DistributionRequest {
                source,
                hosts,
                dest_dir: dest,
                before,
                after,
            };
            commands::copy(&config, &request).await
        }
        Commands::Install {
            file,
            source,
            dest,
            role,
            before,
            after,
        } => {
            let msg = sealhost_core::InstallArtifact {
                source,
                dest_dir: dest,
                before,
                after,
                role,
            };
            commands::install(&config, &file, msg).await
        }
    }
}
