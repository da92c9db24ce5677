//! Toolvault CLI - Command-line interface
//!
//! This binary provides a command-line interface to the Toolvault library:
//! listing available and installed DevKit versions, installing with resume
//! and Ctrl-C cancellation, selecting the active version, and uninstalling.

mod commands;
mod error;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use toolvault::catalog::AuthSession;
use toolvault::config::ManagerConfig;
use toolvault::lifecycle::LifecycleManager;
use toolvault::logging::{default_log_dir, default_log_file, init_logging};

use error::CliError;

#[derive(Parser)]
#[command(name = "toolvault")]
#[command(about = "Manage installed DevKit toolchain versions", long_about = None)]
#[command(version = toolvault::VERSION)]
struct Cli {
    /// Directory installed versions live under
    #[arg(long, global = true)]
    install_root: Option<PathBuf>,

    /// Directory downloaded archives are cached in
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    /// Catalog feed URL
    #[arg(long, global = true)]
    catalog_url: Option<String>,

    /// Unix socket of the privileged helper
    #[arg(long, global = true)]
    helper_socket: Option<PathBuf>,

    /// Session token (default: TOOLVAULT_TOKEN environment variable)
    #[arg(long, global = true)]
    token: Option<String>,

    /// Trusted publisher key as id=base64, repeatable
    #[arg(long = "trusted-key", global = true)]
    trusted_keys: Vec<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List versions available in the catalog
    List {
        /// Only versions whose display string contains this text
        matching: Option<String>,
    },

    /// List versions installed on disk
    Installed,

    /// Download, verify, and install a version (Ctrl-C cancels and keeps
    /// resume state)
    Install {
        /// Version to install, e.g. "15.2.0+15C500b"
        version: String,
    },

    /// Make an installed version the selected one
    Select {
        /// Version to select, e.g. "15.2.0+15C500b"
        version: String,
    },

    /// Remove an installed version from disk
    Uninstall {
        /// Version to remove, e.g. "15.2.0+15C500b"
        version: String,
    },
}

fn build_config(cli: &Cli) -> Result<ManagerConfig, CliError> {
    let mut config = ManagerConfig::new();
    if let Some(root) = &cli.install_root {
        config = config.with_install_root(root);
    }
    if let Some(dir) = &cli.cache_dir {
        config = config.with_cache_dir(dir);
        config = config.with_scratch_dir(dir.join("scratch"));
    }
    if let Some(url) = &cli.catalog_url {
        config = config.with_catalog_url(url);
    }
    if let Some(socket) = &cli.helper_socket {
        config = config.with_helper_socket(socket);
    }
    for entry in &cli.trusted_keys {
        let (key_id, encoded) = entry.split_once('=').ok_or_else(|| {
            CliError::Config(format!("--trusted-key {:?}: expected id=base64", entry))
        })?;
        config = config
            .with_trusted_key_encoded(key_id, encoded)
            .map_err(|e| CliError::Config(e.to_string()))?;
    }
    Ok(config)
}

fn session(cli: &Cli) -> Result<AuthSession, CliError> {
    let token = cli
        .token
        .clone()
        .or_else(|| std::env::var("TOOLVAULT_TOKEN").ok())
        .ok_or(CliError::MissingToken)?;
    Ok(AuthSession::new(token))
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let config = build_config(&cli)?;
    let manager = Arc::new(LifecycleManager::new(config));

    match &cli.command {
        Commands::List { matching } => {
            let session = session(&cli)?;
            commands::list::execute(&manager, &session, matching.as_deref()).await
        }
        Commands::Installed => commands::installed::execute(&manager).await,
        Commands::Install { version } => {
            let session = session(&cli)?;
            commands::install::execute(&manager, &session, version).await
        }
        Commands::Select { version } => commands::select::execute(&manager, version).await,
        Commands::Uninstall { version } => commands::uninstall::execute(&manager, version).await,
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let _logging = match init_logging(default_log_dir(), default_log_file()) {
        Ok(guard) => guard,
        Err(e) => CliError::LoggingInit(e.to_string()).exit(),
    };

    if let Err(e) = run(cli).await {
        e.exit();
    }
}
