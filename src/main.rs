//! # parlor
//!
//! Chat server binary: loads settings, opens the database and serves the
//! WebSocket hub plus the registration/login endpoints.

#![deny(unsafe_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use parlor_server::{ParlorServer, ServerConfig};
use parlor_settings::ParlorSettings;
use parlor_store::{Database, MessageRepo, UserRepo};

/// Real-time chat server.
#[derive(Parser, Debug)]
#[command(name = "parlor", about = "Real-time chat server")]
struct Cli {
    /// Settings file (default `~/.parlor/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Path to the `SQLite` database (overrides settings).
    #[arg(long)]
    db: Option<PathBuf>,
}

impl Cli {
    fn apply(&self, settings: &mut ParlorSettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(db) = &self.db {
            settings.store.db_path = db.display().to_string();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings_path = cli
        .config
        .clone()
        .unwrap_or_else(parlor_settings::loader::settings_path);
    let mut settings = parlor_settings::loader::load_settings_from_path(&settings_path)
        .with_context(|| format!("Failed to load settings from {}", settings_path.display()))?;
    cli.apply(&mut settings);

    parlor_telemetry::init_telemetry(&settings.logging).context("Failed to initialize logging")?;
    let metrics = parlor_telemetry::metrics::install_recorder()
        .context("Failed to install metrics recorder")?;

    tracing::info!(settings = %settings_path.display(), "starting parlor");

    let db_path = Path::new(&settings.store.db_path);
    let db = Database::open(db_path)
        .with_context(|| format!("Failed to open database: {}", db_path.display()))?;
    let messages = MessageRepo::new(db.clone());
    let history = messages.count().context("Failed to read message history")?;
    tracing::info!(history, "message history ready for replay");

    let server = ParlorServer::new(
        ServerConfig::from_settings(&settings),
        Arc::new(messages),
        Arc::new(UserRepo::new(db, settings.auth.bcrypt_cost)),
        metrics,
    );
    let handle = server.listen().await.context("Failed to start server")?;
    tracing::info!(addr = %handle.addr(), "parlor ready");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl+c")?;
    tracing::info!("shutting down");

    let report = server
        .shutdown()
        .graceful_shutdown(handle.into_task(), None)
        .await;
    if !report.is_clean() {
        tracing::warn!(remaining = report.remaining_connections, "forced exit");
    }
    Ok(())
}
