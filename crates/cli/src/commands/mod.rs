//! CLI commands for the trading desk.

pub mod accounts;
pub mod audit;
pub mod serve;

pub use accounts::{run_accounts, AccountsArgs};
pub use audit::{run_audit, AuditArgs};
pub use serve::{run_serve, ServeArgs};

use anyhow::{Context, Result};
use std::path::Path;
use tradedesk_bot_orchestrator::RunDatabase;
use tradedesk_core::DatabaseConfig;

/// Opens the configured `SQLite` database, creating its directory first.
pub(crate) async fn open_database(config: &DatabaseConfig) -> Result<RunDatabase> {
    if let Some(file_path) = config.url.strip_prefix("sqlite://") {
        let file_path = file_path.split('?').next().unwrap_or(file_path);
        if let Some(parent) = Path::new(file_path).parent() {
            if !parent.as_os_str().is_empty() {
                tracing::info!("Creating directory for SQLite database: {}", parent.display());
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Cannot create {}", parent.display()))?;
            }
        }
    }

    tracing::info!("Opening database at {}", config.url);
    RunDatabase::new(&config.url, config.max_connections).await
}
