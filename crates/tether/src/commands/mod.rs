//! CLI command handlers.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result, bail};
use clap::Args;
use tether_config::{AttributeLayout, TetherConfig};
use tether_session::BackedStore;
use tether_sqlite::{Layout, SqliteStore};

use crate::listener::TracingListener;

pub mod config;
pub mod inspect;
pub mod remove;
pub mod serve;
pub mod sweep;

/// Shared context for all commands.
#[derive(Debug, Clone)]
pub struct Context {
    /// Output as JSON for scripting.
    pub json_output: bool,
    /// Verbose output enabled.
    pub verbose: bool,
    /// Resolved configuration.
    pub config: TetherConfig,
}

/// Database selection shared by the commands that open a store.
///
/// Arguments override the `[database]` config section.
#[derive(Args, Debug, Clone)]
pub struct DatabaseArgs {
    /// SQLite database file
    #[arg(long)]
    pub db: Option<PathBuf>,

    /// Application name scoping the stored sessions
    #[arg(long)]
    pub app: Option<String>,
}

impl Context {
    /// Open the configured SQLite database behind a session store.
    pub fn open_store(&self, db: &DatabaseArgs) -> Result<BackedStore<SqliteStore>> {
        let path = db
            .db
            .clone()
            .or_else(|| self.config.database_path().cloned());
        let Some(path) = path else {
            bail!("no database configured; pass --db or set [database] path");
        };
        let app_name = db.app.as_deref().unwrap_or(self.config.app_name());

        let layout = match self.config.database.as_ref().map(|d| d.layout) {
            Some(AttributeLayout::MultiRow) => Layout::MultiRow,
            _ => Layout::SingleRow,
        };
        let mut backend = SqliteStore::open(&path, app_name)
            .with_context(|| format!("failed to open database '{}'", path.display()))?
            .with_layout(layout);
        if let Some(secs) = self
            .config
            .database
            .as_ref()
            .and_then(|d| d.invalidation_check_interval_secs)
        {
            backend = backend.with_invalidation_check_interval(Duration::from_secs(secs));
        }

        self.config.validate()?;
        let store = BackedStore::new(
            self.config.store_config(),
            backend,
            Arc::new(TracingListener),
        )?;
        Ok(store)
    }
}
