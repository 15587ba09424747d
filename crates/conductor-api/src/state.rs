//! Application state shared by all commands.
//!
//! Pins the storage ports to their SQLite adapters so command handlers work
//! with concrete types.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use conductor_core::queue::MessageQueue;
use conductor_infra::config::{database_url, load_config, read_config};
use conductor_infra::sqlite::pool::{DatabasePool, data_dir};
use conductor_infra::sqlite::queue::SqliteQueueBackend;
use conductor_infra::sqlite::state_store::SqliteStateStore;
use conductor_types::config::ConductorConfig;

pub struct AppState {
    pub config: ConductorConfig,
    pub store: Arc<SqliteStateStore>,
    pub queue: Arc<MessageQueue<SqliteQueueBackend>>,
}

impl AppState {
    /// Load configuration and open the database.
    ///
    /// An explicit `--config` path must parse; the default location falls
    /// back to built-in defaults.
    pub async fn init(config_path: Option<&Path>) -> anyhow::Result<Self> {
        let dir = data_dir();
        let config = match config_path {
            Some(path) => read_config(path).await?,
            None => load_config(&dir).await,
        };

        if config.database_url.is_none() {
            tokio::fs::create_dir_all(&dir)
                .await
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }

        let url = database_url(&config);
        let pool = DatabasePool::new(&url)
            .await
            .with_context(|| format!("failed to open database {url}"))?;

        let poll_interval = std::time::Duration::from_millis(config.queue.poll_interval_ms);
        let queue = MessageQueue::new(SqliteQueueBackend::new(pool.clone()))
            .with_poll_interval(poll_interval);

        Ok(Self {
            store: Arc::new(SqliteStateStore::new(pool)),
            queue: Arc::new(queue),
            config,
        })
    }
}
