pub mod api;
pub mod config;
pub mod error;
pub mod models;
pub mod queue;
pub mod services;
pub mod storage;

use sqlx::sqlite::SqlitePool;
use std::sync::Arc;

use config::ForgeConfig;
use queue::{CancellationRegistry, TaskDispatcher};
use services::model_cache::ModelCache;
use storage::FileStorage;

/// Shared state handed to every request handler.
pub struct AppState {
    pub db_pool: SqlitePool,
    pub storage: FileStorage,
    pub config: ForgeConfig,
    pub dispatcher: TaskDispatcher,
    pub cancellations: CancellationRegistry,
    pub model_cache: Arc<ModelCache>,
}
