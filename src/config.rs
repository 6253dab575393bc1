use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ForgeConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
    pub training: TrainingConfig,
    pub retention: RetentionConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub max_connections: u32,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    pub max_upload_size: usize,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TrainingConfig {
    pub max_concurrent_jobs: usize,
    pub max_retries: u32,
    pub retry_backoff_base_secs: u64,
    pub retry_backoff_cap_secs: u64,
    pub model_cache_capacity: usize,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RetentionConfig {
    pub sweep_interval_secs: u64,
    pub job_retention_days: i64,
    pub stale_running_hours: i64,
}

impl Default for ForgeConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8000,
                cors_origins: vec!["http://localhost:3000".to_string()],
            },
            database: DatabaseConfig {
                path: PathBuf::from("./data/loraforge.db"),
                max_connections: 5,
            },
            storage: StorageConfig {
                data_dir: PathBuf::from("./data"),
                max_upload_size: 100 * 1024 * 1024, // 100MB
            },
            training: TrainingConfig {
                max_concurrent_jobs: 2,
                max_retries: 3,
                retry_backoff_base_secs: 5,
                retry_backoff_cap_secs: 600,
                model_cache_capacity: 4,
            },
            retention: RetentionConfig {
                sweep_interval_secs: 3600,
                job_retention_days: 7,
                stale_running_hours: 24,
            },
        }
    }
}

impl ForgeConfig {
    /// Load the default configuration with environment overrides.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(host) = std::env::var("LORAFORGE_HOST") {
            config.server.host = host;
        }
        if let Ok(port) = std::env::var("LORAFORGE_PORT") {
            if let Ok(port) = port.parse() {
                config.server.port = port;
            }
        }
        if let Ok(path) = std::env::var("LORAFORGE_DATABASE_PATH") {
            config.database.path = PathBuf::from(path);
        }
        if let Ok(dir) = std::env::var("LORAFORGE_DATA_DIR") {
            config.storage.data_dir = PathBuf::from(dir);
        }

        config
    }
}
