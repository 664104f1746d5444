use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    pub node: NodeConfig,
    pub worker: WorkerConfig,
    pub search: SearchConfig,
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Reported as `origin` in published events
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub pool_size: usize,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    pub index_prefix: String,
    pub max_batch_size: usize,
    /// Period of the background flush cycle; jobs also trigger a flush when they end
    pub flush_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub permission_ttl_secs: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            name: "content-node".to_string(),
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            pool_size: 2,
            max_retries: 3,
            retry_backoff_ms: 100,
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            index_prefix: String::new(),
            max_batch_size: 500,
            flush_interval_ms: 1000,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            permission_ttl_secs: 3600,
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, an optional `config` file and
    /// `CONTENT_*` environment variables, in that order of precedence
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("CONTENT")
                    .separator("__")
                    .prefix_separator("_")
                    .try_parsing(true),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.worker.retry_backoff_ms)
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.search.flush_interval_ms)
    }

    pub fn permission_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.permission_ttl_secs)
    }
}
