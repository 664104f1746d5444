pub mod config;
pub mod error;
pub mod logic;
pub mod model;
pub mod store;

pub use config::AppConfig;
pub use error::{ContentError, Result};

pub use logic::{
    BranchOperations, ContentOperations, ContentService, EventBus, FlushReport, JobOperations, JobQueue,
    JobRunner, JobWorkerPool, MemoryIndex, MigrationEngine, MigrationReport, PermissionService, RetryPolicy,
    SchemaDiffEngine, SchemaOperations, SchemaValidator, SearchIndexClient, SearchSync,
};

pub use model::*;

pub use store::{Graph, GraphStore, MemoryStore, PermissionCache, SchemaCache};

/// Initialise the `env_logger` backend at `info` unless `RUST_LOG` says otherwise.
/// Safe to call more than once.
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .try_init();
}
