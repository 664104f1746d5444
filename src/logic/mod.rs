pub mod branch_ops;
pub mod content_ops;
pub mod events;
pub mod field_migration;
pub mod jobs;
pub mod migration;
pub mod permissions;
pub mod schema_diff;
pub mod schema_ops;
pub mod search_sync;
pub mod service;
pub mod validate;

pub use branch_ops::*;
pub use content_ops::*;
pub use events::*;
pub use field_migration::*;
pub use jobs::*;
pub use migration::*;
pub use permissions::*;
pub use schema_diff::*;
pub use schema_ops::*;
pub use search_sync::*;
pub use service::*;
pub use validate::*;
