pub mod auth;
pub mod change;
pub mod common;
pub mod content;
pub mod event;
pub mod field;
pub mod job;
pub mod project;
pub mod schema;
pub mod search;

pub use auth::*;
pub use change::*;
pub use common::*;
pub use content::*;
pub use event::*;
pub use field::*;
pub use job::*;
pub use project::*;
pub use schema::*;
pub use search::*;
