pub mod graph;
pub mod memory;
pub mod permission_cache;
pub mod schema_cache;
pub mod traits;

pub use graph::*;
pub use memory::*;
pub use permission_cache::*;
pub use schema_cache::*;
pub use traits::*;
