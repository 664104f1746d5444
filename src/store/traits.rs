use crate::error::Result;
use crate::store::Graph;

/// Transactional access to the authoritative content graph.
///
/// Every logical operation runs inside exactly one `read` or `write` call.
/// A `write` commits all mutations made by the closure, or none of them when
/// the closure (or the commit) fails. Writes on the same store are serialized,
/// which linearizes concurrent edits of the same container edge.
#[async_trait::async_trait]
pub trait GraphStore: Send + Sync {
    /// Run a read-only closure against a consistent snapshot
    async fn read<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Graph) -> Result<R> + Send,
        R: Send;

    /// Run a closure inside one atomic write transaction
    async fn write<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut Graph) -> Result<R> + Send,
        R: Send;
}
