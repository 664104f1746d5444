use parking_lot::{Mutex, RwLock};

use crate::error::{ContentError, Result};
use crate::store::{Graph, GraphStore};

/// Scheduled write failures, consumed in order
#[derive(Debug, Default)]
struct FaultPlan {
    skip: usize,
    fail: usize,
}

/// In-memory `GraphStore`.
///
/// A write runs against a staged copy of the graph and replaces the live graph
/// only when the closure succeeds, so a failing transaction leaves no trace.
/// The write lock is held for the whole transaction, serializing writers.
/// Staging clones the whole graph, so every write costs O(graph size); a
/// migration over many units is quadratic. Meant for tests and small
/// embedded graphs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    graph: RwLock<Graph>,
    faults: Mutex<FaultPlan>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_graph(graph: Graph) -> Self {
        Self {
            graph: RwLock::new(graph),
            faults: Mutex::new(FaultPlan::default()),
        }
    }

    /// Let the next `skip` writes succeed, then fail the `fail` writes after
    /// them with a transient store error.
    pub fn inject_write_failures(&self, skip: usize, fail: usize) {
        let mut faults = self.faults.lock();
        faults.skip = skip;
        faults.fail = fail;
    }

    /// Copy of the committed graph
    pub fn snapshot(&self) -> Graph {
        self.graph.read().clone()
    }

    fn next_write_fails(&self) -> bool {
        let mut faults = self.faults.lock();
        if faults.skip > 0 {
            faults.skip -= 1;
            return false;
        }
        if faults.fail > 0 {
            faults.fail -= 1;
            return true;
        }
        false
    }
}

#[async_trait::async_trait]
impl GraphStore for MemoryStore {
    async fn read<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Graph) -> Result<R> + Send,
        R: Send,
    {
        let graph = self.graph.read();
        f(&graph)
    }

    async fn write<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut Graph) -> Result<R> + Send,
        R: Send,
    {
        if self.next_write_fails() {
            return Err(ContentError::transient("injected write failure"));
        }

        let mut graph = self.graph.write();
        let mut staged = graph.clone();
        let result = f(&mut staged)?;
        *graph = staged;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Project;

    #[tokio::test]
    async fn test_failed_write_rolls_back() {
        let store = MemoryStore::new();

        let result: Result<()> = store
            .write(|graph| {
                let project = Project::new("demo".to_string(), "b1".to_string());
                graph.projects.insert(project.uuid.clone(), project);
                Err(ContentError::Conflict("abort".into()))
            })
            .await;
        assert!(result.is_err());

        let count = store.read(|graph| Ok(graph.projects.len())).await.unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_committed_write_is_visible() {
        let store = MemoryStore::new();
        let uuid = store
            .write(|graph| {
                let project = Project::new("demo".to_string(), "b1".to_string());
                let uuid = project.uuid.clone();
                graph.projects.insert(uuid.clone(), project);
                Ok(uuid)
            })
            .await
            .unwrap();

        let name = store
            .read(|graph| Ok(graph.project(&uuid)?.name.clone()))
            .await
            .unwrap();
        assert_eq!(name, "demo");
    }

    #[tokio::test]
    async fn test_injected_failures_are_transient_and_ordered() {
        let store = MemoryStore::new();
        store.inject_write_failures(1, 1);

        assert!(store.write(|_| Ok(())).await.is_ok());
        let err = store.write(|_| Ok(())).await.unwrap_err();
        assert!(err.is_transient());
        assert!(store.write(|_| Ok(())).await.is_ok());
    }
}
