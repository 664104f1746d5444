use parking_lot::RwLock;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::error::{ContentError, Result};
use crate::model::{
    node_index_name, ContainerEdge, FieldContainer, Id, IndexDocument, SearchAction,
    SearchQueueBatch,
};
use crate::store::{Graph, GraphStore};

/// Client of the external search index
#[async_trait::async_trait]
pub trait SearchIndexClient: Send + Sync {
    async fn index(&self, document: IndexDocument) -> Result<()>;

    async fn delete(&self, index: &str, id: &str) -> Result<()>;

    async fn flush(&self) -> Result<()>;
}

/// In-process index used by tests and local runs
#[derive(Debug, Default)]
pub struct MemoryIndex {
    indices: RwLock<BTreeMap<String, BTreeMap<String, serde_json::Value>>>,
    failing: AtomicBool,
    operations: AtomicUsize,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following call fail until switched back
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn document(&self, index: &str, id: &str) -> Option<serde_json::Value> {
        self.indices.read().get(index).and_then(|docs| docs.get(id)).cloned()
    }

    pub fn document_count(&self) -> usize {
        self.indices.read().values().map(|docs| docs.len()).sum()
    }

    /// Full copy of all indices
    pub fn snapshot(&self) -> BTreeMap<String, BTreeMap<String, serde_json::Value>> {
        self.indices.read().clone()
    }

    pub fn operation_count(&self) -> usize {
        self.operations.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(ContentError::SearchSync("index unavailable".into()));
        }
        self.operations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait::async_trait]
impl SearchIndexClient for MemoryIndex {
    async fn index(&self, document: IndexDocument) -> Result<()> {
        self.check()?;
        self.indices
            .write()
            .entry(document.index)
            .or_default()
            .insert(document.id, document.body);
        Ok(())
    }

    async fn delete(&self, index: &str, id: &str) -> Result<()> {
        self.check()?;
        let mut indices = self.indices.write();
        if let Some(docs) = indices.get_mut(index) {
            docs.remove(id);
            if docs.is_empty() {
                indices.remove(index);
            }
        }
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        self.check()
    }
}

/// Index a container belongs to when reached through `edge`
pub fn index_name_for(graph: &Graph, edge: &ContainerEdge, container: &FieldContainer) -> Result<String> {
    let item = graph.item(&edge.item_uuid)?;
    Ok(node_index_name(
        &item.project_uuid,
        &edge.branch_uuid,
        &container.schema_version_uuid,
        edge.container_type,
    ))
}

/// Point an edge at a container and queue the index operations that follow.
/// A document that moves to another index is deleted from the old one.
pub fn point_edge(
    graph: &mut Graph,
    batch: &mut SearchQueueBatch,
    edge: ContainerEdge,
    container_uuid: Id,
) -> Result<()> {
    let index = index_name_for(graph, &edge, graph.container(&container_uuid)?)?;
    if let Some(previous) = graph.set_edge(edge.clone(), container_uuid)? {
        let previous_index = index_name_for(graph, &edge, graph.container(&previous)?)?;
        if previous_index != index {
            batch.delete(&edge, previous_index);
        }
    }
    batch.store(&edge, index);
    Ok(())
}

/// Remove an edge and queue the delete of its document.
/// Returns the container the edge pointed at.
pub fn clear_edge(graph: &mut Graph, batch: &mut SearchQueueBatch, edge: &ContainerEdge) -> Result<Option<Id>> {
    let previous = match graph.remove_edge(edge) {
        Some(previous) => previous,
        None => return Ok(None),
    };
    let index = index_name_for(graph, edge, graph.container(&previous)?)?;
    batch.delete(edge, index);
    Ok(Some(previous))
}

fn sync_error(err: ContentError) -> ContentError {
    match err {
        ContentError::SearchSync(_) => err,
        other => ContentError::SearchSync(other.to_string()),
    }
}

/// Resolved index operation
#[derive(Debug, Clone, PartialEq)]
enum IndexOp {
    Index(IndexDocument),
    Delete { index: String, id: String },
}

/// Outcome of one flush cycle
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlushReport {
    pub dispatched_batches: usize,
    pub failed_batches: usize,
    pub operations: usize,
}

/// Dispatches committed search batches to the index client.
///
/// Dispatch happens outside the transaction that queued the batch. Entries are
/// resolved against the current store state, so a STORE for a target that has
/// since disappeared (or moved to another index) turns into a DELETE.
pub struct SearchSync<S: GraphStore, C: SearchIndexClient> {
    store: Arc<S>,
    client: Arc<C>,
    index_prefix: String,
    max_batch_size: usize,
}

impl<S: GraphStore, C: SearchIndexClient> SearchSync<S, C> {
    pub fn new(store: Arc<S>, client: Arc<C>, index_prefix: String, max_batch_size: usize) -> Self {
        Self {
            store,
            client,
            index_prefix,
            max_batch_size: max_batch_size.max(1),
        }
    }

    pub fn client(&self) -> &Arc<C> {
        &self.client
    }

    /// Number of batches waiting for dispatch
    pub async fn pending(&self) -> Result<usize> {
        self.store.read(|graph| Ok(graph.search_queue.len())).await
    }

    /// Dispatch every queued batch. Batches that fail stay queued for the next
    /// cycle; failures are logged, never returned.
    pub async fn flush_pending(&self) -> Result<FlushReport> {
        let batches = self.store.read(|graph| Ok(graph.search_queue.clone())).await?;
        let mut report = FlushReport::default();
        let mut done = Vec::new();
        let mut failed = Vec::new();

        for batch in &batches {
            match self.flush(batch).await {
                Ok(operations) => {
                    report.dispatched_batches += 1;
                    report.operations += operations;
                    done.push(batch.uuid.clone());
                }
                Err(e) => {
                    log::warn!(
                        "Search batch {} failed (attempt {}), keeping it queued: {}",
                        batch.uuid,
                        batch.failed_attempts + 1,
                        e
                    );
                    report.failed_batches += 1;
                    failed.push(batch.uuid.clone());
                }
            }
        }

        if !done.is_empty() || !failed.is_empty() {
            self.store
                .write(move |graph| {
                    graph.search_queue.retain(|batch| !done.contains(&batch.uuid));
                    for batch in graph.search_queue.iter_mut() {
                        if failed.contains(&batch.uuid) {
                            batch.failed_attempts += 1;
                        }
                    }
                    Ok(())
                })
                .await?;
        }

        if report.dispatched_batches > 0 {
            log::debug!(
                "Flushed {} search batches ({} operations)",
                report.dispatched_batches,
                report.operations
            );
        }
        Ok(report)
    }

    /// Dispatch one batch and return the number of index operations sent.
    /// Dispatching the same batch again leaves the index in the same state.
    pub async fn flush(&self, batch: &SearchQueueBatch) -> Result<usize> {
        let batch = batch.clone();
        let prefix = self.index_prefix.clone();
        let operations = self
            .store
            .read(move |graph| Self::resolve(graph, &batch, &prefix))
            .await?;

        for chunk in operations.chunks(self.max_batch_size) {
            for operation in chunk {
                let sent = match operation {
                    IndexOp::Index(document) => self.client.index(document.clone()).await,
                    IndexOp::Delete { index, id } => self.client.delete(index, id).await,
                };
                sent.map_err(sync_error)?;
            }
            self.client.flush().await.map_err(sync_error)?;
        }
        Ok(operations.len())
    }

    /// Queue a STORE for every live edge in the store. Safe to run repeatedly.
    pub async fn reindex_all(&self) -> Result<usize> {
        let max = self.max_batch_size;
        let queued = self
            .store
            .write(move |graph| {
                let mut batches = Vec::new();
                let mut batch = SearchQueueBatch::new();
                let mut count = 0;
                for (edge, uuid) in graph.all_edges() {
                    let index = index_name_for(graph, edge, graph.container(uuid)?)?;
                    batch.store(edge, index);
                    count += 1;
                    if batch.len() >= max {
                        batches.push(std::mem::take(&mut batch));
                    }
                }
                batches.push(batch);
                for batch in batches {
                    graph.enqueue_search(batch);
                }
                Ok(count)
            })
            .await?;
        log::info!("Queued {} documents for reindex", queued);
        Ok(queued)
    }

    fn resolve(graph: &Graph, batch: &SearchQueueBatch, prefix: &str) -> Result<Vec<IndexOp>> {
        let mut operations = Vec::new();
        for entry in batch.deduplicated() {
            let delete = IndexOp::Delete {
                index: format!("{}{}", prefix, entry.index_name),
                id: entry.document_id(),
            };
            if entry.action == SearchAction::Delete {
                operations.push(delete);
                continue;
            }

            let edge = entry.edge();
            let container = match graph.container_at(&edge) {
                Some(container) => container,
                None => {
                    operations.push(delete);
                    continue;
                }
            };
            if index_name_for(graph, &edge, container)? != entry.index_name {
                operations.push(delete);
                continue;
            }
            operations.push(IndexOp::Index(IndexDocument {
                index: format!("{}{}", prefix, entry.index_name),
                id: entry.document_id(),
                body: Self::document_body(graph, &edge, container)?,
            }));
        }
        Ok(operations)
    }

    fn document_body(graph: &Graph, edge: &ContainerEdge, container: &FieldContainer) -> Result<serde_json::Value> {
        let item = graph.item(&edge.item_uuid)?;
        let schema = graph.schema_version(&container.schema_version_uuid)?;
        Ok(json!({
            "uuid": item.uuid,
            "project": item.project_uuid,
            "branch": edge.branch_uuid,
            "language": edge.language_tag,
            "type": edge.container_type,
            "version": container.version,
            "schema": schema.reference(),
            "fields": container.fields,
            "editor": container.editor,
            "edited": container.edited_at,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_index_is_idempotent() {
        let index = MemoryIndex::new();
        let doc = IndexDocument {
            index: "idx".into(),
            id: "a-en".into(),
            body: json!({"v": 1}),
        };
        index.index(doc.clone()).await.unwrap();
        index.index(doc).await.unwrap();
        assert_eq!(index.document_count(), 1);

        index.delete("idx", "a-en").await.unwrap();
        index.delete("idx", "a-en").await.unwrap();
        assert_eq!(index.document_count(), 0);
    }

    #[tokio::test]
    async fn test_failing_index_reports_search_sync_error() {
        let index = MemoryIndex::new();
        index.set_failing(true);
        let err = index.flush().await.unwrap_err();
        assert!(matches!(err, ContentError::SearchSync(_)));
    }
}
