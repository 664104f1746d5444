use crate::model::{generate_id, ContainerEdge, ContainerType, Id};
use chrono::{DateTime, Utc};
use itertools::Itertools;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SearchAction {
    Store,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchTargetType {
    Node,
}

/// Name of the index holding one schema version's content of one branch
pub fn node_index_name(
    project_uuid: &str,
    branch_uuid: &str,
    schema_version_uuid: &str,
    container_type: ContainerType,
) -> String {
    format!(
        "node-{}-{}-{}-{}",
        project_uuid,
        branch_uuid,
        schema_version_uuid,
        container_type.short_name()
    )
}

pub fn node_document_id(item_uuid: &str, language_tag: &str) -> String {
    format!("{}-{}", item_uuid, language_tag)
}

/// One pending index operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchQueueEntry {
    pub target_type: SearchTargetType,
    pub target_uuid: Id,
    pub action: SearchAction,
    pub index_name: String,
    pub branch_uuid: Id,
    pub language_tag: String,
    pub container_type: ContainerType,
}

impl SearchQueueEntry {
    pub fn for_edge(edge: &ContainerEdge, action: SearchAction, index_name: String) -> Self {
        Self {
            target_type: SearchTargetType::Node,
            target_uuid: edge.item_uuid.clone(),
            action,
            index_name,
            branch_uuid: edge.branch_uuid.clone(),
            language_tag: edge.language_tag.clone(),
            container_type: edge.container_type,
        }
    }

    pub fn edge(&self) -> ContainerEdge {
        ContainerEdge::new(
            &self.target_uuid,
            &self.branch_uuid,
            &self.language_tag,
            self.container_type,
        )
    }

    pub fn document_id(&self) -> String {
        node_document_id(&self.target_uuid, &self.language_tag)
    }
}

/// Group of entries dispatched together
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchQueueBatch {
    pub uuid: Id,
    pub entries: Vec<SearchQueueEntry>,
    pub created_at: DateTime<Utc>,
    /// Number of dispatch attempts that failed so far
    #[serde(default)]
    pub failed_attempts: u32,
}

impl SearchQueueBatch {
    pub fn new() -> Self {
        Self {
            uuid: generate_id(),
            entries: Vec::new(),
            created_at: Utc::now(),
            failed_attempts: 0,
        }
    }

    pub fn store(&mut self, edge: &ContainerEdge, index_name: String) {
        self.entries
            .push(SearchQueueEntry::for_edge(edge, SearchAction::Store, index_name));
    }

    pub fn delete(&mut self, edge: &ContainerEdge, index_name: String) {
        self.entries
            .push(SearchQueueEntry::for_edge(edge, SearchAction::Delete, index_name));
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Entries with only the last one kept per indexed document, in queue order
    pub fn deduplicated(&self) -> Vec<&SearchQueueEntry> {
        let mut latest = self
            .entries
            .iter()
            .rev()
            .unique_by(|entry| (entry.index_name.clone(), entry.document_id()))
            .collect_vec();
        latest.reverse();
        latest
    }
}

impl Default for SearchQueueBatch {
    fn default() -> Self {
        Self::new()
    }
}

/// A document handed to the external index client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDocument {
    pub index: String,
    pub id: String,
    pub body: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_name() {
        assert_eq!(
            node_index_name("p", "b", "sv", ContainerType::Published),
            "node-p-b-sv-published"
        );
        assert_eq!(node_document_id("item", "de"), "item-de");
    }

    #[test]
    fn test_deduplicated_keeps_last_entry_per_document() {
        let edge = ContainerEdge::new("i1", "b1", "en", ContainerType::Draft);
        let other = ContainerEdge::new("i2", "b1", "en", ContainerType::Draft);
        let mut batch = SearchQueueBatch::new();
        batch.store(&edge, "idx".into());
        batch.store(&other, "idx".into());
        batch.delete(&edge, "idx".into());

        let entries = batch.deduplicated();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].target_uuid, "i2");
        assert_eq!(entries[1].target_uuid, "i1");
        assert_eq!(entries[1].action, SearchAction::Delete);
    }
}
