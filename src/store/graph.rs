use std::collections::BTreeMap;

use crate::error::{ContentError, Result};
use crate::model::{
    Branch, ContainerEdge, ContentItem, FieldContainer, Group, Id, Job, Project,
    Role, SchemaContainer, SchemaKind, SchemaVersion, SearchQueueBatch, User, VersionLink,
};

/// Transactional view of the content graph.
///
/// Vertices are kept in typed tables; relationships are explicit indexes:
/// the container-edge index `(item, branch, language, type) -> container` and
/// the version-chain map `container -> {previous, next per branch}`.
/// BTree ordering keeps every scan deterministic.
#[derive(Debug, Clone, Default)]
pub struct Graph {
    pub projects: BTreeMap<Id, Project>,
    pub branches: BTreeMap<Id, Branch>,
    pub schema_containers: BTreeMap<Id, SchemaContainer>,
    pub schema_versions: BTreeMap<Id, SchemaVersion>,
    pub items: BTreeMap<Id, ContentItem>,
    pub containers: BTreeMap<Id, FieldContainer>,
    pub jobs: BTreeMap<Id, Job>,
    pub users: BTreeMap<Id, User>,
    pub groups: BTreeMap<Id, Group>,
    pub roles: BTreeMap<Id, Role>,
    /// Committed search batches waiting for dispatch
    pub search_queue: Vec<SearchQueueBatch>,
    version_links: BTreeMap<Id, VersionLink>,
    edges: BTreeMap<ContainerEdge, Id>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn project(&self, uuid: &str) -> Result<&Project> {
        self.projects
            .get(uuid)
            .ok_or_else(|| ContentError::not_found("Project", uuid))
    }

    pub fn branch(&self, uuid: &str) -> Result<&Branch> {
        self.branches
            .get(uuid)
            .ok_or_else(|| ContentError::not_found("Branch", uuid))
    }

    pub fn branch_mut(&mut self, uuid: &str) -> Result<&mut Branch> {
        self.branches
            .get_mut(uuid)
            .ok_or_else(|| ContentError::not_found("Branch", uuid))
    }

    pub fn find_branch(&self, project_uuid: &str, name: &str) -> Option<&Branch> {
        self.branches
            .values()
            .find(|b| b.project_uuid == project_uuid && b.name == name)
    }

    pub fn schema_container(&self, uuid: &str) -> Result<&SchemaContainer> {
        self.schema_containers
            .get(uuid)
            .ok_or_else(|| ContentError::not_found("Schema", uuid))
    }

    pub fn find_schema_container(&self, kind: SchemaKind, name: &str) -> Option<&SchemaContainer> {
        self.schema_containers
            .values()
            .find(|c| c.kind == kind && c.name == name)
    }

    pub fn schema_version(&self, uuid: &str) -> Result<&SchemaVersion> {
        self.schema_versions
            .get(uuid)
            .ok_or_else(|| ContentError::not_found("SchemaVersion", uuid))
    }

    pub fn schema_version_mut(&mut self, uuid: &str) -> Result<&mut SchemaVersion> {
        self.schema_versions
            .get_mut(uuid)
            .ok_or_else(|| ContentError::not_found("SchemaVersion", uuid))
    }

    pub fn item(&self, uuid: &str) -> Result<&ContentItem> {
        self.items
            .get(uuid)
            .ok_or_else(|| ContentError::not_found("ContentItem", uuid))
    }

    pub fn container(&self, uuid: &str) -> Result<&FieldContainer> {
        self.containers
            .get(uuid)
            .ok_or_else(|| ContentError::not_found("FieldContainer", uuid))
    }

    pub fn job(&self, uuid: &str) -> Result<&Job> {
        self.jobs
            .get(uuid)
            .ok_or_else(|| ContentError::not_found("Job", uuid))
    }

    pub fn job_mut(&mut self, uuid: &str) -> Result<&mut Job> {
        self.jobs
            .get_mut(uuid)
            .ok_or_else(|| ContentError::not_found("Job", uuid))
    }

    // Container edges

    pub fn edge_target(&self, edge: &ContainerEdge) -> Option<&Id> {
        self.edges.get(edge)
    }

    /// The container a live edge points at
    pub fn container_at(&self, edge: &ContainerEdge) -> Option<&FieldContainer> {
        self.edges
            .get(edge)
            .and_then(|uuid| self.containers.get(uuid))
    }

    /// Point an edge at a container, returning the container it pointed at before.
    /// Keying the index by the full edge address keeps at most one DRAFT and one
    /// PUBLISHED pointer per `(item, branch, language)`.
    pub fn set_edge(&mut self, edge: ContainerEdge, container_uuid: Id) -> Result<Option<Id>> {
        if !self.containers.contains_key(&container_uuid) {
            return Err(ContentError::not_found("FieldContainer", container_uuid));
        }
        Ok(self.edges.insert(edge, container_uuid))
    }

    pub fn remove_edge(&mut self, edge: &ContainerEdge) -> Option<Id> {
        self.edges.remove(edge)
    }

    /// All live edges on a branch
    pub fn edges_on_branch<'a>(
        &'a self,
        branch_uuid: &'a str,
    ) -> impl Iterator<Item = (&'a ContainerEdge, &'a Id)> + 'a {
        self.edges
            .iter()
            .filter(move |(edge, _)| edge.branch_uuid == branch_uuid)
    }

    /// Live edges of one item on a branch
    pub fn edges_of_item<'a>(
        &'a self,
        item_uuid: &'a str,
        branch_uuid: &'a str,
    ) -> impl Iterator<Item = (&'a ContainerEdge, &'a Id)> + 'a {
        self.edges
            .iter()
            .filter(move |(edge, _)| edge.item_uuid == item_uuid && edge.branch_uuid == branch_uuid)
    }

    /// Every live edge in the graph
    pub fn all_edges(&self) -> impl Iterator<Item = (&ContainerEdge, &Id)> {
        self.edges.iter()
    }

    /// Distinct `(item, language)` pairs with a live edge on a branch, in key order
    pub fn languages_on_branch(&self, branch_uuid: &str) -> Vec<(Id, String)> {
        let mut pairs: Vec<(Id, String)> = self
            .edges_on_branch(branch_uuid)
            .map(|(edge, _)| (edge.item_uuid.clone(), edge.language_tag.clone()))
            .collect();
        pairs.sort();
        pairs.dedup();
        pairs
    }

    // Version chain

    /// Store a new container and link it after `previous` on `branch_uuid`
    pub fn insert_container(
        &mut self,
        container: FieldContainer,
        previous: Option<&Id>,
        branch_uuid: &str,
    ) -> Id {
        let uuid = container.uuid.clone();
        self.containers.insert(uuid.clone(), container);

        let link = self.version_links.entry(uuid.clone()).or_default();
        link.previous = previous.cloned();

        if let Some(previous) = previous {
            self.version_links
                .entry(previous.clone())
                .or_default()
                .next
                .insert(branch_uuid.to_string(), uuid.clone());
        }
        uuid
    }

    pub fn version_link(&self, container_uuid: &str) -> Option<&VersionLink> {
        self.version_links.get(container_uuid)
    }

    pub fn previous_version(&self, container_uuid: &str) -> Option<&FieldContainer> {
        self.version_links
            .get(container_uuid)
            .and_then(|link| link.previous.as_ref())
            .and_then(|uuid| self.containers.get(uuid))
    }

    pub fn next_version(&self, container_uuid: &str, branch_uuid: &str) -> Option<&FieldContainer> {
        self.version_links
            .get(container_uuid)
            .and_then(|link| link.next.get(branch_uuid))
            .and_then(|uuid| self.containers.get(uuid))
    }

    /// Walk the chain backwards from a container (inclusive)
    pub fn version_history(&self, container_uuid: &str) -> Vec<&FieldContainer> {
        let mut history = Vec::new();
        let mut current = self.containers.get(container_uuid);
        while let Some(container) = current {
            history.push(container);
            current = self.previous_version(&container.uuid);
        }
        history
    }

    pub fn enqueue_search(&mut self, batch: SearchQueueBatch) {
        if !batch.is_empty() {
            self.search_queue.push(batch);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ContainerType, ContainerVersion, FieldMap};

    fn container(item: &str, version: ContainerVersion) -> FieldContainer {
        FieldContainer::new(
            item.to_string(),
            "en".to_string(),
            version,
            "sv1".to_string(),
            FieldMap::new(),
            None,
        )
        .unwrap()
    }

    #[test]
    fn test_edge_index_holds_one_target_per_key() {
        let mut graph = Graph::new();
        let first = graph.insert_container(container("i1", ContainerVersion::INITIAL_DRAFT), None, "b1");
        let second = graph.insert_container(
            container("i1", ContainerVersion::new(0, 2)),
            Some(&first),
            "b1",
        );

        let edge = ContainerEdge::new("i1", "b1", "en", ContainerType::Draft);
        assert_eq!(graph.set_edge(edge.clone(), first.clone()).unwrap(), None);
        assert_eq!(graph.set_edge(edge.clone(), second.clone()).unwrap(), Some(first.clone()));
        assert_eq!(graph.edges_of_item("i1", "b1").count(), 1);
        assert_eq!(graph.container_at(&edge).unwrap().uuid, second);
    }

    #[test]
    fn test_version_chain_is_per_branch() {
        let mut graph = Graph::new();
        let root = graph.insert_container(container("i1", ContainerVersion::new(1, 0)), None, "b1");
        let on_b1 = graph.insert_container(container("i1", ContainerVersion::new(1, 1)), Some(&root), "b1");
        let on_b2 = graph.insert_container(container("i1", ContainerVersion::new(1, 1)), Some(&root), "b2");

        assert_eq!(graph.next_version(&root, "b1").unwrap().uuid, on_b1);
        assert_eq!(graph.next_version(&root, "b2").unwrap().uuid, on_b2);
        assert_eq!(graph.previous_version(&on_b2).unwrap().uuid, root);
        assert_eq!(graph.version_history(&on_b1).len(), 2);
    }

    #[test]
    fn test_set_edge_requires_existing_container() {
        let mut graph = Graph::new();
        let edge = ContainerEdge::new("i1", "b1", "en", ContainerType::Draft);
        assert!(graph.set_edge(edge, "missing".to_string()).is_err());
    }
}
