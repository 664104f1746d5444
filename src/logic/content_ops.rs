use crate::error::{ContentError, Result};
use crate::logic::field_migration::{change_chain, FieldMigrator};
use crate::logic::schema_ops::SchemaOperations;
use crate::logic::search_sync::{clear_edge, point_edge};
use crate::logic::validate::SchemaValidator;
use crate::model::{
    document_checksum, ContainerEdge, ContainerType, ContainerVersion, ContentItem, EditorialChange,
    FieldContainer, FieldMap, Id, SchemaKind, SearchQueueBatch,
};
use crate::store::{Graph, GraphStore, SchemaCache};

/// Versioned content payloads addressed by `(item, branch, language, type)`
pub struct ContentOperations;

impl ContentOperations {
    /// Create a content item with its first draft in `language_tag`
    pub async fn create_item<S: GraphStore>(
        store: &S,
        cache: &SchemaCache,
        branch_uuid: &Id,
        schema_container_uuid: &Id,
        language_tag: &str,
        fields: FieldMap,
        editor: Option<String>,
    ) -> Result<(ContentItem, FieldContainer)> {
        let cache = cache.clone();
        let branch_uuid = branch_uuid.clone();
        let schema_container_uuid = schema_container_uuid.clone();
        let language_tag = language_tag.to_string();

        store
            .write(move |graph| {
                let branch = graph.branch(&branch_uuid)?;
                let schema_version = Self::assigned_version(graph, &branch_uuid, &schema_container_uuid)?;
                let model = SchemaOperations::load_model(graph, &cache, &schema_version)?;
                SchemaValidator::validate_fields(&model, &fields)?;

                let item = ContentItem::new(branch.project_uuid.clone(), schema_container_uuid);
                graph.items.insert(item.uuid.clone(), item.clone());

                let container = FieldContainer::new(
                    item.uuid.clone(),
                    language_tag.clone(),
                    ContainerVersion::INITIAL_DRAFT,
                    schema_version,
                    fields,
                    editor,
                )?;
                let uuid = graph.insert_container(container.clone(), None, &branch_uuid);

                let mut batch = SearchQueueBatch::new();
                let edge = ContainerEdge::new(&item.uuid, &branch_uuid, &language_tag, ContainerType::Draft);
                point_edge(graph, &mut batch, edge, uuid)?;
                graph.enqueue_search(batch);

                log::debug!("Created item {} ({}) on branch {}", item.uuid, language_tag, branch_uuid);
                Ok((item, container))
            })
            .await
    }

    /// The container at a live edge, if any
    pub async fn get_container<S: GraphStore>(
        store: &S,
        item_uuid: &str,
        branch_uuid: &str,
        language_tag: &str,
        container_type: ContainerType,
    ) -> Result<Option<FieldContainer>> {
        let edge = ContainerEdge::new(item_uuid, branch_uuid, language_tag, container_type);
        store.read(move |graph| Ok(graph.container_at(&edge).cloned())).await
    }

    /// Write a new draft version.
    ///
    /// Fields the change does not mention are copied from the current draft.
    /// When the resulting document equals the current draft the current draft
    /// is returned unchanged. A draft authored against an older schema version
    /// is migrated to the assigned version first.
    pub async fn create_version<S: GraphStore>(
        store: &S,
        cache: &SchemaCache,
        item_uuid: &Id,
        branch_uuid: &Id,
        language_tag: &str,
        change: EditorialChange,
    ) -> Result<FieldContainer> {
        let cache = cache.clone();
        let item_uuid = item_uuid.clone();
        let branch_uuid = branch_uuid.clone();
        let language_tag = language_tag.to_string();

        store
            .write(move |graph| {
                let item = graph.item(&item_uuid)?.clone();
                graph.branch(&branch_uuid)?;
                let target_version = Self::assigned_version(graph, &branch_uuid, &item.schema_container_uuid)?;
                let edge = ContainerEdge::new(&item_uuid, &branch_uuid, &language_tag, ContainerType::Draft);
                let current = graph.container_at(&edge).cloned();

                if let Some(expected) = change.expected_version {
                    let actual = current.as_ref().map(|c| c.version);
                    if actual != Some(expected) {
                        return Err(ContentError::Conflict(format!(
                            "draft of {} ({}) is at {}, expected {}",
                            item_uuid,
                            language_tag,
                            actual.map(|v| v.to_string()).unwrap_or_else(|| "none".into()),
                            expected
                        )));
                    }
                }

                let mut fields = match &current {
                    Some(current) if current.schema_version_uuid != target_version => {
                        let changes = change_chain(graph, &current.schema_version_uuid, &target_version)?;
                        FieldMigrator::migrate(&current.fields, &changes)
                    }
                    Some(current) => current.fields.clone(),
                    None => FieldMap::new(),
                };
                for (name, value) in change.fields {
                    match value {
                        Some(value) => fields.insert(name, value),
                        None => fields.remove(&name),
                    };
                }

                let model = SchemaOperations::load_model(graph, &cache, &target_version)?;
                SchemaValidator::validate_fields(&model, &fields)?;

                let (version, previous) = match &current {
                    Some(current) => {
                        let unchanged = current.schema_version_uuid == target_version
                            && current.checksum == document_checksum(&fields)?;
                        if unchanged {
                            return Ok(current.clone());
                        }
                        (current.version.next_draft(), Some(current.uuid.clone()))
                    }
                    None => (ContainerVersion::INITIAL_DRAFT, None),
                };

                let container = FieldContainer::new(
                    item_uuid.clone(),
                    language_tag.clone(),
                    version,
                    target_version,
                    fields,
                    change.editor,
                )?;
                let uuid = graph.insert_container(container.clone(), previous.as_ref(), &branch_uuid);

                let mut batch = SearchQueueBatch::new();
                point_edge(graph, &mut batch, edge, uuid)?;
                graph.enqueue_search(batch);

                log::debug!(
                    "Item {} ({}) on branch {} now at draft {}",
                    item_uuid,
                    language_tag,
                    branch_uuid,
                    container.version
                );
                Ok(container)
            })
            .await
    }

    /// Publish the current draft.
    ///
    /// A new container at the next major version is linked after the draft and
    /// carries both edges. Containers already in a version chain are never
    /// changed, so other branches sharing the draft keep their history.
    pub async fn publish<S: GraphStore>(
        store: &S,
        item_uuid: &Id,
        branch_uuid: &Id,
        language_tag: &str,
    ) -> Result<FieldContainer> {
        let draft_edge = ContainerEdge::new(item_uuid, branch_uuid, language_tag, ContainerType::Draft);
        let branch_uuid = branch_uuid.clone();

        store
            .write(move |graph| {
                let published_edge = draft_edge.with_type(ContainerType::Published);
                let draft = graph
                    .container_at(&draft_edge)
                    .cloned()
                    .ok_or_else(|| ContentError::not_found("Draft", format!("{:?}", draft_edge)))?;

                if graph.edge_target(&published_edge) == Some(&draft.uuid) {
                    return Ok(draft);
                }

                let mut batch = SearchQueueBatch::new();
                let published = if draft.version.is_published() {
                    draft
                } else {
                    let release = FieldContainer::new(
                        draft.item_uuid.clone(),
                        draft.language_tag.clone(),
                        draft.version.next_published(),
                        draft.schema_version_uuid.clone(),
                        draft.fields.clone(),
                        draft.editor.clone(),
                    )?;
                    let uuid = graph.insert_container(release.clone(), Some(&draft.uuid), &branch_uuid);
                    point_edge(graph, &mut batch, draft_edge.clone(), uuid)?;
                    release
                };

                point_edge(graph, &mut batch, published_edge, published.uuid.clone())?;
                graph.enqueue_search(batch);

                log::debug!(
                    "Published {} ({}) on branch {} as {}",
                    published.item_uuid,
                    published.language_tag,
                    branch_uuid,
                    published.version
                );
                Ok(published)
            })
            .await
    }

    /// Remove the PUBLISHED edge; the draft stays
    pub async fn take_offline<S: GraphStore>(
        store: &S,
        item_uuid: &Id,
        branch_uuid: &Id,
        language_tag: &str,
    ) -> Result<()> {
        let edge = ContainerEdge::new(item_uuid, branch_uuid, language_tag, ContainerType::Published);
        store
            .write(move |graph| {
                let mut batch = SearchQueueBatch::new();
                if clear_edge(graph, &mut batch, &edge)?.is_none() {
                    return Err(ContentError::not_found("Published container", format!("{:?}", edge)));
                }
                graph.enqueue_search(batch);
                Ok(())
            })
            .await
    }

    /// Remove both edges of one language on one branch. Containers stay in
    /// their version chains and other branches keep their edges.
    pub async fn delete_language<S: GraphStore>(
        store: &S,
        item_uuid: &Id,
        branch_uuid: &Id,
        language_tag: &str,
    ) -> Result<()> {
        let edge = ContainerEdge::new(item_uuid, branch_uuid, language_tag, ContainerType::Draft);
        store
            .write(move |graph| {
                let mut batch = SearchQueueBatch::new();
                let mut removed = 0;
                for container_type in ContainerType::all() {
                    if clear_edge(graph, &mut batch, &edge.with_type(container_type))?.is_some() {
                        removed += 1;
                    }
                }
                if removed == 0 {
                    return Err(ContentError::not_found("Language", format!("{:?}", edge)));
                }
                graph.enqueue_search(batch);
                Ok(())
            })
            .await
    }

    /// Remove every edge of an item on one branch
    pub async fn delete_item<S: GraphStore>(store: &S, item_uuid: &Id, branch_uuid: &Id) -> Result<usize> {
        let item_uuid = item_uuid.clone();
        let branch_uuid = branch_uuid.clone();
        store
            .write(move |graph| {
                graph.item(&item_uuid)?;
                let edges: Vec<ContainerEdge> = graph
                    .edges_of_item(&item_uuid, &branch_uuid)
                    .map(|(edge, _)| edge.clone())
                    .collect();
                let mut batch = SearchQueueBatch::new();
                for edge in &edges {
                    clear_edge(graph, &mut batch, edge)?;
                }
                graph.enqueue_search(batch);
                Ok(edges.len())
            })
            .await
    }

    /// Version history behind the DRAFT edge, newest first
    pub async fn version_history<S: GraphStore>(
        store: &S,
        item_uuid: &str,
        branch_uuid: &str,
        language_tag: &str,
    ) -> Result<Vec<FieldContainer>> {
        let edge = ContainerEdge::new(item_uuid, branch_uuid, language_tag, ContainerType::Draft);
        store
            .read(move |graph| {
                let uuid = graph
                    .edge_target(&edge)
                    .ok_or_else(|| ContentError::not_found("Draft", format!("{:?}", edge)))?;
                Ok(graph.version_history(uuid).into_iter().cloned().collect())
            })
            .await
    }

    fn assigned_version(graph: &Graph, branch_uuid: &str, schema_container_uuid: &str) -> Result<Id> {
        let branch = graph.branch(branch_uuid)?;
        branch
            .assigned_version(SchemaKind::Schema, schema_container_uuid)
            .cloned()
            .ok_or_else(|| {
                ContentError::Precondition(format!(
                    "schema {} is not assigned to branch '{}'",
                    schema_container_uuid, branch.name
                ))
            })
    }
}
