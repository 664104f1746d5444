use chrono::Utc;
use std::sync::Arc;

use crate::error::{ContentError, Result};
use crate::logic::schema_diff::SchemaDiffEngine;
use crate::logic::validate::SchemaValidator;
use crate::model::{
    generate_id, Id, Job, JobDetails, JobType, SchemaContainer, SchemaKind, SchemaModel, SchemaVersion,
};
use crate::store::{Graph, GraphStore, SchemaCache};

/// Schema and microschema lifecycle: version chain, definitions and branch assignment
pub struct SchemaOperations;

impl SchemaOperations {
    /// Create a named schema (or microschema) with its first version
    pub async fn create_schema<S: GraphStore>(
        store: &S,
        cache: &SchemaCache,
        kind: SchemaKind,
        model: SchemaModel,
    ) -> Result<SchemaVersion> {
        SchemaValidator::validate_model(&model)?;

        let version = store
            .write(move |graph| {
                if Self::name_taken(graph, kind, &model.name, None) {
                    return Err(ContentError::Conflict(format!(
                        "{} '{}' already exists",
                        kind, model.name
                    )));
                }

                let container_uuid = generate_id();
                let version = SchemaVersion::new(container_uuid.clone(), kind, 1, &model, None, vec![])?;
                graph.schema_containers.insert(
                    container_uuid.clone(),
                    SchemaContainer {
                        uuid: container_uuid,
                        name: model.name.clone(),
                        kind,
                        latest_version: version.uuid.clone(),
                        created_at: Utc::now(),
                    },
                );
                graph.schema_versions.insert(version.uuid.clone(), version.clone());
                Ok((version, model))
            })
            .await
            .map(|(version, model)| {
                cache.put(kind, &version.name, version.version, model);
                version
            })?;

        log::info!("Created {} '{}' v1", kind, version.name);
        Ok(version)
    }

    /// Append a new version whose definition is `model`. The change list from
    /// the latest version is computed and stored with it.
    pub async fn update_schema<S: GraphStore>(
        store: &S,
        cache: &SchemaCache,
        container_uuid: &Id,
        model: SchemaModel,
    ) -> Result<SchemaVersion> {
        SchemaValidator::validate_model(&model)?;

        let container_uuid = container_uuid.clone();
        let cache_handle = cache.clone();
        let version = store
            .write(move |graph| {
                let container = graph.schema_container(&container_uuid)?.clone();
                let latest = graph.schema_version(&container.latest_version)?.clone();
                let latest_model = Self::load_model(graph, &cache_handle, &latest.uuid)?;

                let changes = SchemaDiffEngine::diff(&latest_model, &model);
                if changes.is_empty() {
                    return Err(ContentError::Precondition(format!(
                        "{} '{}' is already at target version {}",
                        container.kind, container.name, latest.version
                    )));
                }
                if Self::name_taken(graph, container.kind, &model.name, Some(&container.uuid)) {
                    return Err(ContentError::Conflict(format!(
                        "{} '{}' already exists",
                        container.kind, model.name
                    )));
                }
                if SchemaDiffEngine::apply(&latest_model, &changes)? != model {
                    return Err(ContentError::schema_change(
                        model.name.clone(),
                        "computed changes do not reproduce the requested definition",
                    ));
                }

                let version = SchemaVersion::new(
                    container.uuid.clone(),
                    container.kind,
                    latest.version + 1,
                    &model,
                    Some(latest.uuid.clone()),
                    changes,
                )?;
                graph.schema_version_mut(&latest.uuid)?.next = Some(version.uuid.clone());
                if let Some(container) = graph.schema_containers.get_mut(&container.uuid) {
                    container.latest_version = version.uuid.clone();
                    container.name = model.name.clone();
                }
                graph.schema_versions.insert(version.uuid.clone(), version.clone());
                Ok((version, model))
            })
            .await
            .map(|(version, model)| {
                cache.put(version.kind, &version.name, version.version, model);
                version
            })?;

        log::info!(
            "Created {} '{}' v{} with {} changes",
            version.kind,
            version.name,
            version.version,
            version.changes.len()
        );
        Ok(version)
    }

    /// Replace the definition of an existing version in place.
    /// The cached entry for that version is swapped once the write commits.
    pub async fn set_schema<S: GraphStore>(
        store: &S,
        cache: &SchemaCache,
        version_uuid: &Id,
        model: SchemaModel,
    ) -> Result<SchemaVersion> {
        SchemaValidator::validate_model(&model)?;

        let version_uuid = version_uuid.clone();
        store
            .write(move |graph| {
                let owner = graph.schema_version(&version_uuid)?.container_uuid.clone();
                let kind = graph.schema_version(&version_uuid)?.kind;
                if Self::name_taken(graph, kind, &model.name, Some(&owner)) {
                    return Err(ContentError::Conflict(format!("{} '{}' already exists", kind, model.name)));
                }
                let version = graph.schema_version_mut(&version_uuid)?;
                let old_name = version.name.clone();
                version.set_model(&model)?;
                let version = version.clone();

                if let Some(container) = graph.schema_containers.get_mut(&version.container_uuid) {
                    if container.latest_version == version.uuid {
                        container.name = model.name.clone();
                    }
                }
                Ok((version, old_name, model))
            })
            .await
            .map(|(version, old_name, model)| {
                cache.replace(version.kind, &old_name, version.version, model);
                version
            })
    }

    /// Assign a schema version to a branch.
    ///
    /// The first assignment of a schema needs no migration. Assigning a newer
    /// version creates a migration job for the branch, returned for dispatch.
    pub async fn assign_schema_version<S: GraphStore>(
        store: &S,
        branch_uuid: &Id,
        version_uuid: &Id,
    ) -> Result<Option<Job>> {
        let branch_uuid = branch_uuid.clone();
        let version_uuid = version_uuid.clone();
        store
            .write(move |graph| {
                let version = graph.schema_version(&version_uuid)?.clone();
                let branch = graph.branch(&branch_uuid)?;
                if !branch.migrated {
                    return Err(ContentError::Precondition(format!(
                        "branch '{}' is not migrated yet",
                        branch.name
                    )));
                }
                let project_uuid = branch.project_uuid.clone();
                let current = branch
                    .assigned_version(version.kind, &version.container_uuid)
                    .cloned();

                let job = match current {
                    None => None,
                    Some(current) => {
                        let current_version = graph.schema_version(&current)?;
                        if current == version.uuid {
                            return Err(ContentError::Precondition(format!(
                                "{} '{}' is already at target version {} on this branch",
                                version.kind, version.name, version.version
                            )));
                        }
                        if current_version.version > version.version {
                            return Err(ContentError::Precondition(format!(
                                "cannot downgrade {} '{}' from v{} to v{}",
                                version.kind, version.name, current_version.version, version.version
                            )));
                        }
                        Some(Job::new(
                            JobType::for_schema_kind(version.kind),
                            JobDetails::Schema {
                                project_uuid,
                                branch_uuid: branch_uuid.clone(),
                                container_uuid: version.container_uuid.clone(),
                                from_version: current,
                                to_version: version.uuid.clone(),
                            },
                        ))
                    }
                };

                graph
                    .branch_mut(&branch_uuid)?
                    .assignments_mut(version.kind)
                    .insert(version.container_uuid.clone(), version.uuid.clone());
                if let Some(job) = &job {
                    graph.jobs.insert(job.uuid.clone(), job.clone());
                }
                Ok(job)
            })
            .await
    }

    /// Parsed definition of a version, served from the cache
    pub fn load_model(graph: &Graph, cache: &SchemaCache, version_uuid: &str) -> Result<Arc<SchemaModel>> {
        let version = graph.schema_version(version_uuid)?;
        if let Some(model) = cache.get(version.kind, &version.name, version.version) {
            return Ok(model);
        }
        let model = version.parse_model()?;
        Ok(cache.put(version.kind, &version.name, version.version, model))
    }

    /// Cached models are keyed by name, so a name stays reserved for the
    /// container whose versions ever carried it
    fn name_taken(graph: &Graph, kind: SchemaKind, name: &str, owner: Option<&Id>) -> bool {
        graph
            .schema_versions
            .values()
            .any(|v| v.kind == kind && v.name == name && Some(&v.container_uuid) != owner)
    }

    /// All versions of a schema, oldest first
    pub fn versions(graph: &Graph, container_uuid: &str) -> Result<Vec<SchemaVersion>> {
        let container = graph.schema_container(container_uuid)?;
        let mut versions = Vec::new();
        let mut current = Some(graph.schema_version(&container.latest_version)?);
        while let Some(version) = current {
            versions.push(version.clone());
            current = match &version.previous {
                Some(previous) => Some(graph.schema_version(previous)?),
                None => None,
            };
        }
        versions.reverse();
        Ok(versions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FieldKind, FieldSchema};
    use crate::store::MemoryStore;

    fn person() -> SchemaModel {
        SchemaModel::new("person").with_field(FieldSchema::new("name", FieldKind::String))
    }

    #[tokio::test]
    async fn test_update_appends_version_with_changes() {
        let store = MemoryStore::new();
        let cache = SchemaCache::new();
        let v1 = SchemaOperations::create_schema(&store, &cache, SchemaKind::Schema, person())
            .await
            .unwrap();

        let v2 = SchemaOperations::update_schema(
            &store,
            &cache,
            &v1.container_uuid,
            person().with_field(FieldSchema::new("age", FieldKind::Number)),
        )
        .await
        .unwrap();

        assert_eq!(v2.version, 2);
        assert_eq!(v2.previous.as_ref(), Some(&v1.uuid));
        assert_eq!(v2.changes.len(), 1);
        assert!(cache.get(SchemaKind::Schema, "person", 2).is_some());

        let versions = store
            .read(|graph| SchemaOperations::versions(graph, &v1.container_uuid))
            .await
            .unwrap();
        assert_eq!(versions.len(), 2);
        assert_eq!(versions[0].next.as_ref(), Some(&v2.uuid));
    }

    #[tokio::test]
    async fn test_empty_update_is_rejected() {
        let store = MemoryStore::new();
        let cache = SchemaCache::new();
        let v1 = SchemaOperations::create_schema(&store, &cache, SchemaKind::Schema, person())
            .await
            .unwrap();

        let err = SchemaOperations::update_schema(&store, &cache, &v1.container_uuid, person())
            .await
            .unwrap_err();
        assert!(matches!(err, ContentError::Precondition(_)));
    }

    #[tokio::test]
    async fn test_duplicate_name_conflicts() {
        let store = MemoryStore::new();
        let cache = SchemaCache::new();
        SchemaOperations::create_schema(&store, &cache, SchemaKind::Schema, person())
            .await
            .unwrap();
        let err = SchemaOperations::create_schema(&store, &cache, SchemaKind::Schema, person())
            .await
            .unwrap_err();
        assert!(matches!(err, ContentError::Conflict(_)));

        // Microschemas live in their own namespace
        assert!(
            SchemaOperations::create_schema(&store, &cache, SchemaKind::Microschema, person())
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn test_former_name_stays_reserved() {
        let store = MemoryStore::new();
        let cache = SchemaCache::new();
        let v1 = SchemaOperations::create_schema(&store, &cache, SchemaKind::Schema, person())
            .await
            .unwrap();
        let mut renamed = person();
        renamed.name = "author".into();
        SchemaOperations::update_schema(&store, &cache, &v1.container_uuid, renamed)
            .await
            .unwrap();

        let err = SchemaOperations::create_schema(&store, &cache, SchemaKind::Schema, person())
            .await
            .unwrap_err();
        assert!(matches!(err, ContentError::Conflict(_)));
        assert_eq!(cache.get(SchemaKind::Schema, "person", 1).unwrap().name, "person");
    }

    #[tokio::test]
    async fn test_set_schema_replaces_cached_definition() {
        let store = MemoryStore::new();
        let cache = SchemaCache::new();
        let v1 = SchemaOperations::create_schema(&store, &cache, SchemaKind::Schema, person())
            .await
            .unwrap();

        let relabeled = SchemaModel::new("person")
            .with_field(FieldSchema::new("name", FieldKind::String).with_label("Name"));
        SchemaOperations::set_schema(&store, &cache, &v1.uuid, relabeled.clone())
            .await
            .unwrap();

        let cached = cache.get(SchemaKind::Schema, "person", 1).unwrap();
        assert_eq!(*cached, relabeled);
        let stored = store
            .read(|graph| graph.schema_version(&v1.uuid)?.parse_model())
            .await
            .unwrap();
        assert_eq!(stored, relabeled);
    }

    #[tokio::test]
    async fn test_failed_set_schema_leaves_cache_alone() {
        let store = MemoryStore::new();
        let cache = SchemaCache::new();
        let v1 = SchemaOperations::create_schema(&store, &cache, SchemaKind::Schema, person())
            .await
            .unwrap();

        store.inject_write_failures(0, 1);
        let relabeled = SchemaModel::new("person")
            .with_field(FieldSchema::new("name", FieldKind::String).with_label("Name"));
        let err = SchemaOperations::set_schema(&store, &cache, &v1.uuid, relabeled)
            .await
            .unwrap_err();
        assert!(err.is_transient());

        let cached = cache.get(SchemaKind::Schema, "person", 1).unwrap();
        assert_eq!(*cached, person());
    }
}
