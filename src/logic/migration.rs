use itertools::Itertools;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{ContentError, Result};
use crate::logic::branch_ops::BranchOperations;
use crate::logic::field_migration::{change_chain, FieldMigrator};
use crate::logic::search_sync::point_edge;
use crate::model::{
    ContainerEdge, ContainerType, ContainerVersion, FieldContainer, FieldMap, Id, Job, JobDetails, JobType,
    SchemaChange, SchemaKind, SearchQueueBatch,
};
use crate::store::{Graph, GraphStore};

/// What a migration does to one container
#[derive(Debug, Clone)]
enum ContainerTransform {
    /// Move values to the target schema version along the change chain
    Schema { to_version: Id },
    /// Rewrite micronodes authored against `from_version`
    Microschema {
        from_version: Id,
        to_version: Id,
        changes: Vec<SchemaChange>,
    },
}

impl ContainerTransform {
    /// New field document and schema version for a container, or `None` when
    /// the container already matches the target.
    fn apply(&self, graph: &Graph, container: &FieldContainer) -> Result<Option<(FieldMap, Id)>> {
        match self {
            ContainerTransform::Schema { to_version } => {
                if &container.schema_version_uuid == to_version {
                    return Ok(None);
                }
                let changes = change_chain(graph, &container.schema_version_uuid, to_version)?;
                Ok(Some((
                    FieldMigrator::migrate(&container.fields, &changes),
                    to_version.clone(),
                )))
            }
            ContainerTransform::Microschema {
                from_version,
                to_version,
                changes,
            } => Ok(
                FieldMigrator::migrate_micronodes(&container.fields, from_version, to_version, changes)
                    .map(|fields| (fields, container.schema_version_uuid.clone())),
            ),
        }
    }
}

/// Counters of one migration run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MigrationReport {
    /// Units rewritten or linked by this run
    pub migrated: usize,
    /// Units that already matched the target
    pub skipped: usize,
}

/// Rewrites content to follow schema changes and branch creation.
///
/// Work is split into units of one `(item, language)` pair, each committed in
/// its own transaction. Nothing is checkpointed: a rerun scans everything again
/// and skips units that already match the target, so it continues where a
/// failed run stopped.
pub struct MigrationEngine<S: GraphStore> {
    store: Arc<S>,
    retry: RetryPolicy,
}

impl<S: GraphStore> MigrationEngine<S> {
    pub fn new(store: Arc<S>, max_retries: u32, retry_backoff: Duration) -> Self {
        Self {
            store,
            retry: RetryPolicy::new(max_retries, retry_backoff),
        }
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Run the migration a job describes
    pub async fn run(&self, job: &Job) -> Result<MigrationReport> {
        match (&job.job_type, &job.details) {
            (
                JobType::SchemaMigration,
                JobDetails::Schema {
                    branch_uuid,
                    container_uuid,
                    from_version,
                    to_version,
                    ..
                },
            ) => {
                self.migrate_schema(branch_uuid, container_uuid, from_version, to_version)
                    .await
            }
            (
                JobType::MicroschemaMigration,
                JobDetails::Schema {
                    branch_uuid,
                    from_version,
                    to_version,
                    ..
                },
            ) => {
                self.migrate_microschema(branch_uuid, from_version, to_version)
                    .await
            }
            (JobType::BranchMigration, JobDetails::Branch { branch_uuid, .. }) => {
                self.migrate_branch(branch_uuid).await
            }
            (job_type, _) => Err(ContentError::Migration(format!(
                "job {} of type {:?} carries mismatching details",
                job.uuid, job_type
            ))),
        }
    }

    /// Migrate all content of one schema on a branch to `to_version`
    pub async fn migrate_schema(
        &self,
        branch_uuid: &Id,
        container_uuid: &Id,
        from_version: &Id,
        to_version: &Id,
    ) -> Result<MigrationReport> {
        let (branch, schema_container, from, to) = (
            branch_uuid.clone(),
            container_uuid.clone(),
            from_version.clone(),
            to_version.clone(),
        );
        let units = self
            .store
            .read(move |graph| {
                graph.branch(&branch)?;
                change_chain(graph, &from, &to)?;
                Ok(graph
                    .languages_on_branch(&branch)
                    .into_iter()
                    .filter(|(item, _)| {
                        graph
                            .items
                            .get(item)
                            .map_or(false, |i| i.schema_container_uuid == schema_container)
                    })
                    .collect_vec())
            })
            .await?;

        log::info!(
            "Migrating {} units of schema {} on branch {}",
            units.len(),
            container_uuid,
            branch_uuid
        );
        let transform = ContainerTransform::Schema {
            to_version: to_version.clone(),
        };
        self.migrate_units(branch_uuid, units, &transform).await
    }

    /// Migrate every micronode of one microschema on a branch to `to_version`
    pub async fn migrate_microschema(
        &self,
        branch_uuid: &Id,
        from_version: &Id,
        to_version: &Id,
    ) -> Result<MigrationReport> {
        let (branch, from, to) = (branch_uuid.clone(), from_version.clone(), to_version.clone());
        let (changes, units) = self
            .store
            .read(move |graph| {
                graph.branch(&branch)?;
                let changes = change_chain(graph, &from, &to)?;
                let units = graph
                    .edges_on_branch(&branch)
                    .filter(|(_, uuid)| {
                        graph
                            .containers
                            .get(*uuid)
                            .map_or(false, |c| FieldMigrator::references_microschema(&c.fields, &from))
                    })
                    .map(|(edge, _)| (edge.item_uuid.clone(), edge.language_tag.clone()))
                    .sorted()
                    .dedup()
                    .collect_vec();
                Ok((changes, units))
            })
            .await?;

        log::info!(
            "Migrating micronodes of {} units on branch {}",
            units.len(),
            branch_uuid
        );
        let transform = ContainerTransform::Microschema {
            from_version: from_version.clone(),
            to_version: to_version.clone(),
            changes,
        };
        self.migrate_units(branch_uuid, units, &transform).await
    }

    /// Link every item of the previous branch into `branch_uuid`, then mark it
    /// migrated. Containers are shared, not copied.
    ///
    /// Schema versions assigned to the previous branch after this one was
    /// created are adopted: linked content is migrated to them and the
    /// assignments are copied when the branch is marked migrated.
    pub async fn migrate_branch(&self, branch_uuid: &Id) -> Result<MigrationReport> {
        let branch = branch_uuid.clone();
        let groups = self
            .store
            .read(move |graph| {
                let previous = BranchOperations::check_migration_preconditions(graph, &branch)?;
                Ok(graph
                    .edges_on_branch(&previous.uuid)
                    .map(|(edge, uuid)| (edge.clone(), uuid.clone()))
                    .into_group_map_by(|(edge, _)| edge.item_uuid.clone())
                    .into_iter()
                    .sorted_by(|a, b| a.0.cmp(&b.0))
                    .collect_vec())
            })
            .await?;

        log::info!("Linking {} items into branch {}", groups.len(), branch_uuid);
        let mut report = MigrationReport::default();
        for (item_uuid, edges) in groups {
            let linked = self
                .retry
                .run(&format!("linking item {}", item_uuid), || {
                    let edges = edges.clone();
                    let branch = branch_uuid.clone();
                    self.store
                        .write(move |graph| Self::link_item(graph, &branch, edges))
                })
                .await
                .map_err(|e| {
                    ContentError::Migration(format!("item {} on branch {}: {}", item_uuid, branch_uuid, e))
                })?;
            if linked {
                report.migrated += 1;
            } else {
                report.skipped += 1;
            }
        }

        // Assignments the previous branch received while this one waited
        let branch = branch_uuid.clone();
        let adopted = self
            .store
            .read(move |graph| {
                let previous = BranchOperations::check_migration_preconditions(graph, &branch)?;
                let own = graph.branch(&branch)?;
                Ok(SchemaKind::all()
                    .into_iter()
                    .flat_map(move |kind| {
                        previous
                            .assignments(kind)
                            .iter()
                            .filter_map(move |(container, version)| match own.assigned_version(kind, container) {
                                Some(current) if current != version => {
                                    Some((kind, container.clone(), current.clone(), version.clone()))
                                }
                                _ => None,
                            })
                    })
                    .collect_vec())
            })
            .await?;

        for (kind, container_uuid, from_version, to_version) in &adopted {
            let adopted_report = match kind {
                SchemaKind::Schema => {
                    self.migrate_schema(branch_uuid, container_uuid, from_version, to_version)
                        .await?
                }
                SchemaKind::Microschema => {
                    self.migrate_microschema(branch_uuid, from_version, to_version)
                        .await?
                }
            };
            log::info!(
                "Branch {} follows {} {} to version {}: {} units migrated",
                branch_uuid,
                kind,
                container_uuid,
                to_version,
                adopted_report.migrated
            );
        }

        let branch = branch_uuid.clone();
        self.retry
            .run("completing branch migration", || {
                let branch = branch.clone();
                self.store.write(move |graph| {
                    let previous = BranchOperations::check_migration_preconditions(graph, &branch)?.clone();
                    let target = graph.branch_mut(&branch)?;
                    target.schema_assignments = previous.schema_assignments;
                    target.microschema_assignments = previous.microschema_assignments;
                    target.mark_migrated();
                    Ok(())
                })
            })
            .await?;

        log::info!(
            "Branch {} migrated: {} items linked, {} already present",
            branch_uuid,
            report.migrated,
            report.skipped
        );
        Ok(report)
    }

    fn link_item(graph: &mut Graph, branch_uuid: &str, edges: Vec<(ContainerEdge, Id)>) -> Result<bool> {
        let mut batch = SearchQueueBatch::new();
        let mut linked = false;
        for (edge, container_uuid) in edges {
            let target = ContainerEdge {
                branch_uuid: branch_uuid.to_string(),
                ..edge
            };
            if graph.edge_target(&target).is_some() {
                continue;
            }
            point_edge(graph, &mut batch, target, container_uuid)?;
            linked = true;
        }
        graph.enqueue_search(batch);
        Ok(linked)
    }

    async fn migrate_units(
        &self,
        branch_uuid: &Id,
        units: Vec<(Id, String)>,
        transform: &ContainerTransform,
    ) -> Result<MigrationReport> {
        let mut report = MigrationReport::default();
        for (item_uuid, language_tag) in units {
            let migrated = self
                .retry.run(&format!("migrating {} ({})", item_uuid, language_tag), || {
                    let (branch, item, language) = (branch_uuid.clone(), item_uuid.clone(), language_tag.clone());
                    let transform = transform.clone();
                    self.store.write(move |graph| {
                        Self::migrate_unit(graph, &branch, &item, &language, &transform)
                    })
                })
                .await
                .map_err(|e| {
                    ContentError::Migration(format!(
                        "{} ({}) on branch {}: {}",
                        item_uuid, language_tag, branch_uuid, e
                    ))
                })?;

            if migrated {
                log::debug!("Migrated {} ({}) on branch {}", item_uuid, language_tag, branch_uuid);
                report.migrated += 1;
            } else {
                report.skipped += 1;
            }
        }
        Ok(report)
    }

    /// Migrate the DRAFT and PUBLISHED containers of one unit.
    ///
    /// A container carrying both edges becomes one new draft version carrying
    /// both. Otherwise the published container is migrated first and linked
    /// after the draft, then the draft follows it. A draft that already matches
    /// the target is carried forward unchanged, so the migrated published
    /// container stays in the draft's history.
    fn migrate_unit(
        graph: &mut Graph,
        branch_uuid: &str,
        item_uuid: &str,
        language_tag: &str,
        transform: &ContainerTransform,
    ) -> Result<bool> {
        let draft_edge = ContainerEdge::new(item_uuid, branch_uuid, language_tag, ContainerType::Draft);
        let published_edge = draft_edge.with_type(ContainerType::Published);
        let draft = graph.container_at(&draft_edge).cloned();
        let published = graph.container_at(&published_edge).cloned();

        let mut batch = SearchQueueBatch::new();
        let mut migrated = false;

        match (&draft, &published) {
            (Some(draft), Some(published)) if draft.uuid == published.uuid => {
                if let Some((fields, schema_version)) = transform.apply(graph, draft)? {
                    let container = Self::successor(draft, draft.version.next_draft(), schema_version, fields)?;
                    let uuid = graph.insert_container(container, Some(&draft.uuid), branch_uuid);
                    point_edge(graph, &mut batch, draft_edge, uuid.clone())?;
                    point_edge(graph, &mut batch, published_edge, uuid)?;
                    migrated = true;
                }
            }
            _ => {
                let mut tail = draft.clone().or_else(|| published.clone());

                if let Some(published) = &published {
                    if let Some((fields, schema_version)) = transform.apply(graph, published)? {
                        let after = tail.clone().unwrap_or_else(|| published.clone());
                        let container =
                            Self::successor(published, after.version.next_published(), schema_version, fields)?;
                        let uuid = graph.insert_container(container.clone(), Some(&after.uuid), branch_uuid);
                        point_edge(graph, &mut batch, published_edge, uuid)?;
                        tail = Some(container);
                        migrated = true;
                    }
                }

                if let Some(draft) = &draft {
                    let rewritten = match transform.apply(graph, draft)? {
                        Some(rewritten) => Some(rewritten),
                        None if migrated => Some((draft.fields.clone(), draft.schema_version_uuid.clone())),
                        None => None,
                    };
                    if let Some((fields, schema_version)) = rewritten {
                        let after = tail.unwrap_or_else(|| draft.clone());
                        let container =
                            Self::successor(draft, after.version.next_draft(), schema_version, fields)?;
                        let uuid = graph.insert_container(container, Some(&after.uuid), branch_uuid);
                        point_edge(graph, &mut batch, draft_edge, uuid)?;
                        migrated = true;
                    }
                }
            }
        }

        graph.enqueue_search(batch);
        Ok(migrated)
    }

    fn successor(
        original: &FieldContainer,
        version: ContainerVersion,
        schema_version: Id,
        fields: FieldMap,
    ) -> Result<FieldContainer> {
        FieldContainer::new(
            original.item_uuid.clone(),
            original.language_tag.clone(),
            version,
            schema_version,
            fields,
            original.editor.clone(),
        )
    }
}

/// Bounded retry of transient store failures with linear backoff
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff: Duration) -> Self {
        Self { max_retries, backoff }
    }

    /// Run `operation` until it succeeds, fails with a non-transient error or
    /// has been retried `max_retries` times
    pub async fn run<T, F, Fut>(&self, description: &str, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    attempt += 1;
                    log::warn!(
                        "{} failed (retry {}/{}): {}",
                        description,
                        attempt,
                        self.max_retries,
                        e
                    );
                    tokio::time::sleep(self.backoff * attempt).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_retry_gives_up_after_max_retries() {
        let policy = RetryPolicy::new(2, Duration::from_millis(1));
        let calls = AtomicU32::new(0);
        let result: Result<()> = policy
            .run("flaky write", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ContentError::transient("store busy")) }
            })
            .await;
        assert!(result.unwrap_err().is_transient());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_stops_on_permanent_error() {
        let policy = RetryPolicy::new(5, Duration::from_millis(1));
        let calls = AtomicU32::new(0);
        let result: Result<()> = policy
            .run("bad write", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ContentError::Conflict("stale".into())) }
            })
            .await;
        assert!(matches!(result, Err(ContentError::Conflict(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_recovers_from_transient_error() {
        let policy = RetryPolicy::new(2, Duration::from_millis(1));
        let calls = AtomicU32::new(0);
        let value = policy
            .run("flaky read", || {
                let call = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if call == 0 {
                        Err(ContentError::transient("store busy"))
                    } else {
                        Ok(call)
                    }
                }
            })
            .await
            .unwrap();
        assert_eq!(value, 1);
    }
}
