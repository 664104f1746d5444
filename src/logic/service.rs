use std::sync::Arc;
use tokio::sync::broadcast;

use crate::config::AppConfig;
use crate::error::Result;
use crate::logic::branch_ops::BranchOperations;
use crate::logic::content_ops::ContentOperations;
use crate::logic::events::EventBus;
use crate::logic::jobs::{JobOperations, JobQueue, JobReceiver, JobRunner, JobWorkerPool};
use crate::logic::migration::MigrationEngine;
use crate::logic::permissions::PermissionService;
use crate::logic::schema_ops::SchemaOperations;
use crate::logic::search_sync::{FlushReport, SearchIndexClient, SearchSync};
use crate::model::{
    Branch, ContainerType, ContentItem, EditorialChange, EventPayload, EventTopic, FieldContainer,
    FieldMap, Id, Job, Project, SchemaContainer, SchemaKind, SchemaModel, SchemaVersion,
};
use crate::store::{GraphStore, PermissionCache, SchemaCache};

/// Entry point wiring the store, caches, job dispatch and search sync together.
///
/// Operations that create a job enqueue it before returning; callers wait
/// for completion through the migration events.
pub struct ContentService<S: GraphStore + 'static, C: SearchIndexClient + 'static> {
    store: Arc<S>,
    schemas: SchemaCache,
    events: EventBus,
    queue: JobQueue,
    receiver: JobReceiver,
    runner: Arc<JobRunner<S>>,
    search: Arc<SearchSync<S, C>>,
    permissions: PermissionService<S>,
    config: AppConfig,
}

impl<S: GraphStore + 'static, C: SearchIndexClient + 'static> ContentService<S, C> {
    pub fn new(store: Arc<S>, client: Arc<C>, config: AppConfig) -> Self {
        let schemas = SchemaCache::new();
        let events = EventBus::new();
        let (queue, receiver) = JobQueue::channel();
        let origin = config.node.name.clone();

        let engine = MigrationEngine::new(store.clone(), config.worker.max_retries, config.retry_backoff());
        let runner = Arc::new(JobRunner::new(store.clone(), engine, events.clone(), origin.clone()));
        let search = Arc::new(SearchSync::new(
            store.clone(),
            client,
            config.search.index_prefix.clone(),
            config.search.max_batch_size,
        ));
        let permissions = PermissionService::new(
            store.clone(),
            PermissionCache::new(config.permission_ttl()),
            events.clone(),
            origin,
        );

        Self {
            store,
            schemas,
            events,
            queue,
            receiver,
            runner,
            search,
            permissions,
            config,
        }
    }

    /// Spawn the configured number of job workers on the current runtime.
    ///
    /// Jobs left unfinished by an earlier run are dispatched again. A
    /// maintenance task flushes the search queue after every job and every
    /// `search.flush_interval_ms`, and drops expired permission cache entries.
    pub async fn start_workers(&self) -> Result<JobWorkerPool> {
        let mut pool = JobWorkerPool::start(self.runner.clone(), self.receiver.clone(), self.config.worker.pool_size);

        let search = self.search.clone();
        let permissions = self.permissions.cache().clone();
        pool.spawn_maintenance(self.config.flush_interval(), self.runner.finished_signal(), move || {
            let search = search.clone();
            let permissions = permissions.clone();
            async move {
                if let Err(e) = search.flush_pending().await {
                    log::warn!("Search flush cycle failed: {}", e);
                }
                permissions.clear_expired().await;
            }
        });

        let unfinished = JobOperations::unfinished_jobs(self.store.as_ref()).await?;
        if !unfinished.is_empty() {
            log::info!("Dispatching {} unfinished jobs", unfinished.len());
        }
        for job in unfinished {
            self.queue.enqueue(job.uuid)?;
        }
        Ok(pool)
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn schema_cache(&self) -> &SchemaCache {
        &self.schemas
    }

    pub fn permissions(&self) -> &PermissionService<S> {
        &self.permissions
    }

    pub fn search(&self) -> &SearchSync<S, C> {
        &self.search
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn subscribe(&self, topic: EventTopic) -> broadcast::Receiver<EventPayload> {
        self.events.subscribe(topic)
    }

    // Projects and branches

    pub async fn create_project(&self, name: &str, initial_branch_name: &str) -> Result<(Project, Branch)> {
        BranchOperations::create_project(self.store.as_ref(), name, initial_branch_name).await
    }

    pub async fn create_branch(&self, project_uuid: &Id, name: &str, base_branch_uuid: Option<&Id>) -> Result<(Branch, Job)> {
        let (branch, job) =
            BranchOperations::create_branch(self.store.as_ref(), project_uuid, name, base_branch_uuid).await?;
        self.queue.enqueue(job.uuid.clone())?;
        Ok((branch, job))
    }

    pub async fn start_branch_migration(&self, branch_uuid: &Id) -> Result<Job> {
        let job = BranchOperations::start_branch_migration(self.store.as_ref(), branch_uuid).await?;
        self.queue.enqueue(job.uuid.clone())?;
        Ok(job)
    }

    // Schemas

    pub async fn create_schema(&self, kind: SchemaKind, model: SchemaModel) -> Result<SchemaVersion> {
        SchemaOperations::create_schema(self.store.as_ref(), &self.schemas, kind, model).await
    }

    pub async fn update_schema(&self, container_uuid: &Id, model: SchemaModel) -> Result<SchemaVersion> {
        SchemaOperations::update_schema(self.store.as_ref(), &self.schemas, container_uuid, model).await
    }

    pub async fn set_schema(&self, version_uuid: &Id, model: SchemaModel) -> Result<SchemaVersion> {
        SchemaOperations::set_schema(self.store.as_ref(), &self.schemas, version_uuid, model).await
    }

    /// Returns the dispatched migration job, if the assignment needs one
    pub async fn assign_schema_version(&self, branch_uuid: &Id, version_uuid: &Id) -> Result<Option<Job>> {
        let job = SchemaOperations::assign_schema_version(self.store.as_ref(), branch_uuid, version_uuid).await?;
        if let Some(job) = &job {
            self.queue.enqueue(job.uuid.clone())?;
        }
        Ok(job)
    }

    pub async fn find_schema(&self, kind: SchemaKind, name: &str) -> Result<Option<SchemaContainer>> {
        let name = name.to_string();
        self.store
            .read(move |graph| Ok(graph.find_schema_container(kind, &name).cloned()))
            .await
    }

    pub async fn schema_versions(&self, container_uuid: &Id) -> Result<Vec<SchemaVersion>> {
        let container_uuid = container_uuid.clone();
        self.store
            .read(move |graph| SchemaOperations::versions(graph, &container_uuid))
            .await
    }

    // Content

    pub async fn create_item(
        &self,
        branch_uuid: &Id,
        schema_container_uuid: &Id,
        language_tag: &str,
        fields: FieldMap,
        editor: Option<String>,
    ) -> Result<(ContentItem, FieldContainer)> {
        ContentOperations::create_item(
            self.store.as_ref(),
            &self.schemas,
            branch_uuid,
            schema_container_uuid,
            language_tag,
            fields,
            editor,
        )
        .await
    }

    pub async fn create_version(
        &self,
        item_uuid: &Id,
        branch_uuid: &Id,
        language_tag: &str,
        change: EditorialChange,
    ) -> Result<FieldContainer> {
        ContentOperations::create_version(self.store.as_ref(), &self.schemas, item_uuid, branch_uuid, language_tag, change)
            .await
    }

    pub async fn get_container(
        &self,
        item_uuid: &Id,
        branch_uuid: &Id,
        language_tag: &str,
        container_type: ContainerType,
    ) -> Result<Option<FieldContainer>> {
        ContentOperations::get_container(self.store.as_ref(), item_uuid, branch_uuid, language_tag, container_type).await
    }

    pub async fn publish(&self, item_uuid: &Id, branch_uuid: &Id, language_tag: &str) -> Result<FieldContainer> {
        ContentOperations::publish(self.store.as_ref(), item_uuid, branch_uuid, language_tag).await
    }

    pub async fn take_offline(&self, item_uuid: &Id, branch_uuid: &Id, language_tag: &str) -> Result<()> {
        ContentOperations::take_offline(self.store.as_ref(), item_uuid, branch_uuid, language_tag).await
    }

    pub async fn delete_language(&self, item_uuid: &Id, branch_uuid: &Id, language_tag: &str) -> Result<()> {
        ContentOperations::delete_language(self.store.as_ref(), item_uuid, branch_uuid, language_tag).await
    }

    pub async fn delete_item(&self, item_uuid: &Id, branch_uuid: &Id) -> Result<usize> {
        ContentOperations::delete_item(self.store.as_ref(), item_uuid, branch_uuid).await
    }

    pub async fn version_history(&self, item_uuid: &Id, branch_uuid: &Id, language_tag: &str) -> Result<Vec<FieldContainer>> {
        ContentOperations::version_history(self.store.as_ref(), item_uuid, branch_uuid, language_tag).await
    }

    // Jobs

    /// Process a job on the calling task instead of a worker
    pub async fn run_job(&self, job_uuid: &Id) -> Result<Option<Job>> {
        self.runner.process(job_uuid).await
    }

    pub async fn retry_job(&self, job_uuid: &Id) -> Result<Job> {
        self.runner.retry(&self.queue, job_uuid).await
    }

    pub async fn list_jobs(&self) -> Result<Vec<Job>> {
        JobOperations::list_jobs(self.store.as_ref()).await
    }

    pub async fn get_job(&self, job_uuid: &Id) -> Result<Job> {
        JobOperations::get_job(self.store.as_ref(), job_uuid).await
    }

    // Search

    pub async fn flush_search(&self) -> Result<FlushReport> {
        self.search.flush_pending().await
    }

    pub async fn reindex_all(&self) -> Result<usize> {
        self.search.reindex_all().await
    }
}
