use crate::error::{ContentError, Result};
use crate::model::{Branch, Id, Job, JobDetails, JobType, Project};
use crate::store::{Graph, GraphStore};

/// Projects and their linear branch ancestry
pub struct BranchOperations;

impl BranchOperations {
    /// Create a project together with its initial branch
    pub async fn create_project<S: GraphStore>(
        store: &S,
        name: &str,
        initial_branch_name: &str,
    ) -> Result<(Project, Branch)> {
        if name.trim().is_empty() || initial_branch_name.trim().is_empty() {
            return Err(ContentError::Validation(
                "project and branch names must not be empty".into(),
            ));
        }
        let name = name.to_string();
        let branch_name = initial_branch_name.to_string();

        let (project, branch) = store
            .write(move |graph| {
                if graph.projects.values().any(|p| p.name == name) {
                    return Err(ContentError::Conflict(format!("project '{}' already exists", name)));
                }
                let mut project = Project::new(name, String::new());
                let branch = Branch::new_initial(project.uuid.clone(), branch_name);
                project.initial_branch = branch.uuid.clone();
                project.latest_branch = branch.uuid.clone();

                graph.projects.insert(project.uuid.clone(), project.clone());
                graph.branches.insert(branch.uuid.clone(), branch.clone());
                Ok((project, branch))
            })
            .await?;

        log::info!("Created project '{}' with branch '{}'", project.name, branch.name);
        Ok((project, branch))
    }

    /// Create a branch from `base` (the project's latest branch by default).
    ///
    /// The base must be fully migrated. The new branch inherits its schema
    /// assignments and is created together with the branch migration job that
    /// links the base's content into it.
    pub async fn create_branch<S: GraphStore>(
        store: &S,
        project_uuid: &Id,
        name: &str,
        base_branch_uuid: Option<&Id>,
    ) -> Result<(Branch, Job)> {
        if name.trim().is_empty() {
            return Err(ContentError::Validation("branch name must not be empty".into()));
        }
        let project_uuid = project_uuid.clone();
        let name = name.to_string();
        let base_branch_uuid = base_branch_uuid.cloned();

        let (branch, job) = store
            .write(move |graph| {
                let project = graph.project(&project_uuid)?;
                let base_uuid = base_branch_uuid.unwrap_or_else(|| project.latest_branch.clone());
                let base = graph.branch(&base_uuid)?;
                if base.project_uuid != project_uuid {
                    return Err(ContentError::Validation(format!(
                        "branch '{}' belongs to another project",
                        base.name
                    )));
                }
                if !base.migrated {
                    return Err(ContentError::Precondition(format!(
                        "previous branch '{}' is not migrated yet",
                        base.name
                    )));
                }
                if graph.find_branch(&project_uuid, &name).is_some() {
                    return Err(ContentError::Conflict(format!("branch '{}' already exists", name)));
                }

                let branch = Branch::new_from(base, name);
                let job = Job::new(
                    JobType::BranchMigration,
                    JobDetails::Branch {
                        project_uuid: project_uuid.clone(),
                        branch_uuid: branch.uuid.clone(),
                    },
                );

                if let Some(project) = graph.projects.get_mut(&project_uuid) {
                    project.latest_branch = branch.uuid.clone();
                }
                graph.branches.insert(branch.uuid.clone(), branch.clone());
                graph.jobs.insert(job.uuid.clone(), job.clone());
                Ok((branch, job))
            })
            .await?;

        log::info!("Created branch '{}' ({}), migration job {}", branch.name, branch.uuid, job.uuid);
        Ok((branch, job))
    }

    /// Request a branch migration for an existing, not yet migrated branch.
    /// Precondition failures are reported before any job exists.
    pub async fn start_branch_migration<S: GraphStore>(store: &S, branch_uuid: &Id) -> Result<Job> {
        let branch_uuid = branch_uuid.clone();
        store
            .write(move |graph| {
                Self::check_migration_preconditions(graph, &branch_uuid)?;
                let pending = graph.jobs.values().any(|job| {
                    job.job_type == JobType::BranchMigration
                        && job.details.branch_uuid() == &branch_uuid
                        && !job.status.is_terminal()
                });
                if pending {
                    return Err(ContentError::Conflict(format!(
                        "a migration of branch {} is already queued",
                        branch_uuid
                    )));
                }

                let branch = graph.branch(&branch_uuid)?;
                let job = Job::new(
                    JobType::BranchMigration,
                    JobDetails::Branch {
                        project_uuid: branch.project_uuid.clone(),
                        branch_uuid: branch_uuid.clone(),
                    },
                );
                graph.jobs.insert(job.uuid.clone(), job.clone());
                Ok(job)
            })
            .await
    }

    /// The target must not be migrated and its previous branch must be
    pub fn check_migration_preconditions<'a>(graph: &'a Graph, branch_uuid: &str) -> Result<&'a Branch> {
        let branch = graph.branch(branch_uuid)?;
        if branch.migrated {
            return Err(ContentError::Precondition(format!(
                "branch '{}' is already migrated",
                branch.name
            )));
        }
        let previous_uuid = branch.previous_branch.as_ref().ok_or_else(|| {
            ContentError::Precondition(format!("branch '{}' has no previous branch", branch.name))
        })?;
        let previous = graph.branch(previous_uuid)?;
        if !previous.migrated {
            return Err(ContentError::Precondition(format!(
                "previous branch '{}' is not migrated yet",
                previous.name
            )));
        }
        Ok(previous)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::JobStatus;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn test_create_branch_requires_migrated_base() {
        let store = MemoryStore::new();
        let (project, main) = BranchOperations::create_project(&store, "site", "main").await.unwrap();

        let (feature, job) = BranchOperations::create_branch(&store, &project.uuid, "feature", None)
            .await
            .unwrap();
        assert_eq!(feature.previous_branch.as_ref(), Some(&main.uuid));
        assert_eq!(job.status, JobStatus::Starting);

        // `feature` is the latest branch now and not migrated
        let jobs_before = store.read(|graph| Ok(graph.jobs.len())).await.unwrap();
        let err = BranchOperations::create_branch(&store, &project.uuid, "next", None)
            .await
            .unwrap_err();
        assert!(matches!(err, ContentError::Precondition(_)));
        let jobs_after = store.read(|graph| Ok(graph.jobs.len())).await.unwrap();
        assert_eq!(jobs_before, jobs_after);
    }

    #[tokio::test]
    async fn test_start_migration_preconditions() {
        let store = MemoryStore::new();
        let (project, main) = BranchOperations::create_project(&store, "site", "main").await.unwrap();

        let err = BranchOperations::start_branch_migration(&store, &main.uuid)
            .await
            .unwrap_err();
        assert!(err.is_client_error());

        let (feature, _) = BranchOperations::create_branch(&store, &project.uuid, "feature", None)
            .await
            .unwrap();
        // The job created with the branch is still pending
        let err = BranchOperations::start_branch_migration(&store, &feature.uuid)
            .await
            .unwrap_err();
        assert!(matches!(err, ContentError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_duplicate_names_conflict() {
        let store = MemoryStore::new();
        BranchOperations::create_project(&store, "site", "main").await.unwrap();
        let err = BranchOperations::create_project(&store, "site", "main").await.unwrap_err();
        assert!(matches!(err, ContentError::Conflict(_)));
    }
}
