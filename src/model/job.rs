use crate::model::{generate_id, Id, SchemaKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobType {
    SchemaMigration,
    MicroschemaMigration,
    BranchMigration,
}

impl JobType {
    pub fn for_schema_kind(kind: SchemaKind) -> Self {
        match kind {
            SchemaKind::Schema => JobType::SchemaMigration,
            SchemaKind::Microschema => JobType::MicroschemaMigration,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Starting,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// What a job migrates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobDetails {
    /// Move content of `branch_uuid` from `from_version` to `to_version` of a (micro)schema
    Schema {
        project_uuid: Id,
        branch_uuid: Id,
        container_uuid: Id,
        from_version: Id,
        to_version: Id,
    },
    /// Link every item of the previous branch into `branch_uuid`
    Branch { project_uuid: Id, branch_uuid: Id },
}

impl JobDetails {
    pub fn branch_uuid(&self) -> &Id {
        match self {
            JobDetails::Schema { branch_uuid, .. } | JobDetails::Branch { branch_uuid, .. } => {
                branch_uuid
            }
        }
    }

    pub fn project_uuid(&self) -> &Id {
        match self {
            JobDetails::Schema { project_uuid, .. } | JobDetails::Branch { project_uuid, .. } => {
                project_uuid
            }
        }
    }
}

/// Durable record of one unit of background migration work.
/// Retained after completion for audit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub uuid: Id,
    pub job_type: JobType,
    pub status: JobStatus,
    pub details: JobDetails,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_cause: Option<String>,
    /// Number of processing attempts started so far
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(job_type: JobType, details: JobDetails) -> Self {
        Self {
            uuid: generate_id(),
            job_type,
            status: JobStatus::Starting,
            details,
            error_cause: None,
            attempts: 0,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn mark_running(&mut self) {
        self.status = JobStatus::Running;
        self.attempts += 1;
        self.error_cause = None;
        self.started_at = Some(Utc::now());
        self.completed_at = None;
    }

    pub fn mark_completed(&mut self) {
        self.status = JobStatus::Completed;
        self.completed_at = Some(Utc::now());
    }

    pub fn mark_failed(&mut self, cause: String) {
        self.status = JobStatus::Failed;
        self.error_cause = Some(cause);
        self.completed_at = Some(Utc::now());
    }

    /// Put a failed job back in the queue-able state
    pub fn reset(&mut self) {
        self.status = JobStatus::Starting;
        self.completed_at = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_lifecycle() {
        let mut job = Job::new(
            JobType::BranchMigration,
            JobDetails::Branch {
                project_uuid: "p1".into(),
                branch_uuid: "b2".into(),
            },
        );
        assert_eq!(job.status, JobStatus::Starting);

        job.mark_running();
        assert_eq!(job.attempts, 1);
        assert!(!job.status.is_terminal());

        job.mark_failed("store unavailable".into());
        assert!(job.status.is_terminal());
        assert_eq!(job.error_cause.as_deref(), Some("store unavailable"));

        job.reset();
        job.mark_running();
        assert_eq!(job.attempts, 2);
        assert!(job.error_cause.is_none());
        job.mark_completed();
        assert_eq!(job.status, JobStatus::Completed);
    }

    #[test]
    fn test_job_type_wire_format() {
        let json = serde_json::to_string(&JobType::MicroschemaMigration).unwrap();
        assert_eq!(json, "\"MICROSCHEMA_MIGRATION\"");
        assert_eq!(JobType::for_schema_kind(SchemaKind::Schema), JobType::SchemaMigration);
    }
}
