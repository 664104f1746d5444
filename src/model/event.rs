use crate::model::{ElementRef, Id, JobStatus, JobType, SchemaRef};
use serde::{Deserialize, Serialize};

/// Named pub/sub topics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventTopic {
    #[serde(rename = "mesh.schema.migration.start")]
    SchemaMigrationStart,
    #[serde(rename = "mesh.schema.migration.finished")]
    SchemaMigrationFinished,
    #[serde(rename = "mesh.microschema.migration.start")]
    MicroschemaMigrationStart,
    #[serde(rename = "mesh.microschema.migration.finished")]
    MicroschemaMigrationFinished,
    #[serde(rename = "mesh.branch.migration.start")]
    BranchMigrationStart,
    #[serde(rename = "mesh.branch.migration.finished")]
    BranchMigrationFinished,
    #[serde(rename = "mesh.clear-permission-store")]
    ClearPermissionStore,
}

impl EventTopic {
    pub fn address(&self) -> &'static str {
        match self {
            EventTopic::SchemaMigrationStart => "mesh.schema.migration.start",
            EventTopic::SchemaMigrationFinished => "mesh.schema.migration.finished",
            EventTopic::MicroschemaMigrationStart => "mesh.microschema.migration.start",
            EventTopic::MicroschemaMigrationFinished => "mesh.microschema.migration.finished",
            EventTopic::BranchMigrationStart => "mesh.branch.migration.start",
            EventTopic::BranchMigrationFinished => "mesh.branch.migration.finished",
            EventTopic::ClearPermissionStore => "mesh.clear-permission-store",
        }
    }

    pub fn migration_start(job_type: JobType) -> Self {
        match job_type {
            JobType::SchemaMigration => EventTopic::SchemaMigrationStart,
            JobType::MicroschemaMigration => EventTopic::MicroschemaMigrationStart,
            JobType::BranchMigration => EventTopic::BranchMigrationStart,
        }
    }

    pub fn migration_finished(job_type: JobType) -> Self {
        match job_type {
            JobType::SchemaMigration => EventTopic::SchemaMigrationFinished,
            JobType::MicroschemaMigration => EventTopic::MicroschemaMigrationFinished,
            JobType::BranchMigration => EventTopic::BranchMigrationFinished,
        }
    }
}

impl std::fmt::Display for EventTopic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.address())
    }
}

/// Payload of migration start/finished events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationEventModel {
    pub event: EventTopic,
    pub status: JobStatus,
    pub job: Id,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<ElementRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project: Option<ElementRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<SchemaRef>,
    /// Name of the node that ran the job
    pub origin: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventPayload {
    Migration(MigrationEventModel),
    PermissionStoreCleared { origin: String },
}

impl EventPayload {
    pub fn as_migration(&self) -> Option<&MigrationEventModel> {
        match self {
            EventPayload::Migration(model) => Some(model),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_addresses_match_wire_names() {
        for topic in [
            EventTopic::SchemaMigrationStart,
            EventTopic::BranchMigrationFinished,
            EventTopic::ClearPermissionStore,
        ] {
            let json = serde_json::to_string(&topic).unwrap();
            assert_eq!(json, format!("\"{}\"", topic.address()));
        }
    }

    #[test]
    fn test_topics_per_job_type() {
        assert_eq!(
            EventTopic::migration_finished(JobType::MicroschemaMigration),
            EventTopic::MicroschemaMigrationFinished
        );
        assert_eq!(
            EventTopic::migration_start(JobType::BranchMigration),
            EventTopic::BranchMigrationStart
        );
    }
}
