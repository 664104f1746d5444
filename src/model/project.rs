use crate::model::{generate_id, ElementRef, Id, SchemaKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub uuid: Id,
    pub name: String,
    pub initial_branch: Id,
    pub latest_branch: Id,
    pub created_at: DateTime<Utc>,
}

impl Project {
    pub fn new(name: String, initial_branch: Id) -> Self {
        Self {
            uuid: generate_id(),
            name,
            latest_branch: initial_branch.clone(),
            initial_branch,
            created_at: Utc::now(),
        }
    }

    pub fn reference(&self) -> ElementRef {
        ElementRef {
            uuid: self.uuid.clone(),
            name: self.name.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Branch {
    pub uuid: Id,
    pub project_uuid: Id,
    pub name: String,
    pub active: bool,
    /// True once every content item of the previous branch is linked into this one
    pub migrated: bool,
    /// Which branch this one was created from. Ancestry is strictly linear.
    pub previous_branch: Option<Id>,
    /// Schema container uuid -> assigned schema version uuid
    pub schema_assignments: BTreeMap<Id, Id>,
    /// Microschema container uuid -> assigned microschema version uuid
    pub microschema_assignments: BTreeMap<Id, Id>,
    pub created_at: DateTime<Utc>,
}

impl Branch {
    /// The first branch of a project; nothing to migrate into it
    pub fn new_initial(project_uuid: Id, name: String) -> Self {
        Self {
            uuid: generate_id(),
            project_uuid,
            name,
            active: true,
            migrated: true,
            previous_branch: None,
            schema_assignments: BTreeMap::new(),
            microschema_assignments: BTreeMap::new(),
            created_at: Utc::now(),
        }
    }

    /// A branch created from `previous`, inheriting its assignments.
    /// It stays inactive and unmigrated until the branch migration completes.
    pub fn new_from(previous: &Branch, name: String) -> Self {
        Self {
            uuid: generate_id(),
            project_uuid: previous.project_uuid.clone(),
            name,
            active: false,
            migrated: false,
            previous_branch: Some(previous.uuid.clone()),
            schema_assignments: previous.schema_assignments.clone(),
            microschema_assignments: previous.microschema_assignments.clone(),
            created_at: Utc::now(),
        }
    }

    pub fn assignments(&self, kind: SchemaKind) -> &BTreeMap<Id, Id> {
        match kind {
            SchemaKind::Schema => &self.schema_assignments,
            SchemaKind::Microschema => &self.microschema_assignments,
        }
    }

    pub fn assignments_mut(&mut self, kind: SchemaKind) -> &mut BTreeMap<Id, Id> {
        match kind {
            SchemaKind::Schema => &mut self.schema_assignments,
            SchemaKind::Microschema => &mut self.microschema_assignments,
        }
    }

    pub fn assigned_version(&self, kind: SchemaKind, container_uuid: &str) -> Option<&Id> {
        self.assignments(kind).get(container_uuid)
    }

    pub fn mark_migrated(&mut self) {
        self.migrated = true;
        self.active = true;
    }

    pub fn reference(&self) -> ElementRef {
        ElementRef {
            uuid: self.uuid.clone(),
            name: self.name.clone(),
        }
    }
}
