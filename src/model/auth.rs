use crate::model::{generate_id, Id};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    Create,
    Read,
    Update,
    Delete,
    Publish,
    ReadPublished,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub uuid: Id,
    pub username: String,
}

impl User {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            uuid: generate_id(),
            username: username.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub uuid: Id,
    pub name: String,
    pub users: BTreeSet<Id>,
    pub roles: BTreeSet<Id>,
}

impl Group {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            uuid: generate_id(),
            name: name.into(),
            users: BTreeSet::new(),
            roles: BTreeSet::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Role {
    pub uuid: Id,
    pub name: String,
    /// Target element uuid -> permissions granted on it
    pub grants: BTreeMap<Id, BTreeSet<Permission>>,
}

impl Role {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            uuid: generate_id(),
            name: name.into(),
            grants: BTreeMap::new(),
        }
    }

    pub fn permissions_on(&self, target: &str) -> Option<&BTreeSet<Permission>> {
        self.grants.get(target)
    }
}
