use crate::error::{ContentError, Result};
use crate::model::{checksum, generate_id, FieldSchema, Id, SchemaChange};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaKind {
    Schema,
    Microschema,
}

impl SchemaKind {
    pub fn all() -> [SchemaKind; 2] {
        [SchemaKind::Schema, SchemaKind::Microschema]
    }
}

impl std::fmt::Display for SchemaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SchemaKind::Schema => write!(f, "schema"),
            SchemaKind::Microschema => write!(f, "microschema"),
        }
    }
}

/// Structural definition of a schema or microschema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaModel {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Name of the string field used as the display name of content
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_field: Option<String>,
    /// Ordered field declarations
    pub fields: Vec<FieldSchema>,
}

impl SchemaModel {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            display_field: None,
            fields: Vec::new(),
        }
    }

    pub fn with_field(mut self, field: FieldSchema) -> Self {
        self.fields.push(field);
        self
    }

    pub fn field(&self, name: &str) -> Option<&FieldSchema> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }
}

/// Named owner of a version chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaContainer {
    pub uuid: Id,
    pub name: String,
    pub kind: SchemaKind,
    pub latest_version: Id,
    pub created_at: DateTime<Utc>,
}

/// Version reference as carried in events and micronode values
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaRef {
    pub uuid: Id,
    pub name: String,
    pub version: u32,
}

/// Immutable definition of one schema version.
///
/// `changes` is the ordered change list that turns the previous version into
/// this one; it is empty for the first version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaVersion {
    pub uuid: Id,
    pub container_uuid: Id,
    pub kind: SchemaKind,
    pub name: String,
    pub version: u32,
    /// Raw serialized model
    pub json: String,
    pub checksum: String,
    pub previous: Option<Id>,
    pub next: Option<Id>,
    pub changes: Vec<SchemaChange>,
    pub created_at: DateTime<Utc>,
}

impl SchemaVersion {
    pub fn new(
        container_uuid: Id,
        kind: SchemaKind,
        version: u32,
        model: &SchemaModel,
        previous: Option<Id>,
        changes: Vec<SchemaChange>,
    ) -> Result<Self> {
        let json = serde_json::to_string(model)?;
        Ok(Self {
            uuid: generate_id(),
            container_uuid,
            kind,
            name: model.name.clone(),
            version,
            checksum: checksum(&json),
            json,
            previous,
            next: None,
            changes,
            created_at: Utc::now(),
        })
    }

    /// Parse the raw definition. Callers normally go through the schema cache.
    pub fn parse_model(&self) -> Result<SchemaModel> {
        serde_json::from_str(&self.json).map_err(|e| {
            ContentError::Serialization(format!(
                "schema {} v{} has an unreadable definition: {}",
                self.name, self.version, e
            ))
        })
    }

    /// Replace the stored definition in place, keeping the version number
    pub fn set_model(&mut self, model: &SchemaModel) -> Result<()> {
        let json = serde_json::to_string(model)?;
        self.name = model.name.clone();
        self.checksum = checksum(&json);
        self.json = json;
        Ok(())
    }

    pub fn reference(&self) -> SchemaRef {
        SchemaRef {
            uuid: self.uuid.clone(),
            name: self.name.clone(),
            version: self.version,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FieldKind;

    #[test]
    fn test_version_round_trips_model() {
        let model = SchemaModel::new("article")
            .with_field(FieldSchema::new("title", FieldKind::String).required());
        let version =
            SchemaVersion::new("c1".to_string(), SchemaKind::Schema, 1, &model, None, vec![]).unwrap();

        assert_eq!(version.name, "article");
        assert_eq!(version.parse_model().unwrap(), model);
        assert_eq!(version.reference().version, 1);
    }

    #[test]
    fn test_set_model_updates_checksum() {
        let model = SchemaModel::new("article");
        let mut version =
            SchemaVersion::new("c1".to_string(), SchemaKind::Schema, 1, &model, None, vec![]).unwrap();
        let before = version.checksum.clone();

        let changed = SchemaModel::new("article")
            .with_field(FieldSchema::new("teaser", FieldKind::Html));
        version.set_model(&changed).unwrap();

        assert_ne!(version.checksum, before);
        assert_eq!(version.version, 1);
    }
}
