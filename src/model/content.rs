use crate::error::{ContentError, Result};
use crate::model::{checksum, generate_id, ContainerType, FieldMap, FieldValue, Id};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Structural node; its payload lives in field containers reached through edges
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentItem {
    pub uuid: Id,
    pub project_uuid: Id,
    pub schema_container_uuid: Id,
    pub created_at: DateTime<Utc>,
}

impl ContentItem {
    pub fn new(project_uuid: Id, schema_container_uuid: Id) -> Self {
        Self {
            uuid: generate_id(),
            project_uuid,
            schema_container_uuid,
            created_at: Utc::now(),
        }
    }
}

/// Dotted container version `<major>.<minor>`.
/// Minor increments on draft edits, major on publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContainerVersion {
    pub major: u32,
    pub minor: u32,
}

impl ContainerVersion {
    pub const INITIAL_DRAFT: ContainerVersion = ContainerVersion { major: 0, minor: 1 };

    pub fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    pub fn next_draft(&self) -> Self {
        Self {
            major: self.major,
            minor: self.minor + 1,
        }
    }

    pub fn next_published(&self) -> Self {
        Self {
            major: self.major + 1,
            minor: 0,
        }
    }

    pub fn is_published(&self) -> bool {
        self.minor == 0 && self.major > 0
    }
}

impl fmt::Display for ContainerVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl FromStr for ContainerVersion {
    type Err = ContentError;

    fn from_str(s: &str) -> Result<Self> {
        let (major, minor) = s
            .split_once('.')
            .ok_or_else(|| ContentError::Validation(format!("invalid version '{}'", s)))?;
        let parse = |part: &str| {
            part.parse::<u32>()
                .map_err(|_| ContentError::Validation(format!("invalid version '{}'", s)))
        };
        Ok(Self {
            major: parse(major)?,
            minor: parse(minor)?,
        })
    }
}

impl TryFrom<String> for ContainerVersion {
    type Error = ContentError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<ContainerVersion> for String {
    fn from(version: ContainerVersion) -> Self {
        version.to_string()
    }
}

/// One version of an item's field values in one language
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldContainer {
    pub uuid: Id,
    pub item_uuid: Id,
    pub language_tag: String,
    pub version: ContainerVersion,
    /// Schema version the values were authored against
    pub schema_version_uuid: Id,
    pub fields: FieldMap,
    /// Checksum of the serialized field document
    pub checksum: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub editor: Option<String>,
    pub edited_at: DateTime<Utc>,
}

impl FieldContainer {
    pub fn new(
        item_uuid: Id,
        language_tag: String,
        version: ContainerVersion,
        schema_version_uuid: Id,
        fields: FieldMap,
        editor: Option<String>,
    ) -> Result<Self> {
        let checksum = document_checksum(&fields)?;
        Ok(Self {
            uuid: generate_id(),
            item_uuid,
            language_tag,
            version,
            schema_version_uuid,
            fields,
            checksum,
            editor,
            edited_at: Utc::now(),
        })
    }

    /// Serialized field-value document
    pub fn document(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.fields)?)
    }
}

pub fn document_checksum(fields: &FieldMap) -> Result<String> {
    Ok(checksum(&serde_json::to_string(fields)?))
}

/// Address of a live container pointer: `(item, branch, language, type)`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerEdge {
    pub item_uuid: Id,
    pub branch_uuid: Id,
    pub language_tag: String,
    #[serde(rename = "type")]
    pub container_type: ContainerType,
}

impl ContainerEdge {
    pub fn new(item_uuid: &str, branch_uuid: &str, language_tag: &str, container_type: ContainerType) -> Self {
        Self {
            item_uuid: item_uuid.to_string(),
            branch_uuid: branch_uuid.to_string(),
            language_tag: language_tag.to_string(),
            container_type,
        }
    }

    pub fn with_type(&self, container_type: ContainerType) -> Self {
        Self {
            container_type,
            ..self.clone()
        }
    }
}

/// Version chain neighbours of a container.
/// The chain is strict per branch: a container shared by several branches may
/// have one successor on each of them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VersionLink {
    pub previous: Option<Id>,
    pub next: BTreeMap<Id, Id>,
}

/// Requested field edits; unspecified fields are copied from the current draft
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EditorialChange {
    /// `None` clears the field
    pub fields: BTreeMap<String, Option<FieldValue>>,
    /// Draft version the editor based the change on
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_version: Option<ContainerVersion>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub editor: Option<String>,
}

impl EditorialChange {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, field: impl Into<String>, value: FieldValue) -> Self {
        self.fields.insert(field.into(), Some(value));
        self
    }

    pub fn clear(mut self, field: impl Into<String>) -> Self {
        self.fields.insert(field.into(), None);
        self
    }

    pub fn expect_version(mut self, version: ContainerVersion) -> Self {
        self.expected_version = Some(version);
        self
    }

    pub fn by(mut self, editor: impl Into<String>) -> Self {
        self.editor = Some(editor.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_bumps() {
        let v = ContainerVersion::INITIAL_DRAFT;
        assert_eq!(v.to_string(), "0.1");
        assert_eq!(v.next_draft().to_string(), "0.2");
        assert_eq!(v.next_published().to_string(), "1.0");
        assert!(v.next_published().is_published());
        assert!(!v.is_published());
    }

    #[test]
    fn test_version_serializes_as_dotted_string() {
        let json = serde_json::to_string(&ContainerVersion::new(3, 2)).unwrap();
        assert_eq!(json, "\"3.2\"");
        let parsed: ContainerVersion = serde_json::from_str("\"10.0\"").unwrap();
        assert_eq!(parsed, ContainerVersion::new(10, 0));
        assert!("1-2".parse::<ContainerVersion>().is_err());
    }

    #[test]
    fn test_edge_wire_format() {
        let edge = ContainerEdge::new("i1", "b1", "en", ContainerType::Draft);
        let json = serde_json::to_value(&edge).unwrap();
        assert_eq!(json["branchUuid"], "b1");
        assert_eq!(json["languageTag"], "en");
        assert_eq!(json["type"], "DRAFT");
    }

    #[test]
    fn test_identical_documents_share_checksum() {
        let mut fields = FieldMap::new();
        fields.insert("name".to_string(), FieldValue::string("Ada"));
        let a = FieldContainer::new(
            "i1".into(),
            "en".into(),
            ContainerVersion::INITIAL_DRAFT,
            "s1".into(),
            fields.clone(),
            None,
        )
        .unwrap();
        let b = FieldContainer::new(
            "i1".into(),
            "en".into(),
            ContainerVersion::new(0, 2),
            "s1".into(),
            fields,
            None,
        )
        .unwrap();
        assert_ne!(a.uuid, b.uuid);
        assert_eq!(a.checksum, b.checksum);
    }
}
