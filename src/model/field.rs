use crate::error::{ContentError, Result};
use crate::model::Id;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Field values of one container, keyed by field name.
/// Ordered so the serialized document is canonical.
pub type FieldMap = BTreeMap<String, FieldValue>;

/// Kind of a single (non-list) value; also the item kind of list fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalarKind {
    String,
    Html,
    Number,
    Boolean,
    Date,
    Node,
    Micronode,
}

impl ScalarKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScalarKind::String => "string",
            ScalarKind::Html => "html",
            ScalarKind::Number => "number",
            ScalarKind::Boolean => "boolean",
            ScalarKind::Date => "date",
            ScalarKind::Node => "node",
            ScalarKind::Micronode => "micronode",
        }
    }
}

/// Declared kind of a schema field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FieldKind {
    String,
    Html,
    Number,
    Boolean,
    Date,
    Node {
        /// Schema names a referenced item may have (empty = any)
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        allow: Vec<String>,
    },
    Micronode {
        /// Microschema names allowed in this field (empty = any)
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        allow: Vec<String>,
    },
    List {
        list_type: ScalarKind,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        allow: Vec<String>,
    },
}

impl FieldKind {
    /// Structural tag; two kinds with different tags require a type change
    pub fn type_tag(&self) -> String {
        match self {
            FieldKind::List { list_type, .. } => format!("list:{}", list_type.as_str()),
            other => other
                .scalar_kind()
                .map(|k| k.as_str().to_string())
                .unwrap_or_default(),
        }
    }

    /// The scalar kind of a non-list field
    pub fn scalar_kind(&self) -> Option<ScalarKind> {
        match self {
            FieldKind::String => Some(ScalarKind::String),
            FieldKind::Html => Some(ScalarKind::Html),
            FieldKind::Number => Some(ScalarKind::Number),
            FieldKind::Boolean => Some(ScalarKind::Boolean),
            FieldKind::Date => Some(ScalarKind::Date),
            FieldKind::Node { .. } => Some(ScalarKind::Node),
            FieldKind::Micronode { .. } => Some(ScalarKind::Micronode),
            FieldKind::List { .. } => None,
        }
    }

    pub fn allow(&self) -> &[String] {
        match self {
            FieldKind::Node { allow }
            | FieldKind::Micronode { allow }
            | FieldKind::List { allow, .. } => allow,
            _ => &[],
        }
    }

    /// Check that a value has the shape this kind declares
    pub fn validate(&self, field: &str, value: &FieldValue) -> Result<()> {
        match (self, value) {
            (FieldKind::List { list_type, allow }, FieldValue::List(items)) => {
                for item in items {
                    validate_scalar(field, *list_type, allow, item)?;
                }
                Ok(())
            }
            (FieldKind::List { .. }, other) => Err(ContentError::Validation(format!(
                "field '{}' expects a list, got {}",
                field,
                other.kind_name()
            ))),
            (kind, value) => match kind.scalar_kind() {
                Some(scalar) => validate_scalar(field, scalar, kind.allow(), value),
                None => Ok(()),
            },
        }
    }
}

fn validate_scalar(field: &str, kind: ScalarKind, allow: &[String], value: &FieldValue) -> Result<()> {
    let ok = match (kind, value) {
        (ScalarKind::String, FieldValue::String(_)) => true,
        (ScalarKind::Html, FieldValue::Html(_)) => true,
        (ScalarKind::Number, FieldValue::Number(_)) => true,
        (ScalarKind::Boolean, FieldValue::Boolean(_)) => true,
        (ScalarKind::Date, FieldValue::Date(date)) => {
            if DateTime::parse_from_rfc3339(date).is_err() {
                return Err(ContentError::Validation(format!(
                    "field '{}' has an invalid date '{}'",
                    field, date
                )));
            }
            true
        }
        (ScalarKind::Node, FieldValue::Node(uuid)) => !uuid.is_empty(),
        (ScalarKind::Micronode, FieldValue::Micronode(micronode)) => {
            if !allow.is_empty() && !allow.contains(&micronode.microschema.name) {
                return Err(ContentError::Validation(format!(
                    "field '{}' does not allow microschema '{}'",
                    field, micronode.microschema.name
                )));
            }
            true
        }
        _ => false,
    };

    if ok {
        Ok(())
    } else {
        Err(ContentError::Validation(format!(
            "field '{}' expects {}, got {}",
            field,
            kind.as_str(),
            value.kind_name()
        )))
    }
}

/// One field declaration in a schema or microschema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSchema {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default)]
    pub required: bool,
    pub kind: FieldKind,
    /// Value set on existing content when this field is added by a migration
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_value: Option<FieldValue>,
}

impl FieldSchema {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            label: None,
            required: false,
            kind,
            default_value: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_default(mut self, value: FieldValue) -> Self {
        self.default_value = Some(value);
        self
    }
}

/// Reference from a micronode value to the microschema version it was authored against
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MicroschemaRef {
    pub name: String,
    pub version_uuid: Id,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Micronode {
    pub microschema: MicroschemaRef,
    pub fields: FieldMap,
}

/// A typed field value; serialized as `{"type": ..., "value": ...}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum FieldValue {
    String(String),
    Html(String),
    Number(serde_json::Number),
    Boolean(bool),
    /// RFC 3339 timestamp
    Date(String),
    /// Uuid of the referenced content item
    Node(Id),
    Micronode(Micronode),
    List(Vec<FieldValue>),
}

impl FieldValue {
    pub fn string(value: impl Into<String>) -> Self {
        FieldValue::String(value.into())
    }

    pub fn number(value: i64) -> Self {
        FieldValue::Number(serde_json::Number::from(value))
    }

    pub fn date(value: DateTime<Utc>) -> Self {
        FieldValue::Date(value.to_rfc3339())
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            FieldValue::String(_) => "string",
            FieldValue::Html(_) => "html",
            FieldValue::Number(_) => "number",
            FieldValue::Boolean(_) => "boolean",
            FieldValue::Date(_) => "date",
            FieldValue::Node(_) => "node",
            FieldValue::Micronode(_) => "micronode",
            FieldValue::List(_) => "list",
        }
    }

    /// Convert this value for a field whose kind changed.
    /// Returns `None` when the value has no representation in the new kind.
    pub fn convert_to(&self, kind: &FieldKind) -> Option<FieldValue> {
        match kind {
            FieldKind::List { list_type, .. } => match self {
                FieldValue::List(items) => Some(FieldValue::List(
                    items
                        .iter()
                        .filter_map(|item| item.convert_scalar(*list_type))
                        .collect(),
                )),
                other => other
                    .convert_scalar(*list_type)
                    .map(|value| FieldValue::List(vec![value])),
            },
            scalar => {
                let target = scalar.scalar_kind()?;
                match self {
                    FieldValue::List(items) => {
                        items.iter().find_map(|item| item.convert_scalar(target))
                    }
                    other => other.convert_scalar(target),
                }
            }
        }
    }

    fn convert_scalar(&self, target: ScalarKind) -> Option<FieldValue> {
        match (self, target) {
            (FieldValue::String(s) | FieldValue::Html(s), ScalarKind::String) => {
                Some(FieldValue::String(s.clone()))
            }
            (FieldValue::String(s) | FieldValue::Html(s), ScalarKind::Html) => {
                Some(FieldValue::Html(s.clone()))
            }
            (FieldValue::String(s) | FieldValue::Html(s), ScalarKind::Number) => parse_number(s),
            (FieldValue::String(s) | FieldValue::Html(s), ScalarKind::Boolean) => {
                match s.trim().to_ascii_lowercase().as_str() {
                    "true" => Some(FieldValue::Boolean(true)),
                    "false" => Some(FieldValue::Boolean(false)),
                    _ => None,
                }
            }
            (FieldValue::String(s) | FieldValue::Html(s), ScalarKind::Date) => {
                DateTime::parse_from_rfc3339(s.trim())
                    .ok()
                    .map(|d| FieldValue::Date(d.with_timezone(&Utc).to_rfc3339()))
            }
            (FieldValue::Number(n), ScalarKind::String) => Some(FieldValue::String(n.to_string())),
            (FieldValue::Number(n), ScalarKind::Html) => Some(FieldValue::Html(n.to_string())),
            (FieldValue::Number(n), ScalarKind::Number) => Some(FieldValue::Number(n.clone())),
            (FieldValue::Number(n), ScalarKind::Boolean) => match n.as_f64() {
                Some(v) if v == 1.0 => Some(FieldValue::Boolean(true)),
                Some(v) if v == 0.0 => Some(FieldValue::Boolean(false)),
                _ => None,
            },
            (FieldValue::Number(n), ScalarKind::Date) => n
                .as_i64()
                .and_then(DateTime::from_timestamp_millis)
                .map(FieldValue::date),
            (FieldValue::Boolean(b), ScalarKind::String) => Some(FieldValue::String(b.to_string())),
            (FieldValue::Boolean(b), ScalarKind::Html) => Some(FieldValue::Html(b.to_string())),
            (FieldValue::Boolean(b), ScalarKind::Number) => Some(FieldValue::number(*b as i64)),
            (FieldValue::Boolean(b), ScalarKind::Boolean) => Some(FieldValue::Boolean(*b)),
            (FieldValue::Date(d), ScalarKind::String) => Some(FieldValue::String(d.clone())),
            (FieldValue::Date(d), ScalarKind::Html) => Some(FieldValue::Html(d.clone())),
            (FieldValue::Date(d), ScalarKind::Date) => Some(FieldValue::Date(d.clone())),
            (FieldValue::Date(d), ScalarKind::Number) => DateTime::parse_from_rfc3339(d)
                .ok()
                .map(|d| FieldValue::number(d.timestamp_millis())),
            (FieldValue::Node(uuid), ScalarKind::Node) => Some(FieldValue::Node(uuid.clone())),
            (FieldValue::Micronode(m), ScalarKind::Micronode) => {
                Some(FieldValue::Micronode(m.clone()))
            }
            _ => None,
        }
    }
}

fn parse_number(raw: &str) -> Option<FieldValue> {
    let raw = raw.trim();
    if let Ok(int) = raw.parse::<i64>() {
        return Some(FieldValue::number(int));
    }
    raw.parse::<f64>()
        .ok()
        .and_then(serde_json::Number::from_f64)
        .map(FieldValue::Number)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_value_wire_format() {
        let json = serde_json::to_value(FieldValue::string("hello")).unwrap();
        assert_eq!(json, serde_json::json!({"type": "string", "value": "hello"}));

        let kind: FieldKind =
            serde_json::from_value(serde_json::json!({"type": "list", "list_type": "number"})).unwrap();
        assert_eq!(
            kind,
            FieldKind::List {
                list_type: ScalarKind::Number,
                allow: vec![]
            }
        );
    }

    #[test]
    fn test_validate_rejects_wrong_kind() {
        let err = FieldKind::Number
            .validate("age", &FieldValue::string("old"))
            .unwrap_err();
        assert!(matches!(err, ContentError::Validation(_)));

        let list = FieldKind::List {
            list_type: ScalarKind::String,
            allow: vec![],
        };
        assert!(list
            .validate("tags", &FieldValue::List(vec![FieldValue::string("a")]))
            .is_ok());
        assert!(list
            .validate("tags", &FieldValue::List(vec![FieldValue::number(1)]))
            .is_err());
    }

    #[test]
    fn test_micronode_allow_list() {
        let kind = FieldKind::Micronode {
            allow: vec!["vcard".to_string()],
        };
        let value = FieldValue::Micronode(Micronode {
            microschema: MicroschemaRef {
                name: "geo".to_string(),
                version_uuid: "v1".to_string(),
            },
            fields: FieldMap::new(),
        });
        assert!(kind.validate("address", &value).is_err());
    }

    #[test]
    fn test_conversions() {
        assert_eq!(
            FieldValue::string("42").convert_to(&FieldKind::Number),
            Some(FieldValue::number(42))
        );
        assert_eq!(FieldValue::string("abc").convert_to(&FieldKind::Number), None);
        assert_eq!(
            FieldValue::number(1).convert_to(&FieldKind::Boolean),
            Some(FieldValue::Boolean(true))
        );
        assert_eq!(
            FieldValue::Boolean(false).convert_to(&FieldKind::String),
            Some(FieldValue::string("false"))
        );
        assert_eq!(
            FieldValue::Node("n1".into()).convert_to(&FieldKind::Number),
            None
        );
    }

    #[test]
    fn test_list_conversions() {
        let to_list = FieldKind::List {
            list_type: ScalarKind::String,
            allow: vec![],
        };
        assert_eq!(
            FieldValue::number(7).convert_to(&to_list),
            Some(FieldValue::List(vec![FieldValue::string("7")]))
        );

        let list = FieldValue::List(vec![FieldValue::string("x"), FieldValue::string("3")]);
        assert_eq!(list.convert_to(&FieldKind::Number), Some(FieldValue::number(3)));
    }

    #[test]
    fn test_type_tag() {
        assert_eq!(FieldKind::String.type_tag(), "string");
        assert_eq!(
            FieldKind::List {
                list_type: ScalarKind::Node,
                allow: vec![]
            }
            .type_tag(),
            "list:node"
        );
        assert_eq!(FieldKind::Node { allow: vec!["a".into()] }.type_tag(), "node");
    }
}
