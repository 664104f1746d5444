use serde::{Deserialize, Serialize};

use crate::model::FieldSchema;

/// One atomic structural operation between two schema versions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SchemaChange {
    /// Insert a field after `after` (at the end when absent)
    AddField {
        field: FieldSchema,
        #[serde(skip_serializing_if = "Option::is_none")]
        after: Option<String>,
    },
    RemoveField {
        field: String,
    },
    /// Replace a field with a declaration of a different kind; content values are converted
    ChangeFieldType {
        field: String,
        new_field: FieldSchema,
    },
    /// Replace the declared properties of a field without changing its kind
    UpdateField {
        field: String,
        new_field: FieldSchema,
    },
    RenameField {
        field: String,
        new_name: String,
    },
    UpdateFieldOrder {
        order: Vec<String>,
    },
    /// Replace the schema-level properties
    UpdateSchema {
        name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        description: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        display_field: Option<String>,
    },
}
