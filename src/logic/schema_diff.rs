use crate::error::{ContentError, Result};
use crate::model::{FieldSchema, SchemaChange, SchemaModel};

/// Computes and applies structural diffs between schema definitions
pub struct SchemaDiffEngine;

impl SchemaDiffEngine {
    /// Ordered change list that turns `source` into `target`.
    ///
    /// Deterministic: removals in source order, then additions and field
    /// replacements in target order, then at most one reorder and one
    /// schema-level update. Renames are never detected; a renamed field shows
    /// up as a removal plus an addition.
    pub fn diff(source: &SchemaModel, target: &SchemaModel) -> Vec<SchemaChange> {
        let mut changes = Vec::new();
        // Tracks the field order `apply` will produce so far
        let mut order: Vec<&str> = source.field_names();

        for field in &source.fields {
            if target.field(&field.name).is_none() {
                changes.push(SchemaChange::RemoveField {
                    field: field.name.clone(),
                });
                order.retain(|name| *name != field.name);
            }
        }

        let mut previous: Option<&str> = None;
        for field in &target.fields {
            match source.field(&field.name) {
                None => {
                    changes.push(SchemaChange::AddField {
                        field: field.clone(),
                        after: previous.map(str::to_string),
                    });
                    let at = previous
                        .and_then(|p| order.iter().position(|name| *name == p))
                        .map(|i| i + 1)
                        .unwrap_or(order.len());
                    order.insert(at, &field.name);
                }
                Some(existing) if existing.kind.type_tag() != field.kind.type_tag() => {
                    changes.push(SchemaChange::ChangeFieldType {
                        field: field.name.clone(),
                        new_field: field.clone(),
                    });
                }
                Some(existing) if existing != field => {
                    changes.push(SchemaChange::UpdateField {
                        field: field.name.clone(),
                        new_field: field.clone(),
                    });
                }
                Some(_) => {}
            }
            previous = Some(&field.name);
        }

        if order != target.field_names() {
            changes.push(SchemaChange::UpdateFieldOrder {
                order: target.fields.iter().map(|f| f.name.clone()).collect(),
            });
        }

        if source.name != target.name
            || source.description != target.description
            || source.display_field != target.display_field
        {
            changes.push(SchemaChange::UpdateSchema {
                name: target.name.clone(),
                description: target.description.clone(),
                display_field: target.display_field.clone(),
            });
        }

        changes
    }

    /// Apply a change list in order, producing a new definition
    pub fn apply(schema: &SchemaModel, changes: &[SchemaChange]) -> Result<SchemaModel> {
        let mut result = schema.clone();
        for change in changes {
            Self::apply_change(&mut result, change)?;
        }
        Ok(result)
    }

    /// Apply one change in place. Fails with `SchemaChange` naming the field
    /// when the change does not fit the current definition.
    pub fn apply_change(schema: &mut SchemaModel, change: &SchemaChange) -> Result<()> {
        match change {
            SchemaChange::AddField { field, after } => {
                if schema.field(&field.name).is_some() {
                    return Err(ContentError::schema_change(&field.name, "field already exists"));
                }
                let at = match after {
                    Some(after) => schema.position(after).map(|i| i + 1).ok_or_else(|| {
                        ContentError::schema_change(
                            &field.name,
                            format!("cannot insert after unknown field '{}'", after),
                        )
                    })?,
                    None => schema.fields.len(),
                };
                schema.fields.insert(at, field.clone());
            }
            SchemaChange::RemoveField { field } => {
                let at = Self::require_field(schema, field)?;
                schema.fields.remove(at);
            }
            SchemaChange::ChangeFieldType { field, new_field } => {
                let at = Self::require_field(schema, field)?;
                Self::require_same_name(field, &new_field.name)?;
                schema.fields[at] = new_field.clone();
            }
            SchemaChange::UpdateField { field, new_field } => {
                let at = Self::require_field(schema, field)?;
                Self::require_same_name(field, &new_field.name)?;
                if schema.fields[at].kind.type_tag() != new_field.kind.type_tag() {
                    return Err(ContentError::schema_change(
                        field,
                        "kind differs; use CHANGE_FIELD_TYPE",
                    ));
                }
                schema.fields[at] = new_field.clone();
            }
            SchemaChange::RenameField { field, new_name } => {
                let at = Self::require_field(schema, field)?;
                if schema.field(new_name).is_some() {
                    return Err(ContentError::schema_change(
                        field,
                        format!("cannot rename to existing field '{}'", new_name),
                    ));
                }
                schema.fields[at].name = new_name.clone();
                if schema.display_field.as_deref() == Some(field.as_str()) {
                    schema.display_field = Some(new_name.clone());
                }
            }
            SchemaChange::UpdateFieldOrder { order } => {
                if order.len() != schema.fields.len() {
                    let missing = schema
                        .fields
                        .iter()
                        .find(|f| !order.contains(&f.name))
                        .map(|f| f.name.clone())
                        .unwrap_or_default();
                    return Err(ContentError::schema_change(
                        missing,
                        "field order is not a permutation of the current fields",
                    ));
                }
                let mut reordered: Vec<FieldSchema> = Vec::with_capacity(order.len());
                for (i, name) in order.iter().enumerate() {
                    let at = Self::require_field(schema, name)?;
                    if order[..i].contains(name) {
                        return Err(ContentError::schema_change(name, "listed twice in field order"));
                    }
                    reordered.push(schema.fields[at].clone());
                }
                schema.fields = reordered;
            }
            SchemaChange::UpdateSchema {
                name,
                description,
                display_field,
            } => {
                schema.name = name.clone();
                schema.description = description.clone();
                schema.display_field = display_field.clone();
            }
        }
        Ok(())
    }

    fn require_field(schema: &SchemaModel, field: &str) -> Result<usize> {
        schema
            .position(field)
            .ok_or_else(|| ContentError::schema_change(field, "field does not exist"))
    }

    fn require_same_name(field: &str, new_name: &str) -> Result<()> {
        if field != new_name {
            return Err(ContentError::schema_change(
                field,
                format!("replacement is named '{}'; use RENAME_FIELD", new_name),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FieldKind, FieldValue};

    fn person() -> SchemaModel {
        SchemaModel::new("person")
            .with_field(FieldSchema::new("name", FieldKind::String).required())
            .with_field(FieldSchema::new("bio", FieldKind::Html))
    }

    #[test]
    fn test_add_field_diff() {
        let source = person();
        let target = person().with_field(
            FieldSchema::new("age", FieldKind::Number).with_default(FieldValue::number(0)),
        );

        let changes = SchemaDiffEngine::diff(&source, &target);
        assert_eq!(changes.len(), 1);
        assert!(matches!(
            &changes[0],
            SchemaChange::AddField { field, after } if field.name == "age" && after.as_deref() == Some("bio")
        ));
        assert_eq!(SchemaDiffEngine::apply(&source, &changes).unwrap(), target);
    }

    #[test]
    fn test_identical_schemas_have_empty_diff() {
        assert!(SchemaDiffEngine::diff(&person(), &person()).is_empty());
    }

    #[test]
    fn test_diff_is_deterministic() {
        let source = person();
        let mut target = SchemaModel::new("human")
            .with_field(FieldSchema::new("bio", FieldKind::String))
            .with_field(FieldSchema::new("email", FieldKind::String))
            .with_field(FieldSchema::new("name", FieldKind::String).with_label("Full name"));
        target.display_field = Some("name".to_string());

        let first = SchemaDiffEngine::diff(&source, &target);
        let second = SchemaDiffEngine::diff(&source, &target);
        assert_eq!(first, second);

        assert!(matches!(first[0], SchemaChange::ChangeFieldType { ref field, .. } if field == "bio"));
        assert!(matches!(first[1], SchemaChange::AddField { .. }));
        assert!(matches!(first[2], SchemaChange::UpdateField { ref field, .. } if field == "name"));
        assert!(matches!(first[3], SchemaChange::UpdateFieldOrder { .. }));
        assert!(matches!(first[4], SchemaChange::UpdateSchema { .. }));
        assert_eq!(SchemaDiffEngine::apply(&source, &first).unwrap(), target);
    }

    #[test]
    fn test_remove_and_reorder() {
        let source = person().with_field(FieldSchema::new("age", FieldKind::Number));
        let target = SchemaModel::new("person")
            .with_field(FieldSchema::new("age", FieldKind::Number))
            .with_field(FieldSchema::new("name", FieldKind::String).required());

        let changes = SchemaDiffEngine::diff(&source, &target);
        assert_eq!(
            changes[0],
            SchemaChange::RemoveField {
                field: "bio".to_string()
            }
        );
        assert_eq!(SchemaDiffEngine::apply(&source, &changes).unwrap(), target);
    }

    #[test]
    fn test_apply_errors_name_the_field() {
        let schema = person();

        let err = SchemaDiffEngine::apply(
            &schema,
            &[SchemaChange::RemoveField {
                field: "missing".to_string(),
            }],
        )
        .unwrap_err();
        assert!(matches!(err, ContentError::SchemaChange { ref field, .. } if field == "missing"));

        let err = SchemaDiffEngine::apply(
            &schema,
            &[SchemaChange::AddField {
                field: FieldSchema::new("name", FieldKind::String),
                after: None,
            }],
        )
        .unwrap_err();
        assert!(matches!(err, ContentError::SchemaChange { ref field, .. } if field == "name"));

        let err = SchemaDiffEngine::apply(
            &schema,
            &[SchemaChange::UpdateField {
                field: "bio".to_string(),
                new_field: FieldSchema::new("bio", FieldKind::Number),
            }],
        )
        .unwrap_err();
        assert!(matches!(err, ContentError::SchemaChange { ref field, .. } if field == "bio"));

        let err = SchemaDiffEngine::apply(
            &schema,
            &[SchemaChange::UpdateFieldOrder {
                order: vec!["name".to_string(), "name".to_string()],
            }],
        )
        .unwrap_err();
        assert!(matches!(err, ContentError::SchemaChange { ref field, .. } if field == "name"));
    }

    #[test]
    fn test_rename_field() {
        let mut schema = person();
        schema.display_field = Some("name".to_string());

        let renamed = SchemaDiffEngine::apply(
            &schema,
            &[SchemaChange::RenameField {
                field: "name".to_string(),
                new_name: "full_name".to_string(),
            }],
        )
        .unwrap();
        assert_eq!(renamed.field_names(), vec!["full_name", "bio"]);
        assert_eq!(renamed.display_field.as_deref(), Some("full_name"));

        let err = SchemaDiffEngine::apply(
            &schema,
            &[SchemaChange::RenameField {
                field: "name".to_string(),
                new_name: "bio".to_string(),
            }],
        );
        assert!(err.is_err());
    }
}
