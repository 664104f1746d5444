use crate::error::{ContentError, Result};
use crate::model::{FieldMap, FieldValue, Id, SchemaChange};
use crate::store::Graph;

/// Rewrites stored field values to follow schema changes
pub struct FieldMigrator;

impl FieldMigrator {
    /// Apply a change list to a field document
    pub fn migrate(fields: &FieldMap, changes: &[SchemaChange]) -> FieldMap {
        let mut result = fields.clone();
        for change in changes {
            Self::migrate_change(&mut result, change);
        }
        result
    }

    fn migrate_change(fields: &mut FieldMap, change: &SchemaChange) {
        match change {
            SchemaChange::AddField { field, .. } => match &field.default_value {
                Some(default) => {
                    fields.insert(field.name.clone(), default.clone());
                }
                None => {
                    fields.remove(&field.name);
                }
            },
            SchemaChange::RemoveField { field } => {
                fields.remove(field);
            }
            SchemaChange::ChangeFieldType { field, new_field } => {
                if let Some(value) = fields.remove(field) {
                    match value.convert_to(&new_field.kind) {
                        Some(converted) => {
                            fields.insert(field.clone(), converted);
                        }
                        None => log::debug!(
                            "Dropping value of '{}': no {} representation",
                            field,
                            new_field.kind.type_tag()
                        ),
                    }
                }
            }
            SchemaChange::RenameField { field, new_name } => {
                if let Some(value) = fields.remove(field) {
                    fields.insert(new_name.clone(), value);
                }
            }
            SchemaChange::UpdateField { .. }
            | SchemaChange::UpdateFieldOrder { .. }
            | SchemaChange::UpdateSchema { .. } => {}
        }
    }

    /// Migrate every micronode authored against `from_version` to `to_version`.
    /// Returns `None` when the document holds no such micronode.
    pub fn migrate_micronodes(
        fields: &FieldMap,
        from_version: &str,
        to_version: &str,
        changes: &[SchemaChange],
    ) -> Option<FieldMap> {
        let mut touched = false;
        let migrated: FieldMap = fields
            .iter()
            .map(|(name, value)| {
                let value = Self::migrate_micronode_value(value, from_version, to_version, changes, &mut touched);
                (name.clone(), value)
            })
            .collect();
        touched.then_some(migrated)
    }

    fn migrate_micronode_value(
        value: &FieldValue,
        from_version: &str,
        to_version: &str,
        changes: &[SchemaChange],
        touched: &mut bool,
    ) -> FieldValue {
        match value {
            FieldValue::Micronode(micronode) if micronode.microschema.version_uuid == from_version => {
                *touched = true;
                let mut micronode = micronode.clone();
                micronode.fields = Self::migrate(&micronode.fields, changes);
                micronode.microschema.version_uuid = to_version.to_string();
                FieldValue::Micronode(micronode)
            }
            FieldValue::List(items) => FieldValue::List(
                items
                    .iter()
                    .map(|item| Self::migrate_micronode_value(item, from_version, to_version, changes, touched))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    /// Whether a document holds a micronode authored against `version_uuid`
    pub fn references_microschema(fields: &FieldMap, version_uuid: &str) -> bool {
        fn check(value: &FieldValue, version_uuid: &str) -> bool {
            match value {
                FieldValue::Micronode(m) => m.microschema.version_uuid == version_uuid,
                FieldValue::List(items) => items.iter().any(|item| check(item, version_uuid)),
                _ => false,
            }
        }
        fields.values().any(|value| check(value, version_uuid))
    }
}

/// Concatenated change lists leading from `from_version` to `to_version`
/// along the version chain of one schema.
pub fn change_chain(graph: &Graph, from_version: &Id, to_version: &Id) -> Result<Vec<SchemaChange>> {
    let mut steps = Vec::new();
    let mut current = graph.schema_version(to_version)?;

    while &current.uuid != from_version {
        steps.push(current.changes.clone());
        let previous = current.previous.as_ref().ok_or_else(|| {
            ContentError::Migration(format!(
                "schema version {} does not descend from {}",
                to_version, from_version
            ))
        })?;
        current = graph.schema_version(previous)?;
    }

    steps.reverse();
    Ok(steps.into_iter().flatten().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        FieldKind, FieldSchema, Micronode, MicroschemaRef, SchemaKind, SchemaModel, SchemaVersion,
    };

    fn fields(pairs: &[(&str, FieldValue)]) -> FieldMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_add_field_uses_default() {
        let changes = vec![SchemaChange::AddField {
            field: FieldSchema::new("age", FieldKind::Number).with_default(FieldValue::number(18)),
            after: None,
        }];
        let migrated = FieldMigrator::migrate(&fields(&[("name", FieldValue::string("Ada"))]), &changes);
        assert_eq!(migrated.get("age"), Some(&FieldValue::number(18)));
        assert_eq!(migrated.get("name"), Some(&FieldValue::string("Ada")));
    }

    #[test]
    fn test_type_change_converts_or_drops() {
        let changes = vec![
            SchemaChange::ChangeFieldType {
                field: "count".into(),
                new_field: FieldSchema::new("count", FieldKind::Number),
            },
            SchemaChange::ChangeFieldType {
                field: "note".into(),
                new_field: FieldSchema::new("note", FieldKind::Number),
            },
        ];
        let migrated = FieldMigrator::migrate(
            &fields(&[
                ("count", FieldValue::string("12")),
                ("note", FieldValue::string("n/a")),
            ]),
            &changes,
        );
        assert_eq!(migrated.get("count"), Some(&FieldValue::number(12)));
        assert!(!migrated.contains_key("note"));
    }

    #[test]
    fn test_rename_and_remove() {
        let changes = vec![
            SchemaChange::RenameField {
                field: "name".into(),
                new_name: "title".into(),
            },
            SchemaChange::RemoveField { field: "old".into() },
        ];
        let migrated = FieldMigrator::migrate(
            &fields(&[("name", FieldValue::string("x")), ("old", FieldValue::Boolean(true))]),
            &changes,
        );
        assert_eq!(migrated, fields(&[("title", FieldValue::string("x"))]));
    }

    #[test]
    fn test_micronodes_in_lists_are_migrated() {
        let micronode = |version: &str| {
            FieldValue::Micronode(Micronode {
                microschema: MicroschemaRef {
                    name: "geo".into(),
                    version_uuid: version.into(),
                },
                fields: fields(&[("lat", FieldValue::string("1.5"))]),
            })
        };
        let doc = fields(&[("places", FieldValue::List(vec![micronode("v1"), micronode("v9")]))]);
        assert!(FieldMigrator::references_microschema(&doc, "v1"));

        let changes = vec![SchemaChange::ChangeFieldType {
            field: "lat".into(),
            new_field: FieldSchema::new("lat", FieldKind::Number),
        }];
        let migrated = FieldMigrator::migrate_micronodes(&doc, "v1", "v2", &changes).unwrap();
        assert!(!FieldMigrator::references_microschema(&migrated, "v1"));
        assert!(FieldMigrator::references_microschema(&migrated, "v2"));
        assert!(FieldMigrator::references_microschema(&migrated, "v9"));

        assert!(FieldMigrator::migrate_micronodes(&doc, "v5", "v6", &changes).is_none());
    }

    #[test]
    fn test_change_chain_spans_versions() {
        let mut graph = Graph::new();
        let model = SchemaModel::new("s");
        let add = |name: &str| SchemaChange::AddField {
            field: FieldSchema::new(name, FieldKind::String),
            after: None,
        };

        let v1 = SchemaVersion::new("c".into(), SchemaKind::Schema, 1, &model, None, vec![]).unwrap();
        let v2 = SchemaVersion::new("c".into(), SchemaKind::Schema, 2, &model, Some(v1.uuid.clone()), vec![add("a")])
            .unwrap();
        let v3 = SchemaVersion::new("c".into(), SchemaKind::Schema, 3, &model, Some(v2.uuid.clone()), vec![add("b")])
            .unwrap();
        let (u1, u3) = (v1.uuid.clone(), v3.uuid.clone());
        for v in [v1, v2, v3] {
            graph.schema_versions.insert(v.uuid.clone(), v);
        }

        let chain = change_chain(&graph, &u1, &u3).unwrap();
        assert_eq!(chain, vec![add("a"), add("b")]);
        assert!(change_chain(&graph, &u3, &u1).is_err());
    }
}
