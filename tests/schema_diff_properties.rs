use content_graph::{FieldKind, FieldSchema, ScalarKind, SchemaChange, SchemaDiffEngine, SchemaModel};
use proptest::prelude::*;

const NAMES: [&str; 8] = ["title", "teaser", "body", "price", "tags", "author", "published", "hero"];

fn kind() -> impl Strategy<Value = FieldKind> {
    prop_oneof![
        Just(FieldKind::String),
        Just(FieldKind::Html),
        Just(FieldKind::Number),
        Just(FieldKind::Boolean),
        Just(FieldKind::Date),
        Just(FieldKind::Node { allow: vec![] }),
        Just(FieldKind::Node {
            allow: vec!["person".into()]
        }),
        Just(FieldKind::Micronode {
            allow: vec!["address".into()]
        }),
        Just(FieldKind::List {
            list_type: ScalarKind::String,
            allow: vec![]
        }),
        Just(FieldKind::List {
            list_type: ScalarKind::Number,
            allow: vec![]
        }),
    ]
}

fn field(name: &'static str) -> impl Strategy<Value = FieldSchema> {
    (kind(), any::<bool>(), proptest::option::of("[A-Z][a-z]{0,6}")).prop_map(move |(kind, required, label)| {
        let mut field = FieldSchema::new(name, kind);
        field.required = required;
        field.label = label;
        field
    })
}

fn schema() -> impl Strategy<Value = SchemaModel> {
    (
        "[a-z]{1,8}",
        proptest::option::of("[a-z ]{0,12}"),
        any::<bool>(),
        proptest::sample::subsequence(NAMES.to_vec(), 0..=NAMES.len()).prop_shuffle(),
    )
        .prop_flat_map(|(name, description, with_display, names)| {
            let fields: Vec<_> = names.into_iter().map(field).collect();
            (Just(name), Just(description), Just(with_display), fields)
        })
        .prop_map(|(name, description, with_display, fields)| {
            let mut schema = SchemaModel::new(name);
            schema.description = description;
            schema.display_field = fields
                .iter()
                .find(|f| with_display && f.kind == FieldKind::String)
                .map(|f| f.name.clone());
            schema.fields = fields;
            schema
        })
}

proptest! {
    #[test]
    fn diff_then_apply_reaches_target(source in schema(), target in schema()) {
        let changes = SchemaDiffEngine::diff(&source, &target);
        let applied = SchemaDiffEngine::apply(&source, &changes).unwrap();
        prop_assert_eq!(applied, target);
    }

    #[test]
    fn diff_of_identical_schemas_is_empty(source in schema()) {
        prop_assert!(SchemaDiffEngine::diff(&source, &source).is_empty());
    }

    #[test]
    fn diff_never_emits_renames(source in schema(), target in schema()) {
        let changes = SchemaDiffEngine::diff(&source, &target);
        let has_rename = changes.iter().any(|c| matches!(c, SchemaChange::RenameField { .. }));
        prop_assert!(!has_rename);
        let order_updates = changes.iter().filter(|c| matches!(c, SchemaChange::UpdateFieldOrder { .. })).count();
        prop_assert!(order_updates <= 1);
    }
}
