use std::collections::HashSet;

use crate::error::{ContentError, Result};
use crate::model::{FieldKind, FieldMap, SchemaModel};

pub struct SchemaValidator;

impl SchemaValidator {
    /// Structural checks run before a definition is stored
    pub fn validate_model(model: &SchemaModel) -> Result<()> {
        if model.name.trim().is_empty() {
            return Err(ContentError::Validation("schema name must not be empty".into()));
        }

        let mut seen = HashSet::new();
        for field in &model.fields {
            if field.name.trim().is_empty() {
                return Err(ContentError::Validation(format!(
                    "schema '{}' has a field without a name",
                    model.name
                )));
            }
            if !seen.insert(field.name.as_str()) {
                return Err(ContentError::Validation(format!(
                    "schema '{}' declares field '{}' twice",
                    model.name, field.name
                )));
            }
            if let Some(default) = &field.default_value {
                field.kind.validate(&field.name, default)?;
            }
        }

        if let Some(display) = &model.display_field {
            match model.field(display) {
                Some(field) if field.kind == FieldKind::String => {}
                Some(_) => {
                    return Err(ContentError::Validation(format!(
                        "display field '{}' must be a string field",
                        display
                    )))
                }
                None => {
                    return Err(ContentError::Validation(format!(
                        "display field '{}' is not declared",
                        display
                    )))
                }
            }
        }
        Ok(())
    }

    /// Check an editor-supplied field document against the definition it is authored on
    pub fn validate_fields(model: &SchemaModel, fields: &FieldMap) -> Result<()> {
        for (name, value) in fields {
            let field = model.field(name).ok_or_else(|| {
                ContentError::Validation(format!(
                    "field '{}' is not declared by schema '{}'",
                    name, model.name
                ))
            })?;
            field.kind.validate(name, value)?;
        }

        if let Some(missing) = model
            .fields
            .iter()
            .find(|f| f.required && !fields.contains_key(&f.name))
        {
            return Err(ContentError::Validation(format!(
                "required field '{}' is missing",
                missing.name
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FieldSchema, FieldValue};

    fn article() -> SchemaModel {
        SchemaModel::new("article")
            .with_field(FieldSchema::new("title", FieldKind::String).required())
            .with_field(FieldSchema::new("views", FieldKind::Number))
    }

    #[test]
    fn test_duplicate_field_rejected() {
        let model = article().with_field(FieldSchema::new("title", FieldKind::Html));
        assert!(matches!(
            SchemaValidator::validate_model(&model),
            Err(ContentError::Validation(_))
        ));
    }

    #[test]
    fn test_display_field_must_be_string() {
        let mut model = article();
        model.display_field = Some("views".into());
        assert!(SchemaValidator::validate_model(&model).is_err());

        model.display_field = Some("title".into());
        assert!(SchemaValidator::validate_model(&model).is_ok());
    }

    #[test]
    fn test_default_value_must_match_kind() {
        let model = SchemaModel::new("x").with_field(
            FieldSchema::new("age", FieldKind::Number).with_default(FieldValue::string("ten")),
        );
        assert!(SchemaValidator::validate_model(&model).is_err());
    }

    #[test]
    fn test_validate_fields() {
        let model = article();
        let mut fields = FieldMap::new();
        fields.insert("views".into(), FieldValue::number(3));
        assert!(SchemaValidator::validate_fields(&model, &fields).is_err());

        fields.insert("title".into(), FieldValue::string("Hello"));
        assert!(SchemaValidator::validate_fields(&model, &fields).is_ok());

        fields.insert("author".into(), FieldValue::string("me"));
        assert!(SchemaValidator::validate_fields(&model, &fields).is_err());
    }
}
