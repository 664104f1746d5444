use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::model::{SchemaKind, SchemaModel};

/// Cache key: `(kind, name, version)`
pub type SchemaCacheKey = (SchemaKind, String, u32);

/// Process-wide read cache of parsed schema and microschema definitions.
///
/// Shared by handle; readers never observe a partially replaced entry because
/// eviction and insertion of a key happen under one write lock.
#[derive(Debug, Clone, Default)]
pub struct SchemaCache {
    entries: Arc<RwLock<HashMap<SchemaCacheKey, Arc<SchemaModel>>>>,
}

impl SchemaCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, kind: SchemaKind, name: &str, version: u32) -> Option<Arc<SchemaModel>> {
        self.entries
            .read()
            .get(&(kind, name.to_string(), version))
            .cloned()
    }

    pub fn put(&self, kind: SchemaKind, name: &str, version: u32, model: SchemaModel) -> Arc<SchemaModel> {
        let model = Arc::new(model);
        self.entries
            .write()
            .insert((kind, name.to_string(), version), model.clone());
        model
    }

    /// Evict `old_name` at `version` and insert the new definition atomically.
    /// Used when a version's definition is replaced in place, possibly under a new name.
    pub fn replace(
        &self,
        kind: SchemaKind,
        old_name: &str,
        version: u32,
        model: SchemaModel,
    ) -> Arc<SchemaModel> {
        let model = Arc::new(model);
        let mut entries = self.entries.write();
        entries.remove(&(kind, old_name.to_string(), version));
        entries.insert((kind, model.name.clone(), version), model.clone());
        log::debug!("Replaced cached {} '{}' v{}", kind, model.name, version);
        model
    }

    pub fn invalidate(&self, key: &SchemaCacheKey) {
        self.entries.write().remove(key);
    }

    pub fn invalidate_all(&self) {
        self.entries.write().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FieldKind, FieldSchema};

    #[test]
    fn test_replace_never_serves_old_definition() {
        let cache = SchemaCache::new();
        cache.put(SchemaKind::Schema, "article", 1, SchemaModel::new("article"));

        let updated = SchemaModel::new("article").with_field(FieldSchema::new("title", FieldKind::String));
        cache.replace(SchemaKind::Schema, "article", 1, updated.clone());

        let cached = cache.get(SchemaKind::Schema, "article", 1).unwrap();
        assert_eq!(*cached, updated);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_replace_under_new_name_evicts_old_key() {
        let cache = SchemaCache::new();
        cache.put(SchemaKind::Microschema, "geo", 2, SchemaModel::new("geo"));
        cache.replace(SchemaKind::Microschema, "geo", 2, SchemaModel::new("location"));

        assert!(cache.get(SchemaKind::Microschema, "geo", 2).is_none());
        assert!(cache.get(SchemaKind::Microschema, "location", 2).is_some());
    }

    #[test]
    fn test_invalidate() {
        let cache = SchemaCache::new();
        cache.put(SchemaKind::Schema, "a", 1, SchemaModel::new("a"));
        cache.put(SchemaKind::Schema, "b", 1, SchemaModel::new("b"));

        cache.invalidate(&(SchemaKind::Schema, "a".to_string(), 1));
        assert!(cache.get(SchemaKind::Schema, "a", 1).is_none());
        assert_eq!(cache.len(), 1);

        cache.invalidate_all();
        assert!(cache.is_empty());
    }
}
