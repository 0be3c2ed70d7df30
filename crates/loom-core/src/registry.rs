use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{AdapterError, Result};
use crate::model::Model;

/// Process-wide `{name -> Model}` / `{collection_path -> Model}` map.
///
/// Replaces the source's implicit global host object: `Collection` and
/// `coerce_to_reference` take a `&Registry` explicitly instead of reaching
/// for thread-local or static state. Built once at startup and shared
/// behind an `Arc`.
#[derive(Debug, Default, Clone)]
pub struct Registry {
    by_name: HashMap<String, Arc<Model>>,
    by_collection: HashMap<String, Arc<Model>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, model: Model) -> Arc<Model> {
        let model = Arc::new(model);
        self.by_name.insert(model.name.clone(), model.clone());
        self.by_collection
            .insert(model.collection_name.clone(), model.clone());
        model
    }

    pub fn get_model(&self, name: &str, plugin: Option<&str>) -> Option<Arc<Model>> {
        let model = self.by_name.get(name)?;
        match plugin {
            Some(p) if model.plugin.as_deref() != Some(p) => None,
            _ => Some(model.clone()),
        }
    }

    pub fn require_model(&self, name: &str) -> Result<Arc<Model>> {
        self.get_model(name, None)
            .ok_or_else(|| AdapterError::reference_shape(format!("unknown model '{name}'")))
    }

    pub fn get_model_by_collection_name(&self, path: &str) -> Option<Arc<Model>> {
        self.by_collection.get(path).cloned()
    }

    pub fn models(&self) -> impl Iterator<Item = &Arc<Model>> {
        self.by_name.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_lookup_by_name_and_collection() {
        let mut registry = Registry::new();
        let mut model = Model::new("article", "id");
        model.collection_name = "articles".into();
        registry.register(model);

        assert!(registry.get_model("article", None).is_some());
        assert!(registry.get_model_by_collection_name("articles").is_some());
        assert!(registry.get_model("missing", None).is_none());
    }

    #[test]
    fn plugin_scoped_lookup_rejects_mismatch() {
        let mut registry = Registry::new();
        let mut model = Model::new("article", "id");
        model.plugin = Some("blog".into());
        registry.register(model);

        assert!(registry.get_model("article", Some("blog")).is_some());
        assert!(registry.get_model("article", Some("other")).is_none());
    }
}
