/// Process-wide entity lookup by name.
use std::collections::HashMap;
use std::sync::Arc;

use super::metadata::EntityMetadata;
use crate::error::{Error, Result};

/// Entities keyed by lowercase name.
#[derive(Debug, Clone, Default)]
pub struct EntityRegistry {
    entities: HashMap<String, Arc<EntityMetadata>>,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, entity: Arc<EntityMetadata>) -> Result<()> {
        let key = entity.name.to_lowercase();
        if self.entities.contains_key(&key) {
            return Err(Error::invalid_argument(format!(
                "entity {} is already registered",
                entity.name
            )));
        }
        self.entities.insert(key, entity);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<EntityMetadata>> {
        self.entities.get(&name.to_lowercase()).cloned()
    }

    pub fn require(&self, name: &str) -> Result<Arc<EntityMetadata>> {
        self.get(name)
            .ok_or_else(|| Error::Resolve(format!("entity {} is not registered", name)))
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entities.values().map(|e| e.name.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orm::metadata::ColumnField;

    fn entity(name: &str) -> Arc<EntityMetadata> {
        Arc::new(
            EntityMetadata::builder(name)
                .column(ColumnField::new("id"))
                .build()
                .unwrap(),
        )
    }

    #[test]
    fn test_register_and_lookup() {
        let mut registry = EntityRegistry::new();
        registry.register(entity("Country")).unwrap();
        registry.register(entity("Customer")).unwrap();
        assert!(registry.get("COUNTRY").is_some());
        assert_eq!(registry.names(), vec!["Country", "Customer"]);
        assert!(registry.register(entity("country")).is_err());
        assert!(matches!(registry.require("x"), Err(Error::Resolve(_))));
    }
}
