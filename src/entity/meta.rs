use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityType {
    pub name: String,
    /// Key property names as known by the server.
    pub key_properties: Vec<String>,
}

impl EntityType {
    pub fn new(name: impl Into<String>, key_properties: &[&str]) -> Self {
        Self {
            name: name.into(),
            key_properties: key_properties.iter().map(|k| k.to_string()).collect(),
        }
    }
}

/// Entity types known to an entity manager and the resources serving them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetadataStore {
    entity_types: BTreeMap<String, EntityType>,
    resource_names: BTreeMap<String, String>,
}

impl MetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entity_types.is_empty()
    }

    pub fn add_entity_type(&mut self, entity_type: EntityType, resource_name: &str) {
        self.resource_names
            .insert(resource_name.to_string(), entity_type.name.clone());
        self.entity_types
            .insert(entity_type.name.clone(), entity_type);
    }

    pub fn entity_type(&self, name: &str) -> Option<&EntityType> {
        self.entity_types.get(name)
    }

    pub fn entity_type_name_for_resource_name(&self, resource_name: &str) -> Option<&str> {
        self.resource_names.get(resource_name).map(String::as_str)
    }

    pub fn entity_type_for_resource_name(&self, resource_name: &str) -> Option<&EntityType> {
        self.entity_type_name_for_resource_name(resource_name)
            .and_then(|name| self.entity_type(name))
    }
}
