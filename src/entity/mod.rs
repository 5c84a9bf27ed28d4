pub mod meta;
pub mod query;

pub use meta::*;
pub use query::*;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Change-tracking state of an entity inside a unit of work.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntityState {
    #[default]
    Unchanged,
    Added,
    Modified,
    Deleted,
    Detached,
}

impl EntityState {
    pub fn is_pending(&self) -> bool {
        matches!(
            self,
            EntityState::Added | EntityState::Modified | EntityState::Deleted
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub entity_type: String,
    pub values: Map<String, Value>,
    pub state: EntityState,
}

impl Entity {
    pub fn new(entity_type: impl Into<String>, values: Map<String, Value>) -> Self {
        Self {
            entity_type: entity_type.into(),
            values,
            state: EntityState::Unchanged,
        }
    }

    pub fn added(entity_type: impl Into<String>, values: Map<String, Value>) -> Self {
        Self {
            state: EntityState::Added,
            ..Self::new(entity_type, values)
        }
    }

    pub fn property(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn set_property(&mut self, name: &str, value: Value) {
        self.values.insert(name.to_string(), value);
        if self.state == EntityState::Unchanged {
            self.state = EntityState::Modified;
        }
    }

    /// Deleting an entity that was never saved simply detaches it.
    pub fn set_deleted(&mut self) {
        self.state = match self.state {
            EntityState::Added => EntityState::Detached,
            _ => EntityState::Deleted,
        };
    }

    /// Called by the entity manager once the entity has been saved.
    pub fn accept_changes(&mut self) {
        self.state = match self.state {
            EntityState::Deleted | EntityState::Detached => EntityState::Detached,
            _ => EntityState::Unchanged,
        };
    }
}

/// Key expression of a store: one property name or several.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Key {
    Single(String),
    Composite(Vec<String>),
}

impl Key {
    pub fn from_properties(mut properties: Vec<String>) -> Option<Self> {
        match properties.len() {
            0 => None,
            1 => properties.pop().map(Key::Single),
            _ => Some(Key::Composite(properties)),
        }
    }

    /// Key value of a record: the bare value for single keys, an object
    /// holding every key property for composite keys.
    pub fn value_of(&self, values: &Map<String, Value>) -> Value {
        match self {
            Key::Single(name) => values.get(name).cloned().unwrap_or(Value::Null),
            Key::Composite(names) => Value::Object(
                names
                    .iter()
                    .map(|n| (n.clone(), values.get(n).cloned().unwrap_or(Value::Null)))
                    .collect(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn values(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn test_entity_state_transitions() {
        let mut entity = Entity::new("Order", values(json!({"id": 1})));
        entity.set_property("total", json!(10));
        assert_eq!(entity.state, EntityState::Modified);
        entity.accept_changes();
        assert_eq!(entity.state, EntityState::Unchanged);

        let mut entity = Entity::added("Order", values(json!({"id": 2})));
        entity.set_property("total", json!(10));
        assert_eq!(entity.state, EntityState::Added);
        entity.set_deleted();
        assert_eq!(entity.state, EntityState::Detached);
    }

    #[test]
    fn test_key_value_of() {
        let record = values(json!({"a": 1, "b": "x", "c": true}));
        assert_eq!(Key::Single("a".into()).value_of(&record), json!(1));
        assert_eq!(
            Key::Composite(vec!["a".into(), "b".into()]).value_of(&record),
            json!({"a": 1, "b": "x"})
        );
        assert_eq!(Key::from_properties(vec![]), None);
        assert_eq!(
            Key::from_properties(vec!["id".into()]),
            Some(Key::Single("id".into()))
        );
    }
}
