use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::debug;
use uuid::Uuid;

use crate::{
    adapters::{EntityManager, QueryExecutor, QueryResult, SaveResult},
    entity::{Entity, EntityQuery, EntityState, EntityType, Key, MetadataStore, OrderByItem},
    error::Error,
    query::{FilterOperator, Predicate},
};

#[derive(Clone, Default)]
struct MemoryStore {
    /// Saved rows per entity type, in insertion order.
    rows: Arc<Mutex<HashMap<String, Vec<Map<String, Value>>>>>,
    /// Entities tracked by the unit of work, keyed by (type, key).
    cache: Arc<Mutex<HashMap<(String, String), Entity>>>,
    executed: Arc<Mutex<Vec<EntityQuery>>>,
    failure: Arc<Mutex<Option<String>>>,
}

/// Entity manager keeping everything in process memory.
///
/// Queries are evaluated against saved rows only; pending local changes
/// become visible to queries once saved.
pub struct MemoryManager {
    metadata: MetadataStore,
    service_name: Option<String>,
    latency: Option<Duration>,
    store: MemoryStore,
}

impl MemoryManager {
    pub fn new() -> Self {
        Self {
            metadata: MetadataStore::new(),
            service_name: None,
            latency: None,
            store: MemoryStore::default(),
        }
    }

    pub fn with_service_name(mut self, service_name: impl Into<String>) -> Self {
        self.service_name = Some(service_name.into());
        self
    }

    pub fn with_entity_type(mut self, entity_type: EntityType, resource_name: &str) -> Self {
        self.metadata.add_entity_type(entity_type, resource_name);
        self
    }

    /// Delay every remote call, to mimic a round trip.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Insert already saved rows for an entity type.
    pub fn seed(&self, entity_type: &str, records: Vec<Value>) {
        let mut rows = self.store.rows.lock().unwrap();
        let table = rows.entry(entity_type.to_string()).or_default();
        table.extend(records.into_iter().filter_map(|r| match r {
            Value::Object(map) => Some(map),
            _ => None,
        }));
    }

    pub fn saved_rows(&self, entity_type: &str) -> Vec<Value> {
        let rows = self.store.rows.lock().unwrap();
        rows.get(entity_type)
            .map(|table| table.iter().cloned().map(Value::Object).collect())
            .unwrap_or_default()
    }

    /// Every query executed so far, in order.
    pub fn executed_queries(&self) -> Vec<EntityQuery> {
        self.store.executed.lock().unwrap().clone()
    }

    /// Make every remote call fail with `message` until [`Self::recover`].
    pub fn fail_with(&self, message: impl Into<String>) {
        *self.store.failure.lock().unwrap() = Some(message.into());
    }

    pub fn recover(&self) {
        *self.store.failure.lock().unwrap() = None;
    }

    async fn round_trip(&self) -> Result<(), Error> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        match self.store.failure.lock().unwrap().as_ref() {
            Some(message) => Err(Error::Remote(message.clone())),
            None => Ok(()),
        }
    }

    fn key_for(&self, entity_type: &str) -> Result<Key, Error> {
        self.metadata
            .entity_type(entity_type)
            .and_then(|t| Key::from_properties(t.key_properties.clone()))
            .ok_or_else(|| Error::Configuration(format!("Unknown entity type: {}", entity_type)))
    }

    fn cache_key(entity_type: &str, key: &Value) -> (String, String) {
        (entity_type.to_string(), key.to_string())
    }
}

impl Default for MemoryManager {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QueryExecutor for MemoryManager {
    async fn execute_query(&self, query: &EntityQuery) -> Result<QueryResult, Error> {
        self.store.executed.lock().unwrap().push(query.clone());
        self.round_trip().await?;

        let resource = query.resource_name.as_deref().unwrap_or_default();
        let entity_type = self
            .metadata
            .entity_type_name_for_resource_name(resource)
            .ok_or_else(|| Error::Remote(format!("Unknown resource: {}", resource)))?;

        let mut rows: Vec<Value> = self.saved_rows(entity_type);

        if let Some(predicate) = &query.where_clause {
            rows.retain(|row| matches_predicate(predicate, row));
        }

        let total = rows.len() as u64;

        if !query.order_by.is_empty() {
            rows.sort_by(|a, b| compare_rows(a, b, &query.order_by));
        }

        let skip = query.skip.unwrap_or(0) as usize;
        let take = query.take.map(|t| t as usize).unwrap_or(usize::MAX);
        let rows = rows.into_iter().skip(skip).take(take);

        let results = if query.select.is_empty() {
            rows.collect()
        } else {
            rows.map(|row| project(&row, &query.select)).collect()
        };

        debug!(resource, total, "memory query executed");

        Ok(QueryResult {
            results,
            inline_count: query.inline_count.then_some(total),
        })
    }
}

#[async_trait]
impl EntityManager for MemoryManager {
    fn metadata_store(&self) -> &MetadataStore {
        &self.metadata
    }

    fn create_entity(
        &self,
        entity_type: &str,
        mut values: Map<String, Value>,
    ) -> Result<Entity, Error> {
        let key = self.key_for(entity_type)?;

        // generate a key the way a store-generated identity would
        if let Key::Single(name) = &key {
            if values.get(name).is_none_or(Value::is_null) {
                values.insert(name.clone(), Value::String(Uuid::now_v7().to_string()));
            }
        }

        let entity = Entity::added(entity_type, values);
        let cache_key = Self::cache_key(entity_type, &key.value_of(&entity.values));
        self.store
            .cache
            .lock()
            .unwrap()
            .insert(cache_key, entity.clone());

        Ok(entity)
    }

    fn attach_entity(&self, entity: Entity) -> Result<(), Error> {
        let key = self.key_for(&entity.entity_type)?;
        let cache_key = Self::cache_key(&entity.entity_type, &key.value_of(&entity.values));
        self.store.cache.lock().unwrap().insert(cache_key, entity);
        Ok(())
    }

    fn get_changes(&self) -> Vec<Entity> {
        self.store
            .cache
            .lock()
            .unwrap()
            .values()
            .filter(|e| e.state.is_pending())
            .cloned()
            .collect()
    }

    async fn fetch_entity_by_key(
        &self,
        entity_type: &str,
        key: &Value,
        check_local_cache_first: bool,
    ) -> Result<Option<Entity>, Error> {
        let cache_key = Self::cache_key(entity_type, key);

        if check_local_cache_first {
            if let Some(entity) = self.store.cache.lock().unwrap().get(&cache_key) {
                return Ok(Some(entity.clone()));
            }
        }

        self.round_trip().await?;

        let key_expr = self.key_for(entity_type)?;
        let found = {
            let rows = self.store.rows.lock().unwrap();
            rows.get(entity_type).and_then(|table| {
                table
                    .iter()
                    .find(|row| key_expr.value_of(row) == *key)
                    .cloned()
            })
        };

        Ok(found.map(|values| {
            let entity = Entity::new(entity_type, values);
            self.store
                .cache
                .lock()
                .unwrap()
                .insert(cache_key, entity.clone());
            entity
        }))
    }

    async fn save_changes(&self, entities: Vec<Entity>) -> Result<SaveResult, Error> {
        self.round_trip().await?;

        let entities = if entities.is_empty() {
            self.get_changes()
        } else {
            entities
        };

        let mut saved = Vec::with_capacity(entities.len());
        for mut entity in entities {
            let key_expr = self.key_for(&entity.entity_type)?;
            let key = key_expr.value_of(&entity.values);

            {
                let mut rows = self.store.rows.lock().unwrap();
                let table = rows.entry(entity.entity_type.clone()).or_default();
                let position = table.iter().position(|row| key_expr.value_of(row) == key);

                match (entity.state, position) {
                    (EntityState::Deleted, Some(index)) => {
                        table.remove(index);
                    }
                    (EntityState::Added | EntityState::Modified, Some(index)) => {
                        table[index] = entity.values.clone();
                    }
                    (EntityState::Added | EntityState::Modified, None) => {
                        table.push(entity.values.clone());
                    }
                    _ => {}
                }
            }

            entity.accept_changes();

            let cache_key = Self::cache_key(&entity.entity_type, &key);
            let mut cache = self.store.cache.lock().unwrap();
            if entity.state == EntityState::Detached {
                cache.remove(&cache_key);
            } else {
                cache.insert(cache_key, entity.clone());
            }

            saved.push(entity);
        }

        debug!(count = saved.len(), "memory changes saved");
        Ok(SaveResult { entities: saved })
    }

    fn service_name(&self) -> Option<&str> {
        self.service_name.as_deref()
    }
}

/// ==========================
/// Evaluation
/// ==========================

fn lookup<'a>(record: &'a Value, path: &str) -> &'a Value {
    path.split('.')
        .try_fold(record, |value, segment| value.get(segment))
        .unwrap_or(&Value::Null)
}

fn compare_values(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

fn string_test(actual: &Value, expected: &Value, test: fn(&str, &str) -> bool) -> bool {
    match (actual.as_str(), expected.as_str()) {
        (Some(a), Some(e)) => test(a, e),
        _ => false,
    }
}

pub(crate) fn matches_predicate(predicate: &Predicate, record: &Value) -> bool {
    match predicate {
        Predicate::Binary {
            field,
            operator,
            value,
        } => {
            let actual = lookup(record, field);
            let ordering = compare_values(actual, value);
            match operator {
                FilterOperator::Eq => ordering == Some(Ordering::Equal),
                FilterOperator::Ne => ordering != Some(Ordering::Equal),
                FilterOperator::Gt => ordering == Some(Ordering::Greater),
                FilterOperator::Lt => ordering == Some(Ordering::Less),
                FilterOperator::Ge => matches!(ordering, Some(Ordering::Greater | Ordering::Equal)),
                FilterOperator::Le => matches!(ordering, Some(Ordering::Less | Ordering::Equal)),
                FilterOperator::StartsWith => string_test(actual, value, |a, e| a.starts_with(e)),
                FilterOperator::EndsWith => string_test(actual, value, |a, e| a.ends_with(e)),
                FilterOperator::Contains => string_test(actual, value, |a, e| a.contains(e)),
            }
        }
        Predicate::And(operands) => operands.iter().all(|p| matches_predicate(p, record)),
        Predicate::Or(operands) => operands.iter().any(|p| matches_predicate(p, record)),
        Predicate::Not(inner) => !matches_predicate(inner, record),
    }
}

fn compare_rows(a: &Value, b: &Value, order_by: &[OrderByItem]) -> Ordering {
    for item in order_by {
        let (left, right) = (lookup(a, &item.path), lookup(b, &item.path));
        let ordering = match (left.is_null(), right.is_null()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            _ => compare_values(left, right).unwrap_or(Ordering::Equal),
        };
        let ordering = if item.descending {
            ordering.reverse()
        } else {
            ordering
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

/// Keep only the selected paths, rebuilding nested objects for `a.b`.
fn project(record: &Value, fields: &[String]) -> Value {
    let mut projected = Map::new();
    for field in fields {
        let segments: Vec<&str> = field.split('.').collect();
        insert_path(&mut projected, &segments, lookup(record, field).clone());
    }
    Value::Object(projected)
}

fn insert_path(target: &mut Map<String, Value>, segments: &[&str], value: Value) {
    match segments {
        [] => {}
        [last] => {
            target.insert(last.to_string(), value);
        }
        [head, rest @ ..] => {
            let entry = target
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if let Value::Object(next) = entry {
                insert_path(next, rest, value);
            }
        }
    }
}
