//! # entity-store
//!
//! A store adapter that lets a generic data-access layer (load, insert,
//! update, remove and lookup by key, driven by declarative load options)
//! run against an OData entity manager.
//!
//! ## What's inside
//!
//! ### Query handles
//! [`QueryHandle`] is an immutable description of a query: a base target
//! plus an ordered list of pending tasks. Every builder call returns a new
//! handle; the native [`EntityQuery`] is only composed when the handle is
//! enumerated or counted.
//!
//! ```rust,ignore
//! let result = store
//!     .create_query(&LoadOptions::default())
//!     .filter(&json!([["status", "open"], "or", ["total", ">", 100]]))?
//!     .sort_by("created", true)
//!     .then_by("id", false)?
//!     .select(["id", "customer.name"])
//!     .slice(Some(20), Some(10))
//!     .enumerate()
//!     .await?;
//! ```
//!
//! ### Criteria
//! Filters use a nested array grammar: leaves (`["field", "op", value]`),
//! groups joined by `"and"` / `"or"` tokens and negation (`["!", ...]`).
//! See [`criteria`].
//!
//! ### Store
//! [`Store`] glues the query handles to an [`EntityManager`] and turns
//! CRUD intents into entity lifecycle steps followed by a save.
//!
//! ## Feature flags
//!
//! | Flag     | Default | Description                       |
//! |----------|---------|-----------------------------------|
//! | `memory` | ✓       | In-process entity manager         |
//!

pub mod adapters;
pub mod criteria;
pub mod entity;
pub mod error;
pub mod hook;
pub mod query;

use std::sync::Arc;
use std::time::Instant;

use metrics::histogram;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;

pub use crate::adapters::{
    EntityManager, LoadMetadata, LoadResult, QueryBase, QueryExecutor, QueryHandle, QueryOptions,
    QueryResult, SaveResult, Task, TaskAction,
};
pub use crate::criteria::{Criterion, compile_criteria};
pub use crate::entity::{Entity, EntityQuery, EntityState, EntityType, Key, MetadataStore};
pub use crate::error::Error;
pub use crate::hook::{ErrorChain, ErrorHandler, ErrorHook};
pub use crate::query::{Connective, FilterOperator, ODataVersion, Predicate, ToQueryValue};

#[cfg(feature = "memory")]
pub use crate::adapters::memory::MemoryManager;

/// Store behaviour that can be loaded from configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StoreOptions {
    /// Save after every insert, update and remove.
    pub auto_commit: bool,
    /// Look entities up in the local cache before asking the server.
    pub prefer_local: bool,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            auto_commit: false,
            prefer_local: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SortSpec {
    pub selector: String,
    #[serde(default)]
    pub desc: bool,
}

impl SortSpec {
    pub fn asc(selector: impl Into<String>) -> Self {
        Self {
            selector: selector.into(),
            desc: false,
        }
    }

    pub fn desc(selector: impl Into<String>) -> Self {
        Self {
            selector: selector.into(),
            desc: true,
        }
    }
}

/// Declarative load request handed to [`Store::load`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LoadOptions {
    pub filter: Option<Value>,
    pub sort: Vec<SortSpec>,
    pub select: Vec<String>,
    pub expand: Vec<String>,
    pub skip: Option<u64>,
    pub take: Option<u64>,
    pub require_total_count: bool,
    /// Prepared native query used as the base instead of the store's own.
    #[serde(skip)]
    pub entity_query: Option<EntityQuery>,
}

/// -----------------------------
/// Builder
/// -----------------------------

#[derive(Default)]
pub struct StoreBuilder {
    entity_manager: Option<Arc<dyn EntityManager>>,
    resource_name: Option<String>,
    entity_query: Option<EntityQuery>,
    key: Option<Key>,
    error_handler: Option<ErrorHandler>,
    error_hook: ErrorHook,
    options: StoreOptions,
}

impl StoreBuilder {
    pub fn entity_manager(mut self, manager: Arc<dyn EntityManager>) -> Self {
        self.entity_manager = Some(manager);
        self
    }

    pub fn resource_name(mut self, resource_name: impl Into<String>) -> Self {
        self.resource_name = Some(resource_name.into());
        self
    }

    /// User query every load starts from.
    pub fn entity_query(mut self, query: EntityQuery) -> Self {
        self.entity_query = Some(query);
        self
    }

    /// Key used when the entity manager carries no metadata.
    pub fn key(mut self, key: Key) -> Self {
        self.key = Some(key);
        self
    }

    pub fn auto_commit(mut self, enabled: bool) -> Self {
        self.options.auto_commit = enabled;
        self
    }

    pub fn error_handler(mut self, handler: ErrorHandler) -> Self {
        self.error_handler = Some(handler);
        self
    }

    pub fn error_hook(mut self, hook: ErrorHook) -> Self {
        self.error_hook = hook;
        self
    }

    pub fn options(mut self, options: StoreOptions) -> Self {
        self.options = options;
        self
    }

    pub fn build(self) -> Result<Store, Error> {
        let manager = self.entity_manager.ok_or_else(|| {
            Error::Configuration("Missing required argument: entityManager".to_string())
        })?;
        let resource_name = self.resource_name.ok_or_else(|| {
            Error::Configuration("Missing required argument: resourceName".to_string())
        })?;

        Ok(Store {
            inner: Arc::new(StoreInner {
                manager,
                resource_name,
                user_query: self.entity_query,
                key: self.key,
                error_handler: self.error_handler,
                error_hook: self.error_hook,
                options: self.options,
            }),
        })
    }
}

/// -----------------------------
/// Store
/// -----------------------------

/// Data-access store over one resource of an entity manager.
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    manager: Arc<dyn EntityManager>,
    resource_name: String,
    user_query: Option<EntityQuery>,
    key: Option<Key>,
    error_handler: Option<ErrorHandler>,
    error_hook: ErrorHook,
    options: StoreOptions,
}

impl Store {
    pub fn builder() -> StoreBuilder {
        StoreBuilder::default()
    }

    pub fn entity_manager(&self) -> &Arc<dyn EntityManager> {
        &self.inner.manager
    }

    pub fn resource_name(&self) -> &str {
        &self.inner.resource_name
    }

    pub fn options(&self) -> &StoreOptions {
        &self.inner.options
    }

    /// Name of the entity type served by the store's resource.
    pub fn entity_type(&self) -> Option<String> {
        self.inner
            .manager
            .metadata_store()
            .entity_type_name_for_resource_name(&self.inner.resource_name)
            .map(str::to_string)
    }

    /// Key from metadata, or the configured key when metadata has nothing
    /// for the resource.
    pub fn key(&self) -> Option<Key> {
        let metadata = self.inner.manager.metadata_store();
        if metadata.is_empty() {
            return self.inner.key.clone();
        }

        metadata
            .entity_type_for_resource_name(&self.inner.resource_name)
            .and_then(|t| Key::from_properties(t.key_properties.clone()))
            .or_else(|| self.inner.key.clone())
    }

    pub fn key_of(&self, values: &Map<String, Value>) -> Result<Value, Error> {
        Ok(self.require_key()?.value_of(values))
    }

    fn require_key(&self) -> Result<Key, Error> {
        self.key()
            .ok_or_else(|| Error::Configuration("Key expression is required".to_string()))
    }

    fn require_entity_type(&self) -> Result<String, Error> {
        self.entity_type().ok_or_else(|| {
            Error::Configuration(format!(
                "No entity type for resource: {}",
                self.inner.resource_name
            ))
        })
    }

    fn error_chain(&self) -> ErrorChain {
        ErrorChain::new(
            self.inner.error_handler.clone(),
            self.inner.error_hook.clone(),
        )
    }

    fn base_query(&self) -> EntityQuery {
        match &self.inner.user_query {
            Some(query) => query.clone().from(self.inner.resource_name.as_str()),
            None => EntityQuery::new(self.inner.resource_name.as_str()),
        }
    }

    // ==================== Queries ====================

    pub fn create_query(&self, load_options: &LoadOptions) -> QueryHandle {
        let base = match &load_options.entity_query {
            Some(query) => {
                QueryBase::Query(query.clone().from(self.inner.resource_name.as_str()))
            }
            None if self.inner.user_query.is_some() => QueryBase::Query(self.base_query()),
            None => QueryBase::Resource(self.inner.resource_name.clone()),
        };

        let options = QueryOptions {
            error_handler: self.inner.error_handler.clone(),
            error_hook: self.inner.error_hook.clone(),
            require_total_count: load_options.require_total_count,
        };

        let executor: Arc<dyn QueryExecutor> = self.inner.manager.clone();
        let query = QueryHandle::new(executor, base, options);

        if load_options.expand.is_empty() {
            query
        } else {
            query.expand(&load_options.expand)
        }
    }

    fn prepare_query(&self, load_options: &LoadOptions) -> Result<QueryHandle, Error> {
        let query = self.create_query(load_options);
        match &load_options.filter {
            Some(filter) => query.filter(filter),
            None => Ok(query),
        }
    }

    pub async fn load(&self, load_options: &LoadOptions) -> Result<LoadResult, Error> {
        let mut query = self.prepare_query(load_options)?;

        for (i, sort) in load_options.sort.iter().enumerate() {
            query = if i == 0 {
                query.sort_by(&sort.selector, sort.desc)
            } else {
                query.then_by(&sort.selector, sort.desc)?
            };
        }

        if !load_options.select.is_empty() {
            query = query.select(&load_options.select);
        }

        query
            .slice(load_options.skip, load_options.take)
            .enumerate()
            .await
    }

    pub async fn total_count(&self, load_options: &LoadOptions) -> Result<u64, Error> {
        self.prepare_query(load_options)?.count().await
    }

    /// First entity matching `key`, read from the server.
    pub async fn by_key(&self, key: &Value) -> Result<Option<Value>, Error> {
        let predicate = match self.require_key()? {
            Key::Single(name) => Predicate::new(name, FilterOperator::Eq, key.clone()),
            Key::Composite(names) => Predicate::and(
                names
                    .into_iter()
                    .map(|name| {
                        let value = key.get(&name).cloned().unwrap_or(Value::Null);
                        Predicate::new(name, FilterOperator::Eq, value)
                    })
                    .collect(),
            ),
        };

        let query = self.base_query().where_(predicate);
        debug!(query = %query, "by_key");

        let start = Instant::now();
        let outcome = self.inner.manager.execute_query(&query).await;
        histogram!("entity_store.by_key.duration_ms",
            "resource" => self.inner.resource_name.clone()
        )
        .record(start.elapsed().as_millis() as f64);

        outcome
            .map(|result| result.results.into_iter().next())
            .map_err(|err| self.error_chain().reject(err))
    }

    // ==================== Changes ====================

    async fn fetch_entity(&self, key: &Value) -> Result<Entity, Error> {
        let entity_type = self.require_entity_type()?;

        let found = self
            .inner
            .manager
            .fetch_entity_by_key(&entity_type, key, self.inner.options.prefer_local)
            .await
            .map_err(|err| self.error_chain().reject(err))?;

        found.ok_or_else(|| {
            self.error_chain().notify(&Error::NotFound);
            Error::NotFound
        })
    }

    /// Save `entities`, or every pending change when empty.
    pub async fn commit(&self, entities: Vec<Entity>) -> Result<SaveResult, Error> {
        debug!(count = entities.len(), resource = %self.inner.resource_name, "commit");
        self.inner
            .manager
            .save_changes(entities)
            .await
            .map_err(|err| self.error_chain().reject(err))
    }

    /// Create an entity from `values`. Returns the values and the key of the
    /// new entity, as assigned by the save when auto-commit is on.
    pub async fn insert(
        &self,
        values: Map<String, Value>,
    ) -> Result<(Map<String, Value>, Value), Error> {
        let entity_type = self.require_entity_type()?;
        let entity = self
            .inner
            .manager
            .create_entity(&entity_type, values.clone())?;
        debug!(entity_type = %entity_type, "insert");

        if !self.inner.options.auto_commit {
            return Ok((values, self.key_of(&entity.values)?));
        }

        let saved = self.commit(vec![entity.clone()]).await?;
        let saved = saved.entities.into_iter().next().unwrap_or(entity);
        Ok((values, self.key_of(&saved.values)?))
    }

    pub async fn update(
        &self,
        key: &Value,
        values: Map<String, Value>,
    ) -> Result<(Value, Map<String, Value>), Error> {
        let mut entity = self.fetch_entity(key).await?;
        for (name, value) in &values {
            entity.set_property(name, value.clone());
        }
        debug!(key = %key, state = ?entity.state, "update");

        if !self.inner.options.auto_commit {
            self.inner.manager.attach_entity(entity)?;
            return Ok((key.clone(), values));
        }

        let saved = self.commit(vec![entity]).await?;
        let key = match saved.entities.first() {
            Some(saved) => self.key_of(&saved.values)?,
            None => key.clone(),
        };
        Ok((key, values))
    }

    pub async fn remove(&self, key: &Value) -> Result<Value, Error> {
        let mut entity = self.fetch_entity(key).await?;
        entity.set_deleted();
        debug!(key = %key, state = ?entity.state, "remove");

        if self.inner.options.auto_commit {
            self.commit(vec![entity]).await?;
        } else {
            self.inner.manager.attach_entity(entity)?;
        }

        Ok(key.clone())
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("resource_name", &self.inner.resource_name)
            .field("user_query", &self.inner.user_query)
            .field("key", &self.inner.key)
            .field("options", &self.inner.options)
            .finish()
    }
}

#[cfg(all(test, feature = "memory"))]
mod tests {
    use super::*;
    use serde_json::json;

    fn manager() -> Arc<MemoryManager> {
        Arc::new(
            MemoryManager::new().with_entity_type(EntityType::new("Product", &["id"]), "Products"),
        )
    }

    #[test]
    fn test_builder_requires_arguments() {
        let err = Store::builder().resource_name("Products").build().unwrap_err();
        assert_eq!(
            err,
            Error::Configuration("Missing required argument: entityManager".to_string())
        );

        let err = Store::builder()
            .entity_manager(manager())
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            Error::Configuration("Missing required argument: resourceName".to_string())
        );
    }

    #[test]
    fn test_store_options_defaults() {
        let options: StoreOptions = serde_json::from_value(json!({})).unwrap();
        assert_eq!(options, StoreOptions::default());
        assert!(!options.auto_commit);
        assert!(options.prefer_local);

        let options: StoreOptions =
            serde_json::from_value(json!({"autoCommit": true, "preferLocal": false})).unwrap();
        assert!(options.auto_commit);
        assert!(!options.prefer_local);
    }

    #[test]
    fn test_load_options_deserialize() {
        let options: LoadOptions = serde_json::from_value(json!({
            "filter": ["name", "startswith", "A"],
            "sort": [{"selector": "name", "desc": true}, {"selector": "id"}],
            "take": 10,
            "requireTotalCount": true
        }))
        .unwrap();

        assert_eq!(options.sort, vec![SortSpec::desc("name"), SortSpec::asc("id")]);
        assert_eq!(options.take, Some(10));
        assert!(options.require_total_count);
        assert!(options.entity_query.is_none());
    }

    #[test]
    fn test_key_falls_back_to_configured_key() {
        let store = Store::builder()
            .entity_manager(Arc::new(MemoryManager::new()))
            .resource_name("Products")
            .key(Key::Composite(vec!["a".into(), "b".into()]))
            .build()
            .unwrap();
        assert_eq!(store.key(), Some(Key::Composite(vec!["a".into(), "b".into()])));
        assert_eq!(store.entity_type(), None);

        let store = Store::builder()
            .entity_manager(manager())
            .resource_name("Products")
            .key(Key::Single("ignored".into()))
            .build()
            .unwrap();
        assert_eq!(store.key(), Some(Key::Single("id".into())));
        assert_eq!(store.entity_type().as_deref(), Some("Product"));
    }

    #[test]
    fn test_create_query_base() {
        let store = Store::builder()
            .entity_manager(manager())
            .resource_name("Products")
            .entity_query(EntityQuery::new("Other").expand("category"))
            .build()
            .unwrap();

        let query = store.create_query(&LoadOptions::default());
        assert_eq!(query.compile().to_string(), "Products?$expand=category");

        let load_options = LoadOptions {
            entity_query: Some(EntityQuery::new("Custom")),
            expand: vec!["supplier".to_string()],
            ..Default::default()
        };
        let query = store.create_query(&load_options);
        assert_eq!(query.compile().to_string(), "Products?$expand=supplier");

        let load_options = LoadOptions {
            entity_query: Some(EntityQuery::default().order_by("id desc")),
            ..Default::default()
        };
        let query = store.create_query(&load_options).compile();
        assert_eq!(query.resource_name.as_deref(), Some("Products"));
        assert_eq!(query.to_string(), "Products?$orderby=id desc");
    }

    #[test]
    fn test_entity_manager_accessor() {
        let store = Store::builder()
            .entity_manager(Arc::new(
                MemoryManager::new()
                    .with_service_name("https://example.org/odata/")
                    .with_entity_type(EntityType::new("Product", &["id"]), "Products"),
            ))
            .resource_name("Products")
            .build()
            .unwrap();

        assert_eq!(
            store.entity_manager().service_name(),
            Some("https://example.org/odata/")
        );
        assert_eq!(manager().service_name(), None);
    }
}
