#[cfg(feature = "memory")]
pub mod memory;

pub mod query;
pub mod record;

use async_trait::async_trait;
pub use query::*;
pub use record::*;
use serde_json::{Map, Value};

use crate::{
    entity::{Entity, EntityQuery, MetadataStore},
    error::Error,
};

/// -----------------------------
/// Collaborator contract
/// -----------------------------

#[async_trait]
pub trait QueryExecutor: Send + Sync {
    /// Execute a composed query. One attempt, no retries.
    async fn execute_query(&self, query: &EntityQuery) -> Result<QueryResult, Error>;
}

/// Unit of work backing a store: metadata, change tracking and saving.
#[async_trait]
pub trait EntityManager: QueryExecutor + Send + Sync + 'static {
    fn metadata_store(&self) -> &MetadataStore;

    /// Create a new entity in the `Added` state and start tracking it.
    fn create_entity(
        &self,
        entity_type: &str,
        values: Map<String, Value>,
    ) -> Result<Entity, Error>;

    /// Track local changes made to an entity without saving them.
    fn attach_entity(&self, entity: Entity) -> Result<(), Error>;

    /// Entities with pending changes.
    fn get_changes(&self) -> Vec<Entity>;

    async fn fetch_entity_by_key(
        &self,
        entity_type: &str,
        key: &Value,
        check_local_cache_first: bool,
    ) -> Result<Option<Entity>, Error>;

    async fn save_changes(&self, entities: Vec<Entity>) -> Result<SaveResult, Error>;

    fn service_name(&self) -> Option<&str> {
        None
    }
}
