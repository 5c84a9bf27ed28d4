use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::entity::Entity;

/// Raw response of an entity manager to an executed query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub results: Vec<Value>,
    pub inline_count: Option<u64>,
}

impl QueryResult {
    pub fn new(results: Vec<Value>) -> Self {
        Self {
            results,
            inline_count: None,
        }
    }

    pub fn with_inline_count(mut self, count: u64) -> Self {
        self.inline_count = Some(count);
        self
    }
}

/// Extra information delivered next to a loaded result set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_count: Option<u64>,
}

impl LoadMetadata {
    pub fn is_empty(&self) -> bool {
        self.total_count.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoadResult {
    pub results: Vec<Value>,
    pub extra: LoadMetadata,
}

impl From<QueryResult> for LoadResult {
    fn from(result: QueryResult) -> Self {
        Self {
            results: result.results,
            extra: LoadMetadata {
                total_count: result.inline_count,
            },
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SaveResult {
    pub entities: Vec<Entity>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_metadata_omits_missing_total_count() {
        let result: LoadResult = QueryResult::new(vec![json!({"id": 1})]).into();
        assert!(result.extra.is_empty());
        assert_eq!(serde_json::to_value(&result.extra).unwrap(), json!({}));

        let result: LoadResult = QueryResult::new(vec![]).with_inline_count(2).into();
        assert_eq!(
            serde_json::to_value(&result.extra).unwrap(),
            json!({"totalCount": 2})
        );
    }
}
