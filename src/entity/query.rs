use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::query::{ODataVersion, Predicate, odata_path};

/// -----------------------------
/// Entity Query (native query object)
/// -----------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityQuery {
    pub resource_name: Option<String>,
    pub where_clause: Option<Predicate>,
    pub order_by: Vec<OrderByItem>,
    pub expand_clause: Option<ExpandClause>,
    pub select: Vec<String>,
    pub skip: Option<u64>,
    pub take: Option<u64>,
    pub inline_count: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderByItem {
    pub path: String,
    pub descending: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpandClause {
    pub property_paths: Vec<String>,
}

impl EntityQuery {
    pub fn new(resource_name: impl Into<String>) -> Self {
        Self {
            resource_name: Some(resource_name.into()),
            ..Default::default()
        }
    }

    /// Re-target the query at another resource, keeping every clause.
    pub fn from(mut self, resource_name: impl Into<String>) -> Self {
        self.resource_name = Some(resource_name.into());
        self
    }

    /// Conjoins with an existing where clause instead of replacing it.
    pub fn where_(mut self, predicate: Predicate) -> Self {
        self.where_clause = Some(match self.where_clause.take() {
            None => predicate,
            Some(Predicate::And(mut operands)) => {
                operands.push(predicate);
                Predicate::And(operands)
            }
            Some(existing) => Predicate::And(vec![existing, predicate]),
        });
        self
    }

    /// Appends the comma separated `"<path>[ desc]"` items of `clause`.
    pub fn order_by(mut self, clause: &str) -> Self {
        self.order_by.extend(parse_order_by(clause));
        self
    }

    pub fn expand(mut self, paths: &str) -> Self {
        let property_paths = split_list(paths);
        self.expand_clause = if property_paths.is_empty() {
            None
        } else {
            Some(ExpandClause { property_paths })
        };
        self
    }

    pub fn select(mut self, fields: &str) -> Self {
        self.select = split_list(fields);
        self
    }

    pub fn skip(mut self, count: u64) -> Self {
        self.skip = Some(count);
        self
    }

    pub fn take(mut self, count: u64) -> Self {
        self.take = Some(count);
        self
    }

    pub fn inline_count(mut self, enabled: bool) -> Self {
        self.inline_count = enabled;
        self
    }

    pub fn expand_paths(&self) -> &[String] {
        self.expand_clause
            .as_ref()
            .map(|c| c.property_paths.as_slice())
            .unwrap_or(&[])
    }

    /// Render the query options the way an OData data service receives
    /// them, without percent-encoding.
    pub fn to_query_string(&self, version: ODataVersion) -> String {
        let mut parts = Vec::new();

        if let Some(predicate) = &self.where_clause {
            parts.push(format!("$filter={}", predicate.to_odata(version)));
        }

        if !self.order_by.is_empty() {
            let items: Vec<_> = self
                .order_by
                .iter()
                .map(|item| {
                    if item.descending {
                        format!("{} desc", odata_path(&item.path))
                    } else {
                        odata_path(&item.path)
                    }
                })
                .collect();
            parts.push(format!("$orderby={}", items.join(",")));
        }

        if !self.expand_paths().is_empty() {
            parts.push(format!("$expand={}", join_paths(self.expand_paths())));
        }

        if !self.select.is_empty() {
            parts.push(format!("$select={}", join_paths(&self.select)));
        }

        if let Some(skip) = self.skip {
            parts.push(format!("$skip={}", skip));
        }

        if let Some(take) = self.take {
            parts.push(format!("$top={}", take));
        }

        if self.inline_count {
            parts.push(match version {
                ODataVersion::V2 => "$inlinecount=allpages".to_string(),
                ODataVersion::V4 => "$count=true".to_string(),
            });
        }

        parts.join("&")
    }
}

impl Display for EntityQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let resource = self.resource_name.as_deref().unwrap_or_default();
        let options = self.to_query_string(ODataVersion::default());
        if options.is_empty() {
            write!(f, "{}", resource)
        } else {
            write!(f, "{}?{}", resource, options)
        }
    }
}

fn parse_order_by(clause: &str) -> Vec<OrderByItem> {
    clause
        .split(',')
        .filter_map(|item| {
            let mut tokens = item.split_whitespace();
            let path = tokens.next()?.to_string();
            let descending = tokens
                .next()
                .map(|t| t.eq_ignore_ascii_case("desc"))
                .unwrap_or(false);
            Some(OrderByItem { path, descending })
        })
        .collect()
}

fn split_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn join_paths(paths: &[String]) -> String {
    paths
        .iter()
        .map(|p| odata_path(p))
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::FilterOperator;

    #[test]
    fn test_order_by_appends() {
        let q = EntityQuery::new("Orders")
            .order_by("a desc,b")
            .order_by("c.d");
        assert_eq!(q.to_query_string(ODataVersion::V4), "$orderby=a desc,b,c/d");
    }

    #[test]
    fn test_expand_replaces() {
        let q = EntityQuery::new("Orders").expand("a").expand("b,c");
        assert_eq!(q.expand_paths(), ["b".to_string(), "c".to_string()]);
    }

    #[test]
    fn test_where_conjoins() {
        let q = EntityQuery::new("Orders")
            .where_(Predicate::new("a", FilterOperator::Eq, 1))
            .where_(Predicate::new("b", FilterOperator::Gt, 2));
        assert_eq!(
            q.to_query_string(ODataVersion::V4),
            "$filter=(a eq 1) and (b gt 2)"
        );
    }

    #[test]
    fn test_option_order() {
        let q = EntityQuery::new("Orders")
            .select("a.b")
            .expand("a")
            .take(0)
            .inline_count(true)
            .skip(10);
        assert_eq!(
            q.to_query_string(ODataVersion::V2),
            "$expand=a&$select=a/b&$skip=10&$top=0&$inlinecount=allpages"
        );
        assert_eq!(q.to_string(), "Orders?$expand=a&$select=a/b&$skip=10&$top=0&$count=true");
    }

    #[test]
    fn test_from_keeps_clauses() {
        let q = EntityQuery::default().expand("a").from("Customers");
        assert_eq!(q.resource_name.as_deref(), Some("Customers"));
        assert_eq!(q.expand_paths(), ["a".to_string()]);
    }
}
