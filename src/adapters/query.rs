use std::sync::Arc;
use std::time::Instant;

use metrics::histogram;
use serde_json::Value;
use tracing::debug;

use super::{LoadResult, QueryExecutor};
use crate::{
    criteria::{Criterion, compile_criteria},
    entity::EntityQuery,
    error::Error,
    hook::{ErrorChain, ErrorHandler, ErrorHook},
    query::{Predicate, ToQueryValue},
};

/// -----------------------------
/// Query base
/// -----------------------------

/// What a query starts from: a bare resource name or a prepared native
/// query whose clauses are kept.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryBase {
    Resource(String),
    Query(EntityQuery),
}

impl QueryBase {
    pub fn entity_query(&self) -> EntityQuery {
        match self {
            QueryBase::Resource(name) => EntityQuery::new(name.as_str()),
            QueryBase::Query(query) => query.clone(),
        }
    }

    pub fn expand_paths(&self) -> &[String] {
        match self {
            QueryBase::Resource(_) => &[],
            QueryBase::Query(query) => query.expand_paths(),
        }
    }

    pub fn resource_name(&self) -> Option<&str> {
        match self {
            QueryBase::Resource(name) => Some(name),
            QueryBase::Query(query) => query.resource_name.as_deref(),
        }
    }
}

impl From<&str> for QueryBase {
    fn from(name: &str) -> Self {
        QueryBase::Resource(name.to_string())
    }
}

impl From<String> for QueryBase {
    fn from(name: String) -> Self {
        QueryBase::Resource(name)
    }
}

impl From<EntityQuery> for QueryBase {
    fn from(query: EntityQuery) -> Self {
        QueryBase::Query(query)
    }
}

#[derive(Clone, Default)]
pub struct QueryOptions {
    pub error_handler: Option<ErrorHandler>,
    /// Fallback handler slot consulted after `error_handler`.
    pub error_hook: ErrorHook,
    pub require_total_count: bool,
}

impl std::fmt::Debug for QueryOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryOptions")
            .field("error_handler", &self.error_handler.is_some())
            .field("error_hook", &self.error_hook)
            .field("require_total_count", &self.require_total_count)
            .finish()
    }
}

/// -----------------------------
/// Tasks
/// -----------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskAction {
    OrderBy,
    Where,
    Select,
    Expand,
    Skip,
    Take,
}

/// One queued transformation of the native query.
#[derive(Debug, Clone, PartialEq)]
pub enum Task {
    OrderBy(String),
    Where(Predicate),
    Select(String),
    Expand(String),
    Skip(u64),
    Take(u64),
}

impl Task {
    pub fn action(&self) -> TaskAction {
        match self {
            Task::OrderBy(_) => TaskAction::OrderBy,
            Task::Where(_) => TaskAction::Where,
            Task::Select(_) => TaskAction::Select,
            Task::Expand(_) => TaskAction::Expand,
            Task::Skip(_) => TaskAction::Skip,
            Task::Take(_) => TaskAction::Take,
        }
    }

    pub fn apply(&self, query: EntityQuery) -> EntityQuery {
        match self {
            Task::OrderBy(clause) => query.order_by(clause),
            Task::Where(predicate) => query.where_(predicate.clone()),
            Task::Select(fields) => query.select(fields),
            Task::Expand(paths) => query.expand(paths),
            Task::Skip(count) => query.skip(*count),
            Task::Take(count) => query.take(*count),
        }
    }

    /// Count requests ignore projection, ordering and paging.
    fn affects_count(&self) -> bool {
        matches!(self.action(), TaskAction::Where | TaskAction::Expand)
    }
}

fn format_sort_clause(field: &str, descending: bool) -> String {
    if descending {
        format!("{} desc", field)
    } else {
        field.to_string()
    }
}

/// -----------------------------
/// Query handle
/// -----------------------------

/// Immutable query description. Every builder call returns a new handle
/// with its own task list; the executor, options and base are shared.
#[derive(Clone)]
pub struct QueryHandle {
    executor: Arc<dyn QueryExecutor>,
    base: Arc<QueryBase>,
    options: Arc<QueryOptions>,
    tasks: Arc<Vec<Task>>,
}

impl QueryHandle {
    pub fn new(
        executor: Arc<dyn QueryExecutor>,
        base: impl Into<QueryBase>,
        options: QueryOptions,
    ) -> Self {
        Self {
            executor,
            base: Arc::new(base.into()),
            options: Arc::new(options),
            tasks: Arc::new(Vec::new()),
        }
    }

    pub fn base(&self) -> &QueryBase {
        &self.base
    }

    pub fn options(&self) -> &QueryOptions {
        &self.options
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    fn with_tasks(&self, tasks: Vec<Task>) -> Self {
        Self {
            executor: Arc::clone(&self.executor),
            base: Arc::clone(&self.base),
            options: Arc::clone(&self.options),
            tasks: Arc::new(tasks),
        }
    }

    fn derive(&self, new_tasks: impl IntoIterator<Item = Task>) -> Self {
        let mut tasks = self.tasks.as_ref().clone();
        tasks.extend(new_tasks);
        self.with_tasks(tasks)
    }

    // ==================== Builder ====================

    pub fn sort_by(&self, field: &str, descending: bool) -> Self {
        self.derive([Task::OrderBy(format_sort_clause(field, descending))])
    }

    /// Extend the sort clause appended by the immediately preceding
    /// `sort_by`/`then_by`.
    pub fn then_by(&self, field: &str, descending: bool) -> Result<Self, Error> {
        let mut tasks = self.tasks.as_ref().clone();
        match tasks.last_mut() {
            Some(Task::OrderBy(clause)) => {
                clause.push(',');
                clause.push_str(&format_sort_clause(field, descending));
            }
            _ => return Err(Error::InvalidSequence),
        }
        Ok(self.with_tasks(tasks))
    }

    /// Filter with the array criteria grammar, see [`crate::criteria`].
    pub fn filter(&self, criteria: &Value) -> Result<Self, Error> {
        let predicate = compile_criteria(criteria)?;
        Ok(self.derive([Task::Where(predicate)]))
    }

    /// Filter with a single `[field, operator, value]` comparison.
    pub fn filter_by(
        &self,
        field: &str,
        operator: &str,
        value: impl ToQueryValue,
    ) -> Result<Self, Error> {
        self.filter_criterion(&Criterion::leaf(field, operator, value))
    }

    pub fn filter_criterion(&self, criterion: &Criterion) -> Result<Self, Error> {
        let predicate = criterion.compile()?;
        Ok(self.derive([Task::Where(predicate)]))
    }

    /// Project the given fields. Navigation paths (`a.b`) also expand their
    /// parent (`a`).
    pub fn select<I, S>(&self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let fields: Vec<String> = fields.into_iter().map(|f| f.as_ref().to_string()).collect();
        let implicit_expand: Vec<&str> = fields
            .iter()
            .filter_map(|f| f.rsplit_once('.').map(|(parent, _)| parent))
            .collect();

        let query = self.derive([Task::Select(fields.join(","))]);
        if implicit_expand.is_empty() {
            query
        } else {
            query.expand(implicit_expand)
        }
    }

    /// Eager-load the given navigation paths. Repeated paths are kept once
    /// and paths already expanded by the base query are appended after the
    /// requested ones so they are not lost.
    pub fn expand<I, S>(&self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let existing = self.base.expand_paths();
        let mut merged: Vec<String> = Vec::new();

        for path in paths {
            let path = path.as_ref();
            if !merged.iter().any(|p| p == path) && !existing.iter().any(|p| p == path) {
                merged.push(path.to_string());
            }
        }
        merged.extend(existing.iter().cloned());

        self.derive([Task::Expand(merged.join(","))])
    }

    /// Page the results. Zero or missing values add no task.
    pub fn slice(&self, skip: Option<u64>, take: Option<u64>) -> Self {
        let mut tasks = Vec::new();

        if let Some(skip) = skip.filter(|s| *s > 0) {
            tasks.push(Task::Skip(skip));
        }

        if let Some(take) = take.filter(|t| *t > 0) {
            tasks.push(Task::Take(take));
        }

        self.derive(tasks)
    }

    // ==================== Unsupported ====================

    pub fn sum(&self, _selector: &str) -> Result<Value, Error> {
        Err(Error::NotSupported("sum"))
    }

    pub fn min(&self, _selector: &str) -> Result<Value, Error> {
        Err(Error::NotSupported("min"))
    }

    pub fn max(&self, _selector: &str) -> Result<Value, Error> {
        Err(Error::NotSupported("max"))
    }

    pub fn avg(&self, _selector: &str) -> Result<Value, Error> {
        Err(Error::NotSupported("avg"))
    }

    pub fn group_by(&self, _selector: &str) -> Result<Self, Error> {
        Err(Error::NotSupported("group_by"))
    }

    pub fn aggregate(&self, _seed: Value) -> Result<Value, Error> {
        Err(Error::NotSupported("aggregate"))
    }

    // ==================== Compilation ====================

    fn fold<'a>(&self, tasks: impl Iterator<Item = &'a Task>) -> EntityQuery {
        tasks.fold(self.base.entity_query(), |query, task| task.apply(query))
    }

    /// Native query for `enumerate`, every task applied in order.
    pub fn compile(&self) -> EntityQuery {
        let query = self.fold(self.tasks.iter());
        if self.options.require_total_count {
            query.inline_count(true)
        } else {
            query
        }
    }

    /// Native query for `count`: filters and expands only, no rows.
    pub fn compile_count(&self) -> EntityQuery {
        self.fold(self.tasks.iter().filter(|t| t.affects_count()))
            .inline_count(true)
            .take(0)
    }

    // ==================== Execution ====================

    fn error_chain(&self) -> ErrorChain {
        ErrorChain::new(
            self.options.error_handler.clone(),
            self.options.error_hook.clone(),
        )
    }

    fn resource_label(&self) -> String {
        self.base.resource_name().unwrap_or_default().to_string()
    }

    pub async fn enumerate(&self) -> Result<LoadResult, Error> {
        let query = self.compile();
        debug!(query = %query, "enumerate");

        let start = Instant::now();
        let outcome = self.executor.execute_query(&query).await;
        histogram!("entity_store.enumerate.duration_ms",
            "resource" => self.resource_label()
        )
        .record(start.elapsed().as_millis() as f64);

        outcome
            .map(LoadResult::from)
            .map_err(|err| self.error_chain().reject(err))
    }

    pub async fn count(&self) -> Result<u64, Error> {
        let query = self.compile_count();
        debug!(query = %query, "count");

        let start = Instant::now();
        let outcome = self.executor.execute_query(&query).await;
        histogram!("entity_store.count.duration_ms",
            "resource" => self.resource_label()
        )
        .record(start.elapsed().as_millis() as f64);

        outcome
            .and_then(|result| {
                result
                    .inline_count
                    .ok_or_else(|| Error::Remote("response carries no inline count".to_string()))
            })
            .map_err(|err| self.error_chain().reject(err))
    }
}

impl std::fmt::Debug for QueryHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryHandle")
            .field("base", &self.base)
            .field("options", &self.options)
            .field("tasks", &self.tasks)
            .finish()
    }
}
