//! Query orchestration
//!
//! [`QueryOrchestrator`] is the façade the UI drives. It owns the engine state,
//! turns filter and search input into backend queries, pages through the
//! results and keeps the caches and the inferred schema up to date.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use vecscope_client::{FilterOperator, LoadOptions, MemoryBackend, QueryOrchestrator};
//!
//! # async fn example() {
//! let backend = Arc::new(MemoryBackend::new());
//! let engine = QueryOrchestrator::builder(backend).namespace("docs").build();
//!
//! engine.add_filter("tags", FilterOperator::Equals, "rust");
//! engine.load_documents(LoadOptions::default()).await;
//! for doc in engine.documents() {
//!     println!("{:?}", doc.id);
//! }
//! # }
//! ```

use std::sync::{Arc, Weak};

use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};
use vecscope_common::{
    Document, FilterExpr, QueryRequest, RankBy, Result, ScopeError, SortDirection, Value, WriteRequest,
    WriteResponse,
};

use crate::backend::NamespaceClient;
use crate::cache::{CachedPage, EngineCache, EngineCacheStats, QueryCacheKey, SchemaCacheKey};
use crate::coercion::coerce;
use crate::compiler::{self, Filter, FilterOperator};
use crate::config::EngineConfig;
use crate::debounce::Debouncer;
use crate::discovery::{self, DiscoveredAttribute};
use crate::history::{FilterHistory, HistoryEntry, HistoryKey, MemoryFilterHistory};
use crate::init::ClientInitializer;
use crate::pagination::Pagination;
use crate::state::{Action, EngineState, QueryState, reduce};

/// How a call to [`QueryOrchestrator::load_documents`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// Fetched from the backend.
    Loaded,
    /// Served from the query cache.
    Cached,
    /// Another load was in flight and this one was not forced.
    Skipped,
    /// A newer load or an input change superseded the response.
    Stale,
    /// The error is on the state's error channel.
    Failed,
}

/// Options for [`QueryOrchestrator::load_documents`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadOptions {
    /// Bypass the cache and the in-flight guard.
    pub force: bool,
    /// Fetch the page after the current one and append it.
    pub load_more: bool,
    /// Change the page size before loading.
    pub limit: Option<usize>,
    /// Load this page instead of the current one.
    pub page: Option<usize>,
}

impl LoadOptions {
    pub fn forced() -> Self {
        Self {
            force: true,
            ..Self::default()
        }
    }

    pub fn page(page: usize) -> Self {
        Self {
            page: Some(page),
            ..Self::default()
        }
    }
}

/// Builder for configuring and creating an orchestrator.
pub struct OrchestratorBuilder {
    client: Arc<dyn NamespaceClient>,
    connection_id: String,
    namespace: String,
    config: EngineConfig,
    history: Option<Arc<dyn FilterHistory>>,
}

impl OrchestratorBuilder {
    pub fn connection_id(mut self, connection_id: impl Into<String>) -> Self {
        self.connection_id = connection_id.into();
        self
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Use a custom history store instead of the in-memory one.
    pub fn history(mut self, history: Arc<dyn FilterHistory>) -> Self {
        self.history = Some(history);
        self
    }

    pub fn build(self) -> QueryOrchestrator {
        let config = self.config;
        let history: Arc<dyn FilterHistory> = match self.history {
            Some(history) => history,
            None => Arc::new(MemoryFilterHistory::new(config.history_limit)),
        };
        let state = EngineState::new(self.connection_id, self.namespace, config.page_size);

        QueryOrchestrator {
            inner: Arc::new(Inner {
                client: self.client,
                cache: EngineCache::new(config.cache_max_entries, config.cache_ttl()),
                debouncer: Debouncer::new(config.search_debounce()),
                history,
                state: Mutex::new(Arc::new(state)),
                config,
            }),
        }
    }
}

/// Cheap-to-clone handle onto one engine.
#[derive(Clone)]
pub struct QueryOrchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    client: Arc<dyn NamespaceClient>,
    config: EngineConfig,
    cache: EngineCache,
    history: Arc<dyn FilterHistory>,
    debouncer: Debouncer,
    state: Mutex<Arc<EngineState>>,
}

impl Inner {
    fn dispatch(&self, action: Action) -> Arc<EngineState> {
        let mut state = self.state.lock();
        apply(&mut state, action);
        state.clone()
    }
}

fn apply(state: &mut Arc<EngineState>, action: Action) {
    *state = Arc::new(reduce(state, action));
}

/// Settles the load counter however the load ends.
struct LoadGuard<'a> {
    inner: &'a Inner,
}

impl Drop for LoadGuard<'_> {
    fn drop(&mut self) {
        self.inner.dispatch(Action::LoadSettled);
    }
}

struct Fetched {
    documents: Vec<Document>,
    total_count: u64,
    pagination: Pagination,
    from_cache: bool,
}

impl QueryOrchestrator {
    pub fn builder(client: Arc<dyn NamespaceClient>) -> OrchestratorBuilder {
        OrchestratorBuilder {
            client,
            connection_id: "default".to_string(),
            namespace: String::new(),
            config: EngineConfig::default(),
            history: None,
        }
    }

    /// Build an orchestrator over the client produced by `initializer`.
    pub async fn connect(
        initializer: &ClientInitializer,
        namespace: impl Into<String>,
        config: EngineConfig,
    ) -> Result<Self> {
        let client = initializer.get_or_init().await?;
        Ok(Self::builder(client)
            .connection_id(initializer.connection_id())
            .namespace(namespace)
            .config(config)
            .build())
    }

    // Read accessors

    /// The current state.
    pub fn snapshot(&self) -> Arc<EngineState> {
        self.inner.state.lock().clone()
    }

    pub fn documents(&self) -> Vec<Document> {
        self.snapshot().documents.clone()
    }

    pub fn total_count(&self) -> Option<u64> {
        self.snapshot().total_count
    }

    pub fn attributes(&self) -> Vec<DiscoveredAttribute> {
        self.snapshot().attributes.clone()
    }

    pub fn current_page(&self) -> usize {
        self.snapshot().query.current_page()
    }

    /// Number of pages for the current query; 1 until a count is known.
    pub fn total_pages(&self) -> usize {
        self.snapshot().total_pages().unwrap_or(1)
    }

    pub fn error(&self) -> Option<String> {
        self.snapshot().error.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.snapshot().is_loading
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn cache_stats(&self) -> EngineCacheStats {
        self.inner.cache.stats()
    }

    /// Past queries for the current namespace, newest first.
    pub fn history(&self) -> Vec<HistoryEntry> {
        let state = self.snapshot();
        self.inner
            .history
            .entries(&HistoryKey::new(&state.connection_id, &state.namespace))
    }

    // Input mutations

    /// Add a filter, coercing `raw` to the attribute's inferred type.
    /// Returns the new filter's id.
    pub fn add_filter(&self, attribute: &str, operator: FilterOperator, raw: &str) -> u64 {
        let mut state = self.inner.state.lock();
        let id = state.next_filter_id();
        let filter = build_filter(&state, id, attribute, operator, raw);
        apply(&mut state, Action::AddFilter(filter));
        debug!(id, attribute, %operator, "Filter added");
        id
    }

    /// Replace the operator and value of an existing filter.
    pub fn update_filter(&self, id: u64, operator: FilterOperator, raw: &str) -> Result<()> {
        let mut state = self.inner.state.lock();
        let attribute = state
            .query
            .active_filters
            .iter()
            .find(|f| f.id == id)
            .map(|f| f.attribute.clone())
            .ok_or_else(|| ScopeError::NotFound(format!("filter {id}")))?;
        let filter = build_filter(&state, id, &attribute, operator, raw);
        apply(&mut state, Action::UpdateFilter(filter));
        Ok(())
    }

    /// Remove a filter. Returns whether it existed.
    pub fn remove_filter(&self, id: u64) -> bool {
        let before = self.snapshot().query.active_filters.len();
        let after = self.inner.dispatch(Action::RemoveFilter(id)).query.active_filters.len();
        before != after
    }

    pub fn clear_filters(&self) {
        self.inner.dispatch(Action::ClearFilters);
    }

    /// Update the search text now and load once typing pauses.
    ///
    /// Must be called from within a tokio runtime.
    pub fn set_search_text(&self, text: impl Into<String>) {
        self.inner.dispatch(Action::SetSearchText(text.into()));

        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        self.inner.debouncer.schedule(async move {
            if let Some(inner) = weak.upgrade() {
                let outcome = QueryOrchestrator { inner }.load_documents(LoadOptions::default()).await;
                debug!(?outcome, "Debounced search load finished");
            }
        });
    }

    pub fn set_sort(&self, attribute: impl Into<String>, direction: SortDirection) {
        self.inner.dispatch(Action::SetSort {
            attribute: attribute.into(),
            direction,
        });
    }

    pub fn set_page_size(&self, page_size: usize) {
        self.inner.dispatch(Action::SetPageSize(page_size));
    }

    /// Switch to another namespace, dropping filters, rows and schema.
    pub fn set_namespace(&self, namespace: impl Into<String>) {
        self.inner.debouncer.cancel();
        let connection_id = self.snapshot().connection_id.clone();
        self.inner.dispatch(Action::SetNamespace {
            connection_id,
            namespace: namespace.into(),
        });
    }

    /// Bring back the search text and filters of a history entry.
    pub fn restore_history(&self, entry: &HistoryEntry) {
        self.inner.dispatch(Action::RestoreQuery {
            search_text: entry.search_text.clone(),
            filters: entry.filters.clone(),
        });
    }

    /// Drop every cached page and schema.
    pub fn clear_cache(&self) {
        self.inner.cache.clear_all();
        info!("Caches cleared");
    }

    pub fn clear_error(&self) {
        self.inner.dispatch(Action::ClearError);
    }

    // Loading

    /// Load the current page (or the one named in `options`).
    ///
    /// Never fails: errors land on the state's error channel.
    pub async fn load_documents(&self, options: LoadOptions) -> LoadOutcome {
        let (outcome, inputs_changed) = self.load_once(options).await;
        if inputs_changed {
            debug!("Inputs changed during load, reloading");
            return self
                .load_once(LoadOptions {
                    force: options.force,
                    ..LoadOptions::default()
                })
                .await
                .0;
        }
        outcome
    }

    pub async fn next_page(&self) -> Result<LoadOutcome> {
        let state = self.snapshot();
        if !state.query.pagination.has_next(state.total_pages()) {
            return Err(ScopeError::InvalidOperation("already on the last page".into()));
        }
        Ok(self.load_documents(LoadOptions::page(state.query.current_page() + 1)).await)
    }

    pub async fn previous_page(&self) -> Result<LoadOutcome> {
        let state = self.snapshot();
        if !state.query.pagination.has_previous() {
            return Err(ScopeError::InvalidOperation("already on the first page".into()));
        }
        Ok(self.load_documents(LoadOptions::page(state.query.current_page() - 1)).await)
    }

    pub async fn go_to_page(&self, page: usize) -> Result<LoadOutcome> {
        let state = self.snapshot();
        let last = state.total_pages().unwrap_or(usize::MAX);
        if page == 0 || page > last {
            return Err(ScopeError::InvalidOperation(format!(
                "page {page} is out of range (1..={})",
                state.total_pages().unwrap_or(1)
            )));
        }
        Ok(self.load_documents(LoadOptions::page(page)).await)
    }

    /// Fetch more rows onto the end of the current list.
    ///
    /// Returns `Skipped` once the data is exhausted.
    pub async fn load_more(&self) -> LoadOutcome {
        let state = self.snapshot();
        if !state.query.pagination.has_next(state.total_pages()) {
            debug!("Nothing more to load");
            return LoadOutcome::Skipped;
        }
        self.load_documents(LoadOptions {
            load_more: true,
            ..LoadOptions::default()
        })
        .await
    }

    /// One load attempt. The flag reports whether inputs changed while it
    /// was in flight.
    async fn load_once(&self, options: LoadOptions) -> (LoadOutcome, bool) {
        let (generation, snapshot) = {
            let mut state = self.inner.state.lock();
            if state.is_loading && !options.force {
                debug!("Load already in flight, skipping");
                return (LoadOutcome::Skipped, false);
            }
            if let Some(limit) = options.limit {
                apply(&mut state, Action::SetPageSize(limit));
            }
            apply(&mut state, Action::LoadStarted);
            (state.generation, state.clone())
        };
        let _guard = LoadGuard { inner: &self.inner };

        let result = self.fetch(&snapshot, &options).await;

        let mut state = self.inner.state.lock();
        if state.generation != generation {
            let inputs_changed = !same_inputs(&state, &snapshot);
            debug!(generation, current = state.generation, "Dropping stale response");
            return (LoadOutcome::Stale, inputs_changed);
        }

        match result {
            Ok(fetched) => {
                let outcome = if fetched.from_cache {
                    LoadOutcome::Cached
                } else {
                    LoadOutcome::Loaded
                };
                let first_page = fetched.pagination.current_page == 1 && !options.load_more;
                apply(
                    &mut state,
                    Action::LoadSucceeded {
                        documents: fetched.documents,
                        total_count: fetched.total_count,
                        pagination: fetched.pagination,
                        append: options.load_more,
                    },
                );
                let current = state.clone();
                drop(state);

                if first_page && current.query.is_query_mode() {
                    self.record_history(&current);
                }
                self.discover_from_page(&current);
                (outcome, false)
            }
            Err(e) => {
                warn!(namespace = %snapshot.namespace, "Load failed: {e}");
                apply(&mut state, Action::LoadFailed(e.message().to_string()));
                (LoadOutcome::Failed, false)
            }
        }
    }

    async fn fetch(&self, snapshot: &EngineState, options: &LoadOptions) -> Result<Fetched> {
        let query = &snapshot.query;
        let page_size = query.page_size();
        let requested = match options.page {
            Some(page) => page,
            None if options.load_more => query.current_page() + 1,
            None => query.current_page(),
        };

        let plan = query.pagination.plan(
            requested,
            query.is_keyset(),
            snapshot.total_pages(),
            self.inner.config.max_overfetch,
        )?;
        let mut pagination = query.pagination.clone();
        let key = query_key(snapshot, requested);

        if !options.force
            && let Some(cached) = self.inner.cache.queries.get(&key)
        {
            debug!(namespace = %snapshot.namespace, page = requested, "Query cache hit");
            pagination.restore(&plan, cached.next_cursor.clone());
            return Ok(Fetched {
                documents: cached.documents.clone(),
                total_count: cached.total_count,
                pagination,
                from_cache: true,
            });
        }
        debug!(namespace = %snapshot.namespace, page = requested, ?plan, "Query cache miss");

        let filters = compiler::compile(&query.active_filters, &query.search_text, &snapshot.type_map());

        let total_count = self
            .inner
            .client
            .query(&snapshot.namespace, self.consistent(QueryRequest::count(filters.clone())))
            .await?
            .count()?;

        let filters = match plan.cursor() {
            Some(cursor) => Some(compiler::with_cursor(filters, cursor, query.sort_direction)),
            None => filters,
        };
        let request = QueryRequest::rows(
            filters,
            RankBy::new(query.sort_attribute.clone(), query.sort_direction),
            plan.top_k(page_size),
        );
        let response = self
            .inner
            .client
            .query(&snapshot.namespace, self.consistent(request))
            .await?;
        let documents = pagination.commit(&plan, response.rows);

        info!(
            namespace = %snapshot.namespace,
            page = requested,
            rows = documents.len(),
            total = total_count,
            "Loaded documents"
        );

        self.inner.cache.queries.insert(
            key,
            CachedPage {
                documents: documents.clone(),
                total_count,
                next_cursor: pagination.next_cursor.clone(),
            },
        );

        Ok(Fetched {
            documents,
            total_count,
            pagination,
            from_cache: false,
        })
    }

    fn consistent(&self, request: QueryRequest) -> QueryRequest {
        match self.inner.config.consistency {
            Some(level) => request.with_consistency(level),
            None => request,
        }
    }

    fn record_history(&self, state: &EngineState) {
        let entry = HistoryEntry {
            search_text: state.query.search_text.clone(),
            filters: state.query.active_filters.clone(),
            timestamp: Utc::now(),
            description: compiler::describe(&state.query.active_filters, &state.query.search_text),
        };
        self.inner
            .history
            .record(&HistoryKey::new(&state.connection_id, &state.namespace), entry);
    }

    // Discovery

    /// Infer attributes from the loaded page when no schema is cached.
    fn discover_from_page(&self, state: &EngineState) {
        let key = schema_key(state, &self.inner.config);
        if let Some(cached) = self.inner.cache.schemas.get(&key) {
            if state.attributes.is_empty() {
                self.inner
                    .dispatch(Action::DiscoveryFinished(Some(cached.to_vec())));
            }
            return;
        }
        if state.documents.is_empty() {
            return;
        }

        let attributes = discovery::discover(&state.documents, &self.inner.config.discovery);
        debug!(namespace = %state.namespace, attributes = attributes.len(), "Discovered attributes from page");
        self.inner.cache.schemas.insert(key, attributes.clone());
        self.inner.dispatch(Action::DiscoveryFinished(Some(attributes)));
    }

    /// Sample the namespace and infer its attributes.
    ///
    /// Failures are logged and leave the previous attributes in place.
    pub async fn discover_attributes(&self, force: bool) -> Vec<DiscoveredAttribute> {
        let snapshot = self.snapshot();
        let options = &self.inner.config.discovery;
        let key = schema_key(&snapshot, &self.inner.config);

        if !force && let Some(cached) = self.inner.cache.schemas.get(&key) {
            debug!(namespace = %snapshot.namespace, "Schema cache hit");
            return self
                .inner
                .dispatch(Action::DiscoveryFinished(Some(cached.to_vec())))
                .attributes
                .clone();
        }

        self.inner.dispatch(Action::DiscoveryStarted);
        let result = self
            .inner
            .client
            .query(&snapshot.namespace, self.consistent(options.sample_request()))
            .await;

        let attributes = match result {
            Ok(response) => Some(discovery::discover(&response.rows, options)),
            Err(e) => {
                warn!(namespace = %snapshot.namespace, "Attribute discovery failed: {e}");
                None
            }
        };

        let current = self.snapshot();
        if current.namespace != snapshot.namespace || current.connection_id != snapshot.connection_id {
            debug!("Namespace changed during discovery, discarding");
            return self.inner.dispatch(Action::DiscoveryFinished(None)).attributes.clone();
        }

        if let Some(attributes) = &attributes {
            info!(namespace = %snapshot.namespace, attributes = attributes.len(), "Discovered attributes");
            self.inner.cache.schemas.insert(key, attributes.clone());
        }
        self.inner.dispatch(Action::DiscoveryFinished(attributes)).attributes.clone()
    }

    // Writes

    pub async fn upsert(&self, documents: Vec<Document>) -> Result<WriteResponse> {
        if documents.is_empty() {
            return Err(ScopeError::InvalidOperation("nothing to upsert".into()));
        }
        self.write(WriteRequest::upsert(&documents)).await
    }

    /// Update only the attributes present on each document.
    pub async fn patch(&self, documents: Vec<Document>) -> Result<WriteResponse> {
        if documents.is_empty() {
            return Err(ScopeError::InvalidOperation("nothing to patch".into()));
        }
        self.write(WriteRequest::patch(&documents)).await
    }

    pub async fn delete(&self, ids: Vec<Value>) -> Result<WriteResponse> {
        if ids.is_empty() {
            return Err(ScopeError::InvalidOperation("no ids to delete".into()));
        }
        self.write(WriteRequest::delete(ids)).await
    }

    pub async fn delete_by_filter(&self, filter: FilterExpr) -> Result<WriteResponse> {
        self.write(WriteRequest::delete_by_filter(filter)).await
    }

    async fn write(&self, request: WriteRequest) -> Result<WriteResponse> {
        let snapshot = self.snapshot();
        let response = self.inner.client.write(&snapshot.namespace, request).await?;

        let dropped = self
            .inner
            .cache
            .invalidate_namespace(&snapshot.connection_id, &snapshot.namespace);
        info!(
            namespace = %snapshot.namespace,
            rows_affected = response.rows_affected,
            invalidated = dropped,
            "Write applied"
        );
        Ok(response)
    }
}

fn build_filter(state: &EngineState, id: u64, attribute: &str, operator: FilterOperator, raw: &str) -> Filter {
    let field_type = state.attribute(attribute).and_then(DiscoveredAttribute::field_type);
    let value = match operator {
        FilterOperator::Matches
        | FilterOperator::NotMatches
        | FilterOperator::Imatches
        | FilterOperator::NotImatches => Value::String(raw.to_string()),
        _ => coerce(raw, field_type.as_ref()),
    };
    Filter::new(id, attribute, operator, value, raw)
}

fn same_inputs(current: &EngineState, started: &EngineState) -> bool {
    let (a, b): (&QueryState, &QueryState) = (&current.query, &started.query);
    current.namespace == started.namespace
        && current.connection_id == started.connection_id
        && a.search_text == b.search_text
        && a.active_filters == b.active_filters
        && a.sort_attribute == b.sort_attribute
        && a.sort_direction == b.sort_direction
        && a.page_size() == b.page_size()
}

#[derive(Serialize)]
struct FilterShape<'a> {
    attribute: &'a str,
    operator: FilterOperator,
    value: &'a Value,
}

fn query_key(state: &EngineState, page: usize) -> QueryCacheKey {
    let shapes: Vec<FilterShape<'_>> = state
        .query
        .active_filters
        .iter()
        .map(|f| FilterShape {
            attribute: &f.attribute,
            operator: f.operator,
            value: &f.value,
        })
        .collect();

    QueryCacheKey {
        connection_id: state.connection_id.clone(),
        namespace: state.namespace.clone(),
        search_text: state.query.search_text.trim().to_string(),
        filters: serde_json::to_string(&shapes).unwrap_or_default(),
        sort_attribute: state.query.sort_attribute.clone(),
        sort_direction: state.query.sort_direction,
        page,
        page_size: state.query.page_size(),
    }
}

fn schema_key(state: &EngineState, config: &EngineConfig) -> SchemaCacheKey {
    SchemaCacheKey {
        connection_id: state.connection_id.clone(),
        namespace: state.namespace.clone(),
        options: config.discovery.fingerprint(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBackend;

    fn engine(docs: Vec<Document>) -> (QueryOrchestrator, Arc<MemoryBackend>) {
        let backend = Arc::new(MemoryBackend::with_documents("docs", docs));
        let config = EngineConfig {
            page_size: 2,
            ..EngineConfig::default()
        };
        let engine = QueryOrchestrator::builder(backend.clone())
            .connection_id("local")
            .namespace("docs")
            .config(config)
            .build();
        (engine, backend)
    }

    #[test]
    fn test_add_filter_coerces_with_discovered_type() {
        let (engine, _) = engine(Vec::new());
        let state = EngineState::new("local", "docs", 2);
        let state = reduce(
            &state,
            Action::DiscoveryFinished(Some(discovery::discover(
                &[Document::new(1i64).with("score", 3i64).with("tags", vec!["a"])],
                &engine.config().discovery,
            ))),
        );

        let filter = build_filter(&state, 1, "score", FilterOperator::Greater, "2.5");
        assert_eq!(filter.value, Value::Float(2.5));

        let filter = build_filter(&state, 1, "tags", FilterOperator::In, "a, b");
        assert_eq!(filter.value, Value::from(vec!["a", "b"]));

        let filter = build_filter(&state, 1, "score", FilterOperator::Matches, "1*");
        assert_eq!(filter.value, Value::from("1*"));

        let filter = build_filter(&state, 1, "unknown", FilterOperator::Equals, "7");
        assert_eq!(filter.value, Value::from("7"));
    }

    #[test]
    fn test_filter_mutations() {
        let (engine, _) = engine(Vec::new());
        let id = engine.add_filter("a", FilterOperator::Equals, "x");
        assert_eq!(id, 1);
        assert!(engine.update_filter(id, FilterOperator::NotEquals, "y").is_ok());
        assert!(engine.update_filter(42, FilterOperator::Equals, "y").is_err());

        let filters = engine.snapshot().query.active_filters.clone();
        assert_eq!(filters[0].operator, FilterOperator::NotEquals);
        assert_eq!(filters[0].display_value, "y");

        assert!(engine.remove_filter(id));
        assert!(!engine.remove_filter(id));
    }

    #[test]
    fn test_cache_key_ignores_filter_ids() {
        let (engine, _) = engine(Vec::new());
        engine.add_filter("a", FilterOperator::Equals, "x");
        let first = query_key(&engine.snapshot(), 1);

        engine.clear_filters();
        engine.add_filter("a", FilterOperator::Equals, "x");
        let second = query_key(&engine.snapshot(), 1);

        assert_eq!(first, second);
        assert_ne!(first, query_key(&engine.snapshot(), 2));
    }

    #[tokio::test]
    async fn test_load_then_cached() {
        let docs = (1..=5).map(|i| Document::new(i as i64).with("n", i as i64)).collect();
        let (engine, backend) = engine(docs);

        assert_eq!(engine.load_documents(LoadOptions::default()).await, LoadOutcome::Loaded);
        assert_eq!(backend.query_count(), 2);
        assert_eq!(engine.total_count(), Some(5));
        assert_eq!(engine.total_pages(), 3);
        assert!(!engine.is_loading());
        assert_eq!(engine.attributes().len(), 1);

        assert_eq!(engine.load_documents(LoadOptions::default()).await, LoadOutcome::Cached);
        assert_eq!(backend.query_count(), 2);

        assert_eq!(engine.load_documents(LoadOptions::forced()).await, LoadOutcome::Loaded);
        assert_eq!(backend.query_count(), 4);
    }

    #[tokio::test]
    async fn test_failure_goes_to_error_channel() {
        let (engine, backend) = engine(vec![Document::new(1i64)]);
        backend.fail_next(ScopeError::Network("connection reset".into()));

        assert_eq!(engine.load_documents(LoadOptions::default()).await, LoadOutcome::Failed);
        assert_eq!(engine.error().as_deref(), Some("connection reset"));
        assert!(!engine.is_loading());

        assert_eq!(engine.load_documents(LoadOptions::default()).await, LoadOutcome::Loaded);
        assert_eq!(engine.error(), None);
    }
}
