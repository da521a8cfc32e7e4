//! Engine state and its reducer
//!
//! State is an immutable snapshot. Every change goes through [`reduce`], which
//! takes the current snapshot and an [`Action`] and returns the next one.

use serde::{Deserialize, Serialize};
use vecscope_common::{Document, SortDirection};

use crate::compiler::{Filter, TypeMap};
use crate::discovery::DiscoveredAttribute;
use crate::pagination::{self, Pagination};

/// What the user asked for: filters, search text, ordering and page position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryState {
    pub search_text: String,
    pub active_filters: Vec<Filter>,
    pub sort_attribute: String,
    pub sort_direction: SortDirection,
    pub pagination: Pagination,
}

impl QueryState {
    pub fn new(page_size: usize) -> Self {
        Self {
            search_text: String::new(),
            active_filters: Vec::new(),
            sort_attribute: "id".to_string(),
            sort_direction: SortDirection::Asc,
            pagination: Pagination::new(page_size),
        }
    }

    /// Query mode: at least one filter or non-blank search text.
    pub fn is_query_mode(&self) -> bool {
        !self.active_filters.is_empty() || !self.search_text.trim().is_empty()
    }

    /// Whether rows are ordered by id, so cursors apply.
    pub fn is_keyset(&self) -> bool {
        self.sort_attribute == "id"
    }

    pub fn current_page(&self) -> usize {
        self.pagination.current_page
    }

    pub fn page_size(&self) -> usize {
        self.pagination.page_size
    }
}

/// Everything the engine knows at one instant.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineState {
    pub connection_id: String,
    pub namespace: String,
    pub query: QueryState,
    pub documents: Vec<Document>,
    pub total_count: Option<u64>,
    pub attributes: Vec<DiscoveredAttribute>,
    pub error: Option<String>,
    pub is_loading: bool,
    pub is_discovering: bool,
    /// Bumped on every input change and every issued load.
    pub generation: u64,
    in_flight: usize,
    next_filter_id: u64,
}

impl EngineState {
    pub fn new(connection_id: impl Into<String>, namespace: impl Into<String>, page_size: usize) -> Self {
        Self {
            connection_id: connection_id.into(),
            namespace: namespace.into(),
            query: QueryState::new(page_size),
            documents: Vec::new(),
            total_count: None,
            attributes: Vec::new(),
            error: None,
            is_loading: false,
            is_discovering: false,
            generation: 0,
            in_flight: 0,
            next_filter_id: 1,
        }
    }

    pub fn total_pages(&self) -> Option<usize> {
        self.total_count
            .map(|count| pagination::total_pages(count, self.query.page_size()))
    }

    /// Field types known from discovery, for coercion and compilation.
    pub fn type_map(&self) -> TypeMap {
        self.attributes
            .iter()
            .filter_map(|attr| attr.field_type().map(|ty| (attr.name.clone(), ty)))
            .collect()
    }

    pub fn attribute(&self, name: &str) -> Option<&DiscoveredAttribute> {
        self.attributes.iter().find(|attr| attr.name == name)
    }

    /// Id the next added filter will receive.
    pub fn next_filter_id(&self) -> u64 {
        self.next_filter_id
    }
}

/// A state transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// The filter's id is assigned by the reducer.
    AddFilter(Filter),
    /// Replace the filter with the same id.
    UpdateFilter(Filter),
    RemoveFilter(u64),
    ClearFilters,
    SetSearchText(String),
    /// Replace search text and filters at once, e.g. from history.
    RestoreQuery {
        search_text: String,
        filters: Vec<Filter>,
    },
    SetSort {
        attribute: String,
        direction: SortDirection,
    },
    SetPageSize(usize),
    SetNamespace {
        connection_id: String,
        namespace: String,
    },
    LoadStarted,
    LoadSucceeded {
        documents: Vec<Document>,
        total_count: u64,
        pagination: Pagination,
        append: bool,
    },
    LoadFailed(String),
    /// A load finished one way or another.
    LoadSettled,
    DiscoveryStarted,
    /// `None` keeps the previous attributes.
    DiscoveryFinished(Option<Vec<DiscoveredAttribute>>),
    ClearError,
}

/// Compute the next state.
pub fn reduce(state: &EngineState, action: Action) -> EngineState {
    let mut next = state.clone();

    match action {
        Action::AddFilter(mut filter) => {
            filter.id = next.next_filter_id;
            next.next_filter_id += 1;
            next.query.active_filters.push(filter);
            input_changed(&mut next);
        }
        Action::UpdateFilter(filter) => {
            if let Some(slot) = next.query.active_filters.iter_mut().find(|f| f.id == filter.id) {
                *slot = filter;
                input_changed(&mut next);
            }
        }
        Action::RemoveFilter(id) => {
            let before = next.query.active_filters.len();
            next.query.active_filters.retain(|f| f.id != id);
            if next.query.active_filters.len() != before {
                input_changed(&mut next);
            }
        }
        Action::ClearFilters => {
            if !next.query.active_filters.is_empty() {
                next.query.active_filters.clear();
                input_changed(&mut next);
            }
        }
        Action::SetSearchText(text) => {
            if next.query.search_text != text {
                next.query.search_text = text;
                input_changed(&mut next);
            }
        }
        Action::RestoreQuery { search_text, filters } => {
            next.query.search_text = search_text;
            next.query.active_filters = filters
                .into_iter()
                .map(|mut filter| {
                    filter.id = next.next_filter_id;
                    next.next_filter_id += 1;
                    filter
                })
                .collect();
            input_changed(&mut next);
        }
        Action::SetSort { attribute, direction } => {
            if next.query.sort_attribute != attribute || next.query.sort_direction != direction {
                next.query.sort_attribute = attribute;
                next.query.sort_direction = direction;
                input_changed(&mut next);
            }
        }
        Action::SetPageSize(size) => {
            let size = size.max(1);
            if next.query.page_size() != size {
                next.query.pagination.page_size = size;
                input_changed(&mut next);
            }
        }
        Action::SetNamespace { connection_id, namespace } => {
            next.connection_id = connection_id;
            next.namespace = namespace;
            next.query.active_filters.clear();
            next.query.search_text.clear();
            next.documents.clear();
            next.attributes.clear();
            next.total_count = None;
            input_changed(&mut next);
        }
        Action::LoadStarted => {
            next.in_flight += 1;
            next.is_loading = true;
            next.generation += 1;
        }
        Action::LoadSucceeded {
            documents,
            total_count,
            pagination,
            append,
        } => {
            if append {
                next.documents.extend(documents);
            } else {
                next.documents = documents;
            }
            next.total_count = Some(total_count);
            next.query.pagination = pagination;
            next.error = None;
        }
        Action::LoadFailed(message) => {
            next.error = Some(message);
        }
        Action::LoadSettled => {
            next.in_flight = next.in_flight.saturating_sub(1);
            next.is_loading = next.in_flight > 0;
        }
        Action::DiscoveryStarted => {
            next.is_discovering = true;
        }
        Action::DiscoveryFinished(attributes) => {
            next.is_discovering = false;
            if let Some(attributes) = attributes {
                next.attributes = attributes;
            }
        }
        Action::ClearError => {
            next.error = None;
        }
    }

    next
}

fn input_changed(state: &mut EngineState) {
    state.query.pagination.reset();
    state.generation += 1;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::FilterOperator;
    use vecscope_common::Value;

    fn filter(attribute: &str, value: &str) -> Filter {
        Filter::new(0, attribute, FilterOperator::Equals, Value::from(value), value)
    }

    fn paged(state: &EngineState) -> EngineState {
        let mut pagination = state.query.pagination.clone();
        pagination.current_page = 3;
        pagination.next_cursor = Some(Value::Int(30));
        pagination.previous_cursors = vec![Value::Int(10), Value::Int(20)];
        reduce(
            state,
            Action::LoadSucceeded {
                documents: vec![Document::new(21i64)],
                total_count: 100,
                pagination,
                append: false,
            },
        )
    }

    #[test]
    fn test_add_assigns_ids_and_resets_paging() {
        let state = paged(&EngineState::new("local", "docs", 10));
        let gen_before = state.generation;

        let state = reduce(&state, Action::AddFilter(filter("a", "x")));
        let state = reduce(&state, Action::AddFilter(filter("b", "y")));

        let ids: Vec<u64> = state.query.active_filters.iter().map(|f| f.id).collect();
        assert_eq!(ids, vec![1, 2]);
        assert_eq!(state.query.pagination, Pagination::new(10));
        assert_eq!(state.generation, gen_before + 2);
        assert!(state.query.is_query_mode());
    }

    #[test]
    fn test_update_and_remove() {
        let state = reduce(&EngineState::new("local", "docs", 10), Action::AddFilter(filter("a", "x")));
        let mut updated = state.query.active_filters[0].clone();
        updated.value = Value::from("z");

        let state = reduce(&state, Action::UpdateFilter(updated.clone()));
        assert_eq!(state.query.active_filters, vec![updated]);

        let unchanged = reduce(&state, Action::RemoveFilter(99));
        assert_eq!(unchanged.generation, state.generation);

        let state = reduce(&state, Action::RemoveFilter(1));
        assert!(state.query.active_filters.is_empty());
        assert!(!state.query.is_query_mode());
    }

    #[test]
    fn test_restore_query_renumbers() {
        let state = reduce(&EngineState::new("local", "docs", 10), Action::AddFilter(filter("a", "x")));
        let restored = reduce(
            &state,
            Action::RestoreQuery {
                search_text: "abc".into(),
                filters: vec![filter("b", "y"), filter("c", "z")],
            },
        );
        let ids: Vec<u64> = restored.query.active_filters.iter().map(|f| f.id).collect();
        assert_eq!(ids, vec![2, 3]);
        assert_eq!(restored.query.search_text, "abc");
    }

    #[test]
    fn test_same_search_text_is_noop() {
        let state = reduce(&EngineState::new("local", "docs", 10), Action::SetSearchText("abc".into()));
        let again = reduce(&state, Action::SetSearchText("abc".into()));
        assert_eq!(again, state);
    }

    #[test]
    fn test_sort_and_page_size_reset() {
        let state = paged(&EngineState::new("local", "docs", 10));
        let sorted = reduce(
            &state,
            Action::SetSort {
                attribute: "score".into(),
                direction: SortDirection::Desc,
            },
        );
        assert_eq!(sorted.query.current_page(), 1);
        assert!(!sorted.query.is_keyset());

        let resized = reduce(&paged(&sorted), Action::SetPageSize(25));
        assert_eq!(resized.query.pagination, Pagination::new(25));
    }

    #[test]
    fn test_load_lifecycle() {
        let state = EngineState::new("local", "docs", 10);
        let started = reduce(&state, Action::LoadStarted);
        let started = reduce(&started, Action::LoadStarted);
        assert!(started.is_loading);
        assert_eq!(started.generation, 2);

        let failed = reduce(&started, Action::LoadFailed("boom".into()));
        let settled = reduce(&failed, Action::LoadSettled);
        assert!(settled.is_loading);
        let settled = reduce(&settled, Action::LoadSettled);
        assert!(!settled.is_loading);
        assert_eq!(settled.error.as_deref(), Some("boom"));

        let ok = paged(&settled);
        assert_eq!(ok.error, None);
        assert_eq!(ok.total_pages(), Some(10));
    }

    #[test]
    fn test_append() {
        let state = paged(&EngineState::new("local", "docs", 10));
        let more = reduce(
            &state,
            Action::LoadSucceeded {
                documents: vec![Document::new(31i64)],
                total_count: 100,
                pagination: state.query.pagination.clone(),
                append: true,
            },
        );
        assert_eq!(more.documents.len(), 2);
    }

    #[test]
    fn test_namespace_switch_clears_everything() {
        let state = reduce(&paged(&EngineState::new("local", "docs", 10)), Action::AddFilter(filter("a", "x")));
        let state = reduce(
            &state,
            Action::SetNamespace {
                connection_id: "local".into(),
                namespace: "other".into(),
            },
        );
        assert!(state.documents.is_empty());
        assert!(state.query.active_filters.is_empty());
        assert_eq!(state.total_count, None);
        assert_eq!(state.namespace, "other");
    }

    #[test]
    fn test_discovery_keeps_attributes_on_failure() {
        let state = reduce(&EngineState::new("local", "docs", 10), Action::DiscoveryStarted);
        assert!(state.is_discovering);
        let state = reduce(&state, Action::DiscoveryFinished(None));
        assert!(!state.is_discovering);
        assert!(state.attributes.is_empty());
    }
}
