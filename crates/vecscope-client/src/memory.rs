//! In-memory namespace backend.
//!
//! [`MemoryBackend`] keeps documents per namespace and answers queries by
//! brute force: evaluate the filter AST against every row, rank, truncate.
//! It backs the integration tests and the REPL.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use regex::Regex;
use tracing::debug;
use vecscope_common::protocol::{Aggregate, Performance};
use vecscope_common::{
    Document, FilterExpr, FilterOp, QueryRequest, QueryResponse, Result, ScopeError, SortDirection, Value,
    WriteRequest, WriteResponse,
};

use crate::backend::NamespaceClient;

/// Rows returned when a query sets no `top_k`.
pub const DEFAULT_TOP_K: usize = 10;

type Rows = IndexMap<String, Document>;

/// Brute-force backend holding every namespace in memory.
#[derive(Default)]
pub struct MemoryBackend {
    namespaces: RwLock<HashMap<String, Rows>>,
    queries: AtomicUsize,
    writes: AtomicUsize,
    failures: Mutex<VecDeque<ScopeError>>,
    latency: Mutex<Option<Duration>>,
    last_query: Mutex<Option<QueryRequest>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a backend with one namespace already populated.
    pub fn with_documents(namespace: impl Into<String>, documents: Vec<Document>) -> Self {
        let backend = Self::new();
        backend.insert(namespace, documents);
        backend
    }

    /// Replace-or-insert documents by id.
    pub fn insert(&self, namespace: impl Into<String>, documents: Vec<Document>) -> usize {
        let mut namespaces = self.namespaces.write();
        let rows = namespaces.entry(namespace.into()).or_default();
        let count = documents.len();
        for doc in documents {
            rows.insert(doc.id.canonical_key(), doc);
        }
        count
    }

    /// Load a JSON array of rows into a namespace.
    pub fn load_json(&self, namespace: impl Into<String>, json: &str) -> Result<usize> {
        let documents: Vec<Document> = serde_json::from_str(json)?;
        Ok(self.insert(namespace, documents))
    }

    pub fn namespaces(&self) -> Vec<String> {
        let mut names: Vec<String> = self.namespaces.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self, namespace: &str) -> usize {
        self.namespaces.read().get(namespace).map(IndexMap::len).unwrap_or(0)
    }

    pub fn get(&self, namespace: &str, id: &Value) -> Option<Document> {
        self.namespaces
            .read()
            .get(namespace)
            .and_then(|rows| rows.get(&id.canonical_key()).cloned())
    }

    /// Number of `query` calls served so far.
    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// The most recent query request received.
    pub fn last_query(&self) -> Option<QueryRequest> {
        self.last_query.lock().clone()
    }

    /// Make the next call (query or write) fail with `error`.
    pub fn fail_next(&self, error: ScopeError) {
        self.failures.lock().push_back(error);
    }

    /// Delay every call by `latency`.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock() = latency;
    }

    async fn simulate_network(&self) -> Result<()> {
        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        let failure = self.failures.lock().pop_front();
        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn run_query(&self, namespace: &str, request: &QueryRequest) -> Result<QueryResponse> {
        let started = Instant::now();
        let namespaces = self.namespaces.read();
        let rows = namespaces
            .get(namespace)
            .ok_or_else(|| ScopeError::NotFound(format!("namespace '{namespace}'")))?;

        let predicate = request.filters.as_ref().map(Predicate::compile).transpose()?;
        let mut matched: Vec<&Document> = rows
            .values()
            .filter(|doc| predicate.as_ref().is_none_or(|p| p.matches(doc)))
            .collect();

        if let Some(aggregates) = &request.aggregate_by {
            let aggregations = aggregates
                .iter()
                .map(|(name, aggregate)| match aggregate {
                    Aggregate::Count => (name.clone(), Value::Int(matched.len() as i64)),
                })
                .collect();
            return Ok(QueryResponse {
                rows: Vec::new(),
                aggregations: Some(aggregations),
                performance: Some(performance(started)),
            });
        }

        let (attribute, direction) = match &request.rank_by {
            Some(rank) => (rank.attribute.as_str(), rank.direction),
            None => ("id", SortDirection::Asc),
        };
        matched.sort_by(|a, b| {
            let left = a.get(attribute).unwrap_or(&Value::Null);
            let right = b.get(attribute).unwrap_or(&Value::Null);
            let ord = left.total_cmp(right).then_with(|| a.id.total_cmp(&b.id));
            match direction {
                SortDirection::Asc => ord,
                SortDirection::Desc => ord.reverse(),
            }
        });

        let top_k = request.top_k.unwrap_or(DEFAULT_TOP_K);
        let rows = matched
            .into_iter()
            .take(top_k)
            .map(|doc| doc.project(&request.include_attributes))
            .collect();

        Ok(QueryResponse {
            rows,
            aggregations: None,
            performance: Some(performance(started)),
        })
    }

    fn run_write(&self, namespace: &str, request: WriteRequest) -> Result<WriteResponse> {
        if request.is_empty() {
            return Err(ScopeError::InvalidOperation("write request carries no operation".into()));
        }

        let mut namespaces = self.namespaces.write();
        let rows = namespaces.entry(namespace.to_string()).or_default();
        let mut affected = 0u64;

        if let Some(columns) = request.upsert_columns {
            for doc in columns.to_documents(true)? {
                rows.insert(doc.id.canonical_key(), doc);
                affected += 1;
            }
        }

        if let Some(columns) = request.patch_columns {
            for patch in columns.to_documents(true)? {
                if let Some(existing) = rows.get_mut(&patch.id.canonical_key()) {
                    for (name, value) in patch.attribute_bag() {
                        existing.set(name, value.clone());
                    }
                    affected += 1;
                }
            }
        }

        if let Some(ids) = request.deletes {
            for id in ids {
                if rows.shift_remove(&id.canonical_key()).is_some() {
                    affected += 1;
                }
            }
        }

        if let Some(filter) = request.delete_by_filter {
            let predicate = Predicate::compile(&filter)?;
            let before = rows.len();
            rows.retain(|_, doc| !predicate.matches(doc));
            affected += (before - rows.len()) as u64;
        }

        Ok(WriteResponse { rows_affected: affected })
    }
}

#[async_trait]
impl NamespaceClient for MemoryBackend {
    async fn query(&self, namespace: &str, request: QueryRequest) -> Result<QueryResponse> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        *self.last_query.lock() = Some(request.clone());
        self.simulate_network().await?;
        let response = self.run_query(namespace, &request)?;
        debug!(namespace, rows = response.rows.len(), "memory query");
        Ok(response)
    }

    async fn write(&self, namespace: &str, request: WriteRequest) -> Result<WriteResponse> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.simulate_network().await?;
        let response = self.run_write(namespace, request)?;
        debug!(namespace, rows_affected = response.rows_affected, "memory write");
        Ok(response)
    }
}

fn performance(started: Instant) -> Performance {
    let ms = started.elapsed().as_secs_f64() * 1000.0;
    Performance {
        server_total_ms: Some(ms),
        query_execution_ms: Some(ms),
        ..Performance::default()
    }
}

// Predicate evaluation

/// A filter expression with its patterns compiled.
enum Predicate {
    All(Vec<Predicate>),
    Any(Vec<Predicate>),
    Not(Box<Predicate>),
    Leaf {
        attribute: String,
        op: FilterOp,
        value: Value,
        pattern: Option<Regex>,
    },
}

impl Predicate {
    fn compile(expr: &FilterExpr) -> Result<Self> {
        Ok(match expr {
            FilterExpr::And(nodes) => Predicate::All(nodes.iter().map(Self::compile).collect::<Result<_>>()?),
            FilterExpr::Or(nodes) => Predicate::Any(nodes.iter().map(Self::compile).collect::<Result<_>>()?),
            FilterExpr::Not(inner) => Predicate::Not(Box::new(Self::compile(inner)?)),
            FilterExpr::Condition { attribute, op, value } => {
                let pattern = match op {
                    FilterOp::Glob | FilterOp::NotGlob => Some(glob_regex(&value.to_display_string(), false)?),
                    FilterOp::IGlob | FilterOp::NotIGlob => Some(glob_regex(&value.to_display_string(), true)?),
                    FilterOp::Regex => Some(
                        Regex::new(&value.to_display_string())
                            .map_err(|e| ScopeError::InvalidOperation(format!("invalid regex: {e}")))?,
                    ),
                    _ => None,
                };
                Predicate::Leaf {
                    attribute: attribute.clone(),
                    op: *op,
                    value: value.clone(),
                    pattern,
                }
            }
        })
    }

    fn matches(&self, doc: &Document) -> bool {
        match self {
            Predicate::All(nodes) => nodes.iter().all(|n| n.matches(doc)),
            Predicate::Any(nodes) => nodes.iter().any(|n| n.matches(doc)),
            Predicate::Not(inner) => !inner.matches(doc),
            Predicate::Leaf {
                attribute,
                op,
                value,
                pattern,
            } => {
                let actual = doc.get(attribute).unwrap_or(&Value::Null);
                eval_leaf(actual, *op, value, pattern.as_ref())
            }
        }
    }
}

fn eval_leaf(actual: &Value, op: FilterOp, expected: &Value, pattern: Option<&Regex>) -> bool {
    match op {
        FilterOp::Eq => actual.loose_eq(expected),
        FilterOp::NotEq => !actual.loose_eq(expected),
        FilterOp::In => list(expected).iter().any(|v| actual.loose_eq(v)),
        FilterOp::NotIn => !list(expected).iter().any(|v| actual.loose_eq(v)),
        FilterOp::Lt => ordered(actual, expected, |o| o.is_lt()),
        FilterOp::Lte => ordered(actual, expected, |o| o.is_le()),
        FilterOp::Gt => ordered(actual, expected, |o| o.is_gt()),
        FilterOp::Gte => ordered(actual, expected, |o| o.is_ge()),
        FilterOp::Glob | FilterOp::IGlob | FilterOp::Regex => text_matches(actual, pattern),
        FilterOp::NotGlob | FilterOp::NotIGlob => !text_matches(actual, pattern),
        FilterOp::Contains => match actual {
            Value::Array(items) => items.iter().any(|v| v.loose_eq(expected)),
            other => other.loose_eq(expected),
        },
        FilterOp::ContainsAny => {
            let wanted = list(expected);
            match actual {
                Value::Array(items) => items.iter().any(|v| wanted.iter().any(|w| v.loose_eq(w))),
                other => wanted.iter().any(|w| other.loose_eq(w)),
            }
        }
        FilterOp::ContainsAllTokens => {
            let haystack = tokens(&actual.to_display_string());
            tokens(&expected.to_display_string())
                .iter()
                .all(|t| haystack.contains(t))
        }
    }
}

fn list(value: &Value) -> &[Value] {
    match value {
        Value::Array(items) => items,
        other => std::slice::from_ref(other),
    }
}

fn ordered(actual: &Value, expected: &Value, test: impl Fn(std::cmp::Ordering) -> bool) -> bool {
    if actual.is_null() {
        return false;
    }
    actual.compare(expected).is_some_and(test)
}

/// Strings match directly; arrays match when any element does.
fn text_matches(actual: &Value, pattern: Option<&Regex>) -> bool {
    let Some(pattern) = pattern else {
        return false;
    };
    match actual {
        Value::Null => false,
        Value::Array(items) => items.iter().any(|v| text_matches(v, Some(pattern))),
        other => pattern.is_match(&other.to_display_string()),
    }
}

fn tokens(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Translate a glob (`*`, `?`, `[...]`) into an anchored regex.
fn glob_regex(glob: &str, case_insensitive: bool) -> Result<Regex> {
    let mut pattern = String::from(if case_insensitive { "(?is)^" } else { "(?s)^" });
    let mut chars = glob.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => pattern.push_str(".*"),
            '?' => pattern.push('.'),
            '[' => {
                let mut class = String::new();
                let mut closed = false;
                for next in chars.by_ref() {
                    if next == ']' {
                        closed = true;
                        break;
                    }
                    class.push(next);
                }
                if closed && !class.is_empty() {
                    pattern.push('[');
                    if let Some(rest) = class.strip_prefix('!') {
                        pattern.push('^');
                        pattern.push_str(&rest.replace('\\', "\\\\"));
                    } else {
                        pattern.push_str(&class.replace('\\', "\\\\"));
                    }
                    pattern.push(']');
                } else {
                    pattern.push_str(&regex::escape(&format!("[{class}")));
                    if closed {
                        pattern.push_str(&regex::escape("]"));
                    }
                }
            }
            other => pattern.push_str(&regex::escape(other.encode_utf8(&mut [0; 4]))),
        }
    }
    pattern.push('$');
    Regex::new(&pattern).map_err(|e| ScopeError::InvalidOperation(format!("invalid glob '{glob}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use vecscope_common::RankBy;
    use vecscope_common::protocol::IncludeAttributes;

    fn backend() -> MemoryBackend {
        MemoryBackend::with_documents(
            "docs",
            vec![
                Document::new(1i64).with("title", "Alpha").with("score", 3i64).with("tags", vec!["a", "b"]),
                Document::new(2i64).with("title", "beta").with("score", 1.5).with("tags", vec!["c"]),
                Document::new(3i64).with("title", "Gamma ray").with("score", 7i64),
                Document::new(4i64).with("score", Value::Null),
            ],
        )
    }

    fn ids(resp: &QueryResponse) -> Vec<i64> {
        resp.rows.iter().filter_map(|d| d.id.as_i64()).collect()
    }

    async fn query(backend: &MemoryBackend, filter: Option<FilterExpr>) -> QueryResponse {
        backend
            .query("docs", QueryRequest::rows(filter, RankBy::id_asc(), 100))
            .await
            .expect("query")
    }

    #[test]
    fn test_glob_translation() {
        let re = glob_regex("*lph?", false).expect("glob");
        assert!(re.is_match("Alpha"));
        assert!(!re.is_match("Alphas"));
        assert!(glob_regex("al*", true).expect("glob").is_match("ALPHA"));
        assert!(glob_regex("[ab]x", false).expect("glob").is_match("bx"));
        assert!(glob_regex("[!ab]x", false).expect("glob").is_match("cx"));
        assert!(glob_regex("a.b", false).expect("glob").is_match("a.b"));
        assert!(!glob_regex("a.b", false).expect("glob").is_match("axb"));
    }

    #[tokio::test]
    async fn test_filters() {
        let b = backend();

        let r = query(&b, Some(FilterExpr::condition("score", FilterOp::Gt, 2i64))).await;
        assert_eq!(ids(&r), vec![1, 3]);

        let r = query(&b, Some(FilterExpr::condition("tags", FilterOp::ContainsAny, vec!["b", "c"]))).await;
        assert_eq!(ids(&r), vec![1, 2]);

        let r = query(&b, Some(FilterExpr::condition("title", FilterOp::IGlob, "*A*"))).await;
        assert_eq!(ids(&r), vec![1, 2, 3]);

        let r = query(&b, Some(FilterExpr::condition("id", FilterOp::In, vec![2i64, 4]))).await;
        assert_eq!(ids(&r), vec![2, 4]);

        let r = query(&b, Some(FilterExpr::negate(FilterExpr::condition("title", FilterOp::Glob, "*e*")))).await;
        assert_eq!(ids(&r), vec![1, 3, 4]);

        let r = query(&b, Some(FilterExpr::condition("title", FilterOp::ContainsAllTokens, "ray gamma"))).await;
        assert_eq!(ids(&r), vec![3]);

        let r = query(
            &b,
            Some(FilterExpr::Or(vec![
                FilterExpr::condition("score", FilterOp::Eq, 1.5),
                FilterExpr::condition("score", FilterOp::Eq, Value::Null),
            ])),
        )
        .await;
        assert_eq!(ids(&r), vec![2, 4]);
    }

    #[tokio::test]
    async fn test_rank_count_and_projection() {
        let b = backend();
        let mut req = QueryRequest::rows(None, RankBy::new("score", SortDirection::Desc), 2);
        req.include_attributes = IncludeAttributes::Only(vec!["title".into()]);
        let r = b.query("docs", req).await.expect("query");
        assert_eq!(ids(&r), vec![3, 1]);
        assert_eq!(r.rows[0].attribute_bag(), vec![("title", &Value::from("Gamma ray"))]);

        let count = b
            .query("docs", QueryRequest::count(Some(FilterExpr::condition("score", FilterOp::Gte, 0i64))))
            .await
            .expect("count");
        assert_eq!(count.count(), Ok(3));
        assert!(count.rows.is_empty());
        assert_eq!(b.query_count(), 2);
    }

    #[tokio::test]
    async fn test_missing_namespace_and_injected_failure() {
        let b = backend();
        let err = b.query("nope", QueryRequest::count(None)).await.unwrap_err();
        assert!(matches!(err, ScopeError::NotFound(_)));

        b.fail_next(ScopeError::Network("connection reset".into()));
        assert!(b.query("docs", QueryRequest::count(None)).await.is_err());
        assert!(b.query("docs", QueryRequest::count(None)).await.is_ok());
    }

    #[tokio::test]
    async fn test_writes() {
        let b = backend();

        let resp = b
            .write("docs", WriteRequest::upsert(&[Document::new(5i64).with("title", "new")]))
            .await
            .expect("upsert");
        assert_eq!(resp.rows_affected, 1);
        assert_eq!(b.len("docs"), 5);

        b.write("docs", WriteRequest::patch(&[Document::new(1i64).with("score", 10i64)]))
            .await
            .expect("patch");
        let patched = b.get("docs", &Value::Int(1)).expect("row 1");
        assert_eq!(patched.get("score"), Some(&Value::Int(10)));
        assert_eq!(patched.get("title"), Some(&Value::from("Alpha")));

        let resp = b
            .write("docs", WriteRequest::delete(vec![Value::Int(2), Value::Int(99)]))
            .await
            .expect("delete");
        assert_eq!(resp.rows_affected, 1);

        let resp = b
            .write(
                "docs",
                WriteRequest::delete_by_filter(FilterExpr::condition("score", FilterOp::Gt, 5i64)),
            )
            .await
            .expect("delete by filter");
        assert_eq!(resp.rows_affected, 2);
        assert_eq!(b.len("docs"), 2);

        assert!(b.write("docs", WriteRequest::default()).await.is_err());
    }

    #[test]
    fn test_load_json() {
        let b = MemoryBackend::new();
        let n = b
            .load_json("docs", r#"[{"id": "a", "x": 1}, {"id": "b", "attributes": {"x": 2}}]"#)
            .expect("valid json");
        assert_eq!(n, 2);
        assert_eq!(b.namespaces(), vec!["docs".to_string()]);
        assert!(b.load_json("docs", "{").is_err());
    }
}
