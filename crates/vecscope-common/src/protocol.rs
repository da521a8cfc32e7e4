//! Wire types exchanged with a namespace-scoped backend.

use std::collections::BTreeMap;

use serde::de::{self, Deserializer};
use serde::ser::{SerializeTuple, Serializer};
use serde::{Deserialize, Serialize};

use crate::filter::FilterExpr;
use crate::value::Value;
use crate::{Result, ScopeError};

/// Top-level document keys that never count as attributes.
pub const RESERVED_FIELDS: &[&str] = &["id", "vector", "$dist", "dist", "distance", "attributes"];

/// Name of the aggregation used for total counts.
pub const COUNT_AGGREGATE: &str = "count";

/// A row returned by the backend.
///
/// Backends either nest attributes under `attributes` or flatten them onto
/// the row; both shapes decode into this struct.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Document {
    pub id: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector: Option<Vec<f32>>,
    #[serde(rename = "$dist", default, skip_serializing_if = "Option::is_none")]
    pub dist: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<BTreeMap<String, Value>>,
    #[serde(flatten)]
    pub fields: BTreeMap<String, Value>,
}

impl Document {
    pub fn new(id: impl Into<Value>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    /// Builder: set a top-level attribute.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(name, value);
        self
    }

    /// Set an attribute in whichever bag the document already uses.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        match &mut self.attributes {
            Some(bag) => {
                bag.insert(name.into(), value.into());
            }
            None => {
                self.fields.insert(name.into(), value.into());
            }
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        match &mut self.attributes {
            Some(bag) => bag.remove(name),
            None => self.fields.remove(name),
        }
    }

    /// The document's attributes: the nested bag when present, otherwise
    /// every non-reserved top-level field.
    pub fn attribute_bag(&self) -> Vec<(&str, &Value)> {
        match &self.attributes {
            Some(bag) => bag.iter().map(|(k, v)| (k.as_str(), v)).collect(),
            None => self
                .fields
                .iter()
                .filter(|(k, _)| !RESERVED_FIELDS.contains(&k.as_str()))
                .map(|(k, v)| (k.as_str(), v))
                .collect(),
        }
    }

    /// Look up a field by name; `id` resolves to the document id.
    pub fn get(&self, name: &str) -> Option<&Value> {
        if name == "id" {
            return Some(&self.id);
        }
        match &self.attributes {
            Some(bag) => bag.get(name),
            None => self.fields.get(name),
        }
    }

    /// Copy of the document keeping only the requested attributes.
    pub fn project(&self, include: &IncludeAttributes) -> Document {
        match include {
            IncludeAttributes::All(true) => self.clone(),
            IncludeAttributes::All(false) => Document {
                id: self.id.clone(),
                dist: self.dist,
                ..Document::default()
            },
            IncludeAttributes::Only(names) => {
                let mut doc = Document {
                    id: self.id.clone(),
                    dist: self.dist,
                    ..Document::default()
                };
                for name in names {
                    if name == "vector" {
                        doc.vector = self.vector.clone();
                    } else if let Some(value) = self.get(name) {
                        doc.set(name.clone(), value.clone());
                    }
                }
                doc
            }
        }
    }
}

/// Sort direction for `rank_by`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortDirection::Asc => "asc",
            SortDirection::Desc => "desc",
        }
    }
}

/// Attribute ordering, sent as `[attribute, "asc" | "desc"]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RankBy {
    pub attribute: String,
    pub direction: SortDirection,
}

impl RankBy {
    pub fn new(attribute: impl Into<String>, direction: SortDirection) -> Self {
        Self {
            attribute: attribute.into(),
            direction,
        }
    }

    pub fn id_asc() -> Self {
        Self::new("id", SortDirection::Asc)
    }
}

impl Serialize for RankBy {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut tuple = serializer.serialize_tuple(2)?;
        tuple.serialize_element(&self.attribute)?;
        tuple.serialize_element(self.direction.as_str())?;
        tuple.end()
    }
}

impl<'de> Deserialize<'de> for RankBy {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let (attribute, direction): (String, SortDirection) = Deserialize::deserialize(deserializer)?;
        Ok(RankBy { attribute, direction })
    }
}

/// Which attributes the backend should return with each row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IncludeAttributes {
    All(bool),
    Only(Vec<String>),
}

impl Default for IncludeAttributes {
    fn default() -> Self {
        IncludeAttributes::All(true)
    }
}

/// Aggregate function, sent as a one-element tuple such as `["Count"]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregate {
    Count,
}

impl Serialize for Aggregate {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut tuple = serializer.serialize_tuple(1)?;
        match self {
            Aggregate::Count => tuple.serialize_element("Count")?,
        }
        tuple.end()
    }
}

impl<'de> Deserialize<'de> for Aggregate {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let parts: Vec<String> = Deserialize::deserialize(deserializer)?;
        match parts.first().map(String::as_str) {
            Some("Count") => Ok(Aggregate::Count),
            other => Err(de::Error::custom(format!("unsupported aggregate: {other:?}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsistencyLevel {
    Strong,
    Eventual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Consistency {
    pub level: ConsistencyLevel,
}

/// Body of a namespace `query` call.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct QueryRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filters: Option<FilterExpr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rank_by: Option<RankBy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<usize>,
    #[serde(default)]
    pub include_attributes: IncludeAttributes,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregate_by: Option<BTreeMap<String, Aggregate>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consistency: Option<Consistency>,
}

impl QueryRequest {
    /// A ranked page fetch returning all attributes.
    pub fn rows(filters: Option<FilterExpr>, rank_by: RankBy, top_k: usize) -> Self {
        Self {
            filters,
            rank_by: Some(rank_by),
            top_k: Some(top_k),
            ..Self::default()
        }
    }

    /// An aggregate-only request counting rows that match `filters`.
    pub fn count(filters: Option<FilterExpr>) -> Self {
        Self {
            filters,
            include_attributes: IncludeAttributes::All(false),
            aggregate_by: Some(BTreeMap::from([(COUNT_AGGREGATE.to_string(), Aggregate::Count)])),
            ..Self::default()
        }
    }

    pub fn with_consistency(mut self, level: ConsistencyLevel) -> Self {
        self.consistency = Some(Consistency { level });
        self
    }
}

/// Server-side timing, when the backend reports it.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Performance {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_total_ms: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_execution_ms: Option<f64>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Result of a namespace `query` call.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct QueryResponse {
    #[serde(default)]
    pub rows: Vec<Document>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregations: Option<BTreeMap<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub performance: Option<Performance>,
}

impl QueryResponse {
    /// Read the total produced by a `Count` aggregate.
    pub fn count(&self) -> Result<u64> {
        let value = self
            .aggregations
            .as_ref()
            .and_then(|aggs| aggs.get(COUNT_AGGREGATE))
            .ok_or_else(|| ScopeError::Backend("response carries no count aggregation".into()))?;
        match value {
            Value::Int(n) if *n >= 0 => Ok(*n as u64),
            Value::Float(f) if *f >= 0.0 => Ok(*f as u64),
            other => Err(ScopeError::TypeError {
                expected: "non-negative count".into(),
                actual: other.to_string(),
            }),
        }
    }
}

/// Column-oriented row data: `{attr: [v0, v1, ...]}` with an `id` column.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Columns(pub BTreeMap<String, Vec<Value>>);

impl Columns {
    /// Pivot documents into columns. Attributes missing from a row are `null`.
    pub fn from_documents(docs: &[Document]) -> Self {
        let mut names: Vec<&str> = Vec::new();
        for doc in docs {
            for (name, _) in doc.attribute_bag() {
                if !names.contains(&name) {
                    names.push(name);
                }
            }
        }

        let mut columns = BTreeMap::new();
        columns.insert("id".to_string(), docs.iter().map(|d| d.id.clone()).collect());
        for name in names {
            let column = docs
                .iter()
                .map(|d| d.get(name).cloned().unwrap_or(Value::Null))
                .collect();
            columns.insert(name.to_string(), column);
        }
        Columns(columns)
    }

    pub fn len(&self) -> usize {
        self.0.get("id").map(Vec::len).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pivot columns back into documents.
    ///
    /// With `skip_nulls`, a `null` cell leaves the attribute absent, which is
    /// how patches express "leave untouched".
    pub fn to_documents(&self, skip_nulls: bool) -> Result<Vec<Document>> {
        let ids = self
            .0
            .get("id")
            .ok_or_else(|| ScopeError::InvalidOperation("columns need an 'id' column".into()))?;

        for (name, column) in &self.0 {
            if column.len() != ids.len() {
                return Err(ScopeError::InvalidOperation(format!(
                    "column '{name}' has {} values, expected {}",
                    column.len(),
                    ids.len()
                )));
            }
        }

        let mut docs: Vec<Document> = ids.iter().cloned().map(Document::new).collect();
        for (name, column) in self.0.iter().filter(|(name, _)| name.as_str() != "id") {
            for (doc, value) in docs.iter_mut().zip(column) {
                if skip_nulls && value.is_null() {
                    continue;
                }
                doc.set(name.clone(), value.clone());
            }
        }
        Ok(docs)
    }
}

/// Body of a namespace `write` call. Exactly one field is normally set.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct WriteRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upsert_columns: Option<Columns>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch_columns: Option<Columns>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletes: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete_by_filter: Option<FilterExpr>,
}

impl WriteRequest {
    pub fn upsert(docs: &[Document]) -> Self {
        Self {
            upsert_columns: Some(Columns::from_documents(docs)),
            ..Self::default()
        }
    }

    pub fn patch(docs: &[Document]) -> Self {
        Self {
            patch_columns: Some(Columns::from_documents(docs)),
            ..Self::default()
        }
    }

    pub fn delete(ids: Vec<Value>) -> Self {
        Self {
            deletes: Some(ids),
            ..Self::default()
        }
    }

    pub fn delete_by_filter(filter: FilterExpr) -> Self {
        Self {
            delete_by_filter: Some(filter),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.upsert_columns.is_none()
            && self.patch_columns.is_none()
            && self.deletes.is_none()
            && self.delete_by_filter.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WriteResponse {
    pub rows_affected: u64,
}
