//! Attribute discovery
//!
//! Infers a working schema for a namespace by sampling documents. Every run
//! rebuilds the profile from scratch; there is no incremental merge with a
//! previous result.

use std::sync::OnceLock;

use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use vecscope_common::{Document, QueryRequest, RankBy, Value};

use crate::coercion::FieldType;

/// Inferred type of an attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttributeType {
    String,
    Number,
    Boolean,
    Array,
    Object,
    Mixed,
    Date,
}

impl AttributeType {
    fn of(value: &Value) -> Option<AttributeType> {
        match value {
            Value::Null => None,
            Value::Bool(_) => Some(AttributeType::Boolean),
            Value::Int(_) | Value::Float(_) => Some(AttributeType::Number),
            Value::String(s) if looks_like_date(s) => Some(AttributeType::Date),
            Value::String(_) => Some(AttributeType::String),
            Value::Array(_) => Some(AttributeType::Array),
            Value::Object(_) => Some(AttributeType::Object),
        }
    }

    /// Refine a running guess with one more observation.
    fn merge(self, other: AttributeType) -> AttributeType {
        use AttributeType::*;
        match (self, other) {
            (a, b) if a == b => a,
            (Date, String) | (String, Date) => String,
            _ => Mixed,
        }
    }
}

/// Element type of an array attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArrayElementType {
    Integer,
    Float,
    String,
    Boolean,
    Mixed,
}

impl ArrayElementType {
    fn of(leaf: &Value) -> Option<ArrayElementType> {
        match leaf {
            Value::Int(_) => Some(ArrayElementType::Integer),
            Value::Float(_) => Some(ArrayElementType::Float),
            Value::String(_) => Some(ArrayElementType::String),
            Value::Bool(_) => Some(ArrayElementType::Boolean),
            Value::Null => None,
            Value::Array(_) | Value::Object(_) => Some(ArrayElementType::Mixed),
        }
    }

    fn merge(self, other: ArrayElementType) -> ArrayElementType {
        use ArrayElementType::*;
        match (self, other) {
            (a, b) if a == b => a,
            (Integer, Float) | (Float, Integer) => Float,
            _ => Mixed,
        }
    }
}

/// Well-known string shapes detected over sampled values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StringPattern {
    Email,
    Url,
    Uuid,
}

impl StringPattern {
    const ALL: [StringPattern; 3] = [StringPattern::Email, StringPattern::Url, StringPattern::Uuid];

    /// Share of sampled values that must match before the pattern is reported.
    pub fn threshold(&self) -> f64 {
        match self {
            StringPattern::Email => 0.7,
            StringPattern::Url => 0.5,
            StringPattern::Uuid => 0.7,
        }
    }

    pub fn matches(&self, s: &str) -> bool {
        match self {
            StringPattern::Email => email_regex().is_match(s),
            StringPattern::Url => url_regex().is_match(s),
            StringPattern::Uuid => uuid::Uuid::parse_str(s).is_ok(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NumericRange {
    pub min: f64,
    pub max: f64,
}

/// Profile of one attribute built from a document sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveredAttribute {
    pub name: String,
    #[serde(rename = "type")]
    pub attr_type: AttributeType,
    /// Every distinct value, absent for high-cardinality fields.
    pub unique_values: Option<Vec<Value>>,
    pub range: Option<NumericRange>,
    pub sample_values: Vec<Value>,
    /// Number of sampled documents carrying the attribute (null included).
    pub frequency: usize,
    pub total_documents: usize,
    pub is_nullable: bool,
    pub array_element_type: Option<ArrayElementType>,
    pub common_patterns: Option<Vec<StringPattern>>,
}

impl DiscoveredAttribute {
    /// Field type used to coerce filter input for this attribute.
    ///
    /// Objects and mixed fields return `None`; their input stays a string.
    pub fn field_type(&self) -> Option<FieldType> {
        let ty = match self.attr_type {
            AttributeType::String => FieldType::String,
            AttributeType::Date => FieldType::Datetime,
            AttributeType::Number => FieldType::Number,
            AttributeType::Boolean => FieldType::Bool,
            AttributeType::Array => {
                let element = match self.array_element_type {
                    Some(ArrayElementType::Integer) => FieldType::Int,
                    Some(ArrayElementType::Float) => FieldType::Float,
                    Some(ArrayElementType::String) => FieldType::String,
                    Some(ArrayElementType::Boolean) => FieldType::Bool,
                    Some(ArrayElementType::Mixed) | None => FieldType::Object,
                };
                FieldType::Array(Box::new(element))
            }
            AttributeType::Object | AttributeType::Mixed => return None,
        };
        Some(ty)
    }

    /// Whether the UI should offer a picker rather than free text.
    pub fn is_enumerable(&self) -> bool {
        self.unique_values.is_some()
    }
}

/// Tuning knobs for a discovery run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryOptions {
    /// Documents fetched per sampling query.
    pub sample_size: usize,
    /// Above this many distinct values `unique_values` is omitted.
    pub max_unique_values: usize,
    pub max_sample_values: usize,
    pub detect_patterns: bool,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self {
            sample_size: 500,
            max_unique_values: 100,
            max_sample_values: 10,
            detect_patterns: true,
        }
    }
}

impl DiscoveryOptions {
    /// Short key distinguishing cache entries built with different options.
    pub fn fingerprint(&self) -> String {
        format!(
            "s{}-u{}-v{}-p{}",
            self.sample_size, self.max_unique_values, self.max_sample_values, self.detect_patterns as u8
        )
    }

    /// Query used to fetch the sample.
    pub fn sample_request(&self) -> QueryRequest {
        QueryRequest::rows(None, RankBy::id_asc(), self.sample_size)
    }
}

#[derive(Default)]
struct FieldStats {
    present: usize,
    nulls: usize,
    guess: Option<AttributeType>,
    element: Option<ArrayElementType>,
    /// Distinct values (array leaves for arrays) keyed by canonical JSON.
    distinct: IndexMap<String, Value>,
    range: Option<NumericRange>,
    strings: usize,
    pattern_hits: [usize; 3],
}

impl FieldStats {
    fn observe(&mut self, value: &Value, detect_patterns: bool) {
        self.present += 1;
        let Some(kind) = AttributeType::of(value) else {
            self.nulls += 1;
            return;
        };
        self.guess = Some(match self.guess {
            Some(prev) => prev.merge(kind),
            None => kind,
        });

        match value {
            Value::Array(items) => {
                let mut leaves = Vec::new();
                flatten_leaves(items, &mut leaves);
                for leaf in leaves {
                    if let Some(kind) = ArrayElementType::of(leaf) {
                        self.element = Some(match self.element {
                            Some(prev) => prev.merge(kind),
                            None => kind,
                        });
                    }
                    self.record(leaf);
                }
            }
            Value::String(s) => {
                self.strings += 1;
                if detect_patterns {
                    for (i, pattern) in StringPattern::ALL.iter().enumerate() {
                        if pattern.matches(s) {
                            self.pattern_hits[i] += 1;
                        }
                    }
                }
                self.record(value);
            }
            other => self.record(other),
        }
    }

    fn record(&mut self, value: &Value) {
        if value.is_null() {
            return;
        }
        if let Some(n) = value.as_f64() {
            self.range = Some(match self.range {
                Some(r) => NumericRange {
                    min: r.min.min(n),
                    max: r.max.max(n),
                },
                None => NumericRange { min: n, max: n },
            });
        }
        self.distinct
            .entry(value.canonical_key())
            .or_insert_with(|| value.clone());
    }

    fn finish(self, name: String, total: usize, options: &DiscoveryOptions) -> DiscoveredAttribute {
        let attr_type = self.guess.unwrap_or(AttributeType::Mixed);

        let numeric = match attr_type {
            AttributeType::Number => true,
            AttributeType::Array => matches!(
                self.element,
                Some(ArrayElementType::Integer | ArrayElementType::Float)
            ),
            _ => false,
        };

        let unique_values = if attr_type != AttributeType::Object
            && self.distinct.len() <= options.max_unique_values
        {
            let mut values: Vec<Value> = self.distinct.values().cloned().collect();
            values.sort_by(|a, b| a.total_cmp(b));
            Some(values)
        } else {
            None
        };

        let common_patterns = if options.detect_patterns
            && attr_type == AttributeType::String
            && self.strings > 0
        {
            let found: Vec<StringPattern> = StringPattern::ALL
                .iter()
                .zip(self.pattern_hits)
                .filter(|(pattern, hits)| *hits as f64 / self.strings as f64 >= pattern.threshold())
                .map(|(pattern, _)| *pattern)
                .collect();
            (!found.is_empty()).then_some(found)
        } else {
            None
        };

        DiscoveredAttribute {
            name,
            attr_type,
            unique_values,
            range: if numeric { self.range } else { None },
            sample_values: self
                .distinct
                .into_values()
                .take(options.max_sample_values)
                .collect(),
            frequency: self.present,
            total_documents: total,
            is_nullable: self.nulls > 0 || self.present < total,
            array_element_type: if attr_type == AttributeType::Array {
                self.element
            } else {
                None
            },
            common_patterns,
        }
    }
}

fn flatten_leaves<'a>(items: &'a [Value], out: &mut Vec<&'a Value>) {
    for item in items {
        match item {
            Value::Array(nested) => flatten_leaves(nested, out),
            leaf => out.push(leaf),
        }
    }
}

fn date_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^\d{4}-\d{2}-\d{2}(?:[T ]\d{2}:\d{2}(?::\d{2}(?:\.\d+)?)?(?:Z|[+-]\d{2}:?\d{2})?)?$",
        )
        .expect("valid date regex")
    })
}

fn email_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("valid email regex"))
}

fn url_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(?i)https?://[^\s/$.?#][^\s]*$").expect("valid url regex"))
}

/// ISO-8601 shaped strings whose calendar date actually exists.
pub fn looks_like_date(s: &str) -> bool {
    date_regex().is_match(s)
        && s.get(..10)
            .is_some_and(|day| chrono::NaiveDate::parse_from_str(day, "%Y-%m-%d").is_ok())
}

/// Profile every attribute seen in `documents`.
///
/// Attributes are ordered by frequency (most common first), then by name.
pub fn discover(documents: &[Document], options: &DiscoveryOptions) -> Vec<DiscoveredAttribute> {
    let mut fields: IndexMap<String, FieldStats> = IndexMap::new();

    for doc in documents {
        for (name, value) in doc.attribute_bag() {
            fields
                .entry(name.to_string())
                .or_default()
                .observe(value, options.detect_patterns);
        }
    }

    let total = documents.len();
    let mut attributes: Vec<DiscoveredAttribute> = fields
        .into_iter()
        .map(|(name, stats)| stats.finish(name, total, options))
        .collect();
    attributes.sort_by(|a, b| b.frequency.cmp(&a.frequency).then_with(|| a.name.cmp(&b.name)));

    tracing::debug!(
        documents = total,
        attributes = attributes.len(),
        "Attribute discovery finished"
    );
    attributes
}

/// Default visible columns: `id` first, then the most frequent attributes.
pub fn default_visible_columns(attributes: &[DiscoveredAttribute], limit: usize) -> Vec<String> {
    std::iter::once("id".to_string())
        .chain(
            attributes
                .iter()
                .filter(|a| a.name != "id")
                .map(|a| a.name.clone()),
        )
        .take(limit.max(1))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn find<'a>(attrs: &'a [DiscoveredAttribute], name: &str) -> &'a DiscoveredAttribute {
        attrs
            .iter()
            .find(|a| a.name == name)
            .unwrap_or_else(|| panic!("attribute {name} not discovered"))
    }

    #[test]
    fn test_string_array_flattens_leaves() {
        let docs = vec![
            Document::new(1i64).with("tags", vec!["a", "b"]),
            Document::new(2i64).with("tags", vec!["b", "c"]),
        ];
        let attrs = discover(&docs, &DiscoveryOptions::default());
        let tags = find(&attrs, "tags");
        assert_eq!(tags.attr_type, AttributeType::Array);
        assert_eq!(tags.array_element_type, Some(ArrayElementType::String));
        assert_eq!(
            tags.sample_values,
            vec![Value::from("a"), Value::from("b"), Value::from("c")]
        );
        assert_eq!(
            tags.field_type(),
            Some(FieldType::Array(Box::new(FieldType::String)))
        );
    }

    #[test]
    fn test_nested_arrays_and_numeric_widening() {
        let docs = vec![
            Document::new(1i64).with(
                "m",
                Value::Array(vec![Value::Int(1), Value::Array(vec![Value::Int(5)])]),
            ),
            Document::new(2i64).with("m", vec![2.5f64]),
        ];
        let attrs = discover(&docs, &DiscoveryOptions::default());
        let m = find(&attrs, "m");
        assert_eq!(m.array_element_type, Some(ArrayElementType::Float));
        assert_eq!(m.range, Some(NumericRange { min: 1.0, max: 5.0 }));
        assert_eq!(m.unique_values.as_ref().map(Vec::len), Some(3));
    }

    #[test]
    fn test_mixed_element_array() {
        let docs = vec![Document::new(1i64).with(
            "x",
            Value::Array(vec![Value::Int(1), Value::from("a")]),
        )];
        let attrs = discover(&docs, &DiscoveryOptions::default());
        assert_eq!(find(&attrs, "x").array_element_type, Some(ArrayElementType::Mixed));
    }

    #[test]
    fn test_number_range_and_nullability() {
        let docs = vec![
            Document::new(1i64).with("score", 3i64),
            Document::new(2i64).with("score", 9.5f64),
            Document::new(3i64).with("score", Value::Null),
            Document::new(4i64),
        ];
        let attrs = discover(&docs, &DiscoveryOptions::default());
        let score = find(&attrs, "score");
        assert_eq!(score.attr_type, AttributeType::Number);
        assert_eq!(score.range, Some(NumericRange { min: 3.0, max: 9.5 }));
        assert_eq!(score.frequency, 3);
        assert_eq!(score.total_documents, 4);
        assert!(score.is_nullable);
    }

    #[test]
    fn test_type_conflicts() {
        let docs = vec![
            Document::new(1i64).with("when", "2024-03-01").with("v", 1i64),
            Document::new(2i64).with("when", "2024-03-02T10:00:00Z").with("v", "one"),
        ];
        let attrs = discover(&docs, &DiscoveryOptions::default());
        assert_eq!(find(&attrs, "when").attr_type, AttributeType::Date);
        assert_eq!(find(&attrs, "v").attr_type, AttributeType::Mixed);
        assert_eq!(find(&attrs, "v").field_type(), None);

        let docs = vec![
            Document::new(1i64).with("when", "2024-03-01"),
            Document::new(2i64).with("when", "soon"),
        ];
        let attrs = discover(&docs, &DiscoveryOptions::default());
        assert_eq!(find(&attrs, "when").attr_type, AttributeType::String);
    }

    #[test]
    fn test_date_detection_rejects_impossible_dates() {
        assert!(looks_like_date("2024-02-29"));
        assert!(looks_like_date("2024-02-29 08:15:00+02:00"));
        assert!(!looks_like_date("2023-02-30"));
        assert!(!looks_like_date("20240101"));
    }

    #[test]
    fn test_unique_values_capped() {
        let docs: Vec<Document> = (0..20)
            .map(|i| Document::new(i as i64).with("n", format!("v{i}")).with("flag", i % 2 == 0))
            .collect();
        let options = DiscoveryOptions {
            max_unique_values: 5,
            max_sample_values: 3,
            ..DiscoveryOptions::default()
        };
        let attrs = discover(&docs, &options);
        let n = find(&attrs, "n");
        assert_eq!(n.unique_values, None);
        assert_eq!(n.sample_values.len(), 3);
        assert!(!n.is_enumerable());
        assert_eq!(
            find(&attrs, "flag").unique_values,
            Some(vec![Value::Bool(false), Value::Bool(true)])
        );
    }

    #[test]
    fn test_pattern_threshold() {
        let mostly_email = ["a@x.io", "b@x.io", "c@x.io", "d@x.io", "plain"];
        let rarely_email = ["a@x.io", "b@x.io", "one", "two", "three"];
        let docs: Vec<Document> = mostly_email
            .iter()
            .zip(rarely_email)
            .enumerate()
            .map(|(i, (m, r))| Document::new(i as i64).with("contact", *m).with("note", r))
            .collect();
        let attrs = discover(&docs, &DiscoveryOptions::default());
        assert_eq!(
            find(&attrs, "contact").common_patterns,
            Some(vec![StringPattern::Email])
        );
        assert_eq!(find(&attrs, "note").common_patterns, None);
    }

    #[test]
    fn test_url_and_uuid_patterns() {
        let docs = vec![
            Document::new(1i64)
                .with("link", "https://example.com/a")
                .with("ref", "67e55044-10b1-426f-9247-bb680e5fe0c8"),
            Document::new(2i64)
                .with("link", "not a link")
                .with("ref", "936da01f-9abd-4d9d-80c7-02af85c822a8"),
        ];
        let attrs = discover(&docs, &DiscoveryOptions::default());
        assert_eq!(find(&attrs, "link").common_patterns, Some(vec![StringPattern::Url]));
        assert_eq!(find(&attrs, "ref").common_patterns, Some(vec![StringPattern::Uuid]));
    }

    #[test]
    fn test_ordering_and_visible_columns() {
        let docs = vec![
            Document::new(1i64).with("b", 1i64).with("a", 1i64),
            Document::new(2i64).with("b", 2i64),
        ];
        let attrs = discover(&docs, &DiscoveryOptions::default());
        let names: Vec<&str> = attrs.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["b", "a"]);
        assert_eq!(default_visible_columns(&attrs, 2), vec!["id", "b"]);
    }

    #[test]
    fn test_nested_attribute_bag_is_used() {
        let doc: Document = serde_json::from_value(serde_json::json!({
            "id": 1,
            "vector": [0.1, 0.2],
            "attributes": {"title": "hello"}
        }))
        .expect("valid row");
        let attrs = discover(&[doc], &DiscoveryOptions::default());
        assert_eq!(attrs.len(), 1);
        assert_eq!(attrs[0].name, "title");
    }
}
