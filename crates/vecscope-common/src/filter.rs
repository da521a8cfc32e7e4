//! Backend filter AST
//!
//! Compound predicates are sent as nested JSON tuples:
//!
//! ```text
//! Filter := ["And", Filter[]] | ["Or", Filter[]] | ["Not", Filter] | [attribute, Op, value]
//! ```
//!
//! The backend rejects anything else, so serialization is hand-written rather
//! than derived.

use std::fmt;

use serde::de::{self, Deserializer};
use serde::ser::{SerializeTuple, Serializer};
use serde::{Deserialize, Serialize};

use crate::value::Value;
use crate::{Result, ScopeError};

/// Comparison operator of a leaf condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FilterOp {
    Eq,
    NotEq,
    In,
    NotIn,
    Lt,
    Lte,
    Gt,
    Gte,
    Glob,
    NotGlob,
    IGlob,
    NotIGlob,
    Contains,
    ContainsAny,
    ContainsAllTokens,
    Regex,
}

impl FilterOp {
    /// Wire name of the operator.
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterOp::Eq => "Eq",
            FilterOp::NotEq => "NotEq",
            FilterOp::In => "In",
            FilterOp::NotIn => "NotIn",
            FilterOp::Lt => "Lt",
            FilterOp::Lte => "Lte",
            FilterOp::Gt => "Gt",
            FilterOp::Gte => "Gte",
            FilterOp::Glob => "Glob",
            FilterOp::NotGlob => "NotGlob",
            FilterOp::IGlob => "IGlob",
            FilterOp::NotIGlob => "NotIGlob",
            FilterOp::Contains => "Contains",
            FilterOp::ContainsAny => "ContainsAny",
            FilterOp::ContainsAllTokens => "ContainsAllTokens",
            FilterOp::Regex => "Regex",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        let op = match name {
            "Eq" => FilterOp::Eq,
            "NotEq" => FilterOp::NotEq,
            "In" => FilterOp::In,
            "NotIn" => FilterOp::NotIn,
            "Lt" => FilterOp::Lt,
            "Lte" => FilterOp::Lte,
            "Gt" => FilterOp::Gt,
            "Gte" => FilterOp::Gte,
            "Glob" => FilterOp::Glob,
            "NotGlob" => FilterOp::NotGlob,
            "IGlob" => FilterOp::IGlob,
            "NotIGlob" => FilterOp::NotIGlob,
            "Contains" => FilterOp::Contains,
            "ContainsAny" => FilterOp::ContainsAny,
            "ContainsAllTokens" => FilterOp::ContainsAllTokens,
            "Regex" => FilterOp::Regex,
            _ => return None,
        };
        Some(op)
    }
}

impl fmt::Display for FilterOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A node of the filter AST.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterExpr {
    And(Vec<FilterExpr>),
    Or(Vec<FilterExpr>),
    Not(Box<FilterExpr>),
    Condition {
        attribute: String,
        op: FilterOp,
        value: Value,
    },
}

impl FilterExpr {
    /// Create a leaf condition.
    pub fn condition(attribute: impl Into<String>, op: FilterOp, value: impl Into<Value>) -> Self {
        FilterExpr::Condition {
            attribute: attribute.into(),
            op,
            value: value.into(),
        }
    }

    pub fn negate(expr: FilterExpr) -> Self {
        FilterExpr::Not(Box::new(expr))
    }

    /// Combine nodes under `And`, returning a lone node unwrapped and `None`
    /// for an empty list.
    pub fn all(mut nodes: Vec<FilterExpr>) -> Option<Self> {
        match nodes.len() {
            0 => None,
            1 => nodes.pop(),
            _ => Some(FilterExpr::And(nodes)),
        }
    }

    /// Add a conjunct, flattening into an existing top-level `And`.
    pub fn and_with(self, extra: FilterExpr) -> Self {
        match self {
            FilterExpr::And(mut nodes) => {
                nodes.push(extra);
                FilterExpr::And(nodes)
            }
            other => FilterExpr::And(vec![other, extra]),
        }
    }

    /// Convert a decoded JSON tree into an expression.
    pub fn from_json(json: &serde_json::Value) -> Result<Self> {
        let items = json
            .as_array()
            .ok_or_else(|| ScopeError::Parse(format!("filter must be an array, got {json}")))?;

        let head = items
            .first()
            .and_then(|h| h.as_str())
            .ok_or_else(|| ScopeError::Parse("filter must start with a string".into()))?;

        match (head, items.len()) {
            ("And" | "Or", 2) => {
                let children = items[1]
                    .as_array()
                    .ok_or_else(|| ScopeError::Parse(format!("{head} expects a list of filters")))?
                    .iter()
                    .map(FilterExpr::from_json)
                    .collect::<Result<Vec<_>>>()?;
                Ok(if head == "And" {
                    FilterExpr::And(children)
                } else {
                    FilterExpr::Or(children)
                })
            }
            ("Not", 2) => Ok(FilterExpr::negate(FilterExpr::from_json(&items[1])?)),
            (attribute, 3) => {
                let op_name = items[1]
                    .as_str()
                    .ok_or_else(|| ScopeError::Parse("operator must be a string".into()))?;
                let op = FilterOp::parse(op_name)
                    .ok_or_else(|| ScopeError::Parse(format!("unknown operator '{op_name}'")))?;
                Ok(FilterExpr::Condition {
                    attribute: attribute.to_string(),
                    op,
                    value: Value::from(items[2].clone()),
                })
            }
            _ => Err(ScopeError::Parse(format!("malformed filter: {json}"))),
        }
    }

    /// Attribute names referenced anywhere in the expression.
    pub fn attributes(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_attributes(&mut out);
        out
    }

    fn collect_attributes<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            FilterExpr::And(nodes) | FilterExpr::Or(nodes) => {
                nodes.iter().for_each(|n| n.collect_attributes(out))
            }
            FilterExpr::Not(inner) => inner.collect_attributes(out),
            FilterExpr::Condition { attribute, .. } => {
                if !out.contains(&attribute.as_str()) {
                    out.push(attribute);
                }
            }
        }
    }
}

impl Serialize for FilterExpr {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            FilterExpr::And(nodes) | FilterExpr::Or(nodes) => {
                let head = if matches!(self, FilterExpr::And(_)) { "And" } else { "Or" };
                let mut tuple = serializer.serialize_tuple(2)?;
                tuple.serialize_element(head)?;
                tuple.serialize_element(nodes)?;
                tuple.end()
            }
            FilterExpr::Not(inner) => {
                let mut tuple = serializer.serialize_tuple(2)?;
                tuple.serialize_element("Not")?;
                tuple.serialize_element(inner.as_ref())?;
                tuple.end()
            }
            FilterExpr::Condition { attribute, op, value } => {
                let mut tuple = serializer.serialize_tuple(3)?;
                tuple.serialize_element(attribute)?;
                tuple.serialize_element(op.as_str())?;
                tuple.serialize_element(value)?;
                tuple.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for FilterExpr {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let json = serde_json::Value::deserialize(deserializer)?;
        FilterExpr::from_json(&json).map_err(|e| de::Error::custom(e.message().to_string()))
    }
}

impl fmt::Display for FilterExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(self) {
            Ok(s) => f.write_str(&s),
            Err(_) => Err(fmt::Error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_wire_shape() {
        let expr = FilterExpr::And(vec![
            FilterExpr::condition("id", FilterOp::Glob, "*abc*"),
            FilterExpr::negate(FilterExpr::condition("tags", FilterOp::ContainsAny, "x")),
            FilterExpr::condition("score", FilterOp::In, vec![1i64, 2]),
        ]);
        let encoded = serde_json::to_value(&expr).expect("serializable");
        assert_eq!(
            encoded,
            json!([
                "And",
                [
                    ["id", "Glob", "*abc*"],
                    ["Not", ["tags", "ContainsAny", "x"]],
                    ["score", "In", [1, 2]]
                ]
            ])
        );
    }

    #[test]
    fn test_decode_wire_form() {
        let decoded: FilterExpr =
            serde_json::from_value(json!(["Or", [["a", "Gte", 2.5], ["b", "Eq", null]]]))
                .expect("valid filter");
        assert_eq!(
            decoded,
            FilterExpr::Or(vec![
                FilterExpr::condition("a", FilterOp::Gte, 2.5),
                FilterExpr::condition("b", FilterOp::Eq, Value::Null),
            ])
        );
    }

    #[test]
    fn test_decode_rejects_unknown_operator() {
        let err = FilterExpr::from_json(&json!(["a", "Like", "x"])).unwrap_err();
        assert_eq!(err.kind(), "parse_error");
    }

    #[test]
    fn test_all_unwraps_single_node() {
        assert_eq!(FilterExpr::all(vec![]), None);
        let single = FilterExpr::condition("a", FilterOp::Eq, 1i64);
        assert_eq!(FilterExpr::all(vec![single.clone()]), Some(single));
    }

    #[test]
    fn test_and_with_flattens() {
        let base = FilterExpr::And(vec![FilterExpr::condition("a", FilterOp::Eq, 1i64)]);
        let merged = base.and_with(FilterExpr::condition("id", FilterOp::Gt, 5i64));
        let FilterExpr::And(nodes) = merged else {
            panic!("expected And");
        };
        assert_eq!(nodes.len(), 2);
        assert_eq!(merged_attrs(&nodes), vec!["a", "id"]);
    }

    fn merged_attrs(nodes: &[FilterExpr]) -> Vec<&str> {
        nodes.iter().flat_map(|n| n.attributes()).collect()
    }
}
