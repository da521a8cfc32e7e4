//! Filter compilation
//!
//! Turns the UI's active filters and free-text search into the backend
//! filter AST. Compilation is a pure function of its inputs, which keeps the
//! query-result cache key stable.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use vecscope_common::{FilterExpr, FilterOp, SortDirection, Value};

use crate::coercion::FieldType;

/// Attribute name → field type, as known from discovery or a declared schema.
pub type TypeMap = BTreeMap<String, FieldType>;

/// Operator chosen in the filter UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOperator {
    Equals,
    NotEquals,
    Contains,
    Greater,
    GreaterOrEqual,
    Less,
    LessOrEqual,
    In,
    NotIn,
    Matches,
    NotMatches,
    Imatches,
    NotImatches,
}

impl FilterOperator {
    /// Parse an operator name (`not_equals`) or its symbol (`!=`).
    pub fn parse(s: &str) -> Option<Self> {
        let op = match s.trim().to_ascii_lowercase().as_str() {
            "equals" | "eq" | "=" | "==" => FilterOperator::Equals,
            "not_equals" | "neq" | "!=" | "<>" => FilterOperator::NotEquals,
            "contains" | "~" => FilterOperator::Contains,
            "greater" | "gt" | ">" => FilterOperator::Greater,
            "greater_or_equal" | "gte" | ">=" => FilterOperator::GreaterOrEqual,
            "less" | "lt" | "<" => FilterOperator::Less,
            "less_or_equal" | "lte" | "<=" => FilterOperator::LessOrEqual,
            "in" => FilterOperator::In,
            "not_in" => FilterOperator::NotIn,
            "matches" | "glob" => FilterOperator::Matches,
            "not_matches" => FilterOperator::NotMatches,
            "imatches" | "iglob" => FilterOperator::Imatches,
            "not_imatches" => FilterOperator::NotImatches,
            _ => return None,
        };
        Some(op)
    }

    /// Short label used in filter descriptions.
    pub fn label(&self) -> &'static str {
        match self {
            FilterOperator::Equals => "=",
            FilterOperator::NotEquals => "!=",
            FilterOperator::Contains => "contains",
            FilterOperator::Greater => ">",
            FilterOperator::GreaterOrEqual => ">=",
            FilterOperator::Less => "<",
            FilterOperator::LessOrEqual => "<=",
            FilterOperator::In => "in",
            FilterOperator::NotIn => "not in",
            FilterOperator::Matches => "matches",
            FilterOperator::NotMatches => "not matches",
            FilterOperator::Imatches => "imatches",
            FilterOperator::NotImatches => "not imatches",
        }
    }

    /// Operators whose value is always a list.
    pub fn takes_list(&self) -> bool {
        matches!(self, FilterOperator::In | FilterOperator::NotIn)
    }
}

impl fmt::Display for FilterOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// An active filter.
///
/// `value` is already coerced to the attribute's type. For `in`/`not_in` it
/// is always an array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Filter {
    pub id: u64,
    pub attribute: String,
    pub operator: FilterOperator,
    pub value: Value,
    pub display_value: String,
}

impl Filter {
    pub fn new(
        id: u64,
        attribute: impl Into<String>,
        operator: FilterOperator,
        value: Value,
        display_value: impl Into<String>,
    ) -> Self {
        let value = match value {
            Value::Array(_) => value,
            scalar if operator.takes_list() => Value::Array(vec![scalar]),
            scalar => scalar,
        };
        Self {
            id,
            attribute: attribute.into(),
            operator,
            value,
            display_value: display_value.into(),
        }
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.attribute, self.operator, self.display_value)
    }
}

/// Compile filters and search text into a single filter expression.
///
/// Returns `None` when there is nothing to filter on (match all).
pub fn compile(filters: &[Filter], search_text: &str, types: &TypeMap) -> Option<FilterExpr> {
    let mut nodes = Vec::with_capacity(filters.len() + 1);

    let term = search_text.trim();
    if !term.is_empty() {
        nodes.push(FilterExpr::condition("id", FilterOp::Glob, format!("*{term}*")));
    }

    nodes.extend(
        filters
            .iter()
            .map(|filter| compile_filter(filter, types.get(&filter.attribute))),
    );

    FilterExpr::all(nodes)
}

fn compile_filter(filter: &Filter, field_type: Option<&FieldType>) -> FilterExpr {
    let attribute = filter.attribute.as_str();
    let value = &filter.value;
    let is_array = field_type.is_some_and(FieldType::is_array);

    let leaf = |op: FilterOp, value: Value| FilterExpr::condition(attribute, op, value);

    match filter.operator {
        FilterOperator::Equals if is_array => leaf(FilterOp::ContainsAny, first_value(value)),
        FilterOperator::Equals => leaf(FilterOp::Eq, value.clone()),
        FilterOperator::NotEquals if is_array => {
            FilterExpr::negate(leaf(FilterOp::ContainsAny, first_value(value)))
        }
        FilterOperator::NotEquals => leaf(FilterOp::NotEq, value.clone()),
        FilterOperator::Contains if is_array => leaf(FilterOp::ContainsAny, value.clone()),
        FilterOperator::Contains => match value {
            Value::Array(items) if items.len() > 1 => FilterExpr::Or(
                items
                    .iter()
                    .map(|item| leaf(FilterOp::Glob, substring_glob(item)))
                    .collect(),
            ),
            other => leaf(FilterOp::Glob, substring_glob(&first_value(other))),
        },
        FilterOperator::Greater => leaf(FilterOp::Gt, value.clone()),
        FilterOperator::GreaterOrEqual => leaf(FilterOp::Gte, value.clone()),
        FilterOperator::Less => leaf(FilterOp::Lt, value.clone()),
        FilterOperator::LessOrEqual => leaf(FilterOp::Lte, value.clone()),
        FilterOperator::In => leaf(FilterOp::In, as_list(value)),
        FilterOperator::NotIn => leaf(FilterOp::NotIn, as_list(value)),
        FilterOperator::Matches => leaf(FilterOp::Glob, pattern_value(value)),
        FilterOperator::NotMatches => leaf(FilterOp::NotGlob, pattern_value(value)),
        FilterOperator::Imatches => leaf(FilterOp::IGlob, pattern_value(value)),
        FilterOperator::NotImatches => leaf(FilterOp::NotIGlob, pattern_value(value)),
    }
}

fn first_value(value: &Value) -> Value {
    match value {
        Value::Array(items) => items.first().cloned().unwrap_or(Value::Null),
        other => other.clone(),
    }
}

fn as_list(value: &Value) -> Value {
    match value {
        Value::Array(_) => value.clone(),
        scalar => Value::Array(vec![scalar.clone()]),
    }
}

fn substring_glob(value: &Value) -> Value {
    Value::String(format!("*{}*", value.to_display_string()))
}

fn pattern_value(value: &Value) -> Value {
    Value::String(first_value(value).to_display_string())
}

/// Splice a keyset cursor into a compiled expression.
///
/// Ascending pages continue with `id > cursor`, descending ones with
/// `id < cursor`.
pub fn with_cursor(expr: Option<FilterExpr>, cursor: &Value, direction: SortDirection) -> FilterExpr {
    let op = match direction {
        SortDirection::Asc => FilterOp::Gt,
        SortDirection::Desc => FilterOp::Lt,
    };
    let bound = FilterExpr::condition("id", op, cursor.clone());
    match expr {
        Some(expr) => expr.and_with(bound),
        None => bound,
    }
}

/// Human-readable summary of a filter set, used for history entries.
pub fn describe(filters: &[Filter], search_text: &str) -> String {
    let mut parts: Vec<String> = filters.iter().map(Filter::to_string).collect();
    let term = search_text.trim();
    if !term.is_empty() {
        parts.insert(0, format!("search \"{term}\""));
    }
    if parts.is_empty() {
        "all documents".to_string()
    } else {
        parts.join(" AND ")
    }
}
