//! Table query description shared by every backend.
//!
//! The HTTP client encodes a [`Query`] into PostgREST URL parameters
//! (`select=`, `<col>=eq.<v>`, `order=`, `limit=`); the in-memory backend
//! evaluates the same description directly against JSON rows.

use serde_json::{Map, Value};
use std::cmp::Ordering;

#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub column: String,
    pub ascending: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    columns: String,
    filters: Vec<(String, Value)>,
    order: Option<Order>,
    limit: Option<usize>,
}

impl Default for Query {
    fn default() -> Self {
        Query::all()
    }
}

impl Query {
    /// `select *`
    pub fn all() -> Self {
        Query {
            columns: "*".to_string(),
            filters: Vec::new(),
            order: None,
            limit: None,
        }
    }

    /// Comma separated column list, e.g. `"id, name"`.
    pub fn columns(columns: &str) -> Self {
        let cleaned = columns
            .split(',')
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .collect::<Vec<_>>()
            .join(",");
        Query {
            columns: if cleaned.is_empty() { "*".to_string() } else { cleaned },
            ..Query::all()
        }
    }

    pub fn eq(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.filters.push((column.to_string(), value.into()));
        self
    }

    pub fn order(mut self, column: &str, ascending: bool) -> Self {
        self.order = Some(Order {
            column: column.to_string(),
            ascending,
        });
        self
    }

    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    pub fn filters(&self) -> &[(String, Value)] {
        &self.filters
    }

    /// PostgREST query parameters, in a stable order.
    pub fn to_params(&self) -> Vec<(String, String)> {
        let mut params = vec![("select".to_string(), self.columns.clone())];
        for (column, value) in &self.filters {
            params.push((column.clone(), format!("eq.{}", filter_literal(value))));
        }
        if let Some(order) = &self.order {
            let dir = if order.ascending { "asc" } else { "desc" };
            params.push(("order".to_string(), format!("{}.{}", order.column, dir)));
        }
        if let Some(limit) = self.limit {
            params.push(("limit".to_string(), limit.to_string()));
        }
        params
    }

    pub fn matches(&self, row: &Value) -> bool {
        self.filters
            .iter()
            .all(|(column, expected)| row.get(column).is_some_and(|actual| values_equal(actual, expected)))
    }

    /// Filter, sort, truncate and project `rows` the way the server would.
    pub fn apply(&self, rows: &[Value]) -> Vec<Value> {
        let mut selected: Vec<&Value> = rows.iter().filter(|r| self.matches(r)).collect();
        if let Some(order) = &self.order {
            // stable sort keeps insertion order for ties
            selected.sort_by(|a, b| {
                let ord = compare_values(a.get(&order.column), b.get(&order.column));
                if order.ascending { ord } else { ord.reverse() }
            });
        }
        if let Some(limit) = self.limit {
            selected.truncate(limit);
        }
        selected.into_iter().map(|row| self.project(row)).collect()
    }

    fn project(&self, row: &Value) -> Value {
        if self.columns == "*" {
            return row.clone();
        }
        let Some(obj) = row.as_object() else {
            return row.clone();
        };
        let mut out = Map::new();
        for column in self.columns.split(',') {
            if let Some(v) = obj.get(column) {
                out.insert(column.to_string(), v.clone());
            }
        }
        Value::Object(out)
    }
}

fn filter_literal(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

fn values_equal(actual: &Value, expected: &Value) -> bool {
    match (actual, expected) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        // PostgREST compares on the text form, so "1000" matches 1000
        (Value::Number(_) | Value::Bool(_), Value::String(s)) => filter_literal(actual) == *s,
        (a, b) => a == b,
    }
}

/// Null sorts last ascending and first descending, as in PostgreSQL.
fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let a = a.filter(|v| !v.is_null());
    let b = b.filter(|v| !v.is_null());
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let (x, y) = (x.as_f64().unwrap_or_default(), y.as_f64().unwrap_or_default());
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(x), Some(y)) => x.to_string().cmp(&y.to_string()),
    }
}
