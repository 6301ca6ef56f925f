use std::fmt;

/// A bound statement parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Param {
    Text(String),
    Int(i64),
}

impl Param {
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }

    pub(crate) fn to_value(&self) -> duckdb::types::Value {
        match self {
            Self::Text(v) => duckdb::types::Value::Text(v.clone()),
            Self::Int(v) => duckdb::types::Value::BigInt(*v),
        }
    }
}

impl fmt::Display for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(v) => write!(f, "{v:?}"),
            Self::Int(v) => write!(f, "{v}"),
        }
    }
}

/// SQL text plus its positional parameters, in placeholder order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Param>,
}

impl Statement {
    pub fn new(sql: impl Into<String>, params: Vec<Param>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }

    pub fn placeholder_count(&self) -> usize {
        self.sql.matches('?').count()
    }
}

/// Accumulates `AND`-joined filter fragments together with the values their
/// placeholders bind to.
#[derive(Debug, Default)]
pub struct ClauseBuilder {
    parts: Vec<String>,
    params: Vec<Param>,
}

impl ClauseBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, fragment: impl Into<String>, params: impl IntoIterator<Item = Param>) {
        self.parts.push(fragment.into());
        self.params.extend(params);
    }

    /// `column IN (?, ?, ...)`, or `column NOT IN (...)` when `negate` is set.
    pub fn push_in_list(&mut self, column: &str, values: &[String], negate: bool) {
        let placeholders = placeholders(values.len());
        let op = if negate { "NOT IN" } else { "IN" };
        self.push(
            format!("{column} {op} ({placeholders})"),
            values.iter().cloned().map(Param::Text),
        );
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// The joined predicate and its parameters. An empty builder yields an
    /// empty string.
    pub fn finish(self) -> (String, Vec<Param>) {
        (self.parts.join(" AND "), self.params)
    }
}

pub(crate) fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}
