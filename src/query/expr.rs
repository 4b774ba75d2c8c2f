//! Predicate expression tree and literal values.
//!
//! Operators are named function nodes rather than a closed enum so the tree
//! can carry whatever the query layer produced. The compiler decides which
//! names it can translate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A dotted field path, e.g. `author.name`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldPath(pub Vec<String>);

impl FieldPath {
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        FieldPath(segments.into_iter().map(Into::into).collect())
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("."))
    }
}

/// `"author.name"` splits on dots.
impl From<&str> for FieldPath {
    fn from(s: &str) -> Self {
        FieldPath::new(s.split('.'))
    }
}

impl<const N: usize> From<[&str; N]> for FieldPath {
    fn from(segments: [&str; N]) -> Self {
        FieldPath::new(segments)
    }
}

impl From<&[&str]> for FieldPath {
    fn from(segments: &[&str]) -> Self {
        FieldPath::new(segments.iter().copied())
    }
}

impl From<Vec<String>> for FieldPath {
    fn from(segments: Vec<String>) -> Self {
        FieldPath(segments)
    }
}

/// A literal in a predicate.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Date(DateTime<Utc>),
    Array(Vec<Value>),
    /// Anything else (objects); coerced to its JSON text when compiled.
    Json(serde_json::Value),
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v.into())
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Int(v.into())
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::Date(v)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::Array(v.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => n.as_f64().map_or(Value::Json(serde_json::Value::Number(n)), Value::Float),
            },
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::Array(items.into_iter().map(Value::from).collect())
            }
            other @ serde_json::Value::Object(_) => Value::Json(other),
        }
    }
}

/// A node of the predicate tree.
#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    /// Reference to a record field.
    Ref(FieldPath),
    /// Literal value.
    Val(Value),
    /// Operator applied to arguments.
    Func { name: String, args: Vec<Expr> },
}

pub fn field(path: impl Into<FieldPath>) -> Expr {
    Expr::Ref(path.into())
}

pub fn val(value: impl Into<Value>) -> Expr {
    Expr::Val(value.into())
}

/// Arbitrary operator node. The compiler rejects names it does not know.
pub fn func(name: impl Into<String>, args: Vec<Expr>) -> Expr {
    Expr::Func {
        name: name.into(),
        args,
    }
}

fn compare(name: &str, path: impl Into<FieldPath>, value: impl Into<Value>) -> Expr {
    func(name, vec![field(path), val(value)])
}

pub fn eq(path: impl Into<FieldPath>, value: impl Into<Value>) -> Expr {
    compare("eq", path, value)
}

pub fn gt(path: impl Into<FieldPath>, value: impl Into<Value>) -> Expr {
    compare("gt", path, value)
}

pub fn gte(path: impl Into<FieldPath>, value: impl Into<Value>) -> Expr {
    compare("gte", path, value)
}

pub fn lt(path: impl Into<FieldPath>, value: impl Into<Value>) -> Expr {
    compare("lt", path, value)
}

pub fn lte(path: impl Into<FieldPath>, value: impl Into<Value>) -> Expr {
    compare("lte", path, value)
}

pub fn like(path: impl Into<FieldPath>, pattern: impl Into<Value>) -> Expr {
    compare("like", path, pattern)
}

pub fn is_null(path: impl Into<FieldPath>) -> Expr {
    func("isNull", vec![field(path)])
}

pub fn is_undefined(path: impl Into<FieldPath>) -> Expr {
    func("isUndefined", vec![field(path)])
}

pub fn in_list<I, V>(path: impl Into<FieldPath>, values: I) -> Expr
where
    I: IntoIterator<Item = V>,
    V: Into<Value>,
{
    let values: Vec<Value> = values.into_iter().map(Into::into).collect();
    func("in", vec![field(path), Expr::Val(Value::Array(values))])
}

pub fn and(terms: Vec<Expr>) -> Expr {
    func("and", terms)
}

pub fn or(terms: Vec<Expr>) -> Expr {
    func("or", terms)
}

pub fn not(term: Expr) -> Expr {
    func("not", vec![term])
}
