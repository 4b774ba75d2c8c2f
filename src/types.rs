//! Core types shared by the subscription manager and the local store.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Scope of a remote subscription: the whole entity or a single record.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Selector {
    /// Every record of the entity (`*` on the wire).
    All,
    /// One record by id.
    Record(String),
}

impl Selector {
    /// Wire form of the selector.
    pub fn as_str(&self) -> &str {
        match self {
            Selector::All => "*",
            Selector::Record(id) => id,
        }
    }

    /// Parse the wire form; `*` means the whole entity.
    pub fn parse(s: &str) -> Self {
        if s == "*" {
            Selector::All
        } else {
            Selector::Record(s.to_string())
        }
    }
}

impl Default for Selector {
    fn default() -> Self {
        Selector::All
    }
}

impl fmt::Debug for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Selector({})", self.as_str())
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for Selector {
    fn from(s: &str) -> Self {
        Selector::parse(s)
    }
}

/// Identifies one logical subscription.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionKey {
    pub entity: String,
    pub selector: Selector,
}

impl SubscriptionKey {
    pub fn new(entity: impl Into<String>, selector: Selector) -> Self {
        Self {
            entity: entity.into(),
            selector,
        }
    }
}

impl fmt::Debug for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SubscriptionKey({}/{})", self.entity, self.selector)
    }
}

impl fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.entity, self.selector)
    }
}

/// A remote record as a JSON object.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(pub Map<String, Value>);

impl Record {
    /// Build a record from a JSON value. Non-objects yield `None`.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Record(map)),
            _ => None,
        }
    }

    /// The record's id, if present. Numeric ids are rendered as strings.
    pub fn id(&self) -> Option<String> {
        match self.0.get("id")? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// Get a field by name.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

/// What happened to a record on the remote side.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventAction {
    Create,
    Update,
    Delete,
}

impl fmt::Display for EventAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EventAction::Create => "create",
            EventAction::Update => "update",
            EventAction::Delete => "delete",
        };
        f.write_str(s)
    }
}

/// One event from the remote stream.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RecordEvent {
    pub action: EventAction,
    pub record: Record,
}

impl RecordEvent {
    pub fn new(action: EventAction, record: Record) -> Self {
        Self { action, record }
    }

    pub fn create(record: Record) -> Self {
        Self::new(EventAction::Create, record)
    }

    pub fn update(record: Record) -> Self {
        Self::new(EventAction::Update, record)
    }

    pub fn delete(record: Record) -> Self {
        Self::new(EventAction::Delete, record)
    }
}
