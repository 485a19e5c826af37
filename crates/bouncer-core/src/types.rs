//! Universal data types for the Bouncer core
//!
//! Records are schema-agnostic: a record is an ordered map of field names to
//! dynamically-typed values, identified by an integer or text key.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Ordered mapping from field name to value
pub type FieldMap = BTreeMap<String, Value>;

/// Field-level validation errors (field name -> messages)
pub type FieldErrors = BTreeMap<String, Vec<String>>;

/// Universal value representation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Array(Vec<Value>),
    Map(FieldMap),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Compact JSON rendering, used when a backend stores nested values as text.
    pub fn to_json_string(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "null".to_string())
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(value as i64)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Null)
    }
}

/// Identifier of a record inside its collection
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordKey {
    Int(i64),
    Text(String),
}

impl RecordKey {
    /// Reads a key out of a field value. Only integers and non-empty text qualify.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Int(i) => Some(RecordKey::Int(*i)),
            Value::Text(s) if !s.is_empty() => Some(RecordKey::Text(s.clone())),
            _ => None,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            RecordKey::Int(i) => Value::Int(*i),
            RecordKey::Text(s) => Value::Text(s.clone()),
        }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordKey::Int(i) => write!(f, "{}", i),
            RecordKey::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<i64> for RecordKey {
    fn from(value: i64) -> Self {
        RecordKey::Int(value)
    }
}

impl From<i32> for RecordKey {
    fn from(value: i32) -> Self {
        RecordKey::Int(value as i64)
    }
}

impl From<&str> for RecordKey {
    fn from(value: &str) -> Self {
        RecordKey::Text(value.to_string())
    }
}

/// Identifier of a user (proposer or reviewer). Identity is supplied by the
/// caller; the core never models users.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Resolves a user id stored in a record field.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Int(i) => Some(UserId(i.to_string())),
            Value::Text(s) if !s.trim().is_empty() => Some(UserId(s.trim().to_string())),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<i64> for UserId {
    fn from(value: i64) -> Self {
        UserId(value.to_string())
    }
}

impl From<i32> for UserId {
    fn from(value: i32) -> Self {
        UserId(value.to_string())
    }
}

impl From<&str> for UserId {
    fn from(value: &str) -> Self {
        UserId(value.to_string())
    }
}

impl From<String> for UserId {
    fn from(value: String) -> Self {
        UserId(value)
    }
}

/// A stored record together with its key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub key: RecordKey,
    pub fields: FieldMap,
}

impl Record {
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }
}

/// Mutating operation kinds subject to approval
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Create,
    Update,
    Delete,
}

impl Operation {
    pub fn all() -> Vec<Operation> {
        vec![Operation::Create, Operation::Update, Operation::Delete]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Delete => "delete",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_deserializes_untagged_json() {
        let json = r#"{"title":"A","views":3,"score":1.5,"draft":false,"tags":["x"],"meta":{"a":null}}"#;
        let fields: FieldMap = serde_json::from_str(json).expect("should parse");

        assert_eq!(fields.get("title"), Some(&Value::Text("A".to_string())));
        assert_eq!(fields.get("views"), Some(&Value::Int(3)));
        assert_eq!(fields.get("score"), Some(&Value::Float(1.5)));
        assert_eq!(fields.get("draft"), Some(&Value::Bool(false)));
        assert_eq!(
            fields.get("tags"),
            Some(&Value::Array(vec![Value::Text("x".to_string())]))
        );
        match fields.get("meta") {
            Some(Value::Map(meta)) => assert_eq!(meta.get("a"), Some(&Value::Null)),
            other => panic!("unexpected meta value: {other:?}"),
        }
    }

    #[test]
    fn user_id_resolves_from_int_and_text_fields() {
        assert_eq!(UserId::from_value(&Value::Int(7)), Some(UserId::from(7)));
        assert_eq!(
            UserId::from_value(&Value::Text(" alice ".to_string())),
            Some(UserId::from("alice"))
        );
        assert_eq!(UserId::from_value(&Value::Text("  ".to_string())), None);
        assert_eq!(UserId::from_value(&Value::Null), None);
    }

    #[test]
    fn record_key_serializes_as_plain_json() {
        assert_eq!(serde_json::to_string(&RecordKey::Int(5)).unwrap(), "5");
        assert_eq!(
            serde_json::to_string(&RecordKey::from("abc")).unwrap(),
            "\"abc\""
        );
        let key: RecordKey = serde_json::from_str("12").unwrap();
        assert_eq!(key, RecordKey::Int(12));
    }
}
