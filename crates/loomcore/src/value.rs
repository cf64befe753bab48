use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Dynamic value carried by ports, signal arguments and the execution context
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<Value>),
    Object(BTreeMap<String, Value>),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Integral view of a number; fractional and out-of-range numbers are rejected.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Number(n)
                if n.fract() == 0.0 && *n >= i64::MIN as f64 && *n < i64::MAX as f64 =>
            {
                Some(*n as i64)
            }
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Object(map) => Some(map),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Loose truthiness used by condition ports (`If`, `While`).
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0,
            Value::String(s) => !s.is_empty(),
            Value::Array(items) => !items.is_empty(),
            Value::Object(map) => !map.is_empty(),
        }
    }

    /// Short name of the variant, used in type errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Array(_) => "sequence",
            Value::Object(_) => "mapping",
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Number(n) => {
                if n.fract() == 0.0 && n.abs() < (i64::MAX as f64) {
                    serde_json::Value::from(*n as i64)
                } else {
                    serde_json::Number::from_f64(*n)
                        .map(serde_json::Value::Number)
                        .unwrap_or(serde_json::Value::Null)
                }
            }
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Array(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Object(map) => serde_json::Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
        }
    }

    /// Parses text as JSON, keeping it as a plain string when it is not valid JSON.
    pub fn parse_lenient(text: &str) -> Value {
        serde_json::from_str::<serde_json::Value>(text)
            .map(Value::from)
            .unwrap_or_else(|_| Value::String(text.to_string()))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => f.write_str(s),
            other => write!(f, "{}", other.to_json()),
        }
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(n as f64)
    }
}

impl From<usize> for Value {
    fn from(n: usize) -> Self {
        Value::Number(n as f64)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(items)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(map: BTreeMap<String, Value>) -> Self {
        Value::Object(map)
    }
}

impl From<HashMap<String, Value>> for Value {
    fn from(map: HashMap<String, Value>) -> Self {
        Value::Object(map.into_iter().collect())
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(0.0)),
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(arr) => {
                Value::Array(arr.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(obj) => {
                Value::Object(obj.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

/// Declared shape of a port value or a signal/slot parameter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    Any,
    Bool,
    Number,
    Integer,
    String,
    Sequence(Box<ValueType>),
    Mapping(Box<ValueType>, Box<ValueType>),
    Choice(Vec<String>),
}

impl ValueType {
    pub fn sequence(item: ValueType) -> Self {
        ValueType::Sequence(Box::new(item))
    }

    pub fn mapping(key: ValueType, value: ValueType) -> Self {
        ValueType::Mapping(Box::new(key), Box::new(value))
    }

    pub fn choice<I, S>(options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ValueType::Choice(options.into_iter().map(Into::into).collect())
    }

    /// Whether `value` fits this shape. Null fits every shape (an unset value).
    pub fn matches(&self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) | (ValueType::Any, _) => true,
            (ValueType::Bool, Value::Bool(_)) => true,
            (ValueType::Number, Value::Number(_)) => true,
            (ValueType::Integer, Value::Number(n)) => n.fract() == 0.0,
            (ValueType::String, Value::String(_)) => true,
            (ValueType::Choice(options), Value::String(s)) => options.iter().any(|o| o == s),
            (ValueType::Sequence(item), Value::Array(items)) => {
                items.iter().all(|v| item.matches(v))
            }
            (ValueType::Mapping(key, value), Value::Object(map)) => map.iter().all(|(k, v)| {
                key.matches(&Value::String(k.clone())) && value.matches(v)
            }),
            _ => false,
        }
    }

    /// Whether a value declared as `other` can be passed where `self` is expected.
    pub fn accepts(&self, other: &ValueType) -> bool {
        match (self, other) {
            (ValueType::Any, _) | (_, ValueType::Any) => true,
            (ValueType::Number, ValueType::Integer) => true,
            (ValueType::String, ValueType::Choice(_)) => true,
            (ValueType::Choice(mine), ValueType::Choice(theirs)) => {
                theirs.iter().all(|t| mine.contains(t))
            }
            (ValueType::Sequence(a), ValueType::Sequence(b)) => a.accepts(b),
            (ValueType::Mapping(ka, va), ValueType::Mapping(kb, vb)) => {
                ka.accepts(kb) && va.accepts(vb)
            }
            (a, b) => a == b,
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueType::Any => f.write_str("any"),
            ValueType::Bool => f.write_str("bool"),
            ValueType::Number => f.write_str("number"),
            ValueType::Integer => f.write_str("integer"),
            ValueType::String => f.write_str("string"),
            ValueType::Sequence(item) => write!(f, "sequence<{}>", item),
            ValueType::Mapping(k, v) => write!(f, "mapping<{}, {}>", k, v),
            ValueType::Choice(options) => write!(f, "choice[{}]", options.join("|")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_fits_every_shape() {
        assert!(ValueType::Integer.matches(&Value::Null));
        assert!(ValueType::sequence(ValueType::String).matches(&Value::Null));
    }

    #[test]
    fn integer_rejects_fractions() {
        assert!(ValueType::Integer.matches(&Value::from(3)));
        assert!(!ValueType::Integer.matches(&Value::from(3.5)));
    }

    #[test]
    fn choice_matches_listed_strings_only() {
        let level = ValueType::choice(["DEBUG", "INFO"]);
        assert!(level.matches(&Value::from("INFO")));
        assert!(!level.matches(&Value::from("TRACE")));
        assert!(ValueType::String.accepts(&level));
        assert!(!level.accepts(&ValueType::String));
    }

    #[test]
    fn nested_shapes_check_elements() {
        let ty = ValueType::mapping(ValueType::String, ValueType::sequence(ValueType::Number));
        let value = Value::parse_lenient(r#"{"xs": [1, 2.5]}"#);
        assert!(ty.matches(&value));
        let bad = Value::parse_lenient(r#"{"xs": ["no"]}"#);
        assert!(!ty.matches(&bad));
    }

    #[test]
    fn as_i64_rejects_out_of_range_numbers() {
        assert_eq!(Value::from(4_294_967_296i64).as_i64(), Some(4_294_967_296));
        assert_eq!(Value::from(-3).as_i64(), Some(-3));
        assert_eq!(Value::from(1e300).as_i64(), None);
        assert_eq!(Value::from(f64::INFINITY).as_i64(), None);
        assert_eq!(Value::from(2.5).as_i64(), None);
    }

    #[test]
    fn parse_lenient_falls_back_to_string() {
        assert_eq!(Value::parse_lenient("3"), Value::Number(3.0));
        assert_eq!(Value::parse_lenient("hello"), Value::from("hello"));
    }

    #[test]
    fn display_prints_strings_raw() {
        assert_eq!(Value::from("hi").to_string(), "hi");
        assert_eq!(Value::from(5.0).to_string(), "5");
        assert_eq!(Value::from(true).to_string(), "true");
    }
}
