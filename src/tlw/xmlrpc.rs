//! Packing of call arguments into XMLRPC values.

use serde_json::Value;
use std::fmt;

/// Value sent to or received from an XMLRPC daemon.
#[derive(Debug, Clone, PartialEq)]
pub enum XmlRpcValue {
    String(String),
    Bool(bool),
    Int(i32),
    Double(f64),
}

impl XmlRpcValue {
    /// Pack a JSON value. Types without an XMLRPC counterpart become a
    /// placeholder string naming the type.
    pub fn pack(value: &Value) -> Self {
        match value {
            Value::String(s) => XmlRpcValue::String(s.clone()),
            Value::Bool(b) => XmlRpcValue::Bool(*b),
            Value::Number(n) => match n.as_i64().and_then(|i| i32::try_from(i).ok()) {
                Some(i) => XmlRpcValue::Int(i),
                None => XmlRpcValue::Double(n.as_f64().unwrap_or_default()),
            },
            Value::Null => XmlRpcValue::String("<unsupported type: null>".to_string()),
            Value::Array(_) => XmlRpcValue::String("<unsupported type: array>".to_string()),
            Value::Object(_) => XmlRpcValue::String("<unsupported type: object>".to_string()),
        }
    }

    pub fn pack_all(values: &[Value]) -> Vec<Self> {
        values.iter().map(Self::pack).collect()
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            XmlRpcValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            XmlRpcValue::Bool(b) => Some(*b),
            XmlRpcValue::Int(i) => Some(*i != 0),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            XmlRpcValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_double(&self) -> Option<f64> {
        match self {
            XmlRpcValue::Double(d) => Some(*d),
            XmlRpcValue::Int(i) => Some(f64::from(*i)),
            _ => None,
        }
    }
}

impl fmt::Display for XmlRpcValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            XmlRpcValue::String(s) => f.write_str(s),
            XmlRpcValue::Bool(b) => write!(f, "{b}"),
            XmlRpcValue::Int(i) => write!(f, "{i}"),
            XmlRpcValue::Double(d) => write!(f, "{d}"),
        }
    }
}

impl From<&str> for XmlRpcValue {
    fn from(value: &str) -> Self {
        XmlRpcValue::String(value.to_string())
    }
}

impl From<String> for XmlRpcValue {
    fn from(value: String) -> Self {
        XmlRpcValue::String(value)
    }
}

impl From<bool> for XmlRpcValue {
    fn from(value: bool) -> Self {
        XmlRpcValue::Bool(value)
    }
}

impl From<i32> for XmlRpcValue {
    fn from(value: i32) -> Self {
        XmlRpcValue::Int(value)
    }
}

impl From<f64> for XmlRpcValue {
    fn from(value: f64) -> Self {
        XmlRpcValue::Double(value)
    }
}
