//! Reply values returned by a Redis-compatible server.

use bytes::Bytes;
use std::fmt;

use crate::error::{Error, Result};

/// A decoded RESP2 reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// A bulk string.
    String(Bytes),

    /// An integer reply.
    Integer(i64),

    /// An array of replies.
    Array(Vec<Value>),

    /// A null bulk string or null array.
    Nil,

    /// A simple string such as `+OK`.
    Status(String),

    /// An error reply. Only surfaced inside pipelines and nested arrays;
    /// a top-level error from [`crate::Connection::execute`] becomes
    /// [`Error::Server`].
    Error(String),
}

impl Value {
    /// Returns the value as UTF-8 text, if it is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(b) => std::str::from_utf8(b).ok(),
            Value::Status(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Returns the raw bytes of a bulk string.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::String(b) => Some(b),
            Value::Status(s) => Some(s.as_bytes()),
            _ => None,
        }
    }

    /// Returns the value as an integer, if it is one.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the value as an array, if it is one.
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(arr) => Some(arr),
            _ => None,
        }
    }

    /// Returns `true` if the value is nil.
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    /// Converts an [`Value::Error`] into `Err`, passing every other value through.
    pub fn into_result(self) -> Result<Value> {
        match self {
            Value::Error(msg) => Err(Error::Server(msg)),
            other => Ok(other),
        }
    }

    /// Converts the value into owned bytes.
    pub fn into_bytes(self) -> Result<Bytes> {
        match self {
            Value::String(b) => Ok(b),
            Value::Status(s) => Ok(Bytes::from(s)),
            other => Err(other.unexpected("string")),
        }
    }

    /// Converts the value into an `i64`.
    pub fn into_integer(self) -> Result<i64> {
        match self {
            Value::Integer(n) => Ok(n),
            other => Err(other.unexpected("integer")),
        }
    }

    /// Converts the value into a vector of values.
    pub fn into_array(self) -> Result<Vec<Value>> {
        match self {
            Value::Array(arr) => Ok(arr),
            other => Err(other.unexpected("array")),
        }
    }

    /// Returns a short human-readable name for the value type.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::String(_) => "string",
            Value::Integer(_) => "integer",
            Value::Array(_) => "array",
            Value::Nil => "nil",
            Value::Status(_) => "status",
            Value::Error(_) => "error",
        }
    }

    fn unexpected(&self, expected: &'static str) -> Error {
        Error::UnexpectedResponse {
            expected,
            actual: self.type_name().to_string(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(b) => write!(f, "\"{}\"", String::from_utf8_lossy(b)),
            Value::Integer(n) => write!(f, "(integer) {}", n),
            Value::Array(arr) => {
                write!(f, "[")?;
                for (i, v) in arr.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", v)?;
                }
                write!(f, "]")
            }
            Value::Nil => write!(f, "(nil)"),
            Value::Status(s) => write!(f, "{}", s),
            Value::Error(s) => write!(f, "(error) {}", s),
        }
    }
}
