//! Defines the scalar `Value` carried by fact fields and session state.
//!
//! Values are deliberately flat: facts are records of scalars, so there is no
//! nested object or array variant. Integers and floats compare numerically
//! with each other; every other cross-kind comparison is incomparable.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

use crate::error::{Error, Result};

/// A scalar field value.
///
/// # Examples
///
/// ```
/// use aingle_rules::Value;
///
/// let role = Value::literal("DNS");
/// assert_eq!(role.as_string(), Some("DNS"));
///
/// let deadline = Value::integer(3);
/// assert!(deadline.compare(&Value::float(2.5)).unwrap().is_gt());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// The null value.
    Null,
    /// A boolean.
    Boolean(bool),
    /// A 64-bit signed integer.
    Integer(i64),
    /// A 64-bit float. Must be finite to be asserted.
    Float(f64),
    /// A UTF-8 string.
    String(String),
}

/// The comparison class of a [`Value`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueKind {
    /// `Value::Null`.
    Null,
    /// `Value::Boolean`.
    Boolean,
    /// `Value::Integer` or `Value::Float`.
    Number,
    /// `Value::String`.
    String,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueKind::Null => "null",
            ValueKind::Boolean => "boolean",
            ValueKind::Number => "number",
            ValueKind::String => "string",
        };
        f.write_str(name)
    }
}

impl Value {
    /// Creates a string value.
    pub fn literal(s: impl Into<String>) -> Self {
        Self::String(s.into())
    }

    /// Creates an integer value.
    pub fn integer(n: i64) -> Self {
        Self::Integer(n)
    }

    /// Creates a float value.
    pub fn float(f: f64) -> Self {
        Self::Float(f)
    }

    /// Creates a boolean value.
    pub fn boolean(b: bool) -> Self {
        Self::Boolean(b)
    }

    /// Returns the null value.
    pub fn null() -> Self {
        Self::Null
    }

    /// Returns `true` for `Value::Null`.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// The string content, if this is a string.
    pub fn as_string(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// The integer, if this is an integer.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the value as a float, widening integers.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            Self::Integer(n) => Some(*n as f64),
            _ => None,
        }
    }

    /// The boolean, if this is a boolean.
    pub fn as_boolean(&self) -> Option<bool> {
        match self {
            Self::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the comparison class of this value.
    pub fn kind(&self) -> ValueKind {
        match self {
            Self::Null => ValueKind::Null,
            Self::Boolean(_) => ValueKind::Boolean,
            Self::Integer(_) | Self::Float(_) => ValueKind::Number,
            Self::String(_) => ValueKind::String,
        }
    }

    /// Compares two values of the same kind.
    ///
    /// Returns `None` when the values are incomparable: different kinds, or a
    /// NaN float.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Self::Null, Self::Null) => Some(Ordering::Equal),
            (Self::Boolean(a), Self::Boolean(b)) => Some(a.cmp(b)),
            (Self::Integer(a), Self::Integer(b)) => Some(a.cmp(b)),
            (Self::String(a), Self::String(b)) => Some(a.cmp(b)),
            (a, b) if a.kind() == ValueKind::Number && b.kind() == ValueKind::Number => {
                a.as_float()?.partial_cmp(&b.as_float()?)
            }
            _ => None,
        }
    }

    /// Equality used by `=` and `!=` tests: numeric across integer and float.
    pub fn loosely_equals(&self, other: &Value) -> bool {
        self.compare(other) == Some(Ordering::Equal)
    }

    /// Converts a JSON scalar into a `Value`.
    ///
    /// # Errors
    ///
    /// Returns `Error::MalformedFact` for arrays, objects and numbers that fit
    /// neither `i64` nor `f64`.
    pub fn from_json(json: &serde_json::Value) -> Result<Self> {
        match json {
            serde_json::Value::Null => Ok(Self::Null),
            serde_json::Value::Bool(b) => Ok(Self::Boolean(*b)),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(Self::Integer(i))
                } else if let Some(f) = n.as_f64() {
                    Ok(Self::Float(f))
                } else {
                    Err(Error::MalformedFact(format!("unsupported number {}", n)))
                }
            }
            serde_json::Value::String(s) => Ok(Self::String(s.clone())),
            serde_json::Value::Array(_) | serde_json::Value::Object(_) => Err(
                Error::MalformedFact("fact fields must be scalars".to_string()),
            ),
        }
    }

    /// Converts this value into a JSON scalar.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Boolean(b) => serde_json::Value::Bool(*b),
            Self::Integer(n) => serde_json::Value::from(*n),
            Self::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Self::String(s) => serde_json::Value::String(s.clone()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Boolean(b) => write!(f, "{}", b),
            Self::Integer(n) => write!(f, "{}", n),
            Self::Float(n) => write!(f, "{}", n),
            Self::String(s) => write!(f, "'{}'", s),
        }
    }
}

// Convenient conversions from standard types into `Value`.
impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Integer(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Self::Integer(n as i64)
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Self::Integer(n as i64)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Boolean(b)
    }
}
