//! Runtime values produced by expression evaluation.
//!
//! Every expression evaluates to exactly one [`Value`]. There is no error
//! variant: evaluation is total, and conditions that would be errors in a
//! general-purpose language (unknown paths, mixed-type arithmetic, division
//! by zero) resolve to [`Value::Null`] or `false` instead.
//!
//! # Truthiness
//!
//! `false`, `0`, the empty string, the empty list, and `Null` are falsey.
//! Everything else is truthy.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A runtime value in the condition language.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Absent or unresolvable value. Unknown paths resolve to `Null`, and
    /// any comparison against `Null` (other than `Null == Null`) is false.
    Null,
    /// Boolean.
    Bool(bool),
    /// Number. All numerics are `f64`.
    Num(f64),
    /// String.
    Text(String),
    /// Homogeneous or mixed list, used with the `in` operator.
    List(Vec<Value>),
}

impl Value {
    /// Returns the truthiness of this value.
    ///
    /// # Example
    ///
    /// ```
    /// use wick::Value;
    ///
    /// assert!(Value::Num(1.0).truthy());
    /// assert!(!Value::Num(0.0).truthy());
    /// assert!(!Value::Text(String::new()).truthy());
    /// assert!(!Value::Null.truthy());
    /// ```
    #[must_use]
    pub fn truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Num(n) => *n != 0.0,
            Value::Text(s) => !s.is_empty(),
            Value::List(items) => !items.is_empty(),
        }
    }

    /// Returns the numeric content, if this is a number.
    #[must_use]
    pub fn as_num(&self) -> Option<f64> {
        match self {
            Value::Num(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the text content, if this is a string.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Strict same-variant equality.
    ///
    /// `Null` equals only `Null`; values of different variants are never
    /// equal. This is the semantics of the `==` operator.
    #[must_use]
    pub fn loose_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Num(a), Value::Num(b)) => (a - b).abs() < f64::EPSILON || a == b,
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::List(a), Value::List(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.loose_eq(y))
            }
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Num(n) => write!(f, "{n}"),
            Value::Text(s) => write!(f, "{s:?}"),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Num(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}
