//! Values carried by situations and produced by evaluations.
//!
//! An override applied to a rule is numeric, boolean, or a formula
//! expression evaluated in place of the rule's own formula. Evaluation
//! results are always numeric or boolean.

use serde::{Deserialize, Serialize};

/// A situation override or evaluation result.
///
/// # Examples
///
/// ```
/// use carbon_rules::Value;
///
/// let num = Value::Number(3.5);
/// let flag = Value::Bool(true);
///
/// assert!(num.is_number());
/// assert_eq!(flag.as_bool(), Some(true));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    /// A numeric quantity.
    Number(f64),
    /// A boolean flag.
    Bool(bool),
    /// A formula evaluated in place of the target rule's own formula.
    Expression(String),
}

impl Value {
    pub const fn is_number(&self) -> bool {
        matches!(self, Self::Number(_))
    }

    pub const fn is_bool(&self) -> bool {
        matches!(self, Self::Bool(_))
    }

    pub const fn is_expression(&self) -> bool {
        matches!(self, Self::Expression(_))
    }

    pub const fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(v) => Some(*v),
            _ => None,
        }
    }

    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_expression(&self) -> Option<&str> {
        match self {
            Self::Expression(v) => Some(v),
            _ => None,
        }
    }

    /// Returns a human-readable type name.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Number(_) => "number",
            Self::Bool(_) => "bool",
            Self::Expression(_) => "expression",
        }
    }

    /// Returns the domain this value inhabits, when it is a literal.
    ///
    /// Expressions have no intrinsic domain before evaluation.
    #[must_use]
    pub const fn domain(&self) -> Option<Domain> {
        match self {
            Self::Number(_) => Some(Domain::Number),
            Self::Bool(_) => Some(Domain::Bool),
            Self::Expression(_) => None,
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(v) => write!(f, "{v}"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Expression(v) => write!(f, "{v:?}"),
        }
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Number(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Number(v as f64)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Number(f64::from(v))
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Expression(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Expression(v)
    }
}

/// Declared result type of a rule.
///
/// Used to reject type-incompatible overrides before evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    /// The rule computes a numeric quantity.
    Number,
    /// The rule computes a boolean flag.
    Bool,
}

impl std::fmt::Display for Domain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number => write!(f, "number"),
            Self::Bool => write!(f, "bool"),
        }
    }
}
