//! Error types for carbon-rules.
//!
//! All errors are strongly typed using thiserror. This enables pattern
//! matching on specific error conditions and provides clear error
//! messages. Errors are surfaced unchanged to the caller: this crate is
//! a thin orchestration layer and does no local recovery.

use thiserror::Error;

use crate::value::Domain;

/// Errors raised while parsing a formula expression.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("Unexpected character '{found}' at position {position}")]
    UnexpectedCharacter { found: char, position: usize },

    #[error("Unexpected token '{found}' at position {position}, expected {expected}")]
    UnexpectedToken {
        found: String,
        expected: String,
        position: usize,
    },

    #[error("Formula ended unexpectedly, expected {expected}")]
    UnexpectedEnd { expected: String },

    #[error("Invalid number literal '{literal}' at position {position}")]
    InvalidNumber { literal: String, position: usize },

    #[error("Formula is empty")]
    EmptyFormula,
}

/// Errors raised while building a rule graph or constructing an engine.
///
/// A factory error during first-access cache population leaves the key
/// unpopulated, so a subsequent call retries.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConstructionError {
    #[error("Rule '{rule}' references undefined rule '{reference}'")]
    UnknownReference { rule: String, reference: String },

    #[error("Duplicate rule name '{name}' in bundle")]
    DuplicateRule { name: String },

    #[error("Rule name cannot be empty")]
    EmptyRuleName,

    #[error("Invalid rule '{rule}': {reason}")]
    InvalidRule { rule: String, reason: String },

    #[error("Failed to read rule bundle: {message}")]
    BundleRead { message: String },
}

/// Errors raised while evaluating a rule under a situation.
///
/// Evaluation errors never corrupt the cached baseline engine: every
/// evaluation runs against an isolated working copy.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvaluationError {
    #[error("Rule '{name}' does not exist in the rule graph")]
    UnknownRule { name: String },

    #[error("Override targets undefined rule '{name}'")]
    UnknownOverride { name: String },

    #[error("Override for rule '{name}' has type {actual}, expected {expected}")]
    TypeMismatch {
        name: String,
        expected: Domain,
        actual: String,
    },

    #[error("Rule '{name}' evaluated to {actual}, expected {expected}")]
    DomainMismatch {
        name: String,
        expected: Domain,
        actual: String,
    },

    #[error("Cyclic dependency while evaluating '{name}': {chain}")]
    CyclicDependency { name: String, chain: String },

    #[error("Division by zero while evaluating '{name}'")]
    DivisionByZero { name: String },

    #[error("Invalid override expression for '{name}': {source}")]
    InvalidOverride {
        name: String,
        #[source]
        source: ParseError,
    },
}

/// Top-level error type for carbon-rules.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RulesError {
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Construction error: {0}")]
    Construction(#[from] ConstructionError),

    #[error("Evaluation error: {0}")]
    Evaluation(#[from] EvaluationError),

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl RulesError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this is a parse error.
    #[must_use]
    pub const fn is_parse(&self) -> bool {
        matches!(self, Self::Parse(_))
    }

    /// Returns true if this is a construction error.
    #[must_use]
    pub const fn is_construction(&self) -> bool {
        matches!(self, Self::Construction(_))
    }

    /// Returns true if this is an evaluation error.
    #[must_use]
    pub const fn is_evaluation(&self) -> bool {
        matches!(self, Self::Evaluation(_))
    }

    /// Returns true if this is an internal error.
    #[must_use]
    pub const fn is_internal(&self) -> bool {
        matches!(self, Self::Internal { .. })
    }
}

/// Result type alias for carbon-rules operations.
pub type RulesResult<T> = Result<T, RulesError>;
