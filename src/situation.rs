//! Situations: input overrides applied before evaluating a rule.
//!
//! A situation maps rule names to override values. Applying an override
//! for a key replaces any prior override for that key; rules without an
//! override fall back to their formula.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::value::Value;

/// A mapping of rule names to override values.
///
/// # Examples
///
/// ```
/// use carbon_rules::{Situation, Value};
///
/// let mut situation = Situation::new();
/// situation.set("input", Value::Number(5.0));
/// situation.set("input", Value::Number(7.0));
/// assert_eq!(situation.get("input"), Some(&Value::Number(7.0)));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Situation {
    overrides: BTreeMap<String, Value>,
}

impl Situation {
    /// Creates an empty situation.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets an override, replacing any prior override for the same rule.
    pub fn set(&mut self, rule: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        let _ = self.overrides.insert(rule.into(), value.into());
        self
    }

    /// Removes the override for a rule, if any.
    pub fn unset(&mut self, rule: &str) -> Option<Value> {
        self.overrides.remove(rule)
    }

    /// Returns the override for a rule, if any.
    #[must_use]
    pub fn get(&self, rule: &str) -> Option<&Value> {
        self.overrides.get(rule)
    }

    /// Returns true if a rule is overridden.
    #[must_use]
    pub fn contains(&self, rule: &str) -> bool {
        self.overrides.contains_key(rule)
    }

    /// Number of overrides.
    #[must_use]
    pub fn len(&self) -> usize {
        self.overrides.len()
    }

    /// Returns true if no overrides are set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.overrides.is_empty()
    }

    /// Layers `other` on top of this situation: overrides in `other`
    /// replace this situation's overrides for the same keys.
    pub fn apply(&mut self, other: &Self) {
        for (rule, value) in &other.overrides {
            let _ = self.overrides.insert(rule.clone(), value.clone());
        }
    }

    /// Iterates over `(rule, value)` pairs in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.overrides.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Situation {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut situation = Self::new();
        for (rule, value) in iter {
            situation.set(rule, value);
        }
        situation
    }
}
