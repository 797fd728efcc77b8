//! Rule definitions and the immutable rule graph.
//!
//! A rule graph is the shared, immutable half of an engine: a validated
//! mapping from rule name to declarative formula. Graphs are typically
//! loaded from a JSON bundle shipped with each deployment:
//!
//! ```json
//! {
//!     "input": 0,
//!     "total": { "formula": "input + 10", "title": "Total emissions" }
//! }
//! ```
//!
//! Scalar entries are shorthand for constant rules. Validation happens at
//! construction: duplicate names and references to undefined rules are
//! rejected so evaluation never encounters a dangling reference.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::{ConstructionError, RulesError, RulesResult};
use crate::expr::{BinaryOp, Expr, UnaryOp};
use crate::value::Domain;

/// A named, declaratively defined computation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    /// Unique rule name within its graph.
    pub name: String,
    /// Optional human-readable title.
    pub title: Option<String>,
    /// Optional longer description.
    pub description: Option<String>,
    /// The formula computing this rule.
    pub formula: Expr,
    /// Declared result type.
    pub domain: Domain,
    // True when the domain came from the caller or could be read off the
    // formula. Bare-reference rules stay false until graph construction
    // resolves the referenced rule's domain.
    #[serde(skip, default)]
    domain_declared: bool,
}

impl Rule {
    /// Creates a rule from an already-parsed formula.
    #[must_use]
    pub fn new(name: impl Into<String>, formula: Expr, domain: Domain) -> Self {
        Self {
            name: name.into(),
            title: None,
            description: None,
            formula,
            domain,
            domain_declared: true,
        }
    }

    /// Creates a constant numeric rule.
    #[must_use]
    pub fn constant(name: impl Into<String>, value: f64) -> Self {
        Self::new(name, Expr::Number { value }, Domain::Number)
    }

    /// Parses `formula` and creates a rule, inferring the domain from the
    /// formula's top-level structure. A bare-reference formula has no
    /// structure to read; its domain is resolved against the referenced
    /// rule during graph construction.
    pub fn parse(name: impl Into<String>, formula: &str) -> RulesResult<Self> {
        let expr = Expr::parse(formula)?;
        let shallow = shallow_domain(&expr);
        let mut rule = Self::new(name, expr, shallow.unwrap_or(Domain::Number));
        rule.domain_declared = shallow.is_some();
        Ok(rule)
    }
}

/// Domain of an expression judged by its top-level node alone.
///
/// References are opaque here; graph construction resolves them with
/// [`RuleGraph::infer_domains`].
fn shallow_domain(expr: &Expr) -> Option<Domain> {
    match expr {
        Expr::Number { .. } => Some(Domain::Number),
        Expr::Bool { .. } => Some(Domain::Bool),
        Expr::Reference { .. } => None,
        Expr::Unary { op, .. } => Some(match op {
            UnaryOp::Neg => Domain::Number,
            UnaryOp::Not => Domain::Bool,
        }),
        Expr::Binary { op, .. } => Some(match op {
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div => Domain::Number,
            BinaryOp::Eq
            | BinaryOp::Ne
            | BinaryOp::Lt
            | BinaryOp::Le
            | BinaryOp::Gt
            | BinaryOp::Ge
            | BinaryOp::And
            | BinaryOp::Or => Domain::Bool,
        }),
    }
}

/// An immutable, validated rule graph.
///
/// Engines share one graph structurally (via `Arc`); all mutable state
/// lives in each engine's situation. Iteration order is stable (sorted by
/// rule name).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleGraph {
    rules: BTreeMap<String, Rule>,
}

impl RuleGraph {
    /// Builds a graph from rules, validating names and references.
    pub fn from_rules(rules: impl IntoIterator<Item = Rule>) -> RulesResult<Self> {
        let mut map: BTreeMap<String, Rule> = BTreeMap::new();

        for mut rule in rules {
            rule.name = rule.name.trim().to_string();
            if rule.name.is_empty() {
                return Err(ConstructionError::EmptyRuleName.into());
            }
            match map.entry(rule.name.clone()) {
                Entry::Occupied(e) => {
                    return Err(ConstructionError::DuplicateRule {
                        name: e.key().clone(),
                    }
                    .into());
                }
                Entry::Vacant(e) => {
                    e.insert(rule);
                }
            }
        }

        let graph = Self { rules: map };
        graph.validate_references()?;
        Ok(graph.infer_domains())
    }

    /// Loads a graph from a JSON bundle.
    ///
    /// Scalar entries become constant rules. Entries without a declared
    /// `domain` whose formula is a bare reference inherit the referenced
    /// rule's domain.
    pub fn from_json(bundle: &str) -> RulesResult<Self> {
        let raw: BTreeMap<String, RawRule> =
            serde_json::from_str(bundle).map_err(|e| ConstructionError::BundleRead {
                message: e.to_string(),
            })?;

        let mut rules = Vec::with_capacity(raw.len());
        for (name, entry) in raw {
            rules.push(entry.into_rule(name)?);
        }
        Self::from_rules(rules)
    }

    /// Looks up a rule by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Rule> {
        self.rules.get(name)
    }

    /// Returns true if a rule with this name exists.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.rules.contains_key(name)
    }

    /// Number of rules in the graph.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Returns true if the graph holds no rules.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Iterates over rule names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.rules.keys().map(String::as_str)
    }

    fn validate_references(&self) -> Result<(), ConstructionError> {
        for rule in self.rules.values() {
            let mut refs = Vec::new();
            rule.formula.collect_references(&mut refs);
            for reference in refs {
                if !self.rules.contains_key(&reference) {
                    return Err(ConstructionError::UnknownReference {
                        rule: rule.name.clone(),
                        reference,
                    });
                }
            }
        }
        Ok(())
    }

    /// Resolves domains for rules whose formula is a bare reference chain.
    ///
    /// `shallow_domain` cannot see through references; a rule defined as
    /// `"flag": { "formula": "excluded" }` inherits the domain of
    /// `excluded`. Cycles fall back to `Number` (they fail at evaluation
    /// time regardless). Only rules whose domain was never declared are
    /// touched, so declared domains are never overwritten.
    fn infer_domains(mut self) -> Self {
        fn resolve(
            name: &str,
            rules: &BTreeMap<String, Rule>,
            memo: &mut HashMap<String, Domain>,
            visiting: &mut HashSet<String>,
        ) -> Domain {
            if let Some(d) = memo.get(name) {
                return *d;
            }
            let Some(rule) = rules.get(name) else {
                return Domain::Number;
            };
            let domain = match shallow_domain(&rule.formula) {
                Some(d) => d,
                None => {
                    let Expr::Reference { name: target } = &rule.formula else {
                        // shallow_domain is None only for bare references.
                        return Domain::Number;
                    };
                    if !visiting.insert(name.to_string()) {
                        Domain::Number
                    } else {
                        let d = resolve(target, rules, memo, visiting);
                        visiting.remove(name);
                        d
                    }
                }
            };
            memo.insert(name.to_string(), domain);
            domain
        }

        let snapshot = self.rules.clone();
        let mut memo = HashMap::new();
        for (name, rule) in &mut self.rules {
            if !rule.domain_declared && matches!(rule.formula, Expr::Reference { .. }) {
                rule.domain = resolve(name, &snapshot, &mut memo, &mut HashSet::new());
                rule.domain_declared = true;
            }
        }
        self
    }
}

/// One bundle entry: either a scalar shorthand or a detailed rule.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawRule {
    Number(f64),
    Bool(bool),
    Formula(String),
    Detailed(RawRuleDetail),
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawRuleDetail {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    description: Option<String>,
    formula: RawFormula,
    #[serde(default)]
    domain: Option<Domain>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawFormula {
    Number(f64),
    Bool(bool),
    Text(String),
}

impl RawRule {
    /// Converts one bundle entry.
    fn into_rule(self, name: String) -> RulesResult<Rule> {
        match self {
            Self::Number(value) => Ok(Rule::constant(name, value)),
            Self::Bool(value) => Ok(Rule::new(name, Expr::Bool { value }, Domain::Bool)),
            Self::Formula(text) => Rule::parse(name, &text),
            Self::Detailed(detail) => {
                let expr = match detail.formula {
                    RawFormula::Number(value) => Expr::Number { value },
                    RawFormula::Bool(value) => Expr::Bool { value },
                    RawFormula::Text(text) => Expr::parse(&text).map_err(RulesError::from)?,
                };
                let shallow = shallow_domain(&expr);
                let declared = detail.domain.is_some() || shallow.is_some();
                let domain = detail.domain.or(shallow).unwrap_or(Domain::Number);
                let mut rule = Rule::new(name, expr, domain);
                rule.title = detail.title;
                rule.description = detail.description;
                rule.domain_declared = declared;
                Ok(rule)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EvaluationError;

    #[test]
    fn builds_graph_from_rules() {
        let graph = RuleGraph::from_rules([
            Rule::constant("input", 0.0),
            Rule::parse("total", "input + 10").unwrap(),
        ])
        .unwrap();

        assert_eq!(graph.len(), 2);
        assert!(graph.contains("total"));
        assert_eq!(graph.get("total").unwrap().domain, Domain::Number);
    }

    #[test]
    fn rejects_duplicate_rule_names() {
        let err = RuleGraph::from_rules([
            Rule::constant("input", 0.0),
            Rule::constant("input", 1.0),
        ])
        .unwrap_err();
        let RulesError::Construction(ConstructionError::DuplicateRule { name }) = err else {
            panic!("expected DuplicateRule, got {err:?}");
        };
        assert_eq!(name, "input");
    }

    #[test]
    fn rejects_unknown_reference() {
        let err =
            RuleGraph::from_rules([Rule::parse("total", "missing + 1").unwrap()]).unwrap_err();
        let RulesError::Construction(ConstructionError::UnknownReference { rule, reference }) =
            err
        else {
            panic!("expected UnknownReference, got {err:?}");
        };
        assert_eq!(rule, "total");
        assert_eq!(reference, "missing");
    }

    #[test]
    fn rejects_empty_rule_name() {
        let err = RuleGraph::from_rules([Rule::constant("  ", 1.0)]).unwrap_err();
        assert!(matches!(
            err,
            RulesError::Construction(ConstructionError::EmptyRuleName)
        ));
    }

    #[test]
    fn loads_bundle_with_scalar_shorthand() {
        let graph = RuleGraph::from_json(
            r#"{
                "input": 0,
                "excluded": false,
                "total": { "formula": "input + 10", "title": "Total emissions" }
            }"#,
        )
        .unwrap();

        assert_eq!(graph.len(), 3);
        assert_eq!(graph.get("input").unwrap().domain, Domain::Number);
        assert_eq!(graph.get("excluded").unwrap().domain, Domain::Bool);
        assert_eq!(
            graph.get("total").unwrap().title.as_deref(),
            Some("Total emissions")
        );
    }

    #[test]
    fn bundle_formula_may_be_scalar() {
        let graph = RuleGraph::from_json(r#"{ "base": { "formula": 42 } }"#).unwrap();
        assert_eq!(graph.get("base").unwrap().formula, Expr::Number { value: 42.0 });
    }

    #[test]
    fn bundle_with_invalid_json_is_a_construction_error() {
        let err = RuleGraph::from_json("{ not json").unwrap_err();
        assert!(matches!(
            err,
            RulesError::Construction(ConstructionError::BundleRead { .. })
        ));
    }

    #[test]
    fn bundle_with_bad_formula_is_a_parse_error() {
        let err = RuleGraph::from_json(r#"{ "total": "1 +" }"#).unwrap_err();
        assert!(err.is_parse());
    }

    #[test]
    fn declared_domain_wins_over_inference() {
        let graph = RuleGraph::from_json(
            r#"{ "flag": { "formula": "selector", "domain": "bool" }, "selector": true }"#,
        )
        .unwrap();
        assert_eq!(graph.get("flag").unwrap().domain, Domain::Bool);
    }

    #[test]
    fn bare_reference_inherits_referenced_domain() {
        let graph = RuleGraph::from_json(
            r#"{ "alias": "excluded", "excluded": false }"#,
        )
        .unwrap();
        assert_eq!(graph.get("alias").unwrap().domain, Domain::Bool);
    }

    // Programmatic construction must resolve bare-reference domains the
    // same way bundle loading does.
    #[test]
    fn from_rules_infers_bare_reference_domain() {
        let graph = RuleGraph::from_rules([
            Rule::parse("alias", "flag").unwrap(),
            Rule::new("flag", Expr::Bool { value: true }, Domain::Bool),
        ])
        .unwrap();
        assert_eq!(graph.get("alias").unwrap().domain, Domain::Bool);
    }

    #[test]
    fn comparison_formula_has_bool_domain() {
        let graph = RuleGraph::from_json(
            r#"{ "large": "input > 100", "input": 0 }"#,
        )
        .unwrap();
        assert_eq!(graph.get("large").unwrap().domain, Domain::Bool);
        assert_eq!(graph.get("input").unwrap().domain, Domain::Number);
    }

    #[test]
    fn names_are_sorted() {
        let graph = RuleGraph::from_json(r#"{ "b": 1, "a": 2, "c": 3 }"#).unwrap();
        let names: Vec<&str> = graph.names().collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    // Construction failures must not depend on evaluation machinery.
    #[test]
    fn construction_errors_are_not_evaluation_errors() {
        let err =
            RuleGraph::from_rules([Rule::parse("total", "missing").unwrap()]).unwrap_err();
        assert!(err.is_construction());
        assert_ne!(
            err,
            RulesError::Evaluation(EvaluationError::UnknownRule {
                name: "missing".to_string()
            })
        );
    }
}
