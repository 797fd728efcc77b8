//! Engine instances and situation evaluation.
//!
//! An engine pairs an immutable, structurally shared rule graph with a
//! mutable baseline situation. Evaluation never mutates the engine it is
//! given: [`evaluate_with_situation`] works on a shallow copy (shared
//! graph, independent situation), so a cached engine can serve concurrent
//! and subsequent evaluations without cross-talk.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use log::trace;
use serde::{Deserialize, Serialize};

use crate::error::{EvaluationError, RulesResult};
use crate::expr::{BinaryOp, Expr, UnaryOp};
use crate::rule::RuleGraph;
use crate::situation::Situation;
use crate::value::{Domain, Value};

/// A rule-evaluation engine: shared rule graph plus baseline situation.
///
/// Cloning the graph reference is cheap; the situation is owned. This is
/// the two-part structure behind "shallow copy": structural sharing of
/// the immutable rule graph, independent mutable situation state.
#[derive(Debug, Clone)]
pub struct Engine {
    graph: Arc<RuleGraph>,
    situation: Situation,
    // Expression overrides, parsed once at validation time and kept in
    // step with `situation` so evaluation never reparses them.
    parsed_overrides: BTreeMap<String, Expr>,
}

impl Engine {
    /// Creates an engine over a rule graph with an empty baseline
    /// situation.
    #[must_use]
    pub fn new(graph: RuleGraph) -> Self {
        Self::from_shared(Arc::new(graph))
    }

    /// Creates an engine over an already-shared rule graph.
    #[must_use]
    pub fn from_shared(graph: Arc<RuleGraph>) -> Self {
        Self {
            graph,
            situation: Situation::new(),
            parsed_overrides: BTreeMap::new(),
        }
    }

    /// Returns the shared rule graph.
    #[must_use]
    pub fn graph(&self) -> &Arc<RuleGraph> {
        &self.graph
    }

    /// Returns the baseline situation.
    #[must_use]
    pub fn situation(&self) -> &Situation {
        &self.situation
    }

    /// Replaces the baseline situation after validating every override.
    pub fn set_situation(&mut self, situation: Situation) -> RulesResult<()> {
        self.parsed_overrides = validate_situation(&self.graph, &situation)?;
        self.situation = situation;
        Ok(())
    }

    /// Returns a working copy sharing this engine's rule graph with an
    /// independent copy of its situation state.
    #[must_use]
    pub fn shallow_copy(&self) -> Self {
        Self {
            graph: Arc::clone(&self.graph),
            situation: self.situation.clone(),
            parsed_overrides: self.parsed_overrides.clone(),
        }
    }

    /// Layers `overrides` on top of the current situation, replacing any
    /// prior overrides for the given keys. Every override is validated
    /// first; on error the situation is left unchanged.
    pub fn apply_situation(&mut self, overrides: &Situation) -> RulesResult<()> {
        let parsed = validate_situation(&self.graph, overrides)?;
        // An incoming literal must also displace any stale parsed
        // expression kept for the same key.
        for (name, _) in overrides.iter() {
            self.parsed_overrides.remove(name);
        }
        self.parsed_overrides.extend(parsed);
        self.situation.apply(overrides);
        Ok(())
    }

    /// Evaluates one rule under this engine's current situation.
    pub fn evaluate(&self, rule: &str) -> RulesResult<Evaluation> {
        if !self.graph.contains(rule) {
            return Err(EvaluationError::UnknownRule {
                name: rule.to_string(),
            }
            .into());
        }

        let mut ctx = EvalContext {
            graph: &self.graph,
            situation: &self.situation,
            parsed_overrides: &self.parsed_overrides,
            memo: HashMap::new(),
            stack: Vec::new(),
            trace: Vec::new(),
        };
        let value = ctx.resolve(rule)?;
        trace!("evaluated rule '{rule}' => {value}");

        Ok(Evaluation {
            rule: rule.to_string(),
            value,
            trace: ctx.trace,
        })
    }
}

/// Computes the value of one target rule under a hypothetical situation
/// without altering the engine's baseline.
///
/// The call's overrides are layered on top of the engine's baseline
/// situation (replacing baseline overrides for the same keys) inside a
/// working copy; the engine passed in is never mutated.
///
/// # Examples
///
/// ```
/// use carbon_rules::{evaluate_with_situation, Engine, RuleGraph, Situation, Value};
///
/// let graph = RuleGraph::from_json(r#"{ "input": 0, "total": "input + 10" }"#).unwrap();
/// let engine = Engine::new(graph);
///
/// let situation: Situation = [("input", 5.0)].into_iter().collect();
/// let result = evaluate_with_situation(&engine, "total", &situation).unwrap();
/// assert_eq!(result.value, Value::Number(15.0));
///
/// // The override did not leak into the baseline.
/// let result = evaluate_with_situation(&engine, "total", &Situation::new()).unwrap();
/// assert_eq!(result.value, Value::Number(10.0));
/// ```
pub fn evaluate_with_situation(
    engine: &Engine,
    rule: &str,
    situation: &Situation,
) -> RulesResult<Evaluation> {
    let mut working = engine.shallow_copy();
    working.apply_situation(situation)?;
    working.evaluate(rule)
}

/// Result of evaluating one rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    /// The evaluated rule.
    pub rule: String,
    /// The computed value.
    pub value: Value,
    /// Every rule resolved during this evaluation, in resolution order.
    pub trace: Vec<TraceEntry>,
}

impl Evaluation {
    /// Returns the computed value as a number, if numeric.
    #[must_use]
    pub fn as_number(&self) -> Option<f64> {
        self.value.as_number()
    }

    /// Returns the computed value as a bool, if boolean.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        self.value.as_bool()
    }
}

/// One resolved rule in an evaluation trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEntry {
    /// The resolved rule name.
    pub rule: String,
    /// The value it resolved to.
    pub value: Value,
    /// True if the value came from a situation override rather than the
    /// rule's own formula.
    pub overridden: bool,
}

/// Validates every override against the graph and returns the parsed
/// form of each expression override, keyed by rule name.
///
/// Malformed expressions fail here, before any evaluation work; their
/// result domain is checked at resolution.
fn validate_situation(
    graph: &RuleGraph,
    situation: &Situation,
) -> RulesResult<BTreeMap<String, Expr>> {
    let mut parsed = BTreeMap::new();
    for (name, value) in situation.iter() {
        let Some(rule) = graph.get(name) else {
            return Err(EvaluationError::UnknownOverride {
                name: name.to_string(),
            }
            .into());
        };

        match value {
            Value::Number(_) | Value::Bool(_) => {
                // Literal overrides must match the rule's declared domain.
                if value.domain() != Some(rule.domain) {
                    return Err(EvaluationError::TypeMismatch {
                        name: name.to_string(),
                        expected: rule.domain,
                        actual: value.type_name().to_string(),
                    }
                    .into());
                }
            }
            Value::Expression(text) => {
                let expr =
                    Expr::parse(text).map_err(|source| EvaluationError::InvalidOverride {
                        name: name.to_string(),
                        source,
                    })?;
                parsed.insert(name.to_string(), expr);
            }
        }
    }
    Ok(parsed)
}

struct EvalContext<'a> {
    graph: &'a RuleGraph,
    situation: &'a Situation,
    parsed_overrides: &'a BTreeMap<String, Expr>,
    memo: HashMap<String, Value>,
    stack: Vec<String>,
    trace: Vec<TraceEntry>,
}

impl EvalContext<'_> {
    fn resolve(&mut self, name: &str) -> Result<Value, EvaluationError> {
        if let Some(value) = self.memo.get(name) {
            return Ok(value.clone());
        }

        let Some(rule) = self.graph.get(name) else {
            // Graph construction validates formula references; this is
            // reachable only through override expressions.
            return Err(EvaluationError::UnknownRule {
                name: name.to_string(),
            });
        };

        if self.stack.iter().any(|n| n == name) {
            let mut chain = self.stack.join(" -> ");
            chain.push_str(" -> ");
            chain.push_str(name);
            return Err(EvaluationError::CyclicDependency {
                name: name.to_string(),
                chain,
            });
        }
        self.stack.push(name.to_string());

        let (value, overridden) = match self.situation.get(name) {
            Some(Value::Number(v)) => (Value::Number(*v), true),
            Some(Value::Bool(v)) => (Value::Bool(*v), true),
            Some(Value::Expression(text)) => {
                // Situations enter the engine through `set_situation` or
                // `apply_situation`, which stash the parsed expression.
                let value = match self.parsed_overrides.get(name) {
                    Some(expr) => self.eval(expr, name)?,
                    None => {
                        let expr = Expr::parse(text).map_err(|source| {
                            EvaluationError::InvalidOverride {
                                name: name.to_string(),
                                source,
                            }
                        })?;
                        self.eval(&expr, name)?
                    }
                };
                (value, true)
            }
            None => (self.eval(&rule.formula, name)?, false),
        };

        let actual = value.domain();
        if actual != Some(rule.domain) {
            return Err(EvaluationError::DomainMismatch {
                name: name.to_string(),
                expected: rule.domain,
                actual: value.type_name().to_string(),
            });
        }

        let _ = self.stack.pop();
        self.memo.insert(name.to_string(), value.clone());
        self.trace.push(TraceEntry {
            rule: name.to_string(),
            value: value.clone(),
            overridden,
        });
        Ok(value)
    }

    fn eval(&mut self, expr: &Expr, rule: &str) -> Result<Value, EvaluationError> {
        match expr {
            Expr::Number { value } => Ok(Value::Number(*value)),
            Expr::Bool { value } => Ok(Value::Bool(*value)),
            Expr::Reference { name } => self.resolve(name),
            Expr::Unary { op, operand } => {
                let v = self.eval(operand, rule)?;
                match op {
                    UnaryOp::Neg => Ok(Value::Number(-self.expect_number(v, rule)?)),
                    UnaryOp::Not => Ok(Value::Bool(!self.expect_bool(v, rule)?)),
                }
            }
            Expr::Binary { op, lhs, rhs } => self.eval_binary(*op, lhs, rhs, rule),
        }
    }

    fn eval_binary(
        &mut self,
        op: BinaryOp,
        lhs: &Expr,
        rhs: &Expr,
        rule: &str,
    ) -> Result<Value, EvaluationError> {
        // Logical operators short-circuit.
        if matches!(op, BinaryOp::And | BinaryOp::Or) {
            let l = self.eval(lhs, rule)?;
            let l = self.expect_bool(l, rule)?;
            return match (op, l) {
                (BinaryOp::And, false) => Ok(Value::Bool(false)),
                (BinaryOp::Or, true) => Ok(Value::Bool(true)),
                _ => {
                    let r = self.eval(rhs, rule)?;
                    Ok(Value::Bool(self.expect_bool(r, rule)?))
                }
            };
        }

        let l = self.eval(lhs, rule)?;
        let r = self.eval(rhs, rule)?;

        match op {
            BinaryOp::Add => Ok(Value::Number(
                self.expect_number(l, rule)? + self.expect_number(r, rule)?,
            )),
            BinaryOp::Sub => Ok(Value::Number(
                self.expect_number(l, rule)? - self.expect_number(r, rule)?,
            )),
            BinaryOp::Mul => Ok(Value::Number(
                self.expect_number(l, rule)? * self.expect_number(r, rule)?,
            )),
            BinaryOp::Div => {
                let divisor = self.expect_number(r, rule)?;
                if divisor == 0.0 {
                    return Err(EvaluationError::DivisionByZero {
                        name: rule.to_string(),
                    });
                }
                Ok(Value::Number(self.expect_number(l, rule)? / divisor))
            }
            BinaryOp::Eq | BinaryOp::Ne => {
                let equal = match (&l, &r) {
                    (Value::Number(a), Value::Number(b)) => a == b,
                    (Value::Bool(a), Value::Bool(b)) => a == b,
                    _ => {
                        return Err(EvaluationError::DomainMismatch {
                            name: rule.to_string(),
                            expected: Domain::Number,
                            actual: format!("{} vs {}", l.type_name(), r.type_name()),
                        })
                    }
                };
                Ok(Value::Bool(if op == BinaryOp::Eq { equal } else { !equal }))
            }
            BinaryOp::Lt => Ok(Value::Bool(
                self.expect_number(l, rule)? < self.expect_number(r, rule)?,
            )),
            BinaryOp::Le => Ok(Value::Bool(
                self.expect_number(l, rule)? <= self.expect_number(r, rule)?,
            )),
            BinaryOp::Gt => Ok(Value::Bool(
                self.expect_number(l, rule)? > self.expect_number(r, rule)?,
            )),
            BinaryOp::Ge => Ok(Value::Bool(
                self.expect_number(l, rule)? >= self.expect_number(r, rule)?,
            )),
            BinaryOp::And | BinaryOp::Or => unreachable!("handled above"),
        }
    }

    fn expect_number(&self, value: Value, rule: &str) -> Result<f64, EvaluationError> {
        value.as_number().ok_or_else(|| EvaluationError::DomainMismatch {
            name: rule.to_string(),
            expected: Domain::Number,
            actual: value.type_name().to_string(),
        })
    }

    fn expect_bool(&self, value: Value, rule: &str) -> Result<bool, EvaluationError> {
        value.as_bool().ok_or_else(|| EvaluationError::DomainMismatch {
            name: rule.to_string(),
            expected: Domain::Bool,
            actual: value.type_name().to_string(),
        })
    }
}
