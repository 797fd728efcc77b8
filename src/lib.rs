//! # carbon-rules - Per-Environment Rule Engines for Carbon Accounting
//!
//! Multi-tenant carbon-accounting deployments (BC, CUT, TILT, CLICKSON)
//! each ship a rule bundle: a declarative graph of named computations over
//! emission inputs. This crate keeps one engine instance per environment
//! per process and evaluates rules under hypothetical "situations" without
//! disturbing the cached baseline.
//!
//! ## Core Concepts
//!
//! - **Environment**: a tenant/brand identifier partitioning cached engines
//! - **RuleGraph**: an immutable, validated set of named rule formulas
//! - **Engine**: a shared rule graph plus a mutable baseline situation
//! - **Situation**: a mapping of rule names to override values
//!
//! ## Usage
//!
//! ```rust
//! use carbon_rules::{
//!     evaluate_with_situation, Engine, EngineCache, Environment, RuleGraph, Situation, Value,
//! };
//!
//! let cache = EngineCache::new();
//!
//! // Constructed once per environment; later calls return the same instance.
//! let engine = cache
//!     .get_or_create(Environment::Bc, || {
//!         let graph = RuleGraph::from_json(r#"{ "input": 0, "total": "input + 10" }"#)?;
//!         Ok(Engine::new(graph))
//!     })
//!     .unwrap();
//!
//! let situation: Situation = [("input", 5.0)].into_iter().collect();
//! let result = evaluate_with_situation(&engine, "total", &situation).unwrap();
//! assert_eq!(result.value, Value::Number(15.0));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cache;
pub mod engine;
pub mod environment;
pub mod error;
pub mod expr;
pub mod rule;
pub mod situation;
pub mod value;

// Re-export primary types at crate root for convenience
pub use cache::EngineCache;
pub use engine::{evaluate_with_situation, Engine, Evaluation, TraceEntry};
pub use environment::Environment;
pub use error::{ConstructionError, EvaluationError, ParseError, RulesError, RulesResult};
pub use expr::{BinaryOp, Expr, UnaryOp};
pub use rule::{Rule, RuleGraph};
pub use situation::Situation;
pub use value::{Domain, Value};
