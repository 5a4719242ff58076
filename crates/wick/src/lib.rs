//! # Wick
//!
//! Deterministic condition language for narrative state queries.
//!
//! Wick is the small boolean/arithmetic expression language the Lamplight
//! engine evaluates against world state: guard conditions on effects,
//! modifier activation predicates, event triggers, arc stage thresholds,
//! and consent gates are all wick expressions.
//!
//! The language is deliberately not a scripting runtime:
//!
//! - **No assignment, no user functions, no iteration.** The builtin set is
//!   closed at parse time.
//! - **Bounded cost.** Source length and nesting depth are capped when
//!   parsing, so adversarial content cannot make evaluation expensive.
//! - **Total evaluation.** Unknown paths are `Null`, type mismatches are
//!   `false` plus a warning, division by zero makes the containing
//!   comparison false. Evaluation never raises.
//! - **Deterministic randomness.** `rand(p)` draws from a caller-owned
//!   [`DrawSource`], never a global generator, so replays with the same
//!   stream reproduce every draw.
//!
//! ## Quick Start
//!
//! ```
//! use wick::{parse, Evaluator, Host, NoRandom, Value};
//!
//! struct WorldPeek;
//!
//! impl Host for WorldPeek {
//!     fn lookup(&self, path: &[String]) -> Value {
//!         match path.join(".").as_str() {
//!             "meters.alex.trust" => Value::Num(45.0),
//!             "flags.curfew" => Value::Bool(false),
//!             _ => Value::Null,
//!         }
//!     }
//! }
//!
//! let expr = parse("meters.alex.trust >= 40 and not flags.curfew").unwrap();
//! let mut draws = NoRandom;
//! assert!(Evaluator::new(&WorldPeek, &mut draws).eval_bool(&expr));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod ast;
pub mod eval;
pub mod parser;
pub mod token;
pub mod value;

// Re-exports for convenience
pub use ast::{BinaryOp, Builtin, Expr, PathSeg, UnaryOp};
pub use eval::{DrawSource, Evaluator, Host, NoRandom};
pub use parser::{parse, parse_with_limits, ParseError, ParseLimits};
pub use value::Value;
