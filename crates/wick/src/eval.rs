//! Total evaluation of parsed expressions against a host.
//!
//! The evaluator never raises and never mutates the host. Conditions that
//! would be errors elsewhere degrade per the language contract:
//!
//! - unknown paths resolve to [`Value::Null`]
//! - operand type mismatches resolve to `false` and emit a `tracing` warning
//! - division by zero yields `Null`, so any containing comparison is false
//!
//! # Host Seam
//!
//! State access goes through two traits. [`Host`] is the read-only window
//! onto world state; [`DrawSource`] supplies the Bernoulli draws behind
//! `rand(p)`. Keeping the draw source separate keeps the host immutable
//! while still letting `rand` consume a deterministic stream owned by the
//! caller; the evaluator itself holds no randomness.
//!
//! # Example
//!
//! ```
//! use wick::{parse, Evaluator, Host, NoRandom, Value};
//!
//! struct Fixed;
//!
//! impl Host for Fixed {
//!     fn lookup(&self, path: &[String]) -> Value {
//!         match path.join(".").as_str() {
//!             "meters.alex.trust" => Value::Num(45.0),
//!             _ => Value::Null,
//!         }
//!     }
//! }
//!
//! let expr = parse("meters.alex.trust >= 40").unwrap();
//! let mut rng = NoRandom;
//! let result = Evaluator::new(&Fixed, &mut rng).eval(&expr);
//! assert_eq!(result, Value::Bool(true));
//! ```

use tracing::warn;

use crate::ast::{BinaryOp, Builtin, Expr, PathSeg, UnaryOp};
use crate::value::Value;

/// Read-only window onto the state an expression can see.
///
/// Implementations must not be mutated by evaluation; the evaluator only
/// ever takes `&self`.
pub trait Host {
    /// Resolves a fully-keyed path to a value. Unknown paths return
    /// [`Value::Null`].
    fn lookup(&self, path: &[String]) -> Value;

    /// `has(item)`: does the player hold at least one of `item`.
    fn has_item(&self, item: &str) -> bool {
        let _ = item;
        false
    }

    /// `npc_present(id)`: is the character at the current location.
    fn npc_present(&self, npc: &str) -> bool {
        let _ = npc;
        false
    }
}

/// Source of Bernoulli draws for `rand(p)`.
///
/// The engine passes its per-turn deterministic stream; draws consume the
/// stream in evaluation order.
pub trait DrawSource {
    /// Returns true with probability `p` (clamped to `[0, 1]`).
    fn bernoulli(&mut self, p: f64) -> bool;
}

/// A [`DrawSource`] for contexts without randomness.
///
/// Every `rand(p)` call returns `false` and warns; use it in tests and
/// tools that evaluate conditions outside a turn.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRandom;

impl DrawSource for NoRandom {
    fn bernoulli(&mut self, p: f64) -> bool {
        warn!(p, "rand() called without a draw source; returning false");
        false
    }
}

/// Evaluates expressions against a [`Host`] and a [`DrawSource`].
pub struct Evaluator<'a, H: Host + ?Sized, D: DrawSource + ?Sized> {
    host: &'a H,
    rng: &'a mut D,
}

impl<'a, H: Host + ?Sized, D: DrawSource + ?Sized> Evaluator<'a, H, D> {
    /// Creates an evaluator borrowing the host and draw source.
    pub fn new(host: &'a H, rng: &'a mut D) -> Self {
        Self { host, rng }
    }

    /// Evaluates `expr` to a value. Total: never panics, never errors.
    pub fn eval(&mut self, expr: &Expr) -> Value {
        match expr {
            Expr::Literal(v) => v.clone(),
            Expr::List(items) => Value::List(items.iter().map(|e| self.eval(e)).collect()),
            Expr::Path(segs) => self.eval_path(segs),
            Expr::Unary { op, operand } => self.eval_unary(*op, operand),
            Expr::Binary { op, lhs, rhs } => self.eval_binary(*op, lhs, rhs),
            Expr::Call { func, args } => self.eval_call(*func, args),
        }
    }

    /// Evaluates `expr` and applies truthiness. Convenience for guards.
    pub fn eval_bool(&mut self, expr: &Expr) -> bool {
        self.eval(expr).truthy()
    }

    fn eval_path(&mut self, segs: &[PathSeg]) -> Value {
        let mut keys = Vec::with_capacity(segs.len());
        for seg in segs {
            match seg {
                PathSeg::Key(k) => keys.push(k.clone()),
                PathSeg::Index(inner) => match self.eval(inner) {
                    Value::Text(s) => keys.push(s),
                    Value::Num(n) => {
                        // Canonical integer key; fractional indices are a
                        // content bug, not a crash.
                        keys.push(format!("{}", n.trunc() as i64));
                    }
                    other => {
                        warn!(index = %other, "non-keyable bracket index; path resolves to null");
                        return Value::Null;
                    }
                },
            }
        }
        self.host.lookup(&keys)
    }

    fn eval_unary(&mut self, op: UnaryOp, operand: &Expr) -> Value {
        let v = self.eval(operand);
        match op {
            UnaryOp::Not => Value::Bool(!v.truthy()),
            UnaryOp::Neg => match v.as_num() {
                Some(n) => Value::Num(-n),
                None => {
                    warn!(operand = %v, "negating a non-number");
                    Value::Bool(false)
                }
            },
        }
    }

    fn eval_binary(&mut self, op: BinaryOp, lhs: &Expr, rhs: &Expr) -> Value {
        // Short-circuit forms first; they must not evaluate the right side.
        match op {
            BinaryOp::And => {
                if !self.eval(lhs).truthy() {
                    return Value::Bool(false);
                }
                return Value::Bool(self.eval(rhs).truthy());
            }
            BinaryOp::Or => {
                if self.eval(lhs).truthy() {
                    return Value::Bool(true);
                }
                return Value::Bool(self.eval(rhs).truthy());
            }
            _ => {}
        }

        let a = self.eval(lhs);
        let b = self.eval(rhs);
        match op {
            BinaryOp::Eq => Value::Bool(a.loose_eq(&b)),
            BinaryOp::Ne => Value::Bool(!a.loose_eq(&b)),
            BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
                Value::Bool(Self::compare(op, &a, &b))
            }
            BinaryOp::In => match &b {
                Value::List(items) => Value::Bool(items.iter().any(|i| i.loose_eq(&a))),
                Value::Null => Value::Bool(false),
                other => {
                    warn!(rhs = %other, "`in` requires a list on the right");
                    Value::Bool(false)
                }
            },
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div => {
                Self::arithmetic(op, &a, &b)
            }
            BinaryOp::And | BinaryOp::Or => unreachable!("handled above"),
        }
    }

    fn compare(op: BinaryOp, a: &Value, b: &Value) -> bool {
        let ordering = match (a, b) {
            (Value::Num(x), Value::Num(y)) => x.partial_cmp(y),
            (Value::Text(x), Value::Text(y)) => Some(x.cmp(y)),
            (Value::Null, _) | (_, Value::Null) => None,
            _ => {
                warn!(lhs = %a, rhs = %b, "ordering comparison between mismatched types");
                None
            }
        };
        let Some(ordering) = ordering else {
            return false;
        };
        match op {
            BinaryOp::Lt => ordering.is_lt(),
            BinaryOp::Le => ordering.is_le(),
            BinaryOp::Gt => ordering.is_gt(),
            BinaryOp::Ge => ordering.is_ge(),
            _ => false,
        }
    }

    fn arithmetic(op: BinaryOp, a: &Value, b: &Value) -> Value {
        let (Some(x), Some(y)) = (a.as_num(), b.as_num()) else {
            warn!(lhs = %a, rhs = %b, "arithmetic on non-numbers");
            return Value::Bool(false);
        };
        match op {
            BinaryOp::Add => Value::Num(x + y),
            BinaryOp::Sub => Value::Num(x - y),
            BinaryOp::Mul => Value::Num(x * y),
            BinaryOp::Div => {
                if y == 0.0 {
                    // Null makes any containing comparison false.
                    Value::Null
                } else {
                    Value::Num(x / y)
                }
            }
            _ => Value::Null,
        }
    }

    fn eval_call(&mut self, func: Builtin, args: &[Expr]) -> Value {
        match func {
            Builtin::Has => match self.eval(&args[0]) {
                Value::Text(item) => Value::Bool(self.host.has_item(&item)),
                other => {
                    warn!(arg = %other, "has() expects an item id string");
                    Value::Bool(false)
                }
            },
            Builtin::NpcPresent => match self.eval(&args[0]) {
                Value::Text(npc) => Value::Bool(self.host.npc_present(&npc)),
                other => {
                    warn!(arg = %other, "npc_present() expects a character id string");
                    Value::Bool(false)
                }
            },
            Builtin::Rand => {
                let p = self.eval(&args[0]).as_num().unwrap_or(0.0);
                Value::Bool(self.rng.bernoulli(p))
            }
            Builtin::Min => self.numeric2(args, f64::min),
            Builtin::Max => self.numeric2(args, f64::max),
            Builtin::Abs => match self.eval(&args[0]).as_num() {
                Some(n) => Value::Num(n.abs()),
                None => Value::Bool(false),
            },
            Builtin::Clamp => {
                let x = self.eval(&args[0]).as_num();
                let lo = self.eval(&args[1]).as_num();
                let hi = self.eval(&args[2]).as_num();
                match (x, lo, hi) {
                    (Some(x), Some(lo), Some(hi)) if lo <= hi => Value::Num(x.clamp(lo, hi)),
                    _ => {
                        warn!("clamp() with non-numeric or inverted bounds");
                        Value::Bool(false)
                    }
                }
            }
            Builtin::Get => {
                let looked_up = self.eval(&args[0]);
                if matches!(looked_up, Value::Null) {
                    self.eval(&args[1])
                } else {
                    looked_up
                }
            }
        }
    }

    fn numeric2(&mut self, args: &[Expr], f: fn(f64, f64) -> f64) -> Value {
        let a = self.eval(&args[0]).as_num();
        let b = self.eval(&args[1]).as_num();
        match (a, b) {
            (Some(a), Some(b)) => Value::Num(f(a, b)),
            _ => Value::Bool(false),
        }
    }
}
