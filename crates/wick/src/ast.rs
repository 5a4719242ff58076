//! Abstract syntax tree for the condition language.
//!
//! The grammar is intentionally non-Turing-complete: no assignment, no
//! user-defined functions, no iteration. The builtin set is closed at parse
//! time, so content can never call anything the engine did not provide.

use serde::{Deserialize, Serialize};

use crate::value::Value;

/// A parsed expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    /// Literal value (`42`, `"text"`, `true`).
    Literal(Value),
    /// List literal (`[1, 2, 3]`), used with `in`.
    List(Vec<Expr>),
    /// Dotted/bracketed state path (`meters.alex.trust`, `flags["alex.met"]`).
    Path(Vec<PathSeg>),
    /// Unary operation.
    Unary {
        /// The operator.
        op: UnaryOp,
        /// The operand.
        operand: Box<Expr>,
    },
    /// Binary operation.
    Binary {
        /// The operator.
        op: BinaryOp,
        /// Left-hand side.
        lhs: Box<Expr>,
        /// Right-hand side.
        rhs: Box<Expr>,
    },
    /// Builtin function call.
    Call {
        /// Which builtin.
        func: Builtin,
        /// Argument expressions.
        args: Vec<Expr>,
    },
}

/// One segment of a state path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PathSeg {
    /// Static segment: `meters` in `meters.alex.trust`.
    Key(String),
    /// Computed segment: the bracket expression in `flags[key_expr]`.
    Index(Box<Expr>),
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    /// Logical negation (`not`).
    Not,
    /// Numeric negation (`-`).
    Neg,
}

/// Binary operators, in increasing precedence order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    /// `or` (short-circuits).
    Or,
    /// `and` (short-circuits).
    And,
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// List membership.
    In,
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
}

/// The closed set of builtin functions.
///
/// Unknown function names are rejected at parse time, never resolved
/// dynamically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Builtin {
    /// `has(item)`: player inventory membership.
    Has,
    /// `npc_present(id)`: is the character at the current location.
    NpcPresent,
    /// `rand(p)`: Bernoulli draw from the turn's RNG stream.
    Rand,
    /// `min(a, b)`
    Min,
    /// `max(a, b)`
    Max,
    /// `abs(x)`
    Abs,
    /// `clamp(x, lo, hi)`
    Clamp,
    /// `get(path, default)`: path lookup with a fallback for `Null`.
    Get,
}

impl Builtin {
    /// Resolves a function name, or `None` if it is not a builtin.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "has" => Some(Builtin::Has),
            "npc_present" => Some(Builtin::NpcPresent),
            "rand" => Some(Builtin::Rand),
            "min" => Some(Builtin::Min),
            "max" => Some(Builtin::Max),
            "abs" => Some(Builtin::Abs),
            "clamp" => Some(Builtin::Clamp),
            "get" => Some(Builtin::Get),
            _ => None,
        }
    }

    /// Expected argument count.
    #[must_use]
    pub fn arity(self) -> usize {
        match self {
            Builtin::Has | Builtin::NpcPresent | Builtin::Rand | Builtin::Abs => 1,
            Builtin::Min | Builtin::Max | Builtin::Get => 2,
            Builtin::Clamp => 3,
        }
    }

    /// The name as written in source.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Builtin::Has => "has",
            Builtin::NpcPresent => "npc_present",
            Builtin::Rand => "rand",
            Builtin::Min => "min",
            Builtin::Max => "max",
            Builtin::Abs => "abs",
            Builtin::Clamp => "clamp",
            Builtin::Get => "get",
        }
    }
}
