//! Recursive-descent parser for the condition language.
//!
//! Parse time is where adversarial content gets rejected: expressions over
//! the configured source length or nesting depth fail here, so evaluation
//! cost stays bounded no matter what content authors (or an upstream
//! generator) produce.
//!
//! # Grammar
//!
//! ```text
//! expr    := or
//! or      := and ("or" and)*
//! and     := unary ("and" unary)*
//! unary   := "not" unary | cmp
//! cmp     := sum (("=="|"!="|"<"|"<="|">"|">="|"in") sum)?
//! sum     := term (("+"|"-") term)*
//! term    := factor (("*"|"/") factor)*
//! factor  := "-" factor | postfix
//! postfix := primary ("." ident | "[" expr "]")*
//! primary := number | string | "true" | "false" | list | ident | call | "(" expr ")"
//! ```
//!
//! Comparison is non-associative: `a < b < c` is a parse error, not a
//! silent chained comparison.

use thiserror::Error;

use crate::ast::{BinaryOp, Builtin, Expr, PathSeg, UnaryOp};
use crate::token::{lex, Spanned, Token};
use crate::value::Value;

/// Caps applied while parsing.
///
/// Both caps exist to keep evaluation cost bounded under adversarial
/// content; see the module docs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseLimits {
    /// Maximum nesting depth of the produced AST.
    pub max_depth: usize,
    /// Maximum source length in bytes.
    pub max_len: usize,
}

impl Default for ParseLimits {
    fn default() -> Self {
        Self {
            max_depth: 32,
            max_len: 2048,
        }
    }
}

/// Errors produced by [`lex`](crate::token::lex) and [`parse`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    /// Source exceeds the length cap.
    #[error("expression exceeds {limit} bytes")]
    TooLong {
        /// The configured cap.
        limit: usize,
    },
    /// AST exceeds the nesting cap.
    #[error("expression nesting exceeds depth {limit}")]
    TooDeep {
        /// The configured cap.
        limit: usize,
    },
    /// Character outside the language.
    #[error("unexpected character {ch:?} at offset {offset}")]
    UnexpectedChar {
        /// The offending character.
        ch: char,
        /// Byte offset in the source.
        offset: usize,
    },
    /// String literal without a closing quote.
    #[error("unterminated string literal at offset {offset}")]
    UnterminatedString {
        /// Byte offset of the opening quote.
        offset: usize,
    },
    /// A token that does not fit the grammar at this position.
    #[error("unexpected token at offset {offset}, expected {expected}")]
    Unexpected {
        /// Byte offset of the token.
        offset: usize,
        /// What the parser was looking for.
        expected: &'static str,
    },
    /// Source ended mid-expression.
    #[error("unexpected end of expression")]
    UnexpectedEnd,
    /// Function name outside the builtin set.
    #[error("unknown function `{name}`")]
    UnknownFunction {
        /// The name as written.
        name: String,
    },
    /// Builtin called with the wrong number of arguments.
    #[error("`{name}` expects {expected} argument(s), got {got}")]
    Arity {
        /// The builtin's name.
        name: &'static str,
        /// Expected argument count.
        expected: usize,
        /// Actual argument count.
        got: usize,
    },
}

/// Parses `src` with default limits.
///
/// # Errors
///
/// Returns [`ParseError`] on lexical errors, grammar violations, unknown
/// functions, or cap breaches.
///
/// # Example
///
/// ```
/// use wick::parse;
///
/// let expr = parse("meters.alex.trust >= 40 and not flags.curfew").unwrap();
/// let _ = expr;
/// ```
pub fn parse(src: &str) -> Result<Expr, ParseError> {
    parse_with_limits(src, ParseLimits::default())
}

/// Parses `src` with explicit limits.
///
/// # Errors
///
/// Returns [`ParseError`] on lexical errors, grammar violations, unknown
/// functions, or cap breaches.
pub fn parse_with_limits(src: &str, limits: ParseLimits) -> Result<Expr, ParseError> {
    if src.len() > limits.max_len {
        return Err(ParseError::TooLong {
            limit: limits.max_len,
        });
    }
    let tokens = lex(src)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
        limits,
    };
    let expr = parser.expr()?;
    if let Some(extra) = parser.peek() {
        return Err(ParseError::Unexpected {
            offset: extra.offset,
            expected: "end of expression",
        });
    }
    Ok(expr)
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
    depth: usize,
    limits: ParseLimits,
}

impl Parser {
    fn peek(&self) -> Option<&Spanned> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Spanned> {
        let t = self.tokens.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek().map(|s| &s.token) == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &Token, expected: &'static str) -> Result<(), ParseError> {
        if self.eat(token) {
            Ok(())
        } else {
            Err(self.unexpected(expected))
        }
    }

    fn unexpected(&self, expected: &'static str) -> ParseError {
        match self.peek() {
            Some(s) => ParseError::Unexpected {
                offset: s.offset,
                expected,
            },
            None => ParseError::UnexpectedEnd,
        }
    }

    fn with_depth<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<T, ParseError>,
    ) -> Result<T, ParseError> {
        self.depth += 1;
        if self.depth > self.limits.max_depth {
            self.depth -= 1;
            return Err(ParseError::TooDeep {
                limit: self.limits.max_depth,
            });
        }
        let result = f(self);
        self.depth -= 1;
        result
    }

    fn expr(&mut self) -> Result<Expr, ParseError> {
        self.or()
    }

    fn or(&mut self) -> Result<Expr, ParseError> {
        self.with_depth(|this| {
            let mut lhs = this.and()?;
            while this.eat(&Token::Or) {
                let rhs = this.and()?;
                lhs = Expr::Binary {
                    op: BinaryOp::Or,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                };
            }
            Ok(lhs)
        })
    }

    fn and(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.not()?;
        while self.eat(&Token::And) {
            let rhs = self.not()?;
            lhs = Expr::Binary {
                op: BinaryOp::And,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn not(&mut self) -> Result<Expr, ParseError> {
        if self.eat(&Token::Not) {
            let operand = self.with_depth(Parser::not)?;
            return Ok(Expr::Unary {
                op: UnaryOp::Not,
                operand: Box::new(operand),
            });
        }
        self.cmp()
    }

    fn cmp(&mut self) -> Result<Expr, ParseError> {
        let lhs = self.sum()?;
        let op = match self.peek().map(|s| &s.token) {
            Some(Token::EqEq) => Some(BinaryOp::Eq),
            Some(Token::BangEq) => Some(BinaryOp::Ne),
            Some(Token::Lt) => Some(BinaryOp::Lt),
            Some(Token::Le) => Some(BinaryOp::Le),
            Some(Token::Gt) => Some(BinaryOp::Gt),
            Some(Token::Ge) => Some(BinaryOp::Ge),
            Some(Token::In) => Some(BinaryOp::In),
            _ => None,
        };
        let Some(op) = op else { return Ok(lhs) };
        self.pos += 1;
        let rhs = self.sum()?;
        Ok(Expr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        })
    }

    fn sum(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.term()?;
        loop {
            let op = match self.peek().map(|s| &s.token) {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.term()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn term(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.factor()?;
        loop {
            let op = match self.peek().map(|s| &s.token) {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.factor()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn factor(&mut self) -> Result<Expr, ParseError> {
        if self.eat(&Token::Minus) {
            let operand = self.with_depth(Parser::factor)?;
            return Ok(Expr::Unary {
                op: UnaryOp::Neg,
                operand: Box::new(operand),
            });
        }
        self.postfix()
    }

    fn postfix(&mut self) -> Result<Expr, ParseError> {
        let base = self.primary()?;

        // Only paths take `.` / `[]` accessors. Anything else followed by an
        // accessor is a grammar error caught by the outer loop's expectations.
        let mut segments = match base {
            Expr::Path(segs) => segs,
            other => return Ok(other),
        };

        loop {
            if self.eat(&Token::Dot) {
                match self.advance() {
                    Some(Spanned {
                        token: Token::Ident(name),
                        ..
                    }) => segments.push(PathSeg::Key(name)),
                    Some(s) => {
                        return Err(ParseError::Unexpected {
                            offset: s.offset,
                            expected: "identifier after `.`",
                        })
                    }
                    None => return Err(ParseError::UnexpectedEnd),
                }
            } else if self.eat(&Token::LBracket) {
                let index = self.with_depth(Parser::expr)?;
                self.expect(&Token::RBracket, "`]`")?;
                segments.push(PathSeg::Index(Box::new(index)));
            } else {
                break;
            }
        }
        Ok(Expr::Path(segments))
    }

    fn primary(&mut self) -> Result<Expr, ParseError> {
        let Some(spanned) = self.advance() else {
            return Err(ParseError::UnexpectedEnd);
        };
        match spanned.token {
            Token::Num(n) => Ok(Expr::Literal(Value::Num(n))),
            Token::Str(s) => Ok(Expr::Literal(Value::Text(s))),
            Token::True => Ok(Expr::Literal(Value::Bool(true))),
            Token::False => Ok(Expr::Literal(Value::Bool(false))),
            Token::LParen => {
                let inner = self.with_depth(Parser::expr)?;
                self.expect(&Token::RParen, "`)`")?;
                Ok(inner)
            }
            Token::LBracket => {
                let items = self.with_depth(|this| {
                    let mut items = Vec::new();
                    if !this.eat(&Token::RBracket) {
                        loop {
                            items.push(this.expr()?);
                            if this.eat(&Token::RBracket) {
                                break;
                            }
                            this.expect(&Token::Comma, "`,` or `]`")?;
                        }
                    }
                    Ok(items)
                })?;
                Ok(Expr::List(items))
            }
            Token::Ident(name) => {
                if self.peek().map(|s| &s.token) == Some(&Token::LParen) {
                    self.pos += 1;
                    return self.call(&name);
                }
                Ok(Expr::Path(vec![PathSeg::Key(name)]))
            }
            _ => Err(ParseError::Unexpected {
                offset: spanned.offset,
                expected: "a value, path, or `(`",
            }),
        }
    }

    fn call(&mut self, name: &str) -> Result<Expr, ParseError> {
        let Some(func) = Builtin::from_name(name) else {
            return Err(ParseError::UnknownFunction {
                name: name.to_string(),
            });
        };
        let args = self.with_depth(|this| {
            let mut args = Vec::new();
            if !this.eat(&Token::RParen) {
                loop {
                    args.push(this.expr()?);
                    if this.eat(&Token::RParen) {
                        break;
                    }
                    this.expect(&Token::Comma, "`,` or `)`")?;
                }
            }
            Ok(args)
        })?;
        if args.len() != func.arity() {
            return Err(ParseError::Arity {
                name: func.name(),
                expected: func.arity(),
                got: args.len(),
            });
        }
        Ok(Expr::Call { func, args })
    }
}
