//! Lexer for the condition language.
//!
//! Splits a source string into a flat token stream. Keywords (`and`, `or`,
//! `not`, `in`, `true`, `false`) are recognized here so the parser never has
//! to disambiguate identifiers.

use crate::parser::ParseError;

/// A lexical token.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// Identifier (path segment or function name).
    Ident(String),
    /// Numeric literal.
    Num(f64),
    /// String literal (quotes stripped).
    Str(String),
    /// `and`
    And,
    /// `or`
    Or,
    /// `not`
    Not,
    /// `in`
    In,
    /// `true`
    True,
    /// `false`
    False,
    /// `(`
    LParen,
    /// `)`
    RParen,
    /// `[`
    LBracket,
    /// `]`
    RBracket,
    /// `,`
    Comma,
    /// `.`
    Dot,
    /// `+`
    Plus,
    /// `-`
    Minus,
    /// `*`
    Star,
    /// `/`
    Slash,
    /// `==`
    EqEq,
    /// `!=`
    BangEq,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
}

/// A token together with its byte offset in the source.
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    /// The token.
    pub token: Token,
    /// Byte offset of the token's first character.
    pub offset: usize,
}

/// Lexes `src` into a token stream.
///
/// # Errors
///
/// Returns [`ParseError`] on characters outside the language or an
/// unterminated string literal.
pub fn lex(src: &str) -> Result<Vec<Spanned>, ParseError> {
    let chars: Vec<(usize, char)> = src.char_indices().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    let simple = |token: Token, offset: usize| Spanned { token, offset };

    while i < chars.len() {
        let (start, c) = chars[i];
        match c {
            ' ' | '\t' | '\n' | '\r' => i += 1,
            '(' => {
                tokens.push(simple(Token::LParen, start));
                i += 1;
            }
            ')' => {
                tokens.push(simple(Token::RParen, start));
                i += 1;
            }
            '[' => {
                tokens.push(simple(Token::LBracket, start));
                i += 1;
            }
            ']' => {
                tokens.push(simple(Token::RBracket, start));
                i += 1;
            }
            ',' => {
                tokens.push(simple(Token::Comma, start));
                i += 1;
            }
            '.' => {
                tokens.push(simple(Token::Dot, start));
                i += 1;
            }
            '+' => {
                tokens.push(simple(Token::Plus, start));
                i += 1;
            }
            '-' => {
                tokens.push(simple(Token::Minus, start));
                i += 1;
            }
            '*' => {
                tokens.push(simple(Token::Star, start));
                i += 1;
            }
            '/' => {
                tokens.push(simple(Token::Slash, start));
                i += 1;
            }
            '=' => {
                if chars.get(i + 1).map(|&(_, c)| c) == Some('=') {
                    tokens.push(simple(Token::EqEq, start));
                    i += 2;
                } else {
                    return Err(ParseError::UnexpectedChar { ch: '=', offset: start });
                }
            }
            '!' => {
                if chars.get(i + 1).map(|&(_, c)| c) == Some('=') {
                    tokens.push(simple(Token::BangEq, start));
                    i += 2;
                } else {
                    return Err(ParseError::UnexpectedChar { ch: '!', offset: start });
                }
            }
            '<' => {
                if chars.get(i + 1).map(|&(_, c)| c) == Some('=') {
                    tokens.push(simple(Token::Le, start));
                    i += 2;
                } else {
                    tokens.push(simple(Token::Lt, start));
                    i += 1;
                }
            }
            '>' => {
                if chars.get(i + 1).map(|&(_, c)| c) == Some('=') {
                    tokens.push(simple(Token::Ge, start));
                    i += 2;
                } else {
                    tokens.push(simple(Token::Gt, start));
                    i += 1;
                }
            }
            '"' | '\'' => {
                let quote = c;
                let mut text = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => return Err(ParseError::UnterminatedString { offset: start }),
                        Some(&(_, ch)) if ch == quote => {
                            i += 1;
                            break;
                        }
                        Some(&(_, ch)) => {
                            text.push(ch);
                            i += 1;
                        }
                    }
                }
                tokens.push(simple(Token::Str(text), start));
            }
            '0'..='9' => {
                let mut end = i;
                while end < chars.len() && chars[end].1.is_ascii_digit() {
                    end += 1;
                }
                if end < chars.len()
                    && chars[end].1 == '.'
                    && chars.get(end + 1).is_some_and(|&(_, c)| c.is_ascii_digit())
                {
                    end += 1;
                    while end < chars.len() && chars[end].1.is_ascii_digit() {
                        end += 1;
                    }
                }
                let text: String = chars[i..end].iter().map(|&(_, c)| c).collect();
                let n: f64 = text
                    .parse()
                    .map_err(|_| ParseError::UnexpectedChar { ch: c, offset: start })?;
                tokens.push(simple(Token::Num(n), start));
                i = end;
            }
            'a'..='z' | 'A'..='Z' | '_' => {
                let mut end = i;
                while end < chars.len()
                    && (chars[end].1.is_ascii_alphanumeric() || chars[end].1 == '_')
                {
                    end += 1;
                }
                let word: String = chars[i..end].iter().map(|&(_, c)| c).collect();
                let token = match word.as_str() {
                    "and" => Token::And,
                    "or" => Token::Or,
                    "not" => Token::Not,
                    "in" => Token::In,
                    "true" => Token::True,
                    "false" => Token::False,
                    _ => Token::Ident(word),
                };
                tokens.push(simple(token, start));
                i = end;
            }
            _ => {
                return Err(ParseError::UnexpectedChar { ch: c, offset: start });
            }
        }
    }

    Ok(tokens)
}
