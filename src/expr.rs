//! Formula expressions for rule definitions.
//!
//! Rules declare their computation as a small formula language: numeric
//! and boolean literals, references to other rules, arithmetic,
//! comparison, and logical operators. References use dotted names
//! (`emissions.transport`); whitespace around dots is tolerated and
//! normalized away.
//!
//! Grammar (lowest to highest precedence):
//!
//! ```text
//! expr    := and { "or" and }
//! and     := cmp { "and" cmp }
//! cmp     := add [ ("=" | "!=" | "<" | "<=" | ">" | ">=") add ]
//! add     := mul { ("+" | "-") mul }
//! mul     := unary { ("*" | "/") unary }
//! unary   := "-" unary | "not" unary | primary
//! primary := number | "true" | "false" | reference | "(" expr ")"
//! ```

use serde::{Deserialize, Serialize};

use crate::error::ParseError;

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnaryOp {
    /// Numeric negation.
    Neg,
    /// Boolean negation.
    Not,
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl std::fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Eq => "=",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::And => "and",
            Self::Or => "or",
        };
        write!(f, "{s}")
    }
}

/// A parsed formula.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Expr {
    /// Numeric literal.
    Number {
        /// The literal value.
        value: f64,
    },
    /// Boolean literal.
    Bool {
        /// The literal value.
        value: bool,
    },
    /// Reference to another rule by normalized dotted name.
    Reference {
        /// The referenced rule name.
        name: String,
    },
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
}

impl Expr {
    /// Parses a formula string.
    pub fn parse(input: &str) -> Result<Self, ParseError> {
        let tokens = tokenize(input)?;
        if tokens.is_empty() {
            return Err(ParseError::EmptyFormula);
        }
        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser.expr()?;
        if let Some(tok) = parser.peek() {
            return Err(ParseError::UnexpectedToken {
                found: tok.text(),
                expected: "end of formula".to_string(),
                position: tok.position,
            });
        }
        Ok(expr)
    }

    /// Collects the names of all rules this formula references.
    pub fn collect_references(&self, out: &mut Vec<String>) {
        match self {
            Self::Number { .. } | Self::Bool { .. } => {}
            Self::Reference { name } => out.push(name.clone()),
            Self::Unary { operand, .. } => operand.collect_references(out),
            Self::Binary { lhs, rhs, .. } => {
                lhs.collect_references(out);
                rhs.collect_references(out);
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum TokenKind {
    Number(f64),
    Bool(bool),
    Ident(String),
    And,
    Or,
    Not,
    Plus,
    Minus,
    Star,
    Slash,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    LParen,
    RParen,
}

#[derive(Debug, Clone, PartialEq)]
struct Token {
    kind: TokenKind,
    position: usize,
}

impl Token {
    fn text(&self) -> String {
        match &self.kind {
            TokenKind::Number(v) => v.to_string(),
            TokenKind::Bool(v) => v.to_string(),
            TokenKind::Ident(s) => s.clone(),
            TokenKind::And => "and".to_string(),
            TokenKind::Or => "or".to_string(),
            TokenKind::Not => "not".to_string(),
            TokenKind::Plus => "+".to_string(),
            TokenKind::Minus => "-".to_string(),
            TokenKind::Star => "*".to_string(),
            TokenKind::Slash => "/".to_string(),
            TokenKind::Eq => "=".to_string(),
            TokenKind::Ne => "!=".to_string(),
            TokenKind::Lt => "<".to_string(),
            TokenKind::Le => "<=".to_string(),
            TokenKind::Gt => ">".to_string(),
            TokenKind::Ge => ">=".to_string(),
            TokenKind::LParen => "(".to_string(),
            TokenKind::RParen => ")".to_string(),
        }
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_ident_continue(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn tokenize(input: &str) -> Result<Vec<Token>, ParseError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let position = i;

        if c.is_whitespace() {
            i += 1;
            continue;
        }

        if c.is_ascii_digit() {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                i += 1;
            }
            let literal: String = chars[start..i].iter().collect();
            let value = literal
                .parse::<f64>()
                .map_err(|_| ParseError::InvalidNumber {
                    literal: literal.clone(),
                    position,
                })?;
            tokens.push(Token {
                kind: TokenKind::Number(value),
                position,
            });
            continue;
        }

        if is_ident_start(c) {
            let mut name = String::new();
            loop {
                let start = i;
                while i < chars.len() && is_ident_continue(chars[i]) {
                    i += 1;
                }
                name.push_str(&chars[start..i].iter().collect::<String>());

                // Dotted references may carry whitespace around the dot.
                let mut j = i;
                while j < chars.len() && chars[j].is_whitespace() {
                    j += 1;
                }
                if j < chars.len() && chars[j] == '.' {
                    let mut k = j + 1;
                    while k < chars.len() && chars[k].is_whitespace() {
                        k += 1;
                    }
                    if k < chars.len() && is_ident_start(chars[k]) {
                        name.push('.');
                        i = k;
                        continue;
                    }
                }
                break;
            }

            let kind = match name.as_str() {
                "true" => TokenKind::Bool(true),
                "false" => TokenKind::Bool(false),
                "and" => TokenKind::And,
                "or" => TokenKind::Or,
                "not" => TokenKind::Not,
                _ => TokenKind::Ident(name),
            };
            tokens.push(Token { kind, position });
            continue;
        }

        let kind = match c {
            '+' => TokenKind::Plus,
            '-' => TokenKind::Minus,
            '*' => TokenKind::Star,
            '/' => TokenKind::Slash,
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            '=' => TokenKind::Eq,
            '!' => {
                if chars.get(i + 1) == Some(&'=') {
                    i += 1;
                    TokenKind::Ne
                } else {
                    return Err(ParseError::UnexpectedCharacter {
                        found: '!',
                        position,
                    });
                }
            }
            '<' => {
                if chars.get(i + 1) == Some(&'=') {
                    i += 1;
                    TokenKind::Le
                } else {
                    TokenKind::Lt
                }
            }
            '>' => {
                if chars.get(i + 1) == Some(&'=') {
                    i += 1;
                    TokenKind::Ge
                } else {
                    TokenKind::Gt
                }
            }
            other => {
                return Err(ParseError::UnexpectedCharacter {
                    found: other,
                    position,
                })
            }
        };
        tokens.push(Token { kind, position });
        i += 1;
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.peek().map(|t| &t.kind) == Some(kind) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expr(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.and()?;
        while self.eat(&TokenKind::Or) {
            let rhs = self.and()?;
            lhs = Expr::Binary {
                op: BinaryOp::Or,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn and(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.comparison()?;
        while self.eat(&TokenKind::And) {
            let rhs = self.comparison()?;
            lhs = Expr::Binary {
                op: BinaryOp::And,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn comparison(&mut self) -> Result<Expr, ParseError> {
        let lhs = self.additive()?;
        let op = match self.peek().map(|t| &t.kind) {
            Some(TokenKind::Eq) => BinaryOp::Eq,
            Some(TokenKind::Ne) => BinaryOp::Ne,
            Some(TokenKind::Lt) => BinaryOp::Lt,
            Some(TokenKind::Le) => BinaryOp::Le,
            Some(TokenKind::Gt) => BinaryOp::Gt,
            Some(TokenKind::Ge) => BinaryOp::Ge,
            _ => return Ok(lhs),
        };
        self.pos += 1;
        let rhs = self.additive()?;
        Ok(Expr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        })
    }

    fn additive(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.multiplicative()?;
        loop {
            let op = match self.peek().map(|t| &t.kind) {
                Some(TokenKind::Plus) => BinaryOp::Add,
                Some(TokenKind::Minus) => BinaryOp::Sub,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.multiplicative()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn multiplicative(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.unary()?;
        loop {
            let op = match self.peek().map(|t| &t.kind) {
                Some(TokenKind::Star) => BinaryOp::Mul,
                Some(TokenKind::Slash) => BinaryOp::Div,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.unary()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr, ParseError> {
        if self.eat(&TokenKind::Minus) {
            let operand = self.unary()?;
            return Ok(Expr::Unary {
                op: UnaryOp::Neg,
                operand: Box::new(operand),
            });
        }
        if self.eat(&TokenKind::Not) {
            let operand = self.unary()?;
            return Ok(Expr::Unary {
                op: UnaryOp::Not,
                operand: Box::new(operand),
            });
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Expr, ParseError> {
        let Some(tok) = self.advance() else {
            return Err(ParseError::UnexpectedEnd {
                expected: "a value, reference, or '('".to_string(),
            });
        };

        match tok.kind {
            TokenKind::Number(value) => Ok(Expr::Number { value }),
            TokenKind::Bool(value) => Ok(Expr::Bool { value }),
            TokenKind::Ident(name) => Ok(Expr::Reference { name }),
            TokenKind::LParen => {
                let inner = self.expr()?;
                if self.eat(&TokenKind::RParen) {
                    Ok(inner)
                } else {
                    match self.peek() {
                        Some(t) => Err(ParseError::UnexpectedToken {
                            found: t.text(),
                            expected: "')'".to_string(),
                            position: t.position,
                        }),
                        None => Err(ParseError::UnexpectedEnd {
                            expected: "')'".to_string(),
                        }),
                    }
                }
            }
            _ => Err(ParseError::UnexpectedToken {
                found: tok.text(),
                expected: "a value, reference, or '('".to_string(),
                position: tok.position,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_number_literal() {
        assert_eq!(Expr::parse("42").unwrap(), Expr::Number { value: 42.0 });
        assert_eq!(Expr::parse("3.25").unwrap(), Expr::Number { value: 3.25 });
    }

    #[test]
    fn parses_bool_literals() {
        assert_eq!(Expr::parse("true").unwrap(), Expr::Bool { value: true });
        assert_eq!(Expr::parse("false").unwrap(), Expr::Bool { value: false });
    }

    #[test]
    fn parses_reference() {
        assert_eq!(
            Expr::parse("input").unwrap(),
            Expr::Reference {
                name: "input".to_string()
            }
        );
    }

    #[test]
    fn normalizes_spaced_dotted_reference() {
        assert_eq!(
            Expr::parse("emissions . transport").unwrap(),
            Expr::Reference {
                name: "emissions.transport".to_string()
            }
        );
        assert_eq!(
            Expr::parse("emissions.transport").unwrap(),
            Expr::Reference {
                name: "emissions.transport".to_string()
            }
        );
    }

    #[test]
    fn respects_arithmetic_precedence() {
        let expr = Expr::parse("1 + 2 * 3").unwrap();
        let Expr::Binary {
            op: BinaryOp::Add,
            rhs,
            ..
        } = expr
        else {
            panic!("expected top-level add, got {expr:?}");
        };
        assert!(matches!(
            *rhs,
            Expr::Binary {
                op: BinaryOp::Mul,
                ..
            }
        ));
    }

    #[test]
    fn parentheses_override_precedence() {
        let expr = Expr::parse("(1 + 2) * 3").unwrap();
        assert!(matches!(
            expr,
            Expr::Binary {
                op: BinaryOp::Mul,
                ..
            }
        ));
    }

    #[test]
    fn parses_comparison_and_logic() {
        let expr = Expr::parse("input > 10 and not excluded").unwrap();
        let Expr::Binary {
            op: BinaryOp::And,
            lhs,
            rhs,
        } = expr
        else {
            panic!("expected and");
        };
        assert!(matches!(*lhs, Expr::Binary { op: BinaryOp::Gt, .. }));
        assert!(matches!(*rhs, Expr::Unary { op: UnaryOp::Not, .. }));
    }

    #[test]
    fn parses_unary_minus() {
        let expr = Expr::parse("-input + 3").unwrap();
        let Expr::Binary {
            op: BinaryOp::Add,
            lhs,
            ..
        } = expr
        else {
            panic!("expected add");
        };
        assert!(matches!(*lhs, Expr::Unary { op: UnaryOp::Neg, .. }));
    }

    #[test]
    fn rejects_empty_formula() {
        assert_eq!(Expr::parse("   "), Err(ParseError::EmptyFormula));
    }

    #[test]
    fn rejects_trailing_tokens() {
        let err = Expr::parse("1 + 2 3").unwrap_err();
        assert!(matches!(err, ParseError::UnexpectedToken { .. }));
    }

    #[test]
    fn rejects_unknown_character() {
        let err = Expr::parse("a # b").unwrap_err();
        assert_eq!(
            err,
            ParseError::UnexpectedCharacter {
                found: '#',
                position: 2
            }
        );
    }

    #[test]
    fn rejects_malformed_number() {
        let err = Expr::parse("1.2.3").unwrap_err();
        assert!(matches!(err, ParseError::InvalidNumber { .. }));
    }

    #[test]
    fn rejects_unclosed_paren() {
        let err = Expr::parse("(1 + 2").unwrap_err();
        assert!(matches!(err, ParseError::UnexpectedEnd { .. }));
    }

    #[test]
    fn collects_references() {
        let expr = Expr::parse("a + b * (c.d - a)").unwrap();
        let mut refs = Vec::new();
        expr.collect_references(&mut refs);
        assert_eq!(refs, vec!["a", "b", "c.d", "a"]);
    }

    #[test]
    fn bare_bang_is_rejected() {
        let err = Expr::parse("a ! b").unwrap_err();
        assert_eq!(
            err,
            ParseError::UnexpectedCharacter {
                found: '!',
                position: 2
            }
        );
    }
}
