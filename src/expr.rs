//! Boolean filter expressions over Int64 scalar fields
//!
//! Grammar, loosest binding first:
//!
//! ```text
//! or   := and (("or" | "||") and)*
//! and  := not (("and" | "&&") not)*
//! not  := ("not" | "!") not | atom
//! atom := "(" or ")" | cmp | membership
//! cmp  := ident op int | int op ident
//! membership := ident ["not"] "in" "[" int ("," int)* "]"
//! ```

use crate::error::{Result, WorkflowError};
use crate::schema::{CollectionSchema, DataType};
use std::collections::BTreeSet;

/// Deepest run of `not` and parentheses the parser descends into.
pub const MAX_NESTING: usize = 256;

/// Longest expression accepted, in tokens. Bounds operator chains, which
/// build trees as deep as they are long.
pub const MAX_TOKENS: usize = 4096;

/// Comparison operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    /// The operator that gives the same answer with operands swapped.
    fn flipped(self) -> Self {
        match self {
            CmpOp::Eq => CmpOp::Eq,
            CmpOp::Ne => CmpOp::Ne,
            CmpOp::Lt => CmpOp::Gt,
            CmpOp::Le => CmpOp::Ge,
            CmpOp::Gt => CmpOp::Lt,
            CmpOp::Ge => CmpOp::Le,
        }
    }

    fn apply(self, lhs: i64, rhs: i64) -> bool {
        match self {
            CmpOp::Eq => lhs == rhs,
            CmpOp::Ne => lhs != rhs,
            CmpOp::Lt => lhs < rhs,
            CmpOp::Le => lhs <= rhs,
            CmpOp::Gt => lhs > rhs,
            CmpOp::Ge => lhs >= rhs,
        }
    }
}

/// Parsed filter expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Compare { field: String, op: CmpOp, value: i64 },
    In { field: String, values: Vec<i64>, negated: bool },
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
}

impl Expr {
    pub fn parse(src: &str) -> Result<Expr> {
        let tokens = tokenize(src)?;
        if tokens.len() > MAX_TOKENS {
            return Err(WorkflowError::InvalidExpr {
                expr: src.to_string(),
                reason: format!("more than {} tokens", MAX_TOKENS),
            });
        }
        let mut parser = Parser {
            src,
            tokens,
            pos: 0,
            depth: 0,
        };
        let expr = parser.or()?;
        if let Some(tok) = parser.peek() {
            return Err(parser.error(format!("unexpected {:?}", tok)));
        }
        Ok(expr)
    }

    /// Field names referenced anywhere in the expression.
    pub fn fields(&self) -> BTreeSet<&str> {
        let mut out = BTreeSet::new();
        self.collect_fields(&mut out);
        out
    }

    fn collect_fields<'a>(&'a self, out: &mut BTreeSet<&'a str>) {
        match self {
            Expr::Compare { field, .. } | Expr::In { field, .. } => {
                out.insert(field.as_str());
            }
            Expr::And(a, b) | Expr::Or(a, b) => {
                a.collect_fields(out);
                b.collect_fields(out);
            }
            Expr::Not(e) => e.collect_fields(out),
        }
    }

    /// Fail if the expression names a field the schema lacks or a field
    /// that is not an Int64 scalar.
    pub fn check_fields(&self, schema: &CollectionSchema) -> Result<()> {
        for name in self.fields() {
            match schema.field(name) {
                None => {
                    return Err(WorkflowError::UnknownField {
                        field: name.to_string(),
                    })
                }
                Some(f) if f.data_type != DataType::Int64 => {
                    return Err(WorkflowError::InvalidExpr {
                        expr: name.to_string(),
                        reason: format!("field {} is not an Int64 scalar", name),
                    })
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    /// Evaluate against a record. Fields the lookup cannot resolve make the
    /// comparison false.
    pub fn evaluate(&self, lookup: &dyn Fn(&str) -> Option<i64>) -> bool {
        match self {
            Expr::Compare { field, op, value } => {
                lookup(field).is_some_and(|v| op.apply(v, *value))
            }
            Expr::In {
                field,
                values,
                negated,
            } => lookup(field).is_some_and(|v| values.contains(&v) != *negated),
            Expr::And(a, b) => a.evaluate(lookup) && b.evaluate(lookup),
            Expr::Or(a, b) => a.evaluate(lookup) || b.evaluate(lookup),
            Expr::Not(e) => !e.evaluate(lookup),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Ident(String),
    Int(i64),
    Op(CmpOp),
    And,
    Or,
    Not,
    In,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
}

fn tokenize(src: &str) -> Result<Vec<Token>> {
    let err = |reason: String| WorkflowError::InvalidExpr {
        expr: src.to_string(),
        reason,
    };
    let chars: Vec<char> = src.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        match c {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '[' => {
                tokens.push(Token::LBracket);
                i += 1;
            }
            ']' => {
                tokens.push(Token::RBracket);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '=' if next == Some('=') => {
                tokens.push(Token::Op(CmpOp::Eq));
                i += 2;
            }
            '!' if next == Some('=') => {
                tokens.push(Token::Op(CmpOp::Ne));
                i += 2;
            }
            '!' => {
                tokens.push(Token::Not);
                i += 1;
            }
            '<' if next == Some('=') => {
                tokens.push(Token::Op(CmpOp::Le));
                i += 2;
            }
            '<' => {
                tokens.push(Token::Op(CmpOp::Lt));
                i += 1;
            }
            '>' if next == Some('=') => {
                tokens.push(Token::Op(CmpOp::Ge));
                i += 2;
            }
            '>' => {
                tokens.push(Token::Op(CmpOp::Gt));
                i += 1;
            }
            '&' if next == Some('&') => {
                tokens.push(Token::And);
                i += 2;
            }
            '|' if next == Some('|') => {
                tokens.push(Token::Or);
                i += 2;
            }
            c if c.is_ascii_digit() || (c == '-' && next.is_some_and(|n| n.is_ascii_digit())) => {
                let start = i;
                i += 1;
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let value = text
                    .parse::<i64>()
                    .map_err(|_| err(format!("integer out of range: {}", text)))?;
                tokens.push(Token::Int(value));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                tokens.push(match word.to_ascii_lowercase().as_str() {
                    "and" => Token::And,
                    "or" => Token::Or,
                    "not" => Token::Not,
                    "in" => Token::In,
                    _ => Token::Ident(word),
                });
            }
            other => return Err(err(format!("unexpected character {:?}", other))),
        }
    }

    Ok(tokens)
}

struct Parser<'a> {
    src: &'a str,
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        tok
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: Token) -> Result<()> {
        if self.eat(&expected) {
            Ok(())
        } else {
            Err(self.error(format!("expected {:?}", expected)))
        }
    }

    fn error(&self, reason: String) -> WorkflowError {
        WorkflowError::InvalidExpr {
            expr: self.src.to_string(),
            reason,
        }
    }

    fn descend(&mut self) -> Result<()> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(self.error(format!("nested deeper than {} levels", MAX_NESTING)));
        }
        Ok(())
    }

    fn or(&mut self) -> Result<Expr> {
        let mut lhs = self.and()?;
        while self.eat(&Token::Or) {
            let rhs = self.and()?;
            lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn and(&mut self) -> Result<Expr> {
        let mut lhs = self.not()?;
        while self.eat(&Token::And) {
            let rhs = self.not()?;
            lhs = Expr::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn not(&mut self) -> Result<Expr> {
        if self.eat(&Token::Not) {
            self.descend()?;
            let inner = self.not()?;
            self.depth -= 1;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.atom()
    }

    fn atom(&mut self) -> Result<Expr> {
        match self.next() {
            Some(Token::LParen) => {
                self.descend()?;
                let inner = self.or()?;
                self.expect(Token::RParen)?;
                self.depth -= 1;
                Ok(inner)
            }
            Some(Token::Ident(field)) => match self.next() {
                Some(Token::Op(op)) => match self.next() {
                    Some(Token::Int(value)) => Ok(Expr::Compare { field, op, value }),
                    _ => Err(self.error(format!("expected integer after {}", field))),
                },
                Some(Token::In) => self.membership(field, false),
                Some(Token::Not) => {
                    self.expect(Token::In)?;
                    self.membership(field, true)
                }
                _ => Err(self.error(format!("expected operator after {}", field))),
            },
            Some(Token::Int(value)) => match (self.next(), self.next()) {
                (Some(Token::Op(op)), Some(Token::Ident(field))) => Ok(Expr::Compare {
                    field,
                    op: op.flipped(),
                    value,
                }),
                _ => Err(self.error(format!("expected comparison after {}", value))),
            },
            Some(tok) => Err(self.error(format!("unexpected {:?}", tok))),
            None => Err(self.error("unexpected end of expression".to_string())),
        }
    }

    fn membership(&mut self, field: String, negated: bool) -> Result<Expr> {
        self.expect(Token::LBracket)?;
        let mut values = Vec::new();
        if !self.eat(&Token::RBracket) {
            loop {
                match self.next() {
                    Some(Token::Int(v)) => values.push(v),
                    _ => return Err(self.error("expected integer in list".to_string())),
                }
                if self.eat(&Token::RBracket) {
                    break;
                }
                self.expect(Token::Comma)?;
            }
        }
        Ok(Expr::In {
            field,
            values,
            negated,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldSchema;

    fn eval(src: &str, word_count: i64) -> bool {
        let expr = Expr::parse(src).unwrap();
        expr.evaluate(&|f: &str| match f {
            "word_count" => Some(word_count),
            "book_id" => Some(word_count - 10_000),
            _ => None,
        })
    }

    #[test]
    fn test_simple_comparison() {
        let expr = Expr::parse("word_count <= 11000").unwrap();
        assert_eq!(
            expr,
            Expr::Compare {
                field: "word_count".to_string(),
                op: CmpOp::Le,
                value: 11_000
            }
        );
        assert!(eval("word_count <= 11000", 11_000));
        assert!(!eval("word_count <= 11000", 11_001));
    }

    #[test]
    fn test_literal_on_left() {
        assert!(eval("11000 >= word_count", 10_500));
        assert!(!eval("11000 >= word_count", 11_500));
    }

    #[test]
    fn test_boolean_connectives() {
        assert!(eval("word_count > 10000 and word_count < 10010", 10_005));
        assert!(!eval("word_count > 10000 && word_count < 10010", 10_010));
        assert!(eval("book_id == 0 || book_id == 5", 10_005));
        assert!(eval("not (word_count < 10100)", 10_200));
        assert!(eval("!(book_id != 3)", 10_003));
    }

    #[test]
    fn test_precedence() {
        // and binds tighter than or
        assert!(eval("book_id == 1 or book_id == 2 and word_count > 99999", 10_001));
        assert!(!eval("(book_id == 1 or book_id == 2) and word_count > 99999", 10_001));
    }

    #[test]
    fn test_deep_nesting_rejected() {
        let nots = format!("{}word_count < 1", "not ".repeat(5_000));
        assert!(matches!(Expr::parse(&nots), Err(WorkflowError::InvalidExpr { .. })));

        let parens = format!("{}word_count < 1{}", "(".repeat(10_000), ")".repeat(10_000));
        assert!(matches!(Expr::parse(&parens), Err(WorkflowError::InvalidExpr { .. })));

        let parens = format!("{}word_count < 1{}", "(".repeat(300), ")".repeat(300));
        match Expr::parse(&parens) {
            Err(WorkflowError::InvalidExpr { reason, .. }) => assert!(reason.contains("nested")),
            other => panic!("expected nesting error, got {other:?}"),
        }

        let chain = vec!["word_count < 1"; 3_000].join(" or ");
        assert!(matches!(Expr::parse(&chain), Err(WorkflowError::InvalidExpr { .. })));
    }

    #[test]
    fn test_moderate_nesting_parses() {
        let parens = format!("{}word_count < 1{}", "(".repeat(100), ")".repeat(100));
        assert!(eval(&parens, 0));

        let nots = format!("{}word_count < 1", "not ".repeat(MAX_NESTING));
        assert!(eval(&nots, 0));
        let nots = format!("{}word_count < 1", "not ".repeat(MAX_NESTING + 1));
        assert!(Expr::parse(&nots).is_err());

        let chain = vec!["book_id == 7"; 200].join(" or ");
        assert!(eval(&chain, 10_007));
    }

    #[test]
    fn test_membership() {
        assert!(eval("book_id in [1, 2, 3]", 10_002));
        assert!(!eval("book_id in [1, 2, 3]", 10_004));
        assert!(eval("book_id not in [1, 2, 3]", 10_004));
        assert!(!eval("book_id in []", 10_000));
        assert!(eval("book_id in [-1, 0]", 10_000));
    }

    #[test]
    fn test_unknown_field_is_false() {
        assert!(!eval("pages > 0", 10_000));
    }

    #[test]
    fn test_parse_errors() {
        for bad in [
            "",
            "word_count <=",
            "word_count 5",
            "(word_count < 5",
            "word_count < 5)",
            "word_count < 5.5",
            "word_count in [1, 2",
            "word_count ~ 3",
            "99999999999999999999 > word_count",
        ] {
            assert!(
                matches!(Expr::parse(bad), Err(WorkflowError::InvalidExpr { .. })),
                "{:?} should not parse",
                bad
            );
        }
    }

    #[test]
    fn test_check_fields() {
        let schema = CollectionSchema::new("c", "")
            .with_field(FieldSchema::int64("book_id").primary())
            .with_field(FieldSchema::int64("word_count"))
            .with_field(FieldSchema::float_vector("book_intro", 2));

        let expr = Expr::parse("word_count <= 11000 and book_id > 3").unwrap();
        assert_eq!(expr.fields().into_iter().collect::<Vec<_>>(), vec!["book_id", "word_count"]);
        expr.check_fields(&schema).unwrap();

        assert!(matches!(
            Expr::parse("pages > 1").unwrap().check_fields(&schema),
            Err(WorkflowError::UnknownField { .. })
        ));
        assert!(matches!(
            Expr::parse("book_intro > 1").unwrap().check_fields(&schema),
            Err(WorkflowError::InvalidExpr { .. })
        ));
    }
}
