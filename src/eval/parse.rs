//! AST and recursive-descent parser for the emitted expression subset.
//!
//! The grammar covers exactly what the serializer produces: literals,
//! holes, object literals with computed keys and method shorthand, member
//! access, calls, `new`, assignment, sequences, arrow and function
//! expressions, and the handful of operators the helper closures use
//! (`||`, `>=`, postfix `++`, unary `-`, `void`, `!`).

use crate::error::{Result, VivicodeError};

use super::lex::{lex, Tok};

/// A statement in a function body.
#[derive(Debug, Clone)]
pub enum Stmt {
    /// Expression statement.
    Expr(Expr),
    /// `return expr?`
    Return(Option<Expr>),
}

/// A property name in an object literal.
#[derive(Debug, Clone)]
pub enum PropName {
    /// Identifier or string key.
    Literal(String),
    /// `[expr]`
    Computed(Expr),
}

/// One property of an object literal.
#[derive(Debug, Clone)]
pub enum ObjProp {
    /// `key: value`
    KeyValue(PropName, Expr),
    /// Method shorthand: `key(params){body}`
    Method(PropName, Vec<String>, Vec<Stmt>),
}

/// A member-access key.
#[derive(Debug, Clone)]
pub enum MemberKey {
    /// `.name`
    Static(String),
    /// `[expr]`
    Computed(Box<Expr>),
}

/// Binary operators of the subset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    /// `/`
    Div,
    /// `||`
    Or,
    /// `>=`
    Ge,
}

/// Unary operators of the subset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// `-x`
    Neg,
    /// `void x`
    Void,
    /// `!x`
    Not,
}

/// An expression of the subset.
#[derive(Debug, Clone)]
pub enum Expr {
    /// Number literal.
    Num(f64),
    /// BigInt literal.
    BigInt(String),
    /// String literal.
    Str(String),
    /// Regex literal.
    Regex(String, String),
    /// Identifier reference.
    Ident(String),
    /// Array literal; `None` is a hole.
    Array(Vec<Option<Expr>>),
    /// Object literal.
    Object(Vec<ObjProp>),
    /// `target = value`
    Assign(Box<Expr>, Box<Expr>),
    /// `object.key` / `object[key]`
    Member(Box<Expr>, MemberKey),
    /// `callee(args)`
    Call(Box<Expr>, Vec<Expr>),
    /// `new callee(args)`
    New(Box<Expr>, Vec<Expr>),
    /// `(a, b, c)` — evaluates to the last expression.
    Seq(Vec<Expr>),
    /// Arrow function with expression body.
    ArrowExpr(Vec<String>, Box<Expr>),
    /// Arrow function with block body.
    ArrowBlock(Vec<String>, Vec<Stmt>),
    /// `function(params){body}`
    Function(Vec<String>, Vec<Stmt>),
    /// Unary operation.
    Unary(UnaryOp, Box<Expr>),
    /// Binary operation.
    Binary(BinOp, Box<Expr>, Box<Expr>),
    /// `x++`
    PostIncr(Box<Expr>),
}

fn err(msg: impl Into<String>) -> VivicodeError {
    VivicodeError::Eval(msg.into())
}

/// Parses one complete expression; trailing tokens are an error.
pub fn parse(source: &str) -> Result<Expr> {
    let toks = lex(source)?;
    let mut p = Parser { toks, pos: 0 };
    let expr = p.parse_assign()?;
    if p.pos != p.toks.len() {
        return Err(err(format!("trailing tokens at {}", p.pos)));
    }
    Ok(expr)
}

struct Parser {
    toks: Vec<Tok>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Tok> {
        self.toks.get(self.pos)
    }

    fn peek_punct(&self, p: &str) -> bool {
        matches!(self.peek(), Some(Tok::Punct(q)) if *q == p)
    }

    fn peek_ident(&self, name: &str) -> bool {
        matches!(self.peek(), Some(Tok::Ident(s)) if s == name)
    }

    fn bump(&mut self) -> Result<Tok> {
        let tok = self
            .toks
            .get(self.pos)
            .cloned()
            .ok_or_else(|| err("unexpected end of input"))?;
        self.pos += 1;
        Ok(tok)
    }

    fn expect_punct(&mut self, p: &str) -> Result<()> {
        match self.bump()? {
            Tok::Punct(q) if q == p => Ok(()),
            other => Err(err(format!("expected {p:?}, found {other:?}"))),
        }
    }

    fn expect_ident(&mut self) -> Result<String> {
        match self.bump()? {
            Tok::Ident(s) => Ok(s),
            other => Err(err(format!("expected identifier, found {other:?}"))),
        }
    }

    /// Comma-separated sequence (inside parens); a single expression stays
    /// unwrapped.
    fn parse_sequence(&mut self) -> Result<Expr> {
        let first = self.parse_assign()?;
        if !self.peek_punct(",") {
            return Ok(first);
        }
        let mut parts = vec![first];
        while self.peek_punct(",") {
            self.pos += 1;
            parts.push(self.parse_assign()?);
        }
        Ok(Expr::Seq(parts))
    }

    fn parse_assign(&mut self) -> Result<Expr> {
        // Arrow functions sit at assignment precedence.
        if let Some(arrow) = self.try_parse_arrow()? {
            return Ok(arrow);
        }
        let lhs = self.parse_or()?;
        if self.peek_punct("=") {
            self.pos += 1;
            let rhs = self.parse_assign()?;
            return Ok(Expr::Assign(Box::new(lhs), Box::new(rhs)));
        }
        Ok(lhs)
    }

    /// Backtracking arrow detection: `ident =>` or `(idents) =>`.
    fn try_parse_arrow(&mut self) -> Result<Option<Expr>> {
        let start = self.pos;
        let params = match self.peek().cloned() {
            Some(Tok::Ident(name)) if !is_keyword(&name) => {
                if matches!(self.toks.get(self.pos + 1), Some(Tok::Punct("=>"))) {
                    self.pos += 2;
                    vec![name]
                } else {
                    return Ok(None);
                }
            }
            Some(Tok::Punct("(")) => {
                self.pos += 1;
                let mut params = Vec::new();
                let ok = loop {
                    match self.peek() {
                        Some(Tok::Punct(")")) => {
                            self.pos += 1;
                            break true;
                        }
                        Some(Tok::Ident(name)) if !is_keyword(name) => {
                            params.push(name.clone());
                            self.pos += 1;
                            match self.peek() {
                                Some(Tok::Punct(",")) => self.pos += 1,
                                Some(Tok::Punct(")")) => {}
                                _ => break false,
                            }
                        }
                        _ => break false,
                    }
                };
                if !ok || !self.peek_punct("=>") {
                    self.pos = start;
                    return Ok(None);
                }
                self.pos += 1;
                params
            }
            _ => return Ok(None),
        };

        if self.peek_punct("{") {
            self.pos += 1;
            let body = self.parse_stmts()?;
            self.expect_punct("}")?;
            Ok(Some(Expr::ArrowBlock(params, body)))
        } else {
            let body = self.parse_assign()?;
            Ok(Some(Expr::ArrowExpr(params, Box::new(body))))
        }
    }

    fn parse_or(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_compare()?;
        while self.peek_punct("||") {
            self.pos += 1;
            let rhs = self.parse_compare()?;
            lhs = Expr::Binary(BinOp::Or, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_compare(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_mul()?;
        while self.peek_punct(">=") {
            self.pos += 1;
            let rhs = self.parse_mul()?;
            lhs = Expr::Binary(BinOp::Ge, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_mul(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_unary()?;
        while self.peek_punct("/") {
            self.pos += 1;
            let rhs = self.parse_unary()?;
            lhs = Expr::Binary(BinOp::Div, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        if self.peek_punct("-") {
            self.pos += 1;
            let operand = self.parse_unary()?;
            return Ok(Expr::Unary(UnaryOp::Neg, Box::new(operand)));
        }
        if self.peek_punct("!") {
            self.pos += 1;
            let operand = self.parse_unary()?;
            return Ok(Expr::Unary(UnaryOp::Not, Box::new(operand)));
        }
        if self.peek_ident("void") {
            self.pos += 1;
            let operand = self.parse_unary()?;
            return Ok(Expr::Unary(UnaryOp::Void, Box::new(operand)));
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Expr> {
        let mut expr = self.parse_primary()?;
        loop {
            if self.peek_punct(".") {
                self.pos += 1;
                let name = self.expect_ident()?;
                expr = Expr::Member(Box::new(expr), MemberKey::Static(name));
            } else if self.peek_punct("[") {
                self.pos += 1;
                let key = self.parse_sequence()?;
                self.expect_punct("]")?;
                expr = Expr::Member(Box::new(expr), MemberKey::Computed(Box::new(key)));
            } else if self.peek_punct("(") {
                self.pos += 1;
                let args = self.parse_args()?;
                expr = Expr::Call(Box::new(expr), args);
            } else if self.peek_punct("++") {
                self.pos += 1;
                expr = Expr::PostIncr(Box::new(expr));
            } else {
                return Ok(expr);
            }
        }
    }

    fn parse_args(&mut self) -> Result<Vec<Expr>> {
        let mut args = Vec::new();
        if self.peek_punct(")") {
            self.pos += 1;
            return Ok(args);
        }
        loop {
            args.push(self.parse_assign()?);
            match self.bump()? {
                Tok::Punct(")") => return Ok(args),
                Tok::Punct(",") => {}
                other => return Err(err(format!("expected ',' or ')', found {other:?}"))),
            }
        }
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        match self.bump()? {
            Tok::Num(n) => Ok(Expr::Num(n)),
            Tok::BigInt(digits) => Ok(Expr::BigInt(digits)),
            Tok::Str(s) => Ok(Expr::Str(s)),
            Tok::Regex { source, flags } => Ok(Expr::Regex(source, flags)),
            Tok::Punct("(") => {
                let inner = self.parse_sequence()?;
                self.expect_punct(")")?;
                Ok(inner)
            }
            Tok::Punct("[") => self.parse_array(),
            Tok::Punct("{") => self.parse_object(),
            Tok::Ident(name) => match name.as_str() {
                "new" => {
                    // `new` binds member access but not calls.
                    let mut callee = self.parse_primary()?;
                    loop {
                        if self.peek_punct(".") {
                            self.pos += 1;
                            let name = self.expect_ident()?;
                            callee = Expr::Member(Box::new(callee), MemberKey::Static(name));
                        } else if self.peek_punct("[") {
                            self.pos += 1;
                            let key = self.parse_sequence()?;
                            self.expect_punct("]")?;
                            callee =
                                Expr::Member(Box::new(callee), MemberKey::Computed(Box::new(key)));
                        } else {
                            break;
                        }
                    }
                    self.expect_punct("(")?;
                    let args = self.parse_args()?;
                    Ok(Expr::New(Box::new(callee), args))
                }
                "function" => {
                    self.expect_punct("(")?;
                    let params = self.parse_params()?;
                    self.expect_punct("{")?;
                    let body = self.parse_stmts()?;
                    self.expect_punct("}")?;
                    Ok(Expr::Function(params, body))
                }
                _ => Ok(Expr::Ident(name)),
            },
            other => Err(err(format!("unexpected token {other:?}"))),
        }
    }

    fn parse_params(&mut self) -> Result<Vec<String>> {
        let mut params = Vec::new();
        if self.peek_punct(")") {
            self.pos += 1;
            return Ok(params);
        }
        loop {
            params.push(self.expect_ident()?);
            match self.bump()? {
                Tok::Punct(")") => return Ok(params),
                Tok::Punct(",") => {}
                other => return Err(err(format!("expected ',' or ')', found {other:?}"))),
            }
        }
    }

    fn parse_stmts(&mut self) -> Result<Vec<Stmt>> {
        let mut stmts = Vec::new();
        loop {
            while self.peek_punct(";") {
                self.pos += 1;
            }
            if self.peek_punct("}") || self.peek().is_none() {
                return Ok(stmts);
            }
            if self.peek_ident("return") {
                self.pos += 1;
                if self.peek_punct(";") || self.peek_punct("}") {
                    stmts.push(Stmt::Return(None));
                } else {
                    stmts.push(Stmt::Return(Some(self.parse_sequence()?)));
                }
            } else {
                stmts.push(Stmt::Expr(self.parse_sequence()?));
            }
        }
    }

    fn parse_array(&mut self) -> Result<Expr> {
        let mut items: Vec<Option<Expr>> = Vec::new();
        loop {
            if self.peek_punct("]") {
                self.pos += 1;
                return Ok(Expr::Array(items));
            }
            if self.peek_punct(",") {
                self.pos += 1;
                items.push(None);
                continue;
            }
            items.push(Some(self.parse_assign()?));
            if self.peek_punct(",") {
                self.pos += 1;
                if self.peek_punct("]") {
                    self.pos += 1;
                    return Ok(Expr::Array(items));
                }
            } else {
                self.expect_punct("]")?;
                return Ok(Expr::Array(items));
            }
        }
    }

    fn parse_object(&mut self) -> Result<Expr> {
        let mut props = Vec::new();
        loop {
            if self.peek_punct("}") {
                self.pos += 1;
                return Ok(Expr::Object(props));
            }
            let name = match self.bump()? {
                Tok::Ident(s) => PropName::Literal(s),
                Tok::Str(s) => PropName::Literal(s),
                Tok::Num(n) => PropName::Literal(crate::serializer::format_number(n)),
                Tok::Punct("[") => {
                    let inner = self.parse_sequence()?;
                    self.expect_punct("]")?;
                    PropName::Computed(inner)
                }
                other => return Err(err(format!("bad property name {other:?}"))),
            };
            if self.peek_punct("(") {
                // Method shorthand.
                self.pos += 1;
                let params = self.parse_params()?;
                self.expect_punct("{")?;
                let body = self.parse_stmts()?;
                self.expect_punct("}")?;
                props.push(ObjProp::Method(name, params, body));
            } else {
                self.expect_punct(":")?;
                let value = self.parse_assign()?;
                props.push(ObjProp::KeyValue(name, value));
            }
            if self.peek_punct(",") {
                self.pos += 1;
            }
        }
    }
}

fn is_keyword(name: &str) -> bool {
    matches!(
        name,
        "new" | "function" | "return" | "void" | "null" | "true" | "false"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_iife_shapes() {
        assert!(parse("((a)=>([a={},a]))()").is_ok());
        assert!(parse("(function(a){return (a={self:a},a.self=a,a)})()").is_ok());
    }

    #[test]
    fn parses_holes() {
        match parse("[1,,]").unwrap() {
            Expr::Array(items) => {
                assert_eq!(items.len(), 2);
                assert!(items[0].is_some());
                assert!(items[1].is_none());
            }
            other => panic!("expected array, got {other:?}"),
        }
    }

    #[test]
    fn parses_computed_method_shorthand() {
        assert!(parse("{[Symbol.iterator](){return ([1]).values()}}").is_ok());
    }

    #[test]
    fn rejects_trailing_garbage() {
        assert!(parse("1 2").is_err());
    }
}
