//! Recursive-descent parser for the infix expression and constraint syntax.
//!
//! Grammar (whitespace insignificant):
//!
//! ```text
//! Expression ::= ["+"|"-"] Term { ("+"|"-") Term }
//! Term       ::= Factor { ("*"|"/") Factor }
//! Factor     ::= Base [ "^" Exponent ]
//! Exponent   ::= ["-"] number | "(" ["-"] number ")"
//! Base       ::= number | "<" varname ">" | "(" Expression ")"
//!              | funcname "(" ... ")"
//! ```
//!
//! Function-call arguments are delegated to the named handler, so plugin
//! operators parse themselves. Division is represented as multiplication
//! with a `^(-1)` factor. Variable names resolve through a caller-supplied
//! closure; the same name always yields the same leaf node.

use thiserror::Error;

use crate::handler::ExprHandlers;
use crate::store::{ExprPayload, ExprStore};
use crate::types::{ExprId, VarId, VarType};

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("unexpected token `{0}`")]
    UnexpectedToken(String),
    #[error("unexpected end of input")]
    UnexpectedEnd,
    #[error("unknown variable `{0}`")]
    UnknownVariable(String),
    #[error("no handler registered for function `{0}`")]
    UnknownFunction(String),
    #[error("handler `{0}` does not support parsing")]
    UnsupportedFunction(String),
    #[error("invalid number `{0}`")]
    InvalidNumber(String),
    #[error("constraint sides are inconsistent: [{0}, {1}]")]
    ConflictingSides(f64, f64),
}

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Num(f64),
    Ident(String),
    VarRef(String),
    Plus,
    Minus,
    Star,
    Slash,
    Caret,
    LParen,
    RParen,
    Le,
    Ge,
    Eq,
    Free,
}

impl Tok {
    fn describe(&self) -> String {
        match self {
            Tok::Num(v) => format!("{v}"),
            Tok::Ident(s) => s.clone(),
            Tok::VarRef(s) => format!("<{s}>"),
            Tok::Plus => "+".into(),
            Tok::Minus => "-".into(),
            Tok::Star => "*".into(),
            Tok::Slash => "/".into(),
            Tok::Caret => "^".into(),
            Tok::LParen => "(".into(),
            Tok::RParen => ")".into(),
            Tok::Le => "<=".into(),
            Tok::Ge => ">=".into(),
            Tok::Eq => "==".into(),
            Tok::Free => "[free]".into(),
        }
    }
}

fn lex(input: &str) -> Result<Vec<Tok>, ParseError> {
    let mut toks = Vec::new();
    let bytes = input.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i] as char;
        match c {
            ' ' | '\t' | '\n' | '\r' => i += 1,
            '+' => {
                toks.push(Tok::Plus);
                i += 1;
            }
            '-' => {
                toks.push(Tok::Minus);
                i += 1;
            }
            '*' => {
                toks.push(Tok::Star);
                i += 1;
            }
            '/' => {
                toks.push(Tok::Slash);
                i += 1;
            }
            '^' => {
                toks.push(Tok::Caret);
                i += 1;
            }
            '(' => {
                toks.push(Tok::LParen);
                i += 1;
            }
            ')' => {
                toks.push(Tok::RParen);
                i += 1;
            }
            '<' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    toks.push(Tok::Le);
                    i += 2;
                } else {
                    let start = i + 1;
                    let mut j = start;
                    while j < bytes.len() && bytes[j] != b'>' {
                        j += 1;
                    }
                    if j == bytes.len() {
                        return Err(ParseError::UnexpectedEnd);
                    }
                    toks.push(Tok::VarRef(input[start..j].to_string()));
                    i = j + 1;
                }
            }
            '>' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    toks.push(Tok::Ge);
                    i += 2;
                } else {
                    return Err(ParseError::UnexpectedToken(">".into()));
                }
            }
            '=' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    toks.push(Tok::Eq);
                    i += 2;
                } else {
                    return Err(ParseError::UnexpectedToken("=".into()));
                }
            }
            '[' => {
                let rest = &input[i + 1..];
                if let Some(stripped) = rest.trim_start().strip_prefix("free") {
                    if let Some(after) = stripped.trim_start().strip_prefix(']') {
                        toks.push(Tok::Free);
                        i = input.len() - after.len();
                        continue;
                    }
                }
                return Err(ParseError::UnexpectedToken("[".into()));
            }
            '0'..='9' | '.' => {
                let start = i;
                while i < bytes.len() && (bytes[i].is_ascii_digit() || bytes[i] == b'.') {
                    i += 1;
                }
                if i < bytes.len() && (bytes[i] == b'e' || bytes[i] == b'E') {
                    let mut j = i + 1;
                    if j < bytes.len() && (bytes[j] == b'+' || bytes[j] == b'-') {
                        j += 1;
                    }
                    if j < bytes.len() && bytes[j].is_ascii_digit() {
                        i = j;
                        while i < bytes.len() && bytes[i].is_ascii_digit() {
                            i += 1;
                        }
                    }
                }
                let text = &input[start..i];
                let v: f64 = text
                    .parse()
                    .map_err(|_| ParseError::InvalidNumber(text.to_string()))?;
                toks.push(Tok::Num(v));
            }
            'a'..='z' | 'A'..='Z' | '_' => {
                let start = i;
                while i < bytes.len()
                    && ((bytes[i] as char).is_ascii_alphanumeric() || bytes[i] == b'_')
                {
                    i += 1;
                }
                toks.push(Tok::Ident(input[start..i].to_string()));
            }
            other => return Err(ParseError::UnexpectedToken(other.to_string())),
        }
    }
    Ok(toks)
}

pub struct Parser<'a, 'b> {
    toks: Vec<Tok>,
    pos: usize,
    pub store: &'a mut ExprStore,
    pub hdlrs: &'b ExprHandlers,
    resolve: &'a mut dyn FnMut(&str) -> Option<(VarId, VarType)>,
}

impl<'a, 'b> Parser<'a, 'b> {
    fn peek(&self) -> Option<&Tok> {
        self.toks.get(self.pos)
    }

    fn next(&mut self) -> Result<Tok, ParseError> {
        let t = self.toks.get(self.pos).cloned().ok_or(ParseError::UnexpectedEnd)?;
        self.pos += 1;
        Ok(t)
    }

    fn expect(&mut self, want: Tok) -> Result<(), ParseError> {
        let got = self.next()?;
        if got == want {
            Ok(())
        } else {
            Err(ParseError::UnexpectedToken(got.describe()))
        }
    }

    fn eat(&mut self, want: &Tok) -> bool {
        if self.peek() == Some(want) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    /// A constraint side: a number with an optional leading sign.
    fn signed_num(&mut self) -> Result<f64, ParseError> {
        let sign = if self.eat(&Tok::Minus) {
            -1.0
        } else {
            self.eat(&Tok::Plus);
            1.0
        };
        match self.next()? {
            Tok::Num(v) => Ok(sign * v),
            other => Err(ParseError::UnexpectedToken(other.describe())),
        }
    }

    /// Parses a full expression from the current position. The returned
    /// node carries one use owned by the caller.
    pub fn parse_expression(&mut self) -> Result<ExprId, ParseError> {
        let mut sign = 1.0;
        if self.eat(&Tok::Minus) {
            sign = -1.0;
        } else {
            self.eat(&Tok::Plus);
        }
        let mut coefs = vec![sign];
        let mut terms = vec![self.parse_term()?];
        loop {
            if self.eat(&Tok::Plus) {
                coefs.push(1.0);
            } else if self.eat(&Tok::Minus) {
                coefs.push(-1.0);
            } else {
                break;
            }
            match self.parse_term() {
                Ok(t) => terms.push(t),
                Err(err) => {
                    for t in terms {
                        self.store.release(t);
                    }
                    return Err(err);
                }
            }
        }
        if terms.len() == 1 && coefs[0] == 1.0 {
            return Ok(terms[0]);
        }
        let e = self.store.create(
            self.hdlrs.builtin().sum,
            ExprPayload::Sum {
                constant: 0.0,
                coefs: coefs.into_iter().collect(),
            },
            &terms,
        );
        for t in terms {
            self.store.release(t);
        }
        Ok(e)
    }

    fn parse_term(&mut self) -> Result<ExprId, ParseError> {
        let mut factors = vec![self.parse_factor()?];
        loop {
            let invert = if self.eat(&Tok::Star) {
                false
            } else if self.eat(&Tok::Slash) {
                true
            } else {
                break;
            };
            let f = match self.parse_factor() {
                Ok(f) => f,
                Err(err) => {
                    for f in factors {
                        self.store.release(f);
                    }
                    return Err(err);
                }
            };
            if invert {
                let inv = self.store.create(
                    self.hdlrs.builtin().pow,
                    ExprPayload::Pow { exponent: -1.0 },
                    &[f],
                );
                self.store.release(f);
                factors.push(inv);
            } else {
                factors.push(f);
            }
        }
        if factors.len() == 1 {
            return Ok(factors[0]);
        }
        let e = self.store.create(
            self.hdlrs.builtin().product,
            ExprPayload::Product { coef: 1.0 },
            &factors,
        );
        for f in factors {
            self.store.release(f);
        }
        Ok(e)
    }

    fn parse_factor(&mut self) -> Result<ExprId, ParseError> {
        let base = self.parse_base()?;
        if !self.eat(&Tok::Caret) {
            return Ok(base);
        }
        let exponent = match self.parse_exponent() {
            Ok(p) => p,
            Err(err) => {
                self.store.release(base);
                return Err(err);
            }
        };
        let e = self.store.create(
            self.hdlrs.builtin().pow,
            ExprPayload::Pow { exponent },
            &[base],
        );
        self.store.release(base);
        Ok(e)
    }

    fn parse_exponent(&mut self) -> Result<f64, ParseError> {
        let parens = self.eat(&Tok::LParen);
        let sign = if self.eat(&Tok::Minus) { -1.0 } else { 1.0 };
        let v = match self.next()? {
            Tok::Num(v) => v,
            other => return Err(ParseError::UnexpectedToken(other.describe())),
        };
        if parens {
            self.expect(Tok::RParen)?;
        }
        Ok(sign * v)
    }

    fn parse_base(&mut self) -> Result<ExprId, ParseError> {
        match self.next()? {
            Tok::Num(v) => Ok(self
                .store
                .create(self.hdlrs.builtin().val, ExprPayload::Value(v), &[])),
            Tok::VarRef(name) => {
                let (var, vtype) = (self.resolve)(&name)
                    .ok_or_else(|| ParseError::UnknownVariable(name.clone()))?;
                Ok(self
                    .store
                    .create_var(self.hdlrs.builtin().var, var, vtype, &name))
            }
            Tok::LParen => {
                let e = self.parse_expression()?;
                if let Err(err) = self.expect(Tok::RParen) {
                    self.store.release(e);
                    return Err(err);
                }
                Ok(e)
            }
            Tok::Ident(name) => {
                let hid = self
                    .hdlrs
                    .find(&name)
                    .ok_or_else(|| ParseError::UnknownFunction(name.clone()))?;
                self.expect(Tok::LParen)?;
                let h = self.hdlrs.get(hid);
                h.parse_call(self)
            }
            other => Err(ParseError::UnexpectedToken(other.describe())),
        }
    }

    /// Argument parsing for single-argument functions: consumes the
    /// argument and the closing parenthesis, then builds the call node
    /// under the named handler.
    pub fn parse_unary_call(&mut self, name: &str) -> Result<ExprId, ParseError> {
        let arg = self.parse_expression()?;
        if let Err(err) = self.expect(Tok::RParen) {
            self.store.release(arg);
            return Err(err);
        }
        let hid = match self.hdlrs.find(name) {
            Some(hid) => hid,
            None => {
                self.store.release(arg);
                return Err(ParseError::UnknownFunction(name.to_string()));
            }
        };
        let e = self.store.create(hid, ExprPayload::None, &[arg]);
        self.store.release(arg);
        Ok(e)
    }
}

/// Parses an expression string. Unsimplified: the result reflects the
/// input's shape; run [`crate::simplify::simplify`] for the canonical form.
pub fn parse_expr(
    store: &mut ExprStore,
    hdlrs: &ExprHandlers,
    input: &str,
    resolve: &mut dyn FnMut(&str) -> Option<(VarId, VarType)>,
) -> Result<ExprId, ParseError> {
    let toks = lex(input)?;
    let mut p = Parser {
        toks,
        pos: 0,
        store,
        hdlrs,
        resolve,
    };
    let e = p.parse_expression()?;
    if let Some(t) = p.peek() {
        let msg = t.describe();
        p.store.release(e);
        return Err(ParseError::UnexpectedToken(msg));
    }
    Ok(e)
}

/// Parses a constraint string `[lhs <=] expr [<= rhs]`, `expr == v`,
/// `expr >= lhs`, or `expr [free]`, returning the expression with its
/// side values. Omitted sides are infinite.
pub fn parse_constraint(
    store: &mut ExprStore,
    hdlrs: &ExprHandlers,
    input: &str,
    resolve: &mut dyn FnMut(&str) -> Option<(VarId, VarType)>,
) -> Result<(ExprId, f64, f64), ParseError> {
    let toks = lex(input)?;
    let mut p = Parser {
        toks,
        pos: 0,
        store,
        hdlrs,
        resolve,
    };
    let mut lhs = f64::NEG_INFINITY;
    let mut rhs = f64::INFINITY;
    // lhs prefix: an optionally signed number followed by `<=`
    match (p.toks.first(), p.toks.get(1), p.toks.get(2)) {
        (Some(Tok::Num(v)), Some(Tok::Le), _) => {
            lhs = *v;
            p.pos = 2;
        }
        (Some(Tok::Minus), Some(Tok::Num(v)), Some(Tok::Le)) => {
            lhs = -*v;
            p.pos = 3;
        }
        (Some(Tok::Plus), Some(Tok::Num(v)), Some(Tok::Le)) => {
            lhs = *v;
            p.pos = 3;
        }
        _ => {}
    }
    let e = p.parse_expression()?;
    let side = p.toks.get(p.pos).cloned();
    match side {
        None => {}
        Some(Tok::Le) => {
            p.pos += 1;
            match p.signed_num() {
                Ok(v) => rhs = v,
                Err(err) => {
                    p.store.release(e);
                    return Err(err);
                }
            }
        }
        Some(Tok::Ge) => {
            p.pos += 1;
            match p.signed_num() {
                Ok(v) => lhs = v,
                Err(err) => {
                    p.store.release(e);
                    return Err(err);
                }
            }
        }
        Some(Tok::Eq) => {
            p.pos += 1;
            match p.signed_num() {
                Ok(v) => {
                    lhs = v;
                    rhs = v;
                }
                Err(err) => {
                    p.store.release(e);
                    return Err(err);
                }
            }
        }
        Some(Tok::Free) => {
            p.pos += 1;
        }
        Some(other) => {
            let msg = other.describe();
            p.store.release(e);
            return Err(ParseError::UnexpectedToken(msg));
        }
    }
    if let Some(t) = p.peek() {
        let msg = t.describe();
        p.store.release(e);
        return Err(ParseError::UnexpectedToken(msg));
    }
    if lhs > rhs {
        p.store.release(e);
        return Err(ParseError::ConflictingSides(lhs, rhs));
    }
    Ok((e, lhs, rhs))
}
