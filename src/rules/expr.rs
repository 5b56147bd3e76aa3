//! The embedded boolean/arithmetic/comparison expression language used by
//! rule conditions.
//!
//! A restricted grammar — literals, identifiers, `. ( )`, arithmetic,
//! comparison, `AND/OR/NOT`, and a method call on an identifier — compiled
//! to a small AST and evaluated against a typed environment. No
//! third-party expression library is embedded; the grammar is small
//! enough that a hand-rolled recursive-descent parser is simpler than
//! adapting one.

use chrono::{DateTime, Datelike, Local, Timelike, Utc};

use crate::error::RuleError;
use crate::value::{Record, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinOp {
    And,
    Or,
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug, Clone)]
enum Expr {
    Lit(Value),
    Ident(String),
    Member(Box<Expr>, String),
    Call(String, Vec<Expr>),
    MethodCall(Box<Expr>, String, Vec<Expr>),
    Not(Box<Expr>),
    Neg(Box<Expr>),
    Bin(BinOp, Box<Expr>, Box<Expr>),
}

/// The compiled form of a rule's boolean expression.
#[derive(Debug, Clone)]
pub struct CompiledExpr {
    root: Expr,
}

/// Values available during evaluation: the knowledge snapshot, the
/// device's own id (bound to the identifier `ID`), and the instant
/// evaluation is happening at (constants `utc`, `local`).
pub struct Environment<'a> {
    pub knowledge: &'a Record,
    pub device_id: &'a str,
    pub now: DateTime<Utc>,
}

pub fn compile(source: &str) -> Result<CompiledExpr, RuleError> {
    let tokens = tokenize(source).map_err(RuleError::Parse)?;
    let mut parser = Parser { tokens, pos: 0 };
    let root = parser.parse_or().map_err(RuleError::Parse)?;
    if parser.pos != parser.tokens.len() {
        return Err(RuleError::Parse(format!(
            "unexpected trailing tokens at position {}",
            parser.pos
        )));
    }
    Ok(CompiledExpr { root })
}

impl CompiledExpr {
    pub fn eval(&self, env: &Environment) -> Result<Value, RuleError> {
        eval(&self.root, env)
    }

    /// Convenience for rule evaluation: truthiness of the result.
    pub fn eval_bool(&self, env: &Environment) -> Result<bool, RuleError> {
        match self.eval(env)? {
            Value::Bool(b) => Ok(b),
            other => other
                .as_bool()
                .ok_or_else(|| RuleError::TypeError(format!("expression did not evaluate to bool: {other}"))),
        }
    }
}

// ---------------------------------------------------------------------
// Tokenizer
// ---------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Number(f64),
    Str(String),
    And,
    Or,
    Not,
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
    Plus,
    Minus,
    Star,
    Slash,
    Dot,
    Comma,
    LParen,
    RParen,
}

fn tokenize(s: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = s.chars().collect();
    let mut i = 0;
    let mut tokens = Vec::new();
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        match c {
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '.' => {
                tokens.push(Token::Dot);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '+' => {
                tokens.push(Token::Plus);
                i += 1;
            }
            '-' => {
                tokens.push(Token::Minus);
                i += 1;
            }
            '*' => {
                tokens.push(Token::Star);
                i += 1;
            }
            '/' => {
                tokens.push(Token::Slash);
                i += 1;
            }
            '=' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Eq);
                    i += 2;
                } else {
                    return Err("expected '==' for equality".to_string());
                }
            }
            '!' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Ne);
                    i += 2;
                } else {
                    tokens.push(Token::Not);
                    i += 1;
                }
            }
            '>' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Ge);
                    i += 2;
                } else {
                    tokens.push(Token::Gt);
                    i += 1;
                }
            }
            '<' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Le);
                    i += 2;
                } else {
                    tokens.push(Token::Lt);
                    i += 1;
                }
            }
            '&' if chars.get(i + 1) == Some(&'&') => {
                tokens.push(Token::And);
                i += 2;
            }
            '|' if chars.get(i + 1) == Some(&'|') => {
                tokens.push(Token::Or);
                i += 2;
            }
            '"' => {
                let mut j = i + 1;
                let mut buf = String::new();
                while j < chars.len() && chars[j] != '"' {
                    buf.push(chars[j]);
                    j += 1;
                }
                if j >= chars.len() {
                    return Err("unterminated string literal".to_string());
                }
                tokens.push(Token::Str(buf));
                i = j + 1;
            }
            c if c.is_ascii_digit() => {
                let mut j = i;
                while j < chars.len() && (chars[j].is_ascii_digit() || chars[j] == '.') {
                    j += 1;
                }
                let text: String = chars[i..j].iter().collect();
                let num = text.parse::<f64>().map_err(|e| e.to_string())?;
                tokens.push(Token::Number(num));
                i = j;
            }
            c if c.is_alphabetic() || c == '_' => {
                let mut j = i;
                while j < chars.len() && (chars[j].is_alphanumeric() || chars[j] == '_') {
                    j += 1;
                }
                let word: String = chars[i..j].iter().collect();
                tokens.push(match word.to_ascii_uppercase().as_str() {
                    "AND" => Token::And,
                    "OR" => Token::Or,
                    "NOT" => Token::Not,
                    _ => Token::Ident(word),
                });
                i = j;
            }
            other => return Err(format!("unexpected character '{other}'")),
        }
    }
    Ok(tokens)
}

// ---------------------------------------------------------------------
// Recursive-descent parser
// ---------------------------------------------------------------------

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
        self.pos += 1;
        tok
    }

    fn expect(&mut self, expected: &Token) -> Result<(), String> {
        match self.advance() {
            Some(ref t) if t == expected => Ok(()),
            other => Err(format!("expected {expected:?}, found {other:?}")),
        }
    }

    fn parse_or(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_and()?;
        while matches!(self.peek(), Some(Token::Or)) {
            self.advance();
            let right = self.parse_and()?;
            left = Expr::Bin(BinOp::Or, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_not()?;
        while matches!(self.peek(), Some(Token::And)) {
            self.advance();
            let right = self.parse_not()?;
            left = Expr::Bin(BinOp::And, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Expr, String> {
        if matches!(self.peek(), Some(Token::Not)) {
            self.advance();
            return Ok(Expr::Not(Box::new(self.parse_not()?)));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr, String> {
        let left = self.parse_additive()?;
        let op = match self.peek() {
            Some(Token::Eq) => Some(BinOp::Eq),
            Some(Token::Ne) => Some(BinOp::Ne),
            Some(Token::Gt) => Some(BinOp::Gt),
            Some(Token::Lt) => Some(BinOp::Lt),
            Some(Token::Ge) => Some(BinOp::Ge),
            Some(Token::Le) => Some(BinOp::Le),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            let right = self.parse_additive()?;
            return Ok(Expr::Bin(op, Box::new(left), Box::new(right)));
        }
        Ok(left)
    }

    fn parse_additive(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinOp::Add,
                Some(Token::Minus) => BinOp::Sub,
                _ => break,
            };
            self.advance();
            let right = self.parse_multiplicative()?;
            left = Expr::Bin(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinOp::Mul,
                Some(Token::Slash) => BinOp::Div,
                _ => break,
            };
            self.advance();
            let right = self.parse_unary()?;
            left = Expr::Bin(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, String> {
        if matches!(self.peek(), Some(Token::Minus)) {
            self.advance();
            return Ok(Expr::Neg(Box::new(self.parse_unary()?)));
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Expr, String> {
        let mut base = self.parse_primary()?;
        loop {
            match self.peek() {
                Some(Token::Dot) => {
                    self.advance();
                    let name = match self.advance() {
                        Some(Token::Ident(n)) => n,
                        other => return Err(format!("expected identifier after '.', found {other:?}")),
                    };
                    if matches!(self.peek(), Some(Token::LParen)) {
                        let args = self.parse_args()?;
                        base = Expr::MethodCall(Box::new(base), name, args);
                    } else {
                        base = Expr::Member(Box::new(base), name);
                    }
                }
                _ => break,
            }
        }
        Ok(base)
    }

    fn parse_args(&mut self) -> Result<Vec<Expr>, String> {
        self.expect(&Token::LParen)?;
        let mut args = Vec::new();
        if !matches!(self.peek(), Some(Token::RParen)) {
            args.push(self.parse_or()?);
            while matches!(self.peek(), Some(Token::Comma)) {
                self.advance();
                args.push(self.parse_or()?);
            }
        }
        self.expect(&Token::RParen)?;
        Ok(args)
    }

    fn parse_primary(&mut self) -> Result<Expr, String> {
        match self.advance() {
            Some(Token::Number(n)) => Ok(Expr::Lit(Value::Float(n))),
            Some(Token::Str(s)) => Ok(Expr::Lit(Value::String(s))),
            Some(Token::LParen) => {
                let inner = self.parse_or()?;
                self.expect(&Token::RParen)?;
                Ok(inner)
            }
            Some(Token::Ident(name)) => {
                if matches!(self.peek(), Some(Token::LParen)) {
                    let args = self.parse_args()?;
                    Ok(Expr::Call(name, args))
                } else {
                    Ok(Expr::Ident(name))
                }
            }
            other => Err(format!("unexpected token {other:?}")),
        }
    }
}

// ---------------------------------------------------------------------
// Evaluator
// ---------------------------------------------------------------------

fn eval(expr: &Expr, env: &Environment) -> Result<Value, RuleError> {
    match expr {
        Expr::Lit(v) => Ok(v.clone()),
        Expr::Ident(name) => eval_ident(name, env),
        Expr::Member(base, field) => eval_member(base, field, env),
        Expr::Call(name, args) => eval_call(name, args, env),
        Expr::MethodCall(base, name, args) => eval_method_call(base, name, args, env),
        Expr::Not(inner) => {
            let v = eval(inner, env)?;
            let b = v
                .as_bool()
                .ok_or_else(|| RuleError::TypeError("NOT applied to non-bool".to_string()))?;
            Ok(Value::Bool(!b))
        }
        Expr::Neg(inner) => {
            let v = eval(inner, env)?;
            let f = v
                .as_float()
                .ok_or_else(|| RuleError::TypeError("unary '-' applied to non-numeric".to_string()))?;
            Ok(Value::Float(-f))
        }
        Expr::Bin(op, left, right) => eval_bin(*op, left, right, env),
    }
}

fn eval_ident(name: &str, env: &Environment) -> Result<Value, RuleError> {
    match name {
        "ID" => Ok(Value::String(env.device_id.to_string())),
        "utc" | "local" => Ok(Value::String(name.to_string())),
        _ => env
            .knowledge
            .get(name)
            .cloned()
            .ok_or_else(|| RuleError::UnknownIdentifier(name.to_string())),
    }
}

fn eval_member(base: &Expr, field: &str, env: &Environment) -> Result<Value, RuleError> {
    if let Expr::Ident(ident) = base {
        if ident == "utc" || ident == "local" {
            return Ok(Value::Int(time_field(field, ident == "local", env.now)?));
        }
    }
    let value = eval(base, env)?;
    match value {
        Value::Map(m) => m
            .get(field)
            .cloned()
            .ok_or_else(|| RuleError::UnknownIdentifier(field.to_string())),
        _ => Err(RuleError::TypeError(format!("cannot access member '{field}' on non-map"))),
    }
}

fn time_field(field: &str, local: bool, now_utc: DateTime<Utc>) -> Result<i64, RuleError> {
    macro_rules! pick {
        ($utc_expr:expr, $local_expr:expr) => {
            if local {
                let now: DateTime<Local> = now_utc.into();
                $local_expr(now)
            } else {
                $utc_expr(now_utc)
            }
        };
    }
    let value = match field.to_ascii_lowercase().as_str() {
        "second" => pick!(|t: DateTime<Utc>| t.second() as i64, |t: DateTime<Local>| t.second() as i64),
        "minute" => pick!(|t: DateTime<Utc>| t.minute() as i64, |t: DateTime<Local>| t.minute() as i64),
        "hour" => pick!(|t: DateTime<Utc>| t.hour() as i64, |t: DateTime<Local>| t.hour() as i64),
        "dayofweek" => pick!(
            |t: DateTime<Utc>| t.weekday().num_days_from_sunday() as i64,
            |t: DateTime<Local>| t.weekday().num_days_from_sunday() as i64
        ),
        "day" => pick!(|t: DateTime<Utc>| t.day() as i64, |t: DateTime<Local>| t.day() as i64),
        "month" => pick!(|t: DateTime<Utc>| t.month() as i64, |t: DateTime<Local>| t.month() as i64),
        other => return Err(RuleError::UnknownIdentifier(format!("utc.{other}"))),
    };
    Ok(value)
}

/// Free-function predicates: `Equal`, `GreaterThan`, `LessThan` each
/// parse their string argument as an integer when possible, otherwise
/// fall back to string comparison.
fn eval_call(name: &str, args: &[Expr], env: &Environment) -> Result<Value, RuleError> {
    if args.len() != 2 {
        return Err(RuleError::TypeError(format!("{name} expects 2 arguments")));
    }
    let a = eval(&args[0], env)?;
    let b = eval(&args[1], env)?;
    match name {
        "Equal" => Ok(Value::Bool(compare_lenient(&a, &b) == std::cmp::Ordering::Equal)),
        "GreaterThan" => Ok(Value::Bool(compare_lenient(&a, &b) == std::cmp::Ordering::Greater)),
        "LessThan" => Ok(Value::Bool(compare_lenient(&a, &b) == std::cmp::Ordering::Less)),
        other => Err(RuleError::UnknownIdentifier(other.to_string())),
    }
}

fn eval_method_call(base: &Expr, name: &str, args: &[Expr], env: &Environment) -> Result<Value, RuleError> {
    let receiver = eval(base, env)?;
    match name {
        "Contains" => {
            if args.len() != 1 {
                return Err(RuleError::TypeError("Contains expects 1 argument".to_string()));
            }
            let needle = eval(&args[0], env)?;
            Ok(Value::Bool(contains(&receiver, &needle)))
        }
        other => Err(RuleError::UnknownIdentifier(format!("method {other}"))),
    }
}

fn contains(receiver: &Value, needle: &Value) -> bool {
    match receiver {
        Value::List(items) => items.iter().any(|item| item.to_string() == needle.to_string()),
        Value::String(s) => s.contains(&needle.to_string()),
        _ => false,
    }
}

/// Coerces each side before comparing: string operands are parsed as
/// integers when possible.
fn compare_lenient(a: &Value, b: &Value) -> std::cmp::Ordering {
    let norm = |v: &Value| -> Value {
        match v {
            Value::String(s) => Value::parse_int_or_self(s),
            other => other.clone(),
        }
    };
    let (a, b) = (norm(a), norm(b));
    match (a.as_float(), b.as_float()) {
        (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(std::cmp::Ordering::Equal),
        _ => a.to_string().cmp(&b.to_string()),
    }
}

fn eval_bin(op: BinOp, left: &Expr, right: &Expr, env: &Environment) -> Result<Value, RuleError> {
    if matches!(op, BinOp::And | BinOp::Or) {
        let l = eval(left, env)?
            .as_bool()
            .ok_or_else(|| RuleError::TypeError("logical operator applied to non-bool".to_string()))?;
        return match op {
            BinOp::And => {
                if !l {
                    Ok(Value::Bool(false))
                } else {
                    Ok(Value::Bool(eval(right, env)?.as_bool().unwrap_or(false)))
                }
            }
            BinOp::Or => {
                if l {
                    Ok(Value::Bool(true))
                } else {
                    Ok(Value::Bool(eval(right, env)?.as_bool().unwrap_or(false)))
                }
            }
            _ => unreachable!(),
        };
    }

    let l = eval(left, env)?;
    let r = eval(right, env)?;

    match op {
        BinOp::Eq => Ok(Value::Bool(compare_lenient(&l, &r) == std::cmp::Ordering::Equal)),
        BinOp::Ne => Ok(Value::Bool(compare_lenient(&l, &r) != std::cmp::Ordering::Equal)),
        BinOp::Gt => Ok(Value::Bool(compare_lenient(&l, &r) == std::cmp::Ordering::Greater)),
        BinOp::Lt => Ok(Value::Bool(compare_lenient(&l, &r) == std::cmp::Ordering::Less)),
        BinOp::Ge => Ok(Value::Bool(compare_lenient(&l, &r) != std::cmp::Ordering::Less)),
        BinOp::Le => Ok(Value::Bool(compare_lenient(&l, &r) != std::cmp::Ordering::Greater)),
        BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div => {
            let x = l
                .as_float()
                .ok_or_else(|| RuleError::TypeError("arithmetic on non-numeric".to_string()))?;
            let y = r
                .as_float()
                .ok_or_else(|| RuleError::TypeError("arithmetic on non-numeric".to_string()))?;
            let result = match op {
                BinOp::Add => x + y,
                BinOp::Sub => x - y,
                BinOp::Mul => x * y,
                BinOp::Div => x / y,
                _ => unreachable!(),
            };
            Ok(Value::Float(result))
        }
        BinOp::And | BinOp::Or => unreachable!(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn env(knowledge: &Record) -> Environment {
        Environment {
            knowledge,
            device_id: "D01",
            now: Utc.with_ymd_and_hms(2026, 1, 5, 10, 30, 0).unwrap(),
        }
    }

    #[test]
    fn comparison_and_logical_operators() {
        let mut k = Record::new();
        k.insert("sensor1_temp".to_string(), Value::Float(42.0));
        let expr = compile("sensor1_temp > 40 AND sensor1_temp < 50").unwrap();
        assert!(expr.eval_bool(&env(&k)).unwrap());
    }

    #[test]
    fn contains_method_call_on_list() {
        let mut k = Record::new();
        k.insert(
            "addresses".to_string(),
            Value::List(vec![Value::String("D01".into()), Value::String("D02".into())]),
        );
        let expr = compile("addresses.Contains(ID)").unwrap();
        assert!(expr.eval_bool(&env(&k)).unwrap());
    }

    #[test]
    fn equal_predicate_falls_back_to_string_comparison() {
        let k = Record::new();
        let expr = compile(r#"Equal("Monday", "Monday")"#).unwrap();
        assert!(expr.eval_bool(&env(&k)).unwrap());
    }

    #[test]
    fn utc_day_of_week_member_access() {
        let k = Record::new();
        // 2026-01-05 is a Monday -> num_days_from_sunday == 1
        let expr = compile("utc.dayofweek == 1").unwrap();
        assert!(expr.eval_bool(&env(&k)).unwrap());
    }

    #[test]
    fn unknown_identifier_is_a_rule_error() {
        let k = Record::new();
        let expr = compile("missing_key == 1").unwrap();
        let err = expr.eval_bool(&env(&k)).unwrap_err();
        assert!(matches!(err, RuleError::UnknownIdentifier(_)));
    }
}
