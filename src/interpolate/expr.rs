//! Expression language for `${{ … }}` template markers
//!
//! A small JavaScript-flavoured subset: literals, identifiers resolved
//! against the environment snapshot, member access, arithmetic, comparison,
//! logical operators and the ternary. Values are plain JSON values.

use serde_json::{Map, Number, Value};
use thiserror::Error;

/// Failure to parse or evaluate a template expression
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExprError {
    /// Character that cannot start any token
    #[error("unexpected character `{found}` at offset {offset} in `{expr}`")]
    UnexpectedChar {
        /// Expression text
        expr: String,
        /// Offending character
        found: char,
        /// Character offset
        offset: usize,
    },

    /// String literal without a closing quote
    #[error("unterminated string literal in `{expr}`")]
    UnterminatedString {
        /// Expression text
        expr: String,
    },

    /// Token in a position the grammar does not allow
    #[error("unexpected {found} in `{expr}`")]
    UnexpectedToken {
        /// Expression text
        expr: String,
        /// Description of the token
        found: String,
    },

    /// Top-level identifier missing from the environment
    #[error("`{name}` is not defined")]
    UnknownVariable {
        /// Identifier name
        name: String,
    },

    /// Division or modulo by zero
    #[error("division by zero")]
    DivisionByZero,

    /// Arithmetic produced NaN or an infinity
    #[error("non-finite numeric result")]
    NonFinite,
}

type Result<T> = std::result::Result<T, ExprError>;

const PUNCTUATORS: &[&str] = &[
    "===", "!==", "==", "!=", "<=", ">=", "&&", "||", "??", "(", ")", "[", "]", ".", ",", "?",
    ":", "+", "-", "*", "/", "%", "!", "<", ">",
];

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Num(f64),
    Str(String),
    Ident(String),
    Punct(&'static str),
    End,
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Self::Num(n) => format!("number `{n}`"),
            Self::Str(s) => format!("string `{s}`"),
            Self::Ident(name) => format!("identifier `{name}`"),
            Self::Punct(p) => format!("`{p}`"),
            Self::End => "end of expression".to_string(),
        }
    }
}

fn tokenize(expr: &str) -> Result<Vec<Token>> {
    let chars: Vec<char> = expr.chars().collect();
    let len = chars.len();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < len {
        let c = chars[i];

        if c.is_whitespace() {
            i += 1;
            continue;
        }

        if c.is_ascii_digit() || (c == '.' && chars.get(i + 1).is_some_and(char::is_ascii_digit))
        {
            let start = i;
            while i < len && (chars[i].is_ascii_digit() || chars[i] == '.') {
                i += 1;
            }
            if i < len && (chars[i] == 'e' || chars[i] == 'E') {
                let mut j = i + 1;
                if j < len && (chars[j] == '+' || chars[j] == '-') {
                    j += 1;
                }
                if j < len && chars[j].is_ascii_digit() {
                    i = j;
                    while i < len && chars[i].is_ascii_digit() {
                        i += 1;
                    }
                }
            }
            let text: String = chars[start..i].iter().collect();
            let n = text.parse::<f64>().map_err(|_| ExprError::UnexpectedToken {
                expr: expr.to_string(),
                found: format!("number `{text}`"),
            })?;
            tokens.push(Token::Num(n));
            continue;
        }

        if c == '\'' || c == '"' || c == '`' {
            i += 1;
            let mut text = String::new();
            let mut closed = false;
            while i < len {
                let ch = chars[i];
                i += 1;
                if ch == c {
                    closed = true;
                    break;
                }
                if ch == '\\' {
                    if let Some(&escaped) = chars.get(i) {
                        i += 1;
                        text.push(match escaped {
                            'n' => '\n',
                            't' => '\t',
                            'r' => '\r',
                            '0' => '\0',
                            other => other,
                        });
                    }
                    continue;
                }
                text.push(ch);
            }
            if !closed {
                return Err(ExprError::UnterminatedString {
                    expr: expr.to_string(),
                });
            }
            tokens.push(Token::Str(text));
            continue;
        }

        if c.is_alphabetic() || c == '_' || c == '$' {
            let start = i;
            while i < len && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '$') {
                i += 1;
            }
            tokens.push(Token::Ident(chars[start..i].iter().collect()));
            continue;
        }

        let ahead: String = chars[i..(i + 3).min(len)].iter().collect();
        if let Some(p) = PUNCTUATORS.iter().find(|p| ahead.starts_with(**p)) {
            tokens.push(Token::Punct(*p));
            i += p.len();
            continue;
        }

        return Err(ExprError::UnexpectedChar {
            expr: expr.to_string(),
            found: c,
            offset: i,
        });
    }

    tokens.push(Token::End);
    Ok(tokens)
}

#[derive(Debug, Clone)]
enum Expr {
    Literal(Value),
    Var(String),
    Array(Vec<Expr>),
    Member(Box<Expr>, Box<Expr>),
    Unary(&'static str, Box<Expr>),
    Binary(&'static str, Box<Expr>, Box<Expr>),
    Logical(&'static str, Box<Expr>, Box<Expr>),
    Conditional(Box<Expr>, Box<Expr>, Box<Expr>),
}

struct Parser<'a> {
    expr: &'a str,
    tokens: Vec<Token>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(expr: &'a str) -> Result<Self> {
        Ok(Self {
            expr,
            tokens: tokenize(expr)?,
            pos: 0,
        })
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.pos]
    }

    fn advance(&mut self) -> Token {
        let token = self.tokens[self.pos].clone();
        if token != Token::End {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, punct: &str) -> bool {
        if matches!(self.peek(), Token::Punct(p) if *p == punct) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, punct: &str) -> Result<()> {
        if self.eat(punct) {
            Ok(())
        } else {
            Err(self.unexpected(self.peek()))
        }
    }

    fn unexpected(&self, token: &Token) -> ExprError {
        ExprError::UnexpectedToken {
            expr: self.expr.to_string(),
            found: token.describe(),
        }
    }

    fn parse(mut self) -> Result<Expr> {
        let expr = self.conditional()?;
        if *self.peek() == Token::End {
            Ok(expr)
        } else {
            Err(self.unexpected(self.peek()))
        }
    }

    fn conditional(&mut self) -> Result<Expr> {
        let test = self.logical(&["??"], Self::or)?;
        if self.eat("?") {
            let then = self.conditional()?;
            self.expect(":")?;
            let otherwise = self.conditional()?;
            return Ok(Expr::Conditional(
                Box::new(test),
                Box::new(then),
                Box::new(otherwise),
            ));
        }
        Ok(test)
    }

    fn or(&mut self) -> Result<Expr> {
        self.logical(&["||"], Self::and)
    }

    fn and(&mut self) -> Result<Expr> {
        self.logical(&["&&"], Self::equality)
    }

    fn equality(&mut self) -> Result<Expr> {
        self.binary(&["===", "!==", "==", "!="], Self::comparison)
    }

    fn comparison(&mut self) -> Result<Expr> {
        self.binary(&["<=", ">=", "<", ">"], Self::additive)
    }

    fn additive(&mut self) -> Result<Expr> {
        self.binary(&["+", "-"], Self::multiplicative)
    }

    fn multiplicative(&mut self) -> Result<Expr> {
        self.binary(&["*", "/", "%"], Self::unary)
    }

    fn logical(
        &mut self,
        ops: &[&'static str],
        next: fn(&mut Self) -> Result<Expr>,
    ) -> Result<Expr> {
        let mut left = next(self)?;
        while let Some(op) = ops.iter().copied().find(|op| self.eat(op)) {
            let right = next(self)?;
            left = Expr::Logical(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn binary(
        &mut self,
        ops: &[&'static str],
        next: fn(&mut Self) -> Result<Expr>,
    ) -> Result<Expr> {
        let mut left = next(self)?;
        while let Some(op) = ops.iter().copied().find(|op| self.eat(op)) {
            let right = next(self)?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Expr> {
        for op in ["!", "-", "+"] {
            if self.eat(op) {
                return Ok(Expr::Unary(op, Box::new(self.unary()?)));
            }
        }
        self.postfix()
    }

    fn postfix(&mut self) -> Result<Expr> {
        let mut expr = self.primary()?;
        loop {
            if self.eat(".") {
                match self.advance() {
                    Token::Ident(name) => {
                        expr = Expr::Member(
                            Box::new(expr),
                            Box::new(Expr::Literal(Value::String(name))),
                        );
                    }
                    other => return Err(self.unexpected(&other)),
                }
            } else if self.eat("[") {
                let index = self.conditional()?;
                self.expect("]")?;
                expr = Expr::Member(Box::new(expr), Box::new(index));
            } else {
                return Ok(expr);
            }
        }
    }

    fn primary(&mut self) -> Result<Expr> {
        match self.advance() {
            Token::Num(n) => Ok(Expr::Literal(number(n)?)),
            Token::Str(s) => Ok(Expr::Literal(Value::String(s))),
            Token::Ident(name) => Ok(match name.as_str() {
                "true" => Expr::Literal(Value::Bool(true)),
                "false" => Expr::Literal(Value::Bool(false)),
                "null" | "undefined" => Expr::Literal(Value::Null),
                _ => Expr::Var(name),
            }),
            Token::Punct("(") => {
                let inner = self.conditional()?;
                self.expect(")")?;
                Ok(inner)
            }
            Token::Punct("[") => {
                let mut items = Vec::new();
                if self.eat("]") {
                    return Ok(Expr::Array(items));
                }
                loop {
                    items.push(self.conditional()?);
                    if self.eat(",") {
                        continue;
                    }
                    self.expect("]")?;
                    return Ok(Expr::Array(items));
                }
            }
            other => Err(self.unexpected(&other)),
        }
    }
}

/// Parse and evaluate `expr` against `env`
///
/// # Errors
///
/// Returns error on syntax errors, unknown top-level identifiers, division
/// by zero and non-finite arithmetic
pub fn evaluate(expr: &str, env: &Map<String, Value>) -> Result<Value> {
    let ast = Parser::new(expr)?.parse()?;
    eval(&ast, env)
}

fn eval(expr: &Expr, env: &Map<String, Value>) -> Result<Value> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Var(name) => env
            .get(name)
            .cloned()
            .ok_or_else(|| ExprError::UnknownVariable { name: name.clone() }),
        Expr::Array(items) => items
            .iter()
            .map(|item| eval(item, env))
            .collect::<Result<Vec<_>>>()
            .map(Value::Array),
        Expr::Member(object, key) => Ok(member(&eval(object, env)?, &eval(key, env)?)),
        Expr::Unary(op, operand) => {
            let value = eval(operand, env)?;
            match *op {
                "!" => Ok(Value::Bool(!truthy(&value))),
                "-" => number(-to_number(&value)),
                _ => number(to_number(&value)),
            }
        }
        Expr::Logical(op, left, right) => {
            let left = eval(left, env)?;
            let take_left = match *op {
                "&&" => !truthy(&left),
                "||" => truthy(&left),
                _ => !left.is_null(),
            };
            if take_left { Ok(left) } else { eval(right, env) }
        }
        Expr::Conditional(test, then, otherwise) => {
            if truthy(&eval(test, env)?) {
                eval(then, env)
            } else {
                eval(otherwise, env)
            }
        }
        Expr::Binary(op, left, right) => binary(op, &eval(left, env)?, &eval(right, env)?),
    }
}

fn binary(op: &str, left: &Value, right: &Value) -> Result<Value> {
    match op {
        "+" => {
            if is_stringish(left) || is_stringish(right) {
                Ok(Value::String(format!("{}{}", display(left), display(right))))
            } else {
                number(to_number(left) + to_number(right))
            }
        }
        "-" => number(to_number(left) - to_number(right)),
        "*" => number(to_number(left) * to_number(right)),
        "/" | "%" => {
            let divisor = to_number(right);
            if divisor == 0.0 {
                return Err(ExprError::DivisionByZero);
            }
            let dividend = to_number(left);
            number(if op == "/" {
                dividend / divisor
            } else {
                dividend % divisor
            })
        }
        "<" | "<=" | ">" | ">=" => Ok(Value::Bool(compare(op, left, right))),
        "===" => Ok(Value::Bool(strict_eq(left, right))),
        "!==" => Ok(Value::Bool(!strict_eq(left, right))),
        "==" => Ok(Value::Bool(loose_eq(left, right))),
        _ => Ok(Value::Bool(!loose_eq(left, right))),
    }
}

fn member(object: &Value, key: &Value) -> Value {
    match (object, key) {
        (Value::Object(map), key) => map.get(&display(key)).cloned().unwrap_or(Value::Null),
        (Value::Array(items), Value::String(k)) if k == "length" => Value::from(items.len()),
        (Value::Array(items), Value::Number(n)) => index_of(n)
            .and_then(|i| items.get(i))
            .cloned()
            .unwrap_or(Value::Null),
        (Value::String(s), Value::String(k)) if k == "length" => Value::from(s.chars().count()),
        (Value::String(s), Value::Number(n)) => index_of(n)
            .and_then(|i| s.chars().nth(i))
            .map_or(Value::Null, |c| Value::String(c.to_string())),
        _ => Value::Null,
    }
}

fn index_of(n: &Number) -> Option<usize> {
    n.as_u64().and_then(|i| usize::try_from(i).ok())
}

const fn is_stringish(value: &Value) -> bool {
    matches!(value, Value::String(_) | Value::Array(_) | Value::Object(_))
}

fn compare(op: &str, left: &Value, right: &Value) -> bool {
    if let (Value::String(a), Value::String(b)) = (left, right) {
        return match op {
            "<" => a < b,
            "<=" => a <= b,
            ">" => a > b,
            _ => a >= b,
        };
    }
    let (a, b) = (to_number(left), to_number(right));
    match op {
        "<" => a < b,
        "<=" => a <= b,
        ">" => a > b,
        _ => a >= b,
    }
}

fn strict_eq(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => left == right,
    }
}

fn loose_eq(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Null, Value::Null) => true,
        (Value::Null, _) | (_, Value::Null) => false,
        (Value::Array(_) | Value::Object(_), _) | (_, Value::Array(_) | Value::Object(_)) => {
            strict_eq(left, right)
        }
        _ if std::mem::discriminant(left) == std::mem::discriminant(right) => {
            strict_eq(left, right)
        }
        _ => to_number(left) == to_number(right),
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn number(n: f64) -> Result<Value> {
    if !n.is_finite() {
        return Err(ExprError::NonFinite);
    }
    if n.fract() == 0.0 && n.abs() < (1_u64 << 53) as f64 {
        return Ok(Value::from(n as i64));
    }
    Number::from_f64(n)
        .map(Value::Number)
        .ok_or(ExprError::NonFinite)
}

fn to_number(value: &Value) -> f64 {
    match value {
        Value::Null => 0.0,
        Value::Bool(b) => f64::from(u8::from(*b)),
        Value::Number(n) => n.as_f64().unwrap_or(f64::NAN),
        Value::String(s) if s.trim().is_empty() => 0.0,
        Value::String(s) => s.trim().parse().unwrap_or(f64::NAN),
        Value::Array(_) | Value::Object(_) => f64::NAN,
    }
}

/// JavaScript-style truthiness of a JSON value
#[must_use]
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Render a value the way it is substituted into a template
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
pub fn display(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::String(s) => s.clone(),
        Value::Number(n) => match n.as_f64() {
            Some(f) if n.is_f64() && f.fract() == 0.0 && f.abs() < (1_u64 << 53) as f64 => {
                (f as i64).to_string()
            }
            _ => n.to_string(),
        },
        Value::Array(items) => items.iter().map(display).collect::<Vec<_>>().join(","),
        Value::Object(_) => value.to_string(),
    }
}
