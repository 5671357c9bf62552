//! Sandboxed arithmetic evaluator for polynomial fragility curves
//!
//! Formulas are compiled once into a small tagged AST and evaluated against
//! explicit variable bindings. Nothing outside the grammar below is callable.
//!
//! Grammar (`**` binds tighter than unary minus and associates right):
//!
//! ```text
//! expr  := term (('+' | '-') term)*
//! term  := unary (('*' | '/') unary)*
//! unary := ('+' | '-') unary | power
//! power := atom (('**' | '^') unary)?
//! atom  := number | ident | func '(' expr ')' | '(' expr ')'
//! func  := 'log' | 'exp' | 'sqrt'
//! ```

use crate::error::{FragilityError, FragilityResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Plus,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    Log,
    Exp,
    Sqrt,
}

impl Function {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "log" => Some(Function::Log),
            "exp" => Some(Function::Exp),
            "sqrt" => Some(Function::Sqrt),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Function::Log => "log",
            Function::Exp => "exp",
            Function::Sqrt => "sqrt",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(f64),
    Variable(String),
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Call {
        func: Function,
        arg: Box<Expr>,
    },
}

/// A compiled formula plus the text it came from (kept for error messages)
#[derive(Debug, Clone, PartialEq)]
pub struct Formula {
    source: String,
    root: Expr,
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    Pow,
    LParen,
    RParen,
}

impl Formula {
    /// Compile a formula string
    pub fn parse(source: &str) -> FragilityResult<Self> {
        let tokens = tokenize(source).map_err(|reason| formula_error(source, reason))?;
        if tokens.is_empty() {
            return Err(formula_error(source, "empty formula"));
        }
        let mut parser = Parser { tokens, pos: 0 };
        let root = parser.expr().map_err(|reason| formula_error(source, reason))?;
        if let Some(tok) = parser.peek() {
            return Err(formula_error(
                source,
                format!("unexpected token {:?} at position {}", tok, parser.pos),
            ));
        }
        Ok(Formula {
            source: source.to_string(),
            root,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn root(&self) -> &Expr {
        &self.root
    }

    /// Evaluate with the given variable bindings.
    ///
    /// Variables missing from `bindings` are reported as unresolved.
    pub fn evaluate(&self, bindings: &[(&str, f64)]) -> FragilityResult<f64> {
        eval(&self.root, bindings).map_err(|reason| formula_error(&self.source, reason))
    }
}

fn formula_error(source: &str, reason: impl Into<String>) -> FragilityError {
    FragilityError::FormulaEvaluation {
        formula: source.to_string(),
        reason: reason.into(),
    }
}

fn eval(expr: &Expr, bindings: &[(&str, f64)]) -> Result<f64, String> {
    match expr {
        Expr::Literal(v) => Ok(*v),
        Expr::Variable(name) => bindings
            .iter()
            .find(|(bound, _)| bound == name)
            .map(|(_, v)| *v)
            .ok_or_else(|| format!("unresolved variable `{}`", name)),
        Expr::Unary { op, operand } => {
            let v = eval(operand, bindings)?;
            Ok(match op {
                UnaryOp::Plus => v,
                UnaryOp::Neg => -v,
            })
        }
        Expr::Binary { op, lhs, rhs } => {
            let a = eval(lhs, bindings)?;
            let b = eval(rhs, bindings)?;
            apply_binary(*op, a, b)
        }
        Expr::Call { func, arg } => {
            let v = eval(arg, bindings)?;
            apply_function(*func, v)
        }
    }
}

fn apply_binary(op: BinaryOp, a: f64, b: f64) -> Result<f64, String> {
    match op {
        BinaryOp::Add => Ok(a + b),
        BinaryOp::Sub => Ok(a - b),
        BinaryOp::Mul => Ok(a * b),
        BinaryOp::Div => {
            if b == 0.0 {
                Err("division by zero".to_string())
            } else {
                Ok(a / b)
            }
        }
        BinaryOp::Pow => {
            if a == 0.0 && b < 0.0 {
                return Err("zero raised to a negative power".to_string());
            }
            if a < 0.0 && b.fract() != 0.0 {
                return Err("negative base with fractional exponent".to_string());
            }
            let v = a.powf(b);
            if v.is_infinite() && a.is_finite() && b.is_finite() {
                return Err("numerical result out of range".to_string());
            }
            Ok(v)
        }
    }
}

fn apply_function(func: Function, v: f64) -> Result<f64, String> {
    match func {
        Function::Log => {
            if v <= 0.0 {
                Err(format!("log domain error ({})", v))
            } else {
                Ok(v.ln())
            }
        }
        Function::Exp => {
            let r = v.exp();
            if r.is_infinite() && v.is_finite() {
                Err("exp overflow".to_string())
            } else {
                Ok(r)
            }
        }
        Function::Sqrt => {
            if v < 0.0 {
                Err(format!("sqrt domain error ({})", v))
            } else {
                Ok(v.sqrt())
            }
        }
    }
}

fn tokenize(src: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = src.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '+' => {
                tokens.push(Token::Plus);
                i += 1;
            }
            '-' => {
                tokens.push(Token::Minus);
                i += 1;
            }
            '*' => {
                if chars.get(i + 1) == Some(&'*') {
                    tokens.push(Token::Pow);
                    i += 2;
                } else {
                    tokens.push(Token::Star);
                    i += 1;
                }
            }
            '^' => {
                tokens.push(Token::Pow);
                i += 1;
            }
            '/' => {
                tokens.push(Token::Slash);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            c if c.is_ascii_digit() || c == '.' => {
                let (value, next) = lex_number(&chars, i)?;
                tokens.push(Token::Number(value));
                i = next;
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            other => return Err(format!("unexpected character `{}` at {}", other, i)),
        }
    }

    Ok(tokens)
}

/// Lex `digits [. digits] [(e|E) [+|-] digits]` starting at `start`.
fn lex_number(chars: &[char], start: usize) -> Result<(f64, usize), String> {
    let mut i = start;
    while i < chars.len() && chars[i].is_ascii_digit() {
        i += 1;
    }
    if i < chars.len() && chars[i] == '.' {
        i += 1;
        while i < chars.len() && chars[i].is_ascii_digit() {
            i += 1;
        }
    }
    if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
        let mut j = i + 1;
        if j < chars.len() && (chars[j] == '+' || chars[j] == '-') {
            j += 1;
        }
        if j < chars.len() && chars[j].is_ascii_digit() {
            while j < chars.len() && chars[j].is_ascii_digit() {
                j += 1;
            }
            i = j;
        }
    }
    let text: String = chars[start..i].iter().collect();
    text.parse::<f64>()
        .map(|v| (v, i))
        .map_err(|_| format!("invalid number `{}`", text))
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn expect(&mut self, want: Token) -> Result<(), String> {
        match self.next() {
            Some(tok) if tok == want => Ok(()),
            Some(tok) => Err(format!("expected {:?}, found {:?}", want, tok)),
            None => Err(format!("expected {:?}, found end of formula", want)),
        }
    }

    fn expr(&mut self) -> Result<Expr, String> {
        let mut lhs = self.term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.term()?;
            lhs = binary(op, lhs, rhs);
        }
    }

    fn term(&mut self) -> Result<Expr, String> {
        let mut lhs = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.unary()?;
            lhs = binary(op, lhs, rhs);
        }
    }

    fn unary(&mut self) -> Result<Expr, String> {
        let op = match self.peek() {
            Some(Token::Plus) => UnaryOp::Plus,
            Some(Token::Minus) => UnaryOp::Neg,
            _ => return self.power(),
        };
        self.pos += 1;
        let operand = self.unary()?;
        Ok(Expr::Unary {
            op,
            operand: Box::new(operand),
        })
    }

    fn power(&mut self) -> Result<Expr, String> {
        let base = self.atom()?;
        if matches!(self.peek(), Some(Token::Pow)) {
            self.pos += 1;
            // right-associative; exponent may carry its own sign
            let exponent = self.unary()?;
            return Ok(binary(BinaryOp::Pow, base, exponent));
        }
        Ok(base)
    }

    fn atom(&mut self) -> Result<Expr, String> {
        match self.next() {
            Some(Token::Number(v)) => Ok(Expr::Literal(v)),
            Some(Token::Ident(name)) => {
                if matches!(self.peek(), Some(Token::LParen)) {
                    let func = Function::from_name(&name)
                        .ok_or_else(|| format!("unknown function `{}`", name))?;
                    self.pos += 1;
                    let arg = self.expr()?;
                    self.expect(Token::RParen)?;
                    Ok(Expr::Call {
                        func,
                        arg: Box::new(arg),
                    })
                } else {
                    Ok(Expr::Variable(name))
                }
            }
            Some(Token::LParen) => {
                let inner = self.expr()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Some(tok) => Err(format!("unexpected token {:?}", tok)),
            None => Err("unexpected end of formula".to_string()),
        }
    }
}

fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
    Expr::Binary {
        op,
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
    }
}
