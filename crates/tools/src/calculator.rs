//! Calculate command: evaluates arithmetic expressions.
//!
//! Supports `+ - * / % ^`, parentheses, unary minus and decimals through a
//! small recursive-descent parser.

use async_trait::async_trait;
use relaymind_core::command::{
    Arguments, Command, CommandDescriptor, CommandModule, CommandOutput, InjectedContext,
    ParamSpec, ParamType,
};
use relaymind_core::error::CommandError;
use std::sync::Arc;

pub struct Calculate {
    descriptor: CommandDescriptor,
}

impl Calculate {
    pub fn new() -> Self {
        Self {
            descriptor: CommandDescriptor::new(
                "Calculate",
                "Evaluate an arithmetic expression. Supports + - * / % ^, parentheses and decimals.",
                vec![
                    ParamSpec::required("expression", ParamType::String, "Expression, e.g. '(2 + 3) * 4'"),
                    ParamSpec::optional("precision", ParamType::Integer, "Decimal places to round to"),
                ],
            ),
        }
    }
}

impl Default for Calculate {
    fn default() -> Self {
        Self::new()
    }
}

/// Module wrapper so the calculator registers like any other tool module.
pub struct MathModule;

impl CommandModule for MathModule {
    fn name(&self) -> &str {
        "math"
    }

    fn commands(&self) -> Vec<Arc<dyn Command>> {
        vec![Arc::new(Calculate::new())]
    }
}

fn format_number(value: f64, precision: Option<i64>) -> String {
    if let Some(p) = precision {
        let p = p.clamp(0, 12) as usize;
        return format!("{value:.p$}");
    }
    // Integers print without a trailing ".0"
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

#[async_trait]
impl Command for Calculate {
    fn descriptor(&self) -> &CommandDescriptor {
        &self.descriptor
    }

    async fn call(
        &self,
        arguments: Arguments,
        _context: &InjectedContext,
    ) -> Result<CommandOutput, CommandError> {
        let expr = arguments
            .get("expression")
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        let precision = arguments.get("precision").and_then(|v| v.as_i64());

        let value = evaluate(expr).map_err(|reason| CommandError::ExecutionFailed {
            command: "Calculate".into(),
            reason,
        })?;
        Ok(CommandOutput::text(format_number(value, precision))
            .with_data(serde_json::json!({"result": value})))
    }
}

// --- Recursive-descent evaluator ---

/// Evaluate an arithmetic expression string.
pub fn evaluate(expr: &str) -> Result<f64, String> {
    let tokens = tokenize(expr)?;
    let mut parser = Parser { tokens: &tokens, pos: 0 };
    let result = parser.parse_expr()?;
    if let Some(tok) = parser.tokens.get(parser.pos) {
        return Err(format!("Unexpected token at position {}: {tok:?}", parser.pos));
    }
    if !result.is_finite() {
        return Err("Result is not a finite number".into());
    }
    Ok(result)
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Token {
    Number(f64),
    Op(char),
    LParen,
    RParen,
}

fn tokenize(input: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        match c {
            c if c.is_whitespace() => {}
            '+' | '-' | '*' | '/' | '%' | '^' => tokens.push(Token::Op(c)),
            '×' => tokens.push(Token::Op('*')),
            '÷' => tokens.push(Token::Op('/')),
            '(' => tokens.push(Token::LParen),
            ')' => tokens.push(Token::RParen),
            c if c.is_ascii_digit() || c == '.' => {
                let mut end = i + c.len_utf8();
                while let Some(&(j, d)) = chars.peek() {
                    if d.is_ascii_digit() || d == '.' {
                        end = j + d.len_utf8();
                        chars.next();
                    } else {
                        break;
                    }
                }
                let literal = &input[i..end];
                let num: f64 = literal
                    .parse()
                    .map_err(|_| format!("Invalid number: {literal}"))?;
                tokens.push(Token::Number(num));
            }
            c => return Err(format!("Unexpected character: '{c}'")),
        }
    }

    Ok(tokens)
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
}

impl Parser<'_> {
    fn peek_op(&self) -> Option<char> {
        match self.tokens.get(self.pos) {
            Some(Token::Op(c)) => Some(*c),
            _ => None,
        }
    }

    fn next(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).copied();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    // expr = term (('+' | '-') term)*
    fn parse_expr(&mut self) -> Result<f64, String> {
        let mut left = self.parse_term()?;
        while let Some(op @ ('+' | '-')) = self.peek_op() {
            self.pos += 1;
            let right = self.parse_term()?;
            left = if op == '+' { left + right } else { left - right };
        }
        Ok(left)
    }

    // term = unary (('*' | '/' | '%') unary)*
    fn parse_term(&mut self) -> Result<f64, String> {
        let mut left = self.parse_unary()?;
        while let Some(op @ ('*' | '/' | '%')) = self.peek_op() {
            self.pos += 1;
            let right = self.parse_unary()?;
            left = match op {
                '*' => left * right,
                _ if right == 0.0 => return Err("Division by zero".into()),
                '/' => left / right,
                _ => left % right,
            };
        }
        Ok(left)
    }

    // unary = '-' unary | power
    fn parse_unary(&mut self) -> Result<f64, String> {
        if self.peek_op() == Some('-') {
            self.pos += 1;
            return Ok(-self.parse_unary()?);
        }
        self.parse_power()
    }

    // power = primary ('^' unary)?   (right-associative)
    fn parse_power(&mut self) -> Result<f64, String> {
        let base = self.parse_primary()?;
        if self.peek_op() == Some('^') {
            self.pos += 1;
            let exponent = self.parse_unary()?;
            return Ok(base.powf(exponent));
        }
        Ok(base)
    }

    // primary = NUMBER | '(' expr ')'
    fn parse_primary(&mut self) -> Result<f64, String> {
        match self.next() {
            Some(Token::Number(n)) => Ok(n),
            Some(Token::LParen) => {
                let val = self.parse_expr()?;
                match self.next() {
                    Some(Token::RParen) => Ok(val),
                    _ => Err("Expected closing parenthesis".into()),
                }
            }
            Some(tok) => Err(format!("Unexpected token: {tok:?}")),
            None => Err("Unexpected end of expression".into()),
        }
    }
}
