//! Tree-walking evaluator that records one step per operation.

use async_trait::async_trait;
use thiserror::Error;

use crate::types::errors::EvalError;
use crate::types::responses::Evaluation;
use crate::upstream::Evaluator;

use super::parser::{self, BinaryOp, Expr, Function, ParseError, UnaryOp};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("division by zero in {0}")]
    DivisionByZero(String),

    #[error("{function} expects {expected} argument(s), got {got}")]
    Arity {
        function: &'static str,
        expected: &'static str,
        got: usize,
    },

    #[error("{0} is not a finite number")]
    NotFinite(String),
}

impl From<EngineError> for EvalError {
    fn from(err: EngineError) -> Self {
        EvalError::Malformed(err.to_string())
    }
}

/// Parses and evaluates `expression`.
///
/// Steps are listed in evaluation order, innermost operation first:
/// `(1+2)*4` yields `["1+2 = 3", "3*4 = 12"]`.
pub fn calculate(expression: &str) -> Result<Evaluation, EngineError> {
    let expr = parser::parse(expression)?;
    let mut steps = Vec::new();
    let value = eval(&expr, &mut steps)?;
    Ok(Evaluation::new(value, steps))
}

/// Formats a number the way steps and answers print it: integral values
/// drop the fractional part.
pub fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

fn format_operand(value: f64) -> String {
    if value < 0.0 {
        format!("({})", format_number(value))
    } else {
        format_number(value)
    }
}

fn finite(value: f64, what: impl FnOnce() -> String) -> Result<f64, EngineError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(EngineError::NotFinite(what()))
    }
}

fn eval(expr: &Expr, steps: &mut Vec<String>) -> Result<f64, EngineError> {
    match expr {
        Expr::Number(value) => Ok(*value),
        Expr::Constant(constant) => {
            let value = constant.value();
            steps.push(format!("{} = {}", constant.name(), format_number(value)));
            Ok(value)
        }
        Expr::Unary { op, operand } => {
            let value = eval(operand, steps)?;
            Ok(match op {
                UnaryOp::Neg => -value,
                UnaryOp::Pos => value,
            })
        }
        Expr::Binary { op, left, right } => {
            let lhs = eval(left, steps)?;
            let rhs = eval(right, steps)?;
            let text = format!("{}{}{}", format_operand(lhs), op.symbol(), format_operand(rhs));
            let result = apply_binary(*op, lhs, rhs, &text)?;
            let result = finite(result, || text.clone())?;
            steps.push(format!("{} = {}", text, format_number(result)));
            Ok(result)
        }
        Expr::Call { function, args } => {
            let values = args
                .iter()
                .map(|arg| eval(arg, steps))
                .collect::<Result<Vec<_>, _>>()?;
            let text = format!(
                "{}({})",
                function.name(),
                values.iter().map(|v| format_number(*v)).collect::<Vec<_>>().join(", ")
            );
            let result = apply_function(*function, &values)?;
            let result = finite(result, || text.clone())?;
            steps.push(format!("{} = {}", text, format_number(result)));
            Ok(result)
        }
    }
}

fn apply_binary(op: BinaryOp, lhs: f64, rhs: f64, text: &str) -> Result<f64, EngineError> {
    Ok(match op {
        BinaryOp::Add => lhs + rhs,
        BinaryOp::Sub => lhs - rhs,
        BinaryOp::Mul => lhs * rhs,
        BinaryOp::Div | BinaryOp::Mod if rhs == 0.0 => {
            return Err(EngineError::DivisionByZero(text.to_string()))
        }
        BinaryOp::Div => lhs / rhs,
        BinaryOp::Mod => lhs % rhs,
        BinaryOp::Pow => lhs.powf(rhs),
    })
}

fn arity(function: Function, expected: &'static str, got: usize) -> EngineError {
    EngineError::Arity {
        function: function.name(),
        expected,
        got,
    }
}

fn apply_function(function: Function, args: &[f64]) -> Result<f64, EngineError> {
    let unary = |f: fn(f64) -> f64| match args {
        [x] => Ok(f(*x)),
        _ => Err(arity(function, "1", args.len())),
    };

    match function {
        Function::Sin => unary(f64::sin),
        Function::Cos => unary(f64::cos),
        Function::Tan => unary(f64::tan),
        Function::Sqrt => unary(f64::sqrt),
        Function::Log => match args {
            [x] => Ok(x.ln()),
            [x, base] => Ok(x.log(*base)),
            _ => Err(arity(function, "1 or 2", args.len())),
        },
        Function::Pow => match args {
            [x, y] => Ok(x.powf(*y)),
            _ => Err(arity(function, "2", args.len())),
        },
        Function::Max => args
            .iter()
            .copied()
            .reduce(f64::max)
            .ok_or_else(|| arity(function, "at least 1", 0)),
        Function::Min => args
            .iter()
            .copied()
            .reduce(f64::min)
            .ok_or_else(|| arity(function, "at least 1", 0)),
    }
}

/// In-process [`Evaluator`] backed by [`calculate`].
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalEvaluator;

#[async_trait]
impl Evaluator for LocalEvaluator {
    fn name(&self) -> &str {
        "local"
    }

    async fn evaluate(&self, expression: &str) -> Result<Evaluation, EvalError> {
        Ok(calculate(expression)?)
    }
}
