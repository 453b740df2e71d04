//! Arithmetic expression parser.
//!
//! Grammar, loosest binding first:
//!
//! ```text
//! expr  := term (('+' | '-') term)*
//! term  := unary (('*' | '/' | '%') unary)*
//! unary := ('-' | '+') unary | power
//! power := atom ('^' unary)?          right associative: 2^3^2 = 2^(3^2)
//! atom  := number | call | constant | '(' expr ')'
//! call  := ident '(' expr (',' expr)* ')'
//! ```

use nom::{
    branch::alt,
    bytes::complete::tag,
    character::complete::{alpha1, alphanumeric0, char, digit0, digit1, multispace0, one_of},
    combinator::{map, map_res, opt, recognize},
    multi::{fold_many0, separated_list1},
    sequence::{delimited, pair, preceded},
    IResult,
};
use thiserror::Error;

/// Longest accepted expression, in bytes.
pub const MAX_EXPRESSION_LEN: usize = 4096;

/// Deepest accepted nesting of parentheses, signs or powers.
pub const MAX_NESTING: usize = 64;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("empty expression")]
    Empty,

    #[error("expression longer than {0} bytes")]
    TooLong(usize),

    #[error("expression nested deeper than {0} levels")]
    TooDeep(usize),

    #[error("unknown name '{0}'")]
    UnknownName(String),

    #[error("unexpected input at position {position}: '{found}'")]
    Unexpected { position: usize, found: String },
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
}

impl BinaryOp {
    pub fn symbol(self) -> char {
        match self {
            BinaryOp::Add => '+',
            BinaryOp::Sub => '-',
            BinaryOp::Mul => '*',
            BinaryOp::Div => '/',
            BinaryOp::Mod => '%',
            BinaryOp::Pow => '^',
        }
    }

    fn from_symbol(c: char) -> Option<Self> {
        Some(match c {
            '+' => BinaryOp::Add,
            '-' => BinaryOp::Sub,
            '*' => BinaryOp::Mul,
            '/' => BinaryOp::Div,
            '%' => BinaryOp::Mod,
            '^' => BinaryOp::Pow,
            _ => return None,
        })
    }
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Pos,
}

/// Named constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Constant {
    Pi,
    E,
    Tau,
}

impl Constant {
    pub fn name(self) -> &'static str {
        match self {
            Constant::Pi => "pi",
            Constant::E => "e",
            Constant::Tau => "tau",
        }
    }

    pub fn value(self) -> f64 {
        match self {
            Constant::Pi => std::f64::consts::PI,
            Constant::E => std::f64::consts::E,
            Constant::Tau => std::f64::consts::TAU,
        }
    }

    fn lookup(name: &str) -> Option<Self> {
        [Constant::Pi, Constant::E, Constant::Tau]
            .into_iter()
            .find(|c| c.name() == name)
    }
}

/// Built-in functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    Sin,
    Cos,
    Tan,
    Sqrt,
    Log,
    Max,
    Min,
    Pow,
}

impl Function {
    const ALL: [Function; 8] = [
        Function::Sin,
        Function::Cos,
        Function::Tan,
        Function::Sqrt,
        Function::Log,
        Function::Max,
        Function::Min,
        Function::Pow,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Function::Sin => "sin",
            Function::Cos => "cos",
            Function::Tan => "tan",
            Function::Sqrt => "sqrt",
            Function::Log => "log",
            Function::Max => "max",
            Function::Min => "min",
            Function::Pow => "pow",
        }
    }

    fn lookup(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.name() == name)
    }
}

/// Parsed expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Constant(Constant),
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Call {
        function: Function,
        args: Vec<Expr>,
    },
}

impl Expr {
    fn binary(op: BinaryOp, left: Expr, right: Expr) -> Self {
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }
}

/// Parses a complete expression.
pub fn parse(input: &str) -> Result<Expr, ParseError> {
    if input.trim().is_empty() {
        return Err(ParseError::Empty);
    }
    if input.len() > MAX_EXPRESSION_LEN {
        return Err(ParseError::TooLong(MAX_EXPRESSION_LEN));
    }
    check_nesting(input)?;

    let unexpected = |rest: &str| ParseError::Unexpected {
        position: input.len() - rest.len(),
        found: rest.chars().take(16).collect(),
    };

    match parse_expr(input) {
        Ok((rest, expr)) => {
            let rest = rest.trim_start();
            if rest.is_empty() {
                Ok(expr)
            } else {
                Err(unexpected(rest))
            }
        }
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => {
            if let Some(name) = unknown_name_at(e.input) {
                return Err(ParseError::UnknownName(name));
            }
            let rest = e.input.trim_start();
            if rest.is_empty() {
                Err(ParseError::Unexpected {
                    position: input.len(),
                    found: "end of input".to_string(),
                })
            } else {
                Err(unexpected(rest))
            }
        }
        Err(nom::Err::Incomplete(_)) => Err(unexpected("")),
    }
}

/// Bounds recursion depth before handing the input to the recursive parser.
///
/// Tracks how many parser frames are open at each character: one per
/// parenthesis, one per prefix sign and one per `^`. Signs and powers stay
/// open until a binary operator or `,` at the same level closes the operand.
fn check_nesting(input: &str) -> Result<(), ParseError> {
    let mut depth = 0usize;
    let mut levels: Vec<usize> = Vec::new();
    let mut prev: Option<char> = None;

    for c in input.chars().filter(|c| !c.is_whitespace()) {
        let prefix = prev.map_or(true, |p| "(+-*/^,".contains(p));
        match c {
            '(' => {
                levels.push(depth);
                depth += 1;
            }
            ')' => depth = levels.pop().unwrap_or(0),
            '^' => depth += 1,
            '-' | '+' if prefix => depth += 1,
            '+' | '-' | '*' | '/' | ',' => depth = levels.last().map_or(0, |&outer| outer + 1),
            _ => {}
        }
        if depth > MAX_NESTING {
            return Err(ParseError::TooDeep(MAX_NESTING));
        }
        prev = Some(c);
    }
    Ok(())
}

fn unknown_name_at(input: &str) -> Option<String> {
    let (_, name) = identifier(input.trim_start()).ok()?;
    let known = Constant::lookup(name).is_some() || Function::lookup(name).is_some();
    (!known).then(|| name.to_string())
}

// Numeric literal: 12, 1.5, .5, 3.
fn number(input: &str) -> IResult<&str, Expr> {
    map_res(
        alt((
            recognize(pair(digit1, opt(pair(char('.'), digit0)))),
            recognize(pair(char('.'), digit1)),
        )),
        |text: &str| text.parse::<f64>().map(Expr::Number),
    )(input)
}

fn identifier(input: &str) -> IResult<&str, &str> {
    recognize(pair(alpha1, alphanumeric0))(input)
}

fn constant(input: &str) -> IResult<&str, Expr> {
    map_res(identifier, |name| {
        Constant::lookup(name).map(Expr::Constant).ok_or(())
    })(input)
}

fn call(input: &str) -> IResult<&str, Expr> {
    let (input, function) = map_res(identifier, |name| Function::lookup(name).ok_or(()))(input)?;
    let (input, args) = delimited(
        preceded(multispace0, char('(')),
        separated_list1(preceded(multispace0, char(',')), parse_expr),
        preceded(multispace0, char(')')),
    )(input)?;

    Ok((input, Expr::Call { function, args }))
}

fn parens(input: &str) -> IResult<&str, Expr> {
    delimited(char('('), parse_expr, preceded(multispace0, char(')')))(input)
}

fn atom(input: &str) -> IResult<&str, Expr> {
    preceded(multispace0, alt((number, call, constant, parens)))(input)
}

fn power(input: &str) -> IResult<&str, Expr> {
    let (input, base) = atom(input)?;
    let (input, exponent) = opt(preceded(preceded(multispace0, tag("^")), unary))(input)?;

    let expr = match exponent {
        Some(exponent) => Expr::binary(BinaryOp::Pow, base, exponent),
        None => base,
    };
    Ok((input, expr))
}

fn unary(input: &str) -> IResult<&str, Expr> {
    alt((
        map(
            pair(preceded(multispace0, one_of("-+")), unary),
            |(sign, operand)| Expr::Unary {
                op: if sign == '-' { UnaryOp::Neg } else { UnaryOp::Pos },
                operand: Box::new(operand),
            },
        ),
        power,
    ))(input)
}

fn binary_chain<'a>(
    input: &'a str,
    operators: &'static str,
    operand: fn(&'a str) -> IResult<&'a str, Expr>,
) -> IResult<&'a str, Expr> {
    let (input, first) = operand(input)?;
    fold_many0(
        pair(preceded(multispace0, one_of(operators)), operand),
        move || first.clone(),
        |left, (symbol, right)| match BinaryOp::from_symbol(symbol) {
            Some(op) => Expr::binary(op, left, right),
            None => left,
        },
    )(input)
}

fn term(input: &str) -> IResult<&str, Expr> {
    binary_chain(input, "*/%", unary)
}

fn parse_expr(input: &str) -> IResult<&str, Expr> {
    binary_chain(input, "+-", term)
}
