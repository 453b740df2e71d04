//! Computation engine.
//!
//! Parses arithmetic expressions, evaluates them with a step-by-step
//! trace, and serves results over the frame protocol. The proxy only
//! ever reaches this module through the network.

mod evaluator;
mod parser;
mod server;

pub use evaluator::{calculate, format_number, EngineError, LocalEvaluator};
pub use parser::{parse, BinaryOp, Constant, Expr, Function, ParseError, UnaryOp};
pub use server::{serve_connection, ComputationServer};
