//! Expression DAG core: arena storage, operator handlers, canonical
//! simplification, evaluation, differentiation, interval evaluation,
//! common-subexpression elimination, locks, printing, and parsing.
//!
//! Expressions are nodes in a shared arena ([`ExprStore`]) addressed by
//! [`ExprId`] handles; every operator is a registered [`ExprHandler`]
//! plugin, and the eight builtins (var, val, sum, product, pow, exp, log,
//! abs) cover the polynomial-and-transcendental core. New operators hook
//! in through [`ExprHandlers::register`] without touching this crate.

pub mod cse;
pub mod eval;
pub mod handler;
pub mod locks;
pub mod operators;
pub mod order;
pub mod parser;
pub mod print;
pub mod simplify;
pub mod store;
pub mod types;
pub mod walk;

pub use cse::replace_common_subexprs;
pub use eval::{compute_curvature, compute_integrality, eval, gradient, inteval, inteval_node};
pub use handler::{
    BuiltinIds, ChildTightenings, ExprHandler, ExprHandlers, HdlrPhase, HdlrStats, LinEstimate,
};
pub use locks::{add_locks, remove_locks};
pub use order::{compare_exprs, exprs_equal};
pub use parser::{parse_constraint, parse_expr, ParseError, Parser};
pub use print::print_expr;
pub use simplify::{simplify, SimplifyCtx};
pub use store::{ExprPayload, ExprStore};
pub use types::{Curvature, ExprId, HdlrId, Monotonicity, SolPoint, VarId, VarType};
pub use walk::{post_order, walk, WalkCmd, WalkStage};
