//! nlforge - an expression-constraint engine for mixed-integer nonlinear
//! programs: expression DAGs with reference-counted sharing, interval
//! propagation, linear-relaxation cuts, and branching-score computation.
//!
//! # Example
//!
//! ```rust
//! use nlforge::prelude::*;
//!
//! let mut engine = ConsEngine::new(EngineConfig::default());
//! let mut driver = BasicDriver::new();
//! let x = driver.add_var("x", -2.0, 2.0, VarType::Continuous);
//! let y = driver.add_var("y", -2.0, 2.0, VarType::Continuous);
//! let mut resolve = |name: &str| match name {
//!     "x" => Some((x, VarType::Continuous)),
//!     "y" => Some((y, VarType::Continuous)),
//!     _ => None,
//! };
//! engine
//!     .parse_cons("circle", "<x>^2 + <y>^2 <= 1", &mut resolve)
//!     .unwrap();
//!
//! assert_eq!(engine.propagate(&mut driver), PropResult::Reduced);
//! let (lb, ub) = driver.var_bounds(x);
//! assert!(lb >= -1.0 - 1e-4 && ub <= 1.0 + 1e-4);
//! ```

// Interval arithmetic
pub use nlforge_interval::{solve_univariate_quad, Interval, INTERVAL_INFINITY};

// Configuration
pub use nlforge_config::{EngineConfig, QuadraticConfig, SeparationConfig};

// Expression DAG, simplifier, parser, evaluators
pub use nlforge_expr::{
    compare_exprs, eval, exprs_equal, gradient, inteval, parse_constraint, parse_expr, print_expr,
    replace_common_subexprs, simplify, Curvature, ExprHandler, ExprHandlers, ExprId, ExprPayload,
    ExprStore, Monotonicity, ParseError, SolPoint, VarId, VarType,
};

// Constraint engine
pub use nlforge_cons::{
    write_statistics, AndCons, BasicDriver, ConsEngine, ConsError, Constraint, CutRow, Driver,
    EnforceResult, Literal, NlHdlr, NlHdlrs, PropResult, RowPrep, SepaResult, TightenResult,
};

pub mod prelude {
    pub use super::{
        BasicDriver, ConsEngine, Driver, EnforceResult, EngineConfig, Interval, PropResult,
        SepaResult, VarId, VarType,
    };
}
