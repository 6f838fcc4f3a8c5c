//! Constraint engine over expression DAGs: constraint storage, nonlinear
//! handler detection, interval propagation, cut separation, branching
//! scores, and the watched-literal conjunction propagator.
//!
//! The engine talks to its host through the [`Driver`] trait: variable
//! bounds and types, solution values, LP rows, conflict sets, and
//! branching candidates all cross that seam. [`BasicDriver`] is a
//! vector-backed implementation for tests and standalone runs.

pub mod branch;
pub mod conjunction;
pub mod cons;
pub mod driver;
pub mod nlhdlr;
pub mod propagate;
pub mod quadratic;
pub mod rowprep;
pub mod separate;
pub mod stats;

pub use branch::EnforceResult;
pub use conjunction::{AndCons, Literal};
pub use cons::{ConsEngine, ConsError, Constraint, LinearForm};
pub use driver::{BasicDriver, CutRow, Driver, TightenResult};
pub use nlhdlr::{
    aux_value, aux_var_of, DefaultNlHdlr, Enfo, ExprTightenings, Methods, NlHdlr, NlHdlrExprData,
    NlHdlrId, NlHdlrStats, NlHdlrs,
};
pub use propagate::PropResult;
pub use quadratic::{detect_quadratic, BilinTerm, QuadForm, QuadVarTerm, QuadraticNlHdlr};
pub use rowprep::{CleanupError, RowPrep, SideType};
pub use separate::SepaResult;
pub use stats::{write_statistics, EngineStats};
