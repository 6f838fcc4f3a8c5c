//! The standard operator handlers: variable and constant leaves, sums,
//! products, powers, and the unary functions exp, log, abs.

mod abs;
mod exp;
mod log;
mod pow;
mod product;
mod sum;
mod value;
mod var;

pub use abs::AbsHandler;
pub use exp::ExpHandler;
pub use log::LogHandler;
pub use pow::PowHandler;
pub use product::ProductHandler;
pub use sum::SumHandler;
pub use value::ValueHandler;
pub use var::VarHandler;

use nlforge_interval::Interval;
use smallvec::smallvec;

use crate::handler::LinEstimate;

/// Tangent estimator `f(x*) + f'(x*) (x - x*)` of a univariate function,
/// valid below a convex or above a concave graph.
pub(crate) fn tangent_estimate(x: f64, fx: f64, dfx: f64) -> Option<LinEstimate> {
    if !fx.is_finite() || !dfx.is_finite() {
        return None;
    }
    Some(LinEstimate {
        constant: fx - dfx * x,
        coefs: smallvec![dfx],
    })
}

/// Secant estimator through `(xl, f(xl))` and `(xu, f(xu))`, valid above a
/// convex or below a concave graph. Requires a finite, non-degenerate
/// child interval.
pub(crate) fn secant_estimate(iv: &Interval, f: impl Fn(f64) -> f64) -> Option<LinEstimate> {
    if !iv.inf.is_finite() || !iv.sup.is_finite() || iv.sup - iv.inf < 1e-12 {
        return None;
    }
    let fl = f(iv.inf);
    let fu = f(iv.sup);
    if !fl.is_finite() || !fu.is_finite() {
        return None;
    }
    let slope = (fu - fl) / (iv.sup - iv.inf);
    Some(LinEstimate {
        constant: fl - slope * iv.inf,
        coefs: smallvec![slope],
    })
}

/// Renders a floating-point constant the way the printer and the tests
/// expect: integral values without a trailing `.0`.
pub(crate) fn format_num(v: f64) -> String {
    if v == v.trunc() && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        format!("{}", v)
    }
}
