//! Handler for the natural logarithm.

use nlforge_interval::Interval;
use smallvec::smallvec;

use crate::handler::{ChildTightenings, ExprHandler, LinEstimate};
use crate::parser::{ParseError, Parser};
use crate::simplify::SimplifyCtx;
use crate::store::{ExprPayload, ExprStore};
use crate::types::{Curvature, ExprId, Monotonicity, SolPoint, VarId};

use super::{secant_estimate, tangent_estimate};

pub struct LogHandler;

impl ExprHandler for LogHandler {
    fn name(&self) -> &'static str {
        "log"
    }

    fn precedence(&self) -> u32 {
        40
    }

    fn eval(
        &self,
        _store: &ExprStore,
        _e: ExprId,
        child_vals: &[f64],
        _sol: &dyn SolPoint,
    ) -> Option<f64> {
        let v = child_vals[0];
        if v <= 0.0 {
            return None;
        }
        Some(v.ln())
    }

    fn bwdiff(
        &self,
        _store: &ExprStore,
        _e: ExprId,
        _child_idx: usize,
        child_vals: &[f64],
    ) -> Option<f64> {
        let v = child_vals[0];
        if v <= 0.0 {
            return None;
        }
        Some(1.0 / v)
    }

    fn inteval(
        &self,
        _store: &ExprStore,
        _e: ExprId,
        child_ivs: &[Interval],
        _varbounds: &mut dyn FnMut(VarId) -> Interval,
    ) -> Interval {
        child_ivs[0].log()
    }

    fn reverseprop(
        &self,
        _store: &ExprStore,
        _e: ExprId,
        bounds: &Interval,
        _child_ivs: &[Interval],
    ) -> ChildTightenings {
        // child in exp(bounds); this also enforces the domain child >= 0
        smallvec![(0, bounds.exp())]
    }

    fn simplify(&self, ctx: &mut SimplifyCtx<'_>, e: ExprId) -> ExprId {
        let child = ctx.store.child(e, 0);
        if let ExprPayload::Value(v) = ctx.store.payload(child) {
            if *v > 0.0 {
                let r = v.ln();
                return ctx.value(r);
            }
        }
        // log(exp(t)) collapses to t unconditionally
        if ctx.store.hdlr(child) == ctx.builtin().exp {
            let t = ctx.store.child(child, 0);
            ctx.store.capture(t);
            return t;
        }
        ctx.store.capture(e);
        e
    }

    fn curvature(&self, store: &ExprStore, e: ExprId) -> Curvature {
        match store.curvature(store.child(e, 0)) {
            Curvature::Linear | Curvature::Concave => Curvature::Concave,
            _ => Curvature::Unknown,
        }
    }

    fn monotonicity(&self, _store: &ExprStore, _e: ExprId, _child_idx: usize) -> Monotonicity {
        Monotonicity::Increasing
    }

    fn estimate(
        &self,
        _store: &ExprStore,
        _e: ExprId,
        child_vals: &[f64],
        child_ivs: &[Interval],
        overestimate: bool,
    ) -> Option<LinEstimate> {
        let iv = &child_ivs[0];
        if overestimate {
            let x = child_vals[0].clamp(iv.inf.max(1e-12), iv.sup);
            if x <= 0.0 {
                return None;
            }
            tangent_estimate(x, x.ln(), 1.0 / x)
        } else {
            if iv.inf <= 0.0 {
                return None;
            }
            secant_estimate(iv, f64::ln)
        }
    }

    fn parse_call(&self, p: &mut Parser<'_, '_>) -> Result<ExprId, ParseError> {
        p.parse_unary_call(self.name())
    }
}
