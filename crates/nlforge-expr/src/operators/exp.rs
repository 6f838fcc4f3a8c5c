//! Handler for the exponential function.

use nlforge_interval::Interval;
use smallvec::smallvec;

use crate::handler::{ChildTightenings, ExprHandler, LinEstimate};
use crate::parser::{ParseError, Parser};
use crate::simplify::SimplifyCtx;
use crate::store::{ExprPayload, ExprStore};
use crate::types::{Curvature, ExprId, Monotonicity, SolPoint, VarId};

use super::{secant_estimate, tangent_estimate};

pub struct ExpHandler;

impl ExprHandler for ExpHandler {
    fn name(&self) -> &'static str {
        "exp"
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
        let v = child_vals[0].exp();
        v.is_finite().then_some(v)
    }

    fn bwdiff(
        &self,
        _store: &ExprStore,
        _e: ExprId,
        _child_idx: usize,
        child_vals: &[f64],
    ) -> Option<f64> {
        let v = child_vals[0].exp();
        v.is_finite().then_some(v)
    }

    fn inteval(
        &self,
        _store: &ExprStore,
        _e: ExprId,
        child_ivs: &[Interval],
        _varbounds: &mut dyn FnMut(VarId) -> Interval,
    ) -> Interval {
        child_ivs[0].exp()
    }

    fn reverseprop(
        &self,
        _store: &ExprStore,
        _e: ExprId,
        bounds: &Interval,
        _child_ivs: &[Interval],
    ) -> ChildTightenings {
        // child in log(bounds); an upper bound <= 0 leaves nothing
        smallvec![(0, bounds.log())]
    }

    fn simplify(&self, ctx: &mut SimplifyCtx<'_>, e: ExprId) -> ExprId {
        let child = ctx.store.child(e, 0);
        match ctx.store.payload(child) {
            ExprPayload::Value(v) => {
                let r = v.exp();
                return ctx.value(r);
            }
            _ => {}
        }
        // exp(log(t)) collapses to t on the log's domain
        if ctx.store.hdlr(child) == ctx.builtin().log {
            let t = ctx.store.child(child, 0);
            ctx.store.capture(t);
            return t;
        }
        ctx.store.capture(e);
        e
    }

    fn curvature(&self, store: &ExprStore, e: ExprId) -> Curvature {
        match store.curvature(store.child(e, 0)) {
            Curvature::Linear | Curvature::Convex => Curvature::Convex,
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
            secant_estimate(iv, f64::exp)
        } else {
            let x = child_vals[0].clamp(iv.inf, iv.sup);
            let fx = x.exp();
            tangent_estimate(x, fx, fx)
        }
    }

    fn parse_call(&self, p: &mut Parser<'_, '_>) -> Result<ExprId, ParseError> {
        p.parse_unary_call(self.name())
    }
}
