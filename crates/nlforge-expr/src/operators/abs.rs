//! Handler for the absolute value.

use nlforge_interval::Interval;
use smallvec::smallvec;

use crate::handler::{ChildTightenings, ExprHandler, LinEstimate};
use crate::parser::{ParseError, Parser};
use crate::simplify::SimplifyCtx;
use crate::store::{ExprPayload, ExprStore};
use crate::types::{Curvature, ExprId, Monotonicity, SolPoint, VarId};

use super::{secant_estimate, tangent_estimate};

pub struct AbsHandler;

impl ExprHandler for AbsHandler {
    fn name(&self) -> &'static str {
        "abs"
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
        Some(child_vals[0].abs())
    }

    fn bwdiff(
        &self,
        _store: &ExprStore,
        _e: ExprId,
        _child_idx: usize,
        child_vals: &[f64],
    ) -> Option<f64> {
        let v = child_vals[0];
        if v == 0.0 {
            // not differentiable at the kink
            return None;
        }
        Some(v.signum())
    }

    fn inteval(
        &self,
        _store: &ExprStore,
        _e: ExprId,
        child_ivs: &[Interval],
        _varbounds: &mut dyn FnMut(VarId) -> Interval,
    ) -> Interval {
        child_ivs[0].abs()
    }

    fn reverseprop(
        &self,
        _store: &ExprStore,
        _e: ExprId,
        bounds: &Interval,
        child_ivs: &[Interval],
    ) -> ChildTightenings {
        let pos = bounds.intersect(&Interval::new(0.0, f64::INFINITY));
        if pos.is_empty() {
            return smallvec![(0, Interval::EMPTY)];
        }
        let child = &child_ivs[0];
        let cand = if child.inf >= 0.0 {
            pos
        } else if child.sup <= 0.0 {
            pos.neg()
        } else {
            pos.hull(&pos.neg())
        };
        smallvec![(0, cand)]
    }

    fn simplify(&self, ctx: &mut SimplifyCtx<'_>, e: ExprId) -> ExprId {
        let child = ctx.store.child(e, 0);
        if let ExprPayload::Value(v) = ctx.store.payload(child) {
            let r = v.abs();
            return ctx.value(r);
        }
        // abs(abs(t)) collapses
        if ctx.store.hdlr(child) == ctx.builtin().abs {
            ctx.store.capture(child);
            return child;
        }
        // abs(c*t) pulls the coefficient magnitude out
        if let ExprPayload::Sum { constant, coefs } = ctx.store.payload(child) {
            if *constant == 0.0 && coefs.len() == 1 && coefs[0] != 1.0 {
                let mag = coefs[0].abs();
                let t = ctx.store.child(child, 0);
                let inner = ctx.raw_call(ctx.builtin().abs, t);
                let s = ctx.sum_of(0.0, &[(mag, inner)]);
                ctx.store.release(inner);
                return s;
            }
        }
        ctx.store.capture(e);
        e
    }

    fn curvature(&self, store: &ExprStore, e: ExprId) -> Curvature {
        let child = store.child(e, 0);
        let iv = store.interval(child);
        let cc = store.curvature(child);
        if cc == Curvature::Linear {
            return Curvature::Convex;
        }
        if iv.inf >= 0.0 {
            return cc;
        }
        if iv.sup <= 0.0 {
            return cc.negate();
        }
        Curvature::Unknown
    }

    fn monotonicity(&self, store: &ExprStore, e: ExprId, _child_idx: usize) -> Monotonicity {
        let iv = store.interval(store.child(e, 0));
        if iv.inf >= 0.0 {
            Monotonicity::Increasing
        } else if iv.sup <= 0.0 {
            Monotonicity::Decreasing
        } else {
            Monotonicity::Unknown
        }
    }

    fn integrality(&self, store: &ExprStore, e: ExprId) -> bool {
        store.is_integral(store.child(e, 0))
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
            secant_estimate(iv, f64::abs)
        } else {
            let x = child_vals[0].clamp(iv.inf, iv.sup);
            let sign = if x >= 0.0 { 1.0 } else { -1.0 };
            tangent_estimate(x, x.abs(), sign)
        }
    }

    fn parse_call(&self, p: &mut Parser<'_, '_>) -> Result<ExprId, ParseError> {
        p.parse_unary_call(self.name())
    }
}
