//! Handler for powers `child ^ exponent` with a fixed real exponent.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use nlforge_interval::Interval;
use smallvec::smallvec;

use crate::handler::{ChildTightenings, ExprHandler, LinEstimate};
use crate::simplify::SimplifyCtx;
use crate::store::{ExprPayload, ExprStore};
use crate::types::{Curvature, ExprId, Monotonicity, SolPoint, VarId};

use super::{format_num, secant_estimate, tangent_estimate};

pub struct PowHandler;

fn exponent_of(store: &ExprStore, e: ExprId) -> f64 {
    match store.payload(e) {
        ExprPayload::Pow { exponent } => *exponent,
        _ => unreachable!("pow handler on non-pow payload"),
    }
}

fn pow_value(base: f64, p: f64) -> Option<f64> {
    if base < 0.0 && p.fract() != 0.0 {
        return None;
    }
    if base == 0.0 && p < 0.0 {
        return None;
    }
    let v = base.powf(p);
    v.is_finite().then_some(v)
}

/// Hull of `{x : x^p in bounds}`.
fn inverse_pow(bounds: &Interval, p: f64) -> Interval {
    if bounds.is_empty() {
        return Interval::EMPTY;
    }
    if p < 0.0 {
        // x^p in bounds  <=>  x^(-p) in 1/bounds
        return inverse_pow(&bounds.recip(), -p);
    }
    if p.fract() == 0.0 && (p as i64) % 2 == 1 {
        // odd power: monotone over the whole line, root branch per sign
        let inv = 1.0 / p;
        let pos = bounds
            .intersect(&Interval::new(0.0, f64::INFINITY))
            .powf(inv);
        let neg = bounds
            .intersect(&Interval::new(f64::NEG_INFINITY, 0.0))
            .neg()
            .powf(inv)
            .neg();
        return pos.hull(&neg);
    }
    // even or fractional power: range is nonnegative
    let pos = bounds.intersect(&Interval::new(0.0, f64::INFINITY));
    if pos.is_empty() {
        return Interval::EMPTY;
    }
    let root = pos.powf(1.0 / p);
    if p.fract() == 0.0 {
        // even power admits the mirrored negative branch
        root.hull(&root.neg())
    } else {
        root
    }
}

impl ExprHandler for PowHandler {
    fn name(&self) -> &'static str {
        "pow"
    }

    fn precedence(&self) -> u32 {
        30
    }

    fn eval(
        &self,
        store: &ExprStore,
        e: ExprId,
        child_vals: &[f64],
        _sol: &dyn SolPoint,
    ) -> Option<f64> {
        pow_value(child_vals[0], exponent_of(store, e))
    }

    fn bwdiff(
        &self,
        store: &ExprStore,
        e: ExprId,
        _child_idx: usize,
        child_vals: &[f64],
    ) -> Option<f64> {
        let p = exponent_of(store, e);
        pow_value(child_vals[0], p - 1.0).map(|v| p * v)
    }

    fn inteval(
        &self,
        store: &ExprStore,
        e: ExprId,
        child_ivs: &[Interval],
        _varbounds: &mut dyn FnMut(VarId) -> Interval,
    ) -> Interval {
        child_ivs[0].powf(exponent_of(store, e))
    }

    fn reverseprop(
        &self,
        store: &ExprStore,
        e: ExprId,
        bounds: &Interval,
        _child_ivs: &[Interval],
    ) -> ChildTightenings {
        let p = exponent_of(store, e);
        let cand = inverse_pow(bounds, p);
        smallvec![(0, cand)]
    }

    fn simplify(&self, ctx: &mut SimplifyCtx<'_>, e: ExprId) -> ExprId {
        let p = exponent_of(ctx.store, e);
        let base = ctx.store.child(e, 0);
        ctx.pow_of(base, p)
    }

    fn hash_payload(&self, store: &ExprStore, e: ExprId) -> u64 {
        let mut h = DefaultHasher::new();
        ("pow", exponent_of(store, e).to_bits()).hash(&mut h);
        h.finish()
    }

    fn compare_payload(&self, store: &ExprStore, a: ExprId, b: ExprId) -> std::cmp::Ordering {
        exponent_of(store, a)
            .partial_cmp(&exponent_of(store, b))
            .unwrap_or(std::cmp::Ordering::Equal)
    }

    fn curvature(&self, store: &ExprStore, e: ExprId) -> Curvature {
        let p = exponent_of(store, e);
        let child = store.child(e, 0);
        let cc = store.curvature(child);
        let iv = store.interval(child);
        let is_int = p.fract() == 0.0;
        let is_even = is_int && (p as i64) % 2 == 0;

        if is_even && p > 0.0 {
            if cc == Curvature::Linear {
                return Curvature::Convex;
            }
            if cc.implies(Curvature::Convex) && iv.inf >= 0.0 {
                return Curvature::Convex;
            }
            if cc.implies(Curvature::Concave) && iv.sup <= 0.0 {
                return Curvature::Convex;
            }
            return Curvature::Unknown;
        }
        if is_int && p > 1.0 {
            // odd power, monotone increasing
            if iv.inf >= 0.0 && cc.implies(Curvature::Convex) {
                return Curvature::Convex;
            }
            if iv.sup <= 0.0 && cc.implies(Curvature::Concave) {
                return Curvature::Concave;
            }
            return Curvature::Unknown;
        }
        if cc == Curvature::Linear && iv.inf >= 0.0 {
            if p > 1.0 || p < 0.0 {
                return Curvature::Convex;
            }
            if p > 0.0 && p < 1.0 {
                return Curvature::Concave;
            }
        }
        Curvature::Unknown
    }

    fn monotonicity(&self, store: &ExprStore, e: ExprId, _child_idx: usize) -> Monotonicity {
        let p = exponent_of(store, e);
        let iv = store.interval(store.child(e, 0));
        let is_int = p.fract() == 0.0;
        let is_odd = is_int && (p as i64) % 2 != 0;
        if p > 0.0 && is_odd {
            return Monotonicity::Increasing;
        }
        if iv.inf >= 0.0 {
            return if p > 0.0 {
                Monotonicity::Increasing
            } else {
                Monotonicity::Decreasing
            };
        }
        if iv.sup <= 0.0 && is_int {
            // even power on the negative side
            return if p > 0.0 {
                Monotonicity::Decreasing
            } else {
                Monotonicity::Increasing
            };
        }
        Monotonicity::Unknown
    }

    fn integrality(&self, store: &ExprStore, e: ExprId) -> bool {
        let p = exponent_of(store, e);
        p > 0.0 && p.fract() == 0.0 && store.is_integral(store.child(e, 0))
    }

    fn estimate(
        &self,
        store: &ExprStore,
        e: ExprId,
        child_vals: &[f64],
        child_ivs: &[Interval],
        overestimate: bool,
    ) -> Option<LinEstimate> {
        let p = exponent_of(store, e);
        let iv = &child_ivs[0];
        let x = child_vals[0].clamp(iv.inf, iv.sup);
        let curv = self.curvature(store, e);
        // re-derive curvature against the passed intervals when the cache
        // is stale (children may have been tightened since)
        let curv = if curv == Curvature::Unknown && iv.inf >= 0.0 && p > 1.0 {
            Curvature::Convex
        } else {
            curv
        };
        match (curv, overestimate) {
            (Curvature::Convex, false) => {
                let fx = pow_value(x, p)?;
                let dfx = p * pow_value(x, p - 1.0)?;
                tangent_estimate(x, fx, dfx)
            }
            (Curvature::Convex, true) => secant_estimate(iv, |t| t.powf(p)),
            (Curvature::Concave, true) => {
                let fx = pow_value(x, p)?;
                let dfx = p * pow_value(x, p - 1.0)?;
                tangent_estimate(x, fx, dfx)
            }
            (Curvature::Concave, false) => secant_estimate(iv, |t| t.powf(p)),
            _ => None,
        }
    }

    fn format(&self, store: &ExprStore, e: ExprId, child_strs: &[String]) -> String {
        let p = exponent_of(store, e);
        if p < 0.0 || p.fract() != 0.0 {
            format!("{}^({})", child_strs[0], format_num(p))
        } else {
            format!("{}^{}", child_strs[0], format_num(p))
        }
    }
}
