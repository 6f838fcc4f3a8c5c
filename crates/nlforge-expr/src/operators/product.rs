//! Handler for products `coef * prod child_i`.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use nlforge_interval::Interval;
use smallvec::smallvec;

use crate::handler::{ChildTightenings, ExprHandler, LinEstimate};
use crate::simplify::SimplifyCtx;
use crate::store::{ExprPayload, ExprStore};
use crate::types::{ExprId, Monotonicity, SolPoint, VarId};

pub struct ProductHandler;

fn coef_of(store: &ExprStore, e: ExprId) -> f64 {
    match store.payload(e) {
        ExprPayload::Product { coef } => *coef,
        _ => unreachable!("product handler on non-product payload"),
    }
}

impl ExprHandler for ProductHandler {
    fn name(&self) -> &'static str {
        "prod"
    }

    fn precedence(&self) -> u32 {
        20
    }

    fn eval(
        &self,
        store: &ExprStore,
        e: ExprId,
        child_vals: &[f64],
        _sol: &dyn SolPoint,
    ) -> Option<f64> {
        let mut acc = coef_of(store, e);
        for v in child_vals {
            acc *= v;
        }
        acc.is_finite().then_some(acc)
    }

    fn bwdiff(
        &self,
        store: &ExprStore,
        e: ExprId,
        child_idx: usize,
        child_vals: &[f64],
    ) -> Option<f64> {
        let mut acc = coef_of(store, e);
        for (j, v) in child_vals.iter().enumerate() {
            if j != child_idx {
                acc *= v;
            }
        }
        acc.is_finite().then_some(acc)
    }

    fn inteval(
        &self,
        store: &ExprStore,
        e: ExprId,
        child_ivs: &[Interval],
        _varbounds: &mut dyn FnMut(VarId) -> Interval,
    ) -> Interval {
        let mut acc = Interval::singleton(coef_of(store, e));
        for iv in child_ivs {
            acc = acc.mul(iv);
        }
        acc
    }

    fn reverseprop(
        &self,
        store: &ExprStore,
        e: ExprId,
        bounds: &Interval,
        child_ivs: &[Interval],
    ) -> ChildTightenings {
        let coef = coef_of(store, e);
        let mut out = ChildTightenings::new();
        for i in 0..child_ivs.len() {
            // child_i = bounds / (coef * prod of the other children)
            let mut rest = Interval::singleton(coef);
            for (j, iv) in child_ivs.iter().enumerate() {
                if j != i {
                    rest = rest.mul(iv);
                }
            }
            let cand = bounds.div(&rest);
            if !cand.is_entire() {
                out.push((i, cand));
            }
        }
        out
    }

    fn simplify(&self, ctx: &mut SimplifyCtx<'_>, e: ExprId) -> ExprId {
        let coef = coef_of(ctx.store, e);
        let children = ctx.store.children(e).to_vec();
        ctx.product_of(coef, &children)
    }

    fn hash_payload(&self, store: &ExprStore, e: ExprId) -> u64 {
        let mut h = DefaultHasher::new();
        ("prod", coef_of(store, e).to_bits()).hash(&mut h);
        h.finish()
    }

    fn compare_payload(&self, store: &ExprStore, a: ExprId, b: ExprId) -> std::cmp::Ordering {
        coef_of(store, a)
            .partial_cmp(&coef_of(store, b))
            .unwrap_or(std::cmp::Ordering::Equal)
    }

    fn monotonicity(&self, store: &ExprStore, e: ExprId, child_idx: usize) -> Monotonicity {
        let mut sign = coef_of(store, e);
        for (j, &child) in store.children(e).iter().enumerate() {
            if j == child_idx {
                continue;
            }
            let iv = store.interval(child);
            if iv.inf >= 0.0 {
                // sign unchanged
            } else if iv.sup <= 0.0 {
                sign = -sign;
            } else {
                return Monotonicity::Unknown;
            }
        }
        if sign > 0.0 {
            Monotonicity::Increasing
        } else if sign < 0.0 {
            Monotonicity::Decreasing
        } else {
            Monotonicity::Constant
        }
    }

    fn integrality(&self, store: &ExprStore, e: ExprId) -> bool {
        coef_of(store, e).fract() == 0.0
            && store
                .children(e)
                .iter()
                .all(|&c| store.is_integral(c))
    }

    /// McCormick plane for bilinear products; wider products are left to
    /// structural handlers.
    fn estimate(
        &self,
        store: &ExprStore,
        e: ExprId,
        child_vals: &[f64],
        child_ivs: &[Interval],
        overestimate: bool,
    ) -> Option<LinEstimate> {
        if child_vals.len() != 2 {
            return None;
        }
        let coef = coef_of(store, e);
        let (x, y) = (child_vals[0], child_vals[1]);
        let (xb, yb) = (&child_ivs[0], &child_ivs[1]);
        if !xb.inf.is_finite() || !xb.sup.is_finite() || !yb.inf.is_finite() || !yb.sup.is_finite()
        {
            return None;
        }
        // the requested side of x*y flips when the coefficient is negative
        let over_xy = overestimate == (coef > 0.0);
        let planes = if over_xy {
            [
                (yb.inf, xb.sup, -xb.sup * yb.inf),
                (yb.sup, xb.inf, -xb.inf * yb.sup),
            ]
        } else {
            [
                (yb.inf, xb.inf, -xb.inf * yb.inf),
                (yb.sup, xb.sup, -xb.sup * yb.sup),
            ]
        };
        // pick the plane that is tight at the reference point
        let value = |p: &(f64, f64, f64)| p.0 * x + p.1 * y + p.2;
        let best = if over_xy == (value(&planes[0]) < value(&planes[1])) {
            planes[0]
        } else {
            planes[1]
        };
        Some(LinEstimate {
            constant: coef * best.2,
            coefs: smallvec![coef * best.0, coef * best.1],
        })
    }

    fn format(&self, store: &ExprStore, e: ExprId, child_strs: &[String]) -> String {
        let coef = coef_of(store, e);
        let mut out = String::new();
        if coef != 1.0 {
            out.push_str(&super::format_num(coef));
        }
        for s in child_strs {
            if !out.is_empty() {
                out.push('*');
            }
            out.push_str(s);
        }
        out
    }
}
