//! Handler for affine sums `constant + sum coef_i * child_i`.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use nlforge_interval::Interval;
use smallvec::SmallVec;

use crate::handler::{ChildTightenings, ExprHandler, LinEstimate};
use crate::simplify::SimplifyCtx;
use crate::store::{ExprPayload, ExprStore};
use crate::types::{Curvature, ExprId, Monotonicity, SolPoint, VarId};

use super::format_num;

pub struct SumHandler;

fn parts(store: &ExprStore, e: ExprId) -> (f64, &[f64]) {
    match store.payload(e) {
        ExprPayload::Sum { constant, coefs } => (*constant, coefs.as_slice()),
        _ => unreachable!("sum handler on non-sum payload"),
    }
}

impl ExprHandler for SumHandler {
    fn name(&self) -> &'static str {
        "sum"
    }

    fn precedence(&self) -> u32 {
        10
    }

    fn eval(
        &self,
        store: &ExprStore,
        e: ExprId,
        child_vals: &[f64],
        _sol: &dyn SolPoint,
    ) -> Option<f64> {
        let (constant, coefs) = parts(store, e);
        let mut acc = constant;
        for (c, v) in coefs.iter().zip(child_vals) {
            acc += c * v;
        }
        acc.is_finite().then_some(acc)
    }

    fn bwdiff(
        &self,
        store: &ExprStore,
        e: ExprId,
        child_idx: usize,
        _child_vals: &[f64],
    ) -> Option<f64> {
        let (_, coefs) = parts(store, e);
        Some(coefs[child_idx])
    }

    fn inteval(
        &self,
        store: &ExprStore,
        e: ExprId,
        child_ivs: &[Interval],
        _varbounds: &mut dyn FnMut(VarId) -> Interval,
    ) -> Interval {
        let (constant, coefs) = parts(store, e);
        let mut acc = Interval::singleton(constant);
        for (c, iv) in coefs.iter().zip(child_ivs) {
            acc = acc.add(&iv.mul_scalar(*c));
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
        let (constant, coefs) = parts(store, e);
        let mut out = ChildTightenings::new();
        for i in 0..child_ivs.len() {
            // rest = bounds - constant - sum of the other terms
            let mut rest = bounds.add_scalar(-constant);
            for (j, iv) in child_ivs.iter().enumerate() {
                if j != i {
                    rest = rest.sub(&iv.mul_scalar(coefs[j]));
                }
            }
            let cand = rest.mul_scalar(1.0 / coefs[i]);
            out.push((i, cand));
        }
        out
    }

    fn simplify(&self, ctx: &mut SimplifyCtx<'_>, e: ExprId) -> ExprId {
        let (constant, coefs) = parts(ctx.store, e);
        let coefs: Vec<f64> = coefs.to_vec();
        let children = ctx.store.children(e).to_vec();
        let terms: Vec<(f64, ExprId)> = coefs.into_iter().zip(children).collect();
        ctx.sum_of(constant, &terms)
    }

    fn hash_payload(&self, store: &ExprStore, e: ExprId) -> u64 {
        let (constant, coefs) = parts(store, e);
        let mut h = DefaultHasher::new();
        "sum".hash(&mut h);
        constant.to_bits().hash(&mut h);
        for c in coefs {
            c.to_bits().hash(&mut h);
        }
        h.finish()
    }

    fn compare_payload(&self, store: &ExprStore, a: ExprId, b: ExprId) -> std::cmp::Ordering {
        let (ca, fa) = parts(store, a);
        let (cb, fb) = parts(store, b);
        for (x, y) in fa.iter().zip(fb.iter()) {
            match x.partial_cmp(y) {
                Some(std::cmp::Ordering::Equal) | None => {}
                Some(o) => return o,
            }
        }
        ca.partial_cmp(&cb).unwrap_or(std::cmp::Ordering::Equal)
    }

    fn curvature(&self, store: &ExprStore, e: ExprId) -> Curvature {
        let (_, coefs) = parts(store, e);
        let mut all_linear = true;
        let mut convex_ok = true;
        let mut concave_ok = true;
        for (i, &c) in coefs.iter().enumerate() {
            let child = store.curvature(store.child(e, i));
            if child != Curvature::Linear {
                all_linear = false;
            }
            let required_convex = if c >= 0.0 {
                Curvature::Convex
            } else {
                Curvature::Concave
            };
            if !child.implies(required_convex) {
                convex_ok = false;
            }
            if !child.implies(required_convex.negate()) {
                concave_ok = false;
            }
        }
        if all_linear {
            Curvature::Linear
        } else if convex_ok {
            Curvature::Convex
        } else if concave_ok {
            Curvature::Concave
        } else {
            Curvature::Unknown
        }
    }

    fn monotonicity(&self, store: &ExprStore, e: ExprId, child_idx: usize) -> Monotonicity {
        let (_, coefs) = parts(store, e);
        if coefs[child_idx] >= 0.0 {
            Monotonicity::Increasing
        } else {
            Monotonicity::Decreasing
        }
    }

    fn integrality(&self, store: &ExprStore, e: ExprId) -> bool {
        let (constant, coefs) = parts(store, e);
        constant.fract() == 0.0
            && coefs.iter().enumerate().all(|(i, c)| {
                c.fract() == 0.0 && store.is_integral(store.child(e, i))
            })
    }

    fn estimate(
        &self,
        store: &ExprStore,
        e: ExprId,
        _child_vals: &[f64],
        _child_ivs: &[Interval],
        _overestimate: bool,
    ) -> Option<LinEstimate> {
        // a sum is its own linear estimator on both sides
        let (constant, coefs) = parts(store, e);
        Some(LinEstimate {
            constant,
            coefs: SmallVec::from_slice(coefs),
        })
    }

    fn format(&self, store: &ExprStore, e: ExprId, child_strs: &[String]) -> String {
        let (constant, coefs) = parts(store, e);
        let mut out = String::new();
        if constant != 0.0 || child_strs.is_empty() {
            out.push_str(&format_num(constant));
        }
        for (c, s) in coefs.iter().zip(child_strs) {
            if *c < 0.0 {
                out.push_str(if out.is_empty() { "-" } else { " - " });
            } else if !out.is_empty() {
                out.push_str(" + ");
            }
            let mag = c.abs();
            if mag != 1.0 {
                out.push_str(&format_num(mag));
                out.push('*');
            }
            out.push_str(s);
        }
        out
    }
}
