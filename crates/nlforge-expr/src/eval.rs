//! Point evaluation, reverse-mode differentiation, interval evaluation,
//! and the bottom-up integrality/curvature passes.
//!
//! All walks are iterative over the unique-node post-order; caches are
//! guarded by the store's monotonic tags, so re-evaluating at the same
//! solution is free and shared subexpressions are computed once.

use std::collections::HashMap;

use nlforge_interval::Interval;

use crate::handler::{ExprHandlers, HdlrPhase};
use crate::store::ExprStore;
use crate::types::{ExprId, SolPoint, VarId};
use crate::walk::post_order;

/// Evaluates the DAG at a solution point. `new_point` bumps the solution
/// tag; pass `false` to reuse caches for another expression over the same
/// point. `None` signals a domain error somewhere in the DAG.
pub fn eval(
    store: &mut ExprStore,
    hdlrs: &mut ExprHandlers,
    root: ExprId,
    sol: &dyn SolPoint,
    new_point: bool,
) -> Option<f64> {
    if new_point || store.soltag == 0 {
        store.soltag += 1;
    }
    let order = post_order(store, root);
    let mut child_vals: Vec<f64> = Vec::new();
    for e in order {
        if store.eval_fresh(e) {
            continue;
        }
        child_vals.clear();
        let mut aborted = false;
        for &c in store.children(e) {
            match store.eval_value(c) {
                Some(v) => child_vals.push(v),
                None => {
                    aborted = true;
                    break;
                }
            }
        }
        if aborted {
            store.set_eval_value(e, None);
            continue;
        }
        let hid = store.hdlr(e);
        let h = hdlrs.get(hid);
        let started = std::time::Instant::now();
        let v = h.eval(store, e, &child_vals, sol);
        hdlrs.stats_mut(hid).record(HdlrPhase::Eval, started.elapsed());
        store.set_eval_value(e, v);
    }
    store.eval_value(root)
}

/// Gradient with respect to the variable leaves, by one reverse sweep.
/// `None` when evaluation fails or some handler cannot differentiate.
pub fn gradient(
    store: &mut ExprStore,
    hdlrs: &mut ExprHandlers,
    root: ExprId,
    sol: &dyn SolPoint,
    new_point: bool,
) -> Option<HashMap<VarId, f64>> {
    eval(store, hdlrs, root, sol, new_point)?;
    store.difftag += 1;
    let tag = store.difftag;
    let order = post_order(store, root);
    store.set_derivative(root, 1.0, tag);

    // reverse post-order is a topological order: every parent contributes
    // to a child before the child pushes further down
    let mut child_vals: Vec<f64> = Vec::new();
    for &e in order.iter().rev() {
        let d = store.derivative(e, tag)?;
        if store.nchildren(e) == 0 {
            continue;
        }
        child_vals.clear();
        for &c in store.children(e) {
            child_vals.push(store.eval_value(c)?);
        }
        let h = hdlrs.get(store.hdlr(e));
        for i in 0..store.nchildren(e) {
            let pd = h.bwdiff(store, e, i, &child_vals)?;
            let c = store.child(e, i);
            let acc = store.derivative(c, tag).unwrap_or(0.0);
            store.set_derivative(c, acc + d * pd, tag);
        }
    }

    let mut grad = HashMap::new();
    for &e in &order {
        if let Some(var) = store.var_of(e) {
            grad.insert(var, store.derivative(e, tag).unwrap_or(0.0));
        }
    }
    Some(grad)
}

/// Plain forward interval evaluation without nonlinear-handler refinement,
/// caching per the box tag. Returns the root activity; an empty interval
/// anywhere makes the root empty.
pub fn inteval(
    store: &mut ExprStore,
    hdlrs: &mut ExprHandlers,
    root: ExprId,
    varbounds: &mut dyn FnMut(VarId) -> Interval,
    new_box: bool,
) -> Interval {
    if new_box || store.boxtag == 0 {
        store.boxtag += 1;
    }
    let order = post_order(store, root);
    for e in order {
        if store.interval_fresh(e) {
            continue;
        }
        let iv = inteval_node(store, hdlrs, e, varbounds);
        store.set_interval(e, iv);
        if iv.is_empty() {
            store.set_interval(root, Interval::EMPTY);
            return Interval::EMPTY;
        }
    }
    store.interval(root)
}

/// Single-node interval evaluation over the children's cached intervals.
pub fn inteval_node(
    store: &ExprStore,
    hdlrs: &mut ExprHandlers,
    e: ExprId,
    varbounds: &mut dyn FnMut(VarId) -> Interval,
) -> Interval {
    let child_ivs: Vec<Interval> = store.children(e).iter().map(|&c| store.interval(c)).collect();
    let hid = store.hdlr(e);
    let h = hdlrs.get(hid);
    let started = std::time::Instant::now();
    let iv = h.inteval(store, e, &child_ivs, varbounds);
    hdlrs
        .stats_mut(hid)
        .record(HdlrPhase::IntEval, started.elapsed());
    iv
}

/// Bottom-up integrality flags.
pub fn compute_integrality(store: &mut ExprStore, hdlrs: &ExprHandlers, root: ExprId) {
    for e in post_order(store, root) {
        let flag = hdlrs.get(store.hdlr(e)).integrality(store, e);
        store.set_integral(e, flag);
    }
}

/// Bottom-up curvature over the current intervals; run after a forward
/// propagation so the interval caches are meaningful.
pub fn compute_curvature(store: &mut ExprStore, hdlrs: &ExprHandlers, root: ExprId) {
    for e in post_order(store, root) {
        let curv = hdlrs.get(store.hdlr(e)).curvature(store, e);
        store.set_curvature(e, curv);
    }
}
