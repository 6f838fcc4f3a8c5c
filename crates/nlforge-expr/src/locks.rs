//! Down-lock and up-lock propagation.
//!
//! A lock records that rounding a subexpression down (up) may violate some
//! constraint. Locks flow from a root to its children through the handlers'
//! monotonicity: an increasing argument inherits the parent's orientation,
//! a decreasing argument swaps it, and an argument of unknown monotonicity
//! receives both kinds. Negative amounts remove previously added locks.

use crate::handler::ExprHandlers;
use crate::store::ExprStore;
use crate::types::{ExprId, Monotonicity};

pub fn add_locks(
    store: &mut ExprStore,
    hdlrs: &ExprHandlers,
    root: ExprId,
    nlockspos: i32,
    nlocksneg: i32,
) {
    if nlockspos == 0 && nlocksneg == 0 {
        return;
    }
    let mut stack = vec![(root, nlockspos, nlocksneg)];
    while let Some((e, pos, neg)) = stack.pop() {
        store.add_locks_raw(e, pos, neg);
        let h = hdlrs.get(store.hdlr(e));
        for i in 0..store.nchildren(e) {
            let (cpos, cneg) = match h.monotonicity(store, e, i) {
                Monotonicity::Increasing => (pos, neg),
                Monotonicity::Decreasing => (neg, pos),
                Monotonicity::Constant => (0, 0),
                Monotonicity::Unknown => (pos + neg, pos + neg),
            };
            if cpos != 0 || cneg != 0 {
                stack.push((store.child(e, i), cpos, cneg));
            }
        }
    }
}

pub fn remove_locks(
    store: &mut ExprStore,
    hdlrs: &ExprHandlers,
    root: ExprId,
    nlockspos: i32,
    nlocksneg: i32,
) {
    add_locks(store, hdlrs, root, -nlockspos, -nlocksneg);
}
