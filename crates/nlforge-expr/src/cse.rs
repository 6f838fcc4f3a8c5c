//! Common-subexpression elimination.
//!
//! Structurally equal subtrees across a set of roots are merged onto a
//! single representative node, so downstream evaluation and relaxation see
//! each subexpression once. Equality is decided by the handlers'
//! `hash_payload`/`compare_payload` callbacks; hash collisions fall back to
//! a full structural comparison.

use std::collections::HashMap;

use tracing::debug;

use crate::handler::ExprHandlers;
use crate::order::exprs_equal;
use crate::store::ExprStore;
use crate::types::ExprId;
use crate::walk::post_order;

fn node_hash(
    store: &ExprStore,
    hdlrs: &ExprHandlers,
    e: ExprId,
    canon: &HashMap<ExprId, ExprId>,
    hashes: &HashMap<ExprId, u64>,
) -> u64 {
    let mut h = hdlrs.get(store.hdlr(e)).hash_payload(store, e);
    h = h.wrapping_mul(0x9e3779b97f4a7c15) ^ (store.hdlr(e).0 as u64);
    for &c in store.children(e) {
        let rc = canon[&c];
        h = h.rotate_left(7).wrapping_mul(31).wrapping_add(hashes[&rc]);
    }
    h
}

/// Merges structurally equal subexpressions across `roots`, rewriting the
/// root handles in place. Every root keeps exactly one caller-owned use.
pub fn replace_common_subexprs(
    store: &mut ExprStore,
    hdlrs: &ExprHandlers,
    roots: &mut [ExprId],
) {
    // keep every visited node alive for the whole pass so earlier
    // replacements cannot free a handle a later root still walks
    let orders: Vec<Vec<ExprId>> = roots.iter().map(|&r| post_order(store, r)).collect();
    for order in &orders {
        for &e in order {
            store.capture(e);
        }
    }

    let mut canon: HashMap<ExprId, ExprId> = HashMap::new();
    let mut hashes: HashMap<ExprId, u64> = HashMap::new();
    let mut buckets: HashMap<u64, Vec<ExprId>> = HashMap::new();
    let mut merged = 0usize;

    for order in &orders {
        for &e in order {
            if canon.contains_key(&e) {
                continue;
            }
            for i in 0..store.nchildren(e) {
                let c = store.child(e, i);
                let rc = canon[&c];
                if rc != c {
                    store.replace_child(e, i, rc);
                }
            }
            let h = node_hash(store, hdlrs, e, &canon, &hashes);
            let bucket = buckets.entry(h).or_default();
            match bucket.iter().find(|&&r| exprs_equal(store, hdlrs, r, e)) {
                Some(&rep) => {
                    canon.insert(e, rep);
                    merged += 1;
                }
                None => {
                    bucket.push(e);
                    canon.insert(e, e);
                    hashes.insert(e, h);
                }
            }
        }
    }

    for root in roots.iter_mut() {
        let rep = canon[root];
        if rep != *root {
            store.capture(rep);
            store.release(*root);
            *root = rep;
        }
    }
    for order in &orders {
        for &e in order {
            store.release(e);
        }
    }
    if merged > 0 {
        debug!(event = "cse", merged, "merged common subexpressions");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::ExprHandlers;
    use crate::simplify::SimplifyCtx;
    use crate::types::{VarId, VarType};

    fn var(store: &mut ExprStore, hdlrs: &ExprHandlers, id: u32) -> ExprId {
        store.create_var(
            hdlrs.builtin().var,
            VarId(id),
            VarType::Continuous,
            &format!("x{id}"),
        )
    }

    #[test]
    fn merges_equal_squares_across_roots() {
        let mut store = ExprStore::new();
        let hdlrs = ExprHandlers::standard();
        let x = var(&mut store, &hdlrs, 0);
        let mut ctx = SimplifyCtx {
            store: &mut store,
            hdlrs: &hdlrs,
        };
        let sq1 = ctx.raw_pow(x, 2.0);
        let sq2 = ctx.raw_pow(x, 2.0);
        let e1 = ctx.raw_sum(1.0, &[1.0], &[sq1]);
        let e2 = ctx.raw_sum(2.0, &[1.0], &[sq2]);
        store.release(x);
        store.release(sq1);
        store.release(sq2);

        let mut roots = [e1, e2];
        replace_common_subexprs(&mut store, &hdlrs, &mut roots);
        assert_eq!(store.child(roots[0], 0), store.child(roots[1], 0));

        store.release(roots[0]);
        store.release(roots[1]);
        assert_eq!(store.live_count(), 0);
    }

    #[test]
    fn distinct_payloads_stay_separate() {
        let mut store = ExprStore::new();
        let hdlrs = ExprHandlers::standard();
        let x = var(&mut store, &hdlrs, 0);
        let mut ctx = SimplifyCtx {
            store: &mut store,
            hdlrs: &hdlrs,
        };
        let sq = ctx.raw_pow(x, 2.0);
        let cube = ctx.raw_pow(x, 3.0);
        store.release(x);

        let mut roots = [sq, cube];
        replace_common_subexprs(&mut store, &hdlrs, &mut roots);
        assert_ne!(roots[0], roots[1]);

        store.release(roots[0]);
        store.release(roots[1]);
        assert_eq!(store.live_count(), 0);
    }
}
