//! Total order on expressions, the backbone of canonical sorting and
//! duplicate merging in simplified sums and products.
//!
//! The order places constants before variables before function
//! expressions, keeps a power adjacent to its base and a sum or product
//! adjacent to its last term, and falls back to handler-name order between
//! distinct operator types. Nodes of the same operator compare children
//! lexicographically, then by payload.

use std::cmp::Ordering;

use crate::handler::ExprHandlers;
use crate::store::{ExprPayload, ExprStore};
use crate::types::ExprId;

fn is_value(p: &ExprPayload) -> bool {
    matches!(p, ExprPayload::Value(_))
}

fn is_var(p: &ExprPayload) -> bool {
    matches!(p, ExprPayload::Var { .. })
}

/// Compares two expressions; `Equal` means structurally identical.
pub fn compare_exprs(
    store: &ExprStore,
    hdlrs: &ExprHandlers,
    a: ExprId,
    b: ExprId,
) -> Ordering {
    if a == b {
        return Ordering::Equal;
    }
    let pa = store.payload(a);
    let pb = store.payload(b);

    // values first
    match (pa, pb) {
        (ExprPayload::Value(x), ExprPayload::Value(y)) => {
            return x.partial_cmp(y).unwrap_or(Ordering::Equal)
        }
        (ExprPayload::Value(_), _) => return Ordering::Less,
        (_, ExprPayload::Value(_)) => return Ordering::Greater,
        _ => {}
    }

    // a sum orders right before its last term
    match (pa, pb) {
        (ExprPayload::Sum { .. }, ExprPayload::Sum { .. }) => {}
        (ExprPayload::Sum { .. }, _) => {
            let last = *store.children(a).last().expect("simplified sum has terms");
            let r = compare_exprs(store, hdlrs, last, b);
            return if r == Ordering::Equal {
                Ordering::Less
            } else {
                r
            };
        }
        (_, ExprPayload::Sum { .. }) => {
            return compare_exprs(store, hdlrs, b, a).reverse();
        }
        _ => {}
    }

    // a product orders right before its last factor
    match (pa, pb) {
        (ExprPayload::Product { .. }, ExprPayload::Product { .. }) => {}
        (ExprPayload::Product { .. }, _) => {
            let last = *store
                .children(a)
                .last()
                .expect("simplified product has factors");
            let r = compare_exprs(store, hdlrs, last, b);
            return if r == Ordering::Equal {
                Ordering::Less
            } else {
                r
            };
        }
        (_, ExprPayload::Product { .. }) => {
            return compare_exprs(store, hdlrs, b, a).reverse();
        }
        _ => {}
    }

    // a power b^e orders right before its bare base (b^1)
    match (pa, pb) {
        (ExprPayload::Pow { .. }, ExprPayload::Pow { .. }) => {}
        (ExprPayload::Pow { .. }, _) => {
            let base = store.child(a, 0);
            let r = compare_exprs(store, hdlrs, base, b);
            return if r == Ordering::Equal {
                Ordering::Less
            } else {
                r
            };
        }
        (_, ExprPayload::Pow { .. }) => {
            return compare_exprs(store, hdlrs, b, a).reverse();
        }
        _ => {}
    }

    // variables before other functions
    match (is_var(pa), is_var(pb)) {
        (true, true) => {
            let va = store.var_of(a).expect("var payload");
            let vb = store.var_of(b).expect("var payload");
            return va.cmp(&vb);
        }
        (true, false) => return Ordering::Less,
        (false, true) => return Ordering::Greater,
        (false, false) => {}
    }

    let ha = store.hdlr(a);
    let hb = store.hdlr(b);
    if ha != hb {
        return hdlrs.name_of(ha).cmp(hdlrs.name_of(hb));
    }

    // same operator: children lexicographically, then payload
    let ca = store.children(a);
    let cb = store.children(b);
    for (&x, &y) in ca.iter().zip(cb.iter()) {
        let r = compare_exprs(store, hdlrs, x, y);
        if r != Ordering::Equal {
            return r;
        }
    }
    let r = ca.len().cmp(&cb.len());
    if r != Ordering::Equal {
        return r;
    }
    hdlrs.get(ha).compare_payload(store, a, b)
}

/// Structural equality under the total order.
pub fn exprs_equal(store: &ExprStore, hdlrs: &ExprHandlers, a: ExprId, b: ExprId) -> bool {
    compare_exprs(store, hdlrs, a, b) == Ordering::Equal
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simplify::SimplifyCtx;
    use crate::types::{VarId, VarType};

    #[test]
    fn values_before_vars_before_functions() {
        let mut store = ExprStore::new();
        let hdlrs = ExprHandlers::standard();
        let mut ctx = SimplifyCtx::new(&mut store, &hdlrs);
        let three = ctx.value(3.0);
        let x = ctx.var(VarId(0), VarType::Continuous, "x");
        let ex = ctx.raw_call(ctx.builtin().exp, x);
        assert_eq!(compare_exprs(&store, &hdlrs, three, x), Ordering::Less);
        assert_eq!(compare_exprs(&store, &hdlrs, x, ex), Ordering::Less);
        assert_eq!(compare_exprs(&store, &hdlrs, ex, three), Ordering::Greater);
        store.release(three);
        store.release(x);
        store.release(ex);
        assert_eq!(store.live_count(), 0);
    }

    #[test]
    fn vars_order_by_index() {
        let mut store = ExprStore::new();
        let hdlrs = ExprHandlers::standard();
        let mut ctx = SimplifyCtx::new(&mut store, &hdlrs);
        let x = ctx.var(VarId(0), VarType::Continuous, "x");
        let y = ctx.var(VarId(1), VarType::Continuous, "y");
        assert_eq!(compare_exprs(&store, &hdlrs, x, y), Ordering::Less);
        assert_eq!(compare_exprs(&store, &hdlrs, y, x), Ordering::Greater);
        store.release(x);
        store.release(y);
    }

    #[test]
    fn pow_orders_before_its_base() {
        let mut store = ExprStore::new();
        let hdlrs = ExprHandlers::standard();
        let mut ctx = SimplifyCtx::new(&mut store, &hdlrs);
        let x = ctx.var(VarId(0), VarType::Continuous, "x");
        let x2 = ctx.raw_pow(x, 2.0);
        let y = ctx.var(VarId(1), VarType::Continuous, "y");
        assert_eq!(compare_exprs(&store, &hdlrs, x2, x), Ordering::Less);
        assert_eq!(compare_exprs(&store, &hdlrs, x, x2), Ordering::Greater);
        // x^2 still orders before y because x does
        assert_eq!(compare_exprs(&store, &hdlrs, x2, y), Ordering::Less);
        store.release(x);
        store.release(x2);
        store.release(y);
    }

    #[test]
    fn identical_structures_compare_equal() {
        let mut store = ExprStore::new();
        let hdlrs = ExprHandlers::standard();
        let mut ctx = SimplifyCtx::new(&mut store, &hdlrs);
        let x = ctx.var(VarId(0), VarType::Continuous, "x");
        let a = ctx.raw_sum(1.0, &[2.0], &[x]);
        let b = ctx.raw_sum(1.0, &[2.0], &[x]);
        let c = ctx.raw_sum(1.0, &[3.0], &[x]);
        assert!(exprs_equal(&store, &hdlrs, a, b));
        assert!(!exprs_equal(&store, &hdlrs, a, c));
        store.release(x);
        store.release(a);
        store.release(b);
        store.release(c);
    }
}
