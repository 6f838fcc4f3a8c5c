//! Infix printing with precedence-driven parenthesization.
//!
//! Handlers format their own node given the already-rendered children; a
//! child is wrapped in parentheses when its handler binds looser than the
//! parent's.

use std::collections::HashMap;

use crate::handler::ExprHandlers;
use crate::store::ExprStore;
use crate::types::ExprId;
use crate::walk::post_order;

pub fn print_expr(store: &ExprStore, hdlrs: &ExprHandlers, root: ExprId) -> String {
    let mut rendered: HashMap<ExprId, String> = HashMap::new();
    for e in post_order(store, root) {
        let h = hdlrs.get(store.hdlr(e));
        let prec = h.precedence();
        let child_strs: Vec<String> = store
            .children(e)
            .iter()
            .map(|&c| {
                let s = rendered[&c].clone();
                if hdlrs.get(store.hdlr(c)).precedence() < prec {
                    format!("({s})")
                } else {
                    s
                }
            })
            .collect();
        rendered.insert(e, h.format(store, e, &child_strs));
    }
    rendered.remove(&root).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::ExprHandlers;
    use crate::simplify::SimplifyCtx;
    use crate::types::{VarId, VarType};

    #[test]
    fn sum_inside_product_gets_parens() {
        let mut store = ExprStore::new();
        let hdlrs = ExprHandlers::standard();
        let x = store.create_var(hdlrs.builtin().var, VarId(0), VarType::Continuous, "x");
        let y = store.create_var(hdlrs.builtin().var, VarId(1), VarType::Continuous, "y");
        let mut ctx = SimplifyCtx {
            store: &mut store,
            hdlrs: &hdlrs,
        };
        let s = ctx.raw_sum(1.0, &[1.0], &[x]);
        let p = ctx.raw_product(1.0, &[s, y]);

        assert_eq!(print_expr(&store, &hdlrs, p), "(1 + <x>)*<y>");

        store.release(p);
        store.release(s);
        store.release(x);
        store.release(y);
        assert_eq!(store.live_count(), 0);
    }

    #[test]
    fn pow_of_sum_gets_parens() {
        let mut store = ExprStore::new();
        let hdlrs = ExprHandlers::standard();
        let x = store.create_var(hdlrs.builtin().var, VarId(0), VarType::Continuous, "x");
        let mut ctx = SimplifyCtx {
            store: &mut store,
            hdlrs: &hdlrs,
        };
        let s = ctx.raw_sum(2.0, &[1.0], &[x]);
        let sq = ctx.raw_pow(s, 2.0);

        assert_eq!(print_expr(&store, &hdlrs, sq), "(2 + <x>)^2");

        store.release(sq);
        store.release(s);
        store.release(x);
        assert_eq!(store.live_count(), 0);
    }
}
