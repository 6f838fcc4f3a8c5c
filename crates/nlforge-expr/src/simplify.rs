//! Simplification to canonical normal form.
//!
//! The driver walks the DAG post-order and asks each node's handler to
//! rewrite itself, assuming all children are already simplified. The
//! canonical-form builders here implement the shared algebra: sums are
//! flat, constant-folded, duplicate-merged, and sorted; products are flat
//! with the scalar coefficient moved into an enclosing sum; powers unwrap
//! trivial exponents and expand or factor structured bases.

use std::cmp::Ordering;
use std::collections::HashMap;

use crate::handler::ExprHandlers;
use crate::order::compare_exprs;
use crate::store::{ExprPayload, ExprStore};
use crate::types::{ExprId, HdlrId, VarId, VarType};
use crate::walk::post_order;

/// Mutable context handed to handler `simplify` callbacks: the store plus
/// the registry, with constructors for raw and canonical nodes.
///
/// Every constructor returns an expression holding one use for the caller;
/// input expressions are borrowed, never consumed.
pub struct SimplifyCtx<'a> {
    pub store: &'a mut ExprStore,
    pub hdlrs: &'a ExprHandlers,
}

impl<'a> SimplifyCtx<'a> {
    pub fn new(store: &'a mut ExprStore, hdlrs: &'a ExprHandlers) -> Self {
        SimplifyCtx { store, hdlrs }
    }

    pub fn builtin(&self) -> crate::handler::BuiltinIds {
        self.hdlrs.builtin()
    }

    pub fn compare(&self, a: ExprId, b: ExprId) -> Ordering {
        compare_exprs(self.store, self.hdlrs, a, b)
    }

    // ---- raw constructors (no canonicalization) --------------------------

    pub fn value(&mut self, v: f64) -> ExprId {
        let id = self.builtin().val;
        self.store.create(id, ExprPayload::Value(v), &[])
    }

    pub fn var(&mut self, var: VarId, vtype: VarType, name: &str) -> ExprId {
        let id = self.builtin().var;
        self.store.create_var(id, var, vtype, name)
    }

    pub fn raw_sum(&mut self, constant: f64, coefs: &[f64], children: &[ExprId]) -> ExprId {
        debug_assert_eq!(coefs.len(), children.len());
        let id = self.builtin().sum;
        self.store.create(
            id,
            ExprPayload::Sum {
                constant,
                coefs: coefs.into(),
            },
            children,
        )
    }

    pub fn raw_product(&mut self, coef: f64, children: &[ExprId]) -> ExprId {
        let id = self.builtin().product;
        self.store
            .create(id, ExprPayload::Product { coef }, children)
    }

    pub fn raw_pow(&mut self, base: ExprId, exponent: f64) -> ExprId {
        let id = self.builtin().pow;
        self.store
            .create(id, ExprPayload::Pow { exponent }, &[base])
    }

    /// Unary function application (exp, log, abs, or a custom handler).
    pub fn raw_call(&mut self, hdlr: HdlrId, child: ExprId) -> ExprId {
        self.store.create(hdlr, ExprPayload::None, &[child])
    }

    // ---- canonical builders ---------------------------------------------

    /// Canonical sum of `constant + sum coef_i * term_i` over simplified
    /// terms: flattens nested sums, folds constants, merges duplicates,
    /// drops zero coefficients, sorts, and unwraps trivial results.
    pub fn sum_of(&mut self, constant: f64, terms: &[(f64, ExprId)]) -> ExprId {
        let mut c = constant;
        let mut flat: Vec<(f64, ExprId)> = Vec::with_capacity(terms.len());
        for &(coef, e) in terms {
            self.absorb_sum_term(&mut c, &mut flat, coef, e);
        }

        let store = &*self.store;
        let hdlrs = self.hdlrs;
        flat.sort_by(|x, y| compare_exprs(store, hdlrs, x.1, y.1));

        // merge duplicates, then drop vanished coefficients
        let mut merged: Vec<(f64, ExprId)> = Vec::with_capacity(flat.len());
        for (coef, e) in flat {
            match merged.last_mut() {
                Some(last) if compare_exprs(store, hdlrs, last.1, e) == Ordering::Equal => {
                    last.0 += coef;
                }
                _ => merged.push((coef, e)),
            }
        }
        merged.retain(|&(coef, _)| coef != 0.0);

        if merged.is_empty() {
            return self.value(c);
        }
        if merged.len() == 1 && merged[0].0 == 1.0 && c == 0.0 {
            let e = merged[0].1;
            self.store.capture(e);
            return e;
        }
        let coefs: Vec<f64> = merged.iter().map(|t| t.0).collect();
        let children: Vec<ExprId> = merged.iter().map(|t| t.1).collect();
        self.raw_sum(c, &coefs, &children)
    }

    fn absorb_sum_term(
        &mut self,
        c: &mut f64,
        flat: &mut Vec<(f64, ExprId)>,
        coef: f64,
        e: ExprId,
    ) {
        match self.store.payload(e) {
            ExprPayload::Value(v) => *c += coef * v,
            ExprPayload::Sum {
                constant,
                coefs: inner,
            } => {
                *c += coef * constant;
                let inner: Vec<f64> = inner.iter().copied().collect();
                let children: Vec<ExprId> = self.store.children(e).to_vec();
                for (ic, child) in inner.into_iter().zip(children) {
                    // children of a simplified sum are not sums themselves
                    self.absorb_sum_term(c, flat, coef * ic, child);
                }
            }
            _ => flat.push((coef, e)),
        }
    }

    /// Canonical product of `coef * prod factor_i` over simplified factors:
    /// flattens nested products, folds values into the coefficient, merges
    /// repeated bases into powers, merges multiple `exp`/`abs` factors, and
    /// moves a non-unit coefficient into an enclosing single-term sum.
    pub fn product_of(&mut self, coef: f64, factors: &[ExprId]) -> ExprId {
        let mut c = coef;
        let mut flat: Vec<ExprId> = Vec::with_capacity(factors.len());
        let mut temps: Vec<ExprId> = Vec::new();
        for &f in factors {
            self.absorb_product_factor(&mut c, &mut flat, f);
        }
        if c == 0.0 {
            return self.finish_temps(temps, |ctx| ctx.value(0.0));
        }

        // merge repeated bases into powers
        {
            let store = &*self.store;
            let hdlrs = self.hdlrs;
            flat.sort_by(|x, y| compare_exprs(store, hdlrs, *x, *y));
        }
        let mut merged: Vec<ExprId> = Vec::with_capacity(flat.len());
        let mut i = 0;
        while i < flat.len() {
            let (base_i, mut expo) = self.pow_parts(flat[i]);
            let mut j = i + 1;
            while j < flat.len() {
                let (base_j, expo_j) = self.pow_parts(flat[j]);
                if self.compare(base_i, base_j) != Ordering::Equal {
                    break;
                }
                expo += expo_j;
                j += 1;
            }
            if j == i + 1 {
                merged.push(flat[i]);
            } else {
                let p = self.pow_of(base_i, expo);
                match self.store.payload(p) {
                    ExprPayload::Value(v) => {
                        c *= v;
                        self.store.release(p);
                    }
                    _ => {
                        merged.push(p);
                        temps.push(p);
                    }
                }
            }
            i = j;
        }

        let merged = self.merge_unary_family(merged, &mut temps, self.builtin().exp, true);
        let merged = self.merge_unary_family(merged, &mut temps, self.builtin().abs, false);

        let result = match merged.len() {
            0 => {
                let v = c;
                self.value(v)
            }
            1 => {
                let f = merged[0];
                if c == 1.0 {
                    self.store.capture(f);
                    f
                } else {
                    self.sum_of(0.0, &[(c, f)])
                }
            }
            _ => {
                let mut sorted = merged;
                let store = &*self.store;
                let hdlrs = self.hdlrs;
                sorted.sort_by(|x, y| compare_exprs(store, hdlrs, *x, *y));
                let prod = self.raw_product(1.0, &sorted);
                if c == 1.0 {
                    prod
                } else {
                    let s = self.sum_of(0.0, &[(c, prod)]);
                    self.store.release(prod);
                    s
                }
            }
        };
        for t in temps {
            self.store.release(t);
        }
        result
    }

    fn finish_temps(&mut self, temps: Vec<ExprId>, f: impl FnOnce(&mut Self) -> ExprId) -> ExprId {
        let r = f(self);
        for t in temps {
            self.store.release(t);
        }
        r
    }

    fn absorb_product_factor(&mut self, c: &mut f64, flat: &mut Vec<ExprId>, e: ExprId) {
        match self.store.payload(e) {
            ExprPayload::Value(v) => *c *= v,
            ExprPayload::Product { coef } => {
                *c *= coef;
                let children: Vec<ExprId> = self.store.children(e).to_vec();
                for child in children {
                    self.absorb_product_factor(c, flat, child);
                }
            }
            ExprPayload::Sum { constant, coefs } if coefs.len() == 1 && *constant == 0.0 => {
                *c *= coefs[0];
                let child = self.store.child(e, 0);
                self.absorb_product_factor(c, flat, child);
            }
            _ => flat.push(e),
        }
    }

    /// `(base, exponent)` view of a factor: a power splits, anything else
    /// is itself to the first power.
    fn pow_parts(&self, e: ExprId) -> (ExprId, f64) {
        match self.store.payload(e) {
            ExprPayload::Pow { exponent } => (self.store.child(e, 0), *exponent),
            _ => (e, 1.0),
        }
    }

    /// Merges all factors of a unary family into one: `exp(u)*exp(v)` into
    /// `exp(u+v)` (additive), `abs(u)*abs(v)` into `abs(u*v)`.
    fn merge_unary_family(
        &mut self,
        factors: Vec<ExprId>,
        temps: &mut Vec<ExprId>,
        hdlr: HdlrId,
        additive: bool,
    ) -> Vec<ExprId> {
        let (family, mut rest): (Vec<ExprId>, Vec<ExprId>) = factors
            .into_iter()
            .partition(|&f| self.store.hdlr(f) == hdlr);
        if family.len() < 2 {
            rest.extend(family);
            return rest;
        }
        let args: Vec<ExprId> = family.iter().map(|&f| self.store.child(f, 0)).collect();
        let inner = if additive {
            let terms: Vec<(f64, ExprId)> = args.iter().map(|&a| (1.0, a)).collect();
            self.sum_of(0.0, &terms)
        } else {
            self.product_of(1.0, &args)
        };
        let outer = self.raw_call(hdlr, inner);
        self.store.release(inner);
        temps.push(outer);
        rest.push(outer);
        rest
    }

    /// Canonical power of a simplified base.
    pub fn pow_of(&mut self, base: ExprId, exponent: f64) -> ExprId {
        if exponent == 0.0 {
            return self.value(1.0);
        }
        if exponent == 1.0 {
            self.store.capture(base);
            return base;
        }
        let is_int = exponent.fract() == 0.0;
        match self.store.payload(base) {
            ExprPayload::Value(v) => {
                let r = v.powf(exponent);
                if r.is_finite() {
                    return self.value(r);
                }
            }
            ExprPayload::Var { vtype, .. } => {
                // a binary variable is idempotent under positive powers
                if *vtype == VarType::Binary && exponent > 0.0 {
                    self.store.capture(base);
                    return base;
                }
            }
            ExprPayload::Sum { constant, coefs } => {
                if coefs.len() == 1 && *constant == 0.0 {
                    let c = coefs[0];
                    // (c*t)^p factors out when the power of c is exact
                    if is_int || c > 0.0 {
                        let t = self.store.child(base, 0);
                        let tp = self.pow_of(t, exponent);
                        let s = self.sum_of(0.0, &[(c.powf(exponent), tp)]);
                        self.store.release(tp);
                        return s;
                    }
                } else if exponent == 2.0 {
                    return self.expand_square(base);
                }
            }
            ExprPayload::Product { coef } if is_int => {
                let coef = *coef;
                let children: Vec<ExprId> = self.store.children(base).to_vec();
                let mut powed: Vec<ExprId> = Vec::with_capacity(children.len());
                for ch in &children {
                    powed.push(self.pow_of(*ch, exponent));
                }
                let prod = self.product_of(coef.powf(exponent), &powed);
                for p in powed {
                    self.store.release(p);
                }
                return prod;
            }
            ExprPayload::Pow {
                exponent: inner_exp,
            } => {
                if is_int && inner_exp.fract() == 0.0 {
                    let inner_exp = *inner_exp;
                    let grandchild = self.store.child(base, 0);
                    return self.pow_of(grandchild, inner_exp * exponent);
                }
            }
            _ => {}
        }
        self.raw_pow(base, exponent)
    }

    /// Expands `(c0 + sum c_i t_i)^2` into a canonical sum of squares and
    /// pairwise products.
    fn expand_square(&mut self, base: ExprId) -> ExprId {
        let (c0, coefs) = match self.store.payload(base) {
            ExprPayload::Sum { constant, coefs } => {
                (*constant, coefs.iter().copied().collect::<Vec<f64>>())
            }
            _ => unreachable!("expand_square requires a sum base"),
        };
        let terms: Vec<ExprId> = self.store.children(base).to_vec();
        let mut out: Vec<(f64, ExprId)> = Vec::new();
        let mut temps: Vec<ExprId> = Vec::new();
        for (i, &ti) in terms.iter().enumerate() {
            if c0 != 0.0 {
                out.push((2.0 * c0 * coefs[i], ti));
            }
            let sq = self.pow_of(ti, 2.0);
            temps.push(sq);
            out.push((coefs[i] * coefs[i], sq));
            for (j, &tj) in terms.iter().enumerate().skip(i + 1) {
                let prod = self.product_of(1.0, &[ti, tj]);
                temps.push(prod);
                out.push((2.0 * coefs[i] * coefs[j], prod));
            }
        }
        let s = self.sum_of(c0 * c0, &out);
        for t in temps {
            self.store.release(t);
        }
        s
    }

    /// Dispatches the handler's simplify for a node whose children are
    /// already simplified; returns a new use.
    pub fn simplify_node(&mut self, e: ExprId) -> ExprId {
        let h = self.hdlrs.get(self.store.hdlr(e));
        h.simplify(self, e)
    }
}

/// Simplifies the DAG rooted at `root`, returning a new root holding one
/// use for the caller. The original expression is left intact.
pub fn simplify(store: &mut ExprStore, hdlrs: &mut ExprHandlers, root: ExprId) -> ExprId {
    let order = post_order(store, root);
    let mut map: HashMap<ExprId, ExprId> = HashMap::with_capacity(order.len());
    for e in order {
        let children = store.children(e).to_vec();
        let changed = children.iter().any(|c| map[c] != *c);
        let cur = if changed {
            let newch: Vec<ExprId> = children.iter().map(|c| map[c]).collect();
            let payload = store.payload(e).clone();
            store.create(store.hdlr(e), payload, &newch)
        } else {
            store.capture(e);
            e
        };
        let hid = store.hdlr(cur);
        let h = hdlrs.get(hid);
        let started = std::time::Instant::now();
        let simplified = {
            let mut ctx = SimplifyCtx::new(store, hdlrs);
            h.simplify(&mut ctx, cur)
        };
        hdlrs
            .stats_mut(hid)
            .record(crate::handler::HdlrPhase::Simplify, started.elapsed());
        store.release(cur);
        map.insert(e, simplified);
    }
    let result = map[&root];
    for (orig, repl) in map {
        if orig != root {
            store.release(repl);
        } else {
            debug_assert_eq!(repl, result);
        }
    }
    result
}
