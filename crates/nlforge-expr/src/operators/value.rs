//! Handler for constant leaves.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use nlforge_interval::Interval;

use crate::handler::ExprHandler;
use crate::store::ExprStore;
use crate::types::{Curvature, ExprId, SolPoint, VarId};

use super::format_num;

pub struct ValueHandler;

fn value_of(store: &ExprStore, e: ExprId) -> f64 {
    store.value_of(e).expect("value handler on non-value payload")
}

impl ExprHandler for ValueHandler {
    fn name(&self) -> &'static str {
        "val"
    }

    fn precedence(&self) -> u32 {
        70
    }

    fn eval(
        &self,
        store: &ExprStore,
        e: ExprId,
        _child_vals: &[f64],
        _sol: &dyn SolPoint,
    ) -> Option<f64> {
        Some(value_of(store, e))
    }

    fn inteval(
        &self,
        store: &ExprStore,
        e: ExprId,
        _child_ivs: &[Interval],
        _varbounds: &mut dyn FnMut(VarId) -> Interval,
    ) -> Interval {
        Interval::singleton(value_of(store, e))
    }

    fn hash_payload(&self, store: &ExprStore, e: ExprId) -> u64 {
        let mut h = DefaultHasher::new();
        ("val", value_of(store, e).to_bits()).hash(&mut h);
        h.finish()
    }

    fn compare_payload(&self, store: &ExprStore, a: ExprId, b: ExprId) -> std::cmp::Ordering {
        value_of(store, a)
            .partial_cmp(&value_of(store, b))
            .unwrap_or(std::cmp::Ordering::Equal)
    }

    fn curvature(&self, _store: &ExprStore, _e: ExprId) -> Curvature {
        Curvature::Linear
    }

    fn integrality(&self, store: &ExprStore, e: ExprId) -> bool {
        value_of(store, e).fract() == 0.0
    }

    fn format(&self, store: &ExprStore, e: ExprId, _child_strs: &[String]) -> String {
        format_num(value_of(store, e))
    }
}
