//! Handler for decision-variable leaves.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use nlforge_interval::Interval;

use crate::handler::ExprHandler;
use crate::store::{ExprPayload, ExprStore};
use crate::types::{Curvature, ExprId, SolPoint, VarId};

pub struct VarHandler;

impl VarHandler {
    fn var_of(store: &ExprStore, e: ExprId) -> VarId {
        match store.payload(e) {
            ExprPayload::Var { var, .. } => *var,
            _ => unreachable!("var handler on non-var payload"),
        }
    }
}

impl ExprHandler for VarHandler {
    fn name(&self) -> &'static str {
        "var"
    }

    fn precedence(&self) -> u32 {
        70
    }

    fn eval(
        &self,
        store: &ExprStore,
        e: ExprId,
        _child_vals: &[f64],
        sol: &dyn SolPoint,
    ) -> Option<f64> {
        let v = sol.value(Self::var_of(store, e));
        v.is_finite().then_some(v)
    }

    fn inteval(
        &self,
        store: &ExprStore,
        e: ExprId,
        _child_ivs: &[Interval],
        varbounds: &mut dyn FnMut(VarId) -> Interval,
    ) -> Interval {
        varbounds(Self::var_of(store, e))
    }

    fn hash_payload(&self, store: &ExprStore, e: ExprId) -> u64 {
        let mut h = DefaultHasher::new();
        ("var", Self::var_of(store, e).0).hash(&mut h);
        h.finish()
    }

    fn compare_payload(&self, store: &ExprStore, a: ExprId, b: ExprId) -> std::cmp::Ordering {
        Self::var_of(store, a).cmp(&Self::var_of(store, b))
    }

    fn curvature(&self, _store: &ExprStore, _e: ExprId) -> Curvature {
        Curvature::Linear
    }

    fn integrality(&self, store: &ExprStore, e: ExprId) -> bool {
        store
            .var_type_of(e)
            .map(|t| t.is_integral())
            .unwrap_or(false)
    }

    fn format(&self, store: &ExprStore, e: ExprId, _child_strs: &[String]) -> String {
        match store.payload(e) {
            ExprPayload::Var { name, .. } => format!("<{}>", name),
            _ => unreachable!("var handler on non-var payload"),
        }
    }
}
