//! Nonlinear handlers: structural plugins that claim enforcement of
//! sub-DAGs during detection and then provide interval evaluation, reverse
//! propagation, and linear estimators through per-expression data.
//!
//! Handlers are tried in descending priority; every handler that attaches
//! gets its own enforcement record, and all attached handlers contribute
//! intersecting intervals and cuts. The default handler attaches last and
//! simply forwards to the node's operator callbacks, so every node is
//! enforceable even when no structural handler matches.

use std::rc::Rc;
use std::time::Duration;

use nlforge_config::EngineConfig;
use nlforge_expr::{ExprHandlers, ExprId, ExprStore, VarId};
use nlforge_interval::Interval;
use smallvec::SmallVec;

use crate::driver::Driver;
use crate::quadratic::{QuadForm, QuadraticNlHdlr};
use crate::rowprep::RowPrep;

/// Enforcement methods a handler offers for one expression.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Methods {
    /// Provides underestimators (enforces `auxvar >= expr`).
    pub sepa_below: bool,
    /// Provides overestimators (enforces `auxvar <= expr`).
    pub sepa_above: bool,
    pub inteval: bool,
    pub reverseprop: bool,
}

/// Per-(handler, expression) payload created by `detect`.
#[derive(Debug)]
pub enum NlHdlrExprData {
    Default,
    Quadratic(Box<QuadForm>),
}

/// Handle into the nonlinear-handler registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NlHdlrId(pub(crate) usize);

/// One enforcement record attached to an expression.
#[derive(Debug)]
pub struct Enfo {
    pub hdlr: NlHdlrId,
    pub methods: Methods,
    pub data: NlHdlrExprData,
    /// Last `evalaux` result for the current separation round.
    pub auxvalue: f64,
}

pub type ExprTightenings = SmallVec<[(ExprId, Interval); 4]>;

pub trait NlHdlr {
    fn name(&self) -> &'static str;
    fn priority(&self) -> i32;

    /// Inspects `e` and either declines or returns the methods this
    /// handler will provide plus its per-expression data. Children whose
    /// values the handler needs in the relaxation must be pushed onto
    /// `aux_requests`.
    fn detect(
        &self,
        store: &mut ExprStore,
        hdlrs: &ExprHandlers,
        config: &EngineConfig,
        e: ExprId,
        enforced_below: bool,
        enforced_above: bool,
        aux_requests: &mut Vec<ExprId>,
    ) -> Option<(Methods, NlHdlrExprData)>;

    /// Value of the node's relaxation at the children's auxiliary values.
    fn evalaux(
        &self,
        store: &ExprStore,
        hdlrs: &ExprHandlers,
        data: &NlHdlrExprData,
        e: ExprId,
        driver: &dyn Driver,
    ) -> Option<f64>;

    fn inteval(
        &self,
        store: &ExprStore,
        hdlrs: &ExprHandlers,
        data: &NlHdlrExprData,
        e: ExprId,
        varbounds: &mut dyn FnMut(VarId) -> Interval,
    ) -> Interval;

    /// Tightened intervals for sub-expressions implied by `bounds` on `e`.
    fn reverseprop(
        &self,
        store: &ExprStore,
        hdlrs: &ExprHandlers,
        data: &NlHdlrExprData,
        e: ExprId,
        bounds: Interval,
        varbounds: &mut dyn FnMut(VarId) -> Interval,
    ) -> ExprTightenings;

    /// Fills `rowprep` with a linear under/over-estimator of `e` at the
    /// driver's current solution. Returns false when no usable estimator
    /// exists on the requested side.
    fn estimate(
        &self,
        store: &ExprStore,
        hdlrs: &ExprHandlers,
        config: &EngineConfig,
        data: &NlHdlrExprData,
        e: ExprId,
        driver: &dyn Driver,
        overestimate: bool,
        rowprep: &mut RowPrep,
    ) -> bool;
}

/// The auxiliary variable standing for `e` in the relaxation; variable
/// leaves stand for themselves.
pub fn aux_var_of(store: &ExprStore, e: ExprId) -> Option<VarId> {
    store.var_of(e).or_else(|| store.auxvar(e))
}

/// Value of `e` in the relaxation solution: constants evaluate to
/// themselves, everything else reads its auxiliary variable.
pub fn aux_value(store: &ExprStore, driver: &dyn Driver, e: ExprId) -> Option<f64> {
    if let Some(v) = store.value_of(e) {
        return Some(v);
    }
    aux_var_of(store, e).map(|var| driver.sol_value(var))
}

// ---- default handler ----------------------------------------------------

/// Fallback handler: forwards every callback to the node's operator.
pub struct DefaultNlHdlr;

impl NlHdlr for DefaultNlHdlr {
    fn name(&self) -> &'static str {
        "default"
    }

    fn priority(&self) -> i32 {
        -100
    }

    fn detect(
        &self,
        store: &mut ExprStore,
        hdlrs: &ExprHandlers,
        _config: &EngineConfig,
        e: ExprId,
        enforced_below: bool,
        enforced_above: bool,
        aux_requests: &mut Vec<ExprId>,
    ) -> Option<(Methods, NlHdlrExprData)> {
        let b = hdlrs.builtin();
        let hid = store.hdlr(e);
        if hid == b.var || hid == b.val {
            return None;
        }
        if enforced_below && enforced_above {
            return None;
        }
        for &c in store.children(e) {
            if store.value_of(c).is_none() {
                aux_requests.push(c);
            }
        }
        Some((
            Methods {
                sepa_below: !enforced_below,
                sepa_above: !enforced_above,
                inteval: true,
                reverseprop: true,
            },
            NlHdlrExprData::Default,
        ))
    }

    fn evalaux(
        &self,
        store: &ExprStore,
        hdlrs: &ExprHandlers,
        _data: &NlHdlrExprData,
        e: ExprId,
        driver: &dyn Driver,
    ) -> Option<f64> {
        let mut child_vals = Vec::with_capacity(store.nchildren(e));
        for &c in store.children(e) {
            child_vals.push(aux_value(store, driver, c)?);
        }
        let h = hdlrs.get(store.hdlr(e));
        let sol = |var: VarId| driver.sol_value(var);
        h.eval(store, e, &child_vals, &sol)
    }

    fn inteval(
        &self,
        store: &ExprStore,
        hdlrs: &ExprHandlers,
        _data: &NlHdlrExprData,
        e: ExprId,
        varbounds: &mut dyn FnMut(VarId) -> Interval,
    ) -> Interval {
        let child_ivs: Vec<Interval> =
            store.children(e).iter().map(|&c| store.interval(c)).collect();
        hdlrs.get(store.hdlr(e)).inteval(store, e, &child_ivs, varbounds)
    }

    fn reverseprop(
        &self,
        store: &ExprStore,
        hdlrs: &ExprHandlers,
        _data: &NlHdlrExprData,
        e: ExprId,
        bounds: Interval,
        _varbounds: &mut dyn FnMut(VarId) -> Interval,
    ) -> ExprTightenings {
        let child_ivs: Vec<Interval> =
            store.children(e).iter().map(|&c| store.interval(c)).collect();
        let h = hdlrs.get(store.hdlr(e));
        h.reverseprop(store, e, &bounds, &child_ivs)
            .into_iter()
            .map(|(i, iv)| (store.child(e, i), iv))
            .collect()
    }

    fn estimate(
        &self,
        store: &ExprStore,
        hdlrs: &ExprHandlers,
        _config: &EngineConfig,
        _data: &NlHdlrExprData,
        e: ExprId,
        driver: &dyn Driver,
        overestimate: bool,
        rowprep: &mut RowPrep,
    ) -> bool {
        let mut child_vals = Vec::with_capacity(store.nchildren(e));
        for &c in store.children(e) {
            match aux_value(store, driver, c) {
                Some(v) => child_vals.push(v),
                None => return false,
            }
        }
        let child_ivs: Vec<Interval> =
            store.children(e).iter().map(|&c| store.interval(c)).collect();
        let h = hdlrs.get(store.hdlr(e));
        let est = match h.estimate(store, e, &child_vals, &child_ivs, overestimate) {
            Some(est) => est,
            None => return false,
        };
        rowprep.add_constant(est.constant);
        for (i, &coef) in est.coefs.iter().enumerate() {
            if coef == 0.0 {
                continue;
            }
            let c = store.child(e, i);
            if let Some(v) = store.value_of(c) {
                rowprep.add_constant(coef * v);
                continue;
            }
            match aux_var_of(store, c) {
                Some(var) => rowprep.add_term(var, coef),
                None => return false,
            }
        }
        true
    }
}

// ---- registry ------------------------------------------------------------

#[derive(Debug, Default, Clone)]
pub struct NlHdlrStats {
    pub n_detections: u64,
    pub n_intevals: u64,
    pub n_reverseprops: u64,
    pub n_estimates: u64,
    pub n_cuts: u64,
    pub n_cutoffs: u64,
    pub n_domreds: u64,
    pub detect_time: Duration,
    pub inteval_time: Duration,
    pub reverseprop_time: Duration,
    pub estimate_time: Duration,
}

pub struct NlHdlrs {
    entries: Vec<Rc<dyn NlHdlr>>,
    stats: Vec<NlHdlrStats>,
}

impl NlHdlrs {
    /// Registry with the quadratic and default handlers.
    pub fn standard() -> Self {
        let mut r = NlHdlrs {
            entries: Vec::new(),
            stats: Vec::new(),
        };
        r.register(Rc::new(QuadraticNlHdlr));
        r.register(Rc::new(DefaultNlHdlr));
        r
    }

    pub fn empty() -> Self {
        NlHdlrs {
            entries: Vec::new(),
            stats: Vec::new(),
        }
    }

    /// Inserts keeping the descending-priority order.
    pub fn register(&mut self, h: Rc<dyn NlHdlr>) -> NlHdlrId {
        let pos = self
            .entries
            .iter()
            .position(|x| x.priority() < h.priority())
            .unwrap_or(self.entries.len());
        self.entries.insert(pos, h);
        self.stats.insert(pos, NlHdlrStats::default());
        // ids are positional; re-registering invalidates older ids, so
        // registration happens before any detection
        NlHdlrId(pos)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: NlHdlrId) -> Rc<dyn NlHdlr> {
        Rc::clone(&self.entries[id.0])
    }

    pub fn iter(&self) -> impl Iterator<Item = (NlHdlrId, Rc<dyn NlHdlr>)> + '_ {
        self.entries
            .iter()
            .enumerate()
            .map(|(i, h)| (NlHdlrId(i), Rc::clone(h)))
    }

    pub fn find(&self, name: &str) -> Option<NlHdlrId> {
        self.entries
            .iter()
            .position(|h| h.name() == name)
            .map(NlHdlrId)
    }

    pub fn stats(&self, id: NlHdlrId) -> &NlHdlrStats {
        &self.stats[id.0]
    }

    pub fn stats_mut(&mut self, id: NlHdlrId) -> &mut NlHdlrStats {
        &mut self.stats[id.0]
    }

    pub fn all_stats(&self) -> impl Iterator<Item = (&'static str, &NlHdlrStats)> {
        self.entries
            .iter()
            .map(|h| h.name())
            .zip(self.stats.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Probe(&'static str, i32);
    impl NlHdlr for Probe {
        fn name(&self) -> &'static str {
            self.0
        }
        fn priority(&self) -> i32 {
            self.1
        }
        fn detect(
            &self,
            _: &mut ExprStore,
            _: &ExprHandlers,
            _: &EngineConfig,
            _: ExprId,
            _: bool,
            _: bool,
            _: &mut Vec<ExprId>,
        ) -> Option<(Methods, NlHdlrExprData)> {
            None
        }
        fn evalaux(
            &self,
            _: &ExprStore,
            _: &ExprHandlers,
            _: &NlHdlrExprData,
            _: ExprId,
            _: &dyn Driver,
        ) -> Option<f64> {
            None
        }
        fn inteval(
            &self,
            _: &ExprStore,
            _: &ExprHandlers,
            _: &NlHdlrExprData,
            _: ExprId,
            _: &mut dyn FnMut(VarId) -> Interval,
        ) -> Interval {
            Interval::ENTIRE
        }
        fn reverseprop(
            &self,
            _: &ExprStore,
            _: &ExprHandlers,
            _: &NlHdlrExprData,
            _: ExprId,
            _: Interval,
            _: &mut dyn FnMut(VarId) -> Interval,
        ) -> ExprTightenings {
            ExprTightenings::new()
        }
        fn estimate(
            &self,
            _: &ExprStore,
            _: &ExprHandlers,
            _: &EngineConfig,
            _: &NlHdlrExprData,
            _: ExprId,
            _: &dyn Driver,
            _: bool,
            _: &mut RowPrep,
        ) -> bool {
            false
        }
    }

    #[test]
    fn registry_sorts_by_descending_priority() {
        let mut r = NlHdlrs::empty();
        r.register(Rc::new(Probe("low", -5)));
        r.register(Rc::new(Probe("high", 50)));
        r.register(Rc::new(Probe("mid", 10)));
        let names: Vec<_> = r.iter().map(|(_, h)| h.name()).collect();
        assert_eq!(names, vec!["high", "mid", "low"]);
    }

    #[test]
    fn standard_registry_prefers_quadratic() {
        let r = NlHdlrs::standard();
        let names: Vec<_> = r.iter().map(|(_, h)| h.name()).collect();
        assert_eq!(names, vec!["quadratic", "default"]);
    }
}
