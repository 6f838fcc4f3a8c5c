//! The operator-plugin trait and its append-only registry.
//!
//! Every node of the DAG points at an [`ExprHandler`]: the plugin that
//! defines the operator's semantics (evaluation, interval evaluation,
//! differentiation, simplification, estimation, printing, parsing). The
//! registry keeps per-handler call counters and clocks for the statistics
//! table.

use std::cmp::Ordering;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::rc::Rc;
use std::time::Duration;

use nlforge_interval::Interval;
use smallvec::SmallVec;

use crate::parser::{ParseError, Parser};
use crate::simplify::SimplifyCtx;
use crate::store::ExprStore;
use crate::types::{Curvature, ExprId, HdlrId, Monotonicity, SolPoint, VarId};

/// A linear under- or over-estimator of a node in terms of its children:
/// `constant + sum coefs[i] * child_i`.
#[derive(Debug, Clone)]
pub struct LinEstimate {
    pub constant: f64,
    pub coefs: SmallVec<[f64; 4]>,
}

/// Per-child interval tightenings proposed by reverse propagation.
pub type ChildTightenings = SmallVec<[(usize, Interval); 2]>;

/// An operator plugin.
///
/// Only `eval` is mandatory; every other callback has a conservative
/// default. Callbacks receive precomputed child values/intervals so that
/// handlers never recurse into the DAG themselves.
pub trait ExprHandler {
    /// Unique name, also the key for parsing and registry lookup.
    fn name(&self) -> &'static str;

    /// Binding strength for pretty-printing only.
    fn precedence(&self) -> u32 {
        0
    }

    /// Point evaluation given the children's values. `None` signals a
    /// domain error (e.g. `log(-1)`) and aborts the evaluation.
    fn eval(
        &self,
        store: &ExprStore,
        e: ExprId,
        child_vals: &[f64],
        sol: &dyn SolPoint,
    ) -> Option<f64>;

    /// Partial derivative with respect to child `child_idx`, assuming the
    /// children's evaluation caches are current.
    fn bwdiff(
        &self,
        _store: &ExprStore,
        _e: ExprId,
        _child_idx: usize,
        _child_vals: &[f64],
    ) -> Option<f64> {
        None
    }

    /// Over-approximation of the node's value range over the children's
    /// intervals. Must be monotone in the input intervals.
    fn inteval(
        &self,
        _store: &ExprStore,
        _e: ExprId,
        _child_ivs: &[Interval],
        _varbounds: &mut dyn FnMut(VarId) -> Interval,
    ) -> Interval {
        Interval::ENTIRE
    }

    /// Given the node's current interval, propose tightened child
    /// intervals. The caller applies them through the tightening primitive.
    fn reverseprop(
        &self,
        _store: &ExprStore,
        _e: ExprId,
        _bounds: &Interval,
        _child_ivs: &[Interval],
    ) -> ChildTightenings {
        SmallVec::new()
    }

    /// Rewrites the node into canonical form, assuming all children are
    /// already simplified. Returns a new expression holding one use for the
    /// caller; the default captures and returns the node unchanged.
    fn simplify(&self, ctx: &mut SimplifyCtx<'_>, e: ExprId) -> ExprId {
        ctx.store.capture(e);
        e
    }

    /// Hash of the operator payload; must be consistent with
    /// [`compare_payload`](Self::compare_payload). The default hashes the
    /// handler name.
    fn hash_payload(&self, _store: &ExprStore, _e: ExprId) -> u64 {
        let mut h = DefaultHasher::new();
        self.name().hash(&mut h);
        h.finish()
    }

    /// Payload comparison for two nodes of this same handler; children are
    /// compared lexicographically by the caller afterwards.
    fn compare_payload(&self, _store: &ExprStore, _a: ExprId, _b: ExprId) -> Ordering {
        Ordering::Equal
    }

    /// Curvature over the children's current intervals and curvatures.
    fn curvature(&self, _store: &ExprStore, _e: ExprId) -> Curvature {
        Curvature::Unknown
    }

    /// Monotonicity in child `child_idx` over the children's intervals.
    fn monotonicity(&self, _store: &ExprStore, _e: ExprId, _child_idx: usize) -> Monotonicity {
        Monotonicity::Unknown
    }

    /// Whether the node takes integral values whenever all children do;
    /// children's integrality flags are already up to date.
    fn integrality(&self, _store: &ExprStore, _e: ExprId) -> bool {
        false
    }

    /// A linear estimator valid on the children's intervals, below
    /// (`overestimate == false`) or above the node's graph. `child_vals`
    /// holds the children's values at the point to estimate at.
    fn estimate(
        &self,
        _store: &ExprStore,
        _e: ExprId,
        _child_vals: &[f64],
        _child_ivs: &[Interval],
        _overestimate: bool,
    ) -> Option<LinEstimate> {
        None
    }

    /// Renders the node given its children already rendered (and
    /// parenthesized by the central printer where needed).
    fn format(&self, _store: &ExprStore, _e: ExprId, child_strs: &[String]) -> String {
        format!("{}({})", self.name(), child_strs.join(","))
    }

    /// Parses the argument list of `name(...)`; the parser is positioned
    /// right after the opening parenthesis and the handler must consume the
    /// closing one.
    fn parse_call(&self, _p: &mut Parser<'_, '_>) -> Result<ExprId, ParseError> {
        Err(ParseError::UnsupportedFunction(self.name().to_string()))
    }
}

/// Which callback a clock/counter belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HdlrPhase {
    Eval,
    IntEval,
    Simplify,
    ReverseProp,
    Estimate,
}

/// Call counters and accumulated wall clocks of one handler.
#[derive(Debug, Default, Clone)]
pub struct HdlrStats {
    pub n_eval: u64,
    pub n_inteval: u64,
    pub n_simplify: u64,
    pub n_reverseprop: u64,
    pub n_estimate: u64,
    pub n_cuts: u64,
    pub n_domain_reductions: u64,
    pub n_branchscores: u64,
    pub eval_time: Duration,
    pub inteval_time: Duration,
    pub simplify_time: Duration,
    pub reverseprop_time: Duration,
    pub estimate_time: Duration,
}

impl HdlrStats {
    pub fn record(&mut self, phase: HdlrPhase, elapsed: Duration) {
        match phase {
            HdlrPhase::Eval => {
                self.n_eval += 1;
                self.eval_time += elapsed;
            }
            HdlrPhase::IntEval => {
                self.n_inteval += 1;
                self.inteval_time += elapsed;
            }
            HdlrPhase::Simplify => {
                self.n_simplify += 1;
                self.simplify_time += elapsed;
            }
            HdlrPhase::ReverseProp => {
                self.n_reverseprop += 1;
                self.reverseprop_time += elapsed;
            }
            HdlrPhase::Estimate => {
                self.n_estimate += 1;
                self.estimate_time += elapsed;
            }
        }
    }
}

/// Well-known handler ids after standard registration.
#[derive(Debug, Clone, Copy)]
pub struct BuiltinIds {
    pub var: HdlrId,
    pub val: HdlrId,
    pub sum: HdlrId,
    pub product: HdlrId,
    pub pow: HdlrId,
    pub exp: HdlrId,
    pub log: HdlrId,
    pub abs: HdlrId,
}

/// Append-only handler registry. Lookup is a linear name scan; the table
/// stays small.
pub struct ExprHandlers {
    entries: Vec<Rc<dyn ExprHandler>>,
    stats: Vec<HdlrStats>,
    builtin: BuiltinIds,
}

impl ExprHandlers {
    /// Registry preloaded with the standard operator handlers.
    pub fn standard() -> Self {
        use crate::operators::*;
        let mut entries: Vec<Rc<dyn ExprHandler>> = Vec::new();
        let mut push = |h: Rc<dyn ExprHandler>| {
            entries.push(h);
            HdlrId(entries.len() - 1)
        };
        let builtin = BuiltinIds {
            var: push(Rc::new(VarHandler)),
            val: push(Rc::new(ValueHandler)),
            sum: push(Rc::new(SumHandler)),
            product: push(Rc::new(ProductHandler)),
            pow: push(Rc::new(PowHandler)),
            exp: push(Rc::new(ExpHandler)),
            log: push(Rc::new(LogHandler)),
            abs: push(Rc::new(AbsHandler)),
        };
        let stats = vec![HdlrStats::default(); entries.len()];
        ExprHandlers {
            entries,
            stats,
            builtin,
        }
    }

    /// Registers an additional handler; the registry is append-only.
    pub fn register(&mut self, h: Rc<dyn ExprHandler>) -> HdlrId {
        debug_assert!(
            self.find(h.name()).is_none(),
            "duplicate handler name {}",
            h.name()
        );
        self.entries.push(h);
        self.stats.push(HdlrStats::default());
        HdlrId(self.entries.len() - 1)
    }

    pub fn find(&self, name: &str) -> Option<HdlrId> {
        self.entries
            .iter()
            .position(|h| h.name() == name)
            .map(HdlrId)
    }

    pub fn get(&self, id: HdlrId) -> Rc<dyn ExprHandler> {
        Rc::clone(&self.entries[id.0])
    }

    pub fn name_of(&self, id: HdlrId) -> &'static str {
        self.entries[id.0].name()
    }

    pub fn builtin(&self) -> BuiltinIds {
        self.builtin
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self, id: HdlrId) -> &HdlrStats {
        &self.stats[id.0]
    }

    pub fn stats_mut(&mut self, id: HdlrId) -> &mut HdlrStats {
        &mut self.stats[id.0]
    }

    pub fn all_stats(&self) -> impl Iterator<Item = (&'static str, &HdlrStats)> {
        self.entries
            .iter()
            .map(|h| h.name())
            .zip(self.stats.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_registry_has_builtins() {
        let hdlrs = ExprHandlers::standard();
        assert_eq!(hdlrs.find("sum"), Some(hdlrs.builtin().sum));
        assert_eq!(hdlrs.find("prod"), Some(hdlrs.builtin().product));
        assert_eq!(hdlrs.find("pow"), Some(hdlrs.builtin().pow));
        assert!(hdlrs.find("nosuch").is_none());
    }

    #[test]
    fn stats_record_accumulates() {
        let mut stats = HdlrStats::default();
        stats.record(HdlrPhase::Eval, Duration::from_micros(3));
        stats.record(HdlrPhase::Eval, Duration::from_micros(2));
        stats.record(HdlrPhase::IntEval, Duration::ZERO);
        assert_eq!(stats.n_eval, 2);
        assert_eq!(stats.n_inteval, 1);
        assert_eq!(stats.eval_time, Duration::from_micros(5));
    }
}
