//! Constraint storage and engine lifecycle: creation, parsing, checking,
//! nonlinear-handler detection, and the common-subexpression pass.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;
use std::time::Instant;

use nlforge_config::EngineConfig;
use nlforge_expr::{
    compute_curvature, compute_integrality, eval, inteval, parse_constraint, post_order, print_expr,
    remove_locks, replace_common_subexprs, simplify, ExprHandlers, ExprId, ExprPayload, ExprStore,
    ParseError, VarId, VarType,
};
use nlforge_interval::Interval;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::driver::Driver;
use crate::nlhdlr::{Enfo, NlHdlr, NlHdlrId, NlHdlrs};
use crate::propagate::PropResult;
use crate::stats::EngineStats;

#[derive(Debug, Error)]
pub enum ConsError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    /// Detection left a node without enforcement on some side.
    #[error("constraint '{cons}': expression cannot be enforced ({side} side)")]
    Unenforceable { cons: String, side: &'static str },
}

/// A root expression bracketed by `lhs <= expr <= rhs`.
#[derive(Debug)]
pub struct Constraint {
    pub name: String,
    pub root: ExprId,
    pub lhs: f64,
    pub rhs: f64,
    /// Violation of each side at the last checked solution.
    pub lhsviol: f64,
    pub rhsviol: f64,
    /// Unique variable leaves under `root`, cached at creation.
    pub var_exprs: Vec<ExprId>,
    pub propagated: bool,
    pub deleted: bool,
}

impl Constraint {
    pub fn violation(&self) -> f64 {
        self.lhsviol.max(self.rhsviol)
    }
}

/// Linear image of a constraint whose root is a sum of variable leaves.
#[derive(Debug, Clone, PartialEq)]
pub struct LinearForm {
    pub coefs: Vec<(VarId, f64)>,
    pub lhs: f64,
    pub rhs: f64,
}

pub struct ConsEngine {
    pub store: ExprStore,
    pub hdlrs: ExprHandlers,
    pub nlhdlrs: NlHdlrs,
    pub config: EngineConfig,
    pub stats: EngineStats,
    pub(crate) conss: Vec<Constraint>,
    pub(crate) enfos: HashMap<ExprId, Vec<Enfo>>,
    pub(crate) queue: VecDeque<ExprId>,
    n_auxvars: u32,
}

impl ConsEngine {
    pub fn new(config: EngineConfig) -> Self {
        ConsEngine {
            store: ExprStore::new(),
            hdlrs: ExprHandlers::standard(),
            nlhdlrs: NlHdlrs::standard(),
            config,
            stats: EngineStats::default(),
            conss: Vec::new(),
            enfos: HashMap::new(),
            queue: VecDeque::new(),
            n_auxvars: 0,
        }
    }

    pub fn n_conss(&self) -> usize {
        self.conss.len()
    }

    pub fn cons(&self, i: usize) -> &Constraint {
        &self.conss[i]
    }

    pub fn enfos_of(&self, e: ExprId) -> &[Enfo] {
        self.enfos.get(&e).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Takes over the caller's use of `root`, stores the simplified form.
    /// A sum root's constant is folded into the sides so activities start
    /// at zero.
    pub fn add_cons(&mut self, name: &str, root: ExprId, lhs: f64, rhs: f64) -> usize {
        let simplified = simplify(&mut self.store, &mut self.hdlrs, root);
        self.store.release(root);

        let (mut lhs, mut rhs) = (lhs, rhs);
        if let ExprPayload::Sum { constant, .. } = self.store.payload(simplified) {
            let c = *constant;
            if c != 0.0 {
                if let ExprPayload::Sum { constant, .. } = self.store.payload_mut(simplified) {
                    *constant = 0.0;
                }
                if lhs.is_finite() {
                    lhs -= c;
                }
                if rhs.is_finite() {
                    rhs -= c;
                }
            }
        }

        let mut var_exprs: Vec<ExprId> = Vec::new();
        for e in post_order(&self.store, simplified) {
            if self.store.var_of(e).is_some() && !var_exprs.contains(&e) {
                var_exprs.push(e);
            }
        }

        let nlockspos = rhs.is_finite() as i32;
        let nlocksneg = lhs.is_finite() as i32;
        nlforge_expr::add_locks(&mut self.store, &self.hdlrs, simplified, nlockspos, nlocksneg);

        debug!(event = "cons_added", name, lhs, rhs, nvars = var_exprs.len());
        self.conss.push(Constraint {
            name: name.to_string(),
            root: simplified,
            lhs,
            rhs,
            lhsviol: 0.0,
            rhsviol: 0.0,
            var_exprs,
            propagated: false,
            deleted: false,
        });
        self.conss.len() - 1
    }

    pub fn parse_cons(
        &mut self,
        name: &str,
        input: &str,
        resolve: &mut dyn FnMut(&str) -> Option<(VarId, VarType)>,
    ) -> Result<usize, ConsError> {
        let (root, lhs, rhs) = parse_constraint(&mut self.store, &self.hdlrs, input, resolve)?;
        Ok(self.add_cons(name, root, lhs, rhs))
    }

    /// Shares structurally identical subtrees across all constraint roots.
    /// Locks come off while children are rewired and go back onto the
    /// shared representatives afterwards.
    pub fn apply_cse(&mut self) {
        for cons in &self.conss {
            if !cons.deleted {
                remove_locks(
                    &mut self.store,
                    &self.hdlrs,
                    cons.root,
                    cons.rhs.is_finite() as i32,
                    cons.lhs.is_finite() as i32,
                );
            }
        }
        let mut roots: Vec<ExprId> = self.conss.iter().map(|c| c.root).collect();
        replace_common_subexprs(&mut self.store, &self.hdlrs, &mut roots);
        for (cons, root) in self.conss.iter_mut().zip(roots) {
            cons.root = root;
            cons.var_exprs.clear();
        }
        // leaf caches are rebuilt lazily against the merged roots
        let mut rebuilt: Vec<Vec<ExprId>> = Vec::with_capacity(self.conss.len());
        for cons in &self.conss {
            let mut leaves = Vec::new();
            for e in post_order(&self.store, cons.root) {
                if self.store.var_of(e).is_some() && !leaves.contains(&e) {
                    leaves.push(e);
                }
            }
            rebuilt.push(leaves);
        }
        for (cons, leaves) in self.conss.iter_mut().zip(rebuilt) {
            cons.var_exprs = leaves;
        }

        // constraints that collapsed onto the same root merge into one
        let mut seen: HashMap<ExprId, usize> = HashMap::new();
        for ci in 0..self.conss.len() {
            if self.conss[ci].deleted {
                continue;
            }
            let root = self.conss[ci].root;
            match seen.entry(root) {
                Entry::Vacant(v) => {
                    v.insert(ci);
                }
                Entry::Occupied(o) => {
                    let keep = *o.get();
                    let (lhs, rhs) = (self.conss[ci].lhs, self.conss[ci].rhs);
                    self.conss[keep].lhs = self.conss[keep].lhs.max(lhs);
                    self.conss[keep].rhs = self.conss[keep].rhs.min(rhs);
                    self.conss[keep].propagated = false;
                    self.conss[ci].deleted = true;
                    self.store.release(root);
                    debug!(
                        event = "cons_merged",
                        kept = %self.conss[keep].name,
                        dropped = %self.conss[ci].name,
                    );
                }
            }
        }

        for cons in &self.conss {
            if !cons.deleted {
                nlforge_expr::add_locks(
                    &mut self.store,
                    &self.hdlrs,
                    cons.root,
                    cons.rhs.is_finite() as i32,
                    cons.lhs.is_finite() as i32,
                );
            }
        }
    }

    /// Feasibility check of the driver's solution against every constraint.
    /// An evaluation error makes the constraint's violation infinite.
    pub fn check(&mut self, driver: &dyn Driver) -> bool {
        let mut feasible = true;
        let mut new_point = true;
        for ci in 0..self.conss.len() {
            if self.conss[ci].deleted {
                continue;
            }
            let root = self.conss[ci].root;
            let sol = |v: VarId| driver.sol_value(v);
            let val = eval(&mut self.store, &mut self.hdlrs, root, &sol, new_point);
            new_point = false;
            match val {
                Some(v) => {
                    let cons = &mut self.conss[ci];
                    cons.lhsviol = (cons.lhs - v).max(0.0);
                    cons.rhsviol = (v - cons.rhs).max(0.0);
                }
                None => {
                    {
                        let cons = &mut self.conss[ci];
                        cons.lhsviol = f64::INFINITY;
                        cons.rhsviol = f64::INFINITY;
                    }
                    let text = print_expr(&self.store, &self.hdlrs, root);
                    let assignment: Vec<(VarId, f64)> = self.conss[ci]
                        .var_exprs
                        .iter()
                        .filter_map(|&e| self.store.var_of(e))
                        .map(|v| (v, driver.sol_value(v)))
                        .collect();
                    warn!(
                        event = "eval_error",
                        cons = %self.conss[ci].name,
                        expr = %text,
                        ?assignment,
                    );
                }
            }
            let cons = &self.conss[ci];
            if cons.violation() > self.config.feastol {
                info!(
                    event = "cons_violated",
                    cons = %cons.name,
                    lhs = cons.lhs,
                    rhs = cons.rhs,
                    lhsviol = cons.lhsviol,
                    rhsviol = cons.rhsviol,
                );
                feasible = false;
            }
        }
        feasible
    }

    /// Succeeds only when the root is a sum of variable leaves.
    pub fn try_upgrade_to_linear(&self, ci: usize) -> Option<LinearForm> {
        let cons = &self.conss[ci];
        let root = cons.root;
        if self.store.hdlr(root) != self.hdlrs.builtin().sum {
            return None;
        }
        let (constant, coefs) = match self.store.payload(root) {
            ExprPayload::Sum { constant, coefs } => (*constant, coefs.clone()),
            _ => return None,
        };
        let mut out = Vec::with_capacity(coefs.len());
        for (i, &child) in self.store.children(root).iter().enumerate() {
            let var = self.store.var_of(child)?;
            out.push((var, coefs[i]));
        }
        let lhs = if cons.lhs.is_finite() { cons.lhs - constant } else { cons.lhs };
        let rhs = if cons.rhs.is_finite() { cons.rhs - constant } else { cons.rhs };
        Some(LinearForm { coefs: out, lhs, rhs })
    }

    fn ensure_auxvar(&mut self, driver: &mut dyn Driver, e: ExprId) -> Option<VarId> {
        if let Some(v) = self.store.var_of(e) {
            return Some(v);
        }
        if self.store.value_of(e).is_some() {
            return None;
        }
        if let Some(v) = self.store.auxvar(e) {
            return Some(v);
        }
        let iv = self.store.interval(e);
        let vtype = if self.store.is_integral(e) {
            VarType::Integer
        } else {
            VarType::Continuous
        };
        let name = format!("aux_{}", self.n_auxvars);
        self.n_auxvars += 1;
        let var = driver.add_var(&name, iv.inf, iv.sup, vtype);
        self.store.set_auxvar(e, var);
        debug!(event = "auxvar_created", name, lb = iv.inf, ub = iv.sup);
        Some(var)
    }

    /// Relaxation setup: forward-propagate fresh intervals, compute
    /// integrality and curvature, introduce auxiliary variables, and let
    /// nonlinear handlers claim enforcement of every auxiliary node.
    /// Returns `Cutoff` when the closing reverse pass proves infeasibility.
    pub fn init_lp(&mut self, driver: &mut dyn Driver) -> Result<PropResult, ConsError> {
        let eps = self.config.epsilon;
        let mut new_box = true;
        for ci in 0..self.conss.len() {
            if self.conss[ci].deleted || self.store.auxvar(self.conss[ci].root).is_some() {
                continue;
            }
            let root = self.conss[ci].root;
            let mut vb = |v: VarId| {
                let (lb, ub) = driver.var_bounds(v);
                Interval::new(lb - eps, ub + eps)
            };
            inteval(&mut self.store, &mut self.hdlrs, root, &mut vb, new_box);
            new_box = false;
            compute_integrality(&mut self.store, &self.hdlrs, root);
            compute_curvature(&mut self.store, &self.hdlrs, root);

            // root auxvar carries the constraint sides
            let iv = self.store.interval(root);
            let lb = self.conss[ci].lhs.max(iv.inf);
            let ub = self.conss[ci].rhs.min(iv.sup);
            if self.store.var_of(root).is_none() && self.store.value_of(root).is_none() {
                let vtype = if self.store.is_integral(root) {
                    VarType::Integer
                } else {
                    VarType::Continuous
                };
                let name = format!("aux_{}", self.n_auxvars);
                self.n_auxvars += 1;
                let var = driver.add_var(&name, lb, ub, vtype);
                self.store.set_auxvar(root, var);
            }

            self.detect_cons(driver, ci)?;
        }

        // domain-of-definition bounds reach the variables even when no
        // interval shrank during detection
        let prop = self.reverse_prop_all(driver);
        if prop == PropResult::Cutoff {
            self.stats.n_cutoffs += 1;
        }
        Ok(prop)
    }

    fn detect_cons(&mut self, driver: &mut dyn Driver, ci: usize) -> Result<(), ConsError> {
        let handlers: Vec<(NlHdlrId, Rc<dyn NlHdlr>)> = self.nlhdlrs.iter().collect();
        let mut worklist = vec![self.conss[ci].root];
        while let Some(e) = worklist.pop() {
            if self.store.var_of(e).is_some() || self.store.value_of(e).is_some() {
                continue;
            }
            // shared subexpression already claimed through another root
            if self.enfos.contains_key(&e) {
                continue;
            }
            let mut enforced_below = false;
            let mut enforced_above = false;
            let mut records = Vec::new();
            for (id, h) in &handlers {
                let mut aux_requests = Vec::new();
                let started = Instant::now();
                let detected = h.detect(
                    &mut self.store,
                    &self.hdlrs,
                    &self.config,
                    e,
                    enforced_below,
                    enforced_above,
                    &mut aux_requests,
                );
                let elapsed = started.elapsed();
                let s = self.nlhdlrs.stats_mut(*id);
                s.detect_time += elapsed;
                if let Some((methods, data)) = detected {
                    s.n_detections += 1;
                    enforced_below |= methods.sepa_below;
                    enforced_above |= methods.sepa_above;
                    records.push(Enfo {
                        hdlr: *id,
                        methods,
                        data,
                        auxvalue: f64::NAN,
                    });
                    for child in aux_requests {
                        self.ensure_auxvar(driver, child);
                        worklist.push(child);
                    }
                }
            }
            if !enforced_below || !enforced_above {
                let side = if enforced_below { "above" } else { "below" };
                return Err(ConsError::Unenforceable {
                    cons: self.conss[ci].name.clone(),
                    side,
                });
            }
            self.enfos.insert(e, records);
        }
        Ok(())
    }
}

impl Drop for ConsEngine {
    fn drop(&mut self) {
        for cons in &self.conss {
            if !cons.deleted {
                self.store.release(cons.root);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::BasicDriver;

    fn resolver(driver: &mut BasicDriver) -> impl FnMut(&str) -> Option<(VarId, VarType)> + '_ {
        let mut known: HashMap<String, VarId> = HashMap::new();
        move |name: &str| {
            let v = match known.get(name) {
                Some(&v) => v,
                None => {
                    let v = driver.add_var(name, -10.0, 10.0, VarType::Continuous);
                    known.insert(name.to_string(), v);
                    v
                }
            };
            Some((v, VarType::Continuous))
        }
    }

    #[test]
    fn sum_constant_moves_into_sides() {
        let mut engine = ConsEngine::new(EngineConfig::default());
        let mut driver = BasicDriver::new();
        let ci = {
            let mut resolve = resolver(&mut driver);
            engine
                .parse_cons("q", "3 + 2*<x>*<y> - (<z>)^2 <= 5", &mut resolve)
                .unwrap()
        };
        let cons = engine.cons(ci);
        assert_eq!(cons.lhs, f64::NEG_INFINITY);
        assert_eq!(cons.rhs, 2.0);
        let root = cons.root;
        match engine.store.payload(root) {
            ExprPayload::Sum { constant, coefs } => {
                assert_eq!(*constant, 0.0);
                assert_eq!(coefs.len(), 2);
                assert!(coefs.contains(&2.0));
                assert!(coefs.contains(&-1.0));
            }
            other => panic!("expected sum root, got {other:?}"),
        }
        // one bilinear child, one square child
        let b = engine.hdlrs.builtin();
        let kinds: Vec<_> = engine
            .store
            .children(root)
            .iter()
            .map(|&c| engine.store.hdlr(c))
            .collect();
        assert!(kinds.contains(&b.product));
        assert!(kinds.contains(&b.pow));
        assert_eq!(cons.var_exprs.len(), 3);
    }

    #[test]
    fn check_reports_violations_per_side() {
        let mut engine = ConsEngine::new(EngineConfig::default());
        let mut driver = BasicDriver::new();
        let ci = {
            let mut resolve = resolver(&mut driver);
            engine.parse_cons("c", "1 <= <x>^2 <= 4", &mut resolve).unwrap()
        };
        driver.set_sol_value(VarId(0), 3.0);
        assert!(!engine.check(&driver));
        assert_eq!(engine.cons(ci).rhsviol, 5.0);
        assert_eq!(engine.cons(ci).lhsviol, 0.0);

        driver.set_sol_value(VarId(0), 1.5);
        assert!(engine.check(&driver));
        assert_eq!(engine.cons(ci).violation(), 0.0);
    }

    #[test]
    fn eval_error_makes_violation_infinite() {
        let mut engine = ConsEngine::new(EngineConfig::default());
        let mut driver = BasicDriver::new();
        let _ci = {
            let mut resolve = resolver(&mut driver);
            engine.parse_cons("c", "log(<x>) <= 1", &mut resolve).unwrap()
        };
        driver.set_sol_value(VarId(0), -2.0);
        assert!(!engine.check(&driver));
        assert_eq!(engine.cons(0).rhsviol, f64::INFINITY);
    }

    #[test]
    fn linear_upgrade_requires_variable_leaves() {
        let mut engine = ConsEngine::new(EngineConfig::default());
        let mut driver = BasicDriver::new();
        let (lin, nonlin) = {
            let mut resolve = resolver(&mut driver);
            let lin = engine.parse_cons("lin", "2*<x> + 3*<y> <= 6", &mut resolve).unwrap();
            let nonlin = engine.parse_cons("nl", "<x>^2 + <y> <= 6", &mut resolve).unwrap();
            (lin, nonlin)
        };
        let form = engine.try_upgrade_to_linear(lin).unwrap();
        assert_eq!(form.rhs, 6.0);
        assert_eq!(form.coefs.len(), 2);
        assert!(form.coefs.contains(&(VarId(0), 2.0)));
        assert!(form.coefs.contains(&(VarId(1), 3.0)));
        assert!(engine.try_upgrade_to_linear(nonlin).is_none());
    }

    #[test]
    fn cse_shares_identical_subtrees_across_constraints() {
        let mut engine = ConsEngine::new(EngineConfig::default());
        let mut driver = BasicDriver::new();
        {
            let mut resolve = resolver(&mut driver);
            engine.parse_cons("a", "<x>^2 + <y> <= 1", &mut resolve).unwrap();
            engine.parse_cons("b", "<x>^2 - <y> <= 1", &mut resolve).unwrap();
        }
        let before = engine.store.live_count();
        engine.apply_cse();
        assert!(engine.store.live_count() < before);
        // the shared square carries both constraints' locks
        let root = engine.cons(0).root;
        let b = engine.hdlrs.builtin();
        let sq = engine
            .store
            .children(root)
            .iter()
            .copied()
            .find(|&c| engine.store.hdlr(c) == b.pow)
            .unwrap();
        assert_eq!(engine.store.locks(sq), (2, 0));
    }

    #[test]
    fn identical_constraints_merge_with_tightest_sides() {
        let mut engine = ConsEngine::new(EngineConfig::default());
        let mut driver = BasicDriver::new();
        {
            let mut resolve = resolver(&mut driver);
            engine.parse_cons("a", "<x>^2 + <y> <= 5", &mut resolve).unwrap();
            engine.parse_cons("b", "1 <= <x>^2 + <y> <= 3", &mut resolve).unwrap();
        }
        engine.apply_cse();
        assert!(!engine.cons(0).deleted);
        assert!(engine.cons(1).deleted);
        assert_eq!(engine.cons(0).lhs, 1.0);
        assert_eq!(engine.cons(0).rhs, 3.0);
        // re-locking uses the merged sides, now finite on both
        assert_eq!(engine.store.locks(engine.cons(0).root), (1, 1));
    }

    #[test]
    fn infeasible_domain_is_a_cutoff_at_init() {
        let mut engine = ConsEngine::new(EngineConfig::default());
        let mut driver = BasicDriver::new();
        let x = driver.add_var("x", -3.0, -2.0, VarType::Continuous);
        {
            let mut resolve = |name: &str| {
                (name == "x").then_some((x, VarType::Continuous))
            };
            engine.parse_cons("c", "log(<x>) <= 1", &mut resolve).unwrap();
        }
        assert_eq!(engine.init_lp(&mut driver).unwrap(), PropResult::Cutoff);
        assert!(engine.stats.n_cutoffs > 0);
    }

    #[test]
    fn detection_attaches_enforcement_everywhere() {
        let mut engine = ConsEngine::new(EngineConfig::default());
        let mut driver = BasicDriver::new();
        let ci = {
            let mut resolve = resolver(&mut driver);
            engine.parse_cons("c", "exp(<x>) + <y>^2 <= 4", &mut resolve).unwrap()
        };
        engine.init_lp(&mut driver).unwrap();
        let root = engine.cons(ci).root;
        assert!(engine.store.auxvar(root).is_some());
        assert!(!engine.enfos_of(root).is_empty());
        // each non-leaf child carries its own auxvar and enforcement
        let children: Vec<ExprId> = engine.store.children(root).to_vec();
        for c in children {
            if engine.store.var_of(c).is_none() {
                assert!(engine.store.auxvar(c).is_some());
                assert!(!engine.enfos_of(c).is_empty());
            }
        }
    }
}
