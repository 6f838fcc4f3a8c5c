//! Interval propagation: forward activity computation per constraint and
//! FIFO-driven reverse propagation through handler and nlhdlr callbacks.

use std::rc::Rc;
use std::time::Instant;

use nlforge_config::EngineConfig;
use nlforge_expr::{compute_curvature, inteval_node, post_order, ExprId, VarId, VarType};
use nlforge_interval::Interval;
use tracing::debug;

use crate::cons::ConsEngine;
use crate::driver::{Driver, TightenResult};
use crate::nlhdlr::NlHdlr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropResult {
    Unchanged,
    Reduced,
    Cutoff,
}

/// Variable interval for bound tightening: local bounds relaxed outward
/// by a small absolute amount, except that integer bounds stay exact.
pub(crate) fn var_interval(driver: &dyn Driver, config: &EngineConfig, var: VarId) -> Interval {
    let (lb, ub) = driver.var_bounds(var);
    match driver.var_type(var) {
        VarType::Continuous => {
            let relax = config.var_bound_relax;
            let lo = if lb.is_finite() { lb - relax } else { lb };
            let hi = if ub.is_finite() { ub + relax } else { ub };
            Interval::new(lo, hi)
        }
        VarType::Integer | VarType::Binary => Interval::new(lb, ub),
    }
}

impl ConsEngine {
    fn enqueue(&mut self, e: ExprId) {
        if self.store.nchildren(e) > 0 && !self.store.in_queue(e) {
            self.store.set_in_queue(e, true);
            self.queue.push_back(e);
        }
    }

    fn drain_queue(&mut self) {
        while let Some(e) = self.queue.pop_front() {
            self.store.set_in_queue(e, false);
        }
    }

    /// The interval-tightening primitive. Intersects `newbounds` into the
    /// node's interval; on a significant change the auxiliary variable's
    /// local bounds follow and the node is queued for reverse propagation.
    pub(crate) fn tighten_expr_interval(
        &mut self,
        driver: &mut dyn Driver,
        e: ExprId,
        newbounds: Interval,
        force: bool,
    ) -> PropResult {
        let current = if self.store.interval_fresh(e) {
            self.store.interval(e)
        } else {
            Interval::ENTIRE
        };
        let isect = newbounds.intersect(&current);
        if isect.is_empty() {
            self.store.set_interval(e, Interval::EMPTY);
            return PropResult::Cutoff;
        }
        // crossed infinities after intersection are a numerical artifact
        // of unbounded directions cancelling; treat as infeasible
        if isect.inf == f64::INFINITY || isect.sup == f64::NEG_INFINITY {
            self.store.set_interval(e, Interval::EMPTY);
            return PropResult::Cutoff;
        }

        let tol = self.config.bound_strengthen_tol;
        let significant = isect.inf > current.inf + tol || isect.sup < current.sup - tol;
        if !significant && !force {
            return PropResult::Unchanged;
        }

        self.store.set_interval(e, isect);
        self.store.set_has_tightened(e, true);

        if let Some(var) = crate::nlhdlr::aux_var_of(&self.store, e) {
            let mut changed = false;
            match driver.tighten_lb(var, isect.inf) {
                TightenResult::Infeasible => {
                    self.drain_queue();
                    return PropResult::Cutoff;
                }
                TightenResult::Tightened => changed = true,
                TightenResult::Unchanged => {}
            }
            match driver.tighten_ub(var, isect.sup) {
                TightenResult::Infeasible => {
                    self.drain_queue();
                    return PropResult::Cutoff;
                }
                TightenResult::Tightened => changed = true,
                TightenResult::Unchanged => {}
            }
            if changed {
                self.stats.n_domain_reductions += 1;
                for cons in self.conss.iter_mut() {
                    cons.propagated = false;
                }
            }
        }

        self.enqueue(e);
        PropResult::Reduced
    }

    /// Forward pass over one constraint: post-order activity computation,
    /// intersected with nlhdlr intervals, auxiliary-variable bounds, and
    /// the constraint sides at the root.
    pub(crate) fn forward_prop_cons(&mut self, driver: &mut dyn Driver, ci: usize) -> PropResult {
        let root = self.conss[ci].root;
        let sides = Interval::new(self.conss[ci].lhs, self.conss[ci].rhs);
        let eps = self.config.epsilon;
        let config = self.config.clone();
        let mut result = PropResult::Unchanged;

        for e in post_order(&self.store, root) {
            if self.store.interval_fresh(e) {
                continue;
            }
            let raw = if let Some(v) = self.store.var_of(e) {
                var_interval(driver, &config, v)
            } else {
                let with_inteval: Vec<Rc<dyn NlHdlr>> = self
                    .enfos_of(e)
                    .iter()
                    .filter(|enfo| enfo.methods.inteval)
                    .map(|enfo| self.nlhdlrs.get(enfo.hdlr))
                    .collect();
                if with_inteval.is_empty() {
                    let mut vb = |v: VarId| var_interval(driver, &config, v);
                    inteval_node(&self.store, &mut self.hdlrs, e, &mut vb)
                } else {
                    let mut iv = Interval::ENTIRE;
                    let mut recorded = Vec::with_capacity(with_inteval.len());
                    for (h, enfo) in with_inteval.iter().zip(
                        self.enfos_of(e).iter().filter(|enfo| enfo.methods.inteval),
                    ) {
                        let mut vb = |v: VarId| var_interval(driver, &config, v);
                        let started = Instant::now();
                        let part =
                            h.inteval(&self.store, &self.hdlrs, &enfo.data, e, &mut vb);
                        recorded.push((enfo.hdlr, started.elapsed()));
                        iv = iv.intersect(&part);
                        if iv.is_empty() {
                            break;
                        }
                    }
                    for (id, elapsed) in recorded {
                        let s = self.nlhdlrs.stats_mut(id);
                        s.n_intevals += 1;
                        s.inteval_time += elapsed;
                    }
                    iv
                }
            };

            let mut iv = raw;
            if let Some(aux) = self.store.auxvar(e) {
                let (lb, ub) = driver.var_bounds(aux);
                let lo = if lb.is_finite() { lb - eps } else { lb };
                let hi = if ub.is_finite() { ub + eps } else { ub };
                iv = iv.intersect(&Interval::new(lo, hi));
            }
            if e == root {
                iv = iv.intersect(&sides);
            }
            if iv.is_empty() {
                self.store.set_interval(e, Interval::EMPTY);
                self.store.set_interval(root, Interval::EMPTY);
                self.drain_queue();
                debug!(event = "forward_prop_infeasible", cons = %self.conss[ci].name);
                return PropResult::Cutoff;
            }
            self.store.set_interval(e, iv);

            // queue only where the intersection actually cut the activity
            let tol = self.config.bound_strengthen_tol;
            if iv.inf > raw.inf + tol || iv.sup < raw.sup - tol {
                result = PropResult::Reduced;
                self.enqueue(e);
                if let Some(var) = crate::nlhdlr::aux_var_of(&self.store, e) {
                    match driver.tighten_lb(var, iv.inf) {
                        TightenResult::Infeasible => {
                            self.drain_queue();
                            return PropResult::Cutoff;
                        }
                        TightenResult::Tightened => self.stats.n_domain_reductions += 1,
                        TightenResult::Unchanged => {}
                    }
                    match driver.tighten_ub(var, iv.sup) {
                        TightenResult::Infeasible => {
                            self.drain_queue();
                            return PropResult::Cutoff;
                        }
                        TightenResult::Tightened => self.stats.n_domain_reductions += 1,
                        TightenResult::Unchanged => {}
                    }
                }
            }
        }
        result
    }

    /// Drains the FIFO queue, asking each node's reverse propagators for
    /// child tightenings and applying them through the primitive.
    pub(crate) fn reverse_prop_queued(&mut self, driver: &mut dyn Driver) -> PropResult {
        let config = self.config.clone();
        let mut result = PropResult::Unchanged;
        while let Some(e) = self.queue.pop_front() {
            self.store.set_in_queue(e, false);
            let bounds = self.store.interval(e);
            if bounds.is_empty() {
                self.drain_queue();
                return PropResult::Cutoff;
            }

            let mut tightenings: Vec<(ExprId, Interval)> = Vec::new();
            let with_revprop: Vec<(crate::nlhdlr::NlHdlrId, Rc<dyn NlHdlr>)> = self
                .enfos_of(e)
                .iter()
                .filter(|enfo| enfo.methods.reverseprop)
                .map(|enfo| (enfo.hdlr, self.nlhdlrs.get(enfo.hdlr)))
                .collect();
            if with_revprop.is_empty() {
                // no enforcement record: fall back to the operator callback
                let child_ivs: Vec<Interval> = self
                    .store
                    .children(e)
                    .iter()
                    .map(|&c| self.store.interval(c))
                    .collect();
                let hid = self.store.hdlr(e);
                let h = self.hdlrs.get(hid);
                let started = Instant::now();
                let childts = h.reverseprop(&self.store, e, &bounds, &child_ivs);
                self.hdlrs
                    .stats_mut(hid)
                    .record(nlforge_expr::HdlrPhase::ReverseProp, started.elapsed());
                for (idx, iv) in childts {
                    tightenings.push((self.store.child(e, idx), iv));
                }
            } else {
                for (id, h) in &with_revprop {
                    let enfo = self
                        .enfos_of(e)
                        .iter()
                        .find(|enfo| enfo.hdlr == *id);
                    let Some(enfo) = enfo else { continue };
                    let mut vb = |v: VarId| var_interval(driver, &config, v);
                    let started = Instant::now();
                    let ts =
                        h.reverseprop(&self.store, &self.hdlrs, &enfo.data, e, bounds, &mut vb);
                    let elapsed = started.elapsed();
                    let s = self.nlhdlrs.stats_mut(*id);
                    s.n_reverseprops += 1;
                    s.reverseprop_time += elapsed;
                    tightenings.extend(ts);
                }
            }

            for (child, iv) in tightenings {
                match self.tighten_expr_interval(driver, child, iv, false) {
                    PropResult::Cutoff => {
                        self.drain_queue();
                        return PropResult::Cutoff;
                    }
                    PropResult::Reduced => result = PropResult::Reduced,
                    PropResult::Unchanged => {}
                }
            }
        }
        result
    }

    /// One full propagation loop: forward each unpropagated constraint,
    /// reverse-drain the queue, repeat until quiescent or the round cap.
    pub fn propagate(&mut self, driver: &mut dyn Driver) -> PropResult {
        let mut overall = PropResult::Unchanged;
        for _round in 0..self.config.max_prop_rounds {
            if driver.stopped() {
                break;
            }
            self.store.boxtag += 1;
            let mut any = false;
            for ci in 0..self.conss.len() {
                if self.conss[ci].deleted || self.conss[ci].propagated {
                    continue;
                }
                match self.forward_prop_cons(driver, ci) {
                    PropResult::Cutoff => {
                        self.stats.n_cutoffs += 1;
                        return PropResult::Cutoff;
                    }
                    PropResult::Reduced => any = true,
                    PropResult::Unchanged => {}
                }
                self.conss[ci].propagated = true;
            }
            match self.reverse_prop_queued(driver) {
                PropResult::Cutoff => {
                    self.stats.n_cutoffs += 1;
                    return PropResult::Cutoff;
                }
                PropResult::Reduced => any = true,
                PropResult::Unchanged => {}
            }
            self.stats.n_prop_rounds += 1;
            if !any {
                break;
            }
            overall = PropResult::Reduced;
        }
        if overall == PropResult::Reduced {
            // tighter boxes can upgrade a cached Unknown curvature
            let roots: Vec<ExprId> = self
                .conss
                .iter()
                .filter(|c| !c.deleted)
                .map(|c| c.root)
                .collect();
            for root in roots {
                compute_curvature(&mut self.store, &self.hdlrs, root);
            }
        }
        overall
    }

    /// Queues every inner node of every constraint and reverse-propagates,
    /// so domain-of-definition bounds reach the variables even without any
    /// interval having shrunk.
    pub(crate) fn reverse_prop_all(&mut self, driver: &mut dyn Driver) -> PropResult {
        let roots: Vec<ExprId> = self
            .conss
            .iter()
            .filter(|c| !c.deleted)
            .map(|c| c.root)
            .collect();
        for root in roots {
            for e in post_order(&self.store, root) {
                self.enqueue(e);
            }
        }
        self.reverse_prop_queued(driver)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::BasicDriver;
    use nlforge_expr::VarType;
    use std::collections::HashMap;

    fn setup(input: &str, bounds: &[(&str, f64, f64)]) -> (ConsEngine, BasicDriver) {
        let mut engine = ConsEngine::new(EngineConfig::default());
        let mut driver = BasicDriver::new();
        let mut known: HashMap<String, VarId> = HashMap::new();
        for &(name, lb, ub) in bounds {
            let v = driver.add_var(name, lb, ub, VarType::Continuous);
            known.insert(name.to_string(), v);
        }
        let mut resolve =
            |name: &str| known.get(name).map(|&v| (v, VarType::Continuous));
        engine.parse_cons("c", input, &mut resolve).unwrap();
        (engine, driver)
    }

    #[test]
    fn circle_constraint_tightens_both_variables() {
        let (mut engine, mut driver) =
            setup("<x>^2 + <y>^2 <= 1", &[("x", -2.0, 2.0), ("y", -2.0, 2.0)]);
        assert_eq!(engine.propagate(&mut driver), PropResult::Reduced);
        for v in [VarId(0), VarId(1)] {
            let (lb, ub) = driver.var_bounds(v);
            assert!(lb >= -1.0 - 1e-6 && lb <= -1.0 + 1e-4, "lb {lb}");
            assert!(ub <= 1.0 + 1e-6 && ub >= 1.0 - 1e-4, "ub {ub}");
        }
        // quiescent afterwards
        assert_eq!(engine.propagate(&mut driver), PropResult::Unchanged);
    }

    #[test]
    fn log_argument_gains_domain_bound_at_init() {
        let (mut engine, mut driver) =
            setup("log(<x> - 1) <= 10", &[("x", 0.0, 10.0)]);
        // the relaxation-setup reverse pass enforces the log domain even
        // though no interval shrank during forward propagation
        engine.init_lp(&mut driver).unwrap();
        let (lb, ub) = driver.var_bounds(VarId(0));
        assert!(lb >= 1.0 - 1e-6, "lb {lb}");
        assert_eq!(ub, 10.0);
    }

    #[test]
    fn contradictory_bounds_are_a_cutoff() {
        let (mut engine, mut driver) =
            setup("<x>^2 <= -1", &[("x", -2.0, 2.0)]);
        assert_eq!(engine.propagate(&mut driver), PropResult::Cutoff);
        assert!(engine.queue.is_empty());
    }

    #[test]
    fn propagation_never_excludes_feasible_points() {
        use rand::Rng;
        use rand_chacha::rand_core::SeedableRng;
        use rand_chacha::ChaCha8Rng;

        let mut rng = ChaCha8Rng::seed_from_u64(23);
        for _ in 0..50 {
            let (mut engine, mut driver) = setup(
                "<x>^2 + <y>^2 <= 1",
                &[("x", -2.0, 2.0), ("y", -2.0, 2.0)],
            );
            // a feasible point inside the disk
            let (x, y) = loop {
                let x = rng.random_range(-1.0..1.0);
                let y = rng.random_range(-1.0..1.0);
                if x * x + y * y <= 1.0 {
                    break (x, y);
                }
            };
            assert_ne!(engine.propagate(&mut driver), PropResult::Cutoff);
            for (v, val) in [(VarId(0), x), (VarId(1), y)] {
                let (lb, ub) = driver.var_bounds(v);
                assert!(lb <= val + 1e-9 && val <= ub + 1e-9, "{val} not in [{lb}, {ub}]");
            }
        }
    }

    #[test]
    fn equality_fixes_the_variable() {
        let (mut engine, mut driver) = setup("<x> == 4", &[("x", 0.0, 10.0)]);
        assert_eq!(engine.propagate(&mut driver), PropResult::Reduced);
        let (lb, ub) = driver.var_bounds(VarId(0));
        assert!((lb - 4.0).abs() < 1e-6 && (ub - 4.0).abs() < 1e-6);
    }
}
