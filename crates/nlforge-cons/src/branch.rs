//! Branching-score computation and the enforcement dispatcher.
//!
//! Scores flow in two passes: violated auxiliary nodes first accumulate
//! their violation as a weight, then a top-down walk distributes each
//! non-leaf score uniformly to its children and clears it, so revisiting a
//! shared node through another constraint never double-counts. Variable
//! leaves keep what reaches them.

use std::collections::HashSet;

use nlforge_expr::{post_order, walk, VarId, WalkCmd, WalkStage};
use tracing::debug;

use crate::cons::ConsEngine;
use crate::driver::Driver;
use crate::separate::SepaResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnforceResult {
    Feasible,
    Separated,
    Branched,
    /// Violations too small for any cut: the driver should re-solve the
    /// relaxation as is.
    ForceLp,
    Cutoff,
}

impl ConsEngine {
    /// Computes branching scores for all violated constraints and registers
    /// candidate variables with the driver. Assumes `check` ran on the same
    /// solution. Returns the number of candidates.
    pub fn compute_branch_scores(&mut self, driver: &mut dyn Driver) -> usize {
        self.store.brscoretag += 1;
        let tag = self.store.brscoretag;
        self.stats.n_branch_rounds += 1;
        let feastol = self.config.feastol;

        let violated: Vec<usize> = (0..self.conss.len())
            .filter(|&ci| !self.conss[ci].deleted && self.conss[ci].violation() > feastol)
            .collect();

        // pass 1: violated auxiliary nodes accumulate their violation
        for &ci in &violated {
            let root = self.conss[ci].root;
            for e in post_order(&self.store, root) {
                let Some(aux) = self.store.auxvar(e) else { continue };
                let aux_sol = driver.sol_value(aux);
                let origviol = match self.store.eval_value(e) {
                    Some(v) => (v - aux_sol).abs(),
                    // evaluation error turns into a branching trigger
                    None => f64::INFINITY,
                };
                let enfoviol = self
                    .enfos_of(e)
                    .iter()
                    .map(|enfo| enfo.auxvalue)
                    .filter(|v| v.is_finite())
                    .map(|v| (v - aux_sol).abs())
                    .fold(0.0_f64, f64::max);
                let score = origviol.max(enfoviol);
                if score > feastol {
                    self.store.add_brscore(e, score, tag);
                }
            }
        }

        // pass 2: distribute down, clear non-leaves
        for &ci in &violated {
            let root = self.conss[ci].root;
            walk(&mut self.store, root, |store, e, stage| {
                match stage {
                    WalkStage::VisitingChild(i) => {
                        let s = store.brscore(e, tag);
                        if s > 0.0 {
                            let n = store.nchildren(e) as f64;
                            let child = store.child(e, i);
                            store.add_brscore(child, s / n, tag);
                        }
                    }
                    WalkStage::Leave => {
                        if store.nchildren(e) > 0 {
                            store.clear_brscore(e);
                        }
                    }
                    _ => {}
                }
                WalkCmd::Continue
            });
        }

        // pass 3: register scored, unfixed variables
        let mut seen: HashSet<VarId> = HashSet::new();
        let mut leaves: Vec<(VarId, f64)> = Vec::new();
        for &ci in &violated {
            for &e in &self.conss[ci].var_exprs {
                let Some(var) = self.store.var_of(e) else { continue };
                if !seen.insert(var) {
                    continue;
                }
                let score = self.store.brscore(e, tag);
                if score <= 0.0 {
                    continue;
                }
                let (lb, ub) = driver.var_bounds(var);
                if ub - lb <= feastol {
                    continue;
                }
                leaves.push((var, score));
            }
        }
        for &(var, score) in &leaves {
            driver.register_branch_candidate(var, score);
        }
        self.stats.n_branch_candidates += leaves.len() as u64;
        debug!(event = "branch_scores", candidates = leaves.len());
        leaves.len()
    }

    /// Enforces the driver's solution: check, then separate, then fall
    /// back to branching; with neither cut nor candidate the outcome is a
    /// forced LP re-solve for tiny violations or a cutoff.
    pub fn enforce(&mut self, driver: &mut dyn Driver) -> EnforceResult {
        if self.check(driver) {
            return EnforceResult::Feasible;
        }
        match self.separate(driver) {
            SepaResult::Cutoff => EnforceResult::Cutoff,
            SepaResult::Separated => EnforceResult::Separated,
            SepaResult::DidNotFind => {
                let candidates = self.compute_branch_scores(driver);
                if candidates > 0 {
                    self.stats.n_desperate_branch += 1;
                    return EnforceResult::Branched;
                }
                let max_viol = self
                    .conss
                    .iter()
                    .filter(|c| !c.deleted)
                    .map(|c| c.violation())
                    .fold(0.0_f64, f64::max);
                if max_viol <= self.config.separation.min_cut_violation {
                    self.stats.n_forced_lp += 1;
                    EnforceResult::ForceLp
                } else {
                    self.stats.n_desperate_cutoff += 1;
                    EnforceResult::Cutoff
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::BasicDriver;
    use nlforge_config::EngineConfig;
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
    fn scores_flow_from_root_to_leaves() {
        let (mut engine, mut driver) =
            setup("<x>*<y> <= -2", &[("x", -2.0, 2.0), ("y", -2.0, 2.0)]);
        engine.init_lp(&mut driver).unwrap();
        driver.set_sol_value(VarId(0), 1.0);
        driver.set_sol_value(VarId(1), 1.0);

        assert!(!engine.check(&driver));
        let n = engine.compute_branch_scores(&mut driver);
        assert_eq!(n, 2);
        // root violation 1 splits evenly over both operands
        for &(_, score) in &driver.branch_candidates {
            assert!((score - 0.5).abs() < 1e-12);
        }
    }

    #[test]
    fn unbounded_bilinear_falls_back_to_branching() {
        let (mut engine, mut driver) = setup(
            "<x>*<y> <= -2",
            &[
                ("x", f64::NEG_INFINITY, f64::INFINITY),
                ("y", f64::NEG_INFINITY, f64::INFINITY),
            ],
        );
        engine.init_lp(&mut driver).unwrap();
        driver.set_sol_value(VarId(0), 1.0);
        driver.set_sol_value(VarId(1), 1.0);

        // McCormick planes need finite operand boxes, so no cut exists
        assert_eq!(engine.enforce(&mut driver), EnforceResult::Branched);
        assert_eq!(engine.stats.n_desperate_branch, 1);
        assert_eq!(driver.branch_candidates.len(), 2);
    }

    #[test]
    fn tiny_violation_forces_lp_resolve() {
        let (mut engine, mut driver) = setup("<x>^2 <= 4", &[("x", -3.0, 3.0)]);
        engine.init_lp(&mut driver).unwrap();
        let x = 2.0 + 1e-6;
        driver.set_sol_value(VarId(0), x);
        let root = engine.cons(0).root;
        let aux = engine.store.auxvar(root).unwrap();
        driver.set_sol_value(aux, x * x);

        assert_eq!(engine.enforce(&mut driver), EnforceResult::ForceLp);
        assert_eq!(engine.stats.n_forced_lp, 1);
    }

    #[test]
    fn eval_error_on_fixed_variable_is_a_cutoff() {
        let (mut engine, mut driver) = setup("log(<x>) <= 1", &[("x", -1.0, -1.0)]);
        driver.set_sol_value(VarId(0), -1.0);
        assert_eq!(engine.enforce(&mut driver), EnforceResult::Cutoff);
        assert_eq!(engine.stats.n_desperate_cutoff, 1);
    }
}
