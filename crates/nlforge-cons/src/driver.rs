//! Host-driver seam.
//!
//! The constraint engine never owns variable domains, LP rows, or the
//! search state; it talks to the surrounding solver through [`Driver`].
//! [`BasicDriver`] is a self-contained implementation backed by plain
//! vectors, used by the tests and by standalone propagation runs.

use std::collections::HashMap;

use nlforge_expr::{VarId, VarType};
use tracing::debug;

/// Outcome of a bound-tightening request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TightenResult {
    Unchanged,
    Tightened,
    Infeasible,
}

/// A finalized linear inequality `side ≤/≥ sum coef·var` handed to the LP.
#[derive(Debug, Clone)]
pub struct CutRow {
    pub name: String,
    pub coefs: Vec<(VarId, f64)>,
    pub lhs: f64,
    pub rhs: f64,
    /// Valid only in the current subtree (depends on local bounds).
    pub local: bool,
}

/// Services the surrounding solver provides to the constraint engine.
pub trait Driver {
    fn add_var(&mut self, name: &str, lb: f64, ub: f64, vtype: VarType) -> VarId;
    fn var_bounds(&self, var: VarId) -> (f64, f64);
    fn var_type(&self, var: VarId) -> VarType;
    /// Tightens the lower bound; integer bounds are rounded inward.
    fn tighten_lb(&mut self, var: VarId, lb: f64) -> TightenResult;
    fn tighten_ub(&mut self, var: VarId, ub: f64) -> TightenResult;
    /// Value of `var` in the current relaxation solution.
    fn sol_value(&self, var: VarId) -> f64;
    fn add_row(&mut self, row: CutRow) -> bool;
    /// Set of variables whose inconsistent fixings explain an infeasibility.
    fn add_conflict(&mut self, vars: &[VarId]);
    fn register_branch_candidate(&mut self, var: VarId, score: f64);
    /// Cooperative stop signal, checked between constraints.
    fn stopped(&self) -> bool {
        false
    }
}

struct VarRec {
    name: String,
    lb: f64,
    ub: f64,
    vtype: VarType,
}

/// Vector-backed driver for tests and standalone runs.
#[derive(Default)]
pub struct BasicDriver {
    vars: Vec<VarRec>,
    sol: HashMap<VarId, f64>,
    pub rows: Vec<CutRow>,
    pub conflicts: Vec<Vec<VarId>>,
    pub branch_candidates: Vec<(VarId, f64)>,
    /// Variables whose bounds changed since the flag was last drained.
    pub bound_events: Vec<VarId>,
    feastol: f64,
}

impl BasicDriver {
    pub fn new() -> Self {
        BasicDriver {
            feastol: 1e-6,
            ..Default::default()
        }
    }

    pub fn set_sol_value(&mut self, var: VarId, value: f64) {
        self.sol.insert(var, value);
    }

    pub fn drain_bound_events(&mut self) -> Vec<VarId> {
        std::mem::take(&mut self.bound_events)
    }

    pub fn is_fixed(&self, var: VarId) -> bool {
        let (lb, ub) = self.var_bounds(var);
        ub - lb < self.feastol
    }

    fn rec(&self, var: VarId) -> &VarRec {
        &self.vars[var.0 as usize]
    }
}

impl Driver for BasicDriver {
    fn add_var(&mut self, name: &str, lb: f64, ub: f64, vtype: VarType) -> VarId {
        let id = VarId(self.vars.len() as u32);
        self.vars.push(VarRec {
            name: name.to_string(),
            lb,
            ub,
            vtype,
        });
        id
    }

    fn var_bounds(&self, var: VarId) -> (f64, f64) {
        let r = self.rec(var);
        (r.lb, r.ub)
    }

    fn var_type(&self, var: VarId) -> VarType {
        self.rec(var).vtype
    }

    fn tighten_lb(&mut self, var: VarId, lb: f64) -> TightenResult {
        let mut lb = lb;
        if self.rec(var).vtype.is_integral() {
            lb = (lb - self.feastol).ceil();
        }
        let r = &mut self.vars[var.0 as usize];
        if lb <= r.lb + self.feastol {
            return TightenResult::Unchanged;
        }
        if lb > r.ub + self.feastol {
            return TightenResult::Infeasible;
        }
        debug!(event = "tighten_lb", var = var.0, name = %r.name, old = r.lb, new = lb);
        r.lb = lb.min(r.ub);
        self.bound_events.push(var);
        TightenResult::Tightened
    }

    fn tighten_ub(&mut self, var: VarId, ub: f64) -> TightenResult {
        let mut ub = ub;
        if self.rec(var).vtype.is_integral() {
            ub = (ub + self.feastol).floor();
        }
        let r = &mut self.vars[var.0 as usize];
        if ub >= r.ub - self.feastol {
            return TightenResult::Unchanged;
        }
        if ub < r.lb - self.feastol {
            return TightenResult::Infeasible;
        }
        debug!(event = "tighten_ub", var = var.0, name = %r.name, old = r.ub, new = ub);
        r.ub = ub.max(r.lb);
        self.bound_events.push(var);
        TightenResult::Tightened
    }

    fn sol_value(&self, var: VarId) -> f64 {
        self.sol.get(&var).copied().unwrap_or(0.0)
    }

    fn add_row(&mut self, row: CutRow) -> bool {
        self.rows.push(row);
        true
    }

    fn add_conflict(&mut self, vars: &[VarId]) {
        self.conflicts.push(vars.to_vec());
    }

    fn register_branch_candidate(&mut self, var: VarId, score: f64) {
        self.branch_candidates.push((var, score));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_bounds_round_inward() {
        let mut d = BasicDriver::new();
        let n = d.add_var("n", 0.0, 10.0, VarType::Integer);
        assert_eq!(d.tighten_lb(n, 1.3), TightenResult::Tightened);
        assert_eq!(d.var_bounds(n).0, 2.0);
        assert_eq!(d.tighten_ub(n, 7.8), TightenResult::Tightened);
        assert_eq!(d.var_bounds(n).1, 7.0);
    }

    #[test]
    fn crossing_bounds_report_infeasible() {
        let mut d = BasicDriver::new();
        let x = d.add_var("x", 0.0, 1.0, VarType::Continuous);
        assert_eq!(d.tighten_lb(x, 2.0), TightenResult::Infeasible);
        assert_eq!(d.tighten_ub(x, -1.0), TightenResult::Infeasible);
    }

    #[test]
    fn events_record_changed_vars() {
        let mut d = BasicDriver::new();
        let x = d.add_var("x", 0.0, 1.0, VarType::Continuous);
        let _ = d.tighten_ub(x, 0.5);
        assert_eq!(d.drain_bound_events(), vec![x]);
        assert!(d.drain_bound_events().is_empty());
    }
}
