//! Conjunction constraints `r = x1 AND ... AND xn` over binary literals,
//! propagated with a two-watched-operand scheme.
//!
//! Only the two watched operands need re-examination when bounds change;
//! once a watch cannot be replaced, at most one operand is unfixed and the
//! aggregate rules fire. Bound-change events arrive through
//! [`AndCons::notify_bound_change`]; a constraint at its fix-point sleeps
//! until an event that can fire a rule clears its `propagated` flag.
//! Conflict sets name the fixing operand plus the
//! resultant for the local rules, and all operands plus the resultant for
//! the aggregate ones.

use nlforge_expr::VarId;
use tracing::debug;

use crate::driver::{Driver, TightenResult};
use crate::propagate::PropResult;

/// A binary variable or its negation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Literal {
    pub var: VarId,
    pub negated: bool,
}

impl Literal {
    pub fn pos(var: VarId) -> Self {
        Literal { var, negated: false }
    }

    pub fn neg(var: VarId) -> Self {
        Literal { var, negated: true }
    }

    /// Fixed truth value under the driver's current bounds, if any.
    fn value(&self, driver: &dyn Driver) -> Option<bool> {
        let (lb, ub) = driver.var_bounds(self.var);
        let fixed = if lb > 0.5 {
            Some(true)
        } else if ub < 0.5 {
            Some(false)
        } else {
            None
        };
        fixed.map(|b| b != self.negated)
    }

    /// Tightens the underlying variable so the literal takes `value`.
    fn fix(&self, driver: &mut dyn Driver, value: bool) -> TightenResult {
        if value != self.negated {
            driver.tighten_lb(self.var, 1.0)
        } else {
            driver.tighten_ub(self.var, 0.0)
        }
    }
}

#[derive(Debug)]
pub struct AndCons {
    pub name: String,
    operands: Vec<Literal>,
    resultant: VarId,
    watched: [Option<usize>; 2],
    pub propagated: bool,
    pub nofixedzero: bool,
    pub merged: bool,
    pub sorted: bool,
    /// Locally redundant: some rule already decided the constraint on the
    /// current subtree.
    pub redundant: bool,
    /// Keep checking even after the constraint was upgraded elsewhere, so
    /// feasibility information survives the reformulation.
    pub check_when_upgraded: bool,
}

impl AndCons {
    pub fn new(name: &str, operands: Vec<Literal>, resultant: VarId) -> Self {
        AndCons {
            name: name.to_string(),
            operands,
            resultant,
            watched: [None, None],
            propagated: false,
            nofixedzero: true,
            merged: false,
            sorted: false,
            redundant: false,
            check_when_upgraded: false,
        }
    }

    pub fn operands(&self) -> &[Literal] {
        &self.operands
    }

    pub fn resultant(&self) -> VarId {
        self.resultant
    }

    fn resultant_value(&self, driver: &dyn Driver) -> Option<bool> {
        Literal::pos(self.resultant).value(driver)
    }

    /// Sorts and de-duplicates the operands. A literal appearing together
    /// with its negation fixes the resultant to zero globally.
    pub fn merge(&mut self, driver: &mut dyn Driver) -> PropResult {
        self.operands
            .sort_by_key(|l| (l.var.0, l.negated));
        self.sorted = true;
        self.operands.dedup();
        self.merged = true;

        let contradictory = self
            .operands
            .windows(2)
            .any(|w| w[0].var == w[1].var && w[0].negated != w[1].negated);
        if contradictory {
            debug!(event = "and_contradiction", cons = %self.name);
            self.redundant = true;
            return match driver.tighten_ub(self.resultant, 0.0) {
                TightenResult::Infeasible => {
                    driver.add_conflict(&[self.resultant]);
                    PropResult::Cutoff
                }
                TightenResult::Tightened => PropResult::Reduced,
                TightenResult::Unchanged => PropResult::Unchanged,
            };
        }
        PropResult::Unchanged
    }

    /// A watch moves only when its operand got fixed; while both watched
    /// operands stay unfixed no operand is examined at all.
    fn update_watches(&mut self, driver: &dyn Driver) {
        let unfixed = |w: Option<usize>| {
            w.filter(|&i| self.operands[i].value(driver).is_none())
        };
        let mut w0 = unfixed(self.watched[0]);
        let mut w1 = unfixed(self.watched[1]);
        if w0.is_none() {
            std::mem::swap(&mut w0, &mut w1);
        }
        if w0.is_some() && w1.is_some() {
            self.watched = [w0, w1];
            return;
        }
        for (i, l) in self.operands.iter().enumerate() {
            if w0 == Some(i) {
                continue;
            }
            if l.value(driver).is_some() {
                continue;
            }
            if w0.is_none() {
                w0 = Some(i);
            } else {
                w1 = Some(i);
                break;
            }
        }
        self.watched = [w0, w1];
    }

    /// Bound-change event hook. Wakes the constraint only when the event
    /// can fire a rule: the resultant changed, an operand got fixed to 0,
    /// or a watched operand got fixed.
    pub fn notify_bound_change(&mut self, driver: &dyn Driver, var: VarId) {
        if self.redundant {
            return;
        }
        if var == self.resultant {
            self.propagated = false;
            return;
        }
        for (i, l) in self.operands.iter().enumerate() {
            if l.var != var {
                continue;
            }
            if l.value(driver) == Some(false) {
                self.propagated = false;
                return;
            }
            if self.watched.contains(&Some(i)) && l.value(driver).is_some() {
                self.propagated = false;
                return;
            }
        }
    }

    fn conflict_all(&self, driver: &mut dyn Driver) {
        let mut vars: Vec<VarId> = self.operands.iter().map(|l| l.var).collect();
        vars.push(self.resultant);
        driver.add_conflict(&vars);
    }

    /// Applies rules 1-4 until fix-point or cutoff. A constraint at its
    /// fix-point stays asleep until an event clears `propagated`.
    pub fn propagate(&mut self, driver: &mut dyn Driver) -> PropResult {
        if self.propagated {
            return PropResult::Unchanged;
        }
        let mut result = PropResult::Unchanged;
        loop {
            // rule 1: an operand fixed to 0 decides the conjunction
            let fixed_zero = self
                .operands
                .iter()
                .position(|l| l.value(driver) == Some(false));
            if let Some(i) = fixed_zero {
                self.nofixedzero = false;
                match Literal::pos(self.resultant).fix(driver, false) {
                    TightenResult::Infeasible => {
                        driver.add_conflict(&[self.operands[i].var, self.resultant]);
                        return PropResult::Cutoff;
                    }
                    TightenResult::Tightened => result = PropResult::Reduced,
                    TightenResult::Unchanged => {}
                }
                self.redundant = true;
                self.propagated = true;
                return result;
            }

            // rule 2: resultant fixed to 1 lifts every operand
            if self.resultant_value(driver) == Some(true) {
                for i in 0..self.operands.len() {
                    match self.operands[i].fix(driver, true) {
                        TightenResult::Infeasible => {
                            driver.add_conflict(&[self.operands[i].var, self.resultant]);
                            return PropResult::Cutoff;
                        }
                        TightenResult::Tightened => result = PropResult::Reduced,
                        TightenResult::Unchanged => {}
                    }
                }
                self.redundant = true;
                self.propagated = true;
                return result;
            }

            self.update_watches(driver);
            match self.watched {
                [None, None] => {
                    // no operand is unfixed and none is 0: rule 3
                    match Literal::pos(self.resultant).fix(driver, true) {
                        TightenResult::Infeasible => {
                            self.conflict_all(driver);
                            return PropResult::Cutoff;
                        }
                        TightenResult::Tightened => result = PropResult::Reduced,
                        TightenResult::Unchanged => {}
                    }
                    self.redundant = true;
                    self.propagated = true;
                    return result;
                }
                [Some(i), None] => {
                    if self.resultant_value(driver) == Some(false) {
                        // rule 4: the last free operand must be 0
                        match self.operands[i].fix(driver, false) {
                            TightenResult::Infeasible => {
                                self.conflict_all(driver);
                                return PropResult::Cutoff;
                            }
                            TightenResult::Tightened => result = PropResult::Reduced,
                            TightenResult::Unchanged => {}
                        }
                        continue;
                    }
                    self.propagated = true;
                    return result;
                }
                _ => {
                    self.propagated = true;
                    return result;
                }
            }
        }
    }

    /// Feasibility of a solution: the resultant must equal the conjunction
    /// of the operand values (0.5 rounding).
    pub fn check(&self, sol: &dyn Fn(VarId) -> f64) -> bool {
        if self.redundant && !self.check_when_upgraded {
            return true;
        }
        let and = self.operands.iter().all(|l| {
            let v = sol(l.var) > 0.5;
            v != l.negated
        });
        (sol(self.resultant) > 0.5) == and
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::BasicDriver;
    use nlforge_expr::VarType;

    fn binaries(driver: &mut BasicDriver, n: usize) -> Vec<VarId> {
        (0..n)
            .map(|i| driver.add_var(&format!("b{i}"), 0.0, 1.0, VarType::Binary))
            .collect()
    }

    fn three_op_cons(driver: &mut BasicDriver) -> (AndCons, Vec<VarId>) {
        let vars = binaries(driver, 4);
        let cons = AndCons::new(
            "and",
            vars[..3].iter().map(|&v| Literal::pos(v)).collect(),
            vars[3],
        );
        (cons, vars)
    }

    #[test]
    fn operand_fixed_zero_decides_the_resultant() {
        let mut driver = BasicDriver::new();
        let (mut cons, vars) = three_op_cons(&mut driver);
        driver.tighten_ub(vars[1], 0.0);
        assert_eq!(cons.propagate(&mut driver), PropResult::Reduced);
        assert_eq!(driver.var_bounds(vars[3]), (0.0, 0.0));
        assert!(cons.redundant);
        // fix-point: nothing further fires
        assert_eq!(cons.propagate(&mut driver), PropResult::Unchanged);
    }

    #[test]
    fn resultant_fixed_one_lifts_all_operands() {
        let mut driver = BasicDriver::new();
        let (mut cons, vars) = three_op_cons(&mut driver);
        driver.tighten_lb(vars[3], 1.0);
        assert_eq!(cons.propagate(&mut driver), PropResult::Reduced);
        for &v in &vars[..3] {
            assert_eq!(driver.var_bounds(v), (1.0, 1.0));
        }
    }

    #[test]
    fn all_operands_one_forces_the_resultant() {
        let mut driver = BasicDriver::new();
        let (mut cons, vars) = three_op_cons(&mut driver);
        for &v in &vars[..3] {
            driver.tighten_lb(v, 1.0);
        }
        assert_eq!(cons.propagate(&mut driver), PropResult::Reduced);
        assert_eq!(driver.var_bounds(vars[3]), (1.0, 1.0));
    }

    #[test]
    fn last_free_operand_is_fixed_to_zero() {
        let mut driver = BasicDriver::new();
        let (mut cons, vars) = three_op_cons(&mut driver);
        driver.tighten_ub(vars[3], 0.0);
        driver.tighten_lb(vars[0], 1.0);
        driver.tighten_lb(vars[1], 1.0);
        assert_eq!(cons.propagate(&mut driver), PropResult::Reduced);
        assert_eq!(driver.var_bounds(vars[2]), (0.0, 0.0));
    }

    #[test]
    fn events_wake_only_rule_relevant_constraints() {
        let mut driver = BasicDriver::new();
        let (mut cons, vars) = three_op_cons(&mut driver);
        assert_eq!(cons.propagate(&mut driver), PropResult::Unchanged);
        assert!(cons.propagated);

        // an unwatched operand fixed to 1 cannot fire any rule
        driver.tighten_lb(vars[2], 1.0);
        for v in driver.drain_bound_events() {
            cons.notify_bound_change(&driver, v);
        }
        assert!(cons.propagated);

        // a watched operand fixed to 1 shifts the watch
        driver.tighten_lb(vars[0], 1.0);
        for v in driver.drain_bound_events() {
            cons.notify_bound_change(&driver, v);
        }
        assert!(!cons.propagated);
        assert_eq!(cons.propagate(&mut driver), PropResult::Unchanged);
        assert!(cons.propagated);

        // the resultant fixed to 0 leaves one free operand: rule 4
        driver.tighten_ub(vars[3], 0.0);
        for v in driver.drain_bound_events() {
            cons.notify_bound_change(&driver, v);
        }
        assert!(!cons.propagated);
        assert_eq!(cons.propagate(&mut driver), PropResult::Reduced);
        assert_eq!(driver.var_bounds(vars[1]), (0.0, 0.0));
    }

    #[test]
    fn unwatched_operand_fixed_to_zero_still_wakes_rule_one() {
        let mut driver = BasicDriver::new();
        let (mut cons, vars) = three_op_cons(&mut driver);
        assert_eq!(cons.propagate(&mut driver), PropResult::Unchanged);

        driver.tighten_ub(vars[2], 0.0);
        for v in driver.drain_bound_events() {
            cons.notify_bound_change(&driver, v);
        }
        assert!(!cons.propagated);
        assert_eq!(cons.propagate(&mut driver), PropResult::Reduced);
        assert_eq!(driver.var_bounds(vars[3]), (0.0, 0.0));
    }

    #[test]
    fn negated_pair_fixes_resultant_during_merge() {
        let mut driver = BasicDriver::new();
        let vars = binaries(&mut driver, 3);
        let mut cons = AndCons::new(
            "and",
            vec![Literal::pos(vars[0]), Literal::neg(vars[0]), Literal::pos(vars[1])],
            vars[2],
        );
        assert_eq!(cons.merge(&mut driver), PropResult::Reduced);
        assert_eq!(driver.var_bounds(vars[2]), (0.0, 0.0));
        assert!(cons.merged && cons.sorted);
    }

    #[test]
    fn merge_deduplicates_repeated_operands() {
        let mut driver = BasicDriver::new();
        let vars = binaries(&mut driver, 2);
        let mut cons = AndCons::new(
            "and",
            vec![Literal::pos(vars[0]), Literal::pos(vars[0])],
            vars[1],
        );
        cons.merge(&mut driver);
        assert_eq!(cons.operands().len(), 1);
    }

    #[test]
    fn conflicting_fixings_produce_a_conflict_set() {
        let mut driver = BasicDriver::new();
        let (mut cons, vars) = three_op_cons(&mut driver);
        driver.tighten_ub(vars[1], 0.0);
        driver.tighten_lb(vars[3], 1.0);
        assert_eq!(cons.propagate(&mut driver), PropResult::Cutoff);
        assert_eq!(driver.conflicts.len(), 1);
        assert!(driver.conflicts[0].contains(&vars[1]));
        assert!(driver.conflicts[0].contains(&vars[3]));
    }

    #[test]
    fn check_honors_the_upgrade_flag() {
        let mut driver = BasicDriver::new();
        let (mut cons, vars) = three_op_cons(&mut driver);
        driver.tighten_ub(vars[0], 0.0);
        cons.propagate(&mut driver);
        assert!(cons.redundant);

        let bad = |v: VarId| if v == vars[3] { 1.0 } else { 0.0 };
        // redundant constraints are skipped unless the flag insists
        assert!(cons.check(&bad));
        cons.check_when_upgraded = true;
        assert!(!cons.check(&bad));

        let good = |_v: VarId| 0.0;
        assert!(cons.check(&good));
    }
}
