//! Cut dispatch: walks violated constraints, evaluates each enforced
//! node's relaxation value, and turns nlhdlr estimators into LP rows.

use std::rc::Rc;
use std::time::Instant;

use nlforge_expr::{post_order, ExprId};
use tracing::debug;

use crate::cons::ConsEngine;
use crate::driver::Driver;
use crate::nlhdlr::{aux_var_of, Methods, NlHdlr, NlHdlrId};
use crate::rowprep::{RowPrep, SideType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SepaResult {
    DidNotFind,
    Separated,
    /// A globally valid row with no variables is violated: the relaxation
    /// point cannot be repaired anywhere.
    Cutoff,
}

impl ConsEngine {
    /// One separation round over all constraints at the driver's solution.
    /// Each node is handled at most once per round via the separation tag.
    pub fn separate(&mut self, driver: &mut dyn Driver) -> SepaResult {
        self.store.sepatag += 1;
        let tag = self.store.sepatag;
        self.stats.n_sepa_rounds += 1;
        let mut result = SepaResult::DidNotFind;

        for ci in 0..self.conss.len() {
            if self.conss[ci].deleted {
                continue;
            }
            if driver.stopped() {
                break;
            }
            let root = self.conss[ci].root;
            for e in post_order(&self.store, root) {
                if self.store.sepa_mark(e) == tag {
                    continue;
                }
                self.store.set_sepa_mark(e, tag);
                match self.separate_node(driver, e) {
                    SepaResult::Cutoff => {
                        self.stats.n_cutoffs += 1;
                        return SepaResult::Cutoff;
                    }
                    SepaResult::Separated => result = SepaResult::Separated,
                    SepaResult::DidNotFind => {}
                }
            }
        }
        result
    }

    fn separate_node(&mut self, driver: &mut dyn Driver, e: ExprId) -> SepaResult {
        let Some(auxvar) = self.store.auxvar(e) else {
            return SepaResult::DidNotFind;
        };
        let aux_sol = driver.sol_value(auxvar);
        let min_viol = self.config.separation.min_activity_violation;
        let mut result = SepaResult::DidNotFind;

        let n = self.enfos_of(e).len();
        for k in 0..n {
            let (id, methods): (NlHdlrId, Methods) = {
                let enfo = &self.enfos_of(e)[k];
                (enfo.hdlr, enfo.methods)
            };
            if !methods.sepa_below && !methods.sepa_above {
                continue;
            }
            let h: Rc<dyn NlHdlr> = self.nlhdlrs.get(id);
            let val = {
                let enfo = &self.enfos_of(e)[k];
                h.evalaux(&self.store, &self.hdlrs, &enfo.data, e, driver)
            };
            let Some(val) = val else { continue };
            if let Some(recs) = self.enfos.get_mut(&e) {
                recs[k].auxvalue = val;
            }

            // auxvar >= expr is violated when the relaxation sits below
            // the expression value
            if methods.sepa_below && val - aux_sol > min_viol {
                match self.try_cut(driver, &h, id, k, e, auxvar, false) {
                    SepaResult::Cutoff => return SepaResult::Cutoff,
                    SepaResult::Separated => result = SepaResult::Separated,
                    SepaResult::DidNotFind => {}
                }
            }
            if methods.sepa_above && aux_sol - val > min_viol {
                match self.try_cut(driver, &h, id, k, e, auxvar, true) {
                    SepaResult::Cutoff => return SepaResult::Cutoff,
                    SepaResult::Separated => result = SepaResult::Separated,
                    SepaResult::DidNotFind => {}
                }
            }
        }
        result
    }

    #[allow(clippy::too_many_arguments)]
    fn try_cut(
        &mut self,
        driver: &mut dyn Driver,
        h: &Rc<dyn NlHdlr>,
        id: NlHdlrId,
        k: usize,
        e: ExprId,
        auxvar: nlforge_expr::VarId,
        overestimate: bool,
    ) -> SepaResult {
        let sidetype = if overestimate {
            SideType::Left
        } else {
            SideType::Right
        };
        let mut rowprep = RowPrep::new(sidetype, true);
        let started = Instant::now();
        let ok = {
            let enfo = &self.enfos_of(e)[k];
            h.estimate(
                &self.store,
                &self.hdlrs,
                &self.config,
                &enfo.data,
                e,
                driver,
                overestimate,
                &mut rowprep,
            )
        };
        let elapsed = started.elapsed();
        {
            let s = self.nlhdlrs.stats_mut(id);
            s.n_estimates += 1;
            s.estimate_time += elapsed;
        }
        if !ok {
            return SepaResult::DidNotFind;
        }
        rowprep.add_term(auxvar, -1.0);

        if rowprep.cleanup(driver, &self.config.separation).is_err() {
            debug!(event = "cut_discarded", hdlr = h.name(), reason = "cleanup");
            return SepaResult::DidNotFind;
        }
        let violation = rowprep.violation(driver);
        if violation <= self.config.separation.min_cut_violation {
            return SepaResult::DidNotFind;
        }
        if rowprep.terms.is_empty() {
            if !rowprep.local {
                self.nlhdlrs.stats_mut(id).n_cutoffs += 1;
                return SepaResult::Cutoff;
            }
            return SepaResult::DidNotFind;
        }

        let name = format!("cut_{}_{}", h.name(), self.stats.n_cuts);
        let row = rowprep.into_row(&name);
        debug!(event = "cut_added", name = %row.name, violation);
        if driver.add_row(row) {
            self.stats.n_cuts += 1;
            self.nlhdlrs.stats_mut(id).n_cuts += 1;
            SepaResult::Separated
        } else {
            SepaResult::DidNotFind
        }
    }
}
