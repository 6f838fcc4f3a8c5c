//! Cut-row staging buffer.
//!
//! Estimators accumulate linear terms here; `cleanup` merges duplicates and
//! enforces the numerical quality thresholds before the row is handed to
//! the driver. Dropping a small coefficient relaxes the side by the term's
//! extreme activity so the cleaned row stays valid.

use nlforge_config::SeparationConfig;
use nlforge_expr::VarId;
use tracing::debug;

use crate::driver::{CutRow, Driver};

/// Which side the staged inequality constrains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SideType {
    /// `side <= terms`
    Left,
    /// `terms <= side`
    Right,
}

#[derive(Debug)]
pub enum CleanupError {
    /// Spread between largest and smallest coefficient exceeds the cap.
    CoefRange(f64),
    /// A negligible coefficient could not be absorbed into the side
    /// because the variable is unbounded in the needed direction.
    UnremovableTerm(VarId),
}

#[derive(Debug, Clone)]
pub struct RowPrep {
    pub sidetype: SideType,
    pub side: f64,
    pub terms: Vec<(VarId, f64)>,
    pub local: bool,
}

impl RowPrep {
    pub fn new(sidetype: SideType, local: bool) -> Self {
        RowPrep {
            sidetype,
            side: 0.0,
            terms: Vec::new(),
            local,
        }
    }

    pub fn add_term(&mut self, var: VarId, coef: f64) {
        if coef != 0.0 {
            self.terms.push((var, coef));
        }
    }

    /// Adds a constant to the term side by moving it onto the side value.
    pub fn add_constant(&mut self, c: f64) {
        self.side -= c;
    }

    pub fn activity(&self, driver: &dyn Driver) -> f64 {
        self.terms
            .iter()
            .map(|&(v, c)| c * driver.sol_value(v))
            .sum()
    }

    /// Positive when the staged row is violated by the current solution.
    pub fn violation(&self, driver: &dyn Driver) -> f64 {
        let act = self.activity(driver);
        match self.sidetype {
            SideType::Right => act - self.side,
            SideType::Left => self.side - act,
        }
    }

    /// Merges duplicate variables, drops negligible coefficients, and
    /// verifies the coefficient range.
    pub fn cleanup(
        &mut self,
        driver: &dyn Driver,
        config: &SeparationConfig,
    ) -> Result<(), CleanupError> {
        self.terms.sort_by_key(|&(v, _)| v.0);
        let mut merged: Vec<(VarId, f64)> = Vec::with_capacity(self.terms.len());
        for &(v, c) in &self.terms {
            match merged.last_mut() {
                Some((lv, lc)) if *lv == v => *lc += c,
                _ => merged.push((v, c)),
            }
        }

        let mut kept: Vec<(VarId, f64)> = Vec::with_capacity(merged.len());
        for (v, c) in merged {
            if c == 0.0 {
                continue;
            }
            if c.abs() >= config.min_coef {
                kept.push((v, c));
                continue;
            }
            // absorb coef*v into the side using the extreme activity of
            // the dropped term on the constrained side
            let (lb, ub) = driver.var_bounds(v);
            let extreme = match self.sidetype {
                SideType::Right => {
                    if c > 0.0 {
                        c * lb
                    } else {
                        c * ub
                    }
                }
                SideType::Left => {
                    if c > 0.0 {
                        c * ub
                    } else {
                        c * lb
                    }
                }
            };
            if !extreme.is_finite() {
                return Err(CleanupError::UnremovableTerm(v));
            }
            self.side -= extreme;
            debug!(event = "rowprep_drop_term", var = v.0, coef = c);
        }
        self.terms = kept;

        if !self.terms.is_empty() {
            let maxc = self
                .terms
                .iter()
                .map(|&(_, c)| c.abs())
                .fold(0.0_f64, f64::max);
            let minc = self
                .terms
                .iter()
                .map(|&(_, c)| c.abs())
                .fold(f64::INFINITY, f64::min);
            let range = maxc / minc;
            if range > config.max_coef_range {
                return Err(CleanupError::CoefRange(range));
            }
        }
        Ok(())
    }

    pub fn into_row(self, name: &str) -> CutRow {
        let (lhs, rhs) = match self.sidetype {
            SideType::Left => (self.side, f64::INFINITY),
            SideType::Right => (f64::NEG_INFINITY, self.side),
        };
        CutRow {
            name: name.to_string(),
            coefs: self.terms,
            lhs,
            rhs,
            local: self.local,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::BasicDriver;
    use nlforge_expr::VarType;

    #[test]
    fn duplicates_merge_and_zero_drops() {
        let mut d = BasicDriver::new();
        let x = d.add_var("x", 0.0, 1.0, VarType::Continuous);
        let y = d.add_var("y", 0.0, 1.0, VarType::Continuous);
        let mut rp = RowPrep::new(SideType::Right, false);
        rp.add_term(x, 1.0);
        rp.add_term(y, 2.0);
        rp.add_term(x, -1.0);
        rp.cleanup(&d, &SeparationConfig::default()).unwrap();
        assert_eq!(rp.terms, vec![(y, 2.0)]);
    }

    #[test]
    fn tiny_coef_relaxes_side() {
        let mut d = BasicDriver::new();
        let x = d.add_var("x", -1.0, 3.0, VarType::Continuous);
        let y = d.add_var("y", 0.0, 1.0, VarType::Continuous);
        let mut rp = RowPrep::new(SideType::Right, false);
        rp.side = 1.0;
        rp.add_term(x, 1e-12);
        rp.add_term(y, 1.0);
        rp.cleanup(&d, &SeparationConfig::default()).unwrap();
        assert_eq!(rp.terms, vec![(y, 1.0)]);
        // side relaxed by min activity of the dropped term
        assert!((rp.side - (1.0 + 1e-12)).abs() < 1e-15);
    }

    #[test]
    fn unbounded_tiny_term_is_rejected() {
        let mut d = BasicDriver::new();
        let x = d.add_var("x", f64::NEG_INFINITY, f64::INFINITY, VarType::Continuous);
        let mut rp = RowPrep::new(SideType::Right, false);
        rp.add_term(x, 1e-12);
        let err = rp.cleanup(&d, &SeparationConfig::default());
        assert!(matches!(err, Err(CleanupError::UnremovableTerm(_))));
    }

    #[test]
    fn wide_coef_range_is_rejected() {
        let mut d = BasicDriver::new();
        let x = d.add_var("x", 0.0, 1.0, VarType::Continuous);
        let y = d.add_var("y", 0.0, 1.0, VarType::Continuous);
        let mut rp = RowPrep::new(SideType::Left, false);
        rp.add_term(x, 1e9);
        rp.add_term(y, 1.0);
        let err = rp.cleanup(&d, &SeparationConfig::default());
        assert!(matches!(err, Err(CleanupError::CoefRange(_))));
    }

    #[test]
    fn violation_measures_the_constrained_side() {
        let mut d = BasicDriver::new();
        let x = d.add_var("x", 0.0, 10.0, VarType::Continuous);
        d.set_sol_value(x, 4.0);
        let mut rp = RowPrep::new(SideType::Right, false);
        rp.side = 3.0;
        rp.add_term(x, 1.0);
        assert_eq!(rp.violation(&d), 1.0);
        let row = rp.into_row("cut");
        assert_eq!(row.rhs, 3.0);
        assert!(row.lhs.is_infinite());
    }
}
