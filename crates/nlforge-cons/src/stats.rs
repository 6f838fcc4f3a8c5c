//! Statistics reporting for the engine and both handler registries.

use std::io::{self, Write};
use std::time::Duration;

use nlforge_expr::ExprHandlers;

use crate::nlhdlr::NlHdlrs;

/// Engine-level counters, reported next to the per-handler tables.
#[derive(Debug, Default, Clone)]
pub struct EngineStats {
    pub n_prop_rounds: u64,
    pub n_sepa_rounds: u64,
    pub n_cuts: u64,
    pub n_cutoffs: u64,
    pub n_domain_reductions: u64,
    pub n_branch_rounds: u64,
    pub n_branch_candidates: u64,
    /// Branching forced because no cut separated a violated constraint.
    pub n_desperate_branch: u64,
    /// Cutoff declared with no cut and no branching candidate left.
    pub n_desperate_cutoff: u64,
    /// Rounds that fell back to enforcing the LP point unchanged.
    pub n_forced_lp: u64,
}

fn secs(d: Duration) -> f64 {
    d.as_secs_f64()
}

/// Writes the statistics tables in a fixed-width layout.
pub fn write_statistics<W: Write>(
    out: &mut W,
    hdlrs: &ExprHandlers,
    nlhdlrs: &NlHdlrs,
    engine: &EngineStats,
) -> io::Result<()> {
    writeln!(
        out,
        "{:<10} {:>8} {:>8} {:>8} {:>8} {:>8} {:>8} {:>9} {:>9}",
        "exprhdlr", "eval", "simplify", "inteval", "revprop", "estimate", "cuts", "evaltime", "proptime"
    )?;
    for (name, s) in hdlrs.all_stats() {
        writeln!(
            out,
            "{:<10} {:>8} {:>8} {:>8} {:>8} {:>8} {:>8} {:>9.3} {:>9.3}",
            name,
            s.n_eval,
            s.n_simplify,
            s.n_inteval,
            s.n_reverseprop,
            s.n_estimate,
            s.n_cuts,
            secs(s.eval_time),
            secs(s.inteval_time + s.reverseprop_time),
        )?;
    }

    writeln!(
        out,
        "\n{:<10} {:>8} {:>8} {:>8} {:>8} {:>8} {:>8} {:>8} {:>9}",
        "nlhdlr", "detects", "inteval", "revprop", "estimate", "cuts", "cutoffs", "domreds", "dettime"
    )?;
    for (name, s) in nlhdlrs.all_stats() {
        writeln!(
            out,
            "{:<10} {:>8} {:>8} {:>8} {:>8} {:>8} {:>8} {:>8} {:>9.3}",
            name,
            s.n_detections,
            s.n_intevals,
            s.n_reverseprops,
            s.n_estimates,
            s.n_cuts,
            s.n_cutoffs,
            s.n_domreds,
            secs(s.detect_time),
        )?;
    }

    writeln!(out, "\nengine")?;
    writeln!(out, "  propagation rounds : {}", engine.n_prop_rounds)?;
    writeln!(out, "  separation rounds  : {}", engine.n_sepa_rounds)?;
    writeln!(out, "  cuts added         : {}", engine.n_cuts)?;
    writeln!(out, "  cutoffs            : {}", engine.n_cutoffs)?;
    writeln!(out, "  domain reductions  : {}", engine.n_domain_reductions)?;
    writeln!(out, "  branching rounds   : {}", engine.n_branch_rounds)?;
    writeln!(out, "  branch candidates  : {}", engine.n_branch_candidates)?;
    writeln!(out, "  desperate branches : {}", engine.n_desperate_branch)?;
    writeln!(out, "  desperate cutoffs  : {}", engine.n_desperate_cutoff)?;
    writeln!(out, "  forced LP rounds   : {}", engine.n_forced_lp)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tables_list_every_registered_handler() {
        let hdlrs = ExprHandlers::standard();
        let nlhdlrs = NlHdlrs::standard();
        let stats = EngineStats {
            n_cuts: 4,
            ..EngineStats::default()
        };
        let mut buf = Vec::new();
        write_statistics(&mut buf, &hdlrs, &nlhdlrs, &stats).unwrap();
        let text = String::from_utf8(buf).unwrap();
        for name in ["var", "sum", "prod", "pow", "exp", "log", "abs"] {
            assert!(text.contains(name), "missing handler {name}");
        }
        assert!(text.contains("quadratic"));
        assert!(text.contains("default"));
        assert!(text.contains("cuts added         : 4"));
    }
}
