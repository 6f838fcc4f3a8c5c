//! Quadratic-form nonlinear handler.
//!
//! Detects sums `c + sum a_i*x_i + sum b_jj*x_j^2 + sum b_ij*x_i*x_j` over
//! variable leaves, classifies curvature through a Jacobi eigenvalue
//! iteration on the symmetric coefficient matrix, bounds the activity with
//! per-variable interval quadratics, reverse-propagates through the
//! closed-form univariate solver, and separates the convex side with
//! gradient cuts (secants for squares of binaries).
//!
//! When the eigenvalue iteration fails to converge the handler degrades to
//! `Curvature::Unknown`: separation is disabled, propagation stays valid.

use nlforge_config::{EngineConfig, QuadraticConfig};
use nlforge_expr::{Curvature, ExprHandlers, ExprId, ExprPayload, ExprStore, VarId, VarType};
use nlforge_interval::{solve_univariate_quad, Interval};
use tracing::debug;

use crate::driver::Driver;
use crate::nlhdlr::{ExprTightenings, Methods, NlHdlr, NlHdlrExprData};
use crate::rowprep::RowPrep;

/// A variable participating quadratically, with its adjacent bilinears.
#[derive(Debug, Clone)]
pub struct QuadVarTerm {
    pub expr: ExprId,
    pub var: VarId,
    pub sqrcoef: f64,
    pub lincoef: f64,
    /// Indices into `bilin_terms`; a bilinear is *assigned* to the quad
    /// term of its first variable for activity bookkeeping.
    pub adj_bilin: Vec<usize>,
}

#[derive(Debug, Clone)]
pub struct BilinTerm {
    pub expr1: ExprId,
    pub expr2: ExprId,
    pub var1: VarId,
    pub var2: VarId,
    pub coef: f64,
}

/// Detected quadratic structure of a sum node.
#[derive(Debug)]
pub struct QuadForm {
    pub constant: f64,
    /// Purely linear terms (variables without any quadratic occurrence).
    pub lin_terms: Vec<(ExprId, VarId, f64)>,
    pub quad_terms: Vec<QuadVarTerm>,
    pub bilin_terms: Vec<BilinTerm>,
    pub curvature: Curvature,
    pub eigenvalues: Option<Vec<f64>>,
}

enum TermKind {
    Linear(ExprId, VarId, f64),
    Square(ExprId, VarId, f64),
    Bilinear(ExprId, VarId, ExprId, VarId, f64),
}

fn classify_term(store: &ExprStore, hdlrs: &ExprHandlers, child: ExprId, coef: f64) -> Option<TermKind> {
    let b = hdlrs.builtin();
    if let Some(var) = store.var_of(child) {
        return Some(TermKind::Linear(child, var, coef));
    }
    let hid = store.hdlr(child);
    if hid == b.pow {
        if let ExprPayload::Pow { exponent } = store.payload(child) {
            if *exponent == 2.0 {
                let base = store.child(child, 0);
                if let Some(var) = store.var_of(base) {
                    return Some(TermKind::Square(base, var, coef));
                }
            }
        }
        return None;
    }
    if hid == b.product && store.nchildren(child) == 2 {
        if let ExprPayload::Product { coef: pcoef } = store.payload(child) {
            let c1 = store.child(child, 0);
            let c2 = store.child(child, 1);
            if let (Some(v1), Some(v2)) = (store.var_of(c1), store.var_of(c2)) {
                if v1 != v2 {
                    return Some(TermKind::Bilinear(c1, v1, c2, v2, coef * pcoef));
                }
            }
        }
    }
    None
}

/// Scans a sum node for quadratic structure. Declines when any term does
/// not fit, or when no variable occurs in more than one term (then plain
/// interval arithmetic over the operators is just as strong).
pub fn detect_quadratic(
    store: &ExprStore,
    hdlrs: &ExprHandlers,
    config: &EngineConfig,
    e: ExprId,
) -> Option<QuadForm> {
    let b = hdlrs.builtin();
    if store.hdlr(e) != b.sum || store.nchildren(e) < 2 {
        return None;
    }
    let (constant, coefs) = match store.payload(e) {
        ExprPayload::Sum { constant, coefs } => (*constant, coefs.clone()),
        _ => return None,
    };

    // first scan: classify terms and count variable occurrences
    let mut kinds = Vec::with_capacity(store.nchildren(e));
    let mut occurrences: Vec<(VarId, u32)> = Vec::new();
    let mut count = |occ: &mut Vec<(VarId, u32)>, v: VarId| {
        match occ.iter_mut().find(|(ov, _)| *ov == v) {
            Some((_, n)) => *n += 1,
            None => occ.push((v, 1)),
        }
    };
    let mut any_quadratic = false;
    for (i, &child) in store.children(e).iter().enumerate() {
        let kind = classify_term(store, hdlrs, child, coefs[i])?;
        match &kind {
            TermKind::Linear(_, v, _) => count(&mut occurrences, *v),
            TermKind::Square(_, v, _) => {
                count(&mut occurrences, *v);
                any_quadratic = true;
            }
            TermKind::Bilinear(_, v1, _, v2, _) => {
                count(&mut occurrences, *v1);
                count(&mut occurrences, *v2);
                any_quadratic = true;
            }
        }
        kinds.push(kind);
    }
    if !any_quadratic || !occurrences.iter().any(|&(_, n)| n > 1) {
        return None;
    }

    // second scan: build the term arrays; linear coefficients of
    // quadratically occurring variables fold into their quad term
    let mut form = QuadForm {
        constant,
        lin_terms: Vec::new(),
        quad_terms: Vec::new(),
        bilin_terms: Vec::new(),
        curvature: Curvature::Unknown,
        eigenvalues: None,
    };
    let quadratic_var = |kinds: &[TermKind], v: VarId| {
        kinds.iter().any(|k| match k {
            TermKind::Square(_, sv, _) => *sv == v,
            TermKind::Bilinear(_, v1, _, v2, _) => *v1 == v || *v2 == v,
            TermKind::Linear(..) => false,
        })
    };
    let mut quad_index = |form: &mut QuadForm, expr: ExprId, v: VarId| -> usize {
        match form.quad_terms.iter().position(|qt| qt.var == v) {
            Some(i) => i,
            None => {
                form.quad_terms.push(QuadVarTerm {
                    expr,
                    var: v,
                    sqrcoef: 0.0,
                    lincoef: 0.0,
                    adj_bilin: Vec::new(),
                });
                form.quad_terms.len() - 1
            }
        }
    };
    for kind in &kinds {
        match kind {
            TermKind::Linear(expr, v, c) => {
                if quadratic_var(&kinds, *v) {
                    let i = quad_index(&mut form, *expr, *v);
                    form.quad_terms[i].lincoef += c;
                } else {
                    form.lin_terms.push((*expr, *v, *c));
                }
            }
            TermKind::Square(expr, v, c) => {
                let i = quad_index(&mut form, *expr, *v);
                form.quad_terms[i].sqrcoef += c;
            }
            TermKind::Bilinear(e1, v1, e2, v2, c) => {
                let bi = form.bilin_terms.len();
                form.bilin_terms.push(BilinTerm {
                    expr1: *e1,
                    expr2: *e2,
                    var1: *v1,
                    var2: *v2,
                    coef: *c,
                });
                let i1 = quad_index(&mut form, *e1, *v1);
                form.quad_terms[i1].adj_bilin.push(bi);
                let i2 = quad_index(&mut form, *e2, *v2);
                form.quad_terms[i2].adj_bilin.push(bi);
            }
        }
    }

    form.classify_curvature(&config.quadratic);
    debug!(
        event = "quadratic_detected",
        nquad = form.quad_terms.len(),
        nbilin = form.bilin_terms.len(),
        curvature = ?form.curvature,
    );
    Some(form)
}

impl QuadForm {
    fn quad_pos(&self, v: VarId) -> Option<usize> {
        self.quad_terms.iter().position(|qt| qt.var == v)
    }

    /// Eigenvalue-based curvature of the quadratic part.
    fn classify_curvature(&mut self, config: &QuadraticConfig) {
        let n = self.quad_terms.len();
        let mut a = vec![vec![0.0; n]; n];
        for (i, qt) in self.quad_terms.iter().enumerate() {
            a[i][i] = qt.sqrcoef;
        }
        for bt in &self.bilin_terms {
            if let (Some(i), Some(j)) = (self.quad_pos(bt.var1), self.quad_pos(bt.var2)) {
                a[i][j] += bt.coef / 2.0;
                a[j][i] += bt.coef / 2.0;
            }
        }
        match jacobi_eigenvalues(a, config) {
            Some(eigs) => {
                let scale = eigs.iter().fold(1.0_f64, |m, &v| m.max(v.abs()));
                let tol = 1e-9 * scale;
                self.curvature = if eigs.iter().all(|&v| v >= -tol) {
                    Curvature::Convex
                } else if eigs.iter().all(|&v| v <= tol) {
                    Curvature::Concave
                } else {
                    Curvature::Unknown
                };
                self.eigenvalues = Some(eigs);
            }
            None => {
                self.curvature = Curvature::Unknown;
                self.eigenvalues = None;
            }
        }
    }

    /// Linear-coefficient interval of quad term `i`: its own lincoef plus
    /// the assigned bilinear partners' ranges.
    fn lin_interval(&self, i: usize, varbounds: &mut dyn FnMut(VarId) -> Interval) -> Interval {
        let qt = &self.quad_terms[i];
        let mut lin = Interval::singleton(qt.lincoef);
        for &bi in &qt.adj_bilin {
            let bt = &self.bilin_terms[bi];
            // assigned to the quad term of var1 only
            if bt.var1 != qt.var {
                continue;
            }
            lin = lin.add(&varbounds(bt.var2).mul_scalar(bt.coef));
        }
        lin
    }

    fn piece(&self, i: usize, varbounds: &mut dyn FnMut(VarId) -> Interval) -> Interval {
        let qt = &self.quad_terms[i];
        let lin = self.lin_interval(i, varbounds);
        varbounds(qt.var).quad(qt.sqrcoef, &lin)
    }

    /// Activity of the linear part plus the constant.
    fn lin_activity(&self, varbounds: &mut dyn FnMut(VarId) -> Interval) -> Interval {
        let mut act = Interval::singleton(self.constant);
        for &(_, v, c) in &self.lin_terms {
            act = act.add(&varbounds(v).mul_scalar(c));
        }
        act
    }

    pub fn inteval(&self, varbounds: &mut dyn FnMut(VarId) -> Interval) -> Interval {
        let mut total = self.lin_activity(varbounds);
        for i in 0..self.quad_terms.len() {
            total = total.add(&self.piece(i, varbounds));
            if total.is_empty() {
                return Interval::EMPTY;
            }
        }
        total
    }

    pub fn reverseprop(
        &self,
        bounds: Interval,
        varbounds: &mut dyn FnMut(VarId) -> Interval,
    ) -> ExprTightenings {
        let mut out = ExprTightenings::new();
        let lin_act = self.lin_activity(varbounds);
        let pieces: Vec<Interval> = (0..self.quad_terms.len())
            .map(|i| self.piece(i, varbounds))
            .collect();
        let sums = PieceSum::over(&pieces);
        for (i, qt) in self.quad_terms.iter().enumerate() {
            let rest = sums.without(pieces[i]);
            let residual = bounds.sub(&lin_act).sub(&rest);
            if residual.is_entire() {
                continue;
            }
            let lin = self.lin_interval(i, varbounds);
            let xb = varbounds(qt.var);
            let tightened = solve_univariate_quad(qt.sqrcoef, &lin, &residual, &xb);
            if tightened.is_empty() || !tightened.contains_interval(&xb) {
                out.push((qt.expr, tightened));
            }
        }
        out
    }

    /// Gradient cut on the convex side; squares of binaries use the exact
    /// secant `x^2 = x`. Fills `rowprep` with the estimator terms.
    pub fn estimate(&self, driver: &dyn Driver, overestimate: bool, rowprep: &mut RowPrep) -> bool {
        let ok = match self.curvature {
            Curvature::Convex | Curvature::Linear => !overestimate,
            Curvature::Concave => overestimate,
            Curvature::Unknown => false,
        };
        if !ok {
            return false;
        }
        // gradient cuts on the convex side hold globally
        rowprep.local = false;
        rowprep.add_constant(self.constant);
        for &(_, v, c) in &self.lin_terms {
            rowprep.add_term(v, c);
        }
        for qt in &self.quad_terms {
            let x0 = driver.sol_value(qt.var);
            if driver.var_type(qt.var) == VarType::Binary {
                rowprep.add_term(qt.var, qt.sqrcoef + qt.lincoef);
            } else {
                rowprep.add_term(qt.var, 2.0 * qt.sqrcoef * x0 + qt.lincoef);
                rowprep.add_constant(-qt.sqrcoef * x0 * x0);
            }
        }
        for bt in &self.bilin_terms {
            let x0 = driver.sol_value(bt.var1);
            let y0 = driver.sol_value(bt.var2);
            rowprep.add_term(bt.var1, bt.coef * y0);
            rowprep.add_term(bt.var2, bt.coef * x0);
            rowprep.add_constant(-bt.coef * x0 * y0);
        }
        true
    }

    pub fn evalaux(&self, driver: &dyn Driver) -> f64 {
        let mut v = self.constant;
        for &(_, var, c) in &self.lin_terms {
            v += c * driver.sol_value(var);
        }
        for qt in &self.quad_terms {
            let x = driver.sol_value(qt.var);
            v += qt.sqrcoef * x * x + qt.lincoef * x;
        }
        for bt in &self.bilin_terms {
            v += bt.coef * driver.sol_value(bt.var1) * driver.sol_value(bt.var2);
        }
        v
    }
}

/// Running sums of piece activities with infinite contributions counted
/// separately, so excluding any single piece is O(1).
struct PieceSum {
    fin_inf: f64,
    fin_sup: f64,
    n_neg_inf: usize,
    n_pos_inf: usize,
}

impl PieceSum {
    fn over(pieces: &[Interval]) -> Self {
        let mut s = PieceSum {
            fin_inf: 0.0,
            fin_sup: 0.0,
            n_neg_inf: 0,
            n_pos_inf: 0,
        };
        for p in pieces {
            if p.inf.is_finite() {
                s.fin_inf += p.inf;
            } else {
                s.n_neg_inf += 1;
            }
            if p.sup.is_finite() {
                s.fin_sup += p.sup;
            } else {
                s.n_pos_inf += 1;
            }
        }
        s
    }

    fn without(&self, piece: Interval) -> Interval {
        let inf = if piece.inf.is_finite() {
            if self.n_neg_inf == 0 {
                self.fin_inf - piece.inf
            } else {
                f64::NEG_INFINITY
            }
        } else if self.n_neg_inf == 1 {
            self.fin_inf
        } else {
            f64::NEG_INFINITY
        };
        let sup = if piece.sup.is_finite() {
            if self.n_pos_inf == 0 {
                self.fin_sup - piece.sup
            } else {
                f64::INFINITY
            }
        } else if self.n_pos_inf == 1 {
            self.fin_sup
        } else {
            f64::INFINITY
        };
        Interval { inf, sup }
    }
}

// ---- Jacobi eigenvalue iteration ----------------------------------------

/// Cyclic Jacobi sweeps on a symmetric matrix; returns the diagonal once
/// the off-diagonal mass falls under the tolerance, or `None` when the
/// sweep budget runs out.
fn jacobi_eigenvalues(mut a: Vec<Vec<f64>>, config: &QuadraticConfig) -> Option<Vec<f64>> {
    let n = a.len();
    if n == 0 {
        return Some(Vec::new());
    }
    if n == 1 {
        return Some(vec![a[0][0]]);
    }
    let scale = a
        .iter()
        .flat_map(|row| row.iter())
        .fold(1.0_f64, |m, &v| m.max(v.abs()));
    for _ in 0..config.max_eig_sweeps {
        let mut off = 0.0;
        for i in 0..n {
            for j in (i + 1)..n {
                off += a[i][j] * a[i][j];
            }
        }
        if off.sqrt() <= config.eig_tol * scale {
            return Some((0..n).map(|i| a[i][i]).collect());
        }
        for p in 0..(n - 1) {
            for q in (p + 1)..n {
                if a[p][q].abs() <= f64::MIN_POSITIVE {
                    continue;
                }
                let theta = (a[q][q] - a[p][p]) / (2.0 * a[p][q]);
                let t = theta.signum() / (theta.abs() + (theta * theta + 1.0).sqrt());
                let c = 1.0 / (t * t + 1.0).sqrt();
                let s = t * c;
                for k in 0..n {
                    let akp = a[k][p];
                    let akq = a[k][q];
                    a[k][p] = c * akp - s * akq;
                    a[k][q] = s * akp + c * akq;
                }
                for k in 0..n {
                    let apk = a[p][k];
                    let aqk = a[q][k];
                    a[p][k] = c * apk - s * aqk;
                    a[q][k] = s * apk + c * aqk;
                }
            }
        }
    }
    None
}

// ---- nlhdlr plumbing ------------------------------------------------------

pub struct QuadraticNlHdlr;

fn form_of(data: &NlHdlrExprData) -> Option<&QuadForm> {
    match data {
        NlHdlrExprData::Quadratic(q) => Some(q),
        _ => None,
    }
}

impl NlHdlr for QuadraticNlHdlr {
    fn name(&self) -> &'static str {
        "quadratic"
    }

    fn priority(&self) -> i32 {
        100
    }

    fn detect(
        &self,
        store: &mut ExprStore,
        hdlrs: &ExprHandlers,
        config: &EngineConfig,
        e: ExprId,
        enforced_below: bool,
        enforced_above: bool,
        _aux_requests: &mut Vec<ExprId>,
    ) -> Option<(Methods, NlHdlrExprData)> {
        let form = detect_quadratic(store, hdlrs, config, e)?;
        let methods = Methods {
            sepa_below: !enforced_below
                && matches!(form.curvature, Curvature::Convex | Curvature::Linear),
            sepa_above: !enforced_above && form.curvature == Curvature::Concave,
            inteval: true,
            reverseprop: true,
        };
        Some((methods, NlHdlrExprData::Quadratic(Box::new(form))))
    }

    fn evalaux(
        &self,
        _store: &ExprStore,
        _hdlrs: &ExprHandlers,
        data: &NlHdlrExprData,
        _e: ExprId,
        driver: &dyn Driver,
    ) -> Option<f64> {
        form_of(data).map(|q| q.evalaux(driver))
    }

    fn inteval(
        &self,
        _store: &ExprStore,
        _hdlrs: &ExprHandlers,
        data: &NlHdlrExprData,
        _e: ExprId,
        varbounds: &mut dyn FnMut(VarId) -> Interval,
    ) -> Interval {
        match form_of(data) {
            Some(q) => q.inteval(varbounds),
            None => Interval::ENTIRE,
        }
    }

    fn reverseprop(
        &self,
        _store: &ExprStore,
        _hdlrs: &ExprHandlers,
        data: &NlHdlrExprData,
        _e: ExprId,
        bounds: Interval,
        varbounds: &mut dyn FnMut(VarId) -> Interval,
    ) -> ExprTightenings {
        match form_of(data) {
            Some(q) => q.reverseprop(bounds, varbounds),
            None => ExprTightenings::new(),
        }
    }

    fn estimate(
        &self,
        _store: &ExprStore,
        _hdlrs: &ExprHandlers,
        _config: &EngineConfig,
        data: &NlHdlrExprData,
        _e: ExprId,
        driver: &dyn Driver,
        overestimate: bool,
        rowprep: &mut RowPrep,
    ) -> bool {
        match form_of(data) {
            Some(q) => q.estimate(driver, overestimate, rowprep),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::BasicDriver;
    use crate::rowprep::SideType;
    use nlforge_expr::simplify::SimplifyCtx;

    fn fixture() -> (ExprStore, ExprHandlers, EngineConfig) {
        (ExprStore::new(), ExprHandlers::standard(), EngineConfig::default())
    }

    fn var(store: &mut ExprStore, hdlrs: &ExprHandlers, id: u32, name: &str) -> ExprId {
        store.create_var(hdlrs.builtin().var, VarId(id), VarType::Continuous, name)
    }

    /// x^2 + 2xy + y^2 + 3 built in canonical shape.
    fn binomial_square_form(store: &mut ExprStore, hdlrs: &ExprHandlers) -> (ExprId, ExprId, ExprId) {
        let x = var(store, hdlrs, 0, "x");
        let y = var(store, hdlrs, 1, "y");
        let mut ctx = SimplifyCtx {
            store: &mut *store,
            hdlrs,
        };
        let x2 = ctx.raw_pow(x, 2.0);
        let y2 = ctx.raw_pow(y, 2.0);
        let xy = ctx.raw_product(1.0, &[x, y]);
        let root = ctx.raw_sum(3.0, &[1.0, 2.0, 1.0], &[x2, xy, y2]);
        store.release(x2);
        store.release(y2);
        store.release(xy);
        (root, x, y)
    }

    #[test]
    fn jacobi_diagonalizes_known_matrix() {
        let a = vec![vec![2.0, 1.0], vec![1.0, 2.0]];
        let mut eigs = jacobi_eigenvalues(a, &QuadraticConfig::default()).unwrap();
        eigs.sort_by(|x, y| x.total_cmp(y));
        assert!((eigs[0] - 1.0).abs() < 1e-8);
        assert!((eigs[1] - 3.0).abs() < 1e-8);
    }

    #[test]
    fn detects_expanded_binomial_square() {
        let (mut store, hdlrs, config) = fixture();
        let (root, x, y) = binomial_square_form(&mut store, &hdlrs);

        let form = detect_quadratic(&store, &hdlrs, &config, root).unwrap();
        assert_eq!(form.constant, 3.0);
        assert!(form.lin_terms.is_empty());
        assert_eq!(form.quad_terms.len(), 2);
        assert_eq!(form.bilin_terms.len(), 1);
        assert_eq!(form.bilin_terms[0].coef, 2.0);
        for qt in &form.quad_terms {
            assert_eq!(qt.sqrcoef, 1.0);
            assert_eq!(qt.lincoef, 0.0);
        }
        // eigenvalues {0, 2}
        assert_eq!(form.curvature, Curvature::Convex);
        let mut eigs = form.eigenvalues.clone().unwrap();
        eigs.sort_by(|a, b| a.total_cmp(b));
        assert!(eigs[0].abs() < 1e-8);
        assert!((eigs[1] - 2.0).abs() < 1e-8);

        store.release(root);
        store.release(x);
        store.release(y);
    }

    #[test]
    fn binomial_square_interval_activity() {
        let (mut store, hdlrs, config) = fixture();
        let (root, x, y) = binomial_square_form(&mut store, &hdlrs);
        let form = detect_quadratic(&store, &hdlrs, &config, root).unwrap();

        let mut vb = |v: VarId| match v.0 {
            0 => Interval::new(-1.0, 2.0),
            _ => Interval::new(0.0, 1.0),
        };
        let act = form.inteval(&mut vb);
        // (x + y)^2 + 3 over the box is [3, 12]; the decomposed form may
        // be slightly wider on the low side but must contain it
        assert!(act.inf <= 3.0 + 1e-9);
        assert!(act.sup >= 12.0 - 1e-9 && act.sup <= 12.0 + 1e-6);

        store.release(root);
        store.release(x);
        store.release(y);
    }

    #[test]
    fn gradient_cut_of_convex_form_at_origin() {
        let (mut store, hdlrs, config) = fixture();
        let (root, x, y) = binomial_square_form(&mut store, &hdlrs);
        let form = detect_quadratic(&store, &hdlrs, &config, root).unwrap();

        let mut d = BasicDriver::new();
        let vx = d.add_var("x", -1.0, 2.0, VarType::Continuous);
        let vy = d.add_var("y", 0.0, 1.0, VarType::Continuous);
        d.set_sol_value(vx, 0.0);
        d.set_sol_value(vy, 0.0);

        let mut rp = RowPrep::new(SideType::Right, false);
        assert!(form.estimate(&d, false, &mut rp));
        rp.cleanup(&d, &config.separation).unwrap();
        // estimator is the constant 3: est - aux <= 0 becomes aux >= 3
        assert!(rp.terms.is_empty());
        assert!((rp.side + 3.0).abs() < 1e-12);

        store.release(root);
        store.release(x);
        store.release(y);
    }

    #[test]
    fn indefinite_form_disables_separation() {
        let (mut store, hdlrs, config) = fixture();
        let x = var(&mut store, &hdlrs, 0, "x");
        let y = var(&mut store, &hdlrs, 1, "y");
        let mut ctx = SimplifyCtx {
            store: &mut store,
            hdlrs: &hdlrs,
        };
        // x^2 - y^2 + x
        let x2 = ctx.raw_pow(x, 2.0);
        let y2 = ctx.raw_pow(y, 2.0);
        let root = ctx.raw_sum(0.0, &[1.0, -1.0, 1.0], &[x2, y2, x]);
        let form = detect_quadratic(&store, &hdlrs, &config, root).unwrap();
        assert_eq!(form.curvature, Curvature::Unknown);
        // x occurs twice: its linear coef folds into the quad term
        let qx = form.quad_terms.iter().find(|qt| qt.var == VarId(0)).unwrap();
        assert_eq!(qx.lincoef, 1.0);

        let mut rp = RowPrep::new(SideType::Right, false);
        let d = BasicDriver::new();
        assert!(!form.estimate(&d, false, &mut rp));
        assert!(!form.estimate(&d, true, &mut rp));

        for e in [root, x2, y2, x, y] {
            store.release(e);
        }
    }

    #[test]
    fn declines_non_quadratic_and_improper_sums() {
        let (mut store, hdlrs, config) = fixture();
        let x = var(&mut store, &hdlrs, 0, "x");
        let y = var(&mut store, &hdlrs, 1, "y");
        let mut ctx = SimplifyCtx {
            store: &mut store,
            hdlrs: &hdlrs,
        };
        // x^2 + y^2: every variable occurs once, not "proper"
        let x2 = ctx.raw_pow(x, 2.0);
        let y2 = ctx.raw_pow(y, 2.0);
        let improper = ctx.raw_sum(0.0, &[1.0, 1.0], &[x2, y2]);
        // x^3 + x is not quadratic at all
        let x3 = ctx.raw_pow(x, 3.0);
        let cubic = ctx.raw_sum(0.0, &[1.0, 1.0], &[x3, x]);

        assert!(detect_quadratic(&store, &hdlrs, &config, improper).is_none());
        assert!(detect_quadratic(&store, &hdlrs, &config, cubic).is_none());

        for e in [improper, cubic, x3, x2, y2, x, y] {
            store.release(e);
        }
    }

    #[test]
    fn reverseprop_solves_univariate_pieces() {
        let (mut store, hdlrs, config) = fixture();
        let x = var(&mut store, &hdlrs, 0, "x");
        let y = var(&mut store, &hdlrs, 1, "y");
        let mut ctx = SimplifyCtx {
            store: &mut store,
            hdlrs: &hdlrs,
        };
        // x^2 + x*y with y nearly fixed at 0: bounds [0, 1] force x^2 <= ~1
        let x2 = ctx.raw_pow(x, 2.0);
        let xy = ctx.raw_product(1.0, &[x, y]);
        let root = ctx.raw_sum(0.0, &[1.0, 1.0], &[x2, xy]);
        let form = detect_quadratic(&store, &hdlrs, &config, root).unwrap();

        let mut vb = |v: VarId| match v.0 {
            0 => Interval::new(-5.0, 5.0),
            _ => Interval::new(0.0, 0.0),
        };
        let tightenings = form.reverseprop(Interval::new(0.0, 1.0), &mut vb);
        let (_, iv) = tightenings
            .iter()
            .find(|&&(e, _)| e == x)
            .copied()
            .unwrap();
        assert!(iv.inf >= -1.0 - 1e-6 && iv.sup <= 1.0 + 1e-6);

        for e in [root, x2, xy, x, y] {
            store.release(e);
        }
    }
}
