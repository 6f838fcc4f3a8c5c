//! Enclosures for interval quadratics `a*x^2 + b*x` with scalar `a` and
//! interval coefficient `b`, plus the inverse operation used by reverse
//! propagation: solving `a*x^2 + b*x in rhs` for `x` over a box.

use crate::{next_down, next_up, Interval};

/// Value of `a*x^2 + max_{b in lin} b*x` at a single point, with infinite
/// points resolved by taking limits.
fn eval_max(a: f64, lin: &Interval, x: f64) -> f64 {
    if x.is_infinite() {
        if a > 0.0 {
            return f64::INFINITY;
        }
        if a < 0.0 {
            return f64::NEG_INFINITY;
        }
        let b = if x > 0.0 { lin.sup } else { lin.inf };
        return crate::bound_mul(b, x);
    }
    let bx = (lin.inf * x).max(lin.sup * x);
    a * x * x + bx
}

/// Upper bound of `{a*x^2 + b*x : x in xb, b in lin}`.
fn quad_upper(a: f64, lin: &Interval, xb: &Interval) -> f64 {
    let mut hi = eval_max(a, lin, xb.inf).max(eval_max(a, lin, xb.sup));
    if a < 0.0 {
        // concave in x; the maximizer may sit at a vertex -b/(2a)
        for b in [lin.inf, lin.sup] {
            if b.is_finite() {
                let v = -b / (2.0 * a);
                if xb.contains(v) {
                    hi = hi.max(eval_max(a, lin, v));
                }
            }
        }
    }
    if hi.is_finite() {
        next_up(hi)
    } else {
        hi
    }
}

/// Enclosure of `{a*x^2 + b*x : x in xb, b in lin}`.
pub(crate) fn quad_activity(a: f64, lin: &Interval, xb: &Interval) -> Interval {
    if xb.is_empty() || lin.is_empty() {
        return Interval::EMPTY;
    }
    Interval {
        inf: -quad_upper(-a, &lin.neg(), xb),
        sup: quad_upper(a, lin, xb),
    }
}

/// A solution set on one half-line, at most two disjoint intervals.
type TwoIntervals = [Interval; 2];

/// `{t in x : a*t^2 + p*t <= c}` for `x` a subset of `[0, inf)`.
fn le_set_pos(a: f64, p: f64, c: f64, x: &Interval) -> TwoIntervals {
    if x.is_empty() || c == f64::NEG_INFINITY {
        return [Interval::EMPTY, Interval::EMPTY];
    }
    if c == f64::INFINITY {
        return [*x, Interval::EMPTY];
    }
    if a == 0.0 {
        if p > 0.0 {
            return [x.intersect(&Interval::new(x.inf, next_up(c / p))), Interval::EMPTY];
        }
        if p < 0.0 {
            return [x.intersect(&Interval::new(next_down(c / p), x.sup)), Interval::EMPTY];
        }
        return if c >= 0.0 {
            [*x, Interval::EMPTY]
        } else {
            [Interval::EMPTY, Interval::EMPTY]
        };
    }
    let disc = p * p + 4.0 * a * c;
    if disc < 0.0 {
        // no real roots: the parabola never meets level c
        return if a > 0.0 {
            [Interval::EMPTY, Interval::EMPTY]
        } else {
            [*x, Interval::EMPTY]
        };
    }
    let r = disc.sqrt();
    let t1 = next_down(((-p - r) / (2.0 * a)).min((-p + r) / (2.0 * a)));
    let t2 = next_up(((-p - r) / (2.0 * a)).max((-p + r) / (2.0 * a)));
    if a > 0.0 {
        [x.intersect(&Interval::new(t1, t2)), Interval::EMPTY]
    } else {
        [
            x.intersect(&Interval::new(x.inf, t1)),
            x.intersect(&Interval::new(t2, x.sup)),
        ]
    }
}

/// Hull of `{t in x : a*t^2 + b*t in rhs for some b in lin}`, `x` within
/// `[0, inf)`. With `t >= 0` the coefficient range `lin*t` is monotone in
/// `b`, so membership splits into two scalar quadratic inequalities.
fn solve_pos(a: f64, lin: &Interval, rhs: &Interval, x: &Interval) -> Interval {
    if x.is_empty() {
        return Interval::EMPTY;
    }
    let below = le_set_pos(a, lin.inf, rhs.sup, x);
    let above = le_set_pos(-a, -lin.sup, -rhs.inf, x);
    let mut hull = Interval::EMPTY;
    for s in &below {
        for t in &above {
            let isec = s.intersect(t);
            if !isec.is_empty() {
                hull = hull.hull(&isec);
            }
        }
    }
    hull
}

/// Hull of `{x in xbnds : a*x^2 + b*x in rhs for some b in lin}`.
///
/// Used by reverse propagation of quadratic forms: `lin` encloses the
/// activity of the linear coefficient and `rhs` the residual right-hand
/// side, and the result tightens the variable's domain.
pub fn solve_univariate_quad(a: f64, lin: &Interval, rhs: &Interval, xbnds: &Interval) -> Interval {
    if xbnds.is_empty() || rhs.is_empty() || lin.is_empty() {
        return Interval::EMPTY;
    }
    let mut result = Interval::EMPTY;
    let pos = Interval::new(xbnds.inf.max(0.0), xbnds.sup);
    if !pos.is_empty() {
        result = result.hull(&solve_pos(a, lin, rhs, &pos));
    }
    // mirror x -> -x for the negative half-line
    let npos = Interval::new((-xbnds.sup).max(0.0), -xbnds.inf);
    if !npos.is_empty() {
        result = result.hull(&solve_pos(a, &lin.neg(), rhs, &npos).neg());
    }
    result.intersect(xbnds)
}
