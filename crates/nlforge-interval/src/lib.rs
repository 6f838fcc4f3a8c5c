//! Rounding-safe interval arithmetic for provable bound propagation.
//!
//! All operations return an enclosure of the exact real-valued result:
//! finite bounds are widened by one ulp in the outward direction instead of
//! switching the FPU rounding mode, which keeps the arithmetic portable and
//! free of global state.
//!
//! Infinite bounds use the `f64::INFINITY` sentinel; an interval with
//! `inf > sup` is empty.

mod quad;

pub use quad::solve_univariate_quad;

/// A closed interval `[inf, sup]` over the extended reals.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Interval {
    pub inf: f64,
    pub sup: f64,
}

/// Largest magnitude treated as a finite bound; beyond it a bound is
/// regarded as infinite (mirrors the solver's notion of "infinity").
pub const INTERVAL_INFINITY: f64 = f64::INFINITY;

/// Next representable float towards `-inf`, leaving infinities alone.
#[inline]
fn next_down(x: f64) -> f64 {
    if x.is_infinite() || x.is_nan() {
        return x;
    }
    if x == 0.0 {
        return -f64::MIN_POSITIVE * f64::EPSILON;
    }
    let bits = x.to_bits();
    let next = if x > 0.0 { bits - 1 } else { bits + 1 };
    f64::from_bits(next)
}

/// Next representable float towards `+inf`, leaving infinities alone.
#[inline]
fn next_up(x: f64) -> f64 {
    -next_down(-x)
}

/// Product of two bounds with the convention `0 * inf = 0`, which is the
/// correct limit for interval multiplication.
#[inline]
fn bound_mul(a: f64, b: f64) -> f64 {
    if a == 0.0 || b == 0.0 {
        0.0
    } else {
        a * b
    }
}

impl Interval {
    /// The canonical empty interval.
    pub const EMPTY: Interval = Interval {
        inf: 1.0,
        sup: -1.0,
    };

    /// The whole extended real line.
    pub const ENTIRE: Interval = Interval {
        inf: f64::NEG_INFINITY,
        sup: f64::INFINITY,
    };

    pub fn new(inf: f64, sup: f64) -> Self {
        Interval { inf, sup }
    }

    /// Degenerate interval `[x, x]`.
    pub fn singleton(x: f64) -> Self {
        Interval { inf: x, sup: x }
    }

    pub fn is_empty(&self) -> bool {
        self.inf > self.sup
    }

    pub fn is_entire(&self) -> bool {
        self.inf == f64::NEG_INFINITY && self.sup == f64::INFINITY
    }

    pub fn is_singleton(&self) -> bool {
        self.inf == self.sup
    }

    pub fn contains(&self, x: f64) -> bool {
        self.inf <= x && x <= self.sup
    }

    pub fn contains_interval(&self, other: &Interval) -> bool {
        other.is_empty() || (self.inf <= other.inf && other.sup <= self.sup)
    }

    /// Interval intersection; empty when the operands are disjoint.
    pub fn intersect(&self, other: &Interval) -> Interval {
        Interval {
            inf: self.inf.max(other.inf),
            sup: self.sup.min(other.sup),
        }
    }

    /// Convex hull of the union.
    pub fn hull(&self, other: &Interval) -> Interval {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        Interval {
            inf: self.inf.min(other.inf),
            sup: self.sup.max(other.sup),
        }
    }

    /// Width `sup - inf`; zero for singletons, negative only when empty.
    pub fn width(&self) -> f64 {
        self.sup - self.inf
    }

    pub fn neg(&self) -> Interval {
        if self.is_empty() {
            return Interval::EMPTY;
        }
        Interval {
            inf: -self.sup,
            sup: -self.inf,
        }
    }

    pub fn add(&self, other: &Interval) -> Interval {
        if self.is_empty() || other.is_empty() {
            return Interval::EMPTY;
        }
        Interval {
            inf: down_add(self.inf, other.inf),
            sup: up_add(self.sup, other.sup),
        }
    }

    pub fn sub(&self, other: &Interval) -> Interval {
        self.add(&other.neg())
    }

    /// Translation by a scalar.
    pub fn add_scalar(&self, c: f64) -> Interval {
        self.add(&Interval::singleton(c))
    }

    pub fn mul(&self, other: &Interval) -> Interval {
        if self.is_empty() || other.is_empty() {
            return Interval::EMPTY;
        }
        let cands = [
            bound_mul(self.inf, other.inf),
            bound_mul(self.inf, other.sup),
            bound_mul(self.sup, other.inf),
            bound_mul(self.sup, other.sup),
        ];
        let mut lo = f64::INFINITY;
        let mut hi = f64::NEG_INFINITY;
        for c in cands {
            lo = lo.min(c);
            hi = hi.max(c);
        }
        Interval {
            inf: next_down(lo),
            sup: next_up(hi),
        }
    }

    pub fn mul_scalar(&self, c: f64) -> Interval {
        self.mul(&Interval::singleton(c))
    }

    /// Division; returns `ENTIRE` when the divisor straddles zero.
    pub fn div(&self, other: &Interval) -> Interval {
        if self.is_empty() || other.is_empty() {
            return Interval::EMPTY;
        }
        if other.contains(0.0) {
            if other.is_singleton() {
                return Interval::EMPTY;
            }
            return Interval::ENTIRE;
        }
        self.mul(&Interval {
            inf: next_down(1.0 / other.sup),
            sup: next_up(1.0 / other.inf),
        })
    }

    /// Enclosure of `{x^2 : x in self}`.
    pub fn square(&self) -> Interval {
        if self.is_empty() {
            return Interval::EMPTY;
        }
        let a = bound_mul(self.inf, self.inf);
        let b = bound_mul(self.sup, self.sup);
        let hi = a.max(b);
        let lo = if self.contains(0.0) { 0.0 } else { a.min(b) };
        Interval {
            inf: if lo == 0.0 { 0.0 } else { next_down(lo) },
            sup: next_up(hi),
        }
    }

    /// Enclosure of `{x^n : x in self}` for an integer exponent.
    pub fn powi(&self, n: i32) -> Interval {
        if self.is_empty() {
            return Interval::EMPTY;
        }
        match n {
            0 => Interval::singleton(1.0),
            1 => *self,
            2 => self.square(),
            _ if n < 0 => self.powi(-n).recip(),
            _ if n % 2 == 0 => {
                // even powers are symmetric around zero
                let m = self.abs();
                let lo = m.inf.powi(n);
                Interval {
                    inf: if lo == 0.0 { 0.0 } else { next_down(lo) },
                    sup: next_up(m.sup.powi(n)),
                }
            }
            _ => Interval {
                inf: next_down(self.inf.powi(n)),
                sup: next_up(self.sup.powi(n)),
            },
        }
    }

    /// Enclosure of `{x^p : x in self, x >= 0}` for a real exponent; the
    /// negative part of the domain is clipped away.
    pub fn powf(&self, p: f64) -> Interval {
        if p.fract() == 0.0 && p.abs() < i32::MAX as f64 {
            return self.powi(p as i32);
        }
        let dom = self.intersect(&Interval::new(0.0, f64::INFINITY));
        if dom.is_empty() {
            return Interval::EMPTY;
        }
        let (lo, hi) = if p >= 0.0 {
            (dom.inf.powf(p), dom.sup.powf(p))
        } else {
            (dom.sup.powf(p), dom.inf.powf(p))
        };
        Interval {
            inf: next_down(lo),
            sup: next_up(hi),
        }
    }

    pub fn recip(&self) -> Interval {
        Interval::singleton(1.0).div(self)
    }

    pub fn exp(&self) -> Interval {
        if self.is_empty() {
            return Interval::EMPTY;
        }
        Interval {
            inf: next_down(self.inf.exp()).max(0.0),
            sup: next_up(self.sup.exp()),
        }
    }

    /// Natural logarithm with domain clipping: inputs at or below zero
    /// contribute `-inf`, and an interval entirely `<= 0` is empty.
    pub fn log(&self) -> Interval {
        if self.is_empty() || self.sup <= 0.0 {
            return Interval::EMPTY;
        }
        let lo = if self.inf <= 0.0 {
            f64::NEG_INFINITY
        } else {
            next_down(self.inf.ln())
        };
        Interval {
            inf: lo,
            sup: next_up(self.sup.ln()),
        }
    }

    pub fn abs(&self) -> Interval {
        if self.is_empty() {
            return Interval::EMPTY;
        }
        if self.inf >= 0.0 {
            *self
        } else if self.sup <= 0.0 {
            self.neg()
        } else {
            Interval {
                inf: 0.0,
                sup: self.sup.max(-self.inf),
            }
        }
    }

    pub fn sqrt(&self) -> Interval {
        self.powf(0.5)
    }

    /// Enclosure of `{a*x^2 + b*x : x in self, b in lin}`.
    pub fn quad(&self, sqrcoef: f64, lin: &Interval) -> Interval {
        quad::quad_activity(sqrcoef, lin, self)
    }
}

#[inline]
fn down_add(a: f64, b: f64) -> f64 {
    let s = a + b;
    if s.is_infinite() {
        s
    } else {
        next_down(s)
    }
}

#[inline]
fn up_add(a: f64, b: f64) -> f64 {
    let s = a + b;
    if s.is_infinite() {
        s
    } else {
        next_up(s)
    }
}

#[cfg(test)]
mod tests;
