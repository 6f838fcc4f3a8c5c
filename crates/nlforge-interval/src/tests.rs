use super::*;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

fn assert_encloses(iv: &Interval, x: f64) {
    assert!(
        iv.contains(x),
        "value {} escapes interval [{}, {}]",
        x,
        iv.inf,
        iv.sup
    );
}

#[test]
fn empty_and_entire() {
    assert!(Interval::EMPTY.is_empty());
    assert!(!Interval::ENTIRE.is_empty());
    assert!(Interval::ENTIRE.is_entire());
    assert!(Interval::new(1.0, 1.0).is_singleton());
    assert!(Interval::new(2.0, 1.0).is_empty());
}

#[test]
fn add_is_outward() {
    let a = Interval::new(0.1, 0.2);
    let b = Interval::new(0.3, 0.4);
    let s = a.add(&b);
    assert!(s.inf <= 0.4 && s.sup >= 0.6);
    assert!(s.inf < s.sup);
}

#[test]
fn mul_with_zero_times_infinity() {
    let a = Interval::new(0.0, 0.0);
    let b = Interval::ENTIRE;
    let p = a.mul(&b);
    assert_encloses(&p, 0.0);
    assert!(p.inf <= 0.0 && p.sup >= 0.0);
    assert!(p.inf.is_finite() && p.sup.is_finite());
}

#[test]
fn div_across_zero_is_entire() {
    let a = Interval::new(1.0, 2.0);
    let b = Interval::new(-1.0, 1.0);
    assert!(a.div(&b).is_entire());
}

#[test]
fn square_straddling_zero() {
    let a = Interval::new(-2.0, 3.0);
    let s = a.square();
    assert_eq!(s.inf, 0.0);
    assert!(s.sup >= 9.0);
}

#[test]
fn log_clips_domain() {
    let a = Interval::new(-1.0, 9.0);
    let l = a.log();
    assert_eq!(l.inf, f64::NEG_INFINITY);
    assert!(l.sup >= 9.0_f64.ln());

    assert!(Interval::new(-2.0, -1.0).log().is_empty());
    assert!(Interval::new(-2.0, 0.0).log().is_empty());
}

#[test]
fn powi_odd_preserves_sign() {
    let a = Interval::new(-2.0, 3.0);
    let c = a.powi(3);
    assert!(c.inf <= -8.0 && c.sup >= 27.0);
}

#[test]
fn powi_even_is_nonnegative() {
    let a = Interval::new(-2.0, 1.0);
    let c = a.powi(4);
    assert_eq!(c.inf, 0.0);
    assert!(c.sup >= 16.0);
}

#[test]
fn quad_activity_on_shifted_box() {
    // x^2 over [-1, 2]: [0, 4]
    let x = Interval::new(-1.0, 2.0);
    let q = x.quad(1.0, &Interval::singleton(0.0));
    assert!(q.inf <= 0.0 && q.inf >= -1e-9);
    assert!(q.sup >= 4.0 && q.sup <= 4.0 + 1e-9);
}

#[test]
fn quad_activity_concave_vertex() {
    // -x^2 + 2x over [0, 3] has maximum 1 at x = 1
    let x = Interval::new(0.0, 3.0);
    let q = x.quad(-1.0, &Interval::singleton(2.0));
    assert!(q.sup >= 1.0 && q.sup <= 1.0 + 1e-9);
    assert!(q.inf <= -3.0);
}

#[test]
fn solve_quad_square_unit_disc() {
    // x^2 in [0, 1] over x in [-2, 2] tightens to [-1, 1]
    let r = solve_univariate_quad(
        1.0,
        &Interval::singleton(0.0),
        &Interval::new(0.0, 1.0),
        &Interval::new(-2.0, 2.0),
    );
    assert!(r.inf <= -1.0 && r.inf >= -1.0 - 1e-9);
    assert!(r.sup >= 1.0 && r.sup <= 1.0 + 1e-9);
}

#[test]
fn solve_quad_with_linear_term() {
    // x^2 + 2x in [-1, 3] over x in [-5, 5]: roots give [-3, 1]
    let r = solve_univariate_quad(
        1.0,
        &Interval::singleton(2.0),
        &Interval::new(-1.0, 3.0),
        &Interval::new(-5.0, 5.0),
    );
    assert!(r.contains(-3.0) && r.contains(1.0));
    assert!(r.inf >= -3.0 - 1e-6 && r.sup <= 1.0 + 1e-6);
}

#[test]
fn solve_quad_linear_only() {
    // 2x in [4, 6] tightens x to [2, 3]
    let r = solve_univariate_quad(
        0.0,
        &Interval::singleton(2.0),
        &Interval::new(4.0, 6.0),
        &Interval::new(-10.0, 10.0),
    );
    assert!(r.inf <= 2.0 && r.inf >= 2.0 - 1e-9);
    assert!(r.sup >= 3.0 && r.sup <= 3.0 + 1e-9);
}

#[test]
fn randomized_soundness_of_quad_enclosure() {
    let mut rng = ChaCha8Rng::seed_from_u64(42);
    for _ in 0..500 {
        let a: f64 = rng.random_range(-5.0..5.0);
        let bl: f64 = rng.random_range(-5.0..5.0);
        let bu = bl + rng.random_range(0.0..3.0);
        let xl: f64 = rng.random_range(-5.0..5.0);
        let xu = xl + rng.random_range(0.0..5.0);
        let lin = Interval::new(bl, bu);
        let xb = Interval::new(xl, xu);
        let enc = xb.quad(a, &lin);
        for _ in 0..20 {
            let x = rng.random_range(xl..=xu);
            let b = rng.random_range(bl..=bu);
            assert_encloses(&enc, a * x * x + b * x);
        }
    }
}

#[test]
fn randomized_soundness_of_elementary_ops() {
    let mut rng = ChaCha8Rng::seed_from_u64(7);
    for _ in 0..500 {
        let al: f64 = rng.random_range(-10.0..10.0);
        let au = al + rng.random_range(0.0..5.0);
        let bl: f64 = rng.random_range(-10.0..10.0);
        let bu = bl + rng.random_range(0.0..5.0);
        let a = Interval::new(al, au);
        let b = Interval::new(bl, bu);
        let x = rng.random_range(al..=au);
        let y = rng.random_range(bl..=bu);

        assert_encloses(&a.add(&b), x + y);
        assert_encloses(&a.sub(&b), x - y);
        assert_encloses(&a.mul(&b), x * y);
        assert_encloses(&a.square(), x * x);
        assert_encloses(&a.abs(), x.abs());
        assert_encloses(&a.exp(), x.exp());
        if x > 0.0 {
            assert_encloses(&a.log(), x.ln());
        }
    }
}
