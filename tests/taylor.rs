use approx::assert_relative_eq;
use proptest::prelude::*;
use tapesweep::{Slot, Status, Tape, TapeBuilder};

fn record(x: &[f64], f: impl FnOnce(&mut TapeBuilder<f64>, &[Slot]) -> Vec<Slot>) -> Tape<f64> {
    let mut b = TapeBuilder::new();
    let xs: Vec<Slot> = x.iter().map(|&v| b.independent(v)).collect();
    for y in f(&mut b, &xs) {
        b.dependent(y);
    }
    b.finish()
}

/// `(status, y, yd)` of a first-order scalar sweep.
fn fos(tape: &Tape<f64>, x: &[f64], xd: &[f64]) -> (Status, Vec<f64>, Vec<f64>) {
    let (m, n) = (tape.num_dependents(), tape.num_independents());
    let mut y = vec![0.0; m];
    let mut yd = vec![0.0; m];
    let out = tape
        .sweep()
        .fos_forward(m, n, 0, x, xd, Some(&mut y), Some(&mut yd));
    (out.status, y, yd)
}

fn hos(tape: &Tape<f64>, d: usize, x: &[f64], xs: &[f64]) -> Vec<f64> {
    let (m, n) = (tape.num_dependents(), tape.num_independents());
    let mut ys = vec![0.0; m * d];
    let _ = tape.sweep().hos_forward(m, n, d, 0, x, xs, None, Some(&mut ys));
    ys
}

fn rosenbrock(b: &mut TapeBuilder<f64>, x: &[Slot]) -> Vec<Slot> {
    let dx = b.add_const(x[0], -1.0);
    let sq = b.mul(x[0], x[0]);
    let t = b.sub(x[1], sq);
    let dx2 = b.mul(dx, dx);
    let t2 = b.mul(t, t);
    let t2h = b.mul_const(t2, 100.0);
    vec![b.add(dx2, t2h)]
}

// ══════════════════════════════════════════════
//  First order
// ══════════════════════════════════════════════

#[test]
fn chain_rule() {
    // sin(x0 x1) + exp(x0)
    let tape = record(&[0.5, 2.0], |b, x| {
        let p = b.mul(x[0], x[1]);
        let s = b.sin(p);
        let e = b.exp(x[0]);
        vec![b.add(s, e)]
    });
    let (status, y, yd) = fos(&tape, &[0.5, 2.0], &[1.0, 0.0]);
    assert_eq!(status, Status::Smooth);
    assert_relative_eq!(y[0], 1.0f64.sin() + 0.5f64.exp(), epsilon = 1e-12);
    assert_relative_eq!(yd[0], 2.0 * 1.0f64.cos() + 0.5f64.exp(), epsilon = 1e-12);
}

#[test]
fn product_then_quotient_is_identity() {
    let tape = record(&[3.0, 7.0], |b, x| {
        let p = b.mul(x[0], x[1]);
        vec![b.div(p, x[1])]
    });
    let (_, y, yd) = fos(&tape, &[3.0, 7.0], &[0.25, -4.0]);
    assert_relative_eq!(y[0], 3.0, epsilon = 1e-12);
    assert_relative_eq!(yd[0], 0.25, epsilon = 1e-12);
}

#[test]
fn in_place_updates_differentiate() {
    // 3x^2 built from in-place operations
    let tape = record(&[2.0], |b, x| {
        let s = b.copy(x[0]);
        b.incr(s);
        b.add_assign_const(s, 0.5);
        b.mul_assign_const(s, 2.0);
        b.decr(s);
        b.sub_assign_const(s, 1.0);
        b.add_assign(s, x[0]);
        b.mul_assign(s, x[0]);
        b.sub_assign(s, x[0]);
        vec![s]
    });
    let (_, y, yd) = fos(&tape, &[3.0], &[1.0]);
    assert_relative_eq!(y[0], 27.0, epsilon = 1e-12);
    assert_relative_eq!(yd[0], 18.0, epsilon = 1e-12);
}

#[test]
fn elementary_derivatives() {
    type Case = (fn(&mut TapeBuilder<f64>, Slot) -> Slot, f64, f64);
    let cases: Vec<Case> = vec![
        (|b, x| b.exp(x), 0.7, 0.7f64.exp()),
        (|b, x| b.ln(x), 0.7, 1.0 / 0.7),
        (|b, x| b.sqrt(x), 0.7, 0.5 / 0.7f64.sqrt()),
        (|b, x| b.powf(x, 2.5), 0.7, 2.5 * 0.7f64.powf(1.5)),
        (|b, x| b.const_div(3.0, x), 0.7, -3.0 / 0.49),
        (|b, x| b.sin(x), 0.7, 0.7f64.cos()),
        (|b, x| b.cos(x), 0.7, -0.7f64.sin()),
        (|b, x| b.atan(x), 0.7, 1.0 / 1.49),
        (|b, x| b.asin(x), 0.6, 1.0 / 0.8),
        (|b, x| b.acos(x), 0.6, -1.0 / 0.8),
        (|b, x| b.asinh(x), 0.7, 1.0 / 1.49f64.sqrt()),
        (|b, x| b.acosh(x), 2.0, 1.0 / 3.0f64.sqrt()),
        (|b, x| b.atanh(x), 0.5, 1.0 / 0.75),
        (
            |b, x| b.erf(x),
            0.7,
            std::f64::consts::FRAC_2_SQRT_PI * (-0.49f64).exp(),
        ),
        (|b, x| b.neg(x), 0.7, -1.0),
        (|b, x| b.sub_from_const(2.0, x), 0.7, -1.0),
    ];
    for (i, (f, x0, expected)) in cases.into_iter().enumerate() {
        let tape = record(&[x0], |b, x| vec![f(b, x[0])]);
        let (status, _, yd) = fos(&tape, &[x0], &[1.0]);
        assert_eq!(status, Status::Smooth, "case {i}");
        assert_relative_eq!(yd[0], expected, epsilon = 1e-10, max_relative = 1e-10);
    }
}

#[test]
fn rosenbrock_gradient_by_vector_mode() {
    let tape = record(&[1.5, 2.5], rosenbrock);
    let mut ys = [0.0; 2];
    let out = tape.sweep().fov_forward(
        1,
        2,
        2,
        &[1.5, 2.5],
        &[1.0, 0.0, 0.0, 1.0],
        None,
        Some(&mut ys),
    );
    assert_eq!(out.status, Status::Smooth);
    assert_relative_eq!(ys[0], -149.0, epsilon = 1e-10);
    assert_relative_eq!(ys[1], 50.0, epsilon = 1e-10);
}

#[test]
fn vector_mode_matches_scalar_per_direction() {
    let tape = record(&[0.3, -1.2, 0.8], |b, x| {
        let a = b.mul(x[0], x[1]);
        let s = b.sin(a);
        let q = b.div(s, x[2]);
        let r = b.atan(x[2]);
        vec![q, b.add(r, x[0])]
    });
    let x = [0.3, -1.2, 0.8];
    let dirs = [[1.0, 0.5, -2.0], [0.0, 1.0, 0.25], [3.0, 0.0, 1.0]];
    let p = dirs.len();
    // [variable][direction]
    let mut xs = vec![0.0; 3 * p];
    for (l, d) in dirs.iter().enumerate() {
        for i in 0..3 {
            xs[i * p + l] = d[i];
        }
    }
    let mut ys = vec![0.0; 2 * p];
    let _ = tape.sweep().fov_forward(2, 3, p, &x, &xs, None, Some(&mut ys));
    for (l, d) in dirs.iter().enumerate() {
        let (_, _, yd) = fos(&tape, &x, d);
        for j in 0..2 {
            assert_relative_eq!(ys[j * p + l], yd[j], epsilon = 1e-12);
        }
    }
}

// ══════════════════════════════════════════════
//  Higher order
// ══════════════════════════════════════════════

#[test]
fn exp_times_sin_second_order() {
    // f = exp(x0) sin(x1) along (1, 1): f(t) = e^(x0+t) sin(x1+t)
    let (a, c) = (0.4, 1.1);
    let tape = record(&[a, c], |b, x| {
        let e = b.exp(x[0]);
        let s = b.sin(x[1]);
        vec![b.mul(e, s)]
    });
    let ys = hos(&tape, 2, &[a, c], &[1.0, 0.0, 1.0, 0.0]);
    let e = a.exp();
    assert_relative_eq!(ys[0], e * (c.sin() + c.cos()), epsilon = 1e-12);
    assert_relative_eq!(ys[1], e * c.cos(), epsilon = 1e-12);
}

#[test]
fn higher_order_first_coefficient_matches_first_order() {
    let tape = record(&[1.5, 2.5], rosenbrock);
    let ys = hos(&tape, 3, &[1.5, 2.5], &[1.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
    assert_relative_eq!(ys[0], -149.0, epsilon = 1e-10);
}

#[test]
fn polynomial_coefficients_terminate() {
    // x^3 along x = 2 + t: 8 + 12t + 6t^2 + t^3
    let tape = record(&[2.0], |b, x| {
        let sq = b.mul(x[0], x[0]);
        vec![b.mul(sq, x[0])]
    });
    let ys = hos(&tape, 4, &[2.0], &[1.0, 0.0, 0.0, 0.0]);
    assert_eq!(ys, vec![12.0, 6.0, 1.0, 0.0]);
}

#[test]
fn atan_series() {
    // atan(t) = t - t^3/3 + t^5/5
    let tape = record(&[0.0], |b, x| vec![b.atan(x[0])]);
    let ys = hos(&tape, 5, &[0.0], &[1.0, 0.0, 0.0, 0.0, 0.0]);
    let expected = [1.0, 0.0, -1.0 / 3.0, 0.0, 0.2];
    for (got, want) in ys.iter().zip(expected) {
        assert_relative_eq!(*got, want, epsilon = 1e-12);
    }
}

#[test]
fn vector_higher_order_matches_scalar() {
    let x = [0.6, 1.7];
    let tape = record(&x, |b, x| {
        let l = b.ln(x[1]);
        let p = b.mul(l, x[0]);
        let e = b.exp(p);
        let s = b.sqrt(x[1]);
        vec![e, b.powf(s, 3.0)]
    });
    let d = 3;
    let dirs = [[1.0, 0.0, 0.5, 0.0, 0.0, 0.0], [0.0, 1.0, 0.0, 1.0, 0.0, 0.25]];
    // per direction: [x0 coefficients (d)][x1 coefficients (d)]
    let p = dirs.len();
    let mut xs = vec![0.0; 2 * p * d];
    for (l, dir) in dirs.iter().enumerate() {
        for i in 0..2 {
            for k in 0..d {
                xs[(i * p + l) * d + k] = dir[i * d + k];
            }
        }
    }
    let mut ys = vec![0.0; 2 * p * d];
    let out = tape.sweep().hov_forward(2, 2, d, p, &x, &xs, None, Some(&mut ys));
    assert!(out.checkpoint.is_none());
    for (l, dir) in dirs.iter().enumerate() {
        let scalar = hos(&tape, d, &x, dir);
        for j in 0..2 {
            for k in 0..d {
                assert_relative_eq!(ys[(j * p + l) * d + k], scalar[j * d + k], epsilon = 1e-12);
            }
        }
    }
}

proptest! {
    #[test]
    fn product_coefficients_are_convolutions(
        a in proptest::collection::vec(-5.0f64..5.0, 4),
        b in proptest::collection::vec(-5.0f64..5.0, 4),
    ) {
        let tape = record(&[a[0], b[0]], |t, x| vec![t.mul(x[0], x[1])]);
        let mut xs = a[1..].to_vec();
        xs.extend_from_slice(&b[1..]);
        let ys = hos(&tape, 3, &[a[0], b[0]], &xs);
        for k in 1..=3 {
            let conv: f64 = (0..=k).map(|j| a[j] * b[k - j]).sum();
            prop_assert!((ys[k - 1] - conv).abs() <= 1e-9 * (1.0 + conv.abs()));
        }
    }

    #[test]
    fn sweeps_are_idempotent(x0 in -2.0f64..2.0, x1 in 0.1f64..3.0) {
        let tape = record(&[1.0, 1.0], |b, x| {
            let l = b.ln(x[1]);
            let s = b.sin(x[0]);
            vec![b.mul(l, s)]
        });
        let first = fos(&tape, &[x0, x1], &[1.0, -1.0]);
        let second = fos(&tape, &[x0, x1], &[1.0, -1.0]);
        prop_assert_eq!(first.1, second.1);
        prop_assert_eq!(first.2, second.2);
    }
}

// ══════════════════════════════════════════════
//  Keep
// ══════════════════════════════════════════════

#[test]
fn first_order_keep_records_tangent() {
    let tape = record(&[3.0], |b, x| {
        let s = b.copy(x[0]);
        b.overwrite(s).mul(s, s);
        vec![s]
    });
    let mut yd = [0.0];
    let out = tape
        .sweep()
        .fos_forward(1, 1, 2, &[3.0], &[0.5], None, Some(&mut yd));
    assert_relative_eq!(yd[0], 3.0);
    let cp = out.checkpoint.unwrap();
    assert_eq!(cp.keep(), 2);
    let last = cp.get(cp.len() - 1).unwrap();
    assert_eq!(last.location, 1);
    assert_relative_eq!(last.value, 3.0);
    assert_eq!(last.coefficients, &[0.5]);
}

#[test]
fn vector_keep_records_all_directions() {
    let tape = record(&[1.0, 2.0], rosenbrock);
    let (d, p, keep) = (2, 2, 3);
    let xs = vec![1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0];
    let out = tape
        .sweep()
        .hov_wk_forward(1, 2, d, keep, p, &[1.0, 2.0], &xs, None, None);
    let cp = out.checkpoint.unwrap();
    assert_eq!(cp.keep(), keep);
    assert!(cp.iter().all(|s| s.coefficients.len() == p * (keep - 1)));
    assert_eq!(cp.len(), 9);
}

#[test]
#[should_panic(expected = "hos forward sweep supports keep <= 2, got 3")]
fn higher_order_keep_is_bounded_by_degree() {
    let tape = record(&[1.0], |b, x| vec![b.exp(x[0])]);
    let _ = tape
        .sweep()
        .hos_forward(1, 1, 1, 3, &[1.0], &[1.0], None, None);
}
