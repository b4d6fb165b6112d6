#![allow(dead_code)]

use tapesweep::{Slot, Tape, TapeBuilder};

// ─── Rosenbrock ────────────────────────────────────────────────────────────

pub fn rosenbrock(x: &[f64]) -> Tape<f64> {
    let mut b = TapeBuilder::new();
    let v: Vec<Slot> = x.iter().map(|&xi| b.independent(xi)).collect();
    let mut sum = b.constant(0.0);
    for i in 0..v.len() - 1 {
        let t1 = b.sub_from_const(1.0, v[i]);
        let sq = b.mul(v[i], v[i]);
        let t2 = b.sub(v[i + 1], sq);
        b.add_product(sum, t1, t1);
        let t2s = b.mul(t2, t2);
        let t2h = b.mul_const(t2s, 100.0);
        sum = b.add(sum, t2h);
    }
    b.dependent(sum);
    b.finish()
}

// ─── Rastrigin ─────────────────────────────────────────────────────────────
// f(x) = 10n + Σ[x_i² - 10·cos(2π·x_i)]

pub fn rastrigin(x: &[f64]) -> Tape<f64> {
    let mut b = TapeBuilder::new();
    let v: Vec<Slot> = x.iter().map(|&xi| b.independent(xi)).collect();
    let sum = b.constant(10.0 * x.len() as f64);
    for &xi in &v {
        b.add_product(sum, xi, xi);
        let a = b.mul_const(xi, 2.0 * std::f64::consts::PI);
        let c = b.cos(a);
        let c10 = b.mul_const(c, 10.0);
        b.sub_assign(sum, c10);
    }
    b.dependent(sum);
    b.finish()
}

// ─── Neural network layer ──────────────────────────────────────────────────
// f(x) = Σ_j sigmoid(Σ_i w_ji·x_i + b_j), 4 hidden units
// w_ji = sin(j*N+i+1) / (N+1), b_j = 0.1*(j+1)

pub fn nn_layer(x: &[f64]) -> Tape<f64> {
    let n = x.len();
    let scale = 1.0 / (n as f64 + 1.0);
    let mut b = TapeBuilder::new();
    let v: Vec<Slot> = x.iter().map(|&xi| b.independent(xi)).collect();
    let total = b.constant(0.0);
    for j in 0..4_usize {
        let z = b.constant(0.1 * (j as f64 + 1.0));
        for (i, &xi) in v.iter().enumerate() {
            let w = ((j * n + i + 1) as f64).sin() * scale;
            let wx = b.mul_const(xi, w);
            b.add_assign(z, wx);
        }
        let nz = b.neg(z);
        let e = b.exp(nz);
        let d = b.add_const(e, 1.0);
        let s = b.const_div(1.0, d);
        b.add_assign(total, s);
    }
    b.dependent(total);
    b.finish()
}

// ─── Piecewise ─────────────────────────────────────────────────────────────
// f_i(x) = |x_i - x_{i+1}| + min(x_i, x_{i+1}), one output per pair.

pub fn piecewise(x: &[f64]) -> Tape<f64> {
    let mut b = TapeBuilder::new();
    let v: Vec<Slot> = x.iter().map(|&xi| b.independent(xi)).collect();
    for i in 0..v.len() - 1 {
        let d = b.sub(v[i], v[i + 1]);
        let a = b.abs(d);
        let m = b.min(v[i], v[i + 1]);
        let y = b.add(a, m);
        b.dependent(y);
    }
    b.finish()
}

// ─── Inputs ────────────────────────────────────────────────────────────────

pub fn make_input(n: usize) -> Vec<f64> {
    (0..n).map(|i| 0.5 + 0.01 * i as f64).collect()
}

pub fn make_direction(n: usize) -> Vec<f64> {
    (0..n).map(|i| 0.1 * (i + 1) as f64).collect()
}

/// Identity seed, `[var][dir]`.
pub fn identity(n: usize) -> Vec<f64> {
    let mut s = vec![0.0; n * n];
    for i in 0..n {
        s[i * n + i] = 1.0;
    }
    s
}
