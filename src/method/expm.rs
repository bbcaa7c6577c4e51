// Copyright 2026 QubitOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Exact-exponential stepping.
//!
//! Each step freezes the generator at the step midpoint and applies
//! `exp(h A)` to the state: `-iH` for kets, the Liouvillian on vec(ρ) for
//! density matrices. For constant generators this is exact for any `h`;
//! otherwise it is the exponential midpoint rule, second order.
//!
//! The exponential uses scaling-and-squaring with a Padé(13) approximant:
//!   Higham (2005), "The Scaling and Squaring Method for the Matrix
//!   Exponential Revisited", SIAM J. Matrix Anal. Appl. 26(4), 1179.

use ndarray::{Array2, Array3, ArrayView2};
use num_complex::Complex64;

use super::linalg::solve_linear;
use super::{interior, unvectorize, vectorize, Attempt, Propagator};
use crate::generator::Dynamics;
use crate::state::StateKind;

/// Padé(13,13) coefficients b_k / b_0 (Higham 2005, eq. 10.33).
const PADE_COEFFS: [f64; 14] = [
    1.0,
    0.5,
    0.12,
    1.833_333_333_333_333_4e-2,
    1.992_753_623_188_405_8e-3,
    1.630_434_782_608_696e-4,
    1.035_196_687_401_6e-5,
    5.175_983_437_008_01e-7,
    2.043_151_356_652_5e-8,
    6.306_022_705_717_593e-10,
    1.483_770_048_404_14e-11,
    2.529_153_491_597_966e-13,
    2.810_170_546_219_962_4e-15,
    1.544_049_750_670_309e-17,
];

/// ‖A‖₁ bound below which Padé(13) needs no scaling (Higham, Table 10.2).
const THETA_13: f64 = 5.37;

/// exp(A) for a square complex matrix.
///
/// A singular Padé denominator yields a NaN-filled matrix, which the
/// stepper reports as a non-finite state.
pub fn matrix_exp(a: &Array2<Complex64>) -> Array2<Complex64> {
    let n = a.nrows();
    debug_assert_eq!(n, a.ncols(), "matrix_exp requires a square matrix");

    match n {
        0 => return Array2::zeros((0, 0)),
        1 => return Array2::from_elem((1, 1), a[[0, 0]].exp()),
        _ => {}
    }

    let norm = one_norm(a);
    let squarings = if norm > THETA_13 {
        (norm / THETA_13).log2().ceil() as i32
    } else {
        0
    };
    let scaled = a * re(2f64.powi(-squarings));

    let Some(mut result) = pade13(&scaled) else {
        return Array2::from_elem((n, n), Complex64::new(f64::NAN, f64::NAN));
    };
    for _ in 0..squarings {
        result = result.dot(&result);
    }
    result
}

/// (V - U)⁻¹ (V + U) with U odd and V even in A.
fn pade13(a: &Array2<Complex64>) -> Option<Array2<Complex64>> {
    let b = PADE_COEFFS;
    let eye = Array2::<Complex64>::eye(a.nrows());
    let a2 = a.dot(a);
    let a4 = a2.dot(&a2);
    let a6 = a2.dot(&a4);

    let odd_high = &a6 * re(b[13]) + &a4 * re(b[11]) + &a2 * re(b[9]);
    let odd = odd_high.dot(&a6)
        + &a6 * re(b[7])
        + &a4 * re(b[5])
        + &a2 * re(b[3])
        + &eye * re(b[1]);
    let u = a.dot(&odd);

    let even_high = &a6 * re(b[12]) + &a4 * re(b[10]) + &a2 * re(b[8]);
    let v = even_high.dot(&a6)
        + &a6 * re(b[6])
        + &a4 * re(b[4])
        + &a2 * re(b[2])
        + &eye * re(b[0]);

    solve_linear(&(&v - &u), &(&v + &u))
}

#[inline]
fn re(x: f64) -> Complex64 {
    Complex64::new(x, 0.0)
}

/// Maximum absolute column sum.
fn one_norm(a: &Array2<Complex64>) -> f64 {
    a.columns()
        .into_iter()
        .map(|col| col.iter().map(|z| z.norm()).sum::<f64>())
        .fold(0.0, f64::max)
}

/// Apply a propagator on the state space to one batch item.
fn propagate_item(
    u: &Array2<Complex64>,
    kind: StateKind,
    yb: &ArrayView2<'_, Complex64>,
) -> Array2<Complex64> {
    match kind {
        StateKind::Ket => u.dot(yb),
        StateKind::Density => {
            let (rows, cols) = yb.dim();
            unvectorize(&u.dot(&vectorize(yb)), rows, cols)
        }
    }
}

/// Apply a propagator on the state space to every batch item.
pub(crate) fn apply_propagator(
    u: &Array2<Complex64>,
    kind: StateKind,
    y: &Array3<Complex64>,
) -> Array3<Complex64> {
    let mut out = Array3::zeros(y.raw_dim());
    for (mut o, yb) in out.outer_iter_mut().zip(y.outer_iter()) {
        o.assign(&propagate_item(u, kind, &yb));
    }
    out
}

/// Midpoint matrix-exponential propagator.
pub struct ExpmMethod<'d> {
    dynamics: &'d Dynamics<'d>,
    /// exp(hA) per parameter row for the last `h`, reused while the
    /// generator is constant
    cached: Option<(f64, Vec<Array2<Complex64>>)>,
    evaluations: usize,
}

impl<'d> ExpmMethod<'d> {
    pub fn new(dynamics: &'d Dynamics<'d>) -> Self {
        Self {
            dynamics,
            cached: None,
            evaluations: 0,
        }
    }

    /// exp(hA) for every parameter row.
    fn propagators(&mut self, t: f64, h: f64) -> Vec<Array2<Complex64>> {
        if self.dynamics.is_constant() {
            if let Some((h_cached, us)) = &self.cached {
                if *h_cached == h {
                    return us.clone();
                }
            }
        }
        let mid = interior(t + 0.5 * h, t, t + h);
        let us: Vec<_> = self
            .dynamics
            .snapshots(mid)
            .iter()
            .map(|snap| matrix_exp(&(snap.dense() * re(h))))
            .collect();
        self.evaluations += us.len();
        if self.dynamics.is_constant() {
            self.cached = Some((h, us.clone()));
        }
        us
    }
}

impl Propagator<Array3<Complex64>> for ExpmMethod<'_> {
    fn name(&self) -> &'static str {
        "expm"
    }

    fn order(&self) -> u32 {
        2
    }

    fn attempt(&mut self, t: f64, h: f64, y: &Array3<Complex64>) -> Attempt<Array3<Complex64>> {
        let us = self.propagators(t, h);
        let kind = self.dynamics.kind();
        let mut out = Array3::zeros(y.raw_dim());
        for (b, (mut o, yb)) in out.outer_iter_mut().zip(y.outer_iter()).enumerate() {
            if let Some(u) = us.get(self.dynamics.row_of(b)) {
                o.assign(&propagate_item(u, kind, &yb));
            }
        }
        Attempt { y: out, error: None }
    }

    fn evaluations(&self) -> usize {
        self.evaluations
    }
}
