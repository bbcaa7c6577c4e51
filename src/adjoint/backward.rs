// Copyright 2026 QubitOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! The augmented system integrated backward in time.
//!
//! ```text
//! dy/dt = A(t) y
//! dλ/dt = -A(t)† λ
//! dμ/dt = -Σ_b Re⟨λ_b, ∂A/∂θ (y_b)⟩
//! ```
//!
//! Starting from `μ(T) = 0`, integrating down to `t₀` leaves
//! `μ(t₀) = ∫ Re⟨λ, ∂A/∂θ y⟩ dt`, the parameter gradient, and `λ(t₀)`, the
//! gradient with respect to the initial state. The forward state `y` is
//! recomputed alongside instead of being stored. With a parameter batch, `μ`
//! has one row per parameter row and each row only sees its own items.

use ndarray::{s, Array2, Array3, Axis};
use num_complex::Complex64;

use crate::generator::Dynamics;
use crate::method::{Attempt, OdeVector, Propagator, RungeKutta, Tableau};

type Tensor = Array3<Complex64>;

/// Forward state, adjoint state and parameter accumulator.
#[derive(Debug, Clone, PartialEq)]
pub struct AugmentedState {
    pub y: Array3<Complex64>,
    pub lambda: Array3<Complex64>,
    /// `(parameter row, parameter)`
    pub mu: Array2<f64>,
}

impl AugmentedState {
    pub fn new(
        y: Array3<Complex64>,
        lambda: Array3<Complex64>,
        num_rows: usize,
        num_params: usize,
    ) -> Self {
        Self {
            y,
            lambda,
            mu: Array2::zeros((num_rows, num_params)),
        }
    }
}

fn vector_norm(v: &Array2<f64>) -> f64 {
    v.iter().map(|x| x * x).sum::<f64>().sqrt()
}

impl OdeVector for AugmentedState {
    fn zeros_like(&self) -> Self {
        Self {
            y: self.y.zeros_like(),
            lambda: self.lambda.zeros_like(),
            mu: Array2::zeros(self.mu.raw_dim()),
        }
    }

    fn add_scaled(&mut self, a: f64, x: &Self) {
        self.y.add_scaled(a, &x.y);
        self.lambda.add_scaled(a, &x.lambda);
        self.mu.scaled_add(a, &x.mu);
    }

    fn error_ratio(err: &Self, y0: &Self, y1: &Self, rtol: f64, atol: f64) -> f64 {
        let ry = Tensor::error_ratio(&err.y, &y0.y, &y1.y, rtol, atol);
        let rl = Tensor::error_ratio(&err.lambda, &y0.lambda, &y1.lambda, rtol, atol);
        let scale = atol + rtol * vector_norm(&y0.mu).max(vector_norm(&y1.mu));
        let rm = vector_norm(&err.mu) / scale;
        ry.max(rl).max(rm)
    }

    fn max_norm(&self) -> f64 {
        self.y
            .max_norm()
            .max(self.lambda.max_norm())
            .max(vector_norm(&self.mu))
    }

    fn is_finite(&self) -> bool {
        self.y.is_finite() && self.lambda.is_finite() && self.mu.iter().all(|x| x.is_finite())
    }
}

/// Time derivative of the augmented state.
pub fn augmented_rhs(dynamics: &Dynamics<'_>, t: f64, z: &AugmentedState) -> AugmentedState {
    let generator = dynamics.generator();
    let with_params = generator.depends_on_params();
    let batch = z.y.len_of(Axis(0));
    let mut y = Array3::zeros(z.y.raw_dim());
    let mut lambda = Array3::zeros(z.lambda.raw_dim());
    let mut mu = Array2::zeros(z.mu.raw_dim());

    for (r, mut mu_row) in mu.outer_iter_mut().enumerate() {
        let snapshot = dynamics.snapshot_row(t, r);
        let items = dynamics.items_of(r, batch);
        for b in items.clone() {
            y.index_axis_mut(Axis(0), b)
                .assign(&snapshot.apply_item(&z.y.index_axis(Axis(0), b)));
            let adj = snapshot.apply_adjoint_item(&z.lambda.index_axis(Axis(0), b));
            lambda.index_axis_mut(Axis(0), b).assign(&(adj * Complex64::new(-1.0, 0.0)));
        }
        if with_params {
            let mut grad = vec![0.0; mu_row.len()];
            generator.accumulate_param_gradient(
                &snapshot,
                t,
                dynamics.row_params(r),
                z.y.slice(s![items.clone(), .., ..]),
                z.lambda.slice(s![items, .., ..]),
                &mut grad,
            );
            for (m, g) in mu_row.iter_mut().zip(grad) {
                *m = -g;
            }
        }
    }
    AugmentedState { y, lambda, mu }
}

/// Runge–Kutta propagator for the augmented system.
pub struct AdjointPropagator<'d> {
    rk: RungeKutta<AugmentedState>,
    dynamics: &'d Dynamics<'d>,
}

impl<'d> AdjointPropagator<'d> {
    pub fn new(tableau: &'static Tableau, dynamics: &'d Dynamics<'d>) -> Self {
        Self {
            rk: RungeKutta::new(tableau),
            dynamics,
        }
    }
}

impl Propagator<AugmentedState> for AdjointPropagator<'_> {
    fn name(&self) -> &'static str {
        self.rk.tableau().name
    }

    fn order(&self) -> u32 {
        self.rk.tableau().order
    }

    fn attempt(&mut self, t: f64, h: f64, z: &AugmentedState) -> Attempt<AugmentedState> {
        let dynamics = self.dynamics;
        self.rk
            .attempt(&mut |s, v| augmented_rhs(dynamics, s, v), t, h, z)
    }

    fn accept(&mut self, t_new: f64) {
        self.rk.accept(t_new);
    }

    fn reset(&mut self) {
        self.rk.reset();
    }

    fn evaluations(&self) -> usize {
        self.rk.evaluations()
    }
}
