// Copyright 2026 QubitOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Matrix-valued operator terms.
//!
//! A [`MatrixFunction`] supplies a whole matrix M(t, θ) rather than a scalar
//! times a fixed matrix. It covers terms whose operator structure itself
//! moves, such as a rotating-frame coupling written out directly.

use std::fmt;
use std::sync::Arc;

use ndarray::Array2;
use num_complex::Complex64;

use super::coefficient::FD_STEP;
use crate::error::{Error, Result};

/// M(t, θ) for a matrix-valued term.
pub type MatrixFn = Arc<dyn Fn(f64, &[f64]) -> Array2<Complex64> + Send + Sync>;

/// ∂M/∂θ_p at (t, θ); the last argument is p.
pub type MatrixGradFn = Arc<dyn Fn(f64, &[f64], usize) -> Array2<Complex64> + Send + Sync>;

/// A user function returning the full matrix of one operator term.
///
/// The function must be pure: the same `(t, θ)` always gives the same
/// matrix. Jumps in time must be declared with
/// [`with_discontinuities`](MatrixFunction::with_discontinuities) so the
/// stepper can stop on them.
#[derive(Clone)]
pub struct MatrixFunction {
    f: MatrixFn,
    deps: Vec<usize>,
    grad: Option<MatrixGradFn>,
    discontinuities: Vec<f64>,
}

impl fmt::Debug for MatrixFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MatrixFunction")
            .field("deps", &self.deps)
            .field("analytic_grad", &self.grad.is_some())
            .field("discontinuities", &self.discontinuities)
            .finish_non_exhaustive()
    }
}

impl MatrixFunction {
    /// Time-only matrix function.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(f64) -> Array2<Complex64> + Send + Sync + 'static,
    {
        Self::parametric(move |t, _| f(t), Vec::new())
    }

    /// Matrix function reading the parameters listed in `deps`.
    pub fn parametric<F>(f: F, deps: Vec<usize>) -> Self
    where
        F: Fn(f64, &[f64]) -> Array2<Complex64> + Send + Sync + 'static,
    {
        Self {
            f: Arc::new(f),
            deps,
            grad: None,
            discontinuities: Vec::new(),
        }
    }

    /// Analytic ∂M/∂θ_p; central differences are used otherwise.
    pub fn with_gradient<G>(mut self, g: G) -> Self
    where
        G: Fn(f64, &[f64], usize) -> Array2<Complex64> + Send + Sync + 'static,
    {
        self.grad = Some(Arc::new(g));
        self
    }

    /// Times at which M may jump.
    pub fn with_discontinuities(mut self, mut times: Vec<f64>) -> Self {
        times.sort_by(|a, b| a.total_cmp(b));
        times.dedup();
        self.discontinuities = times;
        self
    }

    pub fn value(&self, t: f64, params: &[f64]) -> Array2<Complex64> {
        (self.f)(t, params)
    }

    pub fn deps(&self) -> &[usize] {
        &self.deps
    }

    pub fn discontinuities(&self) -> &[f64] {
        &self.discontinuities
    }

    pub fn depends_on_params(&self) -> bool {
        !self.deps.is_empty()
    }

    pub fn max_param_index(&self) -> Option<usize> {
        self.deps.iter().copied().max()
    }

    pub fn validate(&self) -> Result<()> {
        let mut sorted = self.deps.clone();
        sorted.sort_unstable();
        if sorted.windows(2).any(|w| w[0] == w[1]) {
            return Err(Error::Shape(
                "matrix function lists a parameter dependency twice".into(),
            ));
        }
        if self.discontinuities.iter().any(|t| !t.is_finite()) {
            return Err(Error::Shape(
                "matrix function discontinuities must be finite".into(),
            ));
        }
        Ok(())
    }

    /// Call `visit(p, ∂M/∂θ_p)` for every declared dependency.
    pub fn for_each_derivative(
        &self,
        t: f64,
        params: &[f64],
        mut visit: impl FnMut(usize, Array2<Complex64>),
    ) {
        if let Some(g) = &self.grad {
            for &p in &self.deps {
                visit(p, g(t, params, p));
            }
            return;
        }
        let mut shifted = params.to_vec();
        for &p in &self.deps {
            let eps = FD_STEP * params[p].abs().max(1.0);
            shifted[p] = params[p] + eps;
            let up = (self.f)(t, &shifted);
            shifted[p] = params[p] - eps;
            let down = (self.f)(t, &shifted);
            shifted[p] = params[p];
            visit(p, (up - down) / Complex64::new(2.0 * eps, 0.0));
        }
    }

    /// `factor * M`.
    pub fn scaled(&self, factor: Complex64) -> Self {
        let f = Arc::clone(&self.f);
        Self {
            f: Arc::new(move |t: f64, p: &[f64]| f(t, p) * factor),
            deps: self.deps.clone(),
            grad: self.grad.as_ref().map(|g| {
                let g = Arc::clone(g);
                Arc::new(move |t: f64, p: &[f64], i: usize| g(t, p, i) * factor) as MatrixGradFn
            }),
            discontinuities: self.discontinuities.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operator::standard::{sigma_x, sigma_y};
    use approx::assert_relative_eq;

    fn rotating(t: f64, p: &[f64]) -> Array2<Complex64> {
        // p₀ (cos(p₁ t) σx + sin(p₁ t) σy)
        let (c, s) = ((p[1] * t).cos(), (p[1] * t).sin());
        (sigma_x() * Complex64::new(c, 0.0) + sigma_y() * Complex64::new(s, 0.0))
            * Complex64::new(p[0], 0.0)
    }

    #[test]
    fn test_finite_difference_derivative() {
        let m = MatrixFunction::parametric(rotating, vec![0, 1]);
        let params = [0.7, 2.0];
        let t = 0.4;
        let mut seen = Vec::new();
        m.for_each_derivative(t, &params, |p, dm| seen.push((p, dm)));
        assert_eq!(seen.len(), 2);

        // ∂/∂p₀ at [0, 1] is e^{-i p₁ t}
        let d0 = seen[0].1[[0, 1]];
        assert_relative_eq!(d0.re, (2.0f64 * t).cos(), epsilon = 1e-8);
        assert_relative_eq!(d0.im, -(2.0f64 * t).sin(), epsilon = 1e-8);
        // ∂/∂p₁ at [0, 1] is -i p₀ t e^{-i p₁ t}
        let d1 = seen[1].1[[0, 1]];
        let expected = Complex64::new(0.0, -0.7 * t) * Complex64::new(0.0, -2.0 * t).exp();
        assert_relative_eq!((d1 - expected).norm(), 0.0, epsilon = 1e-8);
    }

    #[test]
    fn test_analytic_gradient_is_preferred() {
        let m = MatrixFunction::parametric(|_, p| sigma_x() * Complex64::new(p[0], 0.0), vec![0])
            .with_gradient(|_, _, _| sigma_y());
        let mut seen = Vec::new();
        m.for_each_derivative(0.0, &[1.0], |_, dm| seen.push(dm));
        assert_eq!(seen, vec![sigma_y()]);
    }

    #[test]
    fn test_scaled_and_discontinuities() {
        let m = MatrixFunction::new(|_| sigma_x()).with_discontinuities(vec![1.0, 0.5, 1.0]);
        assert_eq!(m.discontinuities(), &[0.5, 1.0]);
        assert!(!m.depends_on_params());
        let doubled = m.scaled(Complex64::new(2.0, 0.0));
        assert_relative_eq!(doubled.value(0.0, &[])[[0, 1]].re, 2.0);
        assert_eq!(doubled.discontinuities(), &[0.5, 1.0]);
    }

    #[test]
    fn test_validate() {
        assert!(MatrixFunction::parametric(rotating, vec![1, 0, 1]).validate().is_err());
        let bad = MatrixFunction::new(|_| sigma_x()).with_discontinuities(vec![f64::NAN]);
        assert!(bad.validate().is_err());
        assert!(MatrixFunction::parametric(rotating, vec![0, 1]).validate().is_ok());
    }
}
