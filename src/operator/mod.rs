// Copyright 2026 QubitOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Time-dependent operators.
//!
//! An [`Operator`] is a finite sum of terms. Most terms are `c_k(t, θ) M_k`,
//! a constant `d x d` matrix weighted by a scalar [`Coefficient`]; a term
//! may instead be a [`MatrixFunction`] that returns the whole matrix.
//! Hamiltonians, jump operators and observables all use this
//! representation, which makes the derivative with respect to θ available
//! term by term.

mod callable;
mod coefficient;
pub mod standard;

pub use callable::{MatrixFn, MatrixFunction, MatrixGradFn};
pub use coefficient::{Coefficient, CoefficientFn, CoefficientGradFn};

use ndarray::Array2;
use num_complex::Complex64;

use crate::error::{Error, Result};

const ONE: Complex64 = Complex64::new(1.0, 0.0);

/// One summand of an [`Operator`].
#[derive(Debug, Clone)]
pub enum Term {
    /// `c(t, θ) M` with a constant matrix
    Scaled {
        matrix: Array2<Complex64>,
        coefficient: Coefficient,
    },
    /// M(t, θ) from a user function
    Callable(MatrixFunction),
}

impl Term {
    pub fn is_time_independent(&self) -> bool {
        match self {
            Term::Scaled { coefficient, .. } => coefficient.is_time_independent(),
            Term::Callable(_) => false,
        }
    }

    pub fn depends_on_params(&self) -> bool {
        match self {
            Term::Scaled { coefficient, .. } => coefficient.depends_on_params(),
            Term::Callable(func) => func.depends_on_params(),
        }
    }

    pub fn max_param_index(&self) -> Option<usize> {
        match self {
            Term::Scaled { coefficient, .. } => coefficient.max_param_index(),
            Term::Callable(func) => func.max_param_index(),
        }
    }

    pub fn discontinuities(&self) -> &[f64] {
        match self {
            Term::Scaled { coefficient, .. } => coefficient.discontinuities(),
            Term::Callable(func) => func.discontinuities(),
        }
    }

    /// `out += term(t, θ)`. A callable returning the wrong shape poisons
    /// `out` with NaN so the stepper reports a non-finite state.
    fn add_to(&self, out: &mut Array2<Complex64>, t: f64, params: &[f64]) {
        match self {
            Term::Scaled {
                matrix,
                coefficient,
            } => {
                let c = coefficient.value(t, params);
                if c != Complex64::new(0.0, 0.0) {
                    out.scaled_add(c, matrix);
                }
            }
            Term::Callable(func) => {
                let m = func.value(t, params);
                if m.dim() == out.dim() {
                    *out += &m;
                } else {
                    out.fill(Complex64::new(f64::NAN, f64::NAN));
                }
            }
        }
    }

    /// Visit every parameter the term depends on.
    ///
    /// Writing `∂term/∂θ_p = dc · M`, this calls `visit(p, dc, w)` with
    /// `w = weight(M)`. `weight` runs once per distinct `M`: once for a
    /// scaled term, once per parameter for a matrix function (with `dc = 1`).
    pub fn for_each_weighted_derivative<W>(
        &self,
        t: f64,
        params: &[f64],
        mut weight: impl FnMut(&Array2<Complex64>) -> W,
        mut visit: impl FnMut(usize, Complex64, &W),
    ) {
        match self {
            Term::Scaled {
                matrix,
                coefficient,
            } => {
                if !coefficient.depends_on_params() {
                    return;
                }
                let w = weight(matrix);
                coefficient.for_each_derivative(t, params, |p, dc| visit(p, dc, &w));
            }
            Term::Callable(func) => func.for_each_derivative(t, params, |p, dm| {
                let w = weight(&dm);
                visit(p, ONE, &w);
            }),
        }
    }

    fn scaled(&self, factor: Complex64) -> Self {
        match self {
            Term::Scaled {
                matrix,
                coefficient,
            } => Term::Scaled {
                matrix: matrix.clone(),
                coefficient: coefficient.scaled(factor),
            },
            Term::Callable(func) => Term::Callable(func.scaled(factor)),
        }
    }
}

/// A time-dependent `d x d` operator.
#[derive(Debug, Clone)]
pub struct Operator {
    dim: usize,
    terms: Vec<Term>,
}

impl Operator {
    /// Constant operator.
    pub fn constant(matrix: Array2<Complex64>) -> Result<Self> {
        Self::new(vec![(matrix, Coefficient::constant(1.0))])
    }

    /// The zero operator on a `dim`-dimensional space.
    pub fn zeros(dim: usize) -> Self {
        Self {
            dim,
            terms: Vec::new(),
        }
    }

    /// Operator given entirely by a matrix function on a `dim`-dimensional
    /// space.
    pub fn from_fn(dim: usize, func: MatrixFunction) -> Result<Self> {
        Self::zeros(dim).with_callable(func)
    }

    /// Sum of `coefficient * matrix` terms. At least one term is required to
    /// fix the dimension; use [`Operator::zeros`] for an empty sum.
    pub fn new(terms: Vec<(Array2<Complex64>, Coefficient)>) -> Result<Self> {
        let dim = match terms.first() {
            Some((m, _)) => m.nrows(),
            None => {
                return Err(Error::Shape(
                    "operator needs at least one term; use Operator::zeros".into(),
                ))
            }
        };
        let mut op = Self::zeros(dim);
        for (matrix, coefficient) in terms {
            op = op.with_term(matrix, coefficient)?;
        }
        Ok(op)
    }

    /// Append a term.
    pub fn with_term(
        mut self,
        matrix: Array2<Complex64>,
        coefficient: Coefficient,
    ) -> Result<Self> {
        if matrix.nrows() != matrix.ncols() {
            return Err(Error::Shape(format!(
                "operator term must be square, got {} x {}",
                matrix.nrows(),
                matrix.ncols()
            )));
        }
        if matrix.nrows() != self.dim {
            return Err(Error::Shape(format!(
                "operator term has dimension {}, expected {}",
                matrix.nrows(),
                self.dim
            )));
        }
        coefficient.validate()?;
        self.terms.push(Term::Scaled {
            matrix,
            coefficient,
        });
        Ok(self)
    }

    /// Append a matrix-valued term. Its shape can only be checked once θ is
    /// known; see [`Operator::check_shape`].
    pub fn with_callable(mut self, func: MatrixFunction) -> Result<Self> {
        func.validate()?;
        self.terms.push(Term::Callable(func));
        Ok(self)
    }

    /// Concatenate the terms of several operators of equal dimension.
    pub fn sum(ops: &[Operator]) -> Result<Self> {
        let first = ops
            .first()
            .ok_or_else(|| Error::Shape("cannot sum an empty list of operators".into()))?;
        let mut total = Self::zeros(first.dim);
        for op in ops {
            if op.dim != total.dim {
                return Err(Error::Shape(format!(
                    "cannot add operators of dimension {} and {}",
                    total.dim, op.dim
                )));
            }
            total.terms.extend(op.terms.iter().cloned());
        }
        Ok(total)
    }

    /// Multiply every term by a constant.
    pub fn scaled(&self, factor: impl Into<Complex64>) -> Self {
        let factor = factor.into();
        Self {
            dim: self.dim,
            terms: self.terms.iter().map(|t| t.scaled(factor)).collect(),
        }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn terms(&self) -> &[Term] {
        &self.terms
    }

    /// Whether the operator is independent of time.
    pub fn is_constant(&self) -> bool {
        self.terms.iter().all(Term::is_time_independent)
    }

    /// Whether any term depends on θ.
    pub fn depends_on_params(&self) -> bool {
        self.terms.iter().any(Term::depends_on_params)
    }

    /// Largest parameter index referenced by any term.
    pub fn max_param_index(&self) -> Option<usize> {
        self.terms.iter().filter_map(Term::max_param_index).max()
    }

    /// Sorted, de-duplicated times at which a term may jump.
    pub fn discontinuities(&self) -> Vec<f64> {
        let mut times: Vec<f64> = self
            .terms
            .iter()
            .flat_map(|t| t.discontinuities().iter().copied())
            .collect();
        times.sort_by(|a, b| a.total_cmp(b));
        times.dedup();
        times
    }

    /// Evaluate every matrix-valued term at (t, θ) and check it is `d x d`.
    pub fn check_shape(&self, t: f64, params: &[f64]) -> Result<()> {
        for term in &self.terms {
            if let Term::Callable(func) = term {
                let m = func.value(t, params);
                if m.dim() != (self.dim, self.dim) {
                    return Err(Error::Shape(format!(
                        "matrix function returned {} x {}, expected {} x {}",
                        m.nrows(),
                        m.ncols(),
                        self.dim,
                        self.dim
                    )));
                }
            }
        }
        Ok(())
    }

    /// Dense matrix at (t, θ).
    pub fn evaluate(&self, t: f64, params: &[f64]) -> Array2<Complex64> {
        let mut out = Array2::zeros((self.dim, self.dim));
        for term in &self.terms {
            term.add_to(&mut out, t, params);
        }
        out
    }

    /// Call `visit(p, dc, M)` for every θ-dependent piece, so that
    /// `∂O/∂θ_p = Σ dc M` over the visits for `p`.
    pub fn for_each_param_derivative(
        &self,
        t: f64,
        params: &[f64],
        mut visit: impl FnMut(usize, Complex64, &Array2<Complex64>),
    ) {
        for term in &self.terms {
            term.for_each_weighted_derivative(
                t,
                params,
                |m: &Array2<Complex64>| m.clone(),
                |p, dc, m| visit(p, dc, m),
            );
        }
    }
}

impl TryFrom<Array2<Complex64>> for Operator {
    type Error = Error;

    fn try_from(matrix: Array2<Complex64>) -> Result<Self> {
        Operator::constant(matrix)
    }
}
