// Copyright 2026 QubitOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! The linear generator of the dynamics.
//!
//! For kets the generator is the Schrödinger action `A(ψ) = -iHψ`. For
//! density matrices it is the Lindblad action
//! `A(ρ) = -i[H, ρ] + Σ_k D[L_k](ρ)`, which reduces to the von Neumann
//! equation when there are no jump operators.
//!
//! A [`Generator`] borrows the operators of a problem. Evaluating it at one
//! instant yields a [`GeneratorSnapshot`] of dense matrices that the step
//! methods apply to whole batches.

pub mod dissipator;

use std::borrow::Cow;
use std::ops::Range;

use ndarray::{Array2, Array3, ArrayView2, ArrayView3};
use num_complex::Complex64;

use crate::error::{Error, Result};
use crate::operator::standard::dag;
use crate::operator::Operator;
use crate::state::StateKind;

use dissipator::{liouvillian, lindblad_adjoint_rhs, lindblad_rhs, JumpTerms};

const I: Complex64 = Complex64::new(0.0, 1.0);
const HALF: Complex64 = Complex64::new(0.5, 0.0);

/// Frobenius inner product ⟨A, B⟩ = Σ conj(A_ij) B_ij.
pub(crate) fn inner<'a, 'b>(
    a: impl IntoIterator<Item = &'a Complex64>,
    b: impl IntoIterator<Item = &'b Complex64>,
) -> Complex64 {
    a.into_iter().zip(b).map(|(x, y)| x.conj() * y).sum()
}

/// Time-dependent generator built from a Hamiltonian and jump operators.
#[derive(Debug, Clone, Copy)]
pub struct Generator<'a> {
    hamiltonian: &'a Operator,
    jump_ops: &'a [Operator],
    kind: StateKind,
}

impl<'a> Generator<'a> {
    /// Generator for states of the given kind. Kets cannot carry jump
    /// operators; promote them to density matrices first.
    pub fn new(
        hamiltonian: &'a Operator,
        jump_ops: &'a [Operator],
        kind: StateKind,
    ) -> Result<Self> {
        if kind == StateKind::Ket && !jump_ops.is_empty() {
            return Err(Error::Shape(
                "jump operators require density-matrix states".into(),
            ));
        }
        for (k, op) in jump_ops.iter().enumerate() {
            if op.dim() != hamiltonian.dim() {
                return Err(Error::Shape(format!(
                    "jump operator {} has dimension {}, Hamiltonian has {}",
                    k,
                    op.dim(),
                    hamiltonian.dim()
                )));
            }
        }
        Ok(Self {
            hamiltonian,
            jump_ops,
            kind,
        })
    }

    pub fn kind(&self) -> StateKind {
        self.kind
    }

    pub fn dim(&self) -> usize {
        self.hamiltonian.dim()
    }

    /// Whether the generator is the same at every instant.
    pub fn is_constant(&self) -> bool {
        self.hamiltonian.is_constant() && self.jump_ops.iter().all(Operator::is_constant)
    }

    pub fn depends_on_params(&self) -> bool {
        self.hamiltonian.depends_on_params()
            || self.jump_ops.iter().any(Operator::depends_on_params)
    }

    /// Sorted jump times of all coefficients.
    pub fn discontinuities(&self) -> Vec<f64> {
        let mut times = self.hamiltonian.discontinuities();
        for op in self.jump_ops {
            times.extend(op.discontinuities());
        }
        times.sort_by(|a, b| a.total_cmp(b));
        times.dedup();
        times
    }

    /// Dense snapshot at (t, θ).
    pub fn at(&self, t: f64, params: &[f64]) -> GeneratorSnapshot {
        let hamiltonian = self.hamiltonian.evaluate(t, params);
        let hamiltonian_dag = dag(&hamiltonian);
        let jumps = self
            .jump_ops
            .iter()
            .map(|op| JumpTerms::new(op.evaluate(t, params)))
            .collect();
        GeneratorSnapshot {
            kind: self.kind,
            hamiltonian,
            hamiltonian_dag,
            jumps,
        }
    }

    /// Add `Σ_b Re⟨λ_b, ∂A/∂θ_p (y_b)⟩` to `grad[p]` for every parameter.
    ///
    /// `y` and `lambda` hold the batch items that share `params`, and
    /// `snapshot` must be this generator evaluated at (t, θ); the jump
    /// operators it holds enter the derivative of each dissipator.
    pub fn accumulate_param_gradient(
        &self,
        snapshot: &GeneratorSnapshot,
        t: f64,
        params: &[f64],
        y: ArrayView3<'_, Complex64>,
        lambda: ArrayView3<'_, Complex64>,
        grad: &mut [f64],
    ) {
        let kind = self.kind;
        for term in self.hamiltonian.terms() {
            term.for_each_weighted_derivative(
                t,
                params,
                |m| {
                    let mut w = Complex64::new(0.0, 0.0);
                    for (yb, lb) in y.outer_iter().zip(lambda.outer_iter()) {
                        let action = match kind {
                            StateKind::Ket => m.dot(&yb) * (-I),
                            StateKind::Density => (m.dot(&yb) - yb.dot(m)) * (-I),
                        };
                        w += inner(lb.iter(), action.iter());
                    }
                    w
                },
                |p, dc, w| grad[p] += (dc * w).re,
            );
        }

        for (op, jump) in self.jump_ops.iter().zip(&snapshot.jumps) {
            for term in op.terms() {
                term.for_each_weighted_derivative(
                    t,
                    params,
                    |m| {
                        let m_dag = dag(m);
                        let ldag_m = jump.l_dag.dot(m);
                        let mdag_l = m_dag.dot(&jump.l);
                        let mut w1 = Complex64::new(0.0, 0.0);
                        let mut w2 = Complex64::new(0.0, 0.0);
                        for (rho, lb) in y.outer_iter().zip(lambda.outer_iter()) {
                            let d1 = m.dot(&rho).dot(&jump.l_dag)
                                - (ldag_m.dot(&rho) + rho.dot(&ldag_m)) * HALF;
                            let d2 = jump.l.dot(&rho).dot(&m_dag)
                                - (mdag_l.dot(&rho) + rho.dot(&mdag_l)) * HALF;
                            w1 += inner(lb.iter(), d1.iter());
                            w2 += inner(lb.iter(), d2.iter());
                        }
                        (w1, w2)
                    },
                    |p, dc, w: &(Complex64, Complex64)| grad[p] += (dc * w.0 + dc.conj() * w.1).re,
                );
            }
        }
    }
}

/// The generator frozen at one instant.
#[derive(Debug, Clone)]
pub struct GeneratorSnapshot {
    kind: StateKind,
    hamiltonian: Array2<Complex64>,
    hamiltonian_dag: Array2<Complex64>,
    jumps: Vec<JumpTerms>,
}

impl GeneratorSnapshot {
    pub fn kind(&self) -> StateKind {
        self.kind
    }

    pub fn hamiltonian(&self) -> &Array2<Complex64> {
        &self.hamiltonian
    }

    pub fn jumps(&self) -> &[JumpTerms] {
        &self.jumps
    }

    /// A(y) for one batch item.
    pub fn apply_item(&self, y: &ArrayView2<'_, Complex64>) -> Array2<Complex64> {
        match self.kind {
            StateKind::Ket => self.hamiltonian.dot(y) * (-I),
            StateKind::Density => lindblad_rhs(&self.hamiltonian, &self.jumps, y),
        }
    }

    /// A†(x) for one batch item.
    pub fn apply_adjoint_item(&self, x: &ArrayView2<'_, Complex64>) -> Array2<Complex64> {
        match self.kind {
            StateKind::Ket => self.hamiltonian_dag.dot(x) * I,
            StateKind::Density => lindblad_adjoint_rhs(&self.hamiltonian_dag, &self.jumps, x),
        }
    }

    /// A(y) over a `(batch, d, k)` tensor.
    pub fn apply(&self, y: &Array3<Complex64>) -> Array3<Complex64> {
        let mut out = Array3::zeros(y.raw_dim());
        for (mut o, yb) in out.outer_iter_mut().zip(y.outer_iter()) {
            o.assign(&self.apply_item(&yb));
        }
        out
    }

    /// A†(x) over a `(batch, d, k)` tensor.
    pub fn apply_adjoint(&self, x: &Array3<Complex64>) -> Array3<Complex64> {
        let mut out = Array3::zeros(x.raw_dim());
        for (mut o, xb) in out.outer_iter_mut().zip(x.outer_iter()) {
            o.assign(&self.apply_adjoint_item(&xb));
        }
        out
    }

    /// Dense matrix of the generator: `-iH` for kets, the `d² x d²`
    /// Liouvillian on row-major vec(ρ) for density matrices.
    pub fn dense(&self) -> Array2<Complex64> {
        match self.kind {
            StateKind::Ket => self.hamiltonian.mapv(|z| -I * z),
            StateKind::Density => liouvillian(&self.hamiltonian, &self.jumps),
        }
    }
}

/// Row of the parameter batch used by batch item `item`.
pub(crate) fn row_of(num_rows: usize, item: usize) -> usize {
    if num_rows <= 1 {
        0
    } else {
        item.min(num_rows - 1)
    }
}

/// A generator bound to its parameters, with snapshots cached when the
/// generator does not depend on time.
///
/// There is either one parameter row shared by the whole state batch, or
/// one row per batch item.
#[derive(Debug)]
pub struct Dynamics<'a> {
    generator: Generator<'a>,
    rows: Vec<&'a [f64]>,
    /// One snapshot per row, for constant generators
    frozen: Vec<GeneratorSnapshot>,
}

impl<'a> Dynamics<'a> {
    pub fn new(generator: Generator<'a>, params: &'a [f64]) -> Self {
        Self::with_rows(generator, vec![params])
    }

    /// One parameter row per batch item.
    pub fn batched(generator: Generator<'a>, rows: &'a [Vec<f64>]) -> Self {
        let rows: Vec<&[f64]> = rows.iter().map(Vec::as_slice).collect();
        if rows.is_empty() {
            return Self::new(generator, &[]);
        }
        Self::with_rows(generator, rows)
    }

    fn with_rows(generator: Generator<'a>, rows: Vec<&'a [f64]>) -> Self {
        let frozen = if generator.is_constant() {
            rows.iter().map(|p| generator.at(0.0, p)).collect()
        } else {
            Vec::new()
        };
        Self {
            generator,
            rows,
            frozen,
        }
    }

    pub fn generator(&self) -> &Generator<'a> {
        &self.generator
    }

    /// Parameters of the first row.
    pub fn params(&self) -> &'a [f64] {
        self.row_params(0)
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn row_params(&self, row: usize) -> &'a [f64] {
        self.rows.get(row).copied().unwrap_or(&[])
    }

    /// Row used by batch item `item`.
    pub fn row_of(&self, item: usize) -> usize {
        row_of(self.rows.len(), item)
    }

    /// Batch items driven by `row` in a batch of `batch` items.
    pub fn items_of(&self, row: usize, batch: usize) -> Range<usize> {
        if self.rows.len() <= 1 {
            0..batch
        } else {
            row.min(batch)..(row + 1).min(batch)
        }
    }

    pub fn kind(&self) -> StateKind {
        self.generator.kind()
    }

    pub fn is_constant(&self) -> bool {
        !self.frozen.is_empty()
    }

    /// Snapshot of the first row.
    pub fn snapshot(&self, t: f64) -> Cow<'_, GeneratorSnapshot> {
        self.snapshot_row(t, 0)
    }

    pub fn snapshot_row(&self, t: f64, row: usize) -> Cow<'_, GeneratorSnapshot> {
        match self.frozen.get(row) {
            Some(snap) => Cow::Borrowed(snap),
            None => Cow::Owned(self.generator.at(t, self.row_params(row))),
        }
    }

    /// One snapshot per row at time `t`.
    pub fn snapshots(&self, t: f64) -> Vec<Cow<'_, GeneratorSnapshot>> {
        (0..self.rows.len()).map(|r| self.snapshot_row(t, r)).collect()
    }

    /// dy/dt at time t.
    pub fn rhs(&self, t: f64, y: &Array3<Complex64>) -> Array3<Complex64> {
        if self.rows.len() <= 1 {
            return self.snapshot(t).apply(y);
        }
        let mut out = Array3::zeros(y.raw_dim());
        for (b, (mut o, yb)) in out.outer_iter_mut().zip(y.outer_iter()).enumerate() {
            o.assign(&self.snapshot_row(t, self.row_of(b)).apply_item(&yb));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operator::standard::{basis, projector, sigma_minus, sigma_x, sigma_z};
    use crate::operator::Coefficient;
    use approx::assert_relative_eq;
    use ndarray::Array1;

    fn ket_batch(psi: Array1<Complex64>) -> Array3<Complex64> {
        let d = psi.len();
        Array3::from_shape_fn((1, d, 1), |(_, i, _)| psi[i])
    }

    fn density_batch(rho: &Array2<Complex64>) -> Array3<Complex64> {
        let d = rho.nrows();
        Array3::from_shape_fn((1, d, d), |(_, i, j)| rho[[i, j]])
    }

    #[test]
    fn test_ket_with_jumps_rejected() {
        let h = Operator::constant(sigma_z()).unwrap();
        let jumps = vec![Operator::constant(sigma_minus()).unwrap()];
        assert!(Generator::new(&h, &jumps, StateKind::Ket).is_err());
    }

    #[test]
    fn test_schrodinger_action() {
        let h = Operator::constant(sigma_x()).unwrap();
        let gen = Generator::new(&h, &[], StateKind::Ket).unwrap();
        let out = gen.at(0.0, &[]).apply(&ket_batch(basis(2, 0)));
        // -iσx|0⟩ = -i|1⟩
        assert_relative_eq!(out[[0, 1, 0]].im, -1.0);
        assert_relative_eq!(out[[0, 0, 0]].norm(), 0.0);
    }

    #[test]
    fn test_dense_matches_apply_for_density() {
        let h = Operator::constant(sigma_x()).unwrap();
        let jumps =
            vec![Operator::constant(sigma_minus() * Complex64::new(0.5, 0.0)).unwrap()];
        let gen = Generator::new(&h, &jumps, StateKind::Density).unwrap();
        let snap = gen.at(0.0, &[]);
        let rho = projector(&basis(2, 1));
        let direct = snap.apply(&density_batch(&rho));
        let vec_rho = Array1::from_iter(rho.iter().copied());
        let via_dense = snap.dense().dot(&vec_rho);
        for (k, z) in via_dense.iter().enumerate() {
            assert_relative_eq!((z - direct[[0, k / 2, k % 2]]).norm(), 0.0, epsilon = 1e-14);
        }
    }

    fn fd_param_gradient(
        h: &Operator,
        jumps: &[Operator],
        kind: StateKind,
        params: &[f64],
        y: &Array3<Complex64>,
        lambda: &Array3<Complex64>,
        p: usize,
    ) -> f64 {
        let eps = 1e-6;
        let gen = Generator::new(h, jumps, kind).unwrap();
        let mut up = params.to_vec();
        up[p] += eps;
        let mut down = params.to_vec();
        down[p] -= eps;
        let a_up = gen.at(0.3, &up).apply(y);
        let a_down = gen.at(0.3, &down).apply(y);
        let diff = (a_up - a_down) / Complex64::new(2.0 * eps, 0.0);
        inner(lambda.iter(), diff.iter()).re
    }

    #[test]
    fn test_param_gradient_matches_finite_difference() {
        let h = Operator::new(vec![
            (sigma_z(), Coefficient::constant(0.4)),
            (sigma_x(), Coefficient::param(0)),
        ])
        .unwrap();
        let jumps = vec![Operator::new(vec![(
            sigma_minus(),
            Coefficient::param_scaled(1, Complex64::new(0.5, 0.2)),
        )])
        .unwrap()];
        let params = [0.9, 1.1];
        let gen = Generator::new(&h, &jumps, StateKind::Density).unwrap();

        let psi = Array1::from(vec![Complex64::new(0.6, 0.0), Complex64::new(0.0, 0.8)]);
        let y = density_batch(&projector(&psi));
        let mut lambda = Array3::zeros((1, 2, 2));
        lambda[[0, 0, 0]] = Complex64::new(0.3, 0.0);
        lambda[[0, 0, 1]] = Complex64::new(0.1, -0.7);
        lambda[[0, 1, 0]] = Complex64::new(-0.2, 0.4);
        lambda[[0, 1, 1]] = Complex64::new(0.9, 0.1);

        let mut grad = vec![0.0; 2];
        let snap = gen.at(0.3, &params);
        gen.accumulate_param_gradient(&snap, 0.3, &params, y.view(), lambda.view(), &mut grad);

        for p in 0..2 {
            let fd = fd_param_gradient(&h, &jumps, StateKind::Density, &params, &y, &lambda, p);
            assert_relative_eq!(grad[p], fd, epsilon = 1e-7);
        }
    }

    #[test]
    fn test_ket_param_gradient_matches_finite_difference() {
        let h = Operator::new(vec![(sigma_x(), Coefficient::param_scaled(0, 2.0))]).unwrap();
        let params = [0.3];
        let gen = Generator::new(&h, &[], StateKind::Ket).unwrap();
        let y = ket_batch(basis(2, 0));
        let lambda = ket_batch(Array1::from(vec![
            Complex64::new(0.2, 0.5),
            Complex64::new(-0.1, 0.9),
        ]));
        let mut grad = vec![0.0];
        let snap = gen.at(0.0, &params);
        gen.accumulate_param_gradient(&snap, 0.0, &params, y.view(), lambda.view(), &mut grad);
        let fd = fd_param_gradient(&h, &[], StateKind::Ket, &params, &y, &lambda, 0);
        assert_relative_eq!(grad[0], fd, epsilon = 1e-8);
    }

    #[test]
    fn test_dynamics_caches_constant_snapshot() {
        let h = Operator::constant(sigma_x()).unwrap();
        let gen = Generator::new(&h, &[], StateKind::Ket).unwrap();
        let dynamics = Dynamics::new(gen, &[]);
        assert!(dynamics.is_constant());
        assert!(matches!(dynamics.snapshot(1.0), Cow::Borrowed(_)));
    }
}
