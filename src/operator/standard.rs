// Copyright 2026 QubitOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Standard operators and states.
//!
//! Qubit convention: |0⟩ is the σz = +1 eigenstate and σ⁻ = |0⟩⟨1|.

use ndarray::{array, Array1, Array2};
use num_complex::Complex64;

use super::Operator;
use crate::error::{Error, Result};

const ZERO: Complex64 = Complex64::new(0.0, 0.0);
const ONE: Complex64 = Complex64::new(1.0, 0.0);
const I: Complex64 = Complex64::new(0.0, 1.0);

/// Pauli X.
pub fn sigma_x() -> Array2<Complex64> {
    array![[ZERO, ONE], [ONE, ZERO]]
}

/// Pauli Y.
pub fn sigma_y() -> Array2<Complex64> {
    array![[ZERO, -I], [I, ZERO]]
}

/// Pauli Z.
pub fn sigma_z() -> Array2<Complex64> {
    array![[ONE, ZERO], [ZERO, -ONE]]
}

/// Lowering operator σ⁻ = |0⟩⟨1|.
pub fn sigma_minus() -> Array2<Complex64> {
    let mut m = Array2::zeros((2, 2));
    m[[0, 1]] = ONE;
    m
}

/// Raising operator σ⁺ = |1⟩⟨0|.
pub fn sigma_plus() -> Array2<Complex64> {
    dag(&sigma_minus())
}

/// Truncated bosonic annihilation operator on `n` levels.
pub fn destroy(n: usize) -> Array2<Complex64> {
    let mut a = Array2::zeros((n, n));
    for k in 1..n {
        a[[k - 1, k]] = Complex64::new((k as f64).sqrt(), 0.0);
    }
    a
}

/// Truncated bosonic creation operator on `n` levels.
pub fn create(n: usize) -> Array2<Complex64> {
    dag(&destroy(n))
}

/// Number operator a†a on `n` levels.
pub fn number(n: usize) -> Array2<Complex64> {
    Array2::from_diag(&Array1::from_iter((0..n).map(|k| Complex64::new(k as f64, 0.0))))
}

pub fn identity(n: usize) -> Array2<Complex64> {
    Array2::eye(n)
}

/// Basis ket |k⟩ in an `n`-dimensional space.
///
/// # Panics
/// Panics if `k >= n`.
pub fn basis(n: usize, k: usize) -> Array1<Complex64> {
    assert!(k < n, "basis index {} out of range for dimension {}", k, n);
    let mut psi = Array1::zeros(n);
    psi[k] = ONE;
    psi
}

/// Projector |ψ⟩⟨ψ|.
pub fn projector(psi: &Array1<Complex64>) -> Array2<Complex64> {
    let n = psi.len();
    Array2::from_shape_fn((n, n), |(i, j)| psi[i] * psi[j].conj())
}

/// Conjugate transpose.
pub fn dag(m: &Array2<Complex64>) -> Array2<Complex64> {
    m.t().mapv(|z| z.conj())
}

/// Kronecker product A ⊗ B.
pub fn tensor(a: &Array2<Complex64>, b: &Array2<Complex64>) -> Array2<Complex64> {
    ndarray::linalg::kron(a, b)
}

/// Relaxation channel `√(1/T1) σ⁻`. Times share the Hamiltonian's unit.
pub fn amplitude_damping(t1: f64) -> Result<Operator> {
    if !(t1.is_finite() && t1 > 0.0) {
        return Err(Error::Config(format!("T1 must be positive, got {}", t1)));
    }
    Operator::constant(sigma_minus().mapv(|z| z * (1.0 / t1).sqrt()))
}

/// Pure dephasing channel `√γφ σz/2` with `γφ = 1/T2 - 1/(2 T1)`.
///
/// Requires `T2 <= 2 T1`; `T2 = 2 T1` gives a zero channel.
pub fn dephasing(t1: f64, t2: f64) -> Result<Operator> {
    if !(t1.is_finite() && t1 > 0.0) {
        return Err(Error::Config(format!("T1 must be positive, got {}", t1)));
    }
    if !(t2.is_finite() && t2 > 0.0) {
        return Err(Error::Config(format!("T2 must be positive, got {}", t2)));
    }
    if t2 > 2.0 * t1 {
        return Err(Error::Config(format!(
            "T2 ({}) must not exceed 2*T1 ({})",
            t2,
            2.0 * t1
        )));
    }
    let gamma_phi = (1.0 / t2 - 0.5 / t1).max(0.0);
    Operator::constant(sigma_z().mapv(|z| z * 0.5 * gamma_phi.sqrt()))
}

/// Both single-qubit decoherence channels for the given T1 and T2.
pub fn decoherence(t1: f64, t2: f64) -> Result<Vec<Operator>> {
    Ok(vec![amplitude_damping(t1)?, dephasing(t1, t2)?])
}
