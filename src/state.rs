// Copyright 2026 QubitOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Batched quantum states.
//!
//! Every state is stored as a `(batch, d, k)` tensor: kets have `k = 1`,
//! density matrices have `k = d`. Batch items evolve independently under the
//! same generator, so the integration code never branches on batch size.

use ndarray::{Array1, Array2, Array3, ArrayView2, Axis};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Whether a state holds state vectors or density matrices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateKind {
    /// Column state vectors |ψ⟩
    Ket,
    /// Density matrices ρ
    Density,
}

/// A batch of kets or density matrices of a common dimension.
#[derive(Debug, Clone, PartialEq)]
pub struct State {
    kind: StateKind,
    data: Array3<Complex64>,
}

impl State {
    /// Single ket.
    pub fn ket(psi: Array1<Complex64>) -> Result<Self> {
        Self::kets(&[psi])
    }

    /// Batch of kets, all of the same dimension.
    pub fn kets(psis: &[Array1<Complex64>]) -> Result<Self> {
        let d = batch_dim(psis.iter().map(|p| p.len()), "ket")?;
        let data = Array3::from_shape_fn((psis.len(), d, 1), |(b, i, _)| psis[b][i]);
        Ok(Self {
            kind: StateKind::Ket,
            data,
        })
    }

    /// Single density matrix.
    pub fn density(rho: Array2<Complex64>) -> Result<Self> {
        Self::densities(&[rho])
    }

    /// Batch of density matrices, all square and of the same dimension.
    pub fn densities(rhos: &[Array2<Complex64>]) -> Result<Self> {
        for rho in rhos {
            if rho.nrows() != rho.ncols() {
                return Err(Error::Shape(format!(
                    "density matrix must be square, got {} x {}",
                    rho.nrows(),
                    rho.ncols()
                )));
            }
        }
        let d = batch_dim(rhos.iter().map(|r| r.nrows()), "density matrix")?;
        let data = Array3::from_shape_fn((rhos.len(), d, d), |(b, i, j)| rhos[b][[i, j]]);
        Ok(Self {
            kind: StateKind::Density,
            data,
        })
    }

    /// Wrap an existing `(batch, d, k)` tensor, checking it matches `kind`.
    pub fn from_batch(kind: StateKind, data: Array3<Complex64>) -> Result<Self> {
        let (batch, d, k) = data.dim();
        if batch == 0 || d == 0 {
            return Err(Error::Shape(format!(
                "state tensor must be non-empty, got shape ({}, {}, {})",
                batch, d, k
            )));
        }
        let expected = match kind {
            StateKind::Ket => 1,
            StateKind::Density => d,
        };
        if k != expected {
            return Err(Error::Shape(format!(
                "{:?} state of dimension {} needs trailing axis {}, got {}",
                kind, d, expected, k
            )));
        }
        Ok(Self { kind, data })
    }

    pub fn kind(&self) -> StateKind {
        self.kind
    }

    pub fn is_density(&self) -> bool {
        self.kind == StateKind::Density
    }

    pub fn batch_size(&self) -> usize {
        self.data.len_of(Axis(0))
    }

    /// Hilbert-space dimension.
    pub fn dim(&self) -> usize {
        self.data.len_of(Axis(1))
    }

    pub fn data(&self) -> &Array3<Complex64> {
        &self.data
    }

    pub fn into_data(self) -> Array3<Complex64> {
        self.data
    }

    /// View of batch item `b` as a `d x k` matrix.
    pub fn item(&self, b: usize) -> ArrayView2<'_, Complex64> {
        self.data.index_axis(Axis(0), b)
    }

    /// Ket `b` as a vector. `None` for density states.
    pub fn ket_vector(&self, b: usize) -> Option<Array1<Complex64>> {
        match self.kind {
            StateKind::Ket => Some(self.item(b).column(0).to_owned()),
            StateKind::Density => None,
        }
    }

    /// Density matrix `b`, formed as |ψ⟩⟨ψ| for kets.
    pub fn density_matrix(&self, b: usize) -> Array2<Complex64> {
        let item = self.item(b);
        match self.kind {
            StateKind::Density => item.to_owned(),
            StateKind::Ket => item.dot(&item.t().mapv(|z| z.conj())),
        }
    }

    /// Promote kets to density matrices; density states are returned as is.
    pub fn to_density(&self) -> State {
        match self.kind {
            StateKind::Density => self.clone(),
            StateKind::Ket => {
                let (batch, d, _) = self.data.dim();
                let mut data = Array3::zeros((batch, d, d));
                for (mut out, psi) in data.outer_iter_mut().zip(self.data.outer_iter()) {
                    out.assign(&psi.dot(&psi.t().mapv(|z| z.conj())));
                }
                State {
                    kind: StateKind::Density,
                    data,
                }
            }
        }
    }

    /// ‖ψ‖ for kets, Re Tr ρ for density matrices.
    pub fn norms(&self) -> Vec<f64> {
        self.data
            .outer_iter()
            .map(|item| match self.kind {
                StateKind::Ket => item.iter().map(|z| z.norm_sqr()).sum::<f64>().sqrt(),
                StateKind::Density => trace(&item).re,
            })
            .collect()
    }

    /// Tr ρ² per batch item (1 for kets of unit norm).
    pub fn purities(&self) -> Vec<f64> {
        (0..self.batch_size())
            .map(|b| {
                let rho = self.density_matrix(b);
                trace(&rho.dot(&rho).view()).re
            })
            .collect()
    }

    pub fn is_finite(&self) -> bool {
        self.data.iter().all(|z| z.re.is_finite() && z.im.is_finite())
    }
}

/// Trace of a square matrix.
pub(crate) fn trace(m: &ArrayView2<'_, Complex64>) -> Complex64 {
    m.diag().iter().sum()
}

fn batch_dim(mut dims: impl Iterator<Item = usize>, what: &str) -> Result<usize> {
    let d = dims
        .next()
        .ok_or_else(|| Error::Shape(format!("{} batch must not be empty", what)))?;
    if d == 0 {
        return Err(Error::Shape(format!("{} dimension must be positive", what)));
    }
    for (i, other) in dims.enumerate() {
        if other != d {
            return Err(Error::Shape(format!(
                "{} batch item {} has dimension {}, expected {}",
                what,
                i + 1,
                other,
                d
            )));
        }
    }
    Ok(d)
}
