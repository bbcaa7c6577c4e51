// Copyright 2026 QubitOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! First-order Rouchon scheme.
//!
//! One step applies the Kraus map `ρ ↦ Σ_k M_k ρ M_k†` with
//!
//! ```text
//! M_0 = I - h (iH + ½ Σ L_k† L_k)
//! M_k = √h L_k
//! ```
//!
//! which is completely positive for any `h`. With normalization enabled
//! the operators are rescaled by `S^{-1/2}`, `S = Σ M_k† M_k`, so the map is
//! also exactly trace preserving. Kets only see `M_0`.
//!
//! Ref: Rouchon & Ralph (2015), Phys. Rev. A 91, 012118.

use ndarray::{Array2, Array3};
use num_complex::Complex64;
use tracing::debug;

use super::linalg::{cholesky, invert_lower};
use super::{interior, Attempt, Propagator};
use crate::generator::{Dynamics, GeneratorSnapshot};
use crate::operator::standard::dag;
use crate::state::StateKind;

const I: Complex64 = Complex64::new(0.0, 1.0);

/// Kraus operators of one step of size `h`.
pub(crate) fn kraus_operators(
    snapshot: &GeneratorSnapshot,
    h: f64,
    normalize: bool,
) -> Vec<Array2<Complex64>> {
    let d = snapshot.hamiltonian().nrows();
    let mut generator = snapshot.hamiltonian() * I;
    for jump in snapshot.jumps() {
        generator.scaled_add(Complex64::new(0.5, 0.0), &jump.l_dag_l);
    }
    let mut ops = vec![Array2::<Complex64>::eye(d) - generator * Complex64::new(h, 0.0)];
    let sqrt_h = Complex64::new(h.abs().sqrt(), 0.0);
    ops.extend(snapshot.jumps().iter().map(|jump| &jump.l * sqrt_h));

    if !normalize {
        return ops;
    }
    let s = ops
        .iter()
        .fold(Array2::<Complex64>::zeros((d, d)), |acc, m| acc + dag(m).dot(m));
    match cholesky(&s) {
        Some(c) => {
            let t = dag(&invert_lower(&c));
            ops.iter().map(|m| m.dot(&t)).collect()
        }
        None => {
            debug!(h, "Kraus normalization skipped: S is not positive definite");
            ops
        }
    }
}

/// Positivity-preserving first-order Kraus propagator.
pub struct Rouchon1<'d> {
    dynamics: &'d Dynamics<'d>,
    normalize: bool,
    /// Kraus operators per parameter row for the last `h`, reused while the
    /// generator is constant
    cached: Option<(f64, Vec<Vec<Array2<Complex64>>>)>,
    evaluations: usize,
}

impl<'d> Rouchon1<'d> {
    pub fn new(dynamics: &'d Dynamics<'d>, normalize: bool) -> Self {
        Self {
            dynamics,
            normalize,
            cached: None,
            evaluations: 0,
        }
    }

    fn operators(&mut self, t: f64, h: f64) -> Vec<Vec<Array2<Complex64>>> {
        if let Some((h_cached, ops)) = &self.cached {
            if *h_cached == h {
                return ops.clone();
            }
        }
        let ops: Vec<_> = self
            .dynamics
            .snapshots(interior(t, t, t + h))
            .iter()
            .map(|snap| kraus_operators(snap, h, self.normalize))
            .collect();
        self.evaluations += ops.len();
        if self.dynamics.is_constant() {
            self.cached = Some((h, ops.clone()));
        }
        ops
    }
}

impl Propagator<Array3<Complex64>> for Rouchon1<'_> {
    fn name(&self) -> &'static str {
        "rouchon1"
    }

    fn order(&self) -> u32 {
        1
    }

    fn attempt(&mut self, t: f64, h: f64, y: &Array3<Complex64>) -> Attempt<Array3<Complex64>> {
        let rows = self.operators(t, h);
        let mut out = Array3::zeros(y.raw_dim());
        for (b, (mut o, yb)) in out.outer_iter_mut().zip(y.outer_iter()).enumerate() {
            let Some(ops) = rows.get(self.dynamics.row_of(b)) else {
                continue;
            };
            match self.dynamics.kind() {
                StateKind::Ket => o.assign(&ops[0].dot(&yb)),
                StateKind::Density => {
                    for m in ops {
                        o += &m.dot(&yb).dot(&dag(m));
                    }
                }
            }
        }
        Attempt { y: out, error: None }
    }

    fn evaluations(&self) -> usize {
        self.evaluations
    }
}
