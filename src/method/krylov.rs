// Copyright 2026 QubitOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Krylov-subspace approximation of `exp(hA) y`.
//!
//! The generator is frozen at the step midpoint. Arnoldi iteration with
//! modified Gram–Schmidt builds an orthonormal basis `V` of
//! `span{y, hAy, (hA)²y, ...}` and the small Hessenberg projection `H`;
//! then `exp(hA) y ≈ β V exp(H) e₁`. Only the action of the generator is
//! needed, never its dense matrix, so density matrices are propagated
//! without forming the Liouvillian.
//!
//! Ref: Saad (1992), SIAM J. Numer. Anal. 29(1), 209.

use ndarray::{s, Array2, Array3, ArrayView2};
use num_complex::Complex64;

use super::expm::matrix_exp;
use super::{interior, Attempt, Propagator};
use crate::generator::{inner, Dynamics, GeneratorSnapshot};

/// Relative size of the new Arnoldi direction below which the subspace is
/// invariant and the iteration stops early.
const BREAKDOWN_TOL: f64 = 1e-12;

fn norm(m: &Array2<Complex64>) -> f64 {
    m.iter().map(|z| z.norm_sqr()).sum::<f64>().sqrt()
}

/// `exp(hA) y` for one batch item using at most `max_dim` basis vectors.
///
/// Returns the result and the number of generator applications.
pub(crate) fn expv(
    snapshot: &GeneratorSnapshot,
    h: f64,
    y: &ArrayView2<'_, Complex64>,
    max_dim: usize,
) -> (Array2<Complex64>, usize) {
    let y = y.to_owned();
    let beta = norm(&y);
    if beta == 0.0 {
        return (y, 0);
    }

    let m = max_dim.min(y.len()).max(1);
    let h_c = Complex64::new(h, 0.0);
    let mut basis = vec![&y / Complex64::new(beta, 0.0)];
    let mut hess = Array2::<Complex64>::zeros((m + 1, m));
    let mut size = m;
    let mut applications = 0;

    for j in 0..m {
        let mut w = snapshot.apply_item(&basis[j].view()) * h_c;
        applications += 1;
        let w_norm = norm(&w);
        for (i, v) in basis.iter().enumerate() {
            let hij = inner(v.iter(), w.iter());
            hess[[i, j]] = hij;
            w.scaled_add(-hij, v);
        }
        let hn = norm(&w);
        if hn <= BREAKDOWN_TOL * w_norm {
            size = j + 1;
            break;
        }
        hess[[j + 1, j]] = Complex64::new(hn, 0.0);
        if j + 1 < m {
            basis.push(w / Complex64::new(hn, 0.0));
        }
    }

    let small = matrix_exp(&hess.slice(s![..size, ..size]).to_owned());
    let mut out = Array2::<Complex64>::zeros(y.raw_dim());
    for (i, v) in basis.iter().take(size).enumerate() {
        out.scaled_add(small[[i, 0]] * beta, v);
    }
    (out, applications)
}

/// Midpoint Krylov propagator.
pub struct KrylovMethod<'d> {
    dynamics: &'d Dynamics<'d>,
    subspace_dim: usize,
    evaluations: usize,
}

impl<'d> KrylovMethod<'d> {
    pub fn new(dynamics: &'d Dynamics<'d>, subspace_dim: usize) -> Self {
        Self {
            dynamics,
            subspace_dim,
            evaluations: 0,
        }
    }
}

impl Propagator<Array3<Complex64>> for KrylovMethod<'_> {
    fn name(&self) -> &'static str {
        "krylov"
    }

    fn order(&self) -> u32 {
        2
    }

    fn attempt(&mut self, t: f64, h: f64, y: &Array3<Complex64>) -> Attempt<Array3<Complex64>> {
        let snapshots = self.dynamics.snapshots(interior(t + 0.5 * h, t, t + h));
        let mut out = Array3::zeros(y.raw_dim());
        for (b, (mut o, yb)) in out.outer_iter_mut().zip(y.outer_iter()).enumerate() {
            let Some(snapshot) = snapshots.get(self.dynamics.row_of(b)) else {
                continue;
            };
            let (item, applications) = expv(snapshot, h, &yb, self.subspace_dim);
            self.evaluations += applications;
            o.assign(&item);
        }
        Attempt { y: out, error: None }
    }

    fn evaluations(&self) -> usize {
        self.evaluations
    }
}
