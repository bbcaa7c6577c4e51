// Copyright 2026 QubitOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Small dense complex linear algebra used by the propagator methods.

use ndarray::{s, Array2};
use num_complex::Complex64;

const ZERO: Complex64 = Complex64::new(0.0, 0.0);
const ONE: Complex64 = Complex64::new(1.0, 0.0);

/// Solve A X = B by Gaussian elimination with partial pivoting.
///
/// Returns `None` when a pivot vanishes.
pub(crate) fn solve_linear(a: &Array2<Complex64>, b: &Array2<Complex64>) -> Option<Array2<Complex64>> {
    let n = a.nrows();
    let m = b.ncols();

    let mut aug = Array2::zeros((n, n + m));
    aug.slice_mut(s![.., ..n]).assign(a);
    aug.slice_mut(s![.., n..]).assign(b);

    for col in 0..n {
        let pivot_row = (col..n)
            .max_by(|&i, &j| aug[[i, col]].norm().total_cmp(&aug[[j, col]].norm()))?;
        if pivot_row != col {
            for j in 0..(n + m) {
                aug.swap([col, j], [pivot_row, j]);
            }
        }

        let pivot = aug[[col, col]];
        if !(pivot.norm() > 1e-300) {
            return None;
        }

        for row in (col + 1)..n {
            let factor = aug[[row, col]] / pivot;
            if factor == ZERO {
                continue;
            }
            for j in col..(n + m) {
                let val = aug[[col, j]];
                aug[[row, j]] -= factor * val;
            }
        }
    }

    let mut x = Array2::<Complex64>::zeros((n, m));
    for row in (0..n).rev() {
        let pivot = aug[[row, row]];
        for j in 0..m {
            let mut sum = aug[[row, n + j]];
            for k in (row + 1)..n {
                sum -= aug[[row, k]] * x[[k, j]];
            }
            x[[row, j]] = sum / pivot;
        }
    }
    Some(x)
}

/// Lower-triangular C with C C† = S for Hermitian positive-definite S.
///
/// Returns `None` if S is not numerically positive definite.
pub(crate) fn cholesky(s: &Array2<Complex64>) -> Option<Array2<Complex64>> {
    let n = s.nrows();
    let mut c = Array2::<Complex64>::zeros((n, n));
    for j in 0..n {
        let mut diag = s[[j, j]].re;
        for k in 0..j {
            diag -= c[[j, k]].norm_sqr();
        }
        if !(diag > 0.0) {
            return None;
        }
        let cjj = diag.sqrt();
        c[[j, j]] = Complex64::new(cjj, 0.0);
        for i in (j + 1)..n {
            let mut v = s[[i, j]];
            for k in 0..j {
                v -= c[[i, k]] * c[[j, k]].conj();
            }
            c[[i, j]] = v / cjj;
        }
    }
    Some(c)
}

/// Inverse of a lower-triangular matrix with non-zero diagonal.
pub(crate) fn invert_lower(c: &Array2<Complex64>) -> Array2<Complex64> {
    let n = c.nrows();
    let mut inv = Array2::<Complex64>::zeros((n, n));
    for col in 0..n {
        inv[[col, col]] = ONE / c[[col, col]];
        for row in (col + 1)..n {
            let mut sum = ZERO;
            for k in col..row {
                sum += c[[row, k]] * inv[[k, col]];
            }
            inv[[row, col]] = -sum / c[[row, row]];
        }
    }
    inv
}

/// Frobenius norm.
pub(crate) fn frobenius(m: &Array2<Complex64>) -> f64 {
    m.iter().map(|z| z.norm_sqr()).sum::<f64>().sqrt()
}
