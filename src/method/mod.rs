// Copyright 2026 QubitOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Single-step integration methods.
//!
//! Every method implements [`Propagator`]: given `(t, h, y)` it proposes the
//! state at `t + h` and, for embedded Runge–Kutta pairs, an error estimate.
//! The time stepper decides whether to accept the step; methods only learn
//! about acceptance through [`Propagator::accept`].
//!
//! | Method     | Order | Error estimate | Gradient |
//! |------------|-------|----------------|----------|
//! | `euler`    | 1     | no             | yes      |
//! | `rk4`      | 4     | no             | yes      |
//! | `dopri5`   | 5     | yes (4)        | yes      |
//! | `tsit5`    | 5     | yes (4)        | yes      |
//! | `dopri8`   | 8     | yes (7)        | yes      |
//! | `expm`     | 2     | no             | no       |
//! | `krylov`   | 2     | no             | no       |
//! | `rouchon1` | 1     | no             | no       |

pub mod expm;
pub mod krylov;
pub(crate) mod linalg;
pub mod rouchon;
pub mod runge_kutta;
pub mod tableau;

use std::fmt;
use std::str::FromStr;

use ndarray::{Array1, Array2, Array3, ArrayView2};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::generator::Dynamics;

pub use runge_kutta::RungeKutta;
pub use tableau::Tableau;

/// Step-method selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Method {
    /// Explicit Euler
    Euler,
    /// Classical fourth-order Runge–Kutta
    Rk4,
    /// Dormand–Prince 5(4)
    #[default]
    Dopri5,
    /// Tsitouras 5(4)
    Tsit5,
    /// Prince–Dormand 8(7), for tight tolerances on smooth problems
    Dopri8,
    /// Dense matrix exponential of the generator at the step midpoint
    Expm,
    /// Matrix-exponential action on a Krylov subspace
    Krylov {
        #[serde(default = "default_subspace_dim")]
        subspace_dim: usize,
    },
    /// First-order positivity-preserving Kraus map
    Rouchon1 {
        #[serde(default = "default_normalize")]
        normalize: bool,
    },
}

fn default_subspace_dim() -> usize {
    12
}

fn default_normalize() -> bool {
    true
}

impl Method {
    pub fn name(&self) -> &'static str {
        match self {
            Method::Euler => "euler",
            Method::Rk4 => "rk4",
            Method::Dopri5 => "dopri5",
            Method::Tsit5 => "tsit5",
            Method::Dopri8 => "dopri8",
            Method::Expm => "expm",
            Method::Krylov { .. } => "krylov",
            Method::Rouchon1 { .. } => "rouchon1",
        }
    }

    /// Whether the method can drive an adaptive step controller.
    pub fn has_error_estimate(&self) -> bool {
        matches!(self, Method::Dopri5 | Method::Tsit5 | Method::Dopri8)
    }

    /// Whether the adjoint pass can differentiate through this method.
    pub fn supports_gradient(&self) -> bool {
        self.tableau().is_some()
    }

    /// Butcher tableau for the Runge–Kutta family.
    pub fn tableau(&self) -> Option<&'static Tableau> {
        match self {
            Method::Euler => Some(&tableau::EULER),
            Method::Rk4 => Some(&tableau::RK4),
            Method::Dopri5 => Some(&tableau::DOPRI5),
            Method::Tsit5 => Some(&tableau::TSIT5),
            Method::Dopri8 => Some(&tableau::DOPRI8),
            _ => None,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Method::Krylov { subspace_dim } => write!(f, "krylov:{}", subspace_dim),
            Method::Rouchon1 { normalize: false } => f.write_str("rouchon1:raw"),
            other => f.write_str(other.name()),
        }
    }
}

impl FromStr for Method {
    type Err = Error;

    /// Parses `euler`, `rk4`, `dopri5`, `tsit5`, `dopri8`, `expm`, `krylov[:m]` and
    /// `rouchon1[:raw]`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_lowercase();
        let (head, arg) = match lower.split_once(':') {
            Some((head, arg)) => (head, Some(arg)),
            None => (lower.as_str(), None),
        };
        let method = match (head, arg) {
            ("euler", None) => Method::Euler,
            ("rk4", None) => Method::Rk4,
            ("dopri5", None) => Method::Dopri5,
            ("tsit5", None) => Method::Tsit5,
            ("dopri8", None) => Method::Dopri8,
            ("expm", None) => Method::Expm,
            ("krylov", None) => Method::Krylov {
                subspace_dim: default_subspace_dim(),
            },
            ("krylov", Some(m)) => Method::Krylov {
                subspace_dim: m.parse().map_err(|_| {
                    Error::Config(format!("invalid krylov subspace dimension '{}'", m))
                })?,
            },
            ("rouchon1", None) => Method::Rouchon1 { normalize: true },
            ("rouchon1", Some("raw")) => Method::Rouchon1 { normalize: false },
            _ => return Err(Error::Config(format!("unknown step method '{}'", s))),
        };
        Ok(method)
    }
}

/// Vector-space operations the integrators need from a state.
///
/// Norms are taken per batch item so that a single badly-resolved item
/// drives the step size for the whole batch.
pub trait OdeVector: Clone {
    fn zeros_like(&self) -> Self;

    /// `self += a * x`
    fn add_scaled(&mut self, a: f64, x: &Self);

    /// Worst-case `‖err_b‖ / (atol + rtol max(‖y0_b‖, ‖y1_b‖))` over items.
    fn error_ratio(err: &Self, y0: &Self, y1: &Self, rtol: f64, atol: f64) -> f64;

    /// Largest item norm.
    fn max_norm(&self) -> f64;

    fn is_finite(&self) -> bool;
}

fn item_norms(a: &Array3<Complex64>) -> impl Iterator<Item = f64> + '_ {
    a.outer_iter()
        .map(|item| item.iter().map(|z| z.norm_sqr()).sum::<f64>().sqrt())
}

impl OdeVector for Array3<Complex64> {
    fn zeros_like(&self) -> Self {
        Array3::zeros(self.raw_dim())
    }

    fn add_scaled(&mut self, a: f64, x: &Self) {
        self.scaled_add(Complex64::new(a, 0.0), x);
    }

    fn error_ratio(err: &Self, y0: &Self, y1: &Self, rtol: f64, atol: f64) -> f64 {
        item_norms(err)
            .zip(item_norms(y0).zip(item_norms(y1)))
            .map(|(e, (n0, n1))| e / (atol + rtol * n0.max(n1)))
            .fold(0.0, f64::max)
    }

    fn max_norm(&self) -> f64 {
        item_norms(self).fold(0.0, f64::max)
    }

    fn is_finite(&self) -> bool {
        self.iter().all(|z| z.re.is_finite() && z.im.is_finite())
    }
}

/// Outcome of one step attempt.
#[derive(Debug, Clone)]
pub struct Attempt<V> {
    /// Candidate state at `t + h`
    pub y: V,
    /// Local error estimate, for embedded methods
    pub error: Option<V>,
}

/// A single-step method bound to its dynamics.
pub trait Propagator<V> {
    fn name(&self) -> &'static str;

    /// Convergence order, used by the step-size controller.
    fn order(&self) -> u32;

    /// Propose the state at `t + h`. `h` is negative when integrating
    /// backward in time.
    fn attempt(&mut self, t: f64, h: f64, y: &V) -> Attempt<V>;

    /// The last attempt was accepted and the stepper is now at `t_new`.
    fn accept(&mut self, _t_new: f64) {}

    /// Drop cached stages; the state or generator changed discontinuously.
    fn reset(&mut self) {}

    /// Generator evaluations so far.
    fn evaluations(&self) -> usize;
}

/// Build the forward propagator for `method`.
pub fn build<'d>(
    method: Method,
    dynamics: &'d Dynamics<'d>,
) -> Box<dyn Propagator<Array3<Complex64>> + 'd> {
    match method {
        Method::Euler => Box::new(runge_kutta::RkMethod::new(&tableau::EULER, dynamics)),
        Method::Rk4 => Box::new(runge_kutta::RkMethod::new(&tableau::RK4, dynamics)),
        Method::Dopri5 => Box::new(runge_kutta::RkMethod::new(&tableau::DOPRI5, dynamics)),
        Method::Tsit5 => Box::new(runge_kutta::RkMethod::new(&tableau::TSIT5, dynamics)),
        Method::Dopri8 => Box::new(runge_kutta::RkMethod::new(&tableau::DOPRI8, dynamics)),
        Method::Expm => Box::new(expm::ExpmMethod::new(dynamics)),
        Method::Krylov { subspace_dim } => {
            Box::new(krylov::KrylovMethod::new(dynamics, subspace_dim))
        }
        Method::Rouchon1 { normalize } => Box::new(rouchon::Rouchon1::new(dynamics, normalize)),
    }
}

/// Clamp a stage time into the open interval between `a` and `b`.
///
/// Coefficients are right-continuous at their jumps, so a stage evaluated
/// exactly on a step boundary would see the neighbouring piece. Nudging by
/// one ulp keeps every stage on the piece the step covers.
pub(crate) fn interior(t: f64, a: f64, b: f64) -> f64 {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    let (lo_in, hi_in) = (next_up(lo), next_down(hi));
    if lo_in > hi_in {
        return 0.5 * (lo + hi);
    }
    t.clamp(lo_in, hi_in)
}

fn next_up(x: f64) -> f64 {
    if x.is_nan() || x == f64::INFINITY {
        return x;
    }
    if x == 0.0 {
        return f64::from_bits(1);
    }
    let bits = x.to_bits();
    if x > 0.0 {
        f64::from_bits(bits + 1)
    } else {
        f64::from_bits(bits - 1)
    }
}

fn next_down(x: f64) -> f64 {
    -next_up(-x)
}

/// Row-major vec(ρ) of a square matrix.
pub(crate) fn vectorize(m: &ArrayView2<'_, Complex64>) -> Array1<Complex64> {
    m.iter().copied().collect()
}

/// Inverse of [`vectorize`] for a `rows x cols` matrix.
pub(crate) fn unvectorize(v: &Array1<Complex64>, rows: usize, cols: usize) -> Array2<Complex64> {
    Array2::from_shape_fn((rows, cols), |(i, j)| v[i * cols + j])
}
