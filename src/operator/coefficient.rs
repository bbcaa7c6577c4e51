// Copyright 2026 QubitOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Scalar time-dependent coefficients.
//!
//! A coefficient multiplies one constant matrix inside an [`Operator`]. It is
//! a function of time and of the parameter vector θ, and it can report its
//! partial derivatives ∂c/∂θ_p, which the adjoint pass needs.
//!
//! [`Operator`]: super::Operator

use std::fmt;
use std::sync::Arc;

use num_complex::Complex64;

use crate::error::{Error, Result};

/// c(t, θ) for user-supplied modulations.
pub type CoefficientFn = Arc<dyn Fn(f64, &[f64]) -> Complex64 + Send + Sync>;

/// ∂c/∂θ_p at (t, θ); the last argument is p.
pub type CoefficientGradFn = Arc<dyn Fn(f64, &[f64], usize) -> Complex64 + Send + Sync>;

/// Relative step for the central-difference fallback on modulated coefficients.
pub(super) const FD_STEP: f64 = 1e-6;

/// A scalar coefficient c(t, θ).
#[derive(Clone)]
pub enum Coefficient {
    /// Time- and parameter-independent value
    Constant(Complex64),

    /// `scale * θ[index]`
    Param { index: usize, scale: Complex64 },

    /// Piecewise-constant: `values[k]` on `[times[k], times[k+1])`, zero outside
    Pwc {
        times: Vec<f64>,
        values: Vec<Complex64>,
    },

    /// Piecewise-constant with amplitudes taken from θ: `θ[offset + k]` on
    /// `[times[k], times[k+1])`, zero outside
    PwcParams { times: Vec<f64>, offset: usize },

    /// Arbitrary smooth function of time and parameters
    Modulated {
        f: CoefficientFn,
        /// Parameter indices `f` may depend on
        deps: Vec<usize>,
        /// Analytic derivative; central differences are used when absent
        grad: Option<CoefficientGradFn>,
    },
}

impl fmt::Debug for Coefficient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Coefficient::Constant(c) => f.debug_tuple("Constant").field(c).finish(),
            Coefficient::Param { index, scale } => f
                .debug_struct("Param")
                .field("index", index)
                .field("scale", scale)
                .finish(),
            Coefficient::Pwc { times, values } => f
                .debug_struct("Pwc")
                .field("times", times)
                .field("values", values)
                .finish(),
            Coefficient::PwcParams { times, offset } => f
                .debug_struct("PwcParams")
                .field("times", times)
                .field("offset", offset)
                .finish(),
            Coefficient::Modulated { deps, grad, .. } => f
                .debug_struct("Modulated")
                .field("deps", deps)
                .field("analytic_grad", &grad.is_some())
                .finish_non_exhaustive(),
        }
    }
}

impl Coefficient {
    /// Constant coefficient.
    pub fn constant(value: impl Into<Complex64>) -> Self {
        Coefficient::Constant(value.into())
    }

    /// The parameter θ[index] itself.
    pub fn param(index: usize) -> Self {
        Coefficient::Param {
            index,
            scale: Complex64::new(1.0, 0.0),
        }
    }

    /// `scale * θ[index]`.
    pub fn param_scaled(index: usize, scale: impl Into<Complex64>) -> Self {
        Coefficient::Param {
            index,
            scale: scale.into(),
        }
    }

    /// Piecewise-constant coefficient with fixed values.
    ///
    /// `times` are the `N + 1` strictly increasing boundaries of `N` intervals.
    pub fn pwc(times: Vec<f64>, values: Vec<Complex64>) -> Result<Self> {
        let coeff = Coefficient::Pwc { times, values };
        coeff.validate()?;
        Ok(coeff)
    }

    /// Piecewise-constant coefficient whose `N` amplitudes are
    /// `θ[offset..offset + N]`.
    pub fn pwc_params(times: Vec<f64>, offset: usize) -> Result<Self> {
        check_boundaries(&times)?;
        Ok(Coefficient::PwcParams { times, offset })
    }

    /// Time-only modulation.
    pub fn modulated<F>(f: F) -> Self
    where
        F: Fn(f64) -> Complex64 + Send + Sync + 'static,
    {
        Coefficient::Modulated {
            f: Arc::new(move |t: f64, _: &[f64]| f(t)),
            deps: Vec::new(),
            grad: None,
        }
    }

    /// Modulation depending on the parameters listed in `deps`.
    pub fn parametric<F>(f: F, deps: Vec<usize>) -> Self
    where
        F: Fn(f64, &[f64]) -> Complex64 + Send + Sync + 'static,
    {
        Coefficient::Modulated {
            f: Arc::new(f),
            deps,
            grad: None,
        }
    }

    /// Attach an analytic derivative to a modulated coefficient.
    ///
    /// Other variants already know their derivative and are returned unchanged.
    pub fn with_gradient<G>(self, g: G) -> Self
    where
        G: Fn(f64, &[f64], usize) -> Complex64 + Send + Sync + 'static,
    {
        match self {
            Coefficient::Modulated { f, deps, .. } => Coefficient::Modulated {
                f,
                deps,
                grad: Some(Arc::new(g)),
            },
            other => other,
        }
    }

    /// Re-check the invariants the piecewise constructors enforce.
    ///
    /// The variants are public, so a coefficient may have been assembled
    /// without going through [`Coefficient::pwc`] or
    /// [`Coefficient::pwc_params`]. Operators call this on every term.
    pub fn validate(&self) -> Result<()> {
        match self {
            Coefficient::Pwc { times, values } => {
                check_boundaries(times)?;
                if values.len() + 1 != times.len() {
                    return Err(Error::Shape(format!(
                        "piecewise-constant coefficient has {} boundaries but {} values",
                        times.len(),
                        values.len()
                    )));
                }
                Ok(())
            }
            Coefficient::PwcParams { times, .. } => check_boundaries(times),
            Coefficient::Modulated { deps, .. } => {
                let mut sorted = deps.clone();
                sorted.sort_unstable();
                if sorted.windows(2).any(|w| w[0] == w[1]) {
                    return Err(Error::Shape(
                        "modulated coefficient lists a parameter dependency twice".into(),
                    ));
                }
                Ok(())
            }
            Coefficient::Constant(_) | Coefficient::Param { .. } => Ok(()),
        }
    }

    /// c(t, θ).
    pub fn value(&self, t: f64, params: &[f64]) -> Complex64 {
        match self {
            Coefficient::Constant(c) => *c,
            Coefficient::Param { index, scale } => *scale * params[*index],
            Coefficient::Pwc { times, values } => interval(times, t)
                .and_then(|k| values.get(k).copied())
                .unwrap_or(Complex64::new(0.0, 0.0)),
            Coefficient::PwcParams { times, offset } => match interval(times, t) {
                Some(k) => Complex64::new(params[offset + k], 0.0),
                None => Complex64::new(0.0, 0.0),
            },
            Coefficient::Modulated { f, .. } => f(t, params),
        }
    }

    /// Whether ∂c/∂θ can be non-zero.
    pub fn depends_on_params(&self) -> bool {
        match self {
            Coefficient::Constant(_) | Coefficient::Pwc { .. } => false,
            Coefficient::Param { .. } | Coefficient::PwcParams { .. } => true,
            Coefficient::Modulated { deps, .. } => !deps.is_empty(),
        }
    }

    /// Call `visit(p, ∂c/∂θ_p)` for every parameter with a (possibly)
    /// non-zero derivative at time `t`.
    pub fn for_each_derivative(
        &self,
        t: f64,
        params: &[f64],
        mut visit: impl FnMut(usize, Complex64),
    ) {
        match self {
            Coefficient::Constant(_) | Coefficient::Pwc { .. } => {}
            Coefficient::Param { index, scale } => visit(*index, *scale),
            Coefficient::PwcParams { times, offset } => {
                if let Some(k) = interval(times, t) {
                    visit(offset + k, Complex64::new(1.0, 0.0));
                }
            }
            Coefficient::Modulated { f, deps, grad } => {
                if deps.is_empty() {
                    return;
                }
                match grad {
                    Some(g) => {
                        for &p in deps {
                            visit(p, g(t, params, p));
                        }
                    }
                    None => {
                        let mut shifted = params.to_vec();
                        for &p in deps {
                            let eps = FD_STEP * params[p].abs().max(1.0);
                            shifted[p] = params[p] + eps;
                            let up = f(t, &shifted);
                            shifted[p] = params[p] - eps;
                            let down = f(t, &shifted);
                            shifted[p] = params[p];
                            visit(p, (up - down) / (2.0 * eps));
                        }
                    }
                }
            }
        }
    }

    /// Times at which the coefficient may jump.
    pub fn discontinuities(&self) -> &[f64] {
        match self {
            Coefficient::Pwc { times, .. } | Coefficient::PwcParams { times, .. } => times,
            _ => &[],
        }
    }

    /// Whether the value is independent of time.
    pub fn is_time_independent(&self) -> bool {
        matches!(self, Coefficient::Constant(_) | Coefficient::Param { .. })
    }

    /// Largest parameter index this coefficient reads, if any.
    pub fn max_param_index(&self) -> Option<usize> {
        match self {
            Coefficient::Constant(_) | Coefficient::Pwc { .. } => None,
            Coefficient::Param { index, .. } => Some(*index),
            Coefficient::PwcParams { times, offset } => {
                Some(offset + times.len().saturating_sub(2))
            }
            Coefficient::Modulated { deps, .. } => deps.iter().copied().max(),
        }
    }

    /// Multiply the coefficient by a constant factor.
    pub fn scaled(&self, factor: Complex64) -> Self {
        match self {
            Coefficient::Constant(c) => Coefficient::Constant(*c * factor),
            Coefficient::Param { index, scale } => Coefficient::Param {
                index: *index,
                scale: *scale * factor,
            },
            Coefficient::Pwc { times, values } => Coefficient::Pwc {
                times: times.clone(),
                values: values.iter().map(|v| *v * factor).collect(),
            },
            Coefficient::PwcParams { times, offset } => {
                let (times, offset) = (times.clone(), *offset);
                let lookup = times.clone();
                Coefficient::Modulated {
                    f: Arc::new(move |t: f64, p: &[f64]| match interval(&lookup, t) {
                        Some(k) => factor * p[offset + k],
                        None => Complex64::new(0.0, 0.0),
                    }),
                    deps: (offset..offset + times.len().saturating_sub(1)).collect(),
                    grad: Some(Arc::new(move |t: f64, _: &[f64], p: usize| match interval(&times, t) {
                        Some(k) if offset + k == p => factor,
                        _ => Complex64::new(0.0, 0.0),
                    })),
                }
            }
            Coefficient::Modulated { f, deps, grad } => {
                let f = Arc::clone(f);
                Coefficient::Modulated {
                    f: Arc::new(move |t: f64, p: &[f64]| factor * f(t, p)),
                    deps: deps.clone(),
                    grad: grad.as_ref().map(|g| {
                        let g = Arc::clone(g);
                        Arc::new(move |t: f64, p: &[f64], i: usize| factor * g(t, p, i))
                            as CoefficientGradFn
                    }),
                }
            }
        }
    }
}

impl From<f64> for Coefficient {
    fn from(value: f64) -> Self {
        Coefficient::Constant(Complex64::new(value, 0.0))
    }
}

impl From<Complex64> for Coefficient {
    fn from(value: Complex64) -> Self {
        Coefficient::Constant(value)
    }
}

/// Index of the interval `[times[k], times[k+1])` containing `t`.
fn interval(times: &[f64], t: f64) -> Option<usize> {
    let last = *times.last()?;
    if t < times[0] || t >= last {
        return None;
    }
    Some(times.partition_point(|&x| x <= t) - 1)
}

fn check_boundaries(times: &[f64]) -> Result<()> {
    if times.len() < 2 {
        return Err(Error::Shape(
            "piecewise-constant coefficient needs at least two boundaries".into(),
        ));
    }
    if times.iter().any(|t| !t.is_finite()) {
        return Err(Error::Shape(
            "piecewise-constant boundaries must be finite".into(),
        ));
    }
    if times.windows(2).any(|w| w[1] <= w[0]) {
        return Err(Error::Shape(
            "piecewise-constant boundaries must be strictly increasing".into(),
        ));
    }
    Ok(())
}
