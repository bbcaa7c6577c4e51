// Copyright 2026 QubitOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! The time stepper.
//!
//! A solve walks the save times in order. Between two save times the
//! [`Integrator`] advances the state with the configured step method,
//! clipping steps so they land exactly on every save time and on every
//! coefficient discontinuity. A step never straddles a discontinuity, so
//! dense output is never needed: save times are hit directly.
//!
//! ```text
//!   Advancing ──► AwaitingSave ──► Advancing ... ──► Converged
//!       │
//!       └──► Failed (underflow, step budget, rejections, non-finite state)
//! ```
//!
//! In adaptive mode one scalar step size is shared by the whole batch; the
//! worst item decides acceptance.

pub mod control;

use ndarray::Array3;
use num_complex::Complex64;
use tracing::{debug, trace, warn};

use crate::config::SolverConfig;
use crate::error::{IntegrationError, IntegrationFailure};
use crate::generator::Dynamics;
use crate::method::{self, OdeVector, Propagator};
use crate::result::Diagnostics;

pub use control::{initial_step, StepController};

/// Where the solve loop is.
#[derive(Debug)]
enum Phase {
    /// Integrating towards save time `k`
    Advancing(usize),
    /// The state sits on save time `k`
    AwaitingSave(usize),
    Converged,
    Failed(IntegrationError),
}

/// Step counters shared by every interval of one integration.
#[derive(Debug, Clone, Copy, Default)]
pub struct StepStats {
    pub accepted: usize,
    pub rejected: usize,
    pub last_step: f64,
}

/// Drives a [`Propagator`] between stop times with step-size control.
#[derive(Debug)]
pub struct Integrator<'c> {
    config: &'c SolverConfig,
    controller: StepController,
    /// Magnitude of the next step to try
    step: f64,
    stats: StepStats,
}

impl<'c> Integrator<'c> {
    /// `order` feeds the controller exponent; `first_step` is the first
    /// magnitude to try (ignored in fixed-step mode).
    pub fn new(config: &'c SolverConfig, order: u32, first_step: f64) -> Self {
        let step = match (config.fixed_step, config.dt) {
            (true, Some(dt)) => dt,
            _ => first_step,
        };
        Self {
            config,
            controller: StepController::new(config, order),
            step,
            stats: StepStats::default(),
        }
    }

    pub fn stats(&self) -> StepStats {
        self.stats
    }

    /// Integrate `y` from `from` to `to`, in either direction.
    ///
    /// `breaks` are sorted times at which the generator may jump; steps stop
    /// on each one that lies strictly between `from` and `to`, and the
    /// propagator's caches are reset there.
    pub fn advance<V, P>(
        &mut self,
        prop: &mut P,
        mut y: V,
        from: f64,
        to: f64,
        breaks: &[f64],
    ) -> Result<V, IntegrationError>
    where
        V: OdeVector,
        P: Propagator<V> + ?Sized,
    {
        if from == to {
            return Ok(y);
        }
        let forward = to > from;
        let dir = if forward { 1.0 } else { -1.0 };

        let (lo, hi) = if forward { (from, to) } else { (to, from) };
        let mut stops: Vec<(f64, bool)> = breaks
            .iter()
            .filter(|&&b| b > lo && b < hi)
            .map(|&b| (b, true))
            .collect();
        if !forward {
            stops.reverse();
        }
        stops.push((to, breaks.contains(&to)));

        let mut t = from;
        let mut rejections = 0;
        // the latest rejection was caused by a NaN or infinite candidate
        let mut blew_up = false;
        for (stop, is_break) in stops {
            while t != stop {
                if self.stats.accepted + self.stats.rejected >= self.config.max_steps {
                    let failure = if blew_up {
                        IntegrationFailure::NonFiniteState
                    } else {
                        IntegrationFailure::MaxStepsExceeded
                    };
                    return Err(self.fail(failure, t, self.step));
                }

                let remaining = (stop - t).abs();
                let clipped = remaining <= self.step * (1.0 + 1e-8);
                let h = if clipped { remaining } else { self.step };
                let attempt = prop.attempt(t, dir * h, &y);
                let finite = attempt.y.is_finite();

                if self.config.fixed_step {
                    if !finite {
                        return Err(self.fail(IntegrationFailure::NonFiniteState, t, h));
                    }
                    t = if clipped { stop } else { t + dir * h };
                    y = attempt.y;
                    prop.accept(t);
                    self.stats.accepted += 1;
                    self.stats.last_step = h;
                    continue;
                }

                let ratio = if !finite {
                    f64::INFINITY
                } else {
                    match &attempt.error {
                        Some(err) => {
                            let (rtol, atol) = (self.config.rtol, self.config.atol);
                            let r = V::error_ratio(err, &y, &attempt.y, rtol, atol);
                            if r.is_nan() {
                                f64::INFINITY
                            } else {
                                r
                            }
                        }
                        None => 0.0,
                    }
                };

                if ratio <= 1.0 {
                    t = if clipped { stop } else { t + dir * h };
                    y = attempt.y;
                    prop.accept(t);
                    self.stats.accepted += 1;
                    self.stats.last_step = h;
                    rejections = 0;
                    blew_up = false;

                    let mut next = h * self.controller.factor(ratio, true);
                    if clipped {
                        next = next.max(self.step);
                    }
                    if let Some(max_step) = self.config.max_step {
                        next = next.min(max_step);
                    }
                    trace!(t, h, ratio, next, "step accepted");
                    self.step = next;
                } else {
                    self.stats.rejected += 1;
                    rejections += 1;
                    blew_up = !finite;
                    let next = h * self.controller.factor(ratio, false);
                    trace!(t, h, ratio, next, finite, "step rejected");
                    // a blown-up candidate outranks the controller's failure modes
                    if rejections > self.config.max_rejections {
                        let failure = if blew_up {
                            IntegrationFailure::NonFiniteState
                        } else {
                            IntegrationFailure::TooManyRejections
                        };
                        return Err(self.fail(failure, t, h));
                    }
                    if next < self.config.min_step {
                        let failure = if blew_up {
                            IntegrationFailure::NonFiniteState
                        } else {
                            IntegrationFailure::StepSizeUnderflow
                        };
                        return Err(self.fail(failure, t, next));
                    }
                    self.step = next;
                }
            }
            if is_break {
                prop.reset();
            }
        }
        Ok(y)
    }

    fn fail(&self, failure: IntegrationFailure, t: f64, step: f64) -> IntegrationError {
        warn!(
            failure = %failure,
            t,
            step,
            accepted = self.stats.accepted,
            rejected = self.stats.rejected,
            "integration failed"
        );
        IntegrationError::new(failure, t, step)
    }
}

/// Raw output of a forward integration.
#[derive(Debug, Clone)]
pub struct Trajectory {
    /// One batched state per save time
    pub states: Vec<Array3<Complex64>>,
    pub diagnostics: Diagnostics,
}

/// First step magnitude for a forward solve.
pub(crate) fn first_step(
    config: &SolverConfig,
    dynamics: &Dynamics<'_>,
    y0: &Array3<Complex64>,
    t0: f64,
    t_end: f64,
) -> f64 {
    if let Some(h) = config.initial_step {
        return h;
    }
    let f0 = dynamics.rhs(method::interior(t0, t0, t_end), y0);
    initial_step(config, y0.max_norm(), f0.max_norm(), t_end - t0)
}

/// Integrate `y0` from `t0` through every save time.
///
/// `save_times` must be non-empty, strictly increasing and not before `t0`;
/// the problem builder guarantees all three.
pub fn integrate(
    dynamics: &Dynamics<'_>,
    y0: Array3<Complex64>,
    t0: f64,
    save_times: &[f64],
    config: &SolverConfig,
) -> Result<Trajectory, IntegrationError> {
    let t_end = save_times.last().copied().unwrap_or(t0);
    let breaks = dynamics.generator().discontinuities();
    let mut prop = method::build(config.method, dynamics);
    debug!(
        method = prop.name(),
        batch = y0.shape()[0],
        dim = y0.shape()[1],
        saves = save_times.len(),
        t0,
        t_end,
        "starting solve"
    );

    if !OdeVector::is_finite(&y0) {
        return Err(IntegrationError::new(IntegrationFailure::NonFiniteState, t0, 0.0));
    }

    let h0 = first_step(config, dynamics, &y0, t0, t_end);
    let mut integrator = Integrator::new(config, prop.order(), h0);
    let mut states = Vec::with_capacity(save_times.len());
    let mut y = y0;
    let mut t = t0;
    let mut phase = Phase::Advancing(0);

    loop {
        phase = match phase {
            Phase::Advancing(k) => {
                let target = save_times[k];
                match integrator.advance(prop.as_mut(), y.clone(), t, target, &breaks) {
                    Ok(next) => {
                        y = next;
                        t = target;
                        Phase::AwaitingSave(k)
                    }
                    Err(err) => Phase::Failed(err),
                }
            }
            Phase::AwaitingSave(k) => {
                states.push(y.clone());
                if k + 1 == save_times.len() {
                    Phase::Converged
                } else {
                    Phase::Advancing(k + 1)
                }
            }
            Phase::Converged => break,
            Phase::Failed(err) => return Err(err),
        };
    }

    let stats = integrator.stats();
    let diagnostics = Diagnostics {
        method: prop.name().to_string(),
        accepted_steps: stats.accepted,
        rejected_steps: stats.rejected,
        final_step: stats.last_step,
        rhs_evaluations: prop.evaluations(),
    };
    debug!(
        accepted = diagnostics.accepted_steps,
        rejected = diagnostics.rejected_steps,
        evaluations = diagnostics.rhs_evaluations,
        "solve converged"
    );
    Ok(Trajectory {
        states,
        diagnostics,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::Generator;
    use crate::method::Method;
    use crate::operator::standard::{sigma_x, sigma_z};
    use crate::operator::{Coefficient, Operator};
    use crate::state::StateKind;
    use approx::assert_relative_eq;
    use std::f64::consts::PI;

    fn ground() -> Array3<Complex64> {
        let mut y = Array3::zeros((1, 2, 1));
        y[[0, 0, 0]] = Complex64::new(1.0, 0.0);
        y
    }

    fn rabi(config: &SolverConfig, save_times: &[f64]) -> Result<Trajectory, IntegrationError> {
        let h = Operator::constant(sigma_x()).unwrap();
        let gen = Generator::new(&h, &[], StateKind::Ket).unwrap();
        let dynamics = Dynamics::new(gen, &[]);
        integrate(&dynamics, ground(), 0.0, save_times, config)
    }

    #[test]
    fn test_adaptive_rabi_hits_save_times() {
        let config = SolverConfig::adaptive(Method::Dopri5).with_tolerances(1e-9, 1e-9);
        let times = [0.0, PI / 4.0, PI / 2.0];
        let traj = rabi(&config, &times).unwrap();
        assert_eq!(traj.states.len(), 3);
        assert_relative_eq!(traj.states[0][[0, 0, 0]].re, 1.0);
        // |⟨1|ψ(π/2)⟩| = 1
        assert_relative_eq!(traj.states[2][[0, 1, 0]].norm(), 1.0, epsilon = 1e-7);
        assert!(traj.diagnostics.accepted_steps > 0);
        assert_eq!(traj.diagnostics.method, "dopri5");
    }

    #[test]
    fn test_fixed_step_counts() {
        let config = SolverConfig::fixed(Method::Rk4, 0.1);
        let traj = rabi(&config, &[1.0]).unwrap();
        assert_eq!(traj.diagnostics.accepted_steps, 10);
        assert_eq!(traj.diagnostics.rejected_steps, 0);
        assert_eq!(traj.diagnostics.rhs_evaluations, 40);
    }

    #[test]
    fn test_steps_stop_on_discontinuities() {
        // ε(t) = 1 on [0, 0.35), 2 on [0.35, 1): exact phase is 0.35 + 1.3
        let eps = Coefficient::pwc(
            vec![0.0, 0.35, 1.0],
            vec![Complex64::new(1.0, 0.0), Complex64::new(2.0, 0.0)],
        )
        .unwrap();
        let h = Operator::new(vec![(sigma_z(), eps)]).unwrap();
        let gen = Generator::new(&h, &[], StateKind::Ket).unwrap();
        let dynamics = Dynamics::new(gen, &[]);
        let config = SolverConfig::fixed(Method::Rk4, 0.1);
        let traj = integrate(&dynamics, ground(), 0.0, &[1.0], &config).unwrap();
        // 0.0 .. 0.3 (3 steps), 0.35 (clipped), 0.45 .. 0.95 (6), 1.0 (clipped)
        assert_eq!(traj.diagnostics.accepted_steps, 11);
        let phase = traj.states[0][[0, 0, 0]];
        let expected = Complex64::new(0.0, -1.65).exp();
        assert_relative_eq!((phase - expected).norm(), 0.0, epsilon = 1e-4);
    }

    #[test]
    fn test_max_steps_exceeded() {
        let config = SolverConfig::fixed(Method::Euler, 0.01).with_max_steps(5);
        let err = rabi(&config, &[1.0]).unwrap_err();
        assert_eq!(err.failure, IntegrationFailure::MaxStepsExceeded);
        assert_relative_eq!(err.time, 0.05, epsilon = 1e-12);
    }

    #[test]
    fn test_non_finite_initial_state() {
        let config = SolverConfig::default();
        let h = Operator::constant(sigma_x()).unwrap();
        let gen = Generator::new(&h, &[], StateKind::Ket).unwrap();
        let dynamics = Dynamics::new(gen, &[]);
        let mut y = ground();
        y[[0, 1, 0]] = Complex64::new(f64::NAN, 0.0);
        let err = integrate(&dynamics, y, 0.0, &[1.0], &config).unwrap_err();
        assert_eq!(err.failure, IntegrationFailure::NonFiniteState);
        assert_eq!(err.time, 0.0);
    }

    #[test]
    fn test_step_size_underflow() {
        // A huge generator with tight tolerances cannot be resolved above min_step
        let h = Operator::constant(sigma_x() * Complex64::new(1e8, 0.0)).unwrap();
        let gen = Generator::new(&h, &[], StateKind::Ket).unwrap();
        let dynamics = Dynamics::new(gen, &[]);
        let mut config = SolverConfig::adaptive(Method::Tsit5).with_tolerances(1e-10, 1e-10);
        config.min_step = 1e-6;
        config.initial_step = Some(1e-3);
        let err = integrate(&dynamics, ground(), 0.0, &[1.0], &config).unwrap_err();
        assert_eq!(err.failure, IntegrationFailure::StepSizeUnderflow);
        assert_eq!(err.time, 0.0);
    }

    fn blowing_up(after: f64) -> Operator {
        let eps = Coefficient::modulated(move |t| {
            if t > after {
                Complex64::new(f64::NAN, 0.0)
            } else {
                Complex64::new(1.0, 0.0)
            }
        });
        Operator::new(vec![(sigma_x(), eps)]).unwrap()
    }

    #[test]
    fn test_adaptive_non_finite_is_reported_as_such() {
        for method in [Method::Dopri5, Method::Tsit5, Method::Dopri8] {
            let h = blowing_up(0.5);
            let gen = Generator::new(&h, &[], StateKind::Ket).unwrap();
            let dynamics = Dynamics::new(gen, &[]);
            let config = SolverConfig::adaptive(method);
            let err = integrate(&dynamics, ground(), 0.0, &[1.0], &config).unwrap_err();
            assert_eq!(err.failure, IntegrationFailure::NonFiniteState, "{}", method);
            assert!(err.time > 0.4 && err.time <= 0.5, "{}: {}", method, err.time);
        }
    }

    #[test]
    fn test_adaptive_non_finite_from_the_start() {
        let h = blowing_up(-1.0);
        let gen = Generator::new(&h, &[], StateKind::Ket).unwrap();
        let dynamics = Dynamics::new(gen, &[]);
        let mut config = SolverConfig::adaptive(Method::Dopri5);
        config.initial_step = Some(0.1);
        let err = integrate(&dynamics, ground(), 0.0, &[1.0], &config).unwrap_err();
        assert_eq!(err.failure, IntegrationFailure::NonFiniteState);
        assert_eq!(err.time, 0.0);

        // the same holds when the rejection budget runs out first
        config.max_rejections = 3;
        let err = integrate(&dynamics, ground(), 0.0, &[1.0], &config).unwrap_err();
        assert_eq!(err.failure, IntegrationFailure::NonFiniteState);
    }

    #[test]
    fn test_backward_advance_returns_to_start() {
        let h = Operator::constant(sigma_x()).unwrap();
        let gen = Generator::new(&h, &[], StateKind::Ket).unwrap();
        let dynamics = Dynamics::new(gen, &[]);
        let config = SolverConfig::adaptive(Method::Dopri5).with_tolerances(1e-10, 1e-10);
        let mut prop = method::build(config.method, &dynamics);
        let mut integrator = Integrator::new(&config, 5, 0.01);
        let y1 = integrator
            .advance(prop.as_mut(), ground(), 0.0, 1.0, &[])
            .unwrap();
        prop.reset();
        let back = integrator.advance(prop.as_mut(), y1, 1.0, 0.0, &[]).unwrap();
        let diff = back[[0, 0, 0]] - Complex64::new(1.0, 0.0);
        assert_relative_eq!(diff.norm(), 0.0, epsilon = 1e-8);
    }
}
