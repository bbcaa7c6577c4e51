// Copyright 2026 QubitOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Step-size control.
//!
//! Ref: Hairer, Nørsett & Wanner, "Solving Ordinary Differential Equations I"
//! (1993), §II.4, eq. (4.13) and the starting-step heuristic of §II.4.

use crate::config::SolverConfig;

/// Proposes the next step size from a normalized error.
#[derive(Debug, Clone, Copy)]
pub struct StepController {
    safety: f64,
    min_factor: f64,
    max_factor: f64,
    exponent: f64,
}

impl StepController {
    pub fn new(config: &SolverConfig, order: u32) -> Self {
        Self {
            safety: config.safety_factor,
            min_factor: config.min_factor,
            max_factor: config.max_factor,
            exponent: 1.0 / f64::from(order.max(1)),
        }
    }

    /// Multiplier for the step that produced `ratio`. Never grows the step
    /// after a rejection.
    pub fn factor(&self, ratio: f64, accepted: bool) -> f64 {
        let factor = if ratio.is_nan() || ratio.is_infinite() {
            self.min_factor
        } else if ratio == 0.0 {
            self.max_factor
        } else {
            (self.safety * ratio.powf(-self.exponent)).clamp(self.min_factor, self.max_factor)
        };
        if accepted {
            factor
        } else {
            factor.min(1.0)
        }
    }
}

/// Starting step `0.01 ‖y₀‖ / ‖f(t₀, y₀)‖`, or `1e-6` when either norm is
/// negligible, clamped to the configured bounds and to `span`.
pub fn initial_step(config: &SolverConfig, y_norm: f64, f_norm: f64, span: f64) -> f64 {
    let mut h = if y_norm < 1e-5 || f_norm < 1e-5 {
        1e-6
    } else {
        0.01 * y_norm / f_norm
    };
    if let Some(max_step) = config.max_step {
        h = h.min(max_step);
    }
    if span > 0.0 {
        h = h.min(span);
    }
    h.max(config.min_step)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::method::Method;
    use approx::assert_relative_eq;

    #[test]
    fn test_factor_bounds() {
        let config = SolverConfig::default();
        let ctl = StepController::new(&config, 5);
        assert_relative_eq!(ctl.factor(0.0, true), config.max_factor);
        assert_relative_eq!(ctl.factor(1e-12, true), config.max_factor);
        assert_relative_eq!(ctl.factor(1e12, false), config.min_factor);
        assert_relative_eq!(ctl.factor(f64::NAN, false), config.min_factor);
        assert_relative_eq!(ctl.factor(1.0, true), config.safety_factor);
        let f = ctl.factor(32.0, false);
        assert_relative_eq!(f, config.safety_factor * 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_rejection_never_grows() {
        let mut config = SolverConfig::default();
        config.safety_factor = 1.0;
        let ctl = StepController::new(&config, 5);
        assert!(ctl.factor(1.000_001, false) <= 1.0);
    }

    #[test]
    fn test_initial_step_heuristic() {
        let config = SolverConfig::adaptive(Method::Dopri5);
        assert_relative_eq!(initial_step(&config, 1.0, 2.0, 10.0), 0.005);
        assert_relative_eq!(initial_step(&config, 1.0, 0.0, 10.0), 1e-6);
        assert_relative_eq!(initial_step(&config, 1.0, 1e-4, 0.5), 0.5);

        let mut bounded = config.clone();
        bounded.max_step = Some(0.001);
        assert_relative_eq!(initial_step(&bounded, 1.0, 2.0, 10.0), 0.001);
    }
}
