// Copyright 2026 QubitOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Configuration management for the dynamics engine.
//!
//! Configuration is loaded from multiple sources with the following priority
//! (later sources override earlier ones):
//!
//! 1. Built-in defaults
//! 2. config.yaml file
//! 3. Environment variables (QUBITOS_DYN_*, QUBITOS_LOG_LEVEL)
//! 4. CLI arguments

use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;

use crate::error::{Error, Result};
use crate::method::Method;

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Solver settings
    #[serde(default)]
    pub solver: SolverConfig,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from file and environment.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let mut config = Config::default();

        if let Some(path) = config_path {
            if path.exists() {
                let content = std::fs::read_to_string(path)?;
                config = serde_yaml::from_str(&content)?;
            }
        } else {
            for path in &["qubitos-dyn.yaml", "qubitos-dyn.yml"] {
                let path = Path::new(path);
                if path.exists() {
                    let content = std::fs::read_to_string(path)?;
                    config = serde_yaml::from_str(&content)?;
                    break;
                }
            }
        }

        config.apply_env_overrides()?;

        Ok(config)
    }

    /// Apply environment variable overrides.
    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(val) = env::var("QUBITOS_DYN_METHOD") {
            self.solver.method = val.parse()?;
        }
        if let Ok(val) = env::var("QUBITOS_DYN_RTOL") {
            if let Ok(rtol) = val.parse() {
                self.solver.rtol = rtol;
            }
        }
        if let Ok(val) = env::var("QUBITOS_DYN_ATOL") {
            if let Ok(atol) = val.parse() {
                self.solver.atol = atol;
            }
        }
        if let Ok(val) = env::var("QUBITOS_DYN_MAX_STEPS") {
            if let Ok(max_steps) = val.parse() {
                self.solver.max_steps = max_steps;
            }
        }
        if let Ok(val) = env::var("QUBITOS_LOG_LEVEL") {
            self.logging.level = val;
        }
        Ok(())
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<()> {
        self.solver.validate()
    }
}

/// Step-method selection and step-control parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolverConfig {
    /// Step method
    #[serde(default)]
    pub method: Method,

    /// Relative tolerance for adaptive stepping
    #[serde(default = "default_tolerance")]
    pub rtol: f64,

    /// Absolute tolerance for adaptive stepping
    #[serde(default = "default_tolerance")]
    pub atol: f64,

    /// Smallest step the controller may propose before giving up
    #[serde(default = "default_min_step")]
    pub min_step: f64,

    /// Largest step the controller may take (unbounded when absent)
    #[serde(default)]
    pub max_step: Option<f64>,

    /// Budget of step attempts (accepted plus rejected)
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,

    /// Take steps of exactly `dt` instead of adapting
    #[serde(default)]
    pub fixed_step: bool,

    /// Step size for fixed stepping
    #[serde(default)]
    pub dt: Option<f64>,

    /// First step size for adaptive stepping (heuristic when absent)
    #[serde(default)]
    pub initial_step: Option<f64>,

    /// Safety factor applied to the optimal step estimate
    #[serde(default = "default_safety_factor")]
    pub safety_factor: f64,

    /// Lower bound on the step-size change factor
    #[serde(default = "default_min_factor")]
    pub min_factor: f64,

    /// Upper bound on the step-size change factor
    #[serde(default = "default_max_factor")]
    pub max_factor: f64,

    /// Consecutive rejections tolerated before failing
    #[serde(default = "default_max_rejections")]
    pub max_rejections: usize,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            method: Method::default(),
            rtol: default_tolerance(),
            atol: default_tolerance(),
            min_step: default_min_step(),
            max_step: None,
            max_steps: default_max_steps(),
            fixed_step: false,
            dt: None,
            initial_step: None,
            safety_factor: default_safety_factor(),
            min_factor: default_min_factor(),
            max_factor: default_max_factor(),
            max_rejections: default_max_rejections(),
        }
    }
}

impl SolverConfig {
    /// Adaptive stepping with the given method and default tolerances.
    pub fn adaptive(method: Method) -> Self {
        Self {
            method,
            ..Self::default()
        }
    }

    /// Fixed stepping with step size `dt`.
    pub fn fixed(method: Method, dt: f64) -> Self {
        Self {
            method,
            fixed_step: true,
            dt: Some(dt),
            ..Self::default()
        }
    }

    /// Replace the tolerances.
    pub fn with_tolerances(mut self, rtol: f64, atol: f64) -> Self {
        self.rtol = rtol;
        self.atol = atol;
        self
    }

    /// Replace the step budget.
    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    /// Whether the controller adapts the step size.
    pub fn is_adaptive(&self) -> bool {
        !self.fixed_step
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        // checked in fixed mode too
        if !(self.rtol.is_finite() && self.rtol > 0.0) {
            return Err(Error::Config(format!(
                "rtol must be positive and finite, got {}",
                self.rtol
            )));
        }
        if !(self.atol.is_finite() && self.atol > 0.0) {
            return Err(Error::Config(format!(
                "atol must be positive and finite, got {}",
                self.atol
            )));
        }
        if self.fixed_step {
            match self.dt {
                Some(dt) if dt.is_finite() && dt > 0.0 => {}
                Some(dt) => {
                    return Err(Error::Config(format!(
                        "fixed step size must be positive and finite, got {}",
                        dt
                    )))
                }
                None => {
                    return Err(Error::Config(
                        "fixed stepping requires a step size (dt)".into(),
                    ))
                }
            }
        } else {
            if !self.method.has_error_estimate() {
                return Err(Error::Config(format!(
                    "method '{}' has no error estimate; use fixed stepping with dt",
                    self.method.name()
                )));
            }
        }

        if !(self.min_step.is_finite() && self.min_step >= 0.0) {
            return Err(Error::Config(format!(
                "min_step must be non-negative and finite, got {}",
                self.min_step
            )));
        }
        if let Some(max_step) = self.max_step {
            if !(max_step > 0.0) {
                return Err(Error::Config(format!(
                    "max_step must be positive, got {}",
                    max_step
                )));
            }
            if self.min_step > max_step {
                return Err(Error::Config(format!(
                    "min_step ({}) exceeds max_step ({})",
                    self.min_step, max_step
                )));
            }
        }
        if let Some(h0) = self.initial_step {
            if !(h0.is_finite() && h0 > 0.0) {
                return Err(Error::Config(format!(
                    "initial_step must be positive and finite, got {}",
                    h0
                )));
            }
            if h0 < self.min_step {
                return Err(Error::Config(format!(
                    "initial_step ({}) is below min_step ({})",
                    h0, self.min_step
                )));
            }
            if let Some(max_step) = self.max_step.filter(|&m| h0 > m) {
                return Err(Error::Config(format!(
                    "initial_step ({}) exceeds max_step ({})",
                    h0, max_step
                )));
            }
        }
        if self.max_steps == 0 {
            return Err(Error::Config("max_steps must be at least 1".into()));
        }
        if !(self.safety_factor > 0.0 && self.safety_factor <= 1.0) {
            return Err(Error::Config(format!(
                "safety_factor must be in (0, 1], got {}",
                self.safety_factor
            )));
        }
        if !(self.min_factor > 0.0 && self.min_factor < 1.0) {
            return Err(Error::Config(format!(
                "min_factor must be in (0, 1), got {}",
                self.min_factor
            )));
        }
        if !(self.max_factor.is_finite() && self.max_factor > 1.0) {
            return Err(Error::Config(format!(
                "max_factor must be finite and greater than 1, got {}",
                self.max_factor
            )));
        }
        if let Method::Krylov { subspace_dim } = self.method {
            if subspace_dim == 0 {
                return Err(Error::Config(
                    "krylov subspace dimension must be at least 1".into(),
                ));
            }
        }
        Ok(())
    }
}

fn default_tolerance() -> f64 {
    1e-6
}

fn default_min_step() -> f64 {
    1e-14
}

fn default_max_steps() -> usize {
    100_000
}

fn default_safety_factor() -> f64 {
    0.9
}

fn default_min_factor() -> f64 {
    0.2
}

fn default_max_factor() -> f64 {
    5.0
}

fn default_max_rejections() -> usize {
    50
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (json, pretty)
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "pretty".into()
}
