// Copyright 2026 QubitOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Error types for the dynamics engine.
//!
//! Construction problems (bad shapes, inconsistent configuration) surface as
//! [`Error::Shape`] or [`Error::Config`] before any integration starts.
//! Problems found while stepping carry the time and step size at which they
//! occurred in an [`IntegrationError`].

use std::fmt;

use thiserror::Error;

/// Result type alias for dynamics operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid solver or problem configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Dimension or layout mismatch between inputs
    #[error("Shape error: {0}")]
    Shape(String),

    /// The time stepper could not reach the requested time
    #[error("Integration failed: {0}")]
    Integration(#[from] IntegrationError),

    /// A gradient was requested but cannot be produced
    #[error("Gradient unavailable: {0}")]
    GradientUnavailable(#[from] GradientUnavailable),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

/// Why the stepper gave up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegrationFailure {
    /// The controller asked for a step below the configured minimum
    StepSizeUnderflow,
    /// The step budget ran out before the final save time
    MaxStepsExceeded,
    /// Too many consecutive rejected attempts
    TooManyRejections,
    /// The state picked up NaN or infinite entries
    NonFiniteState,
}

impl fmt::Display for IntegrationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            IntegrationFailure::StepSizeUnderflow => "step size underflow",
            IntegrationFailure::MaxStepsExceeded => "maximum number of steps exceeded",
            IntegrationFailure::TooManyRejections => "too many consecutive rejected steps",
            IntegrationFailure::NonFiniteState => "non-finite state",
        };
        f.write_str(msg)
    }
}

/// A failed integration, with the time reached and the last step size tried.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{failure} at t = {time:e} (step size {step:e})")]
pub struct IntegrationError {
    /// Failure category
    pub failure: IntegrationFailure,
    /// Time at which integration stopped
    pub time: f64,
    /// Last attempted step size (magnitude)
    pub step: f64,
}

impl IntegrationError {
    /// Build an error for the given failure at `time` with step `step`.
    pub fn new(failure: IntegrationFailure, time: f64, step: f64) -> Self {
        Self {
            failure,
            time,
            step: step.abs(),
        }
    }
}

/// Reasons a gradient request could not be honored.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GradientUnavailable {
    /// The forward solve failed, so there is nothing to differentiate
    #[error("forward solve failed: {0}")]
    ForwardFailed(IntegrationError),

    /// The backward (adjoint) integration failed
    #[error("backward solve failed: {0}")]
    BackwardFailed(IntegrationError),

    /// The selected step method has no adjoint formulation
    #[error("method '{0}' does not support gradients")]
    UnsupportedMethod(String),
}
