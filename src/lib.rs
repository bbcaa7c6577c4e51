// Copyright 2026 QubitOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! QubitOS Dynamics
//!
//! A differentiable time-integration engine for closed (Schrödinger) and
//! open (Lindblad) quantum systems, with adjoint gradients of any scalar
//! function of the result.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │        Problem  (builder, validation)    │
//! ├──────────────────┬──────────────────────┤
//! │   solve()        │   value_and_grad()   │
//! │                  │   (adjoint pass)     │
//! ├──────────────────┴──────────────────────┤
//! │     Time stepper (step-size control)     │
//! ├────────────────┬────────────────────────┤
//! │ Runge–Kutta    │ Expm / Krylov /        │
//! │ (tableaux)     │ Rouchon                │
//! ├────────────────┴────────────────────────┤
//! │   Generator  (H, jump operators, θ)      │
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`operator`]: Time- and parameter-dependent operators
//! - [`state`]: Batched kets and density matrices
//! - [`generator`]: Schrödinger and Lindblad right-hand sides
//! - [`method`]: Single-step integration methods
//! - [`stepper`]: Adaptive and fixed-step time stepping
//! - [`problem`]: Validated simulation requests
//! - [`result`]: Solutions and diagnostics
//! - [`adjoint`]: Objectives and adjoint gradients
//! - [`config`]: Configuration management
//! - [`error`]: Error types
//!
//! # Example
//!
//! ```
//! use qubit_os_dynamics::operator::standard::{basis, sigma_x, sigma_z};
//! use qubit_os_dynamics::{Operator, SolverConfig, State};
//!
//! let h = Operator::constant(sigma_x()).unwrap();
//! let psi0 = State::ket(basis(2, 0)).unwrap();
//! let sz = Operator::constant(sigma_z()).unwrap();
//! let sol = qubit_os_dynamics::solve(
//!     h,
//!     vec![],
//!     psi0,
//!     vec![0.0, std::f64::consts::FRAC_PI_2],
//!     vec![sz],
//!     SolverConfig::default(),
//! )
//! .unwrap();
//! assert!((sol.expect(0, 0)[1].re + 1.0).abs() < 1e-4);
//! ```

pub mod adjoint;
pub mod config;
pub mod error;
pub mod generator;
pub mod method;
pub mod operator;
pub mod problem;
pub mod result;
pub mod state;
pub mod stepper;

pub use adjoint::{ExpectationObjective, FidelityObjective, Gradients, Objective};
pub use config::{Config, SolverConfig};
pub use error::{Error, Result};
pub use method::Method;
pub use operator::{Coefficient, MatrixFunction, Operator};
pub use problem::{Problem, ProblemBuilder};
pub use result::{Diagnostics, Solution};
pub use state::{State, StateKind};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Solve the Schrödinger equation (no jump operators) or the Lindblad master
/// equation from `initial` through `save_times`.
///
/// Integration starts at the first save time. Use [`Problem::builder`] for a
/// different start time or for parametrized operators.
pub fn solve(
    hamiltonian: Operator,
    jump_ops: Vec<Operator>,
    initial: State,
    save_times: Vec<f64>,
    observables: Vec<Operator>,
    config: SolverConfig,
) -> Result<Solution> {
    Problem::builder(hamiltonian, initial)
        .jump_ops(jump_ops)
        .save_times(save_times)
        .observables(observables)
        .config(config)
        .build()?
        .solve()
}
