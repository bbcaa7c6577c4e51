// Copyright 2026 QubitOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Simulation requests.
//!
//! A [`Problem`] is assembled once through [`ProblemBuilder`], which checks
//! every shape and index up front, and is read-only afterwards. Solving the
//! same problem twice gives identical results, and several threads may
//! solve one problem concurrently.
//!
//! Parameters come as one row θ shared by every batch item, or as a
//! parameter batch with one row per item. A single initial state is
//! replicated across the rows of a parameter batch.

use ndarray::Array3;
use tracing::debug;

use crate::adjoint::{self, Gradients, Objective};
use crate::config::SolverConfig;
use crate::error::{Error, Result};
use crate::generator::{Dynamics, Generator};
use crate::operator::Operator;
use crate::result::Solution;
use crate::state::{State, StateKind};
use crate::stepper::{self, Trajectory};

/// An immutable simulation request.
#[derive(Debug, Clone)]
pub struct Problem {
    hamiltonian: Operator,
    jump_ops: Vec<Operator>,
    initial: State,
    /// The ket batch the caller supplied, when it was promoted to densities
    promoted_from: Option<State>,
    t0: f64,
    save_times: Vec<f64>,
    observables: Vec<Operator>,
    /// At least one row; several rows pair up with the batch items
    params: Vec<Vec<f64>>,
    /// The caller supplied one state that was replicated across the rows
    broadcast: bool,
    config: SolverConfig,
}

impl Problem {
    /// Start building a problem for `hamiltonian` and `initial`.
    pub fn builder(hamiltonian: Operator, initial: State) -> ProblemBuilder {
        ProblemBuilder {
            hamiltonian,
            initial,
            jump_ops: Vec::new(),
            save_times: Vec::new(),
            t0: None,
            observables: Vec::new(),
            params: vec![Vec::new()],
            config: SolverConfig::default(),
        }
    }

    pub fn hamiltonian(&self) -> &Operator {
        &self.hamiltonian
    }

    pub fn jump_ops(&self) -> &[Operator] {
        &self.jump_ops
    }

    /// Initial state as integrated (density matrices if jumps are present).
    pub fn initial(&self) -> &State {
        &self.initial
    }

    /// The kets before promotion to density matrices, if they were promoted
    /// (replicated like [`initial`](Problem::initial) for a parameter batch).
    pub fn promoted_from(&self) -> Option<&State> {
        self.promoted_from.as_ref()
    }

    pub fn start_time(&self) -> f64 {
        self.t0
    }

    pub fn save_times(&self) -> &[f64] {
        &self.save_times
    }

    pub fn observables(&self) -> &[Operator] {
        &self.observables
    }

    /// The parameter vector, or the first row of a parameter batch.
    pub fn params(&self) -> &[f64] {
        self.params.first().map(Vec::as_slice).unwrap_or_default()
    }

    /// Every parameter row.
    pub fn param_batch(&self) -> &[Vec<f64>] {
        &self.params
    }

    pub fn is_param_batched(&self) -> bool {
        self.params.len() > 1
    }

    /// Whether the initial state was replicated across parameter rows.
    pub fn is_broadcast(&self) -> bool {
        self.broadcast
    }

    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    pub fn kind(&self) -> StateKind {
        self.initial.kind()
    }

    /// The generator of this problem.
    pub fn generator(&self) -> Result<Generator<'_>> {
        Generator::new(&self.hamiltonian, &self.jump_ops, self.initial.kind())
    }

    /// Run the forward integration and package the result.
    pub fn solve(&self) -> Result<Solution> {
        let dynamics = Dynamics::batched(self.generator()?, &self.params);
        let trajectory = stepper::integrate(
            &dynamics,
            self.initial.data().clone(),
            self.t0,
            &self.save_times,
            &self.config,
        )?;
        self.package(trajectory)
    }

    /// Solve and differentiate `objective` with the adjoint method.
    pub fn value_and_grad<O: Objective + ?Sized>(
        &self,
        objective: &O,
    ) -> Result<(Solution, Gradients)> {
        adjoint::value_and_grad(self, objective)
    }

    /// Same problem with a new parameter vector of the same length.
    pub fn with_params(&self, params: Vec<f64>) -> Result<Problem> {
        if self.is_param_batched() {
            return Err(Error::Shape(format!(
                "problem has {} parameter rows; use with_param_batch",
                self.params.len()
            )));
        }
        self.with_param_batch(vec![params])
    }

    /// Same problem with new parameter rows, as many and as long as before.
    pub fn with_param_batch(&self, rows: Vec<Vec<f64>>) -> Result<Problem> {
        if rows.len() != self.params.len() {
            return Err(Error::Shape(format!(
                "expected {} parameter rows, got {}",
                self.params.len(),
                rows.len()
            )));
        }
        let expected = self.params().len();
        for row in &rows {
            if row.len() != expected {
                return Err(Error::Shape(format!(
                    "expected {} parameters, got {}",
                    expected,
                    row.len()
                )));
            }
            check_finite_params(row)?;
            self.check_callable_shapes(row)?;
        }
        Ok(Problem {
            params: rows,
            ..self.clone()
        })
    }

    /// Same problem from a different initial state.
    pub fn with_initial(&self, initial: State) -> Result<Problem> {
        let (initial, promoted_from) =
            prepare_initial(initial, &self.hamiltonian, &self.jump_ops)?;
        let (initial, promoted_from, broadcast) =
            broadcast_initial(initial, promoted_from, self.params.len())?;
        Ok(Problem {
            initial,
            promoted_from,
            broadcast,
            ..self.clone()
        })
    }

    fn operators(&self) -> impl Iterator<Item = &Operator> {
        std::iter::once(&self.hamiltonian)
            .chain(&self.jump_ops)
            .chain(&self.observables)
    }

    fn check_callable_shapes(&self, params: &[f64]) -> Result<()> {
        self.operators()
            .try_for_each(|op| op.check_shape(self.t0, params))
    }

    pub(crate) fn package(&self, trajectory: Trajectory) -> Result<Solution> {
        let states = trajectory
            .states
            .into_iter()
            .map(|data| State::from_batch(self.initial.kind(), data))
            .collect::<Result<Vec<_>>>()?;
        Ok(Solution::assemble(
            self.save_times.clone(),
            states,
            &self.observables,
            &self.params,
            trajectory.diagnostics,
        ))
    }
}

/// Collects the parts of a [`Problem`] and validates them in [`build`].
///
/// [`build`]: ProblemBuilder::build
#[derive(Debug)]
pub struct ProblemBuilder {
    hamiltonian: Operator,
    initial: State,
    jump_ops: Vec<Operator>,
    save_times: Vec<f64>,
    t0: Option<f64>,
    observables: Vec<Operator>,
    params: Vec<Vec<f64>>,
    config: SolverConfig,
}

impl ProblemBuilder {
    /// Jump operators with rates folded in (`L = √γ A`).
    pub fn jump_ops(mut self, ops: Vec<Operator>) -> Self {
        self.jump_ops = ops;
        self
    }

    pub fn jump_op(mut self, op: Operator) -> Self {
        self.jump_ops.push(op);
        self
    }

    /// Strictly increasing save times.
    pub fn save_times(mut self, times: impl IntoIterator<Item = f64>) -> Self {
        self.save_times = times.into_iter().collect();
        self
    }

    /// Start of integration; defaults to the first save time.
    pub fn start_time(mut self, t0: f64) -> Self {
        self.t0 = Some(t0);
        self
    }

    pub fn observables(mut self, ops: Vec<Operator>) -> Self {
        self.observables = ops;
        self
    }

    pub fn observable(mut self, op: Operator) -> Self {
        self.observables.push(op);
        self
    }

    /// Parameter vector θ read by parametric coefficients.
    pub fn params(mut self, params: Vec<f64>) -> Self {
        self.params = vec![params];
        self
    }

    /// One parameter vector per batch item. The initial state must hold
    /// either one state, which is replicated, or one state per row.
    pub fn param_batch(mut self, rows: Vec<Vec<f64>>) -> Self {
        self.params = rows;
        self
    }

    pub fn config(mut self, config: SolverConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Result<Problem> {
        self.config.validate()?;

        let first = *self
            .save_times
            .first()
            .ok_or_else(|| Error::Config("at least one save time is required".into()))?;
        if self.save_times.iter().any(|t| !t.is_finite()) {
            return Err(Error::Config("save times must be finite".into()));
        }
        if self.save_times.windows(2).any(|w| w[1] <= w[0]) {
            return Err(Error::Config("save times must be strictly increasing".into()));
        }
        let t0 = self.t0.unwrap_or(first);
        if !t0.is_finite() || t0 > first {
            return Err(Error::Config(format!(
                "start time {} must be finite and not after the first save time {}",
                t0, first
            )));
        }

        let dim = self.hamiltonian.dim();
        for (k, op) in self.jump_ops.iter().enumerate() {
            check_dim(op, dim, &format!("jump operator {}", k))?;
        }
        for (k, op) in self.observables.iter().enumerate() {
            check_dim(op, dim, &format!("observable {}", k))?;
        }

        let num_params = match self.params.first() {
            Some(row) => row.len(),
            None => {
                return Err(Error::Shape(
                    "parameter batch needs at least one row".into(),
                ))
            }
        };
        for (r, row) in self.params.iter().enumerate() {
            if row.len() != num_params {
                return Err(Error::Shape(format!(
                    "parameter row {} has {} entries, row 0 has {}",
                    r,
                    row.len(),
                    num_params
                )));
            }
            check_finite_params(row)?;
        }
        let max_index = std::iter::once(&self.hamiltonian)
            .chain(&self.jump_ops)
            .chain(&self.observables)
            .filter_map(Operator::max_param_index)
            .max();
        if let Some(index) = max_index {
            if index >= num_params {
                return Err(Error::Config(format!(
                    "parameter index {} out of range for {} parameters",
                    index, num_params
                )));
            }
        }

        let (initial, promoted_from) =
            prepare_initial(self.initial, &self.hamiltonian, &self.jump_ops)?;
        let (initial, promoted_from, broadcast) =
            broadcast_initial(initial, promoted_from, self.params.len())?;

        let problem = Problem {
            hamiltonian: self.hamiltonian,
            jump_ops: self.jump_ops,
            initial,
            promoted_from,
            t0,
            save_times: self.save_times,
            observables: self.observables,
            params: self.params,
            broadcast,
            config: self.config,
        };
        for row in &problem.params {
            problem.check_callable_shapes(row)?;
        }
        Ok(problem)
    }
}

fn check_dim(op: &Operator, dim: usize, what: &str) -> Result<()> {
    if op.dim() != dim {
        return Err(Error::Shape(format!(
            "{} has dimension {}, Hamiltonian has {}",
            what,
            op.dim(),
            dim
        )));
    }
    Ok(())
}

fn check_finite_params(params: &[f64]) -> Result<()> {
    match params.iter().position(|p| !p.is_finite()) {
        Some(i) => Err(Error::Config(format!("parameter {} is not finite", i))),
        None => Ok(()),
    }
}

/// Check the initial state against the Hamiltonian and promote kets to
/// density matrices when the evolution is dissipative.
fn prepare_initial(
    initial: State,
    hamiltonian: &Operator,
    jump_ops: &[Operator],
) -> Result<(State, Option<State>)> {
    if initial.dim() != hamiltonian.dim() {
        return Err(Error::Shape(format!(
            "initial state has dimension {}, Hamiltonian has {}",
            initial.dim(),
            hamiltonian.dim()
        )));
    }
    if jump_ops.is_empty() || initial.is_density() {
        return Ok((initial, None));
    }
    debug!(
        batch = initial.batch_size(),
        "promoting kets to density matrices for dissipative evolution"
    );
    Ok((initial.to_density(), Some(initial)))
}

/// Replicate a single initial state across `rows` parameter rows.
fn broadcast_initial(
    initial: State,
    promoted_from: Option<State>,
    rows: usize,
) -> Result<(State, Option<State>, bool)> {
    let batch = initial.batch_size();
    if rows <= 1 || batch == rows {
        return Ok((initial, promoted_from, false));
    }
    if batch != 1 {
        return Err(Error::Shape(format!(
            "initial batch of {} states does not match {} parameter rows",
            batch, rows
        )));
    }
    let replicate = |state: &State| -> Result<State> {
        let data = state.data();
        let (_, d, k) = data.dim();
        let tiled = Array3::from_shape_fn((rows, d, k), |(_, i, j)| data[[0, i, j]]);
        State::from_batch(state.kind(), tiled)
    };
    let promoted_from = promoted_from.as_ref().map(replicate).transpose()?;
    Ok((replicate(&initial)?, promoted_from, true))
}
