// Copyright 2026 QubitOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Solution assembly.
//!
//! The stepper hands over the raw states at every save time; this module
//! evaluates the observables on them and bundles everything with the solver
//! diagnostics. A [`Solution`] owns all of its data and does not borrow from
//! the problem that produced it.

use ndarray::{Array2, Array3, ArrayView1, ArrayView2, Axis};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use crate::generator::{inner, row_of};
use crate::operator::Operator;
use crate::state::{trace, State, StateKind};

/// Counters collected by the time stepper.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Diagnostics {
    /// Step method name
    pub method: String,
    pub accepted_steps: usize,
    pub rejected_steps: usize,
    /// Magnitude of the last accepted step
    pub final_step: f64,
    /// Generator evaluations (or applications, for propagator methods)
    pub rhs_evaluations: usize,
}

/// ⟨ψ|O|ψ⟩ for a ket item, Tr(Oρ) for a density item.
pub fn expectation(
    observable: &Array2<Complex64>,
    kind: StateKind,
    item: &ArrayView2<'_, Complex64>,
) -> Complex64 {
    match kind {
        StateKind::Ket => inner(item.iter(), observable.dot(item).iter()),
        StateKind::Density => trace(&observable.dot(item).view()),
    }
}

/// States and expectation values at the requested save times.
#[derive(Debug, Clone)]
pub struct Solution {
    times: Vec<f64>,
    states: Vec<State>,
    /// `(batch, observable, save time)`
    expects: Array3<Complex64>,
    diagnostics: Diagnostics,
}

impl Solution {
    /// Evaluate `observables` on every saved state. `params` holds one
    /// parameter row shared by the batch, or one row per batch item.
    pub(crate) fn assemble(
        times: Vec<f64>,
        states: Vec<State>,
        observables: &[Operator],
        params: &[Vec<f64>],
        diagnostics: Diagnostics,
    ) -> Self {
        let empty: &[f64] = &[];
        let rows: Vec<&[f64]> = if params.is_empty() {
            vec![empty]
        } else {
            params.iter().map(Vec::as_slice).collect()
        };
        let batch = states.first().map_or(0, State::batch_size);
        let mut expects = Array3::zeros((batch, observables.len(), times.len()));
        for (k, (&t, state)) in times.iter().zip(&states).enumerate() {
            for (o, observable) in observables.iter().enumerate() {
                let matrices: Vec<_> = rows.iter().map(|p| observable.evaluate(t, p)).collect();
                for b in 0..batch {
                    let matrix = &matrices[row_of(matrices.len(), b)];
                    expects[[b, o, k]] = expectation(matrix, state.kind(), &state.item(b));
                }
            }
        }
        Self {
            times,
            states,
            expects,
            diagnostics,
        }
    }

    pub fn times(&self) -> &[f64] {
        &self.times
    }

    pub fn states(&self) -> &[State] {
        &self.states
    }

    /// State at save index `k`.
    pub fn state_at(&self, k: usize) -> Option<&State> {
        self.states.get(k)
    }

    /// State at the last save time.
    pub fn final_state(&self) -> &State {
        // assemble is only called with at least one save time
        &self.states[self.states.len() - 1]
    }

    pub fn kind(&self) -> StateKind {
        self.final_state().kind()
    }

    pub fn batch_size(&self) -> usize {
        self.expects.len_of(Axis(0))
    }

    pub fn num_observables(&self) -> usize {
        self.expects.len_of(Axis(1))
    }

    /// All expectation values, shaped `(batch, observable, save time)`.
    pub fn expects(&self) -> &Array3<Complex64> {
        &self.expects
    }

    /// Expectation of observable `o` for batch item `b` over the save times.
    pub fn expect(&self, b: usize, o: usize) -> ArrayView1<'_, Complex64> {
        self.expects.index_axis(Axis(0), b).index_axis_move(Axis(0), o)
    }

    /// Batch item `b` at every save time.
    pub fn trajectory(&self, b: usize) -> Vec<Array2<Complex64>> {
        self.states.iter().map(|s| s.item(b).to_owned()).collect()
    }

    /// `‖ψ‖` or `Re Tr ρ`, shaped `(batch, save time)`.
    pub fn norms(&self) -> Array2<f64> {
        self.per_item(|state| state.norms())
    }

    /// `Re Tr ρ` with `ρ = |ψ⟩⟨ψ|` for kets, shaped `(batch, save time)`.
    pub fn traces(&self) -> Array2<f64> {
        self.per_item(|state| match state.kind() {
            StateKind::Ket => state.norms().into_iter().map(|n| n * n).collect(),
            StateKind::Density => state.norms(),
        })
    }

    /// `Tr ρ²`, shaped `(batch, save time)`.
    pub fn purities(&self) -> Array2<f64> {
        self.per_item(State::purities)
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    fn per_item(&self, f: impl Fn(&State) -> Vec<f64>) -> Array2<f64> {
        let mut out = Array2::zeros((self.batch_size(), self.times.len()));
        for (k, state) in self.states.iter().enumerate() {
            for (b, v) in f(state).into_iter().enumerate() {
                out[[b, k]] = v;
            }
        }
        out
    }
}
