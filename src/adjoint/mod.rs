// Copyright 2026 QubitOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Gradients by the continuous adjoint method.
//!
//! [`value_and_grad`] runs the forward solve, evaluates the objective, then
//! integrates the [augmented system](backward) from the last save time back
//! to `t₀`. At each save time, walking backward, the forward state is
//! restored from the stored trajectory and the objective's cotangent for
//! that time is added to the adjoint state. Memory is proportional to the
//! number of save times, not the number of steps.
//!
//! A problem with a parameter batch gets one gradient row per parameter
//! row; `Gradients::params` then holds their sum.
//!
//! Only the Runge–Kutta family can be differentiated; the backward pass uses
//! the forward tableau with the same tolerances and step bounds.

pub mod backward;
pub mod objective;

use ndarray::{Array2, Array3, ArrayView2, Axis};
use num_complex::Complex64;
use serde::Serialize;
use tracing::{debug, info};

use crate::error::{Error, GradientUnavailable, Result};
use crate::generator::{row_of, Dynamics};
use crate::method::{interior, OdeVector, Propagator};
use crate::operator::standard::dag;
use crate::operator::Operator;
use crate::problem::Problem;
use crate::result::{expectation, Diagnostics, Solution};
use crate::state::StateKind;
use crate::stepper::{self, initial_step, Integrator};

pub use backward::{AdjointPropagator, AugmentedState};
pub use objective::{Cotangent, ExpectationObjective, FidelityObjective, Objective};

/// Objective value and its gradients.
#[derive(Debug, Clone, Serialize)]
pub struct Gradients {
    pub value: f64,
    /// `∂J/∂θ`, one entry per problem parameter. With a parameter batch
    /// this is the sum over rows.
    pub params: Vec<f64>,
    /// `∂J/∂θ_r` for each parameter row
    pub param_batch: Vec<Vec<f64>>,
    /// `∂J/∂Re y₀ + i ∂J/∂Im y₀`, shaped like the initial state the caller
    /// supplied (kets stay kets even when they were promoted, and a state
    /// broadcast over parameter rows collects all rows' contributions)
    #[serde(skip)]
    pub initial_state: Array3<Complex64>,
    /// Counters of the backward integration
    pub diagnostics: Diagnostics,
}

/// Solve `problem` and differentiate `objective` with respect to the
/// parameters and the initial state.
pub fn value_and_grad<O: Objective + ?Sized>(
    problem: &Problem,
    objective: &O,
) -> Result<(Solution, Gradients)> {
    let config = problem.config();
    let tableau = config.method.tableau().ok_or_else(|| {
        GradientUnavailable::UnsupportedMethod(config.method.to_string())
    })?;

    let rows = problem.param_batch();
    let dynamics = Dynamics::batched(problem.generator()?, rows);
    let save_times = problem.save_times();
    let t0 = problem.start_time();
    let trajectory = stepper::integrate(
        &dynamics,
        problem.initial().data().clone(),
        t0,
        save_times,
        config,
    )
    .map_err(GradientUnavailable::ForwardFailed)?;
    let forward: Vec<Array3<Complex64>> = trajectory.states.clone();
    let solution = problem.package(trajectory)?;

    let value = objective.value(&solution)?;
    let cotangent = objective.cotangent(&solution)?;
    check_cotangent(&cotangent, &solution)?;

    let kind = problem.kind();
    let observables = problem.observables();
    let num_params = problem.params().len();
    let t_end = save_times[save_times.len() - 1];
    debug!(
        method = tableau.name,
        params = num_params,
        rows = rows.len(),
        t_end,
        value,
        "starting adjoint pass"
    );

    let mut prop = AdjointPropagator::new(tableau, &dynamics);
    let breaks = dynamics.generator().discontinuities();
    let last = forward.len() - 1;
    let mut z = AugmentedState::new(
        forward[last].clone(),
        forward[last].zeros_like(),
        rows.len(),
        num_params,
    );
    let mut integrator: Option<Integrator<'_>> = None;

    for k in (0..=last).rev() {
        let t_k = save_times[k];
        z.y.assign(&forward[k]);
        if let Some(g) = &cotangent.states[k] {
            z.lambda += g;
        }
        add_expectation_cotangent(
            &mut z.lambda,
            &forward[k],
            kind,
            observables,
            cotangent.expects.index_axis(Axis(2), k),
            t_k,
            rows,
        );
        prop.reset();

        let target = if k == 0 { t0 } else { save_times[k - 1] };
        let integ = integrator.get_or_insert_with(|| {
            let h0 = match config.initial_step {
                Some(h) => h,
                None => {
                    let f = backward::augmented_rhs(&dynamics, interior(t_end, t_end, t0), &z);
                    initial_step(config, z.max_norm(), f.max_norm(), t_end - t0)
                }
            };
            Integrator::new(config, tableau.order, h0)
        });
        z = integ
            .advance(&mut prop, z, t_k, target, &breaks)
            .map_err(GradientUnavailable::BackwardFailed)?;
    }

    let mut grad_rows = z.mu.clone();
    add_observable_param_terms(&mut grad_rows, &solution, &cotangent, observables, rows);
    let param_batch: Vec<Vec<f64>> = grad_rows.outer_iter().map(|r| r.to_vec()).collect();
    let grad_params = grad_rows.sum_axis(Axis(0)).to_vec();

    let mut initial_state = match problem.promoted_from() {
        Some(kets) => chain_to_kets(&z.lambda, kets.data()),
        None => z.lambda,
    };
    if problem.is_broadcast() {
        initial_state = initial_state.sum_axis(Axis(0)).insert_axis(Axis(0));
    }

    let stats = integrator.map(|i| i.stats()).unwrap_or_default();
    let diagnostics = Diagnostics {
        method: prop.name().to_string(),
        accepted_steps: stats.accepted,
        rejected_steps: stats.rejected,
        final_step: stats.last_step,
        rhs_evaluations: prop.evaluations(),
    };
    info!(
        value,
        backward_steps = diagnostics.accepted_steps,
        evaluations = diagnostics.rhs_evaluations,
        "gradient computed"
    );

    Ok((
        solution,
        Gradients {
            value,
            params: grad_params,
            param_batch,
            initial_state,
            diagnostics,
        },
    ))
}

fn check_cotangent(cot: &Cotangent, solution: &Solution) -> Result<()> {
    if cot.states.len() != solution.times().len() {
        return Err(Error::Shape(format!(
            "cotangent has {} state entries for {} save times",
            cot.states.len(),
            solution.times().len()
        )));
    }
    if cot.expects.raw_dim() != solution.expects().raw_dim() {
        return Err(Error::Shape(format!(
            "cotangent expectation shape {:?} does not match {:?}",
            cot.expects.shape(),
            solution.expects().shape()
        )));
    }
    let state_shape = solution.final_state().data().shape();
    for g in cot.states.iter().flatten() {
        if g.shape() != state_shape {
            return Err(Error::Shape(format!(
                "state cotangent shape {:?} does not match {:?}",
                g.shape(),
                state_shape
            )));
        }
    }
    Ok(())
}

/// Pull expectation-value cotangents `g[b, o]` back onto the state.
///
/// For kets `∇ψ = g O†ψ + ḡ Oψ`; for density matrices `∇ρ = g O†`.
fn add_expectation_cotangent(
    lambda: &mut Array3<Complex64>,
    y: &Array3<Complex64>,
    kind: StateKind,
    observables: &[Operator],
    g: ArrayView2<'_, Complex64>,
    t: f64,
    rows: &[Vec<f64>],
) {
    let zero = Complex64::new(0.0, 0.0);
    for (o, op) in observables.iter().enumerate() {
        let column = g.index_axis(Axis(1), o);
        if column.iter().all(|&c| c == zero) {
            continue;
        }
        let matrices: Vec<(Array2<Complex64>, Array2<Complex64>)> = if op.depends_on_params() {
            rows.iter()
                .map(|r| {
                    let m = op.evaluate(t, r);
                    let m_dag = dag(&m);
                    (m, m_dag)
                })
                .collect()
        } else {
            let m = op.evaluate(t, &[]);
            let m_dag = dag(&m);
            vec![(m, m_dag)]
        };
        for (b, (mut lb, yb)) in lambda.outer_iter_mut().zip(y.outer_iter()).enumerate() {
            let gb = column[b];
            if gb == zero {
                continue;
            }
            let (m, m_dag) = &matrices[row_of(matrices.len(), b)];
            match kind {
                StateKind::Ket => {
                    lb.scaled_add(gb, &m_dag.dot(&yb));
                    lb.scaled_add(gb.conj(), &m.dot(&yb));
                }
                StateKind::Density => lb.scaled_add(gb, m_dag),
            }
        }
    }
}

/// `Σ Re(ḡ ∂c/∂θ ⟨M⟩)` for observables whose coefficients depend on θ,
/// credited to the parameter row of each batch item.
fn add_observable_param_terms(
    grad: &mut Array2<f64>,
    solution: &Solution,
    cot: &Cotangent,
    observables: &[Operator],
    rows: &[Vec<f64>],
) {
    let kind = solution.kind();
    for (o, op) in observables.iter().enumerate() {
        if !op.depends_on_params() {
            continue;
        }
        for (k, &t) in solution.times().iter().enumerate() {
            let state = &solution.states()[k];
            for b in 0..solution.batch_size() {
                let g = cot.expects[[b, o, k]];
                if g == Complex64::new(0.0, 0.0) {
                    continue;
                }
                let item = state.item(b);
                let r = row_of(rows.len(), b);
                op.for_each_param_derivative(t, &rows[r], |p, dc, m| {
                    grad[[r, p]] += (g.conj() * dc * expectation(m, kind, &item)).re;
                });
            }
        }
    }
}

/// Chain a density-matrix gradient `Λ` back to the kets `ψ` with
/// `ρ = ψψ†`: `∇ψ = (Λ + Λ†)ψ`.
fn chain_to_kets(lambda: &Array3<Complex64>, kets: &Array3<Complex64>) -> Array3<Complex64> {
    let mut out = Array3::zeros(kets.raw_dim());
    for ((mut o, l), psi) in out
        .outer_iter_mut()
        .zip(lambda.outer_iter())
        .zip(kets.outer_iter())
    {
        let sym: Array2<Complex64> = &l + &dag(&l.to_owned());
        o.assign(&sym.dot(&psi));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SolverConfig;
    use crate::method::Method;
    use crate::operator::standard::{basis, sigma_x, sigma_z};
    use crate::operator::Coefficient;
    use crate::state::State;
    use approx::assert_relative_eq;

    fn rabi(theta: f64, method: Method) -> Problem {
        let h = Operator::new(vec![(sigma_x(), Coefficient::param(0))]).unwrap();
        Problem::builder(h, State::ket(basis(2, 0)).unwrap())
            .start_time(0.0)
            .save_times([0.5, 1.0])
            .observable(Operator::constant(sigma_z()).unwrap())
            .params(vec![theta])
            .config(SolverConfig::adaptive(method).with_tolerances(1e-10, 1e-12))
            .build()
            .unwrap()
    }

    #[test]
    fn test_rabi_gradient_matches_analytic() {
        // ⟨σz⟩(T) = cos(2θT)
        let theta = 0.7;
        let problem = rabi(theta, Method::Tsit5);
        let (sol, grads) = problem
            .value_and_grad(&ExpectationObjective::final_value(0))
            .unwrap();
        assert_relative_eq!(grads.value, (2.0 * theta).cos(), epsilon = 1e-8);
        assert_relative_eq!(sol.expect(0, 0)[1].re, grads.value, epsilon = 1e-14);
        assert_relative_eq!(grads.params[0], -2.0 * (2.0 * theta).sin(), epsilon = 1e-6);
        assert!(grads.diagnostics.accepted_steps > 0);
        assert_eq!(grads.diagnostics.method, "tsit5");
    }

    #[test]
    fn test_intermediate_save_time_objective() {
        let theta = 0.4;
        let problem = rabi(theta, Method::Dopri5);
        let objective = ExpectationObjective::final_value(0).at(0);
        let (_, grads) = problem.value_and_grad(&objective).unwrap();
        assert_relative_eq!(grads.value, theta.cos(), epsilon = 1e-8);
        assert_relative_eq!(grads.params[0], -theta.sin(), epsilon = 1e-6);
    }

    #[test]
    fn test_unsupported_method_is_reported_first() {
        let h = Operator::new(vec![(sigma_x(), Coefficient::param(0))]).unwrap();
        let problem = Problem::builder(h, State::ket(basis(2, 0)).unwrap())
            .save_times([1.0])
            .params(vec![0.3])
            .config(SolverConfig::fixed(Method::Expm, 0.01))
            .build()
            .unwrap();
        // the objective is invalid too, but the method is checked first
        let err = problem
            .value_and_grad(&ExpectationObjective::final_value(0))
            .unwrap_err();
        assert!(matches!(
            err,
            Error::GradientUnavailable(GradientUnavailable::UnsupportedMethod(ref m)) if m == "expm"
        ));
    }

    #[test]
    fn test_forward_failure_is_wrapped() {
        let h = Operator::new(vec![(sigma_x(), Coefficient::param(0))]).unwrap();
        let problem = Problem::builder(h, State::ket(basis(2, 0)).unwrap())
            .start_time(0.0)
            .save_times([10.0])
            .observable(Operator::constant(sigma_z()).unwrap())
            .params(vec![1.0])
            .config(SolverConfig::adaptive(Method::Dopri5).with_max_steps(3))
            .build()
            .unwrap();
        let err = problem
            .value_and_grad(&ExpectationObjective::final_value(0))
            .unwrap_err();
        assert!(matches!(
            err,
            Error::GradientUnavailable(GradientUnavailable::ForwardFailed(_))
        ));
    }

    #[test]
    fn test_chain_to_kets() {
        let mut lambda = Array3::zeros((1, 2, 2));
        lambda[[0, 0, 1]] = Complex64::new(0.0, 1.0);
        let mut psi = Array3::zeros((1, 2, 1));
        psi[[0, 1, 0]] = Complex64::new(1.0, 0.0);
        let g = chain_to_kets(&lambda, &psi);
        // (Λ + Λ†) has entries i at (0,1) and -i at (1,0)
        assert_eq!(g[[0, 0, 0]], Complex64::new(0.0, 1.0));
        assert_eq!(g[[0, 1, 0]], Complex64::new(0.0, 0.0));
    }
}
