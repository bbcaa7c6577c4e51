// Copyright 2026 QubitOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Adjoint gradients checked against central finite differences.
//!
//! Fixed-step RK4 keeps the forward step sequence independent of the
//! parameters, so the finite differences are smooth in θ.

use approx::assert_relative_eq;
use ndarray::{Array1, Array2};
use num_complex::Complex64;

use qubit_os_dynamics::adjoint::{Cotangent, Objective};
use qubit_os_dynamics::operator::standard::{basis, sigma_minus, sigma_x, sigma_y, sigma_z};
use qubit_os_dynamics::{
    Coefficient, ExpectationObjective, FidelityObjective, MatrixFunction, Method, Operator,
    Problem, Result, Solution, SolverConfig, State,
};

const FD_STEP: f64 = 1e-5;

fn c(re: f64, im: f64) -> Complex64 {
    Complex64::new(re, im)
}

fn op(m: Array2<Complex64>) -> Operator {
    Operator::constant(m).unwrap()
}

fn rk4() -> SolverConfig {
    SolverConfig::fixed(Method::Rk4, 0.005)
}

fn tilted() -> Array1<Complex64> {
    Array1::from(vec![c(0.8, 0.0), c(0.0, 0.6)])
}

/// Compare every parameter gradient with a central difference.
fn check_param_gradients<O: Objective>(problem: &Problem, objective: &O, tol: f64) {
    let (sol, grads) = problem.value_and_grad(objective).unwrap();
    assert_relative_eq!(grads.value, objective.value(&sol).unwrap());
    assert_eq!(grads.params.len(), problem.params().len());

    let value_at = |theta: Vec<f64>| {
        let sol = problem.with_params(theta).unwrap().solve().unwrap();
        objective.value(&sol).unwrap()
    };
    for p in 0..problem.params().len() {
        let mut up = problem.params().to_vec();
        let mut down = problem.params().to_vec();
        up[p] += FD_STEP;
        down[p] -= FD_STEP;
        let fd = (value_at(up) - value_at(down)) / (2.0 * FD_STEP);
        assert!(
            (grads.params[p] - fd).abs() < tol,
            "parameter {}: adjoint {} vs finite difference {}",
            p,
            grads.params[p],
            fd
        );
    }
}

/// Compare the initial-state gradient of a single ket with central
/// differences along each real and imaginary direction.
fn check_initial_gradient<O: Objective>(
    problem: &Problem,
    psi0: &Array1<Complex64>,
    objective: &O,
) {
    let (_, grads) = problem.value_and_grad(objective).unwrap();
    assert_eq!(grads.initial_state.shape(), &[1, psi0.len(), 1]);

    let value_at = |psi: Array1<Complex64>| {
        let sol = problem
            .with_initial(State::ket(psi).unwrap())
            .unwrap()
            .solve()
            .unwrap();
        objective.value(&sol).unwrap()
    };
    for i in 0..psi0.len() {
        for dir in [c(1.0, 0.0), c(0.0, 1.0)] {
            let mut up = psi0.clone();
            let mut down = psi0.clone();
            up[i] += dir * FD_STEP;
            down[i] -= dir * FD_STEP;
            let fd = (value_at(up) - value_at(down)) / (2.0 * FD_STEP);
            let adjoint = (grads.initial_state[[0, i, 0]].conj() * dir).re;
            assert_relative_eq!(adjoint, fd, epsilon = 1e-6);
        }
    }
}

// ---------------------------------------------------------------------------
// Parameter gradients
// ---------------------------------------------------------------------------

#[test]
fn hamiltonian_amplitude_gradient() {
    let h = Operator::new(vec![
        (sigma_x(), Coefficient::param(0)),
        (sigma_z(), Coefficient::constant(0.3)),
    ])
    .unwrap();
    let problem = Problem::builder(h, State::ket(basis(2, 0)).unwrap())
        .save_times([0.0, 1.5])
        .observable(op(sigma_z()))
        .params(vec![0.9])
        .config(rk4())
        .build()
        .unwrap();
    check_param_gradients(&problem, &ExpectationObjective::final_value(0), 1e-6);
}

#[test]
fn adaptive_gradient_matches_closed_form() {
    // H = θσx: ⟨σz⟩(T) = cos 2θT
    let h = Operator::new(vec![(sigma_x(), Coefficient::param(0))]).unwrap();
    let (theta, t_end) = (1.3, 2.0);
    let problem = Problem::builder(h, State::ket(basis(2, 0)).unwrap())
        .save_times([0.0, t_end])
        .observable(op(sigma_z()))
        .params(vec![theta])
        .config(SolverConfig::adaptive(Method::Dopri5).with_tolerances(1e-10, 1e-12))
        .build()
        .unwrap();
    let (_, grads) = problem
        .value_and_grad(&ExpectationObjective::final_value(0))
        .unwrap();
    let expected = -2.0 * t_end * (2.0 * theta * t_end).sin();
    assert_relative_eq!(grads.params[0], expected, epsilon = 1e-5);
}

#[test]
fn jump_operator_parameter_gradient() {
    // L = θσ⁻, so the decay rate is θ²
    let problem = Problem::builder(op(sigma_x()), State::ket(basis(2, 1)).unwrap())
        .jump_op(Operator::new(vec![(sigma_minus(), Coefficient::param(0))]).unwrap())
        .save_times([0.0, 1.0, 2.0])
        .observable(op(sigma_z()))
        .params(vec![0.6])
        .config(rk4())
        .build()
        .unwrap();
    check_param_gradients(&problem, &ExpectationObjective::final_value(0), 1e-6);
    check_param_gradients(&problem, &ExpectationObjective::final_value(0).at(1), 1e-6);
}

#[test]
fn piecewise_constant_controls_gradient() {
    let times = vec![0.0, 0.4, 0.8, 1.2];
    let h = Operator::new(vec![
        (sigma_x(), Coefficient::pwc_params(times.clone(), 0).unwrap()),
        (sigma_y(), Coefficient::pwc_params(times, 3).unwrap()),
        (sigma_z(), Coefficient::constant(0.5)),
    ])
    .unwrap();
    let problem = Problem::builder(h, State::ket(basis(2, 0)).unwrap())
        .save_times([0.0, 1.2])
        .params(vec![0.8, -0.3, 1.1, 0.2, 0.5, -0.7])
        .config(rk4())
        .build()
        .unwrap();
    let target = FidelityObjective::new(State::ket(basis(2, 1)).unwrap());
    check_param_gradients(&problem, &target, 1e-6);
}

#[test]
fn modulated_coefficient_gradients() {
    // c(t, θ) = θ0 cos(θ1 t)
    let f = |t: f64, p: &[f64]| c(p[0] * (p[1] * t).cos(), 0.0);
    let numeric = Coefficient::parametric(f, vec![0, 1]);
    let analytic = Coefficient::parametric(f, vec![0, 1]).with_gradient(|t, p, k| match k {
        0 => c((p[1] * t).cos(), 0.0),
        _ => c(-p[0] * t * (p[1] * t).sin(), 0.0),
    });

    let mut results = Vec::new();
    for coefficient in [numeric, analytic] {
        let h = Operator::new(vec![
            (sigma_x(), coefficient),
            (sigma_z(), Coefficient::constant(0.2)),
        ])
        .unwrap();
        let problem = Problem::builder(h, State::ket(basis(2, 0)).unwrap())
            .save_times([0.0, 1.0])
            .observable(op(sigma_z()))
            .params(vec![1.1, 2.0])
            .config(rk4())
            .build()
            .unwrap();
        let objective = ExpectationObjective::final_value(0);
        check_param_gradients(&problem, &objective, 1e-5);
        results.push(problem.value_and_grad(&objective).unwrap().1.params);
    }
    for (a, b) in results[0].iter().zip(&results[1]) {
        assert_relative_eq!(*a, *b, epsilon = 1e-6);
    }
}

#[test]
fn parametrized_observable_contributes_directly() {
    // O = θ1 σz + σx
    let h = Operator::new(vec![(sigma_x(), Coefficient::param(0))]).unwrap();
    let observable = Operator::new(vec![
        (sigma_z(), Coefficient::param(1)),
        (sigma_x(), Coefficient::constant(1.0)),
    ])
    .unwrap();
    let problem = Problem::builder(h, State::ket(basis(2, 0)).unwrap())
        .save_times([0.0, 0.8])
        .observable(observable)
        .params(vec![0.7, 1.5])
        .config(rk4())
        .build()
        .unwrap();
    check_param_gradients(&problem, &ExpectationObjective::final_value(0), 1e-6);
}

#[test]
fn batch_objective_sums_items() {
    let h = Operator::new(vec![
        (sigma_x(), Coefficient::param(0)),
        (sigma_y(), Coefficient::param(1)),
    ])
    .unwrap();
    let problem = Problem::builder(h, State::kets(&[basis(2, 0), tilted()]).unwrap())
        .save_times([0.0, 1.0])
        .observable(op(sigma_z()))
        .params(vec![0.4, -0.2])
        .config(rk4())
        .build()
        .unwrap();
    check_param_gradients(&problem, &ExpectationObjective::final_value(0), 1e-6);
}

fn rotating_drive(t: f64, p: &[f64]) -> Array2<Complex64> {
    // θ0 (cos(θ1 t) σx + sin(θ1 t) σy)
    let (cs, sn) = ((p[1] * t).cos(), (p[1] * t).sin());
    (sigma_x() * c(cs, 0.0) + sigma_y() * c(sn, 0.0)) * c(p[0], 0.0)
}

#[test]
fn matrix_function_hamiltonian_gradient() {
    let numeric = MatrixFunction::parametric(rotating_drive, vec![0, 1]);
    let analytic = MatrixFunction::parametric(rotating_drive, vec![0, 1]).with_gradient(
        |t, p, k| match k {
            0 => rotating_drive(t, &[1.0, p[1]]),
            _ => {
                let (cs, sn) = ((p[1] * t).cos(), (p[1] * t).sin());
                (sigma_y() * c(cs, 0.0) - sigma_x() * c(sn, 0.0)) * c(p[0] * t, 0.0)
            }
        },
    );

    let mut results = Vec::new();
    for func in [numeric, analytic] {
        let h = Operator::from_fn(2, func)
            .unwrap()
            .with_term(sigma_z(), Coefficient::constant(0.5))
            .unwrap();
        let problem = Problem::builder(h, State::ket(basis(2, 0)).unwrap())
            .save_times([0.0, 1.2])
            .observable(op(sigma_z()))
            .params(vec![0.9, 1.6])
            .config(rk4())
            .build()
            .unwrap();
        let objective = ExpectationObjective::final_value(0);
        check_param_gradients(&problem, &objective, 1e-5);
        results.push(problem.value_and_grad(&objective).unwrap().1.params);
    }
    for (a, b) in results[0].iter().zip(&results[1]) {
        assert_relative_eq!(*a, *b, epsilon = 1e-6);
    }
}

#[test]
fn parameter_batch_gradients_per_row() {
    let h = Operator::new(vec![
        (sigma_x(), Coefficient::param(0)),
        (sigma_z(), Coefficient::param(1)),
    ])
    .unwrap();
    let rows = vec![vec![0.9, 0.2], vec![0.4, -0.5], vec![1.3, 0.7]];
    let psi0 = tilted();
    let problem = Problem::builder(h.clone(), State::ket(psi0.clone()).unwrap())
        .jump_op(op(sigma_minus()).scaled(0.3))
        .save_times([0.0, 1.0])
        .observable(op(sigma_y()))
        .param_batch(rows.clone())
        .config(rk4())
        .build()
        .unwrap();
    assert!(problem.is_broadcast());
    let objective = ExpectationObjective::final_value(0);
    let (_, grads) = problem.value_and_grad(&objective).unwrap();
    assert_eq!(grads.param_batch.len(), rows.len());
    // the caller supplied one ket, so one ket-shaped gradient comes back
    assert_eq!(grads.initial_state.shape(), &[1, 2, 1]);

    let value_at = |batch: Vec<Vec<f64>>| {
        let sol = problem.with_param_batch(batch).unwrap().solve().unwrap();
        objective.value(&sol).unwrap()
    };
    for r in 0..rows.len() {
        for p in 0..2 {
            let mut up = rows.clone();
            let mut down = rows.clone();
            up[r][p] += FD_STEP;
            down[r][p] -= FD_STEP;
            let fd = (value_at(up) - value_at(down)) / (2.0 * FD_STEP);
            assert!(
                (grads.param_batch[r][p] - fd).abs() < 1e-6,
                "row {} parameter {}: adjoint {} vs finite difference {}",
                r,
                p,
                grads.param_batch[r][p],
                fd
            );
        }
    }
    for p in 0..2 {
        let total: f64 = grads.param_batch.iter().map(|g| g[p]).sum();
        assert_relative_eq!(grads.params[p], total, epsilon = 1e-12);
    }

    // the broadcast ket collects every row's contribution
    let mut expected = ndarray::Array3::<Complex64>::zeros((1, 2, 1));
    for row in &rows {
        let single = Problem::builder(h.clone(), State::ket(psi0.clone()).unwrap())
            .jump_op(op(sigma_minus()).scaled(0.3))
            .save_times([0.0, 1.0])
            .observable(op(sigma_y()))
            .params(row.clone())
            .config(rk4())
            .build()
            .unwrap();
        expected += &single.value_and_grad(&objective).unwrap().1.initial_state;
    }
    for (a, b) in grads.initial_state.iter().zip(expected.iter()) {
        assert_relative_eq!((a - b).norm(), 0.0, epsilon = 1e-9);
    }
}

/// `Σ_k ⟨O⟩(t_k)` over every save time.
struct TrajectorySum;

impl Objective for TrajectorySum {
    fn value(&self, solution: &Solution) -> Result<f64> {
        Ok(solution.expect(0, 0).iter().map(|z| z.re).sum())
    }

    fn cotangent(&self, solution: &Solution) -> Result<Cotangent> {
        let mut cot = Cotangent::zeros(solution);
        cot.expects.fill(c(1.0, 0.0));
        Ok(cot)
    }
}

#[test]
fn user_objective_over_every_save_time() {
    let h = Operator::new(vec![
        (sigma_x(), Coefficient::param(0)),
        (sigma_z(), Coefficient::constant(0.4)),
    ])
    .unwrap();
    let problem = Problem::builder(h, State::ket(basis(2, 0)).unwrap())
        .jump_op(op(sigma_minus()).scaled(0.3))
        .start_time(0.0)
        .save_times([0.3, 0.9, 1.4, 2.0])
        .observable(op(sigma_z()))
        .params(vec![1.2])
        .config(rk4())
        .build()
        .unwrap();
    check_param_gradients(&problem, &TrajectorySum, 1e-6);
}

// ---------------------------------------------------------------------------
// Initial-state gradients
// ---------------------------------------------------------------------------

#[test]
fn closed_system_initial_state_gradient() {
    let h = Operator::sum(&[op(sigma_z()), op(sigma_x()).scaled(0.4)]).unwrap();
    let psi0 = tilted();
    let problem = Problem::builder(h, State::ket(psi0.clone()).unwrap())
        .save_times([0.0, 1.0])
        .observable(op(sigma_x()))
        .config(rk4())
        .build()
        .unwrap();
    check_initial_gradient(&problem, &psi0, &ExpectationObjective::final_value(0));
}

#[test]
fn promoted_ket_initial_state_gradient() {
    let h = Operator::sum(&[op(sigma_z()), op(sigma_x()).scaled(0.4)]).unwrap();
    let psi0 = tilted();
    let problem = Problem::builder(h, State::ket(psi0.clone()).unwrap())
        .jump_op(op(sigma_minus()).scaled(0.5))
        .save_times([0.0, 1.0])
        .observable(op(sigma_x()))
        .config(rk4())
        .build()
        .unwrap();
    assert!(problem.promoted_from().is_some());
    check_initial_gradient(&problem, &psi0, &ExpectationObjective::final_value(0));
}

#[test]
fn fidelity_initial_state_gradient() {
    let psi0 = tilted();
    let problem = Problem::builder(op(sigma_y()), State::ket(psi0.clone()).unwrap())
        .save_times([0.0, 0.6])
        .config(rk4())
        .build()
        .unwrap();
    let target = FidelityObjective::new(State::ket(basis(2, 1)).unwrap());
    check_initial_gradient(&problem, &psi0, &target);
}
