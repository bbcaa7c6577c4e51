// Copyright 2026 QubitOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Scalar objectives of a [`Solution`] and their cotangents.
//!
//! Gradients with respect to complex quantities follow one convention
//! everywhere: for real `J` and complex `z`, the gradient is
//! `∂J/∂Re z + i ∂J/∂Im z`, so that `dJ = Re⟨∇, dz⟩` with the Frobenius
//! inner product.

use ndarray::{Array2, Array3, Axis};
use num_complex::Complex64;

use crate::error::{Error, Result};
use crate::generator::inner;
use crate::result::Solution;
use crate::state::{State, StateKind};

/// Gradient of an objective with respect to everything a [`Solution`] saved.
#[derive(Debug, Clone)]
pub struct Cotangent {
    /// `∂J/∂y` at each save time, shaped like the saved states. `None`
    /// stands for zero.
    pub states: Vec<Option<Array3<Complex64>>>,
    /// `∂J/∂⟨O⟩`, shaped `(batch, observable, save time)` like
    /// [`Solution::expects`].
    pub expects: Array3<Complex64>,
}

impl Cotangent {
    /// All-zero cotangent matching `solution`.
    pub fn zeros(solution: &Solution) -> Self {
        Self {
            states: vec![None; solution.times().len()],
            expects: Array3::zeros(solution.expects().raw_dim()),
        }
    }

    /// Accumulate `g` into the state cotangent at save index `k`.
    pub fn add_state(&mut self, k: usize, g: &Array3<Complex64>) {
        if let Some(existing) = &mut self.states[k] {
            *existing += g;
        } else {
            self.states[k] = Some(g.clone());
        }
    }
}

/// A real scalar function of a solution.
pub trait Objective {
    fn value(&self, solution: &Solution) -> Result<f64>;

    /// Gradient of [`value`](Objective::value) with respect to the saved
    /// states and expectation values.
    fn cotangent(&self, solution: &Solution) -> Result<Cotangent>;
}

/// `weight · Σ_b Re⟨O⟩_b` at one save time.
#[derive(Debug, Clone)]
pub struct ExpectationObjective {
    /// Index into the problem's observables
    pub observable: usize,
    /// Save index; the last save time when `None`
    pub save_index: Option<usize>,
    pub weight: f64,
}

impl ExpectationObjective {
    /// Real part of observable `observable` at the final save time.
    pub fn final_value(observable: usize) -> Self {
        Self {
            observable,
            save_index: None,
            weight: 1.0,
        }
    }

    pub fn at(mut self, save_index: usize) -> Self {
        self.save_index = Some(save_index);
        self
    }

    pub fn weighted(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    fn resolve(&self, solution: &Solution) -> Result<usize> {
        if self.observable >= solution.num_observables() {
            return Err(Error::Config(format!(
                "objective uses observable {} but the problem has {}",
                self.observable,
                solution.num_observables()
            )));
        }
        let last = solution.times().len() - 1;
        let k = self.save_index.unwrap_or(last);
        if k > last {
            return Err(Error::Config(format!(
                "save index {} out of range for {} save times",
                k,
                last + 1
            )));
        }
        Ok(k)
    }
}

impl Objective for ExpectationObjective {
    fn value(&self, solution: &Solution) -> Result<f64> {
        let k = self.resolve(solution)?;
        let total: f64 = (0..solution.batch_size())
            .map(|b| solution.expect(b, self.observable)[k].re)
            .sum();
        Ok(self.weight * total)
    }

    fn cotangent(&self, solution: &Solution) -> Result<Cotangent> {
        let k = self.resolve(solution)?;
        let mut cot = Cotangent::zeros(solution);
        for b in 0..solution.batch_size() {
            cot.expects[[b, self.observable, k]] = Complex64::new(self.weight, 0.0);
        }
        Ok(cot)
    }
}

/// Mean fidelity with target states at the final save time.
///
/// Pure targets against kets give `|⟨φ|ψ⟩|²`; otherwise the fidelity is
/// `Tr(σρ)` with `σ` the target density matrix (`|φ⟩⟨φ|` for kets), which
/// is exact whenever either side is pure.
#[derive(Debug, Clone)]
pub struct FidelityObjective {
    targets: State,
}

impl FidelityObjective {
    /// One target per batch item, or a single target for all of them.
    pub fn new(targets: State) -> Self {
        Self { targets }
    }

    fn target_index(&self, solution: &Solution, b: usize) -> Result<usize> {
        let n = self.targets.batch_size();
        if self.targets.dim() != solution.final_state().dim() {
            return Err(Error::Shape(format!(
                "target dimension {} does not match state dimension {}",
                self.targets.dim(),
                solution.final_state().dim()
            )));
        }
        if n == 1 {
            Ok(0)
        } else if n == solution.batch_size() {
            Ok(b)
        } else {
            Err(Error::Shape(format!(
                "{} targets for a batch of {}",
                n,
                solution.batch_size()
            )))
        }
    }

    /// Fidelity of item `b` and its gradient with respect to that item.
    fn item(&self, solution: &Solution, b: usize) -> Result<(f64, Array2<Complex64>)> {
        let t = self.target_index(solution, b)?;
        let state = solution.final_state();
        let y = state.item(b);
        Ok(match (state.kind(), self.targets.kind()) {
            (StateKind::Ket, StateKind::Ket) => {
                let phi = self.targets.item(t);
                let overlap = inner(phi.iter(), y.iter());
                (overlap.norm_sqr(), phi.to_owned() * (overlap * 2.0))
            }
            (StateKind::Ket, StateKind::Density) => {
                let sigma = self.targets.density_matrix(t);
                let s_psi = sigma.dot(&y);
                (inner(y.iter(), s_psi.iter()).re, s_psi * Complex64::new(2.0, 0.0))
            }
            (StateKind::Density, _) => {
                let sigma = self.targets.density_matrix(t);
                (inner(sigma.iter(), y.iter()).re, sigma)
            }
        })
    }
}

impl Objective for FidelityObjective {
    fn value(&self, solution: &Solution) -> Result<f64> {
        let batch = solution.batch_size();
        let mut total = 0.0;
        for b in 0..batch {
            total += self.item(solution, b)?.0;
        }
        Ok(total / batch as f64)
    }

    fn cotangent(&self, solution: &Solution) -> Result<Cotangent> {
        let batch = solution.batch_size();
        let mut grad = Array3::zeros(solution.final_state().data().raw_dim());
        let scale = Complex64::new(1.0 / batch as f64, 0.0);
        for b in 0..batch {
            let (_, g) = self.item(solution, b)?;
            grad.index_axis_mut(Axis(0), b).assign(&(g * scale));
        }
        let mut cot = Cotangent::zeros(solution);
        let last = solution.times().len() - 1;
        cot.add_state(last, &grad);
        Ok(cot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operator::standard::{basis, sigma_z};
    use crate::operator::Operator;
    use crate::result::Diagnostics;
    use approx::assert_relative_eq;
    use ndarray::Array1;

    fn solution(states: Vec<State>, observables: &[Operator]) -> Solution {
        let times = (0..states.len()).map(|k| k as f64).collect();
        Solution::assemble(times, states, observables, &[], Diagnostics::default())
    }

    fn tilted(theta: f64) -> Array1<Complex64> {
        Array1::from(vec![
            Complex64::new(theta.cos(), 0.0),
            Complex64::new(0.0, theta.sin()),
        ])
    }

    #[test]
    fn test_expectation_objective() {
        let obs = [Operator::constant(sigma_z()).unwrap()];
        let sol = solution(
            vec![
                State::kets(&[basis(2, 0), basis(2, 0)]).unwrap(),
                State::kets(&[basis(2, 1), basis(2, 0)]).unwrap(),
            ],
            &obs,
        );
        let last = ExpectationObjective::final_value(0).weighted(2.0);
        assert_relative_eq!(last.value(&sol).unwrap(), 0.0);
        assert_relative_eq!(last.clone().at(0).value(&sol).unwrap(), 4.0);
        let cot = last.cotangent(&sol).unwrap();
        assert_eq!(cot.expects[[1, 0, 1]], Complex64::new(2.0, 0.0));
        assert_eq!(cot.expects[[1, 0, 0]], Complex64::new(0.0, 0.0));
        assert!(cot.states.iter().all(Option::is_none));

        assert!(ExpectationObjective::final_value(1).value(&sol).is_err());
        assert!(ExpectationObjective::final_value(0).at(5).value(&sol).is_err());
    }

    #[test]
    fn test_ket_fidelity_gradient_matches_finite_difference() {
        let target = FidelityObjective::new(State::ket(tilted(0.3)).unwrap());
        let psi = tilted(0.5);
        let sol = solution(vec![State::ket(psi.clone()).unwrap()], &[]);
        let f = target.value(&sol).unwrap();
        assert_relative_eq!(f, (0.2f64).cos().powi(2), epsilon = 1e-14);

        let grad = target.cotangent(&sol).unwrap().states[0].clone().unwrap();
        let eps = 1e-7;
        for i in 0..2 {
            for dir in [Complex64::new(1.0, 0.0), Complex64::new(0.0, 1.0)] {
                let mut shifted = psi.clone();
                shifted[i] += dir * eps;
                let f_up = target
                    .value(&solution(vec![State::ket(shifted).unwrap()], &[]))
                    .unwrap();
                let fd = (f_up - f) / eps;
                let analytic = (grad[[0, i, 0]].conj() * dir).re;
                assert_relative_eq!(fd, analytic, epsilon = 1e-6);
            }
        }
    }

    #[test]
    fn test_density_fidelity() {
        let target = FidelityObjective::new(State::ket(basis(2, 1)).unwrap());
        let mut rho = Array2::zeros((2, 2));
        rho[[0, 0]] = Complex64::new(0.25, 0.0);
        rho[[1, 1]] = Complex64::new(0.75, 0.0);
        let sol = solution(vec![State::density(rho).unwrap()], &[]);
        assert_relative_eq!(target.value(&sol).unwrap(), 0.75);
        let grad = target.cotangent(&sol).unwrap().states[0].clone().unwrap();
        assert_eq!(grad[[0, 1, 1]], Complex64::new(1.0, 0.0));
    }

    #[test]
    fn test_target_batch_mismatch() {
        let target = FidelityObjective::new(State::kets(&[basis(2, 0), basis(2, 1)]).unwrap());
        let sol = solution(
            vec![State::kets(&[basis(2, 0), basis(2, 0), basis(2, 0)]).unwrap()],
            &[],
        );
        assert!(matches!(target.value(&sol), Err(Error::Shape(_))));
    }
}
