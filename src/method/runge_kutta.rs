// Copyright 2026 QubitOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Explicit Runge–Kutta stepping driven by a [`Tableau`].
//!
//! [`RungeKutta`] is generic over the state type so the same stage loop
//! integrates plain states forward and augmented adjoint states backward.
//!
//! Ref: Hairer, Nørsett & Wanner, "Solving Ordinary Differential Equations I"
//! (1993), §II.4.

use ndarray::Array3;
use num_complex::Complex64;

use super::tableau::Tableau;
use super::{interior, Attempt, OdeVector, Propagator};
use crate::generator::Dynamics;

/// Stage loop for one tableau, with first-same-as-last caching.
#[derive(Debug)]
pub struct RungeKutta<V> {
    tableau: &'static Tableau,
    /// f(t, y) at the current point, keyed by t
    first_stage: Option<(f64, V)>,
    /// Last stage of the latest attempt, keyed by its end time
    last_stage: Option<(f64, V)>,
    evaluations: usize,
}

impl<V: OdeVector> RungeKutta<V> {
    pub fn new(tableau: &'static Tableau) -> Self {
        Self {
            tableau,
            first_stage: None,
            last_stage: None,
            evaluations: 0,
        }
    }

    pub fn tableau(&self) -> &'static Tableau {
        self.tableau
    }

    pub fn evaluations(&self) -> usize {
        self.evaluations
    }

    /// One step of size `h` from `(t, y)`. Stage times are kept strictly
    /// inside the step so piecewise coefficients are sampled on the right
    /// piece.
    pub fn attempt<F>(&mut self, rhs: &mut F, t: f64, h: f64, y: &V) -> Attempt<V>
    where
        F: FnMut(f64, &V) -> V,
    {
        let tab = self.tableau;
        let t_end = t + h;
        let mut k: Vec<V> = Vec::with_capacity(tab.stages());

        let k1 = match &self.first_stage {
            Some((t_cached, k1)) if *t_cached == t => k1.clone(),
            _ => {
                self.evaluations += 1;
                let k1 = rhs(interior(t, t, t_end), y);
                self.first_stage = Some((t, k1.clone()));
                k1
            }
        };
        k.push(k1);

        for i in 1..tab.stages() {
            let mut yi = y.clone();
            for (j, &a) in tab.a[i].iter().enumerate() {
                if a != 0.0 {
                    yi.add_scaled(h * a, &k[j]);
                }
            }
            self.evaluations += 1;
            k.push(rhs(interior(t + tab.c[i] * h, t, t_end), &yi));
        }

        let mut y_next = y.clone();
        for (ki, &b) in k.iter().zip(tab.b) {
            if b != 0.0 {
                y_next.add_scaled(h * b, ki);
            }
        }

        let error = tab.error.map(|e| {
            let mut err = y.zeros_like();
            for (ki, &ei) in k.iter().zip(e) {
                if ei != 0.0 {
                    err.add_scaled(h * ei, ki);
                }
            }
            err
        });

        self.last_stage = if tab.fsal { k.pop().map(|kl| (t_end, kl)) } else { None };

        Attempt { y: y_next, error }
    }

    /// The stepper moved to `t_new`; FSAL methods reuse their last stage.
    pub fn accept(&mut self, t_new: f64) {
        self.first_stage = self.last_stage.take().map(|(_, kl)| (t_new, kl));
    }

    pub fn reset(&mut self) {
        self.first_stage = None;
        self.last_stage = None;
    }
}

/// Forward propagator for a Runge–Kutta tableau.
pub struct RkMethod<'d> {
    rk: RungeKutta<Array3<Complex64>>,
    dynamics: &'d Dynamics<'d>,
}

impl<'d> RkMethod<'d> {
    pub fn new(tableau: &'static Tableau, dynamics: &'d Dynamics<'d>) -> Self {
        Self {
            rk: RungeKutta::new(tableau),
            dynamics,
        }
    }
}

impl Propagator<Array3<Complex64>> for RkMethod<'_> {
    fn name(&self) -> &'static str {
        self.rk.tableau().name
    }

    fn order(&self) -> u32 {
        self.rk.tableau().order
    }

    fn attempt(&mut self, t: f64, h: f64, y: &Array3<Complex64>) -> Attempt<Array3<Complex64>> {
        let dynamics = self.dynamics;
        self.rk.attempt(&mut |s, v| dynamics.rhs(s, v), t, h, y)
    }

    fn accept(&mut self, t_new: f64) {
        self.rk.accept(t_new);
    }

    fn reset(&mut self) {
        self.rk.reset();
    }

    fn evaluations(&self) -> usize {
        self.rk.evaluations()
    }
}
