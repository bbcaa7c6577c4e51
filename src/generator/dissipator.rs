// Copyright 2026 QubitOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Lindblad dissipator and its adjoint.
//!
//! Rates are folded into the jump operators, so a channel with rate γ and
//! operator A is passed as L = √γ A and contributes
//! D[L](ρ) = L ρ L† − ½{L†L, ρ}.
//!
//! Ref: Breuer & Petruccione, "The Theory of Open Quantum Systems" (2002), Ch. 3.

use ndarray::{linalg::kron, Array2, ArrayView2};
use num_complex::Complex64;

use crate::operator::standard::dag;

const HALF: Complex64 = Complex64::new(0.5, 0.0);
const I: Complex64 = Complex64::new(0.0, 1.0);

/// A jump operator evaluated at one instant, with the products every
/// dissipator evaluation needs.
#[derive(Debug, Clone)]
pub struct JumpTerms {
    pub l: Array2<Complex64>,
    pub l_dag: Array2<Complex64>,
    pub l_dag_l: Array2<Complex64>,
}

impl JumpTerms {
    pub fn new(l: Array2<Complex64>) -> Self {
        let l_dag = dag(&l);
        let l_dag_l = l_dag.dot(&l);
        Self { l, l_dag, l_dag_l }
    }
}

/// D[L](ρ) = L ρ L† − ½ L†L ρ − ½ ρ L†L
pub fn dissipator(jump: &JumpTerms, rho: &ArrayView2<'_, Complex64>) -> Array2<Complex64> {
    let l_rho_ldag = jump.l.dot(rho).dot(&jump.l_dag);
    let ldl_rho = jump.l_dag_l.dot(rho);
    let rho_ldl = rho.dot(&jump.l_dag_l);
    l_rho_ldag - (ldl_rho + rho_ldl) * HALF
}

/// D†[L](X) = L† X L − ½ L†L X − ½ X L†L
pub fn adjoint_dissipator(jump: &JumpTerms, x: &ArrayView2<'_, Complex64>) -> Array2<Complex64> {
    let ldag_x_l = jump.l_dag.dot(x).dot(&jump.l);
    let ldl_x = jump.l_dag_l.dot(x);
    let x_ldl = x.dot(&jump.l_dag_l);
    ldag_x_l - (ldl_x + x_ldl) * HALF
}

/// dρ/dt = -i[H, ρ] + Σ_k D[L_k](ρ)
pub fn lindblad_rhs(
    hamiltonian: &Array2<Complex64>,
    jumps: &[JumpTerms],
    rho: &ArrayView2<'_, Complex64>,
) -> Array2<Complex64> {
    let mut out = (hamiltonian.dot(rho) - rho.dot(hamiltonian)) * (-I);
    for jump in jumps {
        out += &dissipator(jump, rho);
    }
    out
}

/// Adjoint generator with respect to ⟨A, B⟩ = Tr(A†B):
/// i(H†X − X H†) + Σ_k D†[L_k](X)
pub fn lindblad_adjoint_rhs(
    hamiltonian_dag: &Array2<Complex64>,
    jumps: &[JumpTerms],
    x: &ArrayView2<'_, Complex64>,
) -> Array2<Complex64> {
    let mut out = (hamiltonian_dag.dot(x) - x.dot(hamiltonian_dag)) * I;
    for jump in jumps {
        out += &adjoint_dissipator(jump, x);
    }
    out
}

/// Dense Liouvillian acting on row-major vec(ρ), i.e. index `i * d + j`
/// holds ρ_ij. Uses vec(AρB) = (A ⊗ Bᵀ) vec(ρ).
pub fn liouvillian(hamiltonian: &Array2<Complex64>, jumps: &[JumpTerms]) -> Array2<Complex64> {
    let d = hamiltonian.nrows();
    let eye = Array2::<Complex64>::eye(d);
    let mut super_op =
        (kron(hamiltonian, &eye) - kron(&eye, &hamiltonian.t().to_owned())) * (-I);
    for jump in jumps {
        let l_conj = jump.l.mapv(|z| z.conj());
        super_op += &kron(&jump.l, &l_conj);
        let anti = kron(&jump.l_dag_l, &eye) + kron(&eye, &jump.l_dag_l.t().to_owned());
        super_op -= &(anti * HALF);
    }
    super_op
}
