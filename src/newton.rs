use full::slice::norm_inf;

use crate::cancel::CancelToken;
use crate::debug::format_f64_vec;
use crate::error::LoadFlowError;
use crate::jac::{make_jac, mismatch, EquationSystem};
use crate::lfnetwork::{LfNetwork, SolverState};
use crate::params::LoadFlowParameters;
use crate::traits::LinearSolver;

#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub(crate) enum NewtonStatus {
    Converged,
    MaxIterationReached,
    /// The linear solve failed, usually on a singular Jacobian.
    SolverFailed,
    NonFiniteState,
    /// Converged to a voltage outside the realistic range.
    UnrealisticState,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct NewtonResult {
    pub status: NewtonStatus,
    pub iterations: usize,
}

/// Solves the current equation system with Newton's method.
///
/// Only a cancellation is returned as an error. The state holds the last
/// iterate on return.
pub(crate) fn newtonpf(
    net: &LfNetwork,
    state: &mut SolverState,
    params: &LoadFlowParameters,
    lin_solver: &dyn LinearSolver,
    cancel: &CancelToken,
) -> Result<NewtonResult, LoadFlowError> {
    let tol = params.tolerance;
    let max_it = params.max_iterations;
    let eqs = EquationSystem::new(net, state);

    let result = |status: NewtonStatus, iterations: usize| -> Result<NewtonResult, LoadFlowError> {
        Ok(NewtonResult { status, iterations })
    };

    let mut i = 0;
    let mut f = mismatch(net, state, &eqs);
    log::trace!("F_0: {}", format_f64_vec(&f));
    if f.iter().any(|v| !v.is_finite()) {
        return result(NewtonStatus::NonFiniteState, i);
    }
    let mut norm_f = norm_inf(&f);
    log::debug!("norm_f{}: {}", i, norm_f);
    let mut converged = norm_f < tol;

    while !converged && i < max_it {
        if cancel.is_cancelled() {
            return Err(LoadFlowError::Cancelled);
        }
        i += 1;

        let jac = match make_jac(net, state, &eqs) {
            Ok(jac) => jac,
            Err(err) => {
                log::error!("component {}: Jacobian assembly failed: {}", net.num, err);
                return result(NewtonStatus::SolverFailed, i);
            }
        };

        // compute update step
        let neg_f: Vec<f64> = f.iter().map(|f| -f).collect();
        let dx = match lin_solver.solve(&jac, &neg_f) {
            Ok(dx) => dx,
            Err(err) => {
                log::error!("component {}: linear solve failed: {}", net.num, err);
                return result(NewtonStatus::SolverFailed, i);
            }
        };
        log::trace!("dx_{}: {}", i, format_f64_vec(&dx));

        eqs.update(net, state, &dx);

        f = mismatch(net, state, &eqs);
        if f.iter().any(|v| !v.is_finite()) {
            return result(NewtonStatus::NonFiniteState, i);
        }
        norm_f = norm_inf(&f);
        log::debug!("norm_f{}: {}", i, norm_f);
        converged = norm_f < tol;
    }

    if !converged {
        log::info!(
            "Newton's method power flow (power balance, polar) did not converge in {} iterations.",
            i
        );
        return result(NewtonStatus::MaxIterationReached, i);
    }
    log::debug!(
        "Newton's method power flow (power balance, polar) converged in {} iterations.",
        i
    );

    let (v_min, v_max) = (params.min_realistic_voltage, params.max_realistic_voltage);
    if let Some(n) = state.v.iter().position(|&v| v < v_min || v > v_max) {
        log::error!(
            "component {}: unrealistic voltage {} at node {}",
            net.num,
            state.v[n],
            n
        );
        return result(NewtonStatus::UnrealisticState, i);
    }
    result(NewtonStatus::Converged, i)
}
