use sparsetools::csc::CSC;

use crate::jac::{d_mismatch_d_branch, d_mismatch_d_sections, d_p1, make_jac, EquationSystem};
use crate::lfnetwork::{LfNetwork, SolverState};
use crate::traits::LinearSolver;

/// Sensitivities of controlled quantities to discrete control variables
/// at a converged state.
///
/// For a control variable `u` held constant in `F(x, u) = 0` the state
/// moves by `dx/du = -J⁻¹ ∂F/∂u`. Each query method takes every control
/// of one kind at once and solves all right-hand sides with a single
/// factorization of `J`.
pub(crate) struct Sensitivity<'a> {
    net: &'a LfNetwork,
    state: &'a SolverState,
    eqs: EquationSystem,
    jac: CSC<usize, f64>,
    lin_solver: &'a dyn LinearSolver,
}

impl<'a> Sensitivity<'a> {
    pub fn new(
        net: &'a LfNetwork,
        state: &'a SolverState,
        lin_solver: &'a dyn LinearSolver,
    ) -> Result<Self, String> {
        let eqs = EquationSystem::new(net, state);
        let jac = make_jac(net, state, &eqs)?;
        Ok(Self {
            net,
            state,
            eqs,
            jac,
            lin_solver,
        })
    }

    /// State changes for each column of `∂F/∂u`.
    fn dx(&self, d_f: Vec<Vec<f64>>) -> Result<Vec<Vec<f64>>, String> {
        if d_f.is_empty() {
            return Ok(Vec::new());
        }
        let n = self.eqs.n_var;
        let rhs: Vec<f64> = d_f.iter().flatten().map(|v| -v).collect();
        let x = self.lin_solver.solve(&self.jac, &rhs)?;
        if x.len() != rhs.len() {
            return Err(format!(
                "expected {} solution values, got {}",
                rhs.len(),
                x.len()
            ));
        }
        Ok(x.chunks_exact(n).map(<[f64]>::to_vec).collect())
    }

    /// dV(node) / dρ(branch) for each `(branch, node)`.
    pub fn dv_d_rho(&self, queries: &[(usize, usize)]) -> Result<Vec<f64>, String> {
        let d_f = queries
            .iter()
            .map(|&(branch, _)| d_mismatch_d_branch(self.net, self.state, &self.eqs, branch, false))
            .collect();
        let dx = self.dx(d_f)?;
        Ok(queries
            .iter()
            .zip(dx)
            .map(|(&(_, node), dx)| dx[self.eqs.v_var[node]])
            .collect())
    }

    /// dV(node) / d(sections of shunt) for each `(shunt, node)`.
    pub fn dv_d_sections(&self, queries: &[(usize, usize)]) -> Result<Vec<f64>, String> {
        let d_f = queries
            .iter()
            .map(|&(shunt, _)| d_mismatch_d_sections(self.net, self.state, &self.eqs, shunt))
            .collect();
        let dx = self.dx(d_f)?;
        Ok(queries
            .iter()
            .zip(dx)
            .map(|(&(_, node), dx)| dx[self.eqs.v_var[node]])
            .collect())
    }

    /// dP1(branch) / dα(branch) for each branch.
    pub fn dp1_d_alpha(&self, branches: &[usize]) -> Result<Vec<f64>, String> {
        let d_f = branches
            .iter()
            .map(|&branch| d_mismatch_d_branch(self.net, self.state, &self.eqs, branch, true))
            .collect();
        let dx = self.dx(d_f)?;
        Ok(branches
            .iter()
            .zip(dx)
            .map(|(&branch, dx)| {
                let (row, direct) = d_p1(self.net, self.state, &self.eqs, branch);
                direct + row.iter().zip(&dx).map(|(a, b)| a * b).sum::<f64>()
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::cases::micro_grid;
    use crate::params::LoadFlowParameters;
    use crate::topology::build_topology;
    use crate::traits::SpSolver;

    /// Sparse LU that counts its calls.
    struct Counting {
        inner: SpSolver<spsolve::rlu::RLU>,
        calls: AtomicUsize,
    }

    impl LinearSolver for Counting {
        fn solve(&self, a_mat: &CSC<usize, f64>, b: &[f64]) -> Result<Vec<f64>, String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.solve(a_mat, b)
        }
    }

    #[test]
    fn one_factorization_per_query_batch() {
        let network = micro_grid();
        let params = LoadFlowParameters::grid_model_validation();
        let topo = build_topology(&network, &params).unwrap();
        let net = LfNetwork::new(&network, &topo, &params, 0, topo.bus.e2i["S1-400"]);
        let state = SolverState::new(&net, &network);
        let solver = Counting {
            inner: SpSolver(spsolve::rlu::RLU::default()),
            calls: AtomicUsize::new(0),
        };
        let sens = Sensitivity::new(&net, &state, &solver).unwrap();

        let tc = &net.transformer_controls[0];
        let sc = &net.shunt_controls[0];
        let queries = [
            (tc.branch, tc.controlled),
            (tc.branch, sc.controlled),
            (tc.branch, net.slack),
        ];
        let batch = sens.dv_d_rho(&queries).unwrap();
        assert_eq!(solver.calls.load(Ordering::SeqCst), 1);
        assert_eq!(batch.len(), 3);
        // The slack magnitude is held by its generator.
        assert!(batch[2].abs() < 1e-9, "{}", batch[2]);

        for (query, expected) in queries.iter().zip(&batch) {
            let single = sens.dv_d_rho(std::slice::from_ref(query)).unwrap();
            assert!((single[0] - expected).abs() < 1e-12);
        }
        assert_eq!(solver.calls.load(Ordering::SeqCst), 4);

        // Adding sections raises the local voltage.
        let ds = sens.dv_d_sections(&[(sc.shunt, sc.controlled)]).unwrap();
        assert!(ds[0] > 0.0, "{}", ds[0]);
        let pc = &net.phase_controls[0];
        let da = sens.dp1_d_alpha(&[pc.branch]).unwrap();
        assert!(da[0].abs() > 1e-3, "{}", da[0]);
        assert_eq!(solver.calls.load(Ordering::SeqCst), 6);

        assert!(sens.dv_d_rho(&[]).unwrap().is_empty());
        assert_eq!(solver.calls.load(Ordering::SeqCst), 6);
    }
}
