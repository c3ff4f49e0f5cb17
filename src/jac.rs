use std::collections::BTreeMap;

use sparsetools::coo::Coo;
use sparsetools::csc::CSC;

use crate::lfnetwork::{LfNetwork, SolverState};
use crate::network::BranchSide;
use crate::sbus::{make_sbus, SBus};
use crate::ybus::{BranchFlow, BranchState, Partials};

/// One row of the nonlinear system.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Equation {
    /// Active power balance of a node.
    P(usize),
    /// Reactive power balance of a node.
    Q(usize),
    /// Voltage magnitude of a node held at a target.
    V(usize, f64),
    /// Reactive flow leaving one end of a branch held at a target.
    BranchQ(usize, BranchSide, f64),
}

/// Variable and equation indexing for the current control modes.
///
/// Variables are the angles of every node but the slack, the magnitudes
/// of every node, and the ratios and shunt sections of continuous
/// controls. Each node has an active power row (except the slack) and one
/// reactive row: a voltage target for generator controllers, a branch
/// flow target for reactive controllers, a reactive balance otherwise.
/// Continuous controls add a voltage target row each.
#[derive(Debug, Clone)]
pub(crate) struct EquationSystem {
    pub th_var: Vec<Option<usize>>,
    pub v_var: Vec<usize>,
    pub rho_var: Vec<Option<usize>>,
    pub sec_var: Vec<Option<usize>>,
    pub n_var: usize,

    pub equations: Vec<Equation>,
    pub p_row: Vec<Option<usize>>,
    pub q_row: Vec<Option<usize>>,
}

impl EquationSystem {
    pub fn new(net: &LfNetwork, state: &SolverState) -> Self {
        let n = net.node_count();
        let mut n_var = 0;
        let mut next = || {
            n_var += 1;
            n_var - 1
        };

        let th_var = (0..n)
            .map(|i| if i == net.slack { None } else { Some(next()) })
            .collect::<Vec<Option<usize>>>();
        let v_var = (0..n).map(|_| next()).collect::<Vec<usize>>();

        let mut rho_var = vec![None; net.branches.len()];
        for (k, tc) in net.transformer_controls.iter().enumerate() {
            if state.transformers[k].continuous {
                rho_var[tc.branch] = Some(next());
            }
        }
        let mut sec_var = vec![None; net.shunts.len()];
        for (k, sc) in net.shunt_controls.iter().enumerate() {
            if state.shunts[k].continuous {
                sec_var[sc.shunt] = Some(next());
            }
        }

        let mut equations = Vec::with_capacity(n_var);
        let mut p_row = vec![None; n];
        let mut q_row = vec![None; n];
        for i in 0..n {
            if i != net.slack {
                p_row[i] = Some(equations.len());
                equations.push(Equation::P(i));
            }
        }
        for i in 0..n {
            let vc = net
                .voltage_controls
                .iter()
                .enumerate()
                .find(|(k, vc)| vc.controller == i && state.vc_enabled[*k]);
            let rc = net.reactive_controls.iter().find(|rc| rc.controller == i);
            match (vc, rc) {
                (Some((_, vc)), _) => equations.push(Equation::V(vc.controlled, vc.target_v)),
                (None, Some(rc)) => {
                    equations.push(Equation::BranchQ(rc.branch, rc.side, rc.target_q))
                }
                (None, None) => {
                    q_row[i] = Some(equations.len());
                    equations.push(Equation::Q(i));
                }
            }
        }
        for (k, tc) in net.transformer_controls.iter().enumerate() {
            if state.transformers[k].continuous {
                equations.push(Equation::V(tc.controlled, tc.target_v));
            }
        }
        for (k, sc) in net.shunt_controls.iter().enumerate() {
            if state.shunts[k].continuous {
                equations.push(Equation::V(sc.controlled, sc.target_v));
            }
        }

        Self {
            th_var,
            v_var,
            rho_var,
            sec_var,
            n_var,
            equations,
            p_row,
            q_row,
        }
    }

    /// Writes a Newton step into the state. Negative magnitudes wrap
    /// around with a half turn of the angle.
    pub fn update(&self, net: &LfNetwork, state: &mut SolverState, dx: &[f64]) {
        for i in 0..state.v.len() {
            if let Some(j) = self.th_var[i] {
                state.th[i] += dx[j];
            }
            state.v[i] += dx[self.v_var[i]];
            if state.v[i] < 0.0 {
                state.v[i] = -state.v[i];
                state.th[i] += std::f64::consts::PI;
            }
        }
        for tc in &net.transformer_controls {
            if let Some(j) = self.rho_var[tc.branch] {
                state.rho[tc.branch] += dx[j];
            }
        }
        for sc in &net.shunt_controls {
            if let Some(j) = self.sec_var[sc.shunt] {
                state.sections[sc.shunt] += dx[j];
            }
        }
    }
}

pub(crate) fn branch_state(net: &LfNetwork, state: &SolverState, k: usize) -> BranchState {
    let br = &net.branches[k];
    BranchState {
        v1: state.v[br.f],
        th1: state.th[br.f],
        v2: state.v[br.t],
        th2: state.th[br.t],
        rho: state.rho[k],
        alpha: state.alpha[k],
    }
}

pub(crate) fn branch_flow(net: &LfNetwork, state: &SolverState, k: usize) -> BranchFlow {
    net.branches[k].model.flow(&branch_state(net, state, k))
}

/// Power leaving each node through branches and shunts (p.u.).
pub(crate) fn node_outflows(net: &LfNetwork, state: &SolverState) -> (Vec<f64>, Vec<f64>) {
    let n = net.node_count();
    let mut p = vec![0.0; n];
    let mut q = vec![0.0; n];
    for (k, br) in net.branches.iter().enumerate() {
        let flow = branch_flow(net, state, k);
        p[br.f] += flow.p1;
        q[br.f] += flow.q1;
        p[br.t] += flow.p2;
        q[br.t] += flow.q2;
    }
    for i in 0..n {
        let v2 = state.v[i] * state.v[i];
        p[i] += net.fixed_shunt[i].re * v2;
        q[i] -= net.fixed_shunt[i].im * v2;
    }
    for (k, sh) in net.shunts.iter().enumerate() {
        let v2 = state.v[sh.node] * state.v[sh.node];
        p[sh.node] += state.sections[k] * sh.g * v2;
        q[sh.node] -= state.sections[k] * sh.b * v2;
    }
    (p, q)
}

/// Evaluates the mismatch vector `F(x)`.
pub(crate) fn mismatch(net: &LfNetwork, state: &SolverState, eqs: &EquationSystem) -> Vec<f64> {
    let (p_out, q_out) = node_outflows(net, state);
    let sbus = make_sbus(net, state);

    eqs.equations
        .iter()
        .map(|eq| match *eq {
            Equation::P(i) => p_out[i] - sbus.p[i],
            Equation::Q(i) => q_out[i] - sbus.q[i],
            Equation::V(i, target) => state.v[i] - target,
            Equation::BranchQ(k, side, target) => {
                let flow = branch_flow(net, state, k);
                match side {
                    BranchSide::From => flow.q1 - target,
                    BranchSide::To => flow.q2 - target,
                }
            }
        })
        .collect()
}

/// Row coefficients of one branch quantity in terms of the system
/// variables.
fn branch_partials_terms(
    eqs: &EquationSystem,
    net: &LfNetwork,
    k: usize,
    d: &Partials,
) -> [(Option<usize>, f64); 5] {
    let br = &net.branches[k];
    [
        (eqs.th_var[br.f], d.th1),
        (eqs.th_var[br.t], d.th2),
        (Some(eqs.v_var[br.f]), d.v1),
        (Some(eqs.v_var[br.t]), d.v2),
        (eqs.rho_var[k], d.rho),
    ]
}

/// Jacobian of the mismatch vector as `(row, col) -> value`.
pub(crate) fn jacobian_entries(
    net: &LfNetwork,
    state: &SolverState,
    eqs: &EquationSystem,
) -> BTreeMap<(usize, usize), f64> {
    let mut entries: BTreeMap<(usize, usize), f64> = BTreeMap::new();
    let mut add = |row: Option<usize>, col: Option<usize>, value: f64| {
        if let (Some(r), Some(c)) = (row, col) {
            if value != 0.0 {
                *entries.entry((r, c)).or_insert(0.0) += value;
            }
        }
    };

    for (k, br) in net.branches.iter().enumerate() {
        let d = br.model.partials(&branch_state(net, state, k));
        let rows = [eqs.p_row[br.f], eqs.q_row[br.f], eqs.p_row[br.t], eqs.q_row[br.t]];
        for (row, dq) in rows.iter().zip(d.iter()) {
            for (col, value) in branch_partials_terms(eqs, net, k, dq) {
                add(*row, col, value);
            }
        }
    }

    for (r, eq) in eqs.equations.iter().enumerate() {
        match *eq {
            Equation::V(i, _) => add(Some(r), Some(eqs.v_var[i]), 1.0),
            Equation::BranchQ(k, side, _) => {
                let d = net.branches[k].model.partials(&branch_state(net, state, k));
                let dq = match side {
                    BranchSide::From => &d[1],
                    BranchSide::To => &d[3],
                };
                for (col, value) in branch_partials_terms(eqs, net, k, dq) {
                    add(Some(r), col, value);
                }
            }
            _ => {}
        }
    }

    for i in 0..net.node_count() {
        let v = state.v[i];
        let col = Some(eqs.v_var[i]);
        add(eqs.p_row[i], col, 2.0 * net.fixed_shunt[i].re * v);
        add(eqs.q_row[i], col, -2.0 * net.fixed_shunt[i].im * v);
    }
    for (k, sh) in net.shunts.iter().enumerate() {
        let v = state.v[sh.node];
        let col = Some(eqs.v_var[sh.node]);
        add(eqs.p_row[sh.node], col, 2.0 * state.sections[k] * sh.g * v);
        add(eqs.q_row[sh.node], col, -2.0 * state.sections[k] * sh.b * v);
        add(eqs.p_row[sh.node], eqs.sec_var[k], sh.g * v * v);
        add(eqs.q_row[sh.node], eqs.sec_var[k], -sh.b * v * v);
    }

    let sbus: SBus = make_sbus(net, state);
    for i in 0..net.node_count() {
        let col = Some(eqs.v_var[i]);
        add(eqs.p_row[i], col, -sbus.dp_dv[i]);
        add(eqs.q_row[i], col, -sbus.dq_dv[i]);
    }
    for (h, flow) in net.hvdc.iter().zip(&sbus.hvdc) {
        if let (Some(n1), Some(n2)) = (h.node1, h.node2) {
            let (c1, c2) = (eqs.th_var[n1], eqs.th_var[n2]);
            add(eqs.p_row[n1], c1, -flow.dp1);
            add(eqs.p_row[n1], c2, flow.dp1);
            add(eqs.p_row[n2], c1, -flow.dp2);
            add(eqs.p_row[n2], c2, flow.dp2);
        }
    }

    entries
}

/// Forms the sparse Jacobian of the mismatch vector.
pub(crate) fn make_jac(
    net: &LfNetwork,
    state: &SolverState,
    eqs: &EquationSystem,
) -> Result<CSC<usize, f64>, String> {
    let entries = jacobian_entries(net, state, eqs);
    let n = eqs.n_var;
    let mut rowidx = Vec::with_capacity(entries.len());
    let mut colidx = Vec::with_capacity(entries.len());
    let mut values = Vec::with_capacity(entries.len());
    for ((r, c), v) in entries {
        rowidx.push(r);
        colidx.push(c);
        values.push(v);
    }
    let jac = Coo::new(n, n, rowidx, colidx, values)
        .map_err(|err| err.to_string())?
        .to_csc();
    Ok(jac)
}

/// Derivative of the mismatch vector with respect to the ratio or the
/// phase shift of a branch held constant in the system.
pub(crate) fn d_mismatch_d_branch(
    net: &LfNetwork,
    state: &SolverState,
    eqs: &EquationSystem,
    k: usize,
    phase: bool,
) -> Vec<f64> {
    let br = &net.branches[k];
    let d = br.model.partials(&branch_state(net, state, k));
    let pick = |p: &Partials| if phase { p.alpha } else { p.rho };

    let mut column = vec![0.0; eqs.equations.len()];
    let rows = [eqs.p_row[br.f], eqs.q_row[br.f], eqs.p_row[br.t], eqs.q_row[br.t]];
    for (row, dq) in rows.iter().zip(d.iter()) {
        if let Some(r) = row {
            column[*r] += pick(dq);
        }
    }
    for (r, eq) in eqs.equations.iter().enumerate() {
        if let Equation::BranchQ(kb, side, _) = *eq {
            if kb == k {
                column[r] += match side {
                    BranchSide::From => pick(&d[1]),
                    BranchSide::To => pick(&d[3]),
                };
            }
        }
    }
    column
}

/// Derivative of the mismatch vector with respect to the section count
/// of a shunt.
pub(crate) fn d_mismatch_d_sections(
    net: &LfNetwork,
    state: &SolverState,
    eqs: &EquationSystem,
    shunt: usize,
) -> Vec<f64> {
    let sh = &net.shunts[shunt];
    let v2 = state.v[sh.node] * state.v[sh.node];
    let mut column = vec![0.0; eqs.equations.len()];
    if let Some(r) = eqs.p_row[sh.node] {
        column[r] += sh.g * v2;
    }
    if let Some(r) = eqs.q_row[sh.node] {
        column[r] -= sh.b * v2;
    }
    column
}

/// Active power leaving the from end of a branch as a linear form over
/// the system variables, with its direct phase shift derivative.
pub(crate) fn d_p1(
    net: &LfNetwork,
    state: &SolverState,
    eqs: &EquationSystem,
    k: usize,
) -> (Vec<f64>, f64) {
    let d = net.branches[k].model.partials(&branch_state(net, state, k));
    let mut row = vec![0.0; eqs.n_var];
    for (col, value) in branch_partials_terms(eqs, net, k, &d[0]) {
        if let Some(c) = col {
            row[c] += value;
        }
    }
    (row, d[0].alpha)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cases::{case9, micro_grid, two_bus};
    use crate::lfnetwork::{LfNetwork, SolverState};
    use crate::network::{BranchSide, Network, RemoteReactivePowerControl};
    use crate::params::{ControlMode, LoadFlowParameters, SysWideZipLoads};
    use crate::topology::build_topology;

    /// Builds the main component of `network` around bus `slack_id` with a
    /// perturbed flat state.
    fn system(
        network: &Network,
        params: &LoadFlowParameters,
        slack_id: &str,
    ) -> (LfNetwork, SolverState, EquationSystem) {
        let topo = build_topology(network, params).unwrap();
        let slack = topo.bus.e2i[slack_id];
        let net = LfNetwork::new(network, &topo, params, 0, slack);
        assert_eq!(net.nodes[net.slack], topo.node[slack]);

        let mut state = SolverState::new(&net, network);
        for i in 0..state.v.len() {
            state.v[i] = 1.0 + 0.01 * i as f64;
            state.th[i] = -0.02 * i as f64;
        }
        let eqs = EquationSystem::new(&net, &state);
        assert_eq!(eqs.equations.len(), eqs.n_var);
        (net, state, eqs)
    }

    /// Compares every Jacobian entry with central differences of the
    /// mismatch vector.
    fn assert_jacobian_matches(net: &LfNetwork, state: &SolverState, eqs: &EquationSystem) {
        let entries = jacobian_entries(net, state, eqs);
        let h = 1e-7;
        for j in 0..eqs.n_var {
            let mut dx = vec![0.0; eqs.n_var];
            dx[j] = h;
            let mut plus = state.clone();
            eqs.update(net, &mut plus, &dx);
            dx[j] = -h;
            let mut minus = state.clone();
            eqs.update(net, &mut minus, &dx);
            let fp = mismatch(net, &plus, eqs);
            let fm = mismatch(net, &minus, eqs);
            for r in 0..eqs.equations.len() {
                let fd = (fp[r] - fm[r]) / (2.0 * h);
                let an = entries.get(&(r, j)).copied().unwrap_or(0.0);
                assert!(
                    (fd - an).abs() < 1e-5,
                    "J[{}, {}] ({:?}): analytic {} != numeric {}",
                    r,
                    j,
                    eqs.equations[r],
                    an,
                    fd
                );
            }
        }
    }

    #[test]
    fn jacobian_matches_finite_differences() {
        let (net, state, eqs) = system(&case9(), &LoadFlowParameters::default(), "1");
        assert_eq!(net.slack, 0);
        assert_jacobian_matches(&net, &state, &eqs);
    }

    #[test]
    fn jacobian_with_zip_loads_and_continuous_controls() {
        let params = LoadFlowParameters {
            transformer_voltage_control_mode: ControlMode::Continuous,
            shunt_voltage_control_mode: ControlMode::Continuous,
            zip_loads: SysWideZipLoads {
                pw: Some([0.2, 0.3, 0.5]),
                qw: Some([0.1, 0.2, 0.7]),
            },
            ..LoadFlowParameters::grid_model_validation()
        };
        let (net, state, eqs) = system(&micro_grid(), &params, "S1-400");
        assert!(eqs.rho_var.iter().any(Option::is_some));
        assert!(eqs.sec_var.iter().any(Option::is_some));
        assert!(!net.hvdc.is_empty());
        assert_jacobian_matches(&net, &state, &eqs);
    }

    #[test]
    fn jacobian_with_remote_reactive_control() {
        let mut network = two_bus();
        {
            let gb = &mut network.generators[1];
            gb.voltage_regulator_on = false;
            gb.remote_reactive_control = Some(RemoteReactivePowerControl {
                branch: "AB".to_string(),
                side: BranchSide::To,
                target_q: 10.0,
            });
        }
        let params = LoadFlowParameters {
            reactive_power_remote_control: true,
            ..Default::default()
        };
        let (net, state, eqs) = system(&network, &params, "A");
        assert!(eqs
            .equations
            .iter()
            .any(|e| matches!(e, Equation::BranchQ(_, BranchSide::To, _))));
        assert_jacobian_matches(&net, &state, &eqs);
    }
}
