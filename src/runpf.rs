use std::fmt;

#[cfg(feature = "parallel")]
use rayon::prelude::*;
use spsolve::rlu::RLU;

use crate::cancel::CancelToken;
use crate::dc::dc_pf;
use crate::debug::{format_polar_vec, format_rect_vec};
use crate::error::{LoadFlowError, StructuralError};
use crate::lfnetwork::{LfNetwork, SolverState};
use crate::network::Network;
use crate::newton::{newtonpf, NewtonStatus};
use crate::outer::{check, outer_loops, slack_mismatch, OuterLoopStatus};
use crate::params::{ConnectedComponentMode, LoadFlowParameters, VoltageInitMode};
use crate::pfsoln::{apply, pfsoln, ComponentCommit};
use crate::slack::select_slack_bus;
use crate::topology::{build_topology, Topology};
use crate::traits::{LinearSolver, SpSolver};

#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum FailureReason {
    /// The linear solve of a Newton step or a sensitivity failed.
    SingularJacobian,
    NonFiniteState,
    /// Converged to a voltage magnitude outside the realistic range.
    UnrealisticVoltage,
    /// No generator holds a voltage in the component.
    NoVoltageControl,
    /// The slack mismatch could not be distributed.
    SlackDistribution,
}

#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum ComponentStatus {
    Ok,
    Diverged,
    Failed(FailureReason),
}

impl ComponentStatus {
    fn severity(&self) -> u8 {
        match self {
            ComponentStatus::Ok => 0,
            ComponentStatus::Diverged => 1,
            ComponentStatus::Failed(_) => 2,
        }
    }
}

impl fmt::Display for ComponentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComponentStatus::Ok => write!(f, "OK"),
            ComponentStatus::Diverged => write!(f, "DIVERGED"),
            ComponentStatus::Failed(reason) => write!(f, "FAILED ({:?})", reason),
        }
    }
}

/// Outcome of the load flow of one connected component.
#[derive(Debug, Clone, PartialEq)]
pub struct ComponentResult {
    /// Component number, 0 being the main component.
    pub component: usize,
    pub slack_bus: String,
    pub status: ComponentStatus,
    pub newton_iterations: usize,
    pub outer_iterations: usize,
    /// Active power left on the slack bus (MW).
    pub slack_mismatch: f64,
    /// Active power moved by the distributed slack (MW).
    pub distributed_p: f64,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct LoadFlowResult {
    /// One result per processed component, in component order.
    pub components: Vec<ComponentResult>,
}

impl LoadFlowResult {
    pub fn main(&self) -> Option<&ComponentResult> {
        self.components.iter().find(|c| c.component == 0)
    }

    /// Status of the main component.
    pub fn status(&self) -> ComponentStatus {
        self.main()
            .map_or_else(|| self.worst_status(), |c| c.status)
    }

    pub fn worst_status(&self) -> ComponentStatus {
        self.components
            .iter()
            .map(|c| c.status)
            .max_by_key(|s| s.severity())
            .unwrap_or(ComponentStatus::Ok)
    }

    pub fn is_ok(&self) -> bool {
        self.status() == ComponentStatus::Ok
    }
}

/// Runs an AC load flow with the default sparse LU solver.
pub fn run_load_flow(
    network: &mut Network,
    params: &LoadFlowParameters,
) -> Result<LoadFlowResult, LoadFlowError> {
    let solver = SpSolver(RLU::default());
    runpf(network, params, &solver)
}

/// Runs an AC load flow and writes the results into the network.
///
/// Structural and configuration errors are returned before anything is
/// solved. Numerical failure and non-convergence are reported per
/// component in the result.
pub fn runpf(
    network: &mut Network,
    params: &LoadFlowParameters,
    lin_solver: &dyn LinearSolver,
) -> Result<LoadFlowResult, LoadFlowError> {
    runpf_with_cancel(network, params, lin_solver, &CancelToken::new())
}

/// Same as [`runpf`] but stops with [`LoadFlowError::Cancelled`] when the
/// token is cancelled. The network is only modified by a complete run.
pub fn runpf_with_cancel(
    network: &mut Network,
    params: &LoadFlowParameters,
    lin_solver: &dyn LinearSolver,
    cancel: &CancelToken,
) -> Result<LoadFlowResult, LoadFlowError> {
    params.validate()?;
    let topo = build_topology(network, params)?;

    let selected: Vec<usize> = match params.connected_component_mode {
        ConnectedComponentMode::Main => {
            if topo.components.len() > 1 {
                let skipped = network.buses.len() - topo.component_bus_count(0);
                log::warn!(
                    "{} buses in {} smaller components are not processed",
                    skipped,
                    topo.components.len() - 1
                );
            }
            vec![0]
        }
        ConnectedComponentMode::All => (0..topo.components.len()).collect(),
    };

    // Every slack is elected before anything is solved.
    let jobs = selected
        .iter()
        .map(|&c| {
            let slack = select_slack_bus(
                network,
                &topo,
                c,
                &params.slack_bus_selection,
                params.connected_component_mode,
            )?;
            log::debug!(
                "component {}: slack bus {}",
                c,
                network.buses[slack].id
            );
            Ok((c, slack))
        })
        .collect::<Result<Vec<(usize, usize)>, StructuralError>>()?;

    let solved = {
        let network: &Network = network;
        let topo = &topo;
        #[cfg(feature = "parallel")]
        let iter = jobs.par_iter();
        #[cfg(not(feature = "parallel"))]
        let iter = jobs.iter();
        iter.map(|&(c, slack)| {
            solve_component(network, topo, params, lin_solver, cancel, c, slack)
        })
        .collect::<Result<Vec<(ComponentResult, Option<ComponentCommit>)>, LoadFlowError>>()?
    };
    if cancel.is_cancelled() {
        return Err(LoadFlowError::Cancelled);
    }

    for (i, bus) in network.buses.iter_mut().enumerate() {
        bus.component = Some(topo.component_of_bus(i));
        bus.slack = false;
        bus.mode = None;
    }
    let mut result = LoadFlowResult::default();
    for ((_, slack), (component, commit)) in jobs.into_iter().zip(solved) {
        network.buses[slack].slack = true;
        if let Some(commit) = commit {
            apply(network, &commit);
        }
        result.components.push(component);
    }
    Ok(result)
}

fn solve_component(
    network: &Network,
    topo: &Topology,
    params: &LoadFlowParameters,
    lin_solver: &dyn LinearSolver,
    cancel: &CancelToken,
    num: usize,
    slack_bus: usize,
) -> Result<(ComponentResult, Option<ComponentCommit>), LoadFlowError> {
    let net = LfNetwork::new(network, topo, params, num, slack_bus);
    let base = net.base_mva;
    let mut result = ComponentResult {
        component: num,
        slack_bus: network.buses[slack_bus].id.clone(),
        status: ComponentStatus::Ok,
        newton_iterations: 0,
        outer_iterations: 0,
        slack_mismatch: 0.0,
        distributed_p: 0.0,
    };
    log::debug!(
        "component {}: {} nodes, {} branches, {} generators, {} voltage controls",
        num,
        net.node_count(),
        net.branches.len(),
        net.generators.len(),
        net.voltage_controls.len()
    );
    log::trace!(
        "component {}: fixed shunts {}",
        num,
        format_rect_vec(&net.fixed_shunt)
    );

    if net.voltage_controls.is_empty() {
        log::error!("component {}: no generator voltage control, not solved", num);
        result.status = ComponentStatus::Failed(FailureReason::NoVoltageControl);
        return Ok((result, None));
    }

    let mut state = SolverState::new(&net, network);
    match params.voltage_init_mode {
        VoltageInitMode::UniformValues => {}
        VoltageInitMode::PreviousValues => state.load_previous(&net, network, topo),
        VoltageInitMode::DcValues => match dc_pf(&net, &state, lin_solver) {
            Ok(Some(th)) => state.th = th,
            Ok(None) => log::warn!(
                "component {}: DC power flow failed, starting from uniform values",
                num
            ),
            Err(err) => log::warn!(
                "component {}: DC power flow failed ({}), starting from uniform values",
                num,
                err
            ),
        },
    }
    log::debug!(
        "component {}: initial voltages {}",
        num,
        format_polar_vec(&state.v, &state.th)
    );

    let loops = outer_loops(&net, params);
    let status = 'solve: loop {
        if cancel.is_cancelled() {
            return Err(LoadFlowError::Cancelled);
        }
        let nr = newtonpf(&net, &mut state, params, lin_solver, cancel)?;
        result.newton_iterations += nr.iterations;
        match nr.status {
            NewtonStatus::Converged => {}
            NewtonStatus::MaxIterationReached => break ComponentStatus::Diverged,
            NewtonStatus::SolverFailed => {
                break ComponentStatus::Failed(FailureReason::SingularJacobian)
            }
            NewtonStatus::NonFiniteState => {
                break ComponentStatus::Failed(FailureReason::NonFiniteState)
            }
            NewtonStatus::UnrealisticState => {
                break ComponentStatus::Failed(FailureReason::UnrealisticVoltage)
            }
        }

        let mut stable = true;
        for &outer in &loops {
            match check(outer, &net, &mut state, params, lin_solver) {
                Ok(OuterLoopStatus::Stable) => {}
                Ok(OuterLoopStatus::Unstable) => {
                    log::debug!("component {}: {} unstable", num, outer.name());
                    stable = false;
                    break;
                }
                Ok(OuterLoopStatus::Failed(reason)) => break 'solve ComponentStatus::Failed(reason),
                Err(err) => {
                    log::error!("component {}: {} failed: {}", num, outer.name(), err);
                    break 'solve ComponentStatus::Failed(FailureReason::SingularJacobian);
                }
            }
        }
        if stable {
            break ComponentStatus::Ok;
        }
        result.outer_iterations += 1;
        if result.outer_iterations >= params.max_outer_loop_iterations {
            log::warn!(
                "component {}: outer loops not stable after {} iterations",
                num,
                result.outer_iterations
            );
            break ComponentStatus::Diverged;
        }
    };
    result.status = status;

    result.slack_mismatch = slack_mismatch(&net, &state) * base;
    let gen_moved: f64 = net
        .generators
        .iter()
        .zip(&state.gen_p)
        .map(|(g, p)| p - g.target_p)
        .sum();
    let load_moved: f64 = net
        .loads
        .iter()
        .zip(&state.load_p)
        .map(|(l, p)| l.p0 - p)
        .sum();
    result.distributed_p = (gen_moved + load_moved) * base;

    match status {
        ComponentStatus::Ok => log::info!(
            "component {}: load flow converged in {} Newton iterations and {} outer loop iterations",
            num,
            result.newton_iterations,
            result.outer_iterations
        ),
        ComponentStatus::Diverged => log::warn!(
            "component {}: load flow diverged after {} Newton iterations",
            num,
            result.newton_iterations
        ),
        ComponentStatus::Failed(reason) => {
            log::error!("component {}: load flow failed: {:?}", num, reason)
        }
    }

    let commit = match status {
        ComponentStatus::Ok | ComponentStatus::Diverged => {
            Some(pfsoln(network, topo, &net, &state))
        }
        ComponentStatus::Failed(_) => None,
    };
    Ok((result, commit))
}
