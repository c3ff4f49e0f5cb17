use crate::jac::node_outflows;
use crate::lfnetwork::{DiscreteState, LfNetwork, SolverState};
use crate::params::{BalanceType, LoadFlowParameters, SlackDistributionFailure};
use crate::runpf::FailureReason;
use crate::sbus::make_sbus;
use crate::sensitivity::Sensitivity;
use crate::traits::LinearSolver;

/// Maximum number of switches back to voltage control per bus.
const MAX_SWITCH_PQ_PV: usize = 3;

/// Reactive limit slack (p.u.).
const Q_EPS: f64 = 1e-5;

#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub(crate) enum OuterLoopStatus {
    Stable,
    /// Controls were adjusted and the system must be solved again.
    Unstable,
    Failed(FailureReason),
}

/// Control adjustments run between converged Newton solves, in priority
/// order.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub(crate) enum OuterLoop {
    DistributedSlack,
    ReactiveLimits,
    Discretization,
    TransformerVoltage,
    ShuntVoltage,
    PhaseControl,
}

impl OuterLoop {
    pub fn name(&self) -> &'static str {
        match self {
            OuterLoop::DistributedSlack => "distributed slack",
            OuterLoop::ReactiveLimits => "reactive limits",
            OuterLoop::Discretization => "control discretization",
            OuterLoop::TransformerVoltage => "transformer voltage control",
            OuterLoop::ShuntVoltage => "shunt voltage control",
            OuterLoop::PhaseControl => "phase control",
        }
    }
}

/// Outer loops enabled for a component.
pub(crate) fn outer_loops(net: &LfNetwork, params: &LoadFlowParameters) -> Vec<OuterLoop> {
    let mut loops = Vec::new();
    if params.distributed_slack {
        loops.push(OuterLoop::DistributedSlack);
    }
    if params.use_reactive_limits {
        loops.push(OuterLoop::ReactiveLimits);
    }
    if !net.transformer_controls.is_empty() || !net.shunt_controls.is_empty() {
        loops.push(OuterLoop::Discretization);
    }
    if !net.transformer_controls.is_empty() {
        loops.push(OuterLoop::TransformerVoltage);
    }
    if !net.shunt_controls.is_empty() {
        loops.push(OuterLoop::ShuntVoltage);
    }
    if !net.phase_controls.is_empty() {
        loops.push(OuterLoop::PhaseControl);
    }
    loops
}

/// Runs one outer loop on a converged state.
pub(crate) fn check(
    outer: OuterLoop,
    net: &LfNetwork,
    state: &mut SolverState,
    params: &LoadFlowParameters,
    lin_solver: &dyn LinearSolver,
) -> Result<OuterLoopStatus, String> {
    let status = match outer {
        OuterLoop::DistributedSlack => distributed_slack(net, state, params),
        OuterLoop::ReactiveLimits => reactive_limits(net, state),
        OuterLoop::Discretization => discretize(net, state),
        OuterLoop::TransformerVoltage => transformer_voltage(net, state, lin_solver)?,
        OuterLoop::ShuntVoltage => shunt_voltage(net, state, lin_solver)?,
        OuterLoop::PhaseControl => phase_control(net, state, lin_solver)?,
    };
    Ok(status)
}

/// Active power the slack node injects beyond its specified injection
/// (p.u.).
pub(crate) fn slack_mismatch(net: &LfNetwork, state: &SolverState) -> f64 {
    let (p_out, _) = node_outflows(net, state);
    let sbus = make_sbus(net, state);
    p_out[net.slack] - sbus.p[net.slack]
}

/// Element taking a share of a distributed active power.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Participant {
    /// Active power injection.
    pub p: f64,
    pub min_p: f64,
    pub max_p: f64,
    pub factor: f64,
}

/// Spreads `mismatch` over the participants in proportion to their
/// factors. Participants reaching a limit are clamped and the excess is
/// spread again over the others. Returns what could not be distributed.
pub(crate) fn distribute(parts: &mut [Participant], mismatch: f64) -> f64 {
    let mut remaining = mismatch;
    let mut active: Vec<bool> = parts
        .iter()
        .map(|p| {
            p.factor > 0.0
                && if mismatch > 0.0 {
                    p.p < p.max_p
                } else {
                    p.p > p.min_p
                }
        })
        .collect();

    for _ in 0..=parts.len() {
        let total: f64 = parts
            .iter()
            .zip(&active)
            .filter(|(_, &a)| a)
            .map(|(p, _)| p.factor)
            .sum();
        if remaining.abs() < 1e-12 || total <= 0.0 {
            break;
        }
        let mut next = 0.0;
        for (p, a) in parts.iter_mut().zip(active.iter_mut()) {
            if !*a {
                continue;
            }
            let target = p.p + remaining * p.factor / total;
            let clamped = target.clamp(p.min_p, p.max_p);
            if clamped != target {
                *a = false;
                next += target - clamped;
            }
            p.p = clamped;
        }
        remaining = next;
    }
    remaining
}

fn distributed_slack(
    net: &LfNetwork,
    state: &mut SolverState,
    params: &LoadFlowParameters,
) -> OuterLoopStatus {
    let mismatch = slack_mismatch(net, state);
    if mismatch.abs() * net.base_mva <= params.slack_bus_p_max_mismatch {
        return OuterLoopStatus::Stable;
    }

    let remainder = if params.balance_type == BalanceType::ProportionalToLoad {
        let mut parts: Vec<Participant> = net
            .loads
            .iter()
            .enumerate()
            .map(|(l, load)| Participant {
                p: -state.load_p[l],
                min_p: f64::NEG_INFINITY,
                max_p: 0.0,
                factor: load.p0.max(0.0),
            })
            .collect();
        let remainder = distribute(&mut parts, mismatch);
        for (l, part) in parts.iter().enumerate() {
            state.load_p[l] = -part.p;
        }
        remainder
    } else {
        let mut parts: Vec<Participant> = net
            .generators
            .iter()
            .enumerate()
            .map(|(g, gen)| {
                let p = state.gen_p[g];
                let eligible = gen.participate && gen.max_p > gen.min_p;
                let factor = match params.balance_type {
                    BalanceType::ProportionalToGenerationPMax => gen.max_p,
                    BalanceType::ProportionalToGenerationP => gen.target_p.abs(),
                    _ if mismatch > 0.0 => gen.max_p - p,
                    _ => p - gen.min_p,
                };
                Participant {
                    p,
                    min_p: gen.min_p,
                    max_p: gen.max_p,
                    factor: if eligible { factor.max(0.0) } else { 0.0 },
                }
            })
            .collect();
        let remainder = distribute(&mut parts, mismatch);
        for (g, part) in parts.iter().enumerate() {
            state.gen_p[g] = part.p;
        }
        remainder
    };

    let distributed = mismatch - remainder;
    log::debug!(
        "component {}: {} MW distributed, {} MW left",
        net.num,
        distributed * net.base_mva,
        remainder * net.base_mva
    );
    if remainder.abs() * net.base_mva > params.slack_bus_p_max_mismatch {
        match params.slack_distribution_failure {
            SlackDistributionFailure::Fail => {
                log::error!(
                    "component {}: failed to distribute slack bus active power mismatch, {} MW remains",
                    net.num,
                    remainder * net.base_mva
                );
                return OuterLoopStatus::Failed(FailureReason::SlackDistribution);
            }
            SlackDistributionFailure::LeaveOnSlackBus => {
                log::warn!(
                    "component {}: {} MW remains on the slack bus",
                    net.num,
                    remainder * net.base_mva
                );
                if distributed.abs() * net.base_mva <= params.slack_bus_p_max_mismatch {
                    return OuterLoopStatus::Stable;
                }
            }
        }
    }
    OuterLoopStatus::Unstable
}

/// Reactive range `(Σ min q, Σ max q)` of the generators controlling
/// voltage at a node.
fn controller_q_range(net: &LfNetwork, controller: usize) -> (f64, f64) {
    net.generators
        .iter()
        .filter(|g| g.voltage_control && g.node == controller)
        .fold((0.0, 0.0), |(lo, hi), g| (lo + g.min_q, hi + g.max_q))
}

/// PV to PQ switching of generator voltage controls whose reactive
/// output leaves its range, and back when the voltage allows it. The
/// slack node is never switched.
fn reactive_limits(net: &LfNetwork, state: &mut SolverState) -> OuterLoopStatus {
    let (_, q_out) = node_outflows(net, state);
    let sbus = make_sbus(net, state);

    let mut pv_pq = 0;
    let mut pq_pv = 0;
    for (k, vc) in net.voltage_controls.iter().enumerate() {
        if vc.controller == net.slack {
            continue;
        }
        let (q_min, q_max) = controller_q_range(net, vc.controller);
        if state.vc_enabled[k] {
            let q = q_out[vc.controller] - sbus.q[vc.controller];
            if q > q_max + Q_EPS {
                state.vc_enabled[k] = false;
                state.vc_fixed_q[k] = q_max;
                pv_pq += 1;
            } else if q < q_min - Q_EPS {
                state.vc_enabled[k] = false;
                state.vc_fixed_q[k] = q_min;
                pv_pq += 1;
            }
        } else if state.vc_switches[k] < MAX_SWITCH_PQ_PV {
            let v = state.v[vc.controlled];
            let at_max = state.vc_fixed_q[k] == q_max;
            if (at_max && v > vc.target_v) || (!at_max && v < vc.target_v) {
                state.vc_enabled[k] = true;
                state.vc_switches[k] += 1;
                pq_pv += 1;
            }
        }
    }

    if pv_pq + pq_pv == 0 {
        return OuterLoopStatus::Stable;
    }
    log::info!(
        "component {}: {} buses switched PV -> PQ, {} buses switched PQ -> PV",
        net.num,
        pv_pq,
        pq_pv
    );
    OuterLoopStatus::Unstable
}

/// Position whose value is nearest to `x`.
pub(crate) fn closest(values: &[f64], x: f64) -> usize {
    let mut best = 0;
    for (i, v) in values.iter().enumerate() {
        if (v - x).abs() < (values[best] - x).abs() {
            best = i;
        }
    }
    best
}

/// Rounds continuous ratios and sections to the nearest position.
fn discretize(net: &LfNetwork, state: &mut SolverState) -> OuterLoopStatus {
    let mut status = OuterLoopStatus::Stable;
    for (k, tc) in net.transformer_controls.iter().enumerate() {
        if !state.transformers[k].continuous || tc.ratios.is_empty() {
            continue;
        }
        let pos = closest(&tc.ratios, state.rho[tc.branch]);
        log::debug!(
            "component {}: ratio {} rounded to position {}",
            net.num,
            state.rho[tc.branch],
            pos
        );
        state.transformers[k].position = pos;
        state.transformers[k].continuous = false;
        state.rho[tc.branch] = tc.ratios[pos];
        status = OuterLoopStatus::Unstable;
    }
    for (k, sc) in net.shunt_controls.iter().enumerate() {
        if !state.shunts[k].continuous {
            continue;
        }
        let max = net.shunts[sc.shunt].max_sections;
        let sections = state.sections[sc.shunt].round().clamp(0.0, max as f64);
        state.shunts[k].position = sections as usize;
        state.shunts[k].continuous = false;
        state.sections[sc.shunt] = sections;
        status = OuterLoopStatus::Unstable;
    }
    status
}

/// Moves a discrete control one position towards `change`, where
/// `values` holds the controlled variable at each position. Returns the
/// new position when the change is worth at least half a step.
fn step(ds: &mut DiscreteState, values: &[f64], change: f64) -> Option<usize> {
    if ds.locked || ds.continuous || values.is_empty() {
        return None;
    }
    let pos = ds.position;
    let candidates = [
        pos.checked_sub(1).map(|p| (p, -1)),
        (pos + 1 < values.len()).then_some((pos + 1, 1)),
    ];
    let (next, dir) = candidates.into_iter().flatten().find(|&(p, _)| {
        let delta = values[p] - values[pos];
        delta != 0.0 && delta.signum() == change.signum() && change.abs() >= 0.5 * delta.abs()
    })?;
    if ds.last_direction != 0 && ds.last_direction != dir {
        ds.locked = true;
        return None;
    }
    ds.last_direction = dir;
    ds.position = next;
    Some(next)
}

fn outside_deadband(value: f64, target: f64, deadband: f64) -> bool {
    (value - target).abs() > deadband / 2.0
}

fn transformer_voltage(
    net: &LfNetwork,
    state: &mut SolverState,
    lin_solver: &dyn LinearSolver,
) -> Result<OuterLoopStatus, String> {
    let active: Vec<usize> = net
        .transformer_controls
        .iter()
        .enumerate()
        .filter(|&(k, tc)| {
            let ds = &state.transformers[k];
            !ds.locked
                && !ds.continuous
                && outside_deadband(state.v[tc.controlled], tc.target_v, tc.deadband)
        })
        .map(|(k, _)| k)
        .collect();
    if active.is_empty() {
        return Ok(OuterLoopStatus::Stable);
    }
    let moves = {
        let sens = Sensitivity::new(net, state, lin_solver)?;
        let queries: Vec<(usize, usize)> = active
            .iter()
            .map(|&k| {
                let tc = &net.transformer_controls[k];
                (tc.branch, tc.controlled)
            })
            .collect();
        let s = sens.dv_d_rho(&queries)?;
        active
            .iter()
            .zip(s)
            .filter(|(_, s)| s.abs() >= 1e-9)
            .map(|(&k, s)| {
                let tc = &net.transformer_controls[k];
                (k, (tc.target_v - state.v[tc.controlled]) / s)
            })
            .collect::<Vec<(usize, f64)>>()
    };

    let mut status = OuterLoopStatus::Stable;
    for (k, d_rho) in moves {
        let tc = &net.transformer_controls[k];
        if let Some(pos) = step(&mut state.transformers[k], &tc.ratios, d_rho) {
            state.rho[tc.branch] = tc.ratios[pos];
            status = OuterLoopStatus::Unstable;
        }
    }
    if status == OuterLoopStatus::Unstable {
        log::debug!("component {}: transformer taps moved", net.num);
    }
    Ok(status)
}

fn shunt_voltage(
    net: &LfNetwork,
    state: &mut SolverState,
    lin_solver: &dyn LinearSolver,
) -> Result<OuterLoopStatus, String> {
    let active: Vec<usize> = net
        .shunt_controls
        .iter()
        .enumerate()
        .filter(|&(k, sc)| {
            let ds = &state.shunts[k];
            !ds.locked
                && !ds.continuous
                && outside_deadband(state.v[sc.controlled], sc.target_v, sc.deadband)
        })
        .map(|(k, _)| k)
        .collect();
    if active.is_empty() {
        return Ok(OuterLoopStatus::Stable);
    }
    let moves = {
        let sens = Sensitivity::new(net, state, lin_solver)?;
        let queries: Vec<(usize, usize)> = active
            .iter()
            .map(|&k| {
                let sc = &net.shunt_controls[k];
                (sc.shunt, sc.controlled)
            })
            .collect();
        let s = sens.dv_d_sections(&queries)?;
        active
            .iter()
            .zip(s)
            .filter(|(_, s)| s.abs() >= 1e-9)
            .map(|(&k, s)| {
                let sc = &net.shunt_controls[k];
                (k, (sc.target_v - state.v[sc.controlled]) / s)
            })
            .collect::<Vec<(usize, f64)>>()
    };

    let mut status = OuterLoopStatus::Stable;
    for (k, d_sections) in moves {
        let sc = &net.shunt_controls[k];
        let values: Vec<f64> = (0..=net.shunts[sc.shunt].max_sections)
            .map(|s| s as f64)
            .collect();
        if let Some(pos) = step(&mut state.shunts[k], &values, d_sections) {
            state.sections[sc.shunt] = pos as f64;
            status = OuterLoopStatus::Unstable;
        }
    }
    Ok(status)
}

fn phase_control(
    net: &LfNetwork,
    state: &mut SolverState,
    lin_solver: &dyn LinearSolver,
) -> Result<OuterLoopStatus, String> {
    let active: Vec<(usize, f64)> = net
        .phase_controls
        .iter()
        .enumerate()
        .filter(|&(k, _)| !state.phases[k].locked)
        .map(|(k, pc)| (k, crate::jac::branch_flow(net, state, pc.branch).p1))
        .filter(|&(k, p)| {
            let pc = &net.phase_controls[k];
            outside_deadband(p, pc.target_p, pc.deadband)
        })
        .collect();
    if active.is_empty() {
        return Ok(OuterLoopStatus::Stable);
    }
    let moves = {
        let sens = Sensitivity::new(net, state, lin_solver)?;
        let branches: Vec<usize> = active
            .iter()
            .map(|&(k, _)| net.phase_controls[k].branch)
            .collect();
        let s = sens.dp1_d_alpha(&branches)?;
        active
            .iter()
            .zip(s)
            .filter(|(_, s)| s.abs() >= 1e-9)
            .map(|(&(k, p), s)| (k, (net.phase_controls[k].target_p - p) / s))
            .collect::<Vec<(usize, f64)>>()
    };

    let mut status = OuterLoopStatus::Stable;
    for (k, d_alpha) in moves {
        let pc = &net.phase_controls[k];
        if let Some(pos) = step(&mut state.phases[k], &pc.shifts, d_alpha) {
            state.alpha[pc.branch] = pc.shifts[pos];
            status = OuterLoopStatus::Unstable;
        }
    }
    Ok(status)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gen(p: f64, max_p: f64) -> Participant {
        Participant {
            p,
            min_p: 0.0,
            max_p,
            factor: max_p,
        }
    }

    #[test]
    fn distribution_is_proportional_to_factor() {
        let mut parts = vec![gen(0.5, 1.0), gen(0.5, 3.0)];
        let remainder = distribute(&mut parts, 0.4);
        assert!(remainder.abs() < 1e-12);
        assert!((parts[0].p - 0.6).abs() < 1e-12);
        assert!((parts[1].p - 0.8).abs() < 1e-12);
    }

    #[test]
    fn distribution_respects_limits() {
        let mut parts = vec![gen(0.95, 1.0), gen(0.5, 3.0)];
        let remainder = distribute(&mut parts, 0.4);
        assert!(remainder.abs() < 1e-12);
        assert_eq!(parts[0].p, 1.0);
        assert!((parts[1].p - 0.85).abs() < 1e-12);

        let mut parts = vec![gen(0.9, 1.0), gen(2.9, 3.0)];
        let remainder = distribute(&mut parts, 0.5);
        assert!((remainder - 0.3).abs() < 1e-12);
        assert_eq!(parts[0].p, 1.0);
        assert_eq!(parts[1].p, 3.0);
    }

    #[test]
    fn step_moves_once_and_locks_on_reversal() {
        let ratios = [0.9, 0.95, 1.0, 1.05, 1.1];
        let mut ds = DiscreteState {
            position: 2,
            continuous: false,
            last_direction: 0,
            locked: false,
        };
        // Less than half a step: stay.
        assert_eq!(step(&mut ds, &ratios, 0.02), None);
        assert_eq!(step(&mut ds, &ratios, 0.08), Some(3));
        assert_eq!(step(&mut ds, &ratios, -0.05), None);
        assert!(ds.locked);
        assert_eq!(step(&mut ds, &ratios, 0.05), None);
    }

    #[test]
    fn closest_position() {
        assert_eq!(closest(&[0.9, 1.0, 1.1], 1.04), 1);
        assert_eq!(closest(&[0.9, 1.0, 1.1], 1.3), 2);
    }
}
