use anyhow::{format_err, Result};
use sparsetools::csc::CSC;

use super::init_logging;
use crate::cases::case9;
use crate::network::Network;
use crate::params::{LoadFlowParameters, SlackBusSelection};
use crate::runpf::{run_load_flow, runpf, ComponentStatus, FailureReason};
use crate::traits::LinearSolver;

fn fixed_slack() -> LoadFlowParameters {
    LoadFlowParameters {
        distributed_slack: false,
        slack_bus_selection: SlackBusSelection::First,
        ..Default::default()
    }
}

/// Rejects every system as singular.
struct SingularSolver;

impl LinearSolver for SingularSolver {
    fn solve(&self, _a_mat: &CSC<usize, f64>, _b: &[f64]) -> Result<Vec<f64>, String> {
        Err("matrix is singular".to_string())
    }
}

fn voltages(network: &Network) -> Vec<(f64, f64)> {
    network.buses.iter().map(|b| (b.vm, b.va)).collect()
}

#[test]
fn test_diverged_commits_last_iterate() -> Result<()> {
    init_logging();
    let mut network = case9();
    let before = voltages(&network);
    let params = LoadFlowParameters {
        max_iterations: 1,
        ..fixed_slack()
    };
    let result = run_load_flow(&mut network, &params)?;
    let main = result.main().ok_or_else(|| format_err!("no main component"))?;
    assert_eq!(main.status, ComponentStatus::Diverged);
    assert_eq!(main.newton_iterations, 1);
    assert_eq!(result.worst_status(), ComponentStatus::Diverged);
    assert!(!result.is_ok());

    let after = voltages(&network);
    assert_ne!(after, before);
    // One step from a flat start already lowers the most loaded bus.
    let vm9 = network.bus("9").map_or(1.0, |b| b.vm);
    assert!(vm9 < 1.0, "{}", vm9);
    assert!(network.generator("G1").map_or(0.0, |g| g.p) > 0.0);
    Ok(())
}

#[test]
fn test_unrealistic_voltage() -> Result<()> {
    let mut network = case9();
    let before = voltages(&network);
    let params = LoadFlowParameters {
        min_realistic_voltage: 0.98,
        ..fixed_slack()
    };
    let result = run_load_flow(&mut network, &params)?;
    assert_eq!(
        result.status(),
        ComponentStatus::Failed(FailureReason::UnrealisticVoltage)
    );
    // Nothing is written back from a failed component.
    assert_eq!(voltages(&network), before);
    assert!(network.buses[0].slack);

    // Bus 9 settles at 0.958 p.u., inside the default range.
    let mut network = case9();
    assert!(run_load_flow(&mut network, &fixed_slack())?.is_ok());
    Ok(())
}

#[test]
fn test_singular_jacobian() -> Result<()> {
    let mut network = case9();
    let before = voltages(&network);
    let result = runpf(&mut network, &fixed_slack(), &SingularSolver)?;
    let main = result.main().ok_or_else(|| format_err!("no main component"))?;
    assert_eq!(
        main.status,
        ComponentStatus::Failed(FailureReason::SingularJacobian)
    );
    assert_eq!(main.newton_iterations, 1);
    assert_eq!(voltages(&network), before);
    Ok(())
}

#[test]
fn test_non_finite_injection() -> Result<()> {
    let mut network = case9();
    network.loads[1].p0 = f64::NAN;
    let before = voltages(&network);
    let result = run_load_flow(&mut network, &fixed_slack())?;
    assert_eq!(
        result.status(),
        ComponentStatus::Failed(FailureReason::NonFiniteState)
    );
    assert_eq!(result.components[0].newton_iterations, 0);
    assert_eq!(voltages(&network), before);
    Ok(())
}
