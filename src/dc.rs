use std::collections::BTreeMap;

use itertools::Itertools;
use sparsetools::coo::Coo;

use crate::lfnetwork::{LfNetwork, SolverState};
use crate::sbus::make_sbus;
use crate::traits::LinearSolver;

/// Solves a DC power flow.
///
/// Solves for the node voltage angles at all but the slack node given the
/// branch susceptances `1 / (x ρ)`, the specified active injections and
/// the phase shift injections. Returns the angles in radians, or `None`
/// when the system is singular or the angles are unrealistic.
pub(crate) fn dc_pf(
    net: &LfNetwork,
    state: &SolverState,
    lin_solver: &dyn LinearSolver,
) -> Result<Option<Vec<f64>>, String> {
    let va_threshold = 1e5; // arbitrary threshold on |Va| for declaring failure

    let n = net.node_count();
    let non_slack = (0..n).filter(|&i| i != net.slack).collect_vec();
    let mut index = vec![None; n];
    non_slack.iter().enumerate().for_each(|(j, &i)| index[i] = Some(j));

    let sbus = make_sbus(net, state);
    let mut p_bus = sbus.p.clone();

    let mut entries: BTreeMap<(usize, usize), f64> = BTreeMap::new();
    for (k, br) in net.branches.iter().enumerate() {
        let x = br.model.y.inv().im;
        if x == 0.0 {
            continue;
        }
        let b = 1.0 / (x * state.rho[k]);

        // P_f = b (θf - θt - α)
        let p_shift = -b * state.alpha[k];
        p_bus[br.f] -= p_shift;
        p_bus[br.t] += p_shift;

        for (i, j, v) in [
            (br.f, br.f, b),
            (br.f, br.t, -b),
            (br.t, br.f, -b),
            (br.t, br.t, b),
        ] {
            if let (Some(r), Some(c)) = (index[i], index[j]) {
                *entries.entry((r, c)).or_insert(0.0) += v;
            }
        }
    }
    if non_slack.is_empty() {
        return Ok(Some(state.th.clone()));
    }

    let (rowidx, colidx, values): (Vec<usize>, Vec<usize>, Vec<f64>) =
        entries.into_iter().map(|((r, c), v)| (r, c, v)).multiunzip();
    let m = non_slack.len();
    let b_mat = Coo::new(m, m, rowidx, colidx, values)
        .map_err(|err| err.to_string())?
        .to_csc();

    let th_slack = state.th[net.slack];
    let rhs = non_slack.iter().map(|&i| p_bus[i]).collect_vec();
    let va_pvpq = match lin_solver.solve(&b_mat, &rhs) {
        Ok(va) => va,
        Err(err) => {
            log::warn!("DC power flow failed: {}", err);
            return Ok(None);
        }
    };

    let mut va = vec![th_slack; n];
    non_slack
        .iter()
        .zip(&va_pvpq)
        .for_each(|(&i, &dth)| va[i] = th_slack + dth);

    if va.iter().any(|a| a.abs() > va_threshold) {
        return Ok(None);
    }
    Ok(Some(va))
}
