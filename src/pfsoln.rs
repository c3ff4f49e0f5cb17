use std::collections::VecDeque;
use std::f64::consts::PI;

use crate::jac::{branch_flow, node_outflows};
use crate::lfnetwork::{LfNetwork, SolverState};
use crate::network::{BranchSide, BusMode, Network};
use crate::outer::closest;
use crate::sbus::{make_sbus, zip_demand};
use crate::topology::Topology;
use crate::ybus::BranchFlow;

/// Results of one component run in network units, ready to be written
/// back.
#[derive(Debug, Clone, Default)]
pub(crate) struct ComponentCommit {
    /// Bus index, magnitude, angle (degrees) and mode.
    pub buses: Vec<(usize, f64, f64, BusMode)>,
    /// Branch index and flows (MW, MVAr).
    pub branches: Vec<(usize, BranchFlow)>,
    pub generators: Vec<(usize, f64, f64)>,
    pub loads: Vec<(usize, f64, f64)>,
    /// Shunt index, sections and reactive injection.
    pub shunts: Vec<(usize, usize, f64)>,
    pub hvdc: Vec<(usize, f64, f64)>,
    pub ratio_taps: Vec<(usize, usize)>,
    pub phase_taps: Vec<(usize, usize)>,
}

/// Splits the reactive output `q` of a node over generators in
/// proportion to their reactive range, starting from their minimum.
pub(crate) fn split_reactive(q: f64, limits: &[(f64, f64)]) -> Vec<f64> {
    if limits.is_empty() {
        return Vec::new();
    }
    let min_sum: f64 = limits.iter().map(|(lo, _)| lo).sum();
    let range_sum: f64 = limits.iter().map(|(lo, hi)| hi - lo).sum();
    if range_sum <= 0.0 || !range_sum.is_finite() {
        return vec![q / limits.len() as f64; limits.len()];
    }
    limits
        .iter()
        .map(|(lo, hi)| lo + (q - min_sum) * (hi - lo) / range_sum)
        .collect()
}

fn node_modes(net: &LfNetwork, state: &SolverState) -> Vec<BusMode> {
    let mut mode = vec![BusMode::FixedInjection; net.node_count()];
    for (k, vc) in net.voltage_controls.iter().enumerate() {
        if state.vc_enabled[k] {
            mode[vc.controller] = BusMode::VoltageControlled;
        }
    }
    mode[net.slack] = BusMode::Slack;
    mode
}

/// Computes the results of a solved component.
pub(crate) fn pfsoln(
    network: &Network,
    topo: &Topology,
    net: &LfNetwork,
    state: &SolverState,
) -> ComponentCommit {
    let base = net.base_mva;
    let mut commit = ComponentCommit::default();

    let mut local: Vec<Option<usize>> = vec![None; topo.node_buses.len()];
    for (i, &n) in net.nodes.iter().enumerate() {
        local[n] = Some(i);
    }
    let local_bus = |bus: usize| local[topo.node[bus]];

    let modes = node_modes(net, state);
    for (i, &n) in net.nodes.iter().enumerate() {
        for &b in &topo.node_buses[n] {
            commit
                .buses
                .push((b, state.v[i], state.th[i] * 180.0 / PI, modes[i]));
        }
    }

    // Injections.
    let (p_out, q_out) = node_outflows(net, state);
    let sbus = make_sbus(net, state);

    let mut gen_p: Vec<f64> = state.gen_p.clone();
    let slack_p = p_out[net.slack] - sbus.p[net.slack];
    match net.generators.iter().position(|g| g.node == net.slack) {
        Some(g) => gen_p[g] += slack_p,
        None if slack_p.abs() * base > 1e-6 => log::warn!(
            "component {}: no generator at the slack bus to take {} MW",
            net.num,
            slack_p * base
        ),
        None => {}
    }

    let mut gen_q: Vec<f64> = net.generators.iter().map(|g| g.target_q).collect();
    let mut assign_q = |q: f64, members: Vec<usize>| {
        let limits: Vec<(f64, f64)> = members
            .iter()
            .map(|&g| (net.generators[g].min_q, net.generators[g].max_q))
            .collect();
        for (g, q) in members.into_iter().zip(split_reactive(q, &limits)) {
            gen_q[g] = q;
        }
    };
    for (k, vc) in net.voltage_controls.iter().enumerate() {
        let members: Vec<usize> = (0..net.generators.len())
            .filter(|&g| {
                let gen = &net.generators[g];
                gen.voltage_control && gen.node == vc.controller
            })
            .collect();
        let q = if state.vc_enabled[k] {
            q_out[vc.controller] - sbus.q[vc.controller]
        } else {
            state.vc_fixed_q[k]
        };
        assign_q(q, members);
    }
    for rc in &net.reactive_controls {
        let members: Vec<usize> = (0..net.generators.len())
            .filter(|&g| {
                let gen = &net.generators[g];
                gen.reactive_control && gen.node == rc.controller
            })
            .collect();
        assign_q(q_out[rc.controller] - sbus.q[rc.controller], members);
    }
    for (g, gen) in net.generators.iter().enumerate() {
        commit
            .generators
            .push((gen.index, gen_p[g] * base, gen_q[g] * base));
    }

    for (l, load) in net.loads.iter().enumerate() {
        let v = state.v[load.node];
        let (p, _) = zip_demand(state.load_p[l], &net.pw, v);
        let (q, _) = zip_demand(load.q0, &net.qw, v);
        commit.loads.push((load.index, p * base, q * base));
    }

    for (k, sh) in net.shunts.iter().enumerate() {
        let v2 = state.v[sh.node] * state.v[sh.node];
        let sections = state.sections[k].round().clamp(0.0, sh.max_sections as f64);
        commit
            .shunts
            .push((sh.index, sections as usize, state.sections[k] * sh.b * v2 * base));
    }

    for (h, line) in net.hvdc.iter().enumerate() {
        let flow = &sbus.hvdc[h];
        commit.hvdc.push((
            line.index,
            line.node1.map_or(0.0, |_| flow.p1 * base),
            line.node2.map_or(0.0, |_| flow.p2 * base),
        ));
    }

    for (k, tc) in net.transformer_controls.iter().enumerate() {
        let ds = &state.transformers[k];
        let position = if ds.continuous {
            closest(&tc.ratios, state.rho[tc.branch])
        } else {
            ds.position
        };
        commit.ratio_taps.push((net.branches[tc.branch].index, position));
    }
    for (k, pc) in net.phase_controls.iter().enumerate() {
        commit
            .phase_taps
            .push((net.branches[pc.branch].index, state.phases[k].position));
    }

    // Branch flows.
    let mut flows: Vec<Option<BranchFlow>> = vec![None; network.branches.len()];
    for (k, br) in net.branches.iter().enumerate() {
        let f = branch_flow(net, state, k);
        flows[br.index] = Some(BranchFlow {
            p1: f.p1 * base,
            q1: f.q1 * base,
            p2: f.p2 * base,
            q2: f.q2 * base,
        });
    }
    for &(i, side, y) in &net.half_open {
        let (f, t) = topo.branch_ends[i];
        let n = match side {
            BranchSide::From => local_bus(f),
            BranchSide::To => local_bus(t),
        };
        if let Some(n) = n {
            let v2 = state.v[n] * state.v[n];
            let (p, q) = (y.re * v2 * base, -y.im * v2 * base);
            flows[i] = Some(match side {
                BranchSide::From => BranchFlow {
                    p1: p,
                    q1: q,
                    ..Default::default()
                },
                BranchSide::To => BranchFlow {
                    p2: p,
                    q2: q,
                    ..Default::default()
                },
            });
        }
    }
    // Branches open at both ends carry nothing.
    for (i, br) in network.branches.iter().enumerate() {
        let (f, t) = topo.branch_ends[i];
        if !br.from_connected
            && !br.to_connected
            && (local_bus(f).is_some() || local_bus(t).is_some())
        {
            flows[i] = Some(BranchFlow::default());
        }
    }
    merged_flows(network, topo, net, state, &commit, &mut flows);

    commit.branches = flows
        .into_iter()
        .enumerate()
        .filter_map(|(i, f)| f.map(|f| (i, f)))
        .collect();
    commit
}

/// Flows on zero impedance branches.
///
/// Each merged node is split back into its buses. The power a bus must
/// send through merged branches is its injection less what leaves
/// through its other branches and shunts. A spanning tree of the merged
/// branches carries these excesses; loop branches carry no flow beyond
/// their own shunts.
fn merged_flows(
    network: &Network,
    topo: &Topology,
    net: &LfNetwork,
    state: &SolverState,
    commit: &ComponentCommit,
    flows: &mut [Option<BranchFlow>],
) {
    let base = net.base_mva;
    let nb = network.buses.len();

    let mut in_component = vec![false; nb];
    let mut v = vec![0.0; nb];
    for (i, &n) in net.nodes.iter().enumerate() {
        for &b in &topo.node_buses[n] {
            in_component[b] = true;
            v[b] = state.v[i];
        }
    }

    let merged: Vec<usize> = (0..network.branches.len())
        .filter(|&i| topo.merged[i] && in_component[topo.branch_ends[i].0])
        .collect();
    if merged.is_empty() {
        return;
    }

    // Excess (p, q) of each bus.
    let mut excess = vec![(0.0, 0.0); nb];
    for &(g, p, q) in &commit.generators {
        let b = topo.gen_bus[g];
        excess[b].0 += p;
        excess[b].1 += q;
    }
    for &(l, p, q) in &commit.loads {
        let b = topo.load_bus[l];
        excess[b].0 -= p;
        excess[b].1 -= q;
    }
    for &(s, _, q) in &commit.shunts {
        let b = topo.shunt_bus[s];
        let sh = &network.shunts[s];
        let sections = net
            .shunts
            .iter()
            .position(|ls| ls.index == s)
            .map_or(0.0, |k| state.sections[k]);
        excess[b].0 -= sections * sh.g_per_section * v[b] * v[b] * base;
        excess[b].1 += q;
    }
    for &(h, p1, p2) in &commit.hvdc {
        let (b1, b2) = topo.hvdc_buses[h];
        let line = &network.hvdc_lines[h];
        if in_component[b1] {
            excess[b1].0 += p1;
            excess[b1].1 += line.q1;
        }
        if in_component[b2] {
            excess[b2].0 += p2;
            excess[b2].1 += line.q2;
        }
    }
    for (i, flow) in flows.iter().enumerate() {
        if let Some(f) = flow {
            let (bf, bt) = topo.branch_ends[i];
            excess[bf].0 -= f.p1;
            excess[bf].1 -= f.q1;
            excess[bt].0 -= f.p2;
            excess[bt].1 -= f.q2;
        }
    }
    let mut shunt_flows = Vec::with_capacity(merged.len());
    for &i in &merged {
        let br = &network.branches[i];
        let (bf, bt) = topo.branch_ends[i];
        let (v1, v2) = (v[bf] * v[bf], v[bt] * v[bt]);
        let flow = BranchFlow {
            p1: br.g1 * v1 * base,
            q1: -br.b1 * v1 * base,
            p2: br.g2 * v2 * base,
            q2: -br.b2 * v2 * base,
        };
        excess[bf].0 -= flow.p1;
        excess[bf].1 -= flow.q1;
        excess[bt].0 -= flow.p2;
        excess[bt].1 -= flow.q2;
        shunt_flows.push(flow);
    }

    // Spanning forest over merged branches, rooted at the lowest bus of
    // each group.
    let mut adjacency: Vec<Vec<(usize, usize)>> = vec![Vec::new(); nb];
    for (m, &i) in merged.iter().enumerate() {
        let (bf, bt) = topo.branch_ends[i];
        if bf != bt {
            adjacency[bf].push((bt, m));
            adjacency[bt].push((bf, m));
        }
    }
    let mut visited = vec![false; nb];
    let mut order = Vec::new();
    let mut parent_edge: Vec<Option<(usize, usize)>> = vec![None; nb];
    for root in 0..nb {
        if visited[root] || adjacency[root].is_empty() {
            continue;
        }
        visited[root] = true;
        let mut queue = VecDeque::from([root]);
        while let Some(b) = queue.pop_front() {
            order.push(b);
            for &(other, m) in &adjacency[b] {
                if !visited[other] {
                    visited[other] = true;
                    parent_edge[other] = Some((b, m));
                    queue.push_back(other);
                }
            }
        }
    }

    let mut tree = vec![(0.0, 0.0); merged.len()];
    let mut carried = excess;
    for &b in order.iter().rev() {
        if let Some((parent, m)) = parent_edge[b] {
            // Power leaving b towards its parent.
            let (p, q) = carried[b];
            let (bf, _) = topo.branch_ends[merged[m]];
            tree[m] = if bf == b { (p, q) } else { (-p, -q) };
            carried[parent].0 += p;
            carried[parent].1 += q;
        }
    }

    for (m, &i) in merged.iter().enumerate() {
        let s = shunt_flows[m];
        let (p, q) = tree[m];
        flows[i] = Some(BranchFlow {
            p1: s.p1 + p,
            q1: s.q1 + q,
            p2: s.p2 - p,
            q2: s.q2 - q,
        });
    }
}

/// Writes a commit into the network.
pub(crate) fn apply(network: &mut Network, commit: &ComponentCommit) {
    for &(b, vm, va, mode) in &commit.buses {
        let bus = &mut network.buses[b];
        bus.vm = vm;
        bus.va = va;
        bus.mode = Some(mode);
    }
    for &(i, flow) in &commit.branches {
        let br = &mut network.branches[i];
        br.p_from = flow.p1;
        br.q_from = flow.q1;
        br.p_to = flow.p2;
        br.q_to = flow.q2;
    }
    for &(i, p, q) in &commit.generators {
        network.generators[i].p = p;
        network.generators[i].q = q;
    }
    for &(i, p, q) in &commit.loads {
        network.loads[i].p = p;
        network.loads[i].q = q;
    }
    for &(i, sections, q) in &commit.shunts {
        network.shunts[i].sections = sections;
        network.shunts[i].q = q;
    }
    for &(i, p1, p2) in &commit.hvdc {
        network.hvdc_lines[i].p1 = p1;
        network.hvdc_lines[i].p2 = p2;
    }
    for &(i, position) in &commit.ratio_taps {
        if let Some(rtc) = network.branches[i].ratio_tap_changer.as_mut() {
            rtc.position = position;
        }
    }
    for &(i, position) in &commit.phase_taps {
        if let Some(ptc) = network.branches[i].phase_tap_changer.as_mut() {
            ptc.position = position;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reactive_split_follows_range() {
        let q = split_reactive(0.5, &[(-1.0, 1.0), (0.0, 1.0)]);
        // Σmin = -1, Σrange = 3.
        assert!((q[0] - (-1.0 + 1.5 * 2.0 / 3.0)).abs() < 1e-12);
        assert!((q[1] - 1.5 / 3.0).abs() < 1e-12);
        assert!((q.iter().sum::<f64>() - 0.5).abs() < 1e-12);

        let q = split_reactive(0.4, &[(0.0, 0.0), (0.0, 0.0)]);
        assert_eq!(q, vec![0.2, 0.2]);
    }
}
