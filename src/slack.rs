use crate::error::StructuralError;
use crate::network::Network;
use crate::params::{ConnectedComponentMode, SlackBusSelection};
use crate::topology::Topology;

/// Elects the slack bus of a connected component.
///
/// Returns the internal index of the elected bus.
pub(crate) fn select_slack_bus(
    network: &Network,
    topo: &Topology,
    component: usize,
    selection: &SlackBusSelection,
    mode: ConnectedComponentMode,
) -> Result<usize, StructuralError> {
    let mut buses: Vec<usize> = topo.components[component]
        .iter()
        .flat_map(|&n| topo.node_buses[n].iter().copied())
        .collect();
    buses.sort_unstable();

    match selection {
        SlackBusSelection::MostMeshed => Ok(most_meshed(network, topo, &buses)),
        SlackBusSelection::First => Ok(buses[0]),
        SlackBusSelection::LargestGenerator => match largest_generator(network, topo, &buses) {
            Some(bus) => Ok(bus),
            None => {
                log::debug!(
                    "no generator in component {}, electing the most meshed bus",
                    component
                );
                Ok(most_meshed(network, topo, &buses))
            }
        },
        SlackBusSelection::Name(ids) => {
            let mut found = None;
            for id in ids {
                let bus = topo.bus.e2i.get(id).copied().ok_or_else(|| {
                    StructuralError::UnknownBus {
                        element: "slack bus selection".to_string(),
                        bus: id.clone(),
                    }
                })?;
                if found.is_none() && topo.component_of_bus(bus) == component {
                    found = Some(bus);
                }
            }
            match (found, mode) {
                (Some(bus), _) => Ok(bus),
                (None, ConnectedComponentMode::Main) => {
                    Err(StructuralError::DisconnectedSlack(ids.clone()))
                }
                (None, ConnectedComponentMode::All) => {
                    log::warn!(
                        "no listed slack bus in component {}, electing the most meshed bus",
                        component
                    );
                    Ok(most_meshed(network, topo, &buses))
                }
            }
        }
    }
}

/// Among the buses at the highest nominal voltage, picks the one whose
/// node has the most distinct neighbour nodes through impedant branches.
/// Ties go to the smallest bus id.
fn most_meshed(network: &Network, topo: &Topology, buses: &[usize]) -> usize {
    let max_kv = buses
        .iter()
        .map(|&i| network.buses[i].base_kv)
        .fold(f64::NEG_INFINITY, f64::max);

    let mut neighbours: Vec<Vec<usize>> = vec![Vec::new(); topo.node_buses.len()];
    for (i, br) in network.branches.iter().enumerate() {
        if !br.is_closed() || topo.merged[i] {
            continue;
        }
        let (f, t) = topo.branch_ends[i];
        let (nf, nt) = (topo.node[f], topo.node[t]);
        if nf != nt {
            neighbours[nf].push(nt);
            neighbours[nt].push(nf);
        }
    }
    neighbours.iter_mut().for_each(|nb| {
        nb.sort_unstable();
        nb.dedup();
    });

    let mut best: Option<(usize, usize)> = None;
    for &i in buses {
        if network.buses[i].base_kv < max_kv - 1e-9 * max_kv.abs() {
            continue;
        }
        let score = neighbours[topo.node[i]].len();
        best = match best {
            Some((b, s))
                if s > score || (s == score && network.buses[b].id <= network.buses[i].id) =>
            {
                Some((b, s))
            }
            _ => Some((i, score)),
        };
    }
    best.map_or(buses[0], |(b, _)| b)
}

fn largest_generator(network: &Network, topo: &Topology, buses: &[usize]) -> Option<usize> {
    let mut capacity = vec![0.0; network.buses.len()];
    for (g, gen) in network.generators.iter().enumerate() {
        if gen.connected {
            capacity[topo.gen_bus[g]] += gen.max_p;
        }
    }
    let mut best: Option<usize> = None;
    for &i in buses {
        if capacity[i] > 0.0 && best.map_or(true, |b| capacity[i] > capacity[b]) {
            best = Some(i);
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use anyhow::Result;

    use super::*;
    use crate::network::{Branch, Bus, Generator};
    use crate::params::LoadFlowParameters;
    use crate::topology::build_topology;

    /// Star around "hub" at 225 kV with a 400 kV pair.
    fn star() -> Network {
        let mut net = Network::default();
        net.buses.push(Bus::new("z", 225.0));
        net.buses.push(Bus::new("hub", 225.0));
        net.buses.push(Bus::new("y", 225.0));
        net.buses.push(Bus::new("x", 225.0));
        net.buses.push(Bus::new("hv1", 400.0));
        net.buses.push(Bus::new("hv2", 400.0));
        net.branches.push(Branch::line("1", "hub", "x", 0.01, 0.1, 0.0));
        net.branches.push(Branch::line("2", "hub", "y", 0.01, 0.1, 0.0));
        net.branches.push(Branch::line("3", "hub", "z", 0.01, 0.1, 0.0));
        net.branches.push(Branch::line("3bis", "hub", "z", 0.01, 0.1, 0.0));
        net.branches.push(Branch::transformer("t", "hv1", "hub", 0.0, 0.1, 1.0));
        net.branches.push(Branch::line("hv", "hv1", "hv2", 0.01, 0.1, 0.0));
        net.generators.push(Generator::new("g1", "x", 10.0, 50.0, 1.0));
        net.generators.push(Generator::new("g2", "y", 10.0, 80.0, 1.0));
        net
    }

    #[test]
    fn test_most_meshed_prefers_highest_voltage() -> Result<()> {
        let net = star();
        let topo = build_topology(&net, &LoadFlowParameters::default())?;
        let slack = select_slack_bus(
            &net,
            &topo,
            0,
            &SlackBusSelection::MostMeshed,
            ConnectedComponentMode::Main,
        )?;
        // hv1 has two neighbours, hv2 only one.
        assert_eq!(net.buses[slack].id, "hv1");
        Ok(())
    }

    #[test]
    fn test_most_meshed_counts_distinct_neighbours() -> Result<()> {
        let mut net = star();
        net.buses[4].base_kv = 225.0;
        net.buses[5].base_kv = 225.0;
        let topo = build_topology(&net, &LoadFlowParameters::default())?;
        let slack = select_slack_bus(
            &net,
            &topo,
            0,
            &SlackBusSelection::MostMeshed,
            ConnectedComponentMode::Main,
        )?;
        assert_eq!(net.buses[slack].id, "hub");
        Ok(())
    }

    #[test]
    fn test_other_modes() -> Result<()> {
        let net = star();
        let topo = build_topology(&net, &LoadFlowParameters::default())?;
        let main = ConnectedComponentMode::Main;

        let first = select_slack_bus(&net, &topo, 0, &SlackBusSelection::First, main)?;
        assert_eq!(net.buses[first].id, "z");

        let largest =
            select_slack_bus(&net, &topo, 0, &SlackBusSelection::LargestGenerator, main)?;
        assert_eq!(net.buses[largest].id, "y");

        let named = SlackBusSelection::Name(vec!["x".to_string()]);
        let bus = select_slack_bus(&net, &topo, 0, &named, main)?;
        assert_eq!(net.buses[bus].id, "x");

        let unknown = SlackBusSelection::Name(vec!["nope".to_string()]);
        assert!(matches!(
            select_slack_bus(&net, &topo, 0, &unknown, main),
            Err(StructuralError::UnknownBus { .. })
        ));
        Ok(())
    }
}
