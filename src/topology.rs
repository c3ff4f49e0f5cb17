use std::collections::HashMap;

use crate::error::StructuralError;
use crate::network::Network;
use crate::params::{LoadFlowParameters, LowImpedanceBranchMode};

/// Mapping between external bus ids and internal bus indexes.
#[derive(Clone, Debug, Default)]
pub struct BusOrder {
    pub e2i: HashMap<String, usize>,
    pub i2e: Vec<String>,
}

impl BusOrder {
    fn new(nb: usize) -> Self {
        Self {
            e2i: HashMap::with_capacity(nb),
            i2e: Vec::with_capacity(nb),
        }
    }

    fn index(&self, element: &str, bus: &str) -> Result<usize, StructuralError> {
        self.e2i
            .get(bus)
            .copied()
            .ok_or_else(|| StructuralError::UnknownBus {
                element: element.to_string(),
                bus: bus.to_string(),
            })
    }
}

/// Resolved references and electrical structure of a network.
///
/// All element indexes refer to the vectors of the source [`Network`].
#[derive(Clone, Debug)]
pub struct Topology {
    pub bus: BusOrder,

    /// Bus indexes at the from and to ends of each branch.
    pub branch_ends: Vec<(usize, usize)>,
    /// Bus regulated by each ratio tap changer.
    pub rtc_regulated: Vec<Option<usize>>,

    pub gen_bus: Vec<usize>,
    pub gen_regulated: Vec<Option<usize>>,
    /// Branch of each generator remote reactive power control.
    pub gen_remote_branch: Vec<Option<usize>>,
    pub load_bus: Vec<usize>,
    pub shunt_bus: Vec<usize>,
    pub shunt_regulated: Vec<Option<usize>>,
    pub hvdc_buses: Vec<(usize, usize)>,

    /// Electrical node of each bus once zero impedance branches are merged.
    pub node: Vec<usize>,
    /// Buses of each node in input order.
    pub node_buses: Vec<Vec<usize>>,
    /// Branches merged into a node.
    pub merged: Vec<bool>,
    /// Low impedance branches kept with the threshold as reactance.
    pub min_impedance: Vec<bool>,

    /// Nodes of each connected component. Components are ordered by
    /// decreasing bus count with ties broken by lowest bus index.
    pub components: Vec<Vec<usize>>,
    pub node_component: Vec<usize>,
}

impl Topology {
    pub fn component_of_bus(&self, bus: usize) -> usize {
        self.node_component[self.node[bus]]
    }

    pub fn component_bus_count(&self, c: usize) -> usize {
        self.components[c]
            .iter()
            .map(|&n| self.node_buses[n].len())
            .sum()
    }
}

/// Disjoint sets with path halving.
struct UnionFind {
    parent: Vec<usize>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
        }
    }

    fn find(&mut self, mut i: usize) -> usize {
        while self.parent[i] != i {
            self.parent[i] = self.parent[self.parent[i]];
            i = self.parent[i];
        }
        i
    }

    /// The lower index becomes the root.
    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra < rb {
            self.parent[rb] = ra;
        } else if rb < ra {
            self.parent[ra] = rb;
        }
    }
}

/// Checks every reference in the network and builds its electrical
/// structure.
pub fn build_topology(
    network: &Network,
    params: &LoadFlowParameters,
) -> Result<Topology, StructuralError> {
    let nb = network.buses.len();
    if nb == 0 {
        return Err(StructuralError::EmptyNetwork);
    }

    let mut order = BusOrder::new(nb);
    for (i, b) in network.buses.iter().enumerate() {
        if order.e2i.insert(b.id.clone(), i).is_some() {
            return Err(StructuralError::DuplicateBus(b.id.clone()));
        }
        order.i2e.push(b.id.clone());
    }

    let branch_index: HashMap<&str, usize> = network
        .branches
        .iter()
        .enumerate()
        .map(|(i, br)| (br.id.as_str(), i))
        .collect();

    let mut branch_ends = Vec::with_capacity(network.branches.len());
    let mut rtc_regulated = Vec::with_capacity(network.branches.len());
    for br in &network.branches {
        let element = format!("branch {}", br.id);
        let f = order.index(&element, &br.from_bus)?;
        let t = order.index(&element, &br.to_bus)?;
        branch_ends.push((f, t));

        if !(br.r.is_finite() && br.x.is_finite()) {
            return Err(StructuralError::InvalidImpedance(br.id.clone()));
        }

        let regulated = match &br.ratio_tap_changer {
            Some(rtc) => {
                if rtc.position >= rtc.ratios.len() {
                    return Err(StructuralError::TapPosition {
                        element: format!("ratio tap changer of {}", br.id),
                        position: rtc.position,
                        max: rtc.high_position(),
                    });
                }
                Some(order.index(&element, &rtc.regulated_bus)?)
            }
            None => None,
        };
        rtc_regulated.push(regulated);

        if let Some(ptc) = &br.phase_tap_changer {
            if ptc.position >= ptc.shifts.len() {
                return Err(StructuralError::TapPosition {
                    element: format!("phase tap changer of {}", br.id),
                    position: ptc.position,
                    max: ptc.shifts.len().saturating_sub(1),
                });
            }
        }
    }

    let mut gen_bus = Vec::with_capacity(network.generators.len());
    let mut gen_regulated = Vec::with_capacity(network.generators.len());
    let mut gen_remote_branch = Vec::with_capacity(network.generators.len());
    for g in &network.generators {
        let element = format!("generator {}", g.id);
        gen_bus.push(order.index(&element, &g.bus)?);
        gen_regulated.push(match &g.regulated_bus {
            Some(id) => Some(order.index(&element, id)?),
            None => None,
        });
        gen_remote_branch.push(match &g.remote_reactive_control {
            Some(rrc) => Some(branch_index.get(rrc.branch.as_str()).copied().ok_or_else(
                || StructuralError::UnknownBranch {
                    element: element.clone(),
                    branch: rrc.branch.clone(),
                },
            )?),
            None => None,
        });
    }

    let load_bus = network
        .loads
        .iter()
        .map(|l| order.index(&format!("load {}", l.id), &l.bus))
        .collect::<Result<Vec<usize>, StructuralError>>()?;

    let mut shunt_bus = Vec::with_capacity(network.shunts.len());
    let mut shunt_regulated = Vec::with_capacity(network.shunts.len());
    for sh in &network.shunts {
        let element = format!("shunt {}", sh.id);
        shunt_bus.push(order.index(&element, &sh.bus)?);
        shunt_regulated.push(match &sh.regulated_bus {
            Some(id) => Some(order.index(&element, id)?),
            None => None,
        });
        if sh.sections > sh.max_sections {
            return Err(StructuralError::TapPosition {
                element,
                position: sh.sections,
                max: sh.max_sections,
            });
        }
    }

    let hvdc_buses = network
        .hvdc_lines
        .iter()
        .map(|h| {
            let element = format!("HVDC line {}", h.id);
            Ok((order.index(&element, &h.bus1)?, order.index(&element, &h.bus2)?))
        })
        .collect::<Result<Vec<(usize, usize)>, StructuralError>>()?;

    // Zero impedance merging.
    let nl = network.branches.len();
    let mut merged = vec![false; nl];
    let mut min_impedance = vec![false; nl];
    let mut nodes_uf = UnionFind::new(nb);
    for (i, br) in network.branches.iter().enumerate() {
        if !br.is_closed() || br.r.hypot(br.x) >= params.low_impedance_threshold {
            continue;
        }
        let (f, t) = branch_ends[i];
        let regulating = br.ratio_tap_changer.as_ref().map_or(false, |c| c.regulating)
            || br.phase_tap_changer.as_ref().map_or(false, |c| c.regulating);
        let ideal = (br.effective_ratio() - 1.0).abs() < 1e-12
            && br.effective_shift().abs() < 1e-12
            && !regulating;
        if params.low_impedance_branch_mode == LowImpedanceBranchMode::ReplaceByZeroImpedanceLine
            && ideal
        {
            if f != t {
                nodes_uf.union(f, t);
            }
            merged[i] = true;
        } else {
            min_impedance[i] = true;
        }
    }

    // Nodes are numbered by their lowest bus index.
    let mut node = vec![0; nb];
    let mut node_buses: Vec<Vec<usize>> = Vec::new();
    let mut root_node: HashMap<usize, usize> = HashMap::new();
    for i in 0..nb {
        let root = nodes_uf.find(i);
        let n = *root_node.entry(root).or_insert_with(|| {
            node_buses.push(Vec::new());
            node_buses.len() - 1
        });
        node[i] = n;
        node_buses[n].push(i);
    }

    // Connected components over closed branches.
    let nn = node_buses.len();
    let mut comp_uf = UnionFind::new(nn);
    for (i, br) in network.branches.iter().enumerate() {
        if br.is_closed() {
            let (f, t) = branch_ends[i];
            comp_uf.union(node[f], node[t]);
        }
    }
    let mut groups: Vec<Vec<usize>> = Vec::new();
    let mut root_group: HashMap<usize, usize> = HashMap::new();
    for n in 0..nn {
        let root = comp_uf.find(n);
        let g = *root_group.entry(root).or_insert_with(|| {
            groups.push(Vec::new());
            groups.len() - 1
        });
        groups[g].push(n);
    }
    // Groups are already ordered by lowest bus index, and the sort is stable.
    groups.sort_by_key(|g| {
        std::cmp::Reverse(g.iter().map(|&n| node_buses[n].len()).sum::<usize>())
    });

    let mut node_component = vec![0; nn];
    for (c, g) in groups.iter().enumerate() {
        for &n in g {
            node_component[n] = c;
        }
    }
    log::debug!(
        "{} buses, {} nodes, {} connected components",
        nb,
        nn,
        groups.len()
    );

    Ok(Topology {
        bus: order,
        branch_ends,
        rtc_regulated,
        gen_bus,
        gen_regulated,
        gen_remote_branch,
        load_bus,
        shunt_bus,
        shunt_regulated,
        hvdc_buses,
        node,
        node_buses,
        merged,
        min_impedance,
        components: groups,
        node_component,
    })
}

#[cfg(test)]
mod tests {
    use anyhow::{format_err, Result};

    use super::*;
    use crate::network::{Branch, Bus, Generator, Load};

    fn chain() -> Network {
        let mut net = Network::default();
        for id in ["a", "b", "c", "d", "e"] {
            net.buses.push(Bus::new(id, 225.0));
        }
        net.branches.push(Branch::line("ab", "a", "b", 0.01, 0.1, 0.0));
        net.branches.push(Branch::switch("bc", "b", "c", false));
        net.branches.push(Branch::line("de", "d", "e", 0.01, 0.1, 0.0));
        net.generators.push(Generator::new("g", "a", 10.0, 100.0, 1.0));
        net.loads.push(Load::new("l", "c", 10.0, 0.0));
        net
    }

    #[test]
    fn test_components_and_merging() -> Result<()> {
        let net = chain();
        let topo = build_topology(&net, &LoadFlowParameters::default())?;

        if topo.node[1] != topo.node[2] {
            return Err(format_err!("closed switch must merge b and c"));
        }
        if topo.node_buses.len() != 4 {
            return Err(format_err!("expected 4 nodes: {}", topo.node_buses.len()));
        }
        if topo.components.len() != 2 {
            return Err(format_err!("expected 2 components: {:?}", topo.components));
        }
        assert_eq!(topo.component_of_bus(0), 0);
        assert_eq!(topo.component_of_bus(3), 1);
        assert_eq!(topo.component_bus_count(0), 3);
        assert!(topo.merged[1]);
        Ok(())
    }

    #[test]
    fn test_open_switch_splits_component() -> Result<()> {
        let mut net = chain();
        net.branches[1].to_connected = false;
        let topo = build_topology(&net, &LoadFlowParameters::default())?;
        assert_eq!(topo.components.len(), 3);
        // Ties are broken by the lowest bus index.
        assert_eq!(topo.components[1], vec![topo.node[3], topo.node[4]]);
        assert_eq!(topo.component_of_bus(2), 2);
        Ok(())
    }

    #[test]
    fn test_min_impedance_mode_keeps_branch() -> Result<()> {
        let net = chain();
        let params = LoadFlowParameters {
            low_impedance_branch_mode: LowImpedanceBranchMode::ReplaceByMinImpedanceLine,
            ..Default::default()
        };
        let topo = build_topology(&net, &params)?;
        assert!(topo.min_impedance[1]);
        assert_ne!(topo.node[1], topo.node[2]);
        Ok(())
    }

    #[test]
    fn test_dangling_references() {
        let params = LoadFlowParameters::default();

        let mut net = chain();
        net.branches[0].to_bus = "x".to_string();
        assert_eq!(
            build_topology(&net, &params).err(),
            Some(StructuralError::UnknownBus {
                element: "branch ab".to_string(),
                bus: "x".to_string()
            })
        );

        let mut net = chain();
        net.loads[0].bus = "y".to_string();
        assert!(matches!(
            build_topology(&net, &params),
            Err(StructuralError::UnknownBus { .. })
        ));

        let mut net = chain();
        net.buses.push(Bus::new("a", 225.0));
        assert_eq!(
            build_topology(&net, &params).err(),
            Some(StructuralError::DuplicateBus("a".to_string()))
        );

        assert_eq!(
            build_topology(&Network::default(), &params).err(),
            Some(StructuralError::EmptyNetwork)
        );
    }
}
