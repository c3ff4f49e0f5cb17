use std::f64::consts::PI;

use num_complex::Complex64;
use num_traits::Zero;

use crate::network::{BranchSide, Network};
use crate::params::{ControlMode, LoadFlowParameters, SysWideZipLoads};
use crate::topology::Topology;
use crate::ybus::PiModel;

/// Impedant branch closed at both ends.
#[derive(Debug, Clone)]
pub(crate) struct LfBranch {
    /// Index in the network branches.
    pub index: usize,
    pub f: usize,
    pub t: usize,
    pub model: PiModel,
    pub rho: f64,
    /// Phase shift (radians).
    pub alpha: f64,
}

#[derive(Debug, Clone)]
pub(crate) struct LfGenerator {
    pub index: usize,
    pub node: usize,
    pub target_p: f64,
    pub min_p: f64,
    pub max_p: f64,
    pub target_q: f64,
    pub min_q: f64,
    pub max_q: f64,
    pub participate: bool,
    /// Takes part in a voltage control as a controller.
    pub voltage_control: bool,
    /// Takes part in a remote reactive power control.
    pub reactive_control: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct LfLoad {
    pub index: usize,
    pub node: usize,
    pub p0: f64,
    pub q0: f64,
}

#[derive(Debug, Clone)]
pub(crate) struct LfShunt {
    pub index: usize,
    pub node: usize,
    pub g: f64,
    pub b: f64,
    pub sections: usize,
    pub max_sections: usize,
}

#[derive(Debug, Clone)]
pub(crate) struct LfHvdc {
    pub index: usize,
    pub node1: Option<usize>,
    pub node2: Option<usize>,
    /// Active power from station 1 to station 2.
    pub p_set: f64,
    pub max_p: f64,
    pub loss1: f64,
    pub loss2: f64,
    pub q1: f64,
    pub q2: f64,
    /// Droop (p.u./rad) and offset (p.u.) when emulating an AC line.
    pub emulation: Option<(f64, f64)>,
}

/// Generator voltage control of a node by the generators of another
/// (or the same) node.
#[derive(Debug, Clone)]
pub(crate) struct VoltageControl {
    pub controller: usize,
    pub controlled: usize,
    pub target_v: f64,
}

/// Reactive flow at one end of a branch held by the generators of a node.
#[derive(Debug, Clone)]
pub(crate) struct ReactiveControl {
    pub controller: usize,
    pub branch: usize,
    pub side: BranchSide,
    pub target_q: f64,
}

#[derive(Debug, Clone)]
pub(crate) struct TransformerControl {
    pub branch: usize,
    pub controlled: usize,
    pub target_v: f64,
    pub deadband: f64,
    /// Ratio at each tap position.
    pub ratios: Vec<f64>,
    pub mode: ControlMode,
}

#[derive(Debug, Clone)]
pub(crate) struct ShuntControl {
    pub shunt: usize,
    pub controlled: usize,
    pub target_v: f64,
    pub deadband: f64,
    pub mode: ControlMode,
}

#[derive(Debug, Clone)]
pub(crate) struct PhaseControl {
    pub branch: usize,
    /// Active power target at the from end (p.u.).
    pub target_p: f64,
    pub deadband: f64,
    /// Phase shift at each tap position (radians).
    pub shifts: Vec<f64>,
}

/// Solver model of one connected component.
#[derive(Debug, Clone)]
pub(crate) struct LfNetwork {
    /// Component number.
    pub num: usize,
    pub base_mva: f64,
    /// Topology node of each local node.
    pub nodes: Vec<usize>,
    /// Local node of the slack bus.
    pub slack: usize,

    pub branches: Vec<LfBranch>,
    /// Fixed shunt admittance of each node, including half-open branches.
    pub fixed_shunt: Vec<Complex64>,
    /// Branch index, connected end and equivalent shunt of each branch
    /// open at one end.
    pub half_open: Vec<(usize, BranchSide, Complex64)>,
    pub generators: Vec<LfGenerator>,
    pub loads: Vec<LfLoad>,
    pub shunts: Vec<LfShunt>,
    pub hvdc: Vec<LfHvdc>,

    pub voltage_controls: Vec<VoltageControl>,
    pub reactive_controls: Vec<ReactiveControl>,
    pub transformer_controls: Vec<TransformerControl>,
    pub shunt_controls: Vec<ShuntControl>,
    pub phase_controls: Vec<PhaseControl>,

    pub pw: [f64; 3],
    pub qw: [f64; 3],
}

impl LfNetwork {
    /// Builds the solver model of component `num` with the given slack bus.
    pub fn new(
        network: &Network,
        topo: &Topology,
        params: &LoadFlowParameters,
        num: usize,
        slack_bus: usize,
    ) -> Self {
        let base_mva = network.base_mva;
        let nodes = topo.components[num].clone();
        let mut local: Vec<Option<usize>> = vec![None; topo.node_buses.len()];
        for (i, &n) in nodes.iter().enumerate() {
            local[n] = Some(i);
        }
        let local_bus = |bus: usize| local[topo.node[bus]];

        let mut branches = Vec::new();
        let mut branch_local: Vec<Option<usize>> = vec![None; network.branches.len()];
        let mut fixed_shunt = vec![Complex64::zero(); nodes.len()];
        let mut half_open = Vec::new();
        for (i, br) in network.branches.iter().enumerate() {
            let (f, t) = topo.branch_ends[i];
            let rho = br.effective_ratio();
            let alpha = br.effective_shift() * PI / 180.0;
            if topo.merged[i] {
                if let (Some(lf), Some(lt)) = (local_bus(f), local_bus(t)) {
                    fixed_shunt[lf] += Complex64::new(br.g1, br.b1);
                    fixed_shunt[lt] += Complex64::new(br.g2, br.b2);
                }
                continue;
            }
            let low = br.r.hypot(br.x) < params.low_impedance_threshold;
            let (r, x) = if topo.min_impedance[i] || (low && !br.is_closed()) {
                (0.0, params.low_impedance_threshold)
            } else {
                (br.r, br.x)
            };
            let model = PiModel::new(r, x, br.g1, br.b1, br.g2, br.b2);
            match (br.from_connected, br.to_connected) {
                (true, true) => {
                    if let (Some(lf), Some(lt)) = (local_bus(f), local_bus(t)) {
                        branch_local[i] = Some(branches.len());
                        branches.push(LfBranch {
                            index: i,
                            f: lf,
                            t: lt,
                            model,
                            rho,
                            alpha,
                        });
                    }
                }
                (true, false) => {
                    if let Some(lf) = local_bus(f) {
                        let y = model.open_to_shunt(rho);
                        fixed_shunt[lf] += y;
                        half_open.push((i, BranchSide::From, y));
                    }
                }
                (false, true) => {
                    if let Some(lt) = local_bus(t) {
                        let y = model.open_from_shunt();
                        fixed_shunt[lt] += y;
                        half_open.push((i, BranchSide::To, y));
                    }
                }
                (false, false) => {}
            }
        }

        let mut generators = Vec::new();
        for (i, g) in network.generators.iter().enumerate() {
            if !g.connected {
                continue;
            }
            if let Some(node) = local_bus(topo.gen_bus[i]) {
                generators.push(LfGenerator {
                    index: i,
                    node,
                    target_p: g.target_p / base_mva,
                    min_p: g.min_p / base_mva,
                    max_p: g.max_p / base_mva,
                    target_q: g.target_q / base_mva,
                    min_q: g.min_q / base_mva,
                    max_q: g.max_q / base_mva,
                    participate: g.participate,
                    voltage_control: false,
                    reactive_control: false,
                });
            }
        }

        let loads = network
            .loads
            .iter()
            .enumerate()
            .filter(|(_, l)| l.connected)
            .filter_map(|(i, l)| {
                local_bus(topo.load_bus[i]).map(|node| LfLoad {
                    index: i,
                    node,
                    p0: l.p0 / base_mva,
                    q0: l.q0 / base_mva,
                })
            })
            .collect::<Vec<LfLoad>>();

        let shunts = network
            .shunts
            .iter()
            .enumerate()
            .filter(|(_, sh)| sh.connected)
            .filter_map(|(i, sh)| {
                local_bus(topo.shunt_bus[i]).map(|node| LfShunt {
                    index: i,
                    node,
                    g: sh.g_per_section,
                    b: sh.b_per_section,
                    sections: sh.sections,
                    max_sections: sh.max_sections,
                })
            })
            .collect::<Vec<LfShunt>>();

        let mut hvdc = Vec::new();
        for (i, h) in network.hvdc_lines.iter().enumerate() {
            if !h.connected {
                continue;
            }
            let (b1, b2) = topo.hvdc_buses[i];
            let (node1, node2) = (local_bus(b1), local_bus(b2));
            if node1.is_none() && node2.is_none() {
                continue;
            }
            let max_p = h.max_p / base_mva;
            let emulation = match h.ac_emulation {
                Some(ac) if params.hvdc_ac_emulation && node1.is_some() && node2.is_some() => {
                    Some((ac.k * 180.0 / PI / base_mva, ac.p0 / base_mva))
                }
                Some(_) if params.hvdc_ac_emulation => {
                    log::warn!(
                        "HVDC line {} ends are in different components, AC emulation disabled",
                        h.id
                    );
                    None
                }
                _ => None,
            };
            hvdc.push(LfHvdc {
                index: i,
                node1,
                node2,
                p_set: (h.active_power_setpoint / base_mva).clamp(-max_p, max_p),
                max_p,
                loss1: h.loss_factor1,
                loss2: h.loss_factor2,
                q1: h.q1 / base_mva,
                q2: h.q2 / base_mva,
                emulation,
            });
        }

        let slack = local_bus(slack_bus).unwrap_or(0);
        let SysWideZipLoads { pw, qw } = params.zip_loads;
        let pw = pw.unwrap_or([1.0, 0.0, 0.0]);
        let qw = qw.unwrap_or(pw);

        let mut net = Self {
            num,
            base_mva,
            nodes,
            slack,
            branches,
            fixed_shunt,
            half_open,
            generators,
            loads,
            shunts,
            hvdc,
            voltage_controls: Vec::new(),
            reactive_controls: Vec::new(),
            transformer_controls: Vec::new(),
            shunt_controls: Vec::new(),
            phase_controls: Vec::new(),
            pw,
            qw,
        };
        net.setup_generator_controls(network, topo, params, &local);
        net.setup_reactive_controls(network, params, &branch_local);
        net.setup_transformer_controls(network, topo, params, &local);
        net.setup_shunt_controls(network, topo, params, &local);
        net.setup_phase_controls(network, params);
        net
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    fn setup_generator_controls(
        &mut self,
        network: &Network,
        topo: &Topology,
        params: &LoadFlowParameters,
        local: &[Option<usize>],
    ) {
        for k in 0..self.generators.len() {
            let index = self.generators[k].index;
            let node = self.generators[k].node;
            let g = &network.generators[index];
            if !g.voltage_regulator_on {
                continue;
            }
            if !(g.target_v > 0.0 && g.target_v.is_finite()) {
                log::warn!("generator {} has an invalid target voltage", g.id);
                continue;
            }
            let controlled = match topo.gen_regulated[index] {
                Some(bus) if params.voltage_remote_control => match local[topo.node[bus]] {
                    Some(n) => n,
                    None => {
                        log::warn!(
                            "generator {} regulates a bus outside its component, using local control",
                            g.id
                        );
                        node
                    }
                },
                _ => node,
            };

            if let Some(vc) = self.voltage_controls.iter().find(|vc| vc.controller == node) {
                if vc.controlled != controlled {
                    log::warn!(
                        "generator {} regulates another bus than its neighbours, fixed reactive power",
                        g.id
                    );
                    continue;
                }
                if (vc.target_v - g.target_v).abs() > 1e-9 {
                    log::warn!(
                        "generator {} target voltage {} ignored, bus already regulated at {}",
                        g.id,
                        g.target_v,
                        vc.target_v
                    );
                }
                self.generators[k].voltage_control = true;
                continue;
            }
            if self
                .voltage_controls
                .iter()
                .any(|vc| vc.controlled == controlled)
            {
                log::warn!(
                    "generator {} regulates a bus already controlled by another generator, fixed reactive power",
                    g.id
                );
                continue;
            }
            self.voltage_controls.push(VoltageControl {
                controller: node,
                controlled,
                target_v: g.target_v,
            });
            self.generators[k].voltage_control = true;
        }
    }

    fn setup_reactive_controls(
        &mut self,
        network: &Network,
        params: &LoadFlowParameters,
        branch_local: &[Option<usize>],
    ) {
        if !params.reactive_power_remote_control {
            return;
        }
        let branch_index: Vec<(&str, usize)> = network
            .branches
            .iter()
            .enumerate()
            .map(|(i, br)| (br.id.as_str(), i))
            .collect();
        for k in 0..self.generators.len() {
            let gen = &self.generators[k];
            let g = &network.generators[gen.index];
            let rrc = match &g.remote_reactive_control {
                Some(rrc) if !gen.voltage_control => rrc,
                _ => continue,
            };
            let node = gen.node;
            if self.voltage_controls.iter().any(|vc| vc.controller == node) {
                log::warn!(
                    "generator {} bus already regulates a voltage, reactive control disabled",
                    g.id
                );
                continue;
            }
            let branch = branch_index
                .iter()
                .find(|(id, _)| *id == rrc.branch)
                .and_then(|&(_, i)| branch_local[i]);
            let branch = match branch {
                Some(b) => b,
                None => {
                    log::warn!(
                        "generator {} controls branch {} which is not a closed impedant branch of its component",
                        g.id,
                        rrc.branch
                    );
                    continue;
                }
            };
            let target_q = rrc.target_q / self.base_mva;
            if let Some(rc) = self.reactive_controls.iter().find(|rc| rc.controller == node) {
                if rc.branch == branch && rc.side == rrc.side {
                    self.generators[k].reactive_control = true;
                } else {
                    log::warn!("generator {} reactive control conflicts, disabled", g.id);
                }
                continue;
            }
            if self
                .reactive_controls
                .iter()
                .any(|rc| rc.branch == branch && rc.side == rrc.side)
            {
                log::warn!(
                    "branch {} reactive flow already controlled, generator {} control disabled",
                    rrc.branch,
                    g.id
                );
                continue;
            }
            self.reactive_controls.push(ReactiveControl {
                controller: node,
                branch,
                side: rrc.side,
                target_q,
            });
            self.generators[k].reactive_control = true;
        }
    }

    fn setup_transformer_controls(
        &mut self,
        network: &Network,
        topo: &Topology,
        params: &LoadFlowParameters,
        local: &[Option<usize>],
    ) {
        if !params.transformer_voltage_control_on {
            return;
        }
        for (k, lb) in self.branches.iter().enumerate() {
            let br = &network.branches[lb.index];
            let rtc = match &br.ratio_tap_changer {
                Some(rtc) if rtc.regulating => rtc,
                _ => continue,
            };
            let controlled = match topo.rtc_regulated[lb.index].and_then(|b| local[topo.node[b]]) {
                Some(n) => n,
                None => {
                    log::warn!("transformer {} regulates a bus outside its component", br.id);
                    continue;
                }
            };
            if self
                .voltage_controls
                .iter()
                .any(|vc| vc.controlled == controlled)
            {
                log::warn!(
                    "transformer {} voltage control disabled, bus already controlled by a generator",
                    br.id
                );
                continue;
            }
            if self
                .transformer_controls
                .iter()
                .any(|tc| tc.controlled == controlled)
            {
                log::warn!(
                    "transformer {} voltage control disabled, bus already controlled by a transformer",
                    br.id
                );
                continue;
            }
            self.transformer_controls.push(TransformerControl {
                branch: k,
                controlled,
                target_v: rtc.target_v,
                deadband: rtc.deadband,
                ratios: rtc.ratios.iter().map(|r| br.ratio * r).collect(),
                mode: params.transformer_voltage_control_mode,
            });
        }
    }

    fn setup_shunt_controls(
        &mut self,
        network: &Network,
        topo: &Topology,
        params: &LoadFlowParameters,
        local: &[Option<usize>],
    ) {
        if !params.shunt_voltage_control_on {
            return;
        }
        for (k, ls) in self.shunts.iter().enumerate() {
            let sh = &network.shunts[ls.index];
            if !sh.voltage_regulator_on {
                continue;
            }
            let controlled = match topo.shunt_regulated[ls.index] {
                Some(bus) => match local[topo.node[bus]] {
                    Some(n) => n,
                    None => {
                        log::warn!("shunt {} regulates a bus outside its component", sh.id);
                        continue;
                    }
                },
                None => ls.node,
            };
            let taken = self
                .voltage_controls
                .iter()
                .any(|vc| vc.controlled == controlled)
                || self
                    .transformer_controls
                    .iter()
                    .any(|tc| tc.controlled == controlled)
                || self
                    .shunt_controls
                    .iter()
                    .any(|sc| sc.controlled == controlled);
            if taken {
                log::warn!(
                    "shunt {} voltage control disabled, bus already controlled",
                    sh.id
                );
                continue;
            }
            self.shunt_controls.push(ShuntControl {
                shunt: k,
                controlled,
                target_v: sh.target_v,
                deadband: sh.deadband,
                mode: params.shunt_voltage_control_mode,
            });
        }
    }

    fn setup_phase_controls(&mut self, network: &Network, params: &LoadFlowParameters) {
        if !params.phase_shifter_regulation_on {
            return;
        }
        for (k, lb) in self.branches.iter().enumerate() {
            let br = &network.branches[lb.index];
            if let Some(ptc) = br.phase_tap_changer.as_ref().filter(|ptc| ptc.regulating) {
                self.phase_controls.push(PhaseControl {
                    branch: k,
                    target_p: ptc.target_p / self.base_mva,
                    deadband: ptc.deadband / self.base_mva,
                    shifts: ptc
                        .shifts
                        .iter()
                        .map(|s| (br.shift + s) * PI / 180.0)
                        .collect(),
                });
            }
        }
    }
}

/// Position of a discrete control.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct DiscreteState {
    pub position: usize,
    /// Currently solved as a continuous variable.
    pub continuous: bool,
    /// Direction of the last incremental move.
    pub last_direction: i32,
    /// Frozen after a direction reversal.
    pub locked: bool,
}

/// Mutable state of one component run.
#[derive(Debug, Clone)]
pub(crate) struct SolverState {
    pub v: Vec<f64>,
    /// Voltage angles (radians).
    pub th: Vec<f64>,
    /// Ratio and phase shift of each branch.
    pub rho: Vec<f64>,
    pub alpha: Vec<f64>,
    /// Sections of each shunt, fractional while continuous.
    pub sections: Vec<f64>,
    /// Active power set point of each generator and load (p.u.).
    pub gen_p: Vec<f64>,
    pub load_p: Vec<f64>,

    /// Generator voltage controls still holding voltage.
    pub vc_enabled: Vec<bool>,
    /// Reactive injection of switched voltage controls (p.u.).
    pub vc_fixed_q: Vec<f64>,
    /// Back switches to voltage control.
    pub vc_switches: Vec<usize>,

    pub transformers: Vec<DiscreteState>,
    pub shunts: Vec<DiscreteState>,
    pub phases: Vec<DiscreteState>,
}

impl SolverState {
    /// Flat start at 1 p.u. with controlled nodes at their target.
    pub fn new(net: &LfNetwork, network: &Network) -> Self {
        let n = net.node_count();
        let mut v = vec![1.0; n];
        for vc in &net.voltage_controls {
            v[vc.controlled] = vc.target_v;
        }

        let transformers = net
            .transformer_controls
            .iter()
            .map(|tc| {
                let br = &network.branches[net.branches[tc.branch].index];
                DiscreteState {
                    position: br.ratio_tap_changer.as_ref().map_or(0, |rtc| rtc.position),
                    continuous: tc.mode == ControlMode::Continuous,
                    last_direction: 0,
                    locked: false,
                }
            })
            .collect();
        let shunts = net
            .shunt_controls
            .iter()
            .map(|sc| DiscreteState {
                position: net.shunts[sc.shunt].sections,
                continuous: sc.mode == ControlMode::Continuous,
                last_direction: 0,
                locked: false,
            })
            .collect();
        let phases = net
            .phase_controls
            .iter()
            .map(|pc| {
                let br = &network.branches[net.branches[pc.branch].index];
                DiscreteState {
                    position: br.phase_tap_changer.as_ref().map_or(0, |ptc| ptc.position),
                    continuous: false,
                    last_direction: 0,
                    locked: false,
                }
            })
            .collect();

        Self {
            v,
            th: vec![0.0; n],
            rho: net.branches.iter().map(|b| b.rho).collect(),
            alpha: net.branches.iter().map(|b| b.alpha).collect(),
            sections: net.shunts.iter().map(|s| s.sections as f64).collect(),
            gen_p: net.generators.iter().map(|g| g.target_p).collect(),
            load_p: net.loads.iter().map(|l| l.p0).collect(),
            vc_enabled: vec![true; net.voltage_controls.len()],
            vc_fixed_q: vec![0.0; net.voltage_controls.len()],
            vc_switches: vec![0; net.voltage_controls.len()],
            transformers,
            shunts,
            phases,
        }
    }

    /// Previous magnitudes and angles stored in the network. Missing or
    /// unusable values keep the flat start.
    pub fn load_previous(&mut self, net: &LfNetwork, network: &Network, topo: &Topology) {
        for (i, &n) in net.nodes.iter().enumerate() {
            let bus = &network.buses[topo.node_buses[n][0]];
            if bus.vm > 0.0 && bus.vm.is_finite() && bus.va.is_finite() {
                self.v[i] = bus.vm;
                self.th[i] = bus.va * PI / 180.0;
            }
        }
    }
}
