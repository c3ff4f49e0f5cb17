/// Network is an in-memory bus/branch model of an AC power system with
/// HVDC interconnections.
///
/// Powers are in MW and MVAr, impedances and admittances are in per-unit
/// on the system MVA base, voltage magnitudes are in per-unit of the bus
/// nominal voltage and angles are in degrees. Elements reference buses by
/// id. Result fields are written back by a load flow run.
#[derive(Debug, Clone, PartialEq)]
pub struct Network {
    /// System MVA base used for converting power into per-unit quantities.
    /// Default value is 100.
    pub base_mva: f64,

    pub buses: Vec<Bus>,

    /// Lines, transformers and switches.
    pub branches: Vec<Branch>,

    pub generators: Vec<Generator>,
    pub loads: Vec<Load>,
    pub shunts: Vec<ShuntCompensator>,
    pub hvdc_lines: Vec<HvdcLine>,
}

impl Default for Network {
    fn default() -> Self {
        Self {
            base_mva: 100.0,
            buses: Vec::default(),
            branches: Vec::default(),
            generators: Vec::default(),
            loads: Vec::default(),
            shunts: Vec::default(),
            hvdc_lines: Vec::default(),
        }
    }
}

impl Network {
    pub fn new(base_mva: f64) -> Self {
        Self {
            base_mva,
            ..Default::default()
        }
    }

    /// Number of distinct substations. A bus without a substation counts
    /// as a substation of its own.
    pub fn substation_count(&self) -> usize {
        let mut names = self
            .buses
            .iter()
            .map(|b| b.substation.as_deref().unwrap_or(&b.id))
            .collect::<Vec<&str>>();
        names.sort_unstable();
        names.dedup();
        names.len()
    }

    pub fn bus(&self, id: &str) -> Option<&Bus> {
        self.buses.iter().find(|b| b.id == id)
    }

    pub fn branch(&self, id: &str) -> Option<&Branch> {
        self.branches.iter().find(|br| br.id == id)
    }

    pub fn generator(&self, id: &str) -> Option<&Generator> {
        self.generators.iter().find(|g| g.id == id)
    }

    pub fn shunt(&self, id: &str) -> Option<&ShuntCompensator> {
        self.shunts.iter().find(|sh| sh.id == id)
    }

    pub fn hvdc_line(&self, id: &str) -> Option<&HvdcLine> {
        self.hvdc_lines.iter().find(|h| h.id == id)
    }
}

/// How a bus was modelled in the last load flow.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum BusMode {
    /// Angle reference. Absorbs the active power imbalance.
    Slack,
    /// Voltage magnitude held by a generator.
    VoltageControlled,
    /// Fixed active and reactive power injection.
    FixedInjection,
}

/// Bus is a node in the power system graph structure.
#[derive(Debug, Clone, PartialEq)]
pub struct Bus {
    pub id: String,
    pub substation: Option<String>,

    /// Nominal voltage (kV).
    pub base_kv: f64,

    /// Voltage magnitude (p.u.).
    pub vm: f64,
    /// Voltage angle (degrees).
    pub va: f64,

    /// Connected component number. The main component is 0.
    pub component: Option<usize>,
    pub slack: bool,
    pub mode: Option<BusMode>,
}

impl Bus {
    pub fn new(id: impl Into<String>, base_kv: f64) -> Self {
        Self {
            id: id.into(),
            substation: None,
            base_kv,
            vm: 1.0,
            va: 0.0,
            component: None,
            slack: false,
            mode: None,
        }
    }

    pub fn in_substation(mut self, substation: impl Into<String>) -> Self {
        self.substation = Some(substation.into());
        self
    }
}

#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum BranchKind {
    Line,
    Transformer,
    /// Zero impedance breaker or disconnector.
    Switch,
}

#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum BranchSide {
    From,
    To,
}

/// Off-nominal ratio steps of a transformer with optional voltage
/// regulation.
#[derive(Debug, Clone, PartialEq)]
pub struct RatioTapChanger {
    /// Ratio multiplier of each tap position.
    pub ratios: Vec<f64>,
    pub position: usize,
    pub regulating: bool,
    pub regulated_bus: String,
    /// Target voltage (p.u.).
    pub target_v: f64,
    /// Voltage deadband (p.u.).
    pub deadband: f64,
}

impl RatioTapChanger {
    pub fn high_position(&self) -> usize {
        self.ratios.len().saturating_sub(1)
    }
}

/// Phase shift steps of a transformer with optional active power
/// regulation. The controlled flow is measured at the from end.
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseTapChanger {
    /// Additional phase shift of each tap position (degrees).
    pub shifts: Vec<f64>,
    pub position: usize,
    pub regulating: bool,
    /// Active power target (MW).
    pub target_p: f64,
    /// Active power deadband (MW).
    pub deadband: f64,
}

/// Branch connecting two buses with a pi-model equivalent.
///
/// The off-nominal ratio and phase shift are on the from end.
#[derive(Debug, Clone, PartialEq)]
pub struct Branch {
    pub id: String,
    pub kind: BranchKind,
    pub from_bus: String,
    pub to_bus: String,

    /// Series resistance (p.u.).
    pub r: f64,
    /// Series reactance (p.u.).
    pub x: f64,

    /// Shunt conductance at the from end (p.u.).
    pub g1: f64,
    /// Shunt susceptance at the from end (p.u.).
    pub b1: f64,
    /// Shunt conductance at the to end (p.u.).
    pub g2: f64,
    /// Shunt susceptance at the to end (p.u.).
    pub b2: f64,

    /// Off-nominal turns ratio.
    pub ratio: f64,
    /// Phase shift angle (degrees).
    pub shift: f64,

    pub from_connected: bool,
    pub to_connected: bool,

    pub ratio_tap_changer: Option<RatioTapChanger>,
    pub phase_tap_changer: Option<PhaseTapChanger>,

    /// Active power leaving the from bus (MW).
    pub p_from: f64,
    /// Reactive power leaving the from bus (MVAr).
    pub q_from: f64,
    /// Active power leaving the to bus (MW).
    pub p_to: f64,
    /// Reactive power leaving the to bus (MVAr).
    pub q_to: f64,
}

impl Branch {
    fn new(
        id: impl Into<String>,
        kind: BranchKind,
        from_bus: impl Into<String>,
        to_bus: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            from_bus: from_bus.into(),
            to_bus: to_bus.into(),
            r: 0.0,
            x: 0.0,
            g1: 0.0,
            b1: 0.0,
            g2: 0.0,
            b2: 0.0,
            ratio: 1.0,
            shift: 0.0,
            from_connected: true,
            to_connected: true,
            ratio_tap_changer: None,
            phase_tap_changer: None,
            p_from: 0.0,
            q_from: 0.0,
            p_to: 0.0,
            q_to: 0.0,
        }
    }

    /// Line with total charging susceptance `b` split equally between
    /// both ends.
    pub fn line(
        id: impl Into<String>,
        from_bus: impl Into<String>,
        to_bus: impl Into<String>,
        r: f64,
        x: f64,
        b: f64,
    ) -> Self {
        Self {
            r,
            x,
            b1: b / 2.0,
            b2: b / 2.0,
            ..Self::new(id, BranchKind::Line, from_bus, to_bus)
        }
    }

    pub fn transformer(
        id: impl Into<String>,
        from_bus: impl Into<String>,
        to_bus: impl Into<String>,
        r: f64,
        x: f64,
        ratio: f64,
    ) -> Self {
        Self {
            r,
            x,
            ratio,
            ..Self::new(id, BranchKind::Transformer, from_bus, to_bus)
        }
    }

    pub fn switch(
        id: impl Into<String>,
        from_bus: impl Into<String>,
        to_bus: impl Into<String>,
        open: bool,
    ) -> Self {
        Self {
            from_connected: !open,
            to_connected: !open,
            ..Self::new(id, BranchKind::Switch, from_bus, to_bus)
        }
    }

    /// Closed at both ends.
    pub fn is_closed(&self) -> bool {
        self.from_connected && self.to_connected
    }

    /// Ratio including the current ratio tap position.
    pub fn effective_ratio(&self) -> f64 {
        let step = self
            .ratio_tap_changer
            .as_ref()
            .and_then(|rtc| rtc.ratios.get(rtc.position).copied())
            .unwrap_or(1.0);
        self.ratio * step
    }

    /// Phase shift including the current phase tap position (degrees).
    pub fn effective_shift(&self) -> f64 {
        let step = self
            .phase_tap_changer
            .as_ref()
            .and_then(|ptc| ptc.shifts.get(ptc.position).copied())
            .unwrap_or(0.0);
        self.shift + step
    }
}

/// Reactive power flow at one end of a branch regulated by a generator.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteReactivePowerControl {
    pub branch: String,
    pub side: BranchSide,
    /// Reactive power target leaving the bus at `side` (MVAr).
    pub target_q: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Generator {
    pub id: String,
    pub bus: String,
    pub connected: bool,

    /// Active power set point (MW).
    pub target_p: f64,
    /// Reactive power set point when not regulating voltage (MVAr).
    pub target_q: f64,

    pub min_p: f64,
    pub max_p: f64,
    pub min_q: f64,
    pub max_q: f64,

    pub voltage_regulator_on: bool,
    /// Voltage set point (p.u.).
    pub target_v: f64,
    /// Bus whose voltage is regulated. Defaults to the connection bus.
    pub regulated_bus: Option<String>,

    pub remote_reactive_control: Option<RemoteReactivePowerControl>,

    /// Takes part in slack distribution.
    pub participate: bool,

    /// Active power output (MW).
    pub p: f64,
    /// Reactive power output (MVAr).
    pub q: f64,
}

impl Generator {
    /// Voltage regulating generator with unlimited reactive range.
    pub fn new(
        id: impl Into<String>,
        bus: impl Into<String>,
        target_p: f64,
        max_p: f64,
        target_v: f64,
    ) -> Self {
        Self {
            id: id.into(),
            bus: bus.into(),
            connected: true,
            target_p,
            target_q: 0.0,
            min_p: 0.0,
            max_p,
            min_q: -9999.0,
            max_q: 9999.0,
            voltage_regulator_on: true,
            target_v,
            regulated_bus: None,
            remote_reactive_control: None,
            participate: true,
            p: 0.0,
            q: 0.0,
        }
    }

    pub fn with_q_limits(mut self, min_q: f64, max_q: f64) -> Self {
        self.min_q = min_q;
        self.max_q = max_q;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Load {
    pub id: String,
    pub bus: String,
    pub connected: bool,

    /// Active power demand at nominal voltage (MW).
    pub p0: f64,
    /// Reactive power demand at nominal voltage (MVAr).
    pub q0: f64,

    pub p: f64,
    pub q: f64,
}

impl Load {
    pub fn new(id: impl Into<String>, bus: impl Into<String>, p0: f64, q0: f64) -> Self {
        Self {
            id: id.into(),
            bus: bus.into(),
            connected: true,
            p0,
            q0,
            p: 0.0,
            q: 0.0,
        }
    }
}

/// Switched shunt with linear sections.
#[derive(Debug, Clone, PartialEq)]
pub struct ShuntCompensator {
    pub id: String,
    pub bus: String,
    pub connected: bool,

    /// Conductance per section (p.u.).
    pub g_per_section: f64,
    /// Susceptance per section (p.u.). Positive is capacitive.
    pub b_per_section: f64,
    pub sections: usize,
    pub max_sections: usize,

    pub voltage_regulator_on: bool,
    /// Voltage set point (p.u.).
    pub target_v: f64,
    /// Voltage deadband (p.u.).
    pub deadband: f64,
    pub regulated_bus: Option<String>,

    /// Reactive power injected (MVAr).
    pub q: f64,
}

impl ShuntCompensator {
    pub fn new(
        id: impl Into<String>,
        bus: impl Into<String>,
        b_per_section: f64,
        sections: usize,
        max_sections: usize,
    ) -> Self {
        Self {
            id: id.into(),
            bus: bus.into(),
            connected: true,
            g_per_section: 0.0,
            b_per_section,
            sections,
            max_sections,
            voltage_regulator_on: false,
            target_v: 1.0,
            deadband: 0.0,
            regulated_bus: None,
            q: 0.0,
        }
    }
}

/// Active power of an HVDC line follows `p0 + k * (θ1 - θ2)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AcEmulation {
    /// Droop (MW/degree).
    pub k: f64,
    /// Offset (MW).
    pub p0: f64,
}

/// Point-to-point HVDC line between two converter stations.
#[derive(Debug, Clone, PartialEq)]
pub struct HvdcLine {
    pub id: String,
    pub bus1: String,
    pub bus2: String,
    pub connected: bool,

    /// Active power flowing from station 1 to station 2 (MW).
    pub active_power_setpoint: f64,
    pub max_p: f64,

    /// Fractional losses of each converter station.
    pub loss_factor1: f64,
    pub loss_factor2: f64,

    /// Reactive power injected by each converter station (MVAr).
    pub q1: f64,
    pub q2: f64,

    pub ac_emulation: Option<AcEmulation>,

    /// Active power injected into the AC grid at station 1 (MW).
    pub p1: f64,
    /// Active power injected into the AC grid at station 2 (MW).
    pub p2: f64,
}

impl HvdcLine {
    pub fn new(
        id: impl Into<String>,
        bus1: impl Into<String>,
        bus2: impl Into<String>,
        active_power_setpoint: f64,
        max_p: f64,
    ) -> Self {
        Self {
            id: id.into(),
            bus1: bus1.into(),
            bus2: bus2.into(),
            connected: true,
            active_power_setpoint,
            max_p,
            loss_factor1: 0.0,
            loss_factor2: 0.0,
            q1: 0.0,
            q2: 0.0,
            ac_emulation: None,
            p1: 0.0,
            p2: 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substations_count_buses_without_substation() {
        let mut net = Network::default();
        net.buses.push(Bus::new("a1", 400.0).in_substation("A"));
        net.buses.push(Bus::new("a2", 225.0).in_substation("A"));
        net.buses.push(Bus::new("b", 225.0));
        assert_eq!(net.substation_count(), 2);
    }

    #[test]
    fn effective_ratio_includes_tap() {
        let mut br = Branch::transformer("t", "a", "b", 0.0, 0.1, 1.02);
        br.ratio_tap_changer = Some(RatioTapChanger {
            ratios: vec![0.9, 1.0, 1.1],
            position: 2,
            regulating: false,
            regulated_bus: "b".to_string(),
            target_v: 1.0,
            deadband: 0.0,
        });
        assert!((br.effective_ratio() - 1.122).abs() < 1e-12);
        assert_eq!(br.effective_shift(), 0.0);
    }
}
