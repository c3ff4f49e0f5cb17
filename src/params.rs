use derive_builder::Builder;

use crate::error::LoadFlowError;

/// How the active power imbalance is spread in a distributed slack.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum BalanceType {
    /// Generators, in proportion to their maximum active power.
    ProportionalToGenerationPMax,
    /// Generators, in proportion to their active power set point.
    ProportionalToGenerationP,
    /// Generators, in proportion to the margin left before their limit.
    ProportionalToGenerationRemainingMargin,
    /// Loads, in proportion to their active power demand.
    ProportionalToLoad,
}

#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum ConnectedComponentMode {
    /// Only the component with the most buses.
    Main,
    All,
}

#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum VoltageInitMode {
    /// Flat start at 1 p.u. (or the generator set point) and zero angle.
    UniformValues,
    /// Voltages stored in the network by a previous run.
    PreviousValues,
    /// Uniform magnitudes with angles from a DC power flow.
    DcValues,
}

#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum LowImpedanceBranchMode {
    /// Merge both ends into one electrical node.
    ReplaceByZeroImpedanceLine,
    /// Keep the branch with the threshold as reactance.
    ReplaceByMinImpedanceLine,
}

/// Discrete voltage control mode of transformers and shunts.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum ControlMode {
    /// One tap or section step per outer iteration.
    Incremental,
    /// Solved as a continuous variable, then rounded.
    Continuous,
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub enum SlackBusSelection {
    /// Most connected bus at the highest nominal voltage.
    MostMeshed,
    /// First bus of the component in input order.
    First,
    /// Bus with the most connected generation capacity.
    LargestGenerator,
    /// First listed bus found in the component.
    Name(Vec<String>),
}

/// What happens to active power left undistributed once every
/// participating element is at its limit.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum SlackDistributionFailure {
    LeaveOnSlackBus,
    Fail,
}

/// System wide ZIP load weights.
///
/// Each array gives the constant power, constant current and constant
/// impedance shares of active (`pw`) or reactive (`qw`) demand.
#[derive(Debug, Default, PartialEq, Copy, Clone)]
pub struct SysWideZipLoads {
    pub pw: Option<[f64; 3]>,
    pub qw: Option<[f64; 3]>,
}

/// Load flow options. Build with [`LoadFlowParametersBuilder`].
#[derive(Debug, Clone, PartialEq, Builder)]
#[builder(default)]
pub struct LoadFlowParameters {
    pub distributed_slack: bool,
    pub balance_type: BalanceType,
    pub connected_component_mode: ConnectedComponentMode,

    pub phase_shifter_regulation_on: bool,
    pub transformer_voltage_control_on: bool,
    pub shunt_voltage_control_on: bool,
    pub hvdc_ac_emulation: bool,
    /// Enforce generator reactive power limits at the expense of |V|.
    pub use_reactive_limits: bool,

    pub voltage_init_mode: VoltageInitMode,

    /// Maximum number of Newton iterations of each inner solve.
    pub max_iterations: usize,
    pub max_outer_loop_iterations: usize,
    /// Termination tolerance on per unit mismatch.
    pub tolerance: f64,

    pub low_impedance_branch_mode: LowImpedanceBranchMode,
    /// Series impedance (p.u.) below which a branch is low impedance.
    pub low_impedance_threshold: f64,

    pub transformer_voltage_control_mode: ControlMode,
    pub shunt_voltage_control_mode: ControlMode,

    pub slack_bus_selection: SlackBusSelection,

    /// Generators may regulate the voltage of another bus.
    pub voltage_remote_control: bool,
    /// Generators may regulate a reactive branch flow.
    pub reactive_power_remote_control: bool,

    /// Slack mismatch (MW) below which distribution stops.
    pub slack_bus_p_max_mismatch: f64,
    pub slack_distribution_failure: SlackDistributionFailure,

    /// Converged voltages outside this range (p.u.) fail the component.
    pub min_realistic_voltage: f64,
    pub max_realistic_voltage: f64,

    pub zip_loads: SysWideZipLoads,
}

impl Default for LoadFlowParameters {
    fn default() -> Self {
        Self {
            distributed_slack: true,
            balance_type: BalanceType::ProportionalToGenerationPMax,
            connected_component_mode: ConnectedComponentMode::Main,
            phase_shifter_regulation_on: false,
            transformer_voltage_control_on: false,
            shunt_voltage_control_on: false,
            hvdc_ac_emulation: true,
            use_reactive_limits: true,
            voltage_init_mode: VoltageInitMode::UniformValues,
            max_iterations: 15,
            max_outer_loop_iterations: 20,
            tolerance: 1e-8,
            low_impedance_branch_mode: LowImpedanceBranchMode::ReplaceByZeroImpedanceLine,
            low_impedance_threshold: 1e-8,
            transformer_voltage_control_mode: ControlMode::Incremental,
            shunt_voltage_control_mode: ControlMode::Incremental,
            slack_bus_selection: SlackBusSelection::MostMeshed,
            voltage_remote_control: true,
            reactive_power_remote_control: false,
            slack_bus_p_max_mismatch: 1.0,
            slack_distribution_failure: SlackDistributionFailure::LeaveOnSlackBus,
            min_realistic_voltage: 0.5,
            max_realistic_voltage: 1.5,
            zip_loads: SysWideZipLoads::default(),
        }
    }
}

impl LoadFlowParameters {
    pub fn builder() -> LoadFlowParametersBuilder {
        LoadFlowParametersBuilder::default()
    }

    /// Options used to validate exchange-format grid models: every control
    /// on, reactive limits off, DC warm start and up to 30 iterations.
    pub fn grid_model_validation() -> Self {
        Self {
            distributed_slack: true,
            balance_type: BalanceType::ProportionalToGenerationPMax,
            connected_component_mode: ConnectedComponentMode::Main,
            phase_shifter_regulation_on: true,
            transformer_voltage_control_on: true,
            shunt_voltage_control_on: true,
            hvdc_ac_emulation: true,
            use_reactive_limits: false,
            voltage_init_mode: VoltageInitMode::DcValues,
            max_iterations: 30,
            low_impedance_branch_mode: LowImpedanceBranchMode::ReplaceByZeroImpedanceLine,
            transformer_voltage_control_mode: ControlMode::Incremental,
            shunt_voltage_control_mode: ControlMode::Incremental,
            slack_bus_selection: SlackBusSelection::MostMeshed,
            voltage_remote_control: true,
            reactive_power_remote_control: true,
            ..Default::default()
        }
    }

    /// Rejects contradictory or out of range options.
    pub fn validate(&self) -> Result<(), LoadFlowError> {
        let err = |msg: String| Err(LoadFlowError::Configuration(msg));

        if self.max_iterations == 0 {
            return err("max_iterations must be positive".to_string());
        }
        if self.max_outer_loop_iterations == 0 {
            return err("max_outer_loop_iterations must be positive".to_string());
        }
        if !(self.tolerance > 0.0 && self.tolerance.is_finite()) {
            return err(format!("tolerance must be positive ({})", self.tolerance));
        }
        if !(self.low_impedance_threshold > 0.0 && self.low_impedance_threshold.is_finite()) {
            return err(format!(
                "low_impedance_threshold must be positive ({})",
                self.low_impedance_threshold
            ));
        }
        if !(self.slack_bus_p_max_mismatch > 0.0) {
            return err(format!(
                "slack_bus_p_max_mismatch must be positive ({})",
                self.slack_bus_p_max_mismatch
            ));
        }
        if !(self.min_realistic_voltage >= 0.0
            && self.min_realistic_voltage < self.max_realistic_voltage)
        {
            return err(format!(
                "realistic voltage range [{}, {}] is empty",
                self.min_realistic_voltage, self.max_realistic_voltage
            ));
        }
        if let SlackBusSelection::Name(ids) = &self.slack_bus_selection {
            if ids.is_empty() {
                return err("slack bus selection by name requires at least one id".to_string());
            }
        }
        for (name, w) in [("pw", self.zip_loads.pw), ("qw", self.zip_loads.qw)] {
            if let Some(w) = w {
                let sum: f64 = w.iter().sum();
                if (sum - 1.0).abs() > 1e-9 || w.iter().any(|&wi| wi < 0.0) {
                    return err(format!("ZIP weights {} must be non-negative and sum to 1", name));
                }
            }
        }
        Ok(())
    }
}

impl From<LoadFlowParametersBuilderError> for LoadFlowError {
    fn from(err: LoadFlowParametersBuilderError) -> Self {
        LoadFlowError::Configuration(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_keeps_defaults() {
        let params = LoadFlowParameters::builder()
            .max_iterations(30)
            .voltage_init_mode(VoltageInitMode::DcValues)
            .build()
            .unwrap();
        assert_eq!(params.max_iterations, 30);
        assert_eq!(params.voltage_init_mode, VoltageInitMode::DcValues);
        assert_eq!(params.tolerance, 1e-8);
        assert!(params.distributed_slack);
        assert!(params.validate().is_ok());
    }

    #[test]
    fn rejects_contradictory_options() {
        let params = LoadFlowParameters {
            min_realistic_voltage: 1.2,
            max_realistic_voltage: 0.8,
            ..Default::default()
        };
        assert!(matches!(
            params.validate(),
            Err(LoadFlowError::Configuration(_))
        ));

        let params = LoadFlowParameters {
            slack_bus_selection: SlackBusSelection::Name(vec![]),
            ..Default::default()
        };
        assert!(params.validate().is_err());

        let params = LoadFlowParameters {
            zip_loads: SysWideZipLoads {
                pw: Some([0.5, 0.2, 0.2]),
                qw: None,
            },
            ..Default::default()
        };
        assert!(params.validate().is_err());
    }

    #[test]
    fn grid_model_validation_options() {
        let params = LoadFlowParameters::grid_model_validation();
        assert_eq!(params.max_iterations, 30);
        assert!(!params.use_reactive_limits);
        assert!(params.validate().is_ok());
    }
}
