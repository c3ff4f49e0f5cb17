use anyhow::{format_err, Result};
use clap::{Parser, ValueEnum};
use powers_lf::cases::{case9, micro_grid, two_bus};
use powers_lf::{
    run_load_flow, BalanceType, ConnectedComponentMode, LoadFlowParameters, Network,
    SlackBusSelection, VoltageInitMode,
};

/// AC load flow of a bundled network.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Network to solve.
    #[arg(long, value_enum, default_value_t = Case::Case9)]
    case: Case,

    /// Initialize voltage angles with a DC power flow.
    #[arg(long, default_value_t = false, conflicts_with = "flat")]
    dc_init: bool,

    /// Start from uniform voltages instead of the stored ones.
    #[arg(long, default_value_t = false)]
    flat: bool,

    /// Maximum number of Newton iterations.
    #[arg(long)]
    max_it: Option<usize>,

    /// Termination tolerance on per unit P & Q mismatch.
    #[arg(long)]
    tol: Option<f64>,

    /// Leave the active power imbalance on the slack bus.
    #[arg(long, default_value_t = false)]
    no_distributed_slack: bool,

    /// Slack distribution key.
    #[arg(long, value_enum)]
    balance: Option<Balance>,

    /// Solve every connected component, not only the main one.
    #[arg(long, default_value_t = false)]
    all_components: bool,

    /// Slack bus election.
    #[arg(long, value_enum)]
    slack: Option<Slack>,

    /// Enforce generator reactive power limits.
    #[arg(long, default_value_t = false)]
    qlim: bool,

    /// Transformer, shunt and phase shifter regulation.
    #[arg(long, default_value_t = false)]
    controls: bool,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum Case {
    Case9,
    MicroGrid,
    TwoBus,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum Balance {
    Pmax,
    P,
    Margin,
    Load,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum Slack {
    MostMeshed,
    First,
    LargestGenerator,
}

fn main() {
    env_logger::Builder::from_default_env()
        .format_level(false)
        .format_target(false)
        .format_timestamp(None)
        .init();

    let cli = Cli::parse();

    match execute(&cli) {
        Ok(_) => {
            std::process::exit(0);
        }
        Err(err) => {
            eprintln!("error: {}", err);
            std::process::exit(2);
        }
    }
}

fn parameters(cli: &Cli) -> Result<LoadFlowParameters> {
    let mut builder = LoadFlowParameters::builder();
    builder
        .distributed_slack(!cli.no_distributed_slack)
        .use_reactive_limits(cli.qlim)
        .transformer_voltage_control_on(cli.controls)
        .shunt_voltage_control_on(cli.controls)
        .phase_shifter_regulation_on(cli.controls)
        .voltage_init_mode(if cli.dc_init {
            VoltageInitMode::DcValues
        } else if cli.flat {
            VoltageInitMode::UniformValues
        } else {
            VoltageInitMode::PreviousValues
        });
    if cli.all_components {
        builder.connected_component_mode(ConnectedComponentMode::All);
    }
    if let Some(max_it) = cli.max_it {
        builder.max_iterations(max_it);
    }
    if let Some(tol) = cli.tol {
        builder.tolerance(tol);
    }
    if let Some(balance) = cli.balance {
        builder.balance_type(match balance {
            Balance::Pmax => BalanceType::ProportionalToGenerationPMax,
            Balance::P => BalanceType::ProportionalToGenerationP,
            Balance::Margin => BalanceType::ProportionalToGenerationRemainingMargin,
            Balance::Load => BalanceType::ProportionalToLoad,
        });
    }
    if let Some(slack) = cli.slack {
        builder.slack_bus_selection(match slack {
            Slack::MostMeshed => SlackBusSelection::MostMeshed,
            Slack::First => SlackBusSelection::First,
            Slack::LargestGenerator => SlackBusSelection::LargestGenerator,
        });
    }
    Ok(builder.build()?)
}

fn execute(cli: &Cli) -> Result<()> {
    let mut network = match cli.case {
        Case::Case9 => case9(),
        Case::MicroGrid => micro_grid(),
        Case::TwoBus => two_bus(),
    };
    let params = parameters(cli)?;

    let result = run_load_flow(&mut network, &params)?;

    for c in &result.components {
        println!(
            "component {}: {} (slack {}, {} Newton iterations, {} outer iterations, {:.3} MW distributed, {:.3} MW left on slack)",
            c.component,
            c.status,
            c.slack_bus,
            c.newton_iterations,
            c.outer_iterations,
            c.distributed_p,
            c.slack_mismatch
        );
    }
    print_buses(&network);
    print_branches(&network);

    if !result.is_ok() {
        return Err(format_err!("load flow status {}", result.status()));
    }
    Ok(())
}

fn print_buses(network: &Network) {
    println!();
    println!(
        "{:>10} {:>5} {:>18} {:>8} {:>9}",
        "bus", "comp", "mode", "vm", "va"
    );
    for b in &network.buses {
        let mode = match b.mode {
            Some(mode) => format!("{:?}", mode),
            None => "-".to_string(),
        };
        let component = b
            .component
            .map_or_else(|| "-".to_string(), |c| c.to_string());
        println!(
            "{:>10} {:>5} {:>18} {:>8.4} {:>9.3}{}",
            b.id,
            component,
            mode,
            b.vm,
            b.va,
            if b.slack { " *" } else { "" }
        );
    }
}

fn print_branches(network: &Network) {
    println!();
    println!(
        "{:>10} {:>10} {:>10} {:>10} {:>10}",
        "branch", "p_from", "q_from", "p_to", "q_to"
    );
    for br in &network.branches {
        println!(
            "{:>10} {:>10.2} {:>10.2} {:>10.2} {:>10.2}",
            br.id, br.p_from, br.q_from, br.p_to, br.q_to
        );
    }
}
