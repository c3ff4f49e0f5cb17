//! Reference networks.

use crate::network::{
    AcEmulation, Branch, Bus, Generator, HvdcLine, Load, Network, PhaseTapChanger,
    RatioTapChanger, ShuntCompensator,
};

/// WSCC 9 bus, 3 generator system.
pub fn case9() -> Network {
    let mut net = Network::new(100.0);
    for i in 1..=9 {
        net.buses.push(Bus::new(i.to_string(), 345.0));
    }

    // id, bus, target p, max p
    let gens = [("G1", "1", 72.3, 250.0), ("G2", "2", 163.0, 300.0), ("G3", "3", 85.0, 270.0)];
    for (id, bus, p, max_p) in gens {
        net.generators
            .push(Generator::new(id, bus, p, max_p, 1.0).with_q_limits(-300.0, 300.0));
    }

    net.loads.push(Load::new("L5", "5", 90.0, 30.0));
    net.loads.push(Load::new("L7", "7", 100.0, 35.0));
    net.loads.push(Load::new("L9", "9", 125.0, 50.0));

    // from, to, r, x, b
    let lines = [
        ("4", "5", 0.017, 0.092, 0.158),
        ("5", "6", 0.039, 0.17, 0.358),
        ("6", "7", 0.0119, 0.1008, 0.209),
        ("7", "8", 0.0085, 0.072, 0.149),
        ("8", "9", 0.032, 0.161, 0.306),
        ("9", "4", 0.01, 0.085, 0.176),
    ];
    for (f, t, r, x, b) in lines {
        net.branches
            .push(Branch::line(format!("{}-{}", f, t), f, t, r, x, b));
    }
    let transformers = [("1", "4", 0.0576), ("3", "6", 0.0586), ("8", "2", 0.0625)];
    for (f, t, x) in transformers {
        net.branches
            .push(Branch::transformer(format!("{}-{}", f, t), f, t, 0.0, x, 1.0));
    }
    net
}

/// Nine substation grid at 400, 225 and 63 kV with a regulating
/// transformer, a switched shunt, a phase shifter, a bus bar coupler and
/// an HVDC line emulating an AC line. The 63 kV bus of substation 9 is
/// fed through a transformer open on its low voltage side.
pub fn micro_grid() -> Network {
    let mut net = Network::new(100.0);
    let buses = [
        ("S1-400", "S1", 400.0),
        ("S2-400", "S2", 400.0),
        ("S3-400", "S3", 400.0),
        ("S4-400", "S4", 400.0),
        ("S4-225", "S4", 225.0),
        ("S5-225", "S5", 225.0),
        ("S6-225", "S6", 225.0),
        ("S7-225A", "S7", 225.0),
        ("S7-225B", "S7", 225.0),
        ("S8-400", "S8", 400.0),
        ("S9-400", "S9", 400.0),
        ("S9-63", "S9", 63.0),
    ];
    for (id, substation, kv) in buses {
        net.buses.push(Bus::new(id, kv).in_substation(substation));
    }

    // id, from, to, r, x, b
    let lines = [
        ("L1-2", "S1-400", "S2-400", 0.002, 0.02, 0.2),
        ("L1-4", "S1-400", "S4-400", 0.002, 0.025, 0.25),
        ("L2-3", "S2-400", "S3-400", 0.002, 0.02, 0.2),
        ("L3-4", "S3-400", "S4-400", 0.003, 0.03, 0.3),
        ("L3-8", "S3-400", "S8-400", 0.003, 0.03, 0.2),
        ("L1-9", "S1-400", "S9-400", 0.002, 0.02, 0.2),
        ("L4-5", "S4-225", "S5-225", 0.01, 0.06, 0.05),
        ("L5-6", "S5-225", "S6-225", 0.01, 0.06, 0.05),
        ("L4-7", "S4-225", "S7-225A", 0.01, 0.08, 0.05),
        ("L6-7", "S6-225", "S7-225B", 0.01, 0.08, 0.05),
    ];
    for (id, f, t, r, x, b) in lines {
        net.branches.push(Branch::line(id, f, t, r, x, b));
    }

    let mut t4 = Branch::transformer("T4", "S4-400", "S4-225", 0.0005, 0.03, 1.0);
    t4.ratio_tap_changer = Some(RatioTapChanger {
        ratios: (0..17).map(|i| 0.9 + 0.0125 * i as f64).collect(),
        position: 8,
        regulating: true,
        regulated_bus: "S4-225".to_string(),
        target_v: 1.0,
        deadband: 0.01,
    });
    net.branches.push(t4);

    let mut pst = Branch::transformer("PST8", "S2-400", "S8-400", 0.001, 0.05, 1.0);
    pst.phase_tap_changer = Some(PhaseTapChanger {
        shifts: (0..21).map(|i| -5.0 + 0.5 * i as f64).collect(),
        position: 10,
        regulating: true,
        target_p: 60.0,
        deadband: 10.0,
    });
    net.branches.push(pst);

    net.branches
        .push(Branch::switch("C7", "S7-225A", "S7-225B", false));

    let mut t9 = Branch::transformer("T9", "S9-400", "S9-63", 0.001, 0.1, 1.0);
    t9.b1 = -0.002;
    t9.to_connected = false;
    net.branches.push(t9);

    net.generators
        .push(Generator::new("G1", "S1-400", 300.0, 600.0, 1.02).with_q_limits(-200.0, 300.0));
    net.generators
        .push(Generator::new("G3", "S3-400", 200.0, 400.0, 1.01).with_q_limits(-150.0, 200.0));
    net.generators
        .push(Generator::new("G6", "S6-225", 80.0, 150.0, 1.0).with_q_limits(-80.0, 100.0));

    net.loads.push(Load::new("LD2", "S2-400", 150.0, 50.0));
    net.loads.push(Load::new("LD5", "S5-225", 200.0, 80.0));
    net.loads.push(Load::new("LD7", "S7-225B", 60.0, 20.0));
    net.loads.push(Load::new("LD8", "S8-400", 100.0, 30.0));
    net.loads.push(Load::new("LD9", "S9-63", 10.0, 3.0));

    let mut sh5 = ShuntCompensator::new("SH5", "S5-225", 0.1, 1, 4);
    sh5.voltage_regulator_on = true;
    sh5.target_v = 1.0;
    sh5.deadband = 0.02;
    net.shunts.push(sh5);

    let mut hvdc = HvdcLine::new("HVDC1", "S9-400", "S6-225", 50.0, 200.0);
    hvdc.loss_factor1 = 0.01;
    hvdc.loss_factor2 = 0.01;
    hvdc.ac_emulation = Some(AcEmulation { k: 10.0, p0: 50.0 });
    net.hvdc_lines.push(hvdc);

    net
}

/// Generator with a narrow reactive range feeding a reactive load
/// next to the slack bus.
pub fn two_bus() -> Network {
    let mut net = Network::new(100.0);
    net.buses.push(Bus::new("A", 225.0));
    net.buses.push(Bus::new("B", 225.0));
    net.branches
        .push(Branch::line("AB", "A", "B", 0.01, 0.1, 0.0));
    net.generators
        .push(Generator::new("GA", "A", 30.0, 200.0, 1.0).with_q_limits(-500.0, 500.0));
    net.generators
        .push(Generator::new("GB", "B", 20.0, 100.0, 1.0).with_q_limits(-10.0, 10.0));
    net.loads.push(Load::new("LB", "B", 50.0, 50.0));
    net
}
