mod statuses;

use crate::network::Network;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Active power generated, consumed and lost in branches (MW) over the
/// solved part of a network.
struct Balance {
    generation: f64,
    load: f64,
    losses: f64,
}

impl Balance {
    fn of(network: &Network) -> Self {
        let generation = network.generators.iter().map(|g| g.p).sum::<f64>()
            + network.hvdc_lines.iter().map(|h| h.p1 + h.p2).sum::<f64>();
        let load = network.loads.iter().map(|l| l.p).sum::<f64>()
            + network
                .shunts
                .iter()
                .map(|sh| {
                    let vm = network.bus(&sh.bus).map_or(0.0, |b| b.vm);
                    sh.g_per_section * sh.sections as f64 * vm * vm * network.base_mva
                })
                .sum::<f64>();
        let losses = network
            .branches
            .iter()
            .map(|br| br.p_from + br.p_to)
            .sum::<f64>();
        Self {
            generation,
            load,
            losses,
        }
    }

    fn residual(&self) -> f64 {
        self.generation - self.load - self.losses
    }
}
