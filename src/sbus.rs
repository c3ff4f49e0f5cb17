use crate::lfnetwork::{LfHvdc, LfNetwork, SolverState};

/// Active power injected by an HVDC line at both ends and its
/// sensitivity to the angle difference `θ1 - θ2`.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub(crate) struct HvdcFlow {
    pub p1: f64,
    pub p2: f64,
    pub dp1: f64,
    pub dp2: f64,
}

/// Evaluates an HVDC line. Rectifier losses apply to the power leaving
/// the AC grid on the sending end.
pub(crate) fn hvdc_flow(h: &LfHvdc, th: &[f64]) -> HvdcFlow {
    let (p, dp) = match (h.emulation, h.node1, h.node2) {
        (Some((k, p0)), Some(n1), Some(n2)) => {
            let p = p0 + k * (th[n1] - th[n2]);
            if p > h.max_p {
                (h.max_p, 0.0)
            } else if p < -h.max_p {
                (-h.max_p, 0.0)
            } else {
                (p, k)
            }
        }
        _ => (h.p_set, 0.0),
    };
    let c = (1.0 - h.loss1) * (1.0 - h.loss2);
    if p >= 0.0 {
        HvdcFlow {
            p1: -p,
            p2: c * p,
            dp1: -dp,
            dp2: c * dp,
        }
    } else {
        HvdcFlow {
            p1: -c * p,
            p2: p,
            dp1: -c * dp,
            dp2: dp,
        }
    }
}

/// ZIP load demand `s0 * (w0 + w1 V + w2 V²)` and its derivative.
pub(crate) fn zip_demand(s0: f64, w: &[f64; 3], v: f64) -> (f64, f64) {
    (
        s0 * (w[0] + w[1] * v + w[2] * v * v),
        s0 * (w[1] + 2.0 * w[2] * v),
    )
}

/// Specified bus injections: generation minus load plus HVDC.
///
/// Holds per node the specified active and reactive power and their
/// derivatives with respect to the node voltage magnitude.
#[derive(Debug, Clone)]
pub(crate) struct SBus {
    pub p: Vec<f64>,
    pub q: Vec<f64>,
    pub dp_dv: Vec<f64>,
    pub dq_dv: Vec<f64>,
    pub hvdc: Vec<HvdcFlow>,
}

/// Builds the vector of specified node injections (p.u.).
///
/// Generators holding voltage or a reactive flow have a free reactive
/// output and contribute no specified reactive power. Generators of a
/// voltage control switched to fixed reactive power contribute the fixed
/// value once per control.
pub(crate) fn make_sbus(net: &LfNetwork, state: &SolverState) -> SBus {
    let n = net.node_count();
    let mut s = SBus {
        p: vec![0.0; n],
        q: vec![0.0; n],
        dp_dv: vec![0.0; n],
        dq_dv: vec![0.0; n],
        hvdc: Vec::with_capacity(net.hvdc.len()),
    };

    for (g, gen) in net.generators.iter().enumerate() {
        s.p[gen.node] += state.gen_p[g];
        if !gen.voltage_control && !gen.reactive_control {
            s.q[gen.node] += gen.target_q;
        }
    }
    for (k, vc) in net.voltage_controls.iter().enumerate() {
        if !state.vc_enabled[k] {
            s.q[vc.controller] += state.vc_fixed_q[k];
        }
    }

    for (l, load) in net.loads.iter().enumerate() {
        let v = state.v[load.node];
        let (pd, dpd) = zip_demand(state.load_p[l], &net.pw, v);
        let (qd, dqd) = zip_demand(load.q0, &net.qw, v);
        s.p[load.node] -= pd;
        s.q[load.node] -= qd;
        s.dp_dv[load.node] -= dpd;
        s.dq_dv[load.node] -= dqd;
    }

    for h in &net.hvdc {
        let flow = hvdc_flow(h, &state.th);
        if let Some(n1) = h.node1 {
            s.p[n1] += flow.p1;
            s.q[n1] += h.q1;
        }
        if let Some(n2) = h.node2 {
            s.p[n2] += flow.p2;
            s.q[n2] += h.q2;
        }
        s.hvdc.push(flow);
    }

    s
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(emulation: Option<(f64, f64)>) -> LfHvdc {
        LfHvdc {
            index: 0,
            node1: Some(0),
            node2: Some(1),
            p_set: 0.5,
            max_p: 1.0,
            loss1: 0.01,
            loss2: 0.02,
            q1: 0.0,
            q2: 0.0,
            emulation,
        }
    }

    #[test]
    fn set_point_with_losses() {
        let flow = hvdc_flow(&line(None), &[0.0, 0.0]);
        assert_eq!(flow.p1, -0.5);
        assert!((flow.p2 - 0.5 * 0.99 * 0.98).abs() < 1e-15);
        assert_eq!(flow.dp1, 0.0);
    }

    #[test]
    fn ac_emulation_follows_angles_and_saturates() {
        let h = line(Some((10.0, 0.1)));
        let flow = hvdc_flow(&h, &[0.02, 0.0]);
        assert!((flow.p1 + 0.3).abs() < 1e-12);
        assert_eq!(flow.dp1, -10.0);

        let flow = hvdc_flow(&h, &[-0.05, 0.0]);
        // Reversed: station 2 sends 0.4 p.u.
        assert!((flow.p2 + 0.4).abs() < 1e-12);
        assert!(flow.p1 > 0.0 && flow.p1 < 0.4);

        let flow = hvdc_flow(&h, &[1.0, 0.0]);
        assert_eq!(flow.p1, -1.0);
        assert_eq!(flow.dp1, 0.0);
    }

    #[test]
    fn zip_weights() {
        let (p, dp) = zip_demand(2.0, &[0.5, 0.25, 0.25], 0.9);
        assert!((p - 2.0 * (0.5 + 0.225 + 0.2025)).abs() < 1e-12);
        assert!((dp - 2.0 * (0.25 + 0.45)).abs() < 1e-12);
    }
}
