use num_complex::Complex64;
use num_traits::{One, Zero};

/// Pi-model of an impedant branch with an off-nominal complex ratio
/// `ρ∠α` on the from end.
///
/// ```text
///  from ──(ρ∠α:1)──┬── y ──┬── to
///                  y1      y2
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct PiModel {
    /// Series admittance.
    pub y: Complex64,
    /// Shunt admittance at the from end, inside the ratio.
    pub y1: Complex64,
    /// Shunt admittance at the to end.
    pub y2: Complex64,
}

impl PiModel {
    pub fn new(r: f64, x: f64, g1: f64, b1: f64, g2: f64, b2: f64) -> Self {
        Self {
            y: Complex64::one() / Complex64::new(r, x),
            y1: Complex64::new(g1, b1),
            y2: Complex64::new(g2, b2),
        }
    }

    /// Admittance seen from the from end when the to end is open.
    pub fn open_to_shunt(&self, rho: f64) -> Complex64 {
        let y_sum = self.y + self.y2;
        let series = if y_sum.norm() > 0.0 {
            self.y * self.y2 / y_sum
        } else {
            Complex64::zero()
        };
        (self.y1 + series) / (rho * rho)
    }

    /// Admittance seen from the to end when the from end is open.
    pub fn open_from_shunt(&self) -> Complex64 {
        let y_sum = self.y + self.y1;
        let series = if y_sum.norm() > 0.0 {
            self.y * self.y1 / y_sum
        } else {
            Complex64::zero()
        };
        self.y2 + series
    }
}

/// Partial derivatives of one branch quantity.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub(crate) struct Partials {
    pub th1: f64,
    pub th2: f64,
    pub v1: f64,
    pub v2: f64,
    pub rho: f64,
    pub alpha: f64,
}

/// Power leaving each end of a branch (p.u.).
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub(crate) struct BranchFlow {
    pub p1: f64,
    pub q1: f64,
    pub p2: f64,
    pub q2: f64,
}

/// Voltage and ratio state at both ends of a branch.
#[derive(Debug, Clone, Copy)]
pub(crate) struct BranchState {
    pub v1: f64,
    pub th1: f64,
    pub v2: f64,
    pub th2: f64,
    pub rho: f64,
    pub alpha: f64,
}

impl PiModel {
    /// Evaluates the branch flows.
    pub fn flow(&self, s: &BranchState) -> BranchFlow {
        let (g, b) = (self.y.re, self.y.im);
        let (g1, b1, g2, b2) = (self.y1.re, self.y1.im, self.y2.re, self.y2.im);
        let delta = s.th1 - s.th2 - s.alpha;
        let (sin, cos) = delta.sin_cos();
        let a = s.v1 * s.v2 / s.rho;
        let r2 = s.rho * s.rho;

        BranchFlow {
            p1: (g + g1) * s.v1 * s.v1 / r2 - a * (g * cos + b * sin),
            q1: -(b + b1) * s.v1 * s.v1 / r2 - a * (g * sin - b * cos),
            p2: (g + g2) * s.v2 * s.v2 - a * (g * cos - b * sin),
            q2: -(b + b2) * s.v2 * s.v2 + a * (g * sin + b * cos),
        }
    }

    /// Evaluates the partial derivatives of `[p1, q1, p2, q2]`.
    pub fn partials(&self, s: &BranchState) -> [Partials; 4] {
        let (g, b) = (self.y.re, self.y.im);
        let (g1, b1, g2, b2) = (self.y1.re, self.y1.im, self.y2.re, self.y2.im);
        let delta = s.th1 - s.th2 - s.alpha;
        let (sin, cos) = delta.sin_cos();
        let (v1, v2, rho) = (s.v1, s.v2, s.rho);
        let a = v1 * v2 / rho;
        let r2 = rho * rho;
        let r3 = r2 * rho;

        let dp1_dd = a * (g * sin - b * cos);
        let dq1_dd = -a * (g * cos + b * sin);
        let dp2_dd = a * (g * sin + b * cos);
        let dq2_dd = a * (g * cos - b * sin);

        let p1 = Partials {
            th1: dp1_dd,
            th2: -dp1_dd,
            alpha: -dp1_dd,
            v1: 2.0 * (g + g1) * v1 / r2 - (v2 / rho) * (g * cos + b * sin),
            v2: -(v1 / rho) * (g * cos + b * sin),
            rho: -2.0 * (g + g1) * v1 * v1 / r3 + (a / rho) * (g * cos + b * sin),
        };
        let q1 = Partials {
            th1: dq1_dd,
            th2: -dq1_dd,
            alpha: -dq1_dd,
            v1: -2.0 * (b + b1) * v1 / r2 - (v2 / rho) * (g * sin - b * cos),
            v2: -(v1 / rho) * (g * sin - b * cos),
            rho: 2.0 * (b + b1) * v1 * v1 / r3 + (a / rho) * (g * sin - b * cos),
        };
        let p2 = Partials {
            th1: dp2_dd,
            th2: -dp2_dd,
            alpha: -dp2_dd,
            v1: -(v2 / rho) * (g * cos - b * sin),
            v2: 2.0 * (g + g2) * v2 - (v1 / rho) * (g * cos - b * sin),
            rho: (a / rho) * (g * cos - b * sin),
        };
        let q2 = Partials {
            th1: dq2_dd,
            th2: -dq2_dd,
            alpha: -dq2_dd,
            v1: (v2 / rho) * (g * sin + b * cos),
            v2: -2.0 * (b + b2) * v2 + (v1 / rho) * (g * sin + b * cos),
            rho: -(a / rho) * (g * sin + b * cos),
        };
        [p1, q1, p2, q2]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    fn model() -> PiModel {
        PiModel::new(0.01, 0.085, 0.001, 0.088, 0.002, 0.07)
    }

    fn state() -> BranchState {
        BranchState {
            v1: 1.03,
            th1: 0.05,
            v2: 0.98,
            th2: -0.04,
            rho: 1.04,
            alpha: 3.0 * PI / 180.0,
        }
    }

    /// Complex power computed from the admittance matrix of the branch.
    #[test]
    fn flow_matches_admittance_matrix() {
        let m = model();
        let s = state();
        let tap = Complex64::from_polar(s.rho, s.alpha);
        let y_ff = (m.y + m.y1) / (tap * tap.conj());
        let y_ft = -m.y / tap.conj();
        let y_tf = -m.y / tap;
        let y_tt = m.y + m.y2;
        let v_f = Complex64::from_polar(s.v1, s.th1);
        let v_t = Complex64::from_polar(s.v2, s.th2);
        let s_f = v_f * (y_ff * v_f + y_ft * v_t).conj();
        let s_t = v_t * (y_tf * v_f + y_tt * v_t).conj();

        let flow = m.flow(&s);
        assert!((flow.p1 - s_f.re).abs() < 1e-12);
        assert!((flow.q1 - s_f.im).abs() < 1e-12);
        assert!((flow.p2 - s_t.re).abs() < 1e-12);
        assert!((flow.q2 - s_t.im).abs() < 1e-12);
    }

    #[test]
    fn partials_match_finite_differences() {
        let m = model();
        let s = state();
        let d = m.partials(&s);
        let h = 1e-7;

        let values = |f: BranchFlow| [f.p1, f.q1, f.p2, f.q2];
        let perturb: [(fn(&mut BranchState, f64), fn(&Partials) -> f64); 6] = [
            (|s, h| s.th1 += h, |p| p.th1),
            (|s, h| s.th2 += h, |p| p.th2),
            (|s, h| s.v1 += h, |p| p.v1),
            (|s, h| s.v2 += h, |p| p.v2),
            (|s, h| s.rho += h, |p| p.rho),
            (|s, h| s.alpha += h, |p| p.alpha),
        ];
        for (apply, get) in perturb {
            let mut plus = s;
            apply(&mut plus, h);
            let mut minus = s;
            apply(&mut minus, -h);
            let fp = values(m.flow(&plus));
            let fm = values(m.flow(&minus));
            for k in 0..4 {
                let fd = (fp[k] - fm[k]) / (2.0 * h);
                assert!(
                    (fd - get(&d[k])).abs() < 1e-5,
                    "quantity {}: {} != {}",
                    k,
                    fd,
                    get(&d[k])
                );
            }
        }
    }

    #[test]
    fn open_end_shunt() {
        let m = model();
        // Line charging only, to end open.
        let line = PiModel::new(0.0, 0.1, 0.0, 0.05, 0.0, 0.05);
        let y = line.open_to_shunt(1.0);
        let expected = Complex64::new(0.0, 0.05)
            + Complex64::new(0.0, -10.0) * Complex64::new(0.0, 0.05)
                / (Complex64::new(0.0, -10.0) + Complex64::new(0.0, 0.05));
        assert!((y - expected).norm() < 1e-12);
        assert!(m.open_from_shunt().norm() > 0.0);
    }
}
