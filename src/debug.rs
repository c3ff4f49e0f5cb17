use num_complex::Complex64;
use pretty_dtoa::{dtoa, FmtFloatConfig};
use std::f64::consts::PI;

const FLOAT_CONFIG: FmtFloatConfig = FmtFloatConfig::default()
    .add_point_zero(false)
    .max_significant_digits(9);

pub fn format_f64_vec(v: &[f64]) -> String {
    let a: Vec<String> = v.iter().map(|f| dtoa(*f, FLOAT_CONFIG)).collect();
    format!("[{}]", a.join(", "))
}

fn format_complex(z: &Complex64) -> String {
    format!(
        "{}{}j{}",
        dtoa(z.re, FLOAT_CONFIG),
        if z.im.signum() < 0.0 { "-" } else { "+" },
        dtoa(z.im.abs(), FLOAT_CONFIG)
    )
}

pub fn format_rect_vec(v: &[Complex64]) -> String {
    let a: Vec<String> = v.iter().map(format_complex).collect();
    format!("[{}]", a.join(", "))
}

/// Formats magnitudes and angles (radians) as `|V|∠θ°`.
pub fn format_polar_vec(vm: &[f64], va: &[f64]) -> String {
    let a: Vec<String> = vm
        .iter()
        .zip(va)
        .map(|(m, a)| {
            format!(
                "{}\u{2220}{}\u{00B0}",
                dtoa(*m, FLOAT_CONFIG),
                dtoa(a * 180.0 / PI, FLOAT_CONFIG)
            )
        })
        .collect();
    format!("[{}]", a.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats() {
        assert_eq!(format_f64_vec(&[1.0, 0.25]), "[1, 0.25]");
        assert_eq!(
            format_rect_vec(&[Complex64::new(0.5, -2.0)]),
            "[0.5-j2]"
        );
        assert_eq!(format_polar_vec(&[1.0], &[PI]), "[1\u{2220}180\u{00B0}]");
    }
}
