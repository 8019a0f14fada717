//! Robust statistics helpers shared by the fit stages.
//!
//! Everything here is percentile-based: the fit loop and the quality checks
//! use median / quantile / MAD estimators instead of mean / standard
//! deviation so that a handful of contaminated isophotes (foreground stars,
//! detector artifacts) cannot drag the statistics.

/// Median of a slice. Non-finite entries are ignored. Returns 0.0 for an
/// empty (or all-NaN) input.
pub fn median(values: &[f64]) -> f64 {
    quantile(values, 0.5)
}

/// Linearly interpolated quantile, `q` in [0, 1]. Non-finite entries are
/// ignored. Returns 0.0 for an empty (or all-NaN) input.
pub fn quantile(values: &[f64], q: f64) -> f64 {
    let mut finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if finite.is_empty() {
        return 0.0;
    }
    finite.sort_unstable_by(|a, b| a.partial_cmp(b).unwrap());
    let n = finite.len();
    if n == 1 {
        return finite[0];
    }
    let pos = q.clamp(0.0, 1.0) * (n - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    finite[lo] * (1.0 - frac) + finite[hi] * frac
}

/// Robust spread: half the 16th–84th percentile span. For a Gaussian this
/// equals one standard deviation, but it ignores the tails entirely.
pub fn robust_spread(values: &[f64]) -> f64 {
    (quantile(values, 0.84) - quantile(values, 0.16)) / 2.0
}

/// Median absolute deviation scaled to Gaussian sigma (× 1.4826).
pub fn mad_sigma(values: &[f64]) -> f64 {
    let med = median(values);
    let abs_devs: Vec<f64> = values
        .iter()
        .filter(|v| v.is_finite())
        .map(|&v| (v - med).abs())
        .collect();
    1.4826 * median(&abs_devs)
}

/// Signed circular difference `a - b` for angles defined modulo π
/// (position angles). Result is in (-π/2, π/2].
pub fn pa_difference(a: f64, b: f64) -> f64 {
    let mut d = (a - b).rem_euclid(std::f64::consts::PI);
    if d > std::f64::consts::FRAC_PI_2 {
        d -= std::f64::consts::PI;
    }
    d
}

/// Mean of π-periodic angles via the doubled-angle vector average.
/// Returns a value in [0, π).
pub fn pa_mean(angles: &[f64]) -> f64 {
    let (mut s, mut c) = (0.0, 0.0);
    for &a in angles {
        s += (2.0 * a).sin();
        c += (2.0 * a).cos();
    }
    let mean = (s.atan2(c) / 2.0).rem_euclid(std::f64::consts::PI);
    // rem_euclid rounds tiny negative inputs up to exactly π
    if mean >= std::f64::consts::PI {
        0.0
    } else {
        mean
    }
}
