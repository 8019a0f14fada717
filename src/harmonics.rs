//! Harmonic (Fourier) decomposition of isophote samples.
//!
//! The flux sampled along a well-fit isophote is constant in angle, so any
//! power in the low-order Fourier modes measures a mismatch: the 1st
//! harmonic responds to a center offset, the 2nd to wrong ellipticity or
//! position angle, the 3rd and 4th to asymmetry and boxiness. The fit
//! stages turn "does this ellipse match the isophote" into minimizing these
//! amplitudes.
//!
//! Before transforming, the high tail of the sample sequence is clipped at
//! a quantile (default 0.85) to suppress superposed stars and artifacts.

use rustfft::{num_complex::Complex, FftPlanner};

use crate::stats::{median, quantile};

/// Lowest harmonic reported.
pub const FIRST_HARMONIC: usize = 1;
/// Highest harmonic reported.
pub const LAST_HARMONIC: usize = 4;

/// Complex Fourier coefficients of harmonics 1–4 for one sample sequence.
#[derive(Debug, Clone, Copy)]
pub struct HarmonicSpectrum {
    coeffs: [Complex<f64>; 4],
    /// Number of samples the transform ran over.
    pub n_samples: usize,
    /// Median of the finite (unclipped) samples, used for normalization.
    pub median_flux: f64,
}

impl HarmonicSpectrum {
    /// Complex coefficient of `harmonic` (1–4).
    pub fn coefficient(&self, harmonic: usize) -> Complex<f64> {
        assert!(
            (FIRST_HARMONIC..=LAST_HARMONIC).contains(&harmonic),
            "harmonic {} out of range",
            harmonic
        );
        self.coeffs[harmonic - 1]
    }

    /// Amplitude |F_k| of `harmonic` (1–4).
    pub fn amplitude(&self, harmonic: usize) -> f64 {
        self.coefficient(harmonic).norm()
    }

    /// Amplitude of `harmonic` normalized by sample count and flux scale:
    /// `|F_k| / (N · (|median flux| + noise))`. Dimensionless, comparable
    /// across radii.
    pub fn normalized_amplitude(&self, harmonic: usize, noise: f64) -> f64 {
        self.amplitude(harmonic) / (self.n_samples as f64 * (self.median_flux.abs() + noise))
    }

    /// Sum of normalized amplitudes over a harmonic subset — the fit loss.
    pub fn loss(&self, harmonics: &[usize], noise: f64) -> f64 {
        harmonics
            .iter()
            .map(|&k| self.normalized_amplitude(k, noise))
            .sum()
    }
}

/// Fourier-transform an angularly-ordered sample sequence and report the
/// coefficients of harmonics 1–4.
///
/// Non-finite samples (out-of-bounds/masked) are replaced by the median of
/// the finite ones; returns `None` when more than half the samples are
/// missing or fewer than `2 · LAST_HARMONIC` samples exist, since the
/// requested modes would be unresolved.
pub fn analyze(samples: &[f64], clip_quantile: f64) -> Option<HarmonicSpectrum> {
    let n = samples.len();
    let n_finite = samples.iter().filter(|v| v.is_finite()).count();
    if n < 2 * LAST_HARMONIC || n_finite * 2 < n {
        return None;
    }

    let med = median(samples);
    let ceiling = quantile(samples, clip_quantile);

    let mut buffer: Vec<Complex<f64>> = samples
        .iter()
        .map(|&v| {
            let v = if v.is_finite() { v } else { med };
            Complex::new(v.min(ceiling), 0.0)
        })
        .collect();

    let mut planner = FftPlanner::<f64>::new();
    planner.plan_fft_forward(n).process(&mut buffer);

    let mut coeffs = [Complex::new(0.0, 0.0); 4];
    for (i, c) in coeffs.iter_mut().enumerate() {
        *c = buffer[i + 1];
    }

    Some(HarmonicSpectrum {
        coeffs,
        n_samples: n,
        median_flux: med,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn angles(n: usize) -> impl Iterator<Item = f64> {
        (0..n).map(move |k| 2.0 * std::f64::consts::PI * k as f64 / n as f64)
    }

    #[test]
    fn test_constant_sequence_has_zero_harmonics() {
        let samples = vec![5.0; 100];
        let spec = analyze(&samples, 0.85).unwrap();
        for k in FIRST_HARMONIC..=LAST_HARMONIC {
            assert!(spec.amplitude(k) < 1e-9, "harmonic {}: {}", k, spec.amplitude(k));
        }
    }

    #[test]
    fn test_second_harmonic_signal() {
        let n = 128;
        let samples: Vec<f64> = angles(n).map(|t| 10.0 + (2.0 * t).cos()).collect();
        // clip_quantile = 1.0 leaves the signal untouched
        let spec = analyze(&samples, 1.0).unwrap();
        assert!((spec.amplitude(2) - n as f64 / 2.0).abs() < 1e-6);
        assert!(spec.amplitude(1) < 1e-9);
        assert!(spec.amplitude(3) < 1e-9);
    }

    #[test]
    fn test_second_harmonic_phase_recovers_orientation() {
        let n = 256;
        let phi = 0.7;
        let samples: Vec<f64> = angles(n).map(|t| (2.0 * (t - phi)).cos()).collect();
        let spec = analyze(&samples, 1.0).unwrap();
        let recovered = (-spec.coefficient(2).arg() / 2.0).rem_euclid(std::f64::consts::PI);
        assert!((recovered - phi).abs() < 1e-9, "recovered: {}", recovered);
    }

    #[test]
    fn test_clip_suppresses_spike() {
        let n = 128;
        let mut samples: Vec<f64> = vec![1.0; n];
        samples[17] = 1000.0; // superposed star
        let clipped = analyze(&samples, 0.85).unwrap();
        let raw = analyze(&samples, 1.0).unwrap();
        assert!(clipped.amplitude(1) < 1e-9);
        assert!(raw.amplitude(1) > 1.0);
    }

    #[test]
    fn test_missing_samples_filled_with_median() {
        let n = 100;
        let mut samples: Vec<f64> = vec![3.0; n];
        for v in samples.iter_mut().take(10) {
            *v = f64::NAN;
        }
        let spec = analyze(&samples, 1.0).unwrap();
        for k in FIRST_HARMONIC..=LAST_HARMONIC {
            assert!(spec.amplitude(k) < 1e-9);
        }
    }

    #[test]
    fn test_degenerate_inputs_rejected() {
        assert!(analyze(&[1.0; 4], 0.85).is_none());
        let mostly_nan: Vec<f64> = (0..50)
            .map(|i| if i < 30 { f64::NAN } else { 1.0 })
            .collect();
        assert!(analyze(&mostly_nan, 0.85).is_none());
    }
}
