//! The isophote-fitting engine.
//!
//! Three stages, run in order per image:
//!
//! 1. [`initialize`] — grow circular apertures outward to find the galaxy's
//!    visible extent, then estimate one global ellipticity/position angle
//!    (with uncertainties) from the second-harmonic phase and power.
//! 2. [`refine`] — walk an increasing radius sequence, locally re-fitting
//!    the ellipse at each radius seeded by the previous one, with outlier
//!    rejection against the local trend.
//! 3. [`check`] — robust-dispersion quality checks over the finished
//!    profile.
//!
//! Each stage consumes only the outputs of earlier ones; isophotes are
//! never revised after creation.

pub mod check;
pub mod initialize;
pub mod refine;

pub use check::{check_fit, check_fit_simple, CheckConfig, CheckReport, FitCheck};
pub use initialize::{initialize_global, GlobalEllipse, InitializeConfig};
pub use refine::{radius_sequence, refine_profile, RefineConfig};

use crate::geometry::Ellipse;
use crate::harmonics::{analyze, HarmonicSpectrum, FIRST_HARMONIC, LAST_HARMONIC};
use crate::image::{GalaxyImage, PixelPoint};
use crate::sample::sample_isophote;

/// One fitted isophote. Immutable once produced by the refiner.
#[derive(Debug, Clone)]
pub struct Isophote {
    /// Semi-major axis in pixels.
    pub radius: f64,
    /// Fitted ellipticity, in [0, 1).
    pub ellipticity: f64,
    /// Fitted position angle in radians, in [0, π).
    pub position_angle: f64,
    /// Isophote center. Equal to the frame center unless center refinement
    /// was enabled.
    pub center: PixelPoint,
    /// Normalized residual amplitudes of harmonics 1–4 at the accepted
    /// parameters (index 0 = 1st harmonic).
    pub residuals: [f64; 4],
    /// Robust per-radius ellipticity uncertainty.
    pub ellipticity_err: f64,
    /// Robust per-radius position-angle uncertainty, radians.
    pub position_angle_err: f64,
    /// False when the local optimizer failed and the seed was kept.
    pub converged: bool,
    /// True when the raw fit was rejected as an outlier and replaced by
    /// the smoothed trend of neighboring radii.
    pub trend_replaced: bool,
}

impl Isophote {
    /// Total residual harmonic power (sum of the normalized amplitudes).
    pub fn residual_power(&self) -> f64 {
        self.residuals.iter().sum()
    }
}

/// Radius-ascending sequence of fitted isophotes.
#[derive(Debug, Clone, Default)]
pub struct Profile {
    isophotes: Vec<Isophote>,
}

impl Profile {
    pub(crate) fn with_capacity(n: usize) -> Self {
        Self {
            isophotes: Vec::with_capacity(n),
        }
    }

    /// Append an isophote, upholding the profile invariants: strictly
    /// increasing radii, ellipticity in [0,1), position angle in [0,π).
    pub(crate) fn push(&mut self, iso: Isophote) {
        if let Some(last) = self.isophotes.last() {
            assert!(iso.radius > last.radius, "radii must strictly increase");
        }
        assert!((0.0..1.0).contains(&iso.ellipticity));
        assert!((0.0..std::f64::consts::PI).contains(&iso.position_angle));
        self.isophotes.push(iso);
    }

    pub fn len(&self) -> usize {
        self.isophotes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.isophotes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Isophote> {
        self.isophotes.iter()
    }

    pub fn get(&self, i: usize) -> Option<&Isophote> {
        self.isophotes.get(i)
    }

    pub fn last(&self) -> Option<&Isophote> {
        self.isophotes.last()
    }

    /// The outermost `n` isophotes (fewer if the profile is shorter).
    pub fn outer(&self, n: usize) -> &[Isophote] {
        let start = self.isophotes.len().saturating_sub(n);
        &self.isophotes[start..]
    }

    pub fn ellipticities(&self) -> Vec<f64> {
        self.isophotes.iter().map(|i| i.ellipticity).collect()
    }

    pub fn position_angles(&self) -> Vec<f64> {
        self.isophotes.iter().map(|i| i.position_angle).collect()
    }

    pub fn radii(&self) -> Vec<f64> {
        self.isophotes.iter().map(|i| i.radius).collect()
    }
}

/// Sample an ellipse and return the harmonic spectrum of its
/// background-subtracted flux, or `None` when the sample is degenerate.
pub(crate) fn sampled_spectrum(
    image: &GalaxyImage,
    center: PixelPoint,
    ellipse: &Ellipse,
    background: f64,
    clip_quantile: f64,
) -> Option<HarmonicSpectrum> {
    let sample = sample_isophote(image, ellipse, center, None);
    if sample.is_degenerate() {
        return None;
    }
    let values: Vec<f64> = sample.values.iter().map(|v| v - background).collect();
    analyze(&values, clip_quantile)
}

/// The fit loss at one candidate ellipse: normalized harmonic amplitudes
/// summed over `harmonics`. `None` when the ellipse cannot be sampled.
pub(crate) fn sampled_loss(
    image: &GalaxyImage,
    center: PixelPoint,
    ellipse: &Ellipse,
    background: f64,
    noise: f64,
    clip_quantile: f64,
    harmonics: &[usize],
) -> Option<f64> {
    sampled_spectrum(image, center, ellipse, background, clip_quantile)
        .map(|s| s.loss(harmonics, noise))
}

/// Validate a user-supplied harmonic subset for the fit loss.
pub(crate) fn validate_harmonics(harmonics: &[usize]) -> Result<(), String> {
    if harmonics.is_empty() {
        return Err("loss harmonic subset is empty".into());
    }
    for &k in harmonics {
        if !(FIRST_HARMONIC..=LAST_HARMONIC).contains(&k) {
            return Err(format!(
                "harmonic {} outside supported range {}..={}",
                k, FIRST_HARMONIC, LAST_HARMONIC
            ));
        }
    }
    Ok(())
}
