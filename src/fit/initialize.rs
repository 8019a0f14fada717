//! Global ellipse initialization.
//!
//! Grows circular apertures from the PSF scale outward until the sampled
//! flux approaches the noise floor, which bounds the galaxy's visible
//! extent without any hard radius limit. The phase of the second Fourier
//! harmonic along those circles gives the global position angle; its power,
//! minimized over a candidate grid and then a local simplex refinement,
//! gives the global ellipticity. Both estimates get robust error bars from
//! resampling across nearby radii.

use rayon::prelude::*;
use rustfft::num_complex::Complex;
use tracing::{debug, info, warn};

use crate::error::ProfileError;
use crate::geometry::{ellipticity_to_param, param_to_ellipticity, Ellipse};
use crate::image::{FrameContext, GalaxyImage};
use crate::optimize::Minimizer;
use crate::sample::sample_isophote;
use crate::stats::{quantile, robust_spread};

use super::{sampled_loss, sampled_spectrum};

/// Options for the global initializer. Defaults reproduce the standard
/// circular-growth fit.
#[derive(Debug, Clone)]
pub struct InitializeConfig {
    /// Geometric radius growth per step. Default 1.2.
    pub growth_factor: f64,
    /// Flux quantile tested against the noise floor. Default 0.8.
    pub stop_quantile: f64,
    /// Growth stops once the stop-quantile flux falls below this multiple
    /// of the background noise. Default 3.0.
    pub noise_floor_multiple: f64,
    /// Minimum number of radii before the stop rule may fire. Default 4.
    pub min_radii: usize,
    /// High-tail clip quantile for harmonic analysis. Default 0.85.
    pub clip_quantile: f64,
    /// Number of candidate ellipticities on the coarse grid. Default 15.
    pub grid_points: usize,
    /// Ellipticity range spanned by the grid. Default [0.05, 0.95].
    pub grid_range: (f64, f64),
    /// Radius scalings averaged into each loss evaluation, for robustness
    /// to the exact reference radius. Default 5 over [0.8, 1.2].
    pub scale_samples: usize,
    /// Span of the robustness radius scalings. Default (0.8, 1.2).
    pub scale_range: (f64, f64),
    /// Second-harmonic coefficients averaged for the position angle (the
    /// most recent qualifying radii). Default 5.
    pub phase_average: usize,
    /// Radii resampled (± one PSF FWHM around the reference radius) for
    /// the uncertainty estimates. Default 10.
    pub error_radii: usize,
}

impl Default for InitializeConfig {
    fn default() -> Self {
        Self {
            growth_factor: 1.2,
            stop_quantile: 0.8,
            noise_floor_multiple: 3.0,
            min_radii: 4,
            clip_quantile: 0.85,
            grid_points: 15,
            grid_range: (0.05, 0.95),
            scale_samples: 5,
            scale_range: (0.8, 1.2),
            phase_average: 5,
            error_radii: 10,
        }
    }
}

impl InitializeConfig {
    pub fn validate(&self) -> Result<(), ProfileError> {
        let err = |msg: String| Err(ProfileError::InvalidConfig(msg));
        if self.growth_factor <= 1.0 {
            return err(format!("growth_factor {} must exceed 1", self.growth_factor));
        }
        if !(0.0..=1.0).contains(&self.stop_quantile) || !(0.0..=1.0).contains(&self.clip_quantile)
        {
            return err("quantiles must lie in [0, 1]".into());
        }
        if self.noise_floor_multiple <= 0.0 {
            return err("noise_floor_multiple must be positive".into());
        }
        if self.grid_points < 2 || self.scale_samples == 0 || self.error_radii < 2 {
            return err("grid_points, scale_samples and error_radii must allow sampling".into());
        }
        let (lo, hi) = self.grid_range;
        if !(0.0 < lo && lo < hi && hi < 1.0) {
            return err(format!("grid_range ({}, {}) must satisfy 0 < lo < hi < 1", lo, hi));
        }
        let (slo, shi) = self.scale_range;
        if !(0.0 < slo && slo <= shi) {
            return err("scale_range must be positive and ordered".into());
        }
        Ok(())
    }
}

/// The initializer's output: one representative ellipse for the object.
#[derive(Debug, Clone, Copy)]
pub struct GlobalEllipse {
    /// Global ellipticity estimate.
    pub ellipticity: f64,
    /// Robust ellipticity uncertainty (half the 16–84 percentile span
    /// across resampled radii).
    pub ellipticity_err: f64,
    /// Global position angle, radians in [0, π).
    pub position_angle: f64,
    /// Robust position-angle uncertainty, radians.
    pub position_angle_err: f64,
    /// Radius at which the global fit was evaluated (second-to-outermost
    /// grown radius).
    pub reference_radius: f64,
    /// Outermost grown radius — the object's visible extent.
    pub outer_radius: f64,
}

/// Estimate the galaxy's global ellipticity and position angle.
///
/// Fails only when circular sampling is impossible from the very first
/// radii; running off the image edge during growth degrades gracefully.
pub fn initialize_global(
    image: &GalaxyImage,
    ctx: &FrameContext,
    config: &InitializeConfig,
    minimizer: &dyn Minimizer,
) -> Result<GlobalEllipse, ProfileError> {
    config.validate()?;
    ctx.validate()?;

    // ── Stage 1: grow circular apertures to the noise floor ──
    let radius_limit = image.width() as f64 / 2.0;
    let mut radii = vec![ctx.psf_fwhm / 2.0];
    let mut all_phase: Vec<Complex<f64>> = Vec::new();
    let mut phase_keep: Vec<Complex<f64>> = Vec::new();
    let mut reached_floor = false;

    while *radii.last().unwrap() < radius_limit {
        let r = radii.last().unwrap() * config.growth_factor;
        radii.push(r);

        let sample = sample_isophote(image, &Ellipse::circle(r), ctx.center, None);
        if sample.is_degenerate() {
            warn!("circular sample at r={:.1} ran off the image, stopping growth", r);
            break;
        }
        let values: Vec<f64> = sample.values.iter().map(|v| v - ctx.background).collect();

        if let Some(spec) = crate::harmonics::analyze(&values, config.clip_quantile) {
            let c2 = spec.coefficient(2);
            all_phase.push(c2);
            if c2.norm() > spec.amplitude(1) && c2.norm() > spec.amplitude(3) {
                phase_keep.push(c2);
            }
        }

        if quantile(&values, config.stop_quantile) < config.noise_floor_multiple * ctx.noise
            && radii.len() > config.min_radii
        {
            reached_floor = true;
            break;
        }
    }

    if radii.len() < 2 || all_phase.is_empty() {
        return Err(ProfileError::SamplingExhausted { n_radii: radii.len() });
    }
    if !reached_floor {
        warn!(
            "noise floor not reached within half the image width (stopped at r={:.1})",
            radii.last().unwrap()
        );
    }
    info!(
        "initial scale: {:.1} px over {} radii",
        radii.last().unwrap(),
        radii.len()
    );

    // ── Stage 2: position angle from second-harmonic phases ──
    // Only radii where the 2nd harmonic dominates the 1st and 3rd carry a
    // trustworthy orientation; fall back to the outer half of all radii.
    let phases = if phase_keep.len() >= config.phase_average {
        &phase_keep[phase_keep.len() - config.phase_average..]
    } else {
        &all_phase[all_phase.len() / 2..]
    };
    let mean_phase = complex_mean(phases);
    let position_angle = (-mean_phase.arg() / 2.0).rem_euclid(std::f64::consts::PI);

    // ── Stage 3: ellipticity by grid search, then simplex refinement ──
    let reference_radius = radii[radii.len() - 2];
    let scales = linspace(config.scale_range.0, config.scale_range.1, config.scale_samples);

    let averaged_loss = |eps: f64| -> f64 {
        scales
            .iter()
            .filter_map(|&m| {
                sampled_loss(
                    image,
                    ctx.center,
                    &Ellipse {
                        radius: reference_radius * m,
                        ellipticity: eps,
                        position_angle,
                    },
                    ctx.background,
                    ctx.noise,
                    config.clip_quantile,
                    &[2],
                )
            })
            .sum()
    };

    let grid = linspace(config.grid_range.0, config.grid_range.1, config.grid_points);
    // Grid points are independent evaluations with no shared state
    let grid_losses: Vec<f64> = grid.par_iter().map(|&e| averaged_loss(e)).collect();
    let best = grid_losses
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.partial_cmp(b.1).unwrap())
        .map(|(i, _)| i)
        .unwrap_or(0);
    let mut ellipticity = grid[best];

    let step = 2.0 / config.grid_points as f64;
    let result = minimizer.minimize(
        &mut |x: &[f64]| averaged_loss(param_to_ellipticity(x[0])),
        &[ellipticity_to_param(ellipticity)],
        &[step],
    );
    if result.converged {
        let refined = param_to_ellipticity(result.x[0]).min(0.99);
        debug!(
            "using refined ellipticity {:.3} over grid value {:.3}",
            refined, ellipticity
        );
        ellipticity = refined;
    } else {
        warn!(
            "ellipticity refinement did not converge, keeping grid value {:.3}",
            ellipticity
        );
    }

    // ── Stage 4: uncertainties by resampling nearby radii ──
    let error_coefs: Vec<(f64, Complex<f64>)> = linspace(
        reference_radius - ctx.psf_fwhm,
        reference_radius + ctx.psf_fwhm,
        config.error_radii,
    )
    .into_iter()
    .filter(|&r| r > 0.5)
    .filter_map(|r| {
        sampled_spectrum(
            image,
            ctx.center,
            &Ellipse::circle(r),
            ctx.background,
            config.clip_quantile,
        )
        .map(|s| (r, s.coefficient(2)))
    })
    .collect();

    let coef_mean =
        complex_mean(&error_coefs.iter().map(|&(_, c)| c).collect::<Vec<_>>());
    // Phases relative to the mean coefficient, reduced to position angles
    let pa_samples: Vec<(f64, f64)> = error_coefs
        .iter()
        .map(|&(r, c)| {
            let pa = (-(Complex::<f64>::i() * c / coef_mean).arg() / 2.0)
                .rem_euclid(std::f64::consts::PI);
            (r, pa)
        })
        .collect();
    let position_angle_err =
        robust_spread(&pa_samples.iter().map(|&(_, pa)| pa).collect::<Vec<_>>());

    // Re-fit the ellipticity independently at each resampled radius; the
    // minimizations share nothing and fan out freely.
    let x0 = ellipticity_to_param(ellipticity);
    let eps_samples: Vec<f64> = pa_samples
        .par_iter()
        .filter_map(|&(r, pa)| {
            let mut loss = |x: &[f64]| {
                sampled_loss(
                    image,
                    ctx.center,
                    &Ellipse {
                        radius: r,
                        ellipticity: param_to_ellipticity(x[0]),
                        position_angle: pa,
                    },
                    ctx.background,
                    ctx.noise,
                    config.clip_quantile,
                    &[2],
                )
                .unwrap_or(f64::INFINITY)
            };
            let res = minimizer.minimize(&mut loss, &[x0], &[step]);
            res.fx.is_finite().then(|| param_to_ellipticity(res.x[0]))
        })
        .collect();
    let ellipticity_err = robust_spread(&eps_samples);

    info!(
        "global ellipse: e={:.3}±{:.3}, pa={:.1}±{:.1} deg at r={:.1}",
        ellipticity,
        ellipticity_err,
        position_angle.to_degrees(),
        position_angle_err.to_degrees(),
        reference_radius
    );

    Ok(GlobalEllipse {
        ellipticity,
        ellipticity_err,
        position_angle,
        position_angle_err,
        reference_radius,
        outer_radius: *radii.last().unwrap(),
    })
}

/// `n` evenly spaced values from `a` to `b` inclusive.
fn linspace(a: f64, b: f64, n: usize) -> Vec<f64> {
    if n == 1 {
        return vec![a];
    }
    (0..n)
        .map(|i| a + (b - a) * i as f64 / (n - 1) as f64)
        .collect()
}

fn complex_mean(values: &[Complex<f64>]) -> Complex<f64> {
    if values.is_empty() {
        return Complex::new(0.0, 0.0);
    }
    values.iter().sum::<Complex<f64>>() / values.len() as f64
}

#[cfg(test)]
mod tests {
    use super::super::testutil::{synthetic_galaxy, test_context};
    use super::*;
    use crate::optimize::NelderMead;
    use ndarray::Array2;

    #[test]
    fn test_recovers_known_ellipse() {
        let eps = 0.3;
        let pa = 40.0_f64.to_radians();
        let image = synthetic_galaxy(200, eps, pa, 12.0);
        let ctx = test_context(200);

        let out = initialize_global(&image, &ctx, &InitializeConfig::default(), &NelderMead::default())
            .unwrap();

        assert!(
            (out.ellipticity - eps).abs() < 0.05,
            "ellipticity {:.3} vs true {:.3}",
            out.ellipticity,
            eps
        );
        let dpa = crate::stats::pa_difference(out.position_angle, pa).abs();
        assert!(
            dpa < 5.0_f64.to_radians(),
            "position angle off by {:.2} deg",
            dpa.to_degrees()
        );
        assert!(out.outer_radius > out.reference_radius);
    }

    #[test]
    fn test_circular_blob_has_low_ellipticity() {
        let image = synthetic_galaxy(200, 0.0, 0.0, 10.0);
        let ctx = test_context(200);
        let out = initialize_global(&image, &ctx, &InitializeConfig::default(), &NelderMead::default())
            .unwrap();
        assert!(
            out.ellipticity < 0.1 + out.ellipticity_err,
            "ellipticity {:.3} (err {:.3}) should be near zero",
            out.ellipticity,
            out.ellipticity_err
        );
    }

    #[test]
    fn test_pure_noise_terminates_quickly() {
        // Flat zero image: flux quantile is below the noise floor at once,
        // so growth stops right after the minimum radius count.
        let image = GalaxyImage::new(Array2::from_elem((128, 128), 0.0));
        let mut ctx = test_context(128);
        ctx.noise = 1.0;
        let config = InitializeConfig::default();
        let out = initialize_global(&image, &ctx, &config, &NelderMead::default()).unwrap();
        let max_expected =
            ctx.psf_fwhm / 2.0 * config.growth_factor.powi(config.min_radii as i32 + 1);
        assert!(
            out.outer_radius <= max_expected,
            "outer radius {:.1} should stop near the minimum radius count",
            out.outer_radius
        );
    }

    #[test]
    fn test_config_validation() {
        let mut config = InitializeConfig::default();
        config.growth_factor = 0.9;
        assert!(matches!(
            config.validate(),
            Err(ProfileError::InvalidConfig(_))
        ));
        let mut config = InitializeConfig::default();
        config.grid_range = (0.0, 0.95);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_linspace_endpoints() {
        let v = linspace(0.8, 1.2, 5);
        assert_eq!(v.len(), 5);
        assert!((v[0] - 0.8).abs() < 1e-12 && (v[4] - 1.2).abs() < 1e-12);
        assert!((v[2] - 1.0).abs() < 1e-12);
    }
}
