//! Per-radius refinement of the isophote sequence.
//!
//! Walks an increasing radius sequence. At each radius the ellipse
//! parameters are locally re-optimized against the harmonic loss, seeded by
//! the previous radius's accepted solution — the radius chain is therefore
//! strictly sequential. A trailing-window trend guard rejects fits that
//! jump away from their neighbors (star contamination, noise flapping) and
//! substitutes the smoothed trend value instead.

use tracing::{debug, info, warn};

use crate::error::ProfileError;
use crate::geometry::{
    ellipticity_to_param, param_to_ellipticity, param_to_position_angle, position_angle_to_param,
    Ellipse,
};
use crate::image::{FrameContext, GalaxyImage, PixelPoint};
use crate::optimize::Minimizer;
use crate::stats::{mad_sigma, median, pa_difference, pa_mean, robust_spread};

use super::initialize::GlobalEllipse;
use super::{sampled_loss, sampled_spectrum, validate_harmonics, Isophote, Profile};

/// Options for the per-radius refiner.
#[derive(Debug, Clone)]
pub struct RefineConfig {
    /// Geometric growth used by [`radius_sequence`]. Default 1.3.
    pub growth_factor: f64,
    /// High-tail clip quantile for harmonic analysis. Default 0.85.
    pub clip_quantile: f64,
    /// Harmonics summed into the loss. The 1st, 3rd and 4th trace center
    /// offset, asymmetry and boxiness; the 2nd is included because
    /// ellipticity and position angle are refined jointly.
    /// Default [1, 2, 3, 4].
    pub loss_harmonics: Vec<usize>,
    /// Also refine the isophote center at each radius. Default false.
    pub fit_center: bool,
    /// Number of trailing accepted radii forming the smoothing trend.
    /// Default 5.
    pub trend_window: usize,
    /// A fit deviating from the trend by more than this multiple of the
    /// window's robust dispersion is replaced by the trend. Default 3.0.
    pub outlier_threshold: f64,
    /// Dispersion floors so a perfectly smooth window cannot reject
    /// everything. Defaults: 0.02 (ellipticity), 0.03 rad (position angle).
    pub ellipticity_dispersion_floor: f64,
    pub position_angle_dispersion_floor: f64,
}

impl Default for RefineConfig {
    fn default() -> Self {
        Self {
            growth_factor: 1.3,
            clip_quantile: 0.85,
            loss_harmonics: vec![1, 2, 3, 4],
            fit_center: false,
            trend_window: 5,
            outlier_threshold: 3.0,
            ellipticity_dispersion_floor: 0.02,
            position_angle_dispersion_floor: 0.03,
        }
    }
}

impl RefineConfig {
    pub fn validate(&self) -> Result<(), ProfileError> {
        if self.growth_factor <= 1.0 {
            return Err(ProfileError::InvalidConfig(format!(
                "growth_factor {} must exceed 1",
                self.growth_factor
            )));
        }
        if !(0.0..=1.0).contains(&self.clip_quantile) {
            return Err(ProfileError::InvalidConfig(
                "clip_quantile must lie in [0, 1]".into(),
            ));
        }
        validate_harmonics(&self.loss_harmonics).map_err(ProfileError::InvalidConfig)?;
        if self.trend_window < 2 || self.outlier_threshold <= 0.0 {
            return Err(ProfileError::InvalidConfig(
                "trend_window must be >= 2 and outlier_threshold positive".into(),
            ));
        }
        Ok(())
    }
}

/// Geometric radius sequence from `start` out to the visible extent
/// `outer`, growing by `factor` per step. Strictly increasing, never empty.
pub fn radius_sequence(start: f64, outer: f64, factor: f64) -> Vec<f64> {
    let mut radii = vec![start.max(0.5)];
    loop {
        let next = radii.last().unwrap() * factor;
        if next > outer {
            break;
        }
        radii.push(next);
    }
    radii
}

/// Fit one isophote per requested radius, seeded by the global initializer.
///
/// `radii` must be strictly increasing. Radii whose isophote cannot be
/// sampled are skipped; if none can be sampled the profile aborts.
pub fn refine_profile(
    image: &GalaxyImage,
    ctx: &FrameContext,
    init: &GlobalEllipse,
    radii: &[f64],
    config: &RefineConfig,
    minimizer: &dyn Minimizer,
) -> Result<Profile, ProfileError> {
    config.validate()?;
    ctx.validate()?;
    if !radii.windows(2).all(|w| w[0] < w[1]) {
        return Err(ProfileError::InvalidConfig(
            "radii must be strictly increasing".into(),
        ));
    }

    let mut profile = Profile::with_capacity(radii.len());
    let mut seed_eps = init.ellipticity;
    let mut seed_pa = init.position_angle;
    let mut seed_center = ctx.center;
    let mut n_unsampled = 0;
    let mut n_replaced = 0;

    for &radius in radii {
        let candidate = fit_single_radius(
            image, ctx, radius, seed_eps, seed_pa, seed_center, config, minimizer,
        );
        let (mut eps, mut pa, center, converged) = match candidate {
            Some(fit) => fit,
            None => {
                n_unsampled += 1;
                debug!("isophote at r={:.1} could not be sampled, radius skipped", radius);
                continue;
            }
        };

        // Trend guard: compare against the trailing accepted window and
        // fall back to the smoothed value on a large deviation.
        let window = profile.outer(config.trend_window);
        let mut trend_replaced = false;
        if window.len() >= 2 {
            let window_eps: Vec<f64> = window.iter().map(|i| i.ellipticity).collect();
            let window_pa: Vec<f64> = window.iter().map(|i| i.position_angle).collect();

            let trend_eps = median(&window_eps);
            let disp_eps = mad_sigma(&window_eps).max(config.ellipticity_dispersion_floor);
            if (eps - trend_eps).abs() > config.outlier_threshold * disp_eps {
                debug!(
                    "r={:.1}: ellipticity {:.3} is an outlier, replaced by trend {:.3}",
                    radius, eps, trend_eps
                );
                eps = trend_eps;
                trend_replaced = true;
            }

            let trend_pa = pa_mean(&window_pa);
            let devs: Vec<f64> = window_pa
                .iter()
                .map(|&p| pa_difference(p, trend_pa))
                .collect();
            let disp_pa = mad_sigma(&devs).max(config.position_angle_dispersion_floor);
            if pa_difference(pa, trend_pa).abs() > config.outlier_threshold * disp_pa {
                debug!(
                    "r={:.1}: position angle {:.1} deg is an outlier, replaced by trend {:.1} deg",
                    radius,
                    pa.to_degrees(),
                    trend_pa.to_degrees()
                );
                pa = trend_pa;
                trend_replaced = true;
            }
            if trend_replaced {
                n_replaced += 1;
            }
        }

        // Residuals and per-radius errors at the accepted parameters
        let ellipse = Ellipse {
            radius,
            ellipticity: eps,
            position_angle: pa,
        };
        let mut residuals = [0.0; 4];
        if let Some(spec) =
            sampled_spectrum(image, center, &ellipse, ctx.background, config.clip_quantile)
        {
            for (i, r) in residuals.iter_mut().enumerate() {
                *r = spec.normalized_amplitude(i + 1, ctx.noise);
            }
        }

        let window = profile.outer(config.trend_window);
        let (eps_err, pa_err) = if window.len() >= 3 {
            let we: Vec<f64> = window.iter().map(|i| i.ellipticity).collect();
            let trend_pa = pa_mean(&window.iter().map(|i| i.position_angle).collect::<Vec<_>>());
            let wp: Vec<f64> = window
                .iter()
                .map(|i| pa_difference(i.position_angle, trend_pa))
                .collect();
            (
                robust_spread(&we).max(1e-3),
                robust_spread(&wp).max(1e-3),
            )
        } else {
            (init.ellipticity_err, init.position_angle_err)
        };

        profile.push(Isophote {
            radius,
            ellipticity: eps,
            position_angle: pa,
            center,
            residuals,
            ellipticity_err: eps_err,
            position_angle_err: pa_err,
            converged,
            trend_replaced,
        });

        seed_eps = eps;
        seed_pa = pa;
        seed_center = center;
    }

    if profile.is_empty() {
        return Err(ProfileError::SamplingExhausted {
            n_radii: radii.len(),
        });
    }
    if n_unsampled > 0 {
        warn!("{} radii could not be sampled and were skipped", n_unsampled);
    }
    info!(
        "refined {} isophotes ({} trend-replaced)",
        profile.len(),
        n_replaced
    );
    Ok(profile)
}

/// Optimize one radius. Returns the accepted (ellipticity, position angle,
/// center, converged) or `None` when the isophote cannot be sampled at all.
#[allow(clippy::too_many_arguments)]
fn fit_single_radius(
    image: &GalaxyImage,
    ctx: &FrameContext,
    radius: f64,
    seed_eps: f64,
    seed_pa: f64,
    seed_center: PixelPoint,
    config: &RefineConfig,
    minimizer: &dyn Minimizer,
) -> Option<(f64, f64, PixelPoint, bool)> {
    let seed_loss = sampled_loss(
        image,
        seed_center,
        &Ellipse {
            radius,
            ellipticity: seed_eps,
            position_angle: seed_pa,
        },
        ctx.background,
        ctx.noise,
        config.clip_quantile,
        &config.loss_harmonics,
    )?;

    let mut loss = |x: &[f64]| -> f64 {
        let center = if config.fit_center {
            PixelPoint::new(seed_center.x + x[2], seed_center.y + x[3])
        } else {
            seed_center
        };
        sampled_loss(
            image,
            center,
            &Ellipse {
                radius,
                ellipticity: param_to_ellipticity(x[0]),
                position_angle: param_to_position_angle(x[1]),
            },
            ctx.background,
            ctx.noise,
            config.clip_quantile,
            &config.loss_harmonics,
        )
        .unwrap_or(f64::INFINITY)
    };

    let (x0, scale): (Vec<f64>, Vec<f64>) = if config.fit_center {
        (
            vec![
                ellipticity_to_param(seed_eps.max(1e-3)),
                position_angle_to_param(seed_pa),
                0.0,
                0.0,
            ],
            vec![0.2, 0.1, 0.5, 0.5],
        )
    } else {
        (
            vec![
                ellipticity_to_param(seed_eps.max(1e-3)),
                position_angle_to_param(seed_pa),
            ],
            vec![0.2, 0.1],
        )
    };

    let result = minimizer.minimize(&mut loss, &x0, &scale);
    if !result.converged || result.fx > seed_loss {
        // Keep the seed: either the optimizer gave up or it ended worse
        // than where it started.
        if !result.converged {
            debug!("r={:.1}: local fit did not converge, keeping seed parameters", radius);
        }
        return Some((seed_eps, seed_pa, seed_center, false));
    }

    let center = if config.fit_center {
        PixelPoint::new(seed_center.x + result.x[2], seed_center.y + result.x[3])
    } else {
        seed_center
    };
    // Cap runaway ellipticities from degenerate fits
    Some((
        param_to_ellipticity(result.x[0]).min(0.99),
        param_to_position_angle(result.x[1]),
        center,
        true,
    ))
}
