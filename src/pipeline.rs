//! Per-image pipeline and batch runner.
//!
//! Each core stage (initializer, fitter, checker) is an enum of named
//! variants selected by configuration; the "forced" variants re-measure a
//! profile from externally supplied ellipse parameters instead of fitting.
//! Images are independent: the batch runner fans tasks out over a bounded
//! worker pool and aggregates results preserving input order, so one bad
//! image can never abort the rest.

use rayon::prelude::*;
use tracing::{error, info, warn};

use crate::error::ProfileError;
use crate::fit::{
    check_fit, check_fit_simple, initialize_global, radius_sequence, refine_profile, CheckConfig,
    CheckReport, GlobalEllipse, InitializeConfig, Isophote, Profile, RefineConfig,
};
use crate::geometry::Ellipse;
use crate::image::{FrameContext, GalaxyImage};
use crate::optimize::Minimizer;

/// Central blank-region size treated as corrupted data.
const BLANK_CENTER_SIZE: usize = 20;

/// How the global ellipse is obtained.
#[derive(Debug, Clone)]
pub enum InitializerStage {
    /// Circular aperture growth plus second-harmonic analysis.
    CircularHarmonic(InitializeConfig),
    /// Externally supplied global parameters; no initialization is run.
    Fixed(GlobalEllipse),
}

/// How the per-radius profile is produced.
#[derive(Debug, Clone)]
pub enum FitStage {
    /// Local harmonic-loss optimization per radius with trend smoothing.
    HarmonicRobust(RefineConfig),
    /// Apply the given ellipses as-is (radius-ascending), re-measuring
    /// residuals only. Used to transfer a fit onto another image.
    Forced {
        isophotes: Vec<Ellipse>,
        clip_quantile: f64,
    },
}

/// Which quality-check set runs on the finished profile.
#[derive(Debug, Clone)]
pub enum CheckStage {
    /// Full robust-dispersion check set.
    RobustDispersion(CheckConfig),
    /// Residual-power check only, for forced profiles whose parameters
    /// were not fitted here.
    Simple(CheckConfig),
}

/// Complete per-run configuration: every stage variant and every numeric
/// option, validated before any pixel is touched.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub initializer: InitializerStage,
    pub fitter: FitStage,
    pub checker: CheckStage,
    /// Bound on the batch worker pool. `None` uses the process default.
    pub threads: Option<usize>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            initializer: InitializerStage::CircularHarmonic(InitializeConfig::default()),
            fitter: FitStage::HarmonicRobust(RefineConfig::default()),
            checker: CheckStage::RobustDispersion(CheckConfig::default()),
            threads: None,
        }
    }
}

impl PipelineConfig {
    /// The forced-mode bundle: keep the standard initializer, apply the
    /// given ellipses without fitting, run the reduced check set.
    pub fn forced(isophotes: Vec<Ellipse>) -> Self {
        Self {
            fitter: FitStage::Forced {
                isophotes,
                clip_quantile: RefineConfig::default().clip_quantile,
            },
            checker: CheckStage::Simple(CheckConfig::default()),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), ProfileError> {
        match &self.initializer {
            InitializerStage::CircularHarmonic(c) => c.validate()?,
            InitializerStage::Fixed(g) => {
                if !(0.0..1.0).contains(&g.ellipticity) || g.outer_radius <= 0.0 {
                    return Err(ProfileError::InvalidConfig(
                        "fixed global ellipse out of range".into(),
                    ));
                }
            }
        }
        match &self.fitter {
            FitStage::HarmonicRobust(c) => c.validate()?,
            FitStage::Forced {
                isophotes,
                clip_quantile,
            } => {
                if isophotes.is_empty() || !(0.0..=1.0).contains(clip_quantile) {
                    return Err(ProfileError::InvalidConfig(
                        "forced fit needs ellipses and a clip quantile in [0, 1]".into(),
                    ));
                }
                if !isophotes.windows(2).all(|w| w[0].radius < w[1].radius) {
                    return Err(ProfileError::InvalidConfig(
                        "forced ellipses must have strictly increasing radii".into(),
                    ));
                }
            }
        }
        match &self.checker {
            CheckStage::RobustDispersion(c) | CheckStage::Simple(c) => c.validate()?,
        }
        if self.threads == Some(0) {
            return Err(ProfileError::InvalidConfig(
                "thread count must be nonzero".into(),
            ));
        }
        Ok(())
    }
}

/// One image to process.
pub struct ImageTask {
    /// Identifier carried through logs and reports.
    pub name: String,
    pub image: GalaxyImage,
    pub ctx: FrameContext,
}

/// Finished result set for one image.
pub struct ImageReport {
    pub name: String,
    pub init: GlobalEllipse,
    pub profile: Profile,
    pub checks: CheckReport,
}

/// Run the full pipeline on one image: corruption guard, initialize,
/// refine, check. Either a complete report or a typed error — never a
/// partial profile.
pub fn process_image(
    task: &ImageTask,
    config: &PipelineConfig,
    minimizer: &dyn Minimizer,
) -> Result<ImageReport, ProfileError> {
    config.validate()?;
    task.ctx.validate()?;
    info!("{}: processing", task.name);

    if task.image.center_region_blank(BLANK_CENTER_SIZE) {
        return Err(ProfileError::CorruptedImage {
            size: BLANK_CENTER_SIZE,
        });
    }

    let init = match &config.initializer {
        InitializerStage::CircularHarmonic(c) => {
            initialize_global(&task.image, &task.ctx, c, minimizer)?
        }
        InitializerStage::Fixed(g) => *g,
    };

    let profile = match &config.fitter {
        FitStage::HarmonicRobust(c) => {
            let radii = radius_sequence(task.ctx.psf_fwhm, init.outer_radius, c.growth_factor);
            refine_profile(&task.image, &task.ctx, &init, &radii, c, minimizer)?
        }
        FitStage::Forced {
            isophotes,
            clip_quantile,
        } => forced_profile(&task.image, &task.ctx, isophotes, *clip_quantile)?,
    };

    let checks = match &config.checker {
        CheckStage::RobustDispersion(c) => check_fit(&profile, c),
        CheckStage::Simple(c) => check_fit_simple(&profile, c),
    };

    info!("{}: complete, {} isophotes", task.name, profile.len());
    Ok(ImageReport {
        name: task.name.clone(),
        init,
        profile,
        checks,
    })
}

/// Process many images on a bounded worker pool, preserving input order.
/// Failures are per-image; the batch always completes.
pub fn process_batch(
    tasks: &[ImageTask],
    config: &PipelineConfig,
    minimizer: &dyn Minimizer,
) -> Vec<Result<ImageReport, ProfileError>> {
    let run = || {
        tasks
            .par_iter()
            .map(|task| {
                process_image(task, config, minimizer).map_err(|e| {
                    error!("{}: processing failed: {}", task.name, e);
                    e
                })
            })
            .collect()
    };

    match config.threads {
        Some(n) => match rayon::ThreadPoolBuilder::new().num_threads(n).build() {
            Ok(pool) => pool.install(run),
            Err(e) => {
                warn!("could not build a {}-thread pool ({}), using the default", n, e);
                run()
            }
        },
        None => run(),
    }
}

/// Re-measure residuals along externally supplied ellipses without any
/// optimization.
fn forced_profile(
    image: &GalaxyImage,
    ctx: &FrameContext,
    isophotes: &[Ellipse],
    clip_quantile: f64,
) -> Result<Profile, ProfileError> {
    let mut profile = Profile::with_capacity(isophotes.len());
    for ellipse in isophotes {
        let spec = match crate::fit::sampled_spectrum(
            image,
            ctx.center,
            ellipse,
            ctx.background,
            clip_quantile,
        ) {
            Some(s) => s,
            None => continue,
        };
        let mut residuals = [0.0; 4];
        for (i, r) in residuals.iter_mut().enumerate() {
            *r = spec.normalized_amplitude(i + 1, ctx.noise);
        }
        profile.push(Isophote {
            radius: ellipse.radius,
            ellipticity: ellipse.ellipticity,
            position_angle: ellipse.position_angle,
            center: ctx.center,
            residuals,
            ellipticity_err: 0.0,
            position_angle_err: 0.0,
            converged: true,
            trend_replaced: false,
        });
    }
    if profile.is_empty() {
        return Err(ProfileError::SamplingExhausted {
            n_radii: isophotes.len(),
        });
    }
    Ok(profile)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fit::testutil::{synthetic_galaxy, test_context};
    use crate::optimize::NelderMead;
    use ndarray::Array2;

    fn good_task(name: &str) -> ImageTask {
        ImageTask {
            name: name.into(),
            image: synthetic_galaxy(128, 0.25, 1.0, 9.0),
            ctx: test_context(128),
        }
    }

    fn corrupted_task(name: &str) -> ImageTask {
        ImageTask {
            name: name.into(),
            image: GalaxyImage::new(Array2::zeros((128, 128))),
            ctx: test_context(128),
        }
    }

    #[test]
    fn test_corrupted_image_rejected() {
        let out = process_image(
            &corrupted_task("blank"),
            &PipelineConfig::default(),
            &NelderMead::default(),
        );
        assert!(matches!(out, Err(ProfileError::CorruptedImage { .. })));
    }

    #[test]
    fn test_single_image_end_to_end() {
        let report = process_image(
            &good_task("galaxy"),
            &PipelineConfig::default(),
            &NelderMead::default(),
        )
        .unwrap();
        assert!(!report.profile.is_empty());
        assert!((report.init.ellipticity - 0.25).abs() < 0.08);
        assert_eq!(report.checks.checks.len(), 4);
    }

    #[test]
    fn test_batch_preserves_order_and_isolates_failures() {
        let tasks = vec![good_task("a"), corrupted_task("b"), good_task("c")];
        let config = PipelineConfig {
            threads: Some(2),
            ..Default::default()
        };
        let results = process_batch(&tasks, &config, &NelderMead::default());
        assert_eq!(results.len(), 3);
        assert!(results[0].is_ok());
        assert!(matches!(
            results[1],
            Err(ProfileError::CorruptedImage { .. })
        ));
        assert!(results[2].is_ok());
        assert_eq!(results[0].as_ref().unwrap().name, "a");
        assert_eq!(results[2].as_ref().unwrap().name, "c");
    }

    #[test]
    fn test_forced_profile_reuses_parameters() {
        let ellipses: Vec<Ellipse> = [4.0, 6.0, 9.0, 13.5, 20.0]
            .iter()
            .map(|&radius| Ellipse {
                radius,
                ellipticity: 0.25,
                position_angle: 1.0,
            })
            .collect();
        let config = PipelineConfig::forced(ellipses);
        let report = process_image(&good_task("forced"), &config, &NelderMead::default()).unwrap();
        assert_eq!(report.profile.len(), 5);
        assert_eq!(report.checks.checks.len(), 1);
        // Parameters are passed through untouched
        for iso in report.profile.iter() {
            assert!((iso.ellipticity - 0.25).abs() < 1e-12);
        }
    }

    #[test]
    fn test_fixed_initializer_skips_growth() {
        let fixed = GlobalEllipse {
            ellipticity: 0.25,
            ellipticity_err: 0.02,
            position_angle: 1.0,
            position_angle_err: 0.02,
            reference_radius: 30.0,
            outer_radius: 40.0,
        };
        let config = PipelineConfig {
            initializer: InitializerStage::Fixed(fixed),
            ..Default::default()
        };
        let report = process_image(&good_task("fixed"), &config, &NelderMead::default()).unwrap();
        assert!((report.init.reference_radius - 30.0).abs() < 1e-12);
    }

    #[test]
    fn test_config_validation_covers_stages() {
        let mut config = PipelineConfig::default();
        config.threads = Some(0);
        assert!(config.validate().is_err());

        let config = PipelineConfig::forced(vec![]);
        assert!(config.validate().is_err());

        let out_of_order = PipelineConfig::forced(vec![
            Ellipse::circle(10.0),
            Ellipse::circle(5.0),
        ]);
        assert!(out_of_order.validate().is_err());
    }
}
