//! # isofit
//!
//! **Galaxy surface-brightness isophote fitting** via harmonic decomposition.
//!
//! Given a sky-subtracted image of a galaxy plus the background level,
//! noise, PSF width and center measured by upstream tooling, `isofit`
//! recovers the sequence of concentric elliptical isophotes (curves of
//! constant surface brightness) that a downstream profile extractor turns
//! into a photometric profile.
//!
//! ## Algorithm overview
//!
//! 1. **Global initialization** — circular apertures grow geometrically
//!    from the PSF scale until the sampled flux nears the noise floor,
//!    bounding the galaxy's visible extent. The phase of the second Fourier
//!    harmonic along those circles yields a global position angle; its
//!    power, minimized over an ellipticity grid plus a simplex refinement,
//!    yields a global ellipticity. Error bars come from resampling nearby
//!    radii.
//! 2. **Per-radius refinement** — walking an increasing radius sequence,
//!    the ellipse parameters are locally re-optimized at each radius
//!    against the low-order harmonic amplitudes of the sampled flux,
//!    seeded by the previous radius. A trailing-window trend guard
//!    replaces outlier fits with the smoothed local trend.
//! 3. **Quality checks** — robust-dispersion statistics over the finished
//!    profile produce a named pass/fail map.
//!
//! Flux along a matching isophote is constant in angle, so any power in
//! the low-order Fourier modes of the sampled values measures mismatch:
//! the 1st harmonic responds to a center offset, the 2nd to wrong
//! ellipticity/orientation, the 3rd and 4th to asymmetry and boxiness.
//!
//! ## Example
//!
//! ```no_run
//! use isofit::{
//!     process_image, FrameContext, GalaxyImage, ImageTask, NelderMead, PipelineConfig,
//!     PixelPoint,
//! };
//! use ndarray::Array2;
//!
//! // Flux image and per-frame scalars from upstream stages
//! let data = Array2::<f64>::zeros((200, 200));
//! let task = ImageTask {
//!     name: "NGC1234".into(),
//!     image: GalaxyImage::new(data),
//!     ctx: FrameContext {
//!         background: 0.0,
//!         noise: 1.0,
//!         psf_fwhm: 3.0,
//!         center: PixelPoint::new(100.0, 100.0),
//!     },
//! };
//!
//! let report = process_image(&task, &PipelineConfig::default(), &NelderMead::default())?;
//! for iso in report.profile.iter() {
//!     println!(
//!         "r={:6.1}  e={:.3}  pa={:5.1} deg",
//!         iso.radius,
//!         iso.ellipticity,
//!         iso.position_angle.to_degrees()
//!     );
//! }
//! println!("all checks pass: {}", report.checks.all_pass());
//! # Ok::<(), isofit::ProfileError>(())
//! ```
//!
//! ## Concurrency
//!
//! Images are independent: [`process_batch`] runs many tasks on a bounded
//! worker pool with order-preserving results and per-image failure
//! isolation. Within one image the radius chain is strictly sequential
//! (each fit seeds the next); only the initializer's independent grid and
//! resampling evaluations fan out.

pub mod error;
pub mod fit;
pub mod geometry;
pub mod harmonics;
pub mod image;
pub mod optimize;
pub mod pipeline;
pub mod sample;
pub mod stats;

pub use error::ProfileError;
pub use fit::{
    check_fit, check_fit_simple, initialize_global, radius_sequence, refine_profile, CheckConfig,
    CheckReport, FitCheck, GlobalEllipse, InitializeConfig, Isophote, Profile, RefineConfig,
};
pub use geometry::Ellipse;
pub use harmonics::{analyze, HarmonicSpectrum};
pub use image::{FrameContext, GalaxyImage, PixelPoint};
pub use optimize::{MinimizeResult, Minimizer, NelderMead};
pub use pipeline::{
    process_batch, process_image, CheckStage, FitStage, ImageReport, ImageTask, InitializerStage,
    PipelineConfig,
};
pub use sample::{sample_count, sample_isophote, IsophoteSample};
