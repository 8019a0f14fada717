//! Error taxonomy for isophote fitting.
//!
//! Per-image failures are isolated: the batch runner maps each image to
//! either a complete report or one of these errors, and one image's failure
//! never affects the others. Within an image, per-radius problems degrade
//! gracefully (seed fallback, trend replacement) and are *not* errors; only
//! conditions that make the whole profile meaningless surface here.

use thiserror::Error;

/// Fatal, per-image failure modes.
#[derive(Debug, Error)]
pub enum ProfileError {
    /// A large contiguous zero region at the image center — the data is
    /// missing or corrupted and no profile can be measured.
    #[error("central {size}x{size} region is identically zero, image data missing or corrupted")]
    CorruptedImage { size: usize },

    /// Isophote sampling failed at essentially every requested radius
    /// (ellipse entirely outside the image, or fully masked).
    #[error("isophote sampling failed at all {n_radii} radii")]
    SamplingExhausted { n_radii: usize },

    /// The star/overflow mask does not match the image shape.
    #[error("mask shape {mask_rows}x{mask_cols} does not match image shape {rows}x{cols}")]
    MaskShapeMismatch {
        rows: usize,
        cols: usize,
        mask_rows: usize,
        mask_cols: usize,
    },

    /// A configuration value is outside its valid range. Raised by
    /// `validate()` before any pixel is touched.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
