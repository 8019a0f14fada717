//! Image and per-frame context types consumed by the fit.
//!
//! The crate does no image I/O: callers hand over a 2D flux array (plus the
//! background, noise, PSF width and center that upstream stages measured)
//! and everything here is read-only for the duration of the fit.

use nalgebra::Point2;
use ndarray::Array2;

use crate::error::ProfileError;

/// Pixel-coordinate point, (x, y) = (column, row).
pub type PixelPoint = Point2<f64>;

/// Immutable flux image with an optional star/overflow mask.
///
/// Indexing follows ndarray convention: `data[[row, col]]`, so a pixel at
/// (x, y) in image coordinates is `data[[y, x]]`.
#[derive(Debug, Clone)]
pub struct GalaxyImage {
    data: Array2<f64>,
    mask: Option<Array2<bool>>,
}

impl GalaxyImage {
    pub fn new(data: Array2<f64>) -> Self {
        Self { data, mask: None }
    }

    /// Attach a star/overflow mask. `true` entries are excluded from
    /// isophote sampling. Fails if the shapes differ.
    pub fn with_mask(data: Array2<f64>, mask: Array2<bool>) -> Result<Self, ProfileError> {
        if data.dim() != mask.dim() {
            let (rows, cols) = data.dim();
            let (mask_rows, mask_cols) = mask.dim();
            return Err(ProfileError::MaskShapeMismatch {
                rows,
                cols,
                mask_rows,
                mask_cols,
            });
        }
        Ok(Self {
            data,
            mask: Some(mask),
        })
    }

    /// Image width (columns).
    pub fn width(&self) -> usize {
        self.data.dim().1
    }

    /// Image height (rows).
    pub fn height(&self) -> usize {
        self.data.dim().0
    }

    pub fn data(&self) -> &Array2<f64> {
        &self.data
    }

    /// Bilinearly interpolated flux at sub-pixel position (x, y).
    ///
    /// Returns `None` when the 2×2 interpolation neighborhood falls outside
    /// the image or touches a masked pixel — the caller sees the sample as
    /// missing rather than receiving fabricated data.
    pub fn interpolate(&self, x: f64, y: f64) -> Option<f64> {
        if !x.is_finite() || !y.is_finite() || x < 0.0 || y < 0.0 {
            return None;
        }
        let x0 = x.floor() as usize;
        let y0 = y.floor() as usize;
        let x1 = x0 + 1;
        let y1 = y0 + 1;
        if x1 >= self.width() || y1 >= self.height() {
            return None;
        }
        if let Some(mask) = &self.mask {
            if mask[[y0, x0]] || mask[[y0, x1]] || mask[[y1, x0]] || mask[[y1, x1]] {
                return None;
            }
        }
        let fx = x - x0 as f64;
        let fy = y - y0 as f64;
        let v00 = self.data[[y0, x0]];
        let v10 = self.data[[y0, x1]];
        let v01 = self.data[[y1, x0]];
        let v11 = self.data[[y1, x1]];
        Some(
            v00 * (1.0 - fx) * (1.0 - fy)
                + v10 * fx * (1.0 - fy)
                + v01 * (1.0 - fx) * fy
                + v11 * fx * fy,
        )
    }

    /// True when the `size`×`size` region around the image center is
    /// identically zero — the signature of missing/corrupted data.
    pub fn center_region_blank(&self, size: usize) -> bool {
        let half = size / 2;
        let row_mid = self.height() / 2;
        let col_mid = self.width() / 2;
        let r0 = row_mid.saturating_sub(half);
        let r1 = (row_mid + half).min(self.height());
        let c0 = col_mid.saturating_sub(half);
        let c1 = (col_mid + half).min(self.width());
        for row in r0..r1 {
            for col in c0..c1 {
                if self.data[[row, col]] != 0.0 {
                    return false;
                }
            }
        }
        true
    }
}

/// Per-image scalars measured by upstream pipeline stages.
#[derive(Debug, Clone, Copy)]
pub struct FrameContext {
    /// Background flux level, subtracted before harmonic analysis.
    pub background: f64,
    /// Background noise sigma, used by the noise-floor stop rule and for
    /// normalizing the harmonic loss.
    pub noise: f64,
    /// PSF full width at half maximum, in pixels. Sets the starting radius
    /// and the span of the uncertainty resampling.
    pub psf_fwhm: f64,
    /// Galaxy center in pixel coordinates (x, y).
    pub center: PixelPoint,
}

impl FrameContext {
    /// Reject contexts the fit cannot work with: the noise floor rule and
    /// the loss normalization both need a positive noise, and the radius
    /// growth starts from the PSF scale.
    pub fn validate(&self) -> Result<(), ProfileError> {
        if self.noise <= 0.0 || !self.noise.is_finite() {
            return Err(ProfileError::InvalidConfig(format!(
                "background noise {} must be positive and finite",
                self.noise
            )));
        }
        if self.psf_fwhm <= 0.0 || !self.psf_fwhm.is_finite() {
            return Err(ProfileError::InvalidConfig(format!(
                "PSF FWHM {} must be positive and finite",
                self.psf_fwhm
            )));
        }
        if !self.center.x.is_finite() || !self.center.y.is_finite() || !self.background.is_finite()
        {
            return Err(ProfileError::InvalidConfig(
                "center and background must be finite".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    #[test]
    fn test_interpolate_exact_and_midpoint() {
        let mut data = Array2::zeros((4, 4));
        data[[1, 1]] = 1.0;
        data[[1, 2]] = 3.0;
        let img = GalaxyImage::new(data);
        assert_eq!(img.interpolate(1.0, 1.0), Some(1.0));
        // Halfway between the two set pixels along x
        assert_eq!(img.interpolate(1.5, 1.0), Some(2.0));
    }

    #[test]
    fn test_interpolate_out_of_bounds() {
        let img = GalaxyImage::new(Array2::zeros((4, 4)));
        assert_eq!(img.interpolate(-0.5, 1.0), None);
        assert_eq!(img.interpolate(3.5, 1.0), None);
        assert_eq!(img.interpolate(1.0, f64::NAN), None);
    }

    #[test]
    fn test_mask_blocks_samples() {
        let data = Array2::from_elem((4, 4), 2.0);
        let mut mask = Array2::from_elem((4, 4), false);
        mask[[2, 2]] = true;
        let img = GalaxyImage::with_mask(data, mask).unwrap();
        assert_eq!(img.interpolate(0.5, 0.5), Some(2.0));
        assert_eq!(img.interpolate(1.5, 1.5), None);
    }

    #[test]
    fn test_mask_shape_mismatch() {
        let data = Array2::zeros((4, 4));
        let mask = Array2::from_elem((3, 4), false);
        assert!(matches!(
            GalaxyImage::with_mask(data, mask),
            Err(ProfileError::MaskShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_center_region_blank() {
        let mut data = Array2::zeros((40, 40));
        let img = GalaxyImage::new(data.clone());
        assert!(img.center_region_blank(20));
        data[[20, 20]] = 0.5;
        let img = GalaxyImage::new(data);
        assert!(!img.center_region_blank(20));
    }
}
