//! Ellipse geometry and the bounded↔unbounded parameter transforms.
//!
//! The fit minimizes over ellipticity and position angle. Both live in
//! bounded/periodic physical ranges (ellipticity in [0,1), position angle
//! mod π), which makes unconstrained local minimization misbehave at the
//! boundaries. The optimizer therefore works in transformed variables:
//! ellipticity through a logit/logistic pair that maps (0,1) to the whole
//! real line, position angle as a plain unwrapped angle that is reduced
//! mod π only when read back.

use crate::PixelPoint;

/// One candidate isophote: an ellipse concentric with the galaxy center.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ellipse {
    /// Semi-major axis length in pixels.
    pub radius: f64,
    /// 1 − b/a, in [0, 1). 0 is a circle.
    pub ellipticity: f64,
    /// Major-axis orientation in radians, mod π.
    pub position_angle: f64,
}

impl Ellipse {
    /// A circle of the given radius.
    pub fn circle(radius: f64) -> Self {
        Self {
            radius,
            ellipticity: 0.0,
            position_angle: 0.0,
        }
    }

    /// Pixel position of the ellipse point at parametric angle `theta`
    /// (measured from the major axis), centered on `center`.
    pub fn point_at(&self, center: PixelPoint, theta: f64) -> PixelPoint {
        let (sin_t, cos_t) = theta.sin_cos();
        let (sin_pa, cos_pa) = self.position_angle.sin_cos();
        let u = self.radius * cos_t;
        let v = self.radius * (1.0 - self.ellipticity) * sin_t;
        PixelPoint::new(
            center.x + u * cos_pa - v * sin_pa,
            center.y + u * sin_pa + v * cos_pa,
        )
    }
}

/// Map ellipticity in (0, 1) to the real line (logit). The boundary value
/// 0 maps to −∞, which the logistic inverse maps back to exactly 0.
pub fn ellipticity_to_param(eps: f64) -> f64 {
    (eps / (1.0 - eps)).ln()
}

/// Inverse of [`ellipticity_to_param`] (logistic).
pub fn param_to_ellipticity(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Map a position angle to the unbounded optimization variable. The angle
/// is already a real number; the transform just leaves it unwrapped.
pub fn position_angle_to_param(pa: f64) -> f64 {
    pa
}

/// Inverse of [`position_angle_to_param`]: reduce mod π.
pub fn param_to_position_angle(x: f64) -> f64 {
    let pa = x.rem_euclid(std::f64::consts::PI);
    // rem_euclid rounds tiny negative inputs up to exactly π
    if pa >= std::f64::consts::PI {
        0.0
    } else {
        pa
    }
}
