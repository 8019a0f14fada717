//! Fit-quality validation over a finished profile.
//!
//! All statistics are percentile-based (robust dispersion) so a few bad
//! isophotes cannot mask — or fake — a failure. The checker never mutates
//! the profile; it produces a named pass/fail map plus the underlying
//! metric values for downstream reporting.

use tracing::info;

use crate::error::ProfileError;
use crate::stats::{median, pa_difference, robust_spread};

use super::Profile;

/// Thresholds for the quality checks.
#[derive(Debug, Clone)]
pub struct CheckConfig {
    /// Maximum acceptable median (over radii) of the total normalized
    /// residual harmonic power. Default 0.5.
    pub max_residual_power: f64,
    /// Maximum robust dispersion of radius-to-radius ellipticity changes.
    /// Default 0.05.
    pub max_ellipticity_jump: f64,
    /// Maximum robust dispersion of radius-to-radius position-angle
    /// changes, radians. Default 0.1.
    pub max_position_angle_jump: f64,
    /// Maximum fraction of isophotes that were trend-replaced or failed to
    /// converge. Default 0.3.
    pub max_outlier_fraction: f64,
}

impl Default for CheckConfig {
    fn default() -> Self {
        Self {
            max_residual_power: 0.5,
            max_ellipticity_jump: 0.05,
            max_position_angle_jump: 0.1,
            max_outlier_fraction: 0.3,
        }
    }
}

impl CheckConfig {
    pub fn validate(&self) -> Result<(), ProfileError> {
        if self.max_residual_power <= 0.0
            || self.max_ellipticity_jump <= 0.0
            || self.max_position_angle_jump <= 0.0
            || !(0.0..=1.0).contains(&self.max_outlier_fraction)
        {
            return Err(ProfileError::InvalidConfig(
                "check thresholds must be positive (outlier fraction in [0, 1])".into(),
            ));
        }
        Ok(())
    }
}

/// One named check: the measured metric, its threshold and the verdict.
#[derive(Debug, Clone)]
pub struct FitCheck {
    pub name: &'static str,
    pub value: f64,
    pub threshold: f64,
    pub pass: bool,
}

/// Pass/fail verdicts for a profile.
#[derive(Debug, Clone)]
pub struct CheckReport {
    pub checks: Vec<FitCheck>,
}

impl CheckReport {
    /// True when every check passed.
    pub fn all_pass(&self) -> bool {
        self.checks.iter().all(|c| c.pass)
    }

    pub fn get(&self, name: &str) -> Option<&FitCheck> {
        self.checks.iter().find(|c| c.name == name)
    }
}

/// Run the full check set over a profile.
///
/// Profiles too short to measure radius-to-radius dispersion (< 3
/// isophotes) pass the smoothness checks trivially.
pub fn check_fit(profile: &Profile, config: &CheckConfig) -> CheckReport {
    let mut checks = vec![
        residual_power_check(profile, config),
        outlier_fraction_check(profile, config),
    ];

    let eps = profile.ellipticities();
    let eps_jumps: Vec<f64> = eps.windows(2).map(|w| w[1] - w[0]).collect();
    let eps_spread = robust_spread(&eps_jumps);
    checks.push(FitCheck {
        name: "ellipticity_smoothness",
        value: eps_spread,
        threshold: config.max_ellipticity_jump,
        pass: eps_spread <= config.max_ellipticity_jump,
    });

    let pas = profile.position_angles();
    let pa_jumps: Vec<f64> = pas.windows(2).map(|w| pa_difference(w[1], w[0])).collect();
    let pa_spread = robust_spread(&pa_jumps);
    checks.push(FitCheck {
        name: "position_angle_smoothness",
        value: pa_spread,
        threshold: config.max_position_angle_jump,
        pass: pa_spread <= config.max_position_angle_jump,
    });

    let report = CheckReport { checks };
    info!(
        "fit quality: {} ({} checks)",
        if report.all_pass() { "pass" } else { "fail" },
        report.checks.len()
    );
    report
}

/// Reduced check set used when the profile was forced from externally
/// supplied parameters: the parameters were not fitted here, so only the
/// residual power is meaningful.
pub fn check_fit_simple(profile: &Profile, config: &CheckConfig) -> CheckReport {
    CheckReport {
        checks: vec![residual_power_check(profile, config)],
    }
}

fn residual_power_check(profile: &Profile, config: &CheckConfig) -> FitCheck {
    let powers: Vec<f64> = profile.iter().map(|i| i.residual_power()).collect();
    let value = median(&powers);
    FitCheck {
        name: "residual_power",
        value,
        threshold: config.max_residual_power,
        pass: value <= config.max_residual_power,
    }
}

fn outlier_fraction_check(profile: &Profile, config: &CheckConfig) -> FitCheck {
    let n_bad = profile
        .iter()
        .filter(|i| i.trend_replaced || !i.converged)
        .count();
    let value = if profile.is_empty() {
        0.0
    } else {
        n_bad as f64 / profile.len() as f64
    };
    FitCheck {
        name: "outlier_fraction",
        value,
        threshold: config.max_outlier_fraction,
        pass: value <= config.max_outlier_fraction,
    }
}

#[cfg(test)]
mod tests {
    use super::super::Isophote;
    use super::*;
    use crate::image::PixelPoint;

    fn profile_from(params: &[(f64, f64, f64)], residual: f64) -> Profile {
        let mut p = Profile::default();
        for &(radius, eps, pa) in params {
            p.push(Isophote {
                radius,
                ellipticity: eps,
                position_angle: pa,
                center: PixelPoint::new(0.0, 0.0),
                residuals: [residual / 4.0; 4],
                ellipticity_err: 0.01,
                position_angle_err: 0.01,
                converged: true,
                trend_replaced: false,
            });
        }
        p
    }

    fn smooth_params(n: usize) -> Vec<(f64, f64, f64)> {
        (0..n)
            .map(|i| (2.0 * 1.3f64.powi(i as i32), 0.3, 0.7))
            .collect()
    }

    #[test]
    fn test_smooth_profile_passes() {
        let profile = profile_from(&smooth_params(12), 0.05);
        let report = check_fit(&profile, &CheckConfig::default());
        assert!(report.all_pass(), "report: {:?}", report);
        assert_eq!(report.checks.len(), 4);
    }

    #[test]
    fn test_jumpy_ellipticity_fails_smoothness() {
        let mut params = smooth_params(12);
        for (i, p) in params.iter_mut().enumerate() {
            // Alternate between two very different ellipticities
            p.1 = if i % 2 == 0 { 0.1 } else { 0.6 };
        }
        let profile = profile_from(&params, 0.05);
        let report = check_fit(&profile, &CheckConfig::default());
        assert!(!report.get("ellipticity_smoothness").unwrap().pass);
        assert!(!report.all_pass());
    }

    #[test]
    fn test_high_residual_power_fails() {
        let profile = profile_from(&smooth_params(10), 2.0);
        let report = check_fit(&profile, &CheckConfig::default());
        let check = report.get("residual_power").unwrap();
        assert!(!check.pass);
        assert!((check.value - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_outlier_fraction_counts_flags() {
        let mut profile = profile_from(&smooth_params(9), 0.05);
        // Rebuild with some flagged isophotes
        let mut flagged = Profile::default();
        for (i, iso) in profile.iter().enumerate() {
            let mut iso = iso.clone();
            if i < 4 {
                iso.trend_replaced = true;
            }
            flagged.push(iso);
        }
        profile = flagged;
        let report = check_fit(&profile, &CheckConfig::default());
        let check = report.get("outlier_fraction").unwrap();
        assert!((check.value - 4.0 / 9.0).abs() < 1e-12);
        assert!(!check.pass);
    }

    #[test]
    fn test_simple_variant_runs_residual_only() {
        let profile = profile_from(&smooth_params(8), 0.05);
        let report = check_fit_simple(&profile, &CheckConfig::default());
        assert_eq!(report.checks.len(), 1);
        assert_eq!(report.checks[0].name, "residual_power");
    }
}
