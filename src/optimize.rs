//! Derivative-free local minimization.
//!
//! The harmonic loss is built from FFT amplitudes of interpolated pixel
//! samples; it has no closed-form gradient and is only piecewise smooth, so
//! the fit uses a simplex (Nelder–Mead) search. The minimizer is a trait so
//! an alternative implementation can be substituted and tested against the
//! same loss contract.

/// Outcome of a local minimization.
#[derive(Debug, Clone)]
pub struct MinimizeResult {
    /// Best parameter vector found.
    pub x: Vec<f64>,
    /// Loss at `x`.
    pub fx: f64,
    /// Whether the convergence criteria were met before the iteration cap.
    pub converged: bool,
    /// Number of loss evaluations spent.
    pub n_evals: usize,
}

/// A derivative-free local minimizer.
pub trait Minimizer: Send + Sync {
    /// Minimize `f` starting from `x0`. `scale[i]` sets the initial step
    /// along dimension `i` (the initial simplex spread).
    fn minimize(
        &self,
        f: &mut dyn FnMut(&[f64]) -> f64,
        x0: &[f64],
        scale: &[f64],
    ) -> MinimizeResult;
}

/// Nelder–Mead downhill simplex with standard coefficients
/// (reflection 1, expansion 2, contraction 0.5, shrink 0.5).
#[derive(Debug, Clone)]
pub struct NelderMead {
    /// Iteration cap. Default 200.
    pub max_iterations: usize,
    /// Converged when every simplex edge is shorter than this. Default 1e-6.
    pub xtol: f64,
    /// Converged when the loss spread across the simplex is below this.
    /// Default 1e-10.
    pub ftol: f64,
}

impl Default for NelderMead {
    fn default() -> Self {
        Self {
            max_iterations: 200,
            xtol: 1e-6,
            ftol: 1e-10,
        }
    }
}

impl Minimizer for NelderMead {
    fn minimize(
        &self,
        f: &mut dyn FnMut(&[f64]) -> f64,
        x0: &[f64],
        scale: &[f64],
    ) -> MinimizeResult {
        assert_eq!(x0.len(), scale.len(), "x0 and scale lengths differ");
        let dim = x0.len();
        let mut n_evals = 0;
        let mut eval = |x: &[f64], n_evals: &mut usize| {
            *n_evals += 1;
            let v = f(x);
            if v.is_nan() {
                f64::INFINITY
            } else {
                v
            }
        };

        // Initial simplex: x0 plus one step along each axis
        let mut simplex: Vec<Vec<f64>> = Vec::with_capacity(dim + 1);
        simplex.push(x0.to_vec());
        for i in 0..dim {
            let mut v = x0.to_vec();
            v[i] += scale[i];
            simplex.push(v);
        }
        let mut fvals: Vec<f64> = simplex.iter().map(|v| eval(v, &mut n_evals)).collect();

        let mut converged = false;
        for _ in 0..self.max_iterations {
            // Order best → worst
            let mut order: Vec<usize> = (0..=dim).collect();
            order.sort_by(|&a, &b| fvals[a].partial_cmp(&fvals[b]).unwrap());
            let simplex_sorted: Vec<Vec<f64>> = order.iter().map(|&i| simplex[i].clone()).collect();
            let fvals_sorted: Vec<f64> = order.iter().map(|&i| fvals[i]).collect();
            simplex = simplex_sorted;
            fvals = fvals_sorted;

            // Convergence: loss spread and simplex extent
            let f_spread = fvals[dim] - fvals[0];
            let x_extent = simplex[1..]
                .iter()
                .map(|v| {
                    v.iter()
                        .zip(&simplex[0])
                        .map(|(a, b)| (a - b).abs())
                        .fold(0.0, f64::max)
                })
                .fold(0.0, f64::max);
            if f_spread.abs() < self.ftol || x_extent < self.xtol {
                converged = true;
                break;
            }

            // Centroid of all but the worst vertex
            let mut centroid = vec![0.0; dim];
            for v in &simplex[..dim] {
                for (c, &vi) in centroid.iter_mut().zip(v) {
                    *c += vi / dim as f64;
                }
            }

            let blend = |a: f64, b: f64, t: f64| a + t * (b - a);
            let worst = simplex[dim].clone();
            let reflected: Vec<f64> = centroid
                .iter()
                .zip(&worst)
                .map(|(&c, &w)| blend(c, w, -1.0))
                .collect();
            let f_reflected = eval(&reflected, &mut n_evals);

            if f_reflected < fvals[0] {
                // Try expanding further in the same direction
                let expanded: Vec<f64> = centroid
                    .iter()
                    .zip(&worst)
                    .map(|(&c, &w)| blend(c, w, -2.0))
                    .collect();
                let f_expanded = eval(&expanded, &mut n_evals);
                if f_expanded < f_reflected {
                    simplex[dim] = expanded;
                    fvals[dim] = f_expanded;
                } else {
                    simplex[dim] = reflected;
                    fvals[dim] = f_reflected;
                }
            } else if f_reflected < fvals[dim - 1] {
                simplex[dim] = reflected;
                fvals[dim] = f_reflected;
            } else {
                // Contract toward the centroid
                let toward = if f_reflected < fvals[dim] {
                    &reflected
                } else {
                    &worst
                };
                let contracted: Vec<f64> = centroid
                    .iter()
                    .zip(toward)
                    .map(|(&c, &t)| blend(c, t, 0.5))
                    .collect();
                let f_contracted = eval(&contracted, &mut n_evals);
                if f_contracted < fvals[dim].min(f_reflected) {
                    simplex[dim] = contracted;
                    fvals[dim] = f_contracted;
                } else {
                    // Shrink everything toward the best vertex
                    let best = simplex[0].clone();
                    for i in 1..=dim {
                        for (v, &b) in simplex[i].iter_mut().zip(&best) {
                            *v = b + 0.5 * (*v - b);
                        }
                        fvals[i] = eval(&simplex[i].clone(), &mut n_evals);
                    }
                }
            }
        }

        let best = fvals
            .iter()
            .enumerate()
            .min_by(|a, b| a.1.partial_cmp(b.1).unwrap())
            .map(|(i, _)| i)
            .unwrap_or(0);

        MinimizeResult {
            x: simplex[best].clone(),
            fx: fvals[best],
            converged,
            n_evals,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quadratic_1d() {
        let nm = NelderMead::default();
        let mut f = |x: &[f64]| (x[0] - 3.0).powi(2);
        let res = nm.minimize(&mut f, &[0.0], &[0.5]);
        assert!(res.converged);
        assert!((res.x[0] - 3.0).abs() < 1e-4, "x: {}", res.x[0]);
    }

    #[test]
    fn test_quadratic_2d_correlated() {
        let nm = NelderMead::default();
        let mut f = |x: &[f64]| {
            let (a, b) = (x[0] - 1.0, x[1] + 2.0);
            a * a + 2.0 * b * b + a * b
        };
        let res = nm.minimize(&mut f, &[5.0, 5.0], &[1.0, 1.0]);
        assert!(res.converged);
        assert!((res.x[0] - 1.0).abs() < 1e-3, "x0: {}", res.x[0]);
        assert!((res.x[1] + 2.0).abs() < 1e-3, "x1: {}", res.x[1]);
    }

    #[test]
    fn test_iteration_cap_reports_non_convergence() {
        let nm = NelderMead {
            max_iterations: 2,
            ..Default::default()
        };
        let mut f = |x: &[f64]| (x[0] - 100.0).powi(2) + (x[1] - 100.0).powi(2);
        let res = nm.minimize(&mut f, &[0.0, 0.0], &[0.1, 0.1]);
        assert!(!res.converged);
    }

    #[test]
    fn test_nan_losses_treated_as_worst() {
        let nm = NelderMead::default();
        // NaN outside the valley must not poison the search
        let mut f = |x: &[f64]| {
            if x[0] < -5.0 {
                f64::NAN
            } else {
                (x[0] - 1.0).powi(2)
            }
        };
        let res = nm.minimize(&mut f, &[-4.0], &[2.0]);
        assert!((res.x[0] - 1.0).abs() < 1e-3, "x: {}", res.x[0]);
    }
}
