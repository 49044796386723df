//! Noise models for the photometric likelihood

use nalgebra::{Cholesky, DMatrix, DVector};
use ndarray::ArrayView1;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// How correlated noise in the light curve is treated
#[derive(Clone, Copy, Debug, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum NoiseModel {
    /// Independent Gaussian noise with per-point variance plus a fitted jitter
    #[default]
    White,
    /// Matern-3/2 Gaussian process on the residuals, on top of the white component
    Matern32Gp,
}

/// Log-likelihood of independent Gaussian residuals with per-point variance
pub fn white_ln_likelihood(residuals: ArrayView1<f64>, variance: ArrayView1<f64>) -> f64 {
    residuals
        .iter()
        .zip(variance.iter())
        .map(|(&r, &v)| -0.5 * ((std::f64::consts::TAU * v).ln() + r * r / v))
        .sum()
}

/// Matern-3/2 covariance between two instants
fn matern32(tau: f64, sigma: f64, rho: f64) -> f64 {
    let arg = 3.0_f64.sqrt() * tau.abs() / rho;
    sigma * sigma * (1.0 + arg) * (-arg).exp()
}

/// Log-likelihood of residuals under a Matern-3/2 process plus white variance
///
/// Returns `None` when the covariance matrix is not positive definite, which the
/// caller treats as zero posterior mass.
pub fn matern32_ln_likelihood(
    time: ArrayView1<f64>,
    residuals: ArrayView1<f64>,
    variance: ArrayView1<f64>,
    gp_sigma: f64,
    gp_rho: f64,
) -> Option<f64> {
    if gp_sigma <= 0.0 || gp_rho <= 0.0 {
        return None;
    }
    let n = time.len();
    let mut cov = DMatrix::from_fn(n, n, |i, j| matern32(time[i] - time[j], gp_sigma, gp_rho));
    for i in 0..n {
        cov[(i, i)] += variance[i];
    }
    let chol = Cholesky::new(cov)?;

    let r = DVector::from_iterator(n, residuals.iter().copied());
    let alpha = chol.solve(&r);
    let ln_det: f64 = chol.l().diagonal().iter().map(|d| d.ln()).sum::<f64>() * 2.0;
    Some(-0.5 * (r.dot(&alpha) + ln_det + n as f64 * std::f64::consts::TAU.ln()))
}
