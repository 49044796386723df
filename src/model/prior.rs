//! Priors for the free parameters of the transit/eclipse model

use crate::error::FitError;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Prior over a single fitted scalar
///
/// The two supported families mirror the prior triples of the observing scripts:
/// `(normal, mean, std)` and `(uniform, low, high)`.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Prior {
    Normal { mean: f64, std: f64 },
    Uniform { low: f64, high: f64 },
}

impl Prior {
    pub fn normal(mean: f64, std: f64) -> Result<Self, FitError> {
        if !mean.is_finite() || !std.is_finite() || std <= 0.0 {
            return Err(FitError::InvalidPrior(format!(
                "normal prior requires finite mean and positive std, got ({}, {})",
                mean, std
            )));
        }
        Ok(Self::Normal { mean, std })
    }

    pub fn uniform(low: f64, high: f64) -> Result<Self, FitError> {
        if !low.is_finite() || !high.is_finite() || low >= high {
            return Err(FitError::InvalidPrior(format!(
                "uniform prior requires finite low < high, got ({}, {})",
                low, high
            )));
        }
        Ok(Self::Uniform { low, high })
    }

    /// Natural logarithm of the prior density at `x`
    pub fn ln_prior(&self, x: f64) -> f64 {
        match *self {
            Self::Normal { mean, std } => {
                let diff = (x - mean) / std;
                -f64::ln(std) - 0.5 * f64::ln(std::f64::consts::TAU) - 0.5 * diff * diff
            }
            Self::Uniform { low, high } => {
                if (low..=high).contains(&x) {
                    -f64::ln(high - low)
                } else {
                    f64::NEG_INFINITY
                }
            }
        }
    }

    /// Default starting value: the mean for normal, the midpoint for uniform
    pub fn initial(&self) -> f64 {
        match *self {
            Self::Normal { mean, .. } => mean,
            Self::Uniform { low, high } => 0.5 * (low + high),
        }
    }

    /// Optimization bounds: the support for uniform, ±10 sigma for normal
    pub fn bounds(&self) -> (f64, f64) {
        match *self {
            Self::Normal { mean, std } => (mean - 10.0 * std, mean + 10.0 * std),
            Self::Uniform { low, high } => (low, high),
        }
    }

    /// A characteristic scale for walker initialization
    pub fn scale(&self) -> f64 {
        match *self {
            Self::Normal { std, .. } => std,
            Self::Uniform { low, high } => 0.1 * (high - low),
        }
    }
}
