//! Probabilistic transit/eclipse model and MAP optimization
//!
//! The model is declared once by [`TransitModelBuilder`] and evaluated many times by
//! the optimizer and the sampler. Parameters live in two spaces: the external space
//! of physical values (priors and results) and an internal space centered on a
//! reference point and scaled by the prior widths, which keeps the optimizer and the
//! single-precision sampler numerically well conditioned.

pub mod lightcurve;
pub mod noise;
pub mod prior;

pub use lightcurve::Orbit;
pub use noise::NoiseModel;
pub use prior::Prior;

use crate::error::FitError;
use crate::stats;

use enum_dispatch::enum_dispatch;
use log::{debug, info, warn};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Which conjunction the data cover
#[derive(Clone, Copy, Debug, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Transit: the planet crosses the stellar disk, depth parameter is `ror`
    Primary,
    /// Eclipse: the planet passes behind the star, depth parameter is `fpfs`
    Secondary,
}

/// Limb-darkening treatment of the stellar disk
#[derive(Clone, Copy, Debug, Serialize, Deserialize, JsonSchema, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LimbDarkening {
    /// Fit (q1, q2) in the triangular parameterization, reporting derived (u1, u2)
    #[default]
    Free,
    /// Quadratic coefficients held at the given (u1, u2)
    Fixed([f64; 2]),
}

/// Priors over the physical parameters
///
/// `depth` is the prior on `ror` for the primary phase and on `fpfs` for the
/// secondary. The GP hyperpriors are only consulted in GP noise mode.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct TransitPriors {
    pub r_star: Prior,
    pub period: Prior,
    pub t0: Prior,
    pub a_rs: Prior,
    pub b: Prior,
    pub depth: Prior,
    pub jitter: Prior,
    #[serde(default)]
    pub gp_sigma: Option<Prior>,
    #[serde(default)]
    pub gp_rho: Option<Prior>,
}

/// Declarative description of the model, independent of any particular data set
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct TransitModelBuilder {
    pub phase: Phase,
    pub priors: TransitPriors,
    #[serde(default)]
    pub limb_darkening: LimbDarkening,
    #[serde(default)]
    pub noise: NoiseModel,
    /// Linear-in-time baseline, white-noise mode only
    #[serde(default = "TransitModelBuilder::default_baseline")]
    pub baseline: bool,
    /// Half-width of the uniform prior on comparison/covariate weights
    #[serde(default = "TransitModelBuilder::default_weight_bound")]
    pub weight_bound: f64,
    /// Exposure time in the units of the time array; zero disables smoothing
    #[serde(default)]
    pub texp: f64,
    #[serde(default = "TransitModelBuilder::default_oversample")]
    pub oversample: usize,
}

impl TransitModelBuilder {
    pub fn new(phase: Phase, priors: TransitPriors) -> Self {
        Self {
            phase,
            priors,
            limb_darkening: LimbDarkening::default(),
            noise: NoiseModel::default(),
            baseline: Self::default_baseline(),
            weight_bound: Self::default_weight_bound(),
            texp: 0.0,
            oversample: Self::default_oversample(),
        }
    }

    #[inline]
    pub fn default_baseline() -> bool {
        true
    }

    #[inline]
    pub fn default_weight_bound() -> f64 {
        1.0
    }

    #[inline]
    pub fn default_oversample() -> usize {
        7
    }

    /// Bind the declaration to data, producing an evaluable model
    ///
    /// `flux` and `variance` are the target series; `regressors` stacks one
    /// systematics vector per row (comparison stars first, then covariates) with
    /// `weight_guess` giving the starting weight of each row.
    pub fn build(
        &self,
        time: Array1<f64>,
        flux: Array1<f64>,
        variance: Array1<f64>,
        regressors: Array2<f64>,
        weight_guess: ArrayView1<f64>,
    ) -> Result<TransitModel, FitError> {
        if time.is_empty() {
            return Err(FitError::EmptyTimeSeries);
        }
        for (context, len) in [
            ("model flux", flux.len()),
            ("model variance", variance.len()),
            ("model regressor columns", regressors.ncols()),
        ] {
            if len != time.len() {
                return Err(FitError::MismatchedLengths {
                    context,
                    expected: time.len(),
                    actual: len,
                });
            }
        }
        if weight_guess.len() != regressors.nrows() {
            return Err(FitError::MismatchedLengths {
                context: "weight guess",
                expected: regressors.nrows(),
                actual: weight_guess.len(),
            });
        }
        if !self.weight_bound.is_finite() || self.weight_bound <= 0.0 {
            return Err(FitError::InvalidPrior(format!(
                "weight bound must be positive and finite, got {}",
                self.weight_bound
            )));
        }

        fn spec(name: impl Into<String>, prior: Prior) -> ParamSpec {
            ParamSpec {
                name: name.into(),
                initial: prior.initial(),
                prior,
            }
        }

        let p = &self.priors;
        let mut params = vec![
            spec("r_star", p.r_star),
            spec("period", p.period),
            spec("t0", p.t0),
            spec("a_rs", p.a_rs),
            spec("b", p.b),
        ];
        let depth = params.len();
        let depth_name = match self.phase {
            Phase::Primary => "ror",
            Phase::Secondary => "fpfs",
        };
        params.push(spec(depth_name, p.depth));

        let q = match self.limb_darkening {
            LimbDarkening::Free => {
                let start = params.len();
                let unit = Prior::uniform(0.0, 1.0)?;
                params.push(spec("q[0]", unit));
                params.push(spec("q[1]", unit));
                Some(start)
            }
            LimbDarkening::Fixed(_) => None,
        };

        let weight_prior = Prior::uniform(-self.weight_bound, self.weight_bound)?;
        let weights = params.len()..params.len() + regressors.nrows();
        for (i, &w) in weight_guess.iter().enumerate() {
            params.push(ParamSpec {
                name: format!("weights[{}]", i),
                prior: weight_prior,
                initial: w.clamp(-self.weight_bound, self.weight_bound),
            });
        }

        // the GP absorbs smooth trends, so the explicit baseline is white-noise only
        let baseline = if self.baseline && self.noise == NoiseModel::White {
            let start = params.len();
            let unit = Prior::uniform(-1.0, 1.0)?;
            params.push(ParamSpec {
                name: "baseline[0]".into(),
                prior: unit,
                initial: 0.0,
            });
            params.push(ParamSpec {
                name: "baseline[1]".into(),
                prior: unit,
                initial: 0.0,
            });
            Some(start)
        } else {
            None
        };

        let jitter = params.len();
        params.push(spec("jitter", p.jitter));

        let gp = if self.noise == NoiseModel::Matern32Gp {
            let (sigma, rho) = match (p.gp_sigma, p.gp_rho) {
                (Some(sigma), Some(rho)) => (sigma, rho),
                _ => {
                    return Err(FitError::InvalidPrior(
                        "gp noise requires gp_sigma and gp_rho priors".into(),
                    ))
                }
            };
            let start = params.len();
            params.push(spec("gp_sigma", sigma));
            params.push(spec("gp_rho", rho));
            Some(start)
        } else {
            None
        };

        let mut oversample = self.oversample.max(1);
        if oversample % 2 == 0 {
            oversample += 1;
            debug!("bumping exposure oversampling to odd count {}", oversample);
        }

        let t_median = stats::median(time.view()).expect("time is non-empty");
        debug!(
            "built {:?}-phase model with {} free parameters over {} points",
            self.phase,
            params.len(),
            time.len()
        );

        Ok(TransitModel {
            phase: self.phase,
            limb_darkening: self.limb_darkening,
            noise: self.noise,
            texp: self.texp,
            oversample,
            params,
            layout: ParamLayout {
                depth,
                q,
                weights,
                baseline,
                jitter,
                gp,
            },
            time,
            flux,
            variance,
            regressors,
            t_median,
        })
    }
}

/// One fitted scalar of the model
#[derive(Clone, Debug)]
pub struct ParamSpec {
    pub name: String,
    pub prior: Prior,
    pub initial: f64,
}

/// Indices of the parameter vector
///
/// The five leading slots are always `r_star`, `period`, `t0`, `a_rs`, `b`.
#[derive(Clone, Debug)]
pub struct ParamLayout {
    pub depth: usize,
    pub q: Option<usize>,
    pub weights: std::ops::Range<usize>,
    pub baseline: Option<usize>,
    pub jitter: usize,
    pub gp: Option<usize>,
}

impl ParamLayout {
    pub const R_STAR: usize = 0;
    pub const PERIOD: usize = 1;
    pub const T0: usize = 2;
    pub const A_RS: usize = 3;
    pub const B: usize = 4;
}

/// A model bound to data, ready for log-probability evaluation
#[derive(Clone, Debug)]
pub struct TransitModel {
    phase: Phase,
    limb_darkening: LimbDarkening,
    noise: NoiseModel,
    texp: f64,
    oversample: usize,
    params: Vec<ParamSpec>,
    layout: ParamLayout,
    time: Array1<f64>,
    flux: Array1<f64>,
    variance: Array1<f64>,
    regressors: Array2<f64>,
    t_median: f64,
}

impl TransitModel {
    pub fn n_params(&self) -> usize {
        self.params.len()
    }

    pub fn n_samples(&self) -> usize {
        self.time.len()
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn layout(&self) -> &ParamLayout {
        &self.layout
    }

    pub fn time(&self) -> ArrayView1<f64> {
        self.time.view()
    }

    pub fn flux(&self) -> ArrayView1<f64> {
        self.flux.view()
    }

    pub fn regressors(&self) -> ArrayView2<f64> {
        self.regressors.view()
    }

    pub fn param_names(&self) -> Vec<&str> {
        self.params.iter().map(|p| p.name.as_str()).collect()
    }

    pub fn initial_values(&self) -> Array1<f64> {
        self.params.iter().map(|p| p.initial).collect()
    }

    /// Per-parameter characteristic scales for the internal space
    pub fn scales(&self) -> Array1<f64> {
        self.params.iter().map(|p| p.prior.scale()).collect()
    }

    pub fn bounds(&self) -> Vec<(f64, f64)> {
        self.params.iter().map(|p| p.prior.bounds()).collect()
    }

    /// Rejects parameter vectors outside the physically meaningful region
    fn is_physical(&self, theta: ArrayView1<f64>) -> bool {
        let l = &self.layout;
        theta[ParamLayout::R_STAR] > 0.0
            && theta[ParamLayout::PERIOD] > 0.0
            && theta[ParamLayout::A_RS] > 0.0
            && theta[ParamLayout::B].abs() <= theta[ParamLayout::A_RS]
            && theta[l.depth] >= 0.0
    }

    pub fn ln_prior(&self, theta: ArrayView1<f64>) -> f64 {
        self.params
            .iter()
            .zip(theta.iter())
            .map(|(p, &x)| p.prior.ln_prior(x))
            .sum()
    }

    fn limb_coefficients(&self, theta: ArrayView1<f64>) -> [f64; 2] {
        match self.limb_darkening {
            LimbDarkening::Fixed(u) => u,
            LimbDarkening::Free => {
                let start = self.layout.q.expect("free limb darkening has q slots");
                lightcurve::q_to_u(theta[start], theta[start + 1])
            }
        }
    }

    /// Normalized transit/eclipse light curve at `theta`
    pub fn light_curve(&self, theta: ArrayView1<f64>) -> Array1<f64> {
        let period = theta[ParamLayout::PERIOD];
        let t0 = theta[ParamLayout::T0];
        let depth = theta[self.layout.depth];
        match self.phase {
            Phase::Primary => {
                let orbit = Orbit {
                    period,
                    t_center: t0,
                    a_rs: theta[ParamLayout::A_RS],
                    b: theta[ParamLayout::B],
                };
                lightcurve::light_curve(
                    self.time.view(),
                    &orbit,
                    depth,
                    self.limb_coefficients(theta),
                    self.texp,
                    self.oversample,
                )
            }
            Phase::Secondary => {
                let orbit = Orbit {
                    period,
                    t_center: t0 + 0.5 * period,
                    a_rs: theta[ParamLayout::A_RS],
                    b: theta[ParamLayout::B],
                };
                // planet occulted by the star: uniform-disk dip rescaled so the
                // full-eclipse depth equals the planet-to-star flux ratio
                let ror = depth.sqrt();
                let uniform = lightcurve::light_curve(
                    self.time.view(),
                    &orbit,
                    ror,
                    [0.0, 0.0],
                    self.texp,
                    self.oversample,
                );
                if ror == 0.0 {
                    return Array1::ones(self.time.len());
                }
                uniform.mapv(|f| 1.0 - depth * (1.0 - f) / (ror * ror))
            }
        }
    }

    /// Weighted sum of the regressor rows
    pub fn systematics(&self, theta: ArrayView1<f64>) -> Array1<f64> {
        let weights = theta.slice(ndarray::s![self.layout.weights.clone()]);
        weights.dot(&self.regressors)
    }

    /// Full mean model: systematics times light curve, plus the optional baseline
    pub fn mean_model(&self, theta: ArrayView1<f64>) -> Array1<f64> {
        let mut mean = self.systematics(theta) * self.light_curve(theta);
        if let Some(start) = self.layout.baseline {
            let offset = theta[start];
            let slope = theta[start + 1];
            mean.zip_mut_with(&self.time, |m, &t| *m += offset + slope * (t - self.t_median));
        }
        mean
    }

    pub fn residuals(&self, theta: ArrayView1<f64>) -> Array1<f64> {
        &self.flux - &self.mean_model(theta)
    }

    pub fn ln_likelihood(&self, theta: ArrayView1<f64>) -> f64 {
        let residuals = self.residuals(theta);
        let jitter2 = theta[self.layout.jitter].powi(2);
        let variance = self.variance.mapv(|v| v + jitter2);
        match self.noise {
            NoiseModel::White => {
                noise::white_ln_likelihood(residuals.view(), variance.view())
            }
            NoiseModel::Matern32Gp => {
                let start = self.layout.gp.expect("gp noise has hyperparameter slots");
                noise::matern32_ln_likelihood(
                    self.time.view(),
                    residuals.view(),
                    variance.view(),
                    theta[start],
                    theta[start + 1],
                )
                .unwrap_or(f64::NEG_INFINITY)
            }
        }
    }

    /// Unnormalized log-posterior, never NaN
    pub fn ln_prob(&self, theta: ArrayView1<f64>) -> f64 {
        if !self.is_physical(theta) {
            return f64::NEG_INFINITY;
        }
        let lp = self.ln_prior(theta);
        if lp == f64::NEG_INFINITY {
            return lp;
        }
        let total = lp + self.ln_likelihood(theta);
        if total.is_nan() {
            f64::NEG_INFINITY
        } else {
            total
        }
    }

    /// Values derived from the free parameters, reported alongside them
    pub fn deterministics(&self, theta: ArrayView1<f64>) -> Vec<(String, f64)> {
        let mut out = Vec::new();
        if self.phase == Phase::Secondary {
            let period = theta[ParamLayout::PERIOD];
            out.push(("t_second".into(), theta[ParamLayout::T0] + 0.5 * period));
            out.push(("ror".into(), theta[self.layout.depth].max(0.0).sqrt()));
        }
        if let Some(start) = self.layout.q {
            let [u1, u2] = lightcurve::q_to_u(theta[start], theta[start + 1]);
            out.push(("u[0]".into(), u1));
            out.push(("u[1]".into(), u2));
        }
        out
    }

    /// Free parameters plus deterministics as a name-to-value mapping
    pub fn named_values(&self, theta: ArrayView1<f64>) -> BTreeMap<String, f64> {
        let mut values: BTreeMap<String, f64> = self
            .params
            .iter()
            .zip(theta.iter())
            .map(|(p, &x)| (p.name.clone(), x))
            .collect();
        values.extend(self.deterministics(theta));
        values
    }
}

/// Maximum a posteriori solution
#[derive(Clone, Debug)]
pub struct MapSolution {
    pub theta: Array1<f64>,
    pub ln_prob: f64,
    /// Free parameters and deterministics by name, all finite
    pub values: BTreeMap<String, f64>,
}

#[enum_dispatch]
pub trait MapStrategyTrait {
    /// Optimize the log-posterior from the model's initial values
    fn optimize(&self, model: &TransitModel) -> Result<MapSolution, FitError>;
}

/// MAP optimization strategy
#[enum_dispatch(MapStrategyTrait)]
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq)]
pub enum MapOptimizer {
    Cobyla(CobylaOptimizer),
}

impl Default for MapOptimizer {
    fn default() -> Self {
        Self::Cobyla(CobylaOptimizer::default())
    }
}

/// Derivative-free bound-constrained optimization of the joint log-posterior
///
/// Works in the internal space centered on the initial values and scaled by the
/// prior widths, so a single `rhobeg` step size suits every parameter.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename = "Cobyla")]
pub struct CobylaOptimizer {
    #[serde(default = "CobylaOptimizer::default_max_eval")]
    pub max_eval: usize,
    #[serde(default = "CobylaOptimizer::default_rhobeg")]
    pub rhobeg: f64,
    #[serde(default = "CobylaOptimizer::default_ftol_rel")]
    pub ftol_rel: f64,
}

impl CobylaOptimizer {
    #[inline]
    pub fn default_max_eval() -> usize {
        2000
    }

    #[inline]
    pub fn default_rhobeg() -> f64 {
        0.5
    }

    #[inline]
    pub fn default_ftol_rel() -> f64 {
        1e-8
    }
}

impl Default for CobylaOptimizer {
    fn default() -> Self {
        Self {
            max_eval: Self::default_max_eval(),
            rhobeg: Self::default_rhobeg(),
            ftol_rel: Self::default_ftol_rel(),
        }
    }
}

impl MapStrategyTrait for CobylaOptimizer {
    fn optimize(&self, model: &TransitModel) -> Result<MapSolution, FitError> {
        use cobyla::{minimize, Func, RhoBeg, StopTols};

        let center = model.initial_values();
        let scales = model.scales();
        let ndim = model.n_params();
        info!("starting map optimization over {} parameters", ndim);

        let to_external = |x: &[f64]| -> Array1<f64> {
            x.iter()
                .zip(center.iter())
                .zip(scales.iter())
                .map(|((&xi, &c), &s)| c + s * xi)
                .collect()
        };

        let objective = {
            let to_external = &to_external;
            move |x: &[f64], _user_data: &mut ()| -> f64 {
                let lp = model.ln_prob(to_external(x).view());
                if lp.is_finite() {
                    -lp
                } else {
                    // large finite penalty keeps the simplex arithmetic sane
                    1e300
                }
            }
        };

        let internal_bounds: Vec<(f64, f64)> = model
            .bounds()
            .iter()
            .zip(center.iter())
            .zip(scales.iter())
            .map(|((&(lo, hi), &c), &s)| ((lo - c) / s, (hi - c) / s))
            .collect();

        let x0 = vec![0.0; ndim];
        let constraints: Vec<&dyn Func<()>> = vec![];
        let stop_tol = StopTols {
            ftol_rel: self.ftol_rel,
            ..StopTols::default()
        };

        let result = minimize(
            objective,
            &x0,
            &internal_bounds,
            &constraints,
            (),
            self.max_eval,
            RhoBeg::All(self.rhobeg),
            Some(stop_tol),
        );

        let x = match result {
            Ok((status, x, _neg_lp)) => {
                if !matches!(
                    status,
                    cobyla::SuccessStatus::Success
                        | cobyla::SuccessStatus::FtolReached
                        | cobyla::SuccessStatus::XtolReached
                ) {
                    warn!("cobyla stopped early with status {:?}", status);
                }
                x
            }
            Err((status, _, _)) => {
                return Err(FitError::Optimizer(format!(
                    "cobyla failed with status {:?}",
                    status
                )));
            }
        };

        let theta = to_external(&x);
        let ln_prob = model.ln_prob(theta.view());
        if !ln_prob.is_finite() {
            return Err(FitError::NonFiniteLogProb);
        }
        let values = model.named_values(theta.view());
        if let Some((name, _)) = values.iter().find(|(_, v)| !v.is_finite()) {
            return Err(FitError::Optimizer(format!(
                "map value for {} is not finite",
                name
            )));
        }
        info!("map optimization finished with ln_prob = {:.3}", ln_prob);
        Ok(MapSolution {
            theta,
            ln_prob,
            values,
        })
    }
}
