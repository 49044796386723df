//! Posterior sampling and the resulting trace
//!
//! Sampling happens in an internal space centered on the MAP point and scaled by
//! the prior widths: the ensemble sampler stores positions in single precision, and
//! quantities like mid-transit epochs carry more digits than an `f32` holds. Every
//! retained sample is mapped back to physical values and its log-probability is
//! recomputed in `f64`.

use crate::error::FitError;
use crate::model::{MapSolution, TransitModel};

use emcee::{Guess, Prob};
use enum_dispatch::enum_dispatch;
use log::{info, warn};
use ndarray::{Array1, Array2, Array3, ArrayView1};
use rand::Rng;
use rand_distr::StandardNormal;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

/// Posterior samples with chain structure preserved
///
/// `samples` is indexed (chain, draw, variable); deterministic variables are stored
/// as extra trailing columns so the trace is self-contained.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Trace {
    pub names: Vec<String>,
    pub samples: Array3<f64>,
    pub log_prob: Array2<f64>,
}

impl Trace {
    pub fn n_chains(&self) -> usize {
        self.samples.shape()[0]
    }

    pub fn n_draws(&self) -> usize {
        self.samples.shape()[1]
    }

    fn var_index(&self, name: &str) -> Result<usize, FitError> {
        self.names
            .iter()
            .position(|n| n == name)
            .ok_or_else(|| FitError::UnknownVariable(name.to_string()))
    }

    /// All samples of one variable, flattened over chains and draws
    pub fn flat(&self, name: &str) -> Result<Array1<f64>, FitError> {
        let idx = self.var_index(name)?;
        Ok(self
            .samples
            .slice(ndarray::s![.., .., idx])
            .iter()
            .copied()
            .collect())
    }

    /// The single posterior sample with the highest log-probability
    pub fn best_sample(&self) -> BTreeMap<String, f64> {
        let (mut best, mut best_lp) = ((0, 0), f64::NEG_INFINITY);
        for ((c, d), &lp) in self.log_prob.indexed_iter() {
            if lp > best_lp {
                best = (c, d);
                best_lp = lp;
            }
        }
        self.names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), self.samples[(best.0, best.1, i)]))
            .collect()
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), FitError> {
        let file = File::create(path)?;
        serde_json::to_writer(BufWriter::new(file), self)?;
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, FitError> {
        let file = File::open(path)?;
        Ok(serde_json::from_reader(BufReader::new(file))?)
    }
}

#[enum_dispatch]
pub trait SampleStrategyTrait {
    /// Draw posterior samples starting from the MAP solution
    fn sample(&self, model: &TransitModel, map: &MapSolution) -> Result<Trace, FitError>;
}

/// Posterior sampling strategy
#[enum_dispatch(SampleStrategyTrait)]
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq)]
pub enum Sampler {
    Ensemble(EnsembleSampler),
}

impl Default for Sampler {
    fn default() -> Self {
        Self::Ensemble(EnsembleSampler::default())
    }
}

/// Affine-invariant ensemble MCMC
///
/// `tune` iterations are discarded as burn-in, then `draws` iterations per walker
/// are retained; each walker is reported as a chain.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename = "Ensemble")]
pub struct EnsembleSampler {
    #[serde(default = "EnsembleSampler::default_tune")]
    pub tune: usize,
    #[serde(default = "EnsembleSampler::default_draws")]
    pub draws: usize,
    #[serde(default = "EnsembleSampler::default_walkers")]
    pub walkers: usize,
    /// Accepted for compatibility with step-size-tuned samplers. The stretch move
    /// has no acceptance target, so the value is validated and otherwise ignored.
    #[serde(default)]
    pub target_accept: Option<f64>,
}

impl EnsembleSampler {
    #[inline]
    pub fn default_tune() -> usize {
        1000
    }

    #[inline]
    pub fn default_draws() -> usize {
        1000
    }

    #[inline]
    pub fn default_walkers() -> usize {
        64
    }
}

impl Default for EnsembleSampler {
    fn default() -> Self {
        Self {
            tune: Self::default_tune(),
            draws: Self::default_draws(),
            walkers: Self::default_walkers(),
            target_accept: None,
        }
    }
}

/// Posterior in the internal walker space
struct InternalPosterior<'a> {
    model: &'a TransitModel,
    center: ArrayView1<'a, f64>,
    scales: Array1<f64>,
}

impl InternalPosterior<'_> {
    fn to_external(&self, x: &[f32]) -> Array1<f64> {
        x.iter()
            .zip(self.center.iter())
            .zip(self.scales.iter())
            .map(|((&xi, &c), &s)| c + s * xi as f64)
            .collect()
    }
}

impl Prob for InternalPosterior<'_> {
    fn lnlike(&self, params: &Guess) -> f32 {
        let lp = self.model.ln_prob(self.to_external(&params.values).view());
        if lp.is_finite() {
            lp as f32
        } else {
            f32::NEG_INFINITY
        }
    }

    fn lnprior(&self, _params: &Guess) -> f32 {
        0.0
    }
}

impl SampleStrategyTrait for EnsembleSampler {
    fn sample(&self, model: &TransitModel, map: &MapSolution) -> Result<Trace, FitError> {
        if let Some(target) = self.target_accept {
            if !(target > 0.0 && target < 1.0) {
                return Err(FitError::Sampler(format!(
                    "target_accept {} is outside (0, 1)",
                    target
                )));
            }
            warn!("target_accept {} has no effect on the stretch move", target);
        }

        let ndim = model.n_params();
        // the stretch move needs a comfortably over-complete, even ensemble
        let walkers = (self.walkers.max(2 * ndim + 2) + 1) & !1;

        let posterior = InternalPosterior {
            model,
            center: map.theta.view(),
            scales: model.scales(),
        };

        // tight Gaussian ball around the MAP point, every walker at finite density
        let mut rng = rand::rng();
        let mut initial = Vec::with_capacity(walkers);
        for _ in 0..walkers {
            let mut found = false;
            for _ in 0..100 {
                let x: Vec<f32> = (0..ndim)
                    .map(|_| {
                        let eps: f64 = rng.sample(StandardNormal);
                        (1e-3 * eps) as f32
                    })
                    .collect();
                let guess = Guess::new(&x);
                if posterior.lnlike(&guess).is_finite() {
                    initial.push(guess);
                    found = true;
                    break;
                }
            }
            if !found {
                return Err(FitError::Sampler(
                    "failed to seed walkers at finite posterior density".into(),
                ));
            }
        }

        info!(
            "sampling with {} walkers, {} tune + {} draws",
            walkers, self.tune, self.draws
        );
        let mut sampler = emcee::EnsembleSampler::new(walkers, ndim, &posterior)
            .map_err(|e| FitError::Sampler(format!("{:?}", e)))?;
        sampler
            .run_mcmc(&initial, self.tune + self.draws)
            .map_err(|e| FitError::Sampler(format!("{:?}", e)))?;

        let flat = sampler.flatchain();
        if flat.len() != (self.tune + self.draws) * walkers {
            return Err(FitError::Sampler(format!(
                "unexpected chain length {}",
                flat.len()
            )));
        }

        let det_names: Vec<String> = model
            .deterministics(map.theta.view())
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        let names: Vec<String> = model
            .param_names()
            .into_iter()
            .map(str::to_owned)
            .chain(det_names)
            .collect();

        let mut samples = Array3::zeros((walkers, self.draws, names.len()));
        let mut log_prob = Array2::zeros((walkers, self.draws));
        // the flat chain is iteration-major
        for it in 0..self.draws {
            for w in 0..walkers {
                let guess = &flat[(self.tune + it) * walkers + w];
                let theta = posterior.to_external(&guess.values);
                log_prob[(w, it)] = model.ln_prob(theta.view());
                for (v, &x) in theta.iter().enumerate() {
                    samples[(w, it, v)] = x;
                }
                for (d, (_, x)) in model.deterministics(theta.view()).into_iter().enumerate() {
                    samples[(w, it, ndim + d)] = x;
                }
            }
        }
        info!("retained {} samples of {} variables", walkers * self.draws, names.len());

        Ok(Trace {
            names,
            samples,
            log_prob,
        })
    }
}
