//! End-to-end fitting pipeline: clean, detrend, optimize, sample, report

use crate::covariates::{build_covariates, BackgroundMode, CovariateName};
use crate::data::{select, select_columns, PhotometryLoader};
use crate::error::FitError;
use crate::model::{
    LimbDarkening, MapOptimizer, MapSolution, MapStrategyTrait, NoiseModel, TransitModel,
    TransitModelBuilder,
};
use crate::reject::{clean_up, clip_residuals, quick_detrend, RejectionParams};
use crate::sampler::{SampleStrategyTrait, Sampler, Trace};
use crate::sink::DiagnosticsSink;
use crate::summary::{
    reported_variables, summarize, write_detrended_table, write_latex_table, write_summary_csv,
    SummaryRow,
};

use log::{info, warn};
use ndarray::{Array1, Array2};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Starting weight of each comparison-star regressor
const COMPARISON_WEIGHT_GUESS: f64 = 0.5;

/// Destination files of the pipeline artifacts
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct OutputPaths {
    pub trace: PathBuf,
    pub summary_csv: PathBuf,
    pub latex_table: PathBuf,
    /// Detrended light curve table, skipped when absent
    #[serde(default)]
    pub detrended: Option<PathBuf>,
}

/// Everything the fitting pipeline needs beyond the photometry itself
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct FitConfig {
    pub mode: BackgroundMode,
    /// Covariates joined to the comparison stars as systematics regressors
    #[serde(default)]
    pub covariates: Vec<CovariateName>,
    #[serde(default)]
    pub rejection: RejectionParams,
    pub model: TransitModelBuilder,
    #[serde(default)]
    pub optimizer: MapOptimizer,
    #[serde(default)]
    pub sampler: Sampler,
    pub outputs: OutputPaths,
}

/// Result of a full pipeline run
#[derive(Clone, Debug)]
pub struct FitOutcome {
    pub map: MapSolution,
    pub trace: Trace,
    pub summary: Vec<SummaryRow>,
    /// Highest-probability posterior sample, by variable name
    pub best: BTreeMap<String, f64>,
    /// Retained frame times after both rejection passes
    pub time: Array1<f64>,
    /// Target flux divided by the MAP systematics, with propagated errors
    pub detrended: Array1<f64>,
    pub detrended_err: Array1<f64>,
    pub n_rejected_initial: usize,
    pub n_rejected_refined: usize,
}

/// Fit the transit/eclipse model to the photometry of one aperture
///
/// Runs the whole chain: pre-fit outlier rejection, covariate construction, MAP
/// optimization, one residual-driven refinement pass, posterior sampling, and the
/// report artifacts named in `config.outputs`.
pub fn fit_light_curve<L, S>(
    loader: &L,
    aperture: u32,
    config: &FitConfig,
    sink: &mut S,
) -> Result<FitOutcome, FitError>
where
    L: PhotometryLoader,
    S: DiagnosticsSink,
{
    let phot = loader.load(aperture)?;
    phot.validate()?;
    info!(
        "fitting aperture {} with {} frames and {} comparison stars",
        aperture,
        phot.n_samples(),
        phot.n_comparisons()
    );

    // pre-fit rejection against the comparison-star systematics
    let comparison_guess =
        Array1::from_elem(phot.n_comparisons(), COMPARISON_WEIGHT_GUESS);
    let cleaned = clean_up(
        phot.time.view(),
        phot.flux.view(),
        phot.flux_err.view(),
        phot.comparisons(),
        comparison_guess.view(),
        &config.rejection,
    )?;
    let n_rejected_initial = cleaned.n_rejected();
    sink.rejection("initial", &cleaned.mask);
    sink.quick_detrend(
        cleaned.time.view(),
        quick_detrend(
            cleaned.flux.row(0),
            comparison_guess.view(),
            cleaned.regressors.view(),
        )
        .view(),
    );

    let covariate_set = build_covariates(&phot, config.mode, &cleaned.mask)?;
    let covariate_rows = covariate_set.crossmatch(&config.covariates, config.mode)?;
    sink.covariates(cleaned.time.view(), &config.covariates, &covariate_rows);

    // systematics regressors: comparison stars first, then covariates
    let n_retained = cleaned.time.len();
    let n_rows = phot.n_comparisons() + covariate_rows.len();
    let mut regressors = Array2::zeros((n_rows, n_retained));
    regressors
        .slice_mut(ndarray::s![..phot.n_comparisons(), ..])
        .assign(&cleaned.regressors);
    for (i, row) in covariate_rows.iter().enumerate() {
        regressors
            .row_mut(phot.n_comparisons() + i)
            .assign(row);
    }
    let mut weight_guess = Array1::zeros(n_rows);
    weight_guess
        .slice_mut(ndarray::s![..phot.n_comparisons()])
        .fill(COMPARISON_WEIGHT_GUESS);

    let mut time = cleaned.time.clone();
    let mut flux = cleaned.flux.row(0).to_owned();
    let mut variance = cleaned.flux_err.row(0).mapv(|e| e * e);

    let build = |time: &Array1<f64>,
                 flux: &Array1<f64>,
                 variance: &Array1<f64>,
                 regressors: &Array2<f64>|
     -> Result<TransitModel, FitError> {
        config.model.build(
            time.clone(),
            flux.clone(),
            variance.clone(),
            regressors.clone(),
            weight_guess.view(),
        )
    };

    let mut model = build(&time, &flux, &variance, &regressors)?;
    let mut map = config.optimizer.optimize(&model)?;

    // one refinement pass: clip MAP residuals and redo the optimization
    let residual_mask = clip_residuals(
        model.residuals(map.theta.view()).view(),
        config.rejection.sigma_cut,
    );
    let n_rejected_refined = residual_mask.iter().filter(|&&keep| !keep).count();
    if n_rejected_refined > 0 {
        warn!(
            "refinement pass dropped {} frames flagged against the map model",
            n_rejected_refined
        );
        sink.rejection("map_residuals", &residual_mask);
        time = select(time.view(), &residual_mask);
        flux = select(flux.view(), &residual_mask);
        variance = select(variance.view(), &residual_mask);
        regressors = select_columns(regressors.view(), &residual_mask);
        model = build(&time, &flux, &variance, &regressors)?;
        map = config.optimizer.optimize(&model)?;
    }
    sink.map_overlay(
        time.view(),
        flux.view(),
        model.mean_model(map.theta.view()),
    );

    let raw_err = variance.mapv(f64::sqrt);
    sink.residuals(
        time.view(),
        model.residuals(map.theta.view()),
        raw_err.view(),
    );

    let systematics = model.systematics(map.theta.view());
    let detrended = &flux / &systematics;
    let detrended_err: Array1<f64> = raw_err
        .iter()
        .zip(systematics.iter())
        .map(|(&e, &s)| e / s)
        .collect();
    sink.white_light(
        time.view(),
        detrended.view(),
        detrended_err.view(),
        model.light_curve(map.theta.view()),
    );

    let trace = config.sampler.sample(&model, &map)?;
    trace.save(&config.outputs.trace)?;

    let names = reported_variables(
        config.model.phase,
        config.model.limb_darkening == LimbDarkening::Free,
        config.model.baseline && config.model.noise == NoiseModel::White,
        config.model.noise,
        &trace,
    );
    sink.posterior(&trace, &names);
    let summary = summarize(&trace, &names)?;
    write_summary_csv(&config.outputs.summary_csv, &summary)?;
    write_latex_table(&config.outputs.latex_table, &summary)?;
    sink.summary(&summary);

    if let Some(path) = &config.outputs.detrended {
        write_detrended_table(path, time.view(), detrended.view(), detrended_err.view())?;
    }

    let best = trace.best_sample();
    info!(
        "pipeline finished: {} retained frames, best ln_prob {:.3}",
        time.len(),
        trace
            .log_prob
            .iter()
            .fold(f64::NEG_INFINITY, |a, &b| a.max(b))
    );
    Ok(FitOutcome {
        map,
        trace,
        summary,
        best,
        time,
        detrended,
        detrended_err,
        n_rejected_initial,
        n_rejected_refined,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{BackgroundData, PhotometryData};
    use crate::model::{Phase, Prior, TransitPriors};
    use crate::sampler::EnsembleSampler;
    use crate::sink::NullSink;
    use ndarray::Array2;

    /// Loader serving a transit injected into two flat comparison stars
    struct TransitLoader;

    impl PhotometryLoader for TransitLoader {
        fn load(&self, _aperture: u32) -> Result<PhotometryData, FitError> {
            let n = 96;
            let time = Array1::linspace(1.1, 1.4, n);

            let builder = test_builder();
            let gen = builder
                .build(
                    time.clone(),
                    Array1::ones(n),
                    Array1::from_elem(n, 1e-8),
                    Array2::ones((2, n)),
                    ndarray::array![0.5, 0.5].view(),
                )
                .unwrap();
            let mut theta = gen.initial_values();
            theta[gen.layout().depth] = 0.1;
            theta[gen.layout().jitter] = 1e-4;
            let target = gen.mean_model(theta.view());

            let mut flux = Array2::ones((3, n));
            flux.row_mut(0).assign(&target);
            Ok(PhotometryData {
                time,
                flux_err: Array2::from_elem((3, n), 1e-4),
                flux,
                background: BackgroundData::Level(Array1::from_elem(n, 80.0)),
                centroid_x: Array1::from_elem(n, 250.0),
                centroid_y: Array1::from_elem(n, 1800.0),
                airmass: Array1::linspace(1.0, 1.2, n),
                psf_width: Array1::from_elem(n, 4.0),
            })
        }
    }

    fn test_builder() -> TransitModelBuilder {
        let priors = TransitPriors {
            r_star: Prior::normal(1.0, 0.05).unwrap(),
            period: Prior::normal(2.5, 1e-4).unwrap(),
            t0: Prior::normal(1.25, 0.01).unwrap(),
            a_rs: Prior::normal(8.0, 0.5).unwrap(),
            b: Prior::uniform(0.0, 1.0).unwrap(),
            depth: Prior::uniform(0.0, 0.3).unwrap(),
            jitter: Prior::uniform(0.0, 1e-2).unwrap(),
            gp_sigma: None,
            gp_rho: None,
        };
        TransitModelBuilder {
            limb_darkening: LimbDarkening::Fixed([0.3, 0.2]),
            baseline: false,
            ..TransitModelBuilder::new(Phase::Primary, priors)
        }
    }

    fn test_config(tag: &str) -> FitConfig {
        let dir = std::env::temp_dir();
        FitConfig {
            mode: BackgroundMode::Standard,
            covariates: vec![CovariateName::Airmass],
            // noiseless synthetic data: rejection is exercised but clips nothing
            rejection: RejectionParams {
                sigma_cut: f64::INFINITY,
                ..Default::default()
            },
            model: test_builder(),
            optimizer: MapOptimizer::Cobyla(crate::model::CobylaOptimizer {
                max_eval: 20_000,
                ..Default::default()
            }),
            sampler: Sampler::Ensemble(EnsembleSampler {
                tune: 25,
                draws: 15,
                walkers: 22,
                target_accept: None,
            }),
            outputs: OutputPaths {
                trace: dir.join(format!("transit_fit_{}_trace.json", tag)),
                summary_csv: dir.join(format!("transit_fit_{}_summary.csv", tag)),
                latex_table: dir.join(format!("transit_fit_{}_table.tex", tag)),
                detrended: Some(dir.join(format!("transit_fit_{}_detrended.csv", tag))),
            },
        }
    }

    #[test]
    fn full_pipeline_recovers_the_depth_and_writes_artifacts() {
        let config = test_config("full");
        let outcome = fit_light_curve(&TransitLoader, 7, &config, &mut NullSink).unwrap();

        assert!((outcome.map.values["ror"] - 0.1).abs() < 1e-2);
        assert!(outcome.best.values().all(|v| v.is_finite()));
        assert_eq!(outcome.time.len(), outcome.detrended.len());
        assert_eq!(outcome.time.len(), outcome.detrended_err.len());
        // out of transit the detrended flux sits at unity
        assert!((outcome.detrended[0] - 1.0).abs() < 1e-2);
        let ror_row = outcome
            .summary
            .iter()
            .find(|row| row.name == "ror")
            .unwrap();
        assert!(ror_row.p16 <= ror_row.p50 && ror_row.p50 <= ror_row.p84);

        // artifacts landed on disk and the trace round-trips
        let back = Trace::load(&config.outputs.trace).unwrap();
        assert_eq!(back.names, outcome.trace.names);
        assert_eq!(back.n_chains(), outcome.trace.n_chains());
        assert!(config.outputs.summary_csv.exists());
        assert!(config.outputs.latex_table.exists());
        assert!(config.outputs.detrended.as_ref().unwrap().exists());

        std::fs::remove_file(&config.outputs.trace).ok();
        std::fs::remove_file(&config.outputs.summary_csv).ok();
        std::fs::remove_file(&config.outputs.latex_table).ok();
        std::fs::remove_file(config.outputs.detrended.as_ref().unwrap()).ok();
    }

    #[test]
    fn requesting_a_helium_covariate_in_standard_mode_fails() {
        let mut config = test_config("badcov");
        config.covariates = vec![CovariateName::WaterProxy];
        let err = fit_light_curve(&TransitLoader, 7, &config, &mut NullSink).unwrap_err();
        assert!(matches!(err, FitError::CovariateUnavailable { .. }));
        assert!(err.is_configuration());
    }

    /// Sink counting which views were emitted
    #[derive(Default)]
    struct CountingSink {
        rejections: Vec<String>,
        got_overlay: bool,
        got_residuals: bool,
        white_light_len: usize,
        posterior_names: Vec<String>,
        got_summary: bool,
    }

    impl DiagnosticsSink for CountingSink {
        fn rejection(&mut self, stage: &str, _mask: &Array1<bool>) {
            self.rejections.push(stage.to_string());
        }

        fn map_overlay(
            &mut self,
            _time: ndarray::ArrayView1<f64>,
            _flux: ndarray::ArrayView1<f64>,
            _model: Array1<f64>,
        ) {
            self.got_overlay = true;
        }

        fn residuals(
            &mut self,
            _time: ndarray::ArrayView1<f64>,
            _residuals: Array1<f64>,
            _err: ndarray::ArrayView1<f64>,
        ) {
            self.got_residuals = true;
        }

        fn white_light(
            &mut self,
            time: ndarray::ArrayView1<f64>,
            detrended: ndarray::ArrayView1<f64>,
            err: ndarray::ArrayView1<f64>,
            model: Array1<f64>,
        ) {
            assert_eq!(time.len(), detrended.len());
            assert_eq!(time.len(), err.len());
            assert_eq!(time.len(), model.len());
            self.white_light_len = time.len();
        }

        fn posterior(&mut self, _trace: &Trace, names: &[String]) {
            self.posterior_names = names.to_vec();
        }

        fn summary(&mut self, _rows: &[SummaryRow]) {
            self.got_summary = true;
        }
    }

    #[test]
    fn sink_receives_the_diagnostic_views() {
        let config = test_config("sink");
        let mut sink = CountingSink::default();
        fit_light_curve(&TransitLoader, 7, &config, &mut sink).unwrap();
        assert!(sink.rejections.contains(&"initial".to_string()));
        assert!(sink.got_overlay);
        assert!(sink.got_residuals);
        assert_eq!(sink.white_light_len, 96);
        assert!(sink.posterior_names.contains(&"ror".to_string()));
        assert!(sink.got_summary);

        std::fs::remove_file(&config.outputs.trace).ok();
        std::fs::remove_file(&config.outputs.summary_csv).ok();
        std::fs::remove_file(&config.outputs.latex_table).ok();
        std::fs::remove_file(config.outputs.detrended.as_ref().unwrap()).ok();
    }
}
