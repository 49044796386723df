#![doc = include_str!("../README.md")]

mod aperture;
pub use aperture::optimize_aperture;

mod covariates;
pub use covariates::{build_covariates, BackgroundMode, CovariateName, CovariateSet};

mod data;
pub use data::{BackgroundData, PhotometryData, PhotometryLoader};

mod error;
pub use error::FitError;

pub mod model;
pub use model::{
    CobylaOptimizer, LimbDarkening, MapOptimizer, MapSolution, MapStrategyTrait, NoiseModel,
    Phase, Prior, TransitModel, TransitModelBuilder, TransitPriors,
};

mod pipeline;
pub use pipeline::{fit_light_curve, FitConfig, FitOutcome, OutputPaths};

mod reject;
pub use reject::{clean_up, clip_residuals, quick_detrend, CleanedData, RejectionParams};

mod sampler;
pub use sampler::{EnsembleSampler, SampleStrategyTrait, Sampler, Trace};

mod sink;
pub use sink::{DiagnosticsSink, NullSink};

pub mod stats;

mod summary;
pub use summary::{
    latex_interval, reported_variables, summarize, write_detrended_table, write_latex_table,
    write_summary_csv, SummaryRow,
};
