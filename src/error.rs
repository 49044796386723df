/// Error returned from the light-curve fitting pipeline
///
/// Configuration errors (bad prior specification, covariate not available in the
/// current background mode, empty aperture grid, shape mismatches) are raised before
/// any expensive numerics run. Runtime errors (optimizer/sampler failures, degenerate
/// likelihoods) propagate as-is; there is no retry logic.
#[derive(Debug, thiserror::Error)]
pub enum FitError {
    #[error("covariate {name} is not available in background mode {mode}")]
    CovariateUnavailable { name: String, mode: String },

    #[error("aperture grid is empty, nothing to optimize")]
    EmptyApertureGrid,

    #[error("invalid prior specification: {0}")]
    InvalidPrior(String),

    #[error("{context}: expected length {expected}, got {actual}")]
    MismatchedLengths {
        context: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("time series is empty")]
    EmptyTimeSeries,

    #[error("time array must be strictly increasing")]
    UnsortedTime,

    #[error("median filter width must be odd, got {0}")]
    EvenFilterWidth(usize),

    #[error("background data does not fit background mode {mode}: {detail}")]
    BackgroundShape { mode: String, detail: String },

    #[error("MAP optimization failed: {0}")]
    Optimizer(String),

    #[error("posterior sampling failed: {0}")]
    Sampler(String),

    #[error("log-probability is not finite at the initial point")]
    NonFiniteLogProb,

    #[error("variable {0} is not present in the trace")]
    UnknownVariable(String),

    #[error("trace contains no draws")]
    EmptyTrace,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),
}

impl FitError {
    /// Whether the error is a configuration error, as opposed to a runtime or
    /// numerical failure
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::CovariateUnavailable { .. }
                | Self::EmptyApertureGrid
                | Self::InvalidPrior(_)
                | Self::MismatchedLengths { .. }
                | Self::EmptyTimeSeries
                | Self::UnsortedTime
                | Self::EvenFilterWidth(_)
                | Self::BackgroundShape { .. }
        )
    }
}
