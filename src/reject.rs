//! Sigma-clipping outlier rejection against a median-filtered detrended baseline

use crate::data::{and_mask, select, select_columns};
use crate::error::FitError;
use crate::stats;

use log::{debug, info};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Gaussian-equivalent scale factor for the median absolute deviation
const MAD_TO_SIGMA: f64 = 1.482602218505602;

/// Knobs of the pre-fit outlier rejection pass
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct RejectionParams {
    /// Reject frames with raw target flux below this fraction of the maximum
    pub cutoff_frac: f64,
    /// Drop this many trailing frames (instrument settling); 0 keeps everything
    pub end_num: usize,
    /// Odd width of the running median filter
    pub filter_width: usize,
    /// Sigma threshold of the robust clip
    pub sigma_cut: f64,
}

impl Default for RejectionParams {
    fn default() -> Self {
        Self {
            cutoff_frac: 0.0,
            end_num: 0,
            filter_width: 11,
            sigma_cut: 5.0,
        }
    }
}

/// Outlier-rejection output: masked copies of every input row plus the mask itself
#[derive(Clone, Debug)]
pub struct CleanedData {
    pub time: Array1<f64>,
    pub flux: Array2<f64>,
    pub flux_err: Array2<f64>,
    pub regressors: Array2<f64>,
    /// Full-length retention mask; true = kept
    pub mask: Array1<bool>,
}

impl CleanedData {
    pub fn n_retained(&self) -> usize {
        self.mask.iter().filter(|&&keep| keep).count()
    }

    pub fn n_rejected(&self) -> usize {
        self.mask.len() - self.n_retained()
    }
}

/// Quick systematics-divided view of the target flux
///
/// Collapses the regressor rows with the weight guess and divides the target flux by
/// the result.
pub fn quick_detrend(
    target: ArrayView1<f64>,
    weights: ArrayView1<f64>,
    regressors: ArrayView2<f64>,
) -> Array1<f64> {
    let systematics = weights.dot(&regressors);
    &target / &systematics
}

/// Iterative robust sigma-clip: median center, MAD scale
///
/// Returns the retention mask. A zero MAD (constant data) or an infinite threshold
/// clips nothing. Iterates until no further points drop.
fn sigma_clip(values: ArrayView1<f64>, sigma_cut: f64) -> Array1<bool> {
    let mut mask: Array1<bool> = Array1::from_elem(values.len(), true);
    loop {
        let retained = select(values, &mask);
        let (Some(center), Some(scale)) = (
            stats::median(retained.view()),
            stats::mad(retained.view()),
        ) else {
            break;
        };
        let sigma = MAD_TO_SIGMA * scale;
        if sigma == 0.0 || !sigma_cut.is_finite() {
            break;
        }
        let mut changed = false;
        for (i, &x) in values.iter().enumerate() {
            if mask[i] && (x - center).abs() > sigma_cut * sigma {
                mask[i] = false;
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }
    mask
}

/// Pre-fit outlier rejection
///
/// Combines three criteria into one retention mask: an n-sigma clip of the
/// median-filter-smoothed detrended target flux, a raw-flux cutoff guarding against
/// rapid dips, and an optional trailing trim. All flux/error/regressor rows are
/// returned masked.
pub fn clean_up(
    time: ArrayView1<f64>,
    flux: ArrayView2<f64>,
    flux_err: ArrayView2<f64>,
    regressors: ArrayView2<f64>,
    weight_guess: ArrayView1<f64>,
    params: &RejectionParams,
) -> Result<CleanedData, FitError> {
    let n = time.len();
    if n == 0 {
        return Err(FitError::EmptyTimeSeries);
    }
    if params.filter_width % 2 == 0 {
        return Err(FitError::EvenFilterWidth(params.filter_width));
    }
    if weight_guess.len() != regressors.nrows() {
        return Err(FitError::MismatchedLengths {
            context: "weight guess vs regressor rows",
            expected: regressors.nrows(),
            actual: weight_guess.len(),
        });
    }

    let target = flux.row(0);

    // n-sigma rejection of the detrended flux against its median filter
    let detrended = quick_detrend(target, weight_guess, regressors);
    let filtered = stats::median_filter(detrended.view(), params.filter_width);
    let ratio: Array1<f64> = detrended
        .iter()
        .zip(filtered.iter())
        .map(|(&d, &f)| d / f)
        .collect();
    let mut mask = sigma_clip(ratio.view(), params.sigma_cut);

    // flux cutoff for very rapidly varying light curves
    let max_flux = target.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let cutoff = params.cutoff_frac * max_flux;
    let cutoff_mask: Array1<bool> = target.iter().map(|&f| f > cutoff).collect();
    mask = and_mask(&mask, &cutoff_mask);

    // losing the last few frames
    if params.end_num > 0 {
        let start = n.saturating_sub(params.end_num);
        for i in start..n {
            mask[i] = false;
        }
    }

    let cleaned = CleanedData {
        time: select(time, &mask),
        flux: select_columns(flux, &mask),
        flux_err: select_columns(flux_err, &mask),
        regressors: select_columns(regressors, &mask),
        mask,
    };
    info!(
        "clipped {:.1}% of the data ({} of {} frames)",
        100.0 * cleaned.n_rejected() as f64 / n as f64,
        cleaned.n_rejected(),
        n
    );
    Ok(cleaned)
}

/// Post-MAP refinement clip: robust sigma-clip of fit residuals, no median filter
pub fn clip_residuals(residuals: ArrayView1<f64>, sigma_cut: f64) -> Array1<bool> {
    let mask = sigma_clip(residuals, sigma_cut);
    let n_rejected = mask.iter().filter(|&&keep| !keep).count();
    debug!(
        "residual clip rejected {} of {} frames",
        n_rejected,
        mask.len()
    );
    mask
}
