//! Photometric aperture selection by residual-scatter sweep

use crate::data::PhotometryLoader;
use crate::error::FitError;
use crate::reject::{clean_up, quick_detrend, RejectionParams};
use crate::sink::DiagnosticsSink;
use crate::stats;

use log::info;
use ndarray::Array1;

/// Sweep candidate apertures and return the one minimizing the noise proxy
///
/// Each candidate is loaded, quickly detrended with a uniform weight guess of
/// `1 / n_comparisons`, cleaned, and scored by `std(ratio) / n_retained`, which
/// favors both low scatter and more retained frames.
pub fn optimize_aperture<L, S>(
    loader: &L,
    apertures: &[u32],
    params: &RejectionParams,
    sink: &mut S,
) -> Result<u32, FitError>
where
    L: PhotometryLoader,
    S: DiagnosticsSink,
{
    if apertures.is_empty() {
        return Err(FitError::EmptyApertureGrid);
    }
    info!("running quick aperture optimization over {:?}", apertures);

    let mut scores = Vec::with_capacity(apertures.len());
    for &aperture in apertures {
        let phot = loader.load(aperture)?;
        phot.validate()?;

        let regressors = phot.comparisons().to_owned();
        let weight_guess =
            Array1::from_elem(regressors.nrows(), 1.0 / regressors.nrows() as f64);

        let cleaned = clean_up(
            phot.time.view(),
            phot.flux.view(),
            phot.flux_err.view(),
            regressors.view(),
            weight_guess.view(),
            params,
        )?;

        let detrended = quick_detrend(
            cleaned.flux.row(0),
            weight_guess.view(),
            cleaned.regressors.view(),
        );
        let filtered = stats::median_filter(detrended.view(), params.filter_width);
        let ratio: Array1<f64> = detrended
            .iter()
            .zip(filtered.iter())
            .map(|(&d, &f)| d / f)
            .collect();

        let scatter = stats::std_dev(ratio.view()).unwrap_or(f64::INFINITY);
        scores.push(scatter / cleaned.n_retained() as f64);
    }

    sink.aperture_curve(apertures, &scores);

    let best_idx = stats::argmin(ndarray::aview1(&scores)).expect("grid is non-empty");
    let best = apertures[best_idx];
    info!("optimal aperture is {} pixels", best);
    Ok(best)
}
