//! Auxiliary regressors derived from per-frame diagnostics

use crate::data::{select, BackgroundData, PhotometryData};
use crate::error::FitError;
use crate::stats;

use ndarray::{Array1, ArrayView1};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Sky-background handling mode of the observing band
#[derive(Clone, Copy, Debug, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackgroundMode {
    /// Helium 1083 nm band: per-frame sky spectra, water proxy available
    Helium,
    /// Broad-band: per-frame scalar background level
    Standard,
}

impl fmt::Display for BackgroundMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Helium => write!(f, "helium"),
            Self::Standard => write!(f, "standard"),
        }
    }
}

/// Named covariates that can be cross-matched into the regressor matrix
#[derive(
    Clone, Copy, Debug, Serialize, Deserialize, JsonSchema, PartialEq, Eq, PartialOrd, Ord,
)]
#[serde(rename_all = "snake_case")]
pub enum CovariateName {
    XCent,
    YCent,
    DFromMed,
    WaterProxy,
    Airmass,
    PsfWidth,
    Background,
}

impl fmt::Display for CovariateName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::XCent => "x_cent",
            Self::YCent => "y_cent",
            Self::DFromMed => "d_from_med",
            Self::WaterProxy => "water_proxy",
            Self::Airmass => "airmass",
            Self::PsfWidth => "psf_width",
            Self::Background => "background",
        };
        write!(f, "{}", name)
    }
}

/// Spectral channel ranges of the helium-band sky spectrum: one water-absorption
/// band and two OH emission bands bracketing it
const WATER_BAND: std::ops::Range<usize> = 72..89;
const OH_BAND_LOW: std::ops::Range<usize> = 180..190;
const OH_BAND_HIGH: std::ops::Range<usize> = 201..210;

/// Covariates populated for the current background mode, masked to retained frames
#[derive(Clone, Debug, Default)]
pub struct CovariateSet {
    values: BTreeMap<CovariateName, Array1<f64>>,
}

impl CovariateSet {
    pub fn get(&self, name: CovariateName) -> Option<&Array1<f64>> {
        self.values.get(&name)
    }

    pub fn contains(&self, name: CovariateName) -> bool {
        self.values.contains_key(&name)
    }

    /// Pick the requested covariates, in order, as regressor rows
    ///
    /// Requesting a covariate not populated for the current background mode is a
    /// configuration error.
    pub fn crossmatch(
        &self,
        names: &[CovariateName],
        mode: BackgroundMode,
    ) -> Result<Vec<Array1<f64>>, FitError> {
        names
            .iter()
            .map(|&name| {
                self.values
                    .get(&name)
                    .cloned()
                    .ok_or_else(|| FitError::CovariateUnavailable {
                        name: name.to_string(),
                        mode: mode.to_string(),
                    })
            })
            .collect()
    }
}

/// Water-absorption proxy from per-frame sky spectra
///
/// Ratio of the water-band average to the mean of the two OH emission bands,
/// normalized by its own median.
fn water_proxy(spectra: &ndarray::Array2<f64>) -> Array1<f64> {
    let band_mean = |range: std::ops::Range<usize>| -> Array1<f64> {
        spectra
            .slice(ndarray::s![.., range])
            .mean_axis(ndarray::Axis(1))
            .expect("band range is non-empty")
    };
    let water = band_mean(WATER_BAND);
    let emission = (band_mean(OH_BAND_LOW) + band_mean(OH_BAND_HIGH)) * 0.5;
    let mut proxy = &water / &emission;
    let norm = stats::median(proxy.view()).expect("proxy is non-empty");
    proxy /= norm;
    proxy
}

/// Euclidean distance of each frame's centroid from the per-series median centroid
fn d_from_med(centroid_x: ArrayView1<f64>, centroid_y: ArrayView1<f64>) -> Array1<f64> {
    let med_x = stats::median(centroid_x).expect("centroids are non-empty");
    let med_y = stats::median(centroid_y).expect("centroids are non-empty");
    centroid_x
        .iter()
        .zip(centroid_y.iter())
        .map(|(&x, &y)| ((x - med_x).powi(2) + (y - med_y).powi(2)).sqrt())
        .collect()
}

/// Derive the covariate mapping from per-frame diagnostics
///
/// The water proxy is only populated in helium mode and the raw background level in
/// every other mode; the two are mutually exclusive. All outputs are masked to the
/// retained frames.
pub fn build_covariates(
    phot: &PhotometryData,
    mode: BackgroundMode,
    mask: &Array1<bool>,
) -> Result<CovariateSet, FitError> {
    if mask.len() != phot.n_samples() {
        return Err(FitError::MismatchedLengths {
            context: "covariate mask",
            expected: phot.n_samples(),
            actual: mask.len(),
        });
    }

    let mut values = BTreeMap::new();
    values.insert(
        CovariateName::XCent,
        select(phot.centroid_x.view(), mask),
    );
    values.insert(
        CovariateName::YCent,
        select(phot.centroid_y.view(), mask),
    );
    values.insert(
        CovariateName::DFromMed,
        select(
            d_from_med(phot.centroid_x.view(), phot.centroid_y.view()).view(),
            mask,
        ),
    );
    values.insert(CovariateName::Airmass, select(phot.airmass.view(), mask));
    values.insert(CovariateName::PsfWidth, select(phot.psf_width.view(), mask));

    match (mode, &phot.background) {
        (BackgroundMode::Helium, BackgroundData::Spectra(spectra)) => {
            if spectra.ncols() < OH_BAND_HIGH.end {
                return Err(FitError::BackgroundShape {
                    mode: mode.to_string(),
                    detail: format!(
                        "sky spectra carry {} channels, the proxy bands need {}",
                        spectra.ncols(),
                        OH_BAND_HIGH.end
                    ),
                });
            }
            values.insert(
                CovariateName::WaterProxy,
                select(water_proxy(spectra).view(), mask),
            );
        }
        (BackgroundMode::Standard, BackgroundData::Level(level)) => {
            values.insert(CovariateName::Background, select(level.view(), mask));
        }
        _ => {
            return Err(FitError::BackgroundShape {
                mode: mode.to_string(),
                detail: "background data kind does not match the mode".to_string(),
            })
        }
    }

    Ok(CovariateSet { values })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::BackgroundData;
    use approx::assert_relative_eq;
    use ndarray::{Array1, Array2};

    fn phot_with_background(background: BackgroundData, n: usize) -> PhotometryData {
        PhotometryData {
            time: Array1::linspace(0.0, 1.0, n),
            flux: Array2::from_elem((2, n), 1.0),
            flux_err: Array2::from_elem((2, n), 1e-3),
            background,
            centroid_x: Array1::from_shape_fn(n, |i| 250.0 + (i % 3) as f64),
            centroid_y: Array1::from_shape_fn(n, |i| 1800.0 - (i % 2) as f64),
            airmass: Array1::linspace(1.0, 1.3, n),
            psf_width: Array1::from_elem(n, 4.0),
        }
    }

    fn helium_phot(n: usize) -> PhotometryData {
        let spectra = Array2::from_shape_fn((n, 256), |(i, c)| {
            // water band depressed on even frames
            if WATER_BAND.contains(&c) && i % 2 == 0 {
                50.0
            } else {
                100.0
            }
        });
        phot_with_background(BackgroundData::Spectra(spectra), n)
    }

    #[test]
    fn helium_mode_populates_water_proxy_only() {
        let phot = helium_phot(10);
        let mask = Array1::from_elem(10, true);
        let covs = build_covariates(&phot, BackgroundMode::Helium, &mask).unwrap();
        assert!(covs.contains(CovariateName::WaterProxy));
        assert!(!covs.contains(CovariateName::Background));
    }

    #[test]
    fn standard_mode_populates_background_only() {
        let phot = phot_with_background(BackgroundData::Level(Array1::from_elem(10, 120.0)), 10);
        let mask = Array1::from_elem(10, true);
        let covs = build_covariates(&phot, BackgroundMode::Standard, &mask).unwrap();
        assert!(covs.contains(CovariateName::Background));
        assert!(!covs.contains(CovariateName::WaterProxy));
    }

    #[test]
    fn mismatched_background_kind_is_an_error() {
        let phot = phot_with_background(BackgroundData::Level(Array1::from_elem(10, 120.0)), 10);
        let mask = Array1::from_elem(10, true);
        let err = build_covariates(&phot, BackgroundMode::Helium, &mask).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn short_sky_spectra_are_an_error() {
        let spectra = Array2::from_elem((10, 128), 100.0);
        let phot = phot_with_background(BackgroundData::Spectra(spectra), 10);
        let mask = Array1::from_elem(10, true);
        let err = build_covariates(&phot, BackgroundMode::Helium, &mask).unwrap_err();
        assert!(matches!(err, FitError::BackgroundShape { .. }));
        assert!(err.is_configuration());
    }

    #[test]
    fn crossmatch_unavailable_covariate_is_an_error() {
        let phot = helium_phot(10);
        let mask = Array1::from_elem(10, true);
        let covs = build_covariates(&phot, BackgroundMode::Helium, &mask).unwrap();
        let err = covs
            .crossmatch(&[CovariateName::Background], BackgroundMode::Helium)
            .unwrap_err();
        assert!(matches!(err, FitError::CovariateUnavailable { .. }));
        assert!(err.is_configuration());
    }

    #[test]
    fn crossmatch_preserves_request_order() {
        let phot = helium_phot(10);
        let mask = Array1::from_elem(10, true);
        let covs = build_covariates(&phot, BackgroundMode::Helium, &mask).unwrap();
        let rows = covs
            .crossmatch(
                &[CovariateName::Airmass, CovariateName::DFromMed],
                BackgroundMode::Helium,
            )
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_relative_eq!(rows[0][0], 1.0);
    }

    #[test]
    fn water_proxy_median_is_unity() {
        let phot = helium_phot(11);
        let mask = Array1::from_elem(11, true);
        let covs = build_covariates(&phot, BackgroundMode::Helium, &mask).unwrap();
        let proxy = covs.get(CovariateName::WaterProxy).unwrap();
        assert_relative_eq!(
            crate::stats::median(proxy.view()).unwrap(),
            1.0,
            epsilon = 1e-12
        );
    }

    #[test]
    fn d_from_med_is_zero_at_median_centroid() {
        let x = Array1::from(vec![1.0, 2.0, 3.0]);
        let y = Array1::from(vec![5.0, 6.0, 7.0]);
        let d = d_from_med(x.view(), y.view());
        assert_relative_eq!(d[1], 0.0);
        assert_relative_eq!(d[0], (2.0f64).sqrt());
    }

    #[test]
    fn masking_shrinks_covariates() {
        let phot = helium_phot(10);
        let mut mask = Array1::from_elem(10, true);
        mask[0] = false;
        mask[9] = false;
        let covs = build_covariates(&phot, BackgroundMode::Helium, &mask).unwrap();
        assert_eq!(covs.get(CovariateName::Airmass).unwrap().len(), 8);
    }
}
