//! Reduced photometry containers and the loader seam to the calibration stage

use crate::error::FitError;

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};

/// Per-frame background measurement produced by the calibration stage
///
/// Helium-band observations dump the full sky spectrum per frame so the
/// water-absorption proxy can be derived from it; every other band dumps a single
/// background level per frame.
#[derive(Clone, Debug)]
pub enum BackgroundData {
    /// (n_frames, n_channels) sky spectra
    Spectra(Array2<f64>),
    /// per-frame scalar background level
    Level(Array1<f64>),
}

/// One aperture's worth of extracted photometry, aligned by frame index
///
/// Row 0 of `flux`/`flux_err` is the target star, the remaining rows are comparison
/// stars. Centroid and PSF-width arrays refer to the target.
#[derive(Clone, Debug)]
pub struct PhotometryData {
    pub time: Array1<f64>,
    pub flux: Array2<f64>,
    pub flux_err: Array2<f64>,
    pub background: BackgroundData,
    pub centroid_x: Array1<f64>,
    pub centroid_y: Array1<f64>,
    pub airmass: Array1<f64>,
    pub psf_width: Array1<f64>,
}

impl PhotometryData {
    pub fn n_samples(&self) -> usize {
        self.time.len()
    }

    pub fn n_comparisons(&self) -> usize {
        self.flux.nrows().saturating_sub(1)
    }

    pub fn target_flux(&self) -> ArrayView1<f64> {
        self.flux.row(0)
    }

    /// Comparison-star flux rows (everything below row 0)
    pub fn comparisons(&self) -> ArrayView2<f64> {
        self.flux.slice(ndarray::s![1.., ..])
    }

    /// Check frame alignment and time ordering
    pub fn validate(&self) -> Result<(), FitError> {
        let n = self.time.len();
        if n == 0 {
            return Err(FitError::EmptyTimeSeries);
        }
        if self.flux.nrows() < 2 {
            return Err(FitError::MismatchedLengths {
                context: "flux rows (target + at least one comparison)",
                expected: 2,
                actual: self.flux.nrows(),
            });
        }
        for (context, actual) in [
            ("flux columns", self.flux.ncols()),
            ("flux_err columns", self.flux_err.ncols()),
            ("centroid_x", self.centroid_x.len()),
            ("centroid_y", self.centroid_y.len()),
            ("airmass", self.airmass.len()),
            ("psf_width", self.psf_width.len()),
            (
                "background frames",
                match &self.background {
                    BackgroundData::Spectra(s) => s.nrows(),
                    BackgroundData::Level(l) => l.len(),
                },
            ),
        ] {
            if actual != n {
                return Err(FitError::MismatchedLengths {
                    context,
                    expected: n,
                    actual,
                });
            }
        }
        if self.flux_err.nrows() != self.flux.nrows() {
            return Err(FitError::MismatchedLengths {
                context: "flux_err rows",
                expected: self.flux.nrows(),
                actual: self.flux_err.nrows(),
            });
        }
        if self.time.windows(2).into_iter().any(|w| w[1] <= w[0]) {
            return Err(FitError::UnsortedTime);
        }
        Ok(())
    }
}

/// Seam to the excluded calibration/photometry stage
///
/// Implementations load previously dumped photometry keyed by aperture radius.
pub trait PhotometryLoader {
    fn load(&self, aperture: u32) -> Result<PhotometryData, FitError>;
}

/// Keep the elements of a 1-D array where the mask is true
pub fn select(arr: ArrayView1<f64>, mask: &Array1<bool>) -> Array1<f64> {
    assert_eq!(arr.len(), mask.len(), "mask length must match array length");
    arr.iter()
        .zip(mask.iter())
        .filter_map(|(&x, &keep)| keep.then_some(x))
        .collect()
}

/// Keep the columns of a 2-D array where the mask is true
pub fn select_columns(arr: ArrayView2<f64>, mask: &Array1<bool>) -> Array2<f64> {
    assert_eq!(
        arr.ncols(),
        mask.len(),
        "mask length must match column count"
    );
    let kept: Vec<usize> = mask
        .iter()
        .enumerate()
        .filter_map(|(i, &keep)| keep.then_some(i))
        .collect();
    arr.select(Axis(1), &kept)
}

/// Element-wise AND of two masks of equal length
pub fn and_mask(a: &Array1<bool>, b: &Array1<bool>) -> Array1<bool> {
    assert_eq!(a.len(), b.len(), "masks must have the same length");
    a.iter().zip(b.iter()).map(|(&x, &y)| x && y).collect()
}
