//! Fire-and-forget seam to the excluded plotting collaborator

use crate::covariates::CovariateName;
use crate::sampler::Trace;
use crate::summary::SummaryRow;

use ndarray::{Array1, ArrayView1};

/// Diagnostic views emitted by the pipeline
///
/// Implementations forward these to a plotting backend; nothing is consumed back.
/// Every method has an empty default body, so sinks implement only what they render.
#[allow(unused_variables)]
pub trait DiagnosticsSink {
    /// Aperture-optimization curve: candidate radii and their noise scores
    fn aperture_curve(&mut self, apertures: &[u32], scores: &[f64]) {}

    /// Quick-detrend view of the cleaned light curve
    fn quick_detrend(&mut self, time: ArrayView1<f64>, detrended: ArrayView1<f64>) {}

    /// Covariate traces, aligned with the retained frames
    fn covariates(&mut self, time: ArrayView1<f64>, names: &[CovariateName], rows: &[Array1<f64>]) {
    }

    /// MAP-fit overlay: observed flux and the optimized full model
    fn map_overlay(&mut self, time: ArrayView1<f64>, flux: ArrayView1<f64>, model: Array1<f64>) {}

    /// MAP residuals with the raw flux errors, for binned scatter diagnostics
    fn residuals(&mut self, time: ArrayView1<f64>, residuals: Array1<f64>, err: ArrayView1<f64>) {}

    /// White light curve: systematics-divided flux, its errors, and the optimized
    /// transit/eclipse model alone
    fn white_light(
        &mut self,
        time: ArrayView1<f64>,
        detrended: ArrayView1<f64>,
        err: ArrayView1<f64>,
        model: Array1<f64>,
    ) {
    }

    /// Full posterior trace with the reported variable names, for corner and
    /// per-chain trace views
    fn posterior(&mut self, trace: &Trace, names: &[String]) {}

    /// Retention mask after a rejection pass
    fn rejection(&mut self, stage: &str, mask: &Array1<bool>) {}

    /// Final summary rows
    fn summary(&mut self, rows: &[SummaryRow]) {}
}

/// Sink that drops everything
#[derive(Clone, Copy, Debug, Default)]
pub struct NullSink;

impl DiagnosticsSink for NullSink {}
