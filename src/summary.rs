//! Posterior summaries and report artifacts

use crate::error::FitError;
use crate::model::{NoiseModel, Phase};
use crate::sampler::Trace;
use crate::stats;

use log::info;
use ndarray::ArrayView1;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;

/// Marginal posterior summary of one reported variable
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SummaryRow {
    pub name: String,
    pub mean: f64,
    pub std: f64,
    pub p16: f64,
    pub p50: f64,
    pub p84: f64,
    pub p95: f64,
}

/// Variables worth reporting for the given model configuration, in report order
///
/// Scalars are included when present in the trace; the vector-valued weights and
/// baseline are expanded by name prefix.
pub fn reported_variables(
    phase: Phase,
    free_limb_darkening: bool,
    baseline: bool,
    noise: NoiseModel,
    trace: &Trace,
) -> Vec<String> {
    let mut wanted: Vec<&str> = match phase {
        Phase::Primary => vec!["period", "t0", "a_rs", "b", "ror", "jitter"],
        Phase::Secondary => vec![
            "r_star", "period", "t0", "t_second", "a_rs", "b", "fpfs", "ror", "jitter",
        ],
    };
    if free_limb_darkening {
        wanted.extend(["q[0]", "q[1]", "u[0]", "u[1]"]);
    }
    if noise == NoiseModel::Matern32Gp {
        wanted.extend(["gp_sigma", "gp_rho"]);
    }

    let mut names: Vec<String> = wanted
        .into_iter()
        .filter(|w| trace.names.iter().any(|n| n == w))
        .map(str::to_owned)
        .collect();
    names.extend(
        trace
            .names
            .iter()
            .filter(|n| n.starts_with("weights["))
            .cloned(),
    );
    if baseline {
        names.extend(
            trace
                .names
                .iter()
                .filter(|n| n.starts_with("baseline["))
                .cloned(),
        );
    }
    names
}

/// Compute mean, standard deviation and the 16/50/84/95 posterior percentiles
pub fn summarize(trace: &Trace, names: &[String]) -> Result<Vec<SummaryRow>, FitError> {
    names
        .iter()
        .map(|name| {
            let flat = trace.flat(name)?;
            if flat.is_empty() {
                return Err(FitError::EmptyTrace);
            }
            let pct = |p: f64| stats::percentile(flat.view(), p).unwrap_or(f64::NAN);
            Ok(SummaryRow {
                name: name.clone(),
                mean: flat.sum() / flat.len() as f64,
                std: stats::std_dev(flat.view()).unwrap_or(0.0),
                p16: pct(0.16),
                p50: pct(0.50),
                p84: pct(0.84),
                p95: pct(0.95),
            })
        })
        .collect()
}

pub fn write_summary_csv(path: impl AsRef<Path>, rows: &[SummaryRow]) -> Result<(), FitError> {
    let mut writer = csv::Writer::from_path(path.as_ref())?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    info!("wrote summary for {} variables to {:?}", rows.len(), path.as_ref());
    Ok(())
}

/// Credible-interval string `$p50_{-lo}^{+hi}$`
///
/// All three numbers keep two significant figures of the smaller half-width: as
/// decimal places when the half-width is below 100, otherwise by rounding to the
/// matching power of ten.
pub fn latex_interval(p16: f64, p50: f64, p84: f64) -> String {
    let lo = p50 - p16;
    let hi = p84 - p50;
    let half_width = lo.abs().min(hi.abs());
    if !(half_width > 0.0 && half_width.is_finite()) {
        return format!("${:.2}_{{-{:.2}}}^{{+{:.2}}}$", p50, lo, hi);
    }
    let figures = 1 - half_width.log10().floor() as i64;
    if figures < 0 {
        let scale = 10f64.powi((-figures) as i32);
        let round = |x: f64| (x / scale).round() * scale;
        format!(
            "${:.0}_{{-{:.0}}}^{{+{:.0}}}$",
            round(p50),
            round(lo),
            round(hi)
        )
    } else {
        let decimals = figures.min(12) as usize;
        format!(
            "${:.prec$}_{{-{:.prec$}}}^{{+{:.prec$}}}$",
            p50,
            lo,
            hi,
            prec = decimals
        )
    }
}

/// Two-column LaTeX table body of credible intervals
pub fn write_latex_table(path: impl AsRef<Path>, rows: &[SummaryRow]) -> Result<(), FitError> {
    let mut file = std::io::BufWriter::new(std::fs::File::create(path)?);
    for row in rows {
        writeln!(
            file,
            "{} & {} \\\\",
            row.name,
            latex_interval(row.p16, row.p50, row.p84)
        )?;
    }
    file.flush()?;
    Ok(())
}

/// Detrended light curve as a delimited table
pub fn write_detrended_table(
    path: impl AsRef<Path>,
    time: ArrayView1<f64>,
    detrended: ArrayView1<f64>,
    err: ArrayView1<f64>,
) -> Result<(), FitError> {
    let mut writer = csv::Writer::from_path(path.as_ref())?;
    writer.write_record(["time", "flux", "flux_err"])?;
    for (&t, &f, &e) in itertools::izip!(time.iter(), detrended.iter(), err.iter()) {
        writer.write_record(&[t.to_string(), f.to_string(), e.to_string()])?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::{Array2, Array3};

    fn toy_trace(names: &[&str]) -> Trace {
        let n_vars = names.len();
        // deterministic spread per variable so percentiles are predictable
        let samples = Array3::from_shape_fn((4, 25, n_vars), |(c, d, v)| {
            v as f64 * 10.0 + (c * 25 + d) as f64 / 99.0
        });
        Trace {
            names: names.iter().map(|s| s.to_string()).collect(),
            samples,
            log_prob: Array2::zeros((4, 25)),
        }
    }

    #[test]
    fn percentiles_are_ordered_and_median_is_central() {
        let trace = toy_trace(&["x"]);
        let rows = summarize(&trace, &["x".to_string()]).unwrap();
        let row = &rows[0];
        assert!(row.p16 <= row.p50 && row.p50 <= row.p84 && row.p84 <= row.p95);
        // samples are 0..=1 uniform on a grid
        assert_relative_eq!(row.p50, 0.5, epsilon = 1e-2);
        assert_relative_eq!(row.mean, 0.5, epsilon = 1e-2);
    }

    #[test]
    fn unknown_name_is_an_error() {
        let trace = toy_trace(&["x"]);
        let err = summarize(&trace, &["y".to_string()]).unwrap_err();
        assert!(matches!(err, FitError::UnknownVariable(_)));
    }

    #[test]
    fn primary_report_uses_ror() {
        let trace = toy_trace(&[
            "r_star", "period", "t0", "a_rs", "b", "ror", "weights[0]", "weights[1]", "jitter",
        ]);
        let names =
            reported_variables(Phase::Primary, false, false, NoiseModel::White, &trace);
        assert!(names.contains(&"ror".to_string()));
        assert!(!names.contains(&"fpfs".to_string()));
        assert!(!names.contains(&"r_star".to_string()));
        assert_eq!(
            names.iter().filter(|n| n.starts_with("weights[")).count(),
            2
        );
    }

    #[test]
    fn secondary_report_adds_derived_variables() {
        let trace = toy_trace(&[
            "r_star", "period", "t0", "a_rs", "b", "fpfs", "weights[0]", "jitter", "t_second",
            "ror",
        ]);
        let names =
            reported_variables(Phase::Secondary, false, false, NoiseModel::White, &trace);
        for expected in ["r_star", "fpfs", "ror", "t_second"] {
            assert!(names.contains(&expected.to_string()), "{}", expected);
        }
    }

    #[test]
    fn baseline_and_gp_names_follow_the_configuration() {
        let trace = toy_trace(&[
            "period", "t0", "a_rs", "b", "ror", "jitter", "weights[0]", "baseline[0]",
            "baseline[1]", "gp_sigma", "gp_rho",
        ]);
        let without =
            reported_variables(Phase::Primary, false, false, NoiseModel::White, &trace);
        assert!(!without.iter().any(|n| n.starts_with("baseline")));
        let with = reported_variables(Phase::Primary, false, true, NoiseModel::Matern32Gp, &trace);
        assert!(with.iter().any(|n| n.starts_with("baseline")));
        assert!(with.contains(&"gp_sigma".to_string()));
    }

    #[test]
    fn latex_interval_precision_follows_half_width() {
        assert_eq!(latex_interval(0.95, 1.0, 1.08), "$1.000_{-0.050}^{+0.080}$");
        assert_eq!(latex_interval(8.0, 10.0, 13.0), "$10.0_{-2.0}^{+3.0}$");
        // asymmetric interval keeps the precision of the tighter side
        assert_eq!(
            latex_interval(0.99, 1.0, 1.5),
            "$1.000_{-0.010}^{+0.500}$"
        );
    }

    #[test]
    fn wide_intervals_round_to_powers_of_ten() {
        assert_eq!(
            latex_interval(800.0, 1234.0, 1834.0),
            "$1230_{-430}^{+600}$"
        );
        assert_eq!(
            latex_interval(-4600.0, 0.0, 5200.0),
            "$0_{-4600}^{+5200}$"
        );
    }

    #[test]
    fn empty_trace_is_an_error_not_a_panic() {
        let trace = Trace {
            names: vec!["x".to_string()],
            samples: ndarray::Array3::zeros((2, 0, 1)),
            log_prob: Array2::zeros((2, 0)),
        };
        let err = summarize(&trace, &["x".to_string()]).unwrap_err();
        assert!(matches!(err, FitError::EmptyTrace));
    }

    #[test]
    fn csv_output_round_trips() {
        let rows = vec![SummaryRow {
            name: "ror".into(),
            mean: 0.1,
            std: 0.01,
            p16: 0.09,
            p50: 0.1,
            p84: 0.11,
            p95: 0.12,
        }];
        let path = std::env::temp_dir().join("transit_fit_summary_round_trip.csv");
        write_summary_csv(&path, &rows).unwrap();
        let mut reader = csv::Reader::from_path(&path).unwrap();
        let back: Vec<SummaryRow> = reader.deserialize().map(|r| r.unwrap()).collect();
        std::fs::remove_file(&path).ok();
        assert_eq!(back, rows);
    }
}
