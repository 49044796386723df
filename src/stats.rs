//! Robust array statistics used by the outlier rejection and summary stages

use ndarray::ArrayView1;

/// Median of an array, `None` for an empty input
pub fn median(arr: ArrayView1<f64>) -> Option<f64> {
    if arr.is_empty() {
        return None;
    }
    let mut sorted: Vec<f64> = arr.to_vec();
    sorted.sort_unstable_by(|a, b| a.total_cmp(b));
    let n = sorted.len();
    if n % 2 == 1 {
        Some(sorted[n / 2])
    } else {
        Some(0.5 * (sorted[n / 2 - 1] + sorted[n / 2]))
    }
}

/// Median absolute deviation from the median
pub fn mad(arr: ArrayView1<f64>) -> Option<f64> {
    let med = median(arr)?;
    let abs_dev: Vec<f64> = arr.iter().map(|&x| (x - med).abs()).collect();
    median(ndarray::aview1(&abs_dev))
}

/// Sample standard deviation (ddof = 1), `None` for fewer than two points
pub fn std_dev(arr: ArrayView1<f64>) -> Option<f64> {
    let n = arr.len();
    if n < 2 {
        return None;
    }
    let mean = arr.sum() / n as f64;
    let ss: f64 = arr.iter().map(|&x| (x - mean).powi(2)).sum();
    Some((ss / (n - 1) as f64).sqrt())
}

/// Percentile with the R-7 linear-interpolation definition
///
/// `p` is a probability in [0, 1]. Returns `None` for an empty input.
pub fn percentile(arr: ArrayView1<f64>, p: f64) -> Option<f64> {
    if arr.is_empty() {
        return None;
    }
    assert!((0.0..=1.0).contains(&p), "percentile must be in [0, 1]");
    let mut sorted: Vec<f64> = arr.to_vec();
    sorted.sort_unstable_by(|a, b| a.total_cmp(b));
    let n = sorted.len();
    let h = (n - 1) as f64 * p;
    let lo = h.floor() as usize;
    let frac = h - h.floor();
    if lo >= n - 1 {
        return Some(sorted[n - 1]);
    }
    Some(sorted[lo] + frac * (sorted[lo + 1] - sorted[lo]))
}

/// Index of the minimum element, `None` for an empty input
pub fn argmin(arr: ArrayView1<f64>) -> Option<usize> {
    if arr.is_empty() {
        return None;
    }
    let (idx, _) = arr
        .iter()
        .enumerate()
        .fold((0, arr[0]), |(min_idx, min_val), (idx, &val)| {
            if val < min_val {
                (idx, val)
            } else {
                (min_idx, min_val)
            }
        });
    Some(idx)
}

/// Running median filter with an odd window, truncated at the array edges
///
/// Window truncation keeps the first and last `width / 2` outputs meaningful
/// instead of biasing them with padding values.
pub fn median_filter(arr: ArrayView1<f64>, width: usize) -> Vec<f64> {
    assert!(width % 2 == 1, "median filter width must be odd");
    let n = arr.len();
    let half = width / 2;
    (0..n)
        .map(|i| {
            let lo = i.saturating_sub(half);
            let hi = usize::min(i + half + 1, n);
            median(arr.slice(ndarray::s![lo..hi])).expect("window is never empty")
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::Array1;

    #[test]
    fn median_odd_even() {
        let odd = Array1::from(vec![3.0, 1.0, 2.0]);
        assert_eq!(median(odd.view()), Some(2.0));
        let even = Array1::from(vec![4.0, 1.0, 3.0, 2.0]);
        assert_eq!(median(even.view()), Some(2.5));
        let empty: Array1<f64> = Array1::from(vec![]);
        assert_eq!(median(empty.view()), None);
    }

    #[test]
    fn mad_of_constant_is_zero() {
        let arr = Array1::from(vec![5.0; 10]);
        assert_eq!(mad(arr.view()), Some(0.0));
    }

    #[test]
    fn mad_basic() {
        let arr = Array1::from(vec![1.0, 2.0, 3.0, 4.0, 100.0]);
        // median = 3, |x - 3| = [2, 1, 0, 1, 97], median = 1
        assert_eq!(mad(arr.view()), Some(1.0));
    }

    #[test]
    fn percentile_matches_median() {
        let arr = Array1::from(vec![1.0, 5.0, 2.0, 4.0, 3.0]);
        assert_relative_eq!(
            percentile(arr.view(), 0.5).unwrap(),
            median(arr.view()).unwrap()
        );
    }

    #[test]
    fn percentile_interpolates() {
        let arr = Array1::from(vec![0.0, 1.0]);
        assert_relative_eq!(percentile(arr.view(), 0.25).unwrap(), 0.25);
        assert_relative_eq!(percentile(arr.view(), 1.0).unwrap(), 1.0);
    }

    #[test]
    fn percentiles_are_ordered() {
        let arr = Array1::from((0..100).map(|i| (i * 37 % 100) as f64).collect::<Vec<_>>());
        let ps: Vec<f64> = [0.16, 0.5, 0.84, 0.95]
            .iter()
            .map(|&p| percentile(arr.view(), p).unwrap())
            .collect();
        assert!(ps[0] <= ps[1] && ps[1] <= ps[2] && ps[2] <= ps[3]);
    }

    #[test]
    fn argmin_basic() {
        let arr = Array1::from(vec![3.0, 1.0, 2.0]);
        assert_eq!(argmin(arr.view()), Some(1));
        let empty: Array1<f64> = Array1::from(vec![]);
        assert_eq!(argmin(empty.view()), None);
    }

    #[test]
    fn median_filter_flattens_spike() {
        let mut values = vec![1.0; 21];
        values[10] = 100.0;
        let arr = Array1::from(values);
        let filtered = median_filter(arr.view(), 5);
        assert_eq!(filtered.len(), 21);
        assert!(filtered.iter().all(|&x| x == 1.0));
    }

    #[test]
    fn median_filter_preserves_trend() {
        let arr = Array1::from((0..11).map(|i| i as f64).collect::<Vec<_>>());
        let filtered = median_filter(arr.view(), 3);
        // interior points follow the linear trend exactly
        for i in 1..10 {
            assert_relative_eq!(filtered[i], i as f64);
        }
    }

    #[test]
    fn std_dev_basic() {
        let arr = Array1::from(vec![2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        assert_relative_eq!(std_dev(arr.view()).unwrap(), 2.13809, epsilon = 1e-4);
    }
}
