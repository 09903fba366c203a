use crate::model::Statistics;

/// Compute mean, population standard deviation, count and median sample.
///
/// `value` is the element at `floor(n / 2)` of the sorted samples, so even-length
/// inputs report the upper of the two middle elements. The standard deviation
/// divides by `n`. Empty input yields `n = 0` with NaN everywhere else.
pub fn compute_statistics(samples: &[f64]) -> Statistics {
    let n = samples.len();
    let mean = samples.iter().sum::<f64>() / n as f64;
    let variance = samples.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n as f64;
    let mut sorted = samples.to_vec();
    sorted.sort_by(f64::total_cmp);
    let median = sorted.get(n / 2).copied().unwrap_or(f64::NAN);
    Statistics {
        mu: mean,
        sd: variance.sqrt(),
        n,
        value: median,
    }
}

/// Like [`compute_statistics`], but refuses empty input.
pub fn try_compute_statistics(samples: &[f64]) -> Option<Statistics> {
    if samples.is_empty() {
        return None;
    }
    Some(compute_statistics(samples))
}
