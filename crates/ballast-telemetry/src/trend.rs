//! Least-squares line fitting.
//!
//! Shared by the memory-trend detector (ordinary fit over post-GC
//! baselines) and the predictive optimizer (exponentially weighted fit
//! over MSPT samples).

/// A fitted line `y = intercept + slope * x`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LineFit {
    /// Slope in y-units per x-unit.
    pub slope: f64,
    /// Intercept at x = 0.
    pub intercept: f64,
}

/// Ordinary least-squares fit.
///
/// Returns `None` for fewer than two points or a degenerate x spread
/// (all samples at the same x).
pub fn linear_fit(points: &[(f64, f64)]) -> Option<LineFit> {
    if points.len() < 2 {
        return None;
    }
    let weights = vec![1.0; points.len()];
    weighted_fit(points, &weights)
}

/// Weighted least-squares fit.
///
/// Returns `None` for fewer than two points, mismatched lengths,
/// non-positive total weight, or a degenerate x spread.
pub fn weighted_fit(points: &[(f64, f64)], weights: &[f64]) -> Option<LineFit> {
    if points.len() < 2 || points.len() != weights.len() {
        return None;
    }
    let total: f64 = weights.iter().sum();
    if !(total > 0.0) {
        return None;
    }

    let mean_x: f64 = points
        .iter()
        .zip(weights)
        .map(|((x, _), w)| w * x)
        .sum::<f64>()
        / total;
    let mean_y: f64 = points
        .iter()
        .zip(weights)
        .map(|((_, y), w)| w * y)
        .sum::<f64>()
        / total;

    let mut covariance = 0.0;
    let mut variance = 0.0;
    for ((x, y), w) in points.iter().zip(weights) {
        let dx = x - mean_x;
        covariance += w * dx * (y - mean_y);
        variance += w * dx * dx;
    }
    if variance <= f64::EPSILON {
        return None;
    }

    let slope = covariance / variance;
    Some(LineFit {
        slope,
        intercept: mean_y - slope * mean_x,
    })
}

/// Weighted mean of a sample series.
///
/// Returns `None` for empty input or non-positive total weight.
pub fn weighted_mean(values: &[f64], weights: &[f64]) -> Option<f64> {
    if values.is_empty() || values.len() != weights.len() {
        return None;
    }
    let total: f64 = weights.iter().sum();
    if !(total > 0.0) {
        return None;
    }
    Some(values.iter().zip(weights).map(|(v, w)| v * w).sum::<f64>() / total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn perfect_line_recovered() {
        let points: Vec<(f64, f64)> = (0..10).map(|i| (i as f64, 3.0 + 2.0 * i as f64)).collect();
        let fit = linear_fit(&points).unwrap();
        assert!((fit.slope - 2.0).abs() < 1e-9);
        assert!((fit.intercept - 3.0).abs() < 1e-9);
    }

    #[test]
    fn flat_series_has_zero_slope() {
        let points: Vec<(f64, f64)> = (0..5).map(|i| (i as f64, 42.0)).collect();
        let fit = linear_fit(&points).unwrap();
        assert!(fit.slope.abs() < 1e-12);
    }

    #[test]
    fn degenerate_inputs_rejected() {
        assert!(linear_fit(&[]).is_none());
        assert!(linear_fit(&[(1.0, 1.0)]).is_none());
        // All samples at the same x: no spread to fit against.
        assert!(linear_fit(&[(5.0, 1.0), (5.0, 2.0), (5.0, 3.0)]).is_none());
        assert!(weighted_fit(&[(0.0, 0.0), (1.0, 1.0)], &[0.0, 0.0]).is_none());
    }

    #[test]
    fn heavier_tail_pulls_slope() {
        // Flat early samples, rising tail. Tail-heavy weights must
        // report a steeper slope than the uniform fit.
        let points: Vec<(f64, f64)> = vec![
            (0.0, 10.0),
            (1.0, 10.0),
            (2.0, 10.0),
            (3.0, 14.0),
            (4.0, 18.0),
        ];
        let uniform = linear_fit(&points).unwrap();
        let weights = [1.0, 1.0, 1.0, 3.0, 9.0];
        let weighted = weighted_fit(&points, &weights).unwrap();
        assert!(weighted.slope > uniform.slope);
    }

    #[test]
    fn weighted_mean_favors_heavy_samples() {
        let mean = weighted_mean(&[10.0, 20.0], &[1.0, 3.0]).unwrap();
        assert!((mean - 17.5).abs() < 1e-12);
    }
}
