/// Helper function for evaluating the dot product between two vectors.
/// The slices are expected to have the same length.
///
/// ## Example
///
/// ```
/// let a = vec![1.0, 2.0, 3.0];
/// let b = vec![1.0, 1.0, 1.0];
///
/// let dot = hydrosched::utils::dot_product(&a, &b);
/// assert_eq!(dot, 6.0);
/// ```
pub fn dot_product(a: &[f64], b: &[f64]) -> f64 {
    assert_eq!(a.len(), b.len());
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Sample mean and (n - 1) standard deviation of a set of values.
/// Returns zeros for an empty set and a null deviation for a single value.
///
/// ## Example
///
/// ```
/// let (mean, std) = hydrosched::utils::mean_and_std(&[1.0, 2.0, 3.0]);
/// assert_eq!(mean, 2.0);
/// assert_eq!(std, 1.0);
/// ```
pub fn mean_and_std(values: &[f64]) -> (f64, f64) {
    let n = values.len();
    if n == 0 {
        return (0.0, 0.0);
    }
    let mean = values.iter().sum::<f64>() / n as f64;
    if n == 1 {
        return (mean, 0.0);
    }
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>()
        / (n - 1) as f64;
    (mean, variance.sqrt())
}

/// Linear interpolated quantile of an already sorted slice, with `q` in
/// [0, 1].
pub fn sorted_quantile(sorted: &[f64], q: f64) -> f64 {
    match sorted.len() {
        0 => f64::NAN,
        1 => sorted[0],
        n => {
            let position = q.clamp(0.0, 1.0) * (n - 1) as f64;
            let lower = position.floor() as usize;
            let upper = position.ceil() as usize;
            let weight = position - lower as f64;
            sorted[lower] * (1.0 - weight) + sorted[upper] * weight
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean_and_std_empty() {
        assert_eq!(mean_and_std(&[]), (0.0, 0.0));
    }

    #[test]
    fn test_mean_and_std_single_value() {
        assert_eq!(mean_and_std(&[4.0]), (4.0, 0.0));
    }

    #[test]
    fn test_sorted_quantile() {
        let values = [0.0, 10.0, 20.0, 30.0, 40.0];
        assert_eq!(sorted_quantile(&values, 0.0), 0.0);
        assert_eq!(sorted_quantile(&values, 0.5), 20.0);
        assert_eq!(sorted_quantile(&values, 1.0), 40.0);
        assert_eq!(sorted_quantile(&values, 0.1), 4.0);
    }
}
