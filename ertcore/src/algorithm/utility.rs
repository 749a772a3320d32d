use statrs::statistics::{Data, OrderStatistics};

/// Median of the finite absolute values in `values`, or `None` when no
/// entry is finite. Used to impute masked readings without disturbing the
/// row count of a timestep column.
///
/// # Examples
///
/// ```
/// use ertcore::algorithm::utility::median_finite_abs;
///
/// let column = [-4.0, 2.0, f64::NAN, 8.0];
/// assert_eq!(median_finite_abs(&column), Some(4.0));
/// ```
pub fn median_finite_abs(values: &[f64]) -> Option<f64> {
    let finite: Vec<f64> = values
        .iter()
        .map(|v| v.abs())
        .filter(|v| v.is_finite())
        .collect();
    if finite.is_empty() {
        return None;
    }
    let mut data = Data::new(finite);
    Some(data.median())
}
