use nalgebra::DMatrix;

/// True where a value is non-finite or outside `[rmin, rmax]`.
pub fn outside_or_nonfinite(values: &DMatrix<f64>, rmin: f64, rmax: f64) -> DMatrix<bool> {
    values.map(|v| !v.is_finite() || v < rmin || v > rmax)
}

/// True where the relative error exceeds `emax`.
pub fn error_exceeds(errors: &DMatrix<f64>, emax: f64) -> DMatrix<bool> {
    errors.map(|e| e > emax)
}

/// Element-wise OR of two equally shaped mask matrices.
pub fn or(a: &DMatrix<bool>, b: &DMatrix<bool>) -> DMatrix<bool> {
    a.zip_map(b, |x, y| x || y)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outside_or_nonfinite() {
        let values = DMatrix::from_row_slice(2, 3, &[0.05, 1.0, f64::NAN, 2.0e6, 50.0, f64::INFINITY]);
        let mask = outside_or_nonfinite(&values, 0.1, 1.0e6);

        assert_eq!(mask[(0, 0)], true); // below rmin
        assert_eq!(mask[(0, 1)], false);
        assert_eq!(mask[(0, 2)], true); // NaN
        assert_eq!(mask[(1, 0)], true); // above rmax
        assert_eq!(mask[(1, 1)], false);
        assert_eq!(mask[(1, 2)], true); // infinite
    }

    #[test]
    fn test_bounds_are_inclusive() {
        let values = DMatrix::from_row_slice(1, 2, &[0.1, 1.0e6]);
        let mask = outside_or_nonfinite(&values, 0.1, 1.0e6);
        assert!(!mask[(0, 0)]);
        assert!(!mask[(0, 1)]);
    }

    #[test]
    fn test_error_exceeds_is_strict() {
        let errors = DMatrix::from_row_slice(1, 3, &[0.02, 0.1, 0.3]);
        let mask = error_exceeds(&errors, 0.1);
        assert_eq!(mask.as_slice(), &[false, false, true]);
    }

    #[test]
    fn test_or_accumulates() {
        let a = DMatrix::from_row_slice(1, 3, &[true, false, false]);
        let b = DMatrix::from_row_slice(1, 3, &[false, false, true]);
        assert_eq!(or(&a, &b).as_slice(), &[true, false, true]);
    }
}
