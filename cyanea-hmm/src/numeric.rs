//! Numeric primitives shared by every engine.
//!
//! Stateless helpers: in-place normalization (returning the multiplier that
//! the scaled recurrences store as their per-step scaling factor), the
//! floored log transform used before Viterbi, log-likelihood recovery from
//! scaling factors, and the convergence distance used by the trainer.

use cyanea_core::prob::{LogProb, PRECISION};

use crate::matrix::{Matrix, MatrixView, MatrixViewMut};

/// Scale `values` so they sum to one and return the multiplier `1 / sum`.
///
/// A zero sum leaves `values` untouched and returns `+∞`: the row carries no
/// probability mass, and `-ln(+∞)` folds into a log-likelihood of `-∞`.
pub fn normalize(values: &mut [f64]) -> f64 {
    let sum: f64 = values.iter().sum();
    if sum == 0.0 {
        return f64::INFINITY;
    }
    let factor = 1.0 / sum;
    for v in values.iter_mut() {
        *v *= factor;
    }
    factor
}

/// Normalize every row of `matrix` to sum to one.
pub fn normalize_rows(matrix: &mut MatrixViewMut<'_>) {
    for row in matrix.rows_mut() {
        normalize(row);
    }
}

/// Normalize every column of `matrix` to sum to one.
pub fn normalize_columns(matrix: &mut MatrixViewMut<'_>) {
    for j in 0..matrix.cols() {
        let sum: f64 = (0..matrix.rows()).map(|i| matrix.get(i, j)).sum();
        if sum == 0.0 {
            continue;
        }
        let factor = 1.0 / sum;
        for i in 0..matrix.rows() {
            let v = matrix.get(i, j);
            matrix.set(i, j, v * factor);
        }
    }
}

/// Replace each value by its natural log, flooring values below machine
/// epsilon to the most negative finite `f64` (see [`LogProb::floored`]).
pub fn log_transform(values: &mut [f64]) {
    for v in values.iter_mut() {
        *v = LogProb::floored(*v).0;
    }
}

/// `ln(1 / (d₀·d₁·…·dₙ₋₁)) = -Σ ln dₜ`.
///
/// Applied to forward scaling factors this is the sequence log-likelihood.
/// A divisor within machine epsilon of zero returns `f64::MAX`.
pub fn log_of_divisors(divisors: &[f64]) -> f64 {
    let mut acc = 0.0;
    for &d in divisors {
        if d.abs() < PRECISION {
            return f64::MAX;
        }
        acc -= d.ln();
    }
    acc
}

/// Convergence distance between two log-probabilities.
///
/// The values are ordered first, so the result is `higher - lower`. When the
/// lower of the two is numerically zero (both values are at certainty, or
/// one is a log-likelihood that was never computed and the other is above
/// it) the pair is reported as maximally different, `ln(f64::MAX)`.
pub fn log_prob_distance(old: f64, new: f64) -> f64 {
    let (lower, higher) = if old > new { (new, old) } else { (old, new) };
    if lower.abs() < PRECISION {
        return f64::MAX.ln();
    }
    higher - lower
}

/// Transpose a matrix into a new contiguous buffer.
pub fn transpose(matrix: MatrixView<'_>) -> Matrix {
    let (rows, cols) = (matrix.rows(), matrix.cols());
    let mut out = Matrix::zeros(cols, rows);
    let flat = out.as_mut_slice();
    for (i, row) in matrix.iter_rows().enumerate() {
        for (j, &v) in row.iter().enumerate() {
            flat[j * rows + i] = v;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_returns_inverse_sum() {
        let mut v = vec![1.0, 3.0];
        let f = normalize(&mut v);
        assert_eq!(f, 0.25);
        assert_eq!(v, vec![0.25, 0.75]);
    }

    #[test]
    fn normalize_zero_sum_is_untouched() {
        let mut v = vec![0.0, 0.0];
        assert_eq!(normalize(&mut v), f64::INFINITY);
        assert_eq!(v, vec![0.0, 0.0]);
    }

    #[test]
    fn rows_and_columns_normalize() {
        let mut m = Matrix::from_vec(vec![1.0, 1.0, 2.0, 6.0], 2, 2).unwrap();
        normalize_rows(&mut m.view_mut());
        assert_eq!(m.as_slice(), &[0.5, 0.5, 0.25, 0.75]);

        let mut m = Matrix::from_vec(vec![1.0, 1.0, 3.0, 1.0], 2, 2).unwrap();
        normalize_columns(&mut m.view_mut());
        assert_eq!(m.as_slice(), &[0.25, 0.5, 0.75, 0.5]);
    }

    #[test]
    fn log_transform_floors_zeros() {
        let mut v = vec![1.0, 0.5, 0.0, 1e-300];
        log_transform(&mut v);
        assert_eq!(v[0], 0.0);
        assert!((v[1] - 0.5_f64.ln()).abs() < 1e-15);
        assert_eq!(v[2], -f64::MAX);
        assert_eq!(v[3], -f64::MAX);
    }

    #[test]
    fn log_of_divisors_sums_negative_logs() {
        let d = [0.5, 0.25];
        let expected = -(0.5_f64.ln() + 0.25_f64.ln());
        assert!((log_of_divisors(&d) - expected).abs() < 1e-12);
        assert_eq!(log_of_divisors(&[1.0, 1.0, 1.0]), 0.0);
        assert_eq!(log_of_divisors(&[1.0, 0.0]), f64::MAX);
        assert_eq!(log_of_divisors(&[]), 0.0);
    }

    #[test]
    fn distance_is_symmetric() {
        assert!((log_prob_distance(-10.0, -9.5) - 0.5).abs() < 1e-12);
        assert!((log_prob_distance(-9.5, -10.0) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn distance_guards_the_lower_value() {
        // A fresh prior of 0 sits above any real log-likelihood, so the
        // guard looks at the new value.
        assert!((log_prob_distance(0.0, -10.0) - 10.0).abs() < 1e-12);
        assert!((log_prob_distance(0.0, -0.001) - 0.001).abs() < 1e-12);
        assert_eq!(log_prob_distance(0.0, 0.0), f64::MAX.ln());
        assert_eq!(log_prob_distance(0.0, -1e-17), f64::MAX.ln());
    }

    #[test]
    fn transpose_swaps_axes() {
        let m = Matrix::from_vec(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], 2, 3).unwrap();
        let t = transpose(m.view());
        assert_eq!(t.rows(), 3);
        assert_eq!(t.cols(), 2);
        assert_eq!(t.as_slice(), &[1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
    }
}
