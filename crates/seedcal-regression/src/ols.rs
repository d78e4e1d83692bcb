use crate::RegressionError;
use nalgebra::DMatrix;

/// Solve `min ‖X·B − Y‖` column-wise for `B` (`p × k`) with a Householder QR.
///
/// Columns of `X` are scaled to unit norm before factorisation; a diagonal entry
/// of `R` whose magnitude falls below `rel_threshold` times the largest one marks
/// the design as rank deficient.
pub(crate) fn solve_least_squares(
    x: DMatrix<f64>,
    y: &DMatrix<f64>,
    rel_threshold: f64,
) -> Result<DMatrix<f64>, RegressionError> {
    let (n, p) = x.shape();
    if y.nrows() != n {
        return Err(RegressionError::LengthMismatch {
            train: n,
            answers: y.nrows(),
        });
    }
    if n < p {
        return Err(RegressionError::NotEnoughSamples {
            samples: n,
            features: p,
        });
    }

    let mut xs = x;
    let mut scale = vec![1.0; p];
    for (j, s) in scale.iter_mut().enumerate() {
        let norm = xs.column(j).norm();
        if !norm.is_finite() || norm <= f64::MIN_POSITIVE {
            return Err(RegressionError::IllConditioned { column: j });
        }
        xs.column_mut(j).scale_mut(1.0 / norm);
        *s = norm;
    }

    let qr = xs.qr();
    let r = qr.r();
    let max_diag = r.diagonal().iter().fold(0.0f64, |m, v| m.max(v.abs()));
    for j in 0..p {
        let d = r[(j, j)].abs();
        if !d.is_finite() || d <= rel_threshold * max_diag {
            return Err(RegressionError::IllConditioned { column: j });
        }
    }

    let qty = qr.q().transpose() * y;
    let mut beta = r
        .solve_upper_triangular(&qty)
        .ok_or(RegressionError::IllConditioned { column: p - 1 })?;

    for (j, s) in scale.iter().enumerate() {
        beta.row_mut(j).scale_mut(1.0 / s);
    }
    Ok(beta)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn recovers_exact_linear_relation() {
        // y = 2 + 3a - b
        let rows = [[1.0, 0.0, 1.0], [1.0, 1.0, 0.0], [1.0, 2.0, 5.0], [1.0, 4.0, 1.0]];
        let x = DMatrix::from_fn(4, 3, |i, j| rows[i][j]);
        let y = DMatrix::from_fn(4, 1, |i, _| 2.0 + 3.0 * rows[i][1] - rows[i][2]);
        let beta = solve_least_squares(x, &y, 1e-10).expect("solvable");
        assert_relative_eq!(beta[(0, 0)], 2.0, epsilon = 1e-9);
        assert_relative_eq!(beta[(1, 0)], 3.0, epsilon = 1e-9);
        assert_relative_eq!(beta[(2, 0)], -1.0, epsilon = 1e-9);
    }

    #[test]
    fn flags_duplicate_columns() {
        let x = DMatrix::from_fn(5, 2, |i, _| i as f64 + 1.0);
        let y = DMatrix::from_fn(5, 1, |i, _| i as f64);
        assert_eq!(
            solve_least_squares(x, &y, 1e-10),
            Err(RegressionError::IllConditioned { column: 1 })
        );
    }

    #[test]
    fn flags_zero_column() {
        let x = DMatrix::from_fn(4, 2, |i, j| if j == 0 { i as f64 } else { 0.0 });
        let y = DMatrix::zeros(4, 1);
        assert_eq!(
            solve_least_squares(x, &y, 1e-10),
            Err(RegressionError::IllConditioned { column: 1 })
        );
    }

    #[test]
    fn underdetermined_is_rejected() {
        let x = DMatrix::from_element(2, 3, 1.0);
        let y = DMatrix::zeros(2, 1);
        assert_eq!(
            solve_least_squares(x, &y, 1e-10),
            Err(RegressionError::NotEnoughSamples {
                samples: 2,
                features: 3
            })
        );
    }
}
