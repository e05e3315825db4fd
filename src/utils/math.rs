use ndarray::{s, Array2, ArrayView1, ArrayView2, ArrayViewMut1, ArrayViewMut2, Axis, Zip};
use ndarray::linalg::general_mat_vec_mul;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MathError {
    #[error("Dimension mismatch in {context}: expected {expected:?}, got {actual:?}")]
    DimensionMismatch {
        context: &'static str,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },
    #[error("Index {index} out of range for {context} of length {len}")]
    IndexOutOfRange {
        context: &'static str,
        index: usize,
        len: usize,
    },
}

fn ensure_same_shape(
    context: &'static str,
    expected: &[usize],
    actual: &[usize],
) -> Result<(), MathError> {
    if expected != actual {
        return Err(MathError::DimensionMismatch {
            context,
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        });
    }
    Ok(())
}

/// Zero-copy view of row `index`.
pub fn row(matrix: ArrayView2<'_, f32>, index: usize) -> Result<ArrayView1<'_, f32>, MathError> {
    if index >= matrix.nrows() {
        return Err(MathError::IndexOutOfRange {
            context: "matrix rows",
            index,
            len: matrix.nrows(),
        });
    }
    Ok(matrix.index_axis_move(Axis(0), index))
}

/// Zero-copy view of column `index`.
pub fn column(
    matrix: ArrayView2<'_, f32>,
    index: usize,
) -> Result<ArrayView1<'_, f32>, MathError> {
    if index >= matrix.ncols() {
        return Err(MathError::IndexOutOfRange {
            context: "matrix columns",
            index,
            len: matrix.ncols(),
        });
    }
    Ok(matrix.index_axis_move(Axis(1), index))
}

/// Dot product of two vectors of equal length
pub fn dot(a: ArrayView1<f32>, b: ArrayView1<f32>) -> Result<f32, MathError> {
    ensure_same_shape("dot product", &[a.len()], &[b.len()])?;
    Ok(a.dot(&b))
}

/// Matrix-vector product written into `out`, which must have `matrix.nrows()` entries.
pub fn matvec_into(
    matrix: ArrayView2<f32>,
    x: ArrayView1<f32>,
    mut out: ArrayViewMut1<f32>,
) -> Result<(), MathError> {
    ensure_same_shape("matrix-vector product", &[matrix.ncols()], &[x.len()])?;
    ensure_same_shape("matrix-vector output", &[matrix.nrows()], &[out.len()])?;
    general_mat_vec_mul(1.0, &matrix, &x, 0.0, &mut out);
    Ok(())
}

/// Elementwise `a - b`
pub fn sub(a: ArrayView2<f32>, b: ArrayView2<f32>) -> Result<Array2<f32>, MathError> {
    ensure_same_shape("elementwise subtract", a.shape(), b.shape())?;
    Ok(&a - &b)
}

/// Adds `b` into `a` in place
pub fn add_assign(mut a: ArrayViewMut2<f32>, b: ArrayView2<f32>) -> Result<(), MathError> {
    ensure_same_shape("elementwise add", a.shape(), b.shape())?;
    a += &b;
    Ok(())
}

/// Masks every entry after `position` in a score row.
fn mask_future_positions(mut scores: ArrayViewMut1<f32>, position: usize) {
    let start = (position + 1).min(scores.len());
    scores.slice_mut(s![start..]).fill(f32::NEG_INFINITY);
}

/// Applies causal mask to attention scores (upper triangle set to -inf).
///
/// Entries are overwritten rather than multiplied so that a zero score never
/// turns into `0 * -inf = NaN`.
pub fn apply_causal_mask(mut scores: ArrayViewMut2<f32>) {
    Zip::indexed(scores.rows_mut()).par_for_each(|i, row| mask_future_positions(row, i));
}

/// Numerically stable softmax over a single row, in place.
///
/// The maximum finite entry is subtracted before exponentiating and `-inf`
/// entries come out as exactly `0.0`. Scores that overflowed to `+inf` share
/// the whole mass equally. Returns `false` when the row held neither a finite
/// score nor `+inf`; such a row is zero-filled instead of becoming NaN.
pub fn softmax_in_place(mut row: ArrayViewMut1<f32>) -> bool {
    let saturated = row.iter().filter(|&&x| x == f32::INFINITY).count();
    if saturated > 0 {
        let share = 1.0 / saturated as f32;
        row.mapv_inplace(|x| if x == f32::INFINITY { share } else { 0.0 });
        return true;
    }

    let max = row.fold(f32::NEG_INFINITY, |acc, &x| {
        if x.is_finite() {
            acc.max(x)
        } else {
            acc
        }
    });

    if max == f32::NEG_INFINITY {
        row.fill(0.0);
        return false;
    }

    let mut sum = 0.0f32;
    for val in row.iter_mut() {
        *val = if *val == f32::NEG_INFINITY {
            0.0
        } else {
            (*val - max).exp()
        };
        sum += *val;
    }

    // sum >= 1 here: the max entry contributes exp(0)
    row.mapv_inplace(|x| x / sum);
    true
}

/// Computes softmax along every row of a 2D array, one row per task.
///
/// Returns the number of rows that had no usable score.
pub fn softmax_rows(mut matrix: ArrayViewMut2<f32>) -> usize {
    Zip::from(matrix.rows_mut())
        .par_map_collect(softmax_in_place)
        .iter()
        .filter(|&&normalized| !normalized)
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{array, Array1};

    #[test]
    fn test_row_and_column_share_storage() {
        let m = array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]];

        let r = row(m.view(), 1).unwrap();
        assert_eq!(r, array![4.0, 5.0, 6.0]);
        assert_eq!(r.as_ptr(), &m[[1, 0]] as *const f32);

        let c = column(m.view(), 2).unwrap();
        assert_eq!(c, array![3.0, 6.0]);
        assert_eq!(c.as_ptr(), &m[[0, 2]] as *const f32);
    }

    #[test]
    fn test_row_out_of_range() {
        let m = Array2::<f32>::zeros((2, 3));
        let err = row(m.view(), 2).unwrap_err();
        assert_eq!(
            err,
            MathError::IndexOutOfRange {
                context: "matrix rows",
                index: 2,
                len: 2
            }
        );
        assert!(matches!(
            column(m.view(), 3),
            Err(MathError::IndexOutOfRange { index: 3, len: 3, .. })
        ));
    }

    #[test]
    fn test_dot_product() {
        let a = array![1.0, 2.0, 3.0];
        let b = array![4.0, -5.0, 6.0];
        assert_abs_diff_eq!(dot(a.view(), b.view()).unwrap(), 12.0, epsilon = 1e-6);
    }

    #[test]
    fn test_dot_length_mismatch() {
        let a = array![1.0, 2.0, 3.0];
        let b = array![1.0, 2.0];
        let err = dot(a.view(), b.view()).unwrap_err();
        assert_eq!(
            err,
            MathError::DimensionMismatch {
                context: "dot product",
                expected: vec![3],
                actual: vec![2]
            }
        );
    }

    #[test]
    fn test_matvec_into_known_values() {
        let m = array![[1.0, 2.0], [0.0, 1.0], [-1.0, 0.0]];
        let x = array![2.0, 3.0];
        let mut out = Array1::from_elem(3, f32::NAN);
        matvec_into(m.view(), x.view(), out.view_mut()).unwrap();
        assert_eq!(out, array![8.0, 3.0, -2.0]);
    }

    #[test]
    fn test_matvec_into_shape_checks() {
        let m = Array2::<f32>::zeros((3, 2));
        let mut out = Array1::<f32>::zeros(3);
        assert!(matches!(
            matvec_into(m.view(), Array1::<f32>::zeros(3).view(), out.view_mut()),
            Err(MathError::DimensionMismatch {
                context: "matrix-vector product",
                ..
            })
        ));

        let mut out = Array1::<f32>::zeros(2);
        assert!(matches!(
            matvec_into(m.view(), Array1::<f32>::zeros(2).view(), out.view_mut()),
            Err(MathError::DimensionMismatch {
                context: "matrix-vector output",
                ..
            })
        ));
    }

    #[test]
    fn test_add_assign_sub_and_mismatch() {
        let a = array![[1.0, 2.0], [3.0, 4.0]];
        let b = array![[0.5, 0.5], [1.0, -1.0]];
        assert_eq!(sub(a.view(), b.view()).unwrap(), array![[0.5, 1.5], [2.0, 5.0]]);

        let mut acc = a.clone();
        add_assign(acc.view_mut(), b.view()).unwrap();
        assert_eq!(acc, array![[1.5, 2.5], [4.0, 3.0]]);

        let wide = Array2::<f32>::zeros((2, 3));
        assert_eq!(
            sub(a.view(), wide.view()).unwrap_err(),
            MathError::DimensionMismatch {
                context: "elementwise subtract",
                expected: vec![2, 2],
                actual: vec![2, 3]
            }
        );
        assert!(add_assign(acc.view_mut(), wide.view()).is_err());
        assert_eq!(acc, array![[1.5, 2.5], [4.0, 3.0]]);
    }

    #[test]
    fn test_softmax_masks_negative_infinity_to_zero() {
        let mut scores = array![0.5, f32::NEG_INFINITY, 1.5, f32::NEG_INFINITY];
        assert!(softmax_in_place(scores.view_mut()));

        assert_eq!(scores[1], 0.0);
        assert_eq!(scores[3], 0.0);
        assert!(scores.iter().all(|p| p.is_finite()));
        assert_abs_diff_eq!(scores.sum(), 1.0, epsilon = 1e-6);
        assert!(scores[2] > scores[0]);
    }

    #[test]
    fn test_softmax_large_scores_are_stable() {
        let mut scores = array![10_000.0, 10_000.0, -10_000.0];
        assert!(softmax_in_place(scores.view_mut()));
        assert_abs_diff_eq!(scores[0], 0.5, epsilon = 1e-6);
        assert_abs_diff_eq!(scores[1], 0.5, epsilon = 1e-6);
        assert_eq!(scores[2], 0.0);
    }

    #[test]
    fn test_softmax_row_without_finite_scores() {
        let mut scores = array![f32::NEG_INFINITY, f32::NEG_INFINITY];
        assert!(!softmax_in_place(scores.view_mut()));
        assert_eq!(scores, array![0.0, 0.0]);
    }

    #[test]
    fn test_softmax_overflowed_scores_share_mass() {
        let mut scores = array![f32::INFINITY, 0.0];
        assert!(softmax_in_place(scores.view_mut()));
        assert_eq!(scores, array![1.0, 0.0]);

        let mut scores = array![f32::INFINITY, 3.0, f32::NEG_INFINITY, f32::INFINITY];
        assert!(softmax_in_place(scores.view_mut()));
        assert_eq!(scores, array![0.5, 0.0, 0.0, 0.5]);
    }

    #[test]
    fn test_causal_mask_and_softmax_rows() {
        let mut scores = Array2::<f32>::zeros((3, 3));
        apply_causal_mask(scores.view_mut());
        assert_eq!(scores[[0, 0]], 0.0);
        assert_eq!(scores[[2, 1]], 0.0);
        assert_eq!(scores[[0, 1]], f32::NEG_INFINITY);
        assert_eq!(scores[[1, 2]], f32::NEG_INFINITY);

        assert_eq!(softmax_rows(scores.view_mut()), 0);
        for (i, row) in scores.rows().into_iter().enumerate() {
            assert_abs_diff_eq!(row.sum(), 1.0, epsilon = 1e-6);
            for j in 0..3 {
                if j > i {
                    assert_eq!(row[j], 0.0);
                } else {
                    assert_abs_diff_eq!(row[j], 1.0 / (i + 1) as f32, epsilon = 1e-6);
                }
            }
        }
    }

    #[test]
    fn test_softmax_rows_counts_rows_without_scores() {
        let mut scores = array![
            [1.0, f32::NEG_INFINITY],
            [f32::NEG_INFINITY, f32::NEG_INFINITY],
            [f32::INFINITY, 2.0]
        ];
        assert_eq!(softmax_rows(scores.view_mut()), 1);
        assert_eq!(scores, array![[1.0, 0.0], [0.0, 0.0], [1.0, 0.0]]);
    }

    #[test]
    fn test_mask_future_positions_at_end_of_row() {
        let mut scores = array![1.0, 2.0];
        mask_future_positions(scores.view_mut(), 1);
        assert_eq!(scores, array![1.0, 2.0]);
        mask_future_positions(scores.view_mut(), 5);
        assert_eq!(scores, array![1.0, 2.0]);
        mask_future_positions(scores.view_mut(), 0);
        assert_eq!(scores, array![1.0, f32::NEG_INFINITY]);
    }
}
