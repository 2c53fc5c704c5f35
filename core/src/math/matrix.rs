use nalgebra::DMatrix;
use ndarray::{Array2, ArrayView2, ArrayView3, Axis};

use crate::prelude::{CoreError, CoreResult};

pub struct MatrixHelper;

impl MatrixHelper {
    pub fn multiply(lhs: ArrayView2<f64>, rhs: ArrayView2<f64>) -> Array2<f64> {
        lhs.dot(&rhs)
    }

    pub fn invert(matrix: ArrayView2<f64>) -> CoreResult<Array2<f64>> {
        let n = matrix.nrows();
        if n != matrix.ncols() {
            return Err(CoreError::InvalidInput(format!(
                "cannot invert a non-square {}x{} matrix",
                n,
                matrix.ncols()
            )));
        }
        let dense = DMatrix::from_fn(n, n, |i, j| matrix[[i, j]]);
        let inverse = dense
            .try_inverse()
            .ok_or_else(|| CoreError::Numerical("singular matrix".into()))?;
        Ok(Array2::from_shape_fn((n, n), |(i, j)| inverse[(i, j)]))
    }

    /// Apply a per-sample `[3, 3, N]` rotation to a `[3, N]` vector series.
    ///
    /// With `transpose` the inverse rotation is applied.
    pub fn rotate_series(
        rotations: ArrayView3<f64>,
        vectors: ArrayView2<f64>,
        transpose: bool,
    ) -> CoreResult<Array2<f64>> {
        let shape = rotations.shape();
        if shape[0] != 3 || shape[1] != 3 || vectors.nrows() != 3 || shape[2] != vectors.ncols() {
            return Err(CoreError::InvalidInput(format!(
                "cannot rotate a {:?} series with {:?} matrices",
                vectors.shape(),
                shape
            )));
        }

        let mut out = Array2::<f64>::zeros(vectors.raw_dim());
        for (idx, (rot, vec)) in rotations
            .axis_iter(Axis(2))
            .zip(vectors.axis_iter(Axis(1)))
            .enumerate()
        {
            for i in 0..3 {
                let mut acc = 0.0;
                for j in 0..3 {
                    let r = if transpose { rot[[j, i]] } else { rot[[i, j]] };
                    acc += r * vec[j];
                }
                out[[i, idx]] = acc;
            }
        }
        Ok(out)
    }
}
