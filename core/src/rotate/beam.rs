use ndarray::{arr2, s, Array1, Array2, ArrayView1, ArrayView2};

use crate::math::matrix::MatrixHelper;
use crate::prelude::{CoreError, CoreResult};

/// Beam-to-instrument transform of a four-beam Janus head.
///
/// Rows produce `u`, `v`, `w` and the error velocity. `theta` is the beam
/// angle from the instrument axis.
pub fn calc_beam_rotmatrix(theta: f64, convex: bool, degrees: bool) -> Array2<f64> {
    let theta = if degrees { theta.to_radians() } else { theta };
    let c = if convex { 1.0 } else { -1.0 };
    let a = 1.0 / (2.0 * theta.sin());
    let b = 1.0 / (4.0 * theta.cos());
    let d = a / std::f64::consts::SQRT_2;
    arr2(&[
        [c * a, -c * a, 0.0, 0.0],
        [0.0, 0.0, -c * a, c * a],
        [b, b, b, b],
        [d, d, -d, -d],
    ])
}

fn check_square(rotmat: &ArrayView2<f64>, rows: usize) -> CoreResult<()> {
    let size = rotmat.nrows();
    if size != rotmat.ncols() || !(size == 3 || size == 4) {
        return Err(CoreError::InvalidInput(format!(
            "beam transform must be 3x3 or 4x4, got {:?}",
            rotmat.shape()
        )));
    }
    if rows != size {
        return Err(CoreError::InvalidInput(format!(
            "{} beams cannot be used with a {}x{} transform",
            rows, size, size
        )));
    }
    Ok(())
}

/// Rotate beam velocities into the instrument frame.
///
/// Returns the `[3, N]` instrument velocity and, for four-beam transforms,
/// the error velocity.
pub fn beam2inst(
    vel_beam: ArrayView2<f64>,
    rotmat: ArrayView2<f64>,
) -> CoreResult<(Array2<f64>, Option<Array1<f64>>)> {
    check_square(&rotmat, vel_beam.nrows())?;
    let rotated = MatrixHelper::multiply(rotmat, vel_beam);
    let vel_inst = rotated.slice(s![0..3, ..]).to_owned();
    let err_vel = (rotated.nrows() == 4).then(|| rotated.row(3).to_owned());
    Ok((vel_inst, err_vel))
}

/// Inverse of [`beam2inst`]. A missing error velocity is taken as zero.
pub fn inst2beam(
    vel_inst: ArrayView2<f64>,
    err_vel: Option<ArrayView1<f64>>,
    rotmat: ArrayView2<f64>,
) -> CoreResult<Array2<f64>> {
    if vel_inst.nrows() != 3 {
        return Err(CoreError::InvalidInput(format!(
            "instrument velocity must have 3 components, got {}",
            vel_inst.nrows()
        )));
    }
    let size = rotmat.nrows();
    check_square(&rotmat, size)?;
    let n = vel_inst.ncols();

    let mut stacked = Array2::<f64>::zeros((size, n));
    stacked.slice_mut(s![0..3, ..]).assign(&vel_inst);
    if size == 4 {
        if let Some(err) = err_vel {
            if err.len() != n {
                return Err(CoreError::InvalidInput(format!(
                    "error velocity has {} samples, expected {}",
                    err.len(),
                    n
                )));
            }
            stacked.row_mut(3).assign(&err);
        }
    }

    let inverse = MatrixHelper::invert(rotmat)?;
    Ok(MatrixHelper::multiply(inverse.view(), stacked.view()))
}
