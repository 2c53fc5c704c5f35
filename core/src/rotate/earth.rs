use ndarray::{arr2, Array2, Array3, ArrayView2, ArrayView3, Axis};

use crate::instrument::{EulerAngles, InstrumentFamily, Orientation};
use crate::math::matrix::MatrixHelper;
use crate::prelude::{CoreError, CoreResult};

/// Horizontal rotation that turns magnetic-referenced earth axes into true ones,
/// for a declination in degrees east.
pub fn declination_matrix(declination_deg: f64) -> Array2<f64> {
    let (sd, cd) = declination_deg.to_radians().sin_cos();
    arr2(&[[cd, sd, 0.0], [-sd, cd, 0.0], [0.0, 0.0, 1.0]])
}

/// Build the per-sample instrument-to-earth matrices from heading, pitch and
/// roll (degrees).
///
/// Declination and heading offset are added to heading before the matrix is
/// formed.
pub fn calc_orientmat(
    angles: &EulerAngles,
    family: InstrumentFamily,
    orientation: Orientation,
    declination_deg: f64,
    heading_offset_deg: f64,
) -> CoreResult<Array3<f64>> {
    let n = angles.len();
    if angles.pitch.len() != n || angles.roll.len() != n {
        return Err(CoreError::InvalidInput(format!(
            "heading/pitch/roll lengths differ: {}/{}/{}",
            n,
            angles.pitch.len(),
            angles.roll.len()
        )));
    }
    let flip_roll = family.flips_roll(orientation);
    let mut omat = Array3::<f64>::zeros((3, 3, n));

    for (t, mut m) in omat.axis_iter_mut(Axis(2)).enumerate() {
        let heading = (angles.heading[t] + declination_deg + heading_offset_deg).to_radians();
        let mut roll = angles.roll[t].to_radians();
        let mut pitch = angles.pitch[t].to_radians();

        match family {
            InstrumentFamily::Rdi => {
                // Reported pitch is a gimbal angle; convert it to a tilt using raw roll.
                pitch = (pitch.tan() * roll.cos()).atan();
                if flip_roll {
                    roll += std::f64::consts::PI;
                }
                let (sh, ch) = heading.sin_cos();
                let (sp, cp) = pitch.sin_cos();
                let (sr, cr) = roll.sin_cos();
                m[[0, 0]] = ch * cr + sh * sp * sr;
                m[[0, 1]] = sh * cp;
                m[[0, 2]] = ch * sr - sh * sp * cr;
                m[[1, 0]] = -sh * cr + ch * sp * sr;
                m[[1, 1]] = ch * cp;
                m[[1, 2]] = -sh * sr - ch * sp * cr;
                m[[2, 0]] = -cp * sr;
                m[[2, 1]] = sp;
                m[[2, 2]] = cp * cr;
            }
            InstrumentFamily::Nortek => {
                if flip_roll {
                    roll += std::f64::consts::PI;
                }
                // Heading is measured clockwise from north to the x axis.
                let (sh, ch) = (std::f64::consts::FRAC_PI_2 - heading).sin_cos();
                let (sp, cp) = pitch.sin_cos();
                let (sr, cr) = roll.sin_cos();
                m[[0, 0]] = ch * cp;
                m[[0, 1]] = -ch * sp * sr - sh * cr;
                m[[0, 2]] = -ch * cr * sp + sh * sr;
                m[[1, 0]] = sh * cp;
                m[[1, 1]] = -sh * sp * sr + ch * cr;
                m[[1, 2]] = -sh * cr * sp - ch * sr;
                m[[2, 0]] = sp;
                m[[2, 1]] = sr * cp;
                m[[2, 2]] = cp * cr;
            }
        }
    }
    Ok(omat)
}

pub fn rotate_orientmat(omat: &mut Array3<f64>, rotation: ArrayView2<f64>) {
    for mut m in omat.axis_iter_mut(Axis(2)) {
        let rotated = rotation.dot(&m);
        m.assign(&rotated);
    }
}

/// Rotate `[3, N]` instrument velocity into the earth frame, or back with `reverse`.
pub fn inst2earth(
    vel: ArrayView2<f64>,
    orientmat: ArrayView3<f64>,
    reverse: bool,
) -> CoreResult<Array2<f64>> {
    MatrixHelper::rotate_series(orientmat, vel, reverse)
}

pub fn inst2earth_euler(
    vel: ArrayView2<f64>,
    angles: &EulerAngles,
    family: InstrumentFamily,
    orientation: Orientation,
    declination_deg: Option<f64>,
    heading_offset_deg: Option<f64>,
    reverse: bool,
) -> CoreResult<Array2<f64>> {
    let omat = calc_orientmat(
        angles,
        family,
        orientation,
        declination_deg.unwrap_or(0.0),
        heading_offset_deg.unwrap_or(0.0),
    )?;
    inst2earth(vel, omat.view(), reverse)
}
