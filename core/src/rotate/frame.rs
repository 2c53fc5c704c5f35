//! Coordinate-frame transitions on a [`VelocityDataset`].
//!
//! Every transition moves exactly one link along
//! `Beam <-> Instrument <-> Earth <-> Principal`. A transition refuses to run
//! when the dataset is not in its source frame, and is a logged no-op when the
//! dataset is already in its destination frame.

use ndarray::{Array2, Array3};

use crate::instrument::{CoordSys, MotionChannels, OrientationData, VelocityDataset};
use crate::prelude::{CoreError, CoreResult};
use crate::rotate::beam::{beam2inst, calc_beam_rotmatrix, inst2beam};
use crate::rotate::earth::{calc_orientmat, declination_matrix, inst2earth, rotate_orientmat};
use crate::rotate::principal::{
    angle_to_heading_deg, calc_principal_angle, earth2principal, heading_deg_to_angle,
};
use crate::telemetry::LogManager;

fn logger() -> LogManager {
    LogManager::new("dopplercore::rotate")
}

fn check_transition(ds: &VelocityDataset, from: CoordSys, to: CoordSys) -> CoreResult<bool> {
    if ds.coord_sys == to {
        logger().warn(&format!("data already in {} coordinates; nothing to do", to));
        return Ok(false);
    }
    if ds.coord_sys != from {
        return Err(CoreError::Rotation {
            expected: from,
            found: ds.coord_sys,
        });
    }
    Ok(true)
}

pub fn beam_transform(ds: &VelocityDataset) -> CoreResult<Array2<f64>> {
    if let Some(transform) = &ds.geometry.beam2inst {
        return Ok(transform.clone());
    }
    let beams = if ds.coord_sys == CoordSys::Beam {
        ds.vel.nrows()
    } else {
        4
    };
    if beams == 4 {
        Ok(calc_beam_rotmatrix(
            ds.geometry.beam_angle_deg,
            ds.geometry.is_convex(),
            true,
        ))
    } else {
        Err(CoreError::MissingData("beam-to-instrument transform"))
    }
}

/// Per-sample instrument-to-earth matrices, including heading offset and
/// declination.
pub fn orientmat(ds: &VelocityDataset) -> CoreResult<Array3<f64>> {
    let orientation = ds
        .orientation
        .as_ref()
        .ok_or(CoreError::MissingData("orientation"))?;
    let heading_offset = ds.heading_offset_deg.unwrap_or(0.0);

    match orientation {
        OrientationData::Matrix(omat) => {
            let mut omat = omat.clone();
            if ds.declination_deg.is_none() {
                logger().warn("no declination set; assuming zero declination");
            }
            if heading_offset != 0.0 {
                rotate_orientmat(&mut omat, declination_matrix(heading_offset).view());
            }
            Ok(omat)
        }
        OrientationData::Euler(angles) => {
            let declination = ds.declination_deg.unwrap_or_else(|| {
                logger().warn("no declination set; assuming zero declination");
                0.0
            });
            calc_orientmat(
                angles,
                ds.geometry.family,
                ds.geometry.orientation,
                declination,
                heading_offset,
            )
        }
    }
}

fn rotate_motion<F>(motion: &mut MotionChannels, rotate: F) -> CoreResult<()>
where
    F: Fn(&Array2<f64>) -> CoreResult<Array2<f64>>,
{
    motion.uraw = rotate(&motion.uraw)?;
    motion.urot = rotate(&motion.urot)?;
    motion.uacc = rotate(&motion.uacc)?;
    motion.accel_stable = rotate(&motion.accel_stable)?;
    Ok(())
}

pub fn beam_to_inst(ds: &mut VelocityDataset) -> CoreResult<()> {
    if !check_transition(ds, CoordSys::Beam, CoordSys::Instrument)? {
        return Ok(());
    }
    let transform = beam_transform(ds)?;
    let (vel, err_vel) = beam2inst(ds.vel.view(), transform.view())?;
    ds.vel = vel;
    ds.err_vel = err_vel;
    ds.coord_sys = CoordSys::Instrument;
    Ok(())
}

/// Rotate instrument velocity back into beam coordinates.
///
/// Motion byproducts stay in instrument coordinates.
pub fn inst_to_beam(ds: &mut VelocityDataset) -> CoreResult<()> {
    if !check_transition(ds, CoordSys::Instrument, CoordSys::Beam)? {
        return Ok(());
    }
    let transform = beam_transform(ds)?;
    ds.vel = inst2beam(
        ds.vel.view(),
        ds.err_vel.as_ref().map(|err| err.view()),
        transform.view(),
    )?;
    ds.err_vel = None;
    ds.coord_sys = CoordSys::Beam;
    Ok(())
}

fn rotate_inst_earth(ds: &mut VelocityDataset, reverse: bool) -> CoreResult<()> {
    let omat = orientmat(ds)?;
    ds.vel = inst2earth(ds.vel.view(), omat.view(), reverse)?;
    if let Some(motion) = ds.motion.as_mut() {
        rotate_motion(motion, |channel| inst2earth(channel.view(), omat.view(), reverse))?;
    }
    Ok(())
}

pub fn inst_to_earth(ds: &mut VelocityDataset) -> CoreResult<()> {
    if !check_transition(ds, CoordSys::Instrument, CoordSys::Earth)? {
        return Ok(());
    }
    rotate_inst_earth(ds, false)?;
    ds.coord_sys = CoordSys::Earth;
    Ok(())
}

pub fn earth_to_inst(ds: &mut VelocityDataset) -> CoreResult<()> {
    if !check_transition(ds, CoordSys::Earth, CoordSys::Instrument)? {
        return Ok(());
    }
    rotate_inst_earth(ds, true)?;
    ds.coord_sys = CoordSys::Instrument;
    Ok(())
}

/// Rotate earth velocity onto the principal axes.
///
/// The principal heading is computed from the horizontal velocity when the
/// dataset does not carry one yet.
pub fn earth_to_principal(ds: &mut VelocityDataset) -> CoreResult<()> {
    if !check_transition(ds, CoordSys::Earth, CoordSys::Principal)? {
        return Ok(());
    }
    let angle = match ds.principal_heading_deg {
        Some(heading) => heading_deg_to_angle(heading),
        None => {
            let heading =
                angle_to_heading_deg(calc_principal_angle(ds.vel.row(0), ds.vel.row(1))?);
            logger().record(&format!("principal heading {:.2} deg", heading));
            ds.principal_heading_deg = Some(heading);
            heading_deg_to_angle(heading)
        }
    };
    ds.vel = earth2principal(ds.vel.view(), angle, false)?;
    if let Some(motion) = ds.motion.as_mut() {
        rotate_motion(motion, |channel| earth2principal(channel.view(), angle, false))?;
    }
    ds.coord_sys = CoordSys::Principal;
    Ok(())
}

pub fn principal_to_earth(ds: &mut VelocityDataset) -> CoreResult<()> {
    if !check_transition(ds, CoordSys::Principal, CoordSys::Earth)? {
        return Ok(());
    }
    let heading = ds
        .principal_heading_deg
        .ok_or(CoreError::MissingData("principal heading"))?;
    let angle = heading_deg_to_angle(heading);
    ds.vel = earth2principal(ds.vel.view(), angle, true)?;
    if let Some(motion) = ds.motion.as_mut() {
        rotate_motion(motion, |channel| earth2principal(channel.view(), angle, true))?;
    }
    ds.coord_sys = CoordSys::Earth;
    Ok(())
}

/// Walk the frame chain one transition at a time until `target` is reached.
pub fn rotate2(ds: &mut VelocityDataset, target: CoordSys) -> CoreResult<()> {
    if ds.coord_sys == target {
        logger().warn(&format!("data already in {} coordinates; nothing to do", target));
        return Ok(());
    }
    while ds.coord_sys != target {
        let forward = ds.coord_sys < target;
        match (ds.coord_sys, forward) {
            (CoordSys::Beam, true) => beam_to_inst(ds)?,
            (CoordSys::Instrument, true) => inst_to_earth(ds)?,
            (CoordSys::Earth, true) => earth_to_principal(ds)?,
            (CoordSys::Principal, false) => principal_to_earth(ds)?,
            (CoordSys::Earth, false) => earth_to_inst(ds)?,
            (CoordSys::Instrument, false) => inst_to_beam(ds)?,
            (frame, _) => {
                return Err(CoreError::State(format!(
                    "no transition from {} towards {}",
                    frame, target
                )))
            }
        }
    }
    Ok(())
}

/// Apply a magnetic declination (degrees east) to the dataset.
///
/// Orientation matrices are corrected in place exactly once, tracked by
/// `declination_in_orientmat`. Setting the same value again is a no-op; a new
/// value first removes the previous correction. Earth-frame velocity is
/// rotated by the change.
pub fn set_declination(ds: &mut VelocityDataset, declination_deg: f64) -> CoreResult<()> {
    if ds.coord_sys == CoordSys::Principal {
        return Err(CoreError::Rotation {
            expected: CoordSys::Earth,
            found: CoordSys::Principal,
        });
    }
    let previous = ds.declination_deg.unwrap_or(0.0);
    if ds.declination_deg == Some(declination_deg)
        && (ds.declination_in_orientmat || !matches!(ds.orientation, Some(OrientationData::Matrix(_))))
    {
        logger().warn(&format!(
            "declination {} deg already applied; skipping",
            declination_deg
        ));
        return Ok(());
    }

    let already_in_matrix = ds.declination_in_orientmat;
    if let Some(OrientationData::Matrix(omat)) = ds.orientation.as_mut() {
        let delta = if already_in_matrix {
            declination_deg - previous
        } else {
            declination_deg
        };
        rotate_orientmat(omat, declination_matrix(delta).view());
        ds.declination_in_orientmat = true;
    }

    if ds.coord_sys == CoordSys::Earth {
        let change = declination_matrix(declination_deg - previous);
        ds.vel = change.dot(&ds.vel);
        if let Some(motion) = ds.motion.as_mut() {
            rotate_motion(motion, |channel| Ok(change.dot(channel)))?;
        }
    }
    ds.declination_deg = Some(declination_deg);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::{EulerAngles, InstrumentGeometry};
    use ndarray::{Array1, Axis};

    fn euler_dataset(n: usize) -> VelocityDataset {
        let vel = Array2::from_shape_fn((3, n), |(c, t)| {
            (c as f64 + 0.5) * ((t as f64) * 0.4).sin() + 0.1 * c as f64
        });
        let angles = EulerAngles {
            heading: Array1::from_iter((0..n).map(|t| 10.0 + t as f64)),
            pitch: Array1::from_iter((0..n).map(|t| 2.0 - 0.1 * t as f64)),
            roll: Array1::from_iter((0..n).map(|t| -3.0 + 0.2 * t as f64)),
        };
        VelocityDataset::new(8.0, CoordSys::Instrument, vel, InstrumentGeometry::velocimeter([0.0; 3]))
            .unwrap()
            .with_orientation(OrientationData::Euler(angles))
            .unwrap()
    }

    fn matrix_dataset(n: usize) -> VelocityDataset {
        let mut ds = euler_dataset(n);
        ds.declination_deg = Some(0.0);
        let omat = orientmat(&ds).unwrap();
        ds.declination_deg = None;
        ds.orientation = Some(OrientationData::Matrix(omat));
        ds
    }

    fn assert_close(a: &Array2<f64>, b: &Array2<f64>, tol: f64) {
        assert_eq!(a.shape(), b.shape());
        for (x, y) in a.iter().zip(b.iter()) {
            assert!((x - y).abs() < tol, "{} vs {}", x, y);
        }
    }

    #[test]
    fn wrong_source_frame_is_a_rotation_error() {
        let mut ds = euler_dataset(8);
        let err = earth_to_principal(&mut ds).unwrap_err();
        assert!(matches!(
            err,
            CoreError::Rotation {
                expected: CoordSys::Earth,
                found: CoordSys::Instrument
            }
        ));
        assert_eq!(ds.coord_sys, CoordSys::Instrument);
    }

    #[test]
    fn rotation_to_current_frame_is_a_noop() {
        let mut ds = euler_dataset(8);
        let before = ds.vel.clone();
        beam_to_inst(&mut ds).unwrap();
        rotate2(&mut ds, CoordSys::Instrument).unwrap();
        assert_eq!(ds.vel, before);
    }

    #[test]
    fn rotate2_round_trip_through_principal() {
        let mut ds = euler_dataset(64);
        ds.declination_deg = Some(14.0);
        let original = ds.vel.clone();
        rotate2(&mut ds, CoordSys::Principal).unwrap();
        assert_eq!(ds.coord_sys, CoordSys::Principal);
        assert!(ds.principal_heading_deg.is_some());
        rotate2(&mut ds, CoordSys::Instrument).unwrap();
        assert_eq!(ds.coord_sys, CoordSys::Instrument);
        assert_close(&ds.vel, &original, 1e-12);
    }

    #[test]
    fn missing_orientation_is_reported() {
        let mut ds = euler_dataset(4);
        ds.orientation = None;
        assert!(matches!(
            inst_to_earth(&mut ds),
            Err(CoreError::MissingData("orientation"))
        ));
    }

    #[test]
    fn matrix_and_euler_orientation_agree_after_declination() {
        let mut from_euler = euler_dataset(16);
        let mut from_matrix = matrix_dataset(16);
        set_declination(&mut from_euler, 12.5).unwrap();
        set_declination(&mut from_matrix, 12.5).unwrap();
        assert!(from_matrix.declination_in_orientmat);
        inst_to_earth(&mut from_euler).unwrap();
        inst_to_earth(&mut from_matrix).unwrap();
        assert_close(&from_euler.vel, &from_matrix.vel, 1e-12);
    }

    #[test]
    fn declination_is_not_applied_twice_to_orientmat() {
        let mut once = matrix_dataset(16);
        set_declination(&mut once, 9.0).unwrap();
        let mut twice = matrix_dataset(16);
        set_declination(&mut twice, 9.0).unwrap();
        set_declination(&mut twice, 9.0).unwrap();

        let (Some(OrientationData::Matrix(a)), Some(OrientationData::Matrix(b))) =
            (&once.orientation, &twice.orientation)
        else {
            panic!("orientation matrix expected");
        };
        for (x, y) in a.iter().zip(b.iter()) {
            assert!((x - y).abs() < 1e-12);
        }
    }

    #[test]
    fn changing_declination_replaces_previous_value() {
        let mut direct = matrix_dataset(8);
        set_declination(&mut direct, -4.0).unwrap();
        let mut changed = matrix_dataset(8);
        set_declination(&mut changed, 10.0).unwrap();
        set_declination(&mut changed, -4.0).unwrap();
        inst_to_earth(&mut direct).unwrap();
        inst_to_earth(&mut changed).unwrap();
        assert_close(&direct.vel, &changed.vel, 1e-12);
    }

    #[test]
    fn declination_in_earth_frame_rotates_velocity() {
        let mut late = euler_dataset(8);
        inst_to_earth(&mut late).unwrap();
        set_declination(&mut late, 20.0).unwrap();

        let mut early = euler_dataset(8);
        set_declination(&mut early, 20.0).unwrap();
        inst_to_earth(&mut early).unwrap();
        assert_close(&late.vel, &early.vel, 1e-12);
    }

    #[test]
    fn principal_frame_rejects_declination() {
        let mut ds = euler_dataset(32);
        rotate2(&mut ds, CoordSys::Principal).unwrap();
        assert!(set_declination(&mut ds, 3.0).is_err());
    }

    #[test]
    fn four_beam_data_rotates_with_error_velocity() {
        let vel = Array2::from_shape_fn((4, 10), |(b, t)| 0.05 * (b as f64 + 1.0) * (t as f64).cos());
        let mut geometry = InstrumentGeometry::new(
            crate::instrument::InstrumentFamily::Rdi,
            crate::instrument::Orientation::Down,
        );
        geometry.beam_angle_deg = 20.0;
        let mut ds = VelocityDataset::new(2.0, CoordSys::Beam, vel.clone(), geometry).unwrap();
        beam_to_inst(&mut ds).unwrap();
        assert_eq!(ds.vel.nrows(), 3);
        assert_eq!(ds.err_vel.as_ref().map(|e| e.len()), Some(10));
        inst_to_beam(&mut ds).unwrap();
        assert_close(&ds.vel, &vel, 1e-12);
        assert!(ds.err_vel.is_none());
        assert_eq!(ds.vel.len_of(Axis(1)), 10);
    }
}
