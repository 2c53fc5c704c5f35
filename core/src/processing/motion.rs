//! Removal of platform-motion contamination from velocimeter data.
//!
//! A sensor moving with velocity `V` through still water reports `-V`. The
//! head velocity is estimated from the IMU as a translational part (integrated,
//! high-passed acceleration) plus a rotational part (`omega x r` at the sample
//! volume), and is added back to the measured velocity.

use ndarray::{s, Array2, Array3, ArrayView2, ArrayView3, Axis};

use crate::instrument::{CoordSys, MotionChannels, VelocityDataset};
use crate::math::filter::Butterworth;
use crate::math::matrix::MatrixHelper;
use crate::math::stats::StatsHelper;
use crate::prelude::{CoreError, CoreResult};
use crate::rotate::earth::inst2earth;
use crate::rotate::frame::{beam_transform, inst_to_earth, orientmat};
use crate::telemetry::LogManager;

/// Head velocity estimated from the accelerometer, and the low-frequency
/// acceleration (gravity and sensor bias) removed before integration.
#[derive(Debug, Clone)]
pub struct TranslationalVelocity {
    pub uacc: Array2<f64>,
    pub accel_stable: Array2<f64>,
}

/// Integrate acceleration into head velocity.
///
/// With `orientmat` the acceleration is first rotated into the earth frame and
/// the result is returned in that frame. A `second_highpass_freq` of `None`
/// skips the drift filter on the integrated velocity.
pub fn calc_translational_velocity(
    accel: ArrayView2<f64>,
    sample_rate: f64,
    highpass_freq: f64,
    second_highpass_freq: Option<f64>,
    orientmat: Option<ArrayView3<f64>>,
) -> CoreResult<TranslationalVelocity> {
    if accel.nrows() != 3 {
        return Err(CoreError::InvalidInput(format!(
            "acceleration must have 3 components, got {}",
            accel.nrows()
        )));
    }
    if accel.iter().any(|v| !v.is_finite()) {
        return Err(CoreError::InvalidInput(
            "acceleration contains non-finite samples; fill gaps before integrating".into(),
        ));
    }
    let lowpass = Butterworth::lowpass(highpass_freq, sample_rate)?;
    let drift = second_highpass_freq
        .map(|freq| Butterworth::highpass(freq, sample_rate))
        .transpose()?;

    let accel = match orientmat {
        Some(omat) => MatrixHelper::rotate_series(omat, accel, false)?,
        None => accel.to_owned(),
    };

    let dt = 1.0 / sample_rate;
    let mut uacc = Array2::<f64>::zeros(accel.raw_dim());
    let mut accel_stable = Array2::<f64>::zeros(accel.raw_dim());
    for (component, row) in accel.axis_iter(Axis(0)).enumerate() {
        let stable = lowpass.filtfilt(row);
        let dynamic = &row - &stable;
        let mut velocity = StatsHelper::cumtrapz(dynamic.view(), dt);
        if let Some(filter) = drift.as_ref() {
            velocity = filter.filtfilt(velocity.view());
        }
        uacc.row_mut(component).assign(&velocity);
        accel_stable.row_mut(component).assign(&stable);
    }
    Ok(TranslationalVelocity { uacc, accel_stable })
}

/// Velocity of points rigidly attached to the IMU due to its rotation.
///
/// `offsets` holds one IMU-to-point vector per column (body frame). The result
/// is `[3, M, N]` with `urot = -(offset x angrt) = angrt x offset`, rotated
/// into the earth frame when `orientmat` is given.
pub fn calc_rotational_velocity(
    angrt: ArrayView2<f64>,
    offsets: ArrayView2<f64>,
    orientmat: Option<ArrayView3<f64>>,
) -> CoreResult<Array3<f64>> {
    if angrt.nrows() != 3 || offsets.nrows() != 3 {
        return Err(CoreError::InvalidInput(format!(
            "angular rate {:?} and offsets {:?} must both have 3 rows",
            angrt.shape(),
            offsets.shape()
        )));
    }
    let n = angrt.ncols();
    let probes = offsets.ncols();
    let mut urot = Array3::<f64>::zeros((3, probes, n));

    for (probe, r) in offsets.axis_iter(Axis(1)).enumerate() {
        let mut body = Array2::<f64>::zeros((3, n));
        for (t, w) in angrt.axis_iter(Axis(1)).enumerate() {
            body[[0, t]] = r[2] * w[1] - r[1] * w[2];
            body[[1, t]] = r[0] * w[2] - r[2] * w[0];
            body[[2, t]] = r[1] * w[0] - r[0] * w[1];
        }
        let rotated = match orientmat {
            Some(omat) => MatrixHelper::rotate_series(omat, body.view(), false)?,
            None => body,
        };
        urot.slice_mut(s![.., probe, ..]).assign(&rotated);
    }
    Ok(urot)
}

/// Options for [`correct_motion`].
#[derive(Debug, Clone, Copy)]
pub struct MotionOptions {
    pub accel_filtfreq: f64,
    /// Drift filter on integrated velocity; `None` means a third of `accel_filtfreq`.
    pub vel_filtfreq: Option<f64>,
    pub to_earth: bool,
    pub separate_probes: bool,
}

impl MotionOptions {
    pub fn new(accel_filtfreq: f64) -> Self {
        Self {
            accel_filtfreq,
            vel_filtfreq: None,
            to_earth: true,
            separate_probes: false,
        }
    }
}

/// Remove the IMU-measured platform motion from the velocity of `ds`.
///
/// Requires instrument coordinates and refuses to run twice. On success the
/// dataset holds body-frame (or, with `to_earth`, earth-frame) corrected
/// velocity and the `uraw`/`urot`/`uacc` byproducts in the same frame.
pub fn correct_motion(ds: &mut VelocityDataset, options: MotionOptions) -> CoreResult<()> {
    let logger = LogManager::new("dopplercore::motion");
    if ds.is_motion_corrected() {
        return Err(CoreError::State(
            "motion correction has already been applied".into(),
        ));
    }
    if ds.coord_sys != CoordSys::Instrument {
        return Err(CoreError::State(format!(
            "motion correction requires instrument coordinates, data are in {}",
            ds.coord_sys
        )));
    }
    let accel = ds.accel.as_ref().ok_or(CoreError::MissingData("acceleration"))?;
    let angrt = ds.angrt.as_ref().ok_or(CoreError::MissingData("angular rate"))?;
    let omat = orientmat(ds)?;
    let folded = folded_beam_transform(ds)?;

    let head2body = ds.geometry.inst2head_rotmat.t().to_owned();
    let uraw = head2body.dot(&ds.vel);

    let vel_filtfreq = options
        .vel_filtfreq
        .unwrap_or(options.accel_filtfreq / 3.0);
    let translational = calc_translational_velocity(
        accel.view(),
        ds.fs,
        options.accel_filtfreq,
        Some(vel_filtfreq),
        Some(omat.view()),
    )?;
    let uacc = inst2earth(translational.uacc.view(), omat.view(), true)?;
    let accel_stable = inst2earth(translational.accel_stable.view(), omat.view(), true)?;

    let urot = if options.separate_probes {
        probe_rotational_velocity(ds, angrt.view())?
    } else {
        let offset = ds.geometry.offset_column();
        calc_rotational_velocity(angrt.view(), offset.view(), None)?
            .index_axis(Axis(1), 0)
            .to_owned()
    };

    ds.vel = &uraw + &urot + &uacc;
    ds.motion = Some(MotionChannels {
        uraw,
        urot,
        uacc,
        accel_stable,
    });
    if let Some(transform) = folded {
        ds.geometry.beam2inst = Some(transform);
        ds.geometry.inst2head_rotmat = Array2::eye(3);
    }
    logger.record(&format!(
        "motion corrected {} samples (accel {:.4} Hz, vel {:.4} Hz, separate probes {})",
        ds.len(),
        options.accel_filtfreq,
        vel_filtfreq,
        options.separate_probes
    ));

    if options.to_earth {
        inst_to_earth(ds)?;
    }
    Ok(())
}

/// Rotational correction projected onto each receiver's own beam.
///
/// Returns the body-frame equivalent of the per-beam corrections so that
/// `corrected = uraw + urot + uacc` holds for both code paths.
fn probe_rotational_velocity(ds: &VelocityDataset, angrt: ArrayView2<f64>) -> CoreResult<Array2<f64>> {
    let offsets = ds
        .geometry
        .probe_offsets
        .as_ref()
        .ok_or(CoreError::MissingData("probe offsets"))?;
    let transform = beam_transform(ds)?;
    if transform.shape() != [3, 3] || offsets.ncols() != 3 {
        return Err(CoreError::InvalidInput(format!(
            "probe-wise correction needs a 3x3 beam transform and 3 probes, got {:?} and {}",
            transform.shape(),
            offsets.ncols()
        )));
    }
    let inverse = MatrixHelper::invert(transform.view())?;
    let head = &ds.geometry.inst2head_rotmat;
    let urot_probes = calc_rotational_velocity(angrt, offsets.view(), None)?;

    // Translational motion is common to all receivers, so only the rotational
    // part differs between beams.
    let mut urot_beam = Array2::<f64>::zeros((3, ds.len()));
    for probe in 0..3 {
        let urot_head = head.dot(&urot_probes.index_axis(Axis(1), probe));
        let projected = inverse.dot(&urot_head);
        urot_beam.row_mut(probe).assign(&projected.row(probe));
    }
    Ok(head.t().dot(&transform.dot(&urot_beam)))
}

/// Beam transform with a non-trivial head rotation folded in, for use once the
/// velocity has been moved into the body frame.
///
/// Heads without an explicit transform get the one derived from the beam angle.
fn folded_beam_transform(ds: &VelocityDataset) -> CoreResult<Option<Array2<f64>>> {
    if ds.geometry.inst2head_rotmat == Array2::<f64>::eye(3) {
        return Ok(None);
    }
    let transform = beam_transform(ds)?;
    let mut head2body = Array2::<f64>::eye(transform.nrows());
    head2body
        .slice_mut(s![0..3, 0..3])
        .assign(&ds.geometry.inst2head_rotmat.t());
    Ok(Some(head2body.dot(&transform)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::{InstrumentGeometry, OrientationData};
    use ndarray::{arr2, Array1};
    use std::f64::consts::PI;

    const FS: f64 = 16.0;

    fn identity_orientation(n: usize) -> Array3<f64> {
        let mut omat = Array3::<f64>::zeros((3, 3, n));
        for t in 0..n {
            for i in 0..3 {
                omat[[i, i, t]] = 1.0;
            }
        }
        omat
    }

    /// Still water seen from a head oscillating along x with amplitude `b` (m/s).
    fn oscillating_dataset(n: usize, b: f64, freq: f64) -> VelocityDataset {
        let omega = 2.0 * PI * freq;
        let time = Array1::from_iter((0..n).map(|i| i as f64 / FS));
        let mut vel = Array2::<f64>::zeros((3, n));
        let mut accel = Array2::<f64>::zeros((3, n));
        for (t, &tt) in time.iter().enumerate() {
            vel[[0, t]] = -b * (omega * tt).sin();
            accel[[0, t]] = b * omega * (omega * tt).cos();
            accel[[2, t]] = 9.81;
        }
        VelocityDataset::new(FS, CoordSys::Instrument, vel, InstrumentGeometry::velocimeter([0.0; 3]))
            .unwrap()
            .with_imu(accel, Array2::zeros((3, n)))
            .unwrap()
            .with_orientation(OrientationData::Matrix(identity_orientation(n)))
            .unwrap()
    }

    fn options() -> MotionOptions {
        MotionOptions {
            to_earth: false,
            ..MotionOptions::new(0.1)
        }
    }

    #[test]
    fn zero_offset_has_no_rotational_velocity() {
        let angrt = Array2::from_shape_fn((3, 50), |(c, t)| (c as f64 + 1.0) * (t as f64 * 0.2).sin());
        let offsets = Array2::<f64>::zeros((3, 1));
        let urot = calc_rotational_velocity(angrt.view(), offsets.view(), None).unwrap();
        assert_eq!(urot.shape(), &[3, 1, 50]);
        assert!(urot.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn rotational_velocity_is_omega_cross_offset() {
        let angrt = arr2(&[[1.0], [0.0], [0.0]]);
        let offsets = arr2(&[[0.0, 1.0], [0.0, 0.0], [1.0, 0.0]]);
        let urot = calc_rotational_velocity(angrt.view(), offsets.view(), None).unwrap();
        // rotation about x moves a point on +z towards -y
        assert_eq!(urot[[0, 0, 0]], 0.0);
        assert_eq!(urot[[1, 0, 0]], -1.0);
        assert_eq!(urot[[2, 0, 0]], 0.0);
        // a point on the rotation axis does not move
        assert!(urot.slice(s![.., 1, 0]).iter().all(|&v| v == 0.0));
    }

    #[test]
    fn translational_velocity_recovers_sinusoid_amplitude_and_phase() {
        let n = 16 * 240;
        let freq = 0.5;
        let omega = 2.0 * PI * freq;
        let amplitude = 0.3;
        let mut accel = Array2::<f64>::zeros((3, n));
        for t in 0..n {
            let tt = t as f64 / FS;
            accel[[1, t]] = amplitude * (omega * tt).sin();
            accel[[2, t]] = 9.81 + 0.01;
        }
        let result =
            calc_translational_velocity(accel.view(), FS, 0.1, Some(0.1 / 3.0), None).unwrap();
        for t in n / 4..3 * n / 4 {
            let tt = t as f64 / FS;
            let expected = -amplitude / omega * (omega * tt).cos();
            assert!((result.uacc[[1, t]] - expected).abs() < 0.02 * amplitude / omega);
            assert!(result.uacc[[2, t]].abs() < 1e-6);
            assert!((result.accel_stable[[2, t]] - 9.82).abs() < 1e-6);
        }
    }

    #[test]
    fn cutoff_above_nyquist_is_rejected() {
        let accel = Array2::<f64>::zeros((3, 64));
        let result = calc_translational_velocity(accel.view(), FS, 9.0, None, None);
        assert!(matches!(result, Err(CoreError::Numerical(_))));
    }

    #[test]
    fn correction_removes_head_motion_with_correct_sign() {
        let n = 16 * 240;
        let mut ds = oscillating_dataset(n, 0.2, 0.5);
        correct_motion(&mut ds, options()).unwrap();
        assert_eq!(ds.coord_sys, CoordSys::Instrument);

        let motion = ds.motion.as_ref().unwrap();
        for t in n / 4..3 * n / 4 {
            assert!(ds.vel[[0, t]].abs() < 0.01, "residual {}", ds.vel[[0, t]]);
            // head velocity estimate opposes the apparent flow
            assert!((motion.uacc[[0, t]] + motion.uraw[[0, t]]).abs() < 0.01);
        }
    }

    #[test]
    fn second_correction_is_a_state_error() {
        let mut ds = oscillating_dataset(512, 0.1, 0.5);
        correct_motion(&mut ds, options()).unwrap();
        let err = correct_motion(&mut ds, options()).unwrap_err();
        assert!(matches!(err, CoreError::State(_)));

        let mut earth = oscillating_dataset(512, 0.1, 0.5);
        correct_motion(&mut earth, MotionOptions::new(0.1)).unwrap();
        assert_eq!(earth.coord_sys, CoordSys::Earth);
        assert!(matches!(
            correct_motion(&mut earth, MotionOptions::new(0.1)),
            Err(CoreError::State(_))
        ));
    }

    #[test]
    fn correction_requires_instrument_frame_and_orientation() {
        let mut ds = oscillating_dataset(256, 0.1, 0.5);
        ds.coord_sys = CoordSys::Earth;
        assert!(matches!(correct_motion(&mut ds, options()), Err(CoreError::State(_))));

        let mut ds = oscillating_dataset(256, 0.1, 0.5);
        ds.orientation = None;
        assert!(matches!(
            correct_motion(&mut ds, options()),
            Err(CoreError::MissingData("orientation"))
        ));
        assert!(ds.motion.is_none());
    }

    #[test]
    fn rotation_of_offset_head_is_corrected() {
        let n = 1024;
        let mut ds = oscillating_dataset(n, 0.0, 0.5);
        ds.geometry.inst2head_vec = [0.0, 0.0, -0.6];
        let rate = Array2::from_shape_fn((3, n), |(c, t)| {
            if c == 0 {
                0.05 * (t as f64 * 0.1).sin()
            } else {
                0.0
            }
        });
        ds.angrt = Some(rate.clone());
        // rotation about x of a point at -z: apparent flow is -(omega x r)
        for t in 0..n {
            ds.vel[[1, t]] = -(rate[[0, t]] * 0.6);
        }
        correct_motion(&mut ds, options()).unwrap();
        assert!(ds.vel.row(1).iter().all(|v| v.abs() < 1e-9));
    }

    #[test]
    fn separate_probes_match_combined_estimate_for_colocated_probes() {
        let n = 1024;
        let transform = arr2(&[[1.2, -0.4, 0.1], [0.2, 0.9, -0.3], [0.3, 0.3, 0.5]]);
        let build = |separate: bool| {
            let mut ds = oscillating_dataset(n, 0.05, 0.5);
            ds.geometry.inst2head_vec = [0.1, 0.2, -0.4];
            ds.geometry.beam2inst = Some(transform.clone());
            ds.geometry.probe_offsets = Some(Array2::from_shape_fn((3, 3), |(i, _)| {
                [0.1, 0.2, -0.4][i]
            }));
            ds.angrt = Some(Array2::from_shape_fn((3, n), |(c, t)| {
                0.02 * (c as f64 + 1.0) * (t as f64 * 0.05).cos()
            }));
            correct_motion(
                &mut ds,
                MotionOptions {
                    separate_probes: separate,
                    ..options()
                },
            )
            .unwrap();
            ds
        };
        let combined = build(false);
        let separate = build(true);
        for (a, b) in combined.vel.iter().zip(separate.vel.iter()) {
            assert!((a - b).abs() < 1e-10);
        }
    }

    #[test]
    fn janus_head_rotation_survives_beam_round_trip() {
        let n = 256;
        let vel_beam = Array2::from_shape_fn((4, n), |(b, t)| {
            0.05 * (b as f64 + 1.0) * (t as f64 * 0.3).sin()
        });
        let mut geometry = InstrumentGeometry::new(
            crate::instrument::InstrumentFamily::Rdi,
            crate::instrument::Orientation::Down,
        )
        .with_inst2head_rotmat(arr2(&[[0.0, -1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0]]));
        geometry.beam_angle_deg = 25.0;
        let mut ds = VelocityDataset::new(FS, CoordSys::Beam, vel_beam.clone(), geometry)
            .unwrap()
            .with_imu(Array2::zeros((3, n)), Array2::zeros((3, n)))
            .unwrap()
            .with_orientation(OrientationData::Matrix(identity_orientation(n)))
            .unwrap();

        crate::rotate::frame::beam_to_inst(&mut ds).unwrap();
        let head_frame = ds.vel.clone();
        correct_motion(&mut ds, options()).unwrap();
        assert!(ds.geometry.beam2inst.is_some());
        // body x is head y after a 90 degree turn about z
        for t in 0..n {
            assert!((ds.vel[[0, t]] - head_frame[[1, t]]).abs() < 1e-12);
        }

        crate::rotate::frame::inst_to_beam(&mut ds).unwrap();
        for (a, b) in ds.vel.iter().zip(vel_beam.iter()) {
            assert!((a - b).abs() < 1e-9, "{} vs {}", a, b);
        }
    }

    #[test]
    fn separate_probes_reject_four_beam_transform() {
        let mut ds = oscillating_dataset(128, 0.05, 0.5);
        ds.geometry.beam2inst = Some(Array2::eye(4));
        ds.geometry.probe_offsets = Some(Array2::zeros((3, 4)));
        let result = correct_motion(
            &mut ds,
            MotionOptions {
                separate_probes: true,
                ..options()
            },
        );
        assert!(matches!(result, Err(CoreError::InvalidInput(_))));
        assert!(ds.motion.is_none());
    }
}
