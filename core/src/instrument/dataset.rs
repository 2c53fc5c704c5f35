use std::fmt;

use ndarray::{Array1, Array2, Array3};
use serde::{Deserialize, Serialize};

use crate::instrument::geometry::InstrumentGeometry;
use crate::prelude::{CoreError, CoreResult};

/// Coordinate frame a velocity dataset is expressed in.
///
/// The frames form a chain `Beam <-> Instrument <-> Earth <-> Principal`;
/// rotations only ever move one link at a time.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub enum CoordSys {
    Beam,
    Instrument,
    Earth,
    Principal,
}

impl CoordSys {
    pub fn next(self) -> Option<CoordSys> {
        match self {
            CoordSys::Beam => Some(CoordSys::Instrument),
            CoordSys::Instrument => Some(CoordSys::Earth),
            CoordSys::Earth => Some(CoordSys::Principal),
            CoordSys::Principal => None,
        }
    }

    pub fn previous(self) -> Option<CoordSys> {
        match self {
            CoordSys::Beam => None,
            CoordSys::Instrument => Some(CoordSys::Beam),
            CoordSys::Earth => Some(CoordSys::Instrument),
            CoordSys::Principal => Some(CoordSys::Earth),
        }
    }
}

impl fmt::Display for CoordSys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CoordSys::Beam => "beam",
            CoordSys::Instrument => "instrument",
            CoordSys::Earth => "earth",
            CoordSys::Principal => "principal",
        };
        f.write_str(name)
    }
}

/// Heading, pitch and roll in degrees, one value per sample.
#[derive(Debug, Clone)]
pub struct EulerAngles {
    pub heading: Array1<f64>,
    pub pitch: Array1<f64>,
    pub roll: Array1<f64>,
}

impl EulerAngles {
    pub fn len(&self) -> usize {
        self.heading.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heading.is_empty()
    }
}

/// Authoritative orientation record of an instrument.
#[derive(Debug, Clone)]
pub enum OrientationData {
    /// Per-sample instrument-to-earth rotation, shape `[3, 3, N]`.
    Matrix(Array3<f64>),
    Euler(EulerAngles),
}

impl OrientationData {
    pub fn len(&self) -> usize {
        match self {
            OrientationData::Matrix(omat) => omat.shape()[2],
            OrientationData::Euler(angles) => angles.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Byproducts of motion correction, kept in the same frame as `vel`.
#[derive(Debug, Clone)]
pub struct MotionChannels {
    pub uraw: Array2<f64>,
    pub urot: Array2<f64>,
    pub uacc: Array2<f64>,
    pub accel_stable: Array2<f64>,
}

/// Velocity record plus the kinematic channels a rotation or correction needs.
#[derive(Debug, Clone)]
pub struct VelocityDataset {
    pub fs: f64,
    /// Time of the first sample (s).
    pub start_time: f64,
    pub coord_sys: CoordSys,
    /// Velocity, `[3, N]` (or `[4, N]` in beam coordinates for Janus heads).
    pub vel: Array2<f64>,
    /// Error velocity produced by a 4-beam transform.
    pub err_vel: Option<Array1<f64>>,
    pub accel: Option<Array2<f64>>,
    pub angrt: Option<Array2<f64>>,
    pub orientation: Option<OrientationData>,
    pub geometry: InstrumentGeometry,
    pub declination_deg: Option<f64>,
    pub heading_offset_deg: Option<f64>,
    pub declination_in_orientmat: bool,
    pub principal_heading_deg: Option<f64>,
    pub motion: Option<MotionChannels>,
}

impl VelocityDataset {
    pub fn new(
        fs: f64,
        coord_sys: CoordSys,
        vel: Array2<f64>,
        geometry: InstrumentGeometry,
    ) -> CoreResult<Self> {
        if !(fs > 0.0) {
            return Err(CoreError::InvalidInput(format!(
                "sample rate must be positive, got {}",
                fs
            )));
        }
        let rows = vel.nrows();
        let expected_rows = if coord_sys == CoordSys::Beam { 3..=4 } else { 3..=3 };
        if !expected_rows.contains(&rows) {
            return Err(CoreError::InvalidInput(format!(
                "velocity in {} coordinates cannot have {} components",
                coord_sys, rows
            )));
        }
        Ok(Self {
            fs,
            start_time: 0.0,
            coord_sys,
            vel,
            err_vel: None,
            accel: None,
            angrt: None,
            orientation: None,
            geometry,
            declination_deg: None,
            heading_offset_deg: None,
            declination_in_orientmat: false,
            principal_heading_deg: None,
            motion: None,
        })
    }

    pub fn with_start_time(mut self, start_time: f64) -> Self {
        self.start_time = start_time;
        self
    }

    pub fn with_imu(mut self, accel: Array2<f64>, angrt: Array2<f64>) -> CoreResult<Self> {
        self.check_channel("accel", accel.nrows(), accel.ncols())?;
        self.check_channel("angrt", angrt.nrows(), angrt.ncols())?;
        self.accel = Some(accel);
        self.angrt = Some(angrt);
        Ok(self)
    }

    pub fn with_orientation(mut self, orientation: OrientationData) -> CoreResult<Self> {
        if let OrientationData::Matrix(omat) = &orientation {
            if omat.shape()[0] != 3 || omat.shape()[1] != 3 {
                return Err(CoreError::InvalidInput(format!(
                    "orientation matrix must be [3, 3, N], got {:?}",
                    omat.shape()
                )));
            }
        }
        if orientation.len() != self.len() {
            return Err(CoreError::InvalidInput(format!(
                "orientation has {} samples, velocity has {}",
                orientation.len(),
                self.len()
            )));
        }
        self.orientation = Some(orientation);
        Ok(self)
    }

    pub fn with_heading_offset(mut self, heading_offset_deg: f64) -> Self {
        self.heading_offset_deg = Some(heading_offset_deg);
        self
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        self.vel.ncols()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_motion_corrected(&self) -> bool {
        self.motion.is_some()
    }

    /// Sample times (s).
    pub fn time(&self) -> Array1<f64> {
        Array1::from_iter((0..self.len()).map(|idx| self.start_time + idx as f64 / self.fs))
    }

    fn check_channel(&self, name: &str, rows: usize, cols: usize) -> CoreResult<()> {
        if rows != 3 || cols != self.len() {
            return Err(CoreError::InvalidInput(format!(
                "{} must be [3, {}], got [{}, {}]",
                name,
                self.len(),
                rows,
                cols
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::geometry::InstrumentGeometry;

    fn geometry() -> InstrumentGeometry {
        InstrumentGeometry::velocimeter([0.0, 0.0, -0.5])
    }

    #[test]
    fn frame_chain_is_linear() {
        assert_eq!(CoordSys::Beam.next(), Some(CoordSys::Instrument));
        assert_eq!(CoordSys::Principal.next(), None);
        assert_eq!(CoordSys::Earth.previous(), Some(CoordSys::Instrument));
        assert_eq!(CoordSys::Beam.previous(), None);
        assert_eq!(CoordSys::Earth.to_string(), "earth");
    }

    #[test]
    fn dataset_rejects_mismatched_imu_length() {
        let ds = VelocityDataset::new(16.0, CoordSys::Instrument, Array2::zeros((3, 10)), geometry())
            .unwrap();
        let result = ds.with_imu(Array2::zeros((3, 9)), Array2::zeros((3, 10)));
        assert!(matches!(result, Err(CoreError::InvalidInput(_))));
    }

    #[test]
    fn dataset_rejects_four_components_outside_beam_frame() {
        let result = VelocityDataset::new(8.0, CoordSys::Earth, Array2::zeros((4, 10)), geometry());
        assert!(result.is_err());
        assert!(VelocityDataset::new(8.0, CoordSys::Beam, Array2::zeros((4, 10)), geometry()).is_ok());
    }

    #[test]
    fn time_axis_uses_start_time_and_rate() {
        let ds = VelocityDataset::new(4.0, CoordSys::Earth, Array2::zeros((3, 3)), geometry())
            .unwrap()
            .with_start_time(10.0);
        assert_eq!(ds.time().to_vec(), vec![10.0, 10.25, 10.5]);
    }
}
