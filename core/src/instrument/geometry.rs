use ndarray::{arr2, Array2};
use serde::{Deserialize, Serialize};

/// Instrument family; selects the heading and roll conventions.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum InstrumentFamily {
    /// Teledyne RDI profilers: heading references the y axis.
    Rdi,
    /// Nortek velocimeters and profilers: heading references the x axis.
    Nortek,
}

/// Beam layout of a Janus head.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum BeamPattern {
    Convex,
    Concave,
}

/// Which way the transducer head points.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Orientation {
    Up,
    Down,
}

impl InstrumentFamily {
    /// Whether roll must be offset by pi before the orientation matrix is built.
    ///
    /// RDI reports roll relative to a down-looking head, Nortek relative to an
    /// up-looking one.
    pub fn flips_roll(&self, orientation: Orientation) -> bool {
        match self {
            InstrumentFamily::Rdi => orientation == Orientation::Up,
            InstrumentFamily::Nortek => orientation == Orientation::Down,
        }
    }
}

/// Per-deployment configuration consumed by rotation and motion routines.
#[derive(Debug, Clone)]
pub struct InstrumentGeometry {
    pub family: InstrumentFamily,
    pub beam_angle_deg: f64,
    pub beam_pattern: BeamPattern,
    pub orientation: Orientation,
    /// Rotation from the body (IMU) frame to the head frame.
    pub inst2head_rotmat: Array2<f64>,
    /// Vector from the IMU reference point to the sample volume, body frame (m).
    pub inst2head_vec: [f64; 3],
    /// Explicit beam-to-instrument transform; derived from the beam angle when unset.
    pub beam2inst: Option<Array2<f64>>,
    /// Per-receiver sample-volume positions (3 x M, body frame) for probe-wise correction.
    pub probe_offsets: Option<Array2<f64>>,
}

impl InstrumentGeometry {
    pub fn new(family: InstrumentFamily, orientation: Orientation) -> Self {
        Self {
            family,
            beam_angle_deg: 20.0,
            beam_pattern: BeamPattern::Convex,
            orientation,
            inst2head_rotmat: Array2::eye(3),
            inst2head_vec: [0.0; 3],
            beam2inst: None,
            probe_offsets: None,
        }
    }

    /// Geometry of a down-looking velocimeter with the head rigidly aligned to the body.
    pub fn velocimeter(inst2head_vec: [f64; 3]) -> Self {
        Self {
            inst2head_vec,
            ..Self::new(InstrumentFamily::Nortek, Orientation::Down)
        }
    }

    pub fn with_beam2inst(mut self, transform: Array2<f64>) -> Self {
        self.beam2inst = Some(transform);
        self
    }

    pub fn with_inst2head_rotmat(mut self, rotmat: Array2<f64>) -> Self {
        self.inst2head_rotmat = rotmat;
        self
    }

    pub fn with_probe_offsets(mut self, offsets: Array2<f64>) -> Self {
        self.probe_offsets = Some(offsets);
        self
    }

    pub fn is_convex(&self) -> bool {
        self.beam_pattern == BeamPattern::Convex
    }

    /// The IMU-to-sample-volume vector as a 3 x 1 column.
    pub fn offset_column(&self) -> Array2<f64> {
        arr2(&[
            [self.inst2head_vec[0]],
            [self.inst2head_vec[1]],
            [self.inst2head_vec[2]],
        ])
    }
}
