pub mod dataset;
pub mod geometry;

pub use dataset::{CoordSys, EulerAngles, MotionChannels, OrientationData, VelocityDataset};
pub use geometry::{BeamPattern, InstrumentFamily, InstrumentGeometry, Orientation};
