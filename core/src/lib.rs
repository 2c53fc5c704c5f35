//! Coordinate rotation, motion correction and turbulence statistics for
//! acoustic Doppler velocimeters and current profilers.
//!
//! Datasets carry an explicit coordinate-frame tag that the rotation
//! functions advance one link at a time, while binning, spectra and
//! dissipation estimates are plain functions over `ndarray` arrays.

pub mod instrument;
pub mod math;
pub mod prelude;
pub mod processing;
pub mod rotate;
pub mod telemetry;

pub use instrument::{CoordSys, InstrumentGeometry, VelocityDataset};
pub use prelude::{CoreError, CoreResult, ProcessingConfig};
