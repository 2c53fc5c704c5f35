pub mod binner;
pub mod motion;
pub mod spectral;
pub mod turbulence;

pub use binner::Binner;
pub use motion::{correct_motion, MotionOptions};
pub use spectral::{calc_freq_axis, FreqUnits, SpectralEstimator};
pub use turbulence::{BinnedTurbulence, TurbulenceAnalyzer, TurbulenceSummary};
