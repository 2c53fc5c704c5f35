pub mod fft;
pub mod filter;
pub mod matrix;
pub mod stats;

pub use fft::FftHelper;
pub use filter::Butterworth;
pub use matrix::MatrixHelper;
pub use stats::StatsHelper;
