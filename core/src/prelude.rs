use serde::{Deserialize, Serialize};

use crate::instrument::CoordSys;

/// Window applied to each FFT segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Window {
    None,
    Hann,
}

/// Shared configuration for the rotation, motion and turbulence stages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    /// Samples per ensemble.
    pub n_bin: usize,
    /// FFT length; segments of this size are averaged inside each bin.
    pub n_fft: usize,
    /// Hop between FFT segments. `None` means back-to-back segments.
    pub n_fft_step: Option<usize>,
    pub window: Window,
    /// Accelerometer high-pass cutoff (Hz).
    pub accel_filtfreq: f64,
    /// Cutoff of the second high-pass on integrated velocity (Hz).
    /// Defaults to a third of `accel_filtfreq` when unset.
    pub vel_filtfreq: Option<f64>,
    /// Inertial-subrange fitting range (rad/s).
    pub omega_range_epsilon: [f64; 2],
    /// Structure-function frequency range (Hz).
    pub freq_range: [f64; 2],
    /// Minimum horizontal speed for turbulence intensity (m/s).
    pub itke_thresh: f64,
    pub declination_deg: Option<f64>,
    pub heading_offset_deg: Option<f64>,
    pub to_earth: bool,
    pub separate_probes: bool,
    /// Doppler noise standard deviation per velocity component (m/s).
    pub doppler_noise: Option<[f64; 3]>,
    pub clamp_negative_variance: bool,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            n_bin: 4096,
            n_fft: 4096,
            n_fft_step: None,
            window: Window::Hann,
            accel_filtfreq: 0.0333,
            vel_filtfreq: None,
            omega_range_epsilon: [6.28, 12.57],
            freq_range: [2.0, 4.0],
            itke_thresh: 0.0,
            declination_deg: None,
            heading_offset_deg: None,
            to_earth: true,
            separate_probes: false,
            doppler_noise: None,
            clamp_negative_variance: false,
        }
    }
}

impl ProcessingConfig {
    pub fn validate(&self) -> CoreResult<()> {
        if self.n_bin == 0 || self.n_fft == 0 {
            return Err(CoreError::InvalidInput(
                "n_bin and n_fft must be positive".into(),
            ));
        }
        if self.n_fft > self.n_bin {
            return Err(CoreError::InvalidInput(format!(
                "n_fft ({}) exceeds n_bin ({})",
                self.n_fft, self.n_bin
            )));
        }
        if matches!(self.n_fft_step, Some(0)) {
            return Err(CoreError::InvalidInput("n_fft_step must be positive".into()));
        }
        if !(self.accel_filtfreq > 0.0) {
            return Err(CoreError::InvalidInput(
                "accel_filtfreq must be positive".into(),
            ));
        }
        if let Some(freq) = self.vel_filtfreq {
            if !(freq > 0.0) {
                return Err(CoreError::InvalidInput("vel_filtfreq must be positive".into()));
            }
        }
        for (name, range) in [
            ("omega_range_epsilon", self.omega_range_epsilon),
            ("freq_range", self.freq_range),
        ] {
            if !(range[0] > 0.0 && range[0] < range[1]) {
                return Err(CoreError::InvalidInput(format!(
                    "{} must be increasing and positive, got {:?}",
                    name, range
                )));
            }
        }
        Ok(())
    }

    /// Second high-pass cutoff, falling back to a third of the accelerometer cutoff.
    pub fn vel_filtfreq_or_default(&self) -> f64 {
        self.vel_filtfreq.unwrap_or(self.accel_filtfreq / 3.0)
    }
}

/// A configurable step of the processing chain.
pub trait ProcessingStage {
    type Input: ?Sized;
    type Output;

    fn initialize(&mut self, config: &ProcessingConfig) -> CoreResult<()>;
    fn execute(&mut self, input: &Self::Input) -> CoreResult<Self::Output>;
    fn cleanup(&mut self);
}

/// Common error type for the processing core.
#[derive(thiserror::Error, Debug)]
pub enum CoreError {
    #[error("rotation error: data is in {found} coordinates, expected {expected}")]
    Rotation { expected: CoordSys, found: CoordSys },
    #[error("invalid state: {0}")]
    State(String),
    #[error("missing data: {0} is required")]
    MissingData(&'static str),
    #[error("numerical error: {0}")]
    Numerical(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

pub type CoreResult<T> = Result<T, CoreError>;
