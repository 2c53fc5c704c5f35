//! Second-order Butterworth sections and zero-phase (forward-backward) filtering.

use ndarray::{Array1, ArrayView1};
use std::f64::consts::{PI, SQRT_2};

use crate::prelude::{CoreError, CoreResult};

/// Samples of odd reflection added on each end before filtering.
const PAD_LEN: usize = 9;

/// A single biquad, `H(z) = (b0 + b1 z^-1 + b2 z^-2) / (1 + a1 z^-1 + a2 z^-2)`,
/// evaluated in Direct Form II Transposed.
#[derive(Debug, Clone, Copy)]
pub struct Butterworth {
    b: [f64; 3],
    a: [f64; 2],
}

impl Butterworth {
    pub fn lowpass(cutoff_hz: f64, sample_rate: f64) -> CoreResult<Self> {
        let (k, norm) = Self::prewarp(cutoff_hz, sample_rate)?;
        let b0 = k * k * norm;
        Ok(Self {
            b: [b0, 2.0 * b0, b0],
            a: Self::denominator(k, norm),
        })
    }

    pub fn highpass(cutoff_hz: f64, sample_rate: f64) -> CoreResult<Self> {
        let (k, norm) = Self::prewarp(cutoff_hz, sample_rate)?;
        Ok(Self {
            b: [norm, -2.0 * norm, norm],
            a: Self::denominator(k, norm),
        })
    }

    fn prewarp(cutoff_hz: f64, sample_rate: f64) -> CoreResult<(f64, f64)> {
        let nyquist = sample_rate / 2.0;
        if !(cutoff_hz > 0.0 && cutoff_hz < nyquist) {
            return Err(CoreError::Numerical(format!(
                "filter cutoff {} Hz must lie in (0, {}) for a {} Hz signal",
                cutoff_hz, nyquist, sample_rate
            )));
        }
        let k = (PI * cutoff_hz / sample_rate).tan();
        Ok((k, 1.0 / (1.0 + SQRT_2 * k + k * k)))
    }

    fn denominator(k: f64, norm: f64) -> [f64; 2] {
        [2.0 * (k * k - 1.0) * norm, (1.0 - SQRT_2 * k + k * k) * norm]
    }

    pub fn numerator(&self) -> &[f64; 3] {
        &self.b
    }

    pub fn denominator_coeffs(&self) -> &[f64; 2] {
        &self.a
    }

    pub fn dc_gain(&self) -> f64 {
        self.b.iter().sum::<f64>() / (1.0 + self.a[0] + self.a[1])
    }

    fn run(&self, samples: &[f64], initial: f64) -> Vec<f64> {
        let gain = self.dc_gain();
        let mut s1 = (self.b[2] - self.a[1] * gain) * initial;
        let mut s0 = (self.b[1] - self.a[0] * gain) * initial + s1;
        samples
            .iter()
            .map(|&x| {
                let y = self.b[0] * x + s0;
                s0 = self.b[1] * x - self.a[0] * y + s1;
                s1 = self.b[2] * x - self.a[1] * y;
                y
            })
            .collect()
    }

    /// Zero-phase filtering: odd-reflection padding, forward pass, backward pass.
    ///
    /// NaN samples poison the output, so callers fill or reject them first.
    pub fn filtfilt(&self, samples: ArrayView1<f64>) -> Array1<f64> {
        let n = samples.len();
        if n == 0 {
            return Array1::zeros(0);
        }
        let pad = PAD_LEN.min(n - 1);
        let first = samples[0];
        let last = samples[n - 1];

        let mut extended = Vec::with_capacity(n + 2 * pad);
        extended.extend((1..=pad).rev().map(|idx| 2.0 * first - samples[idx]));
        extended.extend(samples.iter().copied());
        extended.extend((1..=pad).map(|idx| 2.0 * last - samples[n - 1 - idx]));

        let forward = self.run(&extended, extended[0]);
        let reversed: Vec<f64> = forward.into_iter().rev().collect();
        let mut backward = self.run(&reversed, reversed[0]);
        backward.reverse();

        Array1::from_iter(backward.into_iter().skip(pad).take(n))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(n: usize, freq: f64, fs: f64) -> Array1<f64> {
        Array1::from_iter((0..n).map(|i| (2.0 * PI * freq * i as f64 / fs).sin()))
    }

    #[test]
    fn cutoff_at_nyquist_is_rejected() {
        assert!(matches!(
            Butterworth::lowpass(8.0, 16.0),
            Err(CoreError::Numerical(_))
        ));
        assert!(Butterworth::highpass(0.0, 16.0).is_err());
    }

    #[test]
    fn lowpass_keeps_dc_and_highpass_removes_it() {
        let lp = Butterworth::lowpass(1.0, 16.0).unwrap();
        let hp = Butterworth::highpass(1.0, 16.0).unwrap();
        assert!((lp.dc_gain() - 1.0).abs() < 1e-12);
        assert!(hp.dc_gain().abs() < 1e-12);

        let constant = Array1::from_elem(64, 3.5);
        let smoothed = lp.filtfilt(constant.view());
        assert!(smoothed.iter().all(|v| (v - 3.5).abs() < 1e-9));
        let removed = hp.filtfilt(constant.view());
        assert!(removed.iter().all(|v| v.abs() < 1e-9));
    }

    #[test]
    fn filtfilt_preserves_phase_of_passband_tone() {
        let fs = 32.0;
        let signal = sine(2048, 0.5, fs);
        let filtered = Butterworth::lowpass(4.0, fs).unwrap().filtfilt(signal.view());
        for idx in 512..1536 {
            assert!((filtered[idx] - signal[idx]).abs() < 1e-3);
        }
    }

    #[test]
    fn filtfilt_attenuates_stopband_tone() {
        let fs = 32.0;
        let signal = sine(2048, 8.0, fs);
        let filtered = Butterworth::lowpass(0.5, fs).unwrap().filtfilt(signal.view());
        let peak = filtered
            .slice(ndarray::s![512..1536])
            .iter()
            .fold(0.0_f64, |acc, v| acc.max(v.abs()));
        assert!(peak < 1e-3);
    }
}
