use std::f64::consts::PI;

use ndarray::{Array1, Array2, Array3, ArrayView1, ArrayView2, ArrayView3, Axis};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use crate::math::fft::FftHelper;
use crate::math::stats::StatsHelper;
use crate::prelude::{CoreError, CoreResult, Window};

/// Units of a frequency axis and of the matching spectral density.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum FreqUnits {
    Hz,
    RadPerSec,
}

impl FreqUnits {
    fn scale(self) -> f64 {
        match self {
            FreqUnits::Hz => 1.0,
            FreqUnits::RadPerSec => 2.0 * PI,
        }
    }
}

/// Positive frequencies from the fundamental up to Nyquist, `n_fft / 2` values.
pub fn calc_freq_axis(n_fft: usize, sample_rate: f64, units: FreqUnits) -> Array1<f64> {
    let df = sample_rate / n_fft as f64 * units.scale();
    Array1::from_iter((1..=n_fft / 2).map(|k| k as f64 * df))
}

/// White-noise standard deviation implied by the spectral plateau above
/// `pct_fn` of the highest frequency, one value per bin.
pub fn calc_doppler_noise(psd: ArrayView2<f64>, freq: ArrayView1<f64>, pct_fn: f64) -> Array1<f64> {
    let f_max = freq.iter().copied().fold(0.0, f64::max);
    let cutoff = pct_fn * f_max;
    psd.axis_iter(Axis(0))
        .map(|row| {
            let level = StatsHelper::nanmean(
                row.iter()
                    .zip(freq.iter())
                    .filter(|(_, f)| **f >= cutoff)
                    .map(|(&p, _)| p)
                    .collect::<Array1<f64>>()
                    .view(),
            );
            (level * f_max).sqrt()
        })
        .collect()
}

/// Remove a white-noise floor of standard deviation `noise[bin]` from each row.
pub fn subtract_noise_floor(
    psd: &mut Array2<f64>,
    noise: ArrayView1<f64>,
    freq: ArrayView1<f64>,
    clamp: bool,
) -> CoreResult<()> {
    if noise.len() != psd.nrows() {
        return Err(CoreError::InvalidInput(format!(
            "{} noise levels for {} spectra",
            noise.len(),
            psd.nrows()
        )));
    }
    let f_max = freq.iter().copied().fold(0.0, f64::max);
    if !(f_max > 0.0) {
        return Err(CoreError::InvalidInput("empty frequency axis".into()));
    }
    for (mut row, &sigma) in psd.axis_iter_mut(Axis(0)).zip(noise.iter()) {
        let level = sigma * sigma / f_max;
        row.mapv_inplace(|p| {
            let reduced = p - level;
            if clamp && reduced < 0.0 {
                0.0
            } else {
                reduced
            }
        });
    }
    Ok(())
}

/// Windowed, segment-averaged spectral densities of binned series.
pub struct SpectralEstimator {
    n_fft: usize,
    step: usize,
    fs: f64,
    units: FreqUnits,
    window: Vec<f64>,
    fft: FftHelper,
}

impl SpectralEstimator {
    pub fn new(n_fft: usize, sample_rate: f64, window: Window) -> CoreResult<Self> {
        if n_fft < 2 {
            return Err(CoreError::InvalidInput(format!(
                "n_fft must be at least 2, got {}",
                n_fft
            )));
        }
        if !(sample_rate > 0.0) {
            return Err(CoreError::InvalidInput(format!(
                "sample rate must be positive, got {}",
                sample_rate
            )));
        }
        let window = match window {
            Window::None => vec![1.0; n_fft],
            Window::Hann => (0..n_fft)
                .map(|i| 0.5 - 0.5 * (2.0 * PI * i as f64 / (n_fft - 1) as f64).cos())
                .collect(),
        };
        Ok(Self {
            n_fft,
            step: n_fft,
            fs: sample_rate,
            units: FreqUnits::Hz,
            window,
            fft: FftHelper::new(n_fft),
        })
    }

    /// Hop between averaged segments; the default is `n_fft` (no overlap).
    pub fn with_step(mut self, step: usize) -> CoreResult<Self> {
        if step == 0 {
            return Err(CoreError::InvalidInput("segment step must be positive".into()));
        }
        self.step = step;
        Ok(self)
    }

    pub fn with_units(mut self, units: FreqUnits) -> Self {
        self.units = units;
        self
    }

    pub fn n_fft(&self) -> usize {
        self.n_fft
    }

    pub fn units(&self) -> FreqUnits {
        self.units
    }

    pub fn freq(&self) -> Array1<f64> {
        calc_freq_axis(self.n_fft, self.fs, self.units)
    }

    pub fn n_freq(&self) -> usize {
        self.n_fft / 2
    }

    /// Density normalisation: one-sided Welch scaling in the configured units.
    fn scale(&self, segments: usize) -> f64 {
        let window_power: f64 = self.window.iter().map(|w| w * w).sum();
        2.0 / window_power / segments as f64 / self.fs / self.units.scale()
    }

    /// Windowed spectra of the demeaned segments of one bin, or `None` when the
    /// bin holds NaN samples or is shorter than `n_fft`.
    fn segment_spectra(&mut self, signal: &[Complex64]) -> Option<Vec<Vec<Complex64>>> {
        if signal.len() < self.n_fft || signal.iter().any(|v| v.re.is_nan() || v.im.is_nan()) {
            return None;
        }
        let mean = signal.iter().sum::<Complex64>() / signal.len() as f64;
        let segments = (signal.len() - self.n_fft) / self.step + 1;
        let mut spectra = Vec::with_capacity(segments);
        for seg in 0..segments {
            let start = seg * self.step;
            let buffer: Vec<Complex64> = signal[start..start + self.n_fft]
                .iter()
                .zip(self.window.iter())
                .map(|(&v, &w)| (v - mean) * w)
                .collect();
            spectra.push(self.fft.forward_complex(buffer));
        }
        Some(spectra)
    }

    fn real_segments(&mut self, signal: ArrayView1<f64>) -> Option<Vec<Vec<Complex64>>> {
        let complex: Vec<Complex64> = signal.iter().map(|&v| Complex64::new(v, 0.0)).collect();
        self.segment_spectra(&complex)
    }

    fn cross(&self, a: &[Vec<Complex64>], b: &[Vec<Complex64>]) -> Vec<Complex64> {
        let scale = self.scale(a.len());
        (1..=self.n_freq())
            .map(|k| {
                a.iter()
                    .zip(b.iter())
                    .map(|(x, y)| x[k].conj() * y[k])
                    .sum::<Complex64>()
                    * scale
            })
            .collect()
    }

    /// One-sided power spectral density of one bin.
    pub fn psd_1d(&mut self, signal: ArrayView1<f64>) -> Array1<f64> {
        match self.real_segments(signal) {
            Some(spectra) => self.cross(&spectra, &spectra).iter().map(|c| c.re).collect(),
            None => Array1::from_elem(self.n_freq(), f64::NAN),
        }
    }

    /// Positive-frequency density of a complex series such as `u + i v`.
    ///
    /// No one-sided doubling is applied; the negative-frequency half carries
    /// the opposite rotary component.
    pub fn psd_1d_complex(&mut self, signal: ArrayView1<Complex64>) -> Array1<f64> {
        let samples: Vec<Complex64> = signal.iter().copied().collect();
        match self.segment_spectra(&samples) {
            Some(spectra) => self
                .cross(&spectra, &spectra)
                .iter()
                .map(|c| c.re / 2.0)
                .collect(),
            None => Array1::from_elem(self.n_freq(), f64::NAN),
        }
    }

    /// Spectra of binned data `[n_bins, n_bin]` -> `[n_bins, n_fft / 2]`.
    pub fn calc_psd(&mut self, binned: ArrayView2<f64>) -> Array2<f64> {
        let mut out = Array2::<f64>::zeros((binned.nrows(), self.n_freq()));
        for (bin, row) in binned.axis_iter(Axis(0)).enumerate() {
            out.row_mut(bin).assign(&self.psd_1d(row));
        }
        out
    }

    /// Spectra of every channel of `[C, n_bins, n_bin]` data.
    pub fn calc_psd_channels(&mut self, binned: ArrayView3<f64>) -> Array3<f64> {
        let shape = binned.shape();
        let mut out = Array3::<f64>::zeros((shape[0], shape[1], self.n_freq()));
        for (channel, data) in binned.axis_iter(Axis(0)).enumerate() {
            out.index_axis_mut(Axis(0), channel)
                .assign(&self.calc_psd(data));
        }
        out
    }

    /// Cross-spectral density `conj(A) B` of two binned series.
    pub fn calc_csd(
        &mut self,
        a: ArrayView2<f64>,
        b: ArrayView2<f64>,
    ) -> CoreResult<Array2<Complex64>> {
        if a.shape() != b.shape() {
            return Err(CoreError::InvalidInput(format!(
                "cross-spectrum inputs differ in shape: {:?} vs {:?}",
                a.shape(),
                b.shape()
            )));
        }
        let nan = Complex64::new(f64::NAN, f64::NAN);
        let mut out = Array2::<Complex64>::from_elem((a.nrows(), self.n_freq()), nan);
        for (bin, (x, y)) in a.axis_iter(Axis(0)).zip(b.axis_iter(Axis(0))).enumerate() {
            if let (Some(sx), Some(sy)) = (self.real_segments(x), self.real_segments(y)) {
                let csd = self.cross(&sx, &sy);
                out.row_mut(bin).assign(&Array1::from_vec(csd));
            }
        }
        Ok(out)
    }

    /// Magnitude-squared coherence. Needs more than one segment per bin to be
    /// informative; a single segment always gives one.
    pub fn calc_coherence(
        &mut self,
        a: ArrayView2<f64>,
        b: ArrayView2<f64>,
    ) -> CoreResult<Array2<f64>> {
        let cross = self.calc_csd(a, b)?;
        let paa = self.calc_psd(a);
        let pbb = self.calc_psd(b);
        Ok(Array2::from_shape_fn(cross.raw_dim(), |idx| {
            cross[idx].norm_sqr() / (paa[idx] * pbb[idx])
        }))
    }

    /// Phase of the cross-spectrum (radians); positive when `b` leads `a`.
    pub fn calc_phase_angle(
        &mut self,
        a: ArrayView2<f64>,
        b: ArrayView2<f64>,
    ) -> CoreResult<Array2<f64>> {
        Ok(self.calc_csd(a, b)?.mapv(|c| c.arg()))
    }
}
