use std::f64::consts::{E, PI};

use ndarray::{s, Array1, Array2, Array3, ArrayView1, ArrayView2, Axis};
use serde::Serialize;

use crate::instrument::{CoordSys, VelocityDataset};
use crate::math::stats::StatsHelper;
use crate::prelude::{CoreError, CoreResult, ProcessingConfig, ProcessingStage};
use crate::processing::binner::Binner;
use crate::processing::spectral::{subtract_noise_floor, FreqUnits, SpectralEstimator};
use crate::rotate::principal::calc_principal_angle;
use crate::telemetry::{LogManager, MetricsRecorder, MetricsSnapshot};

/// One-dimensional Kolmogorov constant used with single-component spectra.
pub const ALPHA_1D: f64 = 0.5;
/// Three-dimensional Kolmogorov constant.
pub const ALPHA_3D: f64 = 1.5;
/// Second-order structure-function constant.
pub const SF_CONSTANT: f64 = 2.1;

const TE01_WEIGHT_UV: f64 = 21.0 / 55.0;
const TE01_WEIGHT_W: f64 = 12.0 / 55.0;
const TE01_X_LIMIT: f64 = 20.0;
const TE01_DX: f64 = 0.01;

fn check_bins(name: &str, found: usize, expected: usize) -> CoreResult<()> {
    if found != expected {
        return Err(CoreError::InvalidInput(format!(
            "{} has {} bins, expected {}",
            name, found, expected
        )));
    }
    Ok(())
}

/// Mean of `S(omega) * omega^(5/3)` over the fitting range for each bin.
fn inertial_level(
    psd: ArrayView2<f64>,
    omega: ArrayView1<f64>,
    omega_range: [f64; 2],
) -> CoreResult<Array1<f64>> {
    if psd.ncols() != omega.len() {
        return Err(CoreError::InvalidInput(format!(
            "spectra have {} frequencies, axis has {}",
            psd.ncols(),
            omega.len()
        )));
    }
    let in_range: Vec<usize> = omega
        .iter()
        .enumerate()
        .filter(|(_, w)| **w >= omega_range[0] && **w <= omega_range[1])
        .map(|(idx, _)| idx)
        .collect();
    if in_range.is_empty() {
        return Err(CoreError::InvalidInput(format!(
            "no frequencies inside {:?} rad/s",
            omega_range
        )));
    }
    Ok(psd
        .axis_iter(Axis(0))
        .map(|row| {
            let compensated: Array1<f64> = in_range
                .iter()
                .map(|&idx| row[idx] * omega[idx].powf(5.0 / 3.0))
                .collect();
            StatsHelper::nanmean(compensated.view())
        })
        .collect())
}

/// Dissipation rate from the inertial subrange of single-component spectra
/// in rad/s units (Lumley & Terray 1983).
pub fn calc_epsilon_lt83(
    psd: ArrayView2<f64>,
    omega: ArrayView1<f64>,
    u_mag: ArrayView1<f64>,
    omega_range: [f64; 2],
) -> CoreResult<Array1<f64>> {
    check_bins("speed", u_mag.len(), psd.nrows())?;
    let level = inertial_level(psd, omega, omega_range)?;
    Ok(Array1::from_shape_fn(level.len(), |bin| {
        (level[bin] / ALPHA_1D).powf(1.5) / u_mag[bin]
    }))
}

/// Dissipation rate from the second-order structure function of binned
/// velocity `[n_bins, n_bin]`.
///
/// Lags run from `fs / freq_range[1]` up to, but excluding, `fs / freq_range[0]`.
pub fn calc_epsilon_sf(
    binned: ArrayView2<f64>,
    u_mag: ArrayView1<f64>,
    fs: f64,
    freq_range: [f64; 2],
) -> CoreResult<Array1<f64>> {
    check_bins("speed", u_mag.len(), binned.nrows())?;
    let n_bin = binned.ncols();
    let lag_lo = ((fs / freq_range[1]).floor() as usize).max(1);
    let lag_hi = (fs / freq_range[0]).floor() as usize;
    if lag_lo >= lag_hi || lag_hi >= n_bin {
        return Err(CoreError::InvalidInput(format!(
            "frequency range {:?} Hz gives no usable lags for {} samples at {} Hz",
            freq_range, n_bin, fs
        )));
    }
    Ok(binned
        .axis_iter(Axis(0))
        .zip(u_mag.iter())
        .map(|(row, &speed)| {
            if !(speed > 0.0) {
                return f64::NAN;
            }
            let normalised: Array1<f64> = (lag_lo..lag_hi)
                .map(|lag| {
                    let diffs: Array1<f64> = row
                        .slice(s![lag..])
                        .iter()
                        .zip(row.slice(s![..n_bin - lag]).iter())
                        .map(|(a, b)| (a - b).powi(2))
                        .collect();
                    let separation = speed / fs * lag as f64;
                    StatsHelper::nanmean(diffs.view()) / separation.powf(2.0 / 3.0)
                })
                .collect();
            (StatsHelper::nanmedian(normalised.view()) / SF_CONSTANT).powf(1.5)
        })
        .collect())
}

/// Wave-turbulence factor `M(beta, theta)` of Trowbridge & Elgar (2001), A13.
///
/// `beta` is the ratio of wave orbital velocity spread to mean speed and
/// `theta` the angle (radians) between the mean flow and the wave axis.
/// Tends to one as `beta` goes to zero.
pub fn te01_integral(beta: f64, theta: f64) -> f64 {
    if beta.is_nan() || theta.is_nan() {
        return f64::NAN;
    }
    if beta == 0.0 {
        return 1.0;
    }
    let cos_theta = theta.cos();
    let steps = (2.0 * TE01_X_LIMIT / TE01_DX).round() as usize;
    // beta^(2/3) folded into the cube root
    let integrand = (0..=steps).map(|idx| {
        let x = -TE01_X_LIMIT + idx as f64 * TE01_DX;
        (beta * beta * x * x - 2.0 * beta * cos_theta * x + 1.0).cbrt() * (-x * x / 2.0).exp()
    });
    StatsHelper::trapz(integrand, TE01_DX) / (2.0 * PI).sqrt()
}

/// Dissipation rate corrected for wave advection (Trowbridge & Elgar 2001).
///
/// `psd_uv` is the summed horizontal spectrum and `psd_w` the vertical one,
/// both `[n_bins, n_freq]` in rad/s units. The horizontal and vertical
/// estimates are averaged.
pub fn calc_epsilon_te01(
    psd_uv: ArrayView2<f64>,
    psd_w: ArrayView2<f64>,
    omega: ArrayView1<f64>,
    u_mag: ArrayView1<f64>,
    itke: ArrayView1<f64>,
    theta: ArrayView1<f64>,
    omega_range: [f64; 2],
) -> CoreResult<Array1<f64>> {
    let n_bins = psd_uv.nrows();
    check_bins("vertical spectrum", psd_w.nrows(), n_bins)?;
    check_bins("speed", u_mag.len(), n_bins)?;
    check_bins("turbulence intensity", itke.len(), n_bins)?;
    check_bins("flow angle", theta.len(), n_bins)?;
    let level_uv = inertial_level(psd_uv, omega, omega_range)?;
    let level_w = inertial_level(psd_w, omega, omega_range)?;
    Ok(Array1::from_shape_fn(n_bins, |bin| {
        let m = te01_integral(itke[bin], theta[bin]);
        let eps_uv = (level_uv[bin] / (TE01_WEIGHT_UV * ALPHA_3D * m)).powf(1.5);
        let eps_w = (level_w[bin] / (TE01_WEIGHT_W * ALPHA_3D * m)).powf(1.5);
        0.5 * (eps_uv + eps_w) / u_mag[bin]
    }))
}

/// Autocovariance of each channel within each bin, `[C, n_bins, n_bin / 2]`.
///
/// Bins are padded with half a bin of their neighbours on each side so that
/// every lag uses `n_bin` products; the two sides are averaged. The first and
/// last bins see zero fill from the series ends.
pub fn calc_acov(binner: &Binner, vel: ArrayView2<f64>) -> Array3<f64> {
    let n_bin = binner.n_bin();
    let lead = n_bin / 2;
    let n_lag = n_bin / 2;
    let padded = binner.reshape_channels(vel, n_bin);
    let (channels, n_bins, _) = padded.dim();
    let mut out = Array3::<f64>::zeros((channels, n_bins, n_lag));
    for channel in 0..channels {
        for bin in 0..n_bins {
            let row = padded.slice(s![channel, bin, ..]);
            let mean = StatsHelper::nanmean(row.slice(s![lead..lead + n_bin]));
            let fluct = row.mapv(|v| v - mean);
            let core = fluct.slice(s![lead..lead + n_bin]);
            for lag in 0..n_lag {
                let ahead = fluct.slice(s![lead + lag..lead + lag + n_bin]);
                let behind = fluct.slice(s![lead - lag..lead - lag + n_bin]);
                let forward = StatsHelper::nanmean((&core * &ahead).view());
                let backward = StatsHelper::nanmean((&core * &behind).view());
                out[[channel, bin, lag]] = 0.5 * (forward + backward);
            }
        }
    }
    out
}

/// Integral length scale from one channel's autocovariance `[n_bins, n_lag]`.
///
/// The time scale is the first lag where the normalised autocovariance drops
/// below `1/e`. The end bins are NaN because of the zero fill in [`calc_acov`].
pub fn calc_lint(acov: ArrayView2<f64>, u_mag: ArrayView1<f64>, fs: f64) -> CoreResult<Array1<f64>> {
    let n_bins = acov.nrows();
    check_bins("speed", u_mag.len(), n_bins)?;
    let mut lint = Array1::from_elem(n_bins, f64::NAN);
    if n_bins > 0 {
        LogManager::default().warn(&format!(
            "integral length scale not reported for boundary bins 0 and {}",
            n_bins - 1
        ));
    }
    for bin in 1..n_bins.saturating_sub(1) {
        let row = acov.row(bin);
        let a0 = row[0];
        if !(a0 > 0.0) {
            continue;
        }
        if let Some(lag) = row.iter().position(|&a| a / a0 < 1.0 / E) {
            lint[bin] = lag as f64 / fs * u_mag[bin];
        }
    }
    Ok(lint)
}

/// Horizontal speed of bin-averaged velocity `[3, n_bins]`.
pub fn calc_u_mag(vel_avg: ArrayView2<f64>) -> Array1<f64> {
    Array1::from_shape_fn(vel_avg.ncols(), |bin| vel_avg[[0, bin]].hypot(vel_avg[[1, bin]]))
}

/// Flow direction in degrees counter-clockwise from the frame's x axis
/// (east in earth coordinates).
pub fn calc_u_dir(vel_avg: ArrayView2<f64>) -> Array1<f64> {
    Array1::from_shape_fn(vel_avg.ncols(), |bin| {
        vel_avg[[1, bin]].atan2(vel_avg[[0, bin]]).to_degrees()
    })
}

/// Turbulent kinetic energy `u'u' + v'v' + w'w'` per bin.
pub fn calc_etke(tke: ArrayView2<f64>) -> Array1<f64> {
    tke.sum_axis(Axis(0))
}

/// Magnitude of the Reynolds stresses per bin.
pub fn calc_ecoh(stress: ArrayView2<f64>) -> Array1<f64> {
    stress.mapv(|v| v * v).sum_axis(Axis(0)).mapv(f64::sqrt)
}

/// Turbulence intensity `sigma_Uh / U`; NaN where `U` is zero or below `thresh`.
pub fn calc_itke(
    binner: &Binner,
    vel: ArrayView2<f64>,
    u_mag: ArrayView1<f64>,
    thresh: f64,
) -> CoreResult<Array1<f64>> {
    check_bins("speed", u_mag.len(), binner.bin_count(vel.ncols()))?;
    let speed: Array1<f64> = vel
        .row(0)
        .iter()
        .zip(vel.row(1).iter())
        .map(|(u, v)| u.hypot(*v))
        .collect();
    let sigma = binner.calc_covariance(speed.view(), speed.view()).mapv(f64::sqrt);
    Ok(Array1::from_shape_fn(sigma.len(), |bin| {
        let u = u_mag[bin];
        if u > 0.0 && u >= thresh {
            sigma[bin] / u
        } else {
            f64::NAN
        }
    }))
}

/// Angle (radians) between the mean flow and each bin's principal axis.
pub fn calc_flow_axis_angle(binner: &Binner, vel: ArrayView2<f64>) -> Array1<f64> {
    let u = binner.reshape(vel.row(0), 0);
    let v = binner.reshape(vel.row(1), 0);
    u.axis_iter(Axis(0))
        .zip(v.axis_iter(Axis(0)))
        .map(|(u, v)| match calc_principal_angle(u, v) {
            Ok(axis) => StatsHelper::nanmean(v).atan2(StatsHelper::nanmean(u)) - axis,
            Err(_) => f64::NAN,
        })
        .collect()
}

/// Stresses `u'w'` and `v'w'` from opposing-beam variances of a four-beam
/// Janus head, `[2, n_bins]`. Valid for a level instrument.
pub fn beam_variance_stress(
    binner: &Binner,
    vel_beam: ArrayView2<f64>,
    beam_angle_deg: f64,
    convex: bool,
) -> CoreResult<Array2<f64>> {
    if vel_beam.nrows() != 4 {
        return Err(CoreError::InvalidInput(format!(
            "beam-variance stresses need 4 beams, got {}",
            vel_beam.nrows()
        )));
    }
    let var = binner.do_var(vel_beam);
    let c = if convex { 1.0 } else { -1.0 };
    let denom = 2.0 * (2.0 * beam_angle_deg.to_radians()).sin();
    let mut out = Array2::<f64>::zeros((2, var.ncols()));
    out.row_mut(0)
        .assign(&((&var.row(0) - &var.row(1)) * (c / denom)));
    out.row_mut(1)
        .assign(&((&var.row(2) - &var.row(3)) * (-c / denom)));
    Ok(out)
}

/// Binned statistics of one record.
#[derive(Debug, Clone)]
pub struct BinnedTurbulence {
    pub coord_sys: CoordSys,
    pub fs: f64,
    pub n_bin: usize,
    pub n_fft: usize,
    pub time: Array1<f64>,
    /// Bin-mean velocity `[3, n_bins]`.
    pub vel: Array2<f64>,
    pub u_mag: Array1<f64>,
    pub u_dir: Array1<f64>,
    /// `u'u'`, `v'v'`, `w'w'`.
    pub tke: Array2<f64>,
    /// `u'w'`, `v'w'`, `u'v'`.
    pub stress: Array2<f64>,
    pub etke: Array1<f64>,
    pub ecoh: Array1<f64>,
    pub itke: Array1<f64>,
    /// Frequency axis of `psd` in rad/s.
    pub omega: Array1<f64>,
    /// `[3, n_bins, n_freq]`.
    pub psd: Array3<f64>,
    pub acov: Array3<f64>,
    /// Integral length scale per component `[3, n_bins]`.
    pub lint: Array2<f64>,
    /// Inertial-subrange dissipation per component `[3, n_bins]`.
    pub epsilon_lt83: Array2<f64>,
    /// Structure-function dissipation of the first component.
    pub epsilon_sf: Array1<f64>,
    pub epsilon_te01: Array1<f64>,
}

impl BinnedTurbulence {
    pub fn n_bins(&self) -> usize {
        self.time.len()
    }

    pub fn upup_(&self) -> ArrayView1<'_, f64> {
        self.tke.row(0)
    }

    pub fn vpvp_(&self) -> ArrayView1<'_, f64> {
        self.tke.row(1)
    }

    pub fn wpwp_(&self) -> ArrayView1<'_, f64> {
        self.tke.row(2)
    }

    pub fn upwp_(&self) -> ArrayView1<'_, f64> {
        self.stress.row(0)
    }

    pub fn vpwp_(&self) -> ArrayView1<'_, f64> {
        self.stress.row(1)
    }

    pub fn upvp_(&self) -> ArrayView1<'_, f64> {
        self.stress.row(2)
    }

    /// Bin-mean view of the scalar quantities, for reporting.
    pub fn summary(&self) -> TurbulenceSummary {
        TurbulenceSummary {
            coord_sys: self.coord_sys,
            n_bins: self.n_bins(),
            n_bin: self.n_bin,
            fs: self.fs,
            time: self.time.to_vec(),
            u_mag: self.u_mag.to_vec(),
            u_dir: self.u_dir.to_vec(),
            etke: self.etke.to_vec(),
            ecoh: self.ecoh.to_vec(),
            itke: self.itke.to_vec(),
            epsilon_lt83: self.epsilon_lt83.row(2).to_vec(),
            epsilon_sf: self.epsilon_sf.to_vec(),
            epsilon_te01: self.epsilon_te01.to_vec(),
            mean_u_mag: StatsHelper::nanmean(self.u_mag.view()),
            mean_etke: StatsHelper::nanmean(self.etke.view()),
            mean_epsilon_lt83: StatsHelper::nanmean(self.epsilon_lt83.row(2)),
        }
    }
}

/// Serialisable per-bin scalars of a [`BinnedTurbulence`].
#[derive(Debug, Clone, Serialize)]
pub struct TurbulenceSummary {
    pub coord_sys: CoordSys,
    pub n_bins: usize,
    pub n_bin: usize,
    pub fs: f64,
    pub time: Vec<f64>,
    pub u_mag: Vec<f64>,
    pub u_dir: Vec<f64>,
    pub etke: Vec<f64>,
    pub ecoh: Vec<f64>,
    pub itke: Vec<f64>,
    /// Vertical-component inertial-subrange estimate.
    pub epsilon_lt83: Vec<f64>,
    pub epsilon_sf: Vec<f64>,
    pub epsilon_te01: Vec<f64>,
    pub mean_u_mag: f64,
    pub mean_etke: f64,
    pub mean_epsilon_lt83: f64,
}

/// Runs the bin, spectrum and statistics chain over a velocity record.
pub struct TurbulenceAnalyzer {
    config: ProcessingConfig,
    binner: Binner,
    spectral: SpectralEstimator,
    logger: LogManager,
    metrics: MetricsRecorder,
}

impl TurbulenceAnalyzer {
    pub fn new(config: ProcessingConfig, fs: f64) -> CoreResult<Self> {
        let (binner, spectral) = Self::estimators(&config, fs)?;
        Ok(Self {
            config,
            binner,
            spectral,
            logger: LogManager::default(),
            metrics: MetricsRecorder::new(),
        })
    }

    fn estimators(config: &ProcessingConfig, fs: f64) -> CoreResult<(Binner, SpectralEstimator)> {
        config.validate()?;
        let binner = Binner::new(config.n_bin, fs)?;
        let mut spectral = SpectralEstimator::new(config.n_fft, fs, config.window)?
            .with_units(FreqUnits::RadPerSec);
        if let Some(step) = config.n_fft_step {
            spectral = spectral.with_step(step)?;
        }
        Ok((binner, spectral))
    }

    pub fn binner(&self) -> &Binner {
        &self.binner
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn analyze(&mut self, ds: &VelocityDataset) -> CoreResult<BinnedTurbulence> {
        let result = self.run(ds);
        if result.is_err() {
            self.metrics.record_error();
        }
        result
    }

    fn run(&mut self, ds: &VelocityDataset) -> CoreResult<BinnedTurbulence> {
        if ds.coord_sys == CoordSys::Beam {
            return Err(CoreError::Rotation {
                expected: CoordSys::Instrument,
                found: ds.coord_sys,
            });
        }
        if (ds.fs - self.binner.fs()).abs() > 1e-9 * self.binner.fs() {
            return Err(CoreError::InvalidInput(format!(
                "analyzer runs at {} Hz, data is sampled at {} Hz",
                self.binner.fs(),
                ds.fs
            )));
        }
        let n_bins = self.binner.bin_count(ds.len());
        if n_bins == 0 {
            return Err(CoreError::InvalidInput(format!(
                "{} samples do not fill one {}-sample bin",
                ds.len(),
                self.config.n_bin
            )));
        }
        let fs = self.binner.fs();
        let vel = ds.vel.view();

        let vel_avg = self.binner.do_avg(vel);
        let u_mag = calc_u_mag(vel_avg.view());
        let u_dir = calc_u_dir(vel_avg.view());
        let tke = self.binner.calc_tke(
            vel,
            self.config.doppler_noise,
            self.config.clamp_negative_variance,
        )?;
        let stress = self.binner.calc_stress(vel)?;
        let etke = calc_etke(tke.view());
        let ecoh = calc_ecoh(stress.view());
        let itke = calc_itke(&self.binner, vel, u_mag.view(), self.config.itke_thresh)?;

        let binned = self.binner.reshape_channels(vel, 0);
        let mut psd = self.spectral.calc_psd_channels(binned.view());
        let omega = self.spectral.freq();
        if let Some(noise) = self.config.doppler_noise {
            for (channel, sigma) in noise.iter().enumerate() {
                let mut component = psd.index_axis(Axis(0), channel).to_owned();
                subtract_noise_floor(
                    &mut component,
                    Array1::from_elem(n_bins, *sigma).view(),
                    omega.view(),
                    self.config.clamp_negative_variance,
                )?;
                psd.index_axis_mut(Axis(0), channel).assign(&component);
            }
        }

        let omega_range = self.config.omega_range_epsilon;
        let mut epsilon_lt83 = Array2::<f64>::zeros((3, n_bins));
        for channel in 0..3 {
            let eps = calc_epsilon_lt83(
                psd.index_axis(Axis(0), channel),
                omega.view(),
                u_mag.view(),
                omega_range,
            )?;
            epsilon_lt83.row_mut(channel).assign(&eps);
        }
        let epsilon_sf = calc_epsilon_sf(
            binned.index_axis(Axis(0), 0),
            u_mag.view(),
            fs,
            self.config.freq_range,
        )?;
        let psd_uv = &psd.index_axis(Axis(0), 0) + &psd.index_axis(Axis(0), 1);
        let theta = calc_flow_axis_angle(&self.binner, vel);
        let epsilon_te01 = calc_epsilon_te01(
            psd_uv.view(),
            psd.index_axis(Axis(0), 2),
            omega.view(),
            u_mag.view(),
            itke.view(),
            theta.view(),
            omega_range,
        )?;

        let acov = calc_acov(&self.binner, vel);
        let mut lint = Array2::<f64>::zeros((3, n_bins));
        for channel in 0..3 {
            let scale = calc_lint(acov.index_axis(Axis(0), channel), u_mag.view(), fs)?;
            lint.row_mut(channel).assign(&scale);
        }

        let empty = vel_avg
            .axis_iter(Axis(1))
            .filter(|bin| bin.iter().all(|v| v.is_nan()))
            .count();
        self.metrics.record_bins(n_bins, empty);
        self.logger.record(&format!(
            "analysed {} bins of {} samples in {} coordinates ({} empty)",
            n_bins, self.config.n_bin, ds.coord_sys, empty
        ));

        Ok(BinnedTurbulence {
            coord_sys: ds.coord_sys,
            fs,
            n_bin: self.config.n_bin,
            n_fft: self.spectral.n_fft(),
            time: self.binner.bin_times(ds.time().view()),
            vel: vel_avg,
            u_mag,
            u_dir,
            tke,
            stress,
            etke,
            ecoh,
            itke,
            omega,
            psd,
            acov,
            lint,
            epsilon_lt83,
            epsilon_sf,
            epsilon_te01,
        })
    }
}

impl ProcessingStage for TurbulenceAnalyzer {
    type Input = VelocityDataset;
    type Output = BinnedTurbulence;

    fn initialize(&mut self, config: &ProcessingConfig) -> CoreResult<()> {
        let (binner, spectral) = Self::estimators(config, self.binner.fs())?;
        self.binner = binner;
        self.spectral = spectral;
        self.config = config.clone();
        Ok(())
    }

    fn execute(&mut self, input: &VelocityDataset) -> CoreResult<BinnedTurbulence> {
        self.analyze(input)
    }

    fn cleanup(&mut self) {
        self.metrics = MetricsRecorder::new();
        self.logger.debug("turbulence analyzer reset");
    }
}
