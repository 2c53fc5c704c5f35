use anyhow::Context;
use dopplercore::instrument::{
    CoordSys, EulerAngles, InstrumentFamily, InstrumentGeometry, Orientation, OrientationData,
    VelocityDataset,
};
use dopplercore::rotate::{calc_orientmat, inst2earth};
use ndarray::{Array1, Array2};
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

const GRAVITY: f64 = 9.81;
const KOLMOGOROV_1D: f64 = 0.5;

/// Configuration for a synthetic velocimeter on a moving mooring.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    pub fs: f64,
    pub n_samples: usize,
    /// Mean east/north water velocity (m/s).
    pub mean_flow: [f64; 2],
    /// Dissipation rate of the synthetic inertial subrange (W/kg).
    pub epsilon: f64,
    /// Number of random-phase modes per component.
    pub n_modes: usize,
    pub heave_amplitude: f64,
    pub heave_period: f64,
    pub sway_amplitude: f64,
    pub sway_period: f64,
    pub roll_amplitude_deg: f64,
    pub roll_period: f64,
    pub heading_deg: f64,
    /// IMU to sample volume, body frame (m).
    pub inst2head_vec: [f64; 3],
    /// Half-width of the uniform Doppler noise (m/s).
    pub noise: f64,
    pub seed: u64,
    pub description: Option<String>,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            fs: 16.0,
            n_samples: 32_768,
            mean_flow: [0.4, 0.2],
            epsilon: 1.0e-5,
            n_modes: 400,
            heave_amplitude: 0.3,
            heave_period: 5.0,
            sway_amplitude: 0.1,
            sway_period: 8.0,
            roll_amplitude_deg: 5.0,
            roll_period: 4.0,
            heading_deg: 30.0,
            inst2head_vec: [0.0, 0.0, -1.0],
            noise: 0.005,
            seed: 0,
            description: None,
        }
    }
}

/// Generated record plus the earth-frame water velocity it was built from.
#[derive(Debug, Clone)]
pub struct SyntheticDeployment {
    pub dataset: VelocityDataset,
    pub truth: Array2<f64>,
}

/// Earth-frame water velocity: mean flow plus `-5/3` turbulence from
/// random-phase synthesis.
fn water_velocity(config: &GeneratorConfig, rng: &mut StdRng) -> Array2<f64> {
    let n = config.n_samples;
    let speed = config.mean_flow[0].hypot(config.mean_flow[1]);
    let f_lo = 2.0 * config.fs / n as f64;
    let f_hi = 0.45 * config.fs;
    let modes = config.n_modes.max(1);
    let df = (f_hi - f_lo) / modes as f64;
    let level = KOLMOGOROV_1D * config.epsilon.powf(2.0 / 3.0) * speed.powf(2.0 / 3.0);

    let mut vel = Array2::<f64>::zeros((3, n));
    for component in 0..3 {
        let mean = if component < 2 {
            config.mean_flow[component]
        } else {
            0.0
        };
        let mut row = Array1::from_elem(n, mean);
        for mode in 0..modes {
            let freq = f_lo + (mode as f64 + 0.5) * df;
            let omega = 2.0 * PI * freq;
            // Hz density of the rad/s model spectrum
            let density = 2.0 * PI * level * omega.powf(-5.0 / 3.0);
            let amplitude = (2.0 * density * df).sqrt();
            let phase = rng.gen_range(0.0..2.0 * PI);
            for (t, value) in row.iter_mut().enumerate() {
                *value += amplitude * (omega * t as f64 / config.fs + phase).sin();
            }
        }
        vel.row_mut(component).assign(&row);
    }
    vel
}

/// Build a moving-platform velocimeter record with consistent IMU channels.
pub fn build_deployment(config: &GeneratorConfig) -> anyhow::Result<SyntheticDeployment> {
    anyhow::ensure!(config.fs > 0.0, "sample rate must be positive");
    anyhow::ensure!(config.n_samples > 1, "need at least two samples");
    let n = config.n_samples;
    let mut rng = StdRng::seed_from_u64(config.seed);
    let truth = water_velocity(config, &mut rng);

    let time = Array1::from_iter((0..n).map(|t| t as f64 / config.fs));
    let w_heave = 2.0 * PI / config.heave_period;
    let w_sway = 2.0 * PI / config.sway_period;
    let w_roll = 2.0 * PI / config.roll_period;
    let roll_amp = config.roll_amplitude_deg.to_radians();

    let angles = EulerAngles {
        heading: Array1::from_elem(n, config.heading_deg),
        pitch: Array1::zeros(n),
        roll: time.mapv(|t| (roll_amp * (w_roll * t).sin()).to_degrees()),
    };
    let geometry = InstrumentGeometry::velocimeter(config.inst2head_vec);
    let omat = calc_orientmat(
        &angles,
        InstrumentFamily::Nortek,
        Orientation::Down,
        0.0,
        0.0,
    )
    .context("building orientation matrices")?;

    let mut head_vel = Array2::<f64>::zeros((3, n));
    let mut specific_force = Array2::<f64>::zeros((3, n));
    let mut angrt = Array2::<f64>::zeros((3, n));
    for (t, &tt) in time.iter().enumerate() {
        head_vel[[0, t]] = config.sway_amplitude * w_sway * (w_sway * tt).cos();
        head_vel[[2, t]] = config.heave_amplitude * w_heave * (w_heave * tt).cos();
        specific_force[[0, t]] = -config.sway_amplitude * w_sway * w_sway * (w_sway * tt).sin();
        specific_force[[2, t]] =
            GRAVITY - config.heave_amplitude * w_heave * w_heave * (w_heave * tt).sin();
        angrt[[0, t]] = roll_amp * w_roll * (w_roll * tt).cos();
    }

    let relative = &truth - &head_vel;
    let mut vel = inst2earth(relative.view(), omat.view(), true)
        .context("rotating water velocity into the body frame")?;
    let r = config.inst2head_vec;
    for t in 0..n {
        let w = angrt.column(t);
        // sample volume moves with angrt x r
        vel[[0, t]] -= w[1] * r[2] - w[2] * r[1];
        vel[[1, t]] -= w[2] * r[0] - w[0] * r[2];
        vel[[2, t]] -= w[0] * r[1] - w[1] * r[0];
    }
    if config.noise > 0.0 {
        vel.mapv_inplace(|v| v + rng.gen_range(-config.noise..config.noise));
    }
    let accel = inst2earth(specific_force.view(), omat.view(), true)
        .context("rotating acceleration into the body frame")?;

    let dataset = VelocityDataset::new(config.fs, CoordSys::Instrument, vel, geometry)
        .context("assembling velocity dataset")?
        .with_imu(accel, angrt)
        .context("attaching IMU channels")?
        .with_orientation(OrientationData::Euler(angles))
        .context("attaching orientation")?;

    Ok(SyntheticDeployment { dataset, truth })
}
