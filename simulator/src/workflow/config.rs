use anyhow::Context;
use dopplercore::prelude::ProcessingConfig;
use dopplercore::processing::MotionOptions;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::generator::profile::GeneratorConfig;

fn default_principal() -> bool {
    true
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkflowConfig {
    #[serde(default)]
    pub generator: GeneratorConfig,
    #[serde(default)]
    pub processing: ProcessingConfig,
    /// Rotate earth-frame data to the principal axes before binning.
    #[serde(default = "default_principal")]
    pub principal: bool,
}

impl WorkflowConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path_ref = path.as_ref();
        let contents = fs::read_to_string(path_ref)
            .with_context(|| format!("reading workflow config {}", path_ref.display()))?;
        let config: WorkflowConfig = serde_yaml::from_str(&contents)
            .with_context(|| format!("parsing workflow config {}", path_ref.display()))?;
        config
            .processing
            .validate()
            .with_context(|| format!("validating workflow config {}", path_ref.display()))?;
        Ok(config)
    }

    pub fn from_args(fs: f64, n_samples: usize, n_bin: usize, n_fft: usize, seed: u64) -> Self {
        Self {
            generator: GeneratorConfig {
                fs,
                n_samples,
                seed,
                ..Default::default()
            },
            processing: ProcessingConfig {
                n_bin,
                n_fft,
                ..Default::default()
            },
            principal: true,
        }
    }

    pub fn to_processing_config(&self) -> ProcessingConfig {
        self.processing.clone()
    }

    pub fn motion_options(&self) -> MotionOptions {
        MotionOptions {
            accel_filtfreq: self.processing.accel_filtfreq,
            vel_filtfreq: self.processing.vel_filtfreq,
            to_earth: self.processing.to_earth,
            separate_probes: self.processing.separate_probes,
        }
    }
}
