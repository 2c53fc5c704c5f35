use crate::workflow::config::WorkflowConfig;
use anyhow::Context;
use dopplercore::instrument::{CoordSys, VelocityDataset};
use dopplercore::math::stats::StatsHelper;
use dopplercore::prelude::ProcessingStage;
use dopplercore::processing::correct_motion;
use dopplercore::processing::turbulence::{TurbulenceAnalyzer, TurbulenceSummary};
use dopplercore::rotate::{rotate2, set_declination};
use dopplercore::telemetry::{LogManager, MetricsRecorder, MetricsSnapshot};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct WorkflowResult {
    pub coord_sys: CoordSys,
    pub principal_heading_deg: Option<f64>,
    /// RMS of the removed platform velocity (`urot + uacc`) per component.
    pub motion_rms: [f64; 3],
    pub summary: TurbulenceSummary,
    pub metrics: MetricsSnapshot,
}

pub struct Runner {
    config: WorkflowConfig,
    logger: LogManager,
}

impl Runner {
    pub fn new(config: WorkflowConfig) -> Self {
        Self {
            config,
            logger: LogManager::new("simulator::runner"),
        }
    }

    /// Declination, heading offset and motion correction.
    pub fn prepare(
        &self,
        ds: &mut VelocityDataset,
        metrics: &MetricsRecorder,
    ) -> anyhow::Result<()> {
        let processing = &self.config.processing;
        if let Some(offset) = processing.heading_offset_deg {
            ds.heading_offset_deg = Some(offset);
        }
        if let Some(declination) = processing.declination_deg {
            set_declination(ds, declination).context("applying declination")?;
        }
        correct_motion(ds, self.config.motion_options()).context("correcting motion")?;
        if ds.coord_sys == CoordSys::Earth {
            metrics.record_rotation();
        }
        Ok(())
    }

    pub fn execute(&self, mut ds: VelocityDataset) -> anyhow::Result<WorkflowResult> {
        let metrics = MetricsRecorder::new();
        let outcome = self.run(&mut ds, &metrics);
        if outcome.is_err() {
            metrics.record_error();
        }
        let (motion_rms, summary, analyzer_metrics) = outcome?;
        metrics.record_bins(analyzer_metrics.bins_processed, analyzer_metrics.empty_bins);
        Ok(WorkflowResult {
            coord_sys: ds.coord_sys,
            principal_heading_deg: ds.principal_heading_deg,
            motion_rms,
            summary,
            metrics: metrics.snapshot(),
        })
    }

    fn run(
        &self,
        ds: &mut VelocityDataset,
        metrics: &MetricsRecorder,
    ) -> anyhow::Result<([f64; 3], TurbulenceSummary, MetricsSnapshot)> {
        self.prepare(ds, metrics)?;

        let mut motion_rms = [f64::NAN; 3];
        if let Some(motion) = ds.motion.as_ref() {
            let removed = &motion.urot + &motion.uacc;
            for (component, value) in motion_rms.iter_mut().enumerate() {
                *value = StatsHelper::rms(removed.row(component));
            }
        }

        if self.config.principal && ds.coord_sys == CoordSys::Earth {
            rotate2(ds, CoordSys::Principal).context("rotating to principal axes")?;
            metrics.record_rotation();
        }

        let mut analyzer = TurbulenceAnalyzer::new(self.config.to_processing_config(), ds.fs)
            .context("configuring turbulence analysis")?;
        let binned = analyzer.execute(ds).context("analysing turbulence")?;
        let summary = binned.summary();
        self.logger.record(&format!(
            "{} bins in {} coordinates, mean speed {:.3} m/s, mean TKE {:.3e}",
            summary.n_bins, summary.coord_sys, summary.mean_u_mag, summary.mean_etke
        ));
        Ok((motion_rms, summary, analyzer.metrics()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::profile::{build_deployment, GeneratorConfig};

    fn test_config() -> WorkflowConfig {
        let mut cfg = WorkflowConfig::from_args(16.0, 8192, 2048, 512, 5);
        cfg.generator.n_modes = 120;
        cfg
    }

    #[test]
    fn prepare_removes_platform_motion() {
        let cfg = test_config();
        let deployment = build_deployment(&cfg.generator).unwrap();
        let mut ds = deployment.dataset.clone();
        let runner = Runner::new(cfg);
        runner.prepare(&mut ds, &MetricsRecorder::new()).unwrap();
        assert_eq!(ds.coord_sys, CoordSys::Earth);
        assert!(ds.is_motion_corrected());

        // compare away from the filter start-up at either end
        let (lo, hi) = (2048, 6144);
        let mut residual = 0.0;
        let mut raw = 0.0;
        for component in 0..3 {
            for t in lo..hi {
                let truth = deployment.truth[[component, t]];
                residual += (ds.vel[[component, t]] - truth).powi(2);
            }
        }
        let uraw = &ds.motion.as_ref().unwrap().uraw;
        for component in 0..3 {
            for t in lo..hi {
                raw += (uraw[[component, t]] - deployment.truth[[component, t]]).powi(2);
            }
        }
        let count = (3 * (hi - lo)) as f64;
        let residual = (residual / count).sqrt();
        let raw = (raw / count).sqrt();
        assert!(residual < 0.02, "residual {}", residual);
        assert!(raw > 5.0 * residual, "raw {} residual {}", raw, residual);
    }

    #[test]
    fn runner_executes_workflow() {
        let cfg = test_config();
        let deployment = build_deployment(&cfg.generator).unwrap();
        let runner = Runner::new(cfg);
        let result = runner.execute(deployment.dataset).unwrap();
        assert_eq!(result.coord_sys, CoordSys::Principal);
        assert!(result.principal_heading_deg.is_some());
        assert_eq!(result.summary.n_bins, 4);
        assert_eq!(result.metrics.bins_processed, 4);
        assert_eq!(result.metrics.rotations, 2);
        assert!(result.motion_rms[2] > 0.1);
        let json = serde_json::to_string(&result).unwrap();
        assert!(json.contains("\"Principal\""));
    }

    #[test]
    fn runner_reports_missing_imu() {
        let cfg = test_config();
        let generator = GeneratorConfig {
            n_samples: 4096,
            ..cfg.generator.clone()
        };
        let mut ds = build_deployment(&generator).unwrap().dataset;
        ds.accel = None;
        let err = Runner::new(cfg).execute(ds).unwrap_err();
        assert!(format!("{:#}", err).contains("correcting motion"));
    }
}
