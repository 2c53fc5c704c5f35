use anyhow::Context;
use clap::Parser;
use generator::profile::build_deployment;
use std::fs;
use std::path::PathBuf;
use workflow::config::WorkflowConfig;
use workflow::runner::Runner;

mod generator;
mod workflow;

#[derive(Parser)]
#[command(author, version, about = "Synthetic moving-platform velocimeter workflow driver")]
struct Args {
    /// Load a workflow config from YAML
    #[arg(long)]
    workflow: Option<PathBuf>,
    /// Sample rate of the synthetic record (Hz)
    #[arg(long, default_value_t = 16.0)]
    fs: f64,
    #[arg(long, default_value_t = 32_768)]
    samples: usize,
    #[arg(long, default_value_t = 4096)]
    n_bin: usize,
    #[arg(long, default_value_t = 1024)]
    n_fft: usize,
    #[arg(long, default_value_t = 0)]
    seed: u64,
    /// Write the binned summary as JSON
    #[arg(long)]
    report: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let workflow_config = if let Some(path) = args.workflow {
        WorkflowConfig::load(path)?
    } else {
        WorkflowConfig::from_args(args.fs, args.samples, args.n_bin, args.n_fft, args.seed)
    };

    let deployment =
        build_deployment(&workflow_config.generator).context("generating synthetic deployment")?;
    let target_epsilon = workflow_config.generator.epsilon;
    let runner = Runner::new(workflow_config);
    let result = runner.execute(deployment.dataset)?;

    println!(
        "Run -> {} bins in {} coordinates, principal heading {}, mean speed {:.3} m/s, \
         mean epsilon {:.3e} (synthetic {:.3e})",
        result.summary.n_bins,
        result.coord_sys,
        result
            .principal_heading_deg
            .map(|h| format!("{:.1} deg", h))
            .unwrap_or_else(|| "n/a".into()),
        result.summary.mean_u_mag,
        result.summary.mean_epsilon_lt83,
        target_epsilon
    );

    if let Some(report_path) = args.report {
        if let Some(parent) = report_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating report directory {}", parent.display()))?;
        }
        let report = serde_json::to_string_pretty(&result).context("serialising report")?;
        fs::write(&report_path, report)
            .with_context(|| format!("writing report {}", report_path.display()))?;
        log::info!("report written to {}", report_path.display());
    }

    Ok(())
}
