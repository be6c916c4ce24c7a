use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Parser;
use ukf_tracker::dataset::Dataset;
use ukf_tracker::models::{bicycle, STATE_NAMES};
use ukf_tracker::{Tracker, TrackerConfig};

#[derive(Parser, Debug)]
#[command(name = "replay")]
#[command(about = "Replay a logged run through the unscented Kalman filter", long_about = None)]
struct Args {
    /// Path to the run log (CSV, optionally .gz)
    #[arg(long)]
    data: PathBuf,

    /// JSON filter/sensor configuration
    #[arg(long, conflicts_with = "preset")]
    config: Option<PathBuf>,

    /// Built-in configuration (combined, split)
    #[arg(long, default_value = "combined")]
    preset: String,

    /// Write per-step estimates to this CSV file
    #[arg(long)]
    trajectory: Option<PathBuf>,
}

fn write_trajectory<F>(path: &Path, tracker: &Tracker<F>) -> anyhow::Result<()>
where
    F: Fn(&ukf_tracker::types::StateVec, f64) -> ukf_tracker::types::StateVec,
{
    let mut wtr = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;

    let mut header = vec!["time".to_string()];
    header.extend(STATE_NAMES.iter().map(|n| n.to_string()));
    header.push("covariance_trace".to_string());
    wtr.write_record(&header)?;

    for record in tracker.records() {
        let mut row = vec![format!("{:.6}", record.time)];
        row.extend(record.estimate.iter().map(|v| format!("{v:.6}")));
        row.push(format!("{:.6e}", record.covariance_trace));
        wtr.write_record(&row)?;
    }
    wtr.flush()?;
    Ok(())
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = match args.config.as_ref() {
        Some(path) => TrackerConfig::from_path(path)?,
        None => TrackerConfig::preset(&args.preset)?,
    };
    if config.state_dim() != STATE_NAMES.len() {
        anyhow::bail!(
            "replay uses the {}-state vehicle model, config has {} states",
            STATE_NAMES.len(),
            config.state_dim()
        );
    }

    let dataset = Dataset::from_path(&args.data)?;
    log::info!("Loaded {} samples from {}", dataset.len(), args.data.display());

    let mut tracker = Tracker::new(&config, bicycle)?;
    let report = tracker.run(&dataset)?;
    log::info!(
        "Replayed {} steps ({} recoveries, {} skipped updates)",
        report.steps,
        report.recoveries,
        report.skipped_updates
    );

    if let Some(path) = args.trajectory.as_ref() {
        write_trajectory(path, &tracker)?;
        log::info!("Wrote trajectory to {}", path.display());
    }

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
