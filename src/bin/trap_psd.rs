use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use csv::Writer;
use serde::Serialize;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use nanotrap::{
    compare_feedback_modes, EnsembleOutcome, ExperimentConfig, FeedbackComparison, RunControl,
    Trajectory,
};

#[derive(Debug, Parser)]
#[command(about = "Averaged position PSD of a trapped nanoparticle with and without feedback")]
struct Cli {
    /// TOML experiment configuration; built-in defaults when omitted
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long, default_value = "output-trap-psd")]
    outdir: PathBuf,

    #[arg(long)]
    seed: Option<u64>,

    #[arg(long)]
    ensemble_size: Option<usize>,

    #[arg(long)]
    period_count: Option<f64>,

    #[arg(long)]
    threads: Option<usize>,

    /// Stop unfinished realizations after this many seconds
    #[arg(long)]
    time_budget_secs: Option<u64>,
}

#[derive(Debug, Serialize)]
struct TrajectoryRow {
    t: f64,
    x: f64,
    v: f64,
    filtered: f64,
}

#[derive(Debug, Serialize)]
struct ModeSummary {
    mode: &'static str,
    completed: usize,
    diverged: usize,
    cancelled: usize,
    peak_frequency: Option<f64>,
    peak_power: Option<f64>,
    linewidth: Option<f64>,
    /// Integrated PSD, the position variance
    variance: Option<f64>,
}

#[derive(Debug, Serialize)]
struct Summary<'a> {
    config: &'a ExperimentConfig,
    resonance_frequency: f64,
    integration_rate: f64,
    sampling_rate: f64,
    n_time: usize,
    modes: Vec<ModeSummary>,
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,nanotrap=info"));

    fmt().with_env_filter(filter).with_target(false).init();
}

fn load_config(cli: &Cli) -> Result<ExperimentConfig> {
    let mut cfg = match &cli.config {
        Some(path) => {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("failed to read config: {}", path.display()))?;
            ExperimentConfig::from_toml_str(&raw)
                .with_context(|| format!("failed to parse config: {}", path.display()))?
        }
        None => ExperimentConfig::default(),
    };

    if let Some(seed) = cli.seed {
        cfg.seed = seed;
    }
    if let Some(size) = cli.ensemble_size {
        cfg.ensemble_size = size;
    }
    if let Some(periods) = cli.period_count {
        cfg.period_count = periods;
    }
    if cli.threads.is_some() {
        cfg.threads = cli.threads;
    }
    cfg.validate().context("invalid configuration")?;
    Ok(cfg)
}

/// Bins averaged before reading off the peak and its linewidth
const LINEWIDTH_SMOOTHING_BINS: usize = 9;

fn summarize(mode: &'static str, outcome: &EnsembleOutcome, min_frequency: f64) -> ModeSummary {
    let smoothed = outcome
        .psd
        .as_ref()
        .map(|psd| psd.smoothed(LINEWIDTH_SMOOTHING_BINS));
    let peak = smoothed
        .as_ref()
        .and_then(|psd| psd.dominant_peak(min_frequency).map(|peak| (psd, peak)));
    ModeSummary {
        mode,
        completed: outcome.completed,
        diverged: outcome.diverged,
        cancelled: outcome.cancelled,
        peak_frequency: peak.map(|(_, p)| p.frequency),
        peak_power: peak.map(|(_, p)| p.power),
        linewidth: peak.and_then(|(psd, p)| psd.half_power_width(&p)),
        variance: outcome
            .psd
            .as_ref()
            .map(|psd| psd.band_power(0.0, f64::INFINITY)),
    }
}

fn write_psd_csv(path: &Path, comparison: &FeedbackComparison) -> Result<()> {
    let modes = comparison.modes();
    let Some(frequencies) = modes
        .iter()
        .find_map(|(_, outcome)| outcome.psd.as_ref().map(|psd| psd.frequencies()))
    else {
        bail!("no realization completed in any feedback mode");
    };

    let mut wtr = Writer::from_path(path)
        .with_context(|| format!("failed to open psd.csv for writing: {}", path.display()))?;
    let mut header = vec!["frequency".to_string()];
    header.extend(modes.iter().map(|(name, _)| name.to_string()));
    wtr.write_record(&header)?;

    for (k, frequency) in frequencies.iter().enumerate() {
        let mut record = vec![format!("{frequency:.6}")];
        for (_, outcome) in &modes {
            let cell = match &outcome.psd {
                Some(psd) => format!("{:.9e}", psd.power()[k]),
                None => String::new(),
            };
            record.push(cell);
        }
        wtr.write_record(&record)?;
    }
    wtr.flush()?;
    Ok(())
}

fn write_trajectory_csv(path: &Path, trajectory: &Trajectory) -> Result<()> {
    let mut wtr = Writer::from_path(path)
        .with_context(|| format!("failed to open trajectory.csv for writing: {}", path.display()))?;
    for i in 0..trajectory.len() {
        wtr.serialize(TrajectoryRow {
            t: trajectory.t[i],
            x: trajectory.x[i],
            v: trajectory.v[i],
            filtered: trajectory.filtered[i],
        })?;
    }
    wtr.flush()?;
    Ok(())
}

fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();

    let cfg = load_config(&cli)?;
    let experiment = cfg.build().context("failed to build experiment")?;

    let mut control = RunControl::unbounded();
    if let Some(secs) = cli.time_budget_secs {
        control = control.with_time_budget(Duration::from_secs(secs));
    }
    let runner = experiment.runner.clone().with_control(control);

    let params = experiment.params;
    info!(
        resonance_hz = params.resonance_frequency(),
        integration_hz = params.integration_rate(),
        sampling_hz = params.sampling_rate(),
        n_time = experiment.setup.n_time(),
        "experiment ready"
    );

    let comparison = compare_feedback_modes(&runner, &experiment.setup, experiment.law)
        .context("ensemble run failed")?;
    let sample = runner
        .run_single(&experiment.setup, 0)
        .context("sample realization failed")?;

    fs::create_dir_all(&cli.outdir)
        .with_context(|| format!("failed to create output dir: {}", cli.outdir.display()))?;
    write_psd_csv(&cli.outdir.join("psd.csv"), &comparison)?;
    write_trajectory_csv(&cli.outdir.join("trajectory.csv"), &sample.trajectory)?;

    // Skip the lowest bins, which carry the slow drift of the finite run.
    let min_frequency = params.resonance_frequency() / 4.0;
    let modes: Vec<ModeSummary> = comparison
        .modes()
        .iter()
        .map(|&(name, outcome)| summarize(name, outcome, min_frequency))
        .collect();

    let summary = Summary {
        config: &cfg,
        resonance_frequency: params.resonance_frequency(),
        integration_rate: params.integration_rate(),
        sampling_rate: params.sampling_rate(),
        n_time: experiment.setup.n_time(),
        modes,
    };
    let summary_path = cli.outdir.join("summary.json");
    let payload = serde_json::to_string_pretty(&summary).context("failed to serialize summary")?;
    fs::write(&summary_path, payload)
        .with_context(|| format!("failed to write summary: {}", summary_path.display()))?;

    println!("resonance: {:.1} Hz", params.resonance_frequency());
    for mode in &summary.modes {
        let peak = mode
            .peak_frequency
            .map_or_else(|| "-".to_string(), |f| format!("{f:.1} Hz"));
        let width = mode
            .linewidth
            .map_or_else(|| "-".to_string(), |w| format!("{w:.1} Hz"));
        let variance = mode
            .variance
            .map_or_else(|| "-".to_string(), |v| format!("{v:.3e}"));
        println!(
            "{:>9}: {} completed, {} diverged, {} cancelled, peak {}, linewidth {}, variance {}",
            mode.mode, mode.completed, mode.diverged, mode.cancelled, peak, width, variance
        );
    }
    println!("wrote outputs to {}", cli.outdir.display());
    Ok(())
}
