use anyhow::{bail, Context, Result};
use clap::Parser;
use stintlab::config::{AnalysisConfig, Metric, Overrides};
use stintlab::data::{CsvLapSource, SessionKind};
use stintlab::{analysis, report};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Stint degradation and pace analysis over cached lap exports.
#[derive(Parser, Debug)]
#[command(name = "stintlab", version, about)]
struct Cli {
    /// JSON analysis config; flags below override its values
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory holding cached session exports
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    #[arg(long)]
    season: Option<u16>,

    /// Event name (repeatable); defaults to every cached event of the season
    #[arg(short, long = "event")]
    events: Vec<String>,

    /// Session to analyse (Race, Qualifying, Sprint, FP1, ...)
    #[arg(long)]
    session: Option<SessionKind>,

    /// Driver code (repeatable); defaults to every driver in the session
    #[arg(short, long = "driver")]
    drivers: Vec<String>,

    /// Metric to compute (repeatable)
    #[arg(short, long = "metric", value_enum)]
    metrics: Vec<Metric>,

    /// Normalise pace against this driver instead of the fastest
    #[arg(long)]
    reference_driver: Option<String>,

    /// Drop laps outside the 5th-95th percentile before fitting degradation
    #[arg(long)]
    trim_outliers: bool,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn into_config(self) -> Result<AnalysisConfig> {
        let mut cfg = match &self.config {
            Some(path) => AnalysisConfig::load(path)?,
            None => AnalysisConfig::default(),
        };
        cfg.apply(Overrides {
            cache_dir: self.cache_dir,
            season: self.season,
            events: self.events,
            session: self.session,
            drivers: self.drivers,
            metrics: self.metrics,
            reference_driver: self.reference_driver,
            trim_outliers: self.trim_outliers,
        });
        cfg.validate().context("invalid analysis config")?;
        Ok(cfg)
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let cfg = cli.into_config()?;
    let source = CsvLapSource::new(&cfg.cache_dir);
    if !source.cache_dir().is_dir() {
        bail!("cache directory {} does not exist", source.cache_dir().display());
    }
    tracing::info!(season = cfg.season, session = %cfg.session, metrics = ?cfg.metrics, "starting analysis");

    let report = analysis::run(&cfg, &source);
    print!("{}", report::render(&report));

    if report.succeeded().next().is_none() {
        bail!("no unit produced a result");
    }
    Ok(())
}
