use crate::data::SessionKind;
use crate::model::{DegradationOptions, TrimBand};
use crate::pace::Reference;
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Which analysis to run per unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    /// Stints and per-stint degradation rate
    Degradation,
    /// Mean lap time and trend per compound
    Compounds,
    /// Median race pace normalised against a reference
    Pace,
    /// Race median against the driver's best qualifying lap
    QualiDelta,
    /// Relative pace spread across the season
    Consistency,
    /// Sector means, ideal lap, delta to fastest sector
    Sectors,
    /// Rolling average lap time
    Rolling,
    /// Lap-time mean and spread per driver, field ranked by pace and by consistency
    LapTimes,
}

// values given on the command line, all optional
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Overrides {
    pub cache_dir: Option<PathBuf>,
    pub season: Option<u16>,
    pub events: Vec<String>,
    pub session: Option<SessionKind>,
    pub drivers: Vec<String>,
    pub metrics: Vec<Metric>,
    pub reference_driver: Option<String>,
    pub trim_outliers: bool,
}

/// Everything that varies between analysis runs.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AnalysisConfig {
    /// Directory holding cached session exports.
    pub cache_dir: PathBuf,
    pub season: u16,
    /// Empty means every event found for the season.
    pub events: Vec<String>,
    pub session: SessionKind,
    /// Empty means every driver in the session.
    pub drivers: Vec<String>,
    pub metrics: Vec<Metric>,
    pub reference: Reference,
    pub trim_outliers: bool,
    pub trim_percentiles: [f64; 2],
    pub rolling_window: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("cache"),
            season: 2023,
            events: Vec::new(),
            session: SessionKind::Race,
            drivers: Vec::new(),
            metrics: vec![Metric::Degradation],
            reference: Reference::Fastest,
            trim_outliers: false,
            trim_percentiles: [5.0, 95.0],
            rolling_window: 5,
        }
    }
}

impl AnalysisConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read_to_string(path)
            .with_context(|| format!("failed to read config at {}", path.display()))?;
        let cfg: AnalysisConfig = serde_json::from_str(&data)
            .with_context(|| format!("failed to parse config {}", path.display()))?;
        Ok(cfg)
    }

    /// Lay command-line values over whatever the file (or the defaults) said.
    /// Empty lists and unset options leave the current value alone.
    pub fn apply(&mut self, overrides: Overrides) {
        if let Some(dir) = overrides.cache_dir {
            self.cache_dir = dir;
        }
        if let Some(season) = overrides.season {
            self.season = season;
        }
        if !overrides.events.is_empty() {
            self.events = overrides.events;
        }
        if let Some(session) = overrides.session {
            self.session = session;
        }
        if !overrides.drivers.is_empty() {
            self.drivers = overrides.drivers;
        }
        if !overrides.metrics.is_empty() {
            self.metrics = overrides.metrics;
        }
        if let Some(driver) = overrides.reference_driver {
            self.reference = Reference::Driver { driver };
        }
        // a bare flag can only switch trimming on
        if overrides.trim_outliers {
            self.trim_outliers = true;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.rolling_window == 0 {
            bail!("rolling_window must be at least 1");
        }
        let [lower, upper] = self.trim_percentiles;
        if !(0.0..=100.0).contains(&lower) || !(0.0..=100.0).contains(&upper) || lower >= upper {
            bail!("trim_percentiles must satisfy 0 <= lower < upper <= 100, got [{}, {}]", lower, upper);
        }
        if let Reference::Driver { driver } = &self.reference {
            if driver.trim().is_empty() {
                bail!("reference driver must not be empty");
            }
        }
        if self.metrics.is_empty() {
            bail!("no metrics selected");
        }
        Ok(())
    }

    pub fn degradation_options(&self) -> DegradationOptions {
        let [lower, upper] = self.trim_percentiles;
        DegradationOptions {
            trim: self.trim_outliers.then_some(TrimBand { lower, upper }),
        }
    }

    pub fn wants(&self, metric: Metric) -> bool {
        self.metrics.contains(&metric)
    }
}
