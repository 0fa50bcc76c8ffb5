use crate::error::{AnalysisError, Result};
use csv::ReaderBuilder;
use serde::Deserialize;
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, warn};

/// Tyre compound as reported for a lap. Anything we don't recognise lands in `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Compound {
    Soft,
    Medium,
    Hard,
    Intermediate,
    Wet,
    Unknown,
}

impl Compound {
    pub fn parse(label: &str) -> Self {
        match label.trim().to_uppercase().as_str() {
            "SOFT" | "S" => Compound::Soft,
            "MEDIUM" | "M" => Compound::Medium,
            "HARD" | "H" => Compound::Hard,
            "INTERMEDIATE" | "INTER" | "I" => Compound::Intermediate,
            "WET" | "W" => Compound::Wet,
            _ => Compound::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Compound::Soft => "SOFT",
            Compound::Medium => "MEDIUM",
            Compound::Hard => "HARD",
            Compound::Intermediate => "INTERMEDIATE",
            Compound::Wet => "WET",
            Compound::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for Compound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(try_from = "String")]
pub enum SessionKind {
    Practice1,
    Practice2,
    Practice3,
    SprintQualifying,
    Sprint,
    Qualifying,
    Race,
}

impl SessionKind {
    /// File stem used inside an event directory of the cache.
    pub fn slug(&self) -> &'static str {
        match self {
            SessionKind::Practice1 => "fp1",
            SessionKind::Practice2 => "fp2",
            SessionKind::Practice3 => "fp3",
            SessionKind::SprintQualifying => "sprint_qualifying",
            SessionKind::Sprint => "sprint",
            SessionKind::Qualifying => "qualifying",
            SessionKind::Race => "race",
        }
    }
}

impl FromStr for SessionKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let norm: String = s
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_lowercase();
        match norm.as_str() {
            "fp1" | "practice1" => Ok(SessionKind::Practice1),
            "fp2" | "practice2" => Ok(SessionKind::Practice2),
            "fp3" | "practice3" => Ok(SessionKind::Practice3),
            "sq" | "sprintqualifying" | "sprintshootout" => Ok(SessionKind::SprintQualifying),
            "s" | "sprint" => Ok(SessionKind::Sprint),
            "q" | "qualifying" | "quali" => Ok(SessionKind::Qualifying),
            "r" | "race" => Ok(SessionKind::Race),
            _ => Err(format!("unknown session kind '{}'", s)),
        }
    }
}

impl TryFrom<String> for SessionKind {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for SessionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionKind::Practice1 => "Practice 1",
            SessionKind::Practice2 => "Practice 2",
            SessionKind::Practice3 => "Practice 3",
            SessionKind::SprintQualifying => "Sprint Qualifying",
            SessionKind::Sprint => "Sprint",
            SessionKind::Qualifying => "Qualifying",
            SessionKind::Race => "Race",
        };
        f.write_str(name)
    }
}

/// Identifies one session of one event in one season.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub season: u16,
    pub event: String,
    pub session: SessionKind,
}

impl SessionKey {
    pub fn new(season: u16, event: impl Into<String>, session: SessionKind) -> Self {
        Self {
            season,
            event: event.into(),
            session,
        }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.season, self.event, self.session)
    }
}

/// Lower-case the event name and collapse every run of non-alphanumerics into `_`.
pub fn event_slug(event: &str) -> String {
    let mut slug = String::with_capacity(event.len());
    let mut pending_sep = false;
    for c in event.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_sep && !slug.is_empty() {
                slug.push('_');
            }
            pending_sep = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_sep = true;
        }
    }
    slug
}

/// One lap of one driver, already validated at the loader boundary.
#[derive(Debug, Clone, PartialEq)]
pub struct LapRecord {
    pub driver_id: String,
    /// Constructor the driver raced for in this session, when the export names one.
    pub team: Option<String>,
    pub lap_number: u32,
    pub lap_time: Option<Duration>,
    pub sector_times: [Option<Duration>; 3],
    pub compound: Compound,
    /// Stint number as reported upstream. Advisory only; segmentation recomputes it.
    pub stint_id: Option<u32>,
    pub is_accurate: bool,
    pub pit_in: bool,
    pub pit_out: bool,
    pub track_position: Option<u32>,
}

impl LapRecord {
    pub fn lap_seconds(&self) -> Option<f64> {
        self.lap_time.map(|t| t.as_secs_f64())
    }

    pub fn sector_seconds(&self, sector: usize) -> Option<f64> {
        self.sector_times
            .get(sector)
            .copied()
            .flatten()
            .map(|t| t.as_secs_f64())
    }
}

/// Where lap series come from. The analysis never cares whether it's disk, network or memory.
pub trait LapSource {
    /// Every lap of every driver in the session, ordered by driver then lap number.
    fn session_laps(&self, key: &SessionKey) -> Result<Vec<LapRecord>>;

    /// Events available for a season.
    fn events(&self, season: u16) -> Result<Vec<String>>;

    fn drivers(&self, key: &SessionKey) -> Result<Vec<String>> {
        let mut drivers: Vec<String> = self
            .session_laps(key)?
            .into_iter()
            .map(|lap| lap.driver_id)
            .collect();
        drivers.sort();
        drivers.dedup();
        Ok(drivers)
    }

    /// One driver's laps sorted by lap number. A driver missing from the session gives an empty vec.
    fn driver_laps(&self, key: &SessionKey, driver: &str) -> Result<Vec<LapRecord>> {
        let mut laps: Vec<LapRecord> = self
            .session_laps(key)?
            .into_iter()
            .filter(|lap| lap.driver_id.eq_ignore_ascii_case(driver))
            .collect();
        laps.sort_by_key(|lap| lap.lap_number);
        Ok(laps)
    }
}

// renaming the export columns we read. everything past Driver may be missing
// from older exports, in which case the value is simply absent
#[derive(Debug, Deserialize)]
struct RawLapRow {
    #[serde(rename = "Driver")]
    driver: String,
    #[serde(rename = "Team", default)]
    team: Option<String>,
    #[serde(rename = "LapNumber", default, deserialize_with = "csv::invalid_option")]
    lap_number: Option<f64>,
    #[serde(rename = "LapTimeSeconds", default, deserialize_with = "csv::invalid_option")]
    lap_time_seconds: Option<f64>,
    #[serde(rename = "Sector1Seconds", default, deserialize_with = "csv::invalid_option")]
    sector1_seconds: Option<f64>,
    #[serde(rename = "Sector2Seconds", default, deserialize_with = "csv::invalid_option")]
    sector2_seconds: Option<f64>,
    #[serde(rename = "Sector3Seconds", default, deserialize_with = "csv::invalid_option")]
    sector3_seconds: Option<f64>,
    #[serde(rename = "Compound", default)]
    compound: Option<String>,
    #[serde(rename = "Stint", default, deserialize_with = "csv::invalid_option")]
    stint: Option<f64>,
    #[serde(rename = "IsAccurate", default)]
    is_accurate: Option<String>,
    #[serde(rename = "PitInTime", default)]
    pit_in_time: Option<String>,
    #[serde(rename = "PitOutTime", default)]
    pit_out_time: Option<String>,
    #[serde(rename = "Position", default, deserialize_with = "csv::invalid_option")]
    position: Option<f64>,
}

fn positive_duration(secs: Option<f64>) -> Option<Duration> {
    secs.filter(|s| s.is_finite() && *s > 0.0)
        .and_then(|s| Duration::try_from_secs_f64(s).ok())
}

fn positive_int(value: Option<f64>) -> Option<u32> {
    value
        .filter(|v| v.is_finite() && *v >= 1.0 && *v <= u32::MAX as f64)
        .map(|v| v.round() as u32)
}

fn parse_flag(value: Option<&str>) -> bool {
    matches!(
        value.map(|v| v.trim().to_lowercase()).as_deref(),
        Some("true" | "1" | "1.0" | "yes")
    )
}

// pandas writes missing timestamps as an empty cell, some exports spell it out
fn has_timestamp(value: Option<&str>) -> bool {
    match value.map(str::trim) {
        None | Some("") => false,
        Some(v) => !matches!(v.to_lowercase().as_str(), "nat" | "nan" | "none"),
    }
}

impl RawLapRow {
    fn into_record(self) -> Option<LapRecord> {
        let driver = self.driver.trim().to_uppercase();
        let lap_number = positive_int(self.lap_number)?;
        if driver.is_empty() {
            return None;
        }
        let team = self
            .team
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());
        Some(LapRecord {
            driver_id: driver,
            team,
            lap_number,
            lap_time: positive_duration(self.lap_time_seconds),
            sector_times: [
                positive_duration(self.sector1_seconds),
                positive_duration(self.sector2_seconds),
                positive_duration(self.sector3_seconds),
            ],
            compound: self
                .compound
                .as_deref()
                .map(Compound::parse)
                .unwrap_or(Compound::Unknown),
            stint_id: positive_int(self.stint),
            is_accurate: parse_flag(self.is_accurate.as_deref()),
            pit_in: has_timestamp(self.pit_in_time.as_deref()),
            pit_out: has_timestamp(self.pit_out_time.as_deref()),
            track_position: positive_int(self.position),
        })
    }
}

/// Reads lap exports out of a cache directory laid out as
/// `<cache_dir>/<season>/<event_slug>/<session_slug>.csv`.
#[derive(Debug, Clone)]
pub struct CsvLapSource {
    cache_dir: PathBuf,
}

impl CsvLapSource {
    pub fn new<P: AsRef<Path>>(cache_dir: P) -> Self {
        Self {
            cache_dir: cache_dir.as_ref().to_path_buf(),
        }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn session_path(&self, key: &SessionKey) -> PathBuf {
        self.cache_dir
            .join(key.season.to_string())
            .join(event_slug(&key.event))
            .join(format!("{}.csv", key.session.slug()))
    }

    fn read_laps(path: &Path) -> std::result::Result<Vec<LapRecord>, csv::Error> {
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_path(path)?;

        let mut laps = Vec::new();
        let mut seen: HashSet<(String, u32)> = HashSet::new();
        for (row, res) in reader.deserialize().enumerate() {
            let raw: RawLapRow = res?;
            match raw.into_record() {
                Some(lap) => {
                    if seen.insert((lap.driver_id.clone(), lap.lap_number)) {
                        laps.push(lap);
                    } else {
                        warn!(row = row + 1, driver = %lap.driver_id, lap = lap.lap_number, "dropping duplicate lap row");
                    }
                }
                None => warn!(row = row + 1, path = %path.display(), "dropping lap row without driver or lap number"),
            }
        }

        // the export is lap-based, so put it back in driver order before anyone groups it
        laps.sort_by(|a, b| {
            a.driver_id
                .cmp(&b.driver_id)
                .then(a.lap_number.cmp(&b.lap_number))
        });
        Ok(laps)
    }
}

impl LapSource for CsvLapSource {
    fn session_laps(&self, key: &SessionKey) -> Result<Vec<LapRecord>> {
        let path = self.session_path(key);
        if !path.is_file() {
            return Err(AnalysisError::upstream(
                key,
                format!("no cached session at {}", path.display()),
            ));
        }
        let laps = Self::read_laps(&path).map_err(|e| AnalysisError::upstream(key, e))?;
        debug!(session = %key, laps = laps.len(), "loaded session laps");
        Ok(laps)
    }

    fn events(&self, season: u16) -> Result<Vec<String>> {
        let season_dir = self.cache_dir.join(season.to_string());
        let entries = fs::read_dir(&season_dir)
            .map_err(|e| AnalysisError::upstream(format!("season {}", season), e))?;

        let mut events: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_dir())
            .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
            .collect();
        events.sort();
        Ok(events)
    }
}
