use crate::config::{AnalysisConfig, Metric};
use crate::data::{LapRecord, LapSource, SessionKey, SessionKind};
use crate::error::{AnalysisError, Result};
use crate::model::{self, CompoundTrend, DegradationResult};
use crate::pace::{self, ConsistencySummary, FieldLapTimes, PaceSummary, RollingPoint};
use crate::sector::{self, SectorSummary};
use crate::stint::{self, StintSummary};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{info, warn};

/// What one outcome was computed for. Season-wide units have no event,
/// field-wide units have no driver, constructor units carry a team instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitKey {
    pub metric: Metric,
    pub event: Option<String>,
    pub driver: Option<String>,
    pub team: Option<String>,
}

impl fmt::Display for UnitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.metric)?;
        if let Some(event) = &self.event {
            write!(f, " {}", event)?;
        }
        if let Some(driver) = &self.driver {
            write!(f, " {}", driver)?;
        }
        if let Some(team) = &self.team {
            write!(f, " [{}]", team)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StintReport {
    pub summary: StintSummary,
    pub degradation: Result<DegradationResult>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Finding {
    Stints(Vec<StintReport>),
    Compounds(Vec<CompoundTrend>),
    Pace(Vec<PaceSummary>),
    QualiDelta(PaceSummary),
    Sectors(SectorSummary),
    Rolling(Vec<RollingPoint>),
    Consistency(ConsistencySummary),
    LapTimes(FieldLapTimes),
}

#[derive(Debug, Clone, PartialEq)]
pub struct UnitOutcome {
    pub unit: UnitKey,
    pub outcome: Result<Finding>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnalysisReport {
    pub outcomes: Vec<UnitOutcome>,
}

impl AnalysisReport {
    fn record(&mut self, unit: UnitKey, outcome: Result<Finding>) {
        if let Err(e) = &outcome {
            warn!(unit = %unit, error = %e, "skipping unit");
        }
        self.outcomes.push(UnitOutcome { unit, outcome });
    }

    pub fn succeeded(&self) -> impl Iterator<Item = (&UnitKey, &Finding)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.outcome.as_ref().ok().map(|f| (&o.unit, f)))
    }

    pub fn failed(&self) -> impl Iterator<Item = (&UnitKey, &AnalysisError)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.outcome.as_ref().err().map(|e| (&o.unit, e)))
    }
}

fn unit(metric: Metric, event: Option<&str>, driver: Option<&str>) -> UnitKey {
    UnitKey {
        metric,
        event: event.map(str::to_string),
        driver: driver.map(str::to_string),
        team: None,
    }
}

fn team_unit(team: &str) -> UnitKey {
    UnitKey {
        metric: Metric::Consistency,
        event: None,
        driver: None,
        team: Some(team.to_string()),
    }
}

// first team name found on a driver's laps, if the export has one
fn team_of(laps: &[LapRecord]) -> Option<String> {
    laps.iter().find_map(|l| l.team.clone())
}

// the session comes back lap-based, regroup it so every driver gets a sorted list of their own
fn by_driver(laps: Vec<LapRecord>) -> BTreeMap<String, Vec<LapRecord>> {
    let mut grouped: BTreeMap<String, Vec<LapRecord>> = BTreeMap::new();
    for lap in laps {
        grouped.entry(lap.driver_id.clone()).or_default().push(lap);
    }
    for laps in grouped.values_mut() {
        laps.sort_by_key(|l| l.lap_number);
    }
    grouped
}

fn laps_of<'a>(grouped: &'a BTreeMap<String, Vec<LapRecord>>, driver: &str) -> &'a [LapRecord] {
    grouped.get(driver).map(Vec::as_slice).unwrap_or(&[])
}

/// Stints of one driver with a degradation estimate per stint.
pub fn stint_reports(laps: &[LapRecord], config: &AnalysisConfig) -> Result<Vec<StintReport>> {
    if laps.is_empty() {
        return Err(AnalysisError::insufficient(1, 0));
    }
    let opts = config.degradation_options();
    Ok(stint::segment(laps)
        .iter()
        .map(|s| StintReport {
            summary: stint::summarize(s),
            degradation: model::estimate(s, &opts),
        })
        .collect())
}

fn quali_delta(race: &[LapRecord], quali: &[LapRecord], driver: &str) -> Result<PaceSummary> {
    let race_pace = pace::median_pace(race)?;
    let quali_pace = pace::best_lap(quali).map_err(|_| {
        AnalysisError::ReferenceUnavailable(format!("no timed qualifying lap for {}", driver))
    })?;
    pace::summarize(driver, race_pace, Some(quali_pace))
}

/// Run every configured metric over every configured event and driver.
///
/// A unit that fails is recorded and skipped; nothing here aborts the batch.
pub fn run<S: LapSource>(config: &AnalysisConfig, source: &S) -> AnalysisReport {
    let mut report = AnalysisReport::default();

    let events = if config.events.is_empty() {
        match source.events(config.season) {
            Ok(events) => events,
            Err(e) => {
                for metric in &config.metrics {
                    report.record(unit(*metric, None, None), Err(e.clone()));
                }
                return report;
            }
        }
    } else {
        config.events.clone()
    };
    let wanted_drivers: Vec<String> = config.drivers.iter().map(|d| d.trim().to_uppercase()).collect();

    let mut relative_paces: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    let mut team_paces: BTreeMap<String, Vec<f64>> = BTreeMap::new();

    for event in &events {
        let key = SessionKey::new(config.season, event.as_str(), config.session);
        info!(session = %key, "analysing event");

        let session = match source.session_laps(&key) {
            Ok(laps) => by_driver(laps),
            Err(e) => {
                for metric in &config.metrics {
                    report.record(unit(*metric, Some(event.as_str()), None), Err(e.clone()));
                }
                continue;
            }
        };
        let drivers: Vec<String> = if wanted_drivers.is_empty() {
            session.keys().cloned().collect()
        } else {
            wanted_drivers.clone()
        };

        let quali = if config.wants(Metric::QualiDelta) {
            let qkey = SessionKey::new(config.season, event.as_str(), SessionKind::Qualifying);
            Some(source.session_laps(&qkey).map(by_driver))
        } else {
            None
        };

        let mut sector_summaries = Vec::new();
        for driver in &drivers {
            let laps = laps_of(&session, driver);

            for metric in &config.metrics {
                let outcome = match metric {
                    Metric::Degradation => stint_reports(laps, config).map(Finding::Stints),
                    Metric::Compounds => {
                        let trends = model::compound_trends(laps);
                        if trends.is_empty() {
                            Err(AnalysisError::insufficient(1, 0))
                        } else {
                            Ok(Finding::Compounds(trends))
                        }
                    }
                    Metric::Rolling => {
                        pace::rolling_average(laps, config.rolling_window).map(Finding::Rolling)
                    }
                    Metric::QualiDelta => match &quali {
                        Some(Ok(q)) => quali_delta(laps, laps_of(q, driver), driver).map(Finding::QualiDelta),
                        Some(Err(e)) => Err(e.clone()),
                        None => continue,
                    },
                    Metric::Sectors => {
                        match sector::summarize_sectors(driver, laps) {
                            Ok(s) => sector_summaries.push(s),
                            Err(e) => report.record(unit(*metric, Some(event.as_str()), Some(driver.as_str())), Err(e)),
                        }
                        continue;
                    }
                    Metric::Pace | Metric::Consistency | Metric::LapTimes => continue,
                };
                report.record(unit(*metric, Some(event.as_str()), Some(driver.as_str())), outcome);
            }
        }

        for summary in sector::compare_sectors(sector_summaries) {
            let driver = summary.driver_id.clone();
            report.record(unit(Metric::Sectors, Some(event.as_str()), Some(driver.as_str())), Ok(Finding::Sectors(summary)));
        }

        if config.wants(Metric::LapTimes) {
            let stats: Vec<_> = drivers
                .iter()
                .filter_map(|d| pace::lap_time_stats(d, laps_of(&session, d)).ok())
                .collect();
            let outcome = pace::rank_lap_times(stats).map(Finding::LapTimes);
            report.record(unit(Metric::LapTimes, Some(event.as_str()), None), outcome);
        }

        if config.wants(Metric::Pace) || config.wants(Metric::Consistency) {
            let medians: BTreeMap<String, f64> = session
                .iter()
                .filter_map(|(d, laps)| pace::median_pace(laps).ok().map(|p| (d.clone(), p)))
                .collect();

            if config.wants(Metric::Pace) {
                let selected: BTreeMap<String, f64> = medians
                    .iter()
                    .filter(|(d, _)| drivers.contains(d))
                    .map(|(d, p)| (d.clone(), *p))
                    .collect();
                let outcome = pace::normalize(&selected, &config.reference).map(Finding::Pace);
                report.record(unit(Metric::Pace, Some(event.as_str()), None), outcome);
            }

            // consistency is always relative to the fastest pace of the whole field
            if config.wants(Metric::Consistency) {
                match pace::normalize(&medians, &pace::Reference::Fastest) {
                    Ok(field) => {
                        for s in field.into_iter().filter(|s| drivers.contains(&s.driver_id)) {
                            // team is taken per event, drivers do switch mid-season
                            if let Some(team) = team_of(laps_of(&session, &s.driver_id)) {
                                team_paces.entry(team).or_default().push(s.delta_percent);
                            }
                            relative_paces.entry(s.driver_id).or_default().push(s.delta_percent);
                        }
                    }
                    Err(e) => warn!(event = %event, error = %e, "no field pace for consistency"),
                }
            }
        }
    }

    if config.wants(Metric::Consistency) {
        let drivers: Vec<String> = if wanted_drivers.is_empty() {
            relative_paces.keys().cloned().collect()
        } else {
            wanted_drivers
        };
        for driver in &drivers {
            let paces = relative_paces.get(driver).map(Vec::as_slice).unwrap_or(&[]);
            let outcome = pace::consistency(driver, paces).map(Finding::Consistency);
            report.record(unit(Metric::Consistency, None, Some(driver.as_str())), outcome);
        }
        for (team, paces) in &team_paces {
            let outcome = pace::consistency(team, paces).map(Finding::Consistency);
            report.record(team_unit(team), outcome);
        }
    }

    info!(
        succeeded = report.succeeded().count(),
        failed = report.failed().count(),
        "analysis finished"
    );
    report
}
