use crate::data::LapRecord;
use crate::error::{AnalysisError, Result};
use crate::filter;
use serde::Deserialize;
use std::collections::{BTreeMap, VecDeque};
use std::fmt;

/// A driver's pace against a reference pace.
#[derive(Debug, Clone, PartialEq)]
pub struct PaceSummary {
    pub driver_id: String,
    pub reference_value: f64,
    pub value: f64,
    pub delta: f64,
    pub delta_percent: f64,
}

/// What a set of paces is normalised against.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Reference {
    /// Lowest value in the set.
    #[default]
    Fastest,
    /// One nominated driver's value.
    Driver { driver: String },
}

pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

/// Median of the usable lap times. The representative race pace.
pub fn median_pace(laps: &[LapRecord]) -> Result<f64> {
    let times = filter::usable_lap_times(laps);
    median(&times).ok_or(AnalysisError::insufficient(1, 0))
}

/// Fastest timed lap, used as a qualifying reference.
pub fn best_lap(laps: &[LapRecord]) -> Result<f64> {
    filter::timed_laps(laps)
        .into_iter()
        .filter_map(LapRecord::lap_seconds)
        .min_by(f64::total_cmp)
        .ok_or(AnalysisError::insufficient(1, 0))
}

/// Delta of one value against a reference. A zero, negative, non-finite or
/// missing reference is `ReferenceUnavailable`, so no NaN or Inf escapes.
pub fn summarize(driver_id: &str, value: f64, reference: Option<f64>) -> Result<PaceSummary> {
    let reference = match reference {
        Some(r) if r.is_finite() && r > 0.0 => r,
        Some(r) => {
            return Err(AnalysisError::ReferenceUnavailable(format!(
                "reference pace {} is not usable",
                r
            )))
        }
        None => {
            return Err(AnalysisError::ReferenceUnavailable(
                "no reference pace".to_string(),
            ))
        }
    };
    if !value.is_finite() {
        return Err(AnalysisError::insufficient(1, 0));
    }
    let delta = value - reference;
    Ok(PaceSummary {
        driver_id: driver_id.to_string(),
        reference_value: reference,
        value,
        delta,
        delta_percent: delta / reference * 100.0,
    })
}

/// Normalise every value in the set against one reference. Output is ordered
/// from smallest to largest delta.
pub fn normalize(values: &BTreeMap<String, f64>, reference: &Reference) -> Result<Vec<PaceSummary>> {
    let reference_value = match reference {
        Reference::Fastest => values
            .values()
            .copied()
            .filter(|v| v.is_finite())
            .min_by(f64::total_cmp),
        Reference::Driver { driver } => values
            .iter()
            .find(|(d, _)| d.eq_ignore_ascii_case(driver))
            .map(|(_, v)| *v),
    };
    if reference_value.is_none() {
        return Err(AnalysisError::ReferenceUnavailable(match reference {
            Reference::Fastest => "empty field".to_string(),
            Reference::Driver { driver } => format!("no pace for {}", driver),
        }));
    }

    let mut summaries = values
        .iter()
        .map(|(driver, value)| summarize(driver, *value, reference_value))
        .collect::<Result<Vec<_>>>()?;
    summaries.sort_by(|a, b| a.delta.total_cmp(&b.delta));
    Ok(summaries)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaceVerdict {
    Exceptional,
    InLine,
    DropOff,
}

impl fmt::Display for PaceVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            PaceVerdict::Exceptional => "exceptional race pace compared to the field",
            PaceVerdict::InLine => "in line with the field average",
            PaceVerdict::DropOff => "pace drop-off much higher than average",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldComparison {
    pub average_delta_percent: f64,
    pub verdicts: Vec<(String, f64, PaceVerdict)>,
}

/// Percentage-point band around the field average inside which a driver is "in line".
pub const FIELD_MARGIN_PCT: f64 = 1.5;

/// Place each driver's delta percent against the field average.
pub fn classify_against_field(summaries: &[PaceSummary], margin: f64) -> Result<FieldComparison> {
    if summaries.is_empty() {
        return Err(AnalysisError::insufficient(1, 0));
    }
    let average =
        summaries.iter().map(|s| s.delta_percent).sum::<f64>() / summaries.len() as f64;
    let verdicts = summaries
        .iter()
        .map(|s| {
            let verdict = if s.delta_percent < average - margin {
                PaceVerdict::Exceptional
            } else if s.delta_percent > average + margin {
                PaceVerdict::DropOff
            } else {
                PaceVerdict::InLine
            };
            (s.driver_id.clone(), s.delta_percent, verdict)
        })
        .collect();
    Ok(FieldComparison {
        average_delta_percent: average,
        verdicts,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConsistencyTier {
    HighlyConsistent,
    ModeratelyConsistent,
    Inconsistent,
}

impl ConsistencyTier {
    pub fn from_std_dev(std_dev: f64) -> Self {
        if std_dev < 0.5 {
            ConsistencyTier::HighlyConsistent
        } else if std_dev < 0.75 {
            ConsistencyTier::ModeratelyConsistent
        } else {
            ConsistencyTier::Inconsistent
        }
    }
}

impl fmt::Display for ConsistencyTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ConsistencyTier::HighlyConsistent => "Tier 1 (Highly Consistent)",
            ConsistencyTier::ModeratelyConsistent => "Tier 2 (Moderately Consistent)",
            ConsistencyTier::Inconsistent => "Tier 3 (Inconsistent)",
        };
        f.write_str(text)
    }
}

/// Season spread of one driver or one constructor.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsistencySummary {
    /// Driver code or team name.
    pub subject: String,
    pub mean_relative_pace: f64,
    pub std_dev: f64,
    pub events: usize,
    pub tier: ConsistencyTier,
}

/// Sample standard deviation (n - 1). Undefined below two values.
pub fn sample_std(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    Some(var.sqrt())
}

// one relative-pace percentage per event and driver. for a team that is every
// event of every driver who raced for it, so a two-car team has twice the samples
pub fn consistency(subject: &str, relative_paces: &[f64]) -> Result<ConsistencySummary> {
    let std_dev = sample_std(relative_paces)
        .ok_or(AnalysisError::insufficient(2, relative_paces.len()))?;
    let mean = relative_paces.iter().sum::<f64>() / relative_paces.len() as f64;
    Ok(ConsistencySummary {
        subject: subject.to_string(),
        mean_relative_pace: mean,
        std_dev,
        events: relative_paces.len(),
        tier: ConsistencyTier::from_std_dev(std_dev),
    })
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RollingPoint {
    pub lap_number: u32,
    pub lap_time: f64,
    pub rolling_mean: f64,
}

/// Trailing mean over the last `window` usable laps. The first laps average
/// whatever is available so far.
pub fn rolling_average(laps: &[LapRecord], window: usize) -> Result<Vec<RollingPoint>> {
    let window = window.max(1);
    let usable = filter::usable_laps(laps);
    if usable.is_empty() {
        return Err(AnalysisError::insufficient(1, 0));
    }

    let mut recent: VecDeque<f64> = VecDeque::with_capacity(window);
    let mut points = Vec::with_capacity(usable.len());
    for lap in usable {
        let Some(t) = lap.lap_seconds() else { continue };
        if recent.len() >= window {
            recent.pop_front();
        }
        recent.push_back(t);
        points.push(RollingPoint {
            lap_number: lap.lap_number,
            lap_time: t,
            rolling_mean: recent.iter().sum::<f64>() / recent.len() as f64,
        });
    }
    Ok(points)
}

/// Average and spread of one driver's usable lap times within a single race.
#[derive(Debug, Clone, PartialEq)]
pub struct LapTimeStats {
    pub driver_id: String,
    pub mean: f64,
    pub std_dev: f64,
    pub laps: usize,
}

/// A race's drivers ranked two ways: quickest average first, steadiest first.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldLapTimes {
    pub drivers: Vec<LapTimeStats>,
    pub by_pace: Vec<String>,
    pub by_consistency: Vec<String>,
}

pub fn lap_time_stats(driver_id: &str, laps: &[LapRecord]) -> Result<LapTimeStats> {
    let times = filter::usable_lap_times(laps);
    let std_dev = sample_std(&times).ok_or(AnalysisError::insufficient(2, times.len()))?;
    Ok(LapTimeStats {
        driver_id: driver_id.to_string(),
        mean: times.iter().sum::<f64>() / times.len() as f64,
        std_dev,
        laps: times.len(),
    })
}

// drivers with fewer than two usable laps have no spread and are left out of both rankings
pub fn rank_lap_times(drivers: Vec<LapTimeStats>) -> Result<FieldLapTimes> {
    if drivers.is_empty() {
        return Err(AnalysisError::insufficient(1, 0));
    }
    let mut pace: Vec<&LapTimeStats> = drivers.iter().collect();
    pace.sort_by(|a, b| a.mean.total_cmp(&b.mean));
    let by_pace = pace.iter().map(|d| d.driver_id.clone()).collect();

    let mut steady: Vec<&LapTimeStats> = drivers.iter().collect();
    steady.sort_by(|a, b| a.std_dev.total_cmp(&b.std_dev));
    let by_consistency = steady.iter().map(|d| d.driver_id.clone()).collect();

    Ok(FieldLapTimes {
        drivers,
        by_pace,
        by_consistency,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::tests::lap;
    use crate::data::Compound;

    const EPS: f64 = 1e-9;

    fn field() -> BTreeMap<String, f64> {
        BTreeMap::from([
            ("A".to_string(), 80.0),
            ("B".to_string(), 82.0),
            ("C".to_string(), 84.0),
        ])
    }

    #[test]
    fn test_normalize_against_fastest() {
        let out = normalize(&field(), &Reference::Fastest).unwrap();
        let got: Vec<(&str, f64, f64)> = out
            .iter()
            .map(|s| (s.driver_id.as_str(), s.delta, s.delta_percent))
            .collect();
        assert_eq!(got.len(), 3);
        assert_eq!(got[0].0, "A");
        assert!(got[0].1.abs() < EPS && got[0].2.abs() < EPS);
        assert!((got[1].1 - 2.0).abs() < EPS && (got[1].2 - 2.5).abs() < EPS);
        assert!((got[2].1 - 4.0).abs() < EPS && (got[2].2 - 5.0).abs() < EPS);
        assert!(out.iter().all(|s| s.reference_value == 80.0));
    }

    #[test]
    fn test_normalize_against_driver() {
        let reference = Reference::Driver {
            driver: "b".to_string(),
        };
        let out = normalize(&field(), &reference).unwrap();
        assert_eq!(out[0].driver_id, "A");
        assert!((out[0].delta + 2.0).abs() < EPS);
        assert!((out[2].delta_percent - 2.0 / 82.0 * 100.0).abs() < EPS);
    }

    #[test]
    fn test_reference_unavailable() {
        let reference = Reference::Driver {
            driver: "Z".to_string(),
        };
        assert!(matches!(
            normalize(&field(), &reference),
            Err(AnalysisError::ReferenceUnavailable(_))
        ));
        assert!(matches!(
            normalize(&BTreeMap::new(), &Reference::Fastest),
            Err(AnalysisError::ReferenceUnavailable(_))
        ));

        let mut zeroed = field();
        zeroed.insert("Z".to_string(), 0.0);
        assert!(matches!(
            normalize(&zeroed, &Reference::Fastest),
            Err(AnalysisError::ReferenceUnavailable(_))
        ));

        for value in [0.0, 80.0, 1e6, -3.0] {
            assert!(matches!(
                summarize("X", value, Some(0.0)),
                Err(AnalysisError::ReferenceUnavailable(_))
            ));
            assert!(matches!(
                summarize("X", value, None),
                Err(AnalysisError::ReferenceUnavailable(_))
            ));
        }
        assert!(summarize("X", 80.0, Some(f64::NAN)).is_err());
    }

    #[test]
    fn test_non_finite_value_is_insufficient() {
        assert!(matches!(
            summarize("X", f64::INFINITY, Some(80.0)),
            Err(AnalysisError::InsufficientData { .. })
        ));
    }

    #[test]
    fn test_median_pace_and_best_lap() {
        let mut laps = vec![
            lap("NOR", 1, Some(76.0), Compound::Soft),
            lap("NOR", 2, Some(90.0), Compound::Soft),
            lap("NOR", 3, Some(91.0), Compound::Soft),
            lap("NOR", 4, Some(92.0), Compound::Soft),
            lap("NOR", 5, Some(93.0), Compound::Soft),
        ];
        laps[0].is_accurate = false;
        assert_eq!(median_pace(&laps).unwrap(), 91.5);
        assert_eq!(best_lap(&laps).unwrap(), 76.0);

        assert!(matches!(median_pace(&[]), Err(AnalysisError::InsufficientData { .. })));
        assert!(best_lap(&[lap("NOR", 1, None, Compound::Soft)]).is_err());
        assert_eq!(median(&[3.0, 1.0, 2.0]), Some(2.0));
    }

    #[test]
    fn test_quali_vs_race_classification() {
        let summaries = vec![
            summarize("VER", 81.0, Some(80.0)).unwrap(),
            summarize("HAM", 84.0, Some(80.0)).unwrap(),
            summarize("LEC", 86.4, Some(80.0)).unwrap(),
            summarize("RUS", 84.0, Some(80.0)).unwrap(),
        ];
        // deltas: 1.25, 5, 8, 5 -> average 4.8125
        let cmp = classify_against_field(&summaries, FIELD_MARGIN_PCT).unwrap();
        assert!((cmp.average_delta_percent - 4.8125).abs() < EPS);
        assert_eq!(cmp.verdicts[0].2, PaceVerdict::Exceptional);
        assert_eq!(cmp.verdicts[1].2, PaceVerdict::InLine);
        assert_eq!(cmp.verdicts[2].2, PaceVerdict::DropOff);
        assert!(classify_against_field(&[], FIELD_MARGIN_PCT).is_err());
    }

    #[test]
    fn test_consistency_tiers() {
        let steady = consistency("VER", &[0.1, 0.2, 0.3, 0.2]).unwrap();
        assert_eq!(steady.tier, ConsistencyTier::HighlyConsistent);
        assert_eq!(steady.events, 4);
        assert!((steady.mean_relative_pace - 0.2).abs() < EPS);

        let wild = consistency("STR", &[0.5, 2.5, 1.0]).unwrap();
        assert_eq!(wild.tier, ConsistencyTier::Inconsistent);

        assert_eq!(ConsistencyTier::from_std_dev(0.6), ConsistencyTier::ModeratelyConsistent);
        assert_eq!(
            consistency("TSU", &[1.0]).unwrap_err(),
            AnalysisError::insufficient(2, 1)
        );
        assert!((sample_std(&[2.0, 4.0]).unwrap() - 2f64.sqrt()).abs() < EPS);
    }

    #[test]
    fn test_rolling_average_partial_windows() {
        let mut laps: Vec<LapRecord> = [90.0, 92.0, 94.0, 120.0, 96.0]
            .iter()
            .enumerate()
            .map(|(i, t)| lap("PIA", i as u32 + 1, Some(*t), Compound::Medium))
            .collect();
        laps[3].pit_in = true;

        let points = rolling_average(&laps, 2).unwrap();
        let means: Vec<f64> = points.iter().map(|p| p.rolling_mean).collect();
        assert_eq!(means, vec![90.0, 91.0, 93.0, 95.0]);
        assert_eq!(points[3].lap_number, 5);

        assert_eq!(rolling_average(&laps, 0).unwrap()[1].rolling_mean, 92.0);
        assert!(rolling_average(&[], 3).is_err());
    }

    #[test]
    fn test_lap_time_stats_and_rankings() {
        let laps_of = |driver: &str, times: &[f64]| -> Vec<LapRecord> {
            times
                .iter()
                .enumerate()
                .map(|(i, t)| lap(driver, i as u32 + 1, Some(*t), Compound::Hard))
                .collect()
        };
        // quick but scrappy, slower but metronomic
        let ver = lap_time_stats("VER", &laps_of("VER", &[80.0, 82.0, 81.0, 79.0])).unwrap();
        let alo = lap_time_stats("ALO", &laps_of("ALO", &[81.5, 81.6, 81.4])).unwrap();
        assert!((ver.mean - 80.5).abs() < EPS);
        assert_eq!(ver.laps, 4);
        assert!((alo.std_dev - 0.1).abs() < 1e-6);

        let field = rank_lap_times(vec![ver, alo]).unwrap();
        assert_eq!(field.by_pace, vec!["VER".to_string(), "ALO".to_string()]);
        assert_eq!(field.by_consistency, vec!["ALO".to_string(), "VER".to_string()]);

        assert_eq!(
            lap_time_stats("SAR", &laps_of("SAR", &[90.0])).unwrap_err(),
            AnalysisError::insufficient(2, 1)
        );
        assert!(rank_lap_times(Vec::new()).is_err());
    }

    #[test]
    fn test_reference_defaults_to_fastest() {
        assert_eq!(Reference::default(), Reference::Fastest);
    }
}
