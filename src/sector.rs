use crate::data::LapRecord;
use crate::error::{AnalysisError, Result};
use crate::filter;

pub const SECTORS: usize = 3;

#[derive(Debug, Clone, PartialEq)]
pub struct SectorSummary {
    pub driver_id: String,
    pub mean: [Option<f64>; SECTORS],
    pub best: [Option<f64>; SECTORS],
    /// Sum of the best sectors; absent if any sector never got a time.
    pub ideal_lap: Option<f64>,
    /// Driver's mean sector minus the fastest sector across the compared field.
    pub delta_to_fastest: [Option<f64>; SECTORS],
}

/// Sector statistics over a driver's usable laps.
pub fn summarize_sectors(driver_id: &str, laps: &[LapRecord]) -> Result<SectorSummary> {
    let usable = filter::usable_laps(laps);
    let mut mean = [None; SECTORS];
    let mut best = [None; SECTORS];
    let mut timed_any = 0;

    for sector in 0..SECTORS {
        let times: Vec<f64> = usable.iter().filter_map(|l| l.sector_seconds(sector)).collect();
        if times.is_empty() {
            continue;
        }
        timed_any += 1;
        mean[sector] = Some(times.iter().sum::<f64>() / times.len() as f64);
        best[sector] = times.iter().copied().min_by(f64::total_cmp);
    }
    if timed_any == 0 {
        return Err(AnalysisError::insufficient(1, 0));
    }

    // ideal lap only makes sense when all three best sectors exist
    let ideal_lap = best
        .iter()
        .try_fold(0.0, |acc, b| b.map(|t| acc + t));

    Ok(SectorSummary {
        driver_id: driver_id.to_string(),
        mean,
        best,
        ideal_lap,
        delta_to_fastest: [None; SECTORS],
    })
}

/// Fill in each driver's delta to the fastest sector time seen across all of them.
pub fn compare_sectors(mut summaries: Vec<SectorSummary>) -> Vec<SectorSummary> {
    for sector in 0..SECTORS {
        let fastest = summaries
            .iter()
            .filter_map(|s| s.best[sector])
            .min_by(f64::total_cmp);
        for s in summaries.iter_mut() {
            s.delta_to_fastest[sector] = match (s.mean[sector], fastest) {
                (Some(m), Some(f)) => Some(m - f),
                _ => None,
            };
        }
    }
    summaries
}
