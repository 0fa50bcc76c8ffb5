use crate::data::{Compound, LapRecord};
use crate::filter;
use std::collections::BTreeMap;
use tracing::debug;

/// A contiguous run of laps on one tyre set.
#[derive(Debug, Clone, PartialEq)]
pub struct Stint {
    pub driver_id: String,
    pub stint_id: u32,
    pub compound: Compound,
    pub laps: Vec<LapRecord>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StintSummary {
    pub driver_id: String,
    pub stint_id: u32,
    pub compound: Compound,
    pub lap_start: u32,
    pub lap_end: u32,
    pub length: usize,
    /// Mean over usable laps only; `None` when the stint has none.
    pub mean_lap_time: Option<f64>,
    /// Last known track position within the stint.
    pub end_position: Option<u32>,
}

/// Split one driver's unfiltered laps into stints.
///
/// Boundaries come from pit-out laps, not from whatever stint number the upstream
/// data carries: a pit-out lap opens a new stint and belongs to it. A pit-out flag
/// on the very first lap (pit-lane start, practice run) opens nothing, since
/// everything before the first boundary is stint 1 anyway. Input order is kept, so
/// concatenating the stints gives back the input.
pub fn segment(laps: &[LapRecord]) -> Vec<Stint> {
    let mut groups: Vec<Vec<LapRecord>> = Vec::new();
    for (i, lap) in laps.iter().enumerate() {
        if i == 0 || lap.pit_out {
            groups.push(Vec::new());
        }
        if let Some(current) = groups.last_mut() {
            current.push(lap.clone());
        }
    }

    groups
        .into_iter()
        .enumerate()
        .map(|(idx, laps)| {
            let stint_id = idx as u32 + 1;
            for lap in laps.iter() {
                if let Some(upstream) = lap.stint_id.filter(|s| *s != stint_id) {
                    debug!(
                        driver = %lap.driver_id,
                        lap = lap.lap_number,
                        upstream,
                        computed = stint_id,
                        "upstream stint number disagrees with pit boundaries"
                    );
                }
            }
            Stint {
                driver_id: laps.first().map(|l| l.driver_id.clone()).unwrap_or_default(),
                stint_id,
                compound: dominant_compound(&laps),
                laps,
            }
        })
        .collect()
}

/// Most frequent compound among the laps, ties going to the one seen first.
/// One mislabelled lap can't flip a stint's compound this way.
pub fn dominant_compound(laps: &[LapRecord]) -> Compound {
    let mut counts: Vec<(Compound, usize)> = Vec::new();
    for lap in laps {
        match counts.iter_mut().find(|(c, _)| *c == lap.compound) {
            Some((_, n)) => *n += 1,
            None => counts.push((lap.compound, 1)),
        }
    }
    // max_by_key keeps the last maximum, so walk in reverse to favour the earliest
    counts
        .into_iter()
        .rev()
        .max_by_key(|(_, n)| *n)
        .map(|(c, _)| c)
        .unwrap_or(Compound::Unknown)
}

pub fn summarize(stint: &Stint) -> StintSummary {
    let times = filter::usable_lap_times(&stint.laps);
    let mean_lap_time = if times.is_empty() {
        None
    } else {
        Some(times.iter().sum::<f64>() / times.len() as f64)
    };
    StintSummary {
        driver_id: stint.driver_id.clone(),
        stint_id: stint.stint_id,
        compound: stint.compound,
        lap_start: stint.laps.first().map_or(0, |l| l.lap_number),
        lap_end: stint.laps.last().map_or(0, |l| l.lap_number),
        length: stint.laps.len(),
        mean_lap_time,
        end_position: stint.laps.iter().rev().find_map(|l| l.track_position),
    }
}

// average stint length (in laps) per compound across every stint we are given.
// compounds nobody ran a stint on just don't show up in the map
pub fn average_stint_lengths<'a>(
    stints: impl IntoIterator<Item = &'a StintSummary>,
) -> BTreeMap<Compound, f64> {
    let mut lengths: BTreeMap<Compound, Vec<usize>> = BTreeMap::new();
    for stint in stints.into_iter().filter(|s| s.length > 0) {
        lengths.entry(stint.compound).or_default().push(stint.length);
    }
    lengths
        .into_iter()
        .map(|(compound, lens)| {
            let avg = lens.iter().sum::<usize>() as f64 / lens.len() as f64;
            (compound, avg)
        })
        .collect()
}
