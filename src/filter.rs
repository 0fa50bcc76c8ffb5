use crate::data::LapRecord;

/// A lap is usable for pace and degradation work when it is accurate, timed,
/// and neither an in-lap nor an out-lap.
pub fn is_usable(lap: &LapRecord) -> bool {
    lap.is_accurate && lap.lap_time.is_some() && !lap.pit_in && !lap.pit_out
}

/// Ordered sub-sequence of usable laps. Empty means "insufficient data", not an error.
pub fn usable_laps(laps: &[LapRecord]) -> Vec<&LapRecord> {
    laps.iter().filter(|lap| is_usable(lap)).collect()
}

/// Lap times in seconds of the usable laps, in input order.
pub fn usable_lap_times(laps: &[LapRecord]) -> Vec<f64> {
    usable_laps(laps)
        .into_iter()
        .filter_map(LapRecord::lap_seconds)
        .collect()
}

/// Timed laps, accurate or not. Qualifying flying laps are often flagged
/// inaccurate upstream, so the fastest-lap pick only needs a time.
pub fn timed_laps(laps: &[LapRecord]) -> Vec<&LapRecord> {
    laps.iter().filter(|lap| lap.lap_time.is_some()).collect()
}
