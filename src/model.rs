use crate::data::{Compound, LapRecord};
use crate::error::{AnalysisError, Result};
use crate::filter;
use crate::stint::Stint;
use linfa::prelude::*;
use linfa_linear::LinearRegression;
use ndarray::{Array1, Array2};
use std::collections::BTreeMap;
use tracing::debug;

/// Percentile band (inclusive) that survives the outlier trim.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrimBand {
    pub lower: f64,
    pub upper: f64,
}

impl Default for TrimBand {
    fn default() -> Self {
        Self {
            lower: 5.0,
            upper: 95.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DegradationOptions {
    /// `None` fits every usable lap.
    pub trim: Option<TrimBand>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DegradationResult {
    pub driver_id: String,
    pub stint_id: u32,
    pub compound: Compound,
    /// Seconds lost per additional lap. Positive means the tyre is getting slower.
    pub slope: f64,
    pub intercept: f64,
    pub sample_count: usize,
    pub trimmed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearFit {
    pub slope: f64,
    pub intercept: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompoundTrend {
    pub compound: Compound,
    pub mean_lap_time: f64,
    pub sample_count: usize,
    pub slope: Result<f64>,
}

/// Ordinary least squares of y against x.
///
/// Needs two points with distinct x; anything less is `InsufficientData`, never a zero slope.
pub fn fit_line(points: &[(f64, f64)]) -> Result<LinearFit> {
    if points.len() < 2 {
        return Err(AnalysisError::insufficient(2, points.len()));
    }
    if points.iter().any(|(x, y)| !x.is_finite() || !y.is_finite()) {
        return Err(AnalysisError::FitFailed("non-finite sample".to_string()));
    }
    let first_x = points[0].0;
    if points.iter().all(|(x, _)| *x == first_x) {
        return Err(AnalysisError::insufficient(2, 1));
    }

    // linfa wants a one-column feature matrix and a target vector
    let xs: Vec<f64> = points.iter().map(|(x, _)| *x).collect();
    let ys: Vec<f64> = points.iter().map(|(_, y)| *y).collect();
    let x = Array2::from_shape_vec((points.len(), 1), xs)
        .map_err(|e| AnalysisError::FitFailed(e.to_string()))?;
    let y = Array1::from_vec(ys);
    let ds = Dataset::new(x, y);

    let fitted = LinearRegression::new()
        .fit(&ds)
        .map_err(|e| AnalysisError::FitFailed(e.to_string()))?;

    Ok(LinearFit {
        slope: fitted.params()[0],
        intercept: fitted.intercept(),
    })
}

/// Linear-interpolated percentile of an ascending slice, `pct` in [0, 100].
pub fn percentile(sorted: &[f64], pct: f64) -> Option<f64> {
    if sorted.is_empty() || !(0.0..=100.0).contains(&pct) {
        return None;
    }
    let rank = pct / 100.0 * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}

/// Drop points whose y falls outside the band. Returns survivors and how many went.
pub fn trim_outliers(points: &[(f64, f64)], band: TrimBand) -> (Vec<(f64, f64)>, usize) {
    let mut ys: Vec<f64> = points.iter().map(|(_, y)| *y).collect();
    ys.sort_by(f64::total_cmp);
    let (lo, hi) = match (percentile(&ys, band.lower), percentile(&ys, band.upper)) {
        (Some(lo), Some(hi)) => (lo, hi),
        _ => return (points.to_vec(), 0),
    };
    let kept: Vec<(f64, f64)> = points
        .iter()
        .copied()
        .filter(|(_, y)| *y >= lo && *y <= hi)
        .collect();
    let dropped = points.len() - kept.len();
    (kept, dropped)
}

/// Degradation rate of one stint, fit on its usable laps against relative lap number.
///
/// The trim only shapes the fit; the stint and its laps are left untouched.
pub fn estimate(stint: &Stint, opts: &DegradationOptions) -> Result<DegradationResult> {
    let usable = filter::usable_laps(&stint.laps);
    if usable.len() < 2 {
        return Err(AnalysisError::insufficient(2, usable.len()));
    }

    // lap numbers restart from 0 at the first clean lap of the stint
    let first_lap = usable.iter().map(|l| l.lap_number).min().unwrap_or(0);
    let points: Vec<(f64, f64)> = usable
        .iter()
        .filter_map(|l| {
            l.lap_seconds()
                .map(|t| ((l.lap_number - first_lap) as f64, t))
        })
        .collect();

    let (points, trimmed) = match opts.trim {
        Some(band) => trim_outliers(&points, band),
        None => (points, 0),
    };
    if trimmed > 0 {
        debug!(driver = %stint.driver_id, stint = stint.stint_id, trimmed, "trimmed outlier laps before fit");
    }

    let fit = fit_line(&points)?;
    Ok(DegradationResult {
        driver_id: stint.driver_id.clone(),
        stint_id: stint.stint_id,
        compound: stint.compound,
        slope: fit.slope,
        intercept: fit.intercept,
        sample_count: points.len(),
        trimmed,
    })
}

/// Mean lap time and lap-time trend per compound over a driver's usable laps.
pub fn compound_trends(laps: &[LapRecord]) -> Vec<CompoundTrend> {
    let mut by_compound: BTreeMap<Compound, Vec<(f64, f64)>> = BTreeMap::new();
    for lap in filter::usable_laps(laps) {
        if let Some(t) = lap.lap_seconds() {
            by_compound
                .entry(lap.compound)
                .or_default()
                .push((lap.lap_number as f64, t));
        }
    }

    by_compound
        .into_iter()
        .map(|(compound, points)| {
            let mean_lap_time = points.iter().map(|(_, t)| t).sum::<f64>() / points.len() as f64;
            CompoundTrend {
                compound,
                mean_lap_time,
                sample_count: points.len(),
                slope: fit_line(&points).map(|f| f.slope),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::tests::lap;
    use crate::stint::segment;
    use proptest::prelude::*;

    const EPS: f64 = 1e-6;

    fn stint_of(times: &[f64]) -> Stint {
        let laps: Vec<LapRecord> = times
            .iter()
            .enumerate()
            .map(|(i, t)| lap("VER", 10 + i as u32, Some(*t), Compound::Medium))
            .collect();
        Stint {
            driver_id: "VER".to_string(),
            stint_id: 1,
            compound: Compound::Medium,
            laps,
        }
    }

    #[test]
    fn test_fit_line_synthetic_half_second() {
        let fit = fit_line(&[(0.0, 90.0), (1.0, 90.5), (2.0, 91.0)]).unwrap();
        assert!((fit.slope - 0.5).abs() < EPS);
        assert!((fit.intercept - 90.0).abs() < EPS);
    }

    #[test]
    fn test_estimate_synthetic_stint() {
        let result = estimate(&stint_of(&[90.0, 90.5, 91.0]), &DegradationOptions::default()).unwrap();
        assert!((result.slope - 0.5).abs() < EPS);
        assert_eq!(result.sample_count, 3);
        assert_eq!(result.trimmed, 0);
        assert_eq!(result.compound, Compound::Medium);
    }

    #[test]
    fn test_negative_slope_is_reported_as_is() {
        let result = estimate(&stint_of(&[92.0, 91.0, 90.0]), &DegradationOptions::default()).unwrap();
        assert!((result.slope + 1.0).abs() < EPS);
    }

    #[test]
    fn test_single_valid_lap_is_insufficient() {
        let mut stint = stint_of(&[90.0, 95.0, 91.0]);
        stint.laps[0].pit_out = true;
        stint.laps[2].is_accurate = false;
        let err = estimate(&stint, &DegradationOptions::default()).unwrap_err();
        assert_eq!(err, AnalysisError::insufficient(2, 1));
    }

    #[test]
    fn test_identical_x_is_insufficient() {
        let err = fit_line(&[(3.0, 90.0), (3.0, 91.0)]).unwrap_err();
        assert!(matches!(err, AnalysisError::InsufficientData { .. }));
        assert!(fit_line(&[]).is_err());
    }

    #[test]
    fn test_percentile_interpolates() {
        let sorted = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(percentile(&sorted, 0.0), Some(1.0));
        assert_eq!(percentile(&sorted, 50.0), Some(3.0));
        assert_eq!(percentile(&sorted, 100.0), Some(5.0));
        assert!((percentile(&sorted, 95.0).unwrap() - 4.8).abs() < EPS);
        assert_eq!(percentile(&[], 50.0), None);
        assert_eq!(percentile(&sorted, 120.0), None);
    }

    #[test]
    fn test_outlier_trim_is_local_to_the_fit() {
        // 0.1 s/lap trend with a traffic-hit lap near the end of the stint
        let mut times: Vec<f64> = (0..11).map(|i| 90.0 + 0.1 * i as f64).collect();
        times[9] = 130.0;
        let stint = stint_of(&times);

        let raw = estimate(&stint, &DegradationOptions::default()).unwrap();
        assert!(raw.slope > 1.0);

        let opts = DegradationOptions {
            trim: Some(TrimBand::default()),
        };
        let trimmed = estimate(&stint, &opts).unwrap();
        assert!((trimmed.slope - 0.1).abs() < EPS);
        assert_eq!(trimmed.trimmed, 2);
        assert_eq!(trimmed.sample_count, 9);

        // the stint's own laps are untouched for raw reporting
        let usable = filter::usable_lap_times(&stint.laps);
        assert_eq!(usable.len(), 11);
        assert!(usable.contains(&130.0));
    }

    #[test]
    fn test_trim_that_leaves_one_point_is_insufficient() {
        let stint = stint_of(&[90.0, 95.0]);
        let opts = DegradationOptions {
            trim: Some(TrimBand {
                lower: 40.0,
                upper: 60.0,
            }),
        };
        assert!(matches!(
            estimate(&stint, &opts),
            Err(AnalysisError::InsufficientData { .. })
        ));
    }

    #[test]
    fn test_compound_trends() {
        let mut laps: Vec<LapRecord> = (1..=8)
            .map(|n| {
                let (compound, t) = if n <= 4 {
                    (Compound::Soft, 88.0 + 0.2 * n as f64)
                } else {
                    (Compound::Hard, 90.0 + 0.05 * n as f64)
                };
                lap("LEC", n, Some(t), compound)
            })
            .collect();
        laps[7].compound = Compound::Wet;

        let mut stints_checked = 0;
        for trend in compound_trends(&laps) {
            match trend.compound {
                Compound::Soft => {
                    assert_eq!(trend.sample_count, 4);
                    assert!((trend.slope.unwrap() - 0.2).abs() < EPS);
                    assert!((trend.mean_lap_time - 88.5).abs() < EPS);
                }
                Compound::Hard => {
                    assert_eq!(trend.sample_count, 3);
                    assert!((trend.slope.unwrap() - 0.05).abs() < EPS);
                }
                Compound::Wet => {
                    assert_eq!(trend.sample_count, 1);
                    assert!(matches!(trend.slope, Err(AnalysisError::InsufficientData { .. })));
                }
                other => panic!("unexpected compound {other}"),
            }
            stints_checked += 1;
        }
        assert_eq!(stints_checked, 3);
    }

    #[test]
    fn test_estimate_runs_on_segmented_stints() {
        let mut laps: Vec<LapRecord> = (1..=8)
            .map(|n| lap("RUS", n, Some(90.0 + 0.3 * n as f64), Compound::Medium))
            .collect();
        laps[3].pit_in = true;
        laps[4].pit_out = true;
        let stints = segment(&laps);
        let first = estimate(&stints[0], &DegradationOptions::default()).unwrap();
        let second = estimate(&stints[1], &DegradationOptions::default()).unwrap();
        assert!((first.slope - 0.3).abs() < EPS);
        assert!((second.slope - 0.3).abs() < EPS);
        assert_eq!(second.sample_count, 3);
    }

    proptest! {
        #[test]
        fn prop_estimate_is_deterministic(times in proptest::collection::vec(80.0f64..120.0, 2..30), trim in any::<bool>()) {
            let stint = stint_of(&times);
            let opts = DegradationOptions { trim: trim.then(TrimBand::default) };
            let a = estimate(&stint, &opts);
            let b = estimate(&stint, &opts);
            prop_assert_eq!(a, b);
        }
    }
}
