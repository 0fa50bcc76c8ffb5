use crate::analysis::{AnalysisReport, Finding, StintReport, UnitKey};
use crate::pace::{self, PaceSummary, FIELD_MARGIN_PCT};
use crate::stint;
use std::collections::BTreeMap;
use std::fmt::Write;

fn secs(v: Option<f64>) -> String {
    v.map_or_else(|| "-".to_string(), |t| format!("{:.3}", t))
}

fn render_stints(out: &mut String, stints: &[StintReport]) {
    for s in stints {
        let deg = match &s.degradation {
            Ok(d) => format!("{:+.3} s/lap ({} laps fit, {} trimmed)", d.slope, d.sample_count, d.trimmed),
            Err(e) => format!("n/a ({})", e),
        };
        let _ = writeln!(
            out,
            "  stint {} {:12} laps {:>2}-{:<2} ({:>2})  avg {:>8}  P{:<2}  deg {}",
            s.summary.stint_id,
            s.summary.compound,
            s.summary.lap_start,
            s.summary.lap_end,
            s.summary.length,
            secs(s.summary.mean_lap_time),
            s.summary.end_position.map_or_else(|| "-".to_string(), |p| p.to_string()),
            deg
        );
    }
}

fn render_finding(out: &mut String, unit: &UnitKey, finding: &Finding) {
    let _ = writeln!(out, "\n--- {} ---", unit);
    match finding {
        Finding::Stints(stints) => render_stints(out, stints),
        Finding::Compounds(trends) => {
            for t in trends {
                let slope = match &t.slope {
                    Ok(s) => format!("{:+.3} s/lap", s),
                    Err(e) => format!("n/a ({})", e),
                };
                let _ = writeln!(out, "  {:12} avg {:.3}s over {} laps, trend {}", t.compound, t.mean_lap_time, t.sample_count, slope);
            }
        }
        Finding::Pace(field) => {
            for p in field {
                let _ = writeln!(out, "  {:4} {:.3}s  {:+.3}s  {:+.2}%", p.driver_id, p.value, p.delta, p.delta_percent);
            }
        }
        Finding::QualiDelta(p) => {
            let _ = writeln!(out, "  Quali={:.3}s, Race={:.3}s, Delta={:.2}%", p.reference_value, p.value, p.delta_percent);
        }
        Finding::Sectors(s) => {
            for i in 0..s.mean.len() {
                let _ = writeln!(
                    out,
                    "  S{}: avg {:>8}  best {:>8}  to fastest {:>8}",
                    i + 1,
                    secs(s.mean[i]),
                    secs(s.best[i]),
                    secs(s.delta_to_fastest[i])
                );
            }
            let _ = writeln!(out, "  ideal lap {}", secs(s.ideal_lap));
        }
        Finding::Rolling(points) => {
            for p in points {
                let _ = writeln!(out, "  lap {:>2}  {:.3}s  rolling {:.3}s", p.lap_number, p.lap_time, p.rolling_mean);
            }
        }
        Finding::Consistency(c) => {
            let _ = writeln!(
                out,
                "  mean {:+.2}%  std {:.3}  over {} events  {}",
                c.mean_relative_pace, c.std_dev, c.events, c.tier
            );
        }
        Finding::LapTimes(field) => {
            for d in &field.drivers {
                let _ = writeln!(out, "  {:4} avg {:.3}s  std {:.3}s over {} laps", d.driver_id, d.mean, d.std_dev, d.laps);
            }
            let _ = writeln!(out, "  fastest average: {}", field.by_pace.join(", "));
            let _ = writeln!(out, "  most consistent: {}", field.by_consistency.join(", "));
        }
    }
}

/// Quali-vs-race deltas of every event, placed against that event's field average.
fn render_field_insights(out: &mut String, report: &AnalysisReport) {
    let mut by_event: BTreeMap<&str, Vec<PaceSummary>> = BTreeMap::new();
    for (unit, finding) in report.succeeded() {
        if let (Finding::QualiDelta(p), Some(event)) = (finding, unit.event.as_deref()) {
            by_event.entry(event).or_default().push(p.clone());
        }
    }
    for (event, mut summaries) in by_event {
        // smallest drop-off from qualifying first
        summaries.sort_by(|a, b| a.delta_percent.total_cmp(&b.delta_percent));
        let Ok(cmp) = pace::classify_against_field(&summaries, FIELD_MARGIN_PCT) else { continue };
        let _ = writeln!(out, "\n--- Insights {} (Average Delta: {:.2}%) ---", event, cmp.average_delta_percent);
        for (driver, delta, verdict) in cmp.verdicts {
            let _ = writeln!(out, "* {} ({:.2}%): {}", driver, delta, verdict);
        }
    }
}

// gather every stint summary in the report, then average per compound
fn render_stint_lengths(out: &mut String, report: &AnalysisReport) {
    let summaries = report.succeeded().flat_map(|(_, finding)| match finding {
        Finding::Stints(stints) => stints.iter().map(|s| &s.summary).collect::<Vec<_>>(),
        _ => Vec::new(),
    });
    let averages = stint::average_stint_lengths(summaries);
    if averages.is_empty() {
        return;
    }
    let _ = writeln!(out, "\n--- Average stint length ---");
    for (compound, laps) in averages {
        let _ = writeln!(out, "  {:12} {:.1} laps", compound, laps);
    }
}

pub fn render(report: &AnalysisReport) -> String {
    let mut out = String::new();
    for (unit, finding) in report.succeeded() {
        render_finding(&mut out, unit, finding);
    }
    render_stint_lengths(&mut out, report);
    render_field_insights(&mut out, report);

    let failed: Vec<_> = report.failed().collect();
    if !failed.is_empty() {
        let _ = writeln!(out, "\n--- Skipped ({}) ---", failed.len());
        for (unit, err) in failed {
            let _ = writeln!(out, "- {}: {}", unit, err);
        }
    }
    out
}
