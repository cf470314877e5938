//! Score aggregation over ledger rows.
//!
//! Everything here is a pure function of the rows handed in: nothing is
//! cached or persisted between passes.

use std::collections::BTreeMap;
use std::fmt::{self, Write as _};

use crate::models::{MetricsRow, ScoreDimension, ScoreSet};

/// Valid score band. Raters emit sentinels (0, -1, 100) on failure.
pub const SCORE_MIN: f64 = 1.0;
pub const SCORE_MAX: f64 = 5.0;

/// Weighted dimensions of the final score.
pub const FINAL_WEIGHTS: [(ScoreDimension, f64); 5] = [
    (ScoreDimension::Combined, 0.3),
    (ScoreDimension::Output, 0.2),
    (ScoreDimension::Rater1010, 0.16),
    (ScoreDimension::Rater1012, 0.16),
    (ScoreDimension::Rater1007, 0.16),
];

/// `Output` is replaced by `max(Output, Rater997)` before weighting.
pub const OUTPUT_FLOOR: (ScoreDimension, ScoreDimension) =
    (ScoreDimension::Output, ScoreDimension::Rater997);

/// Column label for the pooled network column.
pub const OVERALL: &str = "Overall";

pub fn clamp_score(v: f64) -> f64 {
    v.clamp(SCORE_MIN, SCORE_MAX)
}

/// Clamped score, or `None` for NaN and infinities.
pub fn usable_score(v: f64) -> Option<f64> {
    v.is_finite().then(|| clamp_score(v))
}

// ── Statistics ──────────────────────────────────────────────────────

/// Mean and sample standard deviation of a set of scores.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AggregateStat {
    pub mean: f64,
    pub stddev: f64,
    pub count: usize,
}

/// Mean and Bessel-corrected standard deviation.
///
/// Returns `None` for an empty slice; a single value has stddev 0.
pub fn mean_stddev(values: &[f64]) -> Option<AggregateStat> {
    let count = values.len();
    if count == 0 {
        return None;
    }
    let n = count as f64;
    let mean = values.iter().sum::<f64>() / n;
    let stddev = if count == 1 {
        0.0
    } else {
        let sum2: f64 = values.iter().map(|v| (v - mean) * (v - mean)).sum();
        (sum2 / (n - 1.0)).sqrt()
    };
    Some(AggregateStat {
        mean,
        stddev,
        count,
    })
}

/// Weighted final score of one row, computed on clamped values.
///
/// Rows missing any weighted dimension, or holding a non-finite value for
/// one, have no final score.
pub fn final_score(scores: &ScoreSet) -> Option<f64> {
    let clamped = |dim: ScoreDimension| scores.get(&dim).copied().and_then(usable_score);

    let (floored, alternate) = OUTPUT_FLOOR;
    let output = match (clamped(floored), clamped(alternate)) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    };

    FINAL_WEIGHTS.iter().try_fold(0.0, |acc, (dim, weight)| {
        let value = if *dim == floored { output } else { clamped(*dim) };
        value.map(|v| acc + v * weight)
    })
}

// ── Entry ranking ───────────────────────────────────────────────────

/// Per-entry statistics across every row of that entry.
#[derive(Debug, Clone, PartialEq)]
pub struct EntrySummary {
    pub entry: String,
    pub sessions: usize,
    pub final_score: Option<AggregateStat>,
    pub dimensions: BTreeMap<ScoreDimension, AggregateStat>,
}

/// Entries ranked by mean final score, best first. Entries without any
/// final score sort last, by name.
pub fn rank_entries(rows: &[MetricsRow]) -> Vec<EntrySummary> {
    let mut grouped: BTreeMap<&str, Vec<&MetricsRow>> = BTreeMap::new();
    for row in rows {
        grouped.entry(row.entry.as_str()).or_default().push(row);
    }

    let mut out: Vec<EntrySummary> = grouped
        .into_iter()
        .map(|(entry, rows)| {
            let mut per_dim: BTreeMap<ScoreDimension, Vec<f64>> = BTreeMap::new();
            let mut finals = Vec::new();
            for row in &rows {
                for (dim, v) in &row.scores {
                    if let Some(v) = usable_score(*v) {
                        per_dim.entry(*dim).or_default().push(v);
                    }
                }
                if let Some(f) = final_score(&row.scores) {
                    finals.push(f);
                }
            }
            EntrySummary {
                entry: entry.to_string(),
                sessions: rows.len(),
                final_score: mean_stddev(&finals),
                dimensions: per_dim
                    .into_iter()
                    .filter_map(|(dim, vals)| mean_stddev(&vals).map(|s| (dim, s)))
                    .collect(),
            }
        })
        .collect();

    out.sort_by(|a, b| rank_order(a.final_score, b.final_score).then(a.entry.cmp(&b.entry)));
    out
}

fn rank_order(a: Option<AggregateStat>, b: Option<AggregateStat>) -> std::cmp::Ordering {
    match (a, b) {
        (Some(a), Some(b)) => b.mean.total_cmp(&a.mean),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => std::cmp::Ordering::Equal,
    }
}

// ── Network matrix ──────────────────────────────────────────────────

/// One entry's mean final score per network alias.
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkMatrixRow {
    pub entry: String,
    pub by_network: BTreeMap<String, AggregateStat>,
    pub overall: Option<AggregateStat>,
}

/// Mean final score per (entry, network alias) plus a pooled Overall column.
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkMatrix {
    /// Network aliases in first-seen ledger order.
    pub networks: Vec<String>,
    /// Ranked by Overall, best first.
    pub rows: Vec<NetworkMatrixRow>,
}

pub fn network_matrix(rows: &[MetricsRow]) -> NetworkMatrix {
    let mut networks: Vec<String> = Vec::new();
    let mut cells: BTreeMap<&str, BTreeMap<&str, Vec<f64>>> = BTreeMap::new();
    let mut pooled: BTreeMap<&str, Vec<f64>> = BTreeMap::new();

    for row in rows {
        if !networks.iter().any(|n| n == &row.network) {
            networks.push(row.network.clone());
        }
        let by_net = cells.entry(row.entry.as_str()).or_default();
        let all = pooled.entry(row.entry.as_str()).or_default();
        if let Some(f) = final_score(&row.scores) {
            by_net.entry(row.network.as_str()).or_default().push(f);
            all.push(f);
        }
    }

    let mut out: Vec<NetworkMatrixRow> = cells
        .into_iter()
        .map(|(entry, by_net)| NetworkMatrixRow {
            entry: entry.to_string(),
            by_network: by_net
                .into_iter()
                .filter_map(|(net, vals)| mean_stddev(&vals).map(|s| (net.to_string(), s)))
                .collect(),
            overall: pooled.get(entry).and_then(|v| mean_stddev(v)),
        })
        .collect();

    out.sort_by(|a, b| rank_order(a.overall, b.overall).then(a.entry.cmp(&b.entry)));
    NetworkMatrix {
        networks,
        rows: out,
    }
}

// ── Rendering ───────────────────────────────────────────────────────

/// Weighted dimensions that no row records a usable value for.
///
/// `Output` counts as recorded when `Rater997` is. Empty for an empty ledger.
pub fn missing_final_dimensions(rows: &[MetricsRow]) -> Vec<ScoreDimension> {
    let recorded = |dim: ScoreDimension| {
        rows.iter()
            .any(|r| r.scores.get(&dim).copied().and_then(usable_score).is_some())
    };
    if rows.is_empty() {
        return Vec::new();
    }
    let (floored, alternate) = OUTPUT_FLOOR;
    FINAL_WEIGHTS
        .iter()
        .map(|(dim, _)| *dim)
        .filter(|dim| !(recorded(*dim) || (*dim == floored && recorded(alternate))))
        .collect()
}

/// Both aggregations over one snapshot of the ledger.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreReport {
    pub entries: Vec<EntrySummary>,
    pub matrix: NetworkMatrix,
    /// Weighted dimensions absent from every row; final scores are n/a.
    pub missing: Vec<ScoreDimension>,
}

impl ScoreReport {
    pub fn from_rows(rows: &[MetricsRow]) -> Self {
        let missing = missing_final_dimensions(rows);
        if !missing.is_empty() {
            let names: Vec<String> = missing.iter().map(ToString::to_string).collect();
            tracing::warn!(
                missing = %names.join(", "),
                "no final scores: weighted dimensions never recorded"
            );
        }
        Self {
            entries: rank_entries(rows),
            matrix: network_matrix(rows),
            missing,
        }
    }
}

impl fmt::Display for ScoreReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (rank, e) in self.entries.iter().enumerate() {
            let headline = match e.final_score {
                Some(s) => format!("final {:.3} ± {:.3}", s.mean, s.stddev),
                None => "final n/a".to_string(),
            };
            writeln!(
                f,
                "#{} {} ({} sessions) {}",
                rank + 1,
                e.entry,
                e.sessions,
                headline
            )?;
            writeln!(f, "{}", "=".repeat(45))?;
            for (dim, s) in &e.dimensions {
                writeln!(
                    f,
                    "{:<20}mean {:.3}, stddev: {:.3}",
                    format!("{dim}:"),
                    s.mean,
                    s.stddev
                )?;
            }
            writeln!(f)?;
        }
        if !self.missing.is_empty() {
            let names: Vec<String> = self.missing.iter().map(ToString::to_string).collect();
            writeln!(
                f,
                "note: final scores need {}, which no session recorded",
                names.join(", ")
            )?;
            writeln!(f)?;
        }
        write!(f, "{}", self.matrix)
    }
}

impl fmt::Display for NetworkMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let width = self
            .rows
            .iter()
            .map(|r| r.entry.len())
            .max()
            .unwrap_or(0)
            .max("Entry".len());
        let col = |name: &str| name.len().max(7);

        let mut line = format!("{:<width$}", "Entry");
        for net in self.networks.iter().map(String::as_str).chain([OVERALL]) {
            let _ = write!(line, " | {:>w$}", net, w = col(net));
        }
        writeln!(f, "{line}")?;
        writeln!(f, "{}", "-".repeat(line.chars().count()))?;

        for row in &self.rows {
            let mut line = format!("{:<width$}", row.entry);
            for net in &self.networks {
                let cell = row
                    .by_network
                    .get(net)
                    .map(|s| format!("{:.3}", s.mean))
                    .unwrap_or_else(|| "-".into());
                let _ = write!(line, " | {:>w$}", cell, w = col(net));
            }
            let overall = row
                .overall
                .map(|s| format!("{:.3}", s.mean))
                .unwrap_or_else(|| "-".into());
            let _ = write!(line, " | {:>w$}", overall, w = col(OVERALL));
            writeln!(f, "{line}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    fn row(entry: &str, network: &str, scores: &[(ScoreDimension, f64)]) -> MetricsRow {
        MetricsRow {
            entry: entry.into(),
            network: network.into(),
            scores: scores.iter().copied().collect(),
            ..Default::default()
        }
    }

    fn full_scores(base: f64) -> Vec<(ScoreDimension, f64)> {
        vec![
            (ScoreDimension::Combined, base),
            (ScoreDimension::Output, base),
            (ScoreDimension::Rater997, base),
            (ScoreDimension::Rater1007, base),
            (ScoreDimension::Rater1010, base),
            (ScoreDimension::Rater1012, base),
        ]
    }

    #[test]
    fn stddev_of_constant_is_zero() {
        let s = mean_stddev(&[2.0, 2.0, 2.0, 2.0]).unwrap();
        assert!(approx(s.mean, 2.0));
        assert!(approx(s.stddev, 0.0));
    }

    #[test]
    fn stddev_uses_bessel_correction() {
        let s = mean_stddev(&[1.0, 3.0]).unwrap();
        assert!(approx(s.mean, 2.0));
        assert!(approx(s.stddev, 2f64.sqrt()));
    }

    #[test]
    fn single_and_empty_inputs() {
        let s = mean_stddev(&[4.2]).unwrap();
        assert!(approx(s.mean, 4.2));
        assert_eq!(s.stddev, 0.0);
        assert!(mean_stddev(&[]).is_none());
    }

    #[test]
    fn final_score_applies_weights_and_output_floor() {
        let scores: ScoreSet = [
            (ScoreDimension::Combined, 4.0),
            (ScoreDimension::Output, 3.0),
            (ScoreDimension::Rater997, 3.5),
            (ScoreDimension::Rater1010, 2.0),
            (ScoreDimension::Rater1012, 5.0),
            (ScoreDimension::Rater1007, 4.0),
        ]
        .into_iter()
        .collect();
        let f = final_score(&scores).unwrap();
        assert!(approx(f, 3.66), "got {f}");
    }

    #[test]
    fn final_score_clamps_sentinels() {
        let mut scores: ScoreSet = full_scores(3.0).into_iter().collect();
        scores.insert(ScoreDimension::Rater1010, -1.0);
        scores.insert(ScoreDimension::Rater1012, 100.0);
        // 3*0.3 + 3*0.2 + 1*0.16 + 5*0.16 + 3*0.16
        let f = final_score(&scores).unwrap();
        assert!(approx(f, 0.9 + 0.6 + 0.16 + 0.8 + 0.48), "got {f}");
    }

    #[test]
    fn final_score_needs_every_weighted_dimension() {
        let scores: ScoreSet = [(ScoreDimension::Combined, 4.0)].into_iter().collect();
        assert_eq!(final_score(&scores), None);
    }

    #[test]
    fn dimension_stats_are_clamped() {
        let rows = vec![
            row("a", "WiFi", &[(ScoreDimension::Combined, 0.0)]),
            row("a", "WiFi", &[(ScoreDimension::Combined, 9.0)]),
        ];
        let ranked = rank_entries(&rows);
        let s = ranked[0].dimensions[&ScoreDimension::Combined];
        assert!(approx(s.mean, 3.0));
        assert!(approx(s.stddev, 8f64.sqrt()));
    }

    #[test]
    fn entries_rank_by_mean_final_score() {
        let rows = vec![
            row("stable", "WiFi", &full_scores(3.0)),
            row("unstable", "WiFi", &full_scores(4.0)),
            row("stable", "3G1", &full_scores(3.2)),
            row("broken", "3G1", &[(ScoreDimension::Combined, 4.9)]),
        ];
        let ranked = rank_entries(&rows);
        let names: Vec<&str> = ranked.iter().map(|e| e.entry.as_str()).collect();
        assert_eq!(names, ["unstable", "stable", "broken"]);
        assert_eq!(ranked[1].sessions, 2);
        assert!(ranked[2].final_score.is_none());
    }

    #[test]
    fn matrix_pools_overall_across_networks() {
        let rows = vec![
            row("stable", "WiFi", &full_scores(4.0)),
            row("stable", "GPRS1", &full_scores(2.0)),
            row("unstable", "WiFi", &full_scores(3.5)),
        ];
        let m = network_matrix(&rows);
        assert_eq!(m.networks, ["WiFi", "GPRS1"]);
        assert_eq!(m.rows[0].entry, "unstable");

        let stable = &m.rows[1];
        let weight_sum: f64 = FINAL_WEIGHTS.iter().map(|(_, w)| w).sum();
        assert!(approx(stable.by_network["WiFi"].mean, 4.0 * weight_sum));
        assert!(approx(stable.overall.unwrap().mean, 3.0 * weight_sum));
        assert!(!m.rows[0].by_network.contains_key("GPRS1"));
    }

    #[test]
    fn report_renders_both_tables() {
        let rows = vec![
            row("stable", "WiFi", &full_scores(4.0)),
            row("unstable", "EDGE1", &full_scores(2.0)),
        ];
        let text = ScoreReport::from_rows(&rows).to_string();
        assert!(text.contains("#1 stable (1 sessions)"));
        assert!(text.contains("ScoreCombined:"));
        assert!(text.contains("Overall"));
        assert!(text.contains("EDGE1"));
    }

    #[test]
    fn non_finite_scores_are_ignored() {
        let mut broken = full_scores(4.5);
        broken[0] = (ScoreDimension::Combined, f64::NAN);
        let rows = vec![
            row("good", "WiFi", &full_scores(4.5)),
            row("broken", "WiFi", &broken),
        ];
        assert_eq!(final_score(&rows[1].scores), None);

        let ranked = rank_entries(&rows);
        assert_eq!(ranked[0].entry, "good");
        assert!(ranked[1].final_score.is_none());
        assert!(!ranked[1].dimensions.contains_key(&ScoreDimension::Combined));
        assert!(approx(ranked[1].dimensions[&ScoreDimension::Output].mean, 4.5));

        let m = network_matrix(&rows);
        assert_eq!(m.rows[0].entry, "good");
        assert!(m.rows[1].overall.is_none());
    }

    #[test]
    fn infinite_score_does_not_clamp_into_band() {
        let mut scores: ScoreSet = full_scores(3.0).into_iter().collect();
        scores.insert(ScoreDimension::Rater1007, f64::INFINITY);
        assert_eq!(final_score(&scores), None);
        assert_eq!(usable_score(f64::NEG_INFINITY), None);
        assert_eq!(usable_score(7.0), Some(SCORE_MAX));
    }

    #[test]
    fn report_notes_unrecorded_weighted_dimensions() {
        let rows = vec![row(
            "stable",
            "WiFi",
            &[
                (ScoreDimension::Combined, 4.0),
                (ScoreDimension::Rater997, 3.0),
            ],
        )];
        assert_eq!(
            missing_final_dimensions(&rows),
            [
                ScoreDimension::Rater1010,
                ScoreDimension::Rater1012,
                ScoreDimension::Rater1007
            ]
        );
        let text = ScoreReport::from_rows(&rows).to_string();
        assert!(text.contains("final n/a"));
        assert!(text.contains("final scores need Score1010, Score1012, Score1007"));

        let full = vec![row("stable", "WiFi", &full_scores(4.0))];
        assert!(missing_final_dimensions(&full).is_empty());
        assert!(missing_final_dimensions(&[]).is_empty());
        assert!(!ScoreReport::from_rows(&full).to_string().contains("note:"));
    }
}
