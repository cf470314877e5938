//! Property-based tests for score clamping, final scores and ranking.

use callbench_common::aggregate::*;
use callbench_common::models::{MetricsRow, ScoreDimension, ScoreSet};
use proptest::prelude::*;

/// Raw rater output, including the failure sentinels.
fn raw_score() -> impl Strategy<Value = f64> {
    prop_oneof![
        Just(-1.0),
        Just(0.0),
        Just(100.0),
        0.0f64..6.0,
    ]
}

fn full_scores() -> impl Strategy<Value = ScoreSet> {
    prop::collection::vec(raw_score(), ScoreDimension::ALL.len()).prop_map(|vals| {
        ScoreDimension::ALL.iter().copied().zip(vals).collect()
    })
}

fn weight_sum() -> f64 {
    FINAL_WEIGHTS.iter().map(|(_, w)| w).sum()
}

proptest! {
    #[test]
    fn clamp_stays_in_band(v in raw_score()) {
        let c = clamp_score(v);
        prop_assert!((SCORE_MIN..=SCORE_MAX).contains(&c));
        if (SCORE_MIN..=SCORE_MAX).contains(&v) {
            prop_assert_eq!(c, v);
        }
    }

    #[test]
    fn final_score_bounded_by_weights(scores in full_scores()) {
        let f = final_score(&scores).unwrap();
        let eps = 1e-9;
        prop_assert!(f >= SCORE_MIN * weight_sum() - eps);
        prop_assert!(f <= SCORE_MAX * weight_sum() + eps);
    }

    #[test]
    fn missing_weighted_dimension_has_no_final(
        scores in full_scores(),
        idx in 0usize..FINAL_WEIGHTS.len(),
    ) {
        let (dim, _) = FINAL_WEIGHTS[idx];
        let mut scores = scores;
        scores.remove(&dim);
        if dim == OUTPUT_FLOOR.0 {
            // Rater997 stands in for a missing Output.
            prop_assert!(final_score(&scores).is_some());
            scores.remove(&OUTPUT_FLOOR.1);
        }
        prop_assert!(final_score(&scores).is_none());
    }

    #[test]
    fn output_floor_never_lowers_final(scores in full_scores(), alt in raw_score()) {
        let before = final_score(&scores).unwrap();
        let mut raised = scores.clone();
        let current = clamp_score(raised[&OUTPUT_FLOOR.1]);
        raised.insert(OUTPUT_FLOOR.1, current.max(clamp_score(alt)));
        prop_assert!(final_score(&raised).unwrap() >= before - 1e-9);
    }

    #[test]
    fn mean_lies_within_values(values in prop::collection::vec(1.0f64..5.0, 1..40)) {
        let s = mean_stddev(&values).unwrap();
        let lo = values.iter().copied().fold(f64::INFINITY, f64::min);
        let hi = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        prop_assert_eq!(s.count, values.len());
        prop_assert!(s.mean >= lo - 1e-9 && s.mean <= hi + 1e-9);
        prop_assert!(s.stddev >= 0.0);
        prop_assert!(s.stddev <= hi - lo + 1e-9);
    }

    #[test]
    fn ranking_is_descending(
        rows in prop::collection::vec((0usize..4, full_scores()), 1..30),
    ) {
        let rows: Vec<MetricsRow> = rows
            .into_iter()
            .map(|(e, scores)| MetricsRow {
                entry: format!("entry{e}"),
                network: "WiFi".into(),
                scores,
                ..Default::default()
            })
            .collect();
        let ranked = rank_entries(&rows);
        prop_assert_eq!(ranked.iter().map(|r| r.sessions).sum::<usize>(), rows.len());
        for pair in ranked.windows(2) {
            let a = pair[0].final_score.unwrap().mean;
            let b = pair[1].final_score.unwrap().mean;
            prop_assert!(a >= b);
        }
    }
}
