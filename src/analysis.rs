//! # Similarity Analysis
//!
//! Turns the matched sequences of every level into one similarity score.
//!
//! ```text
//! score = Σ_level alpha(level) · Σ_sequence beta(len) · Σ_run idf(cluster) · run_length
//!         ───────────────────────────────────────────────────────────────────────────
//!                          stay_points(a) · stay_points(b)
//! ```
//!
//! - `alpha(level) = 2^(level - 1)` favours matches on deeper, finer levels
//! - `beta(len) = 2^(len - 1)` favours longer matched sequences
//! - `idf = ln(total_subjects / visitors)` favours rarely visited clusters
//!
//! With [`ScoreAccumulation::AcrossLevel`] the inner cluster sum is not reset
//! between the sequences of one level.

use log::{debug, warn};
use std::collections::{BTreeMap, HashMap};

use crate::error::{require_subject, Result, SimilarityError};
use crate::store::HierarchyStore;
use crate::{ClusterId, Level, LevelMatches, ScoreAccumulation};

/// Score of a subject pair with its intermediate values.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ScoreBreakdown {
    /// Sum of the level-weighted level scores
    pub raw_score: f64,
    /// `raw_score` divided by the product of the stay point counts
    pub score: f64,
    /// Level score before the level weight is applied
    pub level_scores: BTreeMap<Level, f64>,
}

/// Level weight, `2^(level - 1)`.
#[inline]
pub fn alpha(level: Level) -> f64 {
    (level as f64 - 1.0).exp2()
}

/// Sequence length weight, `2^(length - 1)`.
#[inline]
pub fn beta(length: usize) -> f64 {
    (length as f64 - 1.0).exp2()
}

/// Rarity weight of a cluster, `ln(total_subjects / visitors)`.
///
/// A visitor count of zero, or one above the population size, cannot come
/// from a consistent store. Such clusters weigh nothing and a warning is
/// logged.
///
/// # Example
/// ```
/// use trace_similarity::idf;
/// assert_eq!(idf(2, 2), 0.0);
/// assert!((idf(4, 1) - 4f64.ln()).abs() < 1e-12);
/// assert_eq!(idf(4, 0), 0.0);
/// ```
pub fn idf(total_subjects: u64, visitors: u64) -> f64 {
    if visitors == 0 || visitors > total_subjects {
        warn!(
            "[Analysis] Inconsistent visitor count {} for {} subjects, ignoring cluster",
            visitors, total_subjects
        );
        return 0.0;
    }
    (total_subjects as f64 / visitors as f64).ln()
}

/// Score matched sequences, keeping the per-level values.
///
/// Returns an all-zero breakdown without touching the store when nothing
/// matched. Fails with a data inconsistency when a subject with matches has
/// no stay points.
pub fn score_breakdown<S: HierarchyStore + ?Sized>(
    store: &S,
    matches: &LevelMatches,
    subject_a: &str,
    subject_b: &str,
    accumulation: ScoreAccumulation,
) -> Result<ScoreBreakdown> {
    require_subject(subject_a, "first")?;
    require_subject(subject_b, "second")?;

    let mut breakdown = ScoreBreakdown::default();
    if matches.values().all(Vec::is_empty) {
        return Ok(breakdown);
    }

    let total_subjects = store.total_subject_count()?;
    let mut weights: HashMap<&ClusterId, f64> = HashMap::new();

    for (&level, sequences) in matches {
        if sequences.is_empty() {
            continue;
        }

        let mut level_score = 0.0;
        let mut cluster_sum = 0.0;
        for sequence in sequences.iter().filter(|s| !s.is_empty()) {
            if accumulation == ScoreAccumulation::PerSequence {
                cluster_sum = 0.0;
            }
            for matched in sequence {
                let weight = match weights.get(&matched.cluster_id) {
                    Some(&weight) => weight,
                    None => {
                        let weight = idf(total_subjects, store.visitor_count(&matched.cluster_id)?);
                        weights.insert(&matched.cluster_id, weight);
                        weight
                    }
                };
                cluster_sum += weight * matched.run_length as f64;
            }
            level_score += beta(sequence.len()) * cluster_sum;
        }

        debug!("[Analysis] Level {}: score {:.6}", level, level_score);
        breakdown.level_scores.insert(level, level_score);
        breakdown.raw_score += alpha(level) * level_score;
    }

    breakdown.score = breakdown.raw_score;
    if breakdown.raw_score != 0.0 {
        let stay_points_a = positive_stay_point_count(store, subject_a)?;
        let stay_points_b = positive_stay_point_count(store, subject_b)?;
        breakdown.score = breakdown.raw_score / (stay_points_a as f64 * stay_points_b as f64);
    }

    debug!(
        "[Analysis] [{}] vs [{}]: raw {:.6}, normalized {:.6}",
        subject_a, subject_b, breakdown.raw_score, breakdown.score
    );
    Ok(breakdown)
}

/// Normalized similarity score of matched sequences.
///
/// Uses [`ScoreAccumulation::AcrossLevel`]; see [`score_breakdown`] for the
/// other mode and the intermediate values.
pub fn analyze<S: HierarchyStore + ?Sized>(
    store: &S,
    matches: &LevelMatches,
    subject_a: &str,
    subject_b: &str,
) -> Result<f64> {
    score_breakdown(store, matches, subject_a, subject_b, ScoreAccumulation::AcrossLevel)
        .map(|breakdown| breakdown.score)
}

fn positive_stay_point_count<S: HierarchyStore + ?Sized>(store: &S, subject_id: &str) -> Result<u64> {
    match store.stay_point_count(subject_id)? {
        0 => Err(SimilarityError::DataInconsistency(format!(
            "subject {} has matched clusters but no stay points",
            subject_id
        ))),
        count => Ok(count),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::store::LevelWindow;
    use crate::{Interval, MatchedRun, MatchedSequence, Visit};

    /// Store answering count queries from fixed tables.
    struct FixedCounts {
        total: u64,
        visitors: HashMap<String, u64>,
        stay_points: HashMap<String, u64>,
    }

    impl FixedCounts {
        fn new(total: u64, visitors: &[(&str, u64)], stay_points: &[(&str, u64)]) -> Self {
            Self {
                total,
                visitors: visitors.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
                stay_points: stay_points.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
            }
        }
    }

    impl HierarchyStore for FixedCounts {
        fn subject_ids(&self) -> Result<Vec<String>> {
            Ok(self.stay_points.keys().cloned().collect())
        }
        fn visited_cluster_ids(&self, _: &[&str], _: LevelWindow) -> Result<Vec<ClusterId>> {
            Ok(Vec::new())
        }
        fn visits_ordered_by_leaving_time(&self, _: &str, _: &[ClusterId]) -> Result<Vec<Visit>> {
            Ok(Vec::new())
        }
        fn total_subject_count(&self) -> Result<u64> {
            Ok(self.total)
        }
        fn visitor_count(&self, cluster_id: &ClusterId) -> Result<u64> {
            Ok(self.visitors.get(cluster_id.as_str()).copied().unwrap_or(0))
        }
        fn stay_point_count(&self, subject_id: &str) -> Result<u64> {
            self.stay_points
                .get(subject_id)
                .copied()
                .ok_or_else(|| SimilarityError::UnknownSubject(subject_id.to_string()))
        }
    }

    fn matched(id: &str, run_length: u32) -> MatchedRun {
        MatchedRun {
            cluster_id: ClusterId::new(id),
            run_length,
            first: Interval::new(0, 10),
            second: Interval::new(0, 10),
        }
    }

    fn level_matches(entries: Vec<(Level, Vec<MatchedSequence>)>) -> LevelMatches {
        entries.into_iter().collect()
    }

    fn assert_close(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() < 1e-9,
            "expected {}, got {}",
            expected,
            actual
        );
    }

    #[test]
    fn test_weights() {
        assert_eq!(alpha(1), 1.0);
        assert_eq!(alpha(4), 8.0);
        assert_eq!(beta(1), 1.0);
        assert_eq!(beta(3), 4.0);
    }

    #[test]
    fn test_idf() {
        assert_close(idf(4, 2), 2f64.ln());
        assert_eq!(idf(2, 2), 0.0);
        assert_eq!(idf(3, 0), 0.0);
        assert_eq!(idf(3, 5), 0.0);
        assert!(idf(10, 1) > idf(10, 2));
    }

    #[test]
    fn test_empty_matches_score_zero_without_queries() {
        // Zero stay points would fail normalization if it were reached
        let store = FixedCounts::new(2, &[], &[("a", 0), ("b", 0)]);
        let score = analyze(&store, &LevelMatches::new(), "a", "b").unwrap();
        assert_eq!(score, 0.0);

        let empty_level = level_matches(vec![(1, Vec::new())]);
        assert_eq!(analyze(&store, &empty_level, "a", "b").unwrap(), 0.0);
    }

    #[test]
    fn test_single_run_score() {
        let store = FixedCounts::new(4, &[("1_0", 1)], &[("a", 2), ("b", 3)]);
        let matches = level_matches(vec![(1, vec![vec![matched("1_0", 6)]])]);

        let breakdown = score_breakdown(&store, &matches, "a", "b", ScoreAccumulation::AcrossLevel).unwrap();

        let raw = 4f64.ln() * 6.0;
        assert_close(breakdown.raw_score, raw);
        assert_close(breakdown.score, raw / 6.0);
        assert_close(breakdown.level_scores[&1], raw);
    }

    #[test]
    fn test_level_and_length_weights() {
        let store = FixedCounts::new(4, &[("3_0", 1), ("3_1", 2)], &[("a", 1), ("b", 1)]);
        let matches = level_matches(vec![(3, vec![vec![matched("3_0", 1), matched("3_1", 1)]])]);

        let score = analyze(&store, &matches, "a", "b").unwrap();

        // alpha(3) = 4, beta(2) = 2
        assert_close(score, 4.0 * 2.0 * (4f64.ln() + 2f64.ln()));
    }

    #[test]
    fn test_accumulation_across_level() {
        let store = FixedCounts::new(4, &[("A", 1), ("B", 2)], &[("a", 1), ("b", 1)]);
        let matches = level_matches(vec![(1, vec![vec![matched("A", 1)], vec![matched("B", 1)]])]);

        let score = analyze(&store, &matches, "a", "b").unwrap();

        // The second sequence re-counts the first one's cluster
        assert_close(score, 4f64.ln() + (4f64.ln() + 2f64.ln()));
    }

    #[test]
    fn test_accumulation_per_sequence() {
        let store = FixedCounts::new(4, &[("A", 1), ("B", 2)], &[("a", 1), ("b", 1)]);
        let matches = level_matches(vec![(1, vec![vec![matched("A", 1)], vec![matched("B", 1)]])]);

        let breakdown = score_breakdown(&store, &matches, "a", "b", ScoreAccumulation::PerSequence).unwrap();

        assert_close(breakdown.score, 4f64.ln() + 2f64.ln());
    }

    #[test]
    fn test_accumulation_resets_between_levels() {
        let store = FixedCounts::new(4, &[("1_0", 1), ("2_0", 1)], &[("a", 1), ("b", 1)]);
        let matches = level_matches(vec![
            (1, vec![vec![matched("1_0", 1)]]),
            (2, vec![vec![matched("2_0", 1)]]),
        ]);

        let breakdown = score_breakdown(&store, &matches, "a", "b", ScoreAccumulation::AcrossLevel).unwrap();

        assert_close(breakdown.level_scores[&1], 4f64.ln());
        assert_close(breakdown.level_scores[&2], 4f64.ln());
        assert_close(breakdown.raw_score, 4f64.ln() * (1.0 + 2.0));
    }

    #[test]
    fn test_common_cluster_contributes_nothing() {
        // Every subject visited the cluster: idf = ln(1) = 0
        let store = FixedCounts::new(2, &[("1_0", 2)], &[("a", 0), ("b", 0)]);
        let matches = level_matches(vec![(1, vec![vec![matched("1_0", 50)]])]);

        let breakdown = score_breakdown(&store, &matches, "a", "b", ScoreAccumulation::AcrossLevel).unwrap();

        assert_eq!(breakdown.raw_score, 0.0);
        assert_eq!(breakdown.score, 0.0);
    }

    #[test]
    fn test_zero_stay_points_is_inconsistent() {
        let store = FixedCounts::new(4, &[("1_0", 1)], &[("a", 3), ("b", 0)]);
        let matches = level_matches(vec![(1, vec![vec![matched("1_0", 1)]])]);

        let err = analyze(&store, &matches, "a", "b").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DataInconsistency);
    }

    #[test]
    fn test_zero_visitors_does_not_produce_infinity() {
        let store = FixedCounts::new(4, &[], &[("a", 1), ("b", 1)]);
        let matches = level_matches(vec![(1, vec![vec![matched("9_9", 3)]])]);

        let score = analyze(&store, &matches, "a", "b").unwrap();
        assert_eq!(score, 0.0);
    }

    #[test]
    fn test_missing_subject() {
        let store = FixedCounts::new(4, &[], &[]);
        let err = analyze(&store, &LevelMatches::new(), "a", "").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }
}
