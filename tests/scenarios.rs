//! End-to-end scenarios over the public API.

use std::collections::{BTreeMap, HashMap};

use trace_similarity::{
    analyze, compute_similarity, extract_sequences, match_sequences, similarity_matrix,
    split_sequence, CachedStore, ClusterId, ErrorKind, HierarchyStore, InMemoryHierarchy, Interval,
    LevelMatches, LevelWindow, MatchedRun, Result, Sequence, SequencePair, SimilarityConfig,
    SimilarityError, StayPoint, Visit, VisitRun,
};

const HOUR: i64 = 3_600_000;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn sp(id: &str, arrival: i64, leaving: i64) -> StayPoint {
    StayPoint::new(id, 0.0, 0.0, arrival, leaving)
}

/// Root `1_0` with two children. Subject A stays six times in `2_0`, subject B
/// seven times in `2_1`, so the root is all they share.
fn root_only_hierarchy() -> InMemoryHierarchy {
    let mut h = InMemoryHierarchy::new();
    h.add_cluster("1_0", 1, None).unwrap();
    h.add_cluster("2_0", 2, Some("1_0")).unwrap();
    h.add_cluster("2_1", 2, Some("1_0")).unwrap();

    let a_times = [(1, 2), (2, 3), (3, 4), (4, 5), (5, 6), (7, 8)];
    for (i, (arrival, leaving)) in a_times.iter().enumerate() {
        h.add_stay_point("A", "2_0", sp(&format!("a{}", i), *arrival, *leaving)).unwrap();
    }
    let b_times = [(1, 2), (2, 3), (3, 4), (4, 5), (5, 6), (7, 8), (11, 12)];
    for (i, (arrival, leaving)) in b_times.iter().enumerate() {
        h.add_stay_point("B", "2_1", sp(&format!("b{}", i), *arrival, *leaving)).unwrap();
    }
    h
}

#[test]
fn test_scenario_a_shared_root_only() {
    init_logging();
    let h = root_only_hierarchy();

    let sequences = extract_sequences(&h, "A", "B", -1, -1).unwrap();
    assert_eq!(sequences.keys().copied().collect::<Vec<_>>(), vec![1]);
    let pair = &sequences[&1];
    assert_eq!(pair.first.runs(), &[VisitRun::new("1_0", 6, 1, 8)]);
    assert_eq!(pair.second.runs(), &[VisitRun::new("1_0", 7, 1, 12)]);

    for split_threshold_hours in [7, 48, 1000] {
        let config = SimilarityConfig {
            split_threshold_hours,
            ..Default::default()
        };
        let matches = match_sequences(&sequences, &config).unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[&1].len(), 1);
        assert_eq!(matches[&1][0].len(), 1);
        assert_eq!(matches[&1][0][0].run_length, 6);
    }
}

#[test]
fn test_scenario_a_root_visited_by_everyone_scores_zero() {
    let h = root_only_hierarchy();
    let result = compute_similarity(&h, "A", "B", &SimilarityConfig::default()).unwrap();

    // Both subjects of the population visit the root: idf = ln(2 / 2) = 0
    assert_eq!(result.matched_sequences, 1);
    assert_eq!(result.score, 0.0);
}

#[test]
fn test_scenario_b_split_at_fifty_hour_gap() {
    let sequence = Sequence::from_runs(vec![
        VisitRun::new("3_0", 1, 0, HOUR),
        VisitRun::new("3_1", 1, 2 * HOUR, 4 * HOUR),
        VisitRun::new("3_2", 1, 54 * HOUR, 55 * HOUR),
        VisitRun::new("3_3", 1, 56 * HOUR, 57 * HOUR),
    ]);

    let parts = split_sequence(&sequence, 48);

    assert_eq!(parts.len(), 2);
    assert_eq!(parts[0].len(), 2);
    assert_eq!(parts[1].len(), 2);
    assert_eq!(parts[1][0].cluster_id.as_str(), "3_2");
    let rejoined: Vec<VisitRun> = parts.concat();
    assert_eq!(rejoined.as_slice(), sequence.runs());
}

#[test]
fn test_scenario_c_min_match_length_above_longest() {
    let first = Sequence::from_runs(vec![
        VisitRun::new("2_0", 1, 0, HOUR),
        VisitRun::new("2_1", 1, 2 * HOUR, 3 * HOUR),
        VisitRun::new("2_2", 1, 4 * HOUR, 5 * HOUR),
    ]);
    let second = Sequence::from_runs(vec![
        VisitRun::new("2_0", 1, 0, HOUR),
        VisitRun::new("2_9", 1, 2 * HOUR, 3 * HOUR),
        VisitRun::new("2_2", 1, 4 * HOUR, 5 * HOUR),
    ]);
    let sequences = BTreeMap::from([(2, SequencePair::new(first, second))]);

    let config = SimilarityConfig {
        min_match_length: 3,
        ..Default::default()
    };
    assert!(match_sequences(&sequences, &config).unwrap().is_empty());

    let config = SimilarityConfig {
        min_match_length: 2,
        ..Default::default()
    };
    assert_eq!(match_sequences(&sequences, &config).unwrap()[&2].len(), 1);
}

#[test]
fn test_scenario_d_universal_cluster_adds_nothing() {
    let mut h = InMemoryHierarchy::new();
    h.add_cluster("1_0", 1, None).unwrap();
    h.add_stay_point("x", "1_0", sp("x1", 0, 10)).unwrap();
    h.add_stay_point("y", "1_0", sp("y1", 0, 10)).unwrap();

    let matches: LevelMatches = BTreeMap::from([(
        1,
        vec![vec![MatchedRun {
            cluster_id: ClusterId::new("1_0"),
            run_length: 1_000,
            first: Interval::new(0, 10),
            second: Interval::new(0, 10),
        }]],
    )]);

    assert_eq!(analyze(&h, &matches, "x", "y").unwrap(), 0.0);
}

/// Store with adjustable stay point counts and otherwise fixed answers.
struct ScaledStayPoints {
    stay_points: HashMap<&'static str, u64>,
}

impl HierarchyStore for ScaledStayPoints {
    fn subject_ids(&self) -> Result<Vec<String>> {
        Ok(self.stay_points.keys().map(|s| s.to_string()).collect())
    }

    fn visited_cluster_ids(&self, _: &[&str], _: LevelWindow) -> Result<Vec<ClusterId>> {
        Ok(Vec::new())
    }

    fn visits_ordered_by_leaving_time(&self, _: &str, _: &[ClusterId]) -> Result<Vec<Visit>> {
        Ok(Vec::new())
    }

    fn total_subject_count(&self) -> Result<u64> {
        Ok(10)
    }

    fn visitor_count(&self, _: &ClusterId) -> Result<u64> {
        Ok(2)
    }

    fn stay_point_count(&self, subject_id: &str) -> Result<u64> {
        self.stay_points
            .get(subject_id)
            .copied()
            .ok_or_else(|| SimilarityError::UnknownSubject(subject_id.to_string()))
    }
}

#[test]
fn test_scenario_e_normalization_by_stay_points() {
    let matches: LevelMatches = BTreeMap::from([(
        2,
        vec![vec![
            MatchedRun {
                cluster_id: ClusterId::new("2_0"),
                run_length: 3,
                first: Interval::new(0, 10),
                second: Interval::new(0, 10),
            },
            MatchedRun {
                cluster_id: ClusterId::new("2_1"),
                run_length: 1,
                first: Interval::new(20, 30),
                second: Interval::new(20, 30),
            },
        ]],
    )]);

    let store = ScaledStayPoints {
        stay_points: HashMap::from([("a", 3), ("b", 5)]),
    };
    let doubled = ScaledStayPoints {
        stay_points: HashMap::from([("a", 6), ("b", 10)]),
    };

    let score = analyze(&store, &matches, "a", "b").unwrap();
    let quartered = analyze(&doubled, &matches, "a", "b").unwrap();

    assert!(score > 0.0);
    assert!((score / 4.0 - quartered).abs() < 1e-12);
}

#[test]
fn test_no_shared_context_flows_through_empty() {
    let mut h = InMemoryHierarchy::new();
    h.add_cluster("1_0", 1, None).unwrap();
    h.add_cluster("1_1", 1, None).unwrap();
    h.add_stay_point("x", "1_0", sp("x1", 0, 10)).unwrap();
    h.add_stay_point("y", "1_1", sp("y1", 0, 10)).unwrap();

    let sequences = extract_sequences(&h, "x", "y", -1, -1).unwrap();
    assert!(sequences.is_empty());

    let matches = match_sequences(&sequences, &SimilarityConfig::default()).unwrap();
    assert!(matches.is_empty());

    assert_eq!(analyze(&h, &matches, "x", "y").unwrap(), 0.0);
}

/// A small city: districts on level 1, neighbourhoods on level 2, venues on
/// level 3. Two commuters share a daily pattern, a third visits one venue.
fn city() -> InMemoryHierarchy {
    let mut h = InMemoryHierarchy::new();
    h.add_cluster("1_0", 1, None).unwrap();
    h.add_cluster("1_1", 1, None).unwrap();
    h.add_cluster("2_0", 2, Some("1_0")).unwrap();
    h.add_cluster("2_1", 2, Some("1_1")).unwrap();
    h.add_cluster("3_0", 3, Some("2_0")).unwrap();
    h.add_cluster("3_1", 3, Some("2_1")).unwrap();
    h.add_cluster("3_2", 3, Some("2_1")).unwrap();

    for day in 0..3 {
        let base = day * 24 * HOUR;
        let ann = format!("ann-{}", day);
        let ben = format!("ben-{}", day);
        h.add_stay_point("ann", "3_0", sp(&format!("{}-home", ann), base, base + 8 * HOUR)).unwrap();
        h.add_stay_point("ann", "3_1", sp(&format!("{}-work", ann), base + 9 * HOUR, base + 17 * HOUR))
            .unwrap();
        h.add_stay_point("ben", "3_0", sp(&format!("{}-home", ben), base, base + 7 * HOUR)).unwrap();
        h.add_stay_point("ben", "3_1", sp(&format!("{}-work", ben), base + 8 * HOUR, base + 18 * HOUR))
            .unwrap();
    }
    h.add_stay_point("cid", "3_2", sp("cid-0", 10 * HOUR, 12 * HOUR)).unwrap();
    h.add_subject("dot");
    h
}

#[test]
fn test_commuters_score_on_every_level() {
    init_logging();
    let h = city();
    let result = compute_similarity(&h, "ann", "ben", &SimilarityConfig::default()).unwrap();

    assert_eq!(result.shared_levels, 3);
    assert!(result.score > 0.0);
    assert_eq!(result.level_scores.keys().copied().collect::<Vec<_>>(), vec![1, 2, 3]);
    assert!(result.level_scores[&3] > 0.0);
}

#[test]
fn test_level_window_limits_scoring() {
    let h = city();
    let config = SimilarityConfig {
        from_level: 3,
        to_level: 3,
        ..Default::default()
    };
    let result = compute_similarity(&h, "ann", "ben", &config).unwrap();
    assert_eq!(result.level_scores.keys().copied().collect::<Vec<_>>(), vec![3]);
}

#[test]
fn test_cached_store_gives_identical_results() {
    let h = city();
    let cached = CachedStore::new(&h);
    let config = SimilarityConfig::default();

    let direct = compute_similarity(&h, "ann", "ben", &config).unwrap();
    let first = compute_similarity(&cached, "ann", "ben", &config).unwrap();
    let second = compute_similarity(&cached, "ann", "ben", &config).unwrap();

    assert_eq!(direct, first);
    assert_eq!(first, second);
}

#[test]
fn test_store_as_trait_object() {
    let h = city();
    let store: &dyn HierarchyStore = &h;
    let result = compute_similarity(store, "ann", "cid", &SimilarityConfig::default()).unwrap();
    assert!(result.score >= 0.0);
}

#[test]
fn test_matrix_over_population() {
    init_logging();
    let h = city();
    let subjects = h.subject_ids().unwrap();

    let matrix = similarity_matrix(&h, &subjects, &SimilarityConfig::default()).unwrap();

    // 4 subjects, 6 unordered pairs
    assert_eq!(matrix.scores.len(), 6);
    assert!(matrix.failures.is_empty());
    let commuters = matrix.score("ann", "ben").unwrap();
    assert!(matrix.scores.iter().all(|s| s.score <= commuters));
    assert_eq!(matrix.score("dot", "ann"), Some(0.0));
}

#[test]
fn test_matrix_reports_unknown_subjects() {
    let h = city();
    let subjects = vec!["ann".to_string(), "nobody".to_string()];

    let matrix = similarity_matrix(&h, &subjects, &SimilarityConfig::default()).unwrap();

    assert!(matrix.scores.is_empty());
    assert_eq!(matrix.failures.len(), 1);
    assert_eq!(matrix.failures[0].kind, ErrorKind::InvalidInput);
    assert!(matrix.failures[0].message.contains("nobody"));
}

#[cfg(feature = "serde")]
#[test]
fn test_config_from_partial_json() {
    let config: SimilarityConfig =
        serde_json::from_str(r#"{"split_threshold_hours": 24, "accumulation": "per_sequence"}"#).unwrap();

    assert_eq!(config.split_threshold_hours, 24);
    assert_eq!(config.accumulation, trace_similarity::ScoreAccumulation::PerSequence);
    assert_eq!(config.min_match_length, 1);
    assert_eq!(config.temporal_constraint, 0.5);
}
