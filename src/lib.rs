//! # Trace Similarity
//!
//! Spatial-behavioral similarity between mobility-trace subjects.
//!
//! Two subjects are compared by the sequences of shared clusters they visit at
//! every level of a cluster hierarchy:
//!
//! 1. **Extraction** ([`extract_sequences`]) - find the clusters both subjects
//!    visited and build one chronologically ordered [`Sequence`] per subject and level
//! 2. **Matching** ([`match_sequences`]) - split sequences at long gaps, find all
//!    longest common sub-sequences between the parts, drop transitions whose
//!    timing disagrees
//! 3. **Analysis** ([`analyze`]) - weight the surviving matches by level, length
//!    and cluster rarity into a single score
//!
//! ## Features
//!
//! - **`parallel`** - Enable parallel batch processing with rayon
//! - **`serde`** - Serialize configuration and results
//! - **`full`** - Enable all features
//!
//! ## Quick Start
//!
//! ```rust
//! use trace_similarity::{compute_similarity, InMemoryHierarchy, SimilarityConfig, StayPoint};
//!
//! const HOUR: i64 = 3_600_000;
//!
//! let mut hierarchy = InMemoryHierarchy::new();
//! hierarchy.add_cluster("1_0", 1, None)?;
//! hierarchy.add_cluster("2_0", 2, Some("1_0"))?;
//! hierarchy.add_cluster("2_1", 2, Some("1_0"))?;
//!
//! // Home then work, for two people on the same day
//! hierarchy.add_stay_point("alice", "2_0", StayPoint::new("a1", 52.52, 13.40, 0, 8 * HOUR))?;
//! hierarchy.add_stay_point("alice", "2_1", StayPoint::new("a2", 52.50, 13.45, 9 * HOUR, 17 * HOUR))?;
//! hierarchy.add_stay_point("bob", "2_0", StayPoint::new("b1", 52.52, 13.41, HOUR, 8 * HOUR))?;
//! hierarchy.add_stay_point("bob", "2_1", StayPoint::new("b2", 52.50, 13.44, 9 * HOUR, 18 * HOUR))?;
//! hierarchy.add_subject("carol");
//!
//! let result = compute_similarity(&hierarchy, "alice", "bob", &SimilarityConfig::default())?;
//! assert!(result.score > 0.0);
//! # Ok::<(), trace_similarity::SimilarityError>(())
//! ```

use log::{debug, info, warn};
use std::borrow::Borrow;
use std::collections::BTreeMap;
use std::fmt;

pub mod error;
pub use error::{ErrorKind, Result, SimilarityError};

pub mod time_utils;

// Hierarchy store interface and reference implementations
pub mod store;
pub use store::{CachedStore, HierarchyStore, InMemoryHierarchy, LevelWindow};

// Pipeline stages
pub mod extraction;
pub use extraction::{extract_sequences, group_by_level};

pub mod matching;
pub use matching::{
    all_longest_common_subsequences, apply_temporal_constraint, match_sequences, split_sequence,
};

pub mod analysis;
pub use analysis::{alpha, analyze, beta, idf, score_breakdown, ScoreBreakdown};

// ============================================================================
// Core Types
// ============================================================================

/// Depth of a cluster in the shared hierarchy. Level 1 is the top-level cluster.
pub type Level = u32;

/// Identifier of a cluster in the shared hierarchy.
///
/// By convention the identifier starts with the cluster's depth, e.g. `"3_0"`
/// is a cluster on level 3.
///
/// # Example
/// ```
/// use trace_similarity::ClusterId;
/// assert_eq!(ClusterId::new("3_0").depth(), Some(3));
/// assert_eq!(ClusterId::new("root").depth(), None);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct ClusterId(String);

impl ClusterId {
    /// Create a cluster identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The raw identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Depth encoded in the leading digits of the identifier.
    ///
    /// Returns `None` when the identifier does not start with a digit or the
    /// number does not fit a [`Level`].
    pub fn depth(&self) -> Option<Level> {
        let end = self
            .0
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(self.0.len());
        if end == 0 {
            return None;
        }
        self.0[..end].parse().ok()
    }
}

impl fmt::Display for ClusterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ClusterId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ClusterId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl Borrow<str> for ClusterId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// A detected stay of one subject at one location.
///
/// Times are epoch milliseconds with `arrival_time <= leaving_time`.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StayPoint {
    pub id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub arrival_time: i64,
    pub leaving_time: i64,
}

impl StayPoint {
    /// Create a new stay point.
    pub fn new(
        id: impl Into<String>,
        latitude: f64,
        longitude: f64,
        arrival_time: i64,
        leaving_time: i64,
    ) -> Self {
        Self {
            id: id.into(),
            latitude,
            longitude,
            arrival_time,
            leaving_time,
        }
    }

    /// Check coordinates and time ordering.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
            && self.arrival_time <= self.leaving_time
    }
}

/// One visit of a subject to a cluster, as reported by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Visit {
    pub cluster_id: ClusterId,
    pub arrival_time: i64,
    pub leaving_time: i64,
}

impl Visit {
    pub fn new(cluster_id: impl Into<ClusterId>, arrival_time: i64, leaving_time: i64) -> Self {
        Self {
            cluster_id: cluster_id.into(),
            arrival_time,
            leaving_time,
        }
    }
}

/// A closed time interval in epoch milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Interval {
    pub arrival: i64,
    pub leaving: i64,
}

impl Interval {
    pub fn new(arrival: i64, leaving: i64) -> Self {
        Self { arrival, leaving }
    }

    /// Check whether two intervals share at least one instant.
    pub fn overlaps(&self, other: &Interval) -> bool {
        time_utils::intervals_overlap(self.arrival, self.leaving, other.arrival, other.leaving)
    }
}

/// One or more chronologically adjacent visits to the same cluster.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct VisitRun {
    pub cluster_id: ClusterId,
    /// Number of adjacent visits collapsed into this run (at least 1)
    pub run_length: u32,
    /// Arrival time of the first visit
    pub arrival_time: i64,
    /// Leaving time of the latest visit
    pub leaving_time: i64,
}

impl VisitRun {
    pub fn new(
        cluster_id: impl Into<ClusterId>,
        run_length: u32,
        arrival_time: i64,
        leaving_time: i64,
    ) -> Self {
        Self {
            cluster_id: cluster_id.into(),
            run_length: run_length.max(1),
            arrival_time,
            leaving_time,
        }
    }

    pub fn interval(&self) -> Interval {
        Interval::new(self.arrival_time, self.leaving_time)
    }

    /// Fold a later run of the same cluster into this one.
    fn absorb(&mut self, later: &VisitRun) {
        self.run_length = self.run_length.saturating_add(later.run_length);
        self.leaving_time = self.leaving_time.max(later.leaving_time);
    }
}

impl From<Visit> for VisitRun {
    fn from(visit: Visit) -> Self {
        Self {
            cluster_id: visit.cluster_id,
            run_length: 1,
            arrival_time: visit.arrival_time,
            leaving_time: visit.leaving_time,
        }
    }
}

/// Ordered visit runs of one subject on one level.
///
/// Adjacent runs never share a cluster: every constructor folds them together.
/// Callers supply runs in ascending leaving-time order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Sequence {
    runs: Vec<VisitRun>,
}

impl Sequence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a sequence from visits ordered by leaving time.
    ///
    /// # Example
    /// ```
    /// use trace_similarity::{Sequence, Visit};
    ///
    /// let sequence = Sequence::from_visits(vec![
    ///     Visit::new("2_0", 0, 10),
    ///     Visit::new("2_0", 12, 20),
    ///     Visit::new("2_1", 30, 40),
    /// ]);
    /// assert_eq!(sequence.len(), 2);
    /// assert_eq!(sequence.runs()[0].run_length, 2);
    /// assert_eq!(sequence.runs()[0].leaving_time, 20);
    /// ```
    pub fn from_visits<I: IntoIterator<Item = Visit>>(visits: I) -> Self {
        Self::from_runs(visits.into_iter().map(VisitRun::from))
    }

    /// Build a sequence from runs, folding adjacent runs of the same cluster.
    pub fn from_runs<I: IntoIterator<Item = VisitRun>>(runs: I) -> Self {
        let mut sequence = Self::new();
        for run in runs {
            sequence.push_run(run);
        }
        sequence
    }

    /// Append a run, folding it into the last run when the cluster repeats.
    pub fn push_run(&mut self, run: VisitRun) {
        match self.runs.last_mut() {
            Some(last) if last.cluster_id == run.cluster_id => last.absorb(&run),
            _ => self.runs.push(run),
        }
    }

    pub fn runs(&self) -> &[VisitRun] {
        &self.runs
    }

    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    /// Total number of visits across all runs.
    pub fn visit_count(&self) -> u64 {
        self.runs.iter().map(|r| r.run_length as u64).sum()
    }
}

/// The two subjects' sequences on the same level.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SequencePair {
    pub first: Sequence,
    pub second: Sequence,
}

impl SequencePair {
    pub fn new(first: Sequence, second: Sequence) -> Self {
        Self { first, second }
    }
}

/// A cluster both subjects visited at aligned positions of their sequences.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MatchedRun {
    pub cluster_id: ClusterId,
    /// Minimum of both subjects' run lengths
    pub run_length: u32,
    /// Timing of the first subject's run
    pub first: Interval,
    /// Timing of the second subject's run
    pub second: Interval,
}

impl MatchedRun {
    /// Combine two runs of the same cluster.
    pub fn from_runs(first: &VisitRun, second: &VisitRun) -> Self {
        Self {
            cluster_id: first.cluster_id.clone(),
            run_length: first.run_length.min(second.run_length),
            first: first.interval(),
            second: second.interval(),
        }
    }

    /// The same match with the subjects swapped.
    pub fn mirrored(&self) -> Self {
        Self {
            cluster_id: self.cluster_id.clone(),
            run_length: self.run_length,
            first: self.second,
            second: self.first,
        }
    }
}

/// One maximal-length common sub-sequence after temporal filtering.
pub type MatchedSequence = Vec<MatchedRun>;

/// Extraction output: one sequence pair per shared level.
pub type LevelSequences = BTreeMap<Level, SequencePair>;

/// Matching output: surviving matched sequences per level.
pub type LevelMatches = BTreeMap<Level, Vec<MatchedSequence>>;

/// How the per-level cluster weight is accumulated over the sequences of a level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum ScoreAccumulation {
    /// The running cluster weight carries over from one sequence to the next
    /// within a level, so later sequences also re-count earlier ones.
    #[default]
    AcrossLevel,
    /// Every sequence is weighted on its own clusters only.
    PerSequence,
}

/// Configuration for the similarity pipeline.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct SimilarityConfig {
    /// Lowest level considered. Values below 1 mean no lower bound.
    /// Default: -1
    pub from_level: i32,

    /// Highest level considered. Negative values mean no upper bound.
    /// Default: -1
    pub to_level: i32,

    /// A sequence is split where consecutive runs are more than this many
    /// whole hours apart.
    /// Default: 48
    pub split_threshold_hours: i64,

    /// Shortest common sub-sequence worth keeping. Must be at least 1.
    /// Default: 1
    pub min_match_length: usize,

    /// Maximum relative difference between two subjects' transition gaps.
    /// Must be finite and non-negative.
    /// Default: 0.5
    pub temporal_constraint: f64,

    /// Ceiling on alignments enumerated per pair of sub-sequences.
    /// Default: 1024
    pub max_alignments: usize,

    /// Accumulation of cluster weights within a level.
    /// Default: AcrossLevel
    pub accumulation: ScoreAccumulation,
}

impl Default for SimilarityConfig {
    fn default() -> Self {
        Self {
            from_level: -1,
            to_level: -1,
            split_threshold_hours: 48,
            min_match_length: 1,
            temporal_constraint: 0.5,
            max_alignments: 1024,
            accumulation: ScoreAccumulation::AcrossLevel,
        }
    }
}

impl SimilarityConfig {
    /// Reject parameter combinations the matcher cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.min_match_length < 1 {
            return Err(SimilarityError::InvalidInput(
                "min_match_length must be at least 1".to_string(),
            ));
        }
        if !self.temporal_constraint.is_finite() || self.temporal_constraint < 0.0 {
            return Err(SimilarityError::InvalidInput(format!(
                "temporal_constraint must be a finite non-negative number, got {}",
                self.temporal_constraint
            )));
        }
        if self.max_alignments == 0 {
            return Err(SimilarityError::InvalidInput(
                "max_alignments must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Result of comparing two subjects.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SimilarityResult {
    pub subject_a: String,
    pub subject_b: String,
    /// Normalized similarity score (0 = no shared spatial pattern)
    pub score: f64,
    /// Score before division by the stay point counts
    pub raw_score: f64,
    /// Level score before the level weight is applied
    pub level_scores: BTreeMap<Level, f64>,
    /// Number of levels on which both subjects share clusters
    pub shared_levels: usize,
    /// Number of matched sequences that survived temporal filtering
    pub matched_sequences: usize,
}

// ============================================================================
// Core Functions
// ============================================================================

/// Compare two subjects end to end: extract, match, analyze.
///
/// Returns a zero score when the subjects share no cluster.
pub fn compute_similarity<S: HierarchyStore + ?Sized>(
    store: &S,
    subject_a: &str,
    subject_b: &str,
    config: &SimilarityConfig,
) -> Result<SimilarityResult> {
    config.validate()?;

    debug!(
        "[Similarity] {} vs {}: extracting levels {}..{}",
        subject_a, subject_b, config.from_level, config.to_level
    );
    let sequences = extract_sequences(store, subject_a, subject_b, config.from_level, config.to_level)?;
    let matches = match_sequences(&sequences, config)?;
    let breakdown = score_breakdown(store, &matches, subject_a, subject_b, config.accumulation)?;

    Ok(SimilarityResult {
        subject_a: subject_a.to_string(),
        subject_b: subject_b.to_string(),
        score: breakdown.score,
        raw_score: breakdown.raw_score,
        level_scores: breakdown.level_scores,
        shared_levels: sequences.len(),
        matched_sequences: matches.values().map(Vec::len).sum(),
    })
}

/// Similarity score of one subject pair.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PairScore {
    pub subject_a: String,
    pub subject_b: String,
    pub score: f64,
}

/// A subject pair whose comparison failed. The batch continues without it.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PairFailure {
    pub subject_a: String,
    pub subject_b: String,
    pub kind: ErrorKind,
    pub message: String,
}

/// Scores of all unordered subject pairs of a batch run.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SimilarityMatrix {
    /// Subjects in the order they were compared
    pub subject_ids: Vec<String>,
    /// One entry per successfully compared pair `(i, j)` with `i < j`
    pub scores: Vec<PairScore>,
    /// Pairs that could not be compared
    pub failures: Vec<PairFailure>,
}

impl SimilarityMatrix {
    /// Look up the score of a pair in either order.
    pub fn score(&self, a: &str, b: &str) -> Option<f64> {
        self.scores
            .iter()
            .find(|s| {
                (s.subject_a == a && s.subject_b == b) || (s.subject_a == b && s.subject_b == a)
            })
            .map(|s| s.score)
    }
}

/// Compare every unordered pair of the given subjects.
///
/// Store queries are cached for the duration of the run. A failing pair is
/// logged and recorded in [`SimilarityMatrix::failures`]; the remaining pairs
/// are still compared. Only an invalid configuration aborts the run.
///
/// # Example
/// ```
/// use trace_similarity::{similarity_matrix, InMemoryHierarchy, SimilarityConfig, StayPoint};
///
/// let mut hierarchy = InMemoryHierarchy::new();
/// hierarchy.add_cluster("1_0", 1, None)?;
/// hierarchy.add_stay_point("a", "1_0", StayPoint::new("a1", 0.0, 0.0, 0, 10))?;
/// hierarchy.add_stay_point("b", "1_0", StayPoint::new("b1", 0.0, 0.0, 5, 15))?;
/// hierarchy.add_subject("c");
///
/// let subjects = vec!["a".to_string(), "b".to_string(), "c".to_string()];
/// let matrix = similarity_matrix(&hierarchy, &subjects, &SimilarityConfig::default())?;
/// assert_eq!(matrix.scores.len(), 3);
/// assert!(matrix.failures.is_empty());
/// # Ok::<(), trace_similarity::SimilarityError>(())
/// ```
pub fn similarity_matrix<S: HierarchyStore + ?Sized>(
    store: &S,
    subject_ids: &[String],
    config: &SimilarityConfig,
) -> Result<SimilarityMatrix> {
    config.validate()?;

    let start = std::time::Instant::now();
    let cached = CachedStore::new(store);
    let mut matrix = SimilarityMatrix {
        subject_ids: subject_ids.to_vec(),
        ..Default::default()
    };

    for (i, j) in subject_pairs(subject_ids.len()) {
        match compare_pair(&cached, &subject_ids[i], &subject_ids[j], config) {
            Ok(score) => matrix.scores.push(score),
            Err(failure) => matrix.failures.push(failure),
        }
    }

    info!(
        "[Similarity] Compared {} pairs ({} failed) in {:?}",
        matrix.scores.len() + matrix.failures.len(),
        matrix.failures.len(),
        start.elapsed()
    );
    Ok(matrix)
}

/// Compare every unordered pair using parallel processing.
///
/// This is the same as [`similarity_matrix`] but evaluates pairs on the rayon
/// thread pool. Pairs share no mutable state apart from the query cache.
#[cfg(feature = "parallel")]
pub fn similarity_matrix_parallel<S: HierarchyStore + Sync + ?Sized>(
    store: &S,
    subject_ids: &[String],
    config: &SimilarityConfig,
) -> Result<SimilarityMatrix> {
    use rayon::prelude::*;

    config.validate()?;

    let start = std::time::Instant::now();
    let cached = CachedStore::new(store);
    let pairs: Vec<(usize, usize)> = subject_pairs(subject_ids.len()).collect();

    let outcomes: Vec<std::result::Result<PairScore, PairFailure>> = pairs
        .par_iter()
        .map(|&(i, j)| compare_pair(&cached, &subject_ids[i], &subject_ids[j], config))
        .collect();

    let mut matrix = SimilarityMatrix {
        subject_ids: subject_ids.to_vec(),
        ..Default::default()
    };
    for outcome in outcomes {
        match outcome {
            Ok(score) => matrix.scores.push(score),
            Err(failure) => matrix.failures.push(failure),
        }
    }

    info!(
        "[Similarity] Compared {} pairs in parallel ({} failed) in {:?}",
        pairs.len(),
        matrix.failures.len(),
        start.elapsed()
    );
    Ok(matrix)
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Index pairs `(i, j)` with `i < j < count`.
fn subject_pairs(count: usize) -> impl Iterator<Item = (usize, usize)> {
    (0..count).flat_map(move |i| ((i + 1)..count).map(move |j| (i, j)))
}

fn compare_pair<S: HierarchyStore + ?Sized>(
    store: &S,
    subject_a: &str,
    subject_b: &str,
    config: &SimilarityConfig,
) -> std::result::Result<PairScore, PairFailure> {
    match compute_similarity(store, subject_a, subject_b, config) {
        Ok(result) => Ok(PairScore {
            subject_a: result.subject_a,
            subject_b: result.subject_b,
            score: result.score,
        }),
        Err(e) => {
            warn!(
                "[Similarity] Skipping pair [{}] and [{}]: {}",
                subject_a, subject_b, e
            );
            Err(PairFailure {
                subject_a: subject_a.to_string(),
                subject_b: subject_b.to_string(),
                kind: e.kind(),
                message: e.to_string(),
            })
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
