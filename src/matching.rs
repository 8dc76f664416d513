//! # Sequence Matching
//!
//! Finds the longest common sub-sequences two subjects share on every level.
//!
//! ## Algorithm
//!
//! 1. Split both sequences wherever consecutive runs are more than
//!    `split_threshold_hours` apart
//! 2. For every pair of parts (full cross product) enumerate *all*
//!    longest common sub-sequences, matching runs by cluster id
//! 3. Keep the candidates tied for the greatest length on the level, if that
//!    length reaches `min_match_length`
//! 4. Drop transitions whose timing disagrees between the subjects
//!
//! Enumerating every maximal alignment can explode combinatorially, so the
//! enumeration stops after [`SimilarityConfig::max_alignments`] alignments
//! per pair of parts. The work done is bounded by that ceiling times the
//! alignment length, not by the number of alignments that exist.

use log::{debug, warn};
use std::collections::BTreeSet;
use std::rc::Rc;

use crate::error::Result;
use crate::time_utils;
use crate::{
    LevelMatches, LevelSequences, MatchedRun, MatchedSequence, Sequence, SequencePair,
    SimilarityConfig, VisitRun,
};

// ============================================================================
// Core Functions
// ============================================================================

/// Match the sequence pairs of every level.
///
/// Levels without a surviving match are absent from the result.
///
/// # Example
/// ```
/// use std::collections::BTreeMap;
/// use trace_similarity::{match_sequences, Sequence, SequencePair, SimilarityConfig, VisitRun};
///
/// let pair = SequencePair::new(
///     Sequence::from_runs(vec![VisitRun::new("1_0", 6, 1, 8)]),
///     Sequence::from_runs(vec![VisitRun::new("1_0", 7, 1, 12)]),
/// );
/// let sequences = BTreeMap::from([(1, pair)]);
///
/// let matches = match_sequences(&sequences, &SimilarityConfig::default())?;
/// assert_eq!(matches[&1].len(), 1);
/// assert_eq!(matches[&1][0][0].run_length, 6);
/// # Ok::<(), trace_similarity::SimilarityError>(())
/// ```
pub fn match_sequences(sequences: &LevelSequences, config: &SimilarityConfig) -> Result<LevelMatches> {
    config.validate()?;

    let mut matches = LevelMatches::new();
    for (&level, pair) in sequences {
        let matched = match_level(pair, config);
        debug!("[Matching] Level {}: {} matched sequences", level, matched.len());
        if !matched.is_empty() {
            matches.insert(level, matched);
        }
    }
    Ok(matches)
}

/// Match the two sequences of one level.
pub fn match_level(pair: &SequencePair, config: &SimilarityConfig) -> Vec<MatchedSequence> {
    let first_parts = split_sequence(&pair.first, config.split_threshold_hours);
    let second_parts = split_sequence(&pair.second, config.split_threshold_hours);

    let mut candidates = Vec::new();
    for first in &first_parts {
        for second in &second_parts {
            candidates.extend(all_longest_common_subsequences(first, second, config.max_alignments));
        }
    }

    select_longest(candidates, config.min_match_length)
        .into_iter()
        .map(|sequence| apply_temporal_constraint(sequence, config.temporal_constraint))
        .filter(|sequence| !sequence.is_empty())
        .collect()
}

/// Split a sequence into temporally contiguous parts.
///
/// A new part starts wherever the gap from one run's leaving time to the next
/// run's arrival time exceeds `threshold_hours` whole hours. Concatenating the
/// parts gives back the original sequence.
///
/// # Example
/// ```
/// use trace_similarity::{split_sequence, Sequence, VisitRun};
///
/// const HOUR: i64 = 3_600_000;
/// let sequence = Sequence::from_runs(vec![
///     VisitRun::new("2_0", 1, 0, HOUR),
///     VisitRun::new("2_1", 1, 2 * HOUR, 3 * HOUR),
///     VisitRun::new("2_0", 1, 53 * HOUR, 54 * HOUR),
/// ]);
/// let parts = split_sequence(&sequence, 48);
/// assert_eq!(parts.len(), 2);
/// assert_eq!(parts[0].len(), 2);
/// ```
pub fn split_sequence(sequence: &Sequence, threshold_hours: i64) -> Vec<&[VisitRun]> {
    let runs = sequence.runs();
    if runs.is_empty() {
        return Vec::new();
    }

    let mut parts = Vec::new();
    let mut start = 0;
    for (i, window) in runs.windows(2).enumerate() {
        let gap = time_utils::difference_in_hours(window[0].leaving_time, window[1].arrival_time);
        if gap > threshold_hours {
            parts.push(&runs[start..=i]);
            start = i + 1;
        }
    }
    parts.push(&runs[start..]);
    parts
}

/// Standard LCS length table over cluster ids.
///
/// `table[i][j]` is the LCS length of `a[..i]` and `b[..j]`.
pub fn lcs_length_table(a: &[VisitRun], b: &[VisitRun]) -> Vec<Vec<usize>> {
    let mut table = vec![vec![0usize; b.len() + 1]; a.len() + 1];
    for i in 1..=a.len() {
        for j in 1..=b.len() {
            table[i][j] = if a[i - 1].cluster_id == b[j - 1].cluster_id {
                table[i - 1][j - 1] + 1
            } else {
                table[i][j - 1].max(table[i - 1][j])
            };
        }
    }
    table
}

/// Enumerate all distinct longest common sub-sequences of two parts.
///
/// Returns nothing when the parts share no cluster. At most `max_alignments`
/// results are produced. When the ceiling is hit the enumeration stops, the
/// alignments found first are kept and a warning is logged. Results are
/// returned in ascending order.
pub fn all_longest_common_subsequences(
    a: &[VisitRun],
    b: &[VisitRun],
    max_alignments: usize,
) -> Vec<MatchedSequence> {
    let table = lcs_length_table(a, b);
    if table[a.len()][b.len()] == 0 {
        return Vec::new();
    }

    let backtracker = Backtracker::new(a, b, &table, max_alignments.max(1));
    let (alignments, truncated) = backtracker.run();
    if truncated {
        warn!(
            "[Matching] Alignment ceiling of {} reached for parts of length {} and {}",
            max_alignments,
            a.len(),
            b.len()
        );
    }
    alignments.into_iter().collect()
}

/// Keep the candidates tied for the greatest length, if it reaches `min_length`.
pub fn select_longest(candidates: Vec<MatchedSequence>, min_length: usize) -> Vec<MatchedSequence> {
    let longest = match candidates.iter().map(Vec::len).max() {
        Some(len) if len >= min_length && len > 0 => len,
        _ => return Vec::new(),
    };
    candidates.into_iter().filter(|c| c.len() == longest).collect()
}

/// Drop matched runs whose transitions disagree in timing.
///
/// Every pass compares each subject's gap between consecutive runs. Where the
/// relative difference exceeds `threshold` the earlier run of the transition
/// is dropped; the last run always survives a pass. Passes repeat until all
/// transitions agree. A single remaining run survives only if both subjects
/// were there at overlapping times.
///
/// # Example
/// ```
/// use trace_similarity::{apply_temporal_constraint, Interval, MatchedRun, ClusterId};
///
/// let run = |id: &str, first: (i64, i64), second: (i64, i64)| MatchedRun {
///     cluster_id: ClusterId::new(id),
///     run_length: 1,
///     first: Interval::new(first.0, first.1),
///     second: Interval::new(second.0, second.1),
/// };
///
/// // Both subjects take 10 to get from A to B
/// let kept = apply_temporal_constraint(vec![run("A", (0, 10), (100, 110)), run("B", (20, 30), (120, 130))], 0.5);
/// assert_eq!(kept.len(), 2);
///
/// // A lone run without overlap is dropped
/// assert!(apply_temporal_constraint(vec![run("A", (0, 10), (20, 30))], 0.5).is_empty());
/// ```
pub fn apply_temporal_constraint(mut sequence: MatchedSequence, threshold: f64) -> MatchedSequence {
    loop {
        match sequence.len() {
            0 => return sequence,
            1 => {
                let only = &sequence[0];
                if only.first.overlaps(&only.second) {
                    return sequence;
                }
                return Vec::new();
            }
            len => {
                let mut kept = Vec::with_capacity(len);
                for window in sequence.windows(2) {
                    if transition_agrees(&window[0], &window[1], threshold) {
                        kept.push(window[0].clone());
                    }
                }
                if let Some(last) = sequence.last() {
                    kept.push(last.clone());
                }

                if kept.len() == len {
                    return sequence;
                }
                sequence = kept;
            }
        }
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

fn transition_agrees(from: &MatchedRun, to: &MatchedRun, threshold: f64) -> bool {
    let gap_first = to.first.arrival.saturating_sub(from.first.leaving);
    let gap_second = to.second.arrival.saturating_sub(from.second.leaving);
    time_utils::transition_within_constraint(gap_first, gap_second, threshold)
}

/// How the LCS table reaches cell `(i, j)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    /// Empty prefix on either side
    Origin,
    /// The runs at `i - 1` and `j - 1` match
    Diagonal,
    /// Only `(i - 1, j)` holds the best value
    Up,
    /// Only `(i, j - 1)` holds the best value
    Left,
    /// `(i - 1, j)` and `(i, j - 1)` are tied
    Both,
}

/// Table cell as `(i, j)`.
type Cell = (usize, usize);

/// Stands in for every origin cell, where all alignments end.
const ORIGIN: Cell = (0, 0);

/// The matching cells (or [`ORIGIN`]) a cell reaches without matching.
type Frontier = Rc<BTreeSet<Cell>>;

/// Enumerates maximal alignments from a filled LCS table.
///
/// A bottom-up pass gives every reachable cell its frontier: the diagonal
/// cells reached from it through `Up`, `Left` and `Both` steps alone. Each
/// frontier cell leads on to at least one complete alignment, so a depth-first
/// walk over frontiers never hits a dead end and stops as soon as the ceiling
/// is reached. Distinct walks give distinct cell paths.
struct Backtracker<'a> {
    a: &'a [VisitRun],
    b: &'a [VisitRun],
    table: &'a [Vec<usize>],
    max_alignments: usize,
}

impl<'a> Backtracker<'a> {
    fn new(a: &'a [VisitRun], b: &'a [VisitRun], table: &'a [Vec<usize>], max_alignments: usize) -> Self {
        Self {
            a,
            b,
            table,
            max_alignments,
        }
    }

    fn step(&self, i: usize, j: usize) -> Step {
        if i == 0 || j == 0 {
            return Step::Origin;
        }
        if self.a[i - 1].cluster_id == self.b[j - 1].cluster_id {
            return Step::Diagonal;
        }
        let up = self.table[i - 1][j];
        let left = self.table[i][j - 1];
        match up.cmp(&left) {
            std::cmp::Ordering::Greater => Step::Up,
            std::cmp::Ordering::Less => Step::Left,
            std::cmp::Ordering::Equal => Step::Both,
        }
    }

    fn index(&self, i: usize, j: usize) -> usize {
        i * (self.b.len() + 1) + j
    }

    /// Mark the cells the enumeration will visit, walking back from the end.
    fn reachable(&self) -> Vec<bool> {
        let (n, m) = (self.a.len(), self.b.len());
        let mut reachable = vec![false; (n + 1) * (m + 1)];
        reachable[self.index(n, m)] = true;

        for i in (0..=n).rev() {
            for j in (0..=m).rev() {
                if !reachable[self.index(i, j)] {
                    continue;
                }
                match self.step(i, j) {
                    Step::Origin => {}
                    Step::Diagonal => reachable[self.index(i - 1, j - 1)] = true,
                    Step::Up => reachable[self.index(i - 1, j)] = true,
                    Step::Left => reachable[self.index(i, j - 1)] = true,
                    Step::Both => {
                        reachable[self.index(i - 1, j)] = true;
                        reachable[self.index(i, j - 1)] = true;
                    }
                }
            }
        }
        reachable
    }

    /// Frontier of every reachable cell, in row-major order.
    fn frontiers(&self) -> Vec<Option<Frontier>> {
        let (n, m) = (self.a.len(), self.b.len());
        let reachable = self.reachable();
        let origin: Frontier = Rc::new(BTreeSet::from([ORIGIN]));
        let mut frontiers: Vec<Option<Frontier>> = vec![None; (n + 1) * (m + 1)];

        for i in 0..=n {
            for j in 0..=m {
                let index = self.index(i, j);
                if !reachable[index] {
                    continue;
                }
                let frontier = match self.step(i, j) {
                    Step::Origin => Rc::clone(&origin),
                    Step::Diagonal => Rc::new(BTreeSet::from([(i, j)])),
                    Step::Up => self.frontier(&frontiers, i - 1, j),
                    Step::Left => self.frontier(&frontiers, i, j - 1),
                    Step::Both => {
                        let up = self.frontier(&frontiers, i - 1, j);
                        let left = self.frontier(&frontiers, i, j - 1);
                        if Rc::ptr_eq(&up, &left) {
                            up
                        } else {
                            Rc::new(up.union(&left).copied().collect())
                        }
                    }
                };
                frontiers[index] = Some(frontier);
            }
        }
        frontiers
    }

    /// Alignments ending at `(a.len(), b.len())`, plus whether the walk stopped
    /// at the ceiling with alignments left unvisited.
    fn run(&self) -> (BTreeSet<MatchedSequence>, bool) {
        let (n, m) = (self.a.len(), self.b.len());
        let frontiers = self.frontiers();

        let mut alignments = BTreeSet::new();
        let mut found = 0;
        // Matching cells picked so far, from the end backwards
        let mut path: Vec<Cell> = Vec::new();
        let mut stack: Vec<(Cell, usize)> = self
            .frontier(&frontiers, n, m)
            .iter()
            .rev()
            .map(|&cell| (cell, 0))
            .collect();

        while let Some((cell, depth)) = stack.pop() {
            path.truncate(depth);

            if cell == ORIGIN {
                alignments.insert(self.alignment(&path));
                found += 1;
                if found >= self.max_alignments {
                    return (alignments, !stack.is_empty());
                }
                continue;
            }

            let (i, j) = cell;
            path.push(cell);
            let next = self.frontier(&frontiers, i - 1, j - 1);
            stack.extend(next.iter().rev().map(|&cell| (cell, depth + 1)));
        }

        (alignments, false)
    }

    fn alignment(&self, path: &[Cell]) -> MatchedSequence {
        path.iter()
            .rev()
            .map(|&(i, j)| MatchedRun::from_runs(&self.a[i - 1], &self.b[j - 1]))
            .collect()
    }

    /// Frontier of an already computed cell.
    ///
    /// Predecessors of a reachable cell are reachable and come earlier in
    /// row-major order, so the lookup only misses on an inconsistent table.
    fn frontier(&self, frontiers: &[Option<Frontier>], i: usize, j: usize) -> Frontier {
        frontiers[self.index(i, j)]
            .clone()
            .unwrap_or_else(|| Rc::new(BTreeSet::new()))
    }
}
