//! # Sequence Extraction
//!
//! Builds, for every hierarchy level on which two subjects share at least one
//! cluster, one chronologically ordered [`Sequence`] per subject.
//!
//! Only clusters visited by *both* subjects take part. Visits to any other
//! cluster are left out before folding, so two visits of the same shared
//! cluster separated by a private detour end up in one run.

use log::{debug, warn};
use std::collections::{BTreeMap, BTreeSet};

use crate::error::{require_subject, Result};
use crate::store::{HierarchyStore, LevelWindow};
use crate::{ClusterId, Level, LevelSequences, Sequence, SequencePair};

/// Extract the per-level sequence pairs of two subjects.
///
/// `from_level` below 1 means no lower bound, `to_level` below 0 means no
/// upper bound. Levels without shared clusters are absent from the result.
///
/// # Example
/// ```
/// use trace_similarity::{extract_sequences, InMemoryHierarchy, StayPoint};
///
/// let mut hierarchy = InMemoryHierarchy::new();
/// hierarchy.add_cluster("1_0", 1, None)?;
/// hierarchy.add_stay_point("a", "1_0", StayPoint::new("a1", 0.0, 0.0, 1, 8))?;
/// hierarchy.add_stay_point("b", "1_0", StayPoint::new("b1", 0.0, 0.0, 1, 12))?;
///
/// let sequences = extract_sequences(&hierarchy, "a", "b", -1, -1)?;
/// assert_eq!(sequences.len(), 1);
/// assert_eq!(sequences[&1].first.len(), 1);
/// # Ok::<(), trace_similarity::SimilarityError>(())
/// ```
pub fn extract_sequences<S: HierarchyStore + ?Sized>(
    store: &S,
    subject_a: &str,
    subject_b: &str,
    from_level: i32,
    to_level: i32,
) -> Result<LevelSequences> {
    require_subject(subject_a, "first")?;
    require_subject(subject_b, "second")?;

    let window = LevelWindow::new(from_level, to_level);
    let common = common_cluster_ids(store, subject_a, subject_b, window)?;
    if common.is_empty() {
        warn!(
            "[Extraction] [{}] and [{}] share no cluster between levels {} and {}",
            subject_a, subject_b, from_level, to_level
        );
        return Ok(LevelSequences::new());
    }

    let mut sequences = LevelSequences::new();
    for (level, cluster_ids) in group_by_level(store, common) {
        let first = subject_sequence(store, subject_a, &cluster_ids)?;
        let second = subject_sequence(store, subject_b, &cluster_ids)?;
        debug!(
            "[Extraction] Level {}: {} shared clusters, sequence lengths {} and {}",
            level,
            cluster_ids.len(),
            first.len(),
            second.len()
        );
        sequences.insert(level, SequencePair::new(first, second));
    }

    Ok(sequences)
}

/// Group cluster identifiers by hierarchy level.
///
/// Clusters whose level the store cannot tell are skipped with a warning.
pub fn group_by_level<S, I>(store: &S, cluster_ids: I) -> BTreeMap<Level, Vec<ClusterId>>
where
    S: HierarchyStore + ?Sized,
    I: IntoIterator<Item = ClusterId>,
{
    let mut levels: BTreeMap<Level, Vec<ClusterId>> = BTreeMap::new();
    for cluster_id in cluster_ids {
        match store.cluster_level(&cluster_id) {
            Some(level) => levels.entry(level).or_default().push(cluster_id),
            None => warn!("[Extraction] Skipping cluster {} with unknown level", cluster_id),
        }
    }
    levels
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Clusters inside the window visited by both subjects, in id order.
fn common_cluster_ids<S: HierarchyStore + ?Sized>(
    store: &S,
    subject_a: &str,
    subject_b: &str,
    window: LevelWindow,
) -> Result<BTreeSet<ClusterId>> {
    let visited_a: BTreeSet<ClusterId> = store.visited_cluster_ids(&[subject_a], window)?.into_iter().collect();
    let visited_b: BTreeSet<ClusterId> = store.visited_cluster_ids(&[subject_b], window)?.into_iter().collect();

    debug!(
        "[Extraction] [{}] visited {} clusters, [{}] visited {}",
        subject_a,
        visited_a.len(),
        subject_b,
        visited_b.len()
    );

    Ok(visited_a.intersection(&visited_b).cloned().collect())
}

fn subject_sequence<S: HierarchyStore + ?Sized>(
    store: &S,
    subject_id: &str,
    cluster_ids: &[ClusterId],
) -> Result<Sequence> {
    let visits = store.visits_ordered_by_leaving_time(subject_id, cluster_ids)?;
    Ok(Sequence::from_visits(visits))
}
