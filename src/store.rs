//! # Hierarchy Store
//!
//! Read-only queries the similarity pipeline needs from the store that holds
//! the shared cluster hierarchy and every subject's stay points.
//!
//! | Query | Used by |
//! |-------|---------|
//! | [`HierarchyStore::visited_cluster_ids`] | extraction, common clusters |
//! | [`HierarchyStore::visits_ordered_by_leaving_time`] | extraction, sequence building |
//! | [`HierarchyStore::total_subject_count`] | analysis, IDF |
//! | [`HierarchyStore::visitor_count`] | analysis, IDF |
//! | [`HierarchyStore::stay_point_count`] | analysis, normalization |
//!
//! Two implementations ship with the crate:
//!
//! - [`InMemoryHierarchy`] keeps clusters and stay points in memory
//! - [`CachedStore`] wraps another store and remembers count queries for the
//!   duration of a run

use log::debug;
use moka::sync::Cache;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use crate::error::{Result, SimilarityError};
use crate::{ClusterId, Level, StayPoint, Visit};

/// Bounds on the hierarchy levels taken into account.
///
/// Levels start at 1. A lower bound below 1 means "from level 1", a negative
/// upper bound means "no upper bound".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LevelWindow {
    pub from_level: i32,
    pub to_level: i32,
}

impl LevelWindow {
    pub fn new(from_level: i32, to_level: i32) -> Self {
        Self { from_level, to_level }
    }

    /// Window without bounds.
    pub fn all() -> Self {
        Self::new(-1, -1)
    }

    /// Check whether a level lies inside the window.
    pub fn contains(&self, level: Level) -> bool {
        let lower = self.from_level.max(1) as i64;
        let level = level as i64;
        level >= lower && (self.to_level < 0 || level <= self.to_level as i64)
    }
}

impl Default for LevelWindow {
    fn default() -> Self {
        Self::all()
    }
}

/// Queries against the cluster hierarchy.
pub trait HierarchyStore {
    /// All known subjects.
    fn subject_ids(&self) -> Result<Vec<String>>;

    /// Clusters visited by the given subjects inside the level window.
    ///
    /// Every subject contributes each of its visited clusters once, so a
    /// cluster visited by two of the subjects appears twice.
    fn visited_cluster_ids(&self, subject_ids: &[&str], window: LevelWindow) -> Result<Vec<ClusterId>>;

    /// A subject's visits to the given clusters, ascending by leaving time.
    fn visits_ordered_by_leaving_time(
        &self,
        subject_id: &str,
        cluster_ids: &[ClusterId],
    ) -> Result<Vec<Visit>>;

    /// Number of subjects in the population.
    fn total_subject_count(&self) -> Result<u64>;

    /// Number of distinct subjects that ever visited the cluster.
    fn visitor_count(&self, cluster_id: &ClusterId) -> Result<u64>;

    /// Number of stay points of a subject.
    fn stay_point_count(&self, subject_id: &str) -> Result<u64>;

    /// Level of a cluster.
    ///
    /// Stores that know the level of their clusters should override this; the
    /// default reads the depth prefix of the identifier.
    fn cluster_level(&self, cluster_id: &ClusterId) -> Option<Level> {
        cluster_id.depth()
    }
}

impl<S: HierarchyStore + ?Sized> HierarchyStore for &S {
    fn subject_ids(&self) -> Result<Vec<String>> {
        (**self).subject_ids()
    }

    fn visited_cluster_ids(&self, subject_ids: &[&str], window: LevelWindow) -> Result<Vec<ClusterId>> {
        (**self).visited_cluster_ids(subject_ids, window)
    }

    fn visits_ordered_by_leaving_time(
        &self,
        subject_id: &str,
        cluster_ids: &[ClusterId],
    ) -> Result<Vec<Visit>> {
        (**self).visits_ordered_by_leaving_time(subject_id, cluster_ids)
    }

    fn total_subject_count(&self) -> Result<u64> {
        (**self).total_subject_count()
    }

    fn visitor_count(&self, cluster_id: &ClusterId) -> Result<u64> {
        (**self).visitor_count(cluster_id)
    }

    fn stay_point_count(&self, subject_id: &str) -> Result<u64> {
        (**self).stay_point_count(subject_id)
    }

    fn cluster_level(&self, cluster_id: &ClusterId) -> Option<Level> {
        (**self).cluster_level(cluster_id)
    }
}

// ============================================================================
// In-Memory Hierarchy
// ============================================================================

#[derive(Debug, Clone)]
struct ClusterNode {
    level: Level,
    parent: Option<ClusterId>,
}

/// A cluster hierarchy held in memory.
///
/// Stay points are attached to one cluster each. A subject visits the cluster
/// of each of its stay points and every ancestor of that cluster.
#[derive(Debug, Clone, Default)]
pub struct InMemoryHierarchy {
    clusters: HashMap<ClusterId, ClusterNode>,
    subjects: BTreeMap<String, Vec<(ClusterId, StayPoint)>>,
}

impl InMemoryHierarchy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a cluster. The parent, if any, must already exist.
    pub fn add_cluster(&mut self, id: &str, level: Level, parent: Option<&str>) -> Result<()> {
        let cluster_id = ClusterId::new(id);
        if self.clusters.contains_key(&cluster_id) {
            return Err(SimilarityError::InvalidInput(format!(
                "cluster {} already exists",
                id
            )));
        }

        let parent = match parent {
            Some(parent_id) => {
                let parent_node = self.clusters.get(parent_id).ok_or_else(|| {
                    SimilarityError::InvalidInput(format!(
                        "parent cluster {} of {} does not exist",
                        parent_id, id
                    ))
                })?;
                if parent_node.level >= level {
                    return Err(SimilarityError::InvalidInput(format!(
                        "cluster {} on level {} cannot be a child of {} on level {}",
                        id, level, parent_id, parent_node.level
                    )));
                }
                Some(ClusterId::new(parent_id))
            }
            None => None,
        };

        self.clusters.insert(cluster_id, ClusterNode { level, parent });
        Ok(())
    }

    /// Register a subject. Subjects without stay points still count towards
    /// the population.
    pub fn add_subject(&mut self, subject_id: &str) {
        self.subjects.entry(subject_id.to_string()).or_default();
    }

    /// Attach a stay point of a subject to a cluster, registering the subject
    /// if needed.
    pub fn add_stay_point(&mut self, subject_id: &str, cluster_id: &str, stay_point: StayPoint) -> Result<()> {
        let cluster_id = ClusterId::new(cluster_id);
        if !self.clusters.contains_key(&cluster_id) {
            return Err(SimilarityError::InvalidInput(format!(
                "cluster {} does not exist",
                cluster_id
            )));
        }
        if !stay_point.is_valid() {
            return Err(SimilarityError::InvalidInput(format!(
                "stay point {} has invalid coordinates or leaves before it arrives",
                stay_point.id
            )));
        }

        self.subjects
            .entry(subject_id.to_string())
            .or_default()
            .push((cluster_id, stay_point));
        Ok(())
    }

    /// Number of clusters in the hierarchy.
    pub fn cluster_count(&self) -> usize {
        self.clusters.len()
    }

    fn stay_points(&self, subject_id: &str) -> Result<&[(ClusterId, StayPoint)]> {
        self.subjects
            .get(subject_id)
            .map(Vec::as_slice)
            .ok_or_else(|| SimilarityError::UnknownSubject(subject_id.to_string()))
    }

    /// The cluster itself followed by its ancestors up to the top level.
    fn lineage<'a>(&'a self, cluster_id: &'a ClusterId) -> impl Iterator<Item = &'a ClusterId> + 'a {
        std::iter::successors(Some(cluster_id), move |current| {
            self.clusters.get(*current).and_then(|node| node.parent.as_ref())
        })
    }

    fn visited_by(&self, subject_id: &str) -> Result<BTreeSet<&ClusterId>> {
        Ok(self
            .stay_points(subject_id)?
            .iter()
            .flat_map(move |(cluster_id, _)| self.lineage(cluster_id))
            .collect())
    }
}

impl HierarchyStore for InMemoryHierarchy {
    fn subject_ids(&self) -> Result<Vec<String>> {
        Ok(self.subjects.keys().cloned().collect())
    }

    fn visited_cluster_ids(&self, subject_ids: &[&str], window: LevelWindow) -> Result<Vec<ClusterId>> {
        let mut cluster_ids = Vec::new();
        for subject_id in subject_ids {
            for cluster_id in self.visited_by(subject_id)? {
                let in_window = self
                    .cluster_level(cluster_id)
                    .is_some_and(|level| window.contains(level));
                if in_window {
                    cluster_ids.push(cluster_id.clone());
                }
            }
        }
        Ok(cluster_ids)
    }

    fn visits_ordered_by_leaving_time(
        &self,
        subject_id: &str,
        cluster_ids: &[ClusterId],
    ) -> Result<Vec<Visit>> {
        let wanted: HashSet<&ClusterId> = cluster_ids.iter().collect();
        let wanted = &wanted;

        let mut visits: Vec<Visit> = self
            .stay_points(subject_id)?
            .iter()
            .flat_map(move |(cluster_id, stay_point)| {
                self.lineage(cluster_id)
                    .filter(move |id| wanted.contains(id))
                    .map(move |id| Visit::new(id.clone(), stay_point.arrival_time, stay_point.leaving_time))
            })
            .collect();

        // Stable: visits leaving at the same instant keep insertion order
        visits.sort_by_key(|v| v.leaving_time);
        Ok(visits)
    }

    fn total_subject_count(&self) -> Result<u64> {
        Ok(self.subjects.len() as u64)
    }

    fn visitor_count(&self, cluster_id: &ClusterId) -> Result<u64> {
        let count = self
            .subjects
            .values()
            .filter(|stay_points| {
                stay_points
                    .iter()
                    .any(|(attached, _)| self.lineage(attached).any(|id| id == cluster_id))
            })
            .count();
        Ok(count as u64)
    }

    fn stay_point_count(&self, subject_id: &str) -> Result<u64> {
        Ok(self.stay_points(subject_id)?.len() as u64)
    }

    fn cluster_level(&self, cluster_id: &ClusterId) -> Option<Level> {
        self.clusters
            .get(cluster_id)
            .map(|node| node.level)
            .or_else(|| cluster_id.depth())
    }
}

// ============================================================================
// Cached Store
// ============================================================================

/// Key of a memoized count query.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum CountKey {
    TotalSubjects,
    Visitors(ClusterId),
    StayPoints(String),
}

/// Memoizes the count queries of another store.
///
/// The wrapped store must not change while the cache is alive. Sequence
/// queries are passed through untouched. Concurrent lookups of the same
/// missing count wait for one query of the wrapped store; failed queries are
/// not cached.
pub struct CachedStore<S> {
    inner: S,
    counts: Cache<CountKey, u64>,
}

impl<S: HierarchyStore> CachedStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            counts: Cache::builder().build(),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Number of cached counts.
    pub fn cached_entries(&self) -> u64 {
        self.counts.run_pending_tasks();
        self.counts.entry_count()
    }

    fn cached(&self, key: CountKey, query: impl FnOnce() -> Result<u64>) -> Result<u64> {
        self.counts
            .try_get_with(key, query)
            .map_err(|e| e.as_ref().clone())
    }
}

impl<S: HierarchyStore> HierarchyStore for CachedStore<S> {
    fn subject_ids(&self) -> Result<Vec<String>> {
        self.inner.subject_ids()
    }

    fn visited_cluster_ids(&self, subject_ids: &[&str], window: LevelWindow) -> Result<Vec<ClusterId>> {
        self.inner.visited_cluster_ids(subject_ids, window)
    }

    fn visits_ordered_by_leaving_time(
        &self,
        subject_id: &str,
        cluster_ids: &[ClusterId],
    ) -> Result<Vec<Visit>> {
        self.inner.visits_ordered_by_leaving_time(subject_id, cluster_ids)
    }

    fn total_subject_count(&self) -> Result<u64> {
        self.cached(CountKey::TotalSubjects, || self.inner.total_subject_count())
    }

    fn visitor_count(&self, cluster_id: &ClusterId) -> Result<u64> {
        self.cached(CountKey::Visitors(cluster_id.clone()), || {
            let count = self.inner.visitor_count(cluster_id)?;
            debug!("[CachedStore] Visitors of {}: {}", cluster_id, count);
            Ok(count)
        })
    }

    fn stay_point_count(&self, subject_id: &str) -> Result<u64> {
        self.cached(CountKey::StayPoints(subject_id.to_string()), || {
            self.inner.stay_point_count(subject_id)
        })
    }

    fn cluster_level(&self, cluster_id: &ClusterId) -> Option<Level> {
        self.inner.cluster_level(cluster_id)
    }
}
