//! Example of scoring every pair of a synthetic population.
//!
//! Run with: cargo run --example batch_similarity --features parallel

use std::time::Instant;
use trace_similarity::{
    similarity_matrix, similarity_matrix_parallel, HierarchyStore, InMemoryHierarchy,
    SimilarityConfig, SimilarityError, StayPoint,
};

const HOUR: i64 = 3_600_000;
const DISTRICTS: usize = 4;
const VENUES_PER_DISTRICT: usize = 5;

fn main() -> Result<(), SimilarityError> {
    env_logger::init();

    println!("Batch Similarity Example\n");

    let hierarchy = build_population(40, 14)?;
    let subjects = hierarchy.subject_ids()?;
    let config = SimilarityConfig::default();

    println!(
        "Created {} subjects over {} clusters\n",
        subjects.len(),
        hierarchy.cluster_count()
    );

    let start = Instant::now();
    let sequential = similarity_matrix(&hierarchy, &subjects, &config)?;
    println!("Sequential: {} pairs in {:?}", sequential.scores.len(), start.elapsed());

    let start = Instant::now();
    let parallel = similarity_matrix_parallel(&hierarchy, &subjects, &config)?;
    println!("Parallel:   {} pairs in {:?}\n", parallel.scores.len(), start.elapsed());

    let mut ranked = parallel.scores.clone();
    ranked.sort_by(|a, b| b.score.total_cmp(&a.score));

    println!("Most similar pairs:");
    for pair in ranked.iter().take(5) {
        println!("  {} / {}: {:.4}", pair.subject_a, pair.subject_b, pair.score);
    }

    let zero = ranked.iter().filter(|p| p.score == 0.0).count();
    println!("\nStats:");
    println!("  Pairs scored: {}", ranked.len());
    println!("  Pairs with no shared pattern: {}", zero);
    println!("  Failed pairs: {}", parallel.failures.len());

    Ok(())
}

/// Subjects commute between a home and a work venue chosen by their index,
/// so subjects with the same residue share routines.
fn build_population(subjects: usize, days: i64) -> Result<InMemoryHierarchy, SimilarityError> {
    let mut hierarchy = InMemoryHierarchy::new();
    hierarchy.add_cluster("1_0", 1, None)?;
    for district in 0..DISTRICTS {
        let district_id = format!("2_{}", district);
        hierarchy.add_cluster(&district_id, 2, Some("1_0"))?;
        for venue in 0..VENUES_PER_DISTRICT {
            let venue_id = format!("3_{}", district * VENUES_PER_DISTRICT + venue);
            hierarchy.add_cluster(&venue_id, 3, Some(district_id.as_str()))?;
        }
    }

    let venues = DISTRICTS * VENUES_PER_DISTRICT;
    for subject in 0..subjects {
        let name = format!("subject-{:02}", subject);
        let home = format!("3_{}", subject % venues);
        let work = format!("3_{}", (subject * 7 + 3) % venues);
        let shift = (subject % 3) as i64;

        for day in 0..days {
            let base = day * 24 * HOUR + shift * HOUR;
            hierarchy.add_stay_point(
                &name,
                &home,
                StayPoint::new(format!("{}-{}-h", name, day), 0.0, 0.0, base, base + 8 * HOUR),
            )?;
            hierarchy.add_stay_point(
                &name,
                &work,
                StayPoint::new(format!("{}-{}-w", name, day), 0.0, 0.0, base + 9 * HOUR, base + 17 * HOUR),
            )?;
        }
    }
    Ok(hierarchy)
}
