//! Basic example of comparing the movement of two people.
//!
//! Run with: cargo run --example basic_similarity

use trace_similarity::{
    compute_similarity, extract_sequences, match_sequences, InMemoryHierarchy, ScoreAccumulation,
    SimilarityConfig, SimilarityError, StayPoint,
};

const HOUR: i64 = 3_600_000;

fn main() -> Result<(), SimilarityError> {
    // City (level 1) -> districts (level 2) -> venues (level 3)
    let mut hierarchy = InMemoryHierarchy::new();
    hierarchy.add_cluster("1_0", 1, None)?;
    hierarchy.add_cluster("2_0", 2, Some("1_0"))?; // Kreuzberg
    hierarchy.add_cluster("2_1", 2, Some("1_0"))?; // Mitte
    hierarchy.add_cluster("3_0", 3, Some("2_0"))?; // flat
    hierarchy.add_cluster("3_1", 3, Some("2_1"))?; // office
    hierarchy.add_cluster("3_2", 3, Some("2_1"))?; // museum

    // Two colleagues living in the same building
    for day in 0..5 {
        let base = day * 24 * HOUR;
        hierarchy.add_stay_point(
            "alice",
            "3_0",
            StayPoint::new(format!("alice-{}-home", day), 52.4990, 13.4180, base, base + 8 * HOUR),
        )?;
        hierarchy.add_stay_point(
            "alice",
            "3_1",
            StayPoint::new(format!("alice-{}-work", day), 52.5200, 13.3880, base + 9 * HOUR, base + 17 * HOUR),
        )?;
        hierarchy.add_stay_point(
            "bob",
            "3_0",
            StayPoint::new(format!("bob-{}-home", day), 52.4991, 13.4182, base, base + 7 * HOUR),
        )?;
        hierarchy.add_stay_point(
            "bob",
            "3_1",
            StayPoint::new(format!("bob-{}-work", day), 52.5201, 13.3881, base + 8 * HOUR, base + 16 * HOUR),
        )?;
    }

    // A tourist passing through once
    hierarchy.add_stay_point(
        "carol",
        "3_2",
        StayPoint::new("carol-museum", 52.5169, 13.4019, 30 * HOUR, 33 * HOUR),
    )?;

    let config = SimilarityConfig::default();

    println!("Trace Similarity Example\n");
    println!(
        "Config: split_threshold={}h, min_match_length={}, temporal_constraint={}\n",
        config.split_threshold_hours, config.min_match_length, config.temporal_constraint
    );

    // Pipeline stages one by one
    println!("1. Shared sequences (alice vs bob):");
    let sequences = extract_sequences(&hierarchy, "alice", "bob", config.from_level, config.to_level)?;
    for (level, pair) in &sequences {
        println!(
            "   Level {}: {} runs vs {} runs",
            level,
            pair.first.len(),
            pair.second.len()
        );
    }

    let matches = match_sequences(&sequences, &config)?;
    println!("\n2. Matched sequences:");
    for (level, matched) in &matches {
        let lengths: Vec<usize> = matched.iter().map(Vec::len).collect();
        println!("   Level {}: lengths {:?}", level, lengths);
    }

    // End to end
    println!("\n3. Scores:");
    for (a, b) in [("alice", "bob"), ("alice", "carol"), ("bob", "carol")] {
        let result = compute_similarity(&hierarchy, a, b, &config)?;
        println!(
            "   {} vs {}: {:.4} (raw {:.2}, {} shared levels)",
            a, b, result.score, result.raw_score, result.shared_levels
        );
    }

    // The other accumulation mode
    let per_sequence = SimilarityConfig {
        accumulation: ScoreAccumulation::PerSequence,
        ..Default::default()
    };
    let result = compute_similarity(&hierarchy, "alice", "bob", &per_sequence)?;
    println!("\n4. alice vs bob, per-sequence accumulation: {:.4}", result.score);

    Ok(())
}
