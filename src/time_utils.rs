//! # Time Utilities
//!
//! Timing helpers shared by sequence splitting and temporal filtering.
//!
//! All instants are epoch milliseconds (`i64`).
//!
//! | Function | Description |
//! |----------|-------------|
//! | [`difference_in_hours`] | Whole hours between two instants, truncated toward zero |
//! | [`intervals_overlap`] | Closed-interval overlap test |
//! | [`transition_within_constraint`] | Relative transition-gap comparison for two subjects |
//!
//! ## Example
//!
//! ```rust
//! use trace_similarity::time_utils::{self, MILLIS_PER_HOUR};
//!
//! let leaving = 0;
//! let arrival = 50 * MILLIS_PER_HOUR + 59 * 60 * 1000;
//! assert_eq!(time_utils::difference_in_hours(leaving, arrival), 50);
//!
//! // Gaps of 2h and 3h differ by 1/3 of the larger gap
//! assert!(time_utils::transition_within_constraint(2, 3, 0.34));
//! assert!(!time_utils::transition_within_constraint(2, 3, 0.3));
//! ```

/// Milliseconds in one minute.
pub const MILLIS_PER_MINUTE: i64 = 60 * 1000;

/// Milliseconds in one hour.
pub const MILLIS_PER_HOUR: i64 = 60 * MILLIS_PER_MINUTE;

/// Whole hours from `from` to `to`, truncated toward zero.
///
/// Negative when `to` precedes `from`. Saturates at the `i64` range.
#[inline]
pub fn difference_in_hours(from: i64, to: i64) -> i64 {
    to.saturating_sub(from) / MILLIS_PER_HOUR
}

/// Check whether `[start1, end1]` and `[start2, end2]` overlap.
///
/// Touching endpoints count as overlap.
#[inline]
pub fn intervals_overlap(start1: i64, end1: i64, start2: i64, end2: i64) -> bool {
    start1 <= end2 && end1 >= start2
}

/// Compare two subjects' transition gaps between the same pair of clusters.
///
/// Accepted when `|gap_a - gap_b| / max(gap_a, gap_b) <= threshold`.
///
/// Equal gaps are always accepted, including two zero gaps. When both gaps
/// are negative (overlapping stays) the ratio is negative and the transition
/// is accepted. Differing gaps whose maximum is zero give an infinite ratio
/// and are rejected.
pub fn transition_within_constraint(gap_a: i64, gap_b: i64, threshold: f64) -> bool {
    let difference = gap_a.abs_diff(gap_b);
    if difference == 0 {
        return true;
    }

    let max_gap = gap_a.max(gap_b);
    if max_gap == 0 {
        return false;
    }

    (difference as f64 / max_gap as f64) <= threshold
}
