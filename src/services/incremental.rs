use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;
use tracing::debug;

use crate::db::series_queries;
use crate::errors::AppError;
use crate::models::AssetType;

/// Boundary offset around stored extrema. One microsecond, not one day:
/// a coarser step silently drops sub-day observations at the window edges.
const EPSILON_MICROS: i64 = 1;

/// Time windows within `[requested_start, requested_end]` that are not yet
/// covered by stored data, given the stored `(min, max)` extent.
///
/// Stored data is assumed contiguous between its extrema, so at most two
/// gaps come back: one before the stored minimum, one after the stored
/// maximum. An empty result means the request is fully covered.
pub fn missing_ranges(
    existing: Option<(DateTime<Utc>, DateTime<Utc>)>,
    requested_start: DateTime<Utc>,
    requested_end: DateTime<Utc>,
) -> Vec<(DateTime<Utc>, DateTime<Utc>)> {
    let Some((existing_min, existing_max)) = existing else {
        return vec![(requested_start, requested_end)];
    };

    let epsilon = Duration::microseconds(EPSILON_MICROS);
    let mut gaps = Vec::new();

    if requested_start < existing_min {
        gaps.push((requested_start, existing_min - epsilon));
    }

    if requested_end > existing_max {
        gaps.push((existing_max + epsilon, requested_end));
    }

    gaps
}

/// Store-backed variant: reads the asset's stored extent and computes gaps.
/// Timestamps are TIMESTAMPTZ throughout, so both sides of the comparison
/// are already in UTC.
pub async fn calculate_missing_ranges(
    pool: &PgPool,
    asset_id: i32,
    asset_type: AssetType,
    requested_start: DateTime<Utc>,
    requested_end: DateTime<Utc>,
) -> Result<Vec<(DateTime<Utc>, DateTime<Utc>)>, AppError> {
    let existing = series_queries::fetch_existing_range(pool, asset_id, asset_type).await?;

    let gaps = missing_ranges(existing, requested_start, requested_end);
    debug!(
        "Asset {} ({}): {} missing range(s) for [{}, {}]",
        asset_id,
        asset_type,
        gaps.len(),
        requested_start,
        requested_end
    );

    Ok(gaps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDateTime;

    fn ts(s: &str) -> DateTime<Utc> {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
            .unwrap()
            .and_utc()
    }

    #[test]
    fn test_no_existing_data_returns_full_range() {
        let start = ts("2024-01-01 00:00:00");
        let end = ts("2024-01-10 00:00:00");
        assert_eq!(missing_ranges(None, start, end), vec![(start, end)]);
    }

    #[test]
    fn test_single_stored_point_splits_into_two_gaps() {
        let start = ts("2024-01-01 00:00:00");
        let end = ts("2024-01-10 00:00:00");
        let point = ts("2024-01-05 10:30:00");

        let gaps = missing_ranges(Some((point, point)), start, end);
        assert_eq!(gaps.len(), 2);
        assert_eq!(gaps[0], (start, point - Duration::microseconds(1)));
        assert_eq!(gaps[1], (point + Duration::microseconds(1), end));
    }

    #[test]
    fn test_gap_only_before_existing_data() {
        let start = ts("2024-01-01 00:00:00");
        let end = ts("2024-01-05 00:00:00");
        let existing = (ts("2024-01-03 00:00:00"), ts("2024-01-06 00:00:00"));

        let gaps = missing_ranges(Some(existing), start, end);
        assert_eq!(
            gaps,
            vec![(start, existing.0 - Duration::microseconds(1))]
        );
    }

    #[test]
    fn test_gap_only_after_existing_data() {
        let start = ts("2024-01-03 00:00:00");
        let end = ts("2024-01-10 00:00:00");
        let existing = (ts("2024-01-01 00:00:00"), ts("2024-01-05 00:00:00"));

        let gaps = missing_ranges(Some(existing), start, end);
        assert_eq!(gaps, vec![(existing.1 + Duration::microseconds(1), end)]);
    }

    #[test]
    fn test_fully_covered_request_returns_no_gaps() {
        let start = ts("2024-01-02 00:00:00");
        let end = ts("2024-01-04 00:00:00");
        let existing = (ts("2024-01-01 00:00:00"), ts("2024-01-05 00:00:00"));

        assert!(missing_ranges(Some(existing), start, end).is_empty());
    }

    #[test]
    fn test_epsilon_is_sub_second() {
        let start = ts("2024-01-01 00:00:00");
        let end = ts("2024-01-10 00:00:00");
        let existing = (ts("2024-01-05 10:30:00"), ts("2024-01-05 10:30:00"));

        let gaps = missing_ranges(Some(existing), start, end);
        // Boundary offsets stay within one second of the stored extremum
        assert!(existing.0 - gaps[0].1 <= Duration::seconds(1));
        assert!(gaps[1].0 - existing.1 <= Duration::seconds(1));
    }

    #[test]
    fn test_gaps_are_disjoint_from_stored_extent() {
        let start = ts("2024-01-01 00:00:00");
        let end = ts("2024-01-10 00:00:00");
        let existing = (ts("2024-01-04 00:00:00"), ts("2024-01-06 00:00:00"));

        for (gap_start, gap_end) in missing_ranges(Some(existing), start, end) {
            assert!(gap_end < existing.0 || gap_start > existing.1);
            assert!(gap_start >= start && gap_end <= end);
        }
    }
}
