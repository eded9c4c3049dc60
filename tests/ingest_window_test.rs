/// Ingest window and load-accounting tests
///
/// Standalone models of the incremental-window arithmetic and the loader's
/// affected/attempted accounting:
/// - Gap computation around a stored extent (microsecond boundaries)
/// - Idempotent re-load accounting under conflict-skip semantics
/// - Error-classification precedence used by the retry path
///
/// NOTE: These tests validate the arithmetic and decision rules. Exercising
/// them against Postgres requires a live database.

// ---------------------------------------------------------------------------
// Incremental windows
// ---------------------------------------------------------------------------

const MICRO: i64 = 1;

/// Timestamps in microseconds. Stored data is contiguous between its
/// extrema, so at most two gaps exist for any request.
fn missing_windows(existing: Option<(i64, i64)>, start: i64, end: i64) -> Vec<(i64, i64)> {
    let Some((min, max)) = existing else {
        return vec![(start, end)];
    };

    let mut gaps = Vec::new();
    if start < min {
        gaps.push((start, min - MICRO));
    }
    if end > max {
        gaps.push((max + MICRO, end));
    }
    gaps
}

const DAY: i64 = 86_400_000_000;

#[test]
fn test_empty_store_returns_whole_request() {
    assert_eq!(missing_windows(None, 0, 10 * DAY), vec![(0, 10 * DAY)]);
}

#[test]
fn test_point_coverage_splits_into_two_gaps() {
    let point = 5 * DAY;
    let gaps = missing_windows(Some((point, point)), 0, 10 * DAY);
    assert_eq!(gaps, vec![(0, point - 1), (point + 1, 10 * DAY)]);
}

#[test]
fn test_boundaries_are_one_microsecond_from_extrema() {
    let gaps = missing_windows(Some((3 * DAY, 7 * DAY)), 0, 10 * DAY);
    assert_eq!(3 * DAY - gaps[0].1, 1);
    assert_eq!(gaps[1].0 - 7 * DAY, 1);
}

#[test]
fn test_covered_request_has_no_gaps() {
    assert!(missing_windows(Some((0, 10 * DAY)), 2 * DAY, 8 * DAY).is_empty());
}

/// For stored points {t1 < … < tn} and a request [s, e] fully covering
/// them, the gaps are (s, t1−ε) and (tn+ε, e).
#[test]
fn test_gap_property_over_point_sets() {
    let points = [2 * DAY, 3 * DAY, 5 * DAY + 1234, 9 * DAY];
    let (t1, tn) = (points[0], points[points.len() - 1]);
    let (s, e) = (0, 10 * DAY);

    let gaps = missing_windows(Some((t1, tn)), s, e);
    assert_eq!(gaps, vec![(s, t1 - 1), (tn + 1, e)]);

    // Union of gaps is disjoint from every stored point and within [s, e]
    for (gs, ge) in gaps {
        assert!(gs >= s && ge <= e);
        for p in points {
            assert!(p < gs || p > ge);
        }
    }
}

#[test]
fn test_partially_overlapping_request_yields_subset_gaps() {
    // Request starts inside the stored extent: only the trailing gap remains
    let gaps = missing_windows(Some((0, 5 * DAY)), 3 * DAY, 10 * DAY);
    assert_eq!(gaps, vec![(5 * DAY + 1, 10 * DAY)]);
}

// ---------------------------------------------------------------------------
// Loader accounting
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct SeriesStore {
    keys: std::collections::BTreeSet<(i32, i64)>,
}

#[derive(Debug, PartialEq)]
struct LoadOutcome {
    attempted: i64,
    affected: i64,
    skipped: i64,
}

impl SeriesStore {
    /// `ON CONFLICT (asset_id, time) DO NOTHING` semantics.
    fn load_skip_conflicts(&mut self, rows: &[(i32, i64)]) -> LoadOutcome {
        let mut affected = 0;
        let mut skipped = 0;
        for row in rows {
            if self.keys.insert(*row) {
                affected += 1;
            } else {
                skipped += 1;
            }
        }
        LoadOutcome {
            attempted: rows.len() as i64,
            affected,
            skipped,
        }
    }
}

#[test]
fn test_first_load_affects_all_rows() {
    let mut store = SeriesStore::default();
    let rows = [(1, 0), (1, DAY), (1, 2 * DAY)];

    let outcome = store.load_skip_conflicts(&rows);
    assert_eq!(
        outcome,
        LoadOutcome {
            attempted: 3,
            affected: 3,
            skipped: 0
        }
    );
}

#[test]
fn test_reload_is_idempotent() {
    let mut store = SeriesStore::default();
    let rows = [(1, 0), (1, DAY), (1, 2 * DAY)];

    store.load_skip_conflicts(&rows);
    let second = store.load_skip_conflicts(&rows);

    assert_eq!(second.affected, 0);
    assert_eq!(second.skipped, 3);
}

#[test]
fn test_affected_never_exceeds_attempted() {
    let mut store = SeriesStore::default();
    store.load_skip_conflicts(&[(1, 0), (1, DAY)]);

    let mixed = [(1, 0), (1, DAY), (1, 2 * DAY), (2, 0)];
    let outcome = store.load_skip_conflicts(&mixed);

    assert!(outcome.affected <= outcome.attempted);
    assert_eq!(outcome.affected, 2);
    assert_eq!(outcome.skipped, 2);
}

// ---------------------------------------------------------------------------
// Classification precedence
// ---------------------------------------------------------------------------

#[derive(Debug, PartialEq)]
enum Category {
    Transient,
    Permanent,
    System,
}

fn classify(message: &str) -> Category {
    let text = message.to_lowercase();
    let transient = ["rate limit", "429", "timeout", "connection", "503"];
    let permanent = ["invalid", "404", "not found", "symbol", "unauthorized"];
    let system = ["database", "disk", "memory", "500"];

    if transient.iter().any(|i| text.contains(i)) {
        Category::Transient
    } else if permanent.iter().any(|i| text.contains(i)) {
        Category::Permanent
    } else if system.iter().any(|i| text.contains(i)) {
        Category::System
    } else {
        Category::Transient
    }
}

#[test]
fn test_transient_indicators_beat_permanent_ones() {
    assert_eq!(
        classify("rate limit hit while resolving invalid symbol"),
        Category::Transient
    );
}

#[test]
fn test_unknown_errors_default_to_retryable() {
    assert_eq!(classify("inexplicable glitch"), Category::Transient);
}

#[test]
fn test_each_category_is_reachable() {
    assert_eq!(classify("HTTP 429"), Category::Transient);
    assert_eq!(classify("invalid symbol"), Category::Permanent);
    assert_eq!(classify("database unavailable"), Category::System);
}
