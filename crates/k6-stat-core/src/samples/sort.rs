use std::cmp::Ordering;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::{SampleDurations, SampleDurationsDiff};
use crate::error::StatError;

// ---------------------------------------------------------------------------
// SortBy: ranking metric
// ---------------------------------------------------------------------------

/// Metric used to rank endpoint records, worst first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortBy {
    Max,
    #[default]
    P99,
    P95,
    P90,
    P50,
    Errors,
    Count,
}

const SORT_BY_NAMES: [&str; 7] = ["max", "p99", "p95", "p90", "p50", "errors", "count"];
const SORT_BY_NAMES_STRING: &str = "[max,p99,p95,p90,p50,errors,count]";

impl SortBy {
    pub const ALL: [SortBy; 7] = [
        SortBy::Max,
        SortBy::P99,
        SortBy::P95,
        SortBy::P90,
        SortBy::P50,
        SortBy::Errors,
        SortBy::Count,
    ];

    /// Accepted names, in declaration order.
    pub fn values() -> &'static [&'static str] {
        &SORT_BY_NAMES
    }

    /// Accepted names formatted for help texts.
    pub fn values_string() -> &'static str {
        SORT_BY_NAMES_STRING
    }

    pub fn as_str(self) -> &'static str {
        SORT_BY_NAMES[self as usize]
    }

    /// Tie-break cascade over absolute values.
    fn cascade(self) -> &'static [Field] {
        match self {
            SortBy::Max => &[Field::Max, Field::Errors, Field::P99],
            SortBy::P99 => &[Field::P99, Field::Errors, Field::Max],
            SortBy::P95 => &[Field::P95, Field::Errors, Field::Max],
            SortBy::P90 => &[Field::P90, Field::Errors, Field::Max],
            SortBy::P50 => &[Field::P50, Field::Errors, Field::P99],
            SortBy::Errors => &[Field::Errors, Field::Max, Field::P99],
            SortBy::Count => &[Field::Count, Field::Max],
        }
    }

    /// Tie-break cascade over `*_diff` values.
    fn diff_cascade(self) -> &'static [Field] {
        match self {
            SortBy::Max => &[Field::Max, Field::Errors, Field::P99],
            SortBy::P99 => &[Field::P99, Field::Max, Field::Errors],
            SortBy::P95 => &[Field::P95, Field::Max, Field::Errors],
            SortBy::P90 => &[Field::P90, Field::Max, Field::Errors],
            SortBy::P50 => &[Field::P50, Field::Max, Field::Errors],
            SortBy::Errors => &[Field::Errors, Field::Max, Field::P99],
            SortBy::Count => &[Field::Count, Field::Max, Field::Errors],
        }
    }
}

impl std::fmt::Display for SortBy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SortBy {
    type Err = StatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SortBy::ALL
            .into_iter()
            .find(|v| v.as_str() == s)
            .ok_or_else(|| StatError::InvalidSortBy(s.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Sort keys
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
enum Field {
    P50,
    P90,
    P95,
    P99,
    Max,
    Errors,
    Count,
}

impl Field {
    fn value(self, d: &SampleDurations) -> f64 {
        match self {
            Field::P50 => d.p50,
            Field::P90 => d.p90,
            Field::P95 => d.p95,
            Field::P99 => d.p99,
            Field::Max => d.max,
            Field::Errors => d.errors_pcnt,
            Field::Count => d.count,
        }
    }

    fn diff_value(self, d: &SampleDurationsDiff) -> f64 {
        match self {
            Field::P50 => d.p50_diff,
            Field::P90 => d.p90_diff,
            Field::P95 => d.p95_diff,
            Field::P99 => d.p99_diff,
            Field::Max => d.max_diff,
            Field::Errors => d.errors_pcnt_diff,
            Field::Count => d.count_diff,
        }
    }
}

/// Descending total order on floats; `-0.0` and `0.0` compare equal.
fn descending(a: f64, b: f64) -> Ordering {
    fn fold_zero(v: f64) -> f64 {
        if v == 0.0 {
            0.0
        } else {
            v
        }
    }
    fold_zero(b).total_cmp(&fold_zero(a))
}

fn compare_by<T>(keys: &[Field], value: impl Fn(Field, &T) -> f64, a: &T, b: &T) -> Ordering {
    keys.iter()
        .map(|&key| descending(value(key, a), value(key, b)))
        .find(|o| o.is_ne())
        .unwrap_or(Ordering::Equal)
}

// ---------------------------------------------------------------------------
// Public sort functions
// ---------------------------------------------------------------------------

/// Rank records in place, worst first by `sort_by`.
///
/// The sort is stable: records equal across the whole cascade keep their
/// relative order.
pub fn sort_samples_durations(durations: &mut [SampleDurations], sort_by: SortBy) {
    let keys = sort_by.cascade();
    durations.sort_by(|a, b| compare_by(keys, Field::value, a, b));
}

/// Rank diff records in place by their absolute (current run) values.
pub fn sort_samples_durations_diff(durations: &mut [SampleDurationsDiff], sort_by: SortBy) {
    let keys = sort_by.cascade();
    durations.sort_by(|a, b| compare_by(keys, Field::value, &a.current, &b.current));
}

/// Rank diff records in place by their deltas from the reference run.
///
/// Records whose deltas are all equal (typically those without a
/// reference) fall back to absolute max, then errors, whatever `sort_by` is.
pub fn sort_samples_durations_by_diff(durations: &mut [SampleDurationsDiff], sort_by: SortBy) {
    const NO_DIFF_KEYS: &[Field] = &[Field::Max, Field::Errors];
    let diff_keys = sort_by.diff_cascade();
    durations.sort_by(|a, b| {
        compare_by(diff_keys, Field::diff_value, a, b)
            .then_with(|| compare_by(NO_DIFF_KEYS, Field::value, &a.current, &b.current))
    });
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
