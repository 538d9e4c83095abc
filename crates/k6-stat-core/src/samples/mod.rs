use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod diff;
pub mod io;
pub mod merge;
pub mod sort;

pub use diff::diff_samples;
pub use merge::{http_errors_pcnt, merge_samples, merge_samples_with, EXPECTED_STATUSES};
pub use sort::{
    sort_samples_durations, sort_samples_durations_by_diff, sort_samples_durations_diff, SortBy,
};

// ---------------------------------------------------------------------------
// Test: one load-test run descriptor
// ---------------------------------------------------------------------------

/// A recorded test run.
///
/// `(id, ts)` identifies the run; the id alone may be reused.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Test {
    pub id: u64,
    pub ts: DateTime<Utc>,
    pub name: String,
    pub params: String,
}

// ---------------------------------------------------------------------------
// Raw aggregate rows (as returned by the storage layer)
// ---------------------------------------------------------------------------

/// Composite identity of one endpoint's aggregates within a test run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SampleKey {
    pub id: u64,
    pub start: DateTime<Utc>,
    pub label: String,
    pub url: String,
}

impl std::fmt::Display for SampleKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{{id: {}, start: {}, label: {:?}, url: {:?}}}",
            self.id,
            self.start.to_rfc3339(),
            self.label,
            self.url
        )
    }
}

/// Latency quantiles for one endpoint, one row per endpoint per run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SampleQuantiles {
    pub id: u64,
    pub start: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub label: String,
    pub url: String,
    pub p50: f64,
    pub p90: f64,
    pub p95: f64,
    pub p99: f64,
    pub max: f64,
}

impl SampleQuantiles {
    pub fn key(&self) -> SampleKey {
        SampleKey {
            id: self.id,
            start: self.start,
            label: self.label.clone(),
            url: self.url.clone(),
        }
    }
}

/// Sample count for one endpoint and one response status.
///
/// The count is a float because the upstream aggregation may weight samples.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SampleStatus {
    pub id: u64,
    pub start: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub label: String,
    pub url: String,
    pub status: String,
    pub count: f64,
}

impl SampleStatus {
    pub fn key(&self) -> SampleKey {
        SampleKey {
            id: self.id,
            start: self.start,
            label: self.label.clone(),
            url: self.url.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Merged records
// ---------------------------------------------------------------------------

/// Latency and status statistics for one endpoint.
///
/// `count` is always the sum of `status` values and `errors` is zero when
/// `count` is zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SampleDurations {
    pub url: String,

    pub p50: f64,
    pub p90: f64,
    pub p95: f64,
    pub p99: f64,
    pub max: f64,

    #[serde(default)]
    pub status: BTreeMap<String, f64>,
    #[serde(default)]
    pub count: f64,
    /// Percentage of samples with an unexpected status.
    #[serde(rename = "errors", default)]
    pub errors_pcnt: f64,
}

/// An endpoint record compared against the matching record of a reference run.
///
/// Every `*_diff` field is `current - reference`. They are all zero when no
/// comparable reference record exists, which is not the same as "no change".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SampleDurationsDiff {
    #[serde(flatten)]
    pub current: SampleDurations,

    #[serde(rename = "p50-diff", default)]
    pub p50_diff: f64,
    #[serde(rename = "p90-diff", default)]
    pub p90_diff: f64,
    #[serde(rename = "p95-diff", default)]
    pub p95_diff: f64,
    #[serde(rename = "p99-diff", default)]
    pub p99_diff: f64,
    #[serde(rename = "max-diff", default)]
    pub max_diff: f64,

    #[serde(rename = "status-diff", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub status_diff: BTreeMap<String, f64>,
    #[serde(rename = "count-diff", default)]
    pub count_diff: f64,
    #[serde(rename = "errors-diff", default)]
    pub errors_pcnt_diff: f64,
}

impl From<SampleDurations> for SampleDurationsDiff {
    fn from(current: SampleDurations) -> Self {
        Self {
            current,
            ..Default::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Datasets
// ---------------------------------------------------------------------------

/// All merged endpoint records of one test run, grouped by label.
///
/// Order inside each label is not meaningful until one of the sort functions
/// has been applied.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TestSamples {
    pub test: Test,
    pub samples: HashMap<String, Vec<SampleDurations>>,
}

impl TestSamples {
    /// Labels in lexicographic order.
    pub fn labels(&self) -> Vec<&str> {
        let mut labels: Vec<&str> = self.samples.keys().map(String::as_str).collect();
        labels.sort_unstable();
        labels
    }

    /// Rank every label's records in place.
    pub fn sort(&mut self, sort_by: SortBy) {
        for durations in self.samples.values_mut() {
            sort_samples_durations(durations, sort_by);
        }
    }

    /// Number of endpoint records across all labels.
    pub fn len(&self) -> usize {
        self.samples.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A test run compared against a reference run, grouped by label.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TestSamplesDiff {
    pub test: Test,
    #[serde(rename = "ref")]
    pub reference: Test,
    pub samples: HashMap<String, Vec<SampleDurationsDiff>>,
}

impl TestSamplesDiff {
    /// Labels in lexicographic order.
    pub fn labels(&self) -> Vec<&str> {
        let mut labels: Vec<&str> = self.samples.keys().map(String::as_str).collect();
        labels.sort_unstable();
        labels
    }

    /// Rank every label's records in place, by absolute value or by delta.
    pub fn sort(&mut self, sort_by: SortBy, by_diff: bool) {
        for durations in self.samples.values_mut() {
            if by_diff {
                sort_samples_durations_by_diff(durations, sort_by);
            } else {
                sort_samples_durations_diff(durations, sort_by);
            }
        }
    }
}
