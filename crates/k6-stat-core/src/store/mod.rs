use std::future::Future;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StatError;
use crate::samples::{merge_samples, SampleQuantiles, SampleStatus, Test, TestSamples};

pub mod clickhouse;
pub mod query;

#[cfg(test)]
pub(crate) mod memory;

pub use clickhouse::{ClickhouseClient, ClickhouseClientBuilder};

// ---------------------------------------------------------------------------
// Filters
// ---------------------------------------------------------------------------

/// Selects test runs by time range and name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TestFilter {
    /// Lower bound (inclusive), epoch seconds. Zero means unbounded.
    #[serde(default)]
    pub from: i64,
    /// Upper bound (exclusive), epoch seconds. Zero means unbounded.
    #[serde(default)]
    pub until: i64,
    /// `LIKE` pattern for the test name.
    #[serde(default, alias = "name_prefix", skip_serializing_if = "String::is_empty")]
    pub name: String,
}

/// Selects exactly one test run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TestIdFilter {
    pub id: u64,
    /// Run start, epoch nanoseconds.
    pub time: i64,
}

impl TestIdFilter {
    pub fn new(id: u64, ts: DateTime<Utc>) -> Self {
        Self {
            id,
            time: epoch_nanos(ts),
        }
    }
}

/// Selects the endpoints of one test run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SampleFilter {
    pub id: u64,
    /// Run start, epoch nanoseconds.
    pub start: i64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub label: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url: String,
    /// `NOT LIKE` patterns for the url. Empty entries are ignored.
    #[serde(rename = "no-url", default, skip_serializing_if = "Vec::is_empty")]
    pub skip_url: Vec<String>,
}

impl SampleFilter {
    /// Filter for all endpoints of `test`.
    pub fn for_test(test: &Test) -> Self {
        Self {
            id: test.id,
            start: epoch_nanos(test.ts),
            ..Default::default()
        }
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn skip_url(mut self, patterns: Vec<String>) -> Self {
        self.skip_url = patterns;
        self
    }

    /// Non-empty `NOT LIKE` patterns.
    pub fn skip_patterns(&self) -> impl Iterator<Item = &str> {
        self.skip_url
            .iter()
            .map(String::as_str)
            .filter(|p| !p.is_empty())
    }
}

/// Epoch nanoseconds, saturating outside the representable range
/// (roughly years 1677 to 2262).
pub fn epoch_nanos(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_nanos_opt().unwrap_or(if ts.timestamp() < 0 {
        i64::MIN
    } else {
        i64::MAX
    })
}

// ---------------------------------------------------------------------------
// SampleSource
// ---------------------------------------------------------------------------

/// Read access to stored test runs and their aggregated samples.
pub trait SampleSource {
    fn get_tests(
        &self,
        filter: &TestFilter,
    ) -> impl Future<Output = Result<Vec<Test>, StatError>> + Send;

    /// Fails with "test not found" or "duplicate test id" unless exactly one
    /// run matches.
    fn get_test_by_id(
        &self,
        filter: &TestIdFilter,
    ) -> impl Future<Output = Result<Test, StatError>> + Send;

    fn get_http_samples_durations(
        &self,
        filter: &SampleFilter,
    ) -> impl Future<Output = Result<Vec<SampleQuantiles>, StatError>> + Send;

    fn get_http_samples_status(
        &self,
        filter: &SampleFilter,
    ) -> impl Future<Output = Result<Vec<SampleStatus>, StatError>> + Send;
}

/// Query durations and status counts of `test` and merge them.
///
/// The id and start of `filter` are replaced with those of `test`.
pub async fn load_test_samples<S>(
    source: &S,
    test: &Test,
    filter: &SampleFilter,
) -> Result<TestSamples, StatError>
where
    S: SampleSource + Sync,
{
    let mut filter = filter.clone();
    filter.id = test.id;
    filter.start = epoch_nanos(test.ts);

    let (quantiles, statuses) = tokio::try_join!(
        source.get_http_samples_durations(&filter),
        source.get_http_samples_status(&filter),
    )?;

    if quantiles.is_empty() {
        tracing::warn!(id = test.id, name = %test.name, "no duration samples");
    }
    if statuses.is_empty() {
        tracing::warn!(id = test.id, name = %test.name, "no status samples");
    }

    Ok(merge_samples(test.clone(), &quantiles, &statuses))
}

/// Reduce the result of a test-by-id lookup to its single row.
pub(crate) fn single_test(mut tests: Vec<Test>, sql: &str) -> Result<Test, StatError> {
    match tests.len() {
        0 => Err(StatError::query("test not found", sql, 404)),
        1 => Ok(tests.remove(0)),
        _ => Err(StatError::query("duplicate test id", sql, 500)),
    }
}

#[cfg(test)]
mod tests {
    use super::memory::MemorySource;
    use super::*;

    fn ts(secs: i64) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(secs, 0).expect("timestamp should be valid")
    }

    #[test]
    fn sample_filter_for_test_uses_run_identity() {
        let test = Test {
            id: 3,
            ts: ts(1_674_196_902),
            ..Default::default()
        };
        let filter = SampleFilter::for_test(&test).label("find").url("q=%");
        assert_eq!(filter.id, 3);
        assert_eq!(filter.start, 1_674_196_902_000_000_000);
        assert_eq!(filter.label, "find");
        assert_eq!(filter.url, "q=%");
    }

    #[test]
    fn skip_patterns_ignore_empty_entries() {
        let filter = SampleFilter::default().skip_url(vec![
            "".to_string(),
            "%health%".to_string(),
            "".to_string(),
        ]);
        let patterns: Vec<&str> = filter.skip_patterns().collect();
        assert_eq!(patterns, vec!["%health%"]);
    }

    #[test]
    fn sample_filter_wire_names() {
        let filter = SampleFilter {
            id: 1,
            start: 2,
            skip_url: vec!["/x".to_string()],
            ..Default::default()
        };
        let json = serde_json::to_value(&filter).expect("serialize should succeed");
        assert_eq!(json["no-url"][0], "/x");
        assert!(json.get("label").is_none());
    }

    #[test]
    fn test_filter_accepts_name_prefix_alias() {
        let filter: TestFilter = serde_json::from_str(r#"{"from": 10, "name_prefix": "carbon%"}"#)
            .expect("deserialize should succeed");
        assert_eq!(filter.from, 10);
        assert_eq!(filter.until, 0);
        assert_eq!(filter.name, "carbon%");
    }

    #[test]
    fn epoch_nanos_saturates() {
        assert_eq!(epoch_nanos(ts(1)), 1_000_000_000);
        let far = DateTime::<Utc>::from_timestamp(20_000_000_000, 0).expect("valid");
        assert_eq!(epoch_nanos(far), i64::MAX);
    }

    #[test]
    fn single_test_requires_exactly_one_row() {
        let err = single_test(Vec::new(), "SELECT").unwrap_err();
        assert_eq!(err.to_string(), "Query error: test not found");
        assert_eq!(err.status_code(), 404);

        let test = Test {
            id: 1,
            ..Default::default()
        };
        let err = single_test(vec![test.clone(), test.clone()], "SELECT").unwrap_err();
        assert_eq!(err.to_string(), "Query error: duplicate test id");
        assert_eq!(err.sql(), Some("SELECT"));

        let found = single_test(vec![test.clone()], "SELECT").expect("one row should succeed");
        assert_eq!(found, test);
    }

    #[tokio::test]
    async fn load_test_samples_merges_rows_of_the_run() {
        let source = MemorySource::fixture();
        let test = source.tests[1].clone();
        let samples = load_test_samples(&source, &test, &SampleFilter::default())
            .await
            .expect("load should succeed");

        assert_eq!(samples.test, test);
        assert_eq!(samples.labels(), vec!["find", "render"]);
        let find = &samples.samples["find"];
        assert_eq!(find.len(), 2);
        let a = find
            .iter()
            .find(|d| d.url == "/find?q=a.*")
            .expect("record should be present");
        assert_eq!(a.count, 10.0);
        assert_eq!(a.errors_pcnt, 10.0);
    }

    #[tokio::test]
    async fn load_test_samples_applies_label_filter() {
        let source = MemorySource::fixture();
        let test = source.tests[1].clone();
        let filter = SampleFilter::default().label("rend%");
        let samples = load_test_samples(&source, &test, &filter)
            .await
            .expect("load should succeed");
        assert_eq!(samples.labels(), vec!["render"]);
    }

    #[tokio::test]
    async fn load_test_samples_of_run_without_rows_is_empty() {
        let source = MemorySource::fixture();
        let test = Test {
            id: 99,
            ts: ts(5),
            ..Default::default()
        };
        let samples = load_test_samples(&source, &test, &SampleFilter::default())
            .await
            .expect("load should succeed");
        assert!(samples.is_empty());
    }
}
