use chrono::{DateTime, Utc};

use super::{epoch_nanos, single_test, SampleFilter, SampleSource, TestFilter, TestIdFilter};
use crate::error::StatError;
use crate::samples::{SampleQuantiles, SampleStatus, Test};

/// In-memory [`SampleSource`] with `LIKE` filtering, for tests.
#[derive(Debug, Clone, Default)]
pub(crate) struct MemorySource {
    pub tests: Vec<Test>,
    pub quantiles: Vec<SampleQuantiles>,
    pub statuses: Vec<SampleStatus>,
}

fn ts(secs: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(secs, 0).unwrap_or_default()
}

fn quantile(test: &Test, label: &str, url: &str, p99: f64, max: f64) -> SampleQuantiles {
    SampleQuantiles {
        id: test.id,
        start: test.ts,
        label: label.to_string(),
        url: url.to_string(),
        p50: p99 / 4.0,
        p90: p99 / 2.0,
        p95: p99 / 1.5,
        p99,
        max,
    }
}

fn status(test: &Test, label: &str, url: &str, status: &str, count: f64) -> SampleStatus {
    SampleStatus {
        id: test.id,
        start: test.ts,
        label: label.to_string(),
        url: url.to_string(),
        status: status.to_string(),
        count,
    }
}

impl MemorySource {
    /// Two runs of the same scenario: a reference (index 0) and a newer run
    /// (index 1) with a slower, partly failing `find` endpoint.
    pub fn fixture() -> Self {
        let reference = Test {
            id: 1,
            ts: ts(1_674_196_900),
            name: "carbonapi 1.1.2".to_string(),
            params: "USERS=2".to_string(),
        };
        let current = Test {
            id: 2,
            ts: ts(1_674_196_902),
            name: "carbonapi 1.5.6".to_string(),
            params: "USERS=2".to_string(),
        };

        let quantiles = vec![
            quantile(&reference, "find", "/find?q=a.*", 3.0, 4.0),
            quantile(&reference, "render", "/render?target=a", 8.0, 10.0),
            quantile(&current, "find", "/find?q=a.*", 4.0, 5.0),
            quantile(&current, "find", "/find?q=b.*", 2.0, 4.0),
            quantile(&current, "render", "/render?target=a", 9.0, 12.0),
        ];
        let statuses = vec![
            status(&reference, "find", "/find?q=a.*", "200", 8.0),
            status(&reference, "find", "/find?q=a.*", "400", 2.0),
            status(&reference, "render", "/render?target=a", "200", 5.0),
            status(&current, "find", "/find?q=a.*", "200", 9.0),
            status(&current, "find", "/find?q=a.*", "504", 1.0),
            status(&current, "find", "/find?q=b.*", "200", 10.0),
            status(&current, "render", "/render?target=a", "200", 5.0),
        ];

        Self {
            tests: vec![reference, current],
            quantiles,
            statuses,
        }
    }
}

/// SQL `LIKE` with `%` and `_` wildcards.
pub(crate) fn like(value: &str, pattern: &str) -> bool {
    let value: Vec<char> = value.chars().collect();
    let pattern: Vec<char> = pattern.chars().collect();
    like_at(&value, &pattern)
}

fn like_at(value: &[char], pattern: &[char]) -> bool {
    match pattern.split_first() {
        None => value.is_empty(),
        Some(('%', rest)) => (0..=value.len()).any(|i| like_at(&value[i..], rest)),
        Some(('_', rest)) => !value.is_empty() && like_at(&value[1..], rest),
        Some((c, rest)) => value.first() == Some(c) && like_at(&value[1..], rest),
    }
}

fn matches_sample(filter: &SampleFilter, id: u64, start: DateTime<Utc>, label: &str, url: &str) -> bool {
    id == filter.id
        && epoch_nanos(start) == filter.start
        && (filter.label.is_empty() || like(label, &filter.label))
        && (filter.url.is_empty() || like(url, &filter.url))
        && filter.skip_patterns().all(|p| !like(url, p))
}

impl SampleSource for MemorySource {
    async fn get_tests(&self, filter: &TestFilter) -> Result<Vec<Test>, StatError> {
        if filter.from < 0 {
            return Err(StatError::invalid_from());
        }
        if filter.until < 0 {
            return Err(StatError::invalid_until());
        }
        let mut tests: Vec<Test> = self
            .tests
            .iter()
            .filter(|t| filter.from == 0 || t.ts.timestamp() >= filter.from)
            .filter(|t| filter.until == 0 || t.ts.timestamp() < filter.until)
            .filter(|t| filter.name.is_empty() || like(&t.name, &filter.name))
            .cloned()
            .collect();
        tests.sort_by(|a, b| (a.id, a.ts, &a.name).cmp(&(b.id, b.ts, &b.name)));
        Ok(tests)
    }

    async fn get_test_by_id(&self, filter: &TestIdFilter) -> Result<Test, StatError> {
        let tests = self
            .tests
            .iter()
            .filter(|t| t.id == filter.id && epoch_nanos(t.ts) == filter.time)
            .cloned()
            .collect();
        single_test(tests, "")
    }

    async fn get_http_samples_durations(
        &self,
        filter: &SampleFilter,
    ) -> Result<Vec<SampleQuantiles>, StatError> {
        Ok(self
            .quantiles
            .iter()
            .filter(|q| matches_sample(filter, q.id, q.start, &q.label, &q.url))
            .cloned()
            .collect())
    }

    async fn get_http_samples_status(
        &self,
        filter: &SampleFilter,
    ) -> Result<Vec<SampleStatus>, StatError> {
        Ok(self
            .statuses
            .iter()
            .filter(|s| matches_sample(filter, s.id, s.start, &s.label, &s.url))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn like_wildcards() {
        assert!(like("/find?q=a.*", "/find%"));
        assert!(like("/find?q=a.*", "%q=_.*"));
        assert!(like("abc", "abc"));
        assert!(like("", "%"));
        assert!(!like("abc", "ab"));
        assert!(!like("abc", "a_"));
    }

    #[tokio::test]
    async fn get_tests_filters_by_range_and_name() {
        let source = MemorySource::fixture();
        let all = source
            .get_tests(&TestFilter::default())
            .await
            .expect("get_tests should succeed");
        assert_eq!(all.len(), 2);

        let newer = source
            .get_tests(&TestFilter {
                from: 1_674_196_901,
                ..Default::default()
            })
            .await
            .expect("get_tests should succeed");
        assert_eq!(newer.len(), 1);
        assert_eq!(newer[0].id, 2);

        let named = source
            .get_tests(&TestFilter {
                name: "%1.1%".to_string(),
                ..Default::default()
            })
            .await
            .expect("get_tests should succeed");
        assert_eq!(named.len(), 1);
        assert_eq!(named[0].id, 1);
    }

    #[tokio::test]
    async fn get_tests_rejects_negative_bounds() {
        let source = MemorySource::fixture();
        let err = source
            .get_tests(&TestFilter {
                until: -1,
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Query error: invalid until");
    }

    #[tokio::test]
    async fn skip_url_excludes_matching_rows() {
        let source = MemorySource::fixture();
        let test = source.tests[1].clone();
        let filter = SampleFilter::for_test(&test).skip_url(vec!["%q=b%".to_string()]);
        let rows = source
            .get_http_samples_durations(&filter)
            .await
            .expect("query should succeed");
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|q| q.url != "/find?q=b.*"));
    }
}
