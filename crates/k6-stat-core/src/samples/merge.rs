use std::collections::{BTreeMap, HashMap};

use super::{SampleDurations, SampleKey, SampleQuantiles, SampleStatus, Test, TestSamples};

/// Status classes that do not count as errors.
pub const EXPECTED_STATUSES: [&str; 3] = ["200", "400", "404"];

/// Return `(total, errors_pcnt)` for a status → count map.
///
/// Every status not in [`EXPECTED_STATUSES`] is an error. The percentage is
/// zero when the total is zero.
pub fn http_errors_pcnt(status: &BTreeMap<String, f64>) -> (f64, f64) {
    let mut total = 0.0;
    let mut errors = 0.0;
    for (name, n) in status {
        if !EXPECTED_STATUSES.contains(&name.as_str()) {
            errors += n;
        }
        total += n;
    }
    if total == 0.0 {
        return (total, 0.0);
    }
    (total, errors / total * 100.0)
}

/// Merge quantile rows and status rows of one test run into per-label
/// endpoint records.
///
/// A status row without a matching quantile row gets a zero-latency record
/// and a warning; no count is dropped.
pub fn merge_samples(
    test: Test,
    quantiles: &[SampleQuantiles],
    statuses: &[SampleStatus],
) -> TestSamples {
    merge_samples_with(test, quantiles, statuses, |_| {})
}

/// Same as [`merge_samples`], calling `on_orphan` for every status row whose
/// key has no quantile row.
pub fn merge_samples_with<F>(
    test: Test,
    quantiles: &[SampleQuantiles],
    statuses: &[SampleStatus],
    mut on_orphan: F,
) -> TestSamples
where
    F: FnMut(&SampleKey),
{
    let mut durations: HashMap<SampleKey, SampleDurations> =
        HashMap::with_capacity(quantiles.len());

    for q in quantiles {
        durations.insert(
            q.key(),
            SampleDurations {
                url: q.url.clone(),
                p50: q.p50,
                p90: q.p90,
                p95: q.p95,
                p99: q.p99,
                max: q.max,
                ..Default::default()
            },
        );
    }

    for s in statuses {
        // A status total without durations is an upstream inconsistency.
        let record = durations.entry(s.key()).or_insert_with_key(|key| {
            tracing::warn!("no durations record for {key}");
            on_orphan(key);
            SampleDurations {
                url: s.url.clone(),
                ..Default::default()
            }
        });
        *record.status.entry(s.status.clone()).or_insert(0.0) += s.count;
    }

    let mut samples: HashMap<String, Vec<SampleDurations>> = HashMap::new();
    for (key, mut record) in durations {
        let (count, errors_pcnt) = http_errors_pcnt(&record.status);
        record.count = count;
        record.errors_pcnt = errors_pcnt;
        samples.entry(key.label).or_default().push(record);
    }

    TestSamples { test, samples }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use proptest::prelude::*;

    fn start() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2023-03-01T10:00:00Z")
            .expect("timestamp should parse")
            .with_timezone(&Utc)
    }

    fn test_run() -> Test {
        Test {
            id: 7,
            ts: start(),
            name: "graphite-clickhouse".to_string(),
            params: "-rps 100".to_string(),
        }
    }

    fn quantile(label: &str, url: &str, p99: f64, max: f64) -> SampleQuantiles {
        SampleQuantiles {
            id: 7,
            start: start(),
            label: label.to_string(),
            url: url.to_string(),
            p50: p99 / 4.0,
            p90: p99 / 2.0,
            p95: p99 / 1.5,
            p99,
            max,
        }
    }

    fn status(label: &str, url: &str, status: &str, count: f64) -> SampleStatus {
        SampleStatus {
            id: 7,
            start: start(),
            label: label.to_string(),
            url: url.to_string(),
            status: status.to_string(),
            count,
        }
    }

    fn find<'a>(samples: &'a TestSamples, label: &str, url: &str) -> &'a SampleDurations {
        samples
            .samples
            .get(label)
            .and_then(|v| v.iter().find(|d| d.url == url))
            .expect("record should be present")
    }

    // -----------------------------------------------------------------------
    // http_errors_pcnt
    // -----------------------------------------------------------------------

    #[test]
    fn errors_pcnt_empty_is_zero() {
        let (total, pcnt) = http_errors_pcnt(&BTreeMap::new());
        assert_eq!(total, 0.0);
        assert_eq!(pcnt, 0.0);
    }

    #[test]
    fn errors_pcnt_zero_counts_do_not_divide() {
        let status = BTreeMap::from([("500".to_string(), 0.0)]);
        let (total, pcnt) = http_errors_pcnt(&status);
        assert_eq!(total, 0.0);
        assert_eq!(pcnt, 0.0);
    }

    #[test]
    fn errors_pcnt_treats_only_200_400_404_as_expected() {
        let status = BTreeMap::from([
            ("200".to_string(), 1.0),
            ("400".to_string(), 1.0),
            ("404".to_string(), 1.0),
            ("500".to_string(), 4.0),
            ("503".to_string(), 3.0),
        ]);
        let (total, pcnt) = http_errors_pcnt(&status);
        assert_eq!(total, 10.0);
        assert_eq!(pcnt, 70.0);
    }

    #[test]
    fn errors_pcnt_counts_other_success_codes_as_errors() {
        let status = BTreeMap::from([("200".to_string(), 3.0), ("201".to_string(), 1.0)]);
        let (_, pcnt) = http_errors_pcnt(&status);
        assert_eq!(pcnt, 25.0);
    }

    // -----------------------------------------------------------------------
    // merge_samples
    // -----------------------------------------------------------------------

    #[test]
    fn merge_folds_statuses_into_quantile_records() {
        let quantiles = vec![
            quantile("find", "q=a.*", 4.0, 5.0),
            quantile("find", "q=b.*", 2.0, 3.0),
            quantile("render", "target=a", 10.0, 12.0),
        ];
        let statuses = vec![
            status("find", "q=a.*", "200", 9.0),
            status("find", "q=a.*", "504", 1.0),
            status("find", "q=b.*", "200", 4.0),
            status("render", "target=a", "404", 2.0),
        ];

        let merged = merge_samples(test_run(), &quantiles, &statuses);

        assert_eq!(merged.test, test_run());
        assert_eq!(merged.samples.len(), 2);
        assert_eq!(merged.samples["find"].len(), 2);
        assert_eq!(merged.samples["render"].len(), 1);

        let a = find(&merged, "find", "q=a.*");
        assert_eq!(a.p99, 4.0);
        assert_eq!(a.max, 5.0);
        assert_eq!(a.count, 10.0);
        assert_eq!(a.errors_pcnt, 10.0);
        assert_eq!(a.status["200"], 9.0);
        assert_eq!(a.status["504"], 1.0);

        let r = find(&merged, "render", "target=a");
        assert_eq!(r.count, 2.0);
        assert_eq!(r.errors_pcnt, 0.0);
    }

    #[test]
    fn merge_accumulates_duplicate_status_rows() {
        let quantiles = vec![quantile("find", "/a", 1.0, 1.0)];
        let statuses = vec![
            status("find", "/a", "200", 2.5),
            status("find", "/a", "200", 1.5),
        ];
        let merged = merge_samples(test_run(), &quantiles, &statuses);
        let a = find(&merged, "find", "/a");
        assert_eq!(a.status.len(), 1);
        assert_eq!(a.status["200"], 4.0);
        assert_eq!(a.count, 4.0);
    }

    #[test]
    fn merge_keeps_quantile_record_without_statuses() {
        let quantiles = vec![quantile("find", "/a", 1.0, 2.0)];
        let merged = merge_samples(test_run(), &quantiles, &[]);
        let a = find(&merged, "find", "/a");
        assert!(a.status.is_empty());
        assert_eq!(a.count, 0.0);
        assert_eq!(a.errors_pcnt, 0.0);
        assert_eq!(a.max, 2.0);
    }

    #[test]
    fn merge_synthesizes_record_for_orphan_status() {
        let statuses = vec![status("x", "/a", "200", 3.0)];
        let mut orphans = Vec::new();
        let merged = merge_samples_with(test_run(), &[], &statuses, |key| {
            orphans.push(key.clone())
        });

        assert_eq!(orphans.len(), 1);
        assert_eq!(orphans[0].id, 7);
        assert_eq!(orphans[0].label, "x");
        assert_eq!(orphans[0].url, "/a");

        let a = find(&merged, "x", "/a");
        assert_eq!(a.p50, 0.0);
        assert_eq!(a.p90, 0.0);
        assert_eq!(a.p95, 0.0);
        assert_eq!(a.p99, 0.0);
        assert_eq!(a.max, 0.0);
        assert_eq!(a.count, 3.0);
    }

    #[test]
    fn merge_reports_orphan_key_once_per_key() {
        let statuses = vec![
            status("x", "/a", "200", 3.0),
            status("x", "/a", "500", 1.0),
        ];
        let mut orphans = 0;
        let merged = merge_samples_with(test_run(), &[], &statuses, |_| orphans += 1);
        assert_eq!(orphans, 1);
        let a = find(&merged, "x", "/a");
        assert_eq!(a.count, 4.0);
        assert_eq!(a.errors_pcnt, 25.0);
    }

    #[test]
    fn merge_distinguishes_runs_sharing_an_id() {
        let mut other = quantile("find", "/a", 9.0, 9.0);
        other.start = start() + chrono::Duration::hours(1);
        let quantiles = vec![quantile("find", "/a", 1.0, 1.0), other];
        let statuses = vec![status("find", "/a", "200", 1.0)];

        let mut orphans = 0;
        let merged = merge_samples_with(test_run(), &quantiles, &statuses, |_| orphans += 1);
        assert_eq!(orphans, 0);
        assert_eq!(merged.samples["find"].len(), 2);
        let counted: Vec<f64> = merged.samples["find"].iter().map(|d| d.count).collect();
        assert!(counted.contains(&1.0));
        assert!(counted.contains(&0.0));
    }

    #[test]
    fn merge_of_nothing_is_empty() {
        let merged = merge_samples(test_run(), &[], &[]);
        assert!(merged.samples.is_empty());
        assert!(merged.is_empty());
    }

    // -----------------------------------------------------------------------
    // Properties
    // -----------------------------------------------------------------------

    fn arb_rows() -> impl Strategy<Value = (Vec<SampleQuantiles>, Vec<SampleStatus>)> {
        let labels = prop::sample::select(vec!["find", "render", "tags"]);
        let urls = prop::sample::select(vec!["/a", "/b", "/c", "/d"]);
        let statuses = prop::sample::select(vec!["200", "201", "400", "404", "500", "504"]);
        let q = prop::collection::vec((labels.clone(), urls.clone(), 0.0f64..1000.0), 0..8);
        let s = prop::collection::vec((labels, urls, statuses, 0u32..100), 0..24);
        (q, s).prop_map(|(q, s)| {
            let q = q
                .into_iter()
                .map(|(label, url, p99)| quantile(label, url, p99, p99 * 2.0))
                .collect();
            let s = s
                .into_iter()
                .map(|(label, url, st, n)| status(label, url, st, f64::from(n)))
                .collect();
            (q, s)
        })
    }

    proptest! {
        #[test]
        fn merged_count_equals_status_sum((quantiles, statuses) in arb_rows()) {
            let merged = merge_samples(test_run(), &quantiles, &statuses);
            for records in merged.samples.values() {
                for d in records {
                    let sum: f64 = d.status.values().sum();
                    prop_assert_eq!(d.count, sum);
                    if d.count == 0.0 {
                        prop_assert_eq!(d.errors_pcnt, 0.0);
                    }
                }
            }
        }

        #[test]
        fn merge_drops_no_status_count((quantiles, statuses) in arb_rows()) {
            let merged = merge_samples(test_run(), &quantiles, &statuses);
            let input: f64 = statuses.iter().map(|s| s.count).sum();
            let output: f64 = merged
                .samples
                .values()
                .flatten()
                .map(|d| d.count)
                .sum();
            prop_assert_eq!(input, output);
        }
    }
}
