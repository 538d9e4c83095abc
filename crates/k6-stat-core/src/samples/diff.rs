use std::collections::{BTreeMap, HashMap};

use super::{SampleDurations, SampleDurationsDiff, TestSamples, TestSamplesDiff};

/// Compare `test` against the reference run `reference`.
///
/// Only labels measured by `test` appear in the result. A record gets delta
/// fields when the reference has the same label and url and both sides have
/// a nonzero count; otherwise every delta stays zero.
pub fn diff_samples(test: &TestSamples, reference: &TestSamples) -> TestSamplesDiff {
    let mut samples = HashMap::with_capacity(test.samples.len());

    for (label, current) in &test.samples {
        let diffs = match reference.samples.get(label) {
            Some(ref_durations) => {
                // duplicate urls are not expected, the last one wins
                let by_url: HashMap<&str, &SampleDurations> = ref_durations
                    .iter()
                    .map(|d| (d.url.as_str(), d))
                    .collect();
                current
                    .iter()
                    .map(|d| match by_url.get(d.url.as_str()) {
                        Some(r) => diff_durations(d, r),
                        None => SampleDurationsDiff::from(d.clone()),
                    })
                    .collect()
            }
            None => current
                .iter()
                .cloned()
                .map(SampleDurationsDiff::from)
                .collect(),
        };
        samples.insert(label.clone(), diffs);
    }

    TestSamplesDiff {
        test: test.test.clone(),
        reference: reference.test.clone(),
        samples,
    }
}

fn diff_durations(current: &SampleDurations, reference: &SampleDurations) -> SampleDurationsDiff {
    let mut d = SampleDurationsDiff::from(current.clone());
    if current.count == 0.0 || reference.count == 0.0 {
        return d;
    }

    d.p50_diff = current.p50 - reference.p50;
    d.p90_diff = current.p90 - reference.p90;
    d.p95_diff = current.p95 - reference.p95;
    d.p99_diff = current.p99 - reference.p99;
    d.max_diff = current.max - reference.max;
    d.count_diff = current.count - reference.count;
    d.errors_pcnt_diff = current.errors_pcnt - reference.errors_pcnt;

    let mut status_diff: BTreeMap<String, f64> = current.status.clone();
    for (status, n) in &reference.status {
        // list reference-only classes on the current side as well
        d.current.status.entry(status.clone()).or_insert(0.0);
        *status_diff.entry(status.clone()).or_insert(0.0) -= n;
    }
    d.status_diff = status_diff;
    d
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
