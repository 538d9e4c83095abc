pub mod export;

use std::collections::BTreeMap;

use crate::samples::{SampleDurations, SampleDurationsDiff, Test, TestSamples, TestSamplesDiff};

pub use export::{export_csv, export_json};

const TESTS_RULE_WIDTH: usize = 9 + 19 + 30 + 45 + 18;
const TOP_RULE_WIDTH: usize = 9 * 8 + 16;
const TOP_DIFF_RULE_WIDTH: usize = 20 * 8 + 14;

/// Statuses listed right after `200` when present.
const LEADING_STATUSES: [&str; 2] = ["400", "404"];

fn rule(width: usize) -> String {
    "-".repeat(width)
}

/// Share of `n` in `total` as a percentage, zero for an empty total.
fn share(n: f64, total: f64) -> f64 {
    if total == 0.0 {
        0.0
    } else {
        n / total * 100.0
    }
}

// ---------------------------------------------------------------------------
// Test runs
// ---------------------------------------------------------------------------

/// Numbered list of test runs, each followed by its params line.
pub fn render_tests(tests: &[Test]) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "{:>9} | {:>19} | {:>30} | {}\n{}\n",
        "N", "Id", "Ts", "Name", "Params"
    ));
    out.push_str(&rule(TESTS_RULE_WIDTH));
    out.push('\n');
    for (i, t) in tests.iter().enumerate() {
        out.push_str(&format!(
            "{:>9} | {:>19} | {:>30} | {}\n{}\n",
            i,
            t.id,
            t.ts.to_rfc3339(),
            t.name,
            t.params
        ));
    }
    out
}

/// One test run on a single line, tagged with `descr` in the `N` column.
pub fn render_test(test: &Test, descr: &str, head: bool) -> String {
    let mut out = String::new();
    if head {
        out.push_str(&format!(
            "{:>9} | {:>19} | {:>30} | {:>45} | {}\n",
            "N", "Id", "Ts", "Name", "Params"
        ));
        out.push_str(&rule(TESTS_RULE_WIDTH));
        out.push('\n');
    }
    out.push_str(&format!(
        "{:>9} | {:>19} | {:>30} | {:>45} | {}\n",
        descr,
        test.id,
        test.ts.to_rfc3339(),
        test.name,
        test.params
    ));
    out
}

// ---------------------------------------------------------------------------
// Status breakdown
// ---------------------------------------------------------------------------

/// Status classes in display order: `200` always, `400` and `404` when
/// `shown`, then the rest lexicographically.
fn status_order<'a, F>(status: &'a BTreeMap<String, f64>, shown: F) -> Vec<&'a str>
where
    F: Fn(&str) -> bool,
{
    let mut order = vec!["200"];
    for s in LEADING_STATUSES {
        if shown(s) {
            order.push(s);
        }
    }
    order.extend(
        status
            .keys()
            .map(String::as_str)
            .filter(|s| *s != "200" && !LEADING_STATUSES.contains(s)),
    );
    order
}

fn status_shares(d: &SampleDurations) -> String {
    let shown = |s: &str| d.status.get(s).is_some_and(|n| *n > 0.0);
    status_order(&d.status, shown)
        .into_iter()
        .map(|s| match d.status.get(s) {
            Some(n) if *n > 0.0 => format!("{s}: {:.2}", share(*n, d.count)),
            _ if s == "200" => "200: 0".to_string(),
            _ => format!("{s}: {:.2}", 0.0),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn status_shares_diff(d: &SampleDurationsDiff) -> String {
    let current = &d.current;
    let ref_count = current.count - d.count_diff;
    // a class counted only by the reference is still listed
    let shown = |s: &str| {
        current.status.get(s).is_some_and(|n| *n > 0.0)
            || d.status_diff.get(s).is_some_and(|n| *n != 0.0)
    };
    status_order(&current.status, shown)
        .into_iter()
        .map(|s| {
            let n = current.status.get(s).copied().unwrap_or(0.0);
            let n_diff = d.status_diff.get(s).copied().unwrap_or(0.0);
            format!(
                "{s}: {}",
                diff_cell(share(n, current.count), share(n - n_diff, ref_count))
            )
        })
        .collect::<Vec<_>>()
        .join(", ")
}

// ---------------------------------------------------------------------------
// Top reports
// ---------------------------------------------------------------------------

/// Per-label table of the first `count` records, in their current order.
pub fn render_top(samples: &TestSamples, count: usize) -> String {
    let mut out = String::new();
    let head = rule(TOP_RULE_WIDTH);
    for label in samples.labels() {
        let durations = &samples.samples[label];
        out.push_str(&format!(
            "\nLabel: {:?}, {} urls\n{}\n",
            label,
            durations.len(),
            head
        ));
        out.push_str(&format!(
            "{:>9} | {:>9} | {:>9} | {:>9} | {:>9} | {:>9} | {:>6} | {}\n{}\n",
            "P50", "P90", "P95", "P99", "Max", "Count", "Err%", "Status%", head
        ));
        for d in durations.iter().take(count) {
            out.push_str(&format!(
                "{}\n{:>9.2} | {:>9.2} | {:>9.2} | {:>9.2} | {:>9.2} | {:>9.0} | {:>6.2}",
                d.url, d.p50, d.p90, d.p95, d.p99, d.max, d.count, d.errors_pcnt
            ));
            if !d.status.is_empty() {
                out.push_str(" | ");
                out.push_str(&status_shares(d));
            }
            out.push('\n');
        }
    }
    out
}

fn diff_cell(v: f64, v_diff: f64) -> String {
    format!("{v:.2} ({v_diff:.2})")
}

fn count_diff_cell(count: f64, count_diff: f64) -> String {
    format!("{count:.0} ({count_diff:.0})")
}

/// Per-label comparison table; each cell reads `value (diff)` and each
/// status share reads `current% (reference%)`.
pub fn render_top_diff(samples: &TestSamplesDiff, count: usize) -> String {
    let mut out = String::new();
    let head = rule(TOP_DIFF_RULE_WIDTH);
    for label in samples.labels() {
        let durations = &samples.samples[label];
        out.push_str(&format!(
            "\nLabel: {:?}, {} urls\n{}\n",
            label,
            durations.len(),
            head
        ));
        out.push_str(&format!(
            "{:>20} | {:>20} | {:>20} | {:>20} | {:>20} | {:>20} | {:>14} | {}\n{}\n",
            "Url P50 (Diff)",
            "P90 (Diff)",
            "P95 (Diff)",
            "P99 (Diff)",
            "Max (Diff)",
            "Count (Diff)",
            "Err% (Diff)",
            "Status% (Reference)",
            head
        ));
        for d in durations.iter().take(count) {
            let c = &d.current;
            out.push_str(&format!(
                "{}\n{:>20} | {:>20} | {:>20} | {:>20} | {:>20} | {:>20} | {:>14} |",
                c.url,
                diff_cell(c.p50, d.p50_diff),
                diff_cell(c.p90, d.p90_diff),
                diff_cell(c.p95, d.p95_diff),
                diff_cell(c.p99, d.p99_diff),
                diff_cell(c.max, d.max_diff),
                count_diff_cell(c.count, d.count_diff),
                diff_cell(c.errors_pcnt, d.errors_pcnt_diff),
            ));
            if !c.status.is_empty() {
                out.push(' ');
                out.push_str(&status_shares_diff(d));
            }
            out.push('\n');
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
