use serde::Serialize;

use crate::error::StatError;
use crate::samples::TestSamples;

// ---------------------------------------------------------------------------
// CSV export
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct CsvRow<'a> {
    label: &'a str,
    url: &'a str,
    p50: f64,
    p90: f64,
    p95: f64,
    p99: f64,
    max: f64,
    count: f64,
    errors: f64,
}

/// Export a merged dataset as CSV, one row per endpoint.
///
/// Labels are written in lexicographic order, records within a label in
/// their current order.
pub fn export_csv(samples: &TestSamples) -> Result<String, StatError> {
    let mut writer = csv::Writer::from_writer(Vec::new());

    for label in samples.labels() {
        for d in &samples.samples[label] {
            writer.serialize(CsvRow {
                label,
                url: &d.url,
                p50: d.p50,
                p90: d.p90,
                p95: d.p95,
                p99: d.p99,
                max: d.max,
                count: d.count,
                errors: d.errors_pcnt,
            })?;
        }
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| StatError::Io(e.into_error()))?;
    String::from_utf8(bytes).map_err(|e| StatError::Validation(e.to_string()))
}

// ---------------------------------------------------------------------------
// JSON export
// ---------------------------------------------------------------------------

/// Export a merged or compared dataset as pretty-printed JSON.
pub fn export_json<T: Serialize>(samples: &T) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(samples)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::samples::{diff_samples, SampleDurations, Test};
    use std::collections::{BTreeMap, HashMap};

    fn record(url: &str, max: f64, count: f64) -> SampleDurations {
        SampleDurations {
            url: url.to_string(),
            p50: 1.0,
            p90: 2.0,
            p95: 3.0,
            p99: 4.0,
            max,
            status: BTreeMap::from([("200".to_string(), count)]),
            count,
            errors_pcnt: 0.0,
        }
    }

    fn make_samples() -> TestSamples {
        TestSamples {
            test: Test {
                id: 2,
                name: "carbonapi".to_string(),
                ..Default::default()
            },
            samples: HashMap::from([
                ("render".to_string(), vec![record("/render?a,b", 9.5, 3.0)]),
                (
                    "find".to_string(),
                    vec![record("/find?q=a", 5.0, 10.0), record("/find?q=b", 4.0, 2.0)],
                ),
            ]),
        }
    }

    #[test]
    fn csv_has_header_and_rows_in_label_order() {
        let csv = export_csv(&make_samples()).expect("export should succeed");
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], "label,url,p50,p90,p95,p99,max,count,errors");
        assert_eq!(lines.len(), 4);
        assert!(lines[1].starts_with("find,/find?q=a,"));
        assert!(lines[2].starts_with("find,/find?q=b,"));
        // comma in the url is quoted
        assert!(lines[3].starts_with("render,\"/render?a,b\","));
        assert!(lines[3].contains(",9.5,"));
    }

    #[test]
    fn csv_of_empty_dataset_is_empty() {
        let csv = export_csv(&TestSamples::default()).expect("export should succeed");
        assert!(csv.is_empty());
    }

    #[test]
    fn json_export_of_diff_uses_wire_names() {
        let samples = make_samples();
        let diff = diff_samples(&samples, &samples);
        let json = export_json(&diff).expect("export should succeed");
        assert!(json.contains("\"ref\""));
        assert!(json.contains("\"max-diff\""));
        assert!(json.contains('\n'));

        let value: serde_json::Value = serde_json::from_str(&json).expect("json should parse");
        assert_eq!(value["samples"]["find"][0]["max-diff"], 0.0);
    }
}
