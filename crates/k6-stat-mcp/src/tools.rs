use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::Mutex;

use k6_stat_core::report;
use k6_stat_core::samples::io as samples_io;
use k6_stat_core::session::{SessionFilter, TestSelector};
use k6_stat_core::store::{TestFilter, TestIdFilter};
use k6_stat_core::{ClickhouseClient, Session, SortBy, StatError};

use crate::protocol::{ToolCallResult, ToolDefinition};

const DEFAULT_TOP_COUNT: usize = 10;

// ---------------------------------------------------------------------------
// State passed into every tool handler
// ---------------------------------------------------------------------------

pub struct ToolState {
    pub client: ClickhouseClient,
    pub session: Mutex<Session>,
}

// ---------------------------------------------------------------------------
// Tool definitions (advertised via tools/list)
// ---------------------------------------------------------------------------

pub fn all_tool_definitions() -> Vec<ToolDefinition> {
    vec![
        // Storage
        list_tests_def(),
        set_filter_def(),
        select_test_def(),
        select_reference_def(),
        // Reports
        top_def(),
        reference_top_def(),
        diff_def(),
        // Files
        save_samples_def(),
        load_samples_def(),
        export_samples_csv_def(),
    ]
}

fn list_tests_def() -> ToolDefinition {
    ToolDefinition {
        name: "list_tests".to_string(),
        description: "List recorded k6 test runs. The list is remembered, so a run can later be selected by its number `n`.".to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "from": {
                    "type": "integer",
                    "description": "Only runs started at or after this time (epoch seconds)",
                    "minimum": 0
                },
                "until": {
                    "type": "integer",
                    "description": "Only runs started before this time (epoch seconds)",
                    "minimum": 0
                },
                "name": {
                    "type": "string",
                    "description": "Test name filter (SQL LIKE pattern, e.g. 'carbonapi%')"
                }
            }
        }),
    }
}

fn set_filter_def() -> ToolDefinition {
    ToolDefinition {
        name: "set_filter".to_string(),
        description: "Set the label/url filter applied when a test or reference is selected. Omitted fields are cleared.".to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "label": {
                    "type": "string",
                    "description": "Label filter (SQL LIKE pattern)"
                },
                "url": {
                    "type": "string",
                    "description": "Url filter (SQL LIKE pattern)"
                },
                "skip_url": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Urls to exclude (SQL LIKE patterns)"
                }
            }
        }),
    }
}

fn selector_schema(what: &str) -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "number": {
                "type": "integer",
                "description": format!("Select the {what} by its number in the last list_tests result"),
                "minimum": 0
            },
            "id": {
                "type": "integer",
                "description": format!("{what} id (use together with time, conflicts with number)"),
                "minimum": 0
            },
            "time": {
                "type": "string",
                "description": format!("{what} start time, RFC 3339 (used with id)")
            }
        }
    })
}

fn select_test_def() -> ToolDefinition {
    ToolDefinition {
        name: "select_test".to_string(),
        description: "Load the merged endpoint statistics of a test run with the current filter and make it the selected test.".to_string(),
        input_schema: selector_schema("test"),
    }
}

fn select_reference_def() -> ToolDefinition {
    ToolDefinition {
        name: "select_reference".to_string(),
        description: "Load the merged endpoint statistics of a test run with the current filter and make it the reference for comparisons.".to_string(),
        input_schema: selector_schema("reference"),
    }
}

fn top_schema(with_diff: bool) -> Value {
    let mut schema = serde_json::json!({
        "type": "object",
        "properties": {
            "count": {
                "type": "integer",
                "description": "Records shown per label (default: 10)",
                "minimum": 1
            },
            "sort": {
                "type": "string",
                "description": format!("Sort key (default: p99), one of {}", SortBy::values_string()),
                "enum": SortBy::values()
            }
        }
    });
    if with_diff {
        schema["properties"]["by_diff"] = serde_json::json!({
            "type": "boolean",
            "description": "Rank by change against the reference instead of absolute value"
        });
        schema["properties"]["format"] = serde_json::json!({
            "type": "string",
            "description": "Output format (default: text)",
            "enum": ["text", "json"]
        });
    }
    schema
}

fn top_def() -> ToolDefinition {
    ToolDefinition {
        name: "top".to_string(),
        description: "Rank the endpoints of the selected test per label and print the top records with latency quantiles, counts and status shares.".to_string(),
        input_schema: top_schema(false),
    }
}

fn reference_top_def() -> ToolDefinition {
    ToolDefinition {
        name: "reference_top".to_string(),
        description: "Same as top, for the reference test.".to_string(),
        input_schema: top_schema(false),
    }
}

fn diff_def() -> ToolDefinition {
    ToolDefinition {
        name: "diff".to_string(),
        description: "Compare the selected test against the reference and print the top records per label as `value (diff)`.".to_string(),
        input_schema: top_schema(true),
    }
}

fn paths_schema(action: &str) -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "test": {
                "type": "string",
                "description": format!("File path to {action} the selected test")
            },
            "ref": {
                "type": "string",
                "description": format!("File path to {action} the reference test")
            }
        }
    })
}

fn save_samples_def() -> ToolDefinition {
    ToolDefinition {
        name: "save_samples".to_string(),
        description: "Save the selected and/or reference statistics to JSON files.".to_string(),
        input_schema: paths_schema("save"),
    }
}

fn load_samples_def() -> ToolDefinition {
    ToolDefinition {
        name: "load_samples".to_string(),
        description: "Load previously saved statistics from JSON files as the selected and/or reference test.".to_string(),
        input_schema: paths_schema("load"),
    }
}

fn export_samples_csv_def() -> ToolDefinition {
    ToolDefinition {
        name: "export_samples_csv".to_string(),
        description: "Export the selected (or reference) statistics as CSV. Returns the CSV text, or writes it to `path`.".to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "which": {
                    "type": "string",
                    "description": "Dataset to export (default: test)",
                    "enum": ["test", "ref"]
                },
                "path": {
                    "type": "string",
                    "description": "Optional output file path"
                }
            }
        }),
    }
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

pub async fn dispatch_tool(name: &str, args: Value, state: &ToolState) -> ToolCallResult {
    match name {
        // Storage
        "list_tests" => handle_list_tests(args, state).await,
        "set_filter" => handle_set_filter(args, state).await,
        "select_test" => handle_select(args, state, false).await,
        "select_reference" => handle_select(args, state, true).await,
        // Reports
        "top" => handle_top(args, state, false).await,
        "reference_top" => handle_top(args, state, true).await,
        "diff" => handle_diff(args, state).await,
        // Files
        "save_samples" => handle_save_samples(args, state).await,
        "load_samples" => handle_load_samples(args, state).await,
        "export_samples_csv" => handle_export_samples_csv(args, state).await,
        unknown => tool_error(format!("Unknown tool: {unknown}")),
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn tool_ok(text: String) -> ToolCallResult {
    ToolCallResult::text(text)
}

fn tool_error(message: String) -> ToolCallResult {
    ToolCallResult::error(message)
}

/// Storage errors carry the failed SQL; show it to the caller.
fn stat_error(e: StatError) -> ToolCallResult {
    match e.sql() {
        Some(sql) => tool_error(format!("{e}, sql: {sql}")),
        None => tool_error(e.to_string()),
    }
}

fn json_ok<T: serde::Serialize>(value: &T) -> ToolCallResult {
    match serde_json::to_string_pretty(value) {
        Ok(json) => tool_ok(json),
        Err(e) => tool_error(format!("Serialization error: {e}")),
    }
}

fn optional_str<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args.get(key).and_then(|v| v.as_str()).filter(|s| !s.is_empty())
}

fn optional_u64(args: &Value, key: &str) -> Result<Option<u64>, String> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_u64()
            .map(Some)
            .ok_or_else(|| format!("Invalid {key}: expected a non-negative integer")),
    }
}

fn parse_sort(args: &Value) -> Result<SortBy, String> {
    match optional_str(args, "sort") {
        Some(s) => SortBy::from_str(s).map_err(|e| e.to_string()),
        None => Ok(SortBy::default()),
    }
}

fn parse_count(args: &Value) -> Result<usize, String> {
    let count = optional_u64(args, "count")?.map_or(DEFAULT_TOP_COUNT, |n| n as usize);
    if count == 0 {
        return Err("Invalid count: must be at least 1".to_string());
    }
    Ok(count)
}

fn parse_time(s: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| format!("Invalid time '{s}': {e}"))
}

fn parse_selector(args: &Value) -> Result<TestSelector, String> {
    let number = optional_u64(args, "number")?;
    let id = optional_u64(args, "id")?;
    match (number, id) {
        (Some(_), Some(_)) => Err("Arguments 'number' and 'id' conflict".to_string()),
        (Some(n), None) => Ok(TestSelector::Number(n as usize)),
        (None, Some(id)) => {
            let time = optional_str(args, "time")
                .ok_or_else(|| "Missing required argument: time (used with id)".to_string())?;
            Ok(TestSelector::Id(TestIdFilter::new(id, parse_time(time)?)))
        }
        (None, None) => Err("Missing required argument: number or id".to_string()),
    }
}

fn string_list(args: &Value, key: &str) -> Result<Vec<String>, String> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| {
                v.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| format!("Invalid {key}: expected an array of strings"))
            })
            .collect(),
        Some(_) => Err(format!("Invalid {key}: expected an array of strings")),
    }
}

// ---------------------------------------------------------------------------
// Storage handlers
// ---------------------------------------------------------------------------

async fn handle_list_tests(args: Value, state: &ToolState) -> ToolCallResult {
    let from = match optional_u64(&args, "from") {
        Ok(v) => v.unwrap_or(0),
        Err(e) => return tool_error(e),
    };
    let until = match optional_u64(&args, "until") {
        Ok(v) => v.unwrap_or(0),
        Err(e) => return tool_error(e),
    };
    let filter = TestFilter {
        from: i64::try_from(from).unwrap_or(i64::MAX),
        until: i64::try_from(until).unwrap_or(i64::MAX),
        name: optional_str(&args, "name").unwrap_or_default().to_string(),
    };

    let mut session = state.session.lock().await;
    match session.load_tests(&state.client, &filter).await {
        Ok(tests) => {
            let listed: Vec<Value> = tests
                .iter()
                .enumerate()
                .map(|(n, t)| {
                    serde_json::json!({
                        "n": n,
                        "id": t.id,
                        "ts": t.ts,
                        "name": t.name,
                        "params": t.params,
                    })
                })
                .collect();
            json_ok(&listed)
        }
        Err(e) => stat_error(e),
    }
}

async fn handle_set_filter(args: Value, state: &ToolState) -> ToolCallResult {
    let skip_url = match string_list(&args, "skip_url") {
        Ok(v) => v,
        Err(e) => return tool_error(e),
    };
    let filter = SessionFilter {
        label: optional_str(&args, "label").unwrap_or_default().to_string(),
        url: optional_str(&args, "url").unwrap_or_default().to_string(),
        skip_url,
    };
    let text = filter.to_string();
    state.session.lock().await.set_filter(filter);
    tool_ok(text)
}

async fn handle_select(args: Value, state: &ToolState, reference: bool) -> ToolCallResult {
    let selector = match parse_selector(&args) {
        Ok(v) => v,
        Err(e) => return tool_error(e),
    };

    let mut session = state.session.lock().await;
    let samples = match session.load_samples(&state.client, selector).await {
        Ok(v) => v,
        Err(e) => return stat_error(e),
    };

    let descr = if reference { "ref" } else { "test" };
    let mut text = report::render_test(&samples.test, descr, true);
    text.push_str(&session.filter().to_string());
    text.push('\n');
    text.push_str(&format!(
        "Loaded {} labels, {} urls\n",
        samples.samples.len(),
        samples.len()
    ));

    if reference {
        session.set_reference(samples);
    } else {
        session.set_selected(samples);
    }
    tool_ok(text)
}

// ---------------------------------------------------------------------------
// Report handlers
// ---------------------------------------------------------------------------

async fn handle_top(args: Value, state: &ToolState, reference: bool) -> ToolCallResult {
    let (sort_by, count) = match parse_sort(&args).and_then(|s| Ok((s, parse_count(&args)?))) {
        Ok(v) => v,
        Err(e) => return tool_error(e),
    };

    let mut session = state.session.lock().await;
    let result = if reference {
        session.reference_top(sort_by, count)
    } else {
        session.top(sort_by, count)
    };
    match result {
        Ok(text) => tool_ok(text),
        Err(e) => stat_error(e),
    }
}

async fn handle_diff(args: Value, state: &ToolState) -> ToolCallResult {
    let (sort_by, count) = match parse_sort(&args).and_then(|s| Ok((s, parse_count(&args)?))) {
        Ok(v) => v,
        Err(e) => return tool_error(e),
    };
    let by_diff = args
        .get("by_diff")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    let session = state.session.lock().await;
    match optional_str(&args, "format").unwrap_or("text") {
        "text" => match session.diff(sort_by, by_diff, count) {
            Ok(text) => tool_ok(text),
            Err(e) => stat_error(e),
        },
        "json" => match session.compare(sort_by, by_diff) {
            Ok(diff) => match report::export_json(&diff) {
                Ok(json) => tool_ok(json),
                Err(e) => tool_error(format!("Serialization error: {e}")),
            },
            Err(e) => stat_error(e),
        },
        other => tool_error(format!(
            "Unknown format '{other}'. Valid options: text, json"
        )),
    }
}

// ---------------------------------------------------------------------------
// File handlers
// ---------------------------------------------------------------------------

async fn handle_save_samples(args: Value, state: &ToolState) -> ToolCallResult {
    let test_path = optional_str(&args, "test");
    let ref_path = optional_str(&args, "ref");
    if test_path.is_none() && ref_path.is_none() {
        return tool_error("Missing required argument: test or ref".to_string());
    }

    let session = state.session.lock().await;
    let mut saved = Vec::new();
    for (path, reference) in [(test_path, false), (ref_path, true)] {
        let Some(path) = path else { continue };
        let samples = if reference {
            session.reference()
        } else {
            session.selected()
        };
        let result = match samples {
            Ok(samples) => samples_io::write_test_samples(samples, path).await,
            Err(e) => Err(e),
        };
        let which = if reference { "ref" } else { "test" };
        if let Err(e) = result {
            return tool_error(format!("Failed to save '{which}' samples to {path}: {e}"));
        }
        saved.push(format!("Saved '{which}' samples to {path}"));
    }
    tool_ok(saved.join("\n"))
}

async fn handle_load_samples(args: Value, state: &ToolState) -> ToolCallResult {
    let test_path = optional_str(&args, "test");
    let ref_path = optional_str(&args, "ref");
    if test_path.is_none() && ref_path.is_none() {
        return tool_error("Missing required argument: test or ref".to_string());
    }

    let mut loaded = Vec::new();
    for (path, reference) in [(test_path, false), (ref_path, true)] {
        let Some(path) = path else { continue };
        let which = if reference { "ref" } else { "test" };
        let samples = match samples_io::read_test_samples(path).await {
            Ok(v) => v,
            Err(e) => {
                return tool_error(format!("Failed to load '{which}' samples from {path}: {e}"))
            }
        };
        loaded.push(report::render_test(&samples.test, which, loaded.is_empty()));

        let mut session = state.session.lock().await;
        if reference {
            session.set_reference(samples);
        } else {
            session.set_selected(samples);
        }
    }
    tool_ok(loaded.concat())
}

async fn handle_export_samples_csv(args: Value, state: &ToolState) -> ToolCallResult {
    let reference = match optional_str(&args, "which").unwrap_or("test") {
        "test" => false,
        "ref" => true,
        other => {
            return tool_error(format!("Unknown dataset '{other}'. Valid options: test, ref"))
        }
    };

    let csv = {
        let session = state.session.lock().await;
        let samples = if reference {
            session.reference()
        } else {
            session.selected()
        };
        match samples.and_then(report::export_csv) {
            Ok(csv) => csv,
            Err(e) => return stat_error(e),
        }
    };

    match optional_str(&args, "path") {
        Some(path) => match tokio::fs::write(path, csv.as_bytes()).await {
            Ok(()) => tool_ok(format!("CSV written to {path}")),
            Err(e) => tool_error(format!("Failed to write {path}: {e}")),
        },
        None => tool_ok(csv),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
