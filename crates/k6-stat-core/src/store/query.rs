use chrono::{DateTime, Utc};

use super::{SampleFilter, TestFilter, TestIdFilter};
use crate::error::StatError;

/// Metric holding request latencies.
pub const METRIC_DURATION: &str = "http_req_duration";
/// Metric holding request counts per status.
pub const METRIC_REQS: &str = "http_reqs";

/// A SQL statement with `{name:Type}` placeholders and their values.
///
/// User input only ever travels in `params`; table names come from
/// validated configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Query {
    pub sql: String,
    pub params: Vec<(String, String)>,
}

impl Query {
    fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    fn push(&mut self, sql: &str) {
        self.sql.push_str(sql);
    }

    fn bind(&mut self, name: impl Into<String>, value: impl ToString) {
        self.params.push((name.into(), value.to_string()));
    }

    /// Value bound to `name`, if any.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Timestamp in the text form accepted for `DateTime64(3, 'UTC')` parameters.
fn time_param(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M:%S%.3f").to_string()
}

fn nanos_param(nanos: i64) -> String {
    time_param(DateTime::<Utc>::from_timestamp_nanos(nanos))
}

const TEST_COLUMNS: &str =
    "SELECT id, toUnixTimestamp64Nano(toDateTime64(ts, 9)) AS ts_ns, name, params FROM ";

pub fn tests_query(table: &str, filter: &TestFilter) -> Result<Query, StatError> {
    if filter.from < 0 {
        return Err(StatError::invalid_from());
    }
    if filter.until < 0 {
        return Err(StatError::invalid_until());
    }

    let mut query = Query::new(TEST_COLUMNS);
    query.push(table);

    let mut conditions = Vec::with_capacity(3);
    if filter.from > 0 {
        let from =
            DateTime::<Utc>::from_timestamp(filter.from, 0).ok_or_else(StatError::invalid_from)?;
        conditions.push("ts >= {from:DateTime64(3, 'UTC')}");
        query.bind("from", time_param(from));
    }
    if filter.until > 0 {
        let until =
            DateTime::<Utc>::from_timestamp(filter.until, 0).ok_or_else(StatError::invalid_until)?;
        conditions.push("ts < {until:DateTime64(3, 'UTC')}");
        query.bind("until", time_param(until));
    }
    if !filter.name.is_empty() {
        conditions.push("name LIKE {name:String}");
        query.bind("name", &filter.name);
    }
    if !conditions.is_empty() {
        query.push(" WHERE ");
        query.push(&conditions.join(" AND "));
    }

    query.push(" ORDER BY id, ts, name");
    Ok(query)
}

pub fn test_by_id_query(table: &str, filter: &TestIdFilter) -> Query {
    let mut query = Query::new(TEST_COLUMNS);
    query.push(table);
    query.push(" WHERE ts = {time:DateTime64(3, 'UTC')} AND id = {id:UInt64}");
    query.push(" ORDER BY id, ts, name");
    query.bind("time", nanos_param(filter.time));
    query.bind("id", filter.id);
    query
}

/// Conditions shared by both sample queries, after `WHERE id = .. AND start = ..`.
fn push_sample_conditions(query: &mut Query, filter: &SampleFilter) {
    if !filter.label.is_empty() {
        query.push(" AND label LIKE {label:String}");
        query.bind("label", &filter.label);
    }
    if !filter.url.is_empty() {
        query.push(" AND url LIKE {url:String}");
        query.bind("url", &filter.url);
    }
    for (i, pattern) in filter.skip_patterns().enumerate() {
        let name = format!("skip_url_{i}");
        query.push(&format!(" AND url NOT LIKE {{{name}:String}}"));
        query.bind(name, pattern);
    }
}

fn sample_query(select: &str, table: &str, metric: &str, filter: &SampleFilter) -> Query {
    let mut query = Query::new(select);
    query.push(table);
    query.push(
        " WHERE id = {id:UInt64} AND start = {start:DateTime64(3, 'UTC')} AND metric = {metric:String}",
    );
    query.bind("id", filter.id);
    query.bind("start", nanos_param(filter.start));
    query.bind("metric", metric);
    push_sample_conditions(&mut query, filter);
    query
}

pub fn durations_query(table: &str, filter: &SampleFilter) -> Query {
    let mut query = sample_query(
        "SELECT id, toUnixTimestamp64Nano(toDateTime64(start, 9)) AS start_ns, label, url, \
         quantiles(0.5, 0.9, 0.95, 0.99)(value) AS q, max(value) AS max FROM ",
        table,
        METRIC_DURATION,
        filter,
    );
    query.push(" GROUP BY id, start, label, url ORDER BY label, url");
    query
}

pub fn status_query(table: &str, filter: &SampleFilter) -> Query {
    let mut query = sample_query(
        "SELECT id, toUnixTimestamp64Nano(toDateTime64(start, 9)) AS start_ns, label, url, \
         status, sum(value) AS count FROM ",
        table,
        METRIC_REQS,
        filter,
    );
    query.push(" GROUP BY id, start, label, url, status ORDER BY label, url, status");
    query
}
