use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use tokio::sync::Semaphore;

use super::query::{self, Query};
use super::{single_test, SampleFilter, SampleSource, TestFilter, TestIdFilter};
use crate::config::StoreConfig;
use crate::error::StatError;
use crate::samples::{SampleQuantiles, SampleStatus, Test};

/// [`SampleSource`] backed by the ClickHouse HTTP interface.
///
/// At most `max_conn` queries are in flight at once.
pub struct ClickhouseClient {
    inner: reqwest::Client,
    endpoint: String,
    database: String,
    user: Option<String>,
    password: Option<String>,
    settings: Vec<(String, String)>,
    tests_table: String,
    samples_table: String,
    permits: Arc<Semaphore>,
}

/// Builder for [`ClickhouseClient`].
pub struct ClickhouseClientBuilder {
    address: String,
    database: String,
    user: Option<String>,
    password: Option<String>,
    connect_timeout: Duration,
    timeout: Duration,
    settings: Vec<(String, String)>,
    max_conn: usize,
    tests_table: String,
    samples_table: String,
    user_agent: String,
}

impl Default for ClickhouseClientBuilder {
    fn default() -> Self {
        let config = StoreConfig::default();
        Self {
            address: config.address,
            database: config.database,
            user: None,
            password: None,
            connect_timeout: Duration::from_millis(200),
            timeout: Duration::from_secs(90),
            settings: Vec::new(),
            max_conn: config.max_conn,
            tests_table: config.tests_table,
            samples_table: config.samples_table,
            user_agent: format!("k6-stat/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl ClickhouseClientBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a validated [`StoreConfig`].
    pub fn from_config(config: &StoreConfig) -> Result<Self, StatError> {
        config.validate()?;
        let params = config.connection_params()?;
        let mut builder = Self {
            address: config.address.clone(),
            database: config.database.clone(),
            user: config.user.clone(),
            password: config.password.clone(),
            settings: params.settings,
            max_conn: config.max_conn,
            tests_table: config.tests_table.clone(),
            samples_table: config.samples_table.clone(),
            ..Self::default()
        };
        if let Some(timeout) = params.connect_timeout {
            builder.connect_timeout = timeout;
        }
        Ok(builder)
    }

    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.address = address.into();
        self
    }

    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    pub fn credentials(mut self, user: impl Into<String>, password: Option<String>) -> Self {
        self.user = Some(user.into());
        self.password = password;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Add a server setting sent with every query.
    pub fn setting(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.settings.push((name.into(), value.into()));
        self
    }

    pub fn max_conn(mut self, n: usize) -> Self {
        self.max_conn = n;
        self
    }

    pub fn tables(mut self, tests: impl Into<String>, samples: impl Into<String>) -> Self {
        self.tests_table = tests.into();
        self.samples_table = samples.into();
        self
    }

    pub fn build(self) -> Result<ClickhouseClient, StatError> {
        if self.max_conn == 0 {
            return Err(StatError::Config("invalid max connections".to_string()));
        }

        let client = reqwest::Client::builder()
            .connect_timeout(self.connect_timeout)
            .timeout(self.timeout)
            .pool_max_idle_per_host(self.max_conn)
            .user_agent(self.user_agent)
            .gzip(true)
            .build()?;

        let endpoint = format!("{}/", self.address.trim_end_matches('/'));
        tracing::debug!(%endpoint, database = %self.database, "clickhouse client ready");

        Ok(ClickhouseClient {
            inner: client,
            endpoint,
            database: self.database,
            user: self.user,
            password: self.password,
            settings: self.settings,
            tests_table: self.tests_table,
            samples_table: self.samples_table,
            permits: Arc::new(Semaphore::new(self.max_conn)),
        })
    }
}

impl ClickhouseClient {
    pub fn builder() -> ClickhouseClientBuilder {
        ClickhouseClientBuilder::new()
    }

    pub fn from_config(config: &StoreConfig) -> Result<Self, StatError> {
        ClickhouseClientBuilder::from_config(config)?.build()
    }

    pub fn tests_table(&self) -> &str {
        &self.tests_table
    }

    pub fn samples_table(&self) -> &str {
        &self.samples_table
    }

    /// URL query pairs for one request: connection settings, then bound
    /// parameters as `param_<name>`.
    fn request_params(&self, query: &Query, query_id: &str) -> Vec<(String, String)> {
        let mut params = Vec::with_capacity(3 + self.settings.len() + query.params.len());
        params.push(("database".to_string(), self.database.clone()));
        params.push(("query_id".to_string(), query_id.to_string()));
        params.push((
            "output_format_json_quote_64bit_integers".to_string(),
            "0".to_string(),
        ));
        params.extend(self.settings.iter().cloned());
        params.extend(
            query
                .params
                .iter()
                .map(|(name, value)| (format!("param_{name}"), value.clone())),
        );
        params
    }

    /// Run `query` and decode one `T` per returned row.
    async fn fetch<T: DeserializeOwned>(&self, query: &Query) -> Result<Vec<T>, StatError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|e| StatError::query(e.to_string(), &query.sql, 500))?;

        let query_id = uuid::Uuid::new_v4().to_string();
        tracing::debug!(%query_id, sql = %query.sql, "executing query");

        let mut request = self
            .inner
            .post(&self.endpoint)
            .query(&self.request_params(query, &query_id))
            .body(format!("{} FORMAT JSONEachRow", query.sql));
        if let Some(user) = &self.user {
            request = request.basic_auth(user, self.password.as_deref());
        }

        let result = async {
            let response = request
                .send()
                .await
                .map_err(|e| transport_error(e, &query.sql))?;
            let status = response.status();
            let body = response
                .text()
                .await
                .map_err(|e| transport_error(e, &query.sql))?;
            if !status.is_success() {
                return Err(StatError::query(body.trim(), &query.sql, status.as_u16()));
            }
            decode_rows(&body)
                .map_err(|e| StatError::query(format!("decode rows: {e}"), &query.sql, 500))
        }
        .await;

        if let Err(e) = &result {
            tracing::error!(%query_id, sql = %query.sql, error = %e, "query failed");
        }
        result
    }
}

fn transport_error(e: reqwest::Error, sql: &str) -> StatError {
    let status = if e.is_connect() || e.is_timeout() {
        503
    } else {
        500
    };
    StatError::query(e.to_string(), sql, status)
}

/// Decode a `JSONEachRow` body, one object per line.
pub(crate) fn decode_rows<T: DeserializeOwned>(body: &str) -> Result<Vec<T>, serde_json::Error> {
    body.lines()
        .filter(|line| !line.trim().is_empty())
        .map(serde_json::from_str)
        .collect()
}

// ---------------------------------------------------------------------------
// Row shapes
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct TestRow {
    id: u64,
    ts_ns: i64,
    name: String,
    params: String,
}

impl From<TestRow> for Test {
    fn from(row: TestRow) -> Self {
        Test {
            id: row.id,
            ts: DateTime::<Utc>::from_timestamp_nanos(row.ts_ns),
            name: row.name,
            params: row.params,
        }
    }
}

#[derive(Debug, Deserialize)]
struct DurationsRow {
    id: u64,
    start_ns: i64,
    label: String,
    url: String,
    /// p50, p90, p95, p99. NaN arrives as `null`.
    q: Vec<Option<f64>>,
    max: Option<f64>,
}

impl From<DurationsRow> for SampleQuantiles {
    fn from(row: DurationsRow) -> Self {
        let q = |i: usize| row.q.get(i).copied().flatten().unwrap_or(0.0);
        SampleQuantiles {
            id: row.id,
            start: DateTime::<Utc>::from_timestamp_nanos(row.start_ns),
            p50: q(0),
            p90: q(1),
            p95: q(2),
            p99: q(3),
            max: row.max.unwrap_or(0.0),
            label: row.label,
            url: row.url,
        }
    }
}

#[derive(Debug, Deserialize)]
struct StatusRow {
    id: u64,
    start_ns: i64,
    label: String,
    url: String,
    #[serde(deserialize_with = "string_or_number")]
    status: String,
    count: f64,
}

impl From<StatusRow> for SampleStatus {
    fn from(row: StatusRow) -> Self {
        SampleStatus {
            id: row.id,
            start: DateTime::<Utc>::from_timestamp_nanos(row.start_ns),
            label: row.label,
            url: row.url,
            status: row.status,
            count: row.count,
        }
    }
}

/// Status columns may be stored as text or as an integer.
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "invalid status value {other}"
        ))),
    }
}

// ---------------------------------------------------------------------------
// SampleSource
// ---------------------------------------------------------------------------

impl SampleSource for ClickhouseClient {
    async fn get_tests(&self, filter: &TestFilter) -> Result<Vec<Test>, StatError> {
        let query = query::tests_query(&self.tests_table, filter)?;
        let rows: Vec<TestRow> = self.fetch(&query).await?;
        Ok(rows.into_iter().map(Test::from).collect())
    }

    async fn get_test_by_id(&self, filter: &TestIdFilter) -> Result<Test, StatError> {
        let query = query::test_by_id_query(&self.tests_table, filter);
        let rows: Vec<TestRow> = self.fetch(&query).await?;
        single_test(rows.into_iter().map(Test::from).collect(), &query.sql)
    }

    async fn get_http_samples_durations(
        &self,
        filter: &SampleFilter,
    ) -> Result<Vec<SampleQuantiles>, StatError> {
        let query = query::durations_query(&self.samples_table, filter);
        let rows: Vec<DurationsRow> = self.fetch(&query).await?;
        Ok(rows.into_iter().map(SampleQuantiles::from).collect())
    }

    async fn get_http_samples_status(
        &self,
        filter: &SampleFilter,
    ) -> Result<Vec<SampleStatus>, StatError> {
        let query = query::status_query(&self.samples_table, filter);
        let rows: Vec<StatusRow> = self.fetch(&query).await?;
        Ok(rows.into_iter().map(SampleStatus::from).collect())
    }
}
