use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::StatError;

pub const ENV_DB_ADDR: &str = "K6_STAT_DB_ADDR";
pub const ENV_DB: &str = "K6_STAT_DB";
pub const ENV_DB_PARAM: &str = "K6_STAT_DB_PARAM";
pub const ENV_DB_MAX_CONN: &str = "K6_STAT_DB_MAX_CONN";
pub const ENV_DB_USER: &str = "K6_STAT_DB_USER";
pub const ENV_DB_PASSWORD: &str = "K6_STAT_DB_PASSWORD";
pub const ENV_TABLE_TESTS: &str = "K6_STAT_TABLE_TESTS";
pub const ENV_TABLE_SAMPLES: &str = "K6_STAT_TABLE_SAMPLES";

pub const DEFAULT_DB_ADDR: &str = "http://localhost:8123";
pub const DEFAULT_DB: &str = "default";
pub const DEFAULT_DB_PARAM: &str = "dial_timeout=200ms&max_execution_time=60";
pub const DEFAULT_MAX_CONN: usize = 10;
pub const DEFAULT_TABLE_TESTS: &str = "k6_tests";
pub const DEFAULT_TABLE_SAMPLES: &str = "k6_samples";

/// Connection and table settings for the samples database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct StoreConfig {
    /// Base URL of the database HTTP interface.
    pub address: String,
    pub database: String,
    /// `key=value&...` connection parameters.
    pub params: String,
    pub tests_table: String,
    pub samples_table: String,
    pub max_conn: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_DB_ADDR.to_string(),
            database: DEFAULT_DB.to_string(),
            params: DEFAULT_DB_PARAM.to_string(),
            tests_table: DEFAULT_TABLE_TESTS.to_string(),
            samples_table: DEFAULT_TABLE_SAMPLES.to_string(),
            max_conn: DEFAULT_MAX_CONN,
            user: None,
            password: None,
        }
    }
}

/// Settings derived from [`StoreConfig::params`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnectionParams {
    pub connect_timeout: Option<Duration>,
    /// Remaining pairs, forwarded to the database as query settings.
    pub settings: Vec<(String, String)>,
}

impl StoreConfig {
    /// Read the configuration from the process environment.
    pub fn from_env() -> Result<Self, StatError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read the configuration through `lookup`. Missing or empty values fall
    /// back to the defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, StatError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str, default: &str| {
            lookup(key)
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| default.to_string())
        };

        let max_conn = match lookup(ENV_DB_MAX_CONN).filter(|v| !v.is_empty()) {
            Some(v) => v
                .trim()
                .parse::<usize>()
                .map_err(|e| StatError::Config(format!("invalid {ENV_DB_MAX_CONN} {v:?}: {e}")))?,
            None => DEFAULT_MAX_CONN,
        };

        let config = Self {
            address: get(ENV_DB_ADDR, DEFAULT_DB_ADDR),
            database: get(ENV_DB, DEFAULT_DB),
            params: get(ENV_DB_PARAM, DEFAULT_DB_PARAM),
            tests_table: get(ENV_TABLE_TESTS, DEFAULT_TABLE_TESTS),
            samples_table: get(ENV_TABLE_SAMPLES, DEFAULT_TABLE_SAMPLES),
            max_conn,
            user: lookup(ENV_DB_USER).filter(|v| !v.is_empty()),
            password: lookup(ENV_DB_PASSWORD).filter(|v| !v.is_empty()),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), StatError> {
        if self.max_conn == 0 {
            return Err(StatError::Config("invalid max connections".to_string()));
        }
        if self.address.is_empty() {
            return Err(StatError::Config("database address is empty".to_string()));
        }
        for table in [&self.tests_table, &self.samples_table] {
            if !is_identifier(table) {
                return Err(StatError::Config(format!("invalid table name {table:?}")));
            }
        }
        self.connection_params().map(|_| ())
    }

    /// Data source name in `address/database?params` form, for display.
    pub fn dsn(&self) -> String {
        let address = self.address.trim_end_matches('/');
        if self.params.is_empty() {
            format!("{address}/{}", self.database)
        } else {
            format!("{address}/{}?{}", self.database, self.params)
        }
    }

    pub fn connection_params(&self) -> Result<ConnectionParams, StatError> {
        let mut out = ConnectionParams::default();
        for pair in self.params.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| StatError::Config(format!("invalid connection param {pair:?}")))?;
            if key == "dial_timeout" {
                out.connect_timeout = Some(parse_duration(value)?);
            } else {
                out.settings.push((key.to_string(), value.to_string()));
            }
        }
        Ok(out)
    }
}

/// Table names are interpolated into SQL, so only `[A-Za-z0-9_.]` is allowed.
fn is_identifier(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
}

/// Parse a duration such as `200ms`, `5s` or `1m30s`.
pub fn parse_duration(value: &str) -> Result<Duration, StatError> {
    let invalid = || StatError::Config(format!("invalid duration {value:?}"));
    if value.is_empty() {
        return Err(invalid());
    }

    let mut total = Duration::ZERO;
    let mut rest = value;
    while !rest.is_empty() {
        let digits = rest
            .find(|c: char| !c.is_ascii_digit() && c != '.')
            .ok_or_else(invalid)?;
        if digits == 0 {
            return Err(invalid());
        }
        let number: f64 = rest[..digits].parse().map_err(|_| invalid())?;
        rest = &rest[digits..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit())
            .unwrap_or(rest.len());
        let scale = match &rest[..unit_len] {
            "ns" => 1e-9,
            "us" | "µs" => 1e-6,
            "ms" => 1e-3,
            "s" => 1.0,
            "m" => 60.0,
            "h" => 3600.0,
            _ => return Err(invalid()),
        };
        rest = &rest[unit_len..];
        let part = Duration::try_from_secs_f64(number * scale).map_err(|_| invalid())?;
        total = total.checked_add(part).ok_or_else(invalid)?;
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn empty_environment_gives_defaults() {
        let config = StoreConfig::from_lookup(|_| None).expect("defaults should be valid");
        assert_eq!(config, StoreConfig::default());
        assert_eq!(
            config.dsn(),
            "http://localhost:8123/default?dial_timeout=200ms&max_execution_time=60"
        );
    }

    #[test]
    fn environment_overrides_defaults() {
        let config = StoreConfig::from_lookup(lookup_from(&[
            (ENV_DB_ADDR, "http://ch:8123/"),
            (ENV_DB, "k6"),
            (ENV_DB_PARAM, ""),
            (ENV_TABLE_TESTS, "tests"),
            (ENV_TABLE_SAMPLES, "samples"),
            (ENV_DB_MAX_CONN, "3"),
            (ENV_DB_USER, "reader"),
        ]))
        .expect("config should be valid");

        assert_eq!(config.address, "http://ch:8123/");
        assert_eq!(config.database, "k6");
        // empty values fall back to defaults
        assert_eq!(config.params, DEFAULT_DB_PARAM);
        assert_eq!(config.tests_table, "tests");
        assert_eq!(config.samples_table, "samples");
        assert_eq!(config.max_conn, 3);
        assert_eq!(config.user.as_deref(), Some("reader"));
        assert!(config.password.is_none());
    }

    #[test]
    fn zero_max_conn_is_rejected() {
        let err = StoreConfig::from_lookup(lookup_from(&[(ENV_DB_MAX_CONN, "0")])).unwrap_err();
        assert_eq!(err.to_string(), "Config error: invalid max connections");
    }

    #[test]
    fn unparsable_max_conn_is_rejected() {
        let err = StoreConfig::from_lookup(lookup_from(&[(ENV_DB_MAX_CONN, "ten")])).unwrap_err();
        assert!(matches!(err, StatError::Config(_)));
    }

    #[test]
    fn suspicious_table_name_is_rejected() {
        let err = StoreConfig::from_lookup(lookup_from(&[(ENV_TABLE_SAMPLES, "x; DROP TABLE y")]))
            .unwrap_err();
        assert!(err.to_string().contains("invalid table name"));
    }

    #[test]
    fn connection_params_split_timeout_from_settings() {
        let config = StoreConfig::default();
        let params = config.connection_params().expect("params should parse");
        assert_eq!(params.connect_timeout, Some(Duration::from_millis(200)));
        assert_eq!(
            params.settings,
            vec![("max_execution_time".to_string(), "60".to_string())]
        );
    }

    #[test]
    fn connection_param_without_value_is_rejected() {
        let config = StoreConfig {
            params: "max_execution_time".to_string(),
            ..Default::default()
        };
        assert!(config.connection_params().is_err());
        assert!(config.validate().is_err());
    }

    #[test]
    fn password_is_never_serialized() {
        let config = StoreConfig {
            password: Some("secret".to_string()),
            ..Default::default()
        };
        let json = serde_json::to_string(&config).expect("serialize should succeed");
        assert!(!json.contains("secret"));
    }

    #[test]
    fn parse_duration_units() {
        assert_eq!(parse_duration("200ms").expect("ms"), Duration::from_millis(200));
        assert_eq!(parse_duration("5s").expect("s"), Duration::from_secs(5));
        assert_eq!(parse_duration("1m30s").expect("m+s"), Duration::from_secs(90));
        assert_eq!(parse_duration("2h").expect("h"), Duration::from_secs(7200));
        assert_eq!(parse_duration("1.5s").expect("fraction"), Duration::from_millis(1500));
    }

    #[test]
    fn parse_duration_rejects_garbage() {
        for bad in ["", "200", "ms", "5x", "1s2"] {
            assert!(parse_duration(bad).is_err(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn parse_duration_rejects_overflow() {
        let err = parse_duration("99999999999999999999999h").unwrap_err();
        assert!(matches!(err, StatError::Config(_)));
        // each part fits, the sum does not
        assert!(parse_duration(&format!("{}s{}s", u64::MAX, u64::MAX)).is_err());

        let config = StoreConfig {
            params: "dial_timeout=99999999999999999999999h".to_string(),
            ..StoreConfig::default()
        };
        assert!(matches!(config.connection_params(), Err(StatError::Config(_))));
    }
}
