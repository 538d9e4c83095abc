use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum StatError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("{0} not a sortBy key")]
    InvalidSortBy(String),

    /// A storage query failed. `status` follows HTTP semantics: 400 for bad
    /// filter input, 503 when the database is unreachable, 500 otherwise.
    #[error("Query error: {message}")]
    Query {
        message: String,
        sql: String,
        status: u16,
    },

    #[error("Not selected: {0}")]
    NotSelected(String),

    #[error("Config error: {0}")]
    Config(String),
}

impl StatError {
    pub fn query(message: impl Into<String>, sql: impl Into<String>, status: u16) -> Self {
        StatError::Query {
            message: message.into(),
            sql: sql.into(),
            status,
        }
    }

    pub fn invalid_from() -> Self {
        Self::query("invalid from", "", 400)
    }

    pub fn invalid_until() -> Self {
        Self::query("invalid until", "", 400)
    }

    /// SQL text of a failed query, if any.
    pub fn sql(&self) -> Option<&str> {
        match self {
            StatError::Query { sql, .. } if !sql.is_empty() => Some(sql),
            _ => None,
        }
    }

    /// HTTP-like status code for reporting the error to a remote caller.
    pub fn status_code(&self) -> u16 {
        match self {
            StatError::Query { status, .. } => *status,
            StatError::Validation(_) | StatError::InvalidSortBy(_) => 400,
            StatError::NotSelected(_) => 409,
            StatError::Http(e) if e.is_connect() || e.is_timeout() => 503,
            _ => 500,
        }
    }
}

impl Serialize for StatError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}
