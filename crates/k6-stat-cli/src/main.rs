mod shell;

use std::process::ExitCode;

use clap::Parser;
use tokio::io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing_subscriber::EnvFilter;

use k6_stat_core::config::{
    DEFAULT_DB, DEFAULT_DB_ADDR, DEFAULT_DB_PARAM, DEFAULT_MAX_CONN, DEFAULT_TABLE_SAMPLES,
    DEFAULT_TABLE_TESTS, ENV_DB, ENV_DB_ADDR, ENV_DB_MAX_CONN, ENV_DB_PARAM, ENV_DB_PASSWORD,
    ENV_DB_USER, ENV_TABLE_SAMPLES, ENV_TABLE_TESTS,
};
use k6_stat_core::{ClickhouseClient, StoreConfig};

use crate::shell::{Flow, Shell};

const PROMPT: &str = "k6-stat> ";

/// Inspect and compare k6 test runs stored in ClickHouse.
#[derive(Parser, Debug)]
#[command(name = "k6-stat-cli", version)]
struct Cli {
    /// Database address
    #[arg(short = 'a', long, env = ENV_DB_ADDR, default_value = DEFAULT_DB_ADDR)]
    address: String,
    /// Database name
    #[arg(short = 'd', long = "db", env = ENV_DB, default_value = DEFAULT_DB)]
    database: String,
    /// Connection params
    #[arg(short = 'p', long, env = ENV_DB_PARAM, default_value = DEFAULT_DB_PARAM)]
    params: String,
    /// Tests table
    #[arg(short = 't', long = "tests", env = ENV_TABLE_TESTS, default_value = DEFAULT_TABLE_TESTS)]
    tests_table: String,
    /// Samples table
    #[arg(short = 's', long = "samples", env = ENV_TABLE_SAMPLES, default_value = DEFAULT_TABLE_SAMPLES)]
    samples_table: String,
    /// Max concurrent database queries
    #[arg(long, env = ENV_DB_MAX_CONN, default_value_t = DEFAULT_MAX_CONN)]
    max_conn: usize,
    /// Database user
    #[arg(long, env = ENV_DB_USER)]
    user: Option<String>,
    /// Database password
    #[arg(long, env = ENV_DB_PASSWORD, hide_env_values = true)]
    password: Option<String>,
}

impl Cli {
    fn store_config(&self) -> StoreConfig {
        StoreConfig {
            address: self.address.clone(),
            database: self.database.clone(),
            params: self.params.clone(),
            tests_table: self.tests_table.clone(),
            samples_table: self.samples_table.clone(),
            max_conn: self.max_conn,
            user: self.user.clone().filter(|u| !u.is_empty()),
            password: self.password.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();

    let config = cli.store_config();
    let client = match ClickhouseClient::from_config(&config) {
        Ok(client) => client,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };
    tracing::debug!(dsn = %config.dsn(), "connected");

    let mut shell = Shell::new(client);
    let mut reader = BufReader::new(io::stdin());
    let mut stdout = io::stdout();
    let mut line = String::new();

    loop {
        if stdout.write_all(PROMPT.as_bytes()).await.is_err() || stdout.flush().await.is_err() {
            break;
        }
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => {
                // EOF behaves like exit
                println!();
                break;
            }
            Ok(_) => {
                if shell.run_line(line.trim()).await == Flow::Exit {
                    break;
                }
            }
            Err(e) => {
                eprintln!("Error reading line: {e}");
                return ExitCode::FAILURE;
            }
        }
    }
    ExitCode::SUCCESS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_flags() {
        let cli = Cli::try_parse_from([
            "k6-stat-cli",
            "-a",
            "http://ch:8123",
            "--db",
            "k6",
            "-t",
            "tests",
            "-s",
            "samples",
            "--max-conn",
            "3",
            "--user",
            "reader",
        ])
        .expect("flags should parse");
        let config = cli.store_config();
        assert_eq!(config.address, "http://ch:8123");
        assert_eq!(config.database, "k6");
        assert_eq!(config.tests_table, "tests");
        assert_eq!(config.samples_table, "samples");
        assert_eq!(config.max_conn, 3);
        assert_eq!(config.user.as_deref(), Some("reader"));
        assert_eq!(config.validate().map_err(|e| e.to_string()), Ok(()));
    }
}
