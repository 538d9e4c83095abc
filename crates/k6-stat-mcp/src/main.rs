mod protocol;
mod server;
mod tools;

use tokio::io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing_subscriber::EnvFilter;

use k6_stat_core::{ClickhouseClient, StoreConfig};

async fn write_line<W: AsyncWriteExt + Unpin>(out: &mut W, line: &str) -> std::io::Result<()> {
    out.write_all(line.as_bytes()).await?;
    out.write_all(b"\n").await?;
    out.flush().await
}

#[tokio::main]
async fn main() {
    // stdout carries the protocol, logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();

    let config = match StoreConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "invalid storage configuration");
            std::process::exit(1);
        }
    };
    let client = match ClickhouseClient::from_config(&config) {
        Ok(client) => client,
        Err(e) => {
            tracing::error!(error = %e, "failed to create storage client");
            std::process::exit(1);
        }
    };

    tracing::info!(
        dsn = %config.dsn(),
        protocol = server::PROTOCOL_VERSION,
        "k6-stat-mcp server starting"
    );

    let server = server::McpServer::new(client);
    let mut reader = BufReader::new(io::stdin());
    let mut stdout = io::stdout();
    let mut line = String::new();

    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => {
                tracing::info!("stdin closed, shutting down");
                break;
            }
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }

                let response = match serde_json::from_str::<protocol::JsonRpcRequest>(trimmed) {
                    Ok(request) => match server.handle_request(request).await {
                        Some(response) => response,
                        None => continue,
                    },
                    Err(e) => protocol::JsonRpcResponse::parse_error(&e),
                };

                let out = match serde_json::to_string(&response) {
                    Ok(s) => s,
                    Err(e) => {
                        tracing::error!(error = %e, "failed to serialize response");
                        continue;
                    }
                };
                if let Err(e) = write_line(&mut stdout, &out).await {
                    tracing::error!(error = %e, "stdout write error");
                    break;
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "stdin read error");
                break;
            }
        }
    }
}
