// ABOUTME: Opens TLS-capable tokio-postgres connections to the destination
// ABOUTME: Holds the process-wide TLS policy and retries transient connect failures

use anyhow::{Context, Result};
use native_tls::TlsConnector;
use postgres_native_tls::MakeTlsConnector;
use std::sync::OnceLock;
use std::time::Duration;
use tokio_postgres::Client;

use crate::utils::{retry_with_backoff, sanitize_url, validate_connection_string};

static ALLOW_SELF_SIGNED: OnceLock<bool> = OnceLock::new();

/// Record whether self-signed certificates are accepted. Only the first call wins.
pub fn init_tls_policy(allow_self_signed: bool) {
    let _ = ALLOW_SELF_SIGNED.set(allow_self_signed);
    if allow_self_signed {
        tracing::warn!("TLS certificate verification is disabled for destination connections");
    }
}

fn allow_self_signed() -> bool {
    ALLOW_SELF_SIGNED.get().copied().unwrap_or(false)
}

/// Connect to PostgreSQL and drive the connection on a background task.
pub async fn connect(url: &str) -> Result<Client> {
    validate_connection_string(url)?;

    let tls = TlsConnector::builder()
        .danger_accept_invalid_certs(allow_self_signed())
        .build()
        .context("Failed to build TLS connector")?;
    let tls = MakeTlsConnector::new(tls);

    let (client, connection) = tokio_postgres::connect(url, tls)
        .await
        .with_context(|| format!("Failed to connect to {}", sanitize_url(url)))?;

    tokio::spawn(async move {
        if let Err(e) = connection.await {
            tracing::error!("PostgreSQL connection error: {}", e);
        }
    });

    Ok(client)
}

/// Connect with up to three retries (1s, 2s, 4s).
pub async fn connect_with_retry(url: &str) -> Result<Client> {
    retry_with_backoff(|| connect(url), 3, Duration::from_secs(1))
        .await
        .context("Failed to connect to destination database after retries")
}
