//! Agent configuration from environment variables.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use culvert_transport::TransportKind;

/// Agent configuration
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Server `host:port`
    pub server_address: String,
    /// Identity presented to the server
    pub client_id: String,
    /// Shared secret; proved on the WebSocket transport
    pub auth_token: String,
    /// Base delay between reconnect attempts (scaled by attempt number)
    pub reconnect_delay: Duration,
    /// Give up after this many consecutive failed attempts
    pub max_retries: u32,
    /// Which transport binding to dial
    pub transport: TransportKind,
    /// TLS settings
    pub tls: TlsConfig,
}

/// TLS settings for the connection to the server
#[derive(Debug, Clone)]
pub struct TlsConfig {
    pub enabled: bool,
    /// CA used to verify the server certificate
    pub ca_file: PathBuf,
    /// Client certificate pair for mutual TLS, when both are set
    pub cert_file: Option<PathBuf>,
    pub key_file: Option<PathBuf>,
}

impl AgentConfig {
    /// Load configuration from the environment.
    ///
    /// `AUTH_TOKEN` is required: an agent without a secret must not start.
    pub fn from_env() -> Result<Self> {
        let auth_token = env::var("AUTH_TOKEN").unwrap_or_default();
        if auth_token.is_empty() {
            anyhow::bail!("AUTH_TOKEN environment variable is required");
        }

        Ok(Self {
            server_address: get_env("SERVER_ADDRESS", "localhost:50051"),
            client_id: get_env("CLIENT_ID", "client-001"),
            auth_token,
            reconnect_delay: Duration::from_secs(get_env_parse("RECONNECT_DELAY", 5u64)?),
            max_retries: get_env_parse("MAX_RETRIES", 10)?,
            transport: get_env("TRANSPORT", "framed")
                .parse::<TransportKind>()
                .map_err(|e| anyhow::anyhow!("Invalid TRANSPORT: {}", e))?,
            tls: TlsConfig {
                enabled: get_env_bool("TLS_ENABLED", false),
                ca_file: get_env("TLS_CA_FILE", "./certs/ca.crt").into(),
                cert_file: env::var("TLS_CERT_FILE").ok().filter(|v| !v.is_empty()).map(Into::into),
                key_file: env::var("TLS_KEY_FILE").ok().filter(|v| !v.is_empty()).map(Into::into),
            },
        })
    }

    /// Host part of the server address, for TLS name verification and the
    /// WebSocket URL.
    pub fn server_host(&self) -> &str {
        match self.server_address.rsplit_once(':') {
            Some((host, _port)) => host,
            None => &self.server_address,
        }
    }
}

fn get_env(key: &str, default: &str) -> String {
    match env::var(key) {
        Ok(value) if !value.is_empty() => value,
        _ => default.to_string(),
    }
}

fn get_env_bool(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(value) if !value.is_empty() => value == "true" || value == "1",
        _ => default,
    }
}

fn get_env_parse<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(value) if !value.is_empty() => value
            .parse()
            .with_context(|| format!("Invalid value for {}: {}", key, value)),
        _ => Ok(default),
    }
}
