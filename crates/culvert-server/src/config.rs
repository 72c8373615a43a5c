//! Server configuration from environment variables.

use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result};
use culvert_transport::TransportKind;

/// Server configuration
#[derive(Debug)]
pub struct ServerConfig {
    /// Path to the SQLite catalog
    pub db_path: PathBuf,
    /// Address to bind the client-facing listener on
    pub address: String,
    /// Port to bind the client-facing listener on
    pub port: u16,
    /// Which transport binding to accept
    pub transport: TransportKind,
    /// Path of the local control socket
    pub control_socket: PathBuf,
    /// TLS settings
    pub tls: TlsConfig,
}

/// TLS settings for the client-facing listener
#[derive(Debug)]
pub struct TlsConfig {
    pub enabled: bool,
    pub cert_file: PathBuf,
    pub key_file: PathBuf,
    /// CA used to verify client certificates; enables mutual TLS when set
    pub ca_file: Option<PathBuf>,
}

impl ServerConfig {
    /// Load configuration from the environment.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            db_path: get_env("DB_PATH", "culvert.db").into(),
            address: get_env("SERVER_ADDRESS", "0.0.0.0"),
            port: get_env_parse("SERVER_PORT", 50051)?,
            transport: get_env("TRANSPORT", "framed")
                .parse::<TransportKind>()
                .map_err(|e| anyhow::anyhow!("Invalid TRANSPORT: {}", e))?,
            control_socket: get_env("CONTROL_SOCKET", "/tmp/culvert.sock").into(),
            tls: TlsConfig {
                enabled: get_env_bool("TLS_ENABLED", false),
                cert_file: get_env("TLS_CERT_FILE", "./certs/server.crt").into(),
                key_file: get_env("TLS_KEY_FILE", "./certs/server.key").into(),
                ca_file: env::var("TLS_CA_FILE").ok().filter(|v| !v.is_empty()).map(Into::into),
            },
        })
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_apply_when_unset() {
        env::remove_var("CULVERT_TEST_UNSET");
        assert_eq!(get_env("CULVERT_TEST_UNSET", "fallback"), "fallback");
        assert!(!get_env_bool("CULVERT_TEST_UNSET", false));
        assert_eq!(get_env_parse::<u16>("CULVERT_TEST_UNSET", 7).unwrap(), 7);
    }

    #[test]
    fn test_bool_parsing() {
        env::set_var("CULVERT_TEST_BOOL", "1");
        assert!(get_env_bool("CULVERT_TEST_BOOL", false));
        env::set_var("CULVERT_TEST_BOOL", "true");
        assert!(get_env_bool("CULVERT_TEST_BOOL", false));
        env::set_var("CULVERT_TEST_BOOL", "no");
        assert!(!get_env_bool("CULVERT_TEST_BOOL", true));
        env::remove_var("CULVERT_TEST_BOOL");
    }

    #[test]
    fn test_invalid_port_is_an_error() {
        env::set_var("CULVERT_TEST_PORT", "not-a-port");
        assert!(get_env_parse::<u16>("CULVERT_TEST_PORT", 1).is_err());
        env::remove_var("CULVERT_TEST_PORT");
    }
}
