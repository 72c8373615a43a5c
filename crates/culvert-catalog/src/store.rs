use std::path::Path;
use std::time::Duration;

use sha2::{Digest, Sha256};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use subtle::ConstantTimeEq;

use crate::error::{CatalogError, ValidateError};
use crate::records::{ClientRecord, ClientStatus, ClientSummary, PortMapping};

/// Embedded schema, applied idempotently at open.
const SCHEMA: &str = include_str!("schema.sql");

/// Hash a client secret the way the catalog stores it: lowercase hex SHA-256.
pub fn hash_secret(secret: &str) -> String {
    hex::encode(Sha256::digest(secret.as_bytes()))
}

/// Read-mostly view of clients and port mappings, backed by SQLite.
///
/// The pool is limited to a single connection; at runtime the server only
/// reads, apart from best-effort last-seen updates.
#[derive(Clone)]
pub struct Catalog {
    pool: SqlitePool,
}

impl Catalog {
    /// Open (and if necessary create) the catalog at `path`.
    pub async fn open(path: &Path) -> Result<Self, CatalogError> {
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir).map_err(CatalogError::CreateDir)?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5))
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let catalog = Self { pool };
        catalog.bootstrap().await?;
        Ok(catalog)
    }

    /// Open an in-memory catalog, used by tests.
    pub async fn open_in_memory() -> Result<Self, CatalogError> {
        let options = SqliteConnectOptions::new()
            .in_memory(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let catalog = Self { pool };
        catalog.bootstrap().await?;
        Ok(catalog)
    }

    async fn bootstrap(&self) -> Result<(), CatalogError> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }

    /// Fetch a client by id.
    pub async fn client(&self, client_id: &str) -> Result<Option<ClientRecord>, CatalogError> {
        let record = sqlx::query_as::<_, ClientRecord>(
            r#"
            SELECT client_id, client_name, key_hash, status, created_at, last_seen_at
            FROM clients
            WHERE client_id = ?
            "#,
        )
        .bind(client_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    /// Validate a client id and secret.
    ///
    /// The stored hash comparison is constant-time.
    pub async fn validate_client(
        &self,
        client_id: &str,
        secret: &str,
    ) -> Result<ClientRecord, ValidateError> {
        let client = self.active_client(client_id).await?;

        let presented = hash_secret(secret);
        if bool::from(presented.as_bytes().ct_eq(client.key_hash.as_bytes())) {
            Ok(client)
        } else {
            Err(ValidateError::InvalidSecret(client_id.to_string()))
        }
    }

    /// Validate a client by id only (for transports whose handshake already
    /// proved the caller's identity).
    pub async fn validate_client_by_id(
        &self,
        client_id: &str,
    ) -> Result<ClientRecord, ValidateError> {
        self.active_client(client_id).await
    }

    async fn active_client(&self, client_id: &str) -> Result<ClientRecord, ValidateError> {
        let client = self
            .client(client_id)
            .await
            .map_err(ValidateError::Catalog)?
            .ok_or_else(|| ValidateError::UnknownClient(client_id.to_string()))?;

        if !client.is_active() {
            return Err(ValidateError::Blocked(client_id.to_string()));
        }

        Ok(client)
    }

    /// Best-effort last-seen update; callers log failures and move on.
    pub async fn touch_last_seen(&self, client_id: &str) -> Result<(), CatalogError> {
        sqlx::query("UPDATE clients SET last_seen_at = datetime('now') WHERE client_id = ?")
            .bind(client_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// All enabled port mappings for a client, ordered by exposed port.
    pub async fn enabled_ports(&self, client_id: &str) -> Result<Vec<PortMapping>, CatalogError> {
        let ports = sqlx::query_as::<_, PortMapping>(
            r#"
            SELECT id, client_id, exposed_port, target_host, target_port, proto, enabled
            FROM client_ports
            WHERE client_id = ? AND enabled = 1
            ORDER BY exposed_port
            "#,
        )
        .bind(client_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(ports)
    }

    /// Register a new client with an already-hashed or plain secret.
    pub async fn create_client(
        &self,
        client_id: &str,
        client_name: &str,
        secret: &str,
    ) -> Result<(), CatalogError> {
        sqlx::query("INSERT INTO clients (client_id, client_name, key_hash) VALUES (?, ?, ?)")
            .bind(client_id)
            .bind(client_name)
            .bind(hash_secret(secret))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Remove a client; cascades to its port mappings. Returns whether a row
    /// was deleted.
    pub async fn delete_client(&self, client_id: &str) -> Result<bool, CatalogError> {
        let result = sqlx::query("DELETE FROM clients WHERE client_id = ?")
            .bind(client_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn set_client_status(
        &self,
        client_id: &str,
        status: ClientStatus,
    ) -> Result<bool, CatalogError> {
        let result = sqlx::query("UPDATE clients SET status = ? WHERE client_id = ?")
            .bind(status.as_str())
            .bind(client_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn set_client_key(&self, client_id: &str, secret: &str) -> Result<bool, CatalogError> {
        let result = sqlx::query("UPDATE clients SET key_hash = ? WHERE client_id = ?")
            .bind(hash_secret(secret))
            .bind(client_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn list_clients(&self) -> Result<Vec<ClientSummary>, CatalogError> {
        let clients = sqlx::query_as::<_, ClientSummary>(
            r#"
            SELECT client_id, client_name, status, created_at, last_seen_at,
                   (SELECT COUNT(*) FROM client_ports
                    WHERE client_ports.client_id = clients.client_id) AS port_count
            FROM clients
            ORDER BY client_name
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(clients)
    }

    /// Add a port mapping. The target host defaults to loopback.
    pub async fn add_port(
        &self,
        client_id: &str,
        exposed_port: u16,
        target_host: Option<&str>,
        target_port: u16,
    ) -> Result<i64, CatalogError> {
        if exposed_port == 0 {
            return Err(CatalogError::InvalidPort(exposed_port as u32));
        }
        if target_port == 0 {
            return Err(CatalogError::InvalidPort(target_port as u32));
        }

        let target_host = match target_host {
            Some(host) if !host.is_empty() => host,
            _ => "127.0.0.1",
        };

        let result = sqlx::query(
            r#"
            INSERT INTO client_ports (client_id, exposed_port, target_host, target_port)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(client_id)
        .bind(exposed_port)
        .bind(target_host)
        .bind(target_port)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    pub async fn remove_port(&self, port_id: i64) -> Result<bool, CatalogError> {
        let result = sqlx::query("DELETE FROM client_ports WHERE id = ?")
            .bind(port_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn set_port_enabled(&self, port_id: i64, enabled: bool) -> Result<bool, CatalogError> {
        let result = sqlx::query("UPDATE client_ports SET enabled = ? WHERE id = ?")
            .bind(enabled)
            .bind(port_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// List port mappings, optionally restricted to one client.
    pub async fn list_ports(
        &self,
        client_id: Option<&str>,
    ) -> Result<Vec<PortMapping>, CatalogError> {
        let ports = match client_id {
            Some(id) => {
                sqlx::query_as::<_, PortMapping>(
                    r#"
                    SELECT id, client_id, exposed_port, target_host, target_port, proto, enabled
                    FROM client_ports
                    WHERE client_id = ?
                    ORDER BY exposed_port
                    "#,
                )
                .bind(id)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, PortMapping>(
                    r#"
                    SELECT id, client_id, exposed_port, target_host, target_port, proto, enabled
                    FROM client_ports
                    ORDER BY client_id, exposed_port
                    "#,
                )
                .fetch_all(&self.pool)
                .await?
            }
        };

        Ok(ports)
    }
}
