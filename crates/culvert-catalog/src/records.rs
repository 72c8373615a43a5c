use sqlx::FromRow;

/// A registered client
#[derive(Debug, Clone, FromRow)]
pub struct ClientRecord {
    pub client_id: String,
    pub client_name: String,
    pub key_hash: String,
    pub status: String,
    pub created_at: String,
    pub last_seen_at: Option<String>,
}

impl ClientRecord {
    pub fn is_active(&self) -> bool {
        self.status == ClientStatus::Active.as_str()
    }
}

/// Client status as stored in the catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientStatus {
    Active,
    Blocked,
}

impl ClientStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClientStatus::Active => "active",
            ClientStatus::Blocked => "blocked",
        }
    }
}

/// A client row joined with its port count, for operator listings
#[derive(Debug, Clone, FromRow)]
pub struct ClientSummary {
    pub client_id: String,
    pub client_name: String,
    pub status: String,
    pub created_at: String,
    pub last_seen_at: Option<String>,
    pub port_count: i64,
}

/// A configured port mapping
#[derive(Debug, Clone, FromRow)]
pub struct PortMapping {
    pub id: i64,
    pub client_id: String,
    pub exposed_port: u16,
    pub target_host: String,
    pub target_port: u16,
    pub proto: String,
    pub enabled: bool,
}

impl PortMapping {
    /// The `host:port` the agent should dial for this mapping.
    pub fn target(&self) -> String {
        format!("{}:{}", self.target_host, self.target_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_formatting() {
        let mapping = PortMapping {
            id: 1,
            client_id: "c1".to_string(),
            exposed_port: 2222,
            target_host: "127.0.0.1".to_string(),
            target_port: 22,
            proto: "tcp".to_string(),
            enabled: true,
        };
        assert_eq!(mapping.target(), "127.0.0.1:22");
    }
}
