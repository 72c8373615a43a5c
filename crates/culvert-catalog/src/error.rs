use thiserror::Error;

/// Catalog store failures
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),

    #[error("invalid port: {0}")]
    InvalidPort(u32),

    #[error("failed to create catalog directory: {0}")]
    CreateDir(std::io::Error),
}

/// Client validation outcomes that are not store failures
#[derive(Debug, Error)]
pub enum ValidateError {
    #[error("client not found: {0}")]
    UnknownClient(String),

    #[error("client blocked: {0}")]
    Blocked(String),

    #[error("invalid key for client: {0}")]
    InvalidSecret(String),

    #[error(transparent)]
    Catalog(#[from] CatalogError),
}
