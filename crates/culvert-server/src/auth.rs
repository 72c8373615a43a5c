//! Client authentication against the catalog.
//!
//! Whatever the cause (missing credentials, unknown id, blocked client, bad
//! secret), the peer only ever observes its transport being closed; exact
//! causes are logged server-side.

use culvert_catalog::{Catalog, ClientRecord, ValidateError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing credentials")]
    MissingCredentials,

    #[error(transparent)]
    Rejected(#[from] ValidateError),
}

#[derive(Clone)]
pub struct Authenticator {
    catalog: Catalog,
}

impl Authenticator {
    pub fn new(catalog: Catalog) -> Self {
        Self { catalog }
    }

    /// Header bootstrap: the shared secret is proved against the stored
    /// hash (constant-time) and the last-seen timestamp is refreshed.
    pub async fn verify_token(
        &self,
        client_id: &str,
        token: &str,
    ) -> Result<ClientRecord, AuthError> {
        if client_id.is_empty() || token.is_empty() {
            return Err(AuthError::MissingCredentials);
        }

        let client = self.catalog.validate_client(client_id, token).await?;

        if let Err(e) = self.catalog.touch_last_seen(client_id).await {
            tracing::warn!("Failed to update last seen for {}: {}", client_id, e);
        }

        Ok(client)
    }

    /// In-band bootstrap: identity only. The caller must hold a trust
    /// anchor at the transport (client certificate verification).
    pub async fn verify_identity(&self, client_id: &str) -> Result<ClientRecord, AuthError> {
        if client_id.is_empty() {
            return Err(AuthError::MissingCredentials);
        }

        Ok(self.catalog.validate_client_by_id(client_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use culvert_catalog::ClientStatus;

    async fn authenticator() -> Authenticator {
        let catalog = Catalog::open_in_memory().await.unwrap();
        catalog
            .create_client("c1", "First Client", "hunter2")
            .await
            .unwrap();
        Authenticator::new(catalog)
    }

    #[tokio::test]
    async fn test_verify_token_success_updates_last_seen() {
        let auth = authenticator().await;

        let client = auth.verify_token("c1", "hunter2").await.unwrap();
        assert_eq!(client.client_id, "c1");

        let record = auth.catalog.client("c1").await.unwrap().unwrap();
        assert!(record.last_seen_at.is_some());
    }

    #[tokio::test]
    async fn test_verify_token_wrong_secret() {
        let auth = authenticator().await;
        assert!(matches!(
            auth.verify_token("c1", "wrong").await,
            Err(AuthError::Rejected(ValidateError::InvalidSecret(_)))
        ));
    }

    #[tokio::test]
    async fn test_verify_token_missing_credentials() {
        let auth = authenticator().await;
        assert!(matches!(
            auth.verify_token("", "hunter2").await,
            Err(AuthError::MissingCredentials)
        ));
        assert!(matches!(
            auth.verify_token("c1", "").await,
            Err(AuthError::MissingCredentials)
        ));
    }

    #[tokio::test]
    async fn test_verify_identity_blocked() {
        let auth = authenticator().await;
        auth.catalog
            .set_client_status("c1", ClientStatus::Blocked)
            .await
            .unwrap();

        assert!(matches!(
            auth.verify_identity("c1").await,
            Err(AuthError::Rejected(ValidateError::Blocked(_)))
        ));
    }

    #[tokio::test]
    async fn test_verify_identity_unknown() {
        let auth = authenticator().await;
        assert!(matches!(
            auth.verify_identity("ghost").await,
            Err(AuthError::Rejected(ValidateError::UnknownClient(_)))
        ));
    }
}
