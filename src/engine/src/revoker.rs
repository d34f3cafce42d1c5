use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

/// Error types for identity revocation
#[derive(Debug, thiserror::Error)]
pub enum RevokeError {
    #[error("identity provider unavailable: {0}")]
    Unavailable(String),
}

/// External identity/auth provider seam
///
/// Invoked once per job, after every cascade step has completed, because
/// earlier steps may still need the subject's identity to be valid.
/// Revoking an already-revoked identity is not an error.
#[async_trait]
pub trait IdentityProvider: Send + Sync + 'static {
    async fn revoke_identity(&self, subject_id: &str) -> Result<(), RevokeError>;
}

/// In-memory identity provider for tests, demos and the memory:// wiring
#[derive(Debug, Default)]
pub struct StaticIdentityProvider {
    revoked: Mutex<HashSet<String>>,
    failing: AtomicBool,
}

impl StaticIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent revocation fail until cleared
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub async fn is_revoked(&self, subject_id: &str) -> bool {
        self.revoked.lock().await.contains(subject_id)
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentityProvider {
    async fn revoke_identity(&self, subject_id: &str) -> Result<(), RevokeError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(RevokeError::Unavailable(
                "identity provider rejected the request".to_string(),
            ));
        }

        self.revoked.lock().await.insert(subject_id.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_revocation_is_idempotent() {
        let provider = StaticIdentityProvider::new();
        provider.revoke_identity("s1").await.unwrap();
        provider.revoke_identity("s1").await.unwrap();
        assert!(provider.is_revoked("s1").await);
        assert!(!provider.is_revoked("s2").await);
    }

    #[tokio::test]
    async fn test_scripted_failure() {
        let provider = StaticIdentityProvider::new();
        provider.set_failing(true);
        assert!(provider.revoke_identity("s1").await.is_err());
        assert!(!provider.is_revoked("s1").await);

        provider.set_failing(false);
        provider.revoke_identity("s1").await.unwrap();
        assert!(provider.is_revoked("s1").await);
    }
}
