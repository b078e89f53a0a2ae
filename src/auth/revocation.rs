use crate::error::{GateError, Result};
use crate::store::SharedStore;
use std::sync::Arc;

const REVOCATION_PREFIX: &str = "auth:token:";

/// Revoked bearer tokens, kept in the shared store
///
/// A token is revoked while a value exists at `auth:token:<token>`.
#[derive(Clone)]
pub struct RevocationList {
    store: Arc<dyn SharedStore>,
}

impl RevocationList {
    pub fn new(store: Arc<dyn SharedStore>) -> Self {
        Self { store }
    }

    pub fn key_for(token: &str) -> String {
        format!("{}{}", REVOCATION_PREFIX, token)
    }

    /// Whether `token` is revoked.
    ///
    /// Any store failure is reported as an error, never as "not revoked".
    pub async fn is_revoked(&self, token: &str) -> Result<bool> {
        if !self.store.is_available() {
            return Err(GateError::RevocationCheck(
                "shared store unavailable".to_string(),
            ));
        }

        self.store
            .exists(&Self::key_for(token))
            .await
            .map_err(|e| GateError::RevocationCheck(e.to_string()))
    }

    /// Revoke `token` for `ttl_secs`, normally the token's remaining lifetime
    pub async fn revoke(&self, token: &str, ttl_secs: u64) -> Result<()> {
        self.store
            .set_ex(&Self::key_for(token), "1", ttl_secs.max(1))
            .await
    }
}

impl std::fmt::Debug for RevocationList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RevocationList").finish_non_exhaustive()
    }
}
