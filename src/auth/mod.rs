//! Admin bypass authority
//!
//! A request may skip rate limiting only when its bearer token verifies as an
//! admin JWT and the revocation list positively confirms it is not revoked.
//! Every failure along the way denies the bypass; the request is then rate
//! limited like any other.

pub mod jwt;
pub mod revocation;

use crate::config::AuthConfig;
use crate::error::Result;
use crate::store::SharedStore;
use std::sync::Arc;
use tracing::{debug, warn};

pub use jwt::{AdminClaims, AdminTokenVerifier};
pub use revocation::RevocationList;

/// Decides whether a bearer token may bypass rate limiting
#[derive(Clone, Debug)]
pub struct BypassAuthority {
    verifier: Option<Arc<AdminTokenVerifier>>,
    revocations: RevocationList,
}

impl BypassAuthority {
    /// Create the authority from configuration.
    ///
    /// Without a JWT section no token is ever permitted.
    pub fn new(config: Option<&AuthConfig>, store: Arc<dyn SharedStore>) -> Result<Self> {
        let verifier = match config.and_then(|c| c.jwt.as_ref()) {
            Some(jwt_config) => Some(Arc::new(AdminTokenVerifier::new(jwt_config)?)),
            None => None,
        };

        Ok(Self {
            verifier,
            revocations: RevocationList::new(store),
        })
    }

    /// Whether admin verification is configured at all
    pub fn is_enabled(&self) -> bool {
        self.verifier.is_some()
    }

    pub fn revocations(&self) -> &RevocationList {
        &self.revocations
    }

    pub async fn permits(&self, token: &str) -> bool {
        let Some(verifier) = &self.verifier else {
            return false;
        };

        let claims = match verifier.verify(token) {
            Ok(claims) => claims,
            Err(e) => {
                debug!(error = %e, "Bypass token rejected");
                return false;
            }
        };

        match self.revocations.is_revoked(token).await {
            Ok(false) => true,
            Ok(true) => {
                debug!(sub = %claims.sub, "Bypass token revoked");
                false
            }
            Err(e) => {
                warn!(sub = %claims.sub, error = %e, "Revocation check failed, bypass denied");
                false
            }
        }
    }
}
