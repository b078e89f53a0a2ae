use crate::config::JwtConfig;
use crate::error::{GateError, Result};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

/// Claims carried by an admin token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminClaims {
    /// Subject (user ID)
    pub sub: String,
    /// Expiration time (Unix timestamp)
    pub exp: usize,
    /// Issuer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    /// Audience
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
    /// Site role, e.g. `admin`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

/// Verifies bearer tokens and checks they belong to an admin
pub struct AdminTokenVerifier {
    decoding_key: DecodingKey,
    validation: Validation,
    admin_role: String,
}

impl AdminTokenVerifier {
    /// Create a new verifier from configuration
    pub fn new(config: &JwtConfig) -> Result<Self> {
        let algorithm = Self::parse_algorithm(&config.algorithm)?;

        if config.secret.is_empty() {
            return Err(GateError::Config(
                "JWT secret is required for HS256/HS384/HS512 algorithms".to_string(),
            ));
        }
        let decoding_key = DecodingKey::from_secret(config.secret.as_bytes());

        let mut validation = Validation::new(algorithm);
        validation.validate_exp = true;

        if let Some(issuer) = &config.issuer {
            validation.set_issuer(&[issuer]);
        }

        match &config.audience {
            Some(audience) => validation.set_audience(&[audience]),
            None => validation.validate_aud = false,
        }

        Ok(Self {
            decoding_key,
            validation,
            admin_role: config.admin_role.clone(),
        })
    }

    /// Decode and validate `token`, then require the admin role
    pub fn verify(&self, token: &str) -> Result<AdminClaims> {
        let claims = decode::<AdminClaims>(token, &self.decoding_key, &self.validation)
            .map_err(|e| GateError::InvalidToken(format!("Token validation failed: {}", e)))?
            .claims;

        if claims.role.as_deref() != Some(self.admin_role.as_str()) {
            return Err(GateError::InvalidToken(format!(
                "Subject '{}' does not carry the admin role",
                claims.sub
            )));
        }

        Ok(claims)
    }

    /// Parse algorithm string to Algorithm enum
    fn parse_algorithm(algo: &str) -> Result<Algorithm> {
        match algo.to_uppercase().as_str() {
            "HS256" => Ok(Algorithm::HS256),
            "HS384" => Ok(Algorithm::HS384),
            "HS512" => Ok(Algorithm::HS512),
            _ => Err(GateError::Config(format!(
                "Unsupported algorithm: {}",
                algo
            ))),
        }
    }
}

impl std::fmt::Debug for AdminTokenVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminTokenVerifier")
            .field("algorithms", &self.validation.algorithms)
            .field("admin_role", &self.admin_role)
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    pub(crate) fn test_config() -> JwtConfig {
        JwtConfig {
            secret: "test-secret".to_string(),
            algorithm: "HS256".to_string(),
            issuer: None,
            audience: None,
            admin_role: "admin".to_string(),
        }
    }

    pub(crate) fn create_test_token(secret: &str, role: Option<&str>, exp_offset: i64) -> String {
        let claims = AdminClaims {
            sub: "owner".to_string(),
            exp: (chrono::Utc::now().timestamp() + exp_offset) as usize,
            iss: None,
            aud: None,
            role: role.map(str::to_string),
        };
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn test_verifier_creation() {
        assert!(AdminTokenVerifier::new(&test_config()).is_ok());
    }

    #[test]
    fn test_verifier_rejects_empty_secret_and_rsa() {
        let config = JwtConfig {
            secret: String::new(),
            ..test_config()
        };
        assert!(matches!(
            AdminTokenVerifier::new(&config),
            Err(GateError::Config(_))
        ));

        let config = JwtConfig {
            algorithm: "RS256".to_string(),
            ..test_config()
        };
        assert!(AdminTokenVerifier::new(&config).is_err());
    }

    #[test]
    fn test_valid_admin_token() {
        let verifier = AdminTokenVerifier::new(&test_config()).unwrap();
        let token = create_test_token("test-secret", Some("admin"), 3600);

        let claims = verifier.verify(&token).unwrap();
        assert_eq!(claims.sub, "owner");
    }

    #[test]
    fn test_non_admin_token_rejected() {
        let verifier = AdminTokenVerifier::new(&test_config()).unwrap();

        let editor = create_test_token("test-secret", Some("editor"), 3600);
        assert!(matches!(
            verifier.verify(&editor),
            Err(GateError::InvalidToken(_))
        ));

        let no_role = create_test_token("test-secret", None, 3600);
        assert!(verifier.verify(&no_role).is_err());
    }

    #[test]
    fn test_expired_or_forged_token_rejected() {
        let verifier = AdminTokenVerifier::new(&test_config()).unwrap();

        let expired = create_test_token("test-secret", Some("admin"), -3600);
        assert!(verifier.verify(&expired).is_err());

        let forged = create_test_token("wrong-secret", Some("admin"), 3600);
        assert!(verifier.verify(&forged).is_err());

        assert!(verifier.verify("not-a-jwt").is_err());
    }

    #[test]
    fn test_issuer_validation() {
        let config = JwtConfig {
            issuer: Some("site".to_string()),
            ..test_config()
        };
        let verifier = AdminTokenVerifier::new(&config).unwrap();

        // Token without the configured issuer
        let token = create_test_token("test-secret", Some("admin"), 3600);
        assert!(verifier.verify(&token).is_err());
    }
}
