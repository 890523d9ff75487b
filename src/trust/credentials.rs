use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use base64ct::{Base64UrlUnpadded, Encoding};
use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::trust::role::{PolicyStatement, Role};

/// Audience of broker-issued session tokens
pub const SESSION_AUDIENCE: &str = "trustgate-session";

/// Claims embedded in a broker-issued session token.
///
/// The permission scope travels inside the signed token so downstream
/// consumers (e.g. a registry frontend) can enforce it without calling back
/// into the broker.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SessionClaims {
    /// Subject of the federated token the credential was issued for
    pub sub: String,
    /// Role the credential is scoped to
    pub role: String,
    /// The role's permission policy at issuance time
    pub scope: Vec<PolicyStatement>,
    /// Session token ID, for audit correlation
    pub jti: String,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
    pub aud: String,
}

/// Ephemeral output of a successful trust evaluation.
///
/// Never persisted by the broker; the caller must discard it or let it
/// expire. There is no renewal path: a fresh identity token must be
/// presented to obtain a new credential.
#[derive(Debug, Clone, Serialize)]
pub struct IssuedCredential {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum SignerError {
    #[error("invalid base64 signing secret: {0}")]
    InvalidBase64(#[from] base64::DecodeError),
    #[error("signing secret must decode to at least 32 bytes")]
    SecretTooShort,
    #[error("session token signing failed: {0}")]
    SigningFailed(#[from] jsonwebtoken::errors::Error),
}

/// Signs and verifies broker-issued session tokens.
pub struct CredentialSigner {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
}

impl CredentialSigner {
    /// Create a signer from a base64-encoded secret (minimum 32 bytes when
    /// decoded). Generate with: openssl rand -base64 32
    pub fn new(secret_base64: &str, issuer: String) -> Result<Self, SignerError> {
        let secret = BASE64.decode(secret_base64)?;
        if secret.len() < 32 {
            return Err(SignerError::SecretTooShort);
        }

        Ok(Self {
            encoding_key: EncodingKey::from_secret(&secret),
            decoding_key: DecodingKey::from_secret(&secret),
            issuer,
        })
    }

    /// Mint a fresh credential scoped to a role's permission policy.
    ///
    /// Key material is random per call; nothing is derived from or stored
    /// about previous issuances.
    pub fn mint(
        &self,
        subject: &str,
        role: &Role,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<IssuedCredential, SignerError> {
        let claims = SessionClaims {
            sub: subject.to_string(),
            role: role.name.clone(),
            scope: role.permission_policy.clone(),
            jti: uuid::Uuid::new_v4().to_string(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
            iss: self.issuer.clone(),
            aud: SESSION_AUDIENCE.to_string(),
        };

        let session_token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)?;

        Ok(IssuedCredential {
            access_key_id: generate_access_key_id(),
            secret_access_key: generate_secret(),
            session_token,
            expires_at,
        })
    }

    /// Verify and decode a session token issued by this broker.
    pub fn verify(&self, token: &str) -> Result<SessionClaims, SignerError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[SESSION_AUDIENCE]);

        let data = decode::<SessionClaims>(token, &self.decoding_key, &validation)?;
        Ok(data.claims)
    }
}

/// Access key identifier: recognizable "TGIA" prefix plus 16 random
/// characters, so leaked credentials can be attributed in logs.
fn generate_access_key_id() -> String {
    let mut bytes = [0u8; 12];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("TGIA{}", Base64UrlUnpadded::encode_string(&bytes))
}

fn generate_secret() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    Base64UrlUnpadded::encode_string(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trust::pattern::SubjectPattern;
    use crate::trust::role::TrustCondition;
    use std::time::Duration;

    fn test_signer() -> CredentialSigner {
        let secret = BASE64.encode([7u8; 32]);
        CredentialSigner::new(&secret, "https://trustgate.test".to_string()).unwrap()
    }

    fn test_role() -> Role {
        Role {
            name: "ecr-pusher".to_string(),
            trust_conditions: vec![TrustCondition {
                issuer: "https://idp.example.com".to_string(),
                audience: "sts.amazonaws.com".to_string(),
                subject: SubjectPattern::compile("repo:acme/app:ref:refs/heads/main").unwrap(),
            }],
            permission_policy: vec![PolicyStatement {
                actions: vec!["ecr:PutImage".to_string()],
                resources: vec!["arn:aws:ecr:us-east-1:123456789012:repository/acme/app".to_string()],
            }],
            max_session: Duration::from_secs(3600),
        }
    }

    #[test]
    fn test_secret_too_short() {
        let short = BASE64.encode(b"short");
        let result = CredentialSigner::new(&short, "https://trustgate.test".to_string());
        assert!(matches!(result, Err(SignerError::SecretTooShort)));
    }

    #[test]
    fn test_invalid_base64_secret() {
        let result = CredentialSigner::new("!!not base64!!", "https://trustgate.test".to_string());
        assert!(matches!(result, Err(SignerError::InvalidBase64(_))));
    }

    #[test]
    fn test_mint_and_verify_round_trip() {
        let signer = test_signer();
        let role = test_role();
        let now = Utc::now();
        let expires_at = now + chrono::Duration::seconds(900);

        let credential = signer
            .mint("repo:acme/app:ref:refs/heads/main", &role, now, expires_at)
            .unwrap();

        assert!(credential.access_key_id.starts_with("TGIA"));
        assert_eq!(credential.expires_at, expires_at);

        let claims = signer.verify(&credential.session_token).unwrap();
        assert_eq!(claims.sub, "repo:acme/app:ref:refs/heads/main");
        assert_eq!(claims.role, "ecr-pusher");
        assert_eq!(claims.scope, role.permission_policy);
        assert_eq!(claims.exp, expires_at.timestamp());
        assert_eq!(claims.aud, SESSION_AUDIENCE);
    }

    #[test]
    fn test_verify_rejects_foreign_signature() {
        let signer = test_signer();
        let other = CredentialSigner::new(
            &BASE64.encode([9u8; 32]),
            "https://trustgate.test".to_string(),
        )
        .unwrap();

        let role = test_role();
        let now = Utc::now();
        let credential = other
            .mint("sub", &role, now, now + chrono::Duration::seconds(60))
            .unwrap();

        assert!(signer.verify(&credential.session_token).is_err());
    }

    #[test]
    fn test_key_material_is_unique_per_issuance() {
        let signer = test_signer();
        let role = test_role();
        let now = Utc::now();
        let expires_at = now + chrono::Duration::seconds(60);

        let first = signer.mint("sub", &role, now, expires_at).unwrap();
        let second = signer.mint("sub", &role, now, expires_at).unwrap();

        assert_ne!(first.access_key_id, second.access_key_id);
        assert_ne!(first.secret_access_key, second.secret_access_key);
        assert_ne!(first.session_token, second.session_token);
    }
}
