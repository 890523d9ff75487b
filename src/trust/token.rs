use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use crate::trust::error::TrustError;

/// Claims asserted by a federated identity provider.
///
/// Unknown fields (e.g. `repository_owner`, `ref_protected`) are ignored.
/// Nothing here may be trusted until the raw token has been re-decoded
/// against the issuer's published signing keys.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TokenClaims {
    pub iss: String, // Issuer (identity provider URL)
    pub aud: String, // Audience (intended recipient)
    pub sub: String, // Subject (requester identity, e.g. repository + ref)
    pub iat: i64,    // Issued at (unix seconds)
    pub exp: i64,    // Expiration (unix seconds, exclusive)
    /// Token ID, used by the optional replay guard
    #[serde(default)]
    pub jti: Option<String>,
}

/// An identity assertion as presented by a CI runner.
///
/// `parse` extracts the header and claims without verifying the signature;
/// the raw compact form is retained so the evaluator can verify it against
/// the issuer's key set as its first step.
#[derive(Debug, Clone)]
pub struct IdentityToken {
    raw: String,
    pub kid: Option<String>,
    pub claims: TokenClaims,
}

impl IdentityToken {
    /// Parse a compact JWT without trusting it.
    ///
    /// A token that is structurally broken cannot be attributed to any
    /// issuer, so it fails closed as `InvalidSignature`.
    pub fn parse(raw: &str) -> Result<Self, TrustError> {
        let header = decode_header(raw).map_err(|_| TrustError::InvalidSignature)?;

        // Disabling signature validation below also disables jsonwebtoken's
        // algorithm check, so the header algorithm is enforced here: only
        // the issuer's asymmetric keys may vouch for claims.
        if header.alg != Algorithm::RS256 {
            return Err(TrustError::InvalidSignature);
        }

        let mut validation = Validation::new(Algorithm::RS256);
        validation.insecure_disable_signature_validation();
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        let data = decode::<TokenClaims>(raw, &DecodingKey::from_secret(&[]), &validation)
            .map_err(|_| TrustError::InvalidSignature)?;

        Ok(Self {
            raw: raw.to_string(),
            kid: header.kid,
            claims: data.claims,
        })
    }

    /// The compact serialized form, for signature verification.
    pub fn raw(&self) -> &str {
        &self.raw
    }
}
