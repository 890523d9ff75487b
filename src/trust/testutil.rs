//! Shared helpers for tests that need real RS256-signed tokens.

use std::sync::OnceLock;

use base64ct::{Base64UrlUnpadded, Encoding};
use chrono::Utc;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use rsa::pkcs1::{EncodeRsaPrivateKey, LineEnding};
use rsa::traits::PublicKeyParts;
use rsa::RsaPrivateKey;

use crate::keys::KeySet;
use crate::trust::token::{IdentityToken, TokenClaims};

pub const TEST_KID: &str = "test-key-1";

pub struct TestKeys {
    pub n: String,
    pub e: String,
    encoding_key: EncodingKey,
}

static KEYS: OnceLock<TestKeys> = OnceLock::new();

/// A process-wide throwaway RSA keypair (2048-bit generation is slow, so it
/// is created once and shared across tests).
pub fn test_keys() -> &'static TestKeys {
    KEYS.get_or_init(|| {
        let mut rng = rand::thread_rng();
        let private = RsaPrivateKey::new(&mut rng, 2048).expect("generate test keypair");
        let public = private.to_public_key();

        let pem = private
            .to_pkcs1_pem(LineEnding::LF)
            .expect("encode test keypair");

        TestKeys {
            n: Base64UrlUnpadded::encode_string(&public.n().to_bytes_be()),
            e: Base64UrlUnpadded::encode_string(&public.e().to_bytes_be()),
            encoding_key: EncodingKey::from_rsa_pem(pem.as_str().as_bytes())
                .expect("load test keypair"),
        }
    })
}

impl TestKeys {
    /// Sign claims into a compact RS256 JWT under `TEST_KID`.
    pub fn sign(&self, claims: &TokenClaims) -> String {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(TEST_KID.to_string());
        encode(&header, claims, &self.encoding_key).expect("sign test token")
    }

    /// A key set publishing the test public key for the given issuer.
    pub fn key_set(&self, issuer: &str) -> KeySet {
        KeySet::from_components(issuer, [(TEST_KID, self.n.as_str(), self.e.as_str())])
            .expect("build test key set")
    }
}

/// Claims valid for five minutes, issued 30 seconds ago.
pub fn claims(iss: &str, aud: &str, sub: &str) -> TokenClaims {
    let now = Utc::now().timestamp();
    TokenClaims {
        iss: iss.to_string(),
        aud: aud.to_string(),
        sub: sub.to_string(),
        iat: now - 30,
        exp: now + 300,
        jti: None,
    }
}

/// A parsed, properly signed token for the given claims.
pub fn signed_token(iss: &str, aud: &str, sub: &str) -> IdentityToken {
    let raw = test_keys().sign(&claims(iss, aud, sub));
    IdentityToken::parse(&raw).expect("parse test token")
}

/// A parsed token for arbitrary claims.
pub fn signed_token_for(claims: &TokenClaims) -> IdentityToken {
    let raw = test_keys().sign(claims);
    IdentityToken::parse(&raw).expect("parse test token")
}

/// Corrupt the signature while keeping the token parseable.
pub fn tamper_signature(token: &IdentityToken) -> IdentityToken {
    let raw = token.raw();
    let mut tampered: Vec<char> = raw.chars().collect();
    let last = tampered.last_mut().expect("token is non-empty");
    *last = if *last == 'A' { 'B' } else { 'A' };
    let tampered: String = tampered.into_iter().collect();
    IdentityToken::parse(&tampered).expect("tampered token still parses")
}
