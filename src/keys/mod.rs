use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tokio::sync::{Mutex, RwLock};

use crate::trust::error::TrustError;
use crate::trust::token::IdentityToken;

/// JWKS (JSON Web Key Set) response from an OIDC provider
#[derive(Debug, Deserialize)]
struct JwksResponse {
    keys: Vec<Jwk>,
}

/// Individual JSON Web Key
#[derive(Debug, Deserialize, Clone)]
struct Jwk {
    #[serde(rename = "use")]
    key_use: Option<String>, // Optional: some providers don't include this
    kty: String,
    kid: String,
    n: String,
    e: String,
}

/// OIDC Discovery document
#[derive(Debug, Deserialize)]
struct OidcDiscovery {
    jwks_uri: String,
}

/// An issuer's published signing keys, resolved at a point in time.
///
/// The fingerprint is a digest of the key material, used to log rotations.
pub struct KeySet {
    issuer: String,
    keys: HashMap<String, DecodingKey>,
    fingerprint: String,
}

// Manual impl: DecodingKey is not Debug, and key material should not end
// up in logs anyway.
impl std::fmt::Debug for KeySet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeySet")
            .field("issuer", &self.issuer)
            .field("fingerprint", &self.fingerprint)
            .finish_non_exhaustive()
    }
}

impl KeySet {
    fn from_jwks(issuer: &str, jwks: JwksResponse, body: &str) -> Result<Self> {
        let mut keys = HashMap::new();
        for jwk in jwks.keys {
            // Accept RSA keys that either omit the use field or carry use="sig"
            if jwk.kty == "RSA" && (jwk.key_use.is_none() || jwk.key_use.as_deref() == Some("sig"))
            {
                let decoding_key = DecodingKey::from_rsa_components(&jwk.n, &jwk.e)
                    .context("Failed to create decoding key from JWK")?;
                keys.insert(jwk.kid.clone(), decoding_key);
                tracing::debug!(kid = %jwk.kid, "loaded signing key");
            }
        }

        if keys.is_empty() {
            return Err(anyhow!("JWKS for {} contains no usable RSA signing keys", issuer));
        }
        tracing::info!(issuer = %issuer, count = keys.len(), "loaded signing keys from JWKS");

        Ok(Self {
            issuer: issuer.to_string(),
            keys,
            fingerprint: hex_digest(body.as_bytes()),
        })
    }

    /// Build a key set from raw RSA components (base64url-encoded n and e).
    pub fn from_components<'a>(
        issuer: &str,
        components: impl IntoIterator<Item = (&'a str, &'a str, &'a str)>,
    ) -> Result<Self> {
        let mut keys = HashMap::new();
        let mut digest_input = String::new();
        for (kid, n, e) in components {
            let decoding_key = DecodingKey::from_rsa_components(n, e)
                .context("Failed to create decoding key from RSA components")?;
            keys.insert(kid.to_string(), decoding_key);
            digest_input.push_str(kid);
            digest_input.push_str(n);
            digest_input.push_str(e);
        }

        Ok(Self {
            issuer: issuer.to_string(),
            keys,
            fingerprint: hex_digest(digest_input.as_bytes()),
        })
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Verify a token's signature against this key set.
    ///
    /// Freshness and audience validation are deliberately disabled here;
    /// those checks belong to the evaluator so their ordering is explicit.
    /// A missing or unknown kid fails closed as `InvalidSignature`.
    pub fn verify(&self, token: &IdentityToken) -> Result<(), TrustError> {
        let kid = token.kid.as_deref().ok_or(TrustError::InvalidSignature)?;
        let key = self.keys.get(kid).ok_or(TrustError::InvalidSignature)?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        decode::<serde_json::Value>(token.raw(), key, &validation)
            .map_err(|_| TrustError::InvalidSignature)?;
        Ok(())
    }
}

fn hex_digest(input: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input);
    format!("{:x}", hasher.finalize())
}

#[derive(Debug, Clone)]
pub struct KeyCacheConfig {
    /// Age past which a cached key set triggers a background refresh
    pub soft_ttl: Duration,
    /// Hard ceiling: cached keys older than this are never served
    pub hard_ttl: Duration,
    /// Per-attempt timeout for discovery + JWKS fetch
    pub fetch_timeout: Duration,
    /// Bounded fetch attempts before failing closed
    pub max_attempts: u32,
}

impl Default for KeyCacheConfig {
    fn default() -> Self {
        Self {
            soft_ttl: Duration::from_secs(3600),
            hard_ttl: Duration::from_secs(86400),
            fetch_timeout: Duration::from_secs(10),
            max_attempts: 2,
        }
    }
}

struct CacheEntry {
    keys: Arc<KeySet>,
    fetched_at: Instant,
}

/// Read-mostly cache of issuer key sets with OIDC discovery.
///
/// Within the soft TTL a cached key set is served as-is. Past it, the stale
/// set is still served while a background, non-blocking refresh runs (one in
/// flight per issuer). Past the hard ceiling nothing cached is trusted: a
/// bounded foreground fetch is the only option and its failure surfaces as
/// `KeySetUnavailable`; evaluation never falls back to an unauthenticated
/// mode.
#[derive(Clone)]
pub struct KeyCache {
    http_client: reqwest::Client,
    config: KeyCacheConfig,
    cache: Arc<RwLock<HashMap<String, CacheEntry>>>,
    refreshing: Arc<Mutex<HashSet<String>>>,
}

impl KeyCache {
    pub fn new(config: KeyCacheConfig) -> Self {
        Self {
            http_client: reqwest::Client::new(),
            config,
            cache: Arc::new(RwLock::new(HashMap::new())),
            refreshing: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Get the current key set for an issuer, fetching if necessary.
    pub async fn key_set(&self, issuer: &str) -> Result<Arc<KeySet>, TrustError> {
        {
            let cache = self.cache.read().await;
            if let Some(entry) = cache.get(issuer) {
                let age = entry.fetched_at.elapsed();
                if age <= self.config.soft_ttl {
                    return Ok(entry.keys.clone());
                }
                if age <= self.config.hard_ttl {
                    // Stale but not expired: serve while refreshing, so
                    // in-flight evaluations never block on the network.
                    let keys = entry.keys.clone();
                    drop(cache);
                    self.spawn_refresh(issuer).await;
                    return Ok(keys);
                }
                tracing::warn!(issuer = %issuer, "cached key set past hard ceiling, discarding");
            }
        }

        match self.fetch_with_retries(issuer).await {
            Ok(keys) => Ok(self.store(issuer, keys).await),
            Err(err) => {
                tracing::warn!(issuer = %issuer, error = %err, "key set fetch failed");
                Err(TrustError::KeySetUnavailable)
            }
        }
    }

    async fn spawn_refresh(&self, issuer: &str) {
        {
            let mut refreshing = self.refreshing.lock().await;
            if !refreshing.insert(issuer.to_string()) {
                return; // refresh already in flight for this issuer
            }
        }

        let cache = self.clone();
        let issuer = issuer.to_string();
        tokio::spawn(async move {
            match cache.fetch_with_retries(&issuer).await {
                Ok(keys) => {
                    cache.store(&issuer, keys).await;
                }
                Err(err) => {
                    tracing::warn!(
                        issuer = %issuer,
                        error = %err,
                        "background key refresh failed, serving cached keys until the hard ceiling"
                    );
                }
            }
            cache.refreshing.lock().await.remove(&issuer);
        });
    }

    async fn store(&self, issuer: &str, keys: KeySet) -> Arc<KeySet> {
        let keys = Arc::new(keys);
        let mut cache = self.cache.write().await;
        if let Some(previous) = cache.get(issuer) {
            if previous.keys.fingerprint() != keys.fingerprint() {
                tracing::info!(issuer = %issuer, "issuer signing keys rotated");
            }
        }
        cache.insert(
            issuer.to_string(),
            CacheEntry {
                keys: keys.clone(),
                fetched_at: Instant::now(),
            },
        );
        keys
    }

    async fn fetch_with_retries(&self, issuer: &str) -> Result<KeySet> {
        let attempts = self.config.max_attempts.max(1);
        let mut last_err = None;

        for attempt in 1..=attempts {
            match tokio::time::timeout(self.config.fetch_timeout, self.fetch(issuer)).await {
                Ok(Ok(keys)) => return Ok(keys),
                Ok(Err(err)) => {
                    tracing::debug!(issuer = %issuer, attempt, error = %err, "key fetch attempt failed");
                    last_err = Some(err);
                }
                Err(_) => {
                    last_err = Some(anyhow!("timed out fetching keys for {}", issuer));
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow!("no fetch attempts were made")))
    }

    /// Discover the JWKS endpoint and download the issuer's keys.
    async fn fetch(&self, issuer: &str) -> Result<KeySet> {
        let discovery_url = format!(
            "{}/.well-known/openid-configuration",
            issuer.trim_end_matches('/')
        );
        tracing::debug!(url = %discovery_url, "discovering OIDC configuration");

        let discovery: OidcDiscovery = self
            .http_client
            .get(&discovery_url)
            .send()
            .await
            .context("Failed to fetch OIDC discovery document")?
            .error_for_status()
            .context("OIDC discovery endpoint returned an error")?
            .json()
            .await
            .context("Failed to parse OIDC discovery document")?;

        tracing::debug!(url = %discovery.jwks_uri, "fetching JWKS");
        let body = self
            .http_client
            .get(&discovery.jwks_uri)
            .send()
            .await
            .context("Failed to fetch JWKS")?
            .error_for_status()
            .context("JWKS endpoint returned an error")?
            .text()
            .await
            .context("Failed to read JWKS response body")?;

        let jwks: JwksResponse =
            serde_json::from_str(&body).context("Failed to parse JWKS response")?;

        KeySet::from_jwks(issuer, jwks, &body)
    }
}
