use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::keys::KeyCache;
use crate::server::settings::Settings;
use crate::trust::credentials::CredentialSigner;
use crate::trust::evaluator::Evaluator;
use crate::trust::store::RoleStore;

/// Shared state for the HTTP broker.
#[derive(Clone)]
pub struct AppState {
    pub roles: Arc<RoleStore>,
    pub evaluator: Arc<Evaluator>,
    pub key_cache: KeyCache,
    pub replay_guard: Option<ReplayGuard>,
}

impl AppState {
    pub fn new(settings: &Settings) -> Result<Self> {
        tracing::info!("Initializing AppState for HTTP server");

        let role_set = settings.compile_roles()?;
        tracing::info!("Loaded {} role(s)", role_set.len());

        let signer = CredentialSigner::new(
            &settings.broker.signing_secret,
            settings.server.public_url.clone(),
        )
        .context("Failed to initialize credential signer")?;

        let key_cache = KeyCache::new(settings.keys.cache_config());

        let replay_guard = if settings.broker.replay_protection {
            tracing::info!("Replay protection enabled (tracked token IDs expire after 1h)");
            Some(ReplayGuard::new())
        } else {
            tracing::warn!("Replay protection disabled - identity tokens may be exchanged repeatedly");
            None
        };

        Ok(Self {
            roles: Arc::new(RoleStore::new(role_set)),
            evaluator: Arc::new(Evaluator::new(signer)),
            key_cache,
            replay_guard,
        })
    }
}

/// Tracks identity token IDs that have already been exchanged.
///
/// Entries expire after an hour, comfortably past the lifetime of any
/// identity token a sane IdP issues, so a replayed jti is always either
/// still tracked or attached to an expired token.
#[derive(Clone)]
pub struct ReplayGuard {
    seen: moka::sync::Cache<String, ()>,
}

impl ReplayGuard {
    pub fn new() -> Self {
        Self {
            seen: moka::sync::Cache::builder()
                .max_capacity(100_000)
                .time_to_live(Duration::from_secs(3600))
                .build(),
        }
    }

    /// Record a token ID, returning true only on its first use.
    pub fn first_use(&self, jti: &str) -> bool {
        self.seen.entry(jti.to_string()).or_insert(()).is_fresh()
    }
}

impl Default for ReplayGuard {
    fn default() -> Self {
        Self::new()
    }
}
