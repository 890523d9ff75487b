use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::keys::KeySet;
use crate::trust::credentials::{CredentialSigner, IssuedCredential};
use crate::trust::error::TrustError;
use crate::trust::role::Role;
use crate::trust::token::IdentityToken;

/// The trust evaluator: decides whether a presented identity token may
/// assume a role, and mints the scoped credential when it may.
///
/// Each evaluation is a linear pipeline (signature, freshness, trust
/// conditions, policy binding) where any step's failure short-circuits to
/// a terminal error. The evaluator holds no state between calls; concurrent
/// evaluations over independent tokens are safe without locking.
pub struct Evaluator {
    signer: CredentialSigner,
}

impl Evaluator {
    pub fn new(signer: CredentialSigner) -> Self {
        Self { signer }
    }

    /// Evaluate a token against a role at a point in time.
    ///
    /// `requested` is clamped to the role's `max_session`; when absent the
    /// full `max_session` is granted.
    pub fn evaluate(
        &self,
        token: &IdentityToken,
        keys: &KeySet,
        role: &Role,
        now: DateTime<Utc>,
        requested: Option<Duration>,
    ) -> Result<IssuedCredential, TrustError> {
        // 1. Signature: no claim is trusted before this passes.
        keys.verify(token)?;

        // 2. Freshness: now must fall within [iat, exp). Zero leeway.
        let ts = now.timestamp();
        if ts >= token.claims.exp {
            return Err(TrustError::TokenExpired);
        }
        if ts < token.claims.iat {
            return Err(TrustError::TokenNotYetValid);
        }

        // 3-4. Trust conditions, OR-combined: any single condition whose
        // issuer, audience, and subject checks all pass admits the token.
        // Per-condition mismatches are kept at debug level so operators can
        // diagnose denials without the broker echoing claims to callers.
        let mut matched = None;
        for (index, condition) in role.trust_conditions.iter().enumerate() {
            match condition.check(&token.claims) {
                Ok(()) => {
                    matched = Some(index);
                    break;
                }
                Err(reason) => {
                    debug!(role = %role.name, condition = index, %reason, "trust condition did not match");
                }
            }
        }
        let Some(condition) = matched else {
            return Err(TrustError::NoMatchingCondition);
        };

        // 5. Bind the role's permission policy to a fresh credential.
        let session = requested
            .map(|duration| duration.min(role.max_session))
            .unwrap_or(role.max_session);
        let expires_at = now + chrono::Duration::seconds(session.as_secs() as i64);

        debug!(
            role = %role.name,
            condition,
            subject = %token.claims.sub,
            expires_at = %expires_at,
            "trust evaluation succeeded"
        );

        self.signer
            .mint(&token.claims.sub, role, now, expires_at)
            .map_err(|err| {
                // A local signing fault is an availability problem, not a
                // trust decision: deny closed, never retry here.
                tracing::error!(error = %err, "failed to sign session token");
                TrustError::KeySetUnavailable
            })
    }
}
