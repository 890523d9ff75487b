use std::time::Duration;

use axum::{extract::State, Json};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::server::error::ServerError;
use crate::server::state::AppState;
use crate::trust::credentials::IssuedCredential;
use crate::trust::error::TrustError;
use crate::trust::token::IdentityToken;

#[derive(Debug, Deserialize)]
pub struct CredentialRequest {
    /// Name of the role to assume
    pub role: String,
    /// The caller's OIDC identity token (compact JWS)
    pub token: String,
    /// Optional session duration; clamped to the role's maximum
    #[serde(default)]
    pub duration_seconds: Option<u64>,
}

/// Exchange an identity token for short-lived credentials.
///
/// POST /api/v1/credentials
pub async fn issue_credentials(
    State(state): State<AppState>,
    Json(request): Json<CredentialRequest>,
) -> Result<Json<IssuedCredential>, ServerError> {
    if request.duration_seconds == Some(0) {
        return Err(ServerError::bad_request("duration_seconds must be positive"));
    }

    // One snapshot per request: a concurrent reload never mixes policy
    // versions within a single evaluation.
    let roles = state.roles.snapshot().await;
    let role = roles.get(&request.role).ok_or_else(|| {
        ServerError::not_found(format!("Unknown role '{}'", request.role))
            .with_context("role", request.role.clone())
    })?;

    let token = IdentityToken::parse(&request.token)?;

    // Keys are only fetched for issuers this role actually trusts, so the
    // token's iss claim can never steer the broker at an arbitrary URL.
    if !role.allows_issuer(&token.claims.iss) {
        tracing::debug!(role = %role.name, "token issuer not named by any trust condition");
        return Err(TrustError::NoMatchingCondition.into());
    }

    let keys = state.key_cache.key_set(&token.claims.iss).await?;

    let requested = request.duration_seconds.map(Duration::from_secs);
    let credential = state
        .evaluator
        .evaluate(&token, &keys, &role, Utc::now(), requested)?;

    // Replay check runs after the evaluation succeeded: only tokens that
    // actually produced a credential are worth remembering.
    if let (Some(guard), Some(jti)) = (&state.replay_guard, &token.claims.jti) {
        if !guard.first_use(jti) {
            tracing::warn!(role = %role.name, "identity token replayed");
            return Err(ServerError::forbidden("Token has already been exchanged"));
        }
    }

    tracing::info!(
        role = %role.name,
        subject = %token.claims.sub,
        issuer = %token.claims.iss,
        expires_at = %credential.expires_at,
        "issued credentials"
    );

    Ok(Json(credential))
}

#[derive(Debug, Serialize)]
pub struct RoleSummary {
    pub name: String,
    pub max_session_duration_secs: u64,
    pub trust_conditions: Vec<TrustConditionSummary>,
}

#[derive(Debug, Serialize)]
pub struct TrustConditionSummary {
    pub issuer: String,
    pub audience: String,
    pub subject: String,
}

/// List the configured roles and their trust conditions.
///
/// GET /api/v1/roles
pub async fn list_roles(State(state): State<AppState>) -> Json<Vec<RoleSummary>> {
    let roles = state.roles.snapshot().await;
    let mut summaries: Vec<RoleSummary> = roles
        .iter()
        .map(|role| RoleSummary {
            name: role.name.clone(),
            max_session_duration_secs: role.max_session.as_secs(),
            trust_conditions: role
                .trust_conditions
                .iter()
                .map(|condition| TrustConditionSummary {
                    issuer: condition.issuer.clone(),
                    audience: condition.audience.clone(),
                    subject: condition.subject.as_str().to_string(),
                })
                .collect(),
        })
        .collect();
    summaries.sort_by(|a, b| a.name.cmp(&b.name));
    Json(summaries)
}
