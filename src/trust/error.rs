use thiserror::Error;

/// Terminal outcomes of a trust evaluation.
///
/// None of these are retried internally. An expired token requires the caller
/// to obtain a fresh one from its identity provider. Display messages never
/// echo token claims, so they are safe to return to low-privilege callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TrustError {
    #[error("token signature could not be verified against the issuer's published keys")]
    InvalidSignature,
    #[error("token has expired")]
    TokenExpired,
    #[error("token is not yet valid")]
    TokenNotYetValid,
    #[error("token audience does not match the trust condition")]
    AudienceMismatch,
    #[error("token subject does not match the trust condition")]
    SubjectMismatch,
    #[error("no trust condition on the role matches the token")]
    NoMatchingCondition,
    #[error("issuer key set is unavailable")]
    KeySetUnavailable,
}
