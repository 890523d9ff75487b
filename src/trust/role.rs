use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::trust::error::TrustError;
use crate::trust::pattern::SubjectPattern;
use crate::trust::token::TokenClaims;

/// One allowed actions/resources statement of a role's permission policy.
///
/// The policy is opaque to the evaluator: it is bound to the issued
/// credential after trust succeeds, never consulted during trust checks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyStatement {
    pub actions: Vec<String>,
    pub resources: Vec<String>,
}

/// A rule deciding whether a verified token may assume a role.
///
/// Issuer and audience require exact string equality (no normalization, no
/// case folding); the subject is matched by a compiled pattern. All three
/// must hold on the same condition.
#[derive(Debug, Clone)]
pub struct TrustCondition {
    pub issuer: String,
    pub audience: String,
    pub subject: SubjectPattern,
}

impl TrustCondition {
    /// Check a token's claims against this single condition.
    ///
    /// The audience and subject checks are independent: changing one side of
    /// the condition never affects the other check's behavior.
    pub fn check(&self, claims: &TokenClaims) -> Result<(), TrustError> {
        if claims.iss != self.issuer {
            return Err(TrustError::NoMatchingCondition);
        }
        if claims.aud != self.audience {
            return Err(TrustError::AudienceMismatch);
        }
        if !self.subject.matches(&claims.sub) {
            return Err(TrustError::SubjectMismatch);
        }
        Ok(())
    }
}

/// A named capability grant.
#[derive(Debug, Clone)]
pub struct Role {
    pub name: String,
    /// OR-combined: any one matching condition permits assumption
    pub trust_conditions: Vec<TrustCondition>,
    pub permission_policy: Vec<PolicyStatement>,
    pub max_session: Duration,
}

impl Role {
    /// Whether any trust condition names this issuer.
    ///
    /// Key sets are only ever fetched for issuers a role names, so a token
    /// minted by an unconfigured issuer is denied without any outbound
    /// request.
    pub fn allows_issuer(&self, issuer: &str) -> bool {
        self.trust_conditions
            .iter()
            .any(|condition| condition.issuer == issuer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trust::testutil;

    fn condition(issuer: &str, audience: &str, subject: &str) -> TrustCondition {
        TrustCondition {
            issuer: issuer.to_string(),
            audience: audience.to_string(),
            subject: SubjectPattern::compile(subject).unwrap(),
        }
    }

    #[test]
    fn test_check_success() {
        let condition = condition(
            "https://token.actions.example.com",
            "sts.amazonaws.com",
            "repo:acme/app:ref:refs/heads/main",
        );
        let claims = testutil::claims(
            "https://token.actions.example.com",
            "sts.amazonaws.com",
            "repo:acme/app:ref:refs/heads/main",
        );
        assert!(condition.check(&claims).is_ok());
    }

    #[test]
    fn test_check_audience_exact_no_folding() {
        let condition = condition("https://idp.example.com", "sts.amazonaws.com", "repo:a/b");
        let mut claims = testutil::claims("https://idp.example.com", "STS.AMAZONAWS.COM", "repo:a/b");
        assert_eq!(
            condition.check(&claims).unwrap_err(),
            TrustError::AudienceMismatch
        );

        claims.aud = "sts.amazonaws.com ".to_string();
        assert_eq!(
            condition.check(&claims).unwrap_err(),
            TrustError::AudienceMismatch
        );
    }

    #[test]
    fn test_check_subject_mismatch() {
        let condition = condition(
            "https://idp.example.com",
            "sts.amazonaws.com",
            "repo:acme/app:ref:refs/heads/main",
        );
        let claims = testutil::claims(
            "https://idp.example.com",
            "sts.amazonaws.com",
            "repo:acme/app:ref:refs/heads/feature",
        );
        assert_eq!(
            condition.check(&claims).unwrap_err(),
            TrustError::SubjectMismatch
        );
    }

    #[test]
    fn test_audience_and_subject_checks_are_independent() {
        let claims = testutil::claims(
            "https://idp.example.com",
            "sts.amazonaws.com",
            "repo:acme/app:ref:refs/heads/main",
        );

        // Same subject pattern, different audiences: subject matching
        // behavior is unchanged, only the audience outcome differs.
        let matching_aud = condition(
            "https://idp.example.com",
            "sts.amazonaws.com",
            "repo:acme/app:ref:refs/heads/main",
        );
        let other_aud = condition(
            "https://idp.example.com",
            "other-audience",
            "repo:acme/app:ref:refs/heads/main",
        );

        assert!(matching_aud.check(&claims).is_ok());
        assert_eq!(
            other_aud.check(&claims).unwrap_err(),
            TrustError::AudienceMismatch
        );
    }

    #[test]
    fn test_allows_issuer() {
        let role = Role {
            name: "pusher".to_string(),
            trust_conditions: vec![condition(
                "https://idp.example.com",
                "sts.amazonaws.com",
                "repo:a/b",
            )],
            permission_policy: vec![],
            max_session: Duration::from_secs(3600),
        };
        assert!(role.allows_issuer("https://idp.example.com"));
        assert!(!role.allows_issuer("https://evil.example.com"));
    }
}
