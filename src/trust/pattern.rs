use thiserror::Error;

/// A single segment of a compiled subject pattern.
///
/// Wildcards are opt-in per segment: `*` as a whole segment matches any
/// value, a trailing `*` matches a prefix (e.g. `refs/heads/*`), and
/// everything else is an exact literal. No other `*` placement is legal.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Prefix(String),
    Any,
}

/// Compiled matcher for OIDC subject claims.
///
/// Subjects are `:`-separated (e.g. `repo:acme/app:ref:refs/heads/main`).
/// A pattern matches only when the segment counts are equal and every
/// segment matches; there is no partial or implicit-wildcard matching.
/// Patterns are compiled once at configuration load so an illegal pattern
/// rejects the configuration instead of silently denying at runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectPattern {
    source: String,
    segments: Vec<Segment>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatternError {
    #[error("subject pattern must not be empty")]
    Empty,
    #[error("subject pattern segment {0} is empty")]
    EmptySegment(usize),
    #[error("wildcard in segment {0} must be the whole segment or a trailing suffix")]
    EmbeddedWildcard(usize),
}

impl SubjectPattern {
    /// Compile a pattern string into a typed segment matcher.
    pub fn compile(pattern: &str) -> Result<Self, PatternError> {
        if pattern.is_empty() {
            return Err(PatternError::Empty);
        }

        let mut segments = Vec::new();
        for (idx, part) in pattern.split(':').enumerate() {
            if part.is_empty() {
                return Err(PatternError::EmptySegment(idx));
            }
            if part == "*" {
                segments.push(Segment::Any);
            } else if let Some(prefix) = part.strip_suffix('*') {
                if prefix.contains('*') {
                    return Err(PatternError::EmbeddedWildcard(idx));
                }
                segments.push(Segment::Prefix(prefix.to_string()));
            } else if part.contains('*') {
                return Err(PatternError::EmbeddedWildcard(idx));
            } else {
                segments.push(Segment::Literal(part.to_string()));
            }
        }

        Ok(Self {
            source: pattern.to_string(),
            segments,
        })
    }

    /// Match a subject claim against this pattern.
    pub fn matches(&self, subject: &str) -> bool {
        let parts: Vec<&str> = subject.split(':').collect();
        if parts.len() != self.segments.len() {
            return false;
        }

        self.segments
            .iter()
            .zip(parts)
            .all(|(segment, part)| match segment {
                Segment::Literal(literal) => literal == part,
                Segment::Prefix(prefix) => part.starts_with(prefix.as_str()),
                Segment::Any => true,
            })
    }

    /// The original pattern string, for display and config round-trips.
    pub fn as_str(&self) -> &str {
        &self.source
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_pattern_exact_match() {
        let pattern = SubjectPattern::compile("repo:acme/app:ref:refs/heads/main").unwrap();
        assert!(pattern.matches("repo:acme/app:ref:refs/heads/main"));
    }

    #[test]
    fn test_literal_pattern_rejects_other_branch() {
        let pattern = SubjectPattern::compile("repo:acme/app:ref:refs/heads/main").unwrap();
        assert!(!pattern.matches("repo:acme/app:ref:refs/heads/feature"));
        assert!(!pattern.matches("repo:acme/other:ref:refs/heads/main"));
    }

    #[test]
    fn test_wildcard_is_opt_in_not_implicit() {
        // A literal pattern never matches more than its exact subject, even
        // when the subject would match a broader pattern the role does not
        // define.
        let literal = SubjectPattern::compile("repo:org/name:ref:refs/heads/main").unwrap();
        assert!(!literal.matches("repo:org/name:ref:refs/heads/develop"));

        let broad = SubjectPattern::compile("repo:org/name:ref:refs/heads/*").unwrap();
        assert!(broad.matches("repo:org/name:ref:refs/heads/main"));
        assert!(broad.matches("repo:org/name:ref:refs/heads/develop"));
    }

    #[test]
    fn test_any_segment_wildcard() {
        let pattern = SubjectPattern::compile("repo:*:ref:refs/heads/main").unwrap();
        assert!(pattern.matches("repo:acme/app:ref:refs/heads/main"));
        assert!(pattern.matches("repo:other/thing:ref:refs/heads/main"));
        assert!(!pattern.matches("repo:acme/app:ref:refs/heads/dev"));
    }

    #[test]
    fn test_segment_count_must_match() {
        let pattern = SubjectPattern::compile("repo:acme/app:ref:refs/heads/main").unwrap();
        assert!(!pattern.matches("repo:acme/app:ref"));
        assert!(!pattern.matches("repo:acme/app:ref:refs/heads/main:extra"));

        // An Any segment matches one segment, never several.
        let any = SubjectPattern::compile("repo:*").unwrap();
        assert!(!any.matches("repo:acme/app:ref:refs/heads/main"));
    }

    #[test]
    fn test_prefix_wildcard_anchoring() {
        // A branch literally named to look like a match must not satisfy a
        // pattern anchored elsewhere.
        let pattern = SubjectPattern::compile("repo:acme/app:ref:refs/heads/release-*").unwrap();
        assert!(pattern.matches("repo:acme/app:ref:refs/heads/release-1.2"));
        assert!(!pattern.matches("repo:acme/app:ref:refs/tags/release-1.2"));
        assert!(!pattern.matches("repo:acme/app:ref:refs/heads/not-release-1.2"));
    }

    #[test]
    fn test_embedded_wildcard_rejected() {
        assert_eq!(
            SubjectPattern::compile("repo:acme/*/app:ref:main").unwrap_err(),
            PatternError::EmbeddedWildcard(1)
        );
        assert_eq!(
            SubjectPattern::compile("repo:acme/app:ref:*-suffix").unwrap_err(),
            PatternError::EmbeddedWildcard(3)
        );
        assert_eq!(
            SubjectPattern::compile("repo:a**").unwrap_err(),
            PatternError::EmbeddedWildcard(1)
        );
    }

    #[test]
    fn test_empty_patterns_rejected() {
        assert_eq!(SubjectPattern::compile("").unwrap_err(), PatternError::Empty);
        assert_eq!(
            SubjectPattern::compile("repo::ref").unwrap_err(),
            PatternError::EmptySegment(1)
        );
    }

    #[test]
    fn test_as_str_round_trip() {
        let source = "repo:acme/app:ref:refs/heads/*";
        let pattern = SubjectPattern::compile(source).unwrap();
        assert_eq!(pattern.as_str(), source);
    }
}
