use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Error type for parsing an identifier from a string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseIdError {
    kind: &'static str,
}

impl fmt::Display for ParseIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to parse {} from string", self.kind)
    }
}

impl std::error::Error for ParseIdError {}

// Server-issued identifiers are opaque strings; the client never derives meaning from them.
macro_rules! opaque_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = ParseIdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    return Err(ParseIdError {
                        kind: stringify!($name),
                    });
                }
                Ok(Self::new(trimmed))
            }
        }
    };
}

opaque_id!(
    /// Unique identifier for an assessment session
    SessionId
);
opaque_id!(
    /// Unique identifier for a question served by the scoring service
    QuestionId
);
opaque_id!(
    /// Identifier of a knowledge area (a topic grouping of concepts)
    KnowledgeAreaId
);
opaque_id!(
    /// Identifier of a single concept
    ConceptId
);
opaque_id!(
    /// Identifier of a course used to resolve the start scope
    CourseId
);

// ─── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_id_display() {
        let id = SessionId::new("sess-42");
        assert_eq!(id.to_string(), "sess-42");
        assert_eq!(format!("{id:?}"), "SessionId(sess-42)");
    }

    #[test]
    fn ids_parse_trimmed() {
        let id: QuestionId = "  q-1 ".parse().unwrap();
        assert_eq!(id, QuestionId::new("q-1"));
    }

    #[test]
    fn empty_id_is_rejected() {
        let err = "   ".parse::<ConceptId>().unwrap_err();
        assert_eq!(err.to_string(), "failed to parse ConceptId from string");
    }
}
