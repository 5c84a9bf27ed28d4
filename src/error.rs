use std::fmt::Display;

#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// A required store argument is missing.
    Configuration(String),
    /// `then_by` was called without an immediately preceding `sort_by`.
    InvalidSequence,
    /// `and` and `or` were mixed inside a single criteria group.
    MixedConnective,
    InvalidCriterionShape(String),
    InvalidOperator(String),
    NotSupported(&'static str),
    NotFound,
    /// Failure reported by the entity manager or its transport.
    Remote(String),
}

impl Error {
    /// Structural errors describe misuse of the builder API. They are
    /// returned synchronously and never reach the error handler chain.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Error::InvalidSequence
                | Error::MixedConnective
                | Error::InvalidCriterionShape(_)
                | Error::InvalidOperator(_)
                | Error::NotSupported(_)
        )
    }

    /// Collapse any collaborator failure into `Remote`.
    pub(crate) fn into_remote(self) -> Self {
        match self {
            Error::Remote(_) => self,
            other => Error::Remote(other.to_string()),
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Configuration(msg) => write!(f, "Configuration error: {}", msg),
            Error::InvalidSequence => write!(f, "then_by can't be called before sort_by"),
            Error::MixedConnective => {
                write!(f, "Mixing of and/or is not allowed inside a single group")
            }
            Error::InvalidCriterionShape(msg) => write!(f, "Invalid criterion: {}", msg),
            Error::InvalidOperator(op) => write!(f, "Unknown filter operator: {}", op),
            Error::NotSupported(op) => write!(f, "Operation not supported: {}", op),
            Error::NotFound => write!(f, "Not found"),
            Error::Remote(err) => write!(f, "Remote error: {}", err),
        }
    }
}

impl std::error::Error for Error {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structural_classification() {
        assert!(Error::InvalidSequence.is_structural());
        assert!(Error::MixedConnective.is_structural());
        assert!(Error::NotSupported("sum").is_structural());
        assert!(!Error::Remote("boom".to_string()).is_structural());
        assert!(!Error::Configuration("x".to_string()).is_structural());
    }

    #[test]
    fn test_into_remote_keeps_message() {
        let err = Error::NotFound.into_remote();
        assert_eq!(err, Error::Remote("Not found".to_string()));

        let err = Error::Remote("timeout".to_string()).into_remote();
        assert_eq!(err, Error::Remote("timeout".to_string()));
    }
}
