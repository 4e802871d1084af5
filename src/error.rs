//! Error types shared by the hosted backend clients and the session layer.

use thiserror::Error;

/// Failure of a sign-in, sign-out or session probe against the auth service.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid login credentials")]
    InvalidCredentials,

    #[error("auth service unreachable: {0}")]
    Network(String),

    #[error("auth service rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("unexpected auth response: {0}")]
    Decode(String),

    #[error("session storage error: {0}")]
    Storage(#[from] std::io::Error),
}

impl From<reqwest::Error> for AuthError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            AuthError::Decode(err.to_string())
        } else {
            AuthError::Network(err.to_string())
        }
    }
}

/// Postgres unique_violation, as reported by the row API.
pub const UNIQUE_VIOLATION: &str = "23505";

/// Failure of a record store call.
#[derive(Debug, Error)]
pub enum RecordError {
    #[error("record store unreachable: {0}")]
    Network(String),

    #[error("record store rejected request ({status}): {message}")]
    Rejected {
        status: u16,
        code: Option<String>,
        message: String,
    },

    #[error("duplicate value: {0}")]
    UniqueViolation(String),

    #[error("no matching row")]
    NotFound,

    #[error("malformed row: {0}")]
    Decode(#[from] serde_json::Error),
}

impl RecordError {
    /// Classify an error body returned by the row API.
    pub fn from_status(status: u16, code: Option<String>, message: String) -> Self {
        if code.as_deref() == Some(UNIQUE_VIOLATION) {
            RecordError::UniqueViolation(message)
        } else if status == 406 {
            // single-row requests that matched nothing
            RecordError::NotFound
        } else {
            RecordError::Rejected {
                status,
                code,
                message,
            }
        }
    }
}

impl From<reqwest::Error> for RecordError {
    fn from(err: reqwest::Error) -> Self {
        RecordError::Network(err.to_string())
    }
}

/// A single failed form field, with the message shown next to it.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

impl FieldError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for FieldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Render a list of field errors one per line.
pub fn describe_fields(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_violation_classification() {
        let err = RecordError::from_status(
            409,
            Some("23505".to_string()),
            "duplicate key value violates unique constraint".to_string(),
        );
        assert!(matches!(err, RecordError::UniqueViolation(_)));
    }

    #[test]
    fn test_not_acceptable_is_not_found() {
        let err = RecordError::from_status(406, Some("PGRST116".to_string()), "0 rows".to_string());
        assert!(matches!(err, RecordError::NotFound));
    }

    #[test]
    fn test_other_status_is_rejected() {
        let err = RecordError::from_status(401, None, "JWT expired".to_string());
        match err {
            RecordError::Rejected { status, message, .. } => {
                assert_eq!(status, 401);
                assert_eq!(message, "JWT expired");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_describe_fields() {
        let errors = vec![
            FieldError::new("title", "Title must be at least 3 characters"),
            FieldError::new("slug", "Slug must be at least 3 characters"),
        ];
        assert_eq!(
            describe_fields(&errors),
            "title: Title must be at least 3 characters\nslug: Slug must be at least 3 characters"
        );
    }
}
