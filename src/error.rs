use thiserror::Error;

#[derive(Error, Debug)]
pub enum ForgeError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Model not found: {0}")]
    NotFound(String),

    #[error("Model not trained: {0}")]
    NotTrained(String),

    #[error("Backend error: {message}")]
    Backend { message: String, retryable: bool },

    #[error("Failed to parse backend output: {message}")]
    Parse { message: String, raw: String },

    #[error("Backend timed out after {0} seconds")]
    Timeout(u64),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Polars error: {0}")]
    Polars(#[from] polars::error::PolarsError),

    #[error("Serde error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Coarse classification used by callers deciding between retrying,
/// surfacing to the user, and giving up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    NotTrained,
    Backend,
    Parse,
}

impl ForgeError {
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
            retryable: false,
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
            retryable: true,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) | Self::Configuration(_) => ErrorKind::Validation,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::NotTrained(_) => ErrorKind::NotTrained,
            Self::Parse { .. } | Self::Serde(_) => ErrorKind::Parse,
            Self::Backend { .. }
            | Self::Timeout(_)
            | Self::Cancelled
            | Self::Io(_)
            | Self::Polars(_) => ErrorKind::Backend,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Backend { retryable, .. } => *retryable,
            Self::Timeout(_) => true,
            _ => false,
        }
    }

    /// Message safe to hand back to a client. Backend-side failures are
    /// collapsed to a generic line; the detail goes to the log.
    pub fn public_message(&self) -> String {
        match self.kind() {
            ErrorKind::Validation | ErrorKind::NotFound | ErrorKind::NotTrained => self.to_string(),
            ErrorKind::Backend => match self {
                Self::Timeout(secs) => format!("Backend timed out after {} seconds", secs),
                Self::Cancelled => "Operation cancelled".to_string(),
                _ => "Backend execution failed".to_string(),
            },
            ErrorKind::Parse => "Backend returned malformed output".to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ForgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds_are_distinct() {
        assert_eq!(ForgeError::NotFound("m".into()).kind(), ErrorKind::NotFound);
        assert_eq!(ForgeError::NotTrained("m".into()).kind(), ErrorKind::NotTrained);
        assert_eq!(ForgeError::backend("boom").kind(), ErrorKind::Backend);
        assert_eq!(
            ForgeError::Parse { message: "bad".into(), raw: "xx".into() }.kind(),
            ErrorKind::Parse
        );
    }

    #[test]
    fn test_public_message_hides_backend_detail() {
        let err = ForgeError::backend("Traceback: secret path /srv/x.py");
        assert_eq!(err.public_message(), "Backend execution failed");

        let err = ForgeError::Validation("Dataset is empty".into());
        assert!(err.public_message().contains("Dataset is empty"));
    }

    #[test]
    fn test_retryable() {
        assert!(ForgeError::Timeout(5).is_retryable());
        assert!(ForgeError::transient("connection reset").is_retryable());
        assert!(!ForgeError::backend("exit 1").is_retryable());
        assert!(!ForgeError::NotFound("x".into()).is_retryable());
    }
}
