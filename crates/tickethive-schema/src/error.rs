use thiserror::Error;

/// Error taxonomy shared across the workspace.
///
/// `Validation` and `NotFound` are reported to the caller as-is.
/// `CapabilityUnavailable` means an LLM or embedding call failed after the
/// internal retry; nothing was committed. `Conflict` means a concurrent
/// write raced on the same incident record.
#[derive(Debug, Error)]
pub enum Error {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("capability unavailable: {0}")]
    CapabilityUnavailable(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn capability(msg: impl Into<String>) -> Self {
        Self::CapabilityUnavailable(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_includes_detail() {
        let err = Error::validation("admin message must not be empty");
        assert_eq!(
            err.to_string(),
            "validation error: admin message must not be empty"
        );
    }

    #[test]
    fn internal_wraps_anyhow() {
        let err: Error = anyhow::anyhow!("disk on fire").into();
        assert!(matches!(err, Error::Internal(_)));
        assert_eq!(err.to_string(), "disk on fire");
    }
}
