//! Error types for the consumer service.

use thiserror::Error;

/// Failure to retrieve a raw file or its listing.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FetchError {
    /// Network or server trouble; retrying may help.
    #[error("transient fetch failure for {path}: {message}")]
    Transient { path: String, message: String },

    /// The file is missing or refused; retrying will not help.
    #[error("fetch failed for {path}: {message}")]
    Permanent { path: String, message: String },

    #[error("fetch of {path} timed out after {secs}s")]
    Timeout { path: String, secs: u64 },
}

impl FetchError {
    pub fn transient(path: impl Into<String>, message: impl ToString) -> Self {
        Self::Transient {
            path: path.into(),
            message: message.to_string(),
        }
    }

    pub fn permanent(path: impl Into<String>, message: impl ToString) -> Self {
        Self::Permanent {
            path: path.into(),
            message: message.to_string(),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

/// Invalid or incomplete environment configuration.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("missing required environment variables: {}", .0.join(", "))]
    Missing(Vec<String>),

    #[error("invalid value for {var}: {message}")]
    Invalid { var: String, message: String },
}

/// Invalid init time selection.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("invalid init time selection: {0}")]
pub struct SelectionError(pub String);

/// Errors setting up a fetcher.
#[derive(Error, Debug)]
pub enum ConsumerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_vars_listed_together() {
        let err = ConfigError::Missing(vec!["NWP_PROVIDER".into(), "NWP_STORE_URL".into()]);
        assert_eq!(
            err.to_string(),
            "missing required environment variables: NWP_PROVIDER, NWP_STORE_URL"
        );
    }

    #[test]
    fn test_only_transient_fetch_errors_retry() {
        assert!(FetchError::transient("a", "reset").is_transient());
        assert!(!FetchError::permanent("a", "404").is_transient());
        assert!(!FetchError::Timeout {
            path: "a".into(),
            secs: 5
        }
        .is_transient());
    }
}
