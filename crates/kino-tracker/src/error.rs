//! Error types for Kino Tracker

use crate::player::ProviderFault;
use thiserror::Error;

/// Result type alias for tracker operations
pub type Result<T> = std::result::Result<T, Error>;

/// Tracker error types
#[derive(Error, Debug)]
pub enum Error {
    // Schedule provider errors
    #[error("Ad session bootstrap failed: {0}")]
    SessionBootstrap(String),

    #[error("Failed to fetch ad schedule: {0}")]
    ScheduleFetch(String),

    // Network errors
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    // Provider errors
    #[error("Provider introspection failed: {0}")]
    Provider(#[from] ProviderFault),

    #[error("Missing capability: {0}")]
    MissingCapability(String),

    #[error("No async runtime available for background work")]
    NoRuntime,

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a bootstrap error
    pub fn bootstrap(msg: impl Into<String>) -> Self {
        Error::SessionBootstrap(msg.into())
    }

    /// Returns the error code reported with the canonical ERROR event
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::SessionBootstrap(_) => "AD_SESSION_BOOTSTRAP",
            Error::ScheduleFetch(_) => "AD_SCHEDULE_FETCH",
            Error::Network(_) => "NETWORK",
            Error::InvalidUrl(_) => "INVALID_URL",
            Error::Provider(_) => "PROVIDER",
            Error::MissingCapability(_) => "MISSING_CAPABILITY",
            Error::NoRuntime => "NO_RUNTIME",
            Error::InvalidConfig(_) => "INVALID_CONFIG",
            Error::Json(_) => "JSON",
            Error::Io(_) => "IO",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(Error::bootstrap("503").error_code(), "AD_SESSION_BOOTSTRAP");
        assert_eq!(
            Error::ScheduleFetch("404".into()).error_code(),
            "AD_SCHEDULE_FETCH"
        );
    }

    #[test]
    fn test_capability_gap_message() {
        let gap = Error::MissingCapability("ads plugin".to_string());
        assert_eq!(gap.to_string(), "Missing capability: ads plugin");
        assert_eq!(gap.error_code(), "MISSING_CAPABILITY");
        assert_eq!(Error::NoRuntime.error_code(), "NO_RUNTIME");
    }
}
