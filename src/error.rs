use thiserror::Error;

#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("Fetch failed for {url}: {reason}")]
    Fetch { url: String, reason: String },

    #[error("HTTP {status} for {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("Fetch timed out for {url}")]
    Timeout { url: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("JSON (de)serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl DiscoveryError {
    /// Network/HTTP failures: per-link, recoverable by a later manual re-run.
    pub fn is_fetch_error(&self) -> bool {
        matches!(
            self,
            DiscoveryError::Fetch { .. } | DiscoveryError::HttpStatus { .. } | DiscoveryError::Timeout { .. }
        )
    }
}

impl From<rusqlite::Error> for DiscoveryError {
    fn from(err: rusqlite::Error) -> Self {
        DiscoveryError::Storage(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, DiscoveryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_network_failures_are_fetch_errors() {
        let timeout = DiscoveryError::Timeout {
            url: "https://venue.example/".into(),
        };
        let status = DiscoveryError::HttpStatus {
            url: "https://venue.example/".into(),
            status: 503,
        };
        assert!(timeout.is_fetch_error());
        assert!(status.is_fetch_error());
        assert!(!DiscoveryError::Parse("bad date".into()).is_fetch_error());
        assert!(!DiscoveryError::Storage("locked".into()).is_fetch_error());
    }
}
