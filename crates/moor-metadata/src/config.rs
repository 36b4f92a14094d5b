//! Metadata client configuration

use std::path::PathBuf;
use std::time::Duration;

/// Well-known metadata service base URL
pub const DEFAULT_ENDPOINT: &str = "http://169.254.169.254/";

/// Lifetime requested for each token (6 hours, the service maximum)
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(21600);

/// Tokens are refreshed this long before they would expire
pub const DEFAULT_REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// Metadata client configuration
#[derive(Debug, Clone)]
pub struct MetadataConfig {
    /// Base URL of the metadata service, always ending in `/`
    pub endpoint: String,

    /// TTL requested when issuing a token
    pub token_ttl: Duration,

    /// Safety margin subtracted from the TTL when judging staleness
    pub refresh_margin: Duration,

    /// Directory holding the token cache file
    /// If None, a per-user runtime directory is derived at first use
    pub cache_dir: Option<PathBuf>,

    /// Per-request timeout
    pub timeout: Duration,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            token_ttl: DEFAULT_TOKEN_TTL,
            refresh_margin: DEFAULT_REFRESH_MARGIN,
            cache_dir: None,
            timeout: Duration::from_secs(5),
        }
    }
}

impl MetadataConfig {
    /// Create a config pointing at a specific endpoint
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self::default().with_endpoint(endpoint)
    }

    /// Set the endpoint; a trailing `/` is added if missing
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        let mut endpoint = endpoint.into();
        if !endpoint.ends_with('/') {
            endpoint.push('/');
        }
        self.endpoint = endpoint;
        self
    }

    /// Set the token TTL
    pub fn with_token_ttl(mut self, ttl: Duration) -> Self {
        self.token_ttl = ttl;
        self
    }

    /// Set the token cache directory
    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    /// Set the request timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Age after which a cached token must be refreshed
    pub fn max_token_age(&self) -> Duration {
        self.token_ttl.saturating_sub(self.refresh_margin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = MetadataConfig::default();
        assert_eq!(config.endpoint, "http://169.254.169.254/");
        assert_eq!(config.token_ttl.as_secs(), 21600);
        assert_eq!(config.max_token_age().as_secs(), 21540);
        assert!(config.cache_dir.is_none());
    }

    #[test]
    fn test_endpoint_normalized() {
        let config = MetadataConfig::new("http://127.0.0.1:8080");
        assert_eq!(config.endpoint, "http://127.0.0.1:8080/");

        let config = MetadataConfig::new("http://127.0.0.1:8080/");
        assert_eq!(config.endpoint, "http://127.0.0.1:8080/");
    }
}
