//! Provider endpoint configuration.

use std::time::Duration;

use enrich_core::defaults;

/// Base URLs and HTTP timeout shared by the provider clients.
///
/// | Env Var | Default |
/// |---------|---------|
/// | `APOLLO_BASE_URL` | `https://api.apollo.io/api/v1` |
/// | `BUILTWITH_BASE_URL` | `https://api.builtwith.com` |
/// | `SCRAPIN_BASE_URL` | `https://api.scrapin.io` |
/// | `PROVIDER_TIMEOUT_SECS` | 30 |
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    pub apollo_url: String,
    pub builtwith_url: String,
    pub scrapin_url: String,
    pub timeout: Duration,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            apollo_url: defaults::APOLLO_URL.to_string(),
            builtwith_url: defaults::BUILTWITH_URL.to_string(),
            scrapin_url: defaults::SCRAPIN_URL.to_string(),
            timeout: Duration::from_secs(defaults::PROVIDER_TIMEOUT_SECS),
        }
    }
}

impl ProviderConfig {
    pub fn from_env() -> Self {
        let base = Self::default();
        Self {
            apollo_url: std::env::var("APOLLO_BASE_URL").unwrap_or(base.apollo_url),
            builtwith_url: std::env::var("BUILTWITH_BASE_URL").unwrap_or(base.builtwith_url),
            scrapin_url: std::env::var("SCRAPIN_BASE_URL").unwrap_or(base.scrapin_url),
            timeout: std::env::var("PROVIDER_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(base.timeout),
        }
    }

    /// Point every provider at one server (used with local mocks).
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        let url = base_url.into();
        Self {
            apollo_url: url.clone(),
            builtwith_url: url.clone(),
            scrapin_url: url,
            ..Default::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_point_at_vendors() {
        let config = ProviderConfig::default();
        assert!(config.apollo_url.starts_with("https://api.apollo.io"));
        assert_eq!(config.timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_with_base_url_shares_server() {
        let config = ProviderConfig::with_base_url("http://127.0.0.1:9999");
        assert_eq!(config.apollo_url, config.scrapin_url);
        assert_eq!(config.builtwith_url, "http://127.0.0.1:9999");
    }
}
