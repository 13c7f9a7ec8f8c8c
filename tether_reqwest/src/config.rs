use serde::Deserialize;
use tether_tokens::ConfigError;

/// Where calls are sent
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ExecutorConfig {
    /// Base URL that call paths are appended to
    #[serde(default)]
    pub base_url: String,
}

impl ExecutorConfig {
    /// Constructs a configuration for `base_url`
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }

    /// Checks that the base URL is configured and valid
    pub fn validate(&self) -> Result<reqwest::Url, ConfigError> {
        let base_url = self.base_url.trim();
        if base_url.is_empty() {
            return Err(ConfigError::Missing { key: "base_url" });
        }

        base_url.parse().map_err(|source| ConfigError::InvalidUrl {
            key: "base_url",
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_base_url_is_missing() {
        let err = ExecutorConfig::new(" ").validate().unwrap_err();
        assert!(matches!(err, ConfigError::Missing { key: "base_url" }));
    }

    #[test]
    fn relative_base_url_is_invalid() {
        let err = ExecutorConfig::new("pod/agent").validate().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidUrl { .. }));
    }
}
