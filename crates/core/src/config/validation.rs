//! Configuration validation rules.
//!
//! This module provides validation logic for `GateConfig` values
//! after they have been loaded from environment, files, or defaults.

use crate::config::GateConfig;
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("invalid configuration: {field} - {reason}")]
    Invalid { field: String, reason: String },
}

impl GateConfig {
    /// Validate configuration values after loading.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if:
    /// - `base_url` is not a valid http/https URL
    /// - `endpoint` is empty
    pub fn validate(&self) -> Result<(), ConfigError> {
        let base = url::Url::parse(&self.base_url)
            .map_err(|e| ConfigError::Invalid { field: "base_url".into(), reason: e.to_string() })?;

        match base.scheme() {
            "http" | "https" => {}
            scheme => {
                return Err(ConfigError::Invalid {
                    field: "base_url".into(),
                    reason: format!("unsupported scheme: {scheme}"),
                });
            }
        }

        if self.endpoint.trim_matches('/').is_empty() {
            return Err(ConfigError::Invalid { field: "endpoint".into(), reason: "must not be empty".into() });
        }

        Ok(())
    }
}
