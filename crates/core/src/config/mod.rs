//! Gateway configuration with layered loading.
//!
//! This module provides configuration management using figment for layered
//! configuration loading from multiple sources:
//!
//! 1. Environment variables (RENDERGATE_*)
//! 2. TOML config file (if RENDERGATE_CONFIG_FILE set)
//! 3. Built-in defaults

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

mod validation;

pub use validation::ConfigError;

/// How render traffic maps onto the crawler's per-slot concurrency limits.
///
/// An unrecognized policy name fails configuration loading; there is no
/// fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotPolicy {
    /// Pin render calls to a slot derived from the target host, so render
    /// traffic respects the target's own politeness settings.
    #[default]
    PerDomain,

    /// Funnel all render calls through one fixed slot.
    SingleSlot,

    /// Leave the crawler's host-based slotting untouched.
    Default,
}

/// Gateway configuration with layered loading.
///
/// Loading precedence (highest wins):
/// 1. Environment variables (RENDERGATE_*)
/// 2. TOML config file (if RENDERGATE_CONFIG_FILE set)
/// 3. Built-in defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateConfig {
    /// Base URL of the render service.
    ///
    /// Set via RENDERGATE_BASE_URL environment variable.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Default render endpoint, joined onto the base URL. Individual
    /// requests may override it.
    ///
    /// Set via RENDERGATE_ENDPOINT environment variable.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Default slot policy for render calls. Individual requests may
    /// override it.
    ///
    /// Set via RENDERGATE_SLOT_POLICY environment variable
    /// (per_domain | single_slot | default).
    #[serde(default)]
    pub slot_policy: SlotPolicy,

    /// Whether to log the envelope of render responses reporting HTTP 400.
    ///
    /// Set via RENDERGATE_LOG_400 environment variable.
    #[serde(default = "default_true")]
    pub log_400: bool,

    /// Whether to log every cookie sent to and received from rendered pages.
    ///
    /// Set via RENDERGATE_COOKIES_DEBUG environment variable.
    #[serde(default)]
    pub cookies_debug: bool,
}

fn default_base_url() -> String {
    "http://127.0.0.1:8050".into()
}

fn default_endpoint() -> String {
    "render.json".into()
}

fn default_true() -> bool {
    true
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            endpoint: default_endpoint(),
            slot_policy: SlotPolicy::default(),
            log_400: true,
            cookies_debug: false,
        }
    }
}

impl GateConfig {
    /// Load configuration from all sources with layered precedence.
    ///
    /// Priority (highest wins):
    /// 1. Environment variables prefixed with `RENDERGATE_`
    /// 2. TOML file from `RENDERGATE_CONFIG_FILE` (if set)
    /// 3. Built-in defaults via `Default::default()`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - Configuration file cannot be read
    /// - Environment variables cannot be parsed (including an unrecognized
    ///   slot policy name)
    /// - Validation fails after loading
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Ok(config_path) = std::env::var("RENDERGATE_CONFIG_FILE") {
            figment = figment.merge(Toml::file(&config_path));
        }

        figment = figment.merge(
            Env::prefixed("RENDERGATE_")
                .map(|key| key.as_str().to_lowercase().into())
                .split("__"),
        );

        let config: Self = figment.extract().map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }
}
