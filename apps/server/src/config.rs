//! Server configuration loading.
//!
//! A YAML file provides the persistent configuration; CLI flags and the
//! recognized environment variables override it.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Configuration for the standalone server.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    /// Port to bind the HTTP/WS server to (0 = auto-allocate).
    pub bind_port: u16,

    /// Default recognition language.
    pub language: String,

    /// Default recognition model.
    pub model: String,

    /// Path to recognizer credentials, passed through to the backend client.
    pub credentials_path: Option<String>,

    /// Upstream project identifier.
    pub project_id: Option<String>,

    /// Base URL of the transcript backend webhook. Empty disables it.
    pub backend_base_url: String,

    /// Bearer token for webhook requests.
    pub backend_service_token: Option<String>,

    /// Webhook timeout in seconds.
    pub backend_timeout_secs: u64,

    /// Slide index files to preload: presentation id -> JSON index path.
    pub slide_indexes: std::collections::HashMap<String, String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let core = lectern_core::Config::default();
        Self {
            bind_port: 0,
            language: core.default_language,
            model: core.default_model,
            credentials_path: None,
            project_id: None,
            backend_base_url: String::new(),
            backend_service_token: None,
            backend_timeout_secs: core.backend.timeout_secs,
            slide_indexes: std::collections::HashMap::new(),
        }
    }
}

impl ServerConfig {
    /// Loads configuration from a YAML file, or defaults when absent.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => {
                let contents = std::fs::read_to_string(path)
                    .with_context(|| format!("reading config file {}", path.display()))?;
                serde_yaml::from_str(&contents)
                    .with_context(|| format!("parsing config file {}", path.display()))
            }
            None => Ok(Self::default()),
        }
    }

    /// Converts into the core configuration, layering environment overrides
    /// on top of the file values.
    pub fn to_core_config(&self) -> lectern_core::Config {
        // Environment wins over the file for the webhook keys, matching the
        // documented configuration surface.
        let mut config = lectern_core::Config::from_env();
        config.preferred_port = self.bind_port;
        config.default_language = self.language.clone();
        config.default_model = self.model.clone();
        if config.credentials_path.is_none() {
            config.credentials_path = self.credentials_path.clone();
        }
        if config.project_id.is_none() {
            config.project_id = self.project_id.clone();
        }
        if config.backend.base_url.is_empty() {
            config.backend.base_url = self.backend_base_url.trim_end_matches('/').to_string();
        }
        if config.backend.service_token.is_none() {
            config.backend.service_token = self.backend_service_token.clone();
        }
        if !self.backend_base_url.is_empty() && self.backend_timeout_secs > 0 {
            config.backend.timeout_secs = self.backend_timeout_secs;
        }
        config
    }
}
