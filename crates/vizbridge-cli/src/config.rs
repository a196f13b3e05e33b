//! Configuration types for the vizbridge caller.
//! Parsed from ~/.vizbridge/config.toml, then overridden from the environment.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use vizbridge_client::SessionConfig;
use vizbridge_protocol::{
    DEFAULT_HOST, DEFAULT_PORT, DEFAULT_TIMEOUT_SECS, MAX_FRAME_BYTES,
};

use crate::expand_tilde;

pub const ENV_HOST: &str = "VIZBRIDGE_HOST";
pub const ENV_PORT: &str = "VIZBRIDGE_PORT";
pub const ENV_AUTH_TOKEN: &str = "VIZBRIDGE_AUTH_TOKEN";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CliConfig {
    #[serde(default)]
    pub bridge: BridgeSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub auth_token: Option<String>,
    /// Read the token from this file when `auth_token` is unset.
    pub auth_token_file: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
}

impl Default for BridgeSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            auth_token: None,
            auth_token_file: None,
            timeout_secs: default_timeout_secs(),
            max_frame_bytes: default_max_frame_bytes(),
        }
    }
}

// Default value functions
fn default_host() -> String {
    DEFAULT_HOST.into()
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}
fn default_max_frame_bytes() -> usize {
    MAX_FRAME_BYTES
}

impl CliConfig {
    /// Load config from file, or defaults if missing.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: CliConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Apply `VIZBRIDGE_*` overrides from the process environment.
    pub fn apply_env(&mut self) -> anyhow::Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from any key lookup. Empty values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> anyhow::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(host) = get(ENV_HOST) {
            self.bridge.host = host.trim().to_string();
        }
        if let Some(port) = get(ENV_PORT) {
            self.bridge.port = port
                .trim()
                .parse()
                .map_err(|_| anyhow::anyhow!("{ENV_PORT} must be a port number, got {port:?}"))?;
        }
        if let Some(token) = get(ENV_AUTH_TOKEN) {
            self.bridge.auth_token = Some(token);
        }
        Ok(())
    }

    /// The token to present in `hello`, if one is configured.
    pub fn resolve_token(&self) -> anyhow::Result<Option<String>> {
        if let Some(token) = self.bridge.auth_token.as_deref() {
            if !token.is_empty() {
                return Ok(Some(token.to_string()));
            }
        }
        match &self.bridge.auth_token_file {
            Some(file) => {
                let path = expand_tilde(file);
                let token = std::fs::read_to_string(&path)
                    .map_err(|e| anyhow::anyhow!("cannot read token file {}: {e}", path.display()))?;
                let token = token.trim().to_string();
                Ok((!token.is_empty()).then_some(token))
            }
            None => Ok(None),
        }
    }

    pub fn session_config(&self) -> anyhow::Result<SessionConfig> {
        Ok(SessionConfig {
            host: self.bridge.host.clone(),
            port: self.bridge.port,
            auth_token: self.resolve_token()?,
            timeout: Duration::from_secs(self.bridge.timeout_secs),
            max_frame_bytes: self.bridge.max_frame_bytes,
        })
    }
}
