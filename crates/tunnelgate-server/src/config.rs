use std::path::Path;

use serde::{Deserialize, Serialize};
use tunnelgate_core::config::CoreConfig;
use tunnelgate_core::error::{Result, TunnelError};

fn default_public_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_public_port() -> u16 {
    8080
}

fn default_domain() -> String {
    "example.com".to_string()
}

fn default_marketing_url() -> String {
    "https://localtunnel.github.io/www/".to_string()
}

/// Public-facing settings layered on top of [`CoreConfig`], mirroring the
/// teacher's per-section `#[serde(default)]` settings shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub public_bind: String,
    pub public_port: u16,
    pub domain: String,
    pub marketing_url: String,
    #[serde(flatten)]
    pub core: CoreConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            public_bind: default_public_bind(),
            public_port: default_public_port(),
            domain: default_domain(),
            marketing_url: default_marketing_url(),
            core: CoreConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let Some(path) = config_path else {
            return Ok(Self::default());
        };
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        toml::from_str(&raw).map_err(|e| TunnelError::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.public_port, 8080);
        assert_eq!(cfg.core.max_sockets, 10);
    }

    #[test]
    fn missing_config_path_yields_default() {
        let cfg = ServerConfig::load(None).unwrap();
        assert_eq!(cfg.domain, "example.com");
    }
}
