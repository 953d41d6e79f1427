use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TunnelError};

fn default_max_sockets() -> usize {
    10
}

fn default_idle_timeout_secs() -> u64 {
    5
}

fn default_bind_addr() -> String {
    "0.0.0.0".to_string()
}

/// Settings shared by every tunnel: the socket cap enforced by
/// [`crate::tunnel::ClientTunnel`] and the idle-destroy duration. Loaded
/// the same way as the teacher's settings: an optional TOML file,
/// `#[serde(default)]` filling in anything the file omits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub max_sockets: usize,
    pub idle_timeout_secs: u64,
    pub bind_addr: String,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            max_sockets: default_max_sockets(),
            idle_timeout_secs: default_idle_timeout_secs(),
            bind_addr: default_bind_addr(),
        }
    }
}

impl CoreConfig {
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
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn defaults_match_spec() {
        let cfg = CoreConfig::default();
        assert_eq!(cfg.max_sockets, 10);
        assert_eq!(cfg.idle_timeout_secs, 5);
    }

    #[test]
    fn missing_path_yields_default() {
        let cfg = CoreConfig::load(None).unwrap();
        assert_eq!(cfg.max_sockets, 10);
    }

    #[test]
    fn parses_partial_toml_with_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "max_sockets = 25").unwrap();
        let cfg = CoreConfig::load(Some(file.path())).unwrap();
        assert_eq!(cfg.max_sockets, 25);
        assert_eq!(cfg.idle_timeout_secs, 5);
    }

    #[test]
    fn invalid_toml_errors() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "max_sockets = [this is not valid").unwrap();
        assert!(CoreConfig::load(Some(file.path())).is_err());
    }
}
