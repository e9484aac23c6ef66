//! adtun Configuration
//!
//! One TOML file with a section per layer. Every field has a default, so
//! an empty file (or none at all) is a valid configuration.
//!
//! ```toml
//! [tunnel]
//! mtu = 1420
//! routes = ["0.0.0.0/0"]
//!
//! [filter]
//! list_path = "/etc/adtun/extra.list"
//!
//! [control]
//! require_consent = true
//! ```

use adtun_filter::FilterConfig;
use adtun_vpn::{ConfigError, PumpConfig, TunnelConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Config file looked up in the working directory when none is given
pub const DEFAULT_CONFIG_FILE: &str = "adtun.toml";

/// `[control]` section
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlConfig {
    /// Ask before the first tunnel is created
    #[serde(default)]
    pub require_consent: bool,
}

/// `[diagnostics]` section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticsConfig {
    #[serde(default = "default_log_path")]
    pub path: PathBuf,
    /// File is reset once it would grow past this
    #[serde(default = "default_max_bytes")]
    pub max_bytes: u64,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_log_path() -> PathBuf {
    PathBuf::from("adtun.log")
}

fn default_max_bytes() -> u64 {
    5 * 1024 * 1024 // 5 MB
}

fn default_true() -> bool {
    true
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            path: default_log_path(),
            max_bytes: default_max_bytes(),
            enabled: true,
        }
    }
}

/// Complete adtun configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdtunConfig {
    #[serde(default)]
    pub tunnel: TunnelConfig,
    #[serde(default)]
    pub pump: PumpConfig,
    #[serde(default)]
    pub filter: FilterConfig,
    #[serde(default)]
    pub control: ControlConfig,
    #[serde(default)]
    pub diagnostics: DiagnosticsConfig,
}

impl AdtunConfig {
    /// Parse from TOML
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Load from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Load `explicit` if given, else [`DEFAULT_CONFIG_FILE`] if present,
    /// else defaults. Returns the path actually read.
    pub fn discover(explicit: Option<&Path>) -> Result<(Self, Option<PathBuf>), ConfigError> {
        if let Some(path) = explicit {
            return Ok((Self::load(path)?, Some(path.to_path_buf())));
        }
        let fallback = Path::new(DEFAULT_CONFIG_FILE);
        if fallback.is_file() {
            return Ok((Self::load(fallback)?, Some(fallback.to_path_buf())));
        }
        Ok((Self::default(), None))
    }

    /// Export as TOML
    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.tunnel.validate()?;
        self.pump.validate(self.tunnel.mtu)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_empty_config_is_default() {
        let config = AdtunConfig::from_toml("").unwrap();

        assert_eq!(config, AdtunConfig::default());
        assert!(!config.control.require_consent);
        assert_eq!(config.diagnostics.max_bytes, 5 * 1024 * 1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_sections() {
        let config = AdtunConfig::from_toml(
            r#"
[tunnel]
name = "ads0"
mtu = 1400

[pump]
idle_pause_ms = 25

[filter]
reverse_lookup = false

[control]
require_consent = true

[diagnostics]
enabled = false
"#,
        )
        .unwrap();

        assert_eq!(config.tunnel.name, "ads0");
        assert_eq!(config.tunnel.mtu, 1400);
        assert_eq!(config.pump.idle_pause_ms, 25);
        assert_eq!(config.pump.buffer_size, 32767);
        assert!(!config.filter.reverse_lookup);
        assert!(config.control.require_consent);
        assert!(!config.diagnostics.enabled);
        assert_eq!(config.diagnostics.path, PathBuf::from("adtun.log"));
    }

    #[test]
    fn test_parse_error() {
        let result = AdtunConfig::from_toml("[tunnel]\nmtu = \"big\"");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_validate_cross_section() {
        let config = AdtunConfig::from_toml("[tunnel]\nmtu = 9000\n[pump]\nbuffer_size = 4096").unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::BufferTooSmall { buffer: 4096, mtu: 9000 })
        ));
    }

    #[test]
    fn test_load_explicit_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[tunnel]\nmtu = 1280").unwrap();

        let (config, path) = AdtunConfig::discover(Some(file.path())).unwrap();
        assert_eq!(config.tunnel.mtu, 1280);
        assert_eq!(path.as_deref(), Some(file.path()));
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = AdtunConfig::discover(Some(&dir.path().join("nope.toml")));
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }

    #[test]
    fn test_toml_export_roundtrip() {
        let config = AdtunConfig::default();
        let parsed = AdtunConfig::from_toml(&config.to_toml()).unwrap();
        assert_eq!(parsed, config);
    }
}
