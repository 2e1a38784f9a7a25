//! Bridge configuration, persisted as TOML under the user config dir.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

/// Current config schema version for future migration support
const CONFIG_VERSION: u32 = 1;

/// Reconnect backoff bounds for the connection manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// Delay before the second attempt; doubles per attempt after that.
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    /// Ceiling the doubling delay never exceeds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Attempts per reconnect cycle before latching offline.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_attempts: default_max_attempts(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Schema version for migration support
    #[serde(default = "default_version")]
    pub version: u32,
    /// Address of the deck device's TCP endpoint.
    #[serde(default = "default_device_addr")]
    pub device_addr: String,
    /// How long an outbound request may wait for its response.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            device_addr: default_device_addr(),
            request_timeout_ms: default_request_timeout_ms(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl BridgeConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

fn default_version() -> u32 {
    1
}

fn default_device_addr() -> String {
    "127.0.0.1:28186".to_string()
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_initial_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    8_000
}

fn default_max_attempts() -> u32 {
    5
}

/// Returns the path to the config file: ~/.config/deckbridge/bridge.toml
pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("deckbridge").join("bridge.toml"))
}

/// Save the config.
/// Uses atomic writes (write to temp, then rename) to prevent corruption.
/// Keeps a .bak backup of the previous config.
pub fn save_config(config: &BridgeConfig) -> Result<()> {
    let Some(path) = config_path() else {
        anyhow::bail!("Could not determine config directory");
    };
    save_to_path(config, &path)
}

fn save_to_path(config: &BridgeConfig, path: &PathBuf) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create config directory: {}", parent.display()))?;
    }

    let contents =
        toml::to_string_pretty(config).context("Failed to serialize config to TOML")?;

    let tmp_path = path.with_extension("toml.tmp");
    let bak_path = path.with_extension("toml.bak");

    fs::write(&tmp_path, &contents)
        .with_context(|| format!("Failed to write temp config file: {}", tmp_path.display()))?;

    if path.exists() {
        let _ = fs::remove_file(&bak_path);
        fs::rename(path, &bak_path)
            .with_context(|| format!("Failed to backup config file: {}", path.display()))?;
    }

    fs::rename(&tmp_path, path)
        .with_context(|| format!("Failed to finalize config file: {}", path.display()))?;

    Ok(())
}

/// Load the config, or return defaults if no file exists.
/// If the main config is corrupted, attempts to load from backup.
pub fn load_config() -> Result<BridgeConfig> {
    let Some(path) = config_path() else {
        return Ok(BridgeConfig::default());
    };
    load_with_fallback(&path)
}

fn load_with_fallback(path: &PathBuf) -> Result<BridgeConfig> {
    let bak_path = path.with_extension("toml.bak");

    if !path.exists() {
        if bak_path.exists() {
            tracing::warn!(path = %bak_path.display(), "main config missing, loading backup");
            return load_from_path(&bak_path);
        }
        return Ok(BridgeConfig::default());
    }

    match load_from_path(path) {
        Ok(config) => Ok(config),
        Err(e) => {
            if bak_path.exists() {
                tracing::warn!(error = %e, "main config corrupted, loading backup");
                return load_from_path(&bak_path);
            }
            Err(e)
        }
    }
}

fn load_from_path(path: &PathBuf) -> Result<BridgeConfig> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: BridgeConfig = toml::from_str(&contents)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

    // Future: handle migrations based on config.version
    if config.version > CONFIG_VERSION {
        tracing::warn!(
            found = config.version,
            supported = CONFIG_VERSION,
            "config version is newer than supported"
        );
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sensible() {
        let config = BridgeConfig::default();
        assert_eq!(config.device_addr, "127.0.0.1:28186");
        assert_eq!(config.request_timeout(), Duration::from_secs(10));
        assert_eq!(config.reconnect.max_attempts, 5);
        assert!(config.reconnect.initial_delay_ms <= config.reconnect.max_delay_ms);
    }

    #[test]
    fn toml_roundtrip() {
        let config = BridgeConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: BridgeConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed, config);
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        // Old configs without version or reconnect table still parse.
        let toml = r#"device_addr = "192.168.1.40:28186""#;
        let config: BridgeConfig = toml::from_str(toml).expect("parse");
        assert_eq!(config.version, 1);
        assert_eq!(config.device_addr, "192.168.1.40:28186");
        assert_eq!(config.reconnect, ReconnectConfig::default());
    }

    #[test]
    fn partial_reconnect_table_parses() {
        let toml = r#"
[reconnect]
max_attempts = 3
"#;
        let config: BridgeConfig = toml::from_str(toml).expect("parse");
        assert_eq!(config.reconnect.max_attempts, 3);
        assert_eq!(config.reconnect.initial_delay_ms, 500);
    }

    #[test]
    fn invalid_toml_produces_error() {
        let toml = "this is not valid toml [[[";
        let result: std::result::Result<BridgeConfig, _> = toml::from_str(toml);
        assert!(result.is_err());
    }

    #[test]
    fn save_then_load_roundtrips_and_keeps_backup() {
        let dir = std::env::temp_dir().join(format!("deckbridge-test-{}", std::process::id()));
        let path = dir.join("bridge.toml");

        let first = BridgeConfig::default();
        save_to_path(&first, &path).expect("save");
        assert_eq!(load_with_fallback(&path).expect("load"), first);

        let mut second = first.clone();
        second.device_addr = "10.0.0.2:28186".to_string();
        save_to_path(&second, &path).expect("save again");
        assert_eq!(load_with_fallback(&path).expect("load"), second);
        assert!(path.with_extension("toml.bak").exists());

        // Corrupt the main file: the backup copy takes over.
        fs::write(&path, "not toml [[[").expect("corrupt");
        assert_eq!(load_with_fallback(&path).expect("fallback"), first);

        let _ = fs::remove_dir_all(&dir);
    }
}
