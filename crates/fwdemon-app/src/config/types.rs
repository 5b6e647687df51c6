//! Configuration types for fwdemon
//!
//! Defines:
//! - `Settings` - Everything in `.fwdemon/config.toml`
//! - `SessionSettings`, `BuildSettings`, `DeploySettings` - One per section

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use fwdemon_core::prelude::*;
use fwdemon_core::timeout_from_secs;
use fwdemon_device::SessionConfig;

/// Upstream CircuitPython repository
pub const DEFAULT_REMOTE: &str = "https://github.com/adafruit/circuitpython.git";

/// Ports searched for a board, in order
pub const DEFAULT_PORTS: [&str; 2] = ["atmel-samd", "nrf"];

/// Build cache directory name under the home directory
pub const BUILD_CACHE_DIR: &str = ".fw_builds";

/// Application settings (.fwdemon/config.toml)
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default)]
    pub session: SessionSettings,

    #[serde(default)]
    pub build: BuildSettings,

    #[serde(default)]
    pub deploy: DeploySettings,
}

/// `[session]` section
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SessionSettings {
    /// Directory with the per-device helper scripts and session logs
    #[serde(default)]
    pub scripts_dir: Option<PathBuf>,

    #[serde(default = "default_session_tool")]
    pub session_tool: String,

    #[serde(default = "default_shell")]
    pub shell: String,

    /// Seconds to wait for USB re-enumeration after a reset
    #[serde(default = "default_reenumerate_settle")]
    pub reenumerate_settle_secs: f64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            scripts_dir: None,
            session_tool: default_session_tool(),
            shell: default_shell(),
            reenumerate_settle_secs: default_reenumerate_settle(),
        }
    }
}

impl SessionSettings {
    /// Scripts directory, falling back to `<config_dir>/.fwdemon/devices`
    pub fn scripts_dir(&self, config_dir: &std::path::Path) -> PathBuf {
        self.scripts_dir
            .clone()
            .unwrap_or_else(|| config_dir.join(".fwdemon").join("devices"))
    }

    /// Resolve into the device layer's session configuration
    pub fn to_session_config(&self, config_dir: &std::path::Path) -> Result<SessionConfig> {
        let mut config = SessionConfig::new(self.scripts_dir(config_dir));
        config.session_tool = self.session_tool.clone();
        config.shell = self.shell.clone();
        config.reenumerate_settle = timeout_from_secs(self.reenumerate_settle_secs)
            .map_err(|e| Error::config(format!("[session] reenumerate_settle_secs: {}", e)))?;
        Ok(config)
    }
}

/// `[build]` section
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct BuildSettings {
    /// Local clone of the firmware source
    #[serde(default)]
    pub source_dir: Option<PathBuf>,

    #[serde(default = "default_remote")]
    pub remote: String,

    /// Revision the shared clone is returned to after every build
    #[serde(default = "default_baseline")]
    pub baseline_revision: String,

    #[serde(default = "default_ports")]
    pub ports: Vec<String>,

    /// Root of the build cache; defaults to `~/.fw_builds`
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,

    #[serde(default = "default_shell")]
    pub shell: String,
}

impl Default for BuildSettings {
    fn default() -> Self {
        Self {
            source_dir: None,
            remote: default_remote(),
            baseline_revision: default_baseline(),
            ports: default_ports(),
            cache_dir: None,
            shell: default_shell(),
        }
    }
}

impl BuildSettings {
    pub fn source_dir(&self) -> Result<PathBuf> {
        match &self.source_dir {
            Some(dir) => Ok(dir.clone()),
            None => home_dir().map(|home| home.join("circuitpython")),
        }
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        match &self.cache_dir {
            Some(dir) => Ok(dir.clone()),
            None => home_dir().map(|home| home.join(BUILD_CACHE_DIR)),
        }
    }
}

/// `[deploy]` section
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DeploySettings {
    /// Seconds to wait for the board to reboot after an upload
    #[serde(default = "default_reboot_settle")]
    pub reboot_settle_secs: f64,
}

impl Default for DeploySettings {
    fn default() -> Self {
        Self {
            reboot_settle_secs: default_reboot_settle(),
        }
    }
}

impl DeploySettings {
    pub fn reboot_settle(&self) -> Result<std::time::Duration> {
        timeout_from_secs(self.reboot_settle_secs)
            .map_err(|e| Error::config(format!("[deploy] reboot_settle_secs: {}", e)))
    }
}

fn home_dir() -> Result<PathBuf> {
    dirs::home_dir().ok_or_else(|| Error::config("could not determine the home directory"))
}

fn default_session_tool() -> String {
    "screen".to_string()
}

fn default_shell() -> String {
    "bash".to_string()
}

fn default_reenumerate_settle() -> f64 {
    30.0
}

fn default_remote() -> String {
    DEFAULT_REMOTE.to_string()
}

fn default_baseline() -> String {
    "main".to_string()
}

fn default_ports() -> Vec<String> {
    DEFAULT_PORTS.iter().map(|p| p.to_string()).collect()
}

fn default_reboot_settle() -> f64 {
    10.0
}
