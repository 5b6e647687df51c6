//! Settings parser for .fwdemon/config.toml

use super::types::Settings;
use fwdemon_core::prelude::*;
use std::path::{Path, PathBuf};

const CONFIG_FILENAME: &str = "config.toml";
const FWDEMON_DIR: &str = ".fwdemon";

/// Path of the config file under `config_dir`
pub fn config_path(config_dir: &Path) -> PathBuf {
    config_dir.join(FWDEMON_DIR).join(CONFIG_FILENAME)
}

/// Load settings from `.fwdemon/config.toml`.
///
/// A missing file yields the defaults. An unreadable or invalid file is
/// logged and also yields the defaults.
pub fn load_settings(config_dir: &Path) -> Settings {
    let config_path = config_path(config_dir);

    if !config_path.exists() {
        debug!("No config file at {:?}, using defaults", config_path);
        return Settings::default();
    }

    match std::fs::read_to_string(&config_path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(settings) => {
                debug!("Loaded settings from {:?}", config_path);
                settings
            }
            Err(e) => {
                warn!("Failed to parse {:?}: {}", config_path, e);
                Settings::default()
            }
        },
        Err(e) => {
            warn!("Failed to read {:?}: {}", config_path, e);
            Settings::default()
        }
    }
}
