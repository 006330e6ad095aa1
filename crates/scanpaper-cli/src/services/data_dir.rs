// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Data directory resolution and the persisted engine configuration.

use std::path::{Path, PathBuf};

use scanpaper_core::config::EngineConfig;
use scanpaper_core::error::Result;
use tracing::{debug, warn};

const CONFIG_FILE: &str = "config.json";
const SESSION_FILE: &str = "session.db";

/// Return the application data directory, creating it if needed.
pub fn data_dir() -> PathBuf {
    let dir = dirs_fallback().join("scanpaper");
    if let Err(e) = std::fs::create_dir_all(&dir) {
        warn!(dir = %dir.display(), error = %e, "cannot create data directory");
    }
    dir
}

/// Session database used when `--session` is not given.
pub fn default_session() -> PathBuf {
    data_dir().join(SESSION_FILE)
}

pub fn config_path(dir: &Path) -> PathBuf {
    dir.join(CONFIG_FILE)
}

/// Load `config.json` from `dir`. A missing or unreadable file yields the
/// defaults.
pub fn load_config(dir: &Path) -> EngineConfig {
    let path = config_path(dir);
    let text = match std::fs::read_to_string(&path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "no config file, using defaults");
            return EngineConfig::default();
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "cannot read config, using defaults");
            return EngineConfig::default();
        }
    };
    serde_json::from_str(&text).unwrap_or_else(|e| {
        warn!(path = %path.display(), error = %e, "invalid config, using defaults");
        EngineConfig::default()
    })
}

pub fn save_config(dir: &Path, config: &EngineConfig) -> Result<PathBuf> {
    let path = config_path(dir);
    std::fs::write(&path, serde_json::to_string_pretty(config)?)?;
    Ok(path)
}

fn dirs_fallback() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
        return PathBuf::from(xdg);
    }
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".local").join("share");
    }
    std::env::temp_dir()
}
