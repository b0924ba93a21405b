use std::path::{Path, PathBuf};

use {
    serde::de::DeserializeOwned,
    tracing::{debug, warn},
};

use crate::{
    env_subst::substitute_env,
    error::{Error, Result},
    schema::HomegwConfig,
};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &["homegw.toml", "homegw.yaml", "homegw.yml", "homegw.json"];

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> Result<HomegwConfig> {
    read_document(path)
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./homegw.{toml,yaml,yml,json}` (project-local)
/// 2. `<user config dir>/homegw/homegw.{toml,yaml,yml,json}` (user-global)
///
/// Returns `HomegwConfig::default()` if no config file is found or the file
/// cannot be parsed.
pub fn discover_and_load() -> HomegwConfig {
    if let Some(path) = find_config_file() {
        debug!(path = %path.display(), "loading config");
        match load_config(&path) {
            Ok(cfg) => return cfg,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
            },
        }
    } else {
        debug!("no config file found, using defaults");
    }
    HomegwConfig::default()
}

/// Find the first config file in standard locations.
pub fn find_config_file() -> Option<PathBuf> {
    // Project-local
    for name in CONFIG_FILENAMES {
        let p = PathBuf::from(name);
        if p.exists() {
            return Some(p);
        }
    }

    let dir = config_dir()?;
    CONFIG_FILENAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|p| p.exists())
}

/// Returns the user-global config directory.
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "homegw").map(|d| d.config_dir().to_path_buf())
}

/// Read a TOML/YAML/JSON document with env substitution applied first.
pub(crate) fn read_document<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
    parse_document(&substitute_env(&raw), path)
}

pub(crate) fn parse_document<T: DeserializeOwned>(raw: &str, path: &Path) -> Result<T> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => toml::from_str(raw).map_err(|e| Error::parse(path, e)),
        "yaml" | "yml" => serde_yaml::from_str(raw).map_err(|e| Error::parse(path, e)),
        "json" => serde_json::from_str(raw).map_err(|e| Error::parse(path, e)),
        other => Err(Error::UnsupportedFormat(other.to_string())),
    }
}
