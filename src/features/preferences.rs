//! Per-site auto-unlock preference.
//!
//! A single boolean per site host, stored in `~/.ezy-coin/preferences.json`
//! as `{ "<host>": { "auto_unlock": bool } }`. Writes go to a temp file and
//! are renamed into place.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum PreferenceError {
    #[error("home directory not found")]
    NoHome,

    #[error("preferences file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("preferences file {path} is not valid JSON: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SitePreference {
    #[serde(default)]
    pub auto_unlock: bool,
}

#[derive(Debug, Clone)]
pub struct PreferenceStore {
    path: PathBuf,
}

impl PreferenceStore {
    pub fn default_location() -> Result<Self, PreferenceError> {
        let home = dirs::home_dir().ok_or(PreferenceError::NoHome)?;
        Ok(Self::at(home.join(".ezy-coin").join("preferences.json")))
    }

    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Off unless previously switched on. An unreadable file reads as off.
    pub fn auto_unlock(&self, host: &str) -> bool {
        match self.load() {
            Ok(map) => map.get(host).is_some_and(|p| p.auto_unlock),
            Err(e) => {
                warn!("Ignoring preferences: {}", e);
                false
            }
        }
    }

    pub fn set_auto_unlock(&self, host: &str, enabled: bool) -> Result<(), PreferenceError> {
        let mut map = match self.load() {
            Ok(map) => map,
            Err(PreferenceError::Json { path, source }) => {
                warn!("Replacing unreadable preferences {}: {}", path.display(), source);
                BTreeMap::new()
            }
            Err(e) => return Err(e),
        };
        map.entry(host.to_string()).or_default().auto_unlock = enabled;
        self.save(&map)?;
        info!("Auto-unlock for {} set to {}", host, enabled);
        Ok(())
    }

    fn load(&self) -> Result<BTreeMap<String, SitePreference>, PreferenceError> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(source) => {
                return Err(PreferenceError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        serde_json::from_str(&contents).map_err(|source| PreferenceError::Json {
            path: self.path.clone(),
            source,
        })
    }

    fn save(&self, map: &BTreeMap<String, SitePreference>) -> Result<(), PreferenceError> {
        let io_err = |source| PreferenceError::Io {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let json = serde_json::to_string_pretty(map).map_err(|source| PreferenceError::Json {
            path: self.path.clone(),
            source,
        })?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(io_err)?;
        std::fs::rename(&tmp, &self.path).map_err(io_err)
    }
}
