//! User settings, read from `settings.toml` in the platform config directory.
//!
//! Precedence (lowest to highest):
//! 1. Compiled defaults
//! 2. The settings file (`--settings`, `TAGTREE_SETTINGS`, or the default location)
//! 3. `TAGTREE_VALUE_LIMIT`

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::flatten::FlattenOptions;
use crate::policy::{EditPolicy, PolicySettings};

pub const SETTINGS_ENV: &str = "TAGTREE_SETTINGS";
pub const VALUE_LIMIT_ENV: &str = "TAGTREE_VALUE_LIMIT";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplaySettings {
    /// Values shown per element before the rest are dropped.
    pub value_limit: usize,
    pub max_value_chars: usize,
    pub show_meta: bool,
}

impl Default for DisplaySettings {
    fn default() -> Self {
        let options = FlattenOptions::default();
        Self {
            value_limit: options.value_limit,
            max_value_chars: options.max_value_chars,
            show_meta: options.include_meta,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub display: DisplaySettings,
    pub policy: PolicySettings,
}

impl Settings {
    /// Reads and validates one settings file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Could not read settings file {}", path.display()))?;
        let settings: Settings = toml::from_str(&text)
            .with_context(|| format!("Could not parse settings file {}", path.display()))?;
        EditPolicy::from_settings(&settings.policy)
            .with_context(|| format!("Invalid [policy] in {}", path.display()))?;
        Ok(settings)
    }

    /// Settings for this run; never fails, problems fall back to defaults.
    pub fn resolve(explicit: Option<&Path>) -> Self {
        let path = explicit
            .map(Path::to_path_buf)
            .or_else(|| env::var_os(SETTINGS_ENV).map(PathBuf::from))
            .or_else(settings_file_path);

        let settings = match path {
            Some(path) if path.exists() => match Self::load(&path) {
                Ok(settings) => {
                    log::info!("loaded settings from {}", path.display());
                    settings
                }
                Err(err) => {
                    log::warn!("{err:#}; using default settings");
                    Self::default()
                }
            },
            Some(path) if explicit.is_some() => {
                log::warn!(
                    "settings file {} does not exist; using default settings",
                    path.display()
                );
                Self::default()
            }
            _ => Self::default(),
        };
        settings.with_overrides(|key| env::var(key).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(raw) = lookup(VALUE_LIMIT_ENV) {
            match raw.trim().parse::<usize>() {
                Ok(limit) if limit > 0 => self.display.value_limit = limit,
                _ => log::warn!("ignoring {VALUE_LIMIT_ENV}={raw:?}: expected a positive integer"),
            }
        }
        self
    }

    pub fn flatten_options(&self) -> FlattenOptions {
        FlattenOptions {
            value_limit: self.display.value_limit.max(1),
            max_value_chars: self.display.max_value_chars.max(1),
            include_meta: self.display.show_meta,
        }
    }

    pub fn edit_policy(&self) -> EditPolicy {
        EditPolicy::from_settings(&self.policy).unwrap_or_else(|err| {
            log::warn!("{err:#}; using the default edit policy");
            EditPolicy::default()
        })
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Could not render settings as TOML")
    }
}

pub fn settings_file_path() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        return env::var_os("APPDATA")
            .map(PathBuf::from)
            .map(|base| base.join("tagtree").join("settings.toml"));
    }

    #[cfg(target_os = "macos")]
    {
        return env::var_os("HOME").map(PathBuf::from).map(|home| {
            home.join("Library")
                .join("Application Support")
                .join("tagtree")
                .join("settings.toml")
        });
    }

    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        if let Some(xdg) = env::var_os("XDG_CONFIG_HOME") {
            return Some(PathBuf::from(xdg).join("tagtree").join("settings.toml"));
        }
        env::var_os("HOME")
            .map(PathBuf::from)
            .map(|home| home.join(".config").join("tagtree").join("settings.toml"))
    }
}
