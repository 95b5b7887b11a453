//! Snapshot assembly: environment profiles merged with the config
//! directory.

use std::collections::HashMap;
use std::fs;

use crate::env::profiles_from_env;
use crate::error::ConfigError;
use crate::profile::{Profile, merge_profiles};

/// Produces a fresh profile set on demand.
///
/// The environment-defined base set is captured once at construction;
/// the config directory is re-read on every [`ConfigSource::snapshot`],
/// so a reload picks up file edits but never environment edits.
pub struct ConfigSource {
    config_dir: String,
    base: Vec<Profile>,
}

impl ConfigSource {
    /// Capture the environment base set. An empty `config_dir` means no
    /// directory is consulted.
    pub fn new(config_dir: String) -> Self {
        Self {
            config_dir,
            base: profiles_from_env(),
        }
    }

    /// Build a source with an explicit base set instead of the process
    /// environment.
    pub fn with_base(config_dir: String, base: Vec<Profile>) -> Self {
        Self { config_dir, base }
    }

    /// Assemble the current profile set: the base profiles, then every
    /// regular file in the config directory in enumeration order, decoded
    /// as a TOML table of `name -> options` and merged in. Any directory
    /// or decode failure is fatal to the whole snapshot.
    pub fn snapshot(&self) -> Result<Vec<Profile>, ConfigError> {
        let mut profiles = self.base.clone();

        if self.config_dir.is_empty() {
            return Ok(profiles);
        }

        let entries = fs::read_dir(&self.config_dir).map_err(|source| ConfigError::Dir {
            path: self.config_dir.clone(),
            source,
        })?;

        for entry in entries {
            let entry = entry.map_err(|source| ConfigError::Dir {
                path: self.config_dir.clone(),
                source,
            })?;
            let file_type = entry.file_type().map_err(|source| ConfigError::Dir {
                path: self.config_dir.clone(),
                source,
            })?;
            if file_type.is_dir() {
                continue;
            }

            let path = entry.path();
            let display = path.to_string_lossy().into_owned();
            let data = fs::read_to_string(&path).map_err(|source| ConfigError::Read {
                path: display.clone(),
                source,
            })?;
            let table: HashMap<String, Profile> =
                toml::from_str(&data).map_err(|source| ConfigError::Decode {
                    path: display.clone(),
                    source,
                })?;

            let incoming: Vec<Profile> = table
                .into_iter()
                .map(|(name, mut profile)| {
                    profile.name = name;
                    profile.source = display.clone();
                    profile
                })
                .collect();

            profiles = merge_profiles(profiles, incoming);
        }

        Ok(profiles)
    }
}
