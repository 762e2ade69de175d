//! Loading, updating and saving the settings document.

use std::fs;
use std::io;
use std::path::PathBuf;

use serde_json::Value;
use tracing::{debug, info};

use crate::error::{ConfigError, ConfigResult};
use crate::model::Settings;
use crate::validate::validate;

impl Settings {
    /// Load settings from a JSON file. A missing file yields the defaults bound to `path`.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be read, is not a valid settings document, or
    /// fails validation.
    pub fn load(path: impl Into<PathBuf>) -> ConfigResult<Self> {
        let path = path.into();
        let mut settings = match fs::read(&path) {
            Ok(bytes) => {
                serde_json::from_slice::<Self>(&bytes).map_err(|source| ConfigError::Parse {
                    path: Some(path.clone()),
                    source,
                })?
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                info!(path = %path.display(), "settings file not found; using defaults");
                Self::default()
            }
            Err(source) => {
                return Err(ConfigError::Io {
                    operation: "settings.read",
                    path,
                    source,
                });
            }
        };
        validate(&settings)?;
        settings.path = path;
        Ok(settings)
    }

    /// Merge a partial JSON document onto the current values. Nothing changes unless the
    /// merged result validates.
    ///
    /// # Errors
    ///
    /// Returns an error when the patch is not a JSON object, names an unknown field, or the
    /// merged settings fail validation.
    pub fn update(&mut self, patch: &[u8]) -> ConfigResult<()> {
        let patch: Value =
            serde_json::from_slice(patch).map_err(|source| ConfigError::Parse { path: None, source })?;
        let Value::Object(patch) = patch else {
            return Err(ConfigError::InvalidField {
                field: "settings",
                value: None,
                reason: "must be a JSON object",
            });
        };

        let mut current = serde_json::to_value(&*self)
            .map_err(|source| ConfigError::Parse { path: None, source })?;
        let Some(fields) = current.as_object_mut() else {
            return Err(ConfigError::InvalidField {
                field: "settings",
                value: None,
                reason: "must serialize to an object",
            });
        };
        for (key, value) in patch {
            if !fields.contains_key(&key) {
                return Err(ConfigError::UnknownField { field: key });
            }
            fields.insert(key, value);
        }

        let mut merged: Self =
            serde_json::from_value(current).map_err(|source| ConfigError::Parse { path: None, source })?;
        validate(&merged)?;
        merged.path = std::mem::take(&mut self.path);
        *self = merged;
        debug!("settings updated");
        Ok(())
    }

    /// Write the settings as pretty JSON to the file they were loaded from.
    ///
    /// # Errors
    ///
    /// Returns an error when no path is bound or the file cannot be written.
    pub fn save(&self) -> ConfigResult<()> {
        if self.path.as_os_str().is_empty() {
            return Err(ConfigError::InvalidField {
                field: "path",
                value: None,
                reason: "settings are not bound to a file",
            });
        }
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| ConfigError::Io {
                operation: "settings.create_dir",
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let body = serde_json::to_vec_pretty(self)
            .map_err(|source| ConfigError::Parse { path: None, source })?;
        fs::write(&self.path, body).map_err(|source| ConfigError::Io {
            operation: "settings.write",
            path: self.path.clone(),
            source,
        })?;
        info!(path = %self.path.display(), "settings saved");
        Ok(())
    }
}
