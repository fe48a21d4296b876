//! Mycelia Settings
//!
//! JSON config file management for the oracle services. Each service
//! defines its own config struct (with `deny_unknown_fields` so typos in
//! operator configs fail loudly) and wraps it in `Settings<T>`.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Failed to read settings {path}: {1}", path = .0.display())]
    ReadError(PathBuf, String),
    #[error("Failed to write settings {path}: {1}", path = .0.display())]
    WriteError(PathBuf, String),
    #[error("Failed to parse settings {path}: {1}", path = .0.display())]
    ParseError(PathBuf, String),
    #[error("Settings file not found: {path}", path = .0.display())]
    NotFound(PathBuf),
}

pub type Result<T> = std::result::Result<T, SettingsError>;

/// Generic settings wrapper for any serializable config type.
pub struct Settings<T> {
    pub config: T,
    path: PathBuf,
}

impl<T: Serialize + DeserializeOwned> Settings<T> {
    /// Load settings from an existing file; error if it is missing.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(SettingsError::NotFound(path.to_path_buf()));
        }
        debug!("loading settings from {}", path.display());
        let content = fs::read_to_string(path)
            .map_err(|e| SettingsError::ReadError(path.to_path_buf(), e.to_string()))?;
        let config: T = serde_json::from_str(&content)
            .map_err(|e| SettingsError::ParseError(path.to_path_buf(), e.to_string()))?;
        Ok(Self {
            config,
            path: path.to_path_buf(),
        })
    }

    /// Save current settings to disk, creating parent directories.
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| SettingsError::WriteError(self.path.clone(), e.to_string()))?;
        }
        let content = serde_json::to_string_pretty(&self.config)
            .map_err(|e| SettingsError::WriteError(self.path.clone(), e.to_string()))?;
        fs::write(&self.path, content)
            .map_err(|e| SettingsError::WriteError(self.path.clone(), e.to_string()))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl<T: Serialize + DeserializeOwned + Default> Settings<T> {
    /// Load settings, or create the file with defaults if it is missing.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        match Self::load(path) {
            Err(SettingsError::NotFound(_)) => {
                debug!("creating default settings at {}", path.display());
                let settings = Self {
                    config: T::default(),
                    path: path.to_path_buf(),
                };
                settings.save()?;
                Ok(settings)
            }
            other => other,
        }
    }
}
