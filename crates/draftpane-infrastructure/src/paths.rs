//! Unified path management for draftpane files.
//!
//! # Directory Structure
//!
//! ```text
//! ~/.config/draftpane/         # Config directory
//! └── config.toml              # Application configuration
//!
//! ~/.local/share/draftpane/    # Data directory
//! └── panes/                   # One file per conversation snapshot
//! ```

use std::path::PathBuf;

const APP_DIR_NAME: &str = "draftpane";

/// Errors that can occur during path resolution.
#[derive(Debug)]
pub enum PathError {
    /// Home directory could not be determined.
    HomeDirNotFound,
}

impl std::fmt::Display for PathError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PathError::HomeDirNotFound => write!(f, "Cannot find home directory"),
        }
    }
}

impl std::error::Error for PathError {}

impl From<PathError> for draftpane_core::DraftError {
    fn from(err: PathError) -> Self {
        draftpane_core::DraftError::config(err.to_string())
    }
}

/// Unified path management for draftpane.
pub struct DraftPanePaths;

impl DraftPanePaths {
    /// Returns the draftpane configuration directory (e.g. `~/.config/draftpane/`).
    pub fn config_dir() -> Result<PathBuf, PathError> {
        dirs::config_dir()
            .map(|dir| dir.join(APP_DIR_NAME))
            .ok_or(PathError::HomeDirNotFound)
    }

    /// Returns the draftpane data directory (e.g. `~/.local/share/draftpane/`).
    pub fn data_dir() -> Result<PathBuf, PathError> {
        dirs::data_dir()
            .map(|dir| dir.join(APP_DIR_NAME))
            .ok_or(PathError::HomeDirNotFound)
    }

    /// Returns the path to the main configuration file.
    pub fn config_file() -> Result<PathBuf, PathError> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Returns the directory holding persisted pane snapshots.
    pub fn panes_dir() -> Result<PathBuf, PathError> {
        Ok(Self::data_dir()?.join("panes"))
    }
}
