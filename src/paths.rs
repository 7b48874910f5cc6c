//! XDG-compliant path resolution for the warden CLI.
//!
//! Provides [`WardenPaths`] (global directories) and per-workspace data
//! directories following the XDG Base Directory Specification.

use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

/// Errors from path resolution.
#[derive(Debug, Error, Diagnostic)]
pub enum PathError {
    #[error("cannot determine home directory")]
    #[diagnostic(
        code(warden::paths::no_home),
        help("Set the HOME environment variable or ensure a valid user profile exists.")
    )]
    NoHome,
}

pub type PathResult<T> = std::result::Result<T, PathError>;

/// Global XDG-compliant directories for warden.
#[derive(Debug, Clone)]
pub struct WardenPaths {
    /// `$XDG_CONFIG_HOME/warden/`
    pub config_dir: PathBuf,
    /// `$XDG_DATA_HOME/warden/`
    pub data_dir: PathBuf,
    /// `$XDG_STATE_HOME/warden/`
    pub state_dir: PathBuf,
}

impl WardenPaths {
    /// Resolve XDG directories from environment variables with standard fallbacks.
    pub fn resolve() -> PathResult<Self> {
        let home = std::env::var("HOME")
            .map(PathBuf::from)
            .map_err(|_| PathError::NoHome)?;

        let config_dir = std::env::var("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| home.join(".config"))
            .join("warden");

        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| home.join(".local/share"))
            .join("warden");

        let state_dir = std::env::var("XDG_STATE_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| home.join(".local/state"))
            .join("warden");

        Ok(Self {
            config_dir,
            data_dir,
            state_dir,
        })
    }

    /// Data directory of a named workspace.
    pub fn workspace(&self, name: &str) -> PathBuf {
        self.data_dir.join("workspaces").join(name)
    }

    /// List all existing workspace names.
    pub fn list_workspaces(&self) -> Vec<String> {
        let ws_dir = self.data_dir.join("workspaces");
        match std::fs::read_dir(&ws_dir) {
            Ok(entries) => entries
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().map(|ft| ft.is_dir()).unwrap_or(false))
                .filter_map(|e| e.file_name().into_string().ok())
                .collect(),
            Err(_) => Vec::new(),
        }
    }
}
