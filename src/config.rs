//! Run settings.
//!
//! Settings are read once, `~`-expanded, and then shared read-only with
//! every plugin constructor that asks for them.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default settings document, also written by `--generate-config`.
pub const DEFAULT_CONFIG: &str = include_str!("../config/default.json");

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid settings: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Cannot determine home directory")]
    NoHome,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Root for link files and checkouts
    pub analysis_workspace: PathBuf,

    /// Checkout folder, relative to the workspace
    #[serde(default = "default_repository_folder")]
    pub repository_folder: String,

    /// VCS kinds to process, in order
    pub version_control_systems: Vec<String>,

    /// Hosting sites handed to remote analyzers, in order
    #[serde(default)]
    pub social_coding_sites: Vec<String>,

    // Enabled plugin names per category. Empty enables everything registered.
    #[serde(default)]
    pub parsers: Vec<String>,
    #[serde(default)]
    pub repository_cloners: Vec<String>,
    #[serde(default)]
    pub repository_analyzers: Vec<String>,
    #[serde(default)]
    pub remote_analyzers: Vec<String>,
    #[serde(default)]
    pub package_analyzers: Vec<String>,
    #[serde(default)]
    pub file_analyzers: Vec<String>,

    /// Concurrent clone processes per cloner
    #[serde(default)]
    pub clone_jobs: Option<usize>,

    /// Upper bound on a single plugin invocation
    #[serde(default)]
    pub plugin_timeout_secs: Option<u64>,

    /// Collaborator sections (credentials, rate limits, ...), opaque to the core
    #[serde(flatten)]
    pub collaborators: Map<String, Value>,
}

fn default_repository_folder() -> String {
    "repositories".to_string()
}

impl Settings {
    /// Reads settings from a JSON file and expands home-relative paths.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let mut settings: Settings = serde_json::from_str(raw)?;
        settings.analysis_workspace = expand_home(&settings.analysis_workspace)?;
        Ok(settings)
    }

    pub fn links_dir(&self) -> PathBuf {
        self.analysis_workspace.join("links")
    }

    /// Directory holding the checkouts of one VCS kind.
    pub fn clone_dir(&self, vcs: &str) -> PathBuf {
        self.analysis_workspace
            .join(&self.repository_folder)
            .join(vcs)
    }

    pub fn plugin_timeout(&self) -> Option<Duration> {
        self.plugin_timeout_secs.map(Duration::from_secs)
    }

    /// Raw collaborator section.
    pub fn collaborator(&self, key: &str) -> Option<&Value> {
        self.collaborators.get(key)
    }

    /// Collaborator section deserialized into `T`. `None` when the key is absent.
    pub fn collaborator_as<T: DeserializeOwned>(
        &self,
        key: &str,
    ) -> Option<Result<T, serde_json::Error>> {
        self.collaborator(key)
            .map(|value| serde_json::from_value(value.clone()))
    }
}

/// Replaces a leading `~` with the current user's home directory.
pub fn expand_home(path: &Path) -> Result<PathBuf, ConfigError> {
    let Ok(rest) = path.strip_prefix("~") else {
        return Ok(path.to_path_buf());
    };
    let home = directories::BaseDirs::new()
        .map(|dirs| dirs.home_dir().to_path_buf())
        .ok_or(ConfigError::NoHome)?;
    Ok(home.join(rest))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[test]
    fn test_default_config_parses() {
        let settings = Settings::from_json(DEFAULT_CONFIG).unwrap();
        assert_eq!(settings.version_control_systems, vec!["git", "svn", "hg"]);
        assert!(!settings.analysis_workspace.starts_with("~"));
        assert!(settings.collaborator("link_list_parser").is_some());
    }

    #[test]
    fn test_paths_derive_from_workspace() {
        let settings = Settings::from_json(
            r#"{"analysis_workspace": "/ws", "version_control_systems": ["git"]}"#,
        )
        .unwrap();
        assert_eq!(settings.links_dir(), PathBuf::from("/ws/links"));
        assert_eq!(
            settings.clone_dir("git"),
            PathBuf::from("/ws/repositories/git")
        );
        assert!(settings.parsers.is_empty());
        assert!(settings.plugin_timeout().is_none());
    }

    #[test]
    fn test_collaborator_sections_stay_opaque() {
        #[derive(Deserialize)]
        struct Github {
            github_search_rate_limit: u32,
        }

        let settings = Settings::from_json(
            r#"{
                "analysis_workspace": "/ws",
                "version_control_systems": ["git"],
                "github": {"github_search_rate_limit": 1000, "token": "x"}
            }"#,
        )
        .unwrap();
        let github: Github = settings.collaborator_as("github").unwrap().unwrap();
        assert_eq!(github.github_search_rate_limit, 1000);
        assert!(settings.collaborator_as::<Github>("gitlab").is_none());
    }

    #[test]
    fn test_expand_home_leaves_absolute_paths() {
        let path = PathBuf::from("/var/lib/rosmap");
        assert_eq!(expand_home(&path).unwrap(), path);
    }
}
