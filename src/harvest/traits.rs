//! Core tags and error types for the discovery and pipeline engine.
//!
//! This module defines the shared vocabulary of the orchestration layer:
//! - Capability tags that plugin descriptors declare via [`capability`]
//! - Pipeline stages via [`PipelineStage`]
//! - The error taxonomy the orchestrator dispatches on

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

// ============================================================================
// Capabilities
// ============================================================================

/// Capability tags a plugin descriptor may declare.
///
/// A descriptor is a discovery match when its tags intersect the requested
/// set and do not intersect the excluded set.
pub mod capability {
    pub const REPOSITORY_PARSER: &str = "RepositoryParser";
    pub const REPOSITORY_CLONER: &str = "RepositoryCloner";
    pub const REPOSITORY_ANALYZER: &str = "RepositoryAnalyzer";
    pub const REMOTE_REPOSITORY_ANALYZER: &str = "RemoteRepositoryAnalyzer";
    pub const PACKAGE_ANALYZER: &str = "PackageAnalyzer";
    pub const FILE_ANALYZER: &str = "FileAnalyzer";

    /// Marks intermediate implementations that must never be instantiated.
    pub const ABSTRACT_REPOSITORY_ANALYZER: &str = "AbstractRepositoryAnalyzer";
}

/// Plugin namespaces, one per role.
pub mod location {
    pub const REPOSITORY_PARSERS: &str = "repository_parsers";
    pub const REPOSITORY_CLONERS: &str = "repository_cloners";
    pub const OFFLINE_ANALYZERS: &str = "repository_analyzers/offline";
    pub const ONLINE_ANALYZERS: &str = "repository_analyzers/online";
    pub const PACKAGE_ANALYZERS: &str = "package_analyzers";
    pub const FILE_ANALYZERS: &str = "file_analyzers";
}

// ============================================================================
// Pipeline Stages
// ============================================================================

/// Stages the orchestrator drives plugins through, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Parse,
    PersistLinks,
    Clone,
    AnalyzeLocal,
    AnalyzeRemote,
}

impl PipelineStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStage::Parse => "parse",
            PipelineStage::PersistLinks => "persist_links",
            PipelineStage::Clone => "clone",
            PipelineStage::AnalyzeLocal => "analyze_local",
            PipelineStage::AnalyzeRemote => "analyze_remote",
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Error Types
// ============================================================================

/// A plugin namespace cannot be scanned or its table is inconsistent. Fatal.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum DiscoveryError {
    /// Location was never declared on the registry
    #[error("Unknown plugin location: {0}")]
    UnknownLocation(String),

    /// Two descriptors share a name inside one registry
    #[error("Duplicate plugin name '{name}' in {location}")]
    DuplicateName { name: String, location: String },
}

/// A matching plugin failed to build. Isolated to that plugin.
#[derive(Error, Debug)]
pub enum ConstructionError {
    /// Constructor signature cannot be satisfied by the supplied arguments
    #[error("Plugin '{plugin}' signature mismatch: {message}")]
    Signature { plugin: String, message: String },

    /// Positional dependency has an unexpected type
    #[error("Plugin '{plugin}' dependency #{index} is not a {expected}")]
    Dependency {
        plugin: String,
        index: usize,
        expected: &'static str,
    },

    /// Required settings key is missing or malformed
    #[error("Plugin '{plugin}' settings key '{key}': {message}")]
    Settings {
        plugin: String,
        key: String,
        message: String,
    },

    /// External resource the plugin needs is unavailable
    #[error("Plugin '{plugin}' unavailable: {message}")]
    Unavailable { plugin: String, message: String },
}

impl ConstructionError {
    /// Name of the plugin that failed to construct.
    pub fn plugin(&self) -> &str {
        match self {
            ConstructionError::Signature { plugin, .. }
            | ConstructionError::Dependency { plugin, .. }
            | ConstructionError::Settings { plugin, .. }
            | ConstructionError::Unavailable { plugin, .. } => plugin,
        }
    }

    pub fn settings(plugin: &str, key: &str, message: impl Into<String>) -> Self {
        ConstructionError::Settings {
            plugin: plugin.to_string(),
            key: key.to_string(),
            message: message.into(),
        }
    }
}

/// Errors raised while persisting or reloading repository link files.
#[derive(Error, Debug)]
pub enum RegistryError {
    /// Resume mode found no link file for a requested VCS kind
    #[error("No persisted links for '{kind}' at {}", .path.display())]
    MissingLinks { kind: String, path: PathBuf },

    /// Generic I/O error on a link file
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Snapshot of the aggregated results could not be written.
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("Failed to write {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize results: {0}")]
    Serialize(#[from] serde_json::Error),
}

// ============================================================================
// Tests
// ============================================================================
