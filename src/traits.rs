//! Plugin role contracts.
//!
//! Every discoverable implementation fulfils one of these roles. The
//! orchestrator owns the shared [`RepositoryRegistry`] and
//! [`ResultAggregator`] and lends them to each call; plugins never keep them.

use crate::harvest::repositories::RepositoryRegistry;
use crate::harvest::results::ResultAggregator;
use crate::model::DetailRecord;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PluginError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Command `{command}` failed: {message}")]
    Command { command: String, message: String },
    #[error("Timed out after {0}s")]
    Timeout(u64),
    #[error("Cancelled")]
    Cancelled,
    /// The plugin cannot do any further work this run. Only that plugin is skipped.
    #[error("Fatal: {0}")]
    Fatal(String),
}

impl PluginError {
    /// Whether the whole run must stop. Only cancellation does; every other
    /// failure stays with the plugin that raised it.
    pub fn aborts_run(&self) -> bool {
        matches!(self, PluginError::Cancelled)
    }
}

#[async_trait]
pub trait RepositoryParser: Send + Sync {
    fn name(&self) -> &str;

    /// Adds every repository URL this parser knows about to `registry`.
    async fn parse_repositories(&self, registry: &mut RepositoryRegistry)
        -> Result<(), PluginError>;
}

#[async_trait]
pub trait RepositoryCloner: Send + Sync {
    fn name(&self) -> &str;

    /// The VCS kind this cloner handles (e.g. "git").
    fn clones(&self) -> &str;

    async fn clone_repositories(&self, urls: &[String]) -> Result<(), PluginError>;
}

#[async_trait]
pub trait RepositoryAnalyzer: Send + Sync {
    fn name(&self) -> &str;

    /// The VCS kind whose checkouts this analyzer understands.
    fn analyzes(&self) -> &str;

    /// Analyzes every checkout under `directory`, recording into `results`.
    async fn analyze_repositories(
        &self,
        directory: &Path,
        results: &mut ResultAggregator,
    ) -> Result<(), PluginError>;
}

#[async_trait]
pub trait RemoteRepositoryAnalyzer: Send + Sync {
    fn name(&self) -> &str;

    /// The hosting site this analyzer queries (e.g. "github").
    fn analyzes(&self) -> &str;

    async fn analyze_repositories(&self, results: &mut ResultAggregator)
        -> Result<(), PluginError>;
}

#[async_trait]
pub trait PackageAnalyzer: Send + Sync {
    fn name(&self) -> &str;

    /// Inspects the package manifests below `repository` and records what it finds.
    async fn analyze_package(
        &self,
        repository: &Path,
        record: &mut DetailRecord,
    ) -> Result<(), PluginError>;
}

#[async_trait]
pub trait FileAnalyzer: Send + Sync {
    fn name(&self) -> &str;

    /// Fields this analyzer accumulates additively across files and plugins.
    fn counter_fields(&self) -> &[&'static str] {
        &[]
    }

    /// Sets up the analyzer's fields. Must never reset a field that already exists.
    fn initialize_fields(&self, record: &mut DetailRecord);

    /// Analyzes the files it is interested in out of `paths`.
    async fn analyze_files(
        &self,
        paths: &[PathBuf],
        record: &mut DetailRecord,
    ) -> Result<(), PluginError>;
}
