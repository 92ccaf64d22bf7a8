//! Offline analyzers for checked-out repositories.

use async_trait::async_trait;
use ignore::WalkBuilder;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::harvest::loader::{ConstructorSignature, PluginArgs, PluginDescriptor};
use crate::harvest::results::ResultAggregator;
use crate::harvest::traits::{capability, location, ConstructionError};
use crate::model::{ensure_field, vcs};
use crate::traits::{FileAnalyzer, PackageAnalyzer, PluginError, RepositoryAnalyzer};

/// Directories holding VCS metadata rather than sources.
const METADATA_DIRS: &[&str] = &[".git", ".svn", ".hg"];

pub fn descriptors() -> Vec<PluginDescriptor<dyn RepositoryAnalyzer>> {
    vec![
        descriptor("GitRepositoryAnalyzer", |args| build("GitRepositoryAnalyzer", vcs::GIT, args)),
        descriptor("SvnRepositoryAnalyzer", |args| build("SvnRepositoryAnalyzer", vcs::SVN, args)),
        descriptor("HgRepositoryAnalyzer", |args| build("HgRepositoryAnalyzer", vcs::HG, args)),
    ]
}

fn descriptor(
    name: &'static str,
    factory: fn(&PluginArgs<'_>) -> Result<Box<dyn RepositoryAnalyzer>, ConstructionError>,
) -> PluginDescriptor<dyn RepositoryAnalyzer> {
    PluginDescriptor {
        name,
        location: location::OFFLINE_ANALYZERS,
        capabilities: &[capability::REPOSITORY_ANALYZER],
        // [package analyzers, file analyzers]
        signature: ConstructorSignature::bare().dependencies(2),
        factory,
    }
}

fn build(
    name: &'static str,
    vcs: &'static str,
    args: &PluginArgs<'_>,
) -> Result<Box<dyn RepositoryAnalyzer>, ConstructionError> {
    let package_analyzers: &Vec<Arc<dyn PackageAnalyzer>> = args.dependency(0)?;
    let file_analyzers: &Vec<Arc<dyn FileAnalyzer>> = args.dependency(1)?;
    Ok(Box::new(LocalRepositoryAnalyzer::new(
        name,
        vcs,
        package_analyzers.clone(),
        file_analyzers.clone(),
    )))
}

/// Every regular file below `root`, skipping VCS metadata directories.
pub fn collect_files(root: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkBuilder::new(root)
        .standard_filters(false)
        .filter_entry(|entry| {
            let name = entry.file_name().to_string_lossy();
            !METADATA_DIRS.iter().any(|dir| name == *dir)
        })
        .build()
        .flatten()
        .filter(|entry| entry.file_type().is_some_and(|t| t.is_file()))
        .map(|entry| entry.into_path())
        .collect();
    files.sort();
    files
}

/// Analyzes every checkout directory of one VCS kind.
///
/// Each checkout becomes one record keyed `<vcs>/<directory>`. Package
/// analyzers see the checkout root; file analyzers see every file in it.
/// A failing package or file analyzer only loses its own fields.
pub struct LocalRepositoryAnalyzer {
    name: &'static str,
    vcs: &'static str,
    package_analyzers: Vec<Arc<dyn PackageAnalyzer>>,
    file_analyzers: Vec<Arc<dyn FileAnalyzer>>,
}

impl LocalRepositoryAnalyzer {
    pub fn new(
        name: &'static str,
        vcs: &'static str,
        package_analyzers: Vec<Arc<dyn PackageAnalyzer>>,
        file_analyzers: Vec<Arc<dyn FileAnalyzer>>,
    ) -> Self {
        Self {
            name,
            vcs,
            package_analyzers,
            file_analyzers,
        }
    }

    async fn checkouts(directory: &Path) -> Result<Vec<PathBuf>, PluginError> {
        let mut entries = tokio::fs::read_dir(directory).await.map_err(|e| {
            PluginError::InvalidInput(format!("cannot list {}: {e}", directory.display()))
        })?;
        let mut checkouts = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                checkouts.push(entry.path());
            }
        }
        checkouts.sort();
        Ok(checkouts)
    }
}

#[async_trait]
impl RepositoryAnalyzer for LocalRepositoryAnalyzer {
    fn name(&self) -> &str {
        self.name
    }

    fn analyzes(&self) -> &str {
        self.vcs
    }

    async fn analyze_repositories(
        &self,
        directory: &Path,
        results: &mut ResultAggregator,
    ) -> Result<(), PluginError> {
        let checkouts = Self::checkouts(directory).await?;
        info!(vcs = self.vcs, checkouts = checkouts.len(), "Analyzing repositories");

        for checkout in checkouts {
            let directory_name = checkout
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let id = format!("{}/{}", self.vcs, directory_name);
            debug!(repository = %id, "Analyzing repository");

            let record = results.record_mut(&id);
            ensure_field(record, "name", Value::from(directory_name));
            ensure_field(record, "vcs", Value::from(self.vcs));
            ensure_field(record, "path", Value::from(checkout.display().to_string()));
            for analyzer in &self.file_analyzers {
                analyzer.initialize_fields(record);
            }

            for analyzer in &self.package_analyzers {
                if let Err(err) = analyzer.analyze_package(&checkout, record).await {
                    warn!(
                        repository = %id,
                        plugin = analyzer.name(),
                        error = %err,
                        "Package analysis failed"
                    );
                }
            }

            if self.file_analyzers.is_empty() {
                continue;
            }
            let root = checkout.clone();
            let files = tokio::task::spawn_blocking(move || collect_files(&root))
                .await
                .map_err(|e| PluginError::InvalidInput(format!("Task join error: {e}")))?;
            for analyzer in &self.file_analyzers {
                if let Err(err) = analyzer.analyze_files(&files, record).await {
                    warn!(
                        repository = %id,
                        plugin = analyzer.name(),
                        error = %err,
                        "File analysis failed"
                    );
                }
            }
        }
        Ok(())
    }
}
