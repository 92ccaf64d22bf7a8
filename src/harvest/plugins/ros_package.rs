//! ROS package manifest analysis.

use async_trait::async_trait;
use ignore::WalkBuilder;
use regex::Regex;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::harvest::loader::{ConstructorSignature, PluginArgs, PluginDescriptor};
use crate::harvest::traits::{capability, location, ConstructionError};
use crate::model::DetailRecord;
use crate::traits::{PackageAnalyzer, PluginError};

const NAME: &str = "RosPackageAnalyzer";
const MANIFEST: &str = "package.xml";

pub fn descriptor() -> PluginDescriptor<dyn PackageAnalyzer> {
    PluginDescriptor {
        name: NAME,
        location: location::PACKAGE_ANALYZERS,
        capabilities: &[capability::PACKAGE_ANALYZER],
        signature: ConstructorSignature::bare(),
        factory: build,
    }
}

fn build(_: &PluginArgs<'_>) -> Result<Box<dyn PackageAnalyzer>, ConstructionError> {
    Ok(Box::new(RosPackageAnalyzer::new()?))
}

/// Records the `package.xml` manifests found in a repository.
///
/// Sets `packages` (names, sorted) and `package_count`.
#[derive(Debug)]
pub struct RosPackageAnalyzer {
    name_tag: Regex,
}

impl RosPackageAnalyzer {
    pub fn new() -> Result<Self, ConstructionError> {
        let name_tag = Regex::new(r"<name>\s*([^<]+?)\s*</name>").map_err(|e| {
            ConstructionError::Unavailable {
                plugin: NAME.to_string(),
                message: e.to_string(),
            }
        })?;
        Ok(Self { name_tag })
    }

    pub fn package_name(&self, manifest: &str) -> Option<String> {
        self.name_tag
            .captures(manifest)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
    }
}

fn find_manifests(root: &Path) -> Vec<PathBuf> {
    WalkBuilder::new(root)
        .standard_filters(false)
        .build()
        .flatten()
        .filter(|entry| entry.file_type().is_some_and(|t| t.is_file()))
        .filter(|entry| entry.file_name() == MANIFEST)
        .map(|entry| entry.into_path())
        .collect()
}

#[async_trait]
impl PackageAnalyzer for RosPackageAnalyzer {
    fn name(&self) -> &str {
        NAME
    }

    async fn analyze_package(
        &self,
        repository: &Path,
        record: &mut DetailRecord,
    ) -> Result<(), PluginError> {
        let root = repository.to_path_buf();
        let manifests = tokio::task::spawn_blocking(move || find_manifests(&root))
            .await
            .map_err(|e| PluginError::InvalidInput(format!("Task join error: {e}")))?;

        let mut packages = Vec::with_capacity(manifests.len());
        for manifest in &manifests {
            let contents = tokio::fs::read_to_string(manifest).await?;
            match self.package_name(&contents) {
                Some(name) => packages.push(name),
                None => debug!(manifest = %manifest.display(), "Manifest without <name>"),
            }
        }
        packages.sort();

        record.insert("package_count".to_string(), Value::from(manifests.len()));
        record.insert("packages".to_string(), Value::from(packages));
        Ok(())
    }
}
