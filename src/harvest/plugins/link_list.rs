//! Repository URLs from plain-text lists.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::info;

use crate::config::{expand_home, Settings};
use crate::harvest::loader::{ConstructorSignature, PluginArgs, PluginDescriptor};
use crate::harvest::repositories::RepositoryRegistry;
use crate::harvest::traits::{capability, location, ConstructionError};
use crate::traits::{PluginError, RepositoryParser};

const NAME: &str = "LinkListRepositoryParser";
const SECTION: &str = "link_list_parser";

#[derive(Debug, Deserialize)]
struct LinkListSettings {
    /// VCS kind -> list files
    sources: BTreeMap<String, Vec<PathBuf>>,
}

/// Reads one URL per line from the files configured per VCS kind.
///
/// Blank lines and lines starting with `#` are ignored.
#[derive(Debug)]
pub struct LinkListRepositoryParser {
    sources: BTreeMap<String, Vec<PathBuf>>,
}

impl LinkListRepositoryParser {
    pub fn from_settings(settings: &Settings) -> Result<Self, ConstructionError> {
        let section: LinkListSettings = settings
            .collaborator_as(SECTION)
            .ok_or_else(|| ConstructionError::settings(NAME, SECTION, "section is missing"))?
            .map_err(|e| ConstructionError::settings(NAME, SECTION, e.to_string()))?;

        let mut sources = BTreeMap::new();
        for (kind, files) in section.sources {
            let files = files
                .iter()
                .map(|file| expand_home(file))
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| ConstructionError::settings(NAME, SECTION, e.to_string()))?;
            sources.insert(kind, files);
        }
        Ok(Self { sources })
    }
}

pub fn descriptor() -> PluginDescriptor<dyn RepositoryParser> {
    PluginDescriptor {
        name: NAME,
        location: location::REPOSITORY_PARSERS,
        capabilities: &[capability::REPOSITORY_PARSER],
        signature: ConstructorSignature::with_settings(),
        factory: build,
    }
}

fn build(args: &PluginArgs<'_>) -> Result<Box<dyn RepositoryParser>, ConstructionError> {
    let settings = args.require_settings()?;
    Ok(Box::new(LinkListRepositoryParser::from_settings(settings)?))
}

fn parse_links(contents: &str) -> impl Iterator<Item = &str> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
}

#[async_trait]
impl RepositoryParser for LinkListRepositoryParser {
    fn name(&self) -> &str {
        NAME
    }

    async fn parse_repositories(
        &self,
        registry: &mut RepositoryRegistry,
    ) -> Result<(), PluginError> {
        for (kind, files) in &self.sources {
            for file in files {
                let contents = tokio::fs::read_to_string(file).await.map_err(|e| {
                    PluginError::InvalidInput(format!("cannot read {}: {e}", file.display()))
                })?;
                let before = registry.urls(kind).map_or(0, |urls| urls.len());
                registry.union(kind, parse_links(&contents));
                let added = registry.urls(kind).map_or(0, |urls| urls.len()) - before;
                info!(vcs = %kind, file = %file.display(), added, "Parsed repository list");
            }
        }
        Ok(())
    }
}
