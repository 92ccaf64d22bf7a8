//! Repository URLs discovered so far, partitioned by VCS kind.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use tracing::{debug, info};

use crate::harvest::traits::RegistryError;

/// In-memory mapping from VCS kind to a set of repository URLs.
///
/// Parsers populate it with [`union`](Self::union); it can be persisted as one
/// newline-delimited link file per kind and reloaded on a later run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RepositoryRegistry {
    repositories: BTreeMap<String, HashSet<String>>,
}

impl RepositoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-seeded with an empty set for each kind.
    pub fn with_kinds<I, S>(kinds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut registry = Self::new();
        for kind in kinds {
            registry.repositories.entry(kind.into()).or_default();
        }
        registry
    }

    /// Adds `urls` to the set for `kind`. Idempotent.
    pub fn union<I, S>(&mut self, kind: &str, urls: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.repositories
            .entry(kind.to_string())
            .or_default()
            .extend(urls.into_iter().map(Into::into));
    }

    pub fn urls(&self, kind: &str) -> Option<&HashSet<String>> {
        self.repositories.get(kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.repositories.keys().map(String::as_str)
    }

    /// Total number of URLs across all kinds.
    pub fn len(&self) -> usize {
        self.repositories.values().map(HashSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deterministic `[offset, offset + count)` window over the sorted URLs of
    /// `kind`. `count: None` takes everything from `offset` on.
    pub fn select(&self, kind: &str, offset: usize, count: Option<usize>) -> Vec<String> {
        let Some(urls) = self.repositories.get(kind) else {
            return Vec::new();
        };
        let mut sorted: Vec<&String> = urls.iter().collect();
        sorted.sort();
        sorted
            .into_iter()
            .skip(offset)
            .take(count.unwrap_or(usize::MAX))
            .cloned()
            .collect()
    }

    /// Writes one file per kind into `directory`, one URL per line.
    ///
    /// The directory is created if missing; existing files are overwritten.
    pub fn persist(&self, directory: &Path) -> Result<(), RegistryError> {
        fs::create_dir_all(directory).map_err(|source| RegistryError::Io {
            path: directory.to_path_buf(),
            source,
        })?;

        for (kind, urls) in &self.repositories {
            let path = directory.join(kind);
            let io_err = |source| RegistryError::Io {
                path: path.clone(),
                source,
            };
            let mut sorted: Vec<&String> = urls.iter().collect();
            sorted.sort();

            let mut writer = BufWriter::new(fs::File::create(&path).map_err(io_err)?);
            for url in sorted {
                writeln!(writer, "{url}").map_err(io_err)?;
            }
            writer.flush().map_err(io_err)?;
            info!(
                vcs = %kind,
                count = urls.len(),
                path = %path.display(),
                "Persisted repository links"
            );
        }
        Ok(())
    }

    /// Reads the link file of every kind in `kinds` from `directory`.
    ///
    /// # Errors
    ///
    /// [`RegistryError::MissingLinks`] when a requested file does not exist.
    pub fn load<S: AsRef<str>>(
        &mut self,
        directory: &Path,
        kinds: &[S],
    ) -> Result<(), RegistryError> {
        for kind in kinds {
            let kind = kind.as_ref();
            let path = directory.join(kind);
            let file = fs::File::open(&path).map_err(|source| {
                if source.kind() == std::io::ErrorKind::NotFound {
                    RegistryError::MissingLinks {
                        kind: kind.to_string(),
                        path: path.clone(),
                    }
                } else {
                    RegistryError::Io {
                        path: path.clone(),
                        source,
                    }
                }
            })?;

            let set = self.repositories.entry(kind.to_string()).or_default();
            let before = set.len();
            for line in BufReader::new(file).lines() {
                let line = line.map_err(|source| RegistryError::Io {
                    path: path.clone(),
                    source,
                })?;
                let url = line.trim_end_matches(['\r', '\n']);
                if !url.is_empty() {
                    set.insert(url.to_string());
                }
            }
            debug!(
                vcs = kind,
                loaded = set.len() - before,
                path = %path.display(),
                "Loaded repository links"
            );
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
