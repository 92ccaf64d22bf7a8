//! Command-line cloners for `git`, `svn` and `hg`.
//!
//! Checkouts land in `<workspace>/<repository_folder>/<vcs>/<checkout name>`.
//! A checkout that already exists is left alone, so an interrupted clone
//! stage can simply be run again.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::harvest::loader::{ConstructorSignature, PluginArgs, PluginDescriptor};
use crate::harvest::traits::{capability, location, ConstructionError};
use crate::model::vcs;
use crate::traits::{PluginError, RepositoryCloner};

/// Static description of how one VCS clones a URL.
#[derive(Debug, Clone, Copy)]
pub struct CloneCommand {
    pub name: &'static str,
    pub vcs: &'static str,
    pub program: &'static str,
    /// Arguments placed before `<url> <destination>`
    pub args: &'static [&'static str],
}

pub const GIT: CloneCommand = CloneCommand {
    name: "GitRepositoryCloner",
    vcs: vcs::GIT,
    program: "git",
    args: &["clone", "--depth", "1", "--quiet"],
};

pub const SVN: CloneCommand = CloneCommand {
    name: "SvnRepositoryCloner",
    vcs: vcs::SVN,
    program: "svn",
    args: &["checkout", "--quiet", "--non-interactive"],
};

pub const HG: CloneCommand = CloneCommand {
    name: "HgRepositoryCloner",
    vcs: vcs::HG,
    program: "hg",
    args: &["clone", "--quiet"],
};

pub fn descriptors() -> Vec<PluginDescriptor<dyn RepositoryCloner>> {
    vec![
        descriptor(GIT.name, |args| build(GIT, args)),
        descriptor(SVN.name, |args| build(SVN, args)),
        descriptor(HG.name, |args| build(HG, args)),
    ]
}

fn descriptor(
    name: &'static str,
    factory: fn(&PluginArgs<'_>) -> Result<Box<dyn RepositoryCloner>, ConstructionError>,
) -> PluginDescriptor<dyn RepositoryCloner> {
    PluginDescriptor {
        name,
        location: location::REPOSITORY_CLONERS,
        capabilities: &[capability::REPOSITORY_CLONER],
        signature: ConstructorSignature::with_settings(),
        factory,
    }
}

fn build(
    command: CloneCommand,
    args: &PluginArgs<'_>,
) -> Result<Box<dyn RepositoryCloner>, ConstructionError> {
    let settings = args.require_settings()?;
    Ok(Box::new(CommandCloner::new(command, settings)))
}

/// Directory name for the checkout of `url`.
///
/// A readable prefix built from host and path (no scheme, no `.git` suffix,
/// anything but ASCII alphanumerics and `-` replaced by `_`) followed by the
/// first 12 hex digits of the URL's SHA-256. Distinct URLs get distinct
/// checkouts even when their readable prefixes coincide.
pub fn checkout_name(url: &str) -> String {
    let trimmed = url.trim_end_matches('/');
    let trimmed = trimmed.strip_suffix(".git").unwrap_or(trimmed);
    let location = match trimmed.split_once("://") {
        Some((_, rest)) => rest,
        // scp-like `user@host:path`
        None => trimmed.rsplit_once('@').map_or(trimmed, |(_, rest)| rest),
    };
    let readable: String = location
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    let digest = hex::encode(Sha256::digest(url.as_bytes()));
    let prefix = if readable.is_empty() { "repository" } else { readable.as_str() };
    format!("{prefix}-{}", &digest[..12])
}

/// Clones by shelling out to the VCS client, a bounded number at a time.
#[derive(Debug)]
pub struct CommandCloner {
    command: CloneCommand,
    destination: PathBuf,
    jobs: usize,
}

impl CommandCloner {
    pub fn new(command: CloneCommand, settings: &Settings) -> Self {
        Self {
            command,
            destination: settings.clone_dir(command.vcs),
            jobs: settings.clone_jobs.unwrap_or(1).max(1),
        }
    }

    fn spawn_command(&self, url: &str, destination: &Path) -> Command {
        let mut command = Command::new(self.command.program);
        command
            .args(self.command.args)
            .arg(url)
            .arg(destination)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }
}

#[async_trait]
impl RepositoryCloner for CommandCloner {
    fn name(&self) -> &str {
        self.command.name
    }

    fn clones(&self) -> &str {
        self.command.vcs
    }

    async fn clone_repositories(&self, urls: &[String]) -> Result<(), PluginError> {
        tokio::fs::create_dir_all(&self.destination).await?;

        let semaphore = Arc::new(Semaphore::new(self.jobs));
        let mut tasks = JoinSet::new();
        let mut existing = 0usize;

        for url in urls {
            let destination = self.destination.join(checkout_name(url));
            if destination.exists() {
                debug!(url = %url, "Checkout already present, skipping");
                existing += 1;
                continue;
            }

            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| PluginError::InvalidInput(format!("Semaphore error: {e}")))?;
            let mut command = self.spawn_command(url, &destination);
            let url = url.clone();
            tasks.spawn(async move {
                let _permit = permit;
                let output = command.output().await;
                (url, output)
            });
        }

        let (mut cloned, mut failed) = (0usize, 0usize);
        let mut missing_program = false;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(output))) if output.status.success() => cloned += 1,
                Ok((url, Ok(output))) => {
                    failed += 1;
                    let stderr = String::from_utf8_lossy(&output.stderr);
                    warn!(
                        url = %url,
                        status = %output.status,
                        stderr = %stderr.trim(),
                        "Clone failed"
                    );
                }
                Ok((url, Err(err))) => {
                    failed += 1;
                    missing_program |= err.kind() == std::io::ErrorKind::NotFound;
                    warn!(url = %url, error = %err, "Clone could not be started");
                }
                Err(err) => {
                    failed += 1;
                    warn!(error = %err, "Clone task failed");
                }
            }
        }

        info!(
            vcs = self.command.vcs,
            cloned,
            failed,
            existing,
            "Finished cloning repositories"
        );

        if missing_program && cloned == 0 {
            return Err(PluginError::Command {
                command: self.command.program.to_string(),
                message: "program not found".to_string(),
            });
        }
        Ok(())
    }
}
