//! Staged repository pipeline.
//!
//! This module provides the [`PipelineOrchestrator`] that drives discovered
//! plugins through the sequential stages
//! Parse → Persist-Links → Clone → Analyze-Local → Analyze-Remote with:
//! - Resume mode from persisted link files
//! - Per-plugin error isolation via [`PluginOutcome`]
//! - Incremental checkpoints of the aggregated results
//! - Structured logging via `tracing`

use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::Settings;
use crate::executor::{CancellationToken, PluginExecutor, PluginOutcome};
use crate::harvest::loader::{Dependency, ModuleLoader, PluginInstance, PluginRegistry};
use crate::harvest::plugins;
use crate::harvest::repositories::RepositoryRegistry;
use crate::harvest::results::ResultAggregator;
use crate::harvest::traits::{capability, location, DiscoveryError, PipelineStage, RegistryError};
use crate::traits::{
    FileAnalyzer, PackageAnalyzer, RemoteRepositoryAnalyzer, RepositoryAnalyzer, RepositoryCloner,
    RepositoryParser,
};

// ============================================================================
// Plugin Catalog
// ============================================================================

/// Registration tables for every plugin role.
pub struct PluginCatalog {
    pub parsers: PluginRegistry<dyn RepositoryParser>,
    pub cloners: PluginRegistry<dyn RepositoryCloner>,
    pub analyzers: PluginRegistry<dyn RepositoryAnalyzer>,
    pub remote_analyzers: PluginRegistry<dyn RemoteRepositoryAnalyzer>,
    pub package_analyzers: PluginRegistry<dyn PackageAnalyzer>,
    pub file_analyzers: PluginRegistry<dyn FileAnalyzer>,
}

impl PluginCatalog {
    /// Tables with their namespaces declared and nothing registered.
    pub fn empty() -> Self {
        Self {
            parsers: PluginRegistry::new().with_location(location::REPOSITORY_PARSERS),
            cloners: PluginRegistry::new().with_location(location::REPOSITORY_CLONERS),
            analyzers: PluginRegistry::new().with_location(location::OFFLINE_ANALYZERS),
            remote_analyzers: PluginRegistry::new().with_location(location::ONLINE_ANALYZERS),
            package_analyzers: PluginRegistry::new().with_location(location::PACKAGE_ANALYZERS),
            file_analyzers: PluginRegistry::new().with_location(location::FILE_ANALYZERS),
        }
    }

    /// Catalog with every built-in plugin registered.
    pub fn builtin() -> Result<Self, DiscoveryError> {
        let mut catalog = Self::empty();
        plugins::register_builtin(&mut catalog)?;
        Ok(catalog)
    }
}

// ============================================================================
// Pipeline Types
// ============================================================================

/// States of a pipeline run, in the order they can be visited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Init,
    Parsed,
    LinksPersisted,
    LinksLoaded,
    Cloned,
    LocallyAnalyzed,
    RemotelyAnalyzed,
    Done,
}

/// Per-run switches.
#[derive(Debug, Clone, Default)]
pub struct PipelineOptions {
    /// Resume from persisted link files instead of parsing
    pub load_existing: bool,

    /// Skip the clone stage
    pub skip_download: bool,

    /// Output artifact. Without it, analysis is skipped entirely.
    pub output: Option<PathBuf>,

    /// First repository (in sorted order) handed to each cloner
    pub clone_offset: usize,

    /// Number of repositories handed to each cloner (default: all)
    pub clone_count: Option<usize>,
}

/// Why part of a stage did not run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// No plugin handles this VCS kind or hosting site
    NoPlugin,
    /// Plugin could not be constructed and was dropped from the run
    Construction(String),
    /// Another plugin already claimed the same VCS kind or hosting site
    Duplicate,
    /// Plugin failed while running
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkipNotice {
    pub stage: PipelineStage,
    /// VCS kind or hosting site, when the skip concerns one
    pub target: Option<String>,
    pub plugin: Option<String>,
    pub reason: SkipReason,
}

/// Summary of a finished run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    /// Every state visited, starting with `Init`
    pub states: Vec<PipelineState>,

    pub skipped: Vec<SkipNotice>,

    /// Checkpoint or final writes that failed; the artifact may be stale or absent
    pub persistence_errors: Vec<String>,

    /// Records held by the aggregator at the end of the run
    pub records: usize,

    /// Whether the terminal snapshot reached disk
    pub artifact_written: bool,
}

impl RunReport {
    pub fn final_state(&self) -> PipelineState {
        self.states.last().copied().unwrap_or(PipelineState::Init)
    }

    pub fn artifact_may_be_stale(&self) -> bool {
        !self.persistence_errors.is_empty()
    }

    fn enter(&mut self, state: PipelineState) {
        info!(state = ?state, "Pipeline state reached");
        self.states.push(state);
    }

    fn skip(
        &mut self,
        stage: PipelineStage,
        target: Option<&str>,
        plugin: Option<&str>,
        reason: SkipReason,
    ) {
        self.skipped.push(SkipNotice {
            stage,
            target: target.map(str::to_string),
            plugin: plugin.map(str::to_string),
            reason,
        });
    }
}

// ============================================================================
// Pipeline Errors
// ============================================================================

/// Errors that abort a pipeline run.
#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    /// A plugin namespace could not be scanned
    #[error("Plugin discovery failed: {0}")]
    Discovery(#[from] DiscoveryError),

    /// Link files could not be persisted or reloaded
    #[error("Repository links unavailable: {0}")]
    Registry(#[from] RegistryError),

    /// The run was cancelled while a plugin was running or about to run
    #[error("Run cancelled during stage '{stage}' (plugin '{plugin}')")]
    Cancelled { stage: PipelineStage, plugin: String },
}

// ============================================================================
// Pipeline Orchestrator
// ============================================================================

/// Drives discovered plugins through the pipeline stages.
///
/// The orchestrator owns the [`RepositoryRegistry`] and [`ResultAggregator`]
/// of a run and lends them to one plugin at a time.
///
/// # Example
///
/// ```ignore
/// let settings = Arc::new(Settings::load(Path::new("config.json"))?);
/// let pipeline = PipelineOrchestrator::new(settings, PluginCatalog::builtin()?);
/// let report = pipeline
///     .run(&PipelineOptions {
///         output: Some("output.json".into()),
///         ..Default::default()
///     })
///     .await?;
/// println!("{} repositories analyzed", report.records);
/// ```
pub struct PipelineOrchestrator {
    settings: Arc<Settings>,
    catalog: PluginCatalog,
    executor: PluginExecutor,
}

impl PipelineOrchestrator {
    /// Creates an orchestrator whose plugin timeout comes from the settings.
    pub fn new(settings: Arc<Settings>, catalog: PluginCatalog) -> Self {
        let executor = PluginExecutor::new(settings.plugin_timeout(), CancellationToken::new());
        Self {
            settings,
            catalog,
            executor,
        }
    }

    /// Replaces the executor, e.g. to share a cancellation token with a signal handler.
    pub fn with_executor(mut self, executor: PluginExecutor) -> Self {
        self.executor = executor;
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Executes the pipeline.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] if:
    /// - A plugin namespace cannot be scanned
    /// - Link files cannot be persisted, or are missing in resume mode
    /// - A plugin reports a fatal error or the run is cancelled
    ///
    /// Everything else is logged, recorded in the [`RunReport`] and skipped.
    pub async fn run(&self, options: &PipelineOptions) -> Result<RunReport, PipelineError> {
        let mut report = RunReport::default();
        report.enter(PipelineState::Init);

        let settings = &self.settings;
        let mut registry =
            RepositoryRegistry::with_kinds(settings.version_control_systems.iter().cloned());

        // ====================================================================
        // Stage 1: Parse + persist links, or reload them
        // ====================================================================

        if options.load_existing {
            let links = settings.links_dir();
            registry
                .load(&links, &settings.version_control_systems)
                .inspect_err(|err| warn!(error = %err, "Cannot resume without persisted links"))?;
            info!(repositories = registry.len(), "Loaded repository links");
            report.enter(PipelineState::LinksLoaded);
        } else {
            self.parse(&mut registry, &mut report).await?;
            report.enter(PipelineState::Parsed);

            for kind in registry.kinds() {
                let count = registry.urls(kind).map_or(0, |urls| urls.len());
                info!(vcs = kind, repositories = count, "Parsed repositories");
            }
            registry.persist(&settings.links_dir())?;
            report.enter(PipelineState::LinksPersisted);
        }

        // ====================================================================
        // Stage 2: Clone
        // ====================================================================

        if options.skip_download {
            info!("Skipping download of repositories");
        } else {
            self.clone_repositories(&registry, options, &mut report).await?;
            report.enter(PipelineState::Cloned);
        }

        // ====================================================================
        // Stage 3: Analyze
        // ====================================================================

        let Some(output) = options.output.as_deref() else {
            warn!("No output path defined, analysis skipped");
            report.enter(PipelineState::Done);
            return Ok(report);
        };

        let mut results = ResultAggregator::new();
        self.analyze_local(&mut results, output, &mut report).await?;
        report.enter(PipelineState::LocallyAnalyzed);

        self.analyze_remote(&mut results, output, &mut report).await?;
        report.enter(PipelineState::RemotelyAnalyzed);

        // Terminal snapshot is written even when empty.
        report.records = results.len();
        match results.write_snapshot(output) {
            Ok(()) => report.artifact_written = true,
            Err(err) => {
                warn!(error = %err, path = %output.display(), "Final results write failed");
                report.persistence_errors.push(err.to_string());
            }
        }
        report.enter(PipelineState::Done);
        info!(records = report.records, skipped = report.skipped.len(), "Pipeline finished");
        Ok(report)
    }

    async fn parse(
        &self,
        registry: &mut RepositoryRegistry,
        report: &mut RunReport,
    ) -> Result<(), PipelineError> {
        let stage = PipelineStage::Parse;
        let parsers = self.discover(
            &self.catalog.parsers,
            location::REPOSITORY_PARSERS,
            &[capability::REPOSITORY_PARSER],
            &self.settings.parsers,
            &[],
            stage,
            report,
        )?;

        for parser in &parsers {
            let call = parser.plugin.parse_repositories(registry);
            let outcome = self.executor.invoke(stage, parser.name, "*", call).await;
            dispatch(stage, parser.name, None, outcome, report)?;
        }
        Ok(())
    }

    async fn clone_repositories(
        &self,
        registry: &RepositoryRegistry,
        options: &PipelineOptions,
        report: &mut RunReport,
    ) -> Result<(), PipelineError> {
        let stage = PipelineStage::Clone;
        let cloners = self.discover(
            &self.catalog.cloners,
            location::REPOSITORY_CLONERS,
            &[capability::REPOSITORY_CLONER],
            &self.settings.repository_cloners,
            &[],
            stage,
            report,
        )?;
        let cloners = index_by_target(stage, cloners, |c| c.clones().to_string(), report);

        for kind in &self.settings.version_control_systems {
            let Some(cloner) = cloners.get(kind) else {
                warn!(vcs = %kind, "Cannot clone repositories: no cloner found for this type");
                report.skip(stage, Some(kind.as_str()), None, SkipReason::NoPlugin);
                continue;
            };
            let selected = registry.select(kind, options.clone_offset, options.clone_count);
            info!(
                vcs = %kind,
                plugin = cloner.name,
                repositories = selected.len(),
                "Cloning repositories"
            );
            let outcome = self
                .executor
                .invoke(stage, cloner.name, kind, cloner.plugin.clone_repositories(&selected))
                .await;
            dispatch(stage, cloner.name, Some(kind.as_str()), outcome, report)?;
        }
        Ok(())
    }

    async fn analyze_local(
        &self,
        results: &mut ResultAggregator,
        output: &Path,
        report: &mut RunReport,
    ) -> Result<(), PipelineError> {
        let stage = PipelineStage::AnalyzeLocal;

        let package_analyzers: Vec<Arc<dyn PackageAnalyzer>> = self
            .discover(
                &self.catalog.package_analyzers,
                location::PACKAGE_ANALYZERS,
                &[capability::PACKAGE_ANALYZER],
                &self.settings.package_analyzers,
                &[],
                stage,
                report,
            )?
            .into_iter()
            .map(|instance| Arc::from(instance.plugin))
            .collect();
        let file_analyzers: Vec<Arc<dyn FileAnalyzer>> = self
            .discover(
                &self.catalog.file_analyzers,
                location::FILE_ANALYZERS,
                &[capability::FILE_ANALYZER],
                &self.settings.file_analyzers,
                &[],
                stage,
                report,
            )?
            .into_iter()
            .map(|instance| Arc::from(instance.plugin))
            .collect();
        for field in file_analyzers.iter().flat_map(|a| a.counter_fields()) {
            results.register_counter(field);
        }

        let dependencies: Vec<Dependency> = vec![
            Arc::new(package_analyzers) as Dependency,
            Arc::new(file_analyzers) as Dependency,
        ];
        let analyzers = self.discover(
            &self.catalog.analyzers,
            location::OFFLINE_ANALYZERS,
            &[capability::REPOSITORY_ANALYZER],
            &self.settings.repository_analyzers,
            &dependencies,
            stage,
            report,
        )?;
        let analyzers = index_by_target(stage, analyzers, |a| a.analyzes().to_string(), report);

        for kind in &self.settings.version_control_systems {
            match analyzers.get(kind) {
                Some(analyzer) => {
                    let directory = self.settings.clone_dir(kind);
                    let call = analyzer.plugin.analyze_repositories(&directory, results);
                    let outcome = self.executor.invoke(stage, analyzer.name, kind, call).await;
                    dispatch(stage, analyzer.name, Some(kind.as_str()), outcome, report)?;
                }
                None => {
                    warn!(
                        vcs = %kind,
                        "Cannot analyze repositories: no analyzer found for this type"
                    );
                    report.skip(stage, Some(kind.as_str()), None, SkipReason::NoPlugin);
                }
            }
            checkpoint(results, output, kind, report);
        }
        Ok(())
    }

    async fn analyze_remote(
        &self,
        results: &mut ResultAggregator,
        output: &Path,
        report: &mut RunReport,
    ) -> Result<(), PipelineError> {
        let stage = PipelineStage::AnalyzeRemote;
        let analyzers = self.discover(
            &self.catalog.remote_analyzers,
            location::ONLINE_ANALYZERS,
            &[capability::REMOTE_REPOSITORY_ANALYZER],
            &self.settings.remote_analyzers,
            &[],
            stage,
            report,
        )?;
        let analyzers = index_by_target(stage, analyzers, |a| a.analyzes().to_string(), report);

        for site in &self.settings.social_coding_sites {
            match analyzers.get(site) {
                Some(analyzer) => {
                    let call = analyzer.plugin.analyze_repositories(results);
                    let outcome = self.executor.invoke(stage, analyzer.name, site, call).await;
                    dispatch(stage, analyzer.name, Some(site.as_str()), outcome, report)?;
                }
                None => {
                    warn!(
                        site = %site,
                        "Cannot analyze hosting site: no analyzer found for this type"
                    );
                    report.skip(stage, Some(site.as_str()), None, SkipReason::NoPlugin);
                }
            }
            checkpoint(results, output, site, report);
        }
        Ok(())
    }

    /// Runs the loader and drops plugins that fail to construct.
    #[allow(clippy::too_many_arguments)]
    fn discover<T: ?Sized>(
        &self,
        registry: &PluginRegistry<T>,
        location: &str,
        required: &[&str],
        enabled: &[String],
        dependencies: &[Dependency],
        stage: PipelineStage,
        report: &mut RunReport,
    ) -> Result<Vec<PluginInstance<T>>, PipelineError> {
        let constructed = ModuleLoader::discover(
            registry,
            location,
            required,
            &[capability::ABSTRACT_REPOSITORY_ANALYZER],
            Some(enabled),
            dependencies,
            Some(&self.settings),
        )
        .inspect_err(|err| warn!(error = %err, location, "Plugin discovery failed"))?;

        let mut instances = Vec::with_capacity(constructed.len());
        for result in constructed {
            match result {
                Ok(instance) => instances.push(instance),
                Err(err) => {
                    warn!(
                        stage = %stage,
                        plugin = err.plugin(),
                        error = %err,
                        "Plugin construction failed, dropping it from the run"
                    );
                    let reason = SkipReason::Construction(err.to_string());
                    report.skip(stage, None, Some(err.plugin()), reason);
                }
            }
        }
        Ok(instances)
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Maps the executor outcome onto the run policy. Plugin failures become skips;
/// only cancellation stops the run.
fn dispatch(
    stage: PipelineStage,
    plugin: &str,
    target: Option<&str>,
    outcome: PluginOutcome,
    report: &mut RunReport,
) -> Result<(), PipelineError> {
    match outcome {
        PluginOutcome::Completed => Ok(()),
        PluginOutcome::Skipped(err) => {
            report.skip(stage, target, Some(plugin), SkipReason::Failed(err.to_string()));
            Ok(())
        }
        PluginOutcome::Aborted(_) => Err(PipelineError::Cancelled {
            stage,
            plugin: plugin.to_string(),
        }),
    }
}

/// Keys plugins by the VCS kind or hosting site they serve. First name wins.
fn index_by_target<T: ?Sized>(
    stage: PipelineStage,
    instances: Vec<PluginInstance<T>>,
    target: impl Fn(&T) -> String,
    report: &mut RunReport,
) -> BTreeMap<String, PluginInstance<T>> {
    let mut indexed: BTreeMap<String, PluginInstance<T>> = BTreeMap::new();
    for instance in instances {
        let key = target(&*instance.plugin);
        if let Some(existing) = indexed.get(&key) {
            warn!(
                target = %key,
                kept = existing.name,
                dropped = instance.name,
                "Two plugins claim the same target"
            );
            report.skip(stage, Some(key.as_str()), Some(instance.name), SkipReason::Duplicate);
            continue;
        }
        indexed.insert(key, instance);
    }
    indexed
}

/// Overwrites the output with the current results, unless there are none yet.
fn checkpoint(results: &ResultAggregator, output: &Path, target: &str, report: &mut RunReport) {
    if results.is_empty() {
        warn!(target = %target, "No analysis results to write, checkpoint skipped");
        return;
    }
    if let Err(err) = results.write_snapshot(output) {
        warn!(target = %target, error = %err, "Checkpoint write failed, output may be stale");
        report.persistence_errors.push(err.to_string());
    }
}

// ============================================================================
// Tests
// ============================================================================
