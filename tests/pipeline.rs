//! End-to-end pipeline scenarios with in-process plugins.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use rosmap::harvest::plugins::analyzers;
use rosmap::harvest::{
    capability, location, ConstructionError, ConstructorSignature, PipelineError, PipelineOptions,
    PipelineOrchestrator, PipelineStage, PipelineState, PluginArgs, PluginCatalog,
    PluginDescriptor, PluginFactory, PluginRegistry, RegistryError, RepositoryRegistry,
    ResultAggregator, SkipReason,
};
use rosmap::{
    ensure_field, increment_counter, DetailRecord, FileAnalyzer, PluginError,
    RemoteRepositoryAnalyzer, RepositoryAnalyzer, RepositoryCloner, RepositoryParser, Settings,
};

// ============================================================================
// Plugins
// ============================================================================

struct AlphaParser;

#[async_trait]
impl RepositoryParser for AlphaParser {
    fn name(&self) -> &str {
        "AlphaParser"
    }

    async fn parse_repositories(
        &self,
        registry: &mut RepositoryRegistry,
    ) -> Result<(), PluginError> {
        registry.union("git", ["x", "y"]);
        Ok(())
    }
}

struct BetaParser;

#[async_trait]
impl RepositoryParser for BetaParser {
    fn name(&self) -> &str {
        "BetaParser"
    }

    async fn parse_repositories(
        &self,
        registry: &mut RepositoryRegistry,
    ) -> Result<(), PluginError> {
        registry.union("git", ["y"]);
        registry.union("svn", ["z"]);
        Ok(())
    }
}

/// Three errors per `.cpp` file.
struct FakeLint;

#[async_trait]
impl FileAnalyzer for FakeLint {
    fn name(&self) -> &str {
        "FakeLint"
    }

    fn counter_fields(&self) -> &[&'static str] {
        &["lintErrors"]
    }

    fn initialize_fields(&self, record: &mut DetailRecord) {
        ensure_field(record, "lintErrors", json!(0));
    }

    async fn analyze_files(
        &self,
        paths: &[PathBuf],
        record: &mut DetailRecord,
    ) -> Result<(), PluginError> {
        for _ in paths.iter().filter(|p| p.extension().is_some_and(|e| e == "cpp")) {
            increment_counter(record, "lintErrors", 3);
        }
        Ok(())
    }
}

struct FatalRemote;

#[async_trait]
impl RemoteRepositoryAnalyzer for FatalRemote {
    fn name(&self) -> &str {
        "FatalRemote"
    }

    fn analyzes(&self) -> &str {
        "github"
    }

    async fn analyze_repositories(
        &self,
        results: &mut ResultAggregator,
    ) -> Result<(), PluginError> {
        results
            .record_mut("github/repoB")
            .insert("stars".to_string(), json!(12));
        Err(PluginError::Fatal("credentials rejected".into()))
    }
}

struct BitbucketRemote;

#[async_trait]
impl RemoteRepositoryAnalyzer for BitbucketRemote {
    fn name(&self) -> &str {
        "BitbucketRemote"
    }

    fn analyzes(&self) -> &str {
        "bitbucket"
    }

    async fn analyze_repositories(
        &self,
        results: &mut ResultAggregator,
    ) -> Result<(), PluginError> {
        results
            .record_mut("bitbucket/repoC")
            .insert("stars".to_string(), json!(4));
        Ok(())
    }
}

static CLONE_CALLS: AtomicUsize = AtomicUsize::new(0);
static ANALYZE_CALLS: AtomicUsize = AtomicUsize::new(0);

struct CountingCloner;

#[async_trait]
impl RepositoryCloner for CountingCloner {
    fn name(&self) -> &str {
        "CountingCloner"
    }

    fn clones(&self) -> &str {
        "git"
    }

    async fn clone_repositories(&self, _: &[String]) -> Result<(), PluginError> {
        CLONE_CALLS.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// URLs handed to [`RecordingCloner`], one entry per call.
static CLONED: Mutex<Vec<Vec<String>>> = Mutex::new(Vec::new());

struct RecordingCloner;

#[async_trait]
impl RepositoryCloner for RecordingCloner {
    fn name(&self) -> &str {
        "RecordingCloner"
    }

    fn clones(&self) -> &str {
        "git"
    }

    async fn clone_repositories(&self, urls: &[String]) -> Result<(), PluginError> {
        CLONED.lock().unwrap().push(urls.to_vec());
        Ok(())
    }
}

struct CountingAnalyzer;

#[async_trait]
impl RepositoryAnalyzer for CountingAnalyzer {
    fn name(&self) -> &str {
        "CountingAnalyzer"
    }

    fn analyzes(&self) -> &str {
        "git"
    }

    async fn analyze_repositories(
        &self,
        _: &Path,
        _: &mut ResultAggregator,
    ) -> Result<(), PluginError> {
        ANALYZE_CALLS.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ============================================================================
// Fixtures
// ============================================================================

type Built<T> = Result<Box<T>, ConstructionError>;

fn build_alpha_parser(_: &PluginArgs<'_>) -> Built<dyn RepositoryParser> {
    Ok(Box::new(AlphaParser))
}

fn build_beta_parser(_: &PluginArgs<'_>) -> Built<dyn RepositoryParser> {
    Ok(Box::new(BetaParser))
}

fn build_broken_parser(args: &PluginArgs<'_>) -> Built<dyn RepositoryParser> {
    Err(ConstructionError::Unavailable {
        plugin: args.plugin().to_string(),
        message: "list service unreachable".to_string(),
    })
}

fn build_fake_lint(_: &PluginArgs<'_>) -> Built<dyn FileAnalyzer> {
    Ok(Box::new(FakeLint))
}

fn build_counting_cloner(_: &PluginArgs<'_>) -> Built<dyn RepositoryCloner> {
    Ok(Box::new(CountingCloner))
}

fn build_recording_cloner(_: &PluginArgs<'_>) -> Built<dyn RepositoryCloner> {
    Ok(Box::new(RecordingCloner))
}

fn build_counting_analyzer(_: &PluginArgs<'_>) -> Built<dyn RepositoryAnalyzer> {
    Ok(Box::new(CountingAnalyzer))
}

fn build_fatal_remote(_: &PluginArgs<'_>) -> Built<dyn RemoteRepositoryAnalyzer> {
    Ok(Box::new(FatalRemote))
}

fn build_bitbucket_remote(_: &PluginArgs<'_>) -> Built<dyn RemoteRepositoryAnalyzer> {
    Ok(Box::new(BitbucketRemote))
}

fn register<T: ?Sized>(
    registry: &mut PluginRegistry<T>,
    name: &'static str,
    location: &'static str,
    capabilities: &'static [&'static str],
    factory: PluginFactory<T>,
) {
    registry
        .register(PluginDescriptor {
            name,
            location,
            capabilities,
            signature: ConstructorSignature::bare(),
            factory,
        })
        .unwrap();
}

fn parser_catalog() -> PluginCatalog {
    let mut catalog = PluginCatalog::empty();
    register(
        &mut catalog.parsers,
        "AlphaParser",
        location::REPOSITORY_PARSERS,
        &[capability::REPOSITORY_PARSER],
        build_alpha_parser,
    );
    register(
        &mut catalog.parsers,
        "BetaParser",
        location::REPOSITORY_PARSERS,
        &[capability::REPOSITORY_PARSER],
        build_beta_parser,
    );
    catalog
}

/// Built-in offline analyzers fed by [`FakeLint`].
fn lint_catalog() -> PluginCatalog {
    let mut catalog = PluginCatalog::empty();
    for descriptor in analyzers::descriptors() {
        catalog.analyzers.register(descriptor).unwrap();
    }
    register(
        &mut catalog.file_analyzers,
        "FakeLint",
        location::FILE_ANALYZERS,
        &[capability::FILE_ANALYZER],
        build_fake_lint,
    );
    catalog
}

fn settings(workspace: &Path, extra: Value) -> Arc<Settings> {
    let mut raw = json!({
        "analysis_workspace": workspace,
        "version_control_systems": ["git", "svn"],
    });
    if let (Some(raw), Value::Object(extra)) = (raw.as_object_mut(), extra) {
        raw.extend(extra);
    }
    Arc::new(Settings::from_json(&raw.to_string()).unwrap())
}

fn write(path: &Path, contents: &str) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, contents).unwrap();
}

/// A git checkout `repoA` with two C++ sources and persisted links for it.
fn lint_workspace(workspace: &Path) {
    write(&workspace.join("links/git"), "https://example.org/repoA.git\n");
    write(&workspace.join("repositories/git/repoA/src/a.cpp"), "int main() {}\n");
    write(&workspace.join("repositories/git/repoA/src/b.cpp"), "int f() { return 0; }\n");
    write(&workspace.join("repositories/git/repoA/README.md"), "# repoA\n");
}

fn read_records(path: &Path) -> Vec<Value> {
    serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
}

// ============================================================================
// Scenarios
// ============================================================================

#[test]
fn test_union_is_order_independent() {
    let mut forward = RepositoryRegistry::new();
    forward.union("git", ["x", "y"]);
    forward.union("git", ["y"]);
    forward.union("svn", ["z"]);

    let mut backward = RepositoryRegistry::new();
    backward.union("svn", ["z"]);
    backward.union("git", ["y"]);
    backward.union("git", ["x", "y"]);

    assert_eq!(forward, backward);
    assert_eq!(forward.len(), 3);
}

#[tokio::test]
async fn test_parsers_contribute_to_one_registry() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = PipelineOrchestrator::new(settings(dir.path(), json!({})), parser_catalog());
    let report = pipeline
        .run(&PipelineOptions {
            skip_download: true,
            ..Default::default()
        })
        .await
        .unwrap();

    assert!(report.skipped.is_empty());
    assert_eq!(std::fs::read_to_string(dir.path().join("links/git")).unwrap(), "x\ny\n");
    assert_eq!(std::fs::read_to_string(dir.path().join("links/svn")).unwrap(), "z\n");
}

#[test]
fn test_select_window_is_deterministic() {
    let mut registry = RepositoryRegistry::new();
    registry.union("git", ["d", "b", "a", "c"]);

    assert_eq!(registry.select("git", 1, Some(2)), vec!["b", "c"]);
    assert_eq!(registry.select("git", 0, None), vec!["a", "b", "c", "d"]);
    assert!(registry.select("git", 10, Some(2)).is_empty());
    assert!(registry.select("hg", 0, None).is_empty());
}

#[test]
fn test_persisted_links_load_back() {
    let dir = tempfile::tempdir().unwrap();
    let mut registry = RepositoryRegistry::new();
    registry.union("git", ["https://a.git", "https://b.git"]);
    registry.union("hg", ["https://c"]);
    registry.persist(dir.path()).unwrap();

    let mut loaded = RepositoryRegistry::new();
    loaded.load(dir.path(), &["git", "hg"]).unwrap();
    assert_eq!(loaded, registry);
}

#[tokio::test]
async fn test_file_analyzer_counters_accumulate() {
    let dir = tempfile::tempdir().unwrap();
    lint_workspace(dir.path());
    let output = dir.path().join("output.json");

    let pipeline = PipelineOrchestrator::new(
        settings(dir.path(), json!({"version_control_systems": ["git"]})),
        lint_catalog(),
    );
    let report = pipeline
        .run(&PipelineOptions {
            load_existing: true,
            skip_download: true,
            output: Some(output.clone()),
            ..Default::default()
        })
        .await
        .unwrap();

    assert!(report.artifact_written);
    assert_eq!(report.records, 1);
    let records = read_records(&output);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["name"], json!("repoA"));
    assert_eq!(records[0]["vcs"], json!("git"));
    assert_eq!(records[0]["lintErrors"], json!(6));
}

#[tokio::test]
async fn test_resume_without_links_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    write(&dir.path().join("links/git"), "https://example.org/a.git\n");
    write(&dir.path().join("links/svn"), "");

    let mut catalog = PluginCatalog::empty();
    register(
        &mut catalog.cloners,
        "CountingCloner",
        location::REPOSITORY_CLONERS,
        &[capability::REPOSITORY_CLONER],
        build_counting_cloner,
    );
    register(
        &mut catalog.analyzers,
        "CountingAnalyzer",
        location::OFFLINE_ANALYZERS,
        &[capability::REPOSITORY_ANALYZER],
        build_counting_analyzer,
    );

    let output = dir.path().join("output.json");
    let pipeline = PipelineOrchestrator::new(
        settings(dir.path(), json!({"version_control_systems": ["git", "svn", "hg"]})),
        catalog,
    );
    let err = pipeline
        .run(&PipelineOptions {
            load_existing: true,
            output: Some(output.clone()),
            ..Default::default()
        })
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        PipelineError::Registry(RegistryError::MissingLinks { ref kind, .. }) if kind == "hg"
    ));
    assert_eq!(CLONE_CALLS.load(Ordering::SeqCst), 0);
    assert_eq!(ANALYZE_CALLS.load(Ordering::SeqCst), 0);
    assert!(!output.exists());
}

#[tokio::test]
async fn test_fatal_remote_analyzer_is_isolated() {
    let dir = tempfile::tempdir().unwrap();
    lint_workspace(dir.path());
    let output = dir.path().join("output.json");

    let mut catalog = lint_catalog();
    register(
        &mut catalog.remote_analyzers,
        "FatalRemote",
        location::ONLINE_ANALYZERS,
        &[capability::REMOTE_REPOSITORY_ANALYZER],
        build_fatal_remote,
    );
    register(
        &mut catalog.remote_analyzers,
        "BitbucketRemote",
        location::ONLINE_ANALYZERS,
        &[capability::REMOTE_REPOSITORY_ANALYZER],
        build_bitbucket_remote,
    );
    let pipeline = PipelineOrchestrator::new(
        settings(
            dir.path(),
            json!({
                "version_control_systems": ["git"],
                "social_coding_sites": ["github", "bitbucket"],
            }),
        ),
        catalog,
    );
    let report = pipeline
        .run(&PipelineOptions {
            load_existing: true,
            skip_download: true,
            output: Some(output.clone()),
            ..Default::default()
        })
        .await
        .unwrap();

    assert_eq!(report.final_state(), PipelineState::Done);
    assert!(report.artifact_written);
    let failed: Vec<_> = report
        .skipped
        .iter()
        .filter(|s| s.stage == PipelineStage::AnalyzeRemote)
        .collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].plugin.as_deref(), Some("FatalRemote"));
    assert_eq!(failed[0].target.as_deref(), Some("github"));
    assert!(matches!(failed[0].reason, SkipReason::Failed(_)));

    // Local results, the partial github record and the bitbucket site all reach the artifact.
    let records = read_records(&output);
    assert_eq!(records.len(), 3);
    assert_eq!(records[0]["lintErrors"], json!(6));
    assert_eq!(records[1]["stars"], json!(12));
    assert_eq!(records[2]["stars"], json!(4));
}

#[tokio::test]
async fn test_clone_window_reaches_cloner() {
    let dir = tempfile::tempdir().unwrap();
    write(
        &dir.path().join("links/git"),
        "https://d.git\nhttps://b.git\nhttps://a.git\nhttps://c.git\n",
    );

    let mut catalog = PluginCatalog::empty();
    register(
        &mut catalog.cloners,
        "RecordingCloner",
        location::REPOSITORY_CLONERS,
        &[capability::REPOSITORY_CLONER],
        build_recording_cloner,
    );
    let pipeline = PipelineOrchestrator::new(
        settings(dir.path(), json!({"version_control_systems": ["git"]})),
        catalog,
    );
    let report = pipeline
        .run(&PipelineOptions {
            load_existing: true,
            clone_offset: 1,
            clone_count: Some(2),
            ..Default::default()
        })
        .await
        .unwrap();

    assert!(report.states.contains(&PipelineState::Cloned));
    assert_eq!(
        *CLONED.lock().unwrap(),
        vec![vec!["https://b.git".to_string(), "https://c.git".to_string()]]
    );
}

#[tokio::test]
async fn test_unwritable_output_is_reported_not_fatal() {
    let dir = tempfile::tempdir().unwrap();
    lint_workspace(dir.path());
    // A directory cannot be overwritten with the JSON array.
    let output = dir.path().join("output");
    std::fs::create_dir_all(&output).unwrap();

    let pipeline = PipelineOrchestrator::new(
        settings(dir.path(), json!({"version_control_systems": ["git"]})),
        lint_catalog(),
    );
    let report = pipeline
        .run(&PipelineOptions {
            load_existing: true,
            skip_download: true,
            output: Some(output.clone()),
            ..Default::default()
        })
        .await
        .unwrap();

    assert_eq!(report.final_state(), PipelineState::Done);
    assert_eq!(report.records, 1);
    assert!(!report.artifact_written);
    assert!(report.artifact_may_be_stale());
    // One failed checkpoint after git, one failed terminal write.
    assert_eq!(report.persistence_errors.len(), 2);
    assert!(output.is_dir());
}

#[tokio::test]
async fn test_construction_failure_drops_only_that_plugin() {
    let dir = tempfile::tempdir().unwrap();
    let mut catalog = parser_catalog();
    register(
        &mut catalog.parsers,
        "BrokenParser",
        location::REPOSITORY_PARSERS,
        &[capability::REPOSITORY_PARSER],
        build_broken_parser,
    );
    let pipeline = PipelineOrchestrator::new(settings(dir.path(), json!({})), catalog);
    let report = pipeline
        .run(&PipelineOptions {
            skip_download: true,
            ..Default::default()
        })
        .await
        .unwrap();

    assert_eq!(report.skipped.len(), 1);
    let notice = &report.skipped[0];
    assert_eq!(notice.stage, PipelineStage::Parse);
    assert_eq!(notice.plugin.as_deref(), Some("BrokenParser"));
    assert!(matches!(
        notice.reason,
        SkipReason::Construction(ref message) if message.contains("unreachable")
    ));

    assert_eq!(std::fs::read_to_string(dir.path().join("links/git")).unwrap(), "x\ny\n");
    assert_eq!(std::fs::read_to_string(dir.path().join("links/svn")).unwrap(), "z\n");
}

#[tokio::test]
async fn test_empty_allow_list_enables_everything() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = PipelineOrchestrator::new(
        settings(dir.path(), json!({"parsers": []})),
        parser_catalog(),
    );
    pipeline
        .run(&PipelineOptions {
            skip_download: true,
            ..Default::default()
        })
        .await
        .unwrap();

    assert_eq!(std::fs::read_to_string(dir.path().join("links/git")).unwrap(), "x\ny\n");
    assert_eq!(std::fs::read_to_string(dir.path().join("links/svn")).unwrap(), "z\n");
}

#[tokio::test]
async fn test_allow_list_limits_discovery() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = PipelineOrchestrator::new(
        settings(dir.path(), json!({"parsers": ["BetaParser"]})),
        parser_catalog(),
    );
    pipeline
        .run(&PipelineOptions {
            skip_download: true,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(std::fs::read_to_string(dir.path().join("links/git")).unwrap(), "y\n");

    let dir = tempfile::tempdir().unwrap();
    let pipeline = PipelineOrchestrator::new(
        settings(dir.path(), json!({"parsers": ["NoSuchParser"]})),
        parser_catalog(),
    );
    let report = pipeline
        .run(&PipelineOptions {
            skip_download: true,
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(report.skipped.is_empty());
    assert_eq!(std::fs::read_to_string(dir.path().join("links/git")).unwrap(), "");
    assert_eq!(std::fs::read_to_string(dir.path().join("links/svn")).unwrap(), "");
}
