//! C++ style checking through `cpplint`.

use async_trait::async_trait;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::harvest::loader::{ConstructorSignature, PluginArgs, PluginDescriptor};
use crate::harvest::traits::{capability, location, ConstructionError};
use crate::model::{ensure_field, increment_counter, DetailRecord};
use crate::traits::{FileAnalyzer, PluginError};

const NAME: &str = "CppFileAnalyzer";
const PROGRAM: &str = "cpplint";
const ERRORS_FIELD: &str = "cpplint_errors";
const EXTENSIONS: &[&str] = &["cpp", "hpp", "h"];
const FILTER: &str = "--filter=-whitespace/tab,-whitespace/braces,-build/headerguard,\
-readability/streams,-build/include_order,-whitespace/newline,-whitespace/labels,\
-runtime/references";

pub fn descriptor() -> PluginDescriptor<dyn FileAnalyzer> {
    PluginDescriptor {
        name: NAME,
        location: location::FILE_ANALYZERS,
        capabilities: &[capability::FILE_ANALYZER],
        signature: ConstructorSignature::bare(),
        factory: build,
    }
}

fn build(_: &PluginArgs<'_>) -> Result<Box<dyn FileAnalyzer>, ConstructionError> {
    Ok(Box::new(CppFileAnalyzer::default()))
}

/// Extracts the count from cpplint's `Total errors found: N` summary line.
pub fn parse_total_errors(output: &str) -> Option<i64> {
    output
        .lines()
        .filter_map(|line| line.trim().strip_prefix("Total errors found:"))
        .filter_map(|count| count.trim().parse().ok())
        .last()
}

fn is_cpp_source(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| EXTENSIONS.contains(&ext))
}

/// Sums cpplint errors over every C++ source and header of a repository.
#[derive(Debug)]
pub struct CppFileAnalyzer {
    program: String,
}

impl Default for CppFileAnalyzer {
    fn default() -> Self {
        Self {
            program: PROGRAM.to_string(),
        }
    }
}

impl CppFileAnalyzer {
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    async fn lint(&self, path: &Path) -> Result<i64, PluginError> {
        let output = Command::new(&self.program)
            .arg(FILTER)
            .arg(path)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| PluginError::Command {
                command: self.program.clone(),
                message: e.to_string(),
            })?;

        // cpplint reports on stderr; older releases used stdout.
        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(parse_total_errors(&combined).unwrap_or(0))
    }
}

#[async_trait]
impl FileAnalyzer for CppFileAnalyzer {
    fn name(&self) -> &str {
        NAME
    }

    fn counter_fields(&self) -> &[&'static str] {
        &[ERRORS_FIELD]
    }

    fn initialize_fields(&self, record: &mut DetailRecord) {
        ensure_field(record, ERRORS_FIELD, json!(0));
    }

    async fn analyze_files(
        &self,
        paths: &[PathBuf],
        record: &mut DetailRecord,
    ) -> Result<(), PluginError> {
        for path in paths.iter().filter(|path| is_cpp_source(path)) {
            match self.lint(path).await {
                Ok(errors) => {
                    debug!(file = %path.display(), errors, "Linted file");
                    increment_counter(record, ERRORS_FIELD, errors);
                }
                Err(err @ PluginError::Command { .. }) => return Err(err),
                Err(err) => warn!(file = %path.display(), error = %err, "Lint failed"),
            }
        }
        Ok(())
    }
}
