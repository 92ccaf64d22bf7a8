//! Aggregated analysis results.

use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::info;

use crate::harvest::traits::PersistenceError;
use crate::model::{self, DetailRecord};

/// Mapping from repository identifier to detail record, kept in insertion order.
///
/// Every analyzer of a run mutates the same aggregator. Fields registered as
/// counters are summed on [`merge`](Self::merge); all other fields are
/// last-write-wins.
#[derive(Debug, Default, Clone)]
pub struct ResultAggregator {
    order: Vec<String>,
    records: HashMap<String, DetailRecord>,
    counters: HashSet<String>,
}

impl ResultAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_counter(mut self, field: &str) -> Self {
        self.register_counter(field);
        self
    }

    /// Declares `field` additive for future merges.
    pub fn register_counter(&mut self, field: &str) {
        self.counters.insert(field.to_string());
    }

    pub fn is_counter(&self, field: &str) -> bool {
        self.counters.contains(field)
    }

    /// Mutable access to the record for `id`, created empty on first use.
    pub fn record_mut(&mut self, id: &str) -> &mut DetailRecord {
        if !self.records.contains_key(id) {
            self.order.push(id.to_string());
        }
        self.records.entry(id.to_string()).or_default()
    }

    pub fn get(&self, id: &str) -> Option<&DetailRecord> {
        self.records.get(id)
    }

    /// Inserts `field` with `default` only if the record lacks it.
    pub fn ensure_field(&mut self, id: &str, field: &str, default: Value) -> bool {
        model::ensure_field(self.record_mut(id), field, default)
    }

    /// Applies `patch` to the record for `id`: counters add, everything else overwrites.
    pub fn merge(&mut self, id: &str, patch: DetailRecord) {
        let counters = &self.counters;
        if !self.records.contains_key(id) {
            self.order.push(id.to_string());
        }
        let record = self.records.entry(id.to_string()).or_default();
        for (field, value) in patch {
            if counters.contains(&field) {
                let sum = model::add_values(record.get(&field), &value);
                record.insert(field, sum);
            } else {
                record.insert(field, value);
            }
        }
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Records in insertion order, identifiers dropped.
    pub fn snapshot(&self) -> Vec<&DetailRecord> {
        self.order
            .iter()
            .filter_map(|id| self.records.get(id))
            .collect()
    }

    /// Writes [`snapshot`](Self::snapshot) to `path` as one JSON array, overwriting it.
    pub fn write_snapshot(&self, path: &Path) -> Result<(), PersistenceError> {
        let io_err = |source| PersistenceError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }

        let mut writer = BufWriter::new(fs::File::create(path).map_err(io_err)?);
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut serializer = serde_json::Serializer::with_formatter(&mut writer, formatter);
        self.snapshot().serialize(&mut serializer)?;
        writer.write_all(b"\n").map_err(io_err)?;
        writer.flush().map_err(io_err)?;

        info!(records = self.len(), path = %path.display(), "Wrote repository details");
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
