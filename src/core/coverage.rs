//! Coverage gate.
//!
//! A read-only table of `{operation, id pattern, api version, properties}`
//! records says which properties the typed provider supports for each
//! resource shape. The gate vetoes migrations that would lose properties.

use super::error::{MigrateError, Result};
use super::types::{Descriptor, ResourceDescriptor};
use indexmap::{IndexMap, IndexSet};
use serde::Deserialize;

/// Environment variable that disables the gate for all descriptors.
pub const SKIP_COVERAGE_ENV: &str = "AZMIGRATE_SKIP_COVERAGE_CHECK";

/// Datasets this small are development fixtures, not the real thing.
const DEV_DATASET_RECORDS: usize = 10;

const EMBEDDED_DATASET: &str = include_str!("../../data/coverage.json");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operation {
    Put,
    Get,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Property {
    pub name: String,
}

/// One row of the coverage dataset.
#[derive(Debug, Clone, Deserialize)]
pub struct CoverageRecord {
    pub api_version: String,
    pub api_path: String,
    pub operation: Operation,
    #[serde(default)]
    pub properties: Vec<Property>,
}

struct Entry {
    api_version: String,
    properties: IndexSet<String>,
}

/// Id pattern (lowercase) and operation -> supported api version and properties.
pub struct CoverageTable {
    entries: IndexMap<(String, Operation), Entry>,
}

impl CoverageTable {
    /// The dataset compiled into the binary.
    pub fn embedded() -> Result<Self> {
        Self::from_json(EMBEDDED_DATASET)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let records: Vec<CoverageRecord> = serde_json::from_str(json)?;
        Ok(Self::from_records(records))
    }

    /// Build the table. The first record for a pattern and operation wins;
    /// records with an unparsable path are skipped.
    pub fn from_records(records: Vec<CoverageRecord>) -> Self {
        if records.len() <= DEV_DATASET_RECORDS {
            tracing::warn!(
                records = records.len(),
                "coverage dataset looks like a development fixture"
            );
        }
        let mut entries = IndexMap::new();
        for record in records {
            let pattern = match id_pattern(&record.api_path) {
                Ok(p) => p.to_lowercase(),
                Err(e) => {
                    tracing::warn!(error = %e, "skipping coverage record");
                    continue;
                }
            };
            entries
                .entry((pattern, record.operation))
                .or_insert_with(|| Entry {
                    api_version: record.api_version,
                    properties: record.properties.into_iter().map(|p| p.name).collect(),
                });
        }
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn entry(&self, operation: Operation, pattern: &str) -> Option<&Entry> {
        self.entries.get(&(pattern.to_lowercase(), operation))
    }

    /// API version of the first PUT record for `pattern`, or empty.
    pub fn api_version_for(&self, pattern: &str) -> &str {
        self.entry(Operation::Put, pattern)
            .map(|e| e.api_version.as_str())
            .unwrap_or("")
    }

    /// Partition `props` into (covered, uncovered) for one operation.
    ///
    /// Membership is exact after array indices are stripped; `name` is
    /// always covered.
    /// An unknown pattern leaves everything uncovered.
    pub fn coverage(
        &self,
        props: &[String],
        operation: Operation,
        pattern: &str,
    ) -> (Vec<String>, Vec<String>) {
        let Some(entry) = self.entry(operation, pattern) else {
            return (Vec::new(), props.to_vec());
        };
        props.iter().cloned().partition(|prop| {
            let prop = strip_array_indices(prop);
            prop == "name" || entry.properties.contains(&prop)
        })
    }

    /// Decide whether a descriptor may be migrated.
    ///
    /// Typed descriptors always pass. In strict mode an untyped or patch
    /// descriptor fails on an api version mismatch or any uncovered input
    /// or output property; otherwise problems are only logged.
    pub fn check(&self, resource: &ResourceDescriptor, strict: bool) -> Result<()> {
        let descriptor = match resource {
            ResourceDescriptor::Typed(_) => return Ok(()),
            ResourceDescriptor::Untyped(d) => d,
            ResourceDescriptor::Patch { descriptor, .. } => descriptor,
        };
        let address = descriptor.old_base_address();
        let problems = self.problems(descriptor)?;
        if problems.is_empty() {
            return Ok(());
        }
        let reason = problems.join("; ");
        if strict {
            return Err(MigrateError::CoverageRejected { address, reason });
        }
        tracing::warn!(address = %address, reason = %reason, "coverage gaps, migrating anyway");
        Ok(())
    }

    fn problems(&self, descriptor: &Descriptor) -> Result<Vec<String>> {
        let Some(instance) = descriptor.instances.first() else {
            return Ok(Vec::new());
        };
        let pattern = id_pattern(&instance.resource_id)?;
        let mut problems = Vec::new();

        let supported = self.api_version_for(&pattern);
        if let Some(version) = instance.api_version.as_deref() {
            if version != supported {
                let supported = if supported.is_empty() { "none" } else { supported };
                problems.push(format!(
                    "api-version {} is not supported (supported: {})",
                    version, supported
                ));
            }
        }

        let (_, uncovered) = self.coverage(&descriptor.input_properties, Operation::Put, &pattern);
        if !uncovered.is_empty() {
            problems.push(format!("unsupported input properties: {}", uncovered.join(", ")));
        }
        let (_, uncovered) = self.coverage(&descriptor.output_properties, Operation::Get, &pattern);
        if !uncovered.is_empty() {
            problems.push(format!("unsupported output properties: {}", uncovered.join(", ")));
        }
        Ok(problems)
    }
}

/// Normalize a resource id to its abstract type path.
///
/// `/subscriptions/S/resourceGroups/G/providers/Microsoft.Automation/automationAccounts/A`
/// becomes `/subscriptions/resourceGroups/providers/Microsoft.Automation/automationAccounts`.
pub fn id_pattern(id: &str) -> Result<String> {
    let invalid = |reason: &str| MigrateError::InvalidResourceId {
        id: id.to_string(),
        reason: reason.to_string(),
    };
    let segments: Vec<&str> = id.trim().trim_matches('/').split('/').collect();
    if segments.len() % 2 != 0 {
        return Err(invalid("unbalanced type/name segments"));
    }
    if segments.iter().any(|s| s.is_empty()) {
        return Err(invalid("empty segment"));
    }

    let mut kept = Vec::with_capacity(segments.len() / 2 + 1);
    for pair in segments.chunks(2) {
        kept.push(pair[0]);
        if pair[0].eq_ignore_ascii_case("providers") {
            kept.push(pair[1]);
        }
    }
    Ok(format!("/{}", kept.join("/")))
}

/// Drop numeric path segments: `a.0.b` -> `a.b`.
pub fn strip_array_indices(path: &str) -> String {
    path.split('.')
        .filter(|s| s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()))
        .collect::<Vec<_>>()
        .join(".")
}

/// Whether the environment disables the gate.
pub fn skip_coverage_check() -> bool {
    std::env::var(SKIP_COVERAGE_ENV)
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}
