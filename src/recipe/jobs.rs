//! Registry of task types the orchestrator accepts in recipes.

use serde::Serialize;
use std::collections::BTreeMap;

/// Built-in analysis jobs and a one-line description of each.
const BUILTIN_JOBS: &[(&str, &str)] = &[
    ("PlasoParserTask", "Generate a Plaso storage file from the evidence"),
    ("PlasoHasherTask", "Hash files found in the evidence with Plaso"),
    ("PartitionEnumerationTask", "Enumerate partitions of a disk image"),
    ("FsstatTask", "Run fsstat against the evidence filesystem"),
    ("YaraAnalysisTask", "Scan the evidence with Yara rules"),
    ("LinuxAccountAnalysisTask", "Analyse Linux account configuration"),
    ("PostgresAccountAnalysisTask", "Analyse PostgreSQL account configuration"),
    ("RedisAnalysisTask", "Analyse Redis configuration"),
    ("JupyterAnalysisTask", "Analyse Jupyter notebook configuration"),
    ("BulkExtractorTask", "Extract features with bulk_extractor"),
    ("StringsAsciiTask", "Extract ASCII strings from the evidence"),
    ("GrepTask", "Filter text evidence with patterns"),
    ("HindsightTask", "Analyse Chromium browser history"),
];

/// A task type exposed to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobInfo {
    pub name: String,
    pub description: String,
}

/// Known task types, after operator allow/deny filtering.
///
/// Lookups are case-insensitive; the canonical spelling is returned.
#[derive(Debug, Clone)]
pub struct JobRegistry {
    jobs: BTreeMap<String, JobInfo>,
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl JobRegistry {
    pub fn builtin() -> Self {
        let mut registry = Self {
            jobs: BTreeMap::new(),
        };
        for (name, description) in BUILTIN_JOBS {
            registry.register(*name, *description);
        }
        registry
    }

    pub fn empty() -> Self {
        Self {
            jobs: BTreeMap::new(),
        }
    }

    /// Register an additional task type. Re-registering replaces the description.
    pub fn register(&mut self, name: impl Into<String>, description: impl Into<String>) {
        let name = name.into();
        self.jobs.insert(
            name.to_ascii_lowercase(),
            JobInfo {
                name,
                description: description.into(),
            },
        );
    }

    /// Keep only allowed jobs (when an allow list is given) and drop denied ones.
    pub fn filtered(mut self, allow: &[String], deny: &[String]) -> Self {
        if !allow.is_empty() {
            let allow: Vec<String> = allow.iter().map(|n| n.to_ascii_lowercase()).collect();
            self.jobs.retain(|key, _| allow.contains(key));
        }
        for name in deny {
            if self.jobs.remove(&name.to_ascii_lowercase()).is_some() {
                tracing::info!("Job {} disabled by deny list", name);
            }
        }
        self
    }

    /// Canonical name of a task type, if it is enabled.
    pub fn canonical(&self, name: &str) -> Option<&str> {
        self.jobs
            .get(&name.trim().to_ascii_lowercase())
            .map(|job| job.name.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.canonical(name).is_some()
    }

    pub fn list(&self) -> Vec<JobInfo> {
        let mut jobs: Vec<JobInfo> = self.jobs.values().cloned().collect();
        jobs.sort_by(|a, b| a.name.cmp(&b.name));
        jobs
    }
}
