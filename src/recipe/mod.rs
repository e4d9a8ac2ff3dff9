//! Recipe documents and their compilation into task graphs.
//!
//! A recipe is a YAML (or JSON) document:
//!
//! ```yaml
//! name: triage
//! globals:
//!   timeout: 3600
//! tasks:
//!   - type: PartitionEnumerationTask
//!   - type: PlasoParserTask
//!     config: { parsers: "!filestat" }
//!     depends_on: [PartitionEnumerationTask]
//! ```

mod compiler;
mod jobs;

pub use compiler::{RecipeCompiler, TaskGraph, TaskNode};
pub use jobs::{JobInfo, JobRegistry};

use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Default recipe name when the document does not carry one.
pub const DEFAULT_RECIPE_NAME: &str = "default";

/// Errors raised while parsing or compiling a recipe.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RecipeError {
    #[error("Malformed recipe document: {0}")]
    Malformed(String),

    #[error("Recipe declares no tasks")]
    Empty,

    #[error("Unknown task type '{0}'")]
    UnknownTaskType(String),

    #[error("Task type '{0}' is declared more than once")]
    DuplicateTaskType(String),

    #[error("Task '{0}' depends on itself")]
    SelfDependency(String),

    #[error("Task '{task_type}' depends on '{dependency}', which is not in the recipe")]
    MissingDependency {
        task_type: String,
        dependency: String,
    },

    #[error("Circular dependency between tasks: {}", .0.join(", "))]
    CircularDependency(Vec<String>),
}

/// One entry of a recipe's task list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskSpec {
    #[serde(rename = "type", alias = "task_type")]
    pub task_type: String,
    #[serde(default)]
    pub config: Map<String, Value>,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

impl TaskSpec {
    pub fn new(task_type: impl Into<String>) -> Self {
        Self {
            task_type: task_type.into(),
            config: Map::new(),
            depends_on: Vec::new(),
        }
    }

    pub fn depends_on(mut self, task_type: impl Into<String>) -> Self {
        self.depends_on.push(task_type.into());
        self
    }

    pub fn with_config(mut self, key: impl Into<String>, value: Value) -> Self {
        self.config.insert(key.into(), value);
        self
    }
}

/// A parsed recipe document, task specs in declaration order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recipe {
    #[serde(default = "default_recipe_name")]
    pub name: String,
    /// Options merged underneath every task's own config.
    #[serde(default)]
    pub globals: Map<String, Value>,
    pub tasks: Vec<TaskSpec>,
}

fn default_recipe_name() -> String {
    DEFAULT_RECIPE_NAME.to_string()
}

impl Recipe {
    pub fn new(name: impl Into<String>, tasks: Vec<TaskSpec>) -> Self {
        Self {
            name: name.into(),
            globals: Map::new(),
            tasks,
        }
    }

    /// Parse a YAML or JSON recipe document.
    pub fn parse(document: &str) -> Result<Self, RecipeError> {
        if document.trim().is_empty() {
            return Err(RecipeError::Malformed("document is empty".to_string()));
        }
        serde_yaml::from_str(document).map_err(|e| RecipeError::Malformed(e.to_string()))
    }

    /// Parse a base64-encoded recipe document.
    pub fn parse_base64(encoded: &str) -> Result<Self, RecipeError> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|e| RecipeError::Malformed(format!("invalid base64: {}", e)))?;
        let document = String::from_utf8(bytes)
            .map_err(|e| RecipeError::Malformed(format!("recipe is not UTF-8: {}", e)))?;
        Self::parse(&document)
    }

    /// Effective config for a task: globals overlaid with the task's own keys.
    pub fn effective_config(&self, spec: &TaskSpec) -> Map<String, Value> {
        let mut merged = self.globals.clone();
        for (key, value) in &spec.config {
            merged.insert(key.clone(), value.clone());
        }
        merged
    }
}
