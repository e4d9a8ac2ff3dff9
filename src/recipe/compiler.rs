//! Compile recipes into deterministic, topologically ordered task graphs.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::collections::{BTreeSet, HashMap};

use super::{JobRegistry, Recipe, RecipeError};
use crate::evidence::EvidenceId;
use crate::task::{RequestId, TaskId, TaskRecord, TaskStatus};

/// One compiled task.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskNode {
    pub id: TaskId,
    pub task_type: String,
    pub config: Map<String, Value>,
    pub depends_on: Vec<TaskId>,
}

/// Tasks in execution order: no task precedes any of its dependencies.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskGraph {
    pub recipe_name: String,
    pub evidence_id: EvidenceId,
    pub nodes: Vec<TaskNode>,
}

impl TaskGraph {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn task_types(&self) -> Vec<&str> {
        self.nodes.iter().map(|n| n.task_type.as_str()).collect()
    }

    /// Materialise queued task records owned by `request_id`.
    pub fn into_tasks(self, request_id: RequestId, now: DateTime<Utc>) -> Vec<TaskRecord> {
        let evidence_id = self.evidence_id;
        self.nodes
            .into_iter()
            .enumerate()
            .map(|(position, node)| TaskRecord {
                id: node.id,
                request_id,
                task_type: node.task_type,
                evidence_id: evidence_id.clone(),
                config: node.config,
                depends_on: node.depends_on,
                position,
                status: TaskStatus::Queued,
                assigned_worker: None,
                result_payload: None,
                failure_reason: None,
                created_at: now,
                dispatched_at: None,
                started_at: None,
                finished_at: None,
            })
            .collect()
    }
}

/// Turns recipe documents into task graphs, checking task types against a
/// job registry. Task-specific config semantics are not inspected.
#[derive(Debug, Clone, Default)]
pub struct RecipeCompiler {
    jobs: JobRegistry,
}

impl RecipeCompiler {
    pub fn new(jobs: JobRegistry) -> Self {
        Self { jobs }
    }

    pub fn jobs(&self) -> &JobRegistry {
        &self.jobs
    }

    /// Parse and compile a YAML/JSON document.
    pub fn compile(&self, document: &str, evidence_id: &EvidenceId) -> Result<TaskGraph, RecipeError> {
        let recipe = Recipe::parse(document)?;
        self.compile_recipe(&recipe, evidence_id)
    }

    pub fn compile_recipe(
        &self,
        recipe: &Recipe,
        evidence_id: &EvidenceId,
    ) -> Result<TaskGraph, RecipeError> {
        if recipe.tasks.is_empty() {
            return Err(RecipeError::Empty);
        }

        // Canonical names, in declaration order.
        let mut names: Vec<String> = Vec::with_capacity(recipe.tasks.len());
        let mut index_of: HashMap<String, usize> = HashMap::new();
        for spec in &recipe.tasks {
            let canonical = self
                .jobs
                .canonical(&spec.task_type)
                .ok_or_else(|| RecipeError::UnknownTaskType(spec.task_type.clone()))?
                .to_string();
            if index_of
                .insert(canonical.to_ascii_lowercase(), names.len())
                .is_some()
            {
                return Err(RecipeError::DuplicateTaskType(canonical));
            }
            names.push(canonical);
        }

        // Dependency edges by declaration index.
        let n = names.len();
        let mut deps: Vec<Vec<usize>> = vec![Vec::new(); n];
        for (i, spec) in recipe.tasks.iter().enumerate() {
            for dependency in &spec.depends_on {
                let key = dependency.trim().to_ascii_lowercase();
                let dep = *index_of.get(&key).ok_or_else(|| RecipeError::MissingDependency {
                    task_type: names[i].clone(),
                    dependency: dependency.clone(),
                })?;
                if dep == i {
                    return Err(RecipeError::SelfDependency(names[i].clone()));
                }
                if !deps[i].contains(&dep) {
                    deps[i].push(dep);
                }
            }
        }

        let order = stable_toposort(&deps).map_err(|stuck| {
            RecipeError::CircularDependency(stuck.into_iter().map(|i| names[i].clone()).collect())
        })?;

        let ids: Vec<TaskId> = (0..n).map(|_| TaskId::new()).collect();
        let nodes = order
            .into_iter()
            .map(|i| TaskNode {
                id: ids[i],
                task_type: names[i].clone(),
                config: recipe.effective_config(&recipe.tasks[i]),
                depends_on: deps[i].iter().map(|&d| ids[d]).collect(),
            })
            .collect();

        Ok(TaskGraph {
            recipe_name: recipe.name.clone(),
            evidence_id: evidence_id.clone(),
            nodes,
        })
    }
}

/// Kahn's algorithm; among ready nodes the lowest declaration index goes first.
///
/// On a cycle, returns the indices that could not be ordered.
fn stable_toposort(deps: &[Vec<usize>]) -> Result<Vec<usize>, Vec<usize>> {
    let n = deps.len();
    let mut in_degree = vec![0usize; n];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];
    for (node, node_deps) in deps.iter().enumerate() {
        for &dep in node_deps {
            dependents[dep].push(node);
            in_degree[node] += 1;
        }
    }

    let mut ready: BTreeSet<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(n);
    while let Some(node) = ready.pop_first() {
        order.push(node);
        for &next in &dependents[node] {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                ready.insert(next);
            }
        }
    }

    if order.len() == n {
        Ok(order)
    } else {
        Err((0..n).filter(|&i| in_degree[i] > 0).collect())
    }
}
