//! Top-level facade wiring the registry, compiler, state machine and dispatcher.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

use crate::dispatch::{Dispatcher, ReportDisposition, WorkerReport};
use crate::error::{OrchestratorError, Result};
use crate::evidence::{EvidenceDescriptor, EvidenceId, EvidenceRegistry};
use crate::recipe::{JobRegistry, Recipe, RecipeCompiler};
use crate::state::RequestStateMachine;
use crate::status::{RequestSnapshot, StatusApi};
use crate::store::OrchestratorStore;
use crate::task::{RequestId, RequestRecord, RequestStatus, TaskId, TaskStatus};

/// A client submission: evidence plus the recipe to run against it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Submission {
    /// Evidence to register (or re-use if already registered).
    #[serde(default)]
    pub evidence: Option<EvidenceDescriptor>,
    /// Previously registered evidence.
    #[serde(default)]
    pub evidence_id: Option<EvidenceId>,
    /// YAML or JSON recipe document.
    #[serde(default)]
    pub recipe: Option<String>,
    #[serde(default)]
    pub recipe_base64: Option<String>,
    #[serde(default)]
    pub requester: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

impl Submission {
    pub fn new(evidence: EvidenceDescriptor, recipe: impl Into<String>) -> Self {
        Self {
            evidence: Some(evidence),
            recipe: Some(recipe.into()),
            ..Self::default()
        }
    }

    fn recipe(&self) -> Result<Recipe> {
        match (&self.recipe, &self.recipe_base64) {
            (Some(document), None) => Ok(Recipe::parse(document)?),
            (None, Some(encoded)) => Ok(Recipe::parse_base64(encoded)?),
            (Some(_), Some(_)) => Err(OrchestratorError::Validation(
                "provide either recipe or recipe_base64, not both".to_string(),
            )),
            (None, None) => Err(OrchestratorError::Validation(
                "a recipe is required".to_string(),
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    pub jobs: JobRegistry,
    pub dispatch_timeout: Duration,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            jobs: JobRegistry::builtin(),
            dispatch_timeout: Duration::from_secs(3600),
        }
    }
}

/// The orchestration engine.
pub struct Orchestrator {
    store: Arc<dyn OrchestratorStore>,
    evidence: EvidenceRegistry,
    compiler: RecipeCompiler,
    state: Arc<RequestStateMachine>,
    dispatcher: Arc<Dispatcher>,
    status: StatusApi,
    notify: Arc<Notify>,
}

impl Orchestrator {
    /// Build an orchestrator over `store`, restoring in-flight assignments.
    pub async fn new(store: Arc<dyn OrchestratorStore>, options: OrchestratorOptions) -> Result<Self> {
        let notify = Arc::new(Notify::new());
        let state = Arc::new(RequestStateMachine::new(store.clone()));
        let dispatcher = Arc::new(Dispatcher::new(
            state.clone(),
            notify.clone(),
            options.dispatch_timeout,
        ));
        dispatcher.recover().await?;
        let status = StatusApi::new(state.clone()).with_dispatcher(dispatcher.clone());

        Ok(Self {
            evidence: EvidenceRegistry::new(store.clone()),
            compiler: RecipeCompiler::new(options.jobs),
            store,
            state,
            dispatcher,
            status,
            notify,
        })
    }

    pub fn evidence(&self) -> &EvidenceRegistry {
        &self.evidence
    }

    pub fn compiler(&self) -> &RecipeCompiler {
        &self.compiler
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn status(&self) -> &StatusApi {
        &self.status
    }

    /// Signal used to wake the scheduler loop.
    pub fn notify(&self) -> Arc<Notify> {
        self.notify.clone()
    }

    pub fn is_persistent(&self) -> bool {
        self.store.is_persistent()
    }

    /// Register evidence, compile the recipe and persist the request with all
    /// of its tasks queued. Nothing is stored if validation or compilation fails.
    pub async fn submit(&self, submission: Submission) -> Result<RequestId> {
        let recipe = submission.recipe()?;

        // Compile before registering so a bad recipe leaves nothing behind.
        let (evidence, graph) = match (&submission.evidence, &submission.evidence_id) {
            (Some(descriptor), None) => {
                let candidate = self.evidence.validate(descriptor)?;
                let graph = self.compiler.compile_recipe(&recipe, &candidate.id)?;
                (self.evidence.register(descriptor).await?, graph)
            }
            (None, Some(id)) => {
                let evidence = self.evidence.lookup(id).await?;
                let graph = self.compiler.compile_recipe(&recipe, &evidence.id)?;
                (evidence, graph)
            }
            (Some(_), Some(_)) => {
                return Err(OrchestratorError::Validation(
                    "provide either evidence or evidence_id, not both".to_string(),
                ))
            }
            (None, None) => {
                return Err(OrchestratorError::Validation(
                    "evidence is required".to_string(),
                ))
            }
        };

        let now = Utc::now();
        let request_id = RequestId::new();
        let recipe_name = graph.recipe_name.clone();
        let tasks = graph.into_tasks(request_id, now);
        let request = RequestRecord {
            id: request_id,
            evidence_id: evidence.id.clone(),
            recipe_name,
            status: RequestStatus::Queued,
            terminal_reason: None,
            requester: submission
                .requester
                .filter(|r| !r.trim().is_empty())
                .unwrap_or_else(|| "anonymous".to_string()),
            reason: submission.reason,
            task_ids: tasks.iter().map(|t| t.id).collect(),
            created_at: now,
            updated_at: now,
            version: 0,
        };

        self.state.create(&request, &tasks).await?;
        tracing::info!(
            "Request {} submitted by {}: {} tasks of recipe '{}' on {} {}",
            request.id,
            request.requester,
            tasks.len(),
            request.recipe_name,
            evidence.kind,
            evidence.display_name()
        );
        self.notify.notify_one();
        Ok(request_id)
    }

    pub async fn get_status(&self, id: RequestId) -> Result<RequestSnapshot> {
        self.state.get_status(id).await
    }

    pub async fn report_outcome(
        &self,
        task_id: TaskId,
        report: WorkerReport,
    ) -> Result<ReportDisposition> {
        self.dispatcher.report_outcome(task_id, report).await
    }

    /// Cancel every unfinished task of a request. The request fails with
    /// reason `cancelled`. Cancelling a finished request changes nothing.
    pub async fn cancel(&self, id: RequestId) -> Result<RequestSnapshot> {
        let guard = self.state.lock(id).await;
        let view = self.state.load(&guard).await?;
        if view.request.status.is_terminal() {
            tracing::debug!("Request {} already {}; cancel ignored", id, view.request.status);
            return Ok(RequestSnapshot::new(&view.request, &view.tasks));
        }

        let mut change = view.begin(Utc::now());
        let pending: Vec<(TaskId, TaskStatus)> = change
            .tasks()
            .iter()
            .filter(|t| !t.status.is_terminal())
            .map(|t| (t.id, t.status))
            .collect();
        for (task_id, _) in &pending {
            change.apply(*task_id, |t, now| {
                t.cancel(Some("request cancelled".to_string()), now)
            })?;
        }
        self.state.commit(&guard, change).await?;
        drop(guard);

        for (task_id, status) in pending {
            if status.is_in_flight() {
                self.dispatcher.pool().release(task_id);
            }
        }
        self.notify.notify_one();
        tracing::info!("Request {} cancelled", id);
        self.state.get_status(id).await
    }
}
