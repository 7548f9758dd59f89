//! The workflow and governance API behind the protection layers.
//!
//! The services are collaborators the HTTP layer calls into without inspecting their
//! business rules. The in-memory implementations keep a process-local record.

mod handlers;
mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub(crate) use handlers::router;
pub(crate) use memory::{InMemoryGovernance, InMemoryWorkflows};

/// Errors reported by the API services.
#[derive(Debug, thiserror::Error)]
pub(crate) enum ServiceError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Invalid(String),
}

/// Request to open a new incident workflow.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct NewWorkflow {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub severity: Option<String>,
    #[serde(default)]
    pub metadata: Option<Value>,
}

/// An incident workflow.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Workflow {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub severity: Option<String>,
    pub state: String,
    pub metadata: Option<Value>,
    pub outputs: Vec<AgentOutput>,
    pub created_at: String,
    pub updated_at: String,
}

/// Output an agent attached to a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AgentOutput {
    pub agent: String,
    pub content: Value,
    #[serde(default)]
    pub recorded_at: Option<String>,
}

/// One entry of a workflow audit chain.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AuditEntry {
    pub sequence: u64,
    pub timestamp: String,
    pub action: String,
    pub details: Value,
}

/// A governance decision on a pending request.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GovernanceDecision {
    pub request_id: String,
    pub decision: String,
    pub rationale: String,
    pub approver: String,
    #[serde(default)]
    pub restrictions: Vec<String>,
}

/// The recorded outcome of a governance decision.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GovernanceOutcome {
    pub request_id: String,
    pub decision: String,
    pub rationale: String,
    pub approver: String,
    pub restrictions: Vec<String>,
    pub processed_at: String,
}

/// The workflow state manager.
#[async_trait]
pub(crate) trait WorkflowStore: Send + Sync {
    async fn create_workflow(&self, request: NewWorkflow) -> Result<Workflow, ServiceError>;

    async fn get_workflow(&self, id: &str) -> Result<Workflow, ServiceError>;

    async fn get_all_workflows(&self) -> Result<Vec<Workflow>, ServiceError>;

    async fn transition_to(&self, id: &str, state: &str) -> Result<Workflow, ServiceError>;

    async fn add_agent_output(&self, id: &str, output: AgentOutput) -> Result<Workflow, ServiceError>;

    async fn get_audit_chain(&self, id: &str) -> Result<Vec<AuditEntry>, ServiceError>;
}

/// The governance decision gate.
#[async_trait]
pub(crate) trait GovernanceService: Send + Sync {
    async fn process_governance_decision(
        &self,
        decision: GovernanceDecision,
    ) -> Result<GovernanceOutcome, ServiceError>;
}

/// Services the API handlers call into.
#[derive(Clone)]
pub(crate) struct Services {
    pub workflows: Arc<dyn WorkflowStore>,
    pub governance: Arc<dyn GovernanceService>,
}

impl Services {
    pub fn in_memory() -> Self {
        Self {
            workflows: Arc::new(InMemoryWorkflows::default()),
            governance: Arc::new(InMemoryGovernance::default()),
        }
    }
}
