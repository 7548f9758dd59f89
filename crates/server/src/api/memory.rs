//! Process-local implementations of the API services.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::{DashMap, mapref::entry::Entry};
use serde_json::json;

use super::{
    AgentOutput, AuditEntry, GovernanceDecision, GovernanceOutcome, GovernanceService, NewWorkflow, ServiceError,
    Workflow, WorkflowStore,
};

const INITIAL_STATE: &str = "INCIDENT_INGESTED";

struct WorkflowRecord {
    sequence: u64,
    workflow: Workflow,
    audit: Vec<AuditEntry>,
}

impl WorkflowRecord {
    fn audit(&mut self, action: &str, details: serde_json::Value) {
        let sequence = self.audit.len() as u64 + 1;

        self.audit.push(AuditEntry {
            sequence,
            timestamp: now(),
            action: action.to_string(),
            details,
        });
    }
}

/// Workflows held in a concurrent map.
#[derive(Default)]
pub(crate) struct InMemoryWorkflows {
    records: DashMap<String, WorkflowRecord>,
    next_sequence: AtomicU64,
}

impl InMemoryWorkflows {
    fn update<F>(&self, id: &str, update: F) -> Result<Workflow, ServiceError>
    where
        F: FnOnce(&mut WorkflowRecord),
    {
        let mut record = self
            .records
            .get_mut(id)
            .ok_or_else(|| ServiceError::NotFound(format!("Workflow {id} not found")))?;

        update(&mut record);
        record.workflow.updated_at = now();

        Ok(record.workflow.clone())
    }
}

#[async_trait]
impl WorkflowStore for InMemoryWorkflows {
    async fn create_workflow(&self, request: NewWorkflow) -> Result<Workflow, ServiceError> {
        let created_at = now();

        let workflow = Workflow {
            id: uuid::Uuid::new_v4().to_string(),
            title: request.title,
            description: request.description,
            severity: request.severity,
            state: INITIAL_STATE.to_string(),
            metadata: request.metadata,
            outputs: Vec::new(),
            created_at: created_at.clone(),
            updated_at: created_at,
        };

        let mut record = WorkflowRecord {
            sequence: self.next_sequence.fetch_add(1, Ordering::Relaxed),
            workflow: workflow.clone(),
            audit: Vec::new(),
        };

        record.audit("WORKFLOW_CREATED", json!({ "state": INITIAL_STATE }));
        self.records.insert(workflow.id.clone(), record);

        log::debug!("Created workflow {}", workflow.id);

        Ok(workflow)
    }

    async fn get_workflow(&self, id: &str) -> Result<Workflow, ServiceError> {
        self.records
            .get(id)
            .map(|record| record.workflow.clone())
            .ok_or_else(|| ServiceError::NotFound(format!("Workflow {id} not found")))
    }

    async fn get_all_workflows(&self) -> Result<Vec<Workflow>, ServiceError> {
        let mut workflows: Vec<_> = self
            .records
            .iter()
            .map(|record| (record.sequence, record.workflow.clone()))
            .collect();

        workflows.sort_by_key(|(sequence, _)| *sequence);

        Ok(workflows.into_iter().map(|(_, workflow)| workflow).collect())
    }

    async fn transition_to(&self, id: &str, state: &str) -> Result<Workflow, ServiceError> {
        if state.trim().is_empty() {
            return Err(ServiceError::Invalid("Target state must not be empty".to_string()));
        }

        self.update(id, |record| {
            let from = std::mem::replace(&mut record.workflow.state, state.to_string());
            record.audit("STATE_TRANSITION", json!({ "from": from, "to": state }));
        })
    }

    async fn add_agent_output(&self, id: &str, mut output: AgentOutput) -> Result<Workflow, ServiceError> {
        output.recorded_at.get_or_insert_with(now);

        self.update(id, |record| {
            record.audit("AGENT_OUTPUT_ADDED", json!({ "agent": output.agent }));
            record.workflow.outputs.push(output);
        })
    }

    async fn get_audit_chain(&self, id: &str) -> Result<Vec<AuditEntry>, ServiceError> {
        self.records
            .get(id)
            .map(|record| record.audit.clone())
            .ok_or_else(|| ServiceError::NotFound(format!("Workflow {id} not found")))
    }
}

/// Governance decisions held in a concurrent map, one per request.
#[derive(Default)]
pub(crate) struct InMemoryGovernance {
    decisions: DashMap<String, GovernanceOutcome>,
}

#[async_trait]
impl GovernanceService for InMemoryGovernance {
    async fn process_governance_decision(
        &self,
        decision: GovernanceDecision,
    ) -> Result<GovernanceOutcome, ServiceError> {
        let Entry::Vacant(entry) = self.decisions.entry(decision.request_id.clone()) else {
            return Err(ServiceError::Invalid(format!(
                "Governance request {} has already been decided",
                decision.request_id
            )));
        };

        let outcome = GovernanceOutcome {
            request_id: decision.request_id,
            decision: decision.decision,
            rationale: decision.rationale,
            approver: decision.approver,
            restrictions: decision.restrictions,
            processed_at: now(),
        };

        log::info!(
            "Governance request {} decided '{}' by {}",
            outcome.request_id,
            outcome.decision,
            outcome.approver
        );

        entry.insert(outcome.clone());

        Ok(outcome)
    }
}

fn now() -> String {
    jiff::Timestamp::now().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_workflow(title: &str) -> NewWorkflow {
        NewWorkflow {
            title: title.to_string(),
            description: None,
            severity: Some("high".to_string()),
            metadata: None,
        }
    }

    #[tokio::test]
    async fn workflow_lifecycle_is_audited() {
        let store = InMemoryWorkflows::default();

        let workflow = store.create_workflow(new_workflow("Suspicious login")).await.unwrap();
        assert_eq!(workflow.state, INITIAL_STATE);

        store.transition_to(&workflow.id, "TRIAGE").await.unwrap();

        let output = AgentOutput {
            agent: "triage".to_string(),
            content: json!({ "verdict": "benign" }),
            recorded_at: None,
        };

        let updated = store.add_agent_output(&workflow.id, output).await.unwrap();
        assert_eq!(updated.state, "TRIAGE");
        assert_eq!(updated.outputs.len(), 1);
        assert!(updated.outputs[0].recorded_at.is_some());

        let actions: Vec<_> = store
            .get_audit_chain(&workflow.id)
            .await
            .unwrap()
            .into_iter()
            .map(|entry| (entry.sequence, entry.action))
            .collect();

        assert_eq!(
            actions,
            vec![
                (1, "WORKFLOW_CREATED".to_string()),
                (2, "STATE_TRANSITION".to_string()),
                (3, "AGENT_OUTPUT_ADDED".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn workflows_are_listed_in_creation_order() {
        let store = InMemoryWorkflows::default();

        for title in ["first", "second", "third"] {
            store.create_workflow(new_workflow(title)).await.unwrap();
        }

        let titles: Vec<_> = store
            .get_all_workflows()
            .await
            .unwrap()
            .into_iter()
            .map(|workflow| workflow.title)
            .collect();

        assert_eq!(titles, vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn unknown_workflows() {
        let store = InMemoryWorkflows::default();

        assert!(matches!(store.get_workflow("nope").await, Err(ServiceError::NotFound(_))));
        assert!(matches!(
            store.transition_to("nope", "TRIAGE").await,
            Err(ServiceError::NotFound(_))
        ));
        assert!(matches!(store.get_audit_chain("nope").await, Err(ServiceError::NotFound(_))));
    }

    #[tokio::test]
    async fn governance_requests_are_decided_once() {
        let governance = InMemoryGovernance::default();

        let decision = GovernanceDecision {
            request_id: "req-1".to_string(),
            decision: "approve".to_string(),
            rationale: "Contained".to_string(),
            approver: "oncall".to_string(),
            restrictions: vec!["read-only".to_string()],
        };

        let outcome = governance.process_governance_decision(decision.clone()).await.unwrap();
        assert_eq!(outcome.restrictions, vec!["read-only"]);

        let again = governance.process_governance_decision(decision).await;
        assert!(matches!(again, Err(ServiceError::Invalid(_))));
    }
}
