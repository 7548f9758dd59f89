use axum::{
    Json, Router,
    extract::{Path, State, rejection::JsonRejection},
    http::{HeaderValue, StatusCode, header},
    response::Response,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};

use super::{AgentOutput, AuditEntry, GovernanceDecision, NewWorkflow, Services};
use crate::response::{ApiError, Envelope};

#[derive(Clone)]
struct AppState {
    services: Services,
    envelope: Envelope,
}

/// Creates the router of the workflow and governance endpoints.
pub(crate) fn router(services: Services, envelope: Envelope) -> Router {
    Router::new()
        .route("/api/workflows", post(create_workflow).get(list_workflows))
        .route("/api/workflows/{id}", get(get_workflow))
        .route("/api/workflows/{id}/transition", post(transition))
        .route("/api/workflows/{id}/outputs", post(add_output))
        .route("/api/workflows/{id}/audit", get(audit_chain))
        .route("/api/workflows/{id}/audit/export", get(export_audit))
        .route("/api/governance/decisions", post(governance_decision))
        .with_state(AppState { services, envelope })
}

#[derive(Debug, Deserialize)]
struct TransitionRequest {
    state: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AuditChain {
    workflow_id: String,
    entries: Vec<AuditEntry>,
}

async fn create_workflow(State(state): State<AppState>, payload: Result<Json<NewWorkflow>, JsonRejection>) -> Response {
    let result = async {
        let Json(request) = payload?;
        require("title", &request.title)?;

        Ok::<_, ApiError>(state.services.workflows.create_workflow(request).await?)
    }
    .await;

    state.envelope.respond(StatusCode::CREATED, result)
}

async fn list_workflows(State(state): State<AppState>) -> Response {
    let result = state.services.workflows.get_all_workflows().await;
    state.envelope.respond(StatusCode::OK, result)
}

async fn get_workflow(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let result = state.services.workflows.get_workflow(&id).await;
    state.envelope.respond(StatusCode::OK, result)
}

async fn transition(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<TransitionRequest>, JsonRejection>,
) -> Response {
    let result = async {
        let Json(request) = payload?;
        require("state", &request.state)?;

        Ok::<_, ApiError>(state.services.workflows.transition_to(&id, &request.state).await?)
    }
    .await;

    state.envelope.respond(StatusCode::OK, result)
}

async fn add_output(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<AgentOutput>, JsonRejection>,
) -> Response {
    let result = async {
        let Json(output) = payload?;
        require("agent", &output.agent)?;

        Ok::<_, ApiError>(state.services.workflows.add_agent_output(&id, output).await?)
    }
    .await;

    state.envelope.respond(StatusCode::CREATED, result)
}

async fn audit_chain(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let result = state
        .services
        .workflows
        .get_audit_chain(&id)
        .await
        .map(|entries| AuditChain {
            workflow_id: id,
            entries,
        });

    state.envelope.respond(StatusCode::OK, result)
}

async fn export_audit(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let entries = match state.services.workflows.get_audit_chain(&id).await {
        Ok(entries) => entries,
        Err(error) => return state.envelope.error(&error.into()),
    };

    let disposition = match HeaderValue::from_str(&format!("attachment; filename=\"audit-{id}.json\"")) {
        Ok(disposition) => disposition,
        Err(e) => {
            log::error!("Failed to name the audit export of workflow {id}: {e}");
            return state.envelope.error(&ApiError::Internal);
        }
    };

    let mut response = state.envelope.success(
        StatusCode::OK,
        AuditChain {
            workflow_id: id,
            entries,
        },
    );

    response.headers_mut().insert(header::CONTENT_DISPOSITION, disposition);
    response
}

async fn governance_decision(
    State(state): State<AppState>,
    payload: Result<Json<GovernanceDecision>, JsonRejection>,
) -> Response {
    let result = async {
        let Json(decision) = payload?;

        require("requestId", &decision.request_id)?;
        require("decision", &decision.decision)?;
        require("rationale", &decision.rationale)?;
        require("approver", &decision.approver)?;

        Ok::<_, ApiError>(state.services.governance.process_governance_decision(decision).await?)
    }
    .await;

    state.envelope.respond(StatusCode::OK, result)
}

fn require(field: &str, value: &str) -> Result<(), ApiError> {
    if value.trim().is_empty() {
        return Err(ApiError::validation(format!("Field '{field}' must not be empty")));
    }

    Ok(())
}
