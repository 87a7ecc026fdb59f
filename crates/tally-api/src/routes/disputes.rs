//! Dispute routes: resolution, escalation, assignment, discussion.

use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use tally_core::{Actor, Amount, DisputeId, UserId};
use tally_ledger::{Dispute, DisputeRole, EvidenceRef};

use crate::error::AppError;
use crate::state::AppState;

/// Body of `POST /v1/disputes/:id/resolve`.
#[derive(Debug, Deserialize)]
pub struct ResolveRequest {
    pub amount_to_freelancer: Amount,
    pub amount_to_client: Amount,
    pub decided_by: Actor,
}

/// Body of `POST /v1/disputes/:id/escalate`.
#[derive(Debug, Deserialize)]
pub struct EscalateRequest {
    pub reason: String,
    pub actor: Actor,
}

/// Body of `POST /v1/disputes/:id/assign`.
#[derive(Debug, Deserialize)]
pub struct AssignRequest {
    pub user: UserId,
    pub role: DisputeRole,
    pub actor: Actor,
}

/// Body of `POST /v1/disputes/:id/messages`.
#[derive(Debug, Deserialize)]
pub struct MessageRequest {
    pub author: Actor,
    pub body: String,
}

/// Body of `POST /v1/disputes/:id/evidence`.
#[derive(Debug, Deserialize)]
pub struct EvidenceRequest {
    pub description: String,
    pub url: Option<String>,
    pub submitted_by: UserId,
    pub actor: Actor,
}

fn dispute_of(state: &AppState, id: DisputeId) -> Result<Dispute, AppError> {
    Ok(state.engine.ledger().read(|view| view.dispute(id))?)
}

/// `GET /v1/disputes/:id`.
pub async fn show(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Dispute>, AppError> {
    Ok(Json(dispute_of(&state, DisputeId::from_uuid(id))?))
}

/// `POST /v1/disputes/:id/resolve` — final split; settlement legs are
/// enqueued before the dispute flips to RESOLVED.
pub async fn resolve(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<ResolveRequest>,
) -> Result<Json<Dispute>, AppError> {
    let dispute_id = DisputeId::from_uuid(id);
    state.engine.disputes().resolve(
        dispute_id,
        req.amount_to_freelancer,
        req.amount_to_client,
        req.decided_by,
    )?;
    Ok(Json(dispute_of(&state, dispute_id)?))
}

/// `POST /v1/disputes/:id/escalate`.
pub async fn escalate(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<EscalateRequest>,
) -> Result<Json<Dispute>, AppError> {
    let dispute_id = DisputeId::from_uuid(id);
    state
        .engine
        .disputes()
        .escalate(dispute_id, req.reason, req.actor)?;
    Ok(Json(dispute_of(&state, dispute_id)?))
}

/// `POST /v1/disputes/:id/assign` — attach a human mediator or
/// arbitrator.
pub async fn assign(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<AssignRequest>,
) -> Result<Json<Dispute>, AppError> {
    let dispute_id = DisputeId::from_uuid(id);
    state
        .engine
        .disputes()
        .assign(dispute_id, req.user, req.role, req.actor)?;
    Ok(Json(dispute_of(&state, dispute_id)?))
}

/// `POST /v1/disputes/:id/messages` — append to the discussion log.
pub async fn message(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<MessageRequest>,
) -> Result<Json<Dispute>, AppError> {
    let dispute_id = DisputeId::from_uuid(id);
    state
        .engine
        .disputes()
        .post_message(dispute_id, req.author, req.body)?;
    Ok(Json(dispute_of(&state, dispute_id)?))
}

/// `POST /v1/disputes/:id/evidence` — attach evidence.
pub async fn evidence(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<EvidenceRequest>,
) -> Result<Json<Dispute>, AppError> {
    let dispute_id = DisputeId::from_uuid(id);
    let evidence = EvidenceRef {
        description: req.description,
        url: req.url,
        submitted_by: req.submitted_by,
        submitted_at: chrono::Utc::now(),
    };
    state
        .engine
        .disputes()
        .add_evidence(dispute_id, evidence, req.actor)?;
    Ok(Json(dispute_of(&state, dispute_id)?))
}
