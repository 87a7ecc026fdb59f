//! Milestone routes: lifecycle transitions and inspection.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use tally_core::{Actor, MilestoneId, UserId};
use tally_ledger::{Deliverable, Dispute, EvidenceRef, Milestone};
use tally_queue::JobId;

use crate::error::AppError;
use crate::state::AppState;

/// A deliverable in a submission body.
#[derive(Debug, Deserialize)]
pub struct DeliverableItem {
    pub description: String,
    pub url: Option<String>,
}

/// Body of `POST /v1/milestones/:id/start`.
#[derive(Debug, Deserialize)]
pub struct StartRequest {
    pub actor: Actor,
}

/// Body of `POST /v1/milestones/:id/submit`.
#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    #[serde(default)]
    pub deliverables: Vec<DeliverableItem>,
    pub notes: Option<String>,
    pub actor: Actor,
}

/// Body of `POST /v1/milestones/:id/approve`.
#[derive(Debug, Deserialize)]
pub struct ApproveRequest {
    pub actor: Actor,
}

/// Response of `POST /v1/milestones/:id/approve`.
#[derive(Debug, Serialize)]
pub struct ApproveResponse {
    pub milestone: Milestone,
    /// The settlement job driving the release.
    pub settlement_job: JobId,
}

/// Body of `POST /v1/milestones/:id/revision`.
#[derive(Debug, Deserialize)]
pub struct RevisionRequestBody {
    pub notes: String,
    pub actor: Actor,
}

/// An evidence reference in a dispute filing.
#[derive(Debug, Deserialize)]
pub struct EvidenceItem {
    pub description: String,
    pub url: Option<String>,
}

/// Body of `POST /v1/milestones/:id/dispute`.
#[derive(Debug, Deserialize)]
pub struct DisputeRequest {
    pub raised_by: UserId,
    pub reason: String,
    #[serde(default)]
    pub evidence: Vec<EvidenceItem>,
    pub actor: Actor,
}

fn milestone_of(state: &AppState, id: MilestoneId) -> Result<Milestone, AppError> {
    Ok(state.engine.ledger().read(|view| view.milestone(id))?)
}

/// `GET /v1/milestones/:id`.
pub async fn show(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Milestone>, AppError> {
    Ok(Json(milestone_of(&state, MilestoneId::from_uuid(id))?))
}

/// `POST /v1/milestones/:id/start`.
pub async fn start(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<StartRequest>,
) -> Result<Json<Milestone>, AppError> {
    let milestone_id = MilestoneId::from_uuid(id);
    state.engine.milestones().start(milestone_id, req.actor)?;
    Ok(Json(milestone_of(&state, milestone_id)?))
}

/// `POST /v1/milestones/:id/submit`.
pub async fn submit(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<SubmitRequest>,
) -> Result<Json<Milestone>, AppError> {
    let milestone_id = MilestoneId::from_uuid(id);
    let deliverables = req
        .deliverables
        .into_iter()
        .map(|item| Deliverable::new(item.description, item.url))
        .collect();
    state
        .engine
        .milestones()
        .submit(milestone_id, deliverables, req.notes, req.actor)?;
    Ok(Json(milestone_of(&state, milestone_id)?))
}

/// `POST /v1/milestones/:id/approve` — approve and enqueue settlement.
pub async fn approve(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<ApproveRequest>,
) -> Result<Json<ApproveResponse>, AppError> {
    let milestone_id = MilestoneId::from_uuid(id);
    let settlement_job = state.engine.milestones().approve(milestone_id, req.actor)?;
    Ok(Json(ApproveResponse {
        milestone: milestone_of(&state, milestone_id)?,
        settlement_job,
    }))
}

/// `POST /v1/milestones/:id/revision`.
pub async fn revision(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<RevisionRequestBody>,
) -> Result<Json<Milestone>, AppError> {
    let milestone_id = MilestoneId::from_uuid(id);
    state
        .engine
        .milestones()
        .request_revision(milestone_id, req.notes, req.actor)?;
    Ok(Json(milestone_of(&state, milestone_id)?))
}

/// `POST /v1/milestones/:id/dispute` — open a dispute over this
/// milestone.
pub async fn dispute(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<DisputeRequest>,
) -> Result<(StatusCode, Json<Dispute>), AppError> {
    let milestone_id = MilestoneId::from_uuid(id);
    let evidence = req
        .evidence
        .into_iter()
        .map(|item| EvidenceRef {
            description: item.description,
            url: item.url,
            submitted_by: req.raised_by,
            submitted_at: chrono::Utc::now(),
        })
        .collect();
    let dispute_id = state.engine.disputes().open(
        milestone_id,
        req.raised_by,
        req.reason,
        evidence,
        req.actor,
    )?;
    let dispute = state
        .engine
        .ledger()
        .read(|view| view.dispute(dispute_id))?;
    Ok((StatusCode::CREATED, Json(dispute)))
}
