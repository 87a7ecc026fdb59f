//! Project routes: create with a milestone plan, fund, inspect.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use tally_core::{Actor, Amount, CurrencyCode, ProjectId, UserId};
use tally_ledger::{MilestoneDraft, Project, Transaction, DEFAULT_AUTO_APPROVE_DAYS};

use crate::error::AppError;
use crate::state::AppState;

/// One milestone in a `POST /v1/projects` plan.
#[derive(Debug, Deserialize)]
pub struct MilestonePlanItem {
    pub title: String,
    pub amount: Amount,
    pub deadline: Option<DateTime<Utc>>,
    pub acceptance_criteria: String,
}

/// Body of `POST /v1/projects`.
#[derive(Debug, Deserialize)]
pub struct CreateProjectRequest {
    pub client: UserId,
    pub freelancer: UserId,
    pub currency: String,
    pub budget: Amount,
    pub auto_approve_days: Option<u32>,
    pub milestones: Vec<MilestonePlanItem>,
}

/// Body of `GET /v1/projects/:id` responses.
#[derive(Debug, Serialize)]
pub struct ProjectResponse {
    pub project: Project,
    /// Escrow currently available for release, in minor units.
    pub available_escrow: Amount,
    pub transactions: Vec<Transaction>,
}

/// `POST /v1/projects` — create a project and its milestone plan.
pub async fn create(
    State(state): State<AppState>,
    Json(req): Json<CreateProjectRequest>,
) -> Result<(StatusCode, Json<Project>), AppError> {
    let currency =
        CurrencyCode::new(&req.currency).map_err(|err| AppError::Validation(err.to_string()))?;
    let drafts: Vec<MilestoneDraft> = req
        .milestones
        .into_iter()
        .map(|item| MilestoneDraft {
            title: item.title,
            amount: item.amount,
            deadline: item.deadline,
            acceptance_criteria: item.acceptance_criteria,
        })
        .collect();

    let client = req.client;
    let project_id = state.engine.ledger().transact(|unit| {
        unit.create_project(
            client,
            req.freelancer,
            currency,
            req.budget,
            req.auto_approve_days.unwrap_or(DEFAULT_AUTO_APPROVE_DAYS),
            drafts,
            Actor::Client(client),
        )
    })?;
    let project = state
        .engine
        .ledger()
        .read(|view| view.project(project_id))?;
    Ok((StatusCode::CREATED, Json(project)))
}

/// `POST /v1/projects/:id/fund` — move the budget into escrow.
pub async fn fund(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Project>, AppError> {
    let project_id = ProjectId::from_uuid(id);
    state
        .engine
        .ledger()
        .transact(|unit| unit.fund_project(project_id))?;
    let project = state
        .engine
        .ledger()
        .read(|view| view.project(project_id))?;
    Ok(Json(project))
}

/// `GET /v1/projects/:id` — project with escrow position and ledger.
pub async fn show(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ProjectResponse>, AppError> {
    let project_id = ProjectId::from_uuid(id);
    let response = state.engine.ledger().read(|view| {
        let project = view.project(project_id)?;
        let available_escrow = view.available_escrow(project_id)?;
        let transactions = view.project_transactions(project_id);
        Ok::<_, tally_ledger::LedgerError>(ProjectResponse {
            project,
            available_escrow,
            transactions,
        })
    })?;
    Ok(Json(response))
}
