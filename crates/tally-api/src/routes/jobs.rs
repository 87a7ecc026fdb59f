//! Job admin routes: dead-letter inspection and requeueing.

use axum::extract::{Path, State};
use axum::Json;
use uuid::Uuid;

use tally_queue::{Job, JobId};

use crate::error::AppError;
use crate::state::AppState;

/// `GET /v1/jobs/dead-letter` — every dead-lettered job, for operators.
pub async fn dead_letter(State(state): State<AppState>) -> Json<Vec<Job>> {
    Json(state.engine.queue().dead_lettered())
}

/// `POST /v1/jobs/:id/requeue` — give a dead-lettered job a fresh
/// attempt budget.
pub async fn requeue(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Job>, AppError> {
    let job = state.engine.queue().requeue(JobId::from_uuid(id))?;
    Ok(Json(job))
}
