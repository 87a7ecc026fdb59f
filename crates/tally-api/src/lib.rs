//! # tally-api — HTTP Surface
//!
//! Axum application over the settlement engine. The API is a thin
//! consumer of the controllers; synchronous actions return validation
//! results immediately, asynchronous settlement outcomes flow through
//! the notification fan-out.
//!
//! ## API Surface
//!
//! | Method/Path                        | Handler                   |
//! |------------------------------------|---------------------------|
//! | `POST /v1/wallets`                 | open wallet               |
//! | `GET /v1/wallets/:user`            | wallet by owner           |
//! | `POST /v1/wallets/:user/deposit`   | deposit                   |
//! | `POST /v1/projects`                | create project + plan     |
//! | `GET /v1/projects/:id`             | project + escrow position |
//! | `POST /v1/projects/:id/fund`       | fund escrow               |
//! | `GET /v1/milestones/:id`           | milestone                 |
//! | `POST /v1/milestones/:id/start`    | start work                |
//! | `POST /v1/milestones/:id/submit`   | submit for review         |
//! | `POST /v1/milestones/:id/approve`  | approve + settle          |
//! | `POST /v1/milestones/:id/revision` | request revision          |
//! | `POST /v1/milestones/:id/dispute`  | open dispute              |
//! | `GET /v1/disputes/:id`             | dispute                   |
//! | `POST /v1/disputes/:id/resolve`    | resolve with split        |
//! | `POST /v1/disputes/:id/escalate`   | escalate                  |
//! | `POST /v1/disputes/:id/assign`     | assign mediator/arbitrator|
//! | `POST /v1/disputes/:id/messages`   | post message              |
//! | `POST /v1/disputes/:id/evidence`   | attach evidence           |
//! | `GET /v1/jobs/dead-letter`         | dead-lettered jobs        |
//! | `POST /v1/jobs/:id/requeue`        | requeue dead-letter       |
//! | `GET /healthz`, `GET /readyz`      | probes                    |

pub mod error;
pub mod routes;
pub mod state;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

pub use error::AppError;
pub use state::AppState;

/// Build the application router.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/v1/wallets", post(routes::wallets::open))
        .route("/v1/wallets/:user", get(routes::wallets::show))
        .route("/v1/wallets/:user/deposit", post(routes::wallets::deposit))
        .route("/v1/projects", post(routes::projects::create))
        .route("/v1/projects/:id", get(routes::projects::show))
        .route("/v1/projects/:id/fund", post(routes::projects::fund))
        .route("/v1/milestones/:id", get(routes::milestones::show))
        .route("/v1/milestones/:id/start", post(routes::milestones::start))
        .route("/v1/milestones/:id/submit", post(routes::milestones::submit))
        .route("/v1/milestones/:id/approve", post(routes::milestones::approve))
        .route("/v1/milestones/:id/revision", post(routes::milestones::revision))
        .route("/v1/milestones/:id/dispute", post(routes::milestones::dispute))
        .route("/v1/disputes/:id", get(routes::disputes::show))
        .route("/v1/disputes/:id/resolve", post(routes::disputes::resolve))
        .route("/v1/disputes/:id/escalate", post(routes::disputes::escalate))
        .route("/v1/disputes/:id/assign", post(routes::disputes::assign))
        .route("/v1/disputes/:id/messages", post(routes::disputes::message))
        .route("/v1/disputes/:id/evidence", post(routes::disputes::evidence))
        .route("/v1/jobs/dead-letter", get(routes::jobs::dead_letter))
        .route("/v1/jobs/:id/requeue", post(routes::jobs::requeue))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    if state.engine.queue().is_shutting_down() {
        (StatusCode::SERVICE_UNAVAILABLE, "draining")
    } else {
        (StatusCode::OK, "ready")
    }
}
