//! Wallet routes: open, inspect, deposit.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use tally_core::{Amount, CurrencyCode, UserId};
use tally_ledger::Wallet;

use crate::error::AppError;
use crate::state::AppState;

/// Body of `POST /v1/wallets`.
#[derive(Debug, Deserialize)]
pub struct OpenWalletRequest {
    pub owner: UserId,
    pub currency: String,
}

/// Body of `POST /v1/wallets/:user/deposit`.
#[derive(Debug, Deserialize)]
pub struct DepositRequest {
    pub amount: Amount,
    pub reference: Option<String>,
}

/// `POST /v1/wallets` — open a wallet for a user.
pub async fn open(
    State(state): State<AppState>,
    Json(req): Json<OpenWalletRequest>,
) -> Result<(StatusCode, Json<Wallet>), AppError> {
    let currency =
        CurrencyCode::new(&req.currency).map_err(|err| AppError::Validation(err.to_string()))?;
    state
        .engine
        .ledger()
        .transact(|unit| unit.open_wallet(req.owner, currency))?;
    let wallet = state.engine.ledger().read(|view| view.wallet(req.owner))?;
    Ok((StatusCode::CREATED, Json(wallet)))
}

/// `GET /v1/wallets/:user` — the wallet owned by a user.
pub async fn show(
    State(state): State<AppState>,
    Path(user): Path<Uuid>,
) -> Result<Json<Wallet>, AppError> {
    let owner = UserId::from_uuid(user);
    let wallet = state.engine.ledger().read(|view| view.wallet(owner))?;
    Ok(Json(wallet))
}

/// `POST /v1/wallets/:user/deposit` — external funds in.
pub async fn deposit(
    State(state): State<AppState>,
    Path(user): Path<Uuid>,
    Json(req): Json<DepositRequest>,
) -> Result<Json<Wallet>, AppError> {
    let owner = UserId::from_uuid(user);
    state
        .engine
        .ledger()
        .transact(|unit| unit.deposit(owner, req.amount, req.reference))?;
    let wallet = state.engine.ledger().read(|view| view.wallet(owner))?;
    Ok(Json(wallet))
}
