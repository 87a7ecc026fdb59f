//! # API Error Types
//!
//! Structured error type implementing `axum::response::IntoResponse`.
//! Maps domain errors from the ledger and settlement layers to HTTP
//! status codes with JSON error bodies. Internal error details are never
//! exposed to clients; server-side failures are logged for operators.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use tally_ledger::LedgerError;
use tally_queue::QueueError;
use tally_settlement::SettlementError;

/// Structured JSON error response body.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

/// Inner error detail.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// Machine-readable error code (e.g., "NOT_FOUND", "CONFLICT").
    pub code: String,
    /// Human-readable error message.
    pub message: String,
}

/// Application-level error type for Axum handlers.
#[derive(Error, Debug)]
pub enum AppError {
    /// Resource not found (404).
    #[error("not found: {0}")]
    NotFound(String),

    /// Request is semantically invalid (422).
    #[error("validation error: {0}")]
    Validation(String),

    /// Conflict with current resource state (409).
    #[error("conflict: {0}")]
    Conflict(String),

    /// Internal server error (500). Message logged, not returned.
    #[error("internal error: {0}")]
    Internal(String),

    /// Service draining or dependency unavailable (503).
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
}

impl AppError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            Self::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            Self::Validation(_) => (StatusCode::UNPROCESSABLE_ENTITY, "VALIDATION_ERROR"),
            Self::Conflict(_) => (StatusCode::CONFLICT, "CONFLICT"),
            Self::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
            Self::ServiceUnavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE"),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        // Never expose internal error messages to clients.
        let message = match &self {
            Self::Internal(_) => "An internal error occurred".to_string(),
            other => other.to_string(),
        };

        match &self {
            Self::Internal(_) => tracing::error!(error = %self, "internal server error"),
            Self::ServiceUnavailable(_) => tracing::warn!(error = %self, "service unavailable"),
            _ => {}
        }

        let body = ErrorBody {
            error: ErrorDetail {
                code: code.to_string(),
                message,
            },
        };
        (status, Json(body)).into_response()
    }
}

impl From<LedgerError> for AppError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::UnknownEntity { .. } => Self::NotFound(err.to_string()),
            LedgerError::InvalidTransition { .. }
            | LedgerError::TerminalState { .. }
            | LedgerError::DuplicateSettlement { .. }
            | LedgerError::DisputeAlreadyOpen { .. }
            | LedgerError::WalletExists { .. }
            | LedgerError::WalletUnavailable { .. } => Self::Conflict(err.to_string()),
            LedgerError::InsufficientEscrow { .. }
            | LedgerError::InsufficientFunds { .. }
            | LedgerError::BudgetMismatch { .. }
            | LedgerError::InvalidResolution { .. }
            | LedgerError::CurrencyMismatch { .. }
            | LedgerError::InvalidAmount(_)
            | LedgerError::Core(_) => Self::Validation(err.to_string()),
        }
    }
}

impl From<QueueError> for AppError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::UnknownJob(_) => Self::NotFound(err.to_string()),
            QueueError::InvalidJobState { .. } => Self::Conflict(err.to_string()),
            QueueError::ShuttingDown => Self::ServiceUnavailable(err.to_string()),
            QueueError::UnknownQueue(_) | QueueError::QueueExists(_) => {
                Self::Internal(err.to_string())
            }
        }
    }
}

impl From<SettlementError> for AppError {
    fn from(err: SettlementError) -> Self {
        match err {
            SettlementError::Validation(msg) => Self::Validation(msg),
            SettlementError::Ledger(inner) => inner.into(),
            SettlementError::Queue(inner) => inner.into(),
            SettlementError::Serialization(inner) => Self::Internal(inner.to_string()),
        }
    }
}
