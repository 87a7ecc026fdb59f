//! # Application State
//!
//! Shared state for the Axum application: the settlement engine, which
//! owns the ledger, queue service, and controllers. Injected into every
//! handler; there is no global state.

use std::sync::Arc;

use tally_settlement::SettlementEngine;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    /// The settlement engine.
    pub engine: Arc<SettlementEngine>,
}

impl AppState {
    /// Wrap an engine for handler injection.
    pub fn new(engine: Arc<SettlementEngine>) -> Self {
        Self { engine }
    }
}
