//! Request handlers for the webhook relay API.

pub mod health;
pub mod webhooks;

use relay_pipeline::ProcessingEngine;

/// Shared application state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    /// The processing engine backing all webhook operations.
    pub engine: ProcessingEngine,
}

impl AppState {
    /// Wraps an engine for router state.
    pub fn new(engine: ProcessingEngine) -> Self {
        Self { engine }
    }
}
