//! Gateway: HTTP surface and pipeline orchestration.
//!
//! Lifecycle:
//! 1. Load processors, start the catalog watcher
//! 2. Build the LLM client and, when a transport is enabled, the broker
//! 3. Start the HTTP server (health, command, processors, webhooks, `/api/v1/ws`)
//! 4. Bridge remote workers over `/api/v1/workers/ws`

pub mod auth_middleware;
pub mod outcome;
pub mod pipeline;
pub mod request_throttle;
pub mod server;
pub mod state;
pub mod webhooks;
pub mod workers;
pub mod ws;

pub use {
    outcome::{CommandOutcome, ServiceErrorKind},
    pipeline::Orchestrator,
    server::{AppState, build_gateway_app, prepare_state, start_gateway},
    state::GatewayState,
};
