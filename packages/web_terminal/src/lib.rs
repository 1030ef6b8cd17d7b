//! Web Terminal - WebSocket server for shared terminal sessions
//!
//! Two endpoint families share one [`TerminalManager`]:
//! - `/terminal/control`: JSON command channel. All connections form one
//!   broadcast group and see every registry change.
//! - `/terminal/connect/{id}`: raw byte stream of one terminal with full
//!   history replay on attach.

pub mod config;
pub mod handlers;
pub mod socket;
pub mod terminal;

use axum::{Router, routing::get};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::trace::{MakeSpan, TraceLayer};
use uuid::Uuid;

use crate::socket::Group;
use crate::terminal::TerminalManager;

/// Shared state for all handlers
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<TerminalManager>,
    /// Broadcast group of the control endpoint
    pub control_group: Group,
    pub heartbeat: Duration,
}

impl AppState {
    pub fn new(manager: Arc<TerminalManager>, heartbeat: Duration) -> Self {
        Self {
            manager,
            control_group: Group::new(),
            heartbeat,
        }
    }
}

/// Custom span maker that adds a unique request ID to each incoming request
#[derive(Clone)]
struct RequestIdMakeSpan;

impl<B> MakeSpan<B> for RequestIdMakeSpan {
    fn make_span(&mut self, request: &axum::http::Request<B>) -> tracing::Span {
        let request_id = Uuid::new_v4().to_string();
        tracing::info_span!(
            "request",
            method = %request.method(),
            uri = %request.uri(),
            request_id = %request_id,
        )
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/version", get(handlers::version_handler))
        .route("/terminal/control", get(handlers::control_handler))
        .route("/terminal/connect/{id}", get(handlers::connect_handler))
        .layer(TraceLayer::new_for_http().make_span_with(RequestIdMakeSpan))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
