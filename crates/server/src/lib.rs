// crates/server/src/lib.rs
//! Jobtrack server library.
//!
//! A thin HTTP collaborator over `jobtrack-jobs`: it exposes job records for
//! polling and streaming, triggers cleanup, and can launch a demo job.

pub mod config;
pub mod demo;
pub mod error;
pub mod routes;
pub mod state;

pub use config::ServerConfig;
pub use error::*;
pub use routes::api_routes;
pub use state::AppState;

use std::sync::Arc;

use axum::Router;
use tower_http::trace::TraceLayer;

/// Create the Axum application with all routes and request tracing.
pub fn create_app(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(api_routes(state))
        .layer(TraceLayer::new_for_http())
}
