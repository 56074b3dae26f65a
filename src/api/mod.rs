//! HTTP API module.
//!
//! Exposes the execute pipeline plus health, provider, and stats
//! introspection endpoints.

mod handlers;
mod server;
mod types;

pub use handlers::API_KEY_HEADER;
pub use server::{build_state, create_router, run_server, AppState};
pub use types::{AnalyzeRequest, ExecuteMeta, ExecuteRequest, ExecuteResponse};
