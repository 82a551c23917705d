//! axum routes over the sandbox, lifecycle, and tool layers

pub mod api_server;

pub use api_server::{build_router, ApiServer, AppState};
