//! HTTP/WebSocket server for the coordination hub.
//!
//! Exposes the agent protocol over a single WebSocket endpoint plus two
//! plain HTTP routes for observation.
//!
//! # Endpoints
//!
//! - `GET /health` — Liveness probe
//! - `GET /agents` — Registered agent snapshot
//! - `GET /ws`     — Agent protocol WebSocket

pub mod routes;

pub use routes::{app_router, AppState};
