//! Word relay: the client engine of a turn-based sentence-building party game, exposed to a
//! local UI over HTTP and server-sent events.

/// Engine settings loaded from file and environment.
pub mod config;
/// Shared store access.
pub mod dao;
/// Payloads exchanged with the local UI.
pub mod dto;
/// Service and HTTP error types.
pub mod error;
/// HTTP routes of the local API.
pub mod routes;
/// Game logic on top of the shared store.
pub mod services;
/// Per-client state.
pub mod state;
