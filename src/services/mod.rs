/// OpenAPI documentation generation.
pub mod documentation;
/// Health check service.
pub mod health_service;
/// Snapshot refresh, background workers and phase timers.
pub mod session_reader;
/// Server-Sent Events message generation.
pub mod sse_events;
/// Server-Sent Events broadcasting service.
pub mod sse_service;
/// Post-game statistics.
pub mod statistics;
/// Storage connection supervisor with backoff.
pub mod storage_supervisor;
/// Session lifecycle and move submission.
pub mod turn_service;
/// Reactions, cancel votes and phase resolution.
pub mod voting_service;
