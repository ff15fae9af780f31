/// Shared store trait and its backends.
pub mod game_store;
/// Records of the five shared tables and their patches.
pub mod models;
/// Storage error type shared by every backend.
pub mod storage;
