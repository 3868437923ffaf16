//! Incremental sync of a player's monthly game archive into a local store,
//! followed by a background engine evaluation pass over the unevaluated games.

pub mod chess;
pub mod config;
pub mod sync;

pub use chess::{GameRecord, Result, SyncError};
pub use sync::orchestrator::{SharedGames, SyncHandle, SyncOrchestrator, SyncState};
