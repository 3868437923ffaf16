pub mod error;
pub mod log;
pub mod month;
pub mod moves;
pub mod record;
pub mod timecontrol;
pub mod types;
pub mod visitor;

#[cfg(test)]
pub(crate) mod fixtures;

pub use error::{ErrorAccumulator, Result, SyncError};
pub use record::{GameRecord, MATE_SCORE, MATE_THRESHOLD, RecordError};
pub use types::{Color, GameOutcome, RawGame, RawPlayer, TimeClass};
