use std::io;
use std::path::PathBuf;

/// Failure taxonomy of the sync-and-evaluate pipeline.
///
/// Transport and malformed-record failures are recovered locally by the
/// reconciler. Store and engine failures reach the caller.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("transport failure for '{url}': {reason}")]
    TransportFailure { url: String, reason: String },

    #[error("malformed record '{id}': {reason}")]
    MalformedRecord { id: String, reason: String },

    #[error("corrupt store entry '{}': {reason}", path.display())]
    StoreCorruption { path: PathBuf, reason: String },

    #[error("store I/O failure at '{}': {source}", path.display())]
    StoreIo {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("analysis engine unavailable: {0}")]
    EngineUnavailable(String),

    #[error("evaluation failed for '{id}': {reason}")]
    EvaluationFailure { id: String, reason: String },

    #[error("evaluation interrupted before completion")]
    Interrupted,
}

pub type Result<T, E = SyncError> = std::result::Result<T, E>;

impl SyncError {
    pub(crate) fn store_io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::StoreIo {
            path: path.into(),
            source,
        }
    }

    /// True for failures the pipeline recovers from without surfacing.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::TransportFailure { .. } | Self::MalformedRecord { .. }
        )
    }
}

#[derive(Debug, Clone, Default)]
pub struct ErrorAccumulator(Option<String>);

impl ErrorAccumulator {
    pub fn push(&mut self, msg: &str) {
        match &mut self.0 {
            Some(existing) => {
                existing.push_str("; ");
                existing.push_str(msg);
            }
            None => {
                self.0 = Some(msg.to_string());
            }
        }
    }

    pub fn take(&mut self) -> Option<String> {
        self.0.take()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_none()
    }
}
