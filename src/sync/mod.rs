pub mod archive;
pub mod engine;
pub mod orchestrator;
pub mod pool;
pub mod reconcile;
pub mod signals;
pub mod store;

#[cfg(test)]
pub(crate) mod fakes;

pub use archive::{ArchiveSource, HttpArchive, PartitionEndpoint};
pub use engine::{Analyzer, AnalyzerFactory, UciEngineFactory};
pub use pool::{EvaluationPool, PoolConfig, Shutdown};
pub use signals::TerminationSignals;
pub use store::{Compression, LocalStore};
