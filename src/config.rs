//! Command line and environment configuration.

use std::path::PathBuf;

use clap::Parser;

use crate::sync::archive::{DEFAULT_API_BASE, DEFAULT_USER_AGENT};
use crate::sync::pool::{DEFAULT_DEPTH, PoolConfig, default_workers};
use crate::sync::store::{Compression, LocalStore};

/// Sync a player's monthly game archive and evaluate every game with a UCI engine.
#[derive(Parser, Debug, Clone)]
#[command(name = "chess-sync")]
#[command(version)]
pub struct SyncArgs {
    /// Player to sync
    #[arg(required_unless_present = "list")]
    pub player: Option<String>,

    /// Root directory of the local game store
    #[arg(long, env = "CHESS_SYNC_DATA_DIR", default_value = "db")]
    pub data_dir: PathBuf,

    /// UCI engine executable
    #[arg(long, env = "CHESS_SYNC_ENGINE", default_value = "stockfish")]
    pub engine: String,

    /// Extra argument passed to the engine (repeatable)
    #[arg(long = "engine-arg", allow_hyphen_values = true)]
    pub engine_args: Vec<String>,

    /// Search depth per position
    #[arg(long, env = "CHESS_SYNC_DEPTH", default_value_t = DEFAULT_DEPTH)]
    pub depth: u32,

    /// Evaluation workers, one engine process each (default: half the hardware threads)
    #[arg(long, env = "CHESS_SYNC_WORKERS")]
    pub workers: Option<usize>,

    /// Base URL of the public archive API
    #[arg(long, env = "CHESS_SYNC_API_BASE", default_value = DEFAULT_API_BASE)]
    pub api_base: String,

    /// User-Agent sent to the archive API
    #[arg(long, env = "CHESS_SYNC_USER_AGENT", default_value = DEFAULT_USER_AGENT)]
    pub user_agent: String,

    /// Write new game files zstd-compressed
    #[arg(long, env = "CHESS_SYNC_COMPRESS")]
    pub compress: bool,

    /// Log filter (trace, debug, info, warn, error or a full directive)
    #[arg(long, env = "CHESS_LOG", default_value = "info")]
    pub log: String,

    /// List players with local data and exit
    #[arg(long)]
    pub list: bool,
}

/// Where and how games are stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub root: PathBuf,
    pub compression: Compression,
}

impl StoreConfig {
    pub fn open(&self) -> LocalStore {
        LocalStore::new(&self.root, self.compression)
    }
}

impl SyncArgs {
    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            root: self.data_dir.clone(),
            compression: if self.compress {
                Compression::Zstd
            } else {
                Compression::Plain
            },
        }
    }

    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            workers: self.workers.unwrap_or_else(default_workers).max(1),
            depth: self.depth.max(1),
        }
    }
}
