//! In-memory collaborators for pipeline tests.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use shakmaty::Chess;

use super::archive::{ArchiveSource, PartitionEndpoint};
use super::engine::{Analyzer, AnalyzerFactory, EngineError, Score};
use crate::chess::month::{month_index, year_month};
use crate::chess::{RawGame, Result, SyncError};

#[derive(Default)]
struct ArchiveState {
    partitions: BTreeMap<i32, Vec<RawGame>>,
    failing: BTreeSet<i32>,
    fetches: Vec<i32>,
}

/// Remote archive held in memory, mutable between syncs.
#[derive(Default)]
pub struct FakeArchive {
    state: Mutex<ArchiveState>,
}

impl FakeArchive {
    pub fn with_partition(self, year: i32, month: u32, games: Vec<RawGame>) -> Self {
        self.state
            .lock()
            .unwrap()
            .partitions
            .insert(month_index(year, month), games);
        self
    }

    pub fn push(&self, year: i32, month: u32, game: RawGame) {
        self.state
            .lock()
            .unwrap()
            .partitions
            .entry(month_index(year, month))
            .or_default()
            .push(game);
    }

    pub fn set_failing(&self, year: i32, month: u32, failing: bool) {
        let mut state = self.state.lock().unwrap();
        let index = month_index(year, month);
        if failing {
            state.failing.insert(index);
        } else {
            state.failing.remove(&index);
        }
    }

    /// Month indices fetched so far, in call order.
    pub fn fetches(&self) -> Vec<i32> {
        self.state.lock().unwrap().fetches.clone()
    }
}

impl ArchiveSource for FakeArchive {
    async fn partitions(&self, player: &str) -> Result<Vec<PartitionEndpoint>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .partitions
            .keys()
            .map(|&index| {
                let (year, month) = year_month(index);
                PartitionEndpoint {
                    url: format!("fake://{player}/games/{year}/{month:02}"),
                    month_index: index,
                }
            })
            .collect())
    }

    async fn fetch_partition(&self, endpoint: &PartitionEndpoint) -> Result<Vec<RawGame>> {
        let mut state = self.state.lock().unwrap();
        state.fetches.push(endpoint.month_index);
        if state.failing.contains(&endpoint.month_index) {
            return Err(SyncError::TransportFailure {
                url: endpoint.url.clone(),
                reason: "status 503".to_string(),
            });
        }
        Ok(state
            .partitions
            .get(&endpoint.month_index)
            .cloned()
            .unwrap_or_default())
    }
}

/// Counters shared by every analyzer of one factory.
#[derive(Clone, Default)]
pub struct EngineProbe {
    live: Arc<AtomicUsize>,
    spawned: Arc<AtomicUsize>,
    quits: Arc<AtomicUsize>,
    calls: Arc<AtomicUsize>,
}

impl EngineProbe {
    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn spawned(&self) -> usize {
        self.spawned.load(Ordering::SeqCst)
    }

    pub fn quits(&self) -> usize {
        self.quits.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

/// Analyzer factory that scores every position 25cp for the side to move.
#[derive(Default)]
pub struct FakeFactory {
    pub probe: EngineProbe,
    pub fail_spawn: bool,
    /// Fails the n-th analysis call across all analyzers (1-based).
    pub fail_on_call: Option<usize>,
    /// Panics on the n-th analysis call across all analyzers (1-based).
    pub panic_on_call: Option<usize>,
}

pub struct FakeAnalyzer {
    probe: EngineProbe,
    fail_on_call: Option<usize>,
    panic_on_call: Option<usize>,
}

impl Drop for FakeAnalyzer {
    fn drop(&mut self) {
        self.probe.live.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Analyzer for FakeAnalyzer {
    async fn analyse(&mut self, _position: &Chess, _depth: u32) -> Result<Score, EngineError> {
        tokio::task::yield_now().await;
        let call = self.probe.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_on_call == Some(call) {
            return Err(EngineError::Protocol("engine crashed".to_string()));
        }
        if self.panic_on_call == Some(call) {
            panic!("analyzer panicked on call {call}");
        }
        Ok(Score::Cp(25))
    }

    async fn quit(self) {
        self.probe.quits.fetch_add(1, Ordering::SeqCst);
    }
}

impl AnalyzerFactory for FakeFactory {
    type Analyzer = FakeAnalyzer;

    async fn spawn(&self) -> Result<FakeAnalyzer, EngineError> {
        if self.fail_spawn {
            return Err(EngineError::Spawn {
                program: "fake".to_string(),
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            });
        }
        self.probe.spawned.fetch_add(1, Ordering::SeqCst);
        self.probe.live.fetch_add(1, Ordering::SeqCst);
        Ok(FakeAnalyzer {
            probe: self.probe.clone(),
            fail_on_call: self.fail_on_call,
            panic_on_call: self.panic_on_call,
        })
    }
}
