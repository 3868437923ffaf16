//! Bounded pool of evaluation workers.
//!
//! Each worker owns exactly one analyzer for its whole life: it spawns the
//! engine, drains the shared job queue, and quits the engine on every exit
//! path before returning. A failing game aborts the remaining queue for all
//! workers, but every worker still reaches its quit.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use shakmaty::Position;
use tokio::runtime::Handle;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::engine::{Analyzer, AnalyzerFactory, Score};
use crate::chess::moves::replay;
use crate::chess::{GameRecord, Result, SyncError};

pub const DEFAULT_DEPTH: u32 = 10;

/// Half of the available hardware threads, at least one.
pub fn default_workers() -> usize {
    thread::available_parallelism()
        .map(|n| n.get() / 2)
        .unwrap_or(1)
        .max(1)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    pub workers: usize,
    pub depth: u32,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            depth: DEFAULT_DEPTH,
        }
    }
}

/// Cooperative stop request, checked by workers between games.
#[derive(Debug, Clone, Default)]
pub struct Shutdown(Arc<AtomicBool>);

impl Shutdown {
    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvaluationReport {
    pub games: usize,
    pub elapsed: Duration,
}

/// Scores every ply of `game` for the game's player. Terminal positions are
/// scored without consulting the engine.
pub async fn evaluate_game<A: Analyzer>(
    analyzer: &mut A,
    game: &GameRecord,
    depth: u32,
) -> Result<Vec<i32>> {
    let failure = |reason: String| SyncError::EvaluationFailure {
        id: game.url().to_string(),
        reason,
    };

    let mut scores = Vec::with_capacity(game.moves().len());
    for step in replay(game.moves()) {
        let position = step.map_err(|e| failure(e.to_string()))?;
        let score = if position.is_checkmate() {
            Score::Mate(0)
        } else if position.is_stalemate() || position.is_insufficient_material() {
            Score::Cp(0)
        } else {
            analyzer
                .analyse(&position, depth)
                .await
                .map_err(|e| failure(e.to_string()))?
        };
        scores.push(score.centipawns_for(position.turn(), game.color()));
    }
    Ok(scores)
}

type JobQueue = Arc<Mutex<mpsc::Receiver<GameRecord>>>;

pub struct EvaluationPool<F> {
    factory: Arc<F>,
    config: PoolConfig,
    shutdown: Shutdown,
}

impl<F: AnalyzerFactory> EvaluationPool<F> {
    pub fn new(factory: Arc<F>, config: PoolConfig, shutdown: Shutdown) -> Self {
        Self {
            factory,
            config,
            shutdown,
        }
    }

    pub fn config(&self) -> PoolConfig {
        self.config
    }

    /// Evaluates every game that has no evaluations yet. Output order is
    /// arbitrary; games arriving already evaluated are passed through.
    pub async fn evaluate_all(&self, games: Vec<GameRecord>) -> Result<Vec<GameRecord>> {
        let (done, pending): (Vec<_>, Vec<_>) =
            games.into_iter().partition(GameRecord::is_evaluated);
        if pending.is_empty() {
            return Ok(done);
        }

        let started = Instant::now();
        let total = pending.len();
        let workers = self.config.workers.clamp(1, total);

        let (job_tx, job_rx) = mpsc::channel(total);
        for game in pending {
            job_tx
                .send(game)
                .await
                .map_err(|_| SyncError::Interrupted)?;
        }
        drop(job_tx);

        let queue: JobQueue = Arc::new(Mutex::new(job_rx));
        let abort = Arc::new(AtomicBool::new(false));

        info!("evaluating {total} games with {workers} workers at depth {}", self.config.depth);

        let mut set = JoinSet::new();
        for worker_id in 0..workers {
            set.spawn(worker_task(
                worker_id,
                Arc::clone(&self.factory),
                Arc::clone(&queue),
                self.config.depth,
                Arc::clone(&abort),
                self.shutdown.clone(),
            ));
        }

        let expected = done.len() + total;
        let mut evaluated = done;
        let mut first_error = None;
        while let Some(joined) = set.join_next().await {
            let outcome = joined.unwrap_or_else(|e| {
                Err(SyncError::EvaluationFailure {
                    id: "worker".to_string(),
                    reason: e.to_string(),
                })
            });
            match outcome {
                Ok(games) => evaluated.extend(games),
                Err(e) => {
                    error!("evaluation worker failed: {e}");
                    abort.store(true, Ordering::SeqCst);
                    first_error.get_or_insert(e);
                }
            }
        }

        if let Some(e) = first_error {
            return Err(e);
        }
        if evaluated.len() != expected {
            return Err(SyncError::Interrupted);
        }

        info!(
            "evaluated {total} games in {:.1}s",
            started.elapsed().as_secs_f64()
        );
        Ok(evaluated)
    }
}

async fn worker_task<F: AnalyzerFactory>(
    worker_id: usize,
    factory: Arc<F>,
    queue: JobQueue,
    depth: u32,
    abort: Arc<AtomicBool>,
    shutdown: Shutdown,
) -> Result<Vec<GameRecord>> {
    let analyzer = factory
        .spawn()
        .await
        .map_err(|e| SyncError::EngineUnavailable(e.to_string()))?;
    debug!("worker {worker_id} started");

    let mut engine = EngineGuard(Some(analyzer));
    let result = match engine.0.as_mut() {
        Some(analyzer) => drain(analyzer, &queue, depth, &abort, &shutdown).await,
        None => Ok(Vec::new()),
    };

    engine.quit().await;
    debug!("worker {worker_id} stopped");
    result
}

/// Owns a worker's analyzer. Dropped without `quit` (the worker panicked or
/// was aborted), it hands the analyzer to a detached task that still quits it.
struct EngineGuard<A: Analyzer + 'static>(Option<A>);

impl<A: Analyzer + 'static> EngineGuard<A> {
    async fn quit(mut self) {
        if let Some(analyzer) = self.0.take() {
            analyzer.quit().await;
        }
    }
}

impl<A: Analyzer + 'static> Drop for EngineGuard<A> {
    fn drop(&mut self) {
        let Some(analyzer) = self.0.take() else {
            return;
        };
        match Handle::try_current() {
            Ok(handle) => {
                warn!("worker stopped abnormally, quitting its engine");
                handle.spawn(analyzer.quit());
            }
            Err(_) => drop(analyzer),
        }
    }
}

async fn drain<A: Analyzer>(
    analyzer: &mut A,
    queue: &JobQueue,
    depth: u32,
    abort: &AtomicBool,
    shutdown: &Shutdown,
) -> Result<Vec<GameRecord>> {
    let mut finished = Vec::new();
    loop {
        if abort.load(Ordering::SeqCst) {
            return Ok(finished);
        }
        if shutdown.is_triggered() {
            return Err(SyncError::Interrupted);
        }

        let next = { queue.lock().await.recv().await };
        let Some(mut game) = next else {
            return Ok(finished);
        };

        let scores = match evaluate_game(analyzer, &game, depth).await {
            Ok(scores) => scores,
            Err(e) => {
                abort.store(true, Ordering::SeqCst);
                return Err(e);
            }
        };
        game.attach_evaluations(scores)
            .map_err(|e| SyncError::EvaluationFailure {
                id: game.url().to_string(),
                reason: e.to_string(),
            })?;
        finished.push(game);
    }
}
