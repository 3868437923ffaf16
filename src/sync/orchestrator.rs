//! Top-level sync: reconcile the remote archive into the store, publish the
//! collection, and evaluate the unevaluated games in the background.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::archive::ArchiveSource;
use super::engine::AnalyzerFactory;
use super::pool::{EvaluationPool, EvaluationReport, PoolConfig, Shutdown};
use super::reconcile::Reconciler;
use super::store::{GameLocation, LocalStore, StoredGame};
use crate::chess::{GameRecord, Result, SyncError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// First sync of a player without local games.
    SyncingNew,
    /// Re-sync of a player with local games.
    Syncing,
    SyncedPendingEval,
    Ready,
}

/// First and last month with games, and how many distinct months had any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonthSpan {
    pub first: i32,
    pub last: i32,
    pub active_months: usize,
}

#[derive(Debug)]
struct GameCollection {
    player: String,
    games: Vec<StoredGame>,
    state: SyncState,
    evaluation_done: bool,
    evaluation_error: Option<String>,
}

fn sort_chronologically(games: &mut [StoredGame]) {
    games.sort_by(|a, b| {
        a.record
            .start_time()
            .cmp(&b.record.start_time())
            .then(a.location.cmp(&b.location))
    });
}

/// The in-memory collection of one player, behind a single lock.
///
/// The background evaluation task is the only writer once a sync returns.
/// Readers always observe the games sorted by start time.
#[derive(Debug, Clone)]
pub struct SharedGames(Arc<Mutex<GameCollection>>);

impl SharedGames {
    fn new(player: &str, state: SyncState, mut games: Vec<StoredGame>) -> Self {
        sort_chronologically(&mut games);
        Self(Arc::new(Mutex::new(GameCollection {
            player: player.to_string(),
            games,
            state,
            evaluation_done: false,
            evaluation_error: None,
        })))
    }

    fn lock(&self) -> MutexGuard<'_, GameCollection> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn player(&self) -> String {
        self.lock().player.clone()
    }

    /// Copy of the records, oldest first.
    pub fn read_snapshot(&self) -> Vec<GameRecord> {
        self.lock().games.iter().map(|g| g.record.clone()).collect()
    }

    /// Runs `f` over the sorted collection while holding the lock.
    pub fn with_games<R>(&self, f: impl FnOnce(&[StoredGame]) -> R) -> R {
        f(&self.lock().games)
    }

    pub fn len(&self) -> usize {
        self.lock().games.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().games.is_empty()
    }

    pub fn state(&self) -> SyncState {
        self.lock().state
    }

    pub fn is_evaluation_done(&self) -> bool {
        self.lock().evaluation_done
    }

    pub fn evaluation_error(&self) -> Option<String> {
        self.lock().evaluation_error.clone()
    }

    pub fn month_span(&self) -> Option<MonthSpan> {
        let collection = self.lock();
        let first = collection.games.first()?.record.month_index();
        let last = collection.games.last()?.record.month_index();
        let mut active_months = 0;
        let mut previous = None;
        for game in &collection.games {
            let month = game.record.month_index();
            if previous != Some(month) {
                active_months += 1;
                previous = Some(month);
            }
        }
        Some(MonthSpan {
            first,
            last,
            active_months,
        })
    }

    fn extend(&self, new_games: Vec<StoredGame>, state: SyncState) {
        let mut collection = self.lock();
        collection.games.extend(new_games);
        sort_chronologically(&mut collection.games);
        collection.state = state;
    }

    /// Swaps in the evaluated versions of stored games, matched by location,
    /// and re-sorts.
    pub fn replace_tail(&self, evaluated: Vec<StoredGame>) {
        let mut by_location: HashMap<GameLocation, GameRecord> = evaluated
            .into_iter()
            .map(|game| (game.location, game.record))
            .collect();

        let mut collection = self.lock();
        for game in collection.games.iter_mut() {
            if let Some(record) = by_location.remove(&game.location) {
                game.record = record;
            }
        }
        collection.games.extend(
            by_location
                .into_iter()
                .map(|(location, record)| StoredGame { location, record }),
        );
        sort_chronologically(&mut collection.games);
    }

    fn complete(&self, evaluated: Vec<StoredGame>) {
        self.replace_tail(evaluated);
        let mut collection = self.lock();
        collection.state = SyncState::Ready;
        collection.evaluation_done = true;
    }

    fn fail(&self, reason: String) {
        self.lock().evaluation_error = Some(reason);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SyncReport {
    pub player: String,
    pub new_player: bool,
    pub new_games: usize,
    pub partitions_processed: usize,
    pub partitions_failed: Vec<i32>,
    pub malformed: usize,
    pub pending_evaluation: usize,
    pub elapsed: Duration,
}

/// Result of [`SyncOrchestrator::sync`]: the published collection and the
/// background evaluation still running against it.
pub struct SyncHandle {
    pub games: SharedGames,
    pub report: SyncReport,
    evaluation: JoinHandle<Result<EvaluationReport>>,
}

impl SyncHandle {
    pub fn is_evaluation_finished(&self) -> bool {
        self.evaluation.is_finished()
    }

    pub async fn wait_for_evaluation(self) -> Result<EvaluationReport> {
        self.evaluation
            .await
            .map_err(|e| SyncError::EvaluationFailure {
                id: self.report.player.clone(),
                reason: e.to_string(),
            })?
    }
}

pub struct SyncOrchestrator<A, F> {
    source: A,
    store: LocalStore,
    factory: Arc<F>,
    pool: PoolConfig,
    shutdown: Shutdown,
}

impl<A: ArchiveSource, F: AnalyzerFactory> SyncOrchestrator<A, F> {
    pub fn new(source: A, store: LocalStore, factory: F, pool: PoolConfig) -> Self {
        Self {
            source,
            store,
            factory: Arc::new(factory),
            pool,
            shutdown: Shutdown::default(),
        }
    }

    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    /// Stop handle for the evaluation workers of every sync started here.
    pub fn shutdown(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// Brings the local store of `player` up to date and starts evaluating
    /// whatever is unevaluated. Returns once reconciliation is done.
    pub async fn sync(&self, player: &str) -> Result<SyncHandle> {
        let started = Instant::now();
        let player = player.to_lowercase();

        let (new_player, local) = {
            let player = player.clone();
            self.store
                .blocking(move |store| {
                    let created = store.ensure_player(&player)?;
                    Ok((created, store.read_all(&player)?))
                })
                .await?
        };
        let state = if new_player || local.is_empty() {
            SyncState::SyncingNew
        } else {
            SyncState::Syncing
        };
        let games = SharedGames::new(&player, state, local);

        let (cursor, retry) = {
            let player = player.clone();
            self.store
                .blocking(move |store| Ok((store.cursor(&player)?, store.retry_partitions(&player)?)))
                .await?
        };

        let outcome = match self.source.partitions(&player).await {
            Ok(endpoints) => {
                let outcome = Reconciler::new(&self.source, &self.store, &player)
                    .reconcile(&endpoints, cursor, &retry)
                    .await?;
                let failed = outcome.failed.clone();
                let owner = player.clone();
                self.store
                    .blocking(move |store| store.set_retry_partitions(&owner, &failed))
                    .await?;
                outcome
            }
            Err(e) => {
                warn!("cannot list partitions of {player}, using local games only: {e}");
                Default::default()
            }
        };

        let new_games = outcome.new_games.len();
        games.extend(outcome.new_games, SyncState::SyncedPendingEval);

        let pending: Vec<StoredGame> = games.with_games(|all| {
            all.iter()
                .filter(|game| !game.record.is_evaluated())
                .cloned()
                .collect()
        });

        let report = SyncReport {
            player: player.clone(),
            new_player,
            new_games,
            partitions_processed: outcome.processed,
            partitions_failed: outcome.failed.into_iter().collect(),
            malformed: outcome.malformed,
            pending_evaluation: pending.len(),
            elapsed: started.elapsed(),
        };
        info!(
            "synced {player}: {} games, {new_games} new, {} awaiting evaluation in {:.1}s",
            games.len(),
            report.pending_evaluation,
            report.elapsed.as_secs_f64()
        );

        let pool = EvaluationPool::new(Arc::clone(&self.factory), self.pool, self.shutdown.clone());
        let evaluation = tokio::spawn(evaluate_in_background(
            pool,
            self.store.clone(),
            games.clone(),
            player,
            pending,
        ));

        Ok(SyncHandle {
            games,
            report,
            evaluation,
        })
    }
}

async fn evaluate_in_background<F: AnalyzerFactory>(
    pool: EvaluationPool<F>,
    store: LocalStore,
    games: SharedGames,
    player: String,
    pending: Vec<StoredGame>,
) -> Result<EvaluationReport> {
    let started = Instant::now();
    let count = pending.len();

    let result = evaluate_and_store(&pool, &store, &player, pending).await;
    match result {
        Ok(evaluated) => {
            games.complete(evaluated);
            Ok(EvaluationReport {
                games: count,
                elapsed: started.elapsed(),
            })
        }
        Err(e) => {
            error!("evaluation of {player} failed: {e}");
            games.fail(e.to_string());
            Err(e)
        }
    }
}

async fn evaluate_and_store<F: AnalyzerFactory>(
    pool: &EvaluationPool<F>,
    store: &LocalStore,
    player: &str,
    pending: Vec<StoredGame>,
) -> Result<Vec<StoredGame>> {
    let mut locations: HashMap<String, Vec<GameLocation>> = HashMap::new();
    for game in &pending {
        locations
            .entry(game.record.url().to_string())
            .or_default()
            .push(game.location);
    }

    let evaluated = pool
        .evaluate_all(pending.into_iter().map(|game| game.record).collect())
        .await?;

    let evaluated = evaluated
        .into_iter()
        .map(|record| match locations.get_mut(record.url()).and_then(Vec::pop) {
            Some(location) => Ok(StoredGame { location, record }),
            None => Err(SyncError::EvaluationFailure {
                id: record.url().to_string(),
                reason: "evaluated game has no stored location".to_string(),
            }),
        })
        .collect::<Result<Vec<_>>>()?;

    let player = player.to_string();
    store
        .blocking(move |store| {
            let mut written = 0;
            for game in &evaluated {
                if store.rewrite(&player, game)? {
                    written += 1;
                }
            }
            tracing::debug!("wrote back {written} evaluated games of {player}");
            Ok(evaluated)
        })
        .await
}
