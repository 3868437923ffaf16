//! Diffs remote partitions against the local store and persists only the new
//! entries.
//!
//! Partitions are processed oldest first. Entries whose true month is later
//! than the endpoint's nominal month are carried over and prepended to the
//! next partition's candidates. Every entry is persisted under the month of its
//! embedded start date.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use tracing::{debug, info, warn};

use super::archive::{ArchiveSource, PartitionEndpoint};
use super::store::{LocalStore, StoredGame, SyncCursor};
use crate::chess::month::partition_name;
use crate::chess::{GameRecord, RawGame, Result};

#[derive(Debug, Default)]
pub struct ReconcileOutcome {
    /// Newly persisted games, in persistence order.
    pub new_games: Vec<StoredGame>,
    /// Endpoints fetched successfully.
    pub processed: usize,
    /// Nominal months of endpoints whose fetch failed.
    pub failed: BTreeSet<i32>,
    pub malformed: usize,
}

pub struct Reconciler<'a, A> {
    source: &'a A,
    store: &'a LocalStore,
    player: String,
}

/// First month that may still receive new local entries: the cursor month,
/// or an earlier month whose fetch failed last time.
pub fn resume_month(cursor: Option<SyncCursor>, retry: &BTreeSet<i32>) -> Option<i32> {
    let cursor = cursor?.month_index;
    Some(retry.first().map_or(cursor, |&earliest| earliest.min(cursor)))
}

/// Endpoints to fetch when resuming at `resume`: everything from one endpoint
/// before the resume month, so its carryover is regenerated.
pub fn endpoints_from(endpoints: &[PartitionEndpoint], resume: Option<i32>) -> &[PartitionEndpoint] {
    let Some(resume) = resume else {
        return endpoints;
    };
    let first = endpoints
        .iter()
        .position(|endpoint| endpoint.month_index >= resume)
        .unwrap_or(endpoints.len());
    &endpoints[first.saturating_sub(1)..]
}

/// Splits candidates into those belonging up to `nominal` and the carryover
/// for later partitions. Remote order is kept on both sides.
fn split_carryover(candidates: Vec<GameRecord>, nominal: i32) -> (Vec<GameRecord>, Vec<GameRecord>) {
    candidates
        .into_iter()
        .partition(|record| record.month_index() <= nominal)
}

impl<'a, A: ArchiveSource> Reconciler<'a, A> {
    pub fn new(source: &'a A, store: &'a LocalStore, player: &str) -> Self {
        Self {
            source,
            store,
            player: player.to_lowercase(),
        }
    }

    fn build_records(&self, raw: Vec<RawGame>, outcome: &mut ReconcileOutcome) -> Vec<GameRecord> {
        raw.iter()
            .filter(|entry| entry.is_valid())
            .filter_map(|entry| match GameRecord::from_remote(entry, &self.player) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!("dropping entry: {e}");
                    outcome.malformed += 1;
                    None
                }
            })
            .collect()
    }

    /// Persists the entries of one true month that are not stored yet.
    ///
    /// Repeats of an id within `candidates` are dropped first, keeping the
    /// earliest, so an entry listed by two adjacent partitions is stored once.
    /// The first `last_sequence + 1` candidates are the ones already stored.
    /// That count is trusted only when their ids agree with the partition;
    /// otherwise every candidate is checked by id.
    async fn persist_month(&self, month: i32, mut candidates: Vec<GameRecord>) -> Result<Vec<StoredGame>> {
        let mut seen = HashSet::new();
        candidates.retain(|record| seen.insert(record.url().to_string()));

        let player = self.player.clone();
        let (last_sequence, stored_ids) = self
            .store
            .blocking(move |store| {
                let last = store.last_sequence(&player, month)?;
                let ids: HashSet<String> = if last >= 0 {
                    store
                        .read_partition(&player, month)?
                        .into_iter()
                        .map(|game| game.record.url().to_string())
                        .collect()
                } else {
                    HashSet::new()
                };
                Ok((last, ids))
            })
            .await?;

        let already = usize::try_from(last_sequence + 1).unwrap_or(0);
        let counted_prefix_matches = candidates
            .iter()
            .take(already)
            .all(|record| stored_ids.contains(record.url()));

        let fresh: Vec<GameRecord> = if counted_prefix_matches {
            candidates
                .into_iter()
                .skip(already)
                .filter(|record| !stored_ids.contains(record.url()))
                .collect()
        } else {
            debug!(
                "stored count of {} disagrees with remote order, matching by id",
                partition_name(month)
            );
            candidates
                .into_iter()
                .filter(|record| !stored_ids.contains(record.url()))
                .collect()
        };

        if fresh.is_empty() {
            return Ok(Vec::new());
        }

        let player = self.player.clone();
        let cursor = SyncCursor {
            month_index: month,
            last_sequence,
        };
        self.store
            .blocking(move |store| store.append(&player, fresh, Some(cursor)))
            .await
    }

    /// Groups candidates by true month and persists the months at or after
    /// `resume`.
    async fn persist(
        &self,
        candidates: Vec<GameRecord>,
        resume: Option<i32>,
        outcome: &mut ReconcileOutcome,
    ) -> Result<()> {
        let mut by_month: BTreeMap<i32, Vec<GameRecord>> = BTreeMap::new();
        for record in candidates {
            by_month.entry(record.month_index()).or_default().push(record);
        }

        for (month, records) in by_month {
            if resume.is_some_and(|resume| month < resume) {
                continue;
            }
            let stored = self.persist_month(month, records).await?;
            if !stored.is_empty() {
                debug!("{} new games in {}", stored.len(), partition_name(month));
            }
            outcome.new_games.extend(stored);
        }
        Ok(())
    }

    /// Runs one reconciliation pass over `endpoints` (oldest first).
    ///
    /// Transport failures skip the endpoint and are reported in
    /// [`ReconcileOutcome::failed`]; store failures abort the pass.
    pub async fn reconcile(
        &self,
        endpoints: &[PartitionEndpoint],
        cursor: Option<SyncCursor>,
        retry: &BTreeSet<i32>,
    ) -> Result<ReconcileOutcome> {
        let resume = resume_month(cursor, retry);
        let mut outcome = ReconcileOutcome::default();
        let mut carryover: Vec<GameRecord> = Vec::new();

        for endpoint in endpoints_from(endpoints, resume) {
            let raw = match self.source.fetch_partition(endpoint).await {
                Ok(raw) => raw,
                Err(e) if !e.is_recoverable() => return Err(e),
                Err(e) => {
                    warn!("skipping {}: {e}", partition_name(endpoint.month_index));
                    outcome.failed.insert(endpoint.month_index);
                    continue;
                }
            };
            outcome.processed += 1;

            let mut candidates = std::mem::take(&mut carryover);
            candidates.extend(self.build_records(raw, &mut outcome));

            let (current, later) = split_carryover(candidates, endpoint.month_index);
            carryover = later;
            self.persist(current, resume, &mut outcome).await?;
        }

        if !carryover.is_empty() {
            debug!("flushing {} carried-over entries", carryover.len());
            self.persist(carryover, resume, &mut outcome).await?;
        }

        info!(
            "{}: {} new games from {} partitions ({} failed, {} malformed)",
            self.player,
            outcome.new_games.len(),
            outcome.processed,
            outcome.failed.len(),
            outcome.malformed
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chess::fixtures::RawGameBuilder;
    use crate::chess::month::month_index;
    use crate::sync::fakes::FakeArchive;
    use crate::sync::store::Compression;

    fn raw(url: &str, start: &str) -> RawGame {
        RawGameBuilder::new(url, start).build()
    }

    async fn run(archive: &FakeArchive, store: &LocalStore) -> ReconcileOutcome {
        let endpoints = archive.partitions("alice").await.unwrap();
        let cursor = store.cursor("alice").unwrap();
        let retry = store.retry_partitions("alice").unwrap();
        Reconciler::new(archive, store, "alice")
            .reconcile(&endpoints, cursor, &retry)
            .await
            .unwrap()
    }

    fn urls(store: &LocalStore, year: i32, month: u32) -> Vec<String> {
        store
            .read_partition("alice", month_index(year, month))
            .unwrap()
            .into_iter()
            .map(|g| g.record.url().to_string())
            .collect()
    }

    #[test]
    fn test_resume_month_prefers_earliest_retry() {
        let cursor = Some(SyncCursor {
            month_index: 206,
            last_sequence: 3,
        });
        assert_eq!(resume_month(cursor, &BTreeSet::new()), Some(206));
        assert_eq!(resume_month(cursor, &[204].into_iter().collect()), Some(204));
        assert_eq!(resume_month(cursor, &[210].into_iter().collect()), Some(206));
        assert_eq!(resume_month(None, &[204].into_iter().collect()), None);
    }

    #[test]
    fn test_endpoints_from_keeps_one_lookback() {
        let endpoints: Vec<PartitionEndpoint> = [200, 203, 204, 206]
            .into_iter()
            .map(|month_index| PartitionEndpoint {
                url: format!("fake://{month_index}"),
                month_index,
            })
            .collect();

        assert_eq!(endpoints_from(&endpoints, None).len(), 4);
        assert_eq!(endpoints_from(&endpoints, Some(204))[0].month_index, 203);
        assert_eq!(endpoints_from(&endpoints, Some(200))[0].month_index, 200);
        assert_eq!(endpoints_from(&endpoints, Some(205))[0].month_index, 204);
        assert_eq!(endpoints_from(&endpoints, Some(300))[0].month_index, 206);
    }

    #[tokio::test]
    async fn test_invalid_and_malformed_entries_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path(), Compression::Plain);
        let mut broken = raw("broken", "2024.05.03 10:00:00");
        broken.pgn = Some("[White \"alice\"]\n[Black \"bob\"]\n\n1. e4 e5 1-0".to_string());
        let archive = FakeArchive::default().with_partition(
            2024,
            5,
            vec![
                raw("a", "2024.05.02 10:00:00"),
                RawGameBuilder::new("variant", "2024.05.02 11:00:00")
                    .rules("chess960")
                    .build(),
                broken,
            ],
        );

        let outcome = run(&archive, &store).await;

        assert_eq!(outcome.new_games.len(), 1);
        assert_eq!(outcome.malformed, 1);
        assert_eq!(urls(&store, 2024, 5), vec!["a"]);
    }

    #[tokio::test]
    async fn test_carryover_is_conserved_across_boundary() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path(), Compression::Plain);
        let archive = FakeArchive::default()
            .with_partition(
                2024,
                5,
                vec![
                    raw("may-1", "2024.05.10 10:00:00"),
                    raw("may-2", "2024.05.31 23:50:00"),
                    raw("june-early", "2024.06.01 00:05:00"),
                ],
            )
            .with_partition(2024, 6, vec![raw("june-1", "2024.06.02 10:00:00")]);

        let outcome = run(&archive, &store).await;

        assert_eq!(outcome.new_games.len(), 4);
        assert_eq!(urls(&store, 2024, 5), vec!["may-1", "may-2"]);
        assert_eq!(urls(&store, 2024, 6), vec!["june-early", "june-1"]);
    }

    #[tokio::test]
    async fn test_final_carryover_is_flushed() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path(), Compression::Plain);
        let archive = FakeArchive::default().with_partition(
            2024,
            5,
            vec![
                raw("may-1", "2024.05.10 10:00:00"),
                raw("june-early", "2024.06.01 00:05:00"),
            ],
        );

        run(&archive, &store).await;

        assert_eq!(urls(&store, 2024, 5), vec!["may-1"]);
        assert_eq!(urls(&store, 2024, 6), vec!["june-early"]);
    }

    #[tokio::test]
    async fn test_resume_with_carryover_does_not_duplicate() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path(), Compression::Plain);
        let archive = FakeArchive::default()
            .with_partition(
                2024,
                5,
                vec![
                    raw("may-1", "2024.05.10 10:00:00"),
                    raw("june-early", "2024.06.01 00:05:00"),
                ],
            )
            .with_partition(2024, 6, vec![raw("june-1", "2024.06.02 10:00:00")]);
        run(&archive, &store).await;

        archive.push(2024, 6, raw("june-2", "2024.06.20 10:00:00"));
        let outcome = run(&archive, &store).await;

        let new: Vec<&str> = outcome.new_games.iter().map(|g| g.record.url()).collect();
        assert_eq!(new, vec!["june-2"]);
        assert_eq!(urls(&store, 2024, 5), vec!["may-1"]);
        assert_eq!(urls(&store, 2024, 6), vec!["june-early", "june-1", "june-2"]);
    }

    #[tokio::test]
    async fn test_entry_listed_by_two_partitions_is_stored_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path(), Compression::Plain);
        let archive = FakeArchive::default()
            .with_partition(
                2024,
                5,
                vec![
                    raw("may-1", "2024.05.10 10:00:00"),
                    raw("june-early", "2024.06.01 00:05:00"),
                ],
            )
            .with_partition(
                2024,
                6,
                vec![
                    raw("june-early", "2024.06.01 00:05:00"),
                    raw("june-1", "2024.06.02 10:00:00"),
                ],
            );

        let outcome = run(&archive, &store).await;
        assert_eq!(outcome.new_games.len(), 3);
        assert_eq!(urls(&store, 2024, 6), vec!["june-early", "june-1"]);

        archive.push(2024, 6, raw("june-2", "2024.06.20 10:00:00"));
        let outcome = run(&archive, &store).await;
        let new: Vec<&str> = outcome.new_games.iter().map(|g| g.record.url()).collect();
        assert_eq!(new, vec!["june-2"]);
        assert_eq!(urls(&store, 2024, 6), vec!["june-early", "june-1", "june-2"]);
    }

    #[tokio::test]
    async fn test_resume_fetches_from_lookback_partition() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path(), Compression::Plain);
        let archive = FakeArchive::default()
            .with_partition(2024, 4, vec![raw("april-1", "2024.04.10 10:00:00")])
            .with_partition(2024, 5, vec![raw("may-1", "2024.05.10 10:00:00")])
            .with_partition(2024, 6, vec![raw("june-1", "2024.06.02 10:00:00")]);
        run(&archive, &store).await;
        assert_eq!(
            archive.fetches(),
            vec![month_index(2024, 4), month_index(2024, 5), month_index(2024, 6)]
        );

        archive.push(2024, 6, raw("june-2", "2024.06.20 10:00:00"));
        run(&archive, &store).await;

        assert_eq!(
            archive.fetches()[3..],
            [month_index(2024, 5), month_index(2024, 6)]
        );
        assert_eq!(urls(&store, 2024, 4), vec!["april-1"]);
        assert_eq!(urls(&store, 2024, 6), vec!["june-1", "june-2"]);
    }

    #[tokio::test]
    async fn test_failed_partition_is_skipped_and_reported() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path(), Compression::Plain);
        let archive = FakeArchive::default()
            .with_partition(2024, 5, vec![raw("may-1", "2024.05.10 10:00:00")])
            .with_partition(2024, 6, vec![raw("june-1", "2024.06.02 10:00:00")])
            .with_partition(2024, 7, vec![raw("july-1", "2024.07.02 10:00:00")]);
        archive.set_failing(2024, 6, true);

        let outcome = run(&archive, &store).await;

        assert_eq!(outcome.processed, 2);
        assert_eq!(outcome.failed, BTreeSet::from([month_index(2024, 6)]));
        assert_eq!(urls(&store, 2024, 5), vec!["may-1"]);
        assert!(urls(&store, 2024, 6).is_empty());
        assert_eq!(urls(&store, 2024, 7), vec!["july-1"]);
    }
}
