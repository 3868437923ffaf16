//! Filesystem store: `<root>/<player>/<year_month>/game<seq>.json[.zst]`.
//!
//! Sequence numbers are contiguous from 0 inside each month directory. Files are
//! written to a hidden temporary name and renamed into place, so readers never
//! observe a partial game file.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::chess::month::{parse_partition_name, partition_name};
use crate::chess::{GameRecord, Result, SyncError};

static GAME_FILE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^game(\d+)\.json(\.zst)?$").expect("game file pattern"));

const RETRY_FILE: &str = ".retry.json";

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Compression {
    #[default]
    Plain,
    Zstd,
}

impl Compression {
    fn extension(self) -> &'static str {
        match self {
            Self::Plain => "json",
            Self::Zstd => "json.zst",
        }
    }

    fn of_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("zst") => Self::Zstd,
            _ => Self::Plain,
        }
    }

    fn encode(self, bytes: Vec<u8>) -> io::Result<Vec<u8>> {
        match self {
            Self::Plain => Ok(bytes),
            Self::Zstd => zstd::stream::encode_all(bytes.as_slice(), 0),
        }
    }

    fn decode(self, bytes: Vec<u8>) -> io::Result<Vec<u8>> {
        match self {
            Self::Plain => Ok(bytes),
            Self::Zstd => zstd::stream::decode_all(bytes.as_slice()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GameLocation {
    pub month_index: i32,
    pub sequence: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredGame {
    pub location: GameLocation,
    pub record: GameRecord,
}

/// Resumption point: the newest local partition and its highest sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncCursor {
    pub month_index: i32,
    pub last_sequence: i64,
}

#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
    compression: Compression,
}

fn glob_paths(dir: &Path, pattern: &str) -> Result<Vec<PathBuf>> {
    let full = format!(
        "{}/{}",
        glob::Pattern::escape(&dir.to_string_lossy()),
        pattern
    );
    let paths = glob::glob(&full)
        .map_err(|e| SyncError::store_io(dir, io::Error::new(io::ErrorKind::InvalidInput, e)))?;

    paths
        .map(|entry| entry.map_err(|e| SyncError::store_io(dir, e.into())))
        .collect()
}

fn file_name(path: &Path) -> &str {
    path.file_name().and_then(|n| n.to_str()).unwrap_or_default()
}

fn game_sequence(path: &Path) -> Option<u32> {
    GAME_FILE
        .captures(file_name(path))
        .and_then(|caps| caps[1].parse().ok())
}

fn write_atomically(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = path.parent().unwrap_or(Path::new("."));
    let tmp = parent.join(format!(".{}.tmp", file_name(path)));
    fs::write(&tmp, bytes).map_err(|e| SyncError::store_io(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| SyncError::store_io(path, e))
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>, compression: Compression) -> Self {
        Self {
            root: root.into(),
            compression,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Runs filesystem work off the async executor.
    pub async fn blocking<T, F>(&self, work: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&LocalStore) -> Result<T> + Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || work(&store))
            .await
            .map_err(|e| SyncError::store_io(&self.root, io::Error::other(e)))?
    }

    pub fn player_dir(&self, player: &str) -> PathBuf {
        self.root.join(player.to_lowercase())
    }

    fn partition_dir(&self, player: &str, month_index: i32) -> PathBuf {
        self.player_dir(player).join(partition_name(month_index))
    }

    /// Creates the player's directory. Returns true when it did not exist yet.
    pub fn ensure_player(&self, player: &str) -> Result<bool> {
        let dir = self.player_dir(player);
        if dir.is_dir() {
            return Ok(false);
        }
        fs::create_dir_all(&dir).map_err(|e| SyncError::store_io(&dir, e))?;
        Ok(true)
    }

    /// Players with a local directory, sorted by name.
    pub fn players(&self) -> Result<Vec<String>> {
        let mut players: Vec<String> = glob_paths(&self.root, "*")?
            .into_iter()
            .filter(|path| path.is_dir())
            .map(|path| file_name(&path).to_string())
            .filter(|name| !name.is_empty() && !name.starts_with('.'))
            .collect();
        players.sort();
        Ok(players)
    }

    pub fn list_partitions(&self, player: &str) -> Result<BTreeSet<i32>> {
        Ok(glob_paths(&self.player_dir(player), "*_*")?
            .into_iter()
            .filter(|path| path.is_dir())
            .filter_map(|path| parse_partition_name(file_name(&path)))
            .collect())
    }

    fn game_files(&self, player: &str, month_index: i32) -> Result<Vec<(u32, PathBuf)>> {
        let mut files: Vec<(u32, PathBuf)> =
            glob_paths(&self.partition_dir(player, month_index), "game*")?
                .into_iter()
                .filter_map(|path| game_sequence(&path).map(|seq| (seq, path)))
                .collect();
        files.sort();
        Ok(files)
    }

    /// Highest sequence number in the partition, -1 when absent or empty.
    pub fn last_sequence(&self, player: &str, month_index: i32) -> Result<i64> {
        Ok(self
            .game_files(player, month_index)?
            .last()
            .map_or(-1, |(seq, _)| *seq as i64))
    }

    pub fn cursor(&self, player: &str) -> Result<Option<SyncCursor>> {
        let Some(&month_index) = self.list_partitions(player)?.last() else {
            return Ok(None);
        };
        Ok(Some(SyncCursor {
            month_index,
            last_sequence: self.last_sequence(player, month_index)?,
        }))
    }

    fn read_game(&self, path: &Path, location: GameLocation) -> Result<StoredGame> {
        let corrupt = |reason: String| SyncError::StoreCorruption {
            path: path.to_path_buf(),
            reason,
        };

        let bytes = fs::read(path).map_err(|e| corrupt(e.to_string()))?;
        let bytes = Compression::of_path(path)
            .decode(bytes)
            .map_err(|e| corrupt(e.to_string()))?;
        let record = GameRecord::from_local(&bytes).map_err(|e| corrupt(e.to_string()))?;

        if record.month_index() != location.month_index {
            return Err(corrupt(format!(
                "game of {} stored under {}",
                partition_name(record.month_index()),
                partition_name(location.month_index)
            )));
        }

        Ok(StoredGame { location, record })
    }

    pub fn read_partition(&self, player: &str, month_index: i32) -> Result<Vec<StoredGame>> {
        self.game_files(player, month_index)?
            .into_iter()
            .map(|(sequence, path)| {
                self.read_game(
                    &path,
                    GameLocation {
                        month_index,
                        sequence,
                    },
                )
            })
            .collect()
    }

    /// Every stored game of the player, in no particular order.
    pub fn read_all(&self, player: &str) -> Result<Vec<StoredGame>> {
        let mut games = Vec::new();
        for month_index in self.list_partitions(player)? {
            games.extend(self.read_partition(player, month_index)?);
        }
        Ok(games)
    }

    fn location_path(&self, player: &str, location: GameLocation, compression: Compression) -> PathBuf {
        self.partition_dir(player, location.month_index).join(format!(
            "game{}.{}",
            location.sequence,
            compression.extension()
        ))
    }

    fn existing_path(&self, player: &str, location: GameLocation) -> Option<PathBuf> {
        [Compression::Plain, Compression::Zstd]
            .into_iter()
            .map(|compression| self.location_path(player, location, compression))
            .find(|path| path.is_file())
    }

    fn encode(&self, record: &GameRecord, compression: Compression, path: &Path) -> Result<Vec<u8>> {
        let json = record.to_local().map_err(|e| SyncError::StoreCorruption {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        compression
            .encode(json)
            .map_err(|e| SyncError::store_io(path, e))
    }

    /// Persists new records, numbering each month's records after
    /// `continuing_from` when it names that month and from 0 otherwise.
    pub fn append(
        &self,
        player: &str,
        records: Vec<GameRecord>,
        continuing_from: Option<SyncCursor>,
    ) -> Result<Vec<StoredGame>> {
        let mut next: BTreeMap<i32, i64> = BTreeMap::new();
        if let Some(cursor) = continuing_from {
            next.insert(cursor.month_index, cursor.last_sequence + 1);
        }

        let mut stored = Vec::with_capacity(records.len());
        for record in records {
            let month_index = record.month_index();
            let slot = next.entry(month_index).or_insert(0);
            let location = GameLocation {
                month_index,
                sequence: *slot as u32,
            };
            *slot += 1;

            let dir = self.partition_dir(player, month_index);
            fs::create_dir_all(&dir).map_err(|e| SyncError::store_io(&dir, e))?;

            if let Some(existing) = self.existing_path(player, location) {
                return Err(SyncError::StoreCorruption {
                    path: existing,
                    reason: "sequence number already taken".to_string(),
                });
            }

            let path = self.location_path(player, location, self.compression);
            write_atomically(&path, &self.encode(&record, self.compression, &path)?)?;
            debug!("stored {} as {}", record.url(), path.display());

            stored.push(StoredGame { location, record });
        }

        Ok(stored)
    }

    /// Rewrites an already stored game in its existing format. Returns false
    /// when the file already holds exactly this record.
    pub fn rewrite(&self, player: &str, game: &StoredGame) -> Result<bool> {
        let path = self
            .existing_path(player, game.location)
            .unwrap_or_else(|| self.location_path(player, game.location, self.compression));
        let compression = Compression::of_path(&path);

        let json = game.record.to_local().map_err(|e| SyncError::StoreCorruption {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        if let Ok(current) = fs::read(&path)
            && compression.decode(current).ok().as_ref() == Some(&json)
        {
            return Ok(false);
        }

        let dir = self.partition_dir(player, game.location.month_index);
        fs::create_dir_all(&dir).map_err(|e| SyncError::store_io(&dir, e))?;
        write_atomically(&path, &self.encode(&game.record, compression, &path)?)?;
        Ok(true)
    }

    /// Remote partitions whose last fetch failed and must be retried.
    pub fn retry_partitions(&self, player: &str) -> Result<BTreeSet<i32>> {
        let path = self.player_dir(player).join(RETRY_FILE);
        match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| SyncError::StoreCorruption {
                path,
                reason: e.to_string(),
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(BTreeSet::new()),
            Err(e) => Err(SyncError::store_io(path, e)),
        }
    }

    pub fn set_retry_partitions(&self, player: &str, partitions: &BTreeSet<i32>) -> Result<()> {
        let path = self.player_dir(player).join(RETRY_FILE);
        if partitions.is_empty() {
            return match fs::remove_file(&path) {
                Err(e) if e.kind() != io::ErrorKind::NotFound => Err(SyncError::store_io(path, e)),
                _ => Ok(()),
            };
        }
        let bytes = serde_json::to_vec(partitions).map_err(|e| SyncError::StoreCorruption {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        write_atomically(&path, &bytes)
    }
}
