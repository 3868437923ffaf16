//! Remote monthly archive: the list of partition endpoints of a player and the
//! raw entries behind each endpoint.

use std::future::Future;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::chess::month::{month_index, partition_name};
use crate::chess::{RawGame, Result, SyncError};

/// One remote monthly partition, addressed by URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionEndpoint {
    pub url: String,
    /// Nominal month of the partition, taken from the `/YYYY/MM` URL suffix.
    pub month_index: i32,
}

impl PartitionEndpoint {
    pub fn parse(url: &str) -> Option<Self> {
        let mut segments = url.trim_end_matches('/').rsplit('/');
        let month: u32 = segments.next()?.parse().ok()?;
        let year: i32 = segments.next()?.parse().ok()?;
        if !(1..=12).contains(&month) {
            return None;
        }
        Some(Self {
            url: url.to_string(),
            month_index: month_index(year, month),
        })
    }
}

/// Source of remote partitions. Every call may fail with
/// [`SyncError::TransportFailure`].
pub trait ArchiveSource: Send + Sync {
    /// Partition endpoints of `player`, oldest first.
    fn partitions(
        &self,
        player: &str,
    ) -> impl Future<Output = Result<Vec<PartitionEndpoint>>> + Send;

    /// Raw entries of one partition, in remote order.
    fn fetch_partition(
        &self,
        endpoint: &PartitionEndpoint,
    ) -> impl Future<Output = Result<Vec<RawGame>>> + Send;
}

#[derive(Deserialize)]
struct ArchiveList {
    #[serde(default)]
    archives: Vec<String>,
}

#[derive(Deserialize)]
struct GameList {
    #[serde(default)]
    games: Vec<serde_json::Value>,
}

pub const DEFAULT_API_BASE: &str = "https://api.chess.com/pub";
pub const DEFAULT_USER_AGENT: &str = concat!("chess-sync/", env!("CARGO_PKG_VERSION"));

/// [`ArchiveSource`] over the public HTTP API.
pub struct HttpArchive {
    base: String,
    client: reqwest::Client,
}

impl HttpArchive {
    pub fn new(base: &str, user_agent: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(user_agent)
            .build()
            .map_err(|e| SyncError::TransportFailure {
                url: base.to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            base: base.trim_end_matches('/').to_string(),
            client,
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T> {
        let failure = |reason: String| SyncError::TransportFailure {
            url: url.to_string(),
            reason,
        };

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| failure(e.to_string()))?;
        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(failure(format!("status {status}")));
        }
        response.json().await.map_err(|e| failure(e.to_string()))
    }
}

impl ArchiveSource for HttpArchive {
    async fn partitions(&self, player: &str) -> Result<Vec<PartitionEndpoint>> {
        let url = format!("{}/player/{}/games/archives", self.base, player.to_lowercase());
        let list: ArchiveList = self.get_json(&url).await?;

        let mut endpoints: Vec<PartitionEndpoint> = list
            .archives
            .iter()
            .filter_map(|url| {
                let endpoint = PartitionEndpoint::parse(url);
                if endpoint.is_none() {
                    warn!("ignoring unrecognized archive url {url}");
                }
                endpoint
            })
            .collect();
        endpoints.sort_by_key(|endpoint| endpoint.month_index);
        Ok(endpoints)
    }

    async fn fetch_partition(&self, endpoint: &PartitionEndpoint) -> Result<Vec<RawGame>> {
        let list: GameList = self.get_json(&endpoint.url).await?;
        debug!(
            "fetched {} entries for {}",
            list.games.len(),
            partition_name(endpoint.month_index)
        );

        Ok(list
            .games
            .into_iter()
            .filter_map(|value| match serde_json::from_value::<RawGame>(value) {
                Ok(game) => Some(game),
                Err(e) => {
                    warn!("dropping undecodable entry in {}: {e}", endpoint.url);
                    None
                }
            })
            .collect())
    }
}
