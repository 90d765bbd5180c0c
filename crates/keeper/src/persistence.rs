//! Append-only storage for position snapshots and rebalance history
//!
//! Writes are best-effort from the keeper's point of view: callers log a
//! failed write and carry on.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use range_types::{PositionSnapshot, RebalanceHistoryEntry, RebalanceSummary};
use serde::de::DeserializeOwned;
use serde::Serialize;
use solana_sdk::pubkey::Pubkey;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};
use tracing::warn;

use crate::error::KeeperResult;

/// Storage port for snapshots and history
#[async_trait]
pub trait PersistenceStore: Send + Sync {
    async fn save_snapshot(&self, snapshot: &PositionSnapshot) -> KeeperResult<()>;

    async fn save_rebalance_history(&self, entry: &RebalanceHistoryEntry) -> KeeperResult<()>;

    /// Most recent snapshots of a position, newest first
    async fn get_recent_snapshots(&self, position_id: &Pubkey, limit: usize) -> KeeperResult<Vec<PositionSnapshot>>;

    /// Most recent rebalance attempts of a position, newest first
    async fn get_rebalance_history(
        &self,
        position_id: &Pubkey,
        limit: usize,
    ) -> KeeperResult<Vec<RebalanceHistoryEntry>>;

    /// Totals across every recorded attempt
    async fn get_rebalance_metrics(&self) -> KeeperResult<RebalanceSummary>;
}

fn newest_first<T: Clone>(items: &[T], matches: impl Fn(&T) -> bool, limit: usize) -> Vec<T> {
    items.iter().rev().filter(|item| matches(item)).take(limit).cloned().collect()
}

// ============================================================================
// In-memory store
// ============================================================================

/// Process-local store; contents are lost on restart
#[derive(Default)]
pub struct InMemoryStore {
    snapshots: RwLock<Vec<PositionSnapshot>>,
    history: RwLock<Vec<RebalanceHistoryEntry>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PersistenceStore for InMemoryStore {
    async fn save_snapshot(&self, snapshot: &PositionSnapshot) -> KeeperResult<()> {
        self.snapshots.write().await.push(snapshot.clone());
        Ok(())
    }

    async fn save_rebalance_history(&self, entry: &RebalanceHistoryEntry) -> KeeperResult<()> {
        self.history.write().await.push(entry.clone());
        Ok(())
    }

    async fn get_recent_snapshots(&self, position_id: &Pubkey, limit: usize) -> KeeperResult<Vec<PositionSnapshot>> {
        let snapshots = self.snapshots.read().await;
        Ok(newest_first(&snapshots, |s| s.position_id == *position_id, limit))
    }

    async fn get_rebalance_history(
        &self,
        position_id: &Pubkey,
        limit: usize,
    ) -> KeeperResult<Vec<RebalanceHistoryEntry>> {
        let history = self.history.read().await;
        Ok(newest_first(&history, |e| e.position_id == *position_id, limit))
    }

    async fn get_rebalance_metrics(&self) -> KeeperResult<RebalanceSummary> {
        Ok(RebalanceSummary::from_entries(self.history.read().await.iter()))
    }
}

// ============================================================================
// JSON-lines file store
// ============================================================================

const SNAPSHOTS_FILE: &str = "snapshots.jsonl";
const HISTORY_FILE: &str = "rebalance_history.jsonl";

/// One JSON document per line, appended and never rewritten
pub struct JsonFileStore {
    snapshots_path: PathBuf,
    history_path: PathBuf,
    // Serializes appends so lines never interleave
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    /// Open (creating if needed) a store rooted at `dir`
    pub async fn open(dir: impl AsRef<Path>) -> KeeperResult<Self> {
        let dir = dir.as_ref();
        tokio::fs::create_dir_all(dir).await?;

        Ok(Self {
            snapshots_path: dir.join(SNAPSHOTS_FILE),
            history_path: dir.join(HISTORY_FILE),
            write_lock: Mutex::new(()),
        })
    }

    async fn append<T: Serialize>(&self, path: &Path, record: &T) -> KeeperResult<()> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let _guard = self.write_lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }

    async fn read_all<T: DeserializeOwned>(&self, path: &Path) -> KeeperResult<Vec<T>> {
        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut records = Vec::new();
        for (index, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(line) {
                Ok(record) => records.push(record),
                // A torn final line from a crash should not hide the rest
                Err(e) => warn!(file = %path.display(), line = index + 1, error = %e, "Skipping unreadable record"),
            }
        }
        Ok(records)
    }
}

#[async_trait]
impl PersistenceStore for JsonFileStore {
    async fn save_snapshot(&self, snapshot: &PositionSnapshot) -> KeeperResult<()> {
        self.append(&self.snapshots_path, snapshot).await
    }

    async fn save_rebalance_history(&self, entry: &RebalanceHistoryEntry) -> KeeperResult<()> {
        self.append(&self.history_path, entry).await
    }

    async fn get_recent_snapshots(&self, position_id: &Pubkey, limit: usize) -> KeeperResult<Vec<PositionSnapshot>> {
        let snapshots: Vec<PositionSnapshot> = self.read_all(&self.snapshots_path).await?;
        Ok(newest_first(&snapshots, |s| s.position_id == *position_id, limit))
    }

    async fn get_rebalance_history(
        &self,
        position_id: &Pubkey,
        limit: usize,
    ) -> KeeperResult<Vec<RebalanceHistoryEntry>> {
        let history: Vec<RebalanceHistoryEntry> = self.read_all(&self.history_path).await?;
        Ok(newest_first(&history, |e| e.position_id == *position_id, limit))
    }

    async fn get_rebalance_metrics(&self) -> KeeperResult<RebalanceSummary> {
        let history: Vec<RebalanceHistoryEntry> = self.read_all(&self.history_path).await?;
        Ok(RebalanceSummary::from_entries(&history))
    }
}
