use crate::api::models::Track;
use crate::config::AppConfig;
use crate::error::AppResult;
use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::sync::Mutex;

const HISTORY_LIMIT: usize = 200;

/// Collaborator told about every track that actually starts playing.
/// Callers ignore its failures.
pub trait PlayHistory: Send + Sync {
    fn record_play<'a>(&'a self, track: &'a Track) -> BoxFuture<'a, AppResult<()>>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub track: Track,
    pub played_at: DateTime<Utc>,
}

/// Most-recent-first play history in a JSON file.
pub struct JsonHistory {
    path: PathBuf,
    limit: usize,
    write_lock: Mutex<()>,
}

impl JsonHistory {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            limit: HISTORY_LIMIT,
            write_lock: Mutex::new(()),
        }
    }

    pub fn at_default_location() -> AppResult<Self> {
        Ok(Self::new(AppConfig::history_path()?))
    }

    pub async fn entries(&self) -> AppResult<Vec<HistoryEntry>> {
        if !tokio::fs::try_exists(&self.path).await? {
            return Ok(Vec::new());
        }
        let content = tokio::fs::read_to_string(&self.path).await?;
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_str(&content)?)
    }

    async fn append(&self, track: &Track) -> AppResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut entries = self.entries().await?;
        entries.insert(
            0,
            HistoryEntry {
                track: track.clone(),
                played_at: Utc::now(),
            },
        );
        entries.truncate(self.limit);

        if let Some(dir) = self.path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        let content = serde_json::to_string_pretty(&entries)?;
        tokio::fs::write(&self.path, content).await?;
        Ok(())
    }
}

impl PlayHistory for JsonHistory {
    fn record_play<'a>(&'a self, track: &'a Track) -> BoxFuture<'a, AppResult<()>> {
        Box::pin(self.append(track))
    }
}

/// History sink that drops everything.
#[derive(Debug, Default)]
pub struct NoHistory;

impl PlayHistory for NoHistory {
    fn record_play<'a>(&'a self, _track: &'a Track) -> BoxFuture<'a, AppResult<()>> {
        Box::pin(async { Ok(()) })
    }
}
