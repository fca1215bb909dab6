use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// SyncState tracks incremental synchronization of one upstream repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncState {
    pub owner: String,
    pub repo: String,
    /// Time of the last successful sync, which is the cursor of the next one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_synced_at: Option<DateTime<Utc>>,
    /// Epoch milliseconds of the last attempted sync, successful or not.
    pub last_sync_ms: i64,
    /// Error of the last attempt, if it failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl SyncState {
    pub fn key_of(owner: &str, repo: &str) -> String {
        format!("{owner}/{repo}")
    }

    pub fn key(&self) -> String {
        Self::key_of(&self.owner, &self.repo)
    }
}
