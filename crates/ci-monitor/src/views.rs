//! Pull-style queries served to presentation layers, which poll them on
//! their own cadence.
use anyhow::Context;
use chrono::{DateTime, Utc};
use models::{Conclusion, RunRecord, RunStatus, SyncState};
use run_store::Store;

/// History of cached runs alongside the sync state which produced them.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct History {
    pub runs: Vec<RunRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sync: Option<SyncState>,
}

/// Lightweight projection of a run, omitting its failure details.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentRun {
    pub run_id: i64,
    pub name: String,
    pub workflow_name: String,
    pub branch: String,
    pub status: RunStatus,
    pub conclusion: Option<Conclusion>,
    pub updated_at_ms: i64,
    pub url: String,
}

impl From<RunRecord> for RecentRun {
    fn from(run: RunRecord) -> Self {
        Self {
            run_id: run.run_id,
            name: run.name,
            workflow_name: run.workflow_name,
            branch: run.branch,
            status: run.status,
            conclusion: run.conclusion,
            updated_at_ms: run.updated_at_ms,
            url: run.url,
        }
    }
}

/// Full history of runs updated since `since_ms`, bounded to `max` runs,
/// with the SyncState of `key`.
pub async fn history<S: Store>(
    store: &S,
    key: &str,
    since_ms: i64,
    max: usize,
) -> anyhow::Result<History> {
    let runs = store
        .fetch_runs_updated_since(since_ms, max)
        .await
        .context("fetching run history")?;
    let sync = store
        .fetch_sync_state(key)
        .await
        .context("fetching sync state")?;

    Ok(History { runs, sync })
}

/// Runs updated since `since_ms`, bounded to `limit` runs.
/// Unlike `history`, this doesn't read SyncState, so polls of it aren't
/// disturbed by every sync attempt.
pub async fn recent_tail<S: Store>(
    store: &S,
    since_ms: i64,
    limit: usize,
) -> anyhow::Result<Vec<RecentRun>> {
    let runs = store
        .fetch_runs_updated_since(since_ms, limit)
        .await
        .context("fetching recent runs")?;

    Ok(runs.into_iter().map(Into::into).collect())
}

pub async fn last_synced_at<S: Store>(
    store: &S,
    key: &str,
) -> anyhow::Result<Option<DateTime<Utc>>> {
    Ok(store
        .fetch_sync_state(key)
        .await
        .context("fetching sync state")?
        .and_then(|state| state.last_synced_at))
}
