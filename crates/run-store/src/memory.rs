use super::Store;
use models::{AlertChannel, AlertRecord, RunRecord, RunStatus, SyncState};
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

/// MemoryStore is a Store held entirely in memory, used by tests and local runs.
/// It counts the writes applied to it.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    runs: BTreeMap<i64, RunRecord>,
    sync_states: HashMap<String, SyncState>,
    alerts: BTreeMap<(AlertChannel, i64), AlertRecord>,
    run_writes: usize,
    run_batches: usize,
    sync_state_writes: usize,
    fail_sync_state_writes: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a MemoryStore holding `runs`, without counting them as writes.
    pub fn with_runs(runs: impl IntoIterator<Item = RunRecord>) -> Self {
        let store = Self::default();
        store
            .lock()
            .runs
            .extend(runs.into_iter().map(|run| (run.run_id, run)));
        store
    }

    /// Total number of run records written through `put_runs`.
    pub fn run_writes(&self) -> usize {
        self.lock().run_writes
    }

    /// Number of `put_runs` calls.
    pub fn run_batches(&self) -> usize {
        self.lock().run_batches
    }

    /// Fail subsequent writes of SyncState.
    pub fn fail_sync_state_writes(&self) {
        self.lock().fail_sync_state_writes = true;
    }

    pub fn sync_state_writes(&self) -> usize {
        self.lock().sync_state_writes
    }

    /// All stored runs, ordered on run id.
    pub fn runs(&self) -> Vec<RunRecord> {
        self.lock().runs.values().cloned().collect()
    }

    pub fn alerts(&self) -> Vec<AlertRecord> {
        self.lock().alerts.values().cloned().collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A panic while holding the lock can't leave Inner half-updated.
        self.inner.lock().unwrap_or_else(|poison| poison.into_inner())
    }

    fn newest_where(&self, limit: usize, filter: impl Fn(&RunRecord) -> bool) -> Vec<RunRecord> {
        let inner = self.lock();

        let mut runs: Vec<RunRecord> = inner.runs.values().filter(|r| filter(r)).cloned().collect();
        runs.sort_by(|l, r| {
            r.updated_at_ms
                .cmp(&l.updated_at_ms)
                .then(r.run_id.cmp(&l.run_id))
        });
        runs.truncate(limit);
        runs
    }
}

impl Store for MemoryStore {
    async fn fetch_runs(&self, run_ids: &[i64]) -> anyhow::Result<Vec<RunRecord>> {
        let inner = self.lock();
        Ok(run_ids
            .iter()
            .filter_map(|id| inner.runs.get(id))
            .cloned()
            .collect())
    }

    async fn fetch_unfinished_runs(&self, limit: usize) -> anyhow::Result<Vec<RunRecord>> {
        Ok(self.newest_where(limit, |run| run.status != RunStatus::Completed))
    }

    async fn fetch_runs_updated_since(
        &self,
        since_ms: i64,
        limit: usize,
    ) -> anyhow::Result<Vec<RunRecord>> {
        Ok(self.newest_where(limit, |run| run.updated_at_ms >= since_ms))
    }

    async fn put_runs(&self, runs: &[RunRecord]) -> anyhow::Result<()> {
        let mut inner = self.lock();
        for run in runs {
            inner.runs.insert(run.run_id, run.clone());
        }
        inner.run_writes += runs.len();
        inner.run_batches += 1;
        Ok(())
    }

    async fn fetch_sync_state(&self, key: &str) -> anyhow::Result<Option<SyncState>> {
        Ok(self.lock().sync_states.get(key).cloned())
    }

    async fn put_sync_state(&self, state: &SyncState) -> anyhow::Result<()> {
        let mut inner = self.lock();
        if inner.fail_sync_state_writes {
            anyhow::bail!("sync state writes are failing");
        }
        inner.sync_states.insert(state.key(), state.clone());
        inner.sync_state_writes += 1;
        Ok(())
    }

    async fn fetch_alert(
        &self,
        channel: AlertChannel,
        run_id: i64,
    ) -> anyhow::Result<Option<AlertRecord>> {
        Ok(self.lock().alerts.get(&(channel, run_id)).cloned())
    }

    async fn insert_alert(&self, alert: &AlertRecord) -> anyhow::Result<bool> {
        let mut inner = self.lock();

        match inner.alerts.entry((alert.channel, alert.run_id)) {
            std::collections::btree_map::Entry::Occupied(_) => Ok(false),
            std::collections::btree_map::Entry::Vacant(entry) => {
                entry.insert(alert.clone());
                Ok(true)
            }
        }
    }
}
