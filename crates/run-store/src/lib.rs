//! Persistence of cached workflow runs, sync bookkeeping, and sent alerts.
//!
//! `Store` is deliberately narrow: each operation is an independent point or
//! index query, and no operation spans a transaction visible to callers.
use models::{AlertChannel, AlertRecord, RunRecord, SyncState};
use std::future::Future;

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Schema of the Postgres store, applied by `PgStore::apply_schema`.
pub const SCHEMA: &str = include_str!("../schema.sql");

pub trait Store: Send + Sync {
    /// Fetch stored runs having any of `run_ids`, in unspecified order.
    /// Unknown ids are ignored.
    fn fetch_runs(&self, run_ids: &[i64]) -> impl Future<Output = anyhow::Result<Vec<RunRecord>>> + Send;

    /// Fetch up to `limit` runs which are not yet completed, most recently
    /// updated first.
    fn fetch_unfinished_runs(
        &self,
        limit: usize,
    ) -> impl Future<Output = anyhow::Result<Vec<RunRecord>>> + Send;

    /// Fetch up to `limit` runs updated at or after `since_ms`, most recently
    /// updated first with ties broken by descending run id.
    fn fetch_runs_updated_since(
        &self,
        since_ms: i64,
        limit: usize,
    ) -> impl Future<Output = anyhow::Result<Vec<RunRecord>>> + Send;

    /// Insert or replace each of `runs`, keyed on run id.
    fn put_runs(&self, runs: &[RunRecord]) -> impl Future<Output = anyhow::Result<()>> + Send;

    fn fetch_sync_state(
        &self,
        key: &str,
    ) -> impl Future<Output = anyhow::Result<Option<SyncState>>> + Send;

    fn put_sync_state(&self, state: &SyncState) -> impl Future<Output = anyhow::Result<()>> + Send;

    fn fetch_alert(
        &self,
        channel: AlertChannel,
        run_id: i64,
    ) -> impl Future<Output = anyhow::Result<Option<AlertRecord>>> + Send;

    /// Insert `alert` unless one already exists for its channel and run.
    /// Returns true if it was inserted.
    fn insert_alert(&self, alert: &AlertRecord) -> impl Future<Output = anyhow::Result<bool>> + Send;
}
