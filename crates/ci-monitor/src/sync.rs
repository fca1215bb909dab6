use crate::config::{Repository, SyncOptions};
use actions_client::Upstream;
use anyhow::Context;
use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt};
use futures::{StreamExt, TryStreamExt};
use highlights::{LogSource, Summary};
use models::{github::WorkflowRun, RunRecord, SyncState};
use run_store::Store;
use std::collections::HashMap;

/// Page size of run listings.
pub const PAGE_SIZE: u32 = 100;
/// Successive sync windows overlap by this many minutes, tolerating upstream
/// eventual consistency and clock skew.
pub const OVERLAP_MINUTES: i64 = 10;
/// At most this many unfinished runs are refreshed by each pass.
pub const MAX_TAIL_REPAIR: usize = 120;
/// Records are written in batches of this size.
pub const WRITE_BATCH: usize = 200;
/// Summary of failed runs which couldn't be described.
pub const PLACEHOLDER_SUMMARY: &str = "Failure details unavailable";

const TAIL_REPAIR_CONCURRENCY: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum SyncOutcome {
    /// The pass was skipped because the previous one is too recent.
    #[serde(rename_all = "camelCase")]
    Skipped {
        last_sync_ms: i64,
        retry_after_ms: i64,
    },
    Synced(SyncReport),
}

/// Accounting of a completed sync pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    /// Effective lower bound on the creation time of listed runs.
    pub since: Option<DateTime<Utc>>,
    /// Runs fetched by the bulk pass.
    pub fetched: usize,
    /// Unfinished runs refreshed by the tail-repair pass.
    pub repaired: usize,
    /// Unfinished runs which no longer exist upstream.
    pub dropped: usize,
    /// Failed runs for which failure details were fetched.
    pub enriched: usize,
    pub enrichment_errors: usize,
    /// Records written to the store.
    pub written: usize,
}

/// SyncEngine keeps the Store consistent with the runs of one repository.
///
/// Passes of a SyncEngine must not overlap. The throttle on minimum interval
/// between passes is best-effort, and doesn't prevent concurrent passes.
pub struct SyncEngine<U, S> {
    repository: Repository,
    upstream: U,
    store: S,
}

impl<U: Upstream, S: Store> SyncEngine<U, S> {
    pub fn new(repository: Repository, upstream: U, store: S) -> Self {
        Self {
            repository,
            upstream,
            store,
        }
    }

    pub fn upstream(&self) -> &U {
        &self.upstream
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Run a sync pass as of `now`.
    ///
    /// The SyncState of the repository records every attempt. An error
    /// of the pass is recorded into it and then returned.
    #[tracing::instrument(skip_all, fields(repository = %self.repository))]
    pub async fn sync(
        &self,
        now: DateTime<Utc>,
        options: &SyncOptions,
    ) -> anyhow::Result<SyncOutcome> {
        let key = self.repository.key();
        let now_ms = now.timestamp_millis();

        let prior = self
            .store
            .fetch_sync_state(&key)
            .await
            .context("loading sync state")?;

        if let Some(SyncState { last_sync_ms, .. }) = &prior {
            let elapsed_ms = now_ms - last_sync_ms;
            let min_interval_ms = options.min_interval.as_millis() as i64;

            if elapsed_ms < min_interval_ms {
                tracing::debug!(elapsed_ms, min_interval_ms, "skipping throttled sync");
                return Ok(SyncOutcome::Skipped {
                    last_sync_ms: *last_sync_ms,
                    retry_after_ms: min_interval_ms - elapsed_ms,
                });
            }
        }

        let mut state = prior.unwrap_or_else(|| SyncState {
            owner: self.repository.owner.clone(),
            repo: self.repository.repo.clone(),
            last_synced_at: None,
            last_sync_ms: 0,
            last_error: None,
        });

        let since = options.since.or_else(|| {
            state
                .last_synced_at
                .map(|ts| ts - chrono::Duration::minutes(OVERLAP_MINUTES))
        });

        let result = self.pass(since, options).await;

        state.last_sync_ms = now_ms;
        match &result {
            Ok(report) => {
                state.last_synced_at = Some(now);
                state.last_error = None;
                tracing::info!(?report, "sync completed");
            }
            Err(err) => {
                state.last_error = Some(format!("{err:#}"));
                tracing::warn!(error = ?err, "sync failed");
            }
        }
        if let Err(put_err) = self.store.put_sync_state(&state).await {
            return Err(match result {
                Ok(_) => put_err.context("storing sync state"),
                // Surface the error of the pass, rather than that of recording it.
                Err(err) => err.context(format!("storing sync state also failed: {put_err:#}")),
            });
        }

        result.map(SyncOutcome::Synced)
    }

    async fn pass(
        &self,
        since: Option<DateTime<Utc>>,
        options: &SyncOptions,
    ) -> anyhow::Result<SyncReport> {
        let bulk = self.fetch_bulk(since, options.max_runs).await?;
        let (tail, dropped) = self.repair_tail().await?;

        let mut report = SyncReport {
            since,
            fetched: bulk.len(),
            repaired: tail.len(),
            dropped,
            ..Default::default()
        };
        let mut records = merge_runs(bulk, tail);

        let ids: Vec<i64> = records.iter().map(|r| r.run_id).collect();
        let existing: HashMap<i64, RunRecord> = self
            .store
            .fetch_runs(&ids)
            .await
            .context("fetching stored runs")?
            .into_iter()
            .map(|r| (r.run_id, r))
            .collect();

        for (index, record) in records.iter_mut().enumerate() {
            if !record.is_failing() {
                continue;
            }
            // Details of a stored record remain valid while its outcome is unchanged.
            let prior = existing
                .get(&record.run_id)
                .filter(|p| p.failure_summary.is_some() && p.conclusion == record.conclusion);

            if index >= options.details_limit {
                if let Some(prior) = prior {
                    record.failure_summary = prior.failure_summary.clone();
                    record.failure_points = prior.failure_points.clone();
                }
                continue;
            }

            if let Some(prior) = prior.filter(|p| {
                p.updated_at == record.updated_at
                    && p.failure_summary.as_deref() != Some(PLACEHOLDER_SUMMARY)
            }) {
                record.failure_summary = prior.failure_summary.clone();
                record.failure_points = prior.failure_points.clone();
                continue;
            }

            report.enriched += 1;
            match self.describe_failure(record).await {
                Ok(Summary { summary, points }) => {
                    tracing::debug!(run_id = record.run_id, %summary, "described run failure");
                    record.failure_summary = Some(summary);
                    record.failure_points = Some(points);
                }
                Err(err) => {
                    tracing::warn!(run_id = record.run_id, error = ?err, "failed to describe run failure");
                    report.enrichment_errors += 1;
                    record.failure_summary = Some(PLACEHOLDER_SUMMARY.to_string());
                    record.failure_points = None;
                }
            }
        }

        let changed: Vec<RunRecord> = records
            .into_iter()
            .filter(|r| existing.get(&r.run_id) != Some(r))
            .collect();

        for batch in changed.chunks(WRITE_BATCH) {
            self.store.put_runs(batch).await.context("writing runs")?;
            report.written += batch.len();
        }

        Ok(report)
    }

    // Fetch runs created since `since`, newest first, until a short page
    // or `max_runs` runs.
    async fn fetch_bulk(
        &self,
        since: Option<DateTime<Utc>>,
        max_runs: usize,
    ) -> anyhow::Result<Vec<WorkflowRun>> {
        let mut runs = Vec::new();
        let mut page = 1;

        while runs.len() < max_runs {
            let listing = self
                .upstream
                .list_runs(since, page, PAGE_SIZE)
                .await
                .context("listing workflow runs")?;

            let full = listing.workflow_runs.len() == PAGE_SIZE as usize;
            runs.extend(listing.workflow_runs);

            if !full {
                break;
            }
            page += 1;
        }
        runs.truncate(max_runs);

        Ok(runs)
    }

    // Refresh stored runs which are not yet completed, returning the refreshed
    // runs and the number which no longer exist upstream.
    async fn repair_tail(&self) -> anyhow::Result<(Vec<WorkflowRun>, usize)> {
        let unfinished = self
            .store
            .fetch_unfinished_runs(MAX_TAIL_REPAIR)
            .await
            .context("fetching unfinished runs")?;

        // Futures are boxed so that the pass future remains Send.
        let fetches: Vec<BoxFuture<'_, Result<Option<WorkflowRun>, actions_client::Error>>> =
            unfinished
                .iter()
                .map(|run| self.upstream.get_run(run.run_id).boxed())
                .collect();

        let refreshed: Vec<Option<WorkflowRun>> = futures::stream::iter(fetches)
            .buffered(TAIL_REPAIR_CONCURRENCY)
            .try_collect()
            .await
            .context("refreshing unfinished runs")?;

        let mut dropped = 0;
        for (prior, run) in unfinished.iter().zip(refreshed.iter()) {
            if run.is_none() {
                // The record remains unfinished, and is refreshed again next pass.
                tracing::debug!(run_id = prior.run_id, "unfinished run no longer exists upstream");
                dropped += 1;
            }
        }
        Ok((refreshed.into_iter().flatten().collect(), dropped))
    }

    /// Summarize why the failed `run` failed, from its jobs and their logs.
    pub async fn describe_failure(&self, run: &RunRecord) -> anyhow::Result<Summary> {
        let jobs = self
            .upstream
            .list_jobs(run.run_id)
            .await
            .context("listing run jobs")?;

        let summary = highlights::summarize_run(&jobs, &JobLogs(&self.upstream)).await;

        Ok(summary.unwrap_or_else(|| Summary {
            summary: format!(
                "No failed jobs reported (conclusion: {})",
                run.conclusion.map(|c| c.name()).unwrap_or("unknown")
            ),
            points: Vec::new(),
        }))
    }
}

struct JobLogs<'a, U>(&'a U);

impl<U: Upstream> LogSource for JobLogs<'_, U> {
    async fn job_log(&self, job_id: i64) -> anyhow::Result<String> {
        Ok(self.0.job_log(job_id).await?)
    }
}

// Merge runs of the bulk and tail-repair passes into base records, ordered on
// descending update time and run id. Tail entries replace bulk entries.
fn merge_runs(bulk: Vec<WorkflowRun>, tail: Vec<WorkflowRun>) -> Vec<RunRecord> {
    let mut merged: HashMap<i64, WorkflowRun> = HashMap::new();
    for run in bulk.into_iter().chain(tail) {
        merged.insert(run.id, run);
    }

    let mut records: Vec<RunRecord> = merged.values().map(RunRecord::from_upstream).collect();
    records.sort_by(|l, r| {
        r.updated_at_ms
            .cmp(&l.updated_at_ms)
            .then(r.run_id.cmp(&l.run_id))
    });
    records
}
