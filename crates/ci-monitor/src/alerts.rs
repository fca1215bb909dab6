use crate::config::AlertOptions;
use anyhow::Context;
use chrono::{DateTime, Utc};
use models::{AlertRecord, RunRecord};
use run_store::Store;
use std::time::Duration;

/// At most this many recently-updated runs are scanned for pending alerts.
pub const MAX_SCANNED_RUNS: usize = 800;

/// Notification of a failed run which hasn't yet been delivered on the channel.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub run_id: i64,
    pub title: String,
    /// Multi-line body: what failed, where it ran, and a link.
    pub body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub points: Vec<String>,
    pub url: String,
}

impl Notification {
    fn of(run: &RunRecord) -> Self {
        let conclusion = run.conclusion.map(|c| c.name()).unwrap_or("unknown");
        let what = run.failure_summary.as_deref().unwrap_or(&run.name);

        let body = format!(
            "{} #{} concluded {conclusion}: {what}\nbranch {}, actor {}, event {}\n{}",
            run.workflow_name,
            run.run_number,
            display_or(&run.branch, "(none)"),
            display_or(&run.actor, "(unknown)"),
            run.event,
            run.url,
        );

        Self {
            run_id: run.run_id,
            title: format!("{} {conclusion}: {}", run.workflow_name, run.name),
            body,
            summary: run.failure_summary.clone(),
            points: run.failure_points.clone().unwrap_or_default(),
            url: run.url.clone(),
        }
    }
}

fn display_or<'s>(s: &'s str, empty: &'s str) -> &'s str {
    if s.is_empty() {
        empty
    } else {
        s
    }
}

/// AlertDeduper computes failed runs which are yet to be notified on a
/// channel, and records their acknowledgement once delivered elsewhere.
pub struct AlertDeduper<S> {
    options: AlertOptions,
    store: S,
}

impl<S: Store> AlertDeduper<S> {
    pub fn new(options: AlertOptions, store: S) -> Self {
        Self { options, store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Return up to `limit` notifications of failed runs updated within
    /// `lookback` of `now`, most recently updated first.
    ///
    /// Runs must belong to a workflow of `allow_list`, compared without
    /// regard to case or surrounding whitespace, or to the default workflow
    /// if `allow_list` has no non-blank entries.
    #[tracing::instrument(skip_all, fields(channel = %self.options.channel, limit = limit))]
    pub async fn pending(
        &self,
        now: DateTime<Utc>,
        limit: usize,
        allow_list: &[String],
        lookback: Duration,
    ) -> anyhow::Result<Vec<Notification>> {
        let since_ms = now.timestamp_millis() - lookback.as_millis() as i64;
        let runs = self
            .store
            .fetch_runs_updated_since(since_ms, MAX_SCANNED_RUNS)
            .await
            .context("fetching recently updated runs")?;

        let allow_list: Vec<&str> = allow_list
            .iter()
            .map(|w| w.trim())
            .filter(|w| !w.is_empty())
            .collect();

        let allowed = |workflow: &str| {
            if allow_list.is_empty() {
                workflow.eq_ignore_ascii_case(self.options.default_workflow.trim())
            } else {
                allow_list.iter().any(|w| workflow.eq_ignore_ascii_case(w))
            }
        };

        let mut out = Vec::new();
        for run in runs.iter() {
            if out.len() >= limit {
                break;
            }
            if !run.conclusion.is_some_and(|c| c.is_failure()) || !allowed(&run.workflow_name) {
                continue;
            }
            if self
                .store
                .fetch_alert(self.options.channel, run.run_id)
                .await?
                .is_some()
            {
                continue;
            }
            out.push(Notification::of(run));
        }

        tracing::debug!(scanned = runs.len(), pending = out.len(), "computed pending alerts");
        Ok(out)
    }

    /// Acknowledge delivery of notifications for `run_ids` as of `now`.
    /// Runs which are unknown or already acknowledged are skipped.
    /// Returns the number of acknowledgements recorded.
    #[tracing::instrument(skip_all, fields(channel = %self.options.channel))]
    pub async fn acknowledge(&self, now: DateTime<Utc>, run_ids: &[i64]) -> anyhow::Result<usize> {
        let mut inserted = 0;

        // Ids are processed sequentially, so a repeated id observes the
        // acknowledgement of its first occurrence.
        for &run_id in run_ids {
            if self
                .store
                .fetch_alert(self.options.channel, run_id)
                .await?
                .is_some()
            {
                continue;
            }
            let Some(run) = self.store.fetch_runs(&[run_id]).await?.into_iter().next() else {
                tracing::debug!(run_id, "skipping acknowledgement of unknown run");
                continue;
            };

            let alert = AlertRecord {
                run_id,
                workflow_name: run.workflow_name,
                channel: self.options.channel,
                sent_at: now,
            };
            if self.store.insert_alert(&alert).await? {
                inserted += 1;
            }
        }

        tracing::info!(requested = run_ids.len(), inserted, "acknowledged alerts");
        Ok(inserted)
    }
}
