use super::{Store, SCHEMA};
use anyhow::Context;
use chrono::{DateTime, Utc};
use models::{AlertChannel, AlertRecord, Conclusion, RunRecord, RunStatus, SyncState};
use sqlx::Executor;

/// PgStore is a Store backed by Postgres tables of `schema.sql`.
#[derive(Clone)]
pub struct PgStore {
    pool: sqlx::PgPool,
}

impl PgStore {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(4)
            .connect(database_url)
            .await
            .context("connecting to database")?;

        Ok(Self::new(pool))
    }

    /// Create tables and indexes which don't yet exist.
    pub async fn apply_schema(&self) -> anyhow::Result<()> {
        // A plain &str uses the simple query protocol,
        // which permits multiple statements.
        (&self.pool)
            .execute(SCHEMA)
            .await
            .context("applying database schema")?;
        Ok(())
    }
}

#[derive(Debug, sqlx::FromRow)]
struct RunRow {
    run_id: i64,
    name: String,
    workflow_name: String,
    branch: String,
    event: String,
    status: RunStatus,
    conclusion: Option<Conclusion>,
    url: String,
    actor: String,
    run_number: i64,
    pr_numbers: Vec<i64>,
    created_at: String,
    updated_at: String,
    started_at: String,
    updated_at_ms: i64,
    duration_ms: i64,
    failure_summary: Option<String>,
    failure_points: Option<Vec<String>>,
}

impl From<RunRow> for RunRecord {
    fn from(row: RunRow) -> Self {
        let RunRow {
            run_id,
            name,
            workflow_name,
            branch,
            event,
            status,
            conclusion,
            url,
            actor,
            run_number,
            pr_numbers,
            created_at,
            updated_at,
            started_at,
            updated_at_ms,
            duration_ms,
            failure_summary,
            failure_points,
        } = row;

        RunRecord {
            run_id,
            name,
            workflow_name,
            branch,
            event,
            status,
            conclusion,
            url,
            actor,
            run_number,
            pr_numbers,
            created_at,
            updated_at,
            started_at,
            updated_at_ms,
            duration_ms,
            failure_summary,
            failure_points,
        }
    }
}

const RUN_COLUMNS: &str = "run_id, name, workflow_name, branch, event, status, conclusion, url, \
    actor, run_number, pr_numbers, created_at, updated_at, started_at, updated_at_ms, \
    duration_ms, failure_summary, failure_points";

#[derive(Debug, sqlx::FromRow)]
struct SyncStateRow {
    owner: String,
    repo: String,
    last_synced_at: Option<DateTime<Utc>>,
    last_sync_ms: i64,
    last_error: Option<String>,
}

#[derive(Debug, sqlx::FromRow)]
struct AlertRow {
    channel: AlertChannel,
    run_id: i64,
    workflow_name: String,
    sent_at: DateTime<Utc>,
}

impl Store for PgStore {
    async fn fetch_runs(&self, run_ids: &[i64]) -> anyhow::Result<Vec<RunRecord>> {
        let rows = sqlx::query_as::<_, RunRow>(&format!(
            "select {RUN_COLUMNS} from ci_runs where run_id = any($1);"
        ))
        .bind(run_ids)
        .fetch_all(&self.pool)
        .await
        .context("fetching runs by id")?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn fetch_unfinished_runs(&self, limit: usize) -> anyhow::Result<Vec<RunRecord>> {
        let rows = sqlx::query_as::<_, RunRow>(&format!(
            "select {RUN_COLUMNS} from ci_runs
            where status != $1
            order by updated_at_ms desc, run_id desc
            limit $2;"
        ))
        .bind(RunStatus::Completed)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .context("fetching unfinished runs")?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn fetch_runs_updated_since(
        &self,
        since_ms: i64,
        limit: usize,
    ) -> anyhow::Result<Vec<RunRecord>> {
        let rows = sqlx::query_as::<_, RunRow>(&format!(
            "select {RUN_COLUMNS} from ci_runs
            where updated_at_ms >= $1
            order by updated_at_ms desc, run_id desc
            limit $2;"
        ))
        .bind(since_ms)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .context("fetching recently updated runs")?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn put_runs(&self, runs: &[RunRecord]) -> anyhow::Result<()> {
        let mut txn = self.pool.begin().await?;

        for run in runs {
            sqlx::query(
                r#"insert into ci_runs (
                    run_id, name, workflow_name, branch, event, status, conclusion, url,
                    actor, run_number, pr_numbers, created_at, updated_at, started_at,
                    updated_at_ms, duration_ms, failure_summary, failure_points
                ) values (
                    $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18
                )
                on conflict (run_id) do update set
                    name = excluded.name,
                    workflow_name = excluded.workflow_name,
                    branch = excluded.branch,
                    event = excluded.event,
                    status = excluded.status,
                    conclusion = excluded.conclusion,
                    url = excluded.url,
                    actor = excluded.actor,
                    run_number = excluded.run_number,
                    pr_numbers = excluded.pr_numbers,
                    created_at = excluded.created_at,
                    updated_at = excluded.updated_at,
                    started_at = excluded.started_at,
                    updated_at_ms = excluded.updated_at_ms,
                    duration_ms = excluded.duration_ms,
                    failure_summary = excluded.failure_summary,
                    failure_points = excluded.failure_points;
                "#,
            )
            .bind(run.run_id)
            .bind(&run.name)
            .bind(&run.workflow_name)
            .bind(&run.branch)
            .bind(&run.event)
            .bind(run.status)
            .bind(run.conclusion)
            .bind(&run.url)
            .bind(&run.actor)
            .bind(run.run_number)
            .bind(&run.pr_numbers)
            .bind(&run.created_at)
            .bind(&run.updated_at)
            .bind(&run.started_at)
            .bind(run.updated_at_ms)
            .bind(run.duration_ms)
            .bind(&run.failure_summary)
            .bind(&run.failure_points)
            .execute(&mut txn)
            .await
            .with_context(|| format!("upserting run {}", run.run_id))?;
        }

        txn.commit().await?;
        tracing::debug!(runs = runs.len(), "upserted runs");

        Ok(())
    }

    async fn fetch_sync_state(&self, key: &str) -> anyhow::Result<Option<SyncState>> {
        let row = sqlx::query_as::<_, SyncStateRow>(
            "select owner, repo, last_synced_at, last_sync_ms, last_error
            from ci_sync_state where key = $1;",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .context("fetching sync state")?;

        Ok(row.map(
            |SyncStateRow {
                 owner,
                 repo,
                 last_synced_at,
                 last_sync_ms,
                 last_error,
             }| SyncState {
                owner,
                repo,
                last_synced_at,
                last_sync_ms,
                last_error,
            },
        ))
    }

    async fn put_sync_state(&self, state: &SyncState) -> anyhow::Result<()> {
        sqlx::query(
            "insert into ci_sync_state (key, owner, repo, last_synced_at, last_sync_ms, last_error)
            values ($1, $2, $3, $4, $5, $6)
            on conflict (key) do update set
                last_synced_at = excluded.last_synced_at,
                last_sync_ms = excluded.last_sync_ms,
                last_error = excluded.last_error;",
        )
        .bind(state.key())
        .bind(&state.owner)
        .bind(&state.repo)
        .bind(state.last_synced_at)
        .bind(state.last_sync_ms)
        .bind(&state.last_error)
        .execute(&self.pool)
        .await
        .context("storing sync state")?;

        Ok(())
    }

    async fn fetch_alert(
        &self,
        channel: AlertChannel,
        run_id: i64,
    ) -> anyhow::Result<Option<AlertRecord>> {
        let row = sqlx::query_as::<_, AlertRow>(
            "select channel, run_id, workflow_name, sent_at
            from ci_alerts where channel = $1 and run_id = $2;",
        )
        .bind(channel)
        .bind(run_id)
        .fetch_optional(&self.pool)
        .await
        .context("fetching alert")?;

        Ok(row.map(
            |AlertRow {
                 channel,
                 run_id,
                 workflow_name,
                 sent_at,
             }| AlertRecord {
                run_id,
                workflow_name,
                channel,
                sent_at,
            },
        ))
    }

    async fn insert_alert(&self, alert: &AlertRecord) -> anyhow::Result<bool> {
        let result = sqlx::query(
            "insert into ci_alerts (channel, run_id, workflow_name, sent_at)
            values ($1, $2, $3, $4)
            on conflict do nothing;",
        )
        .bind(alert.channel)
        .bind(alert.run_id)
        .bind(&alert.workflow_name)
        .bind(alert.sent_at)
        .execute(&self.pool)
        .await
        .context("inserting alert")?;

        Ok(result.rows_affected() == 1)
    }
}
