use actions_client::{Error, RateLimit, Upstream};
use chrono::{DateTime, Utc};
use models::github::{Job, RunsPage, Step, WorkflowRun};
use models::{Conclusion, RunStatus};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;

/// Counts of calls made to a FakeUpstream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Calls {
    pub list_runs: usize,
    pub get_run: usize,
    pub list_jobs: usize,
    pub job_log: usize,
    /// `created_since` of the most recent `list_runs` call.
    pub last_since: Option<DateTime<Utc>>,
}

/// FakeUpstream is a scripted, in-memory Upstream which records its calls.
#[derive(Default)]
pub struct FakeUpstream {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    runs: BTreeMap<i64, WorkflowRun>,
    jobs: HashMap<i64, Vec<Job>>,
    logs: HashMap<i64, String>,
    failing_jobs: HashSet<i64>,
    list_runs_error: Option<reqwest::StatusCode>,
    calls: Calls,
}

impl FakeUpstream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_run(&self, run: WorkflowRun) {
        self.lock().runs.insert(run.id, run);
    }

    pub fn remove_run(&self, run_id: i64) {
        self.lock().runs.remove(&run_id);
    }

    pub fn put_jobs(&self, run_id: i64, jobs: Vec<Job>) {
        self.lock().jobs.insert(run_id, jobs);
    }

    pub fn put_log(&self, job_id: i64, log: &str) {
        self.lock().logs.insert(job_id, log.to_string());
    }

    /// Fail listings of the jobs of `run_id`.
    pub fn fail_jobs_of(&self, run_id: i64) {
        self.lock().failing_jobs.insert(run_id);
    }

    /// Fail run listings with `status`, or stop failing them if None.
    pub fn fail_list_runs(&self, status: Option<reqwest::StatusCode>) {
        self.lock().list_runs_error = status;
    }

    pub fn calls(&self) -> Calls {
        self.lock().calls.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap()
    }
}

fn status_error(path: String, status: reqwest::StatusCode) -> Error {
    Error::Status {
        method: "GET",
        path,
        status,
        body: format!("{{\"message\":\"{}\"}}", status.canonical_reason().unwrap_or("error")),
        rate_limit: RateLimit {
            remaining: Some(4999),
            reset: None,
        },
    }
}

impl Upstream for FakeUpstream {
    async fn list_runs(
        &self,
        created_since: Option<DateTime<Utc>>,
        page: u32,
        per_page: u32,
    ) -> Result<RunsPage, Error> {
        let mut inner = self.lock();
        inner.calls.list_runs += 1;
        inner.calls.last_since = created_since;

        if let Some(status) = inner.list_runs_error {
            return Err(status_error(
                "/repos/acme/widgets/actions/runs".to_string(),
                status,
            ));
        }

        let since_ms = created_since.map(|ts| ts.timestamp_millis());
        let mut runs: Vec<&WorkflowRun> = inner
            .runs
            .values()
            .filter(|run| match since_ms {
                Some(since_ms) => {
                    models::parse_timestamp_ms(&run.created_at).unwrap_or(0) >= since_ms
                }
                None => true,
            })
            .collect();
        // Newest first.
        runs.sort_by(|l, r| r.created_at.cmp(&l.created_at).then(r.id.cmp(&l.id)));

        let total_count = runs.len() as i64;
        let workflow_runs = runs
            .into_iter()
            .skip((page.saturating_sub(1) * per_page) as usize)
            .take(per_page as usize)
            .cloned()
            .collect();

        Ok(RunsPage {
            total_count,
            workflow_runs,
        })
    }

    async fn get_run(&self, run_id: i64) -> Result<Option<WorkflowRun>, Error> {
        let mut inner = self.lock();
        inner.calls.get_run += 1;
        Ok(inner.runs.get(&run_id).cloned())
    }

    async fn list_jobs(&self, run_id: i64) -> Result<Vec<Job>, Error> {
        let mut inner = self.lock();
        inner.calls.list_jobs += 1;

        if inner.failing_jobs.contains(&run_id) {
            return Err(status_error(
                format!("/repos/acme/widgets/actions/runs/{run_id}/jobs"),
                reqwest::StatusCode::BAD_GATEWAY,
            ));
        }
        Ok(inner.jobs.get(&run_id).cloned().unwrap_or_default())
    }

    async fn job_log(&self, job_id: i64) -> Result<String, Error> {
        let mut inner = self.lock();
        inner.calls.job_log += 1;

        inner.logs.get(&job_id).cloned().ok_or_else(|| {
            status_error(
                format!("/repos/acme/widgets/actions/jobs/{job_id}/logs"),
                reqwest::StatusCode::NOT_FOUND,
            )
        })
    }
}

/// Build an upstream run of the "CI" workflow.
pub fn run(
    id: i64,
    status: RunStatus,
    conclusion: Option<Conclusion>,
    created_at: &str,
    updated_at: &str,
) -> WorkflowRun {
    serde_json::from_value(serde_json::json!({
        "id": id,
        "name": "CI",
        "display_title": format!("Change #{id}"),
        "head_branch": "main",
        "event": "push",
        "status": status,
        "conclusion": conclusion,
        "html_url": format!("https://github.com/acme/widgets/actions/runs/{id}"),
        "actor": {"login": "octocat"},
        "run_number": id,
        "created_at": created_at,
        "updated_at": updated_at,
        "run_started_at": created_at,
    }))
    .unwrap()
}

pub fn job(id: i64, name: &str, conclusion: Conclusion, steps: &[(&str, Conclusion)]) -> Job {
    Job {
        id,
        name: name.to_string(),
        status: Some(RunStatus::Completed),
        conclusion: Some(conclusion),
        steps: steps
            .iter()
            .enumerate()
            .map(|(index, (name, conclusion))| Step {
                number: index as i64 + 1,
                name: name.to_string(),
                status: Some(RunStatus::Completed),
                conclusion: Some(*conclusion),
            })
            .collect(),
    }
}

pub fn ts(s: &str) -> DateTime<Utc> {
    s.parse().unwrap()
}
