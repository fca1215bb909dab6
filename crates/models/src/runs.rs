use super::{github, Conclusion, RunStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// RunRecord is the cached form of one upstream workflow run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRecord {
    /// Upstream numeric run identifier. Immutable.
    pub run_id: i64,
    /// Derived human-readable title of the run.
    pub name: String,
    pub workflow_name: String,
    pub branch: String,
    pub event: String,
    pub status: RunStatus,
    pub conclusion: Option<Conclusion>,
    pub url: String,
    pub actor: String,
    pub run_number: i64,
    /// Numbers of associated pull requests, sorted and de-duplicated.
    pub pr_numbers: Vec<i64>,
    pub created_at: String,
    pub updated_at: String,
    pub started_at: String,
    /// `updated_at` as epoch milliseconds, or zero if it couldn't be parsed.
    pub updated_at_ms: i64,
    /// Time from `started_at` to `updated_at`, clamped to be non-negative.
    pub duration_ms: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_points: Option<Vec<String>>,
}

impl RunRecord {
    /// Map an upstream run into its base record, without failure details.
    pub fn from_upstream(run: &github::WorkflowRun) -> Self {
        let github::WorkflowRun {
            id,
            name,
            display_title,
            head_branch,
            event,
            status,
            conclusion,
            html_url,
            actor,
            triggering_actor,
            run_number,
            pull_requests,
            created_at,
            updated_at,
            run_started_at,
        } = run;

        let workflow_name = non_empty(name.as_deref()).unwrap_or("unknown").to_string();
        let title = match (non_empty(display_title.as_deref()), non_empty(name.as_deref())) {
            (Some(title), _) => title.to_string(),
            (None, Some(name)) => name.to_string(),
            (None, None) => format!("{workflow_name} #{run_number}"),
        };
        let actor = actor
            .as_ref()
            .or(triggering_actor.as_ref())
            .map(|a| a.login.clone())
            .unwrap_or_default();

        let mut pr_numbers: Vec<i64> = pull_requests.iter().map(|pr| pr.number).collect();
        pr_numbers.sort();
        pr_numbers.dedup();

        let started_at = run_started_at
            .as_ref()
            .filter(|s| !s.is_empty())
            .unwrap_or(created_at)
            .clone();

        Self {
            run_id: *id,
            name: title,
            workflow_name,
            branch: head_branch.clone().unwrap_or_default(),
            event: event.clone(),
            status: status.unwrap_or_default(),
            conclusion: *conclusion,
            url: html_url.clone(),
            actor,
            run_number: *run_number,
            pr_numbers,
            created_at: created_at.clone(),
            updated_at: updated_at.clone(),
            updated_at_ms: parse_timestamp_ms(updated_at).unwrap_or(0),
            duration_ms: duration_ms(&started_at, updated_at),
            started_at,
            failure_summary: None,
            failure_points: None,
        }
    }

    /// A run is failing once it's completed with anything but success.
    pub fn is_failing(&self) -> bool {
        self.status == RunStatus::Completed && self.conclusion != Some(Conclusion::Success)
    }

    pub fn is_finished(&self) -> bool {
        self.status == RunStatus::Completed
    }
}

/// Parse an RFC 3339 timestamp into epoch milliseconds.
pub fn parse_timestamp_ms(ts: &str) -> Option<i64> {
    DateTime::parse_from_rfc3339(ts)
        .ok()
        .map(|ts| ts.with_timezone(&Utc).timestamp_millis())
}

fn duration_ms(started_at: &str, updated_at: &str) -> i64 {
    match (parse_timestamp_ms(started_at), parse_timestamp_ms(updated_at)) {
        (Some(started), Some(updated)) => (updated - started).max(0),
        _ => 0,
    }
}

fn non_empty(s: Option<&str>) -> Option<&str> {
    s.map(str::trim).filter(|s| !s.is_empty())
}

#[cfg(test)]
mod test {
    use super::*;

    fn fixture_run() -> github::WorkflowRun {
        serde_json::from_value(serde_json::json!({
            "id": 101,
            "name": "CI",
            "display_title": "Bump deps",
            "head_branch": "main",
            "event": "pull_request",
            "status": "completed",
            "conclusion": "failure",
            "html_url": "https://github.com/acme/widgets/actions/runs/101",
            "actor": {"login": "octocat"},
            "run_number": 12,
            "pull_requests": [{"number": 9}, {"number": 4}, {"number": 9}],
            "created_at": "2024-05-01T10:00:00Z",
            "updated_at": "2024-05-01T10:05:30Z",
            "run_started_at": "2024-05-01T10:01:00Z"
        }))
        .unwrap()
    }

    #[test]
    fn test_record_from_upstream() {
        let record = RunRecord::from_upstream(&fixture_run());

        insta::assert_json_snapshot!(record, @r###"
        {
          "runId": 101,
          "name": "Bump deps",
          "workflowName": "CI",
          "branch": "main",
          "event": "pull_request",
          "status": "completed",
          "conclusion": "failure",
          "url": "https://github.com/acme/widgets/actions/runs/101",
          "actor": "octocat",
          "runNumber": 12,
          "prNumbers": [
            4,
            9
          ],
          "createdAt": "2024-05-01T10:00:00Z",
          "updatedAt": "2024-05-01T10:05:30Z",
          "startedAt": "2024-05-01T10:01:00Z",
          "updatedAtMs": 1714557930000,
          "durationMs": 270000
        }
        "###);
        assert!(record.is_failing());
    }

    #[test]
    fn test_title_fallbacks() {
        let mut run = fixture_run();
        run.display_title = Some("  ".to_string());
        assert_eq!(RunRecord::from_upstream(&run).name, "CI");

        run.name = None;
        let record = RunRecord::from_upstream(&run);
        assert_eq!(record.name, "unknown #12");
        assert_eq!(record.workflow_name, "unknown");
    }

    #[test]
    fn test_duration_is_clamped() {
        let mut run = fixture_run();

        // Started after the last update (clock skew): clamp to zero.
        run.run_started_at = Some("2024-05-01T11:00:00Z".to_string());
        assert_eq!(RunRecord::from_upstream(&run).duration_ms, 0);

        // Unparseable timestamps yield zero.
        run.run_started_at = Some("not a timestamp".to_string());
        assert_eq!(RunRecord::from_upstream(&run).duration_ms, 0);

        run.run_started_at = None;
        run.updated_at = "garbage".to_string();
        let record = RunRecord::from_upstream(&run);
        assert_eq!(record.duration_ms, 0);
        assert_eq!(record.updated_at_ms, 0);

        // Without a run_started_at, created_at is used.
        run.updated_at = "2024-05-01T10:00:02.500Z".to_string();
        let record = RunRecord::from_upstream(&run);
        assert_eq!(record.started_at, "2024-05-01T10:00:00Z");
        assert_eq!(record.duration_ms, 2500);
    }

    #[test]
    fn test_failing_requires_completion() {
        let mut run = fixture_run();
        run.status = Some(RunStatus::InProgress);
        run.conclusion = None;
        assert!(!RunRecord::from_upstream(&run).is_failing());

        run.status = Some(RunStatus::Completed);
        run.conclusion = Some(Conclusion::Success);
        assert!(!RunRecord::from_upstream(&run).is_failing());

        run.conclusion = Some(Conclusion::Skipped);
        assert!(RunRecord::from_upstream(&run).is_failing());
    }
}
