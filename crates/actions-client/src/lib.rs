//! Client of the GitHub Actions REST API, scoped to the workflow runs, jobs,
//! and job logs of a single repository.
use chrono::{DateTime, Utc};
use models::github::{Job, RunsPage, WorkflowRun};

mod client;
pub use client::Client;

/// Response bodies embedded into errors are truncated to this many characters.
pub const MAX_ERROR_BODY_CHARS: usize = 512;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{method} {path}: {status}{rate_limit}: {body}")]
    Status {
        method: &'static str,
        path: String,
        status: reqwest::StatusCode,
        body: String,
        rate_limit: RateLimit,
    },
    #[error("{method} {path}: request failed")]
    Transport {
        method: &'static str,
        path: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{method} {path}: failed to decode response")]
    Decode {
        method: &'static str,
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("access token is not a valid header value")]
    InvalidToken,
    #[error("invalid API URL")]
    Url(#[from] url::ParseError),
    #[error("failed to build HTTP client")]
    Build(#[source] reqwest::Error),
}

impl Error {
    pub fn status(&self) -> Option<reqwest::StatusCode> {
        match self {
            Error::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(reqwest::StatusCode::NOT_FOUND)
    }
}

/// Rate-limit state reported by the API alongside a response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RateLimit {
    /// Requests remaining in the current window.
    pub remaining: Option<u64>,
    /// Epoch seconds at which the window resets.
    pub reset: Option<i64>,
}

impl RateLimit {
    pub fn from_headers(headers: &reqwest::header::HeaderMap) -> Self {
        let parse = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .map(str::to_string)
        };
        Self {
            remaining: parse("x-ratelimit-remaining").and_then(|v| v.parse().ok()),
            reset: parse("x-ratelimit-reset").and_then(|v| v.parse().ok()),
        }
    }
}

impl std::fmt::Display for RateLimit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let reset = self
            .reset
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
            .map(|ts| ts.to_rfc3339_opts(chrono::SecondsFormat::Secs, true));

        match (self.remaining, reset) {
            (None, None) => Ok(()),
            (Some(remaining), None) => write!(f, " (rate limit remaining: {remaining})"),
            (None, Some(reset)) => write!(f, " (rate limit resets at {reset})"),
            (Some(remaining), Some(reset)) => {
                write!(f, " (rate limit remaining: {remaining}, resets at {reset})")
            }
        }
    }
}

/// Upstream is the subset of the Actions API consumed by run synchronization.
pub trait Upstream: Send + Sync {
    /// List one page of workflow runs, newest first, optionally restricted
    /// to runs created at or after `created_since`. Pages are 1-indexed.
    fn list_runs(
        &self,
        created_since: Option<DateTime<Utc>>,
        page: u32,
        per_page: u32,
    ) -> impl std::future::Future<Output = Result<RunsPage, Error>> + Send;

    /// Fetch a single run, or None if it no longer exists.
    fn get_run(
        &self,
        run_id: i64,
    ) -> impl std::future::Future<Output = Result<Option<WorkflowRun>, Error>> + Send;

    /// List all jobs of a run attempt.
    fn list_jobs(
        &self,
        run_id: i64,
    ) -> impl std::future::Future<Output = Result<Vec<Job>, Error>> + Send;

    /// Fetch the plain-text log of a job.
    fn job_log(
        &self,
        job_id: i64,
    ) -> impl std::future::Future<Output = Result<String, Error>> + Send;
}

/// Truncate `body` to MAX_ERROR_BODY_CHARS, marking the truncation.
pub(crate) fn truncate_body(body: &str) -> String {
    let body = body.trim();
    match body.char_indices().nth(MAX_ERROR_BODY_CHARS) {
        Some((offset, _)) => format!("{}…", &body[..offset]),
        None => body.to_string(),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use reqwest::header::{HeaderMap, HeaderValue};

    #[test]
    fn test_rate_limit_headers() {
        let mut headers = HeaderMap::new();
        assert_eq!(RateLimit::from_headers(&headers), RateLimit::default());
        assert_eq!(RateLimit::default().to_string(), "");

        headers.insert("x-ratelimit-remaining", HeaderValue::from_static("0"));
        headers.insert("x-ratelimit-reset", HeaderValue::from_static("1714557600"));
        let limit = RateLimit::from_headers(&headers);

        assert_eq!(
            limit,
            RateLimit {
                remaining: Some(0),
                reset: Some(1714557600)
            }
        );
        assert_eq!(
            limit.to_string(),
            " (rate limit remaining: 0, resets at 2024-05-01T10:00:00Z)"
        );

        headers.insert("x-ratelimit-reset", HeaderValue::from_static("soon"));
        assert_eq!(
            RateLimit::from_headers(&headers).to_string(),
            " (rate limit remaining: 0)"
        );
    }

    #[test]
    fn test_status_error_rendering() {
        let err = Error::Status {
            method: "GET",
            path: "/repos/acme/widgets/actions/runs".to_string(),
            status: reqwest::StatusCode::FORBIDDEN,
            body: truncate_body(&format!(
                "  {{\"message\":\"API rate limit exceeded\"}}{}",
                "!".repeat(600)
            )),
            rate_limit: RateLimit {
                remaining: Some(0),
                reset: None,
            },
        };
        let rendered = err.to_string();

        assert!(rendered.starts_with(
            "GET /repos/acme/widgets/actions/runs: 403 Forbidden (rate limit remaining: 0): {\"message\":\"API rate limit exceeded\"}!!!"
        ));
        assert!(rendered.ends_with("!…"));
        assert_eq!(err.status(), Some(reqwest::StatusCode::FORBIDDEN));
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_body_truncation() {
        assert_eq!(truncate_body(" short \n"), "short");

        let exact = "é".repeat(MAX_ERROR_BODY_CHARS);
        assert_eq!(truncate_body(&exact), exact);

        let long = "é".repeat(MAX_ERROR_BODY_CHARS + 1);
        let out = truncate_body(&long);
        assert_eq!(out.chars().count(), MAX_ERROR_BODY_CHARS + 1);
        assert!(out.ends_with("é…"));
    }
}
