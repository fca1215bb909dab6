use super::{truncate_body, Error, RateLimit, Upstream};
use chrono::{DateTime, Utc};
use models::github::{Job, JobsPage, RunsPage, WorkflowRun};
use reqwest::header;
use std::time::Duration;

const API_VERSION: &str = "2022-11-28";
const JOBS_PER_PAGE: usize = 100;

/// Client of the Actions API of a single `owner/repo`.
#[derive(Clone)]
pub struct Client {
    // Base URL of the REST API, always ending in '/'.
    api_base: url::Url,
    owner: String,
    repo: String,
    http_client: reqwest::Client,
}

impl Client {
    /// Build a Client which authenticates with bearer `token`, and which
    /// bounds each request by `timeout`.
    pub fn new(
        mut api_base: url::Url,
        owner: &str,
        repo: &str,
        token: &str,
        timeout: Duration,
    ) -> Result<Self, Error> {
        if !api_base.path().ends_with('/') {
            let path = format!("{}/", api_base.path());
            api_base.set_path(&path);
        }

        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            header::HeaderValue::from_static("application/vnd.github+json"),
        );
        headers.insert(
            "x-github-api-version",
            header::HeaderValue::from_static(API_VERSION),
        );
        let mut auth = header::HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|_| Error::InvalidToken)?;
        auth.set_sensitive(true);
        headers.insert(header::AUTHORIZATION, auth);

        let http_client = reqwest::Client::builder()
            .user_agent(concat!("ci-monitor/", env!("CARGO_PKG_VERSION")))
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(Error::Build)?;

        Ok(Self {
            api_base,
            owner: owner.to_string(),
            repo: repo.to_string(),
            http_client,
        })
    }

    fn repo_path(&self, suffix: &str) -> String {
        format!("repos/{}/{}/{suffix}", self.owner, self.repo)
    }

    fn runs_request(
        &self,
        created_since: Option<DateTime<Utc>>,
        page: u32,
        per_page: u32,
    ) -> Result<reqwest::Request, Error> {
        let mut query = vec![
            ("per_page", per_page.to_string()),
            ("page", page.to_string()),
        ];
        if let Some(since) = created_since {
            query.push((
                "created",
                format!(
                    ">={}",
                    since.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
                ),
            ));
        }
        self.get("actions/runs", &query)
    }

    // Send a GET `request` and return its successful response.
    async fn execute(
        &self,
        request: reqwest::Request,
    ) -> Result<reqwest::Response, Error> {
        let path = request.url().path().to_string();
        tracing::debug!(url = %request.url(), method = "GET", "sending request");

        let response = self
            .http_client
            .execute(request)
            .await
            .map_err(|source| Error::Transport {
                method: "GET",
                path: path.clone(),
                source,
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let rate_limit = RateLimit::from_headers(response.headers());
        let body = response.text().await.unwrap_or_default();

        Err(Error::Status {
            method: "GET",
            path,
            status,
            body: truncate_body(&body),
            rate_limit,
        })
    }

    async fn get_text(&self, request: reqwest::Request) -> Result<String, Error> {
        let path = request.url().path().to_string();
        let response = self.execute(request).await?;

        response.text().await.map_err(|source| Error::Transport {
            method: "GET",
            path,
            source,
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        request: reqwest::Request,
    ) -> Result<T, Error> {
        let path = request.url().path().to_string();
        let body = self.get_text(request).await?;

        serde_json::from_str(&body).map_err(|source| Error::Decode {
            method: "GET",
            path,
            source,
        })
    }

    fn get(&self, suffix: &str, query: &[(&str, String)]) -> Result<reqwest::Request, Error> {
        let url = self.api_base.join(&self.repo_path(suffix))?;

        self.http_client
            .get(url)
            .query(query)
            .build()
            .map_err(|source| Error::Transport {
                method: "GET",
                path: self.repo_path(suffix),
                source,
            })
    }
}

impl Upstream for Client {
    async fn list_runs(
        &self,
        created_since: Option<DateTime<Utc>>,
        page: u32,
        per_page: u32,
    ) -> Result<RunsPage, Error> {
        let request = self.runs_request(created_since, page, per_page)?;
        self.get_json(request).await
    }

    async fn get_run(&self, run_id: i64) -> Result<Option<WorkflowRun>, Error> {
        let request = self.get(&format!("actions/runs/{run_id}"), &[])?;

        found(self.get_json(request).await)
    }

    async fn list_jobs(&self, run_id: i64) -> Result<Vec<Job>, Error> {
        let mut jobs = Vec::new();

        for page in 1.. {
            let request = self.get(
                &format!("actions/runs/{run_id}/jobs"),
                &[
                    ("per_page", JOBS_PER_PAGE.to_string()),
                    ("page", page.to_string()),
                ],
            )?;
            let JobsPage {
                total_count,
                jobs: next,
            } = self.get_json(request).await?;

            let page_len = next.len();
            jobs.extend(next);

            if jobs_listed(jobs.len(), page_len, total_count) {
                break;
            }
        }
        Ok(jobs)
    }

    async fn job_log(&self, job_id: i64) -> Result<String, Error> {
        // The API responds with a redirect to short-lived blob storage,
        // which reqwest follows.
        let request = self.get(&format!("actions/jobs/{job_id}/logs"), &[])?;
        self.get_text(request).await
    }
}

// Map a Not Found response into None.
fn found<T>(result: Result<T, Error>) -> Result<Option<T>, Error> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(err) if err.is_not_found() => Ok(None),
        Err(err) => Err(err),
    }
}

// Listing of jobs is complete after a page of `page_len` jobs, bringing
// the total listed to `listed`, if the page was short or `total_count` is reached.
fn jobs_listed(listed: usize, page_len: usize, total_count: i64) -> bool {
    page_len < JOBS_PER_PAGE || listed as i64 >= total_count
}

#[cfg(test)]
mod test {
    use super::*;

    fn client(base: &str) -> Client {
        Client::new(
            base.parse().unwrap(),
            "acme",
            "widgets",
            "ghp_secret",
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn test_runs_request_url() {
        let since = "2024-05-01T09:50:00.250Z".parse::<DateTime<Utc>>().unwrap();

        let request = client("https://api.github.com")
            .runs_request(Some(since), 2, 100)
            .unwrap();
        insta::assert_snapshot!(request.url().as_str(), @"https://api.github.com/repos/acme/widgets/actions/runs?per_page=100&page=2&created=%3E%3D2024-05-01T09%3A50%3A00Z");

        let request = client("https://api.github.com/")
            .runs_request(None, 1, 50)
            .unwrap();
        insta::assert_snapshot!(request.url().as_str(), @"https://api.github.com/repos/acme/widgets/actions/runs?per_page=50&page=1");
    }

    #[test]
    fn test_enterprise_base_keeps_its_path() {
        let client = client("https://ghe.example.com/api/v3");

        let request = client.get("actions/jobs/77/logs", &[]).unwrap();
        assert_eq!(
            request.url().as_str(),
            "https://ghe.example.com/api/v3/repos/acme/widgets/actions/jobs/77/logs"
        );

        let request = client
            .get("actions/runs/5/jobs", &[("per_page", "100".to_string())])
            .unwrap();
        assert_eq!(
            request.url().as_str(),
            "https://ghe.example.com/api/v3/repos/acme/widgets/actions/runs/5/jobs?per_page=100"
        );
    }

    fn status(status: reqwest::StatusCode) -> Error {
        Error::Status {
            method: "GET",
            path: "/repos/acme/widgets/actions/runs/42".to_string(),
            status,
            body: String::new(),
            rate_limit: RateLimit::default(),
        }
    }

    #[test]
    fn test_not_found_run_is_none() {
        assert_eq!(found::<i64>(Ok(42)).unwrap(), Some(42));
        assert_eq!(
            found::<i64>(Err(status(reqwest::StatusCode::NOT_FOUND))).unwrap(),
            None
        );

        let err = found::<i64>(Err(status(reqwest::StatusCode::FORBIDDEN))).unwrap_err();
        assert_eq!(err.status(), Some(reqwest::StatusCode::FORBIDDEN));
    }

    #[test]
    fn test_jobs_listing_stops() {
        // A full page, with more jobs remaining.
        assert!(!jobs_listed(100, 100, 250));
        assert!(!jobs_listed(200, 100, 250));
        // A short page.
        assert!(jobs_listed(250, 50, 250));
        assert!(jobs_listed(30, 30, 0));
        // A full page which reaches the total count.
        assert!(jobs_listed(200, 100, 200));
        // Jobs added after the first page may exceed the total count.
        assert!(jobs_listed(300, 100, 200));
    }
}
