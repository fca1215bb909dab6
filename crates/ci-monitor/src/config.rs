use models::AlertChannel;
use std::time::Duration;

/// Default base URL of the GitHub REST API.
pub const DEFAULT_API_BASE: &str = "https://api.github.com/";
/// Workflow whose failures are alerted upon when no allow-list is given.
pub const DEFAULT_WORKFLOW: &str = "CI";

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("an API access token is required to sync {0}")]
    MissingToken(String),
    #[error("invalid repository {0:?}: expected \"owner/repo\"")]
    InvalidRepository(String),
}

/// Repository identifies an upstream `owner/repo`.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Repository {
    pub owner: String,
    pub repo: String,
}

impl Repository {
    /// Key of the repository's SyncState.
    pub fn key(&self) -> String {
        models::SyncState::key_of(&self.owner, &self.repo)
    }
}

impl std::fmt::Display for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.owner, self.repo)
    }
}

impl std::str::FromStr for Repository {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let valid = |part: &str| {
            !part.is_empty()
                && part
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        };

        match s.trim().split_once('/') {
            Some((owner, repo)) if valid(owner) && valid(repo) => Ok(Self {
                owner: owner.to_string(),
                repo: repo.to_string(),
            }),
            _ => Err(ConfigError::InvalidRepository(s.to_string())),
        }
    }
}

/// Config of access to an upstream repository.
#[derive(Debug, Clone)]
pub struct Config {
    pub repository: Repository,
    pub token: String,
    pub api_base: url::Url,
    /// Bound on the duration of each upstream request.
    pub request_timeout: Duration,
}

impl Config {
    pub fn new(
        repository: &str,
        token: Option<&str>,
        api_base: url::Url,
        request_timeout: Duration,
    ) -> Result<Self, ConfigError> {
        let repository: Repository = repository.parse()?;

        let token = match token.map(str::trim) {
            Some(token) if !token.is_empty() => token.to_string(),
            _ => return Err(ConfigError::MissingToken(repository.to_string())),
        };

        Ok(Self {
            repository,
            token,
            api_base,
            request_timeout,
        })
    }

    /// Build a client of the configured repository.
    pub fn client(&self) -> Result<actions_client::Client, actions_client::Error> {
        actions_client::Client::new(
            self.api_base.clone(),
            &self.repository.owner,
            &self.repository.repo,
            &self.token,
            self.request_timeout,
        )
    }
}

/// Options of a single sync pass.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SyncOptions {
    /// Explicit lower bound on the creation time of listed runs.
    /// If None, it's derived from the last successful sync.
    pub since: Option<chrono::DateTime<chrono::Utc>>,
    /// Maximum number of runs fetched by the bulk pass.
    pub max_runs: usize,
    /// Only this many of the most recently updated runs are enriched
    /// with failure details.
    pub details_limit: usize,
    /// Passes are skipped if the previous one began more recently than this.
    #[serde(with = "humantime_serde")]
    pub min_interval: Duration,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            since: None,
            max_runs: 300,
            details_limit: 25,
            min_interval: Duration::from_secs(60),
        }
    }
}

/// Options of alert de-duplication.
#[derive(Debug, Clone, serde::Serialize)]
pub struct AlertOptions {
    /// Channel whose delivery ledger is consulted and updated.
    pub channel: AlertChannel,
    /// Workflow alerted upon when no allow-list is provided.
    pub default_workflow: String,
}

impl Default for AlertOptions {
    fn default() -> Self {
        Self {
            channel: AlertChannel::Slack,
            default_workflow: DEFAULT_WORKFLOW.to_string(),
        }
    }
}
