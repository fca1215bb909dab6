use serde::{Deserialize, Serialize};

mod alerts;
pub mod github;
mod runs;
mod sync_state;

pub use alerts::{AlertChannel, AlertRecord};
pub use runs::{parse_timestamp_ms, RunRecord};
pub use sync_state::SyncState;

/// ParseError is returned when a stored or user-provided name doesn't map to
/// a known enum variant.
#[derive(Debug, thiserror::Error)]
#[error("invalid {kind}: {value:?}")]
pub struct ParseError {
    pub kind: &'static str,
    pub value: String,
}

/// Lifecycle status of a workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    // GitHub reports a few additional pre-execution states.
    // They're all "not yet running" from our perspective.
    #[serde(alias = "waiting", alias = "requested", alias = "pending")]
    Queued,
    InProgress,
    Completed,
}

impl Default for RunStatus {
    fn default() -> Self {
        RunStatus::Queued
    }
}

impl RunStatus {
    pub fn name(&self) -> &'static str {
        match self {
            RunStatus::Queued => "queued",
            RunStatus::InProgress => "in_progress",
            RunStatus::Completed => "completed",
        }
    }

    pub fn all() -> &'static [RunStatus] {
        &[RunStatus::Queued, RunStatus::InProgress, RunStatus::Completed]
    }

    /// Statuses of runs which may still change upstream.
    pub fn unfinished() -> &'static [RunStatus] {
        &[RunStatus::Queued, RunStatus::InProgress]
    }
}

/// Final outcome of a completed run, job, or step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Conclusion {
    Success,
    Failure,
    Neutral,
    Cancelled,
    Skipped,
    TimedOut,
    ActionRequired,
    Stale,
    StartupFailure,
}

impl Conclusion {
    pub fn name(&self) -> &'static str {
        match self {
            Conclusion::Success => "success",
            Conclusion::Failure => "failure",
            Conclusion::Neutral => "neutral",
            Conclusion::Cancelled => "cancelled",
            Conclusion::Skipped => "skipped",
            Conclusion::TimedOut => "timed_out",
            Conclusion::ActionRequired => "action_required",
            Conclusion::Stale => "stale",
            Conclusion::StartupFailure => "startup_failure",
        }
    }

    pub fn all() -> &'static [Conclusion] {
        &[
            Conclusion::Success,
            Conclusion::Failure,
            Conclusion::Neutral,
            Conclusion::Cancelled,
            Conclusion::Skipped,
            Conclusion::TimedOut,
            Conclusion::ActionRequired,
            Conclusion::Stale,
            Conclusion::StartupFailure,
        ]
    }

    /// Conclusions which are reported and alerted upon as failures.
    pub fn failures() -> &'static [Conclusion] {
        &[
            Conclusion::Failure,
            Conclusion::TimedOut,
            Conclusion::Cancelled,
            Conclusion::ActionRequired,
            Conclusion::StartupFailure,
        ]
    }

    pub fn is_failure(&self) -> bool {
        Self::failures().contains(self)
    }
}

macro_rules! named_enum {
    ($t:ty, $kind:literal) => {
        impl std::fmt::Display for $t {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.name())
            }
        }

        impl std::str::FromStr for $t {
            type Err = ParseError;

            fn from_str(name: &str) -> Result<Self, Self::Err> {
                <$t>::all()
                    .iter()
                    .find(|v| name.eq_ignore_ascii_case(v.name()))
                    .copied()
                    .ok_or_else(|| ParseError {
                        kind: $kind,
                        value: name.to_string(),
                    })
            }
        }

        // Enums are stored as plain TEXT columns.
        #[cfg(feature = "sqlx-support")]
        impl sqlx::Type<sqlx::postgres::Postgres> for $t {
            fn type_info() -> sqlx::postgres::PgTypeInfo {
                <&str as sqlx::Type<sqlx::postgres::Postgres>>::type_info()
            }
        }

        #[cfg(feature = "sqlx-support")]
        impl sqlx::Encode<'_, sqlx::postgres::Postgres> for $t {
            fn encode_by_ref(
                &self,
                buf: &mut sqlx::postgres::PgArgumentBuffer,
            ) -> sqlx::encode::IsNull {
                <&str as sqlx::Encode<'_, sqlx::Postgres>>::encode_by_ref(&self.name(), buf)
            }
        }

        #[cfg(feature = "sqlx-support")]
        impl<'r> sqlx::Decode<'r, sqlx::postgres::Postgres> for $t {
            fn decode(
                value: sqlx::postgres::PgValueRef<'r>,
            ) -> Result<Self, sqlx::error::BoxDynError> {
                let s = <&'r str as sqlx::Decode<'r, sqlx::postgres::Postgres>>::decode(value)?;
                Ok(s.parse::<$t>()?)
            }
        }
    };
}

named_enum!(RunStatus, "run status");
named_enum!(Conclusion, "conclusion");
named_enum!(AlertChannel, "alert channel");

#[cfg(test)]
mod test {
    use super::{AlertChannel, Conclusion, RunStatus};

    #[test]
    fn test_names_round_trip_through_from_str() {
        for status in RunStatus::all() {
            assert_eq!(status.name().parse::<RunStatus>().unwrap(), *status);
        }
        for conclusion in Conclusion::all() {
            assert_eq!(conclusion.name().parse::<Conclusion>().unwrap(), *conclusion);
        }
        for channel in AlertChannel::all() {
            assert_eq!(channel.name().parse::<AlertChannel>().unwrap(), *channel);
        }
        assert_eq!("TIMED_OUT".parse::<Conclusion>().unwrap(), Conclusion::TimedOut);

        let err = "exploded".parse::<Conclusion>().unwrap_err();
        assert_eq!(err.to_string(), r#"invalid conclusion: "exploded""#);
    }

    #[test]
    fn test_upstream_pre_execution_statuses_are_queued() {
        for name in ["\"waiting\"", "\"requested\"", "\"pending\"", "\"queued\""] {
            let status: RunStatus = serde_json::from_str(name).unwrap();
            assert_eq!(status, RunStatus::Queued);
        }
        let status: RunStatus = serde_json::from_str("\"in_progress\"").unwrap();
        assert_eq!(status, RunStatus::InProgress);
    }

    #[test]
    fn test_failure_conclusions() {
        let failing: Vec<_> = Conclusion::all()
            .iter()
            .filter(|c| c.is_failure())
            .map(|c| c.name())
            .collect();

        assert_eq!(
            failing,
            vec![
                "failure",
                "cancelled",
                "timed_out",
                "action_required",
                "startup_failure"
            ]
        );
    }
}
