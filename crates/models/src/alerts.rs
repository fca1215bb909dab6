use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Delivery channel through which a failure notification was sent.
/// Delivery itself happens outside of this system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertChannel {
    Slack,
    Email,
    Webhook,
}

impl AlertChannel {
    pub fn name(&self) -> &'static str {
        match self {
            AlertChannel::Slack => "slack",
            AlertChannel::Email => "email",
            AlertChannel::Webhook => "webhook",
        }
    }

    pub fn all() -> &'static [AlertChannel] {
        &[AlertChannel::Slack, AlertChannel::Email, AlertChannel::Webhook]
    }
}

/// AlertRecord is the ledger entry marking a run's failure as notified on a channel.
/// There is at most one per (channel, run_id).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertRecord {
    pub run_id: i64,
    pub workflow_name: String,
    pub channel: AlertChannel,
    pub sent_at: DateTime<Utc>,
}
