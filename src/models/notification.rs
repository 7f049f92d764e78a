use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Retry ceiling stamped on rows when the caller does not pick one.
pub const DEFAULT_MAX_RETRIES: i32 = 5;

/// Event emitted when a single task is created.
pub const EVENT_TASK_CREATED: &str = "task.created";
/// Event emitted for every task created by a bulk import.
pub const EVENT_TASK_IMPORTED: &str = "task.imported";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum NotificationStatus {
    #[default]
    Pending,
    Processed,
    Failed,
    /// Retries exhausted; never claimed again.
    DeadLetter,
}

impl NotificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationStatus::Pending => "pending",
            NotificationStatus::Processed => "processed",
            NotificationStatus::Failed => "failed",
            NotificationStatus::DeadLetter => "dead_letter",
        }
    }

    /// Whether a row in this state may be handed to a processor.
    pub fn is_claimable(&self) -> bool {
        matches!(self, NotificationStatus::Pending | NotificationStatus::Failed)
    }
}

impl fmt::Display for NotificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NotificationStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(NotificationStatus::Pending),
            "processed" => Ok(NotificationStatus::Processed),
            "failed" => Ok(NotificationStatus::Failed),
            "dead_letter" => Ok(NotificationStatus::DeadLetter),
            other => Err(Error::invalid(format!("invalid notification status: {}", other))),
        }
    }
}

/// A row of the notification queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: i64,
    pub workspace_id: String,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub status: NotificationStatus,
    pub retry_count: i32,
    pub max_retries: i32,
    pub next_retry_at: Option<DateTime<Utc>>,
    /// Empty when the row never failed.
    pub last_error: String,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl Notification {
    /// Eligible for a claim at `now`, ignoring leases.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status.is_claimable() && self.next_retry_at.map_or(true, |at| at <= now)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateNotificationParams {
    pub workspace_id: String,
    pub event_type: String,
    pub payload: serde_json::Value,
}

impl CreateNotificationParams {
    /// Payload shared by `task.created` and `task.imported` events.
    pub fn for_task(event_type: &str, task: &crate::models::Task) -> Self {
        CreateNotificationParams {
            workspace_id: task.workspace_id.clone(),
            event_type: event_type.to_string(),
            payload: serde_json::json!({
                "task_id": task.id.to_string(),
                "title": task.title,
            }),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListNotificationsParams {
    pub workspace_id: String,
    pub status: Option<NotificationStatus>,
    pub page_size: u32,
    /// Literal numeric offset, e.g. "40".
    pub page_token: Option<String>,
}

impl ListNotificationsParams {
    pub fn offset(&self) -> Result<u64, Error> {
        match self.page_token.as_deref() {
            None | Some("") => Ok(0),
            Some(token) => token
                .parse::<u64>()
                .map_err(|_| Error::invalid(format!("invalid page token: {}", token))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NotificationList {
    pub notifications: Vec<Notification>,
    pub next_page_token: Option<String>,
    pub total_count: u64,
}

/// Token for the page after `offset`, if anything remains.
pub fn next_offset_token(offset: u64, page_size: u32, total: u64) -> Option<String> {
    let next = offset + u64::from(page_size);
    if next < total {
        Some(next.to_string())
    } else {
        None
    }
}

/// Delay before a row that has failed `retry_count` times (before this
/// failure) becomes eligible again: 2^(retry_count + 1) seconds.
pub fn backoff_delay(retry_count: i32) -> Duration {
    let exp = (retry_count.max(0) + 1).min(30) as u32;
    Duration::seconds(1_i64 << exp)
}
