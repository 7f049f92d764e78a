use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Error;

/// Default page size for task listings.
pub const DEFAULT_PAGE_SIZE: u32 = 20;
/// Largest page a listing will return.
pub const MAX_PAGE_SIZE: u32 = 100;

/// Clamp a requested page size into `[1, MAX_PAGE_SIZE]`, treating 0 as unset.
pub fn clamp_page_size(requested: u32) -> u32 {
    match requested {
        0 => DEFAULT_PAGE_SIZE,
        n => n.min(MAX_PAGE_SIZE),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Todo,
    InProgress,
    Review,
    Done,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Todo => "todo",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Review => "review",
            TaskStatus::Done => "done",
        }
    }

    /// Parse a listing filter where the empty string means "any status".
    pub fn parse_optional(s: &str) -> Result<Option<Self>, Error> {
        if s.is_empty() {
            Ok(None)
        } else {
            s.parse().map(Some)
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "todo" => Ok(TaskStatus::Todo),
            "in_progress" => Ok(TaskStatus::InProgress),
            "review" => Ok(TaskStatus::Review),
            "done" => Ok(TaskStatus::Done),
            other => Err(Error::invalid(format!("invalid status: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl TaskPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskPriority::Low => "low",
            TaskPriority::Medium => "medium",
            TaskPriority::High => "high",
            TaskPriority::Critical => "critical",
        }
    }

    /// Parse an inbound priority where the empty string means "use the default".
    pub fn parse_optional(s: &str) -> Result<Option<Self>, Error> {
        if s.is_empty() {
            Ok(None)
        } else {
            s.parse().map(Some)
        }
    }
}

impl fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskPriority {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(TaskPriority::Low),
            "medium" => Ok(TaskPriority::Medium),
            "high" => Ok(TaskPriority::High),
            "critical" => Ok(TaskPriority::Critical),
            other => Err(Error::invalid(format!("invalid priority: {}", other))),
        }
    }
}

/// A persisted task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub workspace_id: String,
    pub project_id: String,
    pub title: String,
    pub description: String,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    pub assigned_to: Option<String>,
    pub due_date: Option<DateTime<Utc>>,
    /// Opaque JSON object, `{}` when not supplied.
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// One row of a bulk import request. Never persisted directly.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskInput {
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// "low" | "medium" | "high" | "critical", or empty for the default.
    #[serde(default)]
    pub priority: String,
    #[serde(default)]
    pub assigned_to: String,
    pub due_date: Option<DateTime<Utc>>,
    pub metadata: Option<serde_json::Value>,
}

impl TaskInput {
    pub fn titled(title: impl Into<String>) -> Self {
        TaskInput {
            title: title.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateTaskParams {
    pub workspace_id: String,
    pub project_id: String,
    pub title: String,
    pub description: String,
    /// `None` stores the default priority.
    pub priority: Option<TaskPriority>,
    pub assigned_to: Option<String>,
    pub due_date: Option<DateTime<Utc>>,
    pub metadata: Option<serde_json::Value>,
}

impl CreateTaskParams {
    /// Validate a raw import row against the owning workspace and project.
    pub fn from_input(workspace_id: &str, project_id: &str, input: TaskInput) -> Result<Self, Error> {
        if input.title.trim().is_empty() {
            return Err(Error::invalid("title is required"));
        }
        let priority = TaskPriority::parse_optional(&input.priority)?;
        Ok(CreateTaskParams {
            workspace_id: workspace_id.to_string(),
            project_id: project_id.to_string(),
            title: input.title,
            description: input.description,
            priority,
            assigned_to: non_empty(input.assigned_to),
            due_date: input.due_date,
            metadata: input.metadata,
        })
    }
}

/// Full replacement of a task's mutable fields.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateTaskParams {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    pub assigned_to: Option<String>,
    pub due_date: Option<DateTime<Utc>>,
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListTasksParams {
    pub workspace_id: String,
    pub project_id: Option<String>,
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
    pub assigned_to: Option<String>,
    pub page_size: u32,
    /// Id of the last task of the previous page.
    pub page_token: Option<String>,
}

impl ListTasksParams {
    /// Apply raw status/priority filters. Empty strings mean "any"; anything
    /// else must name a known value.
    pub fn with_filters(mut self, status: &str, priority: &str) -> Result<Self, Error> {
        self.status = TaskStatus::parse_optional(status)?;
        self.priority = TaskPriority::parse_optional(priority)?;
        Ok(self)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TaskList {
    pub tasks: Vec<Task>,
    pub next_page_token: Option<String>,
    pub total_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportError {
    /// Position of the failed row in the request.
    pub index: usize,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportResult {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Sorted by `index`.
    pub errors: Vec<ImportError>,
}

pub(crate) fn non_empty(s: String) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_priority_means_default() {
        assert_eq!(TaskPriority::parse_optional("").unwrap(), None);
        assert_eq!(
            TaskPriority::parse_optional("critical").unwrap(),
            Some(TaskPriority::Critical)
        );
        assert!(TaskPriority::parse_optional("urgent").is_err());
    }

    #[test]
    fn status_round_trips_through_its_wire_name() {
        for status in [
            TaskStatus::Todo,
            TaskStatus::InProgress,
            TaskStatus::Review,
            TaskStatus::Done,
        ] {
            assert_eq!(status.as_str().parse::<TaskStatus>().unwrap(), status);
        }
        assert!(matches!("blocked".parse::<TaskStatus>(), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn page_size_is_clamped() {
        assert_eq!(clamp_page_size(0), DEFAULT_PAGE_SIZE);
        assert_eq!(clamp_page_size(1), 1);
        assert_eq!(clamp_page_size(500), MAX_PAGE_SIZE);
    }

    #[test]
    fn input_without_title_is_rejected() {
        let err = CreateTaskParams::from_input("ws", "proj", TaskInput::titled("  ")).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn input_maps_empty_assignee_to_none() {
        let params = CreateTaskParams::from_input("ws", "proj", TaskInput::titled("write docs")).unwrap();
        assert_eq!(params.assigned_to, None);
        assert_eq!(params.priority, None);
        assert_eq!(params.workspace_id, "ws");
    }

    #[test]
    fn raw_list_filters_are_validated() {
        let params = ListTasksParams::default()
            .with_filters("in_progress", "")
            .unwrap();
        assert_eq!(params.status, Some(TaskStatus::InProgress));
        assert_eq!(params.priority, None);

        let any = ListTasksParams::default().with_filters("", "").unwrap();
        assert_eq!((any.status, any.priority), (None, None));

        assert!(matches!(
            ListTasksParams::default().with_filters("archived", ""),
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            ListTasksParams::default().with_filters("", "urgent"),
            Err(Error::InvalidInput(_))
        ));
    }
}
