//! In-memory stores with the same contract as the MongoDB ones.
//!
//! A single [`tokio::sync::Mutex`] per store serializes every operation, so
//! `fetch_pending` is trivially exclusive.

use std::cmp::Reverse;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::{
    backoff_delay, clamp_page_size, next_offset_token, CreateNotificationParams,
    CreateTaskParams, ListNotificationsParams, ListTasksParams, Notification, NotificationList,
    NotificationStatus, Task, TaskList, UpdateTaskParams,
};
use crate::store::{NotificationStore, QueueOptions, TaskStore};

#[derive(Default)]
pub struct MemoryTaskStore {
    tasks: Mutex<Vec<Task>>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows, soft-deleted ones included.
    pub async fn len(&self) -> usize {
        self.tasks.lock().await.len()
    }
}

fn sort_key(task: &Task) -> Reverse<(DateTime<Utc>, Uuid)> {
    Reverse((task.created_at, task.id))
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn create(&self, params: CreateTaskParams) -> Result<Task> {
        let now = Utc::now();
        let task = Task {
            id: Uuid::new_v4(),
            workspace_id: params.workspace_id,
            project_id: params.project_id,
            title: params.title,
            description: params.description,
            status: Default::default(),
            priority: params.priority.unwrap_or_default(),
            assigned_to: params.assigned_to,
            due_date: params.due_date,
            metadata: params.metadata.unwrap_or_else(|| serde_json::json!({})),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        self.tasks.lock().await.push(task.clone());
        Ok(task)
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Task> {
        let tasks = self.tasks.lock().await;
        tasks
            .iter()
            .find(|t| t.id == id && t.deleted_at.is_none())
            .cloned()
            .ok_or_else(|| Error::not_found(format!("task {}", id)))
    }

    async fn list(&self, params: ListTasksParams) -> Result<TaskList> {
        let page_size = clamp_page_size(params.page_size) as usize;
        let tasks = self.tasks.lock().await;

        let mut matching: Vec<&Task> = tasks
            .iter()
            .filter(|t| t.deleted_at.is_none() && t.workspace_id == params.workspace_id)
            .filter(|t| params.project_id.as_ref().map_or(true, |p| &t.project_id == p))
            .filter(|t| params.status.map_or(true, |s| t.status == s))
            .filter(|t| params.priority.map_or(true, |p| t.priority == p))
            .filter(|t| {
                params
                    .assigned_to
                    .as_ref()
                    .map_or(true, |a| t.assigned_to.as_ref() == Some(a))
            })
            .collect();
        let total_count = matching.len() as u64;
        matching.sort_by_key(|t| sort_key(t));

        if let Some(token) = params.page_token.as_deref().filter(|t| !t.is_empty()) {
            let cursor_id = Uuid::parse_str(token)
                .map_err(|_| Error::invalid(format!("invalid page token: {}", token)))?;
            let cursor = tasks
                .iter()
                .find(|t| t.id == cursor_id)
                .ok_or_else(|| Error::invalid(format!("unknown page token: {}", token)))?;
            let cursor_key = sort_key(cursor);
            matching.retain(|t| sort_key(t) > cursor_key);
        }

        let has_more = matching.len() > page_size;
        matching.truncate(page_size);
        let next_page_token = if has_more {
            matching.last().map(|t| t.id.to_string())
        } else {
            None
        };

        Ok(TaskList {
            tasks: matching.into_iter().cloned().collect(),
            next_page_token,
            total_count,
        })
    }

    async fn update(&self, params: UpdateTaskParams) -> Result<Task> {
        let mut tasks = self.tasks.lock().await;
        let task = tasks
            .iter_mut()
            .find(|t| t.id == params.id && t.deleted_at.is_none())
            .ok_or_else(|| Error::not_found(format!("task {}", params.id)))?;
        task.title = params.title;
        task.description = params.description;
        task.status = params.status;
        task.priority = params.priority;
        task.assigned_to = params.assigned_to;
        task.due_date = params.due_date;
        task.metadata = params.metadata.unwrap_or_else(|| serde_json::json!({}));
        task.updated_at = Utc::now();
        Ok(task.clone())
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        let mut tasks = self.tasks.lock().await;
        let task = tasks
            .iter_mut()
            .find(|t| t.id == id && t.deleted_at.is_none())
            .ok_or_else(|| Error::not_found(format!("task {}", id)))?;
        let now = Utc::now();
        task.deleted_at = Some(now);
        task.updated_at = now;
        Ok(())
    }
}

struct QueueRow {
    notification: Notification,
    locked_until: Option<DateTime<Utc>>,
}

impl QueueRow {
    fn claimable(&self, now: DateTime<Utc>) -> bool {
        self.notification.is_due(now) && self.locked_until.map_or(true, |until| until <= now)
    }
}

#[derive(Default)]
struct Queue {
    rows: Vec<QueueRow>,
    next_id: i64,
}

pub struct MemoryNotificationStore {
    queue: Mutex<Queue>,
    options: QueueOptions,
}

impl Default for MemoryNotificationStore {
    fn default() -> Self {
        Self::new(QueueOptions::default())
    }
}

impl MemoryNotificationStore {
    pub fn new(options: QueueOptions) -> Self {
        MemoryNotificationStore {
            queue: Mutex::new(Queue::default()),
            options,
        }
    }

    /// Snapshot of a row regardless of status.
    pub async fn get(&self, id: i64) -> Option<Notification> {
        let queue = self.queue.lock().await;
        queue
            .rows
            .iter()
            .find(|r| r.notification.id == id)
            .map(|r| r.notification.clone())
    }

    /// Snapshot of every row in id order.
    pub async fn all(&self) -> Vec<Notification> {
        let queue = self.queue.lock().await;
        queue.rows.iter().map(|r| r.notification.clone()).collect()
    }

    /// Move a row's retry gate, e.g. to make a backed-off row due again.
    pub async fn set_next_retry_at(&self, id: i64, at: Option<DateTime<Utc>>) -> Result<()> {
        let mut queue = self.queue.lock().await;
        let row = queue
            .rows
            .iter_mut()
            .find(|r| r.notification.id == id)
            .ok_or_else(|| Error::not_found(format!("notification {}", id)))?;
        row.notification.next_retry_at = at;
        Ok(())
    }
}

#[async_trait]
impl NotificationStore for MemoryNotificationStore {
    async fn create(&self, params: CreateNotificationParams) -> Result<Notification> {
        let mut queue = self.queue.lock().await;
        queue.next_id += 1;
        let notification = Notification {
            id: queue.next_id,
            workspace_id: params.workspace_id,
            event_type: params.event_type,
            payload: params.payload,
            status: NotificationStatus::Pending,
            retry_count: 0,
            max_retries: self.options.max_retries,
            next_retry_at: None,
            last_error: String::new(),
            created_at: Utc::now(),
            processed_at: None,
        };
        queue.rows.push(QueueRow {
            notification: notification.clone(),
            locked_until: None,
        });
        Ok(notification)
    }

    async fn list(&self, params: ListNotificationsParams) -> Result<NotificationList> {
        let page_size = clamp_page_size(params.page_size);
        let offset = params.offset()?;
        let queue = self.queue.lock().await;

        let mut matching: Vec<&Notification> = queue
            .rows
            .iter()
            .map(|r| &r.notification)
            .filter(|n| n.workspace_id == params.workspace_id)
            .filter(|n| params.status.map_or(true, |s| n.status == s))
            .collect();
        matching.sort_by_key(|n| Reverse((n.created_at, n.id)));
        let total_count = matching.len() as u64;

        let notifications = matching
            .into_iter()
            .skip(offset as usize)
            .take(page_size as usize)
            .cloned()
            .collect();

        Ok(NotificationList {
            notifications,
            next_page_token: next_offset_token(offset, page_size, total_count),
            total_count,
        })
    }

    async fn fetch_pending(&self, limit: usize) -> Result<Vec<Notification>> {
        let now = Utc::now();
        let lease_until = now + self.options.lease;
        let mut queue = self.queue.lock().await;

        let mut due: Vec<usize> = queue
            .rows
            .iter()
            .enumerate()
            .filter(|(_, r)| r.claimable(now))
            .map(|(i, _)| i)
            .collect();
        due.sort_by_key(|&i| {
            let n = &queue.rows[i].notification;
            (n.created_at, n.id)
        });
        due.truncate(limit);

        let mut claimed = Vec::with_capacity(due.len());
        for i in due {
            let row = &mut queue.rows[i];
            row.locked_until = Some(lease_until);
            claimed.push(row.notification.clone());
        }
        Ok(claimed)
    }

    async fn mark_processed(&self, id: i64) -> Result<Notification> {
        let mut queue = self.queue.lock().await;
        let row = queue
            .rows
            .iter_mut()
            .find(|r| r.notification.id == id)
            .ok_or_else(|| Error::not_found(format!("notification {}", id)))?;
        row.notification.status = NotificationStatus::Processed;
        row.notification.processed_at = Some(Utc::now());
        row.locked_until = None;
        Ok(row.notification.clone())
    }

    async fn mark_failed(&self, id: i64, error_message: &str) -> Result<()> {
        let now = Utc::now();
        let mut queue = self.queue.lock().await;
        let row = queue
            .rows
            .iter_mut()
            .find(|r| r.notification.id == id)
            .ok_or_else(|| Error::not_found(format!("notification {}", id)))?;

        let n = &mut row.notification;
        let delay = backoff_delay(n.retry_count);
        n.retry_count += 1;
        n.last_error = error_message.to_string();
        if n.max_retries > 0 && n.retry_count >= n.max_retries {
            n.status = NotificationStatus::DeadLetter;
            n.next_retry_at = None;
        } else {
            n.status = NotificationStatus::Failed;
            n.next_retry_at = Some(now + delay);
        }
        row.locked_until = None;
        Ok(())
    }
}
