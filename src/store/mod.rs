//! Persistence seams consumed by the services and the worker.
//!
//! Two backends implement both traits: [`mongo`] for production and
//! [`memory`] for tests and local runs. They share one contract:
//!
//! - tasks are soft-deleted, and a soft-deleted task is `NotFound` everywhere;
//! - task listings are ordered `created_at desc, id desc` and paginated by the
//!   id of the last task seen;
//! - notification listings are ordered newest first and paginated by offset;
//! - `fetch_pending` claims rows exclusively: a row claimed by one caller is
//!   skipped by every other caller until it is marked or its lease expires.

pub mod memory;
pub mod mongo;
#[cfg(test)]
pub(crate) mod test_support;

use async_trait::async_trait;
use chrono::Duration;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{
    CreateNotificationParams, CreateTaskParams, ListNotificationsParams, ListTasksParams,
    Notification, NotificationList, Task, TaskList, UpdateTaskParams,
};

pub use memory::{MemoryNotificationStore, MemoryTaskStore};
pub use mongo::{MongoNotificationStore, MongoTaskStore};

#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn create(&self, params: CreateTaskParams) -> Result<Task>;
    async fn get_by_id(&self, id: Uuid) -> Result<Task>;
    async fn list(&self, params: ListTasksParams) -> Result<TaskList>;
    async fn update(&self, params: UpdateTaskParams) -> Result<Task>;
    /// Soft delete.
    async fn delete(&self, id: Uuid) -> Result<()>;
}

#[async_trait]
pub trait NotificationStore: Send + Sync {
    async fn create(&self, params: CreateNotificationParams) -> Result<Notification>;
    async fn list(&self, params: ListNotificationsParams) -> Result<NotificationList>;
    /// Claim up to `limit` due rows, oldest first.
    async fn fetch_pending(&self, limit: usize) -> Result<Vec<Notification>>;
    async fn mark_processed(&self, id: i64) -> Result<Notification>;
    /// Record a failed delivery and schedule the next attempt.
    async fn mark_failed(&self, id: i64, error_message: &str) -> Result<()>;
}

/// Queue behaviour shared by both notification backends.
#[derive(Debug, Clone, Copy)]
pub struct QueueOptions {
    /// Retry ceiling stamped on new rows.
    pub max_retries: i32,
    /// How long a claim excludes other claimers.
    pub lease: Duration,
}

impl Default for QueueOptions {
    fn default() -> Self {
        QueueOptions {
            max_retries: crate::models::DEFAULT_MAX_RETRIES,
            lease: Duration::seconds(30),
        }
    }
}
