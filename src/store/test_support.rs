//! Instrumented store doubles shared by unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::{
    CreateNotificationParams, CreateTaskParams, ListNotificationsParams, ListTasksParams,
    Notification, NotificationList, Task, TaskList, UpdateTaskParams,
};
use crate::store::{MemoryTaskStore, NotificationStore, TaskStore};

/// Notification store whose every call fails.
pub struct BrokenNotificationStore;

fn unavailable<T>() -> Result<T> {
    Err(Error::Internal("notification store unavailable".into()))
}

#[async_trait]
impl NotificationStore for BrokenNotificationStore {
    async fn create(&self, _params: CreateNotificationParams) -> Result<Notification> {
        unavailable()
    }
    async fn list(&self, _params: ListNotificationsParams) -> Result<NotificationList> {
        unavailable()
    }
    async fn fetch_pending(&self, _limit: usize) -> Result<Vec<Notification>> {
        unavailable()
    }
    async fn mark_processed(&self, _id: i64) -> Result<Notification> {
        unavailable()
    }
    async fn mark_failed(&self, _id: i64, _error_message: &str) -> Result<()> {
        unavailable()
    }
}

/// Task store that counts calls, tracks peak concurrency of `create`, can
/// stall each create (or selected titles) and rejects titles listed in
/// `reject_titles`.
#[derive(Default)]
pub struct InstrumentedTaskStore {
    pub inner: MemoryTaskStore,
    pub reject_titles: HashSet<String>,
    pub create_delay: Option<Duration>,
    pub title_delays: HashMap<String, Duration>,
    pub calls: AtomicUsize,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl InstrumentedTaskStore {
    pub fn rejecting(titles: &[&str]) -> Self {
        InstrumentedTaskStore {
            reject_titles: titles.iter().map(|t| t.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn slow(delay: Duration) -> Self {
        InstrumentedTaskStore {
            create_delay: Some(delay),
            ..Default::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.create_delay = Some(delay);
        self
    }

    /// Stall creates of `title` for `delay`, overriding `create_delay`.
    pub fn with_title_delay(mut self, title: &str, delay: Duration) -> Self {
        self.title_delays.insert(title.to_string(), delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn peak_concurrency(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TaskStore for InstrumentedTaskStore {
    async fn create(&self, params: CreateTaskParams) -> Result<Task> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = self.title_delays.get(&params.title).copied().or(self.create_delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let result = if self.reject_titles.contains(&params.title) {
            Err(Error::AlreadyExists(format!("task titled {}", params.title)))
        } else {
            self.inner.create(params).await
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Task> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.get_by_id(id).await
    }

    async fn list(&self, params: ListTasksParams) -> Result<TaskList> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.list(params).await
    }

    async fn update(&self, params: UpdateTaskParams) -> Result<Task> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.update(params).await
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.delete(id).await
    }
}
