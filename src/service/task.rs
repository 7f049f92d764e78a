use std::sync::Arc;

use log::debug;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::{
    CreateNotificationParams, CreateTaskParams, ListTasksParams, Task, TaskList,
    UpdateTaskParams, EVENT_TASK_CREATED,
};
use crate::service::notifier::BestEffortNotifier;
use crate::store::TaskStore;

/// Validated task CRUD. Single creates emit a best-effort `task.created`.
pub struct TaskService {
    tasks: Arc<dyn TaskStore>,
    notifier: BestEffortNotifier,
}

pub(crate) fn require(value: &str, field: &str) -> Result<()> {
    if value.trim().is_empty() {
        Err(Error::invalid(format!("{} is required", field)))
    } else {
        Ok(())
    }
}

impl TaskService {
    pub fn new(tasks: Arc<dyn TaskStore>, notifier: BestEffortNotifier) -> Self {
        TaskService { tasks, notifier }
    }

    pub async fn create(&self, params: CreateTaskParams) -> Result<Task> {
        require(&params.title, "title")?;
        require(&params.workspace_id, "workspace_id")?;
        require(&params.project_id, "project_id")?;

        debug!("creating task title={} project_id={}", params.title, params.project_id);
        let task = self.tasks.create(params).await?;
        self.notifier
            .notify(CreateNotificationParams::for_task(EVENT_TASK_CREATED, &task))
            .await;
        Ok(task)
    }

    pub async fn get(&self, id: Uuid) -> Result<Task> {
        self.tasks.get_by_id(id).await
    }

    pub async fn list(&self, params: ListTasksParams) -> Result<TaskList> {
        require(&params.workspace_id, "workspace_id")?;
        self.tasks.list(params).await
    }

    pub async fn update(&self, params: UpdateTaskParams) -> Result<Task> {
        require(&params.title, "title")?;
        self.tasks.update(params).await
    }

    pub async fn delete(&self, id: Uuid) -> Result<()> {
        self.tasks.delete(id).await
    }
}
