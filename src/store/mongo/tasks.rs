use async_trait::async_trait;
use chrono::Utc;
use futures::stream::TryStreamExt;
use log::debug;
use mongodb::bson::{doc, oid::ObjectId, to_bson, DateTime as BsonDateTime, Document};
use mongodb::options::ReturnDocument;
use mongodb::{Collection, Database};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{from_bson_date, to_bson_date, TASKS_COLLECTION};
use crate::error::{Error, Result};
use crate::models::{
    clamp_page_size, CreateTaskParams, ListTasksParams, Task, TaskList, TaskPriority, TaskStatus,
    UpdateTaskParams,
};
use crate::store::TaskStore;

/// Stored shape of a task.
#[derive(Debug, Serialize, Deserialize)]
struct TaskDocument {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    id: Option<ObjectId>,
    task_id: String,
    workspace_id: String,
    project_id: String,
    title: String,
    #[serde(default)]
    description: String,
    status: TaskStatus,
    priority: TaskPriority,
    assigned_to: Option<String>,
    due_date: Option<BsonDateTime>,
    #[serde(default)]
    metadata: serde_json::Value,
    created_at: BsonDateTime,
    updated_at: BsonDateTime,
    deleted_at: Option<BsonDateTime>,
}

impl TryFrom<TaskDocument> for Task {
    type Error = Error;

    fn try_from(d: TaskDocument) -> Result<Self> {
        let id = Uuid::parse_str(&d.task_id)
            .map_err(|e| Error::Internal(format!("stored task id {}: {}", d.task_id, e)))?;
        Ok(Task {
            id,
            workspace_id: d.workspace_id,
            project_id: d.project_id,
            title: d.title,
            description: d.description,
            status: d.status,
            priority: d.priority,
            assigned_to: d.assigned_to,
            due_date: d.due_date.map(from_bson_date),
            metadata: d.metadata,
            created_at: from_bson_date(d.created_at),
            updated_at: from_bson_date(d.updated_at),
            deleted_at: d.deleted_at.map(from_bson_date),
        })
    }
}

pub struct MongoTaskStore {
    tasks: Collection<TaskDocument>,
}

impl MongoTaskStore {
    pub fn new(db: &Database) -> Self {
        MongoTaskStore {
            tasks: db.collection::<TaskDocument>(TASKS_COLLECTION),
        }
    }

    fn list_filter(params: &ListTasksParams) -> Document {
        let mut filter = doc! {
            "workspace_id": &params.workspace_id,
            "deleted_at": null,
        };
        if let Some(project_id) = &params.project_id {
            filter.insert("project_id", project_id);
        }
        if let Some(status) = params.status {
            filter.insert("status", status.as_str());
        }
        if let Some(priority) = params.priority {
            filter.insert("priority", priority.as_str());
        }
        if let Some(assigned_to) = &params.assigned_to {
            filter.insert("assigned_to", assigned_to);
        }
        filter
    }
}

#[async_trait]
impl TaskStore for MongoTaskStore {
    async fn create(&self, params: CreateTaskParams) -> Result<Task> {
        let now = BsonDateTime::now();
        let new_task = TaskDocument {
            id: None,
            task_id: Uuid::new_v4().to_string(),
            workspace_id: params.workspace_id,
            project_id: params.project_id,
            title: params.title,
            description: params.description,
            status: TaskStatus::default(),
            priority: params.priority.unwrap_or_default(),
            assigned_to: params.assigned_to,
            due_date: params.due_date.map(to_bson_date),
            metadata: params.metadata.unwrap_or_else(|| serde_json::json!({})),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        self.tasks.insert_one(&new_task).await?;
        debug!("Task created: {}", new_task.task_id);
        new_task.try_into()
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Task> {
        let filter = doc! { "task_id": id.to_string(), "deleted_at": null };
        match self.tasks.find_one(filter).await? {
            Some(task) => task.try_into(),
            None => Err(Error::not_found(format!("task {}", id))),
        }
    }

    async fn list(&self, params: ListTasksParams) -> Result<TaskList> {
        let page_size = clamp_page_size(params.page_size);
        let mut filter = Self::list_filter(&params);
        let total_count = self.tasks.count_documents(filter.clone()).await?;

        if let Some(token) = params.page_token.as_deref().filter(|t| !t.is_empty()) {
            let cursor_id = Uuid::parse_str(token)
                .map_err(|_| Error::invalid(format!("invalid page token: {}", token)))?;
            let cursor = self
                .tasks
                .find_one(doc! { "task_id": cursor_id.to_string() })
                .await?
                .ok_or_else(|| Error::invalid(format!("unknown page token: {}", token)))?;
            filter.insert(
                "$or",
                vec![
                    doc! { "created_at": { "$lt": cursor.created_at } },
                    doc! {
                        "created_at": cursor.created_at,
                        "task_id": { "$lt": &cursor.task_id },
                    },
                ],
            );
        }

        let mut docs: Vec<TaskDocument> = self
            .tasks
            .find(filter)
            .sort(doc! { "created_at": -1, "task_id": -1 })
            .limit(i64::from(page_size) + 1)
            .await?
            .try_collect()
            .await?;

        let has_more = docs.len() > page_size as usize;
        docs.truncate(page_size as usize);
        let next_page_token = if has_more {
            docs.last().map(|d| d.task_id.clone())
        } else {
            None
        };

        let tasks = docs
            .into_iter()
            .map(Task::try_from)
            .collect::<Result<Vec<_>>>()?;
        Ok(TaskList {
            tasks,
            next_page_token,
            total_count,
        })
    }

    async fn update(&self, params: UpdateTaskParams) -> Result<Task> {
        let metadata = params.metadata.unwrap_or_else(|| serde_json::json!({}));
        let update_doc = doc! {
            "title": &params.title,
            "description": &params.description,
            "status": params.status.as_str(),
            "priority": params.priority.as_str(),
            "assigned_to": params.assigned_to.clone(),
            "due_date": params.due_date.map(to_bson_date),
            "metadata": to_bson(&metadata)?,
            "updated_at": to_bson_date(Utc::now()),
        };
        let updated = self
            .tasks
            .find_one_and_update(
                doc! { "task_id": params.id.to_string(), "deleted_at": null },
                doc! { "$set": update_doc },
            )
            .return_document(ReturnDocument::After)
            .await?;
        match updated {
            Some(task) => task.try_into(),
            None => Err(Error::not_found(format!("task {}", params.id))),
        }
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        let now = BsonDateTime::now();
        let res = self
            .tasks
            .update_one(
                doc! { "task_id": id.to_string(), "deleted_at": null },
                doc! { "$set": { "deleted_at": now, "updated_at": now } },
            )
            .await?;
        if res.matched_count == 0 {
            return Err(Error::not_found(format!("task {}", id)));
        }
        debug!("Task soft-deleted: {}", id);
        Ok(())
    }
}
