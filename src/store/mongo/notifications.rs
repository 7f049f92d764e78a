use async_trait::async_trait;
use futures::stream::TryStreamExt;
use log::debug;
use mongodb::bson::{doc, oid::ObjectId, DateTime as BsonDateTime, Document};
use mongodb::options::ReturnDocument;
use mongodb::{Collection, Database};
use serde::{Deserialize, Serialize};

use super::{from_bson_date, COUNTERS_COLLECTION, NOTIFICATIONS_COLLECTION};
use crate::error::{Error, Result};
use crate::models::{
    clamp_page_size, next_offset_token, CreateNotificationParams, ListNotificationsParams,
    Notification, NotificationList, NotificationStatus,
};
use crate::store::{NotificationStore, QueueOptions};

/// Stored shape of a queue row. `locked_until` is the claim lease and never
/// leaves the store.
#[derive(Debug, Serialize, Deserialize)]
struct NotificationDocument {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    oid: Option<ObjectId>,
    id: i64,
    workspace_id: String,
    event_type: String,
    #[serde(default)]
    payload: serde_json::Value,
    status: NotificationStatus,
    retry_count: i32,
    max_retries: i32,
    next_retry_at: Option<BsonDateTime>,
    #[serde(default)]
    last_error: String,
    created_at: BsonDateTime,
    processed_at: Option<BsonDateTime>,
    #[serde(default)]
    locked_until: Option<BsonDateTime>,
}

impl From<NotificationDocument> for Notification {
    fn from(d: NotificationDocument) -> Self {
        Notification {
            id: d.id,
            workspace_id: d.workspace_id,
            event_type: d.event_type,
            payload: d.payload,
            status: d.status,
            retry_count: d.retry_count,
            max_retries: d.max_retries,
            next_retry_at: d.next_retry_at.map(from_bson_date),
            last_error: d.last_error,
            created_at: from_bson_date(d.created_at),
            processed_at: d.processed_at.map(from_bson_date),
        }
    }
}

pub struct MongoNotificationStore {
    queue: Collection<NotificationDocument>,
    counters: Collection<Document>,
    options: QueueOptions,
}

impl MongoNotificationStore {
    pub fn new(db: &Database, options: QueueOptions) -> Self {
        MongoNotificationStore {
            queue: db.collection::<NotificationDocument>(NOTIFICATIONS_COLLECTION),
            counters: db.collection::<Document>(COUNTERS_COLLECTION),
            options,
        }
    }

    /// Next value of the queue's id sequence.
    async fn next_id(&self) -> Result<i64> {
        let counter = self
            .counters
            .find_one_and_update(
                doc! { "_id": NOTIFICATIONS_COLLECTION },
                doc! { "$inc": { "seq": 1_i64 } },
            )
            .upsert(true)
            .return_document(ReturnDocument::After)
            .await?
            .ok_or_else(|| Error::Internal("id sequence upsert returned nothing".into()))?;
        counter
            .get_i64("seq")
            .map_err(|e| Error::Internal(format!("id sequence: {}", e)))
    }

    /// Rows that are due and not leased by another claimer. Both gates are
    /// compared against the server clock, the same clock `mark_failed` uses to
    /// schedule retries.
    fn claim_filter() -> Document {
        doc! {
            "status": {
                "$in": [
                    NotificationStatus::Pending.as_str(),
                    NotificationStatus::Failed.as_str(),
                ]
            },
            "$expr": {
                "$and": [
                    { "$lte": [ { "$ifNull": [ "$next_retry_at", "$$NOW" ] }, "$$NOW" ] },
                    { "$lte": [ { "$ifNull": [ "$locked_until", "$$NOW" ] }, "$$NOW" ] },
                ]
            },
        }
    }

    /// Stamp a fresh lease measured from the server clock.
    fn lease_pipeline(lease_millis: i64) -> Vec<Document> {
        vec![doc! {
            "$set": { "locked_until": { "$add": [ "$$NOW", lease_millis ] } }
        }]
    }

    /// Server-side failure transition. Field references in a single `$set`
    /// stage read the pre-update values, so `$retry_count` is the old count.
    fn mark_failed_pipeline(error_message: &str) -> Vec<Document> {
        let exhausted = doc! {
            "$and": [
                { "$gt": [ "$max_retries", 0 ] },
                { "$gte": [ { "$add": [ "$retry_count", 1 ] }, "$max_retries" ] },
            ]
        };
        let backoff_millis = doc! {
            "$multiply": [ 1000, { "$pow": [ 2, { "$add": [ "$retry_count", 1 ] } ] } ]
        };
        vec![doc! {
            "$set": {
                "status": {
                    "$cond": [
                        exhausted.clone(),
                        NotificationStatus::DeadLetter.as_str(),
                        NotificationStatus::Failed.as_str(),
                    ]
                },
                "next_retry_at": {
                    "$cond": [ exhausted, null, { "$add": [ "$$NOW", backoff_millis ] } ]
                },
                "retry_count": { "$add": [ "$retry_count", 1 ] },
                "last_error": { "$literal": error_message },
                "locked_until": null,
            }
        }]
    }
}

#[async_trait]
impl NotificationStore for MongoNotificationStore {
    async fn create(&self, params: CreateNotificationParams) -> Result<Notification> {
        let row = NotificationDocument {
            oid: None,
            id: self.next_id().await?,
            workspace_id: params.workspace_id,
            event_type: params.event_type,
            payload: params.payload,
            status: NotificationStatus::Pending,
            retry_count: 0,
            max_retries: self.options.max_retries,
            next_retry_at: None,
            last_error: String::new(),
            created_at: BsonDateTime::now(),
            processed_at: None,
            locked_until: None,
        };
        self.queue.insert_one(&row).await?;
        debug!("Notification {} enqueued ({})", row.id, row.event_type);
        Ok(row.into())
    }

    async fn list(&self, params: ListNotificationsParams) -> Result<NotificationList> {
        let page_size = clamp_page_size(params.page_size);
        let offset = params.offset()?;

        let mut filter = doc! { "workspace_id": &params.workspace_id };
        if let Some(status) = params.status {
            filter.insert("status", status.as_str());
        }
        let total_count = self.queue.count_documents(filter.clone()).await?;

        let rows: Vec<NotificationDocument> = self
            .queue
            .find(filter)
            .sort(doc! { "created_at": -1, "id": -1 })
            .skip(offset)
            .limit(i64::from(page_size))
            .await?
            .try_collect()
            .await?;

        Ok(NotificationList {
            notifications: rows.into_iter().map(Notification::from).collect(),
            next_page_token: next_offset_token(offset, page_size, total_count),
            total_count,
        })
    }

    async fn fetch_pending(&self, limit: usize) -> Result<Vec<Notification>> {
        let filter = Self::claim_filter();
        let lease = Self::lease_pipeline(self.options.lease.num_milliseconds());

        // Each findOneAndUpdate is atomic on its document: once a row carries
        // a live lease it no longer matches the filter for anyone else.
        let mut claimed = Vec::with_capacity(limit);
        for _ in 0..limit {
            let row = self
                .queue
                .find_one_and_update(filter.clone(), lease.clone())
                .sort(doc! { "created_at": 1, "id": 1 })
                .return_document(ReturnDocument::After)
                .await?;
            match row {
                Some(row) => claimed.push(Notification::from(row)),
                None => break,
            }
        }
        Ok(claimed)
    }

    async fn mark_processed(&self, id: i64) -> Result<Notification> {
        let updated = self
            .queue
            .find_one_and_update(
                doc! { "id": id },
                vec![doc! {
                    "$set": {
                        "status": NotificationStatus::Processed.as_str(),
                        "processed_at": "$$NOW",
                        "locked_until": null,
                    }
                }],
            )
            .return_document(ReturnDocument::After)
            .await?;
        updated
            .map(Notification::from)
            .ok_or_else(|| Error::not_found(format!("notification {}", id)))
    }

    async fn mark_failed(&self, id: i64, error_message: &str) -> Result<()> {
        let res = self
            .queue
            .update_one(doc! { "id": id }, Self::mark_failed_pipeline(error_message))
            .await?;
        if res.matched_count == 0 {
            return Err(Error::not_found(format!("notification {}", id)));
        }
        Ok(())
    }
}
