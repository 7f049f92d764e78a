use std::sync::Arc;

use log::{debug, warn};

use crate::error::Error;
use crate::models::{CreateNotificationParams, Notification};
use crate::store::NotificationStore;

/// What happened to a fire-and-forget enqueue.
#[derive(Debug)]
pub enum EnqueueOutcome {
    Queued(Notification),
    /// The store refused the row. Already logged; the caller carries on.
    Dropped(Error),
}

impl EnqueueOutcome {
    pub fn is_queued(&self) -> bool {
        matches!(self, EnqueueOutcome::Queued(_))
    }
}

/// Enqueues domain events without ever failing the operation that emitted
/// them. Failures are logged at `warn` and reported back as
/// [`EnqueueOutcome::Dropped`]; nothing is retried.
#[derive(Clone)]
pub struct BestEffortNotifier {
    store: Arc<dyn NotificationStore>,
}

impl BestEffortNotifier {
    pub fn new(store: Arc<dyn NotificationStore>) -> Self {
        BestEffortNotifier { store }
    }

    pub async fn notify(&self, params: CreateNotificationParams) -> EnqueueOutcome {
        let event_type = params.event_type.clone();
        let workspace_id = params.workspace_id.clone();
        match self.store.create(params).await {
            Ok(notification) => {
                debug!(
                    "enqueued notification id={} event_type={} workspace_id={}",
                    notification.id, event_type, workspace_id
                );
                EnqueueOutcome::Queued(notification)
            }
            Err(e) => {
                warn!(
                    "dropping notification event_type={} workspace_id={} error={}",
                    event_type, workspace_id, e
                );
                EnqueueOutcome::Dropped(e)
            }
        }
    }
}
