use std::sync::Arc;

use crate::config::Config;
use crate::db::MongoDB;
use crate::service::{BestEffortNotifier, ImportService, TaskService};
use crate::store::{
    MemoryNotificationStore, MemoryTaskStore, MongoNotificationStore, MongoTaskStore,
    NotificationStore, TaskStore,
};
use crate::worker::{NotificationProcessor, SimulatedDelivery};

/// Everything the process shares: both stores and the services built on them.
#[derive(Clone)]
pub struct AppState {
    pub tasks: Arc<dyn TaskStore>,
    pub notifications: Arc<dyn NotificationStore>,
    pub task_service: Arc<TaskService>,
    pub import_service: Arc<ImportService>,
    pub config: Config,
}

impl AppState {
    pub fn new(
        tasks: Arc<dyn TaskStore>,
        notifications: Arc<dyn NotificationStore>,
        config: Config,
    ) -> Self {
        let notifier = BestEffortNotifier::new(notifications.clone());
        AppState {
            task_service: Arc::new(TaskService::new(tasks.clone(), notifier.clone())),
            import_service: Arc::new(ImportService::new(tasks.clone(), notifier, config.import)),
            tasks,
            notifications,
            config,
        }
    }

    pub fn with_mongo(mongodb: &MongoDB, config: Config) -> Self {
        let tasks = Arc::new(MongoTaskStore::new(&mongodb.db));
        let notifications = Arc::new(MongoNotificationStore::new(&mongodb.db, config.queue));
        Self::new(tasks, notifications, config)
    }

    pub fn in_memory(config: Config) -> Self {
        let notifications = Arc::new(MemoryNotificationStore::new(config.queue));
        Self::new(Arc::new(MemoryTaskStore::new()), notifications, config)
    }

    /// A processor draining this state's queue with simulated delivery.
    pub fn notification_processor(&self) -> NotificationProcessor {
        NotificationProcessor::new(
            self.notifications.clone(),
            Arc::new(SimulatedDelivery::default()),
            self.config.processor,
        )
    }
}
