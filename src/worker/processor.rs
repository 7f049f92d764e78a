//! Notification queue drain loop.
//!
//! Each tick claims a batch of due rows, delivers them one by one in claim
//! order and retires each as processed or failed. Store errors never end the
//! loop; only [`NotificationProcessor::stop`] does, and only between batches.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, error, info};
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::models::Notification;
use crate::store::NotificationStore;

/// The side effect a notification stands for (email, push, webhook...).
#[async_trait]
pub trait Deliverer: Send + Sync {
    async fn deliver(&self, notification: &Notification) -> std::result::Result<(), String>;
}

/// Stand-in for a real channel: waits a fixed delay and succeeds.
pub struct SimulatedDelivery {
    delay: Duration,
}

impl SimulatedDelivery {
    pub fn new(delay: Duration) -> Self {
        SimulatedDelivery { delay }
    }
}

impl Default for SimulatedDelivery {
    fn default() -> Self {
        SimulatedDelivery::new(Duration::from_millis(50))
    }
}

#[async_trait]
impl Deliverer for SimulatedDelivery {
    async fn deliver(&self, _notification: &Notification) -> std::result::Result<(), String> {
        tokio::time::sleep(self.delay).await;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessorConfig {
    /// Rows claimed per tick.
    pub batch_size: usize,
    /// Sleep after an empty claim or a claim error.
    pub poll_interval: Duration,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        ProcessorConfig {
            batch_size: 10,
            poll_interval: Duration::from_secs(1),
        }
    }
}

pub struct NotificationProcessor {
    store: Arc<dyn NotificationStore>,
    deliverer: Arc<dyn Deliverer>,
    config: ProcessorConfig,
    cancel: CancellationToken,
}

impl NotificationProcessor {
    pub fn new(
        store: Arc<dyn NotificationStore>,
        deliverer: Arc<dyn Deliverer>,
        config: ProcessorConfig,
    ) -> Self {
        NotificationProcessor {
            store,
            deliverer,
            config: ProcessorConfig {
                batch_size: config.batch_size.max(1),
                ..config
            },
            cancel: CancellationToken::new(),
        }
    }

    /// Ask the loop to exit once the current batch is done. Safe to call
    /// from any task, any number of times.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Token that stops this processor when cancelled, for shutdown hooks
    /// that do not own the processor.
    pub fn stop_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Run until stopped.
    pub async fn run(&self) {
        info!(
            "notification processor started batch_size={}",
            self.config.batch_size
        );
        while !self.cancel.is_cancelled() {
            match self.run_once().await {
                Ok(0) => {
                    debug!("no pending notifications");
                    self.idle().await;
                }
                Ok(_) => {}
                Err(e) => {
                    error!("notification processor error: {}", e);
                    self.idle().await;
                }
            }
        }
        info!("notification processor stopped");
    }

    /// Sleep one poll interval, waking early on stop.
    async fn idle(&self) {
        tokio::select! {
            _ = self.cancel.cancelled() => {}
            _ = tokio::time::sleep(self.config.poll_interval) => {}
        }
    }

    /// Claim one batch and settle every row in it. Returns the number of rows
    /// claimed; only the claim itself can fail.
    pub async fn run_once(&self) -> Result<usize> {
        let batch = self.store.fetch_pending(self.config.batch_size).await?;
        if batch.is_empty() {
            return Ok(0);
        }

        info!("processing notification batch count={}", batch.len());
        for notification in &batch {
            self.settle(notification).await;
        }
        Ok(batch.len())
    }

    async fn settle(&self, n: &Notification) {
        info!(
            "sending notification id={} event_type={} workspace_id={} retry_count={}",
            n.id, n.event_type, n.workspace_id, n.retry_count
        );

        let failure = match self.deliverer.deliver(n).await {
            Ok(()) => match self.store.mark_processed(n.id).await {
                Ok(_) => {
                    info!("notification sent id={}", n.id);
                    return;
                }
                Err(e) => {
                    error!("failed to mark notification processed id={} error={}", n.id, e);
                    e.to_string()
                }
            },
            Err(message) => {
                error!("failed to deliver notification id={} error={}", n.id, message);
                message
            }
        };

        if let Err(e) = self.store.mark_failed(n.id, &failure).await {
            error!("failed to mark notification failed id={} error={}", n.id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chrono::Utc;
    use tokio::sync::{Mutex, Notify};
    use tokio::time::timeout;

    use super::*;
    use crate::error::Error;
    use crate::models::{
        CreateNotificationParams, ListNotificationsParams, NotificationList, NotificationStatus,
    };
    use crate::store::MemoryNotificationStore;

    fn event(i: usize) -> CreateNotificationParams {
        CreateNotificationParams {
            workspace_id: "ws-1".into(),
            event_type: "task.imported".into(),
            payload: serde_json::json!({ "task_id": format!("t-{}", i), "title": "x" }),
        }
    }

    async fn seeded(n: usize) -> Arc<MemoryNotificationStore> {
        let store = Arc::new(MemoryNotificationStore::default());
        for i in 0..n {
            store.create(event(i)).await.unwrap();
        }
        store
    }

    fn fast(batch_size: usize) -> ProcessorConfig {
        ProcessorConfig {
            batch_size,
            poll_interval: Duration::from_millis(10),
        }
    }

    /// Records delivered ids, optionally stalling or failing.
    #[derive(Default)]
    struct RecordingDelivery {
        delivered: Mutex<Vec<i64>>,
        delay: Option<Duration>,
        fail_with: Option<String>,
        started: Notify,
    }

    #[async_trait]
    impl Deliverer for RecordingDelivery {
        async fn deliver(&self, n: &Notification) -> std::result::Result<(), String> {
            self.started.notify_one();
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.delivered.lock().await.push(n.id);
            match &self.fail_with {
                Some(msg) => Err(msg.clone()),
                None => Ok(()),
            }
        }
    }

    /// Memory store whose claims fail a set number of times and whose
    /// `mark_failed` can be made to fail.
    struct FlakyStore {
        inner: MemoryNotificationStore,
        claim_failures: AtomicUsize,
        break_mark_failed: bool,
    }

    #[async_trait]
    impl NotificationStore for FlakyStore {
        async fn create(&self, params: CreateNotificationParams) -> Result<Notification> {
            self.inner.create(params).await
        }
        async fn list(&self, params: ListNotificationsParams) -> Result<NotificationList> {
            self.inner.list(params).await
        }
        async fn fetch_pending(&self, limit: usize) -> Result<Vec<Notification>> {
            let remaining = self.claim_failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.claim_failures.store(remaining - 1, Ordering::SeqCst);
                return Err(Error::Internal("connection reset".into()));
            }
            self.inner.fetch_pending(limit).await
        }
        async fn mark_processed(&self, id: i64) -> Result<Notification> {
            self.inner.mark_processed(id).await
        }
        async fn mark_failed(&self, id: i64, error_message: &str) -> Result<()> {
            if self.break_mark_failed {
                return Err(Error::Internal("write conflict".into()));
            }
            self.inner.mark_failed(id, error_message).await
        }
    }

    async fn wait_until_processed(store: &MemoryNotificationStore, expected: usize) {
        timeout(Duration::from_secs(5), async {
            loop {
                let done = store
                    .all()
                    .await
                    .iter()
                    .filter(|n| n.status == NotificationStatus::Processed)
                    .count();
                if done >= expected {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("rows were not processed in time");
    }

    #[tokio::test]
    async fn run_once_processes_a_batch_in_claim_order() {
        let store = seeded(3).await;
        let delivery = Arc::new(RecordingDelivery::default());
        let processor = NotificationProcessor::new(store.clone(), delivery.clone(), fast(10));

        assert_eq!(processor.run_once().await.unwrap(), 3);
        assert_eq!(*delivery.delivered.lock().await, vec![1, 2, 3]);
        for n in store.all().await {
            assert_eq!(n.status, NotificationStatus::Processed);
            assert!(n.processed_at.is_some());
        }
        assert_eq!(processor.run_once().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn delivery_failures_are_rescheduled() {
        let store = seeded(2).await;
        let delivery = Arc::new(RecordingDelivery {
            fail_with: Some("mailbox full".into()),
            ..Default::default()
        });
        let processor = NotificationProcessor::new(store.clone(), delivery, fast(10));

        assert_eq!(processor.run_once().await.unwrap(), 2);
        for n in store.all().await {
            assert_eq!(n.status, NotificationStatus::Failed);
            assert_eq!(n.retry_count, 1);
            assert_eq!(n.last_error, "mailbox full");
            assert!(n.next_retry_at.unwrap() > Utc::now());
        }
        // Backed off rows are not due yet.
        assert_eq!(processor.run_once().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn broken_mark_failed_does_not_stop_the_batch() {
        let store = Arc::new(FlakyStore {
            inner: MemoryNotificationStore::default(),
            claim_failures: AtomicUsize::new(0),
            break_mark_failed: true,
        });
        for i in 0..3 {
            store.create(event(i)).await.unwrap();
        }
        let delivery = Arc::new(RecordingDelivery {
            fail_with: Some("gateway down".into()),
            ..Default::default()
        });
        let processor = NotificationProcessor::new(store.clone(), delivery.clone(), fast(10));

        assert_eq!(processor.run_once().await.unwrap(), 3);
        assert_eq!(delivery.delivered.lock().await.len(), 3);
    }

    #[tokio::test]
    async fn claim_errors_back_off_and_recover() {
        let store = Arc::new(FlakyStore {
            inner: MemoryNotificationStore::default(),
            claim_failures: AtomicUsize::new(2),
            break_mark_failed: false,
        });
        store.create(event(0)).await.unwrap();
        let processor = Arc::new(NotificationProcessor::new(
            store.clone(),
            Arc::new(RecordingDelivery::default()),
            fast(10),
        ));

        let handle = tokio::spawn({
            let processor = processor.clone();
            async move { processor.run().await }
        });
        wait_until_processed(&store.inner, 1).await;
        processor.stop();
        timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
        assert_eq!(store.claim_failures.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn racing_processors_never_share_a_row() {
        let store = seeded(5).await;
        let delivery = Arc::new(RecordingDelivery {
            delay: Some(Duration::from_millis(10)),
            ..Default::default()
        });
        let a = Arc::new(NotificationProcessor::new(store.clone(), delivery.clone(), fast(2)));
        let b = Arc::new(NotificationProcessor::new(store.clone(), delivery.clone(), fast(2)));

        let handles = [a.clone(), b.clone()].map(|p| tokio::spawn(async move { p.run().await }));
        wait_until_processed(&store, 5).await;
        a.stop();
        b.stop();
        for handle in handles {
            timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
        }

        let delivered = delivery.delivered.lock().await.clone();
        let unique: HashSet<i64> = delivered.iter().copied().collect();
        assert_eq!(delivered.len(), 5, "delivered {:?}", delivered);
        assert_eq!(unique, (1..=5).collect::<HashSet<i64>>());
    }

    #[tokio::test]
    async fn stop_while_idle_returns_promptly() {
        let store = seeded(0).await;
        let processor = Arc::new(NotificationProcessor::new(
            store,
            Arc::new(RecordingDelivery::default()),
            ProcessorConfig {
                batch_size: 10,
                poll_interval: Duration::from_secs(60),
            },
        ));
        let handle = tokio::spawn({
            let processor = processor.clone();
            async move { processor.run().await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        processor.stop_token().cancel();
        timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
        assert!(processor.is_stopped());
    }

    #[tokio::test]
    async fn stop_mid_batch_finishes_the_batch() {
        let store = seeded(3).await;
        let delivery = Arc::new(RecordingDelivery {
            delay: Some(Duration::from_millis(30)),
            ..Default::default()
        });
        let processor = Arc::new(NotificationProcessor::new(
            store.clone(),
            delivery.clone(),
            fast(10),
        ));
        let handle = tokio::spawn({
            let processor = processor.clone();
            async move { processor.run().await }
        });

        delivery.started.notified().await;
        processor.stop();
        timeout(Duration::from_secs(2), handle).await.unwrap().unwrap();

        assert_eq!(delivery.delivered.lock().await.len(), 3);
        assert!(store
            .all()
            .await
            .iter()
            .all(|n| n.status == NotificationStatus::Processed));
    }

    #[tokio::test]
    async fn stopped_processor_does_not_claim() {
        let store = seeded(2).await;
        let processor = NotificationProcessor::new(
            store.clone(),
            Arc::new(RecordingDelivery::default()),
            fast(10),
        );
        processor.stop();
        processor.run().await;
        assert_eq!(store.fetch_pending(10).await.unwrap().len(), 2);
    }
}
