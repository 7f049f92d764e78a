//! Bulk task import.
//!
//! Rows are created concurrently under a semaphore (and optionally a rate
//! limiter). Each row lands in exactly one bucket of the [`ImportTally`]:
//! succeeded, or failed with its original index. A failing row never
//! affects its neighbours and nothing is retried here.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use log::{debug, error, info, warn};
use tokio::sync::Semaphore;
use tokio::task::{Id, JoinSet};

use crate::error::Result;
use crate::models::{
    CreateNotificationParams, CreateTaskParams, ImportError, ImportResult, TaskInput,
    EVENT_TASK_IMPORTED,
};
use crate::service::notifier::BestEffortNotifier;
use crate::service::rate_limit::RateLimiter;
use crate::service::task::require;
use crate::store::TaskStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportConfig {
    /// Maximum creates in flight at once.
    pub concurrency: usize,
    /// Creates per second; `None` leaves only the concurrency bound.
    pub rate_limit: Option<u32>,
}

impl Default for ImportConfig {
    fn default() -> Self {
        ImportConfig {
            concurrency: 10,
            rate_limit: Some(100),
        }
    }
}

/// Outcome of one row: `Err` carries the message reported for its index.
type RowOutcome = std::result::Result<(), String>;

/// Row outcomes, collected as the row tasks are joined.
#[derive(Default)]
struct ImportTally {
    succeeded: usize,
    failed: usize,
    errors: Vec<ImportError>,
}

impl ImportTally {
    fn record(&mut self, index: usize, outcome: RowOutcome) {
        match outcome {
            Ok(()) => self.succeeded += 1,
            Err(error) => {
                warn!("import row failed index={} error={}", index, error);
                self.failed += 1;
                self.errors.push(ImportError { index, error });
            }
        }
    }

    /// Join every row task. A task that never reports (cancelled or
    /// panicked outside the row guard) is counted as a failure of its row.
    async fn drain(
        &mut self,
        rows: &mut JoinSet<(usize, RowOutcome)>,
        index_of: &HashMap<Id, usize>,
    ) {
        while let Some(joined) = rows.join_next_with_id().await {
            match joined {
                Ok((_, (index, outcome))) => self.record(index, outcome),
                Err(e) => match index_of.get(&e.id()) {
                    Some(&index) => {
                        error!("import row task did not complete index={}: {}", index, e);
                        self.record(index, Err(format!("internal error: {}", e)));
                    }
                    None => error!("untracked import task did not complete: {}", e),
                },
            }
        }
    }

    fn finish(mut self, total: usize) -> ImportResult {
        self.errors.sort_by_key(|e| e.index);
        ImportResult {
            total,
            succeeded: self.succeeded,
            failed: self.failed,
            errors: self.errors,
        }
    }
}

pub struct ImportService {
    tasks: Arc<dyn TaskStore>,
    notifier: BestEffortNotifier,
    config: ImportConfig,
    limiter: Option<Arc<RateLimiter>>,
}

impl ImportService {
    pub fn new(tasks: Arc<dyn TaskStore>, notifier: BestEffortNotifier, config: ImportConfig) -> Self {
        let config = ImportConfig {
            concurrency: config.concurrency.max(1),
            ..config
        };
        let limiter = config
            .rate_limit
            .map(|per_second| Arc::new(RateLimiter::new(per_second, config.concurrency as u32)));
        ImportService {
            tasks,
            notifier,
            config,
            limiter,
        }
    }

    /// Create every row of `inputs` in `workspace_id`/`project_id`.
    ///
    /// Only blank identifiers fail the call as a whole, and they do so before
    /// any row is touched. Row failures are reported in the result, sorted by
    /// index.
    pub async fn bulk_import(
        &self,
        workspace_id: &str,
        project_id: &str,
        inputs: Vec<TaskInput>,
    ) -> Result<ImportResult> {
        require(workspace_id, "workspace_id")?;
        require(project_id, "project_id")?;

        let total = inputs.len();
        if total == 0 {
            return Ok(ImportResult::default());
        }

        info!(
            "starting bulk import workspace_id={} project_id={} total={} concurrency={}",
            workspace_id, project_id, total, self.config.concurrency
        );

        let permits = Arc::new(Semaphore::new(self.config.concurrency));
        let mut rows = JoinSet::new();
        let mut index_of = HashMap::with_capacity(total);

        for (index, input) in inputs.into_iter().enumerate() {
            let row = ImportRow {
                index,
                workspace_id: workspace_id.to_string(),
                project_id: project_id.to_string(),
                input,
                tasks: Arc::clone(&self.tasks),
                notifier: self.notifier.clone(),
                limiter: self.limiter.clone(),
            };
            let permits = Arc::clone(&permits);

            let handle = rows.spawn(async move {
                let _permit = match permits.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return (index, Err("import aborted".to_string())),
                };
                // A panicking row still has to be counted.
                match AssertUnwindSafe(row.run()).catch_unwind().await {
                    Ok(outcome) => (index, outcome),
                    Err(_) => {
                        error!("import row panicked index={}", index);
                        (index, Err("internal error: import row panicked".to_string()))
                    }
                }
            });
            index_of.insert(handle.id(), index);
        }

        let mut tally = ImportTally::default();
        tally.drain(&mut rows, &index_of).await;
        let result = tally.finish(total);

        info!(
            "bulk import completed total={} succeeded={} failed={}",
            result.total, result.succeeded, result.failed
        );
        Ok(result)
    }
}

/// One row of an import, owning everything it needs to run on its own task.
struct ImportRow {
    index: usize,
    workspace_id: String,
    project_id: String,
    input: TaskInput,
    tasks: Arc<dyn TaskStore>,
    notifier: BestEffortNotifier,
    limiter: Option<Arc<RateLimiter>>,
}

impl ImportRow {
    async fn run(self) -> RowOutcome {
        if let Some(limiter) = &self.limiter {
            limiter.acquire().await;
        }

        let params = CreateTaskParams::from_input(&self.workspace_id, &self.project_id, self.input)
            .map_err(|e| e.to_string())?;
        let task = self.tasks.create(params).await.map_err(|e| e.to_string())?;

        // Best effort: the row already succeeded.
        self.notifier
            .notify(CreateNotificationParams::for_task(EVENT_TASK_IMPORTED, &task))
            .await;
        debug!("imported row index={} task_id={}", self.index, task.id);
        Ok(())
    }
}
