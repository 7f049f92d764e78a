pub mod import;
pub mod notifier;
pub mod rate_limit;
pub mod task;

pub use import::{ImportConfig, ImportService};
pub use notifier::{BestEffortNotifier, EnqueueOutcome};
pub use rate_limit::RateLimiter;
pub use task::TaskService;
