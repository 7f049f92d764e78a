mod notification;
mod task;

pub use notification::*;
pub use task::*;
