pub mod processor;

pub use processor::{Deliverer, NotificationProcessor, ProcessorConfig, SimulatedDelivery};
