pub mod broker;
pub mod store;
pub mod task;

pub use broker::{Broker, TaskBroker, WorkerInfo};
pub use store::{FjallQueue, QueueError};
pub use task::{DeadLetterTask, Lease, TaskEnvelope, TaskMessage};
