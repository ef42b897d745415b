//! Bounded, order-preserving task queue that gates the processing stage of
//! the dispatcher.

pub mod task_queue;

pub use task_queue::{is_task_flushed, QueueError, QueueSlot, TaskHandle, TaskQueue};
