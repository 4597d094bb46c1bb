//! Asynchronous worker runtime
//!
//! Drives the extraction, chunking, embedding, and upsert pipeline off
//! the broker queues with at-least-once delivery: messages are
//! acknowledged only after the task returns, tasks are idempotent via
//! the status gate and deterministic chunk ids, failures retry with
//! exponential backoff and dead-letter after three attempts, and a
//! periodic scanner re-queues documents stuck in `pending`.

pub mod processor;
pub mod runtime;
pub mod scanner;

pub use processor::{DocumentProcessor, ProcessDocumentArgs, ProcessError, TaskOutcome};
pub use runtime::{PollResult, WorkerRuntime};
pub use scanner::RetryScanner;
