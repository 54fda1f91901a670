//! Checkpoint processing.
//!
//! A checkpoint is a batch of [`OperationUpdate`](crate::OperationUpdate)s
//! gated by a single-use token. The [`validator`] rejects malformed batches
//! up front; the [`processor`] applies the rest and tells an
//! [`ExecutionObserver`](crate::ExecutionObserver) what to schedule next.

pub mod processor;
pub mod validator;

pub use processor::{CheckpointOutput, CheckpointProcessor, NewExecutionState};
pub use validator::{MAX_DELAY_SECONDS, MAX_ERROR_PAYLOAD_SIZE_BYTES};
