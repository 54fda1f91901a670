//! # Durable Execution Local Service
//!
//! An in-process implementation of the durable execution service, for running
//! and testing durable functions without any cloud infrastructure.
//!
//! ## Overview
//!
//! A durable function is invoked repeatedly. Each invocation receives the
//! operations checkpointed so far, replays the completed ones, checkpoints new
//! work through a [`DurableServiceClient`], and returns either a final outcome
//! or `PENDING` to suspend. This crate plays the service side of that loop:
//!
//! - **[`Executor`]**: starts executions, drives invocations, retries failed
//!   invocations and exposes the query API (details, state, history, listing).
//! - **[`CheckpointProcessor`]**: validates and applies checkpoint batches,
//!   enforcing the operation state machines.
//! - **[`Scheduler`]**: runs timers (waits, step retries, callback timeouts,
//!   re-invocations) on a dedicated worker thread, optionally skipping time so
//!   hour-long waits complete instantly in tests.
//! - **[`ExecutionStore`]**: persistence seam, with an in-memory backend.
//! - **[`Invoker`]**: how a function gets called; [`InProcessInvoker`] runs
//!   registered async handlers directly.
//!
//! ## Getting Started
//!
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use durable_execution_local::{
//!     Executor, ExecutorConfig, ExecutionStatus, HandlerRegistry, InMemoryExecutionStore,
//!     InProcessInvoker, InvocationOutput, Scheduler, SchedulerConfig,
//!     StartDurableExecutionInput,
//! };
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> durable_execution_local::ServiceResult<()> {
//! let scheduler = Scheduler::new(SchedulerConfig::default().with_time_skipping(true));
//! scheduler.start()?;
//!
//! let invoker = InProcessInvoker::new()
//!     .with_handler("greet", |_input| async { Ok(InvocationOutput::succeeded("\"hello\"")) });
//!
//! let executor = Executor::new(
//!     Arc::new(InMemoryExecutionStore::new()),
//!     scheduler.clone(),
//!     Arc::new(invoker),
//!     HandlerRegistry::new(),
//!     ExecutorConfig::default(),
//! );
//!
//! let started = executor
//!     .start_execution(StartDurableExecutionInput::new("greet", "run-1"))
//!     .await?;
//! assert!(executor.wait_until_complete(&started.execution_arn, Some(Duration::from_secs(5))).await?);
//!
//! let details = executor.get_execution_details(&started.execution_arn).await?;
//! assert_eq!(details.status, ExecutionStatus::Succeeded);
//! assert_eq!(details.result.as_deref(), Some("\"hello\""));
//!
//! scheduler.stop();
//! # Ok(())
//! # }
//! ```
//!
//! ## Writing Handlers
//!
//! A handler gets an [`InvocationInput`] carrying the execution arn, a fresh
//! checkpoint token and every operation recorded so far. It checkpoints new
//! operations through [`InvocationInput::client`] and returns
//! [`InvocationOutput::pending`] while anything it started is still running.
//! The executor re-invokes it whenever a wait elapses, a step retry becomes
//! ready, a callback is completed or a chained invoke finishes.

pub mod checkpoint;
pub mod config;
pub mod error;
pub mod execution;
pub mod executor;
pub mod history;
pub mod invoker;
pub mod observer;
pub mod operation;
pub mod registry;
pub mod scheduler;
pub mod store;
pub mod token;

// Re-export main types at crate root
pub use checkpoint::{CheckpointOutput, CheckpointProcessor, NewExecutionState};
pub use config::*;
pub use error::{ErrorObject, ServiceError, ServiceResult};
pub use execution::{
    ChainedParent, Execution, ExecutionResult, ExecutionStatus, StartDurableExecutionInput,
    StartDurableExecutionOutput,
};
pub use executor::{
    ExecutionDetailsOutput, ExecutionSummary, Executor, GetExecutionHistoryOutput,
    ListExecutionsOutput, ListExecutionsQuery, STOP_MESSAGE,
};
pub use history::HistoryEvent;
pub use invoker::{
    DurableServiceClient, GetExecutionStateOutput, InProcessInvoker, InvocationInput,
    InvocationOutput, InvocationStatus, Invoker,
};
pub use observer::ExecutionObserver;
pub use operation::{
    CallbackDetails, CallbackOptions, ChainedInvokeDetails, ChainedInvokeOptions, ContextDetails,
    ContextOptions, ExecutionDetails, Operation, OperationAction, OperationStatus, OperationType,
    OperationUpdate, StepDetails, StepOptions, WaitDetails, WaitOptions,
};
pub use registry::{ChainedTarget, HandlerRegistry};
pub use scheduler::{Event, Scheduler, TimerHandle};
pub use store::{ExecutionQuery, ExecutionStore, InMemoryExecutionStore};
pub use token::{CallbackToken, CheckpointToken};
