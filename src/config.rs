//! Configuration types for the local durable execution service.
//!
//! Both structs carry sensible defaults and `with_*` builder methods, so a
//! test usually only overrides the one knob it cares about:
//!
//! ```rust
//! use std::time::Duration;
//! use durable_execution_local::{ExecutorConfig, SchedulerConfig};
//!
//! let executor = ExecutorConfig::default()
//!     .with_max_consecutive_failed_attempts(2)
//!     .with_retry_backoff(Duration::from_millis(10));
//! assert_eq!(executor.max_consecutive_failed_attempts, 2);
//!
//! let scheduler = SchedulerConfig::default().with_time_skipping(true);
//! assert!(scheduler.time_skipping);
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default number of invocation retries before an execution is failed.
pub const DEFAULT_MAX_CONSECUTIVE_FAILED_ATTEMPTS: u32 = 5;

/// Default delay between invocation retries.
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(5);

/// Prefix used to derive a function arn from a function name.
pub const DEFAULT_FUNCTION_ARN_PREFIX: &str = "arn:aws:lambda:us-east-1:123456789012:function:";

/// Configuration for the [`Executor`](crate::Executor).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Invocation retries allowed before the execution is failed
    pub max_consecutive_failed_attempts: u32,
    /// Fixed delay between invocation retries
    pub retry_backoff: Duration,
    /// Page size for `list_executions` when the caller gives none
    pub default_list_max_items: usize,
    /// Page size for `get_execution_state` when the caller gives none
    pub default_state_max_items: usize,
    /// Page size for `get_execution_history` when the caller gives none
    pub default_history_max_items: usize,
    /// Deepest allowed nesting of durable chained invokes
    pub max_chained_invoke_depth: u32,
    /// Prepended to the function name in execution details
    pub function_arn_prefix: String,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_consecutive_failed_attempts: DEFAULT_MAX_CONSECUTIVE_FAILED_ATTEMPTS,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
            default_list_max_items: 50,
            default_state_max_items: 100,
            default_history_max_items: 100,
            max_chained_invoke_depth: 8,
            function_arn_prefix: DEFAULT_FUNCTION_ARN_PREFIX.to_string(),
        }
    }
}

impl ExecutorConfig {
    pub fn with_max_consecutive_failed_attempts(mut self, attempts: u32) -> Self {
        self.max_consecutive_failed_attempts = attempts;
        self
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub fn with_default_list_max_items(mut self, max_items: usize) -> Self {
        self.default_list_max_items = max_items;
        self
    }

    pub fn with_default_state_max_items(mut self, max_items: usize) -> Self {
        self.default_state_max_items = max_items;
        self
    }

    pub fn with_default_history_max_items(mut self, max_items: usize) -> Self {
        self.default_history_max_items = max_items;
        self
    }

    pub fn with_max_chained_invoke_depth(mut self, depth: u32) -> Self {
        self.max_chained_invoke_depth = depth;
        self
    }

    pub fn with_function_arn_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.function_arn_prefix = prefix.into();
        self
    }

    /// The function arn reported for `function_name`.
    pub fn function_arn(&self, function_name: &str) -> String {
        format!("{}{}", self.function_arn_prefix, function_name)
    }
}

/// Configuration for the [`Scheduler`](crate::Scheduler).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Advance a virtual clock instead of sleeping until tasks are due.
    ///
    /// Tasks still run in due order. Use this in tests so a 10 second wait
    /// completes immediately.
    pub time_skipping: bool,
    /// Name given to the worker thread
    pub thread_name: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            time_skipping: false,
            thread_name: "durable-scheduler".to_string(),
        }
    }
}

impl SchedulerConfig {
    pub fn with_time_skipping(mut self, time_skipping: bool) -> Self {
        self.time_skipping = time_skipping;
        self
    }

    pub fn with_thread_name(mut self, thread_name: impl Into<String>) -> Self {
        self.thread_name = thread_name.into();
        self
    }
}
