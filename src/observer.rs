//! Notifications from the checkpoint processor to whoever drives executions.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::{ErrorObject, ServiceResult};
use crate::operation::CallbackOptions;

/// Receives the follow-up work implied by an applied checkpoint.
///
/// The [`Executor`](crate::Executor) is the production implementation. Each
/// method is called after the checkpoint has been persisted, in the order the
/// updates appeared in the batch.
#[async_trait]
pub trait ExecutionObserver: Send + Sync {
    /// The handler closed the execution successfully.
    async fn on_completed(&self, execution_arn: &str, result: Option<String>) -> ServiceResult<()>;

    /// The handler closed the execution with an error.
    async fn on_failed(&self, execution_arn: &str, error: ErrorObject) -> ServiceResult<()>;

    /// A WAIT started and should complete after `delay`.
    async fn on_wait_timer_scheduled(
        &self,
        execution_arn: &str,
        operation_id: &str,
        delay: Duration,
    ) -> ServiceResult<()>;

    /// A STEP asked to be retried after `delay`.
    async fn on_step_retry_scheduled(
        &self,
        execution_arn: &str,
        operation_id: &str,
        delay: Duration,
    ) -> ServiceResult<()>;

    /// A CHAINED_INVOKE started. Unregistered targets must fail with ResourceNotFound.
    async fn on_chained_invoke_started(
        &self,
        execution_arn: &str,
        operation_id: &str,
        function_name: &str,
        payload: Option<String>,
    ) -> ServiceResult<()>;

    async fn on_callback_created(
        &self,
        execution_arn: &str,
        operation_id: &str,
        callback_id: &str,
        options: CallbackOptions,
    ) -> ServiceResult<()>;
}
