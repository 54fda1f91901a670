//! The invocation loop and timer-driven resumption.

use std::sync::Arc;
use std::time::Duration;

use super::Executor;
use crate::error::{ErrorObject, ServiceError, ServiceResult};
use crate::execution::Execution;
use crate::invoker::{InvocationOutput, InvocationStatus};
use crate::operation::OperationUpdate;
use crate::scheduler::callback;

impl Executor {
    /// Schedule an invocation of the execution's handler after `delay`.
    pub(crate) fn invoke_execution(&self, execution_arn: &str, delay: Duration) -> ServiceResult<()> {
        let executor = self.clone();
        let arn = execution_arn.to_string();
        self.inner.scheduler.call_later(
            callback(move || async move { executor.run_invocation(&arn).await }),
            delay,
            self.completion_event(execution_arn),
        )?;
        Ok(())
    }

    async fn run_invocation(&self, execution_arn: &str) -> ServiceResult<()> {
        let mut execution = self.inner.store.load(execution_arn).await?;
        if execution.is_complete {
            tracing::debug!("[{}] Execution already complete; skipping invocation", execution_arn);
            return Ok(());
        }

        let function_name = execution.start_input.function_name.clone();
        let input = self
            .inner
            .invoker
            .create_invocation_input(&mut execution)
            .with_client(Arc::new(self.clone()));
        self.inner.store.update(&execution).await?;

        tracing::debug!(
            function_name = %function_name,
            attempt = execution.consecutive_failed_invocation_attempts,
            "[{}] Invoking",
            execution_arn
        );
        let outcome = self.inner.invoker.invoke(&function_name, input).await;

        let execution = self.inner.store.load(execution_arn).await?;
        if execution.is_complete {
            tracing::debug!(
                "[{}] Execution completed during invocation; ignoring response",
                execution_arn
            );
            return Ok(());
        }

        let error = match outcome {
            Ok(output) => match self.handle_output(execution_arn, &execution, output).await {
                Ok(()) => return Ok(()),
                Err(error) => error,
            },
            Err(error) if error.is_not_found() => {
                tracing::error!("[{}] Invocation failed permanently: {}", execution_arn, error);
                return self
                    .fail_execution(execution_arn, ErrorObject::from(&error))
                    .await;
            }
            Err(error) => error,
        };

        self.retry_invocation(execution_arn, error).await
    }

    async fn handle_output(
        &self,
        execution_arn: &str,
        execution: &Execution,
        output: InvocationOutput,
    ) -> ServiceResult<()> {
        validate_output(&output, execution)?;
        self.reset_attempts(execution_arn).await?;

        match output.status {
            InvocationStatus::Succeeded => {
                self.complete_execution(execution_arn, output.result).await
            }
            InvocationStatus::Failed => {
                let error = output
                    .error
                    .unwrap_or_else(|| ErrorObject::from_message("Execution failed"));
                self.fail_execution(execution_arn, error).await
            }
            InvocationStatus::TimedOut => {
                let error = output
                    .error
                    .unwrap_or_else(|| ErrorObject::from_message("Execution timed out"));
                self.timeout_execution(execution_arn, error).await
            }
            InvocationStatus::Pending => {
                tracing::debug!("[{}] Invocation suspended", execution_arn);
                Ok(())
            }
        }
    }

    async fn reset_attempts(&self, execution_arn: &str) -> ServiceResult<()> {
        let mut execution = self.inner.store.load(execution_arn).await?;
        if execution.consecutive_failed_invocation_attempts > 0 {
            execution.consecutive_failed_invocation_attempts = 0;
            self.inner.store.update(&execution).await?;
        }
        Ok(())
    }

    async fn retry_invocation(&self, execution_arn: &str, error: ServiceError) -> ServiceResult<()> {
        let mut execution = self.inner.store.load(execution_arn).await?;
        if execution.is_complete {
            return Ok(());
        }

        let max_attempts = self.inner.config.max_consecutive_failed_attempts;
        if execution.consecutive_failed_invocation_attempts < max_attempts {
            execution.consecutive_failed_invocation_attempts += 1;
            self.inner.store.update(&execution).await?;
            tracing::warn!(
                attempt = execution.consecutive_failed_invocation_attempts,
                max_attempts,
                "[{}] Invocation failed, retrying: {}",
                execution_arn,
                error
            );
            return self.invoke_execution(execution_arn, self.inner.config.retry_backoff);
        }

        tracing::error!(
            max_attempts,
            "[{}] Invocation retries exhausted: {}",
            execution_arn,
            error
        );
        self.fail_execution(execution_arn, ErrorObject::from(&error)).await
    }

    pub(crate) fn schedule_wait_completion(
        &self,
        execution_arn: &str,
        operation_id: &str,
        delay: Duration,
    ) -> ServiceResult<()> {
        let executor = self.clone();
        let arn = execution_arn.to_string();
        let operation_id = operation_id.to_string();
        self.inner.scheduler.call_later(
            callback(move || async move { executor.on_wait_elapsed(&arn, &operation_id).await }),
            delay,
            self.completion_event(execution_arn),
        )?;
        Ok(())
    }

    async fn on_wait_elapsed(&self, execution_arn: &str, operation_id: &str) -> ServiceResult<()> {
        let mut execution = self.inner.store.load(execution_arn).await?;
        if execution.is_complete {
            return Ok(());
        }

        match execution.complete_wait(operation_id) {
            Ok(_) => {
                self.inner.store.update(&execution).await?;
                self.invoke_execution(execution_arn, Duration::ZERO)
            }
            Err(error) => {
                tracing::warn!(operation_id, "[{}] Wait not completed: {}", execution_arn, error);
                Ok(())
            }
        }
    }

    pub(crate) fn schedule_step_retry(
        &self,
        execution_arn: &str,
        operation_id: &str,
        delay: Duration,
    ) -> ServiceResult<()> {
        let executor = self.clone();
        let arn = execution_arn.to_string();
        let operation_id = operation_id.to_string();
        self.inner.scheduler.call_later(
            callback(move || async move { executor.on_retry_ready(&arn, &operation_id).await }),
            delay,
            self.completion_event(execution_arn),
        )?;
        Ok(())
    }

    async fn on_retry_ready(&self, execution_arn: &str, operation_id: &str) -> ServiceResult<()> {
        let mut execution = self.inner.store.load(execution_arn).await?;
        if execution.is_complete {
            return Ok(());
        }

        match execution.complete_retry(operation_id) {
            Ok(_) => {
                self.inner.store.update(&execution).await?;
                self.invoke_execution(execution_arn, Duration::ZERO)
            }
            Err(error) => {
                tracing::warn!(operation_id, "[{}] Step retry not readied: {}", execution_arn, error);
                Ok(())
            }
        }
    }

    /// Schedule `update` to be checkpointed onto `execution_arn`, then re-invoke it.
    pub(crate) fn schedule_checkpoint(
        &self,
        execution_arn: &str,
        update: OperationUpdate,
    ) -> ServiceResult<()> {
        let executor = self.clone();
        let arn = execution_arn.to_string();
        self.inner.scheduler.call_later(
            callback(move || async move { executor.checkpoint_and_resume(&arn, update).await }),
            Duration::ZERO,
            self.completion_event(execution_arn),
        )?;
        Ok(())
    }

    pub(crate) async fn checkpoint_and_resume(
        &self,
        execution_arn: &str,
        update: OperationUpdate,
    ) -> ServiceResult<()> {
        let mut execution = self.inner.store.load(execution_arn).await?;
        if execution.is_complete {
            tracing::debug!(
                operation_id = %update.operation_id,
                "[{}] Execution already complete; dropping update",
                execution_arn
            );
            return Ok(());
        }

        let token = execution.get_new_checkpoint_token();
        self.inner.store.update(&execution).await?;
        self.checkpoint_execution(execution_arn, &token, vec![update], None)
            .await?;
        self.invoke_execution(execution_arn, Duration::ZERO)
    }
}

/// Check that a handler response is well formed.
fn validate_output(output: &InvocationOutput, execution: &Execution) -> ServiceResult<()> {
    match output.status {
        InvocationStatus::Succeeded if output.error.is_some() => Err(
            ServiceError::invalid_parameter("Cannot provide an Error for SUCCEEDED status."),
        ),
        InvocationStatus::Failed | InvocationStatus::TimedOut if output.result.is_some() => {
            Err(ServiceError::invalid_parameter(format!(
                "Cannot provide a Result for {:?} status.",
                output.status
            )))
        }
        InvocationStatus::Pending if output.result.is_some() || output.error.is_some() => Err(
            ServiceError::invalid_parameter("Cannot provide a Result or Error for PENDING status."),
        ),
        InvocationStatus::Pending if !execution.has_pending_operations() => Err(
            ServiceError::invalid_parameter(
                "Cannot return PENDING status with no pending operations.",
            ),
        ),
        _ => Ok(()),
    }
}
