//! Running CHAINED_INVOKE targets.

use std::time::Duration;

use super::Executor;
use crate::error::{ErrorObject, ServiceError, ServiceResult};
use crate::execution::{ChainedParent, StartDurableExecutionInput};
use crate::operation::{OperationType, OperationUpdate};
use crate::registry::{ChainedFunction, ChainedTarget};
use crate::scheduler::callback;

impl Executor {
    /// React to a started CHAINED_INVOKE.
    ///
    /// Unregistered targets fail with ResourceNotFound right away so the
    /// invoking handler surfaces the misconfiguration.
    pub(crate) async fn start_chained_invoke(
        &self,
        execution_arn: &str,
        operation_id: &str,
        function_name: &str,
        payload: Option<String>,
    ) -> ServiceResult<()> {
        let target = self
            .inner
            .registry
            .get(function_name)
            .cloned()
            .ok_or_else(|| {
                ServiceError::resource_not_found(format!("Function not found: {}", function_name))
            })?;

        tracing::debug!(
            operation_id,
            function_name,
            target = ?target,
            "[{}] Chained invoke started",
            execution_arn
        );

        match target {
            ChainedTarget::Function(function) => {
                let executor = self.clone();
                let arn = execution_arn.to_string();
                let operation_id = operation_id.to_string();
                self.inner.scheduler.call_later(
                    callback(move || async move {
                        executor
                            .run_chained_function(&arn, &operation_id, function, payload)
                            .await
                    }),
                    Duration::ZERO,
                    self.completion_event(execution_arn),
                )?;
                Ok(())
            }
            ChainedTarget::Durable => {
                self.start_nested_execution(execution_arn, operation_id, function_name, payload)
                    .await
            }
        }
    }

    async fn run_chained_function(
        &self,
        execution_arn: &str,
        operation_id: &str,
        function: ChainedFunction,
        payload: Option<String>,
    ) -> ServiceResult<()> {
        let outcome = match tokio::spawn(function(payload)).await {
            Ok(outcome) => outcome,
            Err(join_error) => Err(ErrorObject::new(
                "InvocationFailedException",
                format!("Chained function panicked: {}", join_error),
            )),
        };

        let update = match outcome {
            Ok(result) => OperationUpdate::succeed(operation_id, OperationType::ChainedInvoke, result),
            Err(error) => {
                tracing::debug!(
                    operation_id,
                    "[{}] Chained function failed: {}",
                    execution_arn,
                    error
                );
                OperationUpdate::fail(operation_id, OperationType::ChainedInvoke, error)
            }
        };
        self.checkpoint_and_resume(execution_arn, update).await
    }

    async fn start_nested_execution(
        &self,
        parent_arn: &str,
        operation_id: &str,
        function_name: &str,
        payload: Option<String>,
    ) -> ServiceResult<()> {
        let mut parent = self.inner.store.load(parent_arn).await?;
        let depth = parent.depth + 1;
        let max_depth = self.inner.config.max_chained_invoke_depth;
        if depth > max_depth {
            return Err(ServiceError::invalid_parameter(format!(
                "Chained invoke depth {} exceeds the maximum of {}",
                depth, max_depth
            )));
        }

        let mut input = StartDurableExecutionInput::new(
            function_name,
            format!("{}-{}", parent.start_input.execution_name, operation_id),
        );
        input.account_id = parent.start_input.account_id.clone();
        input.tenant_id = parent.start_input.tenant_id.clone();
        input.input = payload;

        let link = ChainedParent {
            execution_arn: parent_arn.to_string(),
            operation_id: operation_id.to_string(),
        };
        let nested = self.start_with_parent(input, Some(link), depth).await?;

        parent.set_nested_execution_arn(operation_id, &nested.execution_arn)?;
        self.inner.store.update(&parent).await?;
        tracing::info!(
            operation_id,
            nested_execution_arn = %nested.execution_arn,
            "[{}] Nested execution started",
            parent_arn
        );
        Ok(())
    }
}
