//! External callback completion, heartbeats and callback timeouts.

use std::time::Duration;

use super::{lock, Executor};
use crate::error::{ErrorObject, ServiceError, ServiceResult};
use crate::operation::{CallbackOptions, OperationStatus, OperationType};
use crate::scheduler::{callback, TimerHandle};
use crate::token::CallbackToken;

/// Timers armed for one CALLBACK operation.
#[derive(Debug, Default)]
pub(crate) struct CallbackTimers {
    timeout: Option<TimerHandle>,
    heartbeat: Option<TimerHandle>,
    heartbeat_timeout: Duration,
}

impl CallbackTimers {
    fn cancel(&self) {
        if let Some(timer) = &self.timeout {
            timer.cancel();
        }
        if let Some(timer) = &self.heartbeat {
            timer.cancel();
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CallbackTimeout {
    Overall,
    Heartbeat,
}

impl CallbackTimeout {
    fn message(self) -> &'static str {
        match self {
            Self::Overall => "Callback timed out",
            Self::Heartbeat => "Callback heartbeat timed out",
        }
    }
}

/// How an external caller resolved a callback.
#[derive(Debug)]
enum CallbackOutcome {
    Succeeded(Option<String>),
    Failed(ErrorObject),
}

impl Executor {
    /// Report success for a callback.
    pub async fn send_callback_success(
        &self,
        callback_id: &str,
        result: Option<String>,
    ) -> ServiceResult<()> {
        let token = decode_callback_id(callback_id, "success")?;
        self.resolve_callback(token, CallbackOutcome::Succeeded(result))
            .await
    }

    /// Report failure for a callback.
    pub async fn send_callback_failure(
        &self,
        callback_id: &str,
        error: Option<ErrorObject>,
    ) -> ServiceResult<()> {
        let token = decode_callback_id(callback_id, "failure")?;
        let error = error.unwrap_or_else(|| ErrorObject::from_message("Callback failed"));
        self.resolve_callback(token, CallbackOutcome::Failed(error))
            .await
    }

    /// Keep a callback alive, restarting its heartbeat timeout.
    pub async fn send_callback_heartbeat(&self, callback_id: &str) -> ServiceResult<()> {
        let token = decode_callback_id(callback_id, "heartbeat")?;
        let arn = token.execution_arn.clone();
        let callback_id = callback_id.to_string();
        self.on_worker(&arn, move |executor| async move {
            executor.heartbeat_now(&token, &callback_id).await
        })
        .await
    }

    async fn resolve_callback(
        &self,
        token: CallbackToken,
        outcome: CallbackOutcome,
    ) -> ServiceResult<()> {
        let arn = token.execution_arn.clone();
        self.on_worker(&arn, move |executor| async move {
            executor.resolve_callback_now(&token, outcome).await
        })
        .await
    }

    async fn resolve_callback_now(
        &self,
        token: &CallbackToken,
        outcome: CallbackOutcome,
    ) -> ServiceResult<()> {
        let mut execution = self.inner.store.load(&token.execution_arn).await?;
        if execution.is_complete {
            return Err(ServiceError::illegal_state(format!(
                "Execution {} is already complete",
                token.execution_arn
            )));
        }

        match outcome {
            CallbackOutcome::Succeeded(result) => {
                execution.complete_callback_success(&token.operation_id, result)?
            }
            CallbackOutcome::Failed(error) => {
                execution.complete_callback_failure(&token.operation_id, error)?
            }
        };
        self.inner.store.update(&execution).await?;
        self.finish_callback(token)
    }

    async fn heartbeat_now(&self, token: &CallbackToken, callback_id: &str) -> ServiceResult<()> {
        let execution = self.inner.store.load(&token.execution_arn).await?;

        let active = execution
            .find_operation(&token.operation_id)
            .map_or(false, |op| {
                op.operation_type == OperationType::Callback
                    && op.status == OperationStatus::Started
            });
        if execution.is_complete || !active {
            return Err(ServiceError::resource_not_found(format!(
                "Callback {} is not active",
                callback_id
            )));
        }

        let mut timers = lock(&self.inner.callback_timers);
        let Some(entry) = timers
            .get_mut(&token.execution_arn)
            .and_then(|ops| ops.get_mut(&token.operation_id))
        else {
            return Ok(());
        };
        if entry.heartbeat_timeout.is_zero() {
            return Ok(());
        }

        if let Some(previous) = entry.heartbeat.take() {
            previous.cancel();
        }
        entry.heartbeat = Some(self.schedule_callback_timeout(
            &token.execution_arn,
            &token.operation_id,
            entry.heartbeat_timeout,
            CallbackTimeout::Heartbeat,
        )?);
        tracing::debug!(
            operation_id = %token.operation_id,
            "[{}] Callback heartbeat",
            token.execution_arn
        );
        Ok(())
    }

    fn finish_callback(&self, token: &CallbackToken) -> ServiceResult<()> {
        self.cancel_operation_timers(&token.execution_arn, &token.operation_id);
        tracing::info!(
            operation_id = %token.operation_id,
            "[{}] Callback completed",
            token.execution_arn
        );
        self.invoke_execution(&token.execution_arn, Duration::ZERO)
    }

    /// Arm the timeout and heartbeat timers a new CALLBACK asked for.
    pub(crate) fn arm_callback_timers(
        &self,
        execution_arn: &str,
        operation_id: &str,
        options: CallbackOptions,
    ) -> ServiceResult<()> {
        let mut timers = CallbackTimers {
            heartbeat_timeout: Duration::from_secs(options.heartbeat_timeout_seconds),
            ..Default::default()
        };
        if options.timeout_seconds > 0 {
            timers.timeout = Some(self.schedule_callback_timeout(
                execution_arn,
                operation_id,
                Duration::from_secs(options.timeout_seconds),
                CallbackTimeout::Overall,
            )?);
        }
        if options.heartbeat_timeout_seconds > 0 {
            timers.heartbeat = Some(self.schedule_callback_timeout(
                execution_arn,
                operation_id,
                timers.heartbeat_timeout,
                CallbackTimeout::Heartbeat,
            )?);
        }

        if timers.timeout.is_some() || timers.heartbeat.is_some() {
            lock(&self.inner.callback_timers)
                .entry(execution_arn.to_string())
                .or_default()
                .insert(operation_id.to_string(), timers);
        }
        Ok(())
    }

    fn schedule_callback_timeout(
        &self,
        execution_arn: &str,
        operation_id: &str,
        delay: Duration,
        kind: CallbackTimeout,
    ) -> ServiceResult<TimerHandle> {
        let executor = self.clone();
        let arn = execution_arn.to_string();
        let operation_id = operation_id.to_string();
        self.inner.scheduler.call_later(
            callback(move || async move {
                executor.on_callback_timeout(&arn, &operation_id, kind).await
            }),
            delay,
            self.completion_event(execution_arn),
        )
    }

    async fn on_callback_timeout(
        &self,
        execution_arn: &str,
        operation_id: &str,
        kind: CallbackTimeout,
    ) -> ServiceResult<()> {
        self.cancel_operation_timers(execution_arn, operation_id);

        let mut execution = self.inner.store.load(execution_arn).await?;
        if execution.is_complete {
            return Ok(());
        }

        let error = ErrorObject::new("CallbackTimeout", kind.message());
        match execution.complete_callback_timeout(operation_id, error) {
            Ok(_) => {
                self.inner.store.update(&execution).await?;
                tracing::info!(operation_id, "[{}] {}", execution_arn, kind.message());
                self.invoke_execution(execution_arn, Duration::ZERO)
            }
            Err(error) => {
                tracing::debug!(
                    operation_id,
                    "[{}] Callback timeout ignored: {}",
                    execution_arn,
                    error
                );
                Ok(())
            }
        }
    }

    fn cancel_operation_timers(&self, execution_arn: &str, operation_id: &str) {
        let mut timers = lock(&self.inner.callback_timers);
        if let Some(operations) = timers.get_mut(execution_arn) {
            if let Some(entry) = operations.remove(operation_id) {
                entry.cancel();
            }
            if operations.is_empty() {
                timers.remove(execution_arn);
            }
        }
    }

    /// Cancel every callback timer of an execution.
    pub(crate) fn cancel_callback_timers(&self, execution_arn: &str) {
        let removed = lock(&self.inner.callback_timers).remove(execution_arn);
        for entry in removed.into_iter().flat_map(|ops| ops.into_values()) {
            entry.cancel();
        }
    }
}

fn decode_callback_id(callback_id: &str, action: &str) -> ServiceResult<CallbackToken> {
    if callback_id.is_empty() {
        return Err(ServiceError::invalid_parameter("callback_id is required"));
    }
    CallbackToken::decode(callback_id).map_err(|error| {
        tracing::debug!("Undecodable callback id {}: {}", callback_id, error);
        ServiceError::resource_not_found(format!("Failed to process callback {}", action))
    })
}
