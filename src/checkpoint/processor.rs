//! The checkpoint processor: the only writer of operation state.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::validator;
use crate::error::{ErrorObject, ServiceError, ServiceResult};
use crate::execution::Execution;
use crate::observer::ExecutionObserver;
use crate::operation::{
    CallbackOptions, Operation, OperationAction, OperationStatus, OperationType, OperationUpdate,
};
use crate::store::ExecutionStore;
use crate::token::CallbackToken;

/// Operations changed by a checkpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewExecutionState {
    #[serde(rename = "Operations")]
    pub operations: Vec<Operation>,
    #[serde(rename = "NextMarker", skip_serializing_if = "Option::is_none")]
    pub next_marker: Option<String>,
}

impl NewExecutionState {
    pub fn find_operation(&self, operation_id: &str) -> Option<&Operation> {
        self.operations.iter().find(|op| op.operation_id == operation_id)
    }
}

/// Result of a successful checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointOutput {
    /// Token gating the next checkpoint
    #[serde(rename = "CheckpointToken")]
    pub checkpoint_token: String,
    #[serde(rename = "NewExecutionState")]
    pub new_execution_state: NewExecutionState,
}

/// Follow-up work produced by one applied update.
#[derive(Debug, Clone)]
enum Notification {
    WaitScheduled {
        operation_id: String,
        delay: Duration,
    },
    StepRetryScheduled {
        operation_id: String,
        delay: Duration,
    },
    ChainedInvokeStarted {
        operation_id: String,
        function_name: String,
        payload: Option<String>,
    },
    CallbackCreated {
        operation_id: String,
        callback_id: String,
        options: CallbackOptions,
    },
    Completed {
        result: Option<String>,
    },
    Failed {
        error: ErrorObject,
    },
}

impl Notification {
    async fn dispatch(self, execution_arn: &str, observer: &dyn ExecutionObserver) -> ServiceResult<()> {
        match self {
            Self::WaitScheduled { operation_id, delay } => {
                observer
                    .on_wait_timer_scheduled(execution_arn, &operation_id, delay)
                    .await
            }
            Self::StepRetryScheduled { operation_id, delay } => {
                observer
                    .on_step_retry_scheduled(execution_arn, &operation_id, delay)
                    .await
            }
            Self::ChainedInvokeStarted {
                operation_id,
                function_name,
                payload,
            } => {
                observer
                    .on_chained_invoke_started(execution_arn, &operation_id, &function_name, payload)
                    .await
            }
            Self::CallbackCreated {
                operation_id,
                callback_id,
                options,
            } => {
                observer
                    .on_callback_created(execution_arn, &operation_id, &callback_id, options)
                    .await
            }
            Self::Completed { result } => observer.on_completed(execution_arn, result).await,
            Self::Failed { error } => observer.on_failed(execution_arn, error).await,
        }
    }
}

/// What applying a single update produced.
#[derive(Default)]
struct Applied {
    operation: Option<Operation>,
    notification: Option<Notification>,
}

impl Applied {
    fn operation(operation: Operation) -> Self {
        Self {
            operation: Some(operation),
            notification: None,
        }
    }

    fn notify(mut self, notification: Notification) -> Self {
        self.notification = Some(notification);
        self
    }
}

/// Applies checkpoint batches to stored executions.
#[derive(Clone)]
pub struct CheckpointProcessor {
    store: Arc<dyn ExecutionStore>,
}

impl std::fmt::Debug for CheckpointProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckpointProcessor").finish_non_exhaustive()
    }
}

impl CheckpointProcessor {
    pub fn new(store: Arc<dyn ExecutionStore>) -> Self {
        Self { store }
    }

    /// Validate and apply a batch of updates, then notify `observer`.
    ///
    /// Updates are applied in order and the first failing one aborts the rest
    /// of the batch. Updates applied before it are persisted and their
    /// notifications dispatched before the error is returned.
    pub async fn process_checkpoint(
        &self,
        execution_arn: &str,
        checkpoint_token: &str,
        updates: Vec<OperationUpdate>,
        client_token: Option<&str>,
        observer: &dyn ExecutionObserver,
    ) -> ServiceResult<CheckpointOutput> {
        let mut execution = self.store.load(execution_arn).await?;
        if execution.is_complete {
            return Err(ServiceError::illegal_state(format!(
                "Execution {} is already complete",
                execution_arn
            )));
        }

        execution.validate_checkpoint_token(checkpoint_token)?;
        validator::validate(&execution, &updates)?;
        execution.consume_checkpoint_token(checkpoint_token)?;
        execution.updates.extend(updates.iter().cloned());

        tracing::debug!(
            execution_arn,
            client_token,
            update_count = updates.len(),
            "[{}] Processing checkpoint",
            execution_arn
        );

        let mut touched = Vec::new();
        let mut notifications = Vec::new();
        let mut failure = None;
        for update in &updates {
            match apply_update(&mut execution, update) {
                Ok(applied) => {
                    touched.extend(applied.operation);
                    notifications.extend(applied.notification);
                }
                Err(error) => {
                    tracing::warn!(
                        operation_id = %update.operation_id,
                        "[{}] Checkpoint update rejected: {}",
                        execution_arn,
                        error
                    );
                    failure = Some(error);
                    break;
                }
            }
        }

        let checkpoint_token = if failure.is_none() {
            Some(execution.get_new_checkpoint_token())
        } else {
            None
        };
        self.store.update(&execution).await?;

        for notification in notifications {
            notification.dispatch(execution_arn, observer).await?;
        }

        match (failure, checkpoint_token) {
            (Some(error), _) => Err(error),
            (None, Some(checkpoint_token)) => Ok(CheckpointOutput {
                checkpoint_token,
                new_execution_state: NewExecutionState {
                    operations: touched,
                    next_marker: None,
                },
            }),
            (None, None) => Err(ServiceError::illegal_state("checkpoint token was not issued")),
        }
    }
}

fn apply_update(execution: &mut Execution, update: &OperationUpdate) -> ServiceResult<Applied> {
    let id = update.operation_id.as_str();

    match (update.operation_type, update.action) {
        (OperationType::Execution, OperationAction::Succeed) => Ok(Applied::default().notify(
            Notification::Completed {
                result: update.payload.clone(),
            },
        )),
        (OperationType::Execution, OperationAction::Fail) => Ok(Applied::default().notify(
            Notification::Failed {
                error: update
                    .error
                    .clone()
                    .unwrap_or_else(|| ErrorObject::from_message("Execution failed")),
            },
        )),

        (OperationType::Context, OperationAction::Start) => {
            execution.start_context(update).map(Applied::operation)
        }
        (OperationType::Context, OperationAction::Succeed | OperationAction::Fail) => {
            if execution.find_operation(id).is_none() {
                execution.start_context(update)?;
            }
            let (status, result, error) = outcome(update);
            execution
                .complete_context(id, status, result, error)
                .map(Applied::operation)
        }

        (OperationType::Step, OperationAction::Start) => {
            execution.start_step(update).map(Applied::operation)
        }
        (OperationType::Step, OperationAction::Succeed | OperationAction::Fail) => {
            if execution.find_operation(id).is_none() {
                execution.start_step(update)?;
            }
            let (status, result, error) = outcome(update);
            execution
                .complete_step(id, status, result, error)
                .map(Applied::operation)
        }
        (OperationType::Step, OperationAction::Retry) => {
            if execution.find_operation(id).is_none() {
                execution.start_step(update)?;
            }
            let delay_seconds = update
                .step_options
                .as_ref()
                .map_or(0, |o| o.next_attempt_delay_seconds);
            let operation = execution.retry_step(
                id,
                delay_seconds,
                update.error.clone(),
                update.payload.clone(),
            )?;
            Ok(Applied::operation(operation).notify(Notification::StepRetryScheduled {
                operation_id: id.to_string(),
                delay: Duration::from_secs(delay_seconds),
            }))
        }

        (OperationType::Wait, OperationAction::Start) => {
            let wait_seconds = update.wait_options.as_ref().map_or(0, |o| o.wait_seconds);
            let operation = execution.start_wait(update, wait_seconds)?;
            Ok(Applied::operation(operation).notify(Notification::WaitScheduled {
                operation_id: id.to_string(),
                delay: Duration::from_secs(wait_seconds),
            }))
        }
        (OperationType::Wait, OperationAction::Cancel) => {
            execution.cancel_wait(id).map(Applied::operation)
        }

        (OperationType::Callback, OperationAction::Start) => {
            let callback_id = CallbackToken::new(&execution.durable_execution_arn, id).encode();
            let operation = execution.start_callback(update, callback_id.clone())?;
            Ok(Applied::operation(operation).notify(Notification::CallbackCreated {
                operation_id: id.to_string(),
                callback_id,
                options: update.callback_options.unwrap_or_default(),
            }))
        }

        (OperationType::ChainedInvoke, OperationAction::Start) => {
            let function_name = update
                .chained_invoke_options
                .as_ref()
                .map(|o| o.function_name.clone())
                .unwrap_or_default();
            let operation = execution.start_chained_invoke(update)?;
            Ok(Applied::operation(operation).notify(Notification::ChainedInvokeStarted {
                operation_id: id.to_string(),
                function_name,
                payload: update.payload.clone(),
            }))
        }
        (OperationType::ChainedInvoke, OperationAction::Succeed) => execution
            .complete_chained_invoke(id, OperationStatus::Succeeded, update.payload.clone(), None)
            .map(Applied::operation),
        (OperationType::ChainedInvoke, OperationAction::Fail) => execution
            .complete_chained_invoke(id, OperationStatus::Failed, None, update.error.clone())
            .map(Applied::operation),
        (OperationType::ChainedInvoke, OperationAction::Cancel) => execution
            .complete_chained_invoke(id, OperationStatus::Stopped, None, update.error.clone())
            .map(Applied::operation),

        (operation_type, action) => Err(ServiceError::invalid_parameter(format!(
            "Invalid {} action: {}.",
            operation_type, action
        ))),
    }
}

fn outcome(update: &OperationUpdate) -> (OperationStatus, Option<String>, Option<ErrorObject>) {
    if update.action == OperationAction::Succeed {
        (OperationStatus::Succeeded, update.payload.clone(), None)
    } else {
        (OperationStatus::Failed, None, update.error.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::StartDurableExecutionInput;
    use crate::store::InMemoryExecutionStore;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingObserver {
        calls: Mutex<Vec<String>>,
        reject_chained: bool,
    }

    impl RecordingObserver {
        fn record(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ExecutionObserver for RecordingObserver {
        async fn on_completed(&self, _arn: &str, result: Option<String>) -> ServiceResult<()> {
            self.record(format!("completed:{}", result.unwrap_or_default()));
            Ok(())
        }

        async fn on_failed(&self, _arn: &str, error: ErrorObject) -> ServiceResult<()> {
            self.record(format!("failed:{}", error.message()));
            Ok(())
        }

        async fn on_wait_timer_scheduled(&self, _arn: &str, op: &str, delay: Duration) -> ServiceResult<()> {
            self.record(format!("wait:{}:{}", op, delay.as_secs()));
            Ok(())
        }

        async fn on_step_retry_scheduled(&self, _arn: &str, op: &str, delay: Duration) -> ServiceResult<()> {
            self.record(format!("retry:{}:{}", op, delay.as_secs()));
            Ok(())
        }

        async fn on_chained_invoke_started(
            &self,
            _arn: &str,
            op: &str,
            function_name: &str,
            _payload: Option<String>,
        ) -> ServiceResult<()> {
            if self.reject_chained {
                return Err(ServiceError::resource_not_found(format!(
                    "Function not found: {}",
                    function_name
                )));
            }
            self.record(format!("invoke:{}:{}", op, function_name));
            Ok(())
        }

        async fn on_callback_created(
            &self,
            _arn: &str,
            op: &str,
            _callback_id: &str,
            _options: CallbackOptions,
        ) -> ServiceResult<()> {
            self.record(format!("callback:{}", op));
            Ok(())
        }
    }

    async fn setup() -> (CheckpointProcessor, Arc<InMemoryExecutionStore>, String, String) {
        let store = Arc::new(InMemoryExecutionStore::new());
        let input = StartDurableExecutionInput::new("fn", "run").with_invocation_id("inv");
        let mut execution = Execution::new(input);
        execution.start().unwrap();
        let token = execution.get_new_checkpoint_token();
        store.save(&execution).await.unwrap();
        let arn = execution.durable_execution_arn.clone();
        (CheckpointProcessor::new(store.clone()), store, arn, token)
    }

    #[tokio::test]
    async fn test_applies_batch_and_notifies_in_order() {
        let (processor, store, arn, token) = setup().await;
        let observer = RecordingObserver::default();

        let output = processor
            .process_checkpoint(
                &arn,
                &token,
                vec![
                    OperationUpdate::succeed("s1", OperationType::Step, Some("1".to_string())),
                    OperationUpdate::wait("w1", 10),
                    OperationUpdate::callback("cb", CallbackOptions::default()),
                ],
                None,
                &observer,
            )
            .await
            .unwrap();

        assert_ne!(output.checkpoint_token, token);
        assert_eq!(output.new_execution_state.operations.len(), 3);
        assert_eq!(observer.calls(), vec!["wait:w1:10", "callback:cb"]);

        let stored = store.load(&arn).await.unwrap();
        assert_eq!(stored.updates.len(), 3);
        assert_eq!(stored.find_operation("s1").unwrap().result(), Some("1"));
        assert!(stored.find_operation("cb").unwrap().callback_id().is_some());
    }

    #[tokio::test]
    async fn test_token_reuse_rejected() {
        let (processor, _store, arn, token) = setup().await;
        let observer = RecordingObserver::default();
        processor
            .process_checkpoint(&arn, &token, vec![], None, &observer)
            .await
            .unwrap();

        let reused = processor
            .process_checkpoint(&arn, &token, vec![], None, &observer)
            .await;
        assert!(matches!(reused, Err(ServiceError::InvalidParameterValue(_))));
    }

    #[tokio::test]
    async fn test_validation_failure_keeps_token_usable() {
        let (processor, _store, arn, token) = setup().await;
        let observer = RecordingObserver::default();
        let duplicate = vec![
            OperationUpdate::start("s1", OperationType::Step),
            OperationUpdate::start("s1", OperationType::Step),
        ];
        assert!(processor
            .process_checkpoint(&arn, &token, duplicate, None, &observer)
            .await
            .is_err());

        processor
            .process_checkpoint(&arn, &token, vec![OperationUpdate::start("s1", OperationType::Step)], None, &observer)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_unbounded_wait_rejected_without_side_effects() {
        let (processor, store, arn, token) = setup().await;
        let observer = RecordingObserver::default();

        let result = processor
            .process_checkpoint(&arn, &token, vec![OperationUpdate::wait("w", u64::MAX)], None, &observer)
            .await;
        assert!(matches!(result, Err(ServiceError::InvalidParameterValue(_))));
        assert!(observer.calls().is_empty());

        let stored = store.load(&arn).await.unwrap();
        assert!(stored.find_operation("w").is_none());
        processor
            .process_checkpoint(&arn, &token, vec![OperationUpdate::wait("w", 1)], None, &observer)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_failing_update_keeps_applied_prefix() {
        let (processor, store, arn, token) = setup().await;
        let observer = RecordingObserver::default();

        let result = processor
            .process_checkpoint(
                &arn,
                &token,
                vec![
                    OperationUpdate::wait("w1", 5),
                    OperationUpdate::cancel("w-missing", OperationType::Wait),
                    OperationUpdate::start("s1", OperationType::Step),
                ],
                None,
                &observer,
            )
            .await;
        assert!(matches!(result, Err(ServiceError::ResourceNotFound(_))));

        let stored = store.load(&arn).await.unwrap();
        assert!(stored.find_operation("w1").is_some());
        assert!(stored.find_operation("s1").is_none());
        assert!(stored.consumed_tokens.contains(&token));
        assert_eq!(observer.calls(), vec!["wait:w1:5"]);
    }

    #[tokio::test]
    async fn test_notification_error_is_returned() {
        let (processor, store, arn, token) = setup().await;
        let observer = RecordingObserver {
            reject_chained: true,
            ..Default::default()
        };

        let result = processor
            .process_checkpoint(
                &arn,
                &token,
                vec![OperationUpdate::chained_invoke("c1", "unregistered", None)],
                None,
                &observer,
            )
            .await;
        assert!(result.unwrap_err().is_not_found());
        assert!(store.load(&arn).await.unwrap().find_operation("c1").is_some());
    }

    #[tokio::test]
    async fn test_execution_update_only_notifies() {
        let (processor, store, arn, token) = setup().await;
        let observer = RecordingObserver::default();
        processor
            .process_checkpoint(
                &arn,
                &token,
                vec![OperationUpdate::succeed("inv", OperationType::Execution, Some("ok".to_string()))],
                None,
                &observer,
            )
            .await
            .unwrap();

        assert_eq!(observer.calls(), vec!["completed:ok"]);
        assert!(!store.load(&arn).await.unwrap().is_complete);
    }

    #[tokio::test]
    async fn test_unknown_execution() {
        let (processor, _store, _arn, token) = setup().await;
        let observer = RecordingObserver::default();
        let result = processor
            .process_checkpoint("missing", &token, vec![], None, &observer)
            .await;
        assert!(result.unwrap_err().is_not_found());
    }
}
