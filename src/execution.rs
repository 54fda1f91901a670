//! The Execution aggregate and its state transitions.
//!
//! An [`Execution`] exclusively owns its operations. Every mutation goes
//! through one of the `start_*`/`complete_*` methods below, which validate
//! the operation's type and current status before changing anything.

use std::collections::HashSet;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ErrorObject, ServiceError, ServiceResult};
use crate::operation::{
    CallbackDetails, ChainedInvokeDetails, ContextDetails, ExecutionDetails, Operation,
    OperationStatus, OperationType, OperationUpdate, StepDetails, WaitDetails,
};
use crate::token::CheckpointToken;

/// Input for starting a durable execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartDurableExecutionInput {
    #[serde(rename = "AccountId")]
    pub account_id: String,
    #[serde(rename = "FunctionName")]
    pub function_name: String,
    #[serde(rename = "FunctionQualifier")]
    pub function_qualifier: String,
    #[serde(rename = "ExecutionName")]
    pub execution_name: String,
    #[serde(rename = "ExecutionTimeoutSeconds")]
    pub execution_timeout_seconds: u64,
    #[serde(rename = "ExecutionRetentionPeriodDays")]
    pub execution_retention_period_days: u32,
    /// Id of the first invocation; generated by the executor when absent
    #[serde(rename = "InvocationId", skip_serializing_if = "Option::is_none")]
    pub invocation_id: Option<String>,
    #[serde(rename = "TraceFields", skip_serializing_if = "Option::is_none")]
    pub trace_fields: Option<serde_json::Value>,
    #[serde(rename = "TenantId", skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    /// Serialized input payload handed to the handler
    #[serde(rename = "Input", skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,
}

impl StartDurableExecutionInput {
    /// Creates an input with local defaults for everything but the names.
    pub fn new(function_name: impl Into<String>, execution_name: impl Into<String>) -> Self {
        Self {
            account_id: "123456789012".to_string(),
            function_name: function_name.into(),
            function_qualifier: "$LATEST".to_string(),
            execution_name: execution_name.into(),
            execution_timeout_seconds: 900,
            execution_retention_period_days: 7,
            invocation_id: None,
            trace_fields: None,
            tenant_id: None,
            input: None,
        }
    }

    /// Sets the serialized input payload.
    pub fn with_input(mut self, input: impl Into<String>) -> Self {
        self.input = Some(input.into());
        self
    }

    /// Sets the invocation id.
    pub fn with_invocation_id(mut self, invocation_id: impl Into<String>) -> Self {
        self.invocation_id = Some(invocation_id.into());
        self
    }

    /// Sets the execution timeout.
    pub fn with_execution_timeout_seconds(mut self, seconds: u64) -> Self {
        self.execution_timeout_seconds = seconds;
        self
    }
}

/// Output of starting a durable execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartDurableExecutionOutput {
    #[serde(rename = "ExecutionArn")]
    pub execution_arn: String,
}

/// Externally visible status of an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Running,
    Succeeded,
    Failed,
    TimedOut,
    Stopped,
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "RUNNING"),
            Self::Succeeded => write!(f, "SUCCEEDED"),
            Self::Failed => write!(f, "FAILED"),
            Self::TimedOut => write!(f, "TIMED_OUT"),
            Self::Stopped => write!(f, "STOPPED"),
        }
    }
}

/// Terminal outcome of an execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    #[serde(rename = "Status")]
    pub status: ExecutionStatus,
    #[serde(rename = "Result", skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(rename = "Error", skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorObject>,
}

/// Link from a nested execution back to the CHAINED_INVOKE operation awaiting it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainedParent {
    #[serde(rename = "ExecutionArn")]
    pub execution_arn: String,
    #[serde(rename = "OperationId")]
    pub operation_id: String,
}

/// Durable execution state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    #[serde(rename = "DurableExecutionArn")]
    pub durable_execution_arn: String,
    #[serde(rename = "StartInput")]
    pub start_input: StartDurableExecutionInput,
    /// Insertion-ordered operations; the first one is the EXECUTION root
    #[serde(rename = "Operations")]
    pub operations: Vec<Operation>,
    /// Every update applied through a checkpoint, in order
    #[serde(rename = "Updates")]
    pub updates: Vec<OperationUpdate>,
    #[serde(rename = "GeneratedTokens")]
    pub generated_tokens: HashSet<String>,
    #[serde(rename = "ConsumedTokens")]
    pub consumed_tokens: HashSet<String>,
    #[serde(rename = "TokenSequence")]
    pub token_sequence: u64,
    #[serde(rename = "IsComplete")]
    pub is_complete: bool,
    #[serde(rename = "Result", skip_serializing_if = "Option::is_none")]
    pub result: Option<ExecutionResult>,
    #[serde(rename = "ConsecutiveFailedInvocationAttempts")]
    pub consecutive_failed_invocation_attempts: u32,
    #[serde(rename = "Parent", skip_serializing_if = "Option::is_none")]
    pub parent: Option<ChainedParent>,
    /// Chained invoke nesting depth; 0 for top-level executions
    #[serde(rename = "Depth", default)]
    pub depth: u32,
}

impl Execution {
    /// Creates a new, not yet started execution with a fresh arn.
    pub fn new(start_input: StartDurableExecutionInput) -> Self {
        Self {
            durable_execution_arn: Uuid::new_v4().to_string(),
            start_input,
            operations: Vec::new(),
            updates: Vec::new(),
            generated_tokens: HashSet::new(),
            consumed_tokens: HashSet::new(),
            token_sequence: 0,
            is_complete: false,
            result: None,
            consecutive_failed_invocation_attempts: 0,
            parent: None,
            depth: 0,
        }
    }

    /// Creates the root EXECUTION operation.
    pub fn start(&mut self) -> ServiceResult<()> {
        let invocation_id = self
            .start_input
            .invocation_id
            .clone()
            .ok_or_else(|| ServiceError::invalid_parameter("invocation_id is required"))?;
        if !self.operations.is_empty() {
            return Err(ServiceError::illegal_state(format!(
                "Execution {} already started",
                self.durable_execution_arn
            )));
        }

        let mut root = Operation::new(invocation_id, OperationType::Execution)
            .with_name(self.start_input.execution_name.clone());
        root.execution_details = Some(ExecutionDetails {
            input_payload: self.start_input.input.clone(),
        });
        self.operations.push(root);
        Ok(())
    }

    /// The root EXECUTION operation.
    pub fn operation_execution_started(&self) -> ServiceResult<&Operation> {
        self.operations
            .first()
            .ok_or_else(|| ServiceError::illegal_state("execution not started."))
    }

    /// Operations a client can see, excluding the EXECUTION root.
    pub fn assertable_operations(&self) -> &[Operation] {
        self.operations.get(1..).unwrap_or_default()
    }

    pub fn find_operation(&self, operation_id: &str) -> Option<&Operation> {
        self.operations.iter().find(|op| op.operation_id == operation_id)
    }

    /// Externally visible status.
    pub fn status(&self) -> ExecutionStatus {
        match &self.result {
            Some(result) if self.is_complete => result.status,
            _ => ExecutionStatus::Running,
        }
    }

    /// True if some operation is still waiting on a timer, retry, callback or invoke.
    pub fn has_pending_operations(&self) -> bool {
        self.operations.iter().any(|op| match op.operation_type {
            OperationType::Step => {
                matches!(op.status, OperationStatus::Pending | OperationStatus::Ready)
            }
            OperationType::Wait | OperationType::Callback | OperationType::ChainedInvoke => {
                op.status == OperationStatus::Started
            }
            OperationType::Execution | OperationType::Context => false,
        })
    }

    // Tokens

    /// Issue a new checkpoint token with an incremented sequence.
    pub fn get_new_checkpoint_token(&mut self) -> String {
        self.token_sequence += 1;
        let token = CheckpointToken::new(&self.durable_execution_arn, self.token_sequence).encode();
        self.generated_tokens.insert(token.clone());
        token
    }

    /// True if the token was issued for this execution, consumed or not.
    pub fn is_token_issued(&self, token: &str) -> bool {
        self.generated_tokens.contains(token)
    }

    /// Fails unless the token was issued and has not been consumed yet.
    pub fn validate_checkpoint_token(&self, token: &str) -> ServiceResult<()> {
        if !self.is_token_issued(token) || self.consumed_tokens.contains(token) {
            return Err(ServiceError::invalid_parameter(format!(
                "Invalid checkpoint token: {}",
                token
            )));
        }
        Ok(())
    }

    /// Marks a valid token as used so it cannot gate another checkpoint.
    pub fn consume_checkpoint_token(&mut self, token: &str) -> ServiceResult<()> {
        self.validate_checkpoint_token(token)?;
        self.consumed_tokens.insert(token.to_string());
        Ok(())
    }

    // Terminal execution transitions

    /// Close the execution successfully.
    pub fn complete_success(&mut self, result: Option<String>) -> ServiceResult<()> {
        self.close(ExecutionStatus::Succeeded, OperationStatus::Succeeded, result, None)
    }

    /// Close the execution as failed.
    pub fn complete_fail(&mut self, error: ErrorObject) -> ServiceResult<()> {
        self.close(ExecutionStatus::Failed, OperationStatus::Failed, None, Some(error))
    }

    /// Close the execution as timed out.
    pub fn complete_timeout(&mut self, error: ErrorObject) -> ServiceResult<()> {
        self.close(ExecutionStatus::TimedOut, OperationStatus::TimedOut, None, Some(error))
    }

    /// Close the execution as stopped.
    pub fn complete_stopped(&mut self, error: ErrorObject) -> ServiceResult<()> {
        self.close(ExecutionStatus::Stopped, OperationStatus::Stopped, None, Some(error))
    }

    fn close(
        &mut self,
        status: ExecutionStatus,
        root_status: OperationStatus,
        result: Option<String>,
        error: Option<ErrorObject>,
    ) -> ServiceResult<()> {
        if self.is_complete {
            return Err(ServiceError::illegal_state(
                "Cannot make multiple close workflow decisions.",
            ));
        }

        if let Some(root) = self.operations.first_mut() {
            root.status = root_status;
            root.end_timestamp = Some(Utc::now());
        }
        self.token_sequence += 1;
        self.result = Some(ExecutionResult { status, result, error });
        self.is_complete = true;
        Ok(())
    }

    // Operation transitions

    fn operation_mut(
        &mut self,
        operation_id: &str,
        expected: OperationType,
    ) -> ServiceResult<&mut Operation> {
        let operation = self
            .operations
            .iter_mut()
            .find(|op| op.operation_id == operation_id)
            .ok_or_else(|| {
                ServiceError::resource_not_found(format!(
                    "Attempting to update state of an Operation [{}] that doesn't exist",
                    operation_id
                ))
            })?;
        if operation.operation_type != expected {
            return Err(ServiceError::type_mismatch(
                operation_id,
                expected,
                operation.operation_type,
            ));
        }
        Ok(operation)
    }

    fn append_operation(&mut self, operation: Operation) -> ServiceResult<Operation> {
        if self.find_operation(&operation.operation_id).is_some() {
            return Err(ServiceError::illegal_state(format!(
                "Operation [{}] already exists",
                operation.operation_id
            )));
        }
        self.token_sequence += 1;
        self.operations.push(operation.clone());
        Ok(operation)
    }

    fn illegal_transition(
        operation: &Operation,
        target: OperationStatus,
        allowed: &str,
    ) -> ServiceError {
        ServiceError::illegal_state(format!(
            "Attempting to transition a {} Operation[{}] to {} when it's not {} (current: {})",
            operation.operation_type, operation.operation_id, target, allowed, operation.status
        ))
    }

    /// Start a STEP, either fresh or from READY after a retry delay.
    pub fn start_step(&mut self, update: &OperationUpdate) -> ServiceResult<Operation> {
        if self.find_operation(&update.operation_id).is_none() {
            let mut operation = Operation::from_update(update, OperationStatus::Started);
            operation.step_details = Some(StepDetails {
                attempt: 1,
                ..Default::default()
            });
            return self.append_operation(operation);
        }

        let operation = self.operation_mut(&update.operation_id, OperationType::Step)?;
        if operation.status != OperationStatus::Ready {
            return Err(Self::illegal_transition(operation, OperationStatus::Started, "READY"));
        }
        operation.status = OperationStatus::Started;
        let updated = operation.clone();
        self.token_sequence += 1;
        Ok(updated)
    }

    /// Put a STEP into PENDING until `delay_seconds` elapse.
    pub fn retry_step(
        &mut self,
        operation_id: &str,
        delay_seconds: u64,
        error: Option<ErrorObject>,
        payload: Option<String>,
    ) -> ServiceResult<Operation> {
        let next_attempt = seconds_from_now(delay_seconds, operation_id)?;
        let operation = self.operation_mut(operation_id, OperationType::Step)?;
        if !matches!(operation.status, OperationStatus::Started | OperationStatus::Ready) {
            return Err(Self::illegal_transition(
                operation,
                OperationStatus::Pending,
                "STARTED or READY",
            ));
        }

        let details = operation.step_details.get_or_insert_with(StepDetails::default);
        details.attempt = details.attempt.max(1) + 1;
        details.next_attempt_timestamp = Some(next_attempt);
        details.error = error;
        details.result = payload;
        operation.status = OperationStatus::Pending;
        let updated = operation.clone();
        self.token_sequence += 1;
        Ok(updated)
    }

    /// Complete a STEP retry delay: PENDING becomes READY.
    pub fn complete_retry(&mut self, operation_id: &str) -> ServiceResult<Operation> {
        let operation = self.operation_mut(operation_id, OperationType::Step)?;
        if operation.status != OperationStatus::Pending {
            return Err(Self::illegal_transition(operation, OperationStatus::Ready, "PENDING"));
        }

        operation.status = OperationStatus::Ready;
        if let Some(details) = operation.step_details.as_mut() {
            details.next_attempt_timestamp = None;
        }
        let updated = operation.clone();
        self.token_sequence += 1;
        Ok(updated)
    }

    /// Finish a STEP with a terminal status.
    pub fn complete_step(
        &mut self,
        operation_id: &str,
        status: OperationStatus,
        result: Option<String>,
        error: Option<ErrorObject>,
    ) -> ServiceResult<Operation> {
        let operation = self.operation_mut(operation_id, OperationType::Step)?;
        if !matches!(
            status,
            OperationStatus::Succeeded | OperationStatus::Failed | OperationStatus::TimedOut
        ) {
            return Err(Self::illegal_transition(operation, status, "a STEP terminal status"));
        }
        if !matches!(operation.status, OperationStatus::Started | OperationStatus::Ready) {
            return Err(Self::illegal_transition(operation, status, "STARTED or READY"));
        }

        operation.status = status;
        operation.end_timestamp = Some(Utc::now());
        let details = operation.step_details.get_or_insert_with(StepDetails::default);
        details.next_attempt_timestamp = None;
        details.result = result;
        details.error = error;
        let updated = operation.clone();
        self.token_sequence += 1;
        Ok(updated)
    }

    /// Start a WAIT that ends `wait_seconds` from now.
    pub fn start_wait(&mut self, update: &OperationUpdate, wait_seconds: u64) -> ServiceResult<Operation> {
        let scheduled_end_timestamp = seconds_from_now(wait_seconds, &update.operation_id)?;
        let mut operation = Operation::from_update(update, OperationStatus::Started);
        operation.wait_details = Some(WaitDetails {
            scheduled_end_timestamp,
        });
        self.append_operation(operation)
    }

    /// Complete a WAIT operation when its timer fires.
    pub fn complete_wait(&mut self, operation_id: &str) -> ServiceResult<Operation> {
        let operation = self.operation_mut(operation_id, OperationType::Wait)?;
        if operation.status != OperationStatus::Started {
            return Err(Self::illegal_transition(operation, OperationStatus::Succeeded, "STARTED"));
        }

        operation.status = OperationStatus::Succeeded;
        operation.end_timestamp = Some(Utc::now());
        let updated = operation.clone();
        self.token_sequence += 1;
        Ok(updated)
    }

    /// Cancel a WAIT before its timer fires.
    pub fn cancel_wait(&mut self, operation_id: &str) -> ServiceResult<Operation> {
        let operation = self.operation_mut(operation_id, OperationType::Wait)?;
        if operation.status != OperationStatus::Started {
            return Err(Self::illegal_transition(operation, OperationStatus::Cancelled, "STARTED"));
        }

        operation.status = OperationStatus::Cancelled;
        operation.end_timestamp = Some(Utc::now());
        let updated = operation.clone();
        self.token_sequence += 1;
        Ok(updated)
    }

    /// Start a CALLBACK with the id external systems will use to complete it.
    pub fn start_callback(
        &mut self,
        update: &OperationUpdate,
        callback_id: String,
    ) -> ServiceResult<Operation> {
        let mut operation = Operation::from_update(update, OperationStatus::Started);
        operation.callback_details = Some(CallbackDetails {
            callback_id,
            result: None,
            error: None,
        });
        self.append_operation(operation)
    }

    /// Complete a CALLBACK successfully.
    pub fn complete_callback_success(
        &mut self,
        operation_id: &str,
        result: Option<String>,
    ) -> ServiceResult<Operation> {
        self.complete_callback(operation_id, OperationStatus::Succeeded, result, None)
    }

    /// Complete a CALLBACK with a failure.
    pub fn complete_callback_failure(
        &mut self,
        operation_id: &str,
        error: ErrorObject,
    ) -> ServiceResult<Operation> {
        self.complete_callback(operation_id, OperationStatus::Failed, None, Some(error))
    }

    /// Complete a CALLBACK as timed out.
    pub fn complete_callback_timeout(
        &mut self,
        operation_id: &str,
        error: ErrorObject,
    ) -> ServiceResult<Operation> {
        self.complete_callback(operation_id, OperationStatus::TimedOut, None, Some(error))
    }

    fn complete_callback(
        &mut self,
        operation_id: &str,
        status: OperationStatus,
        result: Option<String>,
        error: Option<ErrorObject>,
    ) -> ServiceResult<Operation> {
        let operation = self.operation_mut(operation_id, OperationType::Callback)?;
        if operation.status != OperationStatus::Started {
            return Err(Self::illegal_transition(operation, status, "STARTED"));
        }

        operation.status = status;
        operation.end_timestamp = Some(Utc::now());
        if let Some(details) = operation.callback_details.as_mut() {
            details.result = result;
            details.error = error;
        }
        let updated = operation.clone();
        self.token_sequence += 1;
        Ok(updated)
    }

    /// Start a CHAINED_INVOKE.
    pub fn start_chained_invoke(&mut self, update: &OperationUpdate) -> ServiceResult<Operation> {
        let mut operation = Operation::from_update(update, OperationStatus::Started);
        operation.chained_invoke_details = Some(ChainedInvokeDetails::default());
        self.append_operation(operation)
    }

    /// Record the nested execution that runs a CHAINED_INVOKE target.
    pub fn set_nested_execution_arn(
        &mut self,
        operation_id: &str,
        nested_execution_arn: impl Into<String>,
    ) -> ServiceResult<()> {
        let operation = self.operation_mut(operation_id, OperationType::ChainedInvoke)?;
        operation
            .chained_invoke_details
            .get_or_insert_with(ChainedInvokeDetails::default)
            .nested_execution_arn = Some(nested_execution_arn.into());
        Ok(())
    }

    /// Finish a CHAINED_INVOKE with a terminal status.
    pub fn complete_chained_invoke(
        &mut self,
        operation_id: &str,
        status: OperationStatus,
        result: Option<String>,
        error: Option<ErrorObject>,
    ) -> ServiceResult<Operation> {
        let operation = self.operation_mut(operation_id, OperationType::ChainedInvoke)?;
        if !matches!(
            status,
            OperationStatus::Succeeded
                | OperationStatus::Failed
                | OperationStatus::TimedOut
                | OperationStatus::Stopped
        ) {
            return Err(Self::illegal_transition(operation, status, "a CHAINED_INVOKE terminal status"));
        }
        if operation.status != OperationStatus::Started {
            return Err(Self::illegal_transition(operation, status, "STARTED"));
        }

        operation.status = status;
        operation.end_timestamp = Some(Utc::now());
        let details = operation
            .chained_invoke_details
            .get_or_insert_with(ChainedInvokeDetails::default);
        details.result = result;
        details.error = error;
        let updated = operation.clone();
        self.token_sequence += 1;
        Ok(updated)
    }

    /// Start a CONTEXT.
    pub fn start_context(&mut self, update: &OperationUpdate) -> ServiceResult<Operation> {
        let mut operation = Operation::from_update(update, OperationStatus::Started);
        operation.context_details = Some(ContextDetails {
            replay_children: update
                .context_options
                .as_ref()
                .map(|o| o.replay_children)
                .unwrap_or(false),
            ..Default::default()
        });
        self.append_operation(operation)
    }

    /// Finish a CONTEXT. Success is refused while a direct child ended FAILED or TIMED_OUT.
    pub fn complete_context(
        &mut self,
        operation_id: &str,
        status: OperationStatus,
        result: Option<String>,
        error: Option<ErrorObject>,
    ) -> ServiceResult<Operation> {
        if status == OperationStatus::Succeeded {
            let failed_child = self.operations.iter().find(|op| {
                op.parent_id.as_deref() == Some(operation_id)
                    && matches!(op.status, OperationStatus::Failed | OperationStatus::TimedOut)
            });
            if let Some(child) = failed_child {
                return Err(ServiceError::illegal_state(format!(
                    "Cannot succeed Context Operation[{}]: child [{}] is {}",
                    operation_id, child.operation_id, child.status
                )));
            }
        }

        let operation = self.operation_mut(operation_id, OperationType::Context)?;
        if !matches!(status, OperationStatus::Succeeded | OperationStatus::Failed) {
            return Err(Self::illegal_transition(operation, status, "a CONTEXT terminal status"));
        }
        if operation.status != OperationStatus::Started {
            return Err(Self::illegal_transition(operation, status, "STARTED"));
        }

        operation.status = status;
        operation.end_timestamp = Some(Utc::now());
        let details = operation.context_details.get_or_insert_with(ContextDetails::default);
        details.result = result;
        details.error = error;
        let updated = operation.clone();
        self.token_sequence += 1;
        Ok(updated)
    }
}

fn seconds_from_now(value: u64, operation_id: &str) -> ServiceResult<DateTime<Utc>> {
    i64::try_from(value)
        .ok()
        .and_then(ChronoDuration::try_seconds)
        .and_then(|delay| Utc::now().checked_add_signed(delay))
        .ok_or_else(|| {
            ServiceError::invalid_parameter(format!(
                "Delay of {} seconds on [{}] is out of range.",
                value, operation_id
            ))
        })
}
