//! Operation types for the durable execution state tree.
//!
//! An [`Operation`] is one node in an execution's append-only state tree.
//! Clients propose changes to operations through [`OperationUpdate`]s sent in
//! checkpoint batches.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ErrorObject;

/// The type of operation in a durable execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationType {
    /// The root execution operation
    Execution,
    /// A context grouping child operations
    Context,
    /// A step operation (unit of work)
    Step,
    /// A wait/sleep operation
    Wait,
    /// A callback operation waiting for an external signal
    Callback,
    /// An invocation of another function
    ChainedInvoke,
}

impl std::fmt::Display for OperationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Execution => write!(f, "EXECUTION"),
            Self::Context => write!(f, "CONTEXT"),
            Self::Step => write!(f, "STEP"),
            Self::Wait => write!(f, "WAIT"),
            Self::Callback => write!(f, "CALLBACK"),
            Self::ChainedInvoke => write!(f, "CHAINED_INVOKE"),
        }
    }
}

/// The status of an operation in a durable execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationStatus {
    /// Operation has started but not completed
    Started,
    /// Step is waiting for its retry delay to elapse
    Pending,
    /// Step retry delay elapsed, ready to be attempted again
    Ready,
    /// Operation completed successfully
    Succeeded,
    /// Operation failed with an error
    Failed,
    /// Operation timed out
    TimedOut,
    /// Operation was stopped externally
    Stopped,
    /// Operation was cancelled
    Cancelled,
}

impl OperationStatus {
    /// Returns true if this status represents a terminal state.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Started | Self::Pending | Self::Ready)
    }

    /// Returns true if this status represents a successful completion.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }

    /// Returns true if this status represents a failure.
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed | Self::TimedOut | Self::Stopped | Self::Cancelled)
    }
}

impl std::fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Started => write!(f, "STARTED"),
            Self::Pending => write!(f, "PENDING"),
            Self::Ready => write!(f, "READY"),
            Self::Succeeded => write!(f, "SUCCEEDED"),
            Self::Failed => write!(f, "FAILED"),
            Self::TimedOut => write!(f, "TIMED_OUT"),
            Self::Stopped => write!(f, "STOPPED"),
            Self::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

/// Action to perform on an operation during checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationAction {
    /// Start a new operation
    Start,
    /// Mark operation as succeeded
    Succeed,
    /// Mark operation as failed
    Fail,
    /// Cancel the operation
    Cancel,
    /// Schedule another attempt of a step
    Retry,
}

impl std::fmt::Display for OperationAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Start => write!(f, "START"),
            Self::Succeed => write!(f, "SUCCEED"),
            Self::Fail => write!(f, "FAIL"),
            Self::Cancel => write!(f, "CANCEL"),
            Self::Retry => write!(f, "RETRY"),
        }
    }
}

/// Details of the root EXECUTION operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionDetails {
    /// The serialized input the execution was started with
    #[serde(rename = "InputPayload", skip_serializing_if = "Option::is_none")]
    pub input_payload: Option<String>,
}

/// Details of a CONTEXT operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextDetails {
    #[serde(rename = "Result", skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(rename = "Error", skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorObject>,
    #[serde(rename = "ReplayChildren", default)]
    pub replay_children: bool,
}

/// Details of a STEP operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepDetails {
    /// Attempt number, starting at 1
    #[serde(rename = "Attempt")]
    pub attempt: u32,
    /// When the next attempt becomes ready, while the step is PENDING
    #[serde(rename = "NextAttemptTimestamp", skip_serializing_if = "Option::is_none")]
    pub next_attempt_timestamp: Option<DateTime<Utc>>,
    #[serde(rename = "Result", skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(rename = "Error", skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorObject>,
}

/// Details of a WAIT operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitDetails {
    #[serde(rename = "ScheduledEndTimestamp")]
    pub scheduled_end_timestamp: DateTime<Utc>,
}

/// Details of a CALLBACK operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackDetails {
    /// Opaque id external systems use to complete the callback
    #[serde(rename = "CallbackId")]
    pub callback_id: String,
    #[serde(rename = "Result", skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(rename = "Error", skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorObject>,
}

/// Details of a CHAINED_INVOKE operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainedInvokeDetails {
    #[serde(rename = "Result", skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(rename = "Error", skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorObject>,
    /// Set when the target runs as a nested durable execution
    #[serde(rename = "NestedExecutionArn", skip_serializing_if = "Option::is_none")]
    pub nested_execution_arn: Option<String>,
}

/// Represents a checkpointed operation in a durable execution.
///
/// Exactly one of the `*_details` fields is populated, matching
/// `operation_type`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    /// Unique identifier for this operation within its execution
    #[serde(rename = "Id")]
    pub operation_id: String,

    #[serde(rename = "Type")]
    pub operation_type: OperationType,

    #[serde(rename = "Status")]
    pub status: OperationStatus,

    /// Parent CONTEXT operation; lookup only
    #[serde(rename = "ParentId", skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,

    #[serde(rename = "Name", skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(rename = "SubType", skip_serializing_if = "Option::is_none")]
    pub sub_type: Option<String>,

    #[serde(rename = "StartTimestamp", skip_serializing_if = "Option::is_none")]
    pub start_timestamp: Option<DateTime<Utc>>,

    #[serde(rename = "EndTimestamp", skip_serializing_if = "Option::is_none")]
    pub end_timestamp: Option<DateTime<Utc>>,

    #[serde(rename = "ExecutionDetails", skip_serializing_if = "Option::is_none")]
    pub execution_details: Option<ExecutionDetails>,

    #[serde(rename = "ContextDetails", skip_serializing_if = "Option::is_none")]
    pub context_details: Option<ContextDetails>,

    #[serde(rename = "StepDetails", skip_serializing_if = "Option::is_none")]
    pub step_details: Option<StepDetails>,

    #[serde(rename = "WaitDetails", skip_serializing_if = "Option::is_none")]
    pub wait_details: Option<WaitDetails>,

    #[serde(rename = "CallbackDetails", skip_serializing_if = "Option::is_none")]
    pub callback_details: Option<CallbackDetails>,

    #[serde(rename = "ChainedInvokeDetails", skip_serializing_if = "Option::is_none")]
    pub chained_invoke_details: Option<ChainedInvokeDetails>,
}

impl Operation {
    /// Creates a new STARTED operation with no details.
    pub fn new(operation_id: impl Into<String>, operation_type: OperationType) -> Self {
        Self {
            operation_id: operation_id.into(),
            operation_type,
            status: OperationStatus::Started,
            parent_id: None,
            name: None,
            sub_type: None,
            start_timestamp: Some(Utc::now()),
            end_timestamp: None,
            execution_details: None,
            context_details: None,
            step_details: None,
            wait_details: None,
            callback_details: None,
            chained_invoke_details: None,
        }
    }

    /// Creates an operation from the identity fields of a START update.
    pub(crate) fn from_update(update: &OperationUpdate, status: OperationStatus) -> Self {
        let mut operation = Self::new(update.operation_id.clone(), update.operation_type);
        operation.status = status;
        operation.parent_id = update.parent_id.clone();
        operation.name = update.name.clone();
        operation.sub_type = update.sub_type.clone();
        operation
    }

    /// Sets the parent ID for this operation.
    pub fn with_parent_id(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    /// Sets the name for this operation.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Returns true if the operation reached a terminal status.
    pub fn is_completed(&self) -> bool {
        self.status.is_terminal()
    }

    /// Returns true if the operation succeeded.
    pub fn is_succeeded(&self) -> bool {
        self.status.is_success()
    }

    /// The result payload recorded in whichever details block this type uses.
    pub fn result(&self) -> Option<&str> {
        match self.operation_type {
            OperationType::Step => self.step_details.as_ref()?.result.as_deref(),
            OperationType::Context => self.context_details.as_ref()?.result.as_deref(),
            OperationType::Callback => self.callback_details.as_ref()?.result.as_deref(),
            OperationType::ChainedInvoke => {
                self.chained_invoke_details.as_ref()?.result.as_deref()
            }
            OperationType::Execution | OperationType::Wait => None,
        }
    }

    /// The error recorded in whichever details block this type uses.
    pub fn error(&self) -> Option<&ErrorObject> {
        match self.operation_type {
            OperationType::Step => self.step_details.as_ref()?.error.as_ref(),
            OperationType::Context => self.context_details.as_ref()?.error.as_ref(),
            OperationType::Callback => self.callback_details.as_ref()?.error.as_ref(),
            OperationType::ChainedInvoke => self.chained_invoke_details.as_ref()?.error.as_ref(),
            OperationType::Execution | OperationType::Wait => None,
        }
    }

    /// The callback id, for CALLBACK operations.
    pub fn callback_id(&self) -> Option<&str> {
        self.callback_details.as_ref().map(|d| d.callback_id.as_str())
    }
}

/// Options for CONTEXT updates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextOptions {
    #[serde(rename = "ReplayChildren", default)]
    pub replay_children: bool,
}

/// Options for STEP RETRY updates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepOptions {
    #[serde(rename = "NextAttemptDelaySeconds", default)]
    pub next_attempt_delay_seconds: u64,
}

/// Options for WAIT START updates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitOptions {
    #[serde(rename = "WaitSeconds", default)]
    pub wait_seconds: u64,
}

/// Options for CALLBACK START updates.
///
/// A zero value disables the corresponding timeout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackOptions {
    #[serde(rename = "TimeoutSeconds", default)]
    pub timeout_seconds: u64,
    #[serde(rename = "HeartbeatTimeoutSeconds", default)]
    pub heartbeat_timeout_seconds: u64,
}

/// Options for CHAINED_INVOKE START updates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainedInvokeOptions {
    #[serde(rename = "FunctionName")]
    pub function_name: String,
    #[serde(rename = "TenantId", skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
}

/// Represents an update to be checkpointed for an operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationUpdate {
    #[serde(rename = "Id")]
    pub operation_id: String,

    #[serde(rename = "Type")]
    pub operation_type: OperationType,

    #[serde(rename = "Action")]
    pub action: OperationAction,

    #[serde(rename = "ParentId", skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,

    #[serde(rename = "Name", skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(rename = "SubType", skip_serializing_if = "Option::is_none")]
    pub sub_type: Option<String>,

    /// Serialized result (SUCCEED) or input (CHAINED_INVOKE START)
    #[serde(rename = "Payload", skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,

    #[serde(rename = "Error", skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorObject>,

    #[serde(rename = "ContextOptions", skip_serializing_if = "Option::is_none")]
    pub context_options: Option<ContextOptions>,

    #[serde(rename = "StepOptions", skip_serializing_if = "Option::is_none")]
    pub step_options: Option<StepOptions>,

    #[serde(rename = "WaitOptions", skip_serializing_if = "Option::is_none")]
    pub wait_options: Option<WaitOptions>,

    #[serde(rename = "CallbackOptions", skip_serializing_if = "Option::is_none")]
    pub callback_options: Option<CallbackOptions>,

    #[serde(rename = "ChainedInvokeOptions", skip_serializing_if = "Option::is_none")]
    pub chained_invoke_options: Option<ChainedInvokeOptions>,
}

impl OperationUpdate {
    fn with_action(
        operation_id: impl Into<String>,
        operation_type: OperationType,
        action: OperationAction,
    ) -> Self {
        Self {
            operation_id: operation_id.into(),
            operation_type,
            action,
            parent_id: None,
            name: None,
            sub_type: None,
            payload: None,
            error: None,
            context_options: None,
            step_options: None,
            wait_options: None,
            callback_options: None,
            chained_invoke_options: None,
        }
    }

    /// Creates a new OperationUpdate to start an operation.
    pub fn start(operation_id: impl Into<String>, operation_type: OperationType) -> Self {
        Self::with_action(operation_id, operation_type, OperationAction::Start)
    }

    /// Creates a new OperationUpdate to mark an operation as succeeded.
    pub fn succeed(
        operation_id: impl Into<String>,
        operation_type: OperationType,
        payload: Option<String>,
    ) -> Self {
        let mut update = Self::with_action(operation_id, operation_type, OperationAction::Succeed);
        update.payload = payload;
        update
    }

    /// Creates a new OperationUpdate to mark an operation as failed.
    pub fn fail(
        operation_id: impl Into<String>,
        operation_type: OperationType,
        error: ErrorObject,
    ) -> Self {
        let mut update = Self::with_action(operation_id, operation_type, OperationAction::Fail);
        update.error = Some(error);
        update
    }

    /// Creates a new OperationUpdate to cancel an operation.
    pub fn cancel(operation_id: impl Into<String>, operation_type: OperationType) -> Self {
        Self::with_action(operation_id, operation_type, OperationAction::Cancel)
    }

    /// Creates a STEP RETRY update that becomes ready after `delay_seconds`.
    pub fn retry(operation_id: impl Into<String>, delay_seconds: u64, error: ErrorObject) -> Self {
        let mut update = Self::with_action(operation_id, OperationType::Step, OperationAction::Retry);
        update.error = Some(error);
        update.step_options = Some(StepOptions {
            next_attempt_delay_seconds: delay_seconds,
        });
        update
    }

    /// Creates a WAIT START update for `wait_seconds`.
    pub fn wait(operation_id: impl Into<String>, wait_seconds: u64) -> Self {
        let mut update = Self::start(operation_id, OperationType::Wait);
        update.wait_options = Some(WaitOptions { wait_seconds });
        update
    }

    /// Creates a CALLBACK START update.
    pub fn callback(operation_id: impl Into<String>, options: CallbackOptions) -> Self {
        let mut update = Self::start(operation_id, OperationType::Callback);
        update.callback_options = Some(options);
        update
    }

    /// Creates a CHAINED_INVOKE START update targeting `function_name`.
    pub fn chained_invoke(
        operation_id: impl Into<String>,
        function_name: impl Into<String>,
        payload: Option<String>,
    ) -> Self {
        let mut update = Self::start(operation_id, OperationType::ChainedInvoke);
        update.payload = payload;
        update.chained_invoke_options = Some(ChainedInvokeOptions {
            function_name: function_name.into(),
            tenant_id: None,
        });
        update
    }

    /// Sets the parent ID for this update.
    pub fn with_parent_id(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    /// Sets the name for this update.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the sub type for this update.
    pub fn with_sub_type(mut self, sub_type: impl Into<String>) -> Self {
        self.sub_type = Some(sub_type.into());
        self
    }

    /// Sets the payload for this update.
    pub fn with_payload(mut self, payload: impl Into<String>) -> Self {
        self.payload = Some(payload.into());
        self
    }

    /// Sets the context options for this update.
    pub fn with_context_options(mut self, options: ContextOptions) -> Self {
        self.context_options = Some(options);
        self
    }
}
