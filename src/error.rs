//! Error types for the local durable execution service.
//!
//! [`ServiceError`] is the single error enum surfaced by every public
//! operation. [`ErrorObject`] is the serializable error payload stored on
//! operations and execution results.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::operation::OperationType;

/// Errors returned by the local durable execution service.
///
/// # Examples
///
/// ```
/// use durable_execution_local::ServiceError;
///
/// let err = ServiceError::resource_not_found("Execution abc not found");
/// assert!(err.to_string().contains("abc"));
/// assert_eq!(err.exception_name(), "ResourceNotFoundException");
/// ```
#[derive(Debug, Error)]
pub enum ServiceError {
    /// An execution, operation, function or callback does not exist.
    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    /// Malformed input, or a stale or unknown checkpoint token.
    #[error("Invalid parameter value: {0}")]
    InvalidParameterValue(String),

    /// The requested transition is not legal from the current state.
    #[error("Illegal state: {0}")]
    IllegalState(String),

    /// The operation exists but has a different type than the transition expects.
    #[error("Operation {operation_id} type mismatch: expected {expected}, found {found}")]
    OperationTypeMismatch {
        /// The operation that was addressed
        operation_id: String,
        /// The type the transition requires
        expected: OperationType,
        /// The type actually recorded
        found: OperationType,
    },

    /// The execution has already reached a terminal state.
    #[error("Execution already completed: {0}")]
    ExecutionAlreadyCompleted(String),

    /// The invoker failed to run the handler. Retried by the executor.
    #[error("Invocation failed: {0}")]
    InvocationFailed(String),

    /// The scheduler has been stopped and cannot accept work.
    #[error("Scheduler is not running")]
    SchedulerNotRunning,

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ServiceError {
    /// Creates a new ResourceNotFound error.
    pub fn resource_not_found(message: impl Into<String>) -> Self {
        Self::ResourceNotFound(message.into())
    }

    /// Creates a new InvalidParameterValue error.
    pub fn invalid_parameter(message: impl Into<String>) -> Self {
        Self::InvalidParameterValue(message.into())
    }

    /// Creates a new IllegalState error.
    pub fn illegal_state(message: impl Into<String>) -> Self {
        Self::IllegalState(message.into())
    }

    /// Creates a new OperationTypeMismatch error.
    pub fn type_mismatch(
        operation_id: impl Into<String>,
        expected: OperationType,
        found: OperationType,
    ) -> Self {
        Self::OperationTypeMismatch {
            operation_id: operation_id.into(),
            expected,
            found,
        }
    }

    /// Creates a new ExecutionAlreadyCompleted error.
    pub fn execution_already_completed(execution_arn: impl Into<String>) -> Self {
        Self::ExecutionAlreadyCompleted(execution_arn.into())
    }

    /// Creates a new InvocationFailed error.
    pub fn invocation_failed(message: impl Into<String>) -> Self {
        Self::InvocationFailed(message.into())
    }

    /// Returns true if the executor should retry the invocation that produced this error.
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::InvocationFailed(_))
    }

    /// Returns true if this is a ResourceNotFound error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::ResourceNotFound(_))
    }

    /// The service exception name reported as `ErrorType` on error payloads.
    pub fn exception_name(&self) -> &'static str {
        match self {
            Self::ResourceNotFound(_) => "ResourceNotFoundException",
            Self::InvalidParameterValue(_) => "InvalidParameterValueException",
            Self::IllegalState(_) | Self::OperationTypeMismatch { .. } => "IllegalStateException",
            // The service has no dedicated exception for this; stopping a
            // finished execution reports the already-started one.
            Self::ExecutionAlreadyCompleted(_) => "ExecutionAlreadyStartedException",
            Self::InvocationFailed(_) => "InvocationFailedException",
            Self::SchedulerNotRunning => "ServiceException",
            Self::Serialization(_) => "SerializationException",
        }
    }

    /// The bare message without the variant prefix.
    pub fn message(&self) -> String {
        match self {
            Self::ResourceNotFound(m)
            | Self::InvalidParameterValue(m)
            | Self::IllegalState(m)
            | Self::ExecutionAlreadyCompleted(m)
            | Self::InvocationFailed(m) => m.clone(),
            other => other.to_string(),
        }
    }
}

/// Result type for service operations.
pub type ServiceResult<T> = Result<T, ServiceError>;

/// Error details recorded on operations and terminal execution results.
///
/// # Examples
///
/// ```
/// use durable_execution_local::ErrorObject;
///
/// let error = ErrorObject::new("ValueError", "boom");
/// let json = serde_json::to_string(&error).unwrap();
/// assert!(json.contains("ErrorMessage"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorObject {
    /// The error type/name
    #[serde(rename = "ErrorType", skip_serializing_if = "Option::is_none", default)]
    pub error_type: Option<String>,
    /// The error message
    #[serde(rename = "ErrorMessage", skip_serializing_if = "Option::is_none", default)]
    pub error_message: Option<String>,
    /// Optional structured error data
    #[serde(rename = "ErrorData", skip_serializing_if = "Option::is_none", default)]
    pub error_data: Option<String>,
    /// Optional stack trace
    #[serde(rename = "StackTrace", skip_serializing_if = "Option::is_none", default)]
    pub stack_trace: Option<Vec<String>>,
}

impl ErrorObject {
    /// Creates a new ErrorObject.
    pub fn new(error_type: impl Into<String>, error_message: impl Into<String>) -> Self {
        Self {
            error_type: Some(error_type.into()),
            error_message: Some(error_message.into()),
            error_data: None,
            stack_trace: None,
        }
    }

    /// Creates an ErrorObject that only carries a message.
    pub fn from_message(error_message: impl Into<String>) -> Self {
        Self {
            error_type: None,
            error_message: Some(error_message.into()),
            error_data: None,
            stack_trace: None,
        }
    }

    /// Attaches structured error data.
    pub fn with_error_data(mut self, error_data: impl Into<String>) -> Self {
        self.error_data = Some(error_data.into());
        self
    }

    /// Attaches a stack trace.
    pub fn with_stack_trace(mut self, stack_trace: Vec<String>) -> Self {
        self.stack_trace = Some(stack_trace);
        self
    }

    /// The message, or an empty string when absent.
    pub fn message(&self) -> &str {
        self.error_message.as_deref().unwrap_or_default()
    }
}

impl From<&ServiceError> for ErrorObject {
    fn from(error: &ServiceError) -> Self {
        Self::new(error.exception_name(), error.message())
    }
}

impl std::fmt::Display for ErrorObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.error_type {
            Some(error_type) => write!(f, "{}: {}", error_type, self.message()),
            None => write!(f, "{}", self.message()),
        }
    }
}
