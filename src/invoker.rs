//! Running durable handlers.
//!
//! The executor never calls a handler directly. It builds an
//! [`InvocationInput`] and hands it to an [`Invoker`]. Handlers talk back
//! to the service through the [`DurableServiceClient`] attached to that
//! input.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::checkpoint::CheckpointOutput;
use crate::error::{ErrorObject, ServiceError, ServiceResult};
use crate::execution::Execution;
use crate::operation::{Operation, OperationUpdate};

/// Page of operations returned by [`DurableServiceClient::get_execution_state`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GetExecutionStateOutput {
    #[serde(rename = "Operations")]
    pub operations: Vec<Operation>,
    #[serde(rename = "NextMarker", skip_serializing_if = "Option::is_none")]
    pub next_marker: Option<String>,
}

/// The service API a running handler uses.
#[async_trait]
pub trait DurableServiceClient: Send + Sync {
    /// Send a batch of updates gated by `checkpoint_token`.
    async fn checkpoint(
        &self,
        durable_execution_arn: &str,
        checkpoint_token: &str,
        updates: Vec<OperationUpdate>,
        client_token: Option<&str>,
    ) -> ServiceResult<CheckpointOutput>;

    /// Page through the execution's operations.
    async fn get_execution_state(
        &self,
        durable_execution_arn: &str,
        checkpoint_token: &str,
        marker: Option<&str>,
        max_items: Option<usize>,
    ) -> ServiceResult<GetExecutionStateOutput>;
}

/// Everything a handler receives for one invocation.
#[derive(Clone, Serialize, Deserialize)]
pub struct InvocationInput {
    #[serde(rename = "DurableExecutionArn")]
    pub durable_execution_arn: String,
    /// Token for the handler's first checkpoint
    #[serde(rename = "CheckpointToken")]
    pub checkpoint_token: String,
    /// Full operation list, root first
    #[serde(rename = "InitialExecutionState")]
    pub operations: Vec<Operation>,
    #[serde(skip)]
    pub service_client: Option<Arc<dyn DurableServiceClient>>,
}

impl std::fmt::Debug for InvocationInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvocationInput")
            .field("durable_execution_arn", &self.durable_execution_arn)
            .field("checkpoint_token", &self.checkpoint_token)
            .field("operations", &self.operations.len())
            .field("service_client", &self.service_client.is_some())
            .finish()
    }
}

impl InvocationInput {
    /// Attach the client the handler checkpoints through.
    pub fn with_client(mut self, client: Arc<dyn DurableServiceClient>) -> Self {
        self.service_client = Some(client);
        self
    }

    /// The input payload the execution was started with.
    pub fn input_payload(&self) -> Option<&str> {
        self.operations
            .first()
            .and_then(|root| root.execution_details.as_ref())
            .and_then(|details| details.input_payload.as_deref())
    }

    /// The attached client, or InvalidParameterValue if none was attached.
    pub fn client(&self) -> ServiceResult<Arc<dyn DurableServiceClient>> {
        self.service_client
            .clone()
            .ok_or_else(|| ServiceError::invalid_parameter("no service client attached"))
    }
}

/// Status a handler reports at the end of an invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvocationStatus {
    Succeeded,
    Failed,
    TimedOut,
    /// Suspended until a timer, retry, callback or chained invoke resumes it
    Pending,
}

/// What a handler returns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvocationOutput {
    #[serde(rename = "Status")]
    pub status: InvocationStatus,
    #[serde(rename = "Result", skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(rename = "Error", skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorObject>,
}

impl InvocationOutput {
    pub fn succeeded(result: impl Into<String>) -> Self {
        Self {
            status: InvocationStatus::Succeeded,
            result: Some(result.into()),
            error: None,
        }
    }

    pub fn failed(error: ErrorObject) -> Self {
        Self {
            status: InvocationStatus::Failed,
            result: None,
            error: Some(error),
        }
    }

    pub fn timed_out(error: ErrorObject) -> Self {
        Self {
            status: InvocationStatus::TimedOut,
            result: None,
            error: Some(error),
        }
    }

    pub fn pending() -> Self {
        Self {
            status: InvocationStatus::Pending,
            result: None,
            error: None,
        }
    }
}

/// Runs a durable function.
#[async_trait]
pub trait Invoker: Send + Sync {
    /// Build the input for the next invocation, issuing a fresh checkpoint token.
    fn create_invocation_input(&self, execution: &mut Execution) -> InvocationInput {
        InvocationInput {
            durable_execution_arn: execution.durable_execution_arn.clone(),
            checkpoint_token: execution.get_new_checkpoint_token(),
            operations: execution.operations.clone(),
            service_client: None,
        }
    }

    /// Run `function_name` once.
    ///
    /// ResourceNotFound means the function does not exist and is never retried.
    async fn invoke(
        &self,
        function_name: &str,
        input: InvocationInput,
    ) -> ServiceResult<InvocationOutput>;
}

/// Future returned by a [`DurableHandler`].
pub type HandlerFuture = Pin<Box<dyn Future<Output = ServiceResult<InvocationOutput>> + Send>>;

/// An in-process durable function.
pub type DurableHandler = Arc<dyn Fn(InvocationInput) -> HandlerFuture + Send + Sync>;

/// [`Invoker`] that runs registered async handlers in the current process.
#[derive(Default)]
pub struct InProcessInvoker {
    handlers: RwLock<HashMap<String, DurableHandler>>,
}

impl std::fmt::Debug for InProcessInvoker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let handlers = self.handlers.read().unwrap_or_else(|e| e.into_inner());
        f.debug_struct("InProcessInvoker")
            .field("functions", &handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl InProcessInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under `function_name`, replacing any previous one.
    pub fn register<F, Fut>(&self, function_name: impl Into<String>, handler: F)
    where
        F: Fn(InvocationInput) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ServiceResult<InvocationOutput>> + Send + 'static,
    {
        let handler: DurableHandler =
            Arc::new(move |input: InvocationInput| -> HandlerFuture { Box::pin(handler(input)) });
        self.handlers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(function_name.into(), handler);
    }

    /// Builder form of [`register`](Self::register).
    pub fn with_handler<F, Fut>(self, function_name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(InvocationInput) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ServiceResult<InvocationOutput>> + Send + 'static,
    {
        self.register(function_name, handler);
        self
    }

    pub fn contains(&self, function_name: &str) -> bool {
        self.handlers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(function_name)
    }
}

#[async_trait]
impl Invoker for InProcessInvoker {
    async fn invoke(
        &self,
        function_name: &str,
        input: InvocationInput,
    ) -> ServiceResult<InvocationOutput> {
        let handler = self
            .handlers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(function_name)
            .cloned()
            .ok_or_else(|| {
                ServiceError::resource_not_found(format!("Function not found: {}", function_name))
            })?;

        tracing::debug!(
            function_name,
            "[{}] Invoking handler",
            input.durable_execution_arn
        );

        match tokio::spawn(handler(input)).await {
            Ok(output) => output,
            Err(join_error) => Err(ServiceError::invocation_failed(format!(
                "Handler {} panicked: {}",
                function_name, join_error
            ))),
        }
    }
}
