//! Shared test utilities for integration tests.

#![allow(dead_code)] // Not every test file uses every helper

use std::sync::Arc;
use std::time::Duration;

use durable_execution_local::{
    DurableServiceClient, ErrorObject, Executor, ExecutorConfig, HandlerRegistry, InMemoryExecutionStore,
    InProcessInvoker, InvocationInput, Operation, OperationStatus, OperationUpdate, Scheduler,
    SchedulerConfig, ServiceResult,
};

/// Generous bound for `wait_until_complete`; time skipping makes real waits short.
pub const COMPLETION_TIMEOUT: Duration = Duration::from_secs(10);

/// Installs a tracing subscriber once; honours `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// An executor wired to a time-skipping scheduler and an in-memory store.
pub struct TestHarness {
    pub executor: Executor,
    pub scheduler: Scheduler,
    pub invoker: Arc<InProcessInvoker>,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_parts(HandlerRegistry::new(), ExecutorConfig::default())
    }

    pub fn with_registry(registry: HandlerRegistry) -> Self {
        Self::with_parts(registry, ExecutorConfig::default())
    }

    pub fn with_config(config: ExecutorConfig) -> Self {
        Self::with_parts(HandlerRegistry::new(), config)
    }

    pub fn with_parts(registry: HandlerRegistry, config: ExecutorConfig) -> Self {
        Self::with_scheduler(SchedulerConfig::default().with_time_skipping(true), registry, config)
    }

    /// Timers fire on the wall clock; keep delays in these tests short.
    pub fn real_time(config: ExecutorConfig) -> Self {
        Self::with_scheduler(SchedulerConfig::default(), HandlerRegistry::new(), config)
    }

    fn with_scheduler(
        scheduler_config: SchedulerConfig,
        registry: HandlerRegistry,
        config: ExecutorConfig,
    ) -> Self {
        init_tracing();
        let scheduler = Scheduler::new(scheduler_config);
        scheduler.start().expect("scheduler should start");
        let invoker = Arc::new(InProcessInvoker::new());
        let executor = Executor::new(
            Arc::new(InMemoryExecutionStore::new()),
            scheduler.clone(),
            invoker.clone(),
            registry,
            config,
        );
        Self {
            executor,
            scheduler,
            invoker,
        }
    }

    /// Waits for completion and fails the test on timeout.
    pub async fn wait(&self, execution_arn: &str) {
        let done = self
            .executor
            .wait_until_complete(execution_arn, Some(COMPLETION_TIMEOUT))
            .await
            .expect("execution should be known");
        assert!(done, "execution {} did not complete in time", execution_arn);
    }
}

impl Drop for TestHarness {
    fn drop(&mut self) {
        self.scheduler.stop();
    }
}

/// Looks up a non-root operation in a handler's input.
pub fn find<'a>(input: &'a InvocationInput, operation_id: &str) -> Option<&'a Operation> {
    input
        .operations
        .iter()
        .find(|op| op.operation_id == operation_id)
}

/// True once `operation_id` has reached `status` in the handler's input.
pub fn has_status(input: &InvocationInput, operation_id: &str, status: OperationStatus) -> bool {
    find(input, operation_id).map_or(false, |op| op.status == status)
}

/// Checkpoints `updates` with the input's token through the input's client.
pub async fn checkpoint(input: &InvocationInput, updates: Vec<OperationUpdate>) -> ServiceResult<()> {
    input
        .client()?
        .checkpoint(
            &input.durable_execution_arn,
            &input.checkpoint_token,
            updates,
            None,
        )
        .await?;
    Ok(())
}

pub fn error(message: &str) -> ErrorObject {
    ErrorObject::new("TestError", message)
}
