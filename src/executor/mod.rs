//! The executor: public lifecycle API and invocation orchestration.
//!
//! An [`Executor`] ties together a store, a scheduler, an invoker and a
//! registry of chained invoke targets. All follow-up work (re-invocations,
//! timers, chained functions) runs as scheduler callbacks, and public calls
//! that change an execution are forwarded to the scheduler worker too, so a
//! single execution is only ever driven from that one thread.

mod callbacks;
mod chained;
mod invocation;
mod queries;

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::oneshot;
use uuid::Uuid;

pub use queries::{
    ExecutionDetailsOutput, ExecutionSummary, GetExecutionHistoryOutput, ListExecutionsOutput,
    ListExecutionsQuery,
};

use crate::checkpoint::{CheckpointOutput, CheckpointProcessor};
use crate::config::ExecutorConfig;
use crate::error::{ErrorObject, ServiceError, ServiceResult};
use crate::execution::{
    ChainedParent, Execution, ExecutionStatus, StartDurableExecutionInput,
    StartDurableExecutionOutput,
};
use crate::invoker::{DurableServiceClient, GetExecutionStateOutput, Invoker};
use crate::observer::ExecutionObserver;
use crate::operation::{CallbackOptions, OperationType, OperationUpdate};
use crate::registry::HandlerRegistry;
use crate::scheduler::{callback, Event, Scheduler};
use crate::store::ExecutionStore;

use callbacks::CallbackTimers;

/// Default error message for [`Executor::stop_execution`].
pub const STOP_MESSAGE: &str = "Execution stopped by user request";

/// Terminal transition requested for an execution.
enum Close {
    Succeeded(Option<String>),
    Failed(ErrorObject),
    TimedOut(ErrorObject),
    Stopped(ErrorObject),
}

struct ExecutorInner {
    store: Arc<dyn ExecutionStore>,
    scheduler: Scheduler,
    invoker: Arc<dyn Invoker>,
    registry: HandlerRegistry,
    config: ExecutorConfig,
    processor: CheckpointProcessor,
    /// Events of executions still running; removed once the execution closes
    completion_events: Mutex<HashMap<String, Event>>,
    /// Pending callback timers per execution arn, then per operation id
    callback_timers: Mutex<HashMap<String, HashMap<String, CallbackTimers>>>,
}

/// Orchestrates durable executions.
///
/// Cloning an `Executor` is cheap and yields a handle to the same state.
#[derive(Clone)]
pub struct Executor {
    inner: Arc<ExecutorInner>,
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("config", &self.inner.config)
            .field("scheduler", &self.inner.scheduler)
            .field("registry", &self.inner.registry)
            .finish_non_exhaustive()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl Executor {
    pub fn new(
        store: Arc<dyn ExecutionStore>,
        scheduler: Scheduler,
        invoker: Arc<dyn Invoker>,
        registry: HandlerRegistry,
        config: ExecutorConfig,
    ) -> Self {
        let processor = CheckpointProcessor::new(Arc::clone(&store));
        Self {
            inner: Arc::new(ExecutorInner {
                store,
                scheduler,
                invoker,
                registry,
                config,
                processor,
                completion_events: Mutex::new(HashMap::new()),
                callback_timers: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.inner.config
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.inner.scheduler
    }

    pub fn store(&self) -> &Arc<dyn ExecutionStore> {
        &self.inner.store
    }

    fn completion_event(&self, execution_arn: &str) -> Option<Event> {
        lock(&self.inner.completion_events).get(execution_arn).cloned()
    }

    /// Create and persist a new execution, then schedule its first invocation.
    pub async fn start_execution(
        &self,
        input: StartDurableExecutionInput,
    ) -> ServiceResult<StartDurableExecutionOutput> {
        self.start_with_parent(input, None, 0).await
    }

    async fn start_with_parent(
        &self,
        mut input: StartDurableExecutionInput,
        parent: Option<ChainedParent>,
        depth: u32,
    ) -> ServiceResult<StartDurableExecutionOutput> {
        if input.invocation_id.is_none() {
            input.invocation_id = Some(Uuid::new_v4().to_string());
        }

        // Nothing could ever invoke or close it.
        if !self.inner.scheduler.is_started() {
            return Err(ServiceError::SchedulerNotRunning);
        }

        let mut execution = Execution::new(input);
        execution.parent = parent;
        execution.depth = depth;
        execution.start()?;

        let execution_arn = execution.durable_execution_arn.clone();
        let event = self.inner.scheduler.create_event();
        lock(&self.inner.completion_events).insert(execution_arn.clone(), event);
        if let Err(e) = self.inner.store.save(&execution).await {
            lock(&self.inner.completion_events).remove(&execution_arn);
            return Err(e);
        }

        tracing::info!(
            function_name = %execution.start_input.function_name,
            execution_name = %execution.start_input.execution_name,
            depth,
            "[{}] Execution started",
            execution_arn
        );

        if let Err(e) = self.invoke_execution(&execution_arn, Duration::ZERO) {
            tracing::error!(error = %e, "[{}] Failed to schedule first invocation", execution_arn);
            execution.complete_fail(ErrorObject::from(&e))?;
            self.inner.store.update(&execution).await?;
            if let Some(event) = lock(&self.inner.completion_events).remove(&execution_arn) {
                event.set();
            }
            return Err(e);
        }
        Ok(StartDurableExecutionOutput { execution_arn })
    }

    /// Wait for the execution to reach a terminal state.
    ///
    /// Returns `false` if `timeout` elapses first. Executions that already
    /// closed answer from the store.
    pub async fn wait_until_complete(
        &self,
        execution_arn: &str,
        timeout: Option<Duration>,
    ) -> ServiceResult<bool> {
        if let Some(event) = self.completion_event(execution_arn) {
            return Ok(event.wait(timeout).await);
        }

        let execution = self.inner.store.load(execution_arn).await?;
        if execution.is_complete {
            Ok(true)
        } else {
            Err(ServiceError::resource_not_found(format!(
                "Execution {} is not tracked by this executor",
                execution_arn
            )))
        }
    }

    /// Number of executions whose completion can still be awaited on an event.
    pub fn tracked_execution_count(&self) -> usize {
        lock(&self.inner.completion_events).len()
    }

    pub async fn complete_execution(
        &self,
        execution_arn: &str,
        result: Option<String>,
    ) -> ServiceResult<()> {
        self.close_on_worker(execution_arn, Close::Succeeded(result)).await
    }

    pub async fn fail_execution(&self, execution_arn: &str, error: ErrorObject) -> ServiceResult<()> {
        self.close_on_worker(execution_arn, Close::Failed(error)).await
    }

    pub async fn timeout_execution(
        &self,
        execution_arn: &str,
        error: ErrorObject,
    ) -> ServiceResult<()> {
        self.close_on_worker(execution_arn, Close::TimedOut(error)).await
    }

    /// Stop a running execution.
    ///
    /// Fails with ExecutionAlreadyCompleted if it has already finished.
    pub async fn stop_execution(
        &self,
        execution_arn: &str,
        error: Option<ErrorObject>,
    ) -> ServiceResult<()> {
        let arn = execution_arn.to_string();
        self.on_worker(execution_arn, move |executor| async move {
            executor.stop_now(&arn, error).await
        })
        .await
    }

    async fn stop_now(&self, execution_arn: &str, error: Option<ErrorObject>) -> ServiceResult<()> {
        let execution = self.inner.store.load(execution_arn).await?;
        if execution.is_complete {
            return Err(ServiceError::execution_already_completed(format!(
                "Execution {} has already completed",
                execution_arn
            )));
        }

        let error = error.unwrap_or_else(|| ErrorObject::new("ExecutionStopped", STOP_MESSAGE));
        self.close_execution(execution_arn, Close::Stopped(error)).await
    }

    async fn close_on_worker(&self, execution_arn: &str, close: Close) -> ServiceResult<()> {
        let arn = execution_arn.to_string();
        self.on_worker(execution_arn, move |executor| async move {
            executor.close_execution(&arn, close).await
        })
        .await
    }

    /// Run `work` on the scheduler worker, after whatever is already running there.
    ///
    /// Every mutation of a stored execution goes through the worker, so
    /// load-modify-update sequences never interleave. Runs inline when called
    /// from the worker itself.
    async fn on_worker<F, Fut, T>(&self, execution_arn: &str, work: F) -> ServiceResult<T>
    where
        F: FnOnce(Executor) -> Fut + Send + 'static,
        Fut: Future<Output = ServiceResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        if self.inner.scheduler.is_worker_thread() {
            return work(self.clone()).await;
        }

        let (sender, receiver) = oneshot::channel();
        let executor = self.clone();
        self.inner.scheduler.call_later(
            callback(move || async move {
                let _ = sender.send(work(executor).await);
                Ok(())
            }),
            Duration::ZERO,
            self.completion_event(execution_arn),
        )?;
        receiver
            .await
            .map_err(|_| ServiceError::SchedulerNotRunning)?
    }

    async fn close_execution(&self, execution_arn: &str, close: Close) -> ServiceResult<()> {
        let mut execution = self.inner.store.load(execution_arn).await?;
        match close {
            Close::Succeeded(result) => execution.complete_success(result)?,
            Close::Failed(error) => execution.complete_fail(error)?,
            Close::TimedOut(error) => execution.complete_timeout(error)?,
            Close::Stopped(error) => execution.complete_stopped(error)?,
        }
        self.inner.store.update(&execution).await?;

        tracing::info!(status = %execution.status(), "[{}] Execution closed", execution_arn);

        self.cancel_callback_timers(execution_arn);
        if let Some(event) = lock(&self.inner.completion_events).remove(execution_arn) {
            event.set();
        }
        self.resume_parent(&execution)
    }

    /// Hand a finished nested execution's outcome to the CHAINED_INVOKE waiting on it.
    fn resume_parent(&self, execution: &Execution) -> ServiceResult<()> {
        let (Some(parent), Some(result)) = (&execution.parent, &execution.result) else {
            return Ok(());
        };

        let operation_id = parent.operation_id.clone();
        let update = match result.status {
            ExecutionStatus::Succeeded => OperationUpdate::succeed(
                operation_id,
                OperationType::ChainedInvoke,
                result.result.clone(),
            ),
            ExecutionStatus::Stopped => {
                let mut update = OperationUpdate::cancel(operation_id, OperationType::ChainedInvoke);
                update.error = result.error.clone();
                update
            }
            ExecutionStatus::Failed | ExecutionStatus::TimedOut | ExecutionStatus::Running => {
                OperationUpdate::fail(
                    operation_id,
                    OperationType::ChainedInvoke,
                    result
                        .error
                        .clone()
                        .unwrap_or_else(|| ErrorObject::from_message("Nested execution failed")),
                )
            }
        };

        self.schedule_checkpoint(&parent.execution_arn, update)
    }

    /// Apply a batch of updates on behalf of a handler.
    pub async fn checkpoint_execution(
        &self,
        execution_arn: &str,
        checkpoint_token: &str,
        updates: Vec<OperationUpdate>,
        client_token: Option<&str>,
    ) -> ServiceResult<CheckpointOutput> {
        self.inner
            .processor
            .process_checkpoint(execution_arn, checkpoint_token, updates, client_token, self)
            .await
    }

    /// Snapshot of the stored execution.
    pub async fn get_execution(&self, execution_arn: &str) -> ServiceResult<Execution> {
        self.inner.store.load(execution_arn).await
    }
}

#[async_trait]
impl ExecutionObserver for Executor {
    async fn on_completed(&self, execution_arn: &str, result: Option<String>) -> ServiceResult<()> {
        self.complete_execution(execution_arn, result).await
    }

    async fn on_failed(&self, execution_arn: &str, error: ErrorObject) -> ServiceResult<()> {
        self.fail_execution(execution_arn, error).await
    }

    async fn on_wait_timer_scheduled(
        &self,
        execution_arn: &str,
        operation_id: &str,
        delay: Duration,
    ) -> ServiceResult<()> {
        self.schedule_wait_completion(execution_arn, operation_id, delay)
    }

    async fn on_step_retry_scheduled(
        &self,
        execution_arn: &str,
        operation_id: &str,
        delay: Duration,
    ) -> ServiceResult<()> {
        self.schedule_step_retry(execution_arn, operation_id, delay)
    }

    async fn on_chained_invoke_started(
        &self,
        execution_arn: &str,
        operation_id: &str,
        function_name: &str,
        payload: Option<String>,
    ) -> ServiceResult<()> {
        self.start_chained_invoke(execution_arn, operation_id, function_name, payload)
            .await
    }

    async fn on_callback_created(
        &self,
        execution_arn: &str,
        operation_id: &str,
        callback_id: &str,
        options: CallbackOptions,
    ) -> ServiceResult<()> {
        tracing::debug!(operation_id, callback_id, "[{}] Callback created", execution_arn);
        self.arm_callback_timers(execution_arn, operation_id, options)
    }
}

#[async_trait]
impl DurableServiceClient for Executor {
    async fn checkpoint(
        &self,
        durable_execution_arn: &str,
        checkpoint_token: &str,
        updates: Vec<OperationUpdate>,
        client_token: Option<&str>,
    ) -> ServiceResult<CheckpointOutput> {
        self.checkpoint_execution(durable_execution_arn, checkpoint_token, updates, client_token)
            .await
    }

    async fn get_execution_state(
        &self,
        durable_execution_arn: &str,
        checkpoint_token: &str,
        marker: Option<&str>,
        max_items: Option<usize>,
    ) -> ServiceResult<GetExecutionStateOutput> {
        Executor::get_execution_state(
            self,
            durable_execution_arn,
            Some(checkpoint_token),
            marker,
            max_items,
        )
        .await
    }
}
