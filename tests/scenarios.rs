//! End-to-end executions driven through the executor with in-process handlers.
//!
//! Every test runs on a time-skipping scheduler, so waits, retry backoffs and
//! callback timeouts complete as soon as nothing else is runnable.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use durable_execution_local::{
    CallbackOptions, CallbackToken, ErrorObject, ExecutionQuery, ExecutionStatus,
    ExecutorConfig, HandlerRegistry, InvocationInput, InvocationOutput, ListExecutionsQuery,
    Operation, OperationStatus, OperationType, OperationUpdate, ServiceError, ServiceResult,
    StartDurableExecutionInput,
};

use common::*;

// =============================================================================
// Handlers
// =============================================================================

async fn hello(_input: InvocationInput) -> ServiceResult<InvocationOutput> {
    Ok(InvocationOutput::succeeded("\"ok\""))
}

async fn wait_then_finish(
    input: InvocationInput,
    calls: Arc<AtomicUsize>,
    wait_seconds: u64,
) -> ServiceResult<InvocationOutput> {
    calls.fetch_add(1, Ordering::SeqCst);
    if has_status(&input, "w1", OperationStatus::Succeeded) {
        return Ok(InvocationOutput::succeeded("\"waited\""));
    }
    if find(&input, "w1").is_none() {
        checkpoint(&input, vec![OperationUpdate::wait("w1", wait_seconds)]).await?;
    }
    Ok(InvocationOutput::pending())
}

/// Invokes `function_name` once and mirrors its outcome.
async fn invoke_once(
    input: InvocationInput,
    function_name: &'static str,
) -> ServiceResult<InvocationOutput> {
    match find(&input, "c1") {
        None => {
            let payload = input.input_payload().map(str::to_string);
            checkpoint(
                &input,
                vec![OperationUpdate::chained_invoke("c1", function_name, payload)],
            )
            .await?;
            Ok(InvocationOutput::pending())
        }
        Some(op) => Ok(mirror(op)),
    }
}

/// Like [`invoke_once`], but reports a rejected checkpoint as the handler's failure.
async fn invoke_or_report(
    input: InvocationInput,
    function_name: &'static str,
) -> ServiceResult<InvocationOutput> {
    if let Some(op) = find(&input, "c1") {
        return Ok(mirror(op));
    }
    let update = OperationUpdate::chained_invoke("c1", function_name, None);
    match checkpoint(&input, vec![update]).await {
        Ok(()) => Ok(InvocationOutput::pending()),
        Err(e) => Ok(InvocationOutput::failed(ErrorObject::from(&e))),
    }
}

fn mirror(op: &Operation) -> InvocationOutput {
    match op.status {
        OperationStatus::Succeeded => {
            InvocationOutput::succeeded(op.result().unwrap_or("null").to_string())
        }
        status if status.is_terminal() => InvocationOutput::failed(
            op.error()
                .cloned()
                .unwrap_or_else(|| ErrorObject::from_message("operation did not succeed")),
        ),
        _ => InvocationOutput::pending(),
    }
}

/// Feeds the input through `add-one`, then feeds that result through `double`.
async fn add_then_double(input: InvocationInput) -> ServiceResult<InvocationOutput> {
    let Some(add) = find(&input, "add") else {
        let payload = input.input_payload().map(str::to_string);
        checkpoint(
            &input,
            vec![OperationUpdate::chained_invoke("add", "add-one", payload)],
        )
        .await?;
        return Ok(InvocationOutput::pending());
    };
    if add.status != OperationStatus::Succeeded {
        return Ok(mirror(add));
    }

    match find(&input, "double") {
        None => {
            let payload = add.result().map(str::to_string);
            checkpoint(
                &input,
                vec![OperationUpdate::chained_invoke("double", "double", payload)],
            )
            .await?;
            Ok(InvocationOutput::pending())
        }
        Some(op) => Ok(mirror(op)),
    }
}

async fn always_fails(
    _input: InvocationInput,
    calls: Arc<AtomicUsize>,
) -> ServiceResult<InvocationOutput> {
    calls.fetch_add(1, Ordering::SeqCst);
    Err(ServiceError::invocation_failed("boom"))
}

async fn invokes_missing_target(
    input: InvocationInput,
    calls: Arc<AtomicUsize>,
) -> ServiceResult<InvocationOutput> {
    calls.fetch_add(1, Ordering::SeqCst);
    checkpoint(
        &input,
        vec![OperationUpdate::chained_invoke("c1", "nowhere", None)],
    )
    .await?;
    Ok(InvocationOutput::pending())
}

/// Creates callback `cb1` with `options`, then mirrors its outcome.
async fn await_callback(
    input: InvocationInput,
    options: CallbackOptions,
) -> ServiceResult<InvocationOutput> {
    match find(&input, "cb1") {
        None => {
            checkpoint(&input, vec![OperationUpdate::callback("cb1", options)]).await?;
            Ok(InvocationOutput::pending())
        }
        Some(op) => Ok(mirror(op)),
    }
}

/// Returns PENDING without ever creating an operation.
async fn pending_without_operations(
    _input: InvocationInput,
    calls: Arc<AtomicUsize>,
) -> ServiceResult<InvocationOutput> {
    calls.fetch_add(1, Ordering::SeqCst);
    Ok(InvocationOutput::pending())
}

async fn succeeded_with_error(
    _input: InvocationInput,
    calls: Arc<AtomicUsize>,
) -> ServiceResult<InvocationOutput> {
    calls.fetch_add(1, Ordering::SeqCst);
    Ok(InvocationOutput {
        error: Some(error("contradiction")),
        ..InvocationOutput::succeeded("1")
    })
}

async fn step_with_one_retry(input: InvocationInput) -> ServiceResult<InvocationOutput> {
    match find(&input, "s1").map(|op| op.status) {
        None => {
            checkpoint(
                &input,
                vec![OperationUpdate::retry("s1", 2, error("transient"))],
            )
            .await?;
            Ok(InvocationOutput::pending())
        }
        Some(OperationStatus::Ready) => {
            checkpoint(
                &input,
                vec![OperationUpdate::succeed(
                    "s1",
                    OperationType::Step,
                    Some("\"done\"".to_string()),
                )],
            )
            .await?;
            Ok(InvocationOutput::succeeded("\"done\""))
        }
        Some(_) => Ok(InvocationOutput::pending()),
    }
}

async fn times_ten(input: InvocationInput) -> ServiceResult<InvocationOutput> {
    let value: i64 = input
        .input_payload()
        .and_then(|p| p.parse().ok())
        .unwrap_or_default();
    Ok(InvocationOutput::succeeded((value * 10).to_string()))
}

// =============================================================================
// Chained functions
// =============================================================================

fn parse(payload: Option<String>) -> Result<i64, ErrorObject> {
    payload
        .as_deref()
        .unwrap_or("0")
        .parse()
        .map_err(|_| ErrorObject::new("ParseError", "payload is not a number"))
}

async fn add_one(payload: Option<String>) -> Result<Option<String>, ErrorObject> {
    parse(payload).map(|n| Some((n + 1).to_string()))
}

async fn double(payload: Option<String>) -> Result<Option<String>, ErrorObject> {
    parse(payload).map(|n| Some((n * 2).to_string()))
}

async fn explode(_payload: Option<String>) -> Result<Option<String>, ErrorObject> {
    Err(error("boom"))
}

async fn panics(_payload: Option<String>) -> Result<Option<String>, ErrorObject> {
    panic!("chained function blew up")
}

// =============================================================================
// Helpers
// =============================================================================

async fn wait_for_operation(harness: &TestHarness, execution_arn: &str, operation_id: &str) -> Operation {
    for _ in 0..500 {
        let execution = harness
            .executor
            .get_execution(execution_arn)
            .await
            .expect("execution exists");
        if let Some(op) = execution.find_operation(operation_id) {
            return op.clone();
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("operation {} never appeared", operation_id);
}

async fn start(harness: &TestHarness, function_name: &str, name: &str, input: Option<&str>) -> String {
    let mut start = StartDurableExecutionInput::new(function_name, name);
    if let Some(input) = input {
        start = start.with_input(input);
    }
    harness
        .executor
        .start_execution(start)
        .await
        .expect("execution should start")
        .execution_arn
}

// =============================================================================
// Scenarios
// =============================================================================

#[tokio::test]
async fn test_handler_result_completes_execution() {
    let harness = TestHarness::new();
    harness.invoker.register("hello", hello);

    let arn = start(&harness, "hello", "run-1", None).await;
    harness.wait(&arn).await;

    let details = harness.executor.get_execution_details(&arn).await.unwrap();
    assert_eq!(details.status, ExecutionStatus::Succeeded);
    assert_eq!(details.result.as_deref(), Some("\"ok\""));
    assert!(details.error.is_none());
    assert!(details.end_timestamp.is_some());
    assert_eq!(
        details.function_arn,
        "arn:aws:lambda:us-east-1:123456789012:function:hello"
    );

    let state = harness
        .executor
        .get_execution_state(&arn, None, None, None)
        .await
        .unwrap();
    assert!(state.operations.is_empty());

    let history = harness
        .executor
        .get_execution_history(&arn, None, None, false)
        .await
        .unwrap();
    let types: Vec<_> = history.events.iter().map(|e| e.event_type.as_str()).collect();
    assert_eq!(types, vec!["ExecutionStarted", "ExecutionSucceeded"]);
}

#[tokio::test]
async fn test_wait_resumes_handler_after_timer() {
    let harness = TestHarness::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    harness
        .invoker
        .register("waiter", move |input| wait_then_finish(input, counter.clone(), 10));

    let arn = start(&harness, "waiter", "run-1", None).await;
    harness.wait(&arn).await;

    let execution = harness.executor.get_execution(&arn).await.unwrap();
    assert_eq!(execution.status(), ExecutionStatus::Succeeded);
    assert_eq!(
        execution.result.as_ref().and_then(|r| r.result.as_deref()),
        Some("\"waited\"")
    );
    let wait = execution.find_operation("w1").unwrap();
    assert_eq!(wait.operation_type, OperationType::Wait);
    assert_eq!(wait.status, OperationStatus::Succeeded);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_chained_function_failure_fails_execution() {
    let registry = HandlerRegistry::new().with_function("explode", explode);
    let harness = TestHarness::with_registry(registry);
    harness
        .invoker
        .register("caller", |input| invoke_once(input, "explode"));

    let arn = start(&harness, "caller", "run-1", None).await;
    harness.wait(&arn).await;

    let details = harness.executor.get_execution_details(&arn).await.unwrap();
    assert_eq!(details.status, ExecutionStatus::Failed);
    assert_eq!(details.error.as_ref().map(|e| e.message()), Some("boom"));

    let execution = harness.executor.get_execution(&arn).await.unwrap();
    assert_eq!(
        execution.find_operation("c1").map(|op| op.status),
        Some(OperationStatus::Failed)
    );
}

#[tokio::test]
async fn test_sequential_chained_invokes() {
    let registry = HandlerRegistry::new()
        .with_function("add-one", add_one)
        .with_function("double", double);
    let harness = TestHarness::with_registry(registry);
    harness.invoker.register("pipeline", add_then_double);

    let arn = start(&harness, "pipeline", "run-1", Some("3")).await;
    harness.wait(&arn).await;

    let details = harness.executor.get_execution_details(&arn).await.unwrap();
    assert_eq!(details.status, ExecutionStatus::Succeeded);
    assert_eq!(details.result.as_deref(), Some("8"));
    assert_eq!(details.input_payload.as_deref(), Some("3"));

    let state = harness
        .executor
        .get_execution_state(&arn, None, None, None)
        .await
        .unwrap();
    let ids: Vec<_> = state.operations.iter().map(|op| op.operation_id.as_str()).collect();
    assert_eq!(ids, vec!["add", "double"]);
}

#[tokio::test]
async fn test_failed_invocations_retry_up_to_limit() {
    let harness = TestHarness::with_config(
        ExecutorConfig::default().with_max_consecutive_failed_attempts(2),
    );
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    harness
        .invoker
        .register("flaky", move |input| always_fails(input, counter.clone()));

    let arn = start(&harness, "flaky", "run-1", None).await;
    harness.wait(&arn).await;

    let details = harness.executor.get_execution_details(&arn).await.unwrap();
    assert_eq!(details.status, ExecutionStatus::Failed);
    assert!(details.error.unwrap().message().contains("boom"));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_unregistered_function_fails_without_retry() {
    let harness = TestHarness::new();
    let arn = start(&harness, "not-registered", "run-1", None).await;
    harness.wait(&arn).await;

    let details = harness.executor.get_execution_details(&arn).await.unwrap();
    assert_eq!(details.status, ExecutionStatus::Failed);
    let execution = harness.executor.get_execution(&arn).await.unwrap();
    assert_eq!(execution.consecutive_failed_invocation_attempts, 0);
}

#[tokio::test]
async fn test_unregistered_chained_target_fails_without_retry() {
    let harness = TestHarness::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    harness
        .invoker
        .register("caller", move |input| invokes_missing_target(input, counter.clone()));

    let arn = start(&harness, "caller", "run-1", None).await;
    harness.wait(&arn).await;

    let details = harness.executor.get_execution_details(&arn).await.unwrap();
    assert_eq!(details.status, ExecutionStatus::Failed);
    assert!(details.error.unwrap().message().contains("nowhere"));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_step_retry_becomes_ready_and_succeeds() {
    let harness = TestHarness::new();
    harness.invoker.register("stepper", step_with_one_retry);

    let arn = start(&harness, "stepper", "run-1", None).await;
    harness.wait(&arn).await;

    let execution = harness.executor.get_execution(&arn).await.unwrap();
    assert_eq!(execution.status(), ExecutionStatus::Succeeded);
    let step = execution.find_operation("s1").unwrap();
    assert_eq!(step.status, OperationStatus::Succeeded);
    assert_eq!(step.result(), Some("\"done\""));
    assert_eq!(step.step_details.as_ref().map(|d| d.attempt), Some(2));
}

#[tokio::test]
async fn test_callback_success_resumes_execution() {
    let harness = TestHarness::new();
    harness
        .invoker
        .register("approval", |input| await_callback(input, CallbackOptions::default()));

    let arn = start(&harness, "approval", "run-1", None).await;
    let op = wait_for_operation(&harness, &arn, "cb1").await;
    let callback_id = op.callback_id().expect("callback id").to_string();

    harness
        .executor
        .send_callback_success(&callback_id, Some("\"approved\"".to_string()))
        .await
        .unwrap();
    harness.wait(&arn).await;

    let details = harness.executor.get_execution_details(&arn).await.unwrap();
    assert_eq!(details.status, ExecutionStatus::Succeeded);
    assert_eq!(details.result.as_deref(), Some("\"approved\""));

    // The callback is no longer active
    let heartbeat = harness.executor.send_callback_heartbeat(&callback_id).await;
    assert!(matches!(heartbeat, Err(ServiceError::ResourceNotFound(_))));
}

#[tokio::test]
async fn test_callback_failure_fails_execution() {
    let harness = TestHarness::new();
    harness
        .invoker
        .register("approval", |input| await_callback(input, CallbackOptions::default()));

    let arn = start(&harness, "approval", "run-1", None).await;
    let op = wait_for_operation(&harness, &arn, "cb1").await;
    let callback_id = op.callback_id().unwrap().to_string();

    harness
        .executor
        .send_callback_failure(&callback_id, Some(error("rejected")))
        .await
        .unwrap();
    harness.wait(&arn).await;

    let details = harness.executor.get_execution_details(&arn).await.unwrap();
    assert_eq!(details.status, ExecutionStatus::Failed);
    assert_eq!(details.error.as_ref().map(|e| e.message()), Some("rejected"));
}

#[tokio::test]
async fn test_callback_timeout_fails_execution() {
    let harness = TestHarness::new();
    let options = CallbackOptions {
        timeout_seconds: 30,
        heartbeat_timeout_seconds: 0,
    };
    harness
        .invoker
        .register("approval", move |input| await_callback(input, options));

    let arn = start(&harness, "approval", "run-1", None).await;
    harness.wait(&arn).await;

    let execution = harness.executor.get_execution(&arn).await.unwrap();
    assert_eq!(execution.status(), ExecutionStatus::Failed);
    let callback = execution.find_operation("cb1").unwrap();
    assert_eq!(callback.status, OperationStatus::TimedOut);
    assert_eq!(callback.error().map(|e| e.message()), Some("Callback timed out"));
}

#[tokio::test]
async fn test_heartbeat_timeout_fails_execution() {
    let harness = TestHarness::new();
    let options = CallbackOptions {
        timeout_seconds: 0,
        heartbeat_timeout_seconds: 5,
    };
    harness
        .invoker
        .register("approval", move |input| await_callback(input, options));

    let arn = start(&harness, "approval", "run-1", None).await;
    harness.wait(&arn).await;

    let execution = harness.executor.get_execution(&arn).await.unwrap();
    let callback = execution.find_operation("cb1").unwrap();
    assert_eq!(callback.status, OperationStatus::TimedOut);
    assert_eq!(
        callback.error().map(|e| e.message()),
        Some("Callback heartbeat timed out")
    );
}

#[tokio::test]
async fn test_callback_ids_are_validated() {
    let harness = TestHarness::new();
    harness.invoker.register("hello", hello);
    let arn = start(&harness, "hello", "run-1", None).await;
    harness.wait(&arn).await;

    assert!(matches!(
        harness.executor.send_callback_success("", None).await,
        Err(ServiceError::InvalidParameterValue(_))
    ));
    assert!(matches!(
        harness.executor.send_callback_success("not a callback id!", None).await,
        Err(ServiceError::ResourceNotFound(_))
    ));

    let unknown = CallbackToken::new(arn.clone(), "missing").encode();
    assert!(matches!(
        harness.executor.send_callback_heartbeat(&unknown).await,
        Err(ServiceError::ResourceNotFound(_))
    ));
}

#[tokio::test]
async fn test_stop_execution() {
    let harness = TestHarness::new();
    harness
        .invoker
        .register("approval", |input| await_callback(input, CallbackOptions::default()));

    let arn = start(&harness, "approval", "run-1", None).await;
    let op = wait_for_operation(&harness, &arn, "cb1").await;

    harness.executor.stop_execution(&arn, None).await.unwrap();
    harness.wait(&arn).await;

    let details = harness.executor.get_execution_details(&arn).await.unwrap();
    assert_eq!(details.status, ExecutionStatus::Stopped);
    let error = details.error.unwrap();
    assert_eq!(error.error_type.as_deref(), Some("ExecutionStopped"));

    assert!(matches!(
        harness.executor.stop_execution(&arn, None).await,
        Err(ServiceError::ExecutionAlreadyCompleted(_))
    ));
    assert!(matches!(
        harness
            .executor
            .send_callback_success(op.callback_id().unwrap(), None)
            .await,
        Err(ServiceError::IllegalState(_))
    ));
}

#[tokio::test]
async fn test_execution_closes_only_once() {
    let harness = TestHarness::new();
    harness.invoker.register("hello", hello);
    let arn = start(&harness, "hello", "run-1", None).await;
    harness.wait(&arn).await;

    let second = harness.executor.complete_execution(&arn, None).await;
    assert!(matches!(second, Err(ServiceError::IllegalState(_))));
    let details = harness.executor.get_execution_details(&arn).await.unwrap();
    assert_eq!(details.result.as_deref(), Some("\"ok\""));
}

#[tokio::test]
async fn test_state_rejects_unknown_token() {
    let harness = TestHarness::new();
    harness.invoker.register("hello", hello);
    let arn = start(&harness, "hello", "run-1", None).await;
    harness.wait(&arn).await;

    let result = harness
        .executor
        .get_execution_state(&arn, Some("bogus"), None, None)
        .await;
    assert!(matches!(result, Err(ServiceError::InvalidParameterValue(_))));

    let missing = harness
        .executor
        .get_execution_details("no-such-execution")
        .await;
    assert!(matches!(missing, Err(ServiceError::ResourceNotFound(_))));
}

#[tokio::test]
async fn test_list_executions_paginates_and_filters() {
    let harness = TestHarness::new();
    harness.invoker.register("hello", hello);
    harness.invoker.register("other", hello);

    for name in ["a", "b", "c"] {
        let arn = start(&harness, "hello", name, None).await;
        harness.wait(&arn).await;
    }
    let other = start(&harness, "other", "d", None).await;
    harness.wait(&other).await;

    let all = harness
        .executor
        .list_executions(ListExecutionsQuery::default())
        .await
        .unwrap();
    assert_eq!(all.executions.len(), 4);
    assert!(all.next_marker.is_none());

    let first = harness
        .executor
        .list_executions_by_function("hello", ListExecutionsQuery::default().with_max_items(2))
        .await
        .unwrap();
    assert_eq!(first.executions.len(), 2);
    let marker = first.next_marker.expect("second page");

    let second = harness
        .executor
        .list_executions_by_function(
            "hello",
            ListExecutionsQuery::default()
                .with_max_items(2)
                .with_marker(marker),
        )
        .await
        .unwrap();
    assert_eq!(second.executions.len(), 1);
    assert!(second.next_marker.is_none());
    assert!(second
        .executions
        .iter()
        .chain(first.executions.iter())
        .all(|e| e.function_arn.ends_with(":function:hello")));

    let by_name = harness
        .executor
        .list_executions(ListExecutionsQuery::new(
            ExecutionQuery::default()
                .with_execution_name("d")
                .with_status(ExecutionStatus::Succeeded),
        ))
        .await
        .unwrap();
    assert_eq!(by_name.executions.len(), 1);
    assert_eq!(by_name.executions[0].durable_execution_arn, other);
}

#[tokio::test]
async fn test_nested_durable_execution_resumes_parent() {
    let registry = HandlerRegistry::new().with_durable("child");
    let harness = TestHarness::with_registry(registry);
    harness.invoker.register("child", times_ten);
    harness
        .invoker
        .register("parent", |input| invoke_once(input, "child"));

    let arn = start(&harness, "parent", "outer", Some("4")).await;
    harness.wait(&arn).await;

    let details = harness.executor.get_execution_details(&arn).await.unwrap();
    assert_eq!(details.status, ExecutionStatus::Succeeded);
    assert_eq!(details.result.as_deref(), Some("40"));

    let parent = harness.executor.get_execution(&arn).await.unwrap();
    let nested_arn = parent
        .find_operation("c1")
        .and_then(|op| op.chained_invoke_details.as_ref())
        .and_then(|d| d.nested_execution_arn.clone())
        .expect("nested execution arn recorded");

    let nested = harness.executor.get_execution(&nested_arn).await.unwrap();
    assert_eq!(nested.status(), ExecutionStatus::Succeeded);
    assert_eq!(nested.start_input.execution_name, "outer-c1");
    assert_eq!(nested.depth, 1);
    assert_eq!(nested.parent.as_ref().map(|p| p.execution_arn.as_str()), Some(arn.as_str()));

    let children = harness
        .executor
        .list_executions_by_function("child", ListExecutionsQuery::default())
        .await
        .unwrap();
    assert_eq!(children.executions.len(), 1);
}

#[tokio::test]
async fn test_wait_is_pending_until_timer_fires() {
    let harness = TestHarness::real_time(ExecutorConfig::default());
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    harness
        .invoker
        .register("waiter", move |input| wait_then_finish(input, counter.clone(), 1));

    let arn = start(&harness, "waiter", "run-1", None).await;
    let wait = wait_for_operation(&harness, &arn, "w1").await;
    assert_eq!(wait.status, OperationStatus::Started);

    let execution = harness.executor.get_execution(&arn).await.unwrap();
    assert_eq!(execution.status(), ExecutionStatus::Running);
    assert!(execution.has_pending_operations());

    harness.wait(&arn).await;
    let execution = harness.executor.get_execution(&arn).await.unwrap();
    assert_eq!(execution.status(), ExecutionStatus::Succeeded);
    assert!(!execution.has_pending_operations());
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_chained_depth_limit_rejects_nested_execution() {
    let registry = HandlerRegistry::new().with_durable("child");
    let harness = TestHarness::with_parts(
        registry,
        ExecutorConfig::default().with_max_chained_invoke_depth(0),
    );
    harness.invoker.register("child", times_ten);
    harness
        .invoker
        .register("parent", |input| invoke_or_report(input, "child"));

    let arn = start(&harness, "parent", "outer", None).await;
    harness.wait(&arn).await;

    let details = harness.executor.get_execution_details(&arn).await.unwrap();
    assert_eq!(details.status, ExecutionStatus::Failed);
    let error = details.error.unwrap();
    assert_eq!(error.error_type.as_deref(), Some("InvalidParameterValueException"));
    assert!(error.message().contains("depth"));

    let children = harness
        .executor
        .list_executions_by_function("child", ListExecutionsQuery::default())
        .await
        .unwrap();
    assert!(children.executions.is_empty());
}

#[tokio::test]
async fn test_pending_without_operations_is_retried_then_fails() {
    let harness = TestHarness::with_config(
        ExecutorConfig::default().with_max_consecutive_failed_attempts(1),
    );
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    harness
        .invoker
        .register("stuck", move |input| pending_without_operations(input, counter.clone()));

    let arn = start(&harness, "stuck", "run-1", None).await;
    harness.wait(&arn).await;

    let details = harness.executor.get_execution_details(&arn).await.unwrap();
    assert_eq!(details.status, ExecutionStatus::Failed);
    assert!(details.error.unwrap().message().contains("no pending operations"));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_succeeded_with_error_is_retried_then_fails() {
    let harness = TestHarness::with_config(
        ExecutorConfig::default().with_max_consecutive_failed_attempts(1),
    );
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    harness
        .invoker
        .register("confused", move |input| succeeded_with_error(input, counter.clone()));

    let arn = start(&harness, "confused", "run-1", None).await;
    harness.wait(&arn).await;

    let details = harness.executor.get_execution_details(&arn).await.unwrap();
    assert_eq!(details.status, ExecutionStatus::Failed);
    assert!(details.result.is_none());
    assert!(details.error.unwrap().message().contains("SUCCEEDED"));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_panicking_chained_function_fails_operation() {
    let registry = HandlerRegistry::new().with_function("panics", panics);
    let harness = TestHarness::with_registry(registry);
    harness
        .invoker
        .register("caller", |input| invoke_once(input, "panics"));

    let arn = start(&harness, "caller", "run-1", None).await;
    harness.wait(&arn).await;

    let execution = harness.executor.get_execution(&arn).await.unwrap();
    assert_eq!(execution.status(), ExecutionStatus::Failed);
    let op = execution.find_operation("c1").unwrap();
    assert_eq!(op.status, OperationStatus::Failed);
    assert!(op.error().unwrap().message().contains("panicked"));
    assert!(harness.scheduler.is_started());
}

#[tokio::test]
async fn test_oversized_callback_timeout_is_rejected() {
    let harness = TestHarness::real_time(
        ExecutorConfig::default()
            .with_max_consecutive_failed_attempts(1)
            .with_retry_backoff(Duration::from_millis(10)),
    );
    let options = CallbackOptions {
        timeout_seconds: u64::MAX,
        heartbeat_timeout_seconds: 0,
    };
    harness
        .invoker
        .register("approval", move |input| await_callback(input, options));
    harness.invoker.register("hello", hello);

    let arn = start(&harness, "approval", "run-1", None).await;
    harness.wait(&arn).await;
    let details = harness.executor.get_execution_details(&arn).await.unwrap();
    assert_eq!(details.status, ExecutionStatus::Failed);
    assert!(details.error.unwrap().message().contains("TimeoutSeconds"));

    let next = start(&harness, "hello", "run-2", None).await;
    harness.wait(&next).await;
    let details = harness.executor.get_execution_details(&next).await.unwrap();
    assert_eq!(details.status, ExecutionStatus::Succeeded);
}

#[tokio::test]
async fn test_start_fails_without_running_scheduler() {
    let harness = TestHarness::new();
    harness.invoker.register("hello", hello);
    harness.scheduler.stop();

    let result = harness
        .executor
        .start_execution(StartDurableExecutionInput::new("hello", "run-1"))
        .await;
    assert!(matches!(result, Err(ServiceError::SchedulerNotRunning)));

    let listed = harness
        .executor
        .list_executions(ListExecutionsQuery::default())
        .await
        .unwrap();
    assert!(listed.executions.is_empty());
    assert_eq!(harness.executor.tracked_execution_count(), 0);
}

#[tokio::test]
async fn test_closed_executions_release_completion_events() {
    let harness = TestHarness::new();
    harness.invoker.register("hello", hello);

    let arn = start(&harness, "hello", "run-1", None).await;
    harness.wait(&arn).await;
    assert_eq!(harness.executor.tracked_execution_count(), 0);

    // Finished executions still answer from the store.
    let done = harness
        .executor
        .wait_until_complete(&arn, Some(Duration::from_millis(10)))
        .await
        .unwrap();
    assert!(done);
    assert!(matches!(
        harness.executor.wait_until_complete("no-such-execution", None).await,
        Err(ServiceError::ResourceNotFound(_))
    ));
}
