//! History events derived from an execution's operations.
//!
//! Nothing is recorded separately: every call to [`events_for`] rebuilds
//! the event list from operation timestamps, so history can never drift from
//! state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::execution::Execution;
use crate::operation::{Operation, OperationStatus, OperationType};

/// One entry in an execution's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEvent {
    /// Monotonic id, starting at 1
    #[serde(rename = "EventId")]
    pub event_id: u64,
    /// e.g. `StepStarted`, `WaitSucceeded`, `ExecutionFailed`
    #[serde(rename = "EventType")]
    pub event_type: String,
    #[serde(rename = "EventTimestamp")]
    pub event_timestamp: DateTime<Utc>,
    #[serde(rename = "Id")]
    pub operation_id: String,
    #[serde(rename = "Name", skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "ParentId", skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(rename = "SubType", skip_serializing_if = "Option::is_none")]
    pub sub_type: Option<String>,
    /// Type-specific payload; `null` when there is nothing to report
    #[serde(rename = "Details")]
    pub details: serde_json::Value,
}

fn type_prefix(operation_type: OperationType) -> &'static str {
    match operation_type {
        OperationType::Execution => "Execution",
        OperationType::Context => "Context",
        OperationType::Step => "Step",
        OperationType::Wait => "Wait",
        OperationType::Callback => "Callback",
        OperationType::ChainedInvoke => "ChainedInvoke",
    }
}

fn status_suffix(status: OperationStatus) -> Option<&'static str> {
    match status {
        OperationStatus::Succeeded => Some("Succeeded"),
        OperationStatus::Failed => Some("Failed"),
        OperationStatus::TimedOut => Some("TimedOut"),
        OperationStatus::Stopped => Some("Stopped"),
        OperationStatus::Cancelled => Some("Cancelled"),
        OperationStatus::Started | OperationStatus::Pending | OperationStatus::Ready => None,
    }
}

fn started_details(operation: &Operation) -> serde_json::Value {
    match operation.operation_type {
        OperationType::Execution => operation
            .execution_details
            .as_ref()
            .map(|d| serde_json::json!({ "InputPayload": d.input_payload }))
            .unwrap_or(serde_json::Value::Null),
        OperationType::Wait => operation
            .wait_details
            .as_ref()
            .map(|d| serde_json::json!({ "ScheduledEndTimestamp": d.scheduled_end_timestamp }))
            .unwrap_or(serde_json::Value::Null),
        OperationType::Callback => operation
            .callback_details
            .as_ref()
            .map(|d| serde_json::json!({ "CallbackId": d.callback_id }))
            .unwrap_or(serde_json::Value::Null),
        OperationType::ChainedInvoke => operation
            .chained_invoke_details
            .as_ref()
            .and_then(|d| d.nested_execution_arn.as_ref())
            .map(|arn| serde_json::json!({ "NestedExecutionArn": arn }))
            .unwrap_or(serde_json::Value::Null),
        OperationType::Context | OperationType::Step => serde_json::Value::Null,
    }
}

fn completed_details(operation: &Operation, execution: &Execution) -> serde_json::Value {
    let mut details = serde_json::Map::new();

    if operation.operation_type == OperationType::Execution {
        if let Some(result) = &execution.result {
            if let Some(payload) = &result.result {
                details.insert("Result".to_string(), payload.clone().into());
            }
            if let Some(error) = &result.error {
                details.insert(
                    "Error".to_string(),
                    serde_json::to_value(error).unwrap_or(serde_json::Value::Null),
                );
            }
        }
    } else {
        if let Some(result) = operation.result() {
            details.insert("Result".to_string(), result.into());
        }
        if let Some(error) = operation.error() {
            details.insert(
                "Error".to_string(),
                serde_json::to_value(error).unwrap_or(serde_json::Value::Null),
            );
        }
        if let Some(step) = &operation.step_details {
            details.insert("Attempt".to_string(), step.attempt.into());
        }
    }

    if details.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::Value::Object(details)
    }
}

fn event(operation: &Operation, event_type: String, timestamp: DateTime<Utc>, details: serde_json::Value) -> HistoryEvent {
    HistoryEvent {
        event_id: 0,
        event_type,
        event_timestamp: timestamp,
        operation_id: operation.operation_id.clone(),
        name: operation.name.clone(),
        parent_id: operation.parent_id.clone(),
        sub_type: operation.sub_type.clone(),
        details,
    }
}

/// Derive the ordered history of `execution`.
///
/// Each operation contributes a `*Started` event and, once terminal, one
/// event named after its final status. Events are ordered by timestamp; ties
/// keep operation order with a start before its completion.
pub fn events_for(execution: &Execution) -> Vec<HistoryEvent> {
    let mut events = Vec::with_capacity(execution.operations.len() * 2);

    for operation in &execution.operations {
        let prefix = type_prefix(operation.operation_type);
        if let Some(started) = operation.start_timestamp {
            events.push(event(
                operation,
                format!("{}Started", prefix),
                started,
                started_details(operation),
            ));
        }

        let Some(suffix) = status_suffix(operation.status) else {
            continue;
        };
        let ended = operation
            .end_timestamp
            .or(operation.start_timestamp)
            .unwrap_or_else(Utc::now);
        events.push(event(
            operation,
            format!("{}{}", prefix, suffix),
            ended,
            completed_details(operation, execution),
        ));
    }

    // sort_by_key is stable
    events.sort_by_key(|e| e.event_timestamp);
    for (index, event) in events.iter_mut().enumerate() {
        event.event_id = index as u64 + 1;
    }
    events
}
