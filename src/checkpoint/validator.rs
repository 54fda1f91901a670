//! Batch-level checks run before any update of a checkpoint is applied.
//!
//! A rejected batch leaves the execution untouched and the checkpoint token
//! unconsumed.

use std::collections::HashMap;

use crate::error::{ServiceError, ServiceResult};
use crate::execution::Execution;
use crate::operation::{OperationAction, OperationType, OperationUpdate};

/// Largest serialized error payload accepted on an update.
pub const MAX_ERROR_PAYLOAD_SIZE_BYTES: usize = 32768;

/// Longest wait, retry delay or callback timeout an update may request (one year).
pub const MAX_DELAY_SECONDS: u64 = 366 * 24 * 60 * 60;

/// Actions each operation type accepts.
pub fn valid_actions(operation_type: OperationType) -> &'static [OperationAction] {
    use OperationAction::*;
    match operation_type {
        OperationType::Step => &[Start, Succeed, Fail, Retry],
        OperationType::Context => &[Start, Succeed, Fail],
        OperationType::Wait => &[Start, Cancel],
        OperationType::Callback => &[Start],
        OperationType::ChainedInvoke => &[Start, Succeed, Fail, Cancel],
        OperationType::Execution => &[Succeed, Fail],
    }
}

/// Validate a batch against the execution's current operations.
pub fn validate(execution: &Execution, updates: &[OperationUpdate]) -> ServiceResult<()> {
    if updates.is_empty() {
        return Ok(());
    }

    validate_execution_update(updates)?;
    validate_parent_and_duplicate_ids(execution, updates)?;
    for update in updates {
        validate_update(update)?;
    }
    Ok(())
}

fn validate_execution_update(updates: &[OperationUpdate]) -> ServiceResult<()> {
    let execution_updates = updates
        .iter()
        .filter(|u| u.operation_type == OperationType::Execution)
        .count();

    if execution_updates > 1 {
        return Err(ServiceError::invalid_parameter(
            "Cannot checkpoint multiple EXECUTION updates.",
        ));
    }
    let last_is_execution = updates
        .last()
        .map_or(false, |u| u.operation_type == OperationType::Execution);
    if execution_updates == 1 && !last_is_execution {
        return Err(ServiceError::invalid_parameter(
            "EXECUTION checkpoint must be the last update.",
        ));
    }
    Ok(())
}

fn validate_parent_and_duplicate_ids(
    execution: &Execution,
    updates: &[OperationUpdate],
) -> ServiceResult<()> {
    let mut seen: HashMap<&str, OperationType> = HashMap::new();

    for update in updates {
        if seen.contains_key(update.operation_id.as_str()) {
            return Err(ServiceError::invalid_parameter(
                "Cannot update the same operation twice in a single request.",
            ));
        }

        if let Some(parent_id) = update.parent_id.as_deref() {
            let parent_type = seen.get(parent_id).copied().or_else(|| {
                execution
                    .find_operation(parent_id)
                    .map(|op| op.operation_type)
            });
            if parent_type != Some(OperationType::Context) {
                return Err(ServiceError::invalid_parameter("Invalid parent operation id."));
            }
        }

        seen.insert(update.operation_id.as_str(), update.operation_type);
    }
    Ok(())
}

fn validate_update(update: &OperationUpdate) -> ServiceResult<()> {
    if let Some(error) = &update.error {
        let size = serde_json::to_vec(error)?.len();
        if size > MAX_ERROR_PAYLOAD_SIZE_BYTES {
            return Err(ServiceError::invalid_parameter(format!(
                "Error object size must be less than {} bytes.",
                MAX_ERROR_PAYLOAD_SIZE_BYTES
            )));
        }
    }

    validate_delays(update)?;

    if !valid_actions(update.operation_type).contains(&update.action) {
        return Err(ServiceError::invalid_parameter(format!(
            "Invalid {} action: {}.",
            update.operation_type, update.action
        )));
    }

    match (update.operation_type, update.action) {
        (OperationType::Step | OperationType::Context, OperationAction::Succeed)
            if update.error.is_some() =>
        {
            Err(ServiceError::invalid_parameter(format!(
                "Cannot provide an Error for SUCCEED action on {} [{}].",
                update.operation_type, update.operation_id
            )))
        }
        (OperationType::Step | OperationType::Context, OperationAction::Fail)
            if update.payload.is_some() =>
        {
            Err(ServiceError::invalid_parameter(format!(
                "Cannot provide a Payload for FAIL action on {} [{}].",
                update.operation_type, update.operation_id
            )))
        }
        (OperationType::Wait, OperationAction::Start) if update.wait_options.is_none() => Err(
            ServiceError::invalid_parameter("WaitOptions are required to start a WAIT."),
        ),
        (OperationType::ChainedInvoke, OperationAction::Start) => {
            match update.chained_invoke_options.as_ref() {
                Some(options) if !options.function_name.is_empty() => Ok(()),
                _ => Err(ServiceError::invalid_parameter(
                    "ChainedInvokeOptions with a FunctionName are required to start a CHAINED_INVOKE.",
                )),
            }
        }
        _ => Ok(()),
    }
}

fn validate_delays(update: &OperationUpdate) -> ServiceResult<()> {
    let mut delays = Vec::new();
    if let Some(options) = &update.wait_options {
        delays.push(("WaitSeconds", options.wait_seconds));
    }
    if let Some(options) = &update.step_options {
        delays.push(("NextAttemptDelaySeconds", options.next_attempt_delay_seconds));
    }
    if let Some(options) = &update.callback_options {
        delays.push(("TimeoutSeconds", options.timeout_seconds));
        delays.push(("HeartbeatTimeoutSeconds", options.heartbeat_timeout_seconds));
    }

    match delays.into_iter().find(|(_, seconds)| *seconds > MAX_DELAY_SECONDS) {
        Some((field, seconds)) => Err(ServiceError::invalid_parameter(format!(
            "{} must be at most {} seconds, got {} on [{}].",
            field, MAX_DELAY_SECONDS, seconds, update.operation_id
        ))),
        None => Ok(()),
    }
}
