//! Read-only views over executions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Executor;
use crate::error::{ErrorObject, ServiceError, ServiceResult};
use crate::execution::{Execution, ExecutionStatus};
use crate::history::{self, HistoryEvent};
use crate::invoker::GetExecutionStateOutput;
use crate::store::{paginate, start_timestamp, ExecutionQuery};

/// Version reported for every execution.
const EXECUTION_VERSION: &str = "1.0";

/// Detailed view of one execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionDetailsOutput {
    #[serde(rename = "DurableExecutionArn")]
    pub durable_execution_arn: String,
    #[serde(rename = "DurableExecutionName")]
    pub durable_execution_name: String,
    #[serde(rename = "FunctionArn")]
    pub function_arn: String,
    #[serde(rename = "Status")]
    pub status: ExecutionStatus,
    #[serde(rename = "StartTimestamp", skip_serializing_if = "Option::is_none")]
    pub start_timestamp: Option<DateTime<Utc>>,
    #[serde(rename = "InputPayload", skip_serializing_if = "Option::is_none")]
    pub input_payload: Option<String>,
    #[serde(rename = "Result", skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(rename = "Error", skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorObject>,
    #[serde(rename = "EndTimestamp", skip_serializing_if = "Option::is_none")]
    pub end_timestamp: Option<DateTime<Utc>>,
    #[serde(rename = "Version")]
    pub version: String,
}

/// One row of [`ListExecutionsOutput`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSummary {
    #[serde(rename = "DurableExecutionArn")]
    pub durable_execution_arn: String,
    #[serde(rename = "DurableExecutionName")]
    pub durable_execution_name: String,
    #[serde(rename = "FunctionArn")]
    pub function_arn: String,
    #[serde(rename = "Status")]
    pub status: ExecutionStatus,
    #[serde(rename = "StartTimestamp", skip_serializing_if = "Option::is_none")]
    pub start_timestamp: Option<DateTime<Utc>>,
    #[serde(rename = "EndTimestamp", skip_serializing_if = "Option::is_none")]
    pub end_timestamp: Option<DateTime<Utc>>,
}

/// Filters and paging for [`Executor::list_executions`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListExecutionsQuery {
    #[serde(flatten)]
    pub filter: ExecutionQuery,
    #[serde(rename = "Marker", skip_serializing_if = "Option::is_none")]
    pub marker: Option<String>,
    #[serde(rename = "MaxItems", skip_serializing_if = "Option::is_none")]
    pub max_items: Option<usize>,
}

impl ListExecutionsQuery {
    pub fn new(filter: ExecutionQuery) -> Self {
        Self {
            filter,
            ..Default::default()
        }
    }

    pub fn with_marker(mut self, marker: impl Into<String>) -> Self {
        self.marker = Some(marker.into());
        self
    }

    pub fn with_max_items(mut self, max_items: usize) -> Self {
        self.max_items = Some(max_items);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListExecutionsOutput {
    #[serde(rename = "DurableExecutions")]
    pub executions: Vec<ExecutionSummary>,
    #[serde(rename = "NextMarker", skip_serializing_if = "Option::is_none")]
    pub next_marker: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GetExecutionHistoryOutput {
    #[serde(rename = "Events")]
    pub events: Vec<HistoryEvent>,
    #[serde(rename = "NextMarker", skip_serializing_if = "Option::is_none")]
    pub next_marker: Option<String>,
}

fn end_timestamp(execution: &Execution) -> Option<DateTime<Utc>> {
    execution.operations.first().and_then(|root| root.end_timestamp)
}

impl Executor {
    fn summarize(&self, execution: &Execution) -> ExecutionSummary {
        ExecutionSummary {
            durable_execution_arn: execution.durable_execution_arn.clone(),
            durable_execution_name: execution.start_input.execution_name.clone(),
            function_arn: self
                .inner
                .config
                .function_arn(&execution.start_input.function_name),
            status: execution.status(),
            start_timestamp: start_timestamp(execution),
            end_timestamp: end_timestamp(execution),
        }
    }

    pub async fn get_execution_details(
        &self,
        execution_arn: &str,
    ) -> ServiceResult<ExecutionDetailsOutput> {
        let execution = self.inner.store.load(execution_arn).await?;
        let root = execution.operation_execution_started()?;
        let (result, error) = match &execution.result {
            Some(result) => (result.result.clone(), result.error.clone()),
            None => (None, None),
        };

        Ok(ExecutionDetailsOutput {
            durable_execution_arn: execution.durable_execution_arn.clone(),
            durable_execution_name: execution.start_input.execution_name.clone(),
            function_arn: self
                .inner
                .config
                .function_arn(&execution.start_input.function_name),
            status: execution.status(),
            start_timestamp: root.start_timestamp,
            input_payload: root
                .execution_details
                .as_ref()
                .and_then(|d| d.input_payload.clone()),
            result,
            error,
            end_timestamp: root.end_timestamp,
            version: EXECUTION_VERSION.to_string(),
        })
    }

    /// Page through an execution's operations, excluding the EXECUTION root.
    ///
    /// A checkpoint token, when given, must have been issued for this execution.
    pub async fn get_execution_state(
        &self,
        execution_arn: &str,
        checkpoint_token: Option<&str>,
        marker: Option<&str>,
        max_items: Option<usize>,
    ) -> ServiceResult<GetExecutionStateOutput> {
        let execution = self.inner.store.load(execution_arn).await?;
        if let Some(token) = checkpoint_token {
            if !execution.is_token_issued(token) {
                return Err(ServiceError::invalid_parameter(format!(
                    "Invalid checkpoint token: {}",
                    token
                )));
            }
        }

        let max_items = max_items.unwrap_or(self.inner.config.default_state_max_items);
        let (operations, next_marker) =
            paginate(execution.assertable_operations(), marker, max_items)?;
        Ok(GetExecutionStateOutput {
            operations,
            next_marker,
        })
    }

    pub async fn get_execution_history(
        &self,
        execution_arn: &str,
        marker: Option<&str>,
        max_items: Option<usize>,
        reverse_order: bool,
    ) -> ServiceResult<GetExecutionHistoryOutput> {
        let execution = self.inner.store.load(execution_arn).await?;
        let mut events = history::events_for(&execution);
        if reverse_order {
            events.reverse();
        }

        let max_items = max_items.unwrap_or(self.inner.config.default_history_max_items);
        let (events, next_marker) = paginate(&events, marker, max_items)?;
        Ok(GetExecutionHistoryOutput {
            events,
            next_marker,
        })
    }

    pub async fn list_executions(
        &self,
        query: ListExecutionsQuery,
    ) -> ServiceResult<ListExecutionsOutput> {
        let max_items = query
            .max_items
            .unwrap_or(self.inner.config.default_list_max_items);
        let (executions, next_marker) = self
            .inner
            .store
            .query(&query.filter, query.marker.as_deref(), max_items)
            .await?;

        Ok(ListExecutionsOutput {
            executions: executions.iter().map(|e| self.summarize(e)).collect(),
            next_marker,
        })
    }

    pub async fn list_executions_by_function(
        &self,
        function_name: &str,
        mut query: ListExecutionsQuery,
    ) -> ServiceResult<ListExecutionsOutput> {
        query.filter.function_name = Some(function_name.to_string());
        self.list_executions(query).await
    }
}
