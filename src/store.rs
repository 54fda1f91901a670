//! Execution persistence.
//!
//! [`ExecutionStore`] is the seam for storage backends. The shipped
//! [`InMemoryExecutionStore`] keeps executions in a tokio `RwLock`ed map and
//! hands out clones, so callers always work on a snapshot and write it back.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::{ServiceError, ServiceResult};
use crate::execution::{Execution, ExecutionStatus};

/// Filters for listing executions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionQuery {
    #[serde(rename = "FunctionName", skip_serializing_if = "Option::is_none")]
    pub function_name: Option<String>,
    #[serde(rename = "ExecutionName", skip_serializing_if = "Option::is_none")]
    pub execution_name: Option<String>,
    #[serde(rename = "Status", skip_serializing_if = "Option::is_none")]
    pub status: Option<ExecutionStatus>,
    #[serde(rename = "StartedAfter", skip_serializing_if = "Option::is_none")]
    pub started_after: Option<DateTime<Utc>>,
    #[serde(rename = "StartedBefore", skip_serializing_if = "Option::is_none")]
    pub started_before: Option<DateTime<Utc>>,
    /// Newest first instead of oldest first
    #[serde(rename = "ReverseOrder", default)]
    pub reverse_order: bool,
}

impl ExecutionQuery {
    pub fn with_function_name(mut self, function_name: impl Into<String>) -> Self {
        self.function_name = Some(function_name.into());
        self
    }

    pub fn with_execution_name(mut self, execution_name: impl Into<String>) -> Self {
        self.execution_name = Some(execution_name.into());
        self
    }

    pub fn with_status(mut self, status: ExecutionStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_reverse_order(mut self, reverse_order: bool) -> Self {
        self.reverse_order = reverse_order;
        self
    }

    /// True if `execution` passes every filter that is set.
    pub fn matches(&self, execution: &Execution) -> bool {
        if let Some(function_name) = &self.function_name {
            if &execution.start_input.function_name != function_name {
                return false;
            }
        }
        if let Some(execution_name) = &self.execution_name {
            if &execution.start_input.execution_name != execution_name {
                return false;
            }
        }
        if let Some(status) = self.status {
            if execution.status() != status {
                return false;
            }
        }

        let started = start_timestamp(execution);
        if let Some(after) = self.started_after {
            if started.map_or(true, |ts| ts < after) {
                return false;
            }
        }
        if let Some(before) = self.started_before {
            if started.map_or(true, |ts| ts > before) {
                return false;
            }
        }
        true
    }
}

/// Start time of an execution, taken from its root operation.
pub fn start_timestamp(execution: &Execution) -> Option<DateTime<Utc>> {
    execution
        .operations
        .first()
        .and_then(|root| root.start_timestamp)
}

/// Slice one page out of `items`.
///
/// The marker is the decimal index of the first item of the page; the
/// returned marker is `None` on the last page.
pub fn paginate<T: Clone>(
    items: &[T],
    marker: Option<&str>,
    max_items: usize,
) -> ServiceResult<(Vec<T>, Option<String>)> {
    let start = match marker {
        Some(marker) => marker.parse::<usize>().map_err(|_| {
            ServiceError::invalid_parameter(format!("Invalid marker: {}", marker))
        })?,
        None => 0,
    };
    if max_items == 0 {
        return Err(ServiceError::invalid_parameter("max_items must be positive"));
    }

    let start = start.min(items.len());
    let end = start.saturating_add(max_items).min(items.len());
    let next_marker = (end < items.len()).then(|| end.to_string());
    Ok((items[start..end].to_vec(), next_marker))
}

/// Storage backend for executions.
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    /// Insert or replace an execution.
    async fn save(&self, execution: &Execution) -> ServiceResult<()>;

    /// Replace an existing execution.
    async fn update(&self, execution: &Execution) -> ServiceResult<()>;

    /// Load a snapshot of an execution.
    async fn load(&self, execution_arn: &str) -> ServiceResult<Execution>;

    async fn list_all(&self) -> ServiceResult<Vec<Execution>>;

    /// Filtered executions sorted by start time, one page at a time.
    async fn query(
        &self,
        query: &ExecutionQuery,
        marker: Option<&str>,
        max_items: usize,
    ) -> ServiceResult<(Vec<Execution>, Option<String>)> {
        let mut matching: Vec<Execution> = self
            .list_all()
            .await?
            .into_iter()
            .filter(|execution| query.matches(execution))
            .collect();

        matching.sort_by(|a, b| {
            start_timestamp(a)
                .cmp(&start_timestamp(b))
                .then_with(|| a.durable_execution_arn.cmp(&b.durable_execution_arn))
        });
        if query.reverse_order {
            matching.reverse();
        }

        paginate(&matching, marker, max_items)
    }
}

/// In-memory [`ExecutionStore`].
#[derive(Debug, Default)]
pub struct InMemoryExecutionStore {
    executions: RwLock<HashMap<String, Execution>>,
}

impl InMemoryExecutionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.executions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.executions.read().await.is_empty()
    }
}

#[async_trait]
impl ExecutionStore for InMemoryExecutionStore {
    async fn save(&self, execution: &Execution) -> ServiceResult<()> {
        self.executions
            .write()
            .await
            .insert(execution.durable_execution_arn.clone(), execution.clone());
        Ok(())
    }

    async fn update(&self, execution: &Execution) -> ServiceResult<()> {
        let mut executions = self.executions.write().await;
        match executions.get_mut(&execution.durable_execution_arn) {
            Some(stored) => {
                *stored = execution.clone();
                Ok(())
            }
            None => Err(ServiceError::resource_not_found(format!(
                "Execution {} not found",
                execution.durable_execution_arn
            ))),
        }
    }

    async fn load(&self, execution_arn: &str) -> ServiceResult<Execution> {
        self.executions
            .read()
            .await
            .get(execution_arn)
            .cloned()
            .ok_or_else(|| {
                ServiceError::resource_not_found(format!("Execution {} not found", execution_arn))
            })
    }

    async fn list_all(&self) -> ServiceResult<Vec<Execution>> {
        Ok(self.executions.read().await.values().cloned().collect())
    }
}
