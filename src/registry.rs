//! Targets that CHAINED_INVOKE operations can call.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::error::ErrorObject;

/// Future returned by a [`ChainedFunction`].
pub type ChainedFuture = Pin<Box<dyn Future<Output = Result<Option<String>, ErrorObject>> + Send>>;

/// A plain async function run for a chained invoke: payload in, result or error out.
pub type ChainedFunction = Arc<dyn Fn(Option<String>) -> ChainedFuture + Send + Sync>;

/// How a chained invoke target runs.
#[derive(Clone)]
pub enum ChainedTarget {
    /// Run the function once on the scheduler
    Function(ChainedFunction),
    /// Run a nested durable execution of the same function name through the invoker
    Durable,
}

impl std::fmt::Debug for ChainedTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Function(_) => write!(f, "Function"),
            Self::Durable => write!(f, "Durable"),
        }
    }
}

/// Map from function name to chained invoke target.
///
/// Built up front and handed to the [`Executor`](crate::Executor).
///
/// ```rust
/// use durable_execution_local::{ErrorObject, HandlerRegistry};
///
/// let registry = HandlerRegistry::new()
///     .with_function("double", |payload: Option<String>| async move {
///         match payload.as_deref().and_then(|p| p.parse::<i64>().ok()) {
///             Some(n) => Ok(Some((n * 2).to_string())),
///             None => Err(ErrorObject::from_message("not a number")),
///         }
///     })
///     .with_durable("order-workflow");
///
/// assert!(registry.contains("double"));
/// assert!(registry.contains("order-workflow"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct HandlerRegistry {
    targets: HashMap<String, ChainedTarget>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_function<F, Fut>(&mut self, function_name: impl Into<String>, function: F)
    where
        F: Fn(Option<String>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<String>, ErrorObject>> + Send + 'static,
    {
        let function: ChainedFunction =
            Arc::new(move |payload: Option<String>| -> ChainedFuture { Box::pin(function(payload)) });
        self.targets
            .insert(function_name.into(), ChainedTarget::Function(function));
    }

    pub fn register_durable(&mut self, function_name: impl Into<String>) {
        self.targets.insert(function_name.into(), ChainedTarget::Durable);
    }

    pub fn with_function<F, Fut>(mut self, function_name: impl Into<String>, function: F) -> Self
    where
        F: Fn(Option<String>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<String>, ErrorObject>> + Send + 'static,
    {
        self.register_function(function_name, function);
        self
    }

    pub fn with_durable(mut self, function_name: impl Into<String>) -> Self {
        self.register_durable(function_name);
        self
    }

    pub fn get(&self, function_name: &str) -> Option<&ChainedTarget> {
        self.targets.get(function_name)
    }

    pub fn contains(&self, function_name: &str) -> bool {
        self.targets.contains_key(function_name)
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_function_target_runs() {
        let registry = HandlerRegistry::new().with_function("fail", |_payload: Option<String>| async {
            Err(ErrorObject::new("ValueError", "boom"))
        });

        let Some(ChainedTarget::Function(function)) = registry.get("fail") else {
            panic!("expected a function target");
        };
        let error = function(None).await.unwrap_err();
        assert_eq!(error.message(), "boom");
        assert!(registry.get("other").is_none());
    }

    #[test]
    fn test_later_registration_replaces() {
        let mut registry = HandlerRegistry::new().with_function("f", |p: Option<String>| async move { Ok(p) });
        registry.register_durable("f");
        assert!(matches!(registry.get("f"), Some(ChainedTarget::Durable)));
        assert_eq!(registry.len(), 1);
    }
}
