//! Operation table for dispatching requests by name.
//!
//! An [`Operations`] table maps operation names to typed handlers over a
//! service type `S`. It is usually filled in by the service itself through
//! [`Service::operations`].
//!
//! # Example
//!
//! ```ignore
//! use procwire_rpc::handler::{Operations, Service};
//!
//! struct Calculator;
//!
//! impl Service for Calculator {
//!     fn operations(ops: &mut Operations<Self>) {
//!         ops.register_sync("Add", |_calc, (a, b): (i64, i64)| Ok::<_, String>(a + b))
//!             .register("Slow", |calc, (ms,): (u64,)| async move {
//!                 tokio::time::sleep(Duration::from_millis(ms)).await;
//!                 Ok::<_, String>(calc.answer())
//!             });
//!     }
//! }
//! ```

use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use futures::future::{self, BoxFuture};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use super::arguments::{ArgumentError, Arguments};
use crate::protocol::Parameter;

/// Why an invocation produced no value.
#[derive(Debug, Error)]
pub enum InvocationError {
    #[error("invalid arguments: {0}")]
    Arguments(#[from] ArgumentError),

    #[error("{0}")]
    Failed(String),

    #[error("failed to encode return value: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Result of one invocation.
pub type InvocationResult = std::result::Result<Value, InvocationError>;

/// What a handler returns: a serializable value or a displayable error.
pub trait Outcome: Send + 'static {
    fn into_value(self) -> InvocationResult;
}

impl<R, E> Outcome for std::result::Result<R, E>
where
    R: Serialize + Send + 'static,
    E: Display + Send + 'static,
{
    fn into_value(self) -> InvocationResult {
        match self {
            Ok(value) => serde_json::to_value(&value).map_err(InvocationError::Encode),
            Err(e) => Err(InvocationError::Failed(e.to_string())),
        }
    }
}

/// A type whose operations can be served.
pub trait Service: Send + Sync + Sized + 'static {
    /// Register every operation of the service.
    fn operations(ops: &mut Operations<Self>);
}

/// Type-erased operation over a service `S`.
pub trait Operation<S>: Send + Sync + 'static {
    /// Coerce the parameters and run the handler.
    fn invoke(
        &self,
        service: Arc<S>,
        parameters: Vec<Parameter>,
    ) -> BoxFuture<'static, InvocationResult>;
}

/// Wrapper for async handlers taking the shared service.
pub struct AsyncOperation<F, A, Fut> {
    handler: F,
    _phantom: PhantomData<fn(A) -> Fut>,
}

impl<S, F, A, Fut> Operation<S> for AsyncOperation<F, A, Fut>
where
    S: Send + Sync + 'static,
    F: Fn(Arc<S>, A) -> Fut + Send + Sync + 'static,
    A: Arguments,
    Fut: Future + Send + 'static,
    Fut::Output: Outcome,
{
    fn invoke(
        &self,
        service: Arc<S>,
        parameters: Vec<Parameter>,
    ) -> BoxFuture<'static, InvocationResult> {
        let args = match A::from_parameters(parameters) {
            Ok(args) => args,
            Err(e) => return Box::pin(future::ready(Err(e.into()))),
        };
        let fut = (self.handler)(service, args);
        Box::pin(async move { fut.await.into_value() })
    }
}

/// Wrapper for synchronous handlers borrowing the service.
pub struct SyncOperation<F, A, O> {
    handler: F,
    _phantom: PhantomData<fn(A) -> O>,
}

impl<S, F, A, O> Operation<S> for SyncOperation<F, A, O>
where
    S: Send + Sync + 'static,
    F: Fn(&S, A) -> O + Send + Sync + 'static,
    A: Arguments,
    O: Outcome,
{
    fn invoke(
        &self,
        service: Arc<S>,
        parameters: Vec<Parameter>,
    ) -> BoxFuture<'static, InvocationResult> {
        let result = A::from_parameters(parameters)
            .map_err(InvocationError::from)
            .and_then(|args| (self.handler)(&*service, args).into_value());
        Box::pin(future::ready(result))
    }
}

/// Table mapping operation names to handlers.
pub struct Operations<S> {
    operations: HashMap<String, Box<dyn Operation<S>>>,
}

impl<S: Send + Sync + 'static> Operations<S> {
    /// Create an empty table.
    pub fn new() -> Self {
        Self {
            operations: HashMap::new(),
        }
    }

    /// Build the table a service declares for itself.
    pub fn of_service() -> Self
    where
        S: Service,
    {
        let mut ops = Self::new();
        S::operations(&mut ops);
        ops
    }

    /// Register an async operation.
    ///
    /// # Arguments
    ///
    /// * `name` - Operation name callers use
    /// * `handler` - Takes the shared service and an argument tuple, resolves to `Result<R, E>`
    pub fn register<F, A, Fut>(&mut self, name: &str, handler: F) -> &mut Self
    where
        F: Fn(Arc<S>, A) -> Fut + Send + Sync + 'static,
        A: Arguments,
        Fut: Future + Send + 'static,
        Fut::Output: Outcome,
    {
        self.insert(
            name,
            Box::new(AsyncOperation {
                handler,
                _phantom: PhantomData,
            }),
        )
    }

    /// Register a synchronous operation.
    pub fn register_sync<F, A, O>(&mut self, name: &str, handler: F) -> &mut Self
    where
        F: Fn(&S, A) -> O + Send + Sync + 'static,
        A: Arguments,
        O: Outcome,
    {
        self.insert(
            name,
            Box::new(SyncOperation {
                handler,
                _phantom: PhantomData,
            }),
        )
    }

    fn insert(&mut self, name: &str, operation: Box<dyn Operation<S>>) -> &mut Self {
        if self.operations.insert(name.to_string(), operation).is_some() {
            tracing::warn!(operation = name, "operation registered twice, keeping the last one");
        }
        self
    }

    /// Get an operation by name.
    pub fn get(&self, name: &str) -> Option<&dyn Operation<S>> {
        self.operations.get(name).map(|op| op.as_ref())
    }

    /// Check if an operation is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.operations.contains_key(name)
    }

    /// Names of all registered operations.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.operations.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

impl<S: Send + Sync + 'static> Default for Operations<S> {
    fn default() -> Self {
        Self::new()
    }
}
