//! Call dispatcher - outgoing calls and their responses.
//!
//! Each call gets a fresh id and a slot in the pending table, then its request
//! is written. The caller waits until one of these happens:
//! - the receive loop delivers the matching response
//! - the caller's cancel signal fires
//! - the connection ends
//!
//! Any number of calls may be outstanding at once, and responses complete them
//! in whatever order they arrive.
//!
//! # Example
//!
//! ```ignore
//! let sum: i64 = dispatcher.invoke("Add", (2, 3)).await?;
//!
//! let parameters = vec![Parameter::typed("Guid", json!(id.to_string()))];
//! let user: User = dispatcher.invoke_with("GetUser", parameters).await?;
//! ```

mod pending;

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::codec::coerce;
use crate::connection::Connection;
use crate::error::{ProcwireError, Result};
use crate::handler::IntoParameters;
use crate::protocol::{CallRequest, CallResponse, Frame, Parameter};
use crate::transport::{FrameWriter, ResponseSink};
use pending::{PendingCalls, PendingGuard};

/// Issues calls to the peer and matches responses to them.
pub struct CallDispatcher {
    connection: Arc<Connection>,
    writer: Arc<FrameWriter>,
    pending: PendingCalls,
    next_id: AtomicU64,
}

impl CallDispatcher {
    pub fn new(connection: Arc<Connection>, writer: Arc<FrameWriter>) -> Self {
        Self {
            connection,
            writer,
            pending: PendingCalls::default(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Invoke an operation on the peer and coerce its return value into `R`.
    ///
    /// # Errors
    ///
    /// - A usage fault when the connection is not `Connected`; nothing is written
    /// - [`ProcwireError::RemoteInvocation`] when the operation failed on the peer
    /// - [`ProcwireError::Decode`] when the value does not convert to `R`
    /// - [`ProcwireError::Connection`] / [`ProcwireError::ConnectionClosed`] when
    ///   the connection ends before the response arrives
    pub async fn invoke<R, A>(&self, name: &str, args: A) -> Result<R>
    where
        R: DeserializeOwned + 'static,
        A: IntoParameters,
    {
        self.invoke_until(name, args, futures::future::pending()).await
    }

    /// Like [`invoke`](Self::invoke), giving up with [`ProcwireError::Cancelled`]
    /// when `cancel` completes first. A late response is then dropped.
    pub async fn invoke_until<R, A, F>(&self, name: &str, args: A, cancel: F) -> Result<R>
    where
        R: DeserializeOwned + 'static,
        A: IntoParameters,
        F: Future<Output = ()>,
    {
        self.connection.ensure_ready_for_invoke()?;
        let parameters = args.into_parameters()?;
        let value = self.call(name, parameters, cancel).await?;
        Ok(coerce::<R>(value)?)
    }

    /// Invoke with raw parameters, which may carry type hints.
    pub async fn invoke_with<R>(&self, name: &str, parameters: Vec<Parameter>) -> Result<R>
    where
        R: DeserializeOwned + 'static,
    {
        self.invoke(name, parameters).await
    }

    /// Number of calls waiting for a response.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    async fn call<F>(&self, name: &str, parameters: Vec<Parameter>, cancel: F) -> Result<Value>
    where
        F: Future<Output = ()>,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed).to_string();
        let rx = self.pending.register(id.clone());
        let _guard = PendingGuard::new(&self.pending, id.clone());

        let request = Frame::Request(CallRequest::new(id.clone(), name, parameters));
        if let Err(e) = self.writer.send_frame(&request).await {
            return Err(self.send_failed(e));
        }
        tracing::trace!(%id, operation = name, "request sent");

        let response = tokio::select! {
            biased;
            response = rx => match response {
                Ok(response) => response,
                Err(_) => return Err(ProcwireError::ConnectionClosed),
            },
            _ = cancel => {
                tracing::debug!(%id, operation = name, "call cancelled");
                return Err(ProcwireError::Cancelled);
            }
            state = self.connection.terminated() => {
                return Err(self.connection.interruption(state));
            }
        };

        match response {
            CallResponse {
                succeeded: true,
                value,
                ..
            } => Ok(value.unwrap_or(Value::Null)),
            CallResponse {
                failure_message, ..
            } => Err(ProcwireError::RemoteInvocation(
                failure_message.unwrap_or_else(|| format!("operation '{name}' failed")),
            )),
        }
    }

    /// Transport failures end the connection. Anything else failed before a
    /// byte was written and only concerns this call.
    fn send_failed(&self, e: ProcwireError) -> ProcwireError {
        match e {
            ProcwireError::Io(_) => {
                tracing::error!(error = %e, "failed to send request");
                let fault = Arc::new(e);
                self.connection.report_fault(Arc::clone(&fault));
                ProcwireError::Connection(fault)
            }
            other => other,
        }
    }
}

impl ResponseSink for CallDispatcher {
    fn accept_response(&self, response: CallResponse) {
        let id = response.id.clone();
        if !self.pending.complete(response) {
            tracing::debug!(%id, "dropping response for unknown call");
        }
    }
}
