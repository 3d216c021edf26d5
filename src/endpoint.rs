//! Endpoint - one connection wired up for its roles.
//!
//! An endpoint owns a connection and plugs the right consumers into its
//! receive loop:
//! - calling out attaches a [`CallDispatcher`] for responses
//! - serving attaches a [`RequestExecutor`] for requests
//!
//! A callback-capable endpoint does both over the same stream.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::JoinHandle;

use crate::config::EndpointConfig;
use crate::connection::{Connection, ConnectionState};
use crate::dispatcher::CallDispatcher;
use crate::error::{ProcwireError, Result, SharedError};
use crate::handler::{
    spawn_executor, IntoParameters, Operations, RequestExecutor, Service, ServiceFactory,
};
use crate::observer::{Observer, TracingObserver};
use crate::protocol::Parameter;
use crate::transport::{framed, pipe, FrameRouter, FrameWriter, PipeListener};

/// What the executor needs from the connection it serves.
struct Wiring {
    writer: Arc<FrameWriter>,
    connection: Arc<Connection>,
    dispatcher: Option<Arc<CallDispatcher>>,
    queue: usize,
}

type ExecutorSpawner =
    Box<dyn FnOnce(Wiring) -> Result<(RequestExecutor, JoinHandle<()>)> + Send>;

/// Builder for [`Endpoint`].
pub struct EndpointBuilder {
    config: EndpointConfig,
    observer: Arc<dyn Observer>,
    executor: Option<ExecutorSpawner>,
    invoker: bool,
}

impl EndpointBuilder {
    /// Create a builder with default configuration and no roles.
    pub fn new() -> Self {
        Self {
            config: EndpointConfig::default(),
            observer: Arc::new(TracingObserver),
            executor: None,
            invoker: false,
        }
    }

    /// Set the read chunk size. Both peers must use the same value.
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.config.chunk_size = size;
        self
    }

    /// Set the largest frame accepted from the peer.
    pub fn max_frame_size(mut self, size: usize) -> Self {
        self.config.max_frame_size = size;
        self
    }

    /// Set how many requests may queue for the executor.
    pub fn executor_queue(mut self, capacity: usize) -> Self {
        self.config.executor_queue = capacity;
        self
    }

    /// Set how long `dispose` lets a running operation finish.
    pub fn drain_timeout(mut self, timeout: Duration) -> Self {
        self.config.drain_timeout = timeout;
        self
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: EndpointConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the connection observer (default: [`TracingObserver`]).
    pub fn observer(mut self, observer: Arc<dyn Observer>) -> Self {
        self.observer = observer;
        self
    }

    /// Serve the operations `S` declares, creating the instance with `factory`.
    pub fn serve<S, F>(self, factory: F) -> Self
    where
        S: Service,
        F: Fn() -> S + Send + Sync + 'static,
    {
        self.serve_with(Operations::of_service(), factory)
    }

    /// Serve an explicitly built operation table.
    pub fn serve_with<S, F>(mut self, operations: Operations<S>, factory: F) -> Self
    where
        S: Send + Sync + 'static,
        F: Fn() -> S + Send + Sync + 'static,
    {
        let operations = Arc::new(operations);
        let factory: ServiceFactory<S> = Arc::new(factory);
        self.executor = Some(Box::new(move |wiring: Wiring| {
            Ok(spawn_executor(
                operations,
                factory,
                wiring.writer,
                wiring.connection,
                wiring.queue,
            ))
        }));
        self
    }

    /// Serve `S` and let it call the peer back.
    ///
    /// The factory receives the endpoint's dispatcher. Outgoing calls are
    /// enabled as well.
    pub fn serve_with_callback<S, F>(mut self, factory: F) -> Self
    where
        S: Service,
        F: Fn(Arc<CallDispatcher>) -> S + Send + Sync + 'static,
    {
        let operations = Arc::new(Operations::<S>::of_service());
        self.invoker = true;
        self.executor = Some(Box::new(move |wiring: Wiring| {
            let dispatcher = wiring
                .dispatcher
                .ok_or(ProcwireError::NotConfigured("invoke operations"))?;
            let factory: ServiceFactory<S> = Arc::new(move || factory(Arc::clone(&dispatcher)));
            Ok(spawn_executor(
                operations,
                factory,
                wiring.writer,
                wiring.connection,
                wiring.queue,
            ))
        }));
        self
    }

    /// Enable calls to the peer.
    pub fn invoker(mut self) -> Self {
        self.invoker = true;
        self
    }

    fn check(&self) -> Result<()> {
        self.config.validate()?;
        if self.executor.is_none() && !self.invoker {
            return Err(ProcwireError::InvalidConfig(
                "endpoint neither serves nor invokes operations".to_string(),
            ));
        }
        Ok(())
    }

    /// Attach to a connected duplex stream and start the receive loop.
    pub async fn attach<T>(self, stream: T) -> Result<Endpoint>
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        self.check()?;
        let EndpointBuilder {
            config,
            observer,
            executor,
            invoker,
        } = self;

        let (reader, writer) = framed(
            stream,
            config.chunk_size,
            config.max_frame_size,
            observer.clone(),
        );
        let connection = Arc::new(Connection::new(observer));
        let mut router = FrameRouter::new();

        let dispatcher = invoker
            .then(|| Arc::new(CallDispatcher::new(connection.clone(), writer.clone())));
        if let Some(dispatcher) = &dispatcher {
            router = router.with_responses(dispatcher.clone());
        }

        let executor_task = match executor {
            Some(spawn) => {
                let (executor, task) = spawn(Wiring {
                    writer: writer.clone(),
                    connection: connection.clone(),
                    dispatcher: dispatcher.clone(),
                    queue: config.executor_queue,
                })?;
                router = router.with_requests(Arc::new(executor));
                Some(task)
            }
            None => None,
        };

        let serves = executor_task.is_some();
        if let Err(e) = connection.start(reader, router) {
            if let Some(task) = executor_task {
                task.abort();
            }
            return Err(e);
        }
        tracing::debug!(serves, invokes = dispatcher.is_some(), "endpoint attached");

        Ok(Endpoint {
            connection,
            writer,
            dispatcher,
            executor_task: Mutex::new(executor_task),
            drain_timeout: config.drain_timeout,
            disposed: AtomicBool::new(false),
        })
    }

    /// Connect to the pipe `name`, waiting for the peer to listen.
    pub async fn connect(self, name: &str) -> Result<Endpoint> {
        self.check()?;
        let stream = pipe::connect(name).await?;
        self.attach(stream).await
    }

    /// Listen on the pipe `name` and attach to the first peer that connects.
    pub async fn accept(self, name: &str) -> Result<Endpoint> {
        self.check()?;
        let listener = PipeListener::bind(name).await?;
        let stream = listener.accept().await?;
        tracing::debug!(path = listener.path(), "peer connected");
        self.attach(stream).await
    }
}

impl Default for EndpointBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A running connection and the roles attached to it.
///
/// Dropping the endpoint disposes it.
pub struct Endpoint {
    connection: Arc<Connection>,
    writer: Arc<FrameWriter>,
    dispatcher: Option<Arc<CallDispatcher>>,
    executor_task: Mutex<Option<JoinHandle<()>>>,
    drain_timeout: Duration,
    disposed: AtomicBool,
}

impl Endpoint {
    pub fn builder() -> EndpointBuilder {
        EndpointBuilder::new()
    }

    /// An endpoint that only calls out.
    pub fn client() -> EndpointBuilder {
        EndpointBuilder::new().invoker()
    }

    /// An endpoint that only serves `S`.
    pub fn server<S, F>(factory: F) -> EndpointBuilder
    where
        S: Service,
        F: Fn() -> S + Send + Sync + 'static,
    {
        EndpointBuilder::new().serve(factory)
    }

    /// An endpoint serving `S`, whose instance can call the client back.
    pub fn server_with_callback<S, F>(factory: F) -> EndpointBuilder
    where
        S: Service,
        F: Fn(Arc<CallDispatcher>) -> S + Send + Sync + 'static,
    {
        EndpointBuilder::new().serve_with_callback(factory)
    }

    /// An endpoint that calls out and serves the callbacks of `S`.
    pub fn client_with_callback<S, F>(factory: F) -> EndpointBuilder
    where
        S: Service,
        F: Fn() -> S + Send + Sync + 'static,
    {
        EndpointBuilder::new().invoker().serve(factory)
    }

    #[inline]
    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn fault(&self) -> Option<SharedError> {
        self.connection.fault()
    }

    /// The dispatcher for calls to the peer.
    ///
    /// # Errors
    ///
    /// [`ProcwireError::NotConfigured`] if this endpoint was not built to call out.
    pub fn invoker(&self) -> Result<&Arc<CallDispatcher>> {
        self.dispatcher
            .as_ref()
            .ok_or(ProcwireError::NotConfigured("invoke operations"))
    }

    /// See [`CallDispatcher::invoke`].
    pub async fn invoke<R, A>(&self, name: &str, args: A) -> Result<R>
    where
        R: DeserializeOwned + 'static,
        A: IntoParameters,
    {
        self.invoker()?.invoke(name, args).await
    }

    /// See [`CallDispatcher::invoke_until`].
    pub async fn invoke_until<R, A, F>(&self, name: &str, args: A, cancel: F) -> Result<R>
    where
        R: DeserializeOwned + 'static,
        A: IntoParameters,
        F: Future<Output = ()>,
    {
        self.invoker()?.invoke_until(name, args, cancel).await
    }

    /// See [`CallDispatcher::invoke_with`].
    pub async fn invoke_with<R>(&self, name: &str, parameters: Vec<Parameter>) -> Result<R>
    where
        R: DeserializeOwned + 'static,
    {
        self.invoker()?.invoke_with(name, parameters).await
    }

    /// Wait until the peer closes the connection or it faults.
    ///
    /// `Ok(())` for a graceful close, [`ProcwireError::Connection`] otherwise.
    pub async fn wait_for_remote_close(&self) -> Result<()> {
        self.connection.wait_for_close().await
    }

    /// Like [`wait_for_remote_close`](Self::wait_for_remote_close), giving up
    /// with [`ProcwireError::Cancelled`] when `cancel` completes first.
    pub async fn wait_for_remote_close_until<F>(&self, cancel: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        self.connection.wait_for_close_until(cancel).await
    }

    /// Stop the receive loop and close the write side.
    ///
    /// The running operation gets up to the drain timeout to send its
    /// response and is aborted after that. Queued requests are dropped.
    /// Idempotent and non-blocking.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.connection.dispose();

        let executor = self.executor_task.lock().take();
        let writer = Arc::clone(&self.writer);
        let drain = self.drain_timeout;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Some(mut task) = executor {
                        if tokio::time::timeout(drain, &mut task).await.is_err() {
                            tracing::warn!(?drain, "operation still running, aborting executor");
                            task.abort();
                        }
                    }
                    if let Err(e) = writer.shutdown().await {
                        tracing::debug!(error = %e, "write side already closed");
                    }
                });
            }
            Err(_) => {
                tracing::warn!("endpoint disposed outside a runtime, write side left open")
            }
        }
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        self.dispose();
    }
}
