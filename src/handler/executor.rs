//! Serial request executor.
//!
//! The receive loop hands requests to a [`RequestExecutor`], which queues them
//! on a bounded channel. A dedicated task drains the queue and runs one
//! operation at a time, in arrival order:
//!
//! ```text
//! Receive loop ─► mpsc::Sender<CallRequest> ─► Executor task ─► FrameWriter
//! ```
//!
//! Because the receive loop only enqueues, it keeps reading while an operation
//! runs. An operation can therefore call back over the same connection and
//! receive the answer.
//!
//! Once the connection is ending, requests still in the queue are dropped
//! without running.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::registry::{Operation, Operations};
use crate::connection::Connection;
use crate::error::Result;
use crate::protocol::{CallRequest, CallResponse, Frame, Parameter};
use crate::transport::{FrameWriter, RequestSink};

/// Creates the service instance on the first request.
pub type ServiceFactory<S> = Arc<dyn Fn() -> S + Send + Sync>;

/// Queue side of the executor, routed to by the receive loop.
#[derive(Clone)]
pub struct RequestExecutor {
    tx: mpsc::Sender<CallRequest>,
}

impl RequestSink for RequestExecutor {
    fn accept_request(&self, request: CallRequest) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            // A stopped executor has already reported why; the loop ends on that.
            if let Err(mpsc::error::SendError(request)) = self.tx.send(request).await {
                tracing::debug!(
                    id = %request.id,
                    operation = %request.method_name,
                    "executor stopped, dropping request"
                );
            }
            Ok(())
        })
    }
}

/// Spawn the executor task for one connection.
///
/// # Arguments
///
/// * `operations` - Operation table of the service
/// * `factory` - Called once, on the first request that names a known operation
/// * `writer` - Where responses go
/// * `connection` - Receives write failures
/// * `capacity` - Bound of the request queue
pub fn spawn_executor<S>(
    operations: Arc<Operations<S>>,
    factory: ServiceFactory<S>,
    writer: Arc<FrameWriter>,
    connection: Arc<Connection>,
    capacity: usize,
) -> (RequestExecutor, JoinHandle<()>)
where
    S: Send + Sync + 'static,
{
    let (tx, rx) = mpsc::channel(capacity);
    let task = tokio::spawn(executor_loop(rx, operations, factory, writer, connection));
    (RequestExecutor { tx }, task)
}

async fn executor_loop<S>(
    mut rx: mpsc::Receiver<CallRequest>,
    operations: Arc<Operations<S>>,
    factory: ServiceFactory<S>,
    writer: Arc<FrameWriter>,
    connection: Arc<Connection>,
) where
    S: Send + Sync + 'static,
{
    let mut service: Option<Arc<S>> = None;

    while let Some(request) = rx.recv().await {
        if connection.is_ending() {
            tracing::debug!(id = %request.id, "connection ending, dropping queued requests");
            break;
        }

        let CallRequest {
            id,
            method_name,
            parameters,
        } = request;

        let response = match operations.get(&method_name) {
            None => {
                tracing::warn!(%id, operation = %method_name, "unknown operation");
                CallResponse::failure(id, format!("Unknown operation '{method_name}'"))
            }
            Some(operation) => match instance(&mut service, &factory) {
                Ok(service) => execute(operation, service, &method_name, id, parameters).await,
                Err(message) => {
                    tracing::error!(
                        %id,
                        operation = %method_name,
                        %message,
                        "service factory panicked"
                    );
                    CallResponse::failure(id, format!("service factory panicked: {message}"))
                }
            },
        };

        if let Err(e) = writer.send_frame(&Frame::Response(response)).await {
            tracing::error!(error = %e, "failed to send response, stopping executor");
            connection.report_fault(Arc::new(e));
            break;
        }
    }

    tracing::debug!("executor stopped");
}

/// The service instance, created on first use.
fn instance<S>(
    slot: &mut Option<Arc<S>>,
    factory: &ServiceFactory<S>,
) -> std::result::Result<Arc<S>, String> {
    if let Some(service) = slot {
        return Ok(Arc::clone(service));
    }
    let service = std::panic::catch_unwind(AssertUnwindSafe(|| factory()))
        .map(Arc::new)
        .map_err(|panic| panic_message(panic.as_ref()))?;
    *slot = Some(Arc::clone(&service));
    Ok(service)
}

async fn execute<S>(
    operation: &dyn Operation<S>,
    service: Arc<S>,
    name: &str,
    id: String,
    parameters: Vec<Parameter>,
) -> CallResponse
where
    S: Send + Sync + 'static,
{
    let outcome = AssertUnwindSafe(async { operation.invoke(service, parameters).await })
        .catch_unwind()
        .await;

    match outcome {
        Ok(Ok(value)) => CallResponse::success(id, value),
        Ok(Err(e)) => {
            tracing::debug!(%id, operation = name, error = %e, "operation failed");
            CallResponse::failure(id, e.to_string())
        }
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            tracing::error!(%id, operation = name, %message, "operation panicked");
            CallResponse::failure(id, format!("operation '{name}' panicked: {message}"))
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionState;
    use crate::handler::Service;
    use crate::observer::TracingObserver;
    use crate::protocol::DEFAULT_MAX_FRAME_SIZE;
    use crate::transport::FrameReader;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::io::duplex;

    const CHUNK: usize = 64;

    #[derive(Default)]
    struct Recorder {
        log: Mutex<Vec<String>>,
    }

    impl Service for Recorder {
        fn operations(ops: &mut Operations<Self>) {
            ops.register_sync("Echo", |_r: &Recorder, (text,): (String,)| {
                Ok::<_, String>(text)
            })
            .register("Step", |r: Arc<Recorder>, (name, ms): (String, u64)| async move {
                r.log.lock().push(format!("start {name}"));
                tokio::time::sleep(Duration::from_millis(ms)).await;
                r.log.lock().push(format!("end {name}"));
                Ok::<_, String>(name)
            })
            .register_sync("Fail", |_r: &Recorder, (): ()| Err::<(), _>("no luck"))
            .register_sync("Boom", |_r: &Recorder, (): ()| -> std::result::Result<(), String> {
                panic!("kaboom")
            });
        }
    }

    struct Harness {
        executor: RequestExecutor,
        task: JoinHandle<()>,
        responses: FrameReader,
        created: Arc<AtomicUsize>,
    }

    fn harness() -> Harness {
        let (a, b) = duplex(64 * 1024);
        let observer = Arc::new(TracingObserver);
        let writer = Arc::new(FrameWriter::new(a, CHUNK, observer.clone()));
        let responses = FrameReader::new(b, CHUNK, DEFAULT_MAX_FRAME_SIZE, observer);

        let created = Arc::new(AtomicUsize::new(0));
        let factory: ServiceFactory<Recorder> = {
            let created = created.clone();
            Arc::new(move || {
                created.fetch_add(1, Ordering::SeqCst);
                Recorder::default()
            })
        };

        let (executor, task) = spawn_executor(
            Arc::new(Operations::of_service()),
            factory,
            writer,
            Arc::new(Connection::default()),
            8,
        );
        Harness {
            executor,
            task,
            responses,
            created,
        }
    }

    fn request(id: &str, name: &str, params: Vec<serde_json::Value>) -> CallRequest {
        CallRequest::new(id, name, params.into_iter().map(Parameter::new).collect())
    }

    async fn call(h: &mut Harness, req: CallRequest) -> CallResponse {
        h.executor.accept_request(req).await.unwrap();
        match h.responses.receive_frame().await.unwrap() {
            Frame::Response(response) => response,
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_success_response() {
        let mut h = harness();
        let response = call(&mut h, request("1", "Echo", vec![json!("hi")])).await;
        assert_eq!(response, CallResponse::success("1", json!("hi")));
    }

    #[tokio::test]
    async fn test_unknown_operation() {
        let mut h = harness();
        let response = call(&mut h, request("2", "Nope", vec![])).await;
        assert!(!response.succeeded);
        assert_eq!(response.failure_message.as_deref(), Some("Unknown operation 'Nope'"));
        // Unknown names never create the service.
        assert_eq!(h.created.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_argument_failure_names_argument() {
        let mut h = harness();
        let response = call(&mut h, request("3", "Step", vec![json!("a"), json!("soon")])).await;
        assert!(!response.succeeded);
        let message = response.failure_message.unwrap();
        assert!(message.starts_with("invalid arguments: argument 1"), "{message}");
    }

    #[tokio::test]
    async fn test_handler_error_and_panic_keep_executor_alive() {
        let mut h = harness();

        let failed = call(&mut h, request("4", "Fail", vec![])).await;
        assert_eq!(failed.failure_message.as_deref(), Some("no luck"));

        let panicked = call(&mut h, request("5", "Boom", vec![])).await;
        assert_eq!(
            panicked.failure_message.as_deref(),
            Some("operation 'Boom' panicked: kaboom")
        );

        let ok = call(&mut h, request("6", "Echo", vec![json!("still here")])).await;
        assert!(ok.succeeded);
        assert!(!h.task.is_finished());
    }

    #[tokio::test]
    async fn test_service_created_once() {
        let mut h = harness();
        for i in 0..3 {
            call(&mut h, request(&i.to_string(), "Echo", vec![json!("x")])).await;
        }
        assert_eq!(h.created.load(Ordering::SeqCst), 1);
    }

    /// Operations over clones of one recorder, so a test can read its log.
    fn recording(
        log: &Arc<Recorder>,
    ) -> (Arc<Operations<Arc<Recorder>>>, ServiceFactory<Arc<Recorder>>) {
        let mut ops = Operations::<Arc<Recorder>>::new();
        ops.register("Step", |r: Arc<Arc<Recorder>>, (name, ms): (String, u64)| async move {
            r.log.lock().push(format!("start {name}"));
            tokio::time::sleep(Duration::from_millis(ms)).await;
            r.log.lock().push(format!("end {name}"));
            Ok::<_, String>(name)
        });
        let shared = log.clone();
        (Arc::new(ops), Arc::new(move || shared.clone()))
    }

    #[tokio::test]
    async fn test_requests_run_serially_in_order() {
        let log = Arc::new(Recorder::default());
        let (a, b) = duplex(64 * 1024);
        let observer = Arc::new(TracingObserver);
        let writer = Arc::new(FrameWriter::new(a, CHUNK, observer.clone()));
        let mut responses = FrameReader::new(b, CHUNK, DEFAULT_MAX_FRAME_SIZE, observer);

        let (ops, factory) = recording(&log);
        let (executor, _task) =
            spawn_executor(ops, factory, writer, Arc::new(Connection::default()), 8);

        executor
            .accept_request(request("1", "Step", vec![json!("slow"), json!(40)]))
            .await
            .unwrap();
        executor
            .accept_request(request("2", "Step", vec![json!("fast"), json!(20)]))
            .await
            .unwrap();

        let first = responses.receive_frame().await.unwrap();
        let second = responses.receive_frame().await.unwrap();
        assert_eq!(first.id(), "1");
        assert_eq!(second.id(), "2");
        assert_eq!(
            *log.log.lock(),
            vec!["start slow", "end slow", "start fast", "end fast"]
        );
    }

    #[tokio::test]
    async fn test_queued_requests_dropped_once_connection_ends() {
        let log = Arc::new(Recorder::default());
        let (a, _b) = duplex(64 * 1024);
        let writer = Arc::new(FrameWriter::new(a, CHUNK, Arc::new(TracingObserver)));

        let connection = Arc::new(Connection::default());
        let (loop_stream, _peer) = duplex(1024);
        let reader = FrameReader::new(
            loop_stream,
            CHUNK,
            DEFAULT_MAX_FRAME_SIZE,
            Arc::new(TracingObserver),
        );
        let _loop = connection
            .start(reader, crate::transport::FrameRouter::new())
            .unwrap();

        let (ops, factory) = recording(&log);
        let (executor, task) = spawn_executor(ops, factory, writer, connection.clone(), 8);

        executor
            .accept_request(request("1", "Step", vec![json!("running"), json!(40)]))
            .await
            .unwrap();
        for id in ["2", "3"] {
            executor
                .accept_request(request(id, "Step", vec![json!("queued"), json!(0)]))
                .await
                .unwrap();
        }
        while log.log.lock().is_empty() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        connection.dispose();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();

        // The running operation finishes, the queued ones never start.
        assert_eq!(*log.log.lock(), vec!["start running", "end running"]);
        connection.wait_for_close().await.unwrap();
        assert_eq!(connection.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_write_failure_reports_fault_and_stops() {
        let (a, b) = duplex(1024);
        drop(b);
        let observer = Arc::new(TracingObserver);
        let writer = Arc::new(FrameWriter::new(a, CHUNK, observer));

        let connection = Arc::new(Connection::default());
        let (loop_stream, _peer) = duplex(1024);
        let reader = FrameReader::new(
            loop_stream,
            CHUNK,
            DEFAULT_MAX_FRAME_SIZE,
            Arc::new(TracingObserver),
        );
        let _loop = connection
            .start(reader, crate::transport::FrameRouter::new())
            .unwrap();

        let (executor, task) = spawn_executor(
            Arc::new(Operations::<Recorder>::of_service()),
            Arc::new(Recorder::default),
            writer,
            connection.clone(),
            8,
        );

        executor
            .accept_request(request("1", "Echo", vec![json!("lost")]))
            .await
            .unwrap();
        task.await.unwrap();

        let err = connection.wait_for_close().await.unwrap_err();
        assert!(matches!(err.root(), crate::error::ProcwireError::Io(_)));

        // Requests after the executor stopped are dropped quietly.
        executor
            .accept_request(request("2", "Echo", vec![json!("late")]))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_factory_panic_becomes_failure() {
        let (a, b) = duplex(1024);
        let observer = Arc::new(TracingObserver);
        let writer = Arc::new(FrameWriter::new(a, CHUNK, observer.clone()));
        let mut responses = FrameReader::new(b, CHUNK, DEFAULT_MAX_FRAME_SIZE, observer);

        let factory: ServiceFactory<Recorder> = Arc::new(|| panic!("no config"));
        let (executor, _task) = spawn_executor(
            Arc::new(Operations::of_service()),
            factory,
            writer,
            Arc::new(Connection::default()),
            8,
        );

        executor
            .accept_request(request("1", "Echo", vec![json!("x")]))
            .await
            .unwrap();
        let response = responses.receive_frame().await.unwrap();
        match response {
            Frame::Response(r) => assert_eq!(
                r.failure_message.as_deref(),
                Some("service factory panicked: no config")
            ),
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn test_panic_message() {
        let boxed: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(boxed.as_ref()), "static");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(boxed.as_ref()), "owned");
        let boxed: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(boxed.as_ref()), "unknown panic");
    }
}
