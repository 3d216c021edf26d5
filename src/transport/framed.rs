//! Frame transport over a duplex byte stream.
//!
//! The stream is split in two:
//! - [`FrameWriter`] is shared by everyone that sends. A single writer task
//!   performs one `write_all` + `flush` per frame, so frames never interleave.
//! - [`FrameReader`] is owned by the receive loop. It reads fixed-size chunks
//!   and ends a frame on the first short read.
//!
//! Decoded frames are handed to a [`FrameRouter`], which forwards requests to
//! a [`RequestSink`] and responses to a [`ResponseSink`].
//!
//! # Framing constraint
//!
//! The short-read rule assumes the stream hands each frame to the reader on
//! its own: not coalesced with the following frame and not split below the
//! chunk size. Local pipes and sockets behave this way when the reader keeps
//! up with the writer.

use std::io;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use futures::future::BoxFuture;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};

use crate::error::{ProcwireError, Result};
use crate::observer::{FrameEvent, Observer};
use crate::protocol::{split_wire, CallRequest, CallResponse, Frame};

/// Boxed read half of a stream.
pub type BoxedReader = Box<dyn AsyncRead + Unpin + Send>;

/// Boxed write half of a stream.
pub type BoxedWriter = Box<dyn AsyncWrite + Unpin + Send>;

/// Split any duplex stream into a frame reader and a shared frame writer.
pub fn framed<S>(
    stream: S,
    chunk_size: usize,
    max_frame_size: usize,
    observer: Arc<dyn Observer>,
) -> (FrameReader, Arc<FrameWriter>)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (read_half, write_half) = tokio::io::split(stream);
    let reader = FrameReader::new(read_half, chunk_size, max_frame_size, observer.clone());
    let writer = Arc::new(FrameWriter::new(write_half, chunk_size, observer));
    (reader, writer)
}

/// Frames queued for the writer task before senders wait.
pub const WRITE_QUEUE_CAPACITY: usize = 64;

enum WriteCommand {
    Frame {
        bytes: Bytes,
        event: FrameEvent,
        done: oneshot::Sender<io::Result<()>>,
    },
    Shutdown {
        done: oneshot::Sender<io::Result<()>>,
    },
}

/// Serializes frame writes onto the stream.
///
/// Writes happen on a task of their own. A frame handed to that task is
/// written out whole even if the sender stops waiting for it.
pub struct FrameWriter {
    tx: mpsc::Sender<WriteCommand>,
    chunk_size: usize,
}

impl FrameWriter {
    /// Spawn the writer task for `writer`. Must be called inside a runtime.
    pub fn new<W>(writer: W, chunk_size: usize, observer: Arc<dyn Observer>) -> Self
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(WRITE_QUEUE_CAPACITY);
        tokio::spawn(write_loop(Box::new(writer), rx, observer));
        Self { tx, chunk_size }
    }

    /// Encode and write one frame.
    ///
    /// Encoding happens before the frame is queued. The whole frame, padding
    /// included, goes out in a single write followed by a flush.
    pub async fn send_frame(&self, frame: &Frame) -> Result<()> {
        let encoded = frame.encode(self.chunk_size)?;
        let event = FrameEvent {
            kind: encoded.kind,
            wire_len: encoded.wire_len(),
            padded: encoded.padded,
        };
        let (done, written) = oneshot::channel();
        self.submit(
            WriteCommand::Frame {
                bytes: encoded.bytes,
                event,
                done,
            },
            written,
        )
        .await
    }

    /// Shut down the write side so the peer sees end of stream.
    ///
    /// Frames queued before the call are written first.
    pub async fn shutdown(&self) -> Result<()> {
        let (done, written) = oneshot::channel();
        self.submit(WriteCommand::Shutdown { done }, written).await
    }

    async fn submit(
        &self,
        command: WriteCommand,
        written: oneshot::Receiver<io::Result<()>>,
    ) -> Result<()> {
        if self.tx.send(command).await.is_err() {
            return Err(writer_stopped());
        }
        match written.await {
            Ok(result) => Ok(result?),
            Err(_) => Err(writer_stopped()),
        }
    }
}

fn writer_stopped() -> ProcwireError {
    ProcwireError::Io(io::Error::new(
        io::ErrorKind::BrokenPipe,
        "frame writer stopped",
    ))
}

async fn write_loop(
    mut writer: BoxedWriter,
    mut rx: mpsc::Receiver<WriteCommand>,
    observer: Arc<dyn Observer>,
) {
    while let Some(command) = rx.recv().await {
        match command {
            WriteCommand::Frame { bytes, event, done } => {
                let result = write_frame(&mut writer, &bytes).await;
                if result.is_ok() {
                    observer.frame_sent(&event);
                }
                // The sender may have stopped waiting.
                let _ = done.send(result);
            }
            WriteCommand::Shutdown { done } => {
                let _ = done.send(writer.shutdown().await);
            }
        }
    }
    tracing::trace!("frame writer stopped");
}

async fn write_frame(writer: &mut BoxedWriter, bytes: &[u8]) -> io::Result<()> {
    writer.write_all(bytes).await?;
    writer.flush().await
}

/// Reads chunked frames off the stream.
pub struct FrameReader {
    reader: BoxedReader,
    chunk: Vec<u8>,
    buffer: BytesMut,
    max_frame_size: usize,
    observer: Arc<dyn Observer>,
}

impl FrameReader {
    pub fn new<R>(
        reader: R,
        chunk_size: usize,
        max_frame_size: usize,
        observer: Arc<dyn Observer>,
    ) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        Self {
            reader: Box::new(reader),
            chunk: vec![0u8; chunk_size],
            buffer: BytesMut::with_capacity(chunk_size),
            max_frame_size,
            observer,
        }
    }

    /// Read the next frame.
    ///
    /// # Errors
    ///
    /// - [`ProcwireError::ConnectionClosed`] when the peer closed the stream
    /// - [`ProcwireError::Protocol`] for oversize frames or an unknown kind
    /// - [`ProcwireError::Io`] / [`ProcwireError::Json`] for transport and decode failures
    pub async fn receive_frame(&mut self) -> Result<Frame> {
        self.buffer.clear();
        loop {
            let n = self.reader.read(&mut self.chunk).await?;
            if n == 0 {
                if !self.buffer.is_empty() {
                    tracing::warn!(
                        buffered = self.buffer.len(),
                        "peer closed the stream in the middle of a frame"
                    );
                }
                return Err(ProcwireError::ConnectionClosed);
            }

            self.buffer.extend_from_slice(&self.chunk[..n]);
            if self.buffer.len() > self.max_frame_size {
                return Err(ProcwireError::Protocol(format!(
                    "Frame size {} exceeds maximum {}",
                    self.buffer.len(),
                    self.max_frame_size
                )));
            }

            if n < self.chunk.len() {
                break;
            }
        }

        let (kind, payload, padded) = split_wire(&self.buffer)?;
        self.observer.frame_received(&FrameEvent {
            kind,
            wire_len: self.buffer.len(),
            padded,
        });
        Frame::decode_payload(kind, payload)
    }
}

/// Consumer of incoming call requests.
pub trait RequestSink: Send + Sync + 'static {
    /// Accept a request. May wait for queue capacity.
    fn accept_request(&self, request: CallRequest) -> BoxFuture<'_, Result<()>>;
}

/// Consumer of incoming call responses.
pub trait ResponseSink: Send + Sync + 'static {
    /// Complete the call the response belongs to. Never fails.
    fn accept_response(&self, response: CallResponse);
}

/// Routes decoded frames to their consumers.
#[derive(Clone, Default)]
pub struct FrameRouter {
    requests: Option<Arc<dyn RequestSink>>,
    responses: Option<Arc<dyn ResponseSink>>,
}

impl FrameRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route requests to `sink`.
    pub fn with_requests(mut self, sink: Arc<dyn RequestSink>) -> Self {
        self.requests = Some(sink);
        self
    }

    /// Route responses to `sink`.
    pub fn with_responses(mut self, sink: Arc<dyn ResponseSink>) -> Self {
        self.responses = Some(sink);
        self
    }

    /// Hand a frame to its consumer. A frame nobody consumes is a protocol fault.
    pub async fn dispatch_frame(&self, frame: Frame) -> Result<()> {
        match frame {
            Frame::Request(request) => match &self.requests {
                Some(sink) => sink.accept_request(request).await,
                None => Err(ProcwireError::Protocol(format!(
                    "Received request '{}' but this endpoint serves no operations",
                    request.method_name
                ))),
            },
            Frame::Response(response) => match &self.responses {
                Some(sink) => {
                    sink.accept_response(response);
                    Ok(())
                }
                None => Err(ProcwireError::Protocol(format!(
                    "Received response '{}' but this endpoint makes no calls",
                    response.id
                ))),
            },
        }
    }
}
