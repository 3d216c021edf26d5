//! Transport module - framing and platform-specific pipe handling.
//!
//! Provides:
//! - Chunked frame reader/writer over any duplex byte stream
//! - Unix Domain Sockets (Linux/macOS)
//! - Named Pipes (Windows)

mod framed;
pub mod pipe;

pub use framed::{
    framed, BoxedReader, BoxedWriter, FrameReader, FrameRouter, FrameWriter, RequestSink,
    ResponseSink,
};
pub use pipe::{pipe_path, PipeListener, PipeStream, CONNECT_RETRY_INTERVAL};
