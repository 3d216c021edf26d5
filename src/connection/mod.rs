//! Connection module - lifecycle of one duplex stream.
//!
//! Provides:
//! - [`ConnectionState`] - monotonic `NotOpened → Connected → Closed | Faulted`
//! - [`Connection`] - the single receive loop, close notification and disposal
//!
//! # Example
//!
//! ```ignore
//! let connection = Arc::new(Connection::default());
//! let (reader, writer) = framed(stream, chunk_size, max_frame_size, observer);
//! connection.start(reader, FrameRouter::new().with_responses(dispatcher))?;
//!
//! connection.wait_for_close().await?;
//! ```

mod lifecycle;
mod state;

pub use lifecycle::Connection;
pub use state::ConnectionState;
