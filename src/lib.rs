//! # procwire-rpc
//!
//! Typed request/response RPC between two processes over a local duplex
//! stream (Unix Domain Socket or Windows Named Pipe).
//!
//! ## Architecture
//!
//! - **Frame transport**: one kind byte plus JSON text per frame, no length
//!   prefix. A frame ends on the first short read of a fixed-size chunk.
//! - **Connection**: a single receive loop routes frames until the peer closes
//!   the stream or something faults.
//! - **Call dispatcher**: outgoing calls, correlated to responses by id.
//! - **Request executor**: incoming calls, run one at a time against a lazily
//!   created service instance.
//!
//! Either side can serve, call, or both (callbacks) over the same stream.
//!
//! ## Example
//!
//! ```ignore
//! use procwire_rpc::handler::{Operations, Service};
//! use procwire_rpc::Endpoint;
//!
//! #[derive(Default)]
//! struct Calculator;
//!
//! impl Service for Calculator {
//!     fn operations(ops: &mut Operations<Self>) {
//!         ops.register_sync("Add", |_c, (a, b): (i64, i64)| Ok::<_, String>(a + b));
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> procwire_rpc::Result<()> {
//!     let server = tokio::spawn(Endpoint::server(Calculator::default).accept("calc"));
//!     let client = Endpoint::client().connect("calc").await?;
//!
//!     let sum: i64 = client.invoke("Add", (2, 3)).await?;
//!     assert_eq!(sum, 5);
//!
//!     drop(client);
//!     server.await.unwrap()?.wait_for_remote_close().await
//! }
//! ```

pub mod codec;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod observer;
pub mod protocol;
pub mod transport;

mod endpoint;

pub use config::EndpointConfig;
pub use connection::ConnectionState;
pub use dispatcher::CallDispatcher;
pub use endpoint::{Endpoint, EndpointBuilder};
pub use error::{ProcwireError, Result, SharedError};
pub use handler::{Operations, Service};
pub use observer::{FrameEvent, Observer, TracingObserver};
