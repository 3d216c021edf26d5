//! Handler module - serving operations to the peer.
//!
//! Provides:
//! - [`Operations`] - maps operation names to typed handlers
//! - [`Arguments`] / [`IntoParameters`] - argument tuples on both sides of a call
//! - [`spawn_executor`] - the serial task that runs incoming requests
//!
//! # Example
//!
//! ```ignore
//! use procwire_rpc::handler::{Operations, Service};
//!
//! struct Greeter;
//!
//! impl Service for Greeter {
//!     fn operations(ops: &mut Operations<Self>) {
//!         ops.register_sync("Greet", |_g, (name,): (String,)| {
//!             Ok::<_, Infallible>(format!("hello {name}"))
//!         });
//!     }
//! }
//! ```

mod arguments;
mod executor;
mod registry;

pub use arguments::{ArgumentError, Arguments, IntoParameters};
pub use executor::{spawn_executor, RequestExecutor, ServiceFactory};
pub use registry::{
    AsyncOperation, InvocationError, InvocationResult, Operation, Operations, Outcome, Service,
    SyncOperation,
};
