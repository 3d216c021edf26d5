//! Connection event observer.
//!
//! An [`Observer`] sees every frame sent and received, each state change and
//! the fault that ends a connection. It never influences control flow.
//!
//! # Example
//!
//! ```ignore
//! struct Counter(AtomicUsize);
//!
//! impl Observer for Counter {
//!     fn frame_sent(&self, _event: &FrameEvent) {
//!         self.0.fetch_add(1, Ordering::Relaxed);
//!     }
//! }
//!
//! let endpoint = Endpoint::builder()
//!     .invoker()
//!     .observer(Arc::new(Counter(AtomicUsize::new(0))))
//!     .attach(stream)
//!     .await?;
//! ```

use crate::connection::ConnectionState;
use crate::error::ProcwireError;
use crate::protocol::FrameKind;

/// A frame crossing the pipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameEvent {
    pub kind: FrameKind,
    /// Bytes on the wire, kind byte and padding included.
    pub wire_len: usize,
    /// Whether a padding byte was added (sent) or stripped (received).
    pub padded: bool,
}

/// Receives connection events. All methods default to doing nothing.
pub trait Observer: Send + Sync + 'static {
    fn frame_sent(&self, _event: &FrameEvent) {}

    fn frame_received(&self, _event: &FrameEvent) {}

    fn state_changed(&self, _from: ConnectionState, _to: ConnectionState) {}

    fn faulted(&self, _fault: &ProcwireError) {}
}

/// Forwards events to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl Observer for TracingObserver {
    fn frame_sent(&self, event: &FrameEvent) {
        tracing::trace!(
            kind = ?event.kind,
            wire_len = event.wire_len,
            padded = event.padded,
            "frame sent"
        );
    }

    fn frame_received(&self, event: &FrameEvent) {
        tracing::trace!(
            kind = ?event.kind,
            wire_len = event.wire_len,
            padded = event.padded,
            "frame received"
        );
    }

    fn state_changed(&self, from: ConnectionState, to: ConnectionState) {
        tracing::debug!(?from, ?to, "connection state changed");
    }

    fn faulted(&self, fault: &ProcwireError) {
        tracing::error!(error = %fault, "connection faulted");
    }
}
