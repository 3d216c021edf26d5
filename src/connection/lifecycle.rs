//! Receive loop and lifecycle state machine.
//!
//! A [`Connection`] owns the only reader of the stream. Its loop receives a
//! frame, routes it, and repeats until the peer closes the stream, the
//! connection is disposed, or something fails. The loop is the only writer of
//! the state; everyone else observes it.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;

use super::state::ConnectionState;
use crate::error::{ProcwireError, Result, SharedError};
use crate::observer::{Observer, TracingObserver};
use crate::transport::{FrameReader, FrameRouter};

/// How the receive loop ended.
enum LoopEnd {
    Closed,
    Faulted(SharedError),
}

/// Lifecycle of one connection.
pub struct Connection {
    state: watch::Sender<ConnectionState>,
    started: AtomicBool,
    fault: OnceLock<SharedError>,
    stop_requested: AtomicBool,
    stop: Notify,
    /// Write failure handed in from outside the loop.
    reported: Mutex<Option<SharedError>>,
    observer: Arc<dyn Observer>,
}

impl Default for Connection {
    fn default() -> Self {
        Self::new(Arc::new(TracingObserver))
    }
}

impl Connection {
    pub fn new(observer: Arc<dyn Observer>) -> Self {
        let (state, _) = watch::channel(ConnectionState::NotOpened);
        Self {
            state,
            started: AtomicBool::new(false),
            fault: OnceLock::new(),
            stop_requested: AtomicBool::new(false),
            stop: Notify::new(),
            reported: Mutex::new(None),
            observer,
        }
    }

    /// Current state.
    #[inline]
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// The error that faulted the connection, if any.
    pub fn fault(&self) -> Option<SharedError> {
        self.fault.get().cloned()
    }

    /// Run the receive loop on the current task until it ends.
    ///
    /// # Errors
    ///
    /// [`ProcwireError::AlreadyStarted`] if the loop was started before. The
    /// running loop is not affected.
    pub async fn run(&self, reader: FrameReader, router: FrameRouter) -> Result<()> {
        self.begin()?;
        self.receive_loop(reader, router).await;
        Ok(())
    }

    /// Transition to `Connected` and spawn the receive loop.
    ///
    /// The state is `Connected` by the time this returns.
    pub fn start(
        self: &Arc<Self>,
        reader: FrameReader,
        router: FrameRouter,
    ) -> Result<JoinHandle<()>> {
        self.begin()?;
        let this = Arc::clone(self);
        Ok(tokio::spawn(async move {
            this.receive_loop(reader, router).await;
        }))
    }

    fn begin(&self) -> Result<()> {
        if self.started.swap(true, Ordering::AcqRel) {
            tracing::error!("connection can only be started once");
            return Err(ProcwireError::AlreadyStarted);
        }
        self.transition(ConnectionState::Connected);
        Ok(())
    }

    async fn receive_loop(&self, mut reader: FrameReader, router: FrameRouter) {
        let end = loop {
            let reported = self.reported.lock().take();
            if let Some(fault) = reported {
                break LoopEnd::Faulted(fault);
            }
            if self.stop_requested.load(Ordering::Acquire) {
                break LoopEnd::Closed;
            }

            let step = async {
                let frame = reader.receive_frame().await?;
                router.dispatch_frame(frame).await
            };

            let result = tokio::select! {
                biased;
                _ = self.stop.notified() => continue,
                result = step => result,
            };

            match result {
                Ok(()) => {}
                Err(ProcwireError::ConnectionClosed) => break LoopEnd::Closed,
                Err(e) => break LoopEnd::Faulted(Arc::new(e)),
            }
        };

        match end {
            LoopEnd::Closed => {
                tracing::debug!("receive loop closed");
                self.transition(ConnectionState::Closed);
            }
            LoopEnd::Faulted(fault) => {
                // Set before the state changes so every observer of `Faulted` sees it.
                let fault = self.fault.get_or_init(|| fault).clone();
                self.observer.faulted(&fault);
                self.transition(ConnectionState::Faulted);
            }
        }
    }

    fn transition(&self, to: ConnectionState) {
        // Only the loop (and `begin`, before it) writes the state.
        let from = self.state();
        if from != to {
            self.observer.state_changed(from, to);
        }
        self.state.send_replace(to);
    }

    /// Wait until the connection ends.
    ///
    /// Returns `Ok(())` for a graceful close. A fault is always delivered as
    /// [`ProcwireError::Connection`] wrapping the original error.
    pub async fn wait_for_close(&self) -> Result<()> {
        let state = self.terminated().await;
        self.close_outcome(state)
    }

    /// Like [`wait_for_close`](Self::wait_for_close), giving up with
    /// [`ProcwireError::Cancelled`] when `cancel` completes first.
    ///
    /// Cancelling only ends this wait. The connection keeps running.
    pub async fn wait_for_close_until<F>(&self, cancel: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::select! {
            biased;
            result = self.wait_for_close() => result,
            _ = cancel => Err(ProcwireError::Cancelled),
        }
    }

    /// Resolves with the terminal state once the loop has ended.
    pub(crate) async fn terminated(&self) -> ConnectionState {
        let mut rx = self.state.subscribe();
        let state = match rx.wait_for(|s| s.is_terminal()).await {
            Ok(state) => *state,
            // The sender lives in `self`, so this is unreachable while borrowed.
            Err(_) => self.state(),
        };
        state
    }

    fn close_outcome(&self, state: ConnectionState) -> Result<()> {
        match state {
            ConnectionState::Faulted => Err(self
                .fault()
                .map(ProcwireError::Connection)
                .unwrap_or(ProcwireError::ConnectionClosed)),
            _ => Ok(()),
        }
    }

    /// The error a pending call receives when the connection ends under it.
    pub(crate) fn interruption(&self, state: ConnectionState) -> ProcwireError {
        match (state, self.fault()) {
            (ConnectionState::Faulted, Some(fault)) => ProcwireError::Connection(fault),
            _ => ProcwireError::ConnectionClosed,
        }
    }

    /// Whether the connection has ended or been asked to end.
    ///
    /// Turns true as soon as `dispose` or a reported fault comes in, before
    /// the receive loop has moved the state.
    pub fn is_ending(&self) -> bool {
        self.stop_requested.load(Ordering::Acquire)
            || self.reported.lock().is_some()
            || self.state().is_terminal()
    }

    /// Fail unless operations can be invoked right now.
    pub fn ensure_ready_for_invoke(&self) -> Result<()> {
        match self.state() {
            ConnectionState::Connected => Ok(()),
            ConnectionState::NotOpened => Err(ProcwireError::NotOpened),
            ConnectionState::Closed => Err(ProcwireError::AlreadyClosed),
            ConnectionState::Faulted => match self.fault() {
                Some(fault) => Err(ProcwireError::Faulted(fault)),
                None => Err(ProcwireError::AlreadyClosed),
            },
        }
    }

    /// Ask the receive loop to stop. It ends in `Closed` at its next
    /// suspension point. Idempotent and non-blocking.
    pub fn dispose(&self) {
        if !self.stop_requested.swap(true, Ordering::AcqRel) {
            self.stop.notify_one();
        }
    }

    /// End the connection with `fault`, as if the receive loop had hit it.
    ///
    /// Used for write failures, which happen outside the loop. The first
    /// report wins.
    pub(crate) fn report_fault(&self, fault: SharedError) {
        {
            let mut slot = self.reported.lock();
            if slot.is_none() {
                *slot = Some(fault);
            }
        }
        self.stop.notify_one();
    }
}
