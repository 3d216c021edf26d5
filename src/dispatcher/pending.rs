//! Table of calls waiting for their response.

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::protocol::CallResponse;

/// Outstanding calls keyed by request id.
#[derive(Default)]
pub(crate) struct PendingCalls {
    calls: Mutex<HashMap<String, oneshot::Sender<CallResponse>>>,
}

impl PendingCalls {
    /// Register a call and get the receiver its response arrives on.
    pub fn register(&self, id: String) -> oneshot::Receiver<CallResponse> {
        let (tx, rx) = oneshot::channel();
        self.calls.lock().insert(id, tx);
        rx
    }

    /// Complete the call `response` belongs to.
    ///
    /// Returns `false` if no call with that id is outstanding.
    pub fn complete(&self, response: CallResponse) -> bool {
        let Some(tx) = self.calls.lock().remove(&response.id) else {
            return false;
        };
        // The caller may have given up between lookup and send.
        let _ = tx.send(response);
        true
    }

    pub fn remove(&self, id: &str) {
        self.calls.lock().remove(id);
    }

    pub fn len(&self) -> usize {
        self.calls.lock().len()
    }
}

/// Removes a call from the table when the caller stops waiting, however
/// that happens.
pub(crate) struct PendingGuard<'a> {
    pending: &'a PendingCalls,
    id: String,
}

impl<'a> PendingGuard<'a> {
    pub fn new(pending: &'a PendingCalls, id: String) -> Self {
        Self { pending, id }
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.remove(&self.id);
    }
}
