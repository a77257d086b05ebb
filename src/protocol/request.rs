//! Request/response correlation for protocol endpoint commands.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use tokio::sync::oneshot;

/// Outcome reported by the endpoint for one request.
pub type RequestOutcome = Result<serde_json::Value, String>;

/// Request tracker for commands awaiting a `result` frame.
#[derive(Debug, Default)]
pub struct RequestTracker {
    pending: Mutex<HashMap<String, oneshot::Sender<RequestOutcome>>>,
    counter: AtomicU64,
}

impl RequestTracker {
    /// Create a new request tracker.
    pub fn new() -> Self {
        Self::default()
    }

    fn pending(&self) -> MutexGuard<'_, HashMap<String, oneshot::Sender<RequestOutcome>>> {
        // The map stays consistent even if a holder panicked.
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Generate a new unique request ID.
    pub fn next_id(&self) -> String {
        let counter = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        format!("{:X}.{}", rand::random::<u16>(), counter)
    }

    /// Register a pending request and get a receiver for the response.
    pub fn register(&self, id: &str) -> oneshot::Receiver<RequestOutcome> {
        let (tx, rx) = oneshot::channel();
        self.pending().insert(id.to_string(), tx);
        rx
    }

    /// Complete a pending request with a response.
    pub fn complete(&self, id: &str, outcome: RequestOutcome) -> bool {
        match self.pending().remove(id) {
            Some(tx) => tx.send(outcome).is_ok(),
            None => false,
        }
    }

    /// Cancel a pending request.
    pub fn cancel(&self, id: &str) {
        self.pending().remove(id);
    }

    /// Fail every outstanding request, e.g. when the socket goes away.
    pub fn fail_all(&self, reason: &str) {
        for (_, tx) in self.pending().drain() {
            let _ = tx.send(Err(reason.to_string()));
        }
    }

    #[cfg(test)]
    pub fn pending_count(&self) -> usize {
        self.pending().len()
    }
}
