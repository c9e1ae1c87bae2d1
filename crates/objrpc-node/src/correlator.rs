use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

use objrpc_common::protocol::{ObjrpcError, PacketId, Result, WireValue};

struct PendingResponse {
    tx: oneshot::Sender<Result<WireValue>>,
    deadline: Instant,
}

/// Pending-request table correlating responses to callers.
///
/// Every request expecting a reply registers here before its packet is
/// written; the entry is removed exactly once, by whichever comes first of a
/// matching response, the TTL sweep, or a disconnect. A resolve for an
/// unknown id (late response, duplicate) is a silent no-op.
///
/// The sweep runs on a single shared background task per correlator; the
/// handle is kept so the task is aborted when the correlator goes away.
pub(crate) struct ResponseCorrelator {
    pending: Arc<Mutex<HashMap<PacketId, PendingResponse>>>,
    timeout: Duration,
    sweep: JoinHandle<()>,
}

impl ResponseCorrelator {
    /// Creates a correlator with the given response TTL. Must be called
    /// within a tokio runtime (the sweep task is spawned immediately).
    pub fn new(timeout: Duration) -> Self {
        let pending: Arc<Mutex<HashMap<PacketId, PendingResponse>>> =
            Arc::new(Mutex::new(HashMap::new()));
        let sweep = tokio::spawn(sweep_expired(pending.clone(), timeout));
        ResponseCorrelator {
            pending,
            timeout,
            sweep,
        }
    }

    /// Registers a pending request and returns the receiver its response
    /// will be delivered on.
    pub fn register(&self, id: PacketId) -> oneshot::Receiver<Result<WireValue>> {
        let (tx, rx) = oneshot::channel();
        let entry = PendingResponse {
            tx,
            deadline: Instant::now() + self.timeout,
        };
        self.pending
            .lock()
            .expect("pending table lock poisoned")
            .insert(id, entry);
        rx
    }

    /// Delivers a response; returns false when the id is unknown or already
    /// expired.
    pub fn resolve(&self, id: PacketId, result: Result<WireValue>) -> bool {
        let entry = self
            .pending
            .lock()
            .expect("pending table lock poisoned")
            .remove(&id);
        match entry {
            Some(entry) => {
                let _ = entry.tx.send(result);
                true
            }
            None => false,
        }
    }

    /// Drops a registration without notifying the caller (used when the
    /// request packet could not be written in the first place).
    pub fn forget(&self, id: PacketId) {
        self.pending
            .lock()
            .expect("pending table lock poisoned")
            .remove(&id);
    }

    /// Fails every outstanding request, e.g. with Connection-Closed on
    /// disconnect. Never rely on the TTL for this - it would delay cleanup.
    pub fn fail_all<F>(&self, error: F)
    where
        F: Fn() -> ObjrpcError,
    {
        let drained: Vec<PendingResponse> = {
            let mut pending = self.pending.lock().expect("pending table lock poisoned");
            pending.drain().map(|(_, entry)| entry).collect()
        };
        for entry in drained {
            let _ = entry.tx.send(Err(error()));
        }
    }

    pub fn len(&self) -> usize {
        self.pending
            .lock()
            .expect("pending table lock poisoned")
            .len()
    }
}

impl Drop for ResponseCorrelator {
    fn drop(&mut self) {
        self.sweep.abort();
    }
}

async fn sweep_expired(
    pending: Arc<Mutex<HashMap<PacketId, PendingResponse>>>,
    timeout: Duration,
) {
    let period = std::cmp::max(timeout / 4, Duration::from_millis(10));
    let mut interval = tokio::time::interval(period);
    loop {
        interval.tick().await;
        let now = Instant::now();
        let expired: Vec<PendingResponse> = {
            let mut pending = pending.lock().expect("pending table lock poisoned");
            // a caller that dropped its future is collected without
            // notification; there is nobody left to notify
            pending.retain(|_, entry| !entry.tx.is_closed());
            let ids: Vec<PacketId> = pending
                .iter()
                .filter(|(_, entry)| entry.deadline <= now)
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter()
                .filter_map(|id| pending.remove(&id))
                .collect()
        };
        let timeout_ms = timeout.as_millis() as u64;
        for entry in expired {
            debug!(timeout_ms, "pending request timed out");
            let _ = entry.tx.send(Err(ObjrpcError::Timeout(timeout_ms)));
        }
    }
}
