//! Connection registry: peer (IP) buckets of live clients, admission
//! caps, and the per-client liveness bookkeeping the supervisor reads.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use axum::extract::ws::Message;
use thiserror::Error;
use tokio::sync::{mpsc, Notify};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AdmissionError {
    #[error("server connection limit reached")]
    ServerFull,
    #[error("per-ip connection limit reached")]
    PeerLimit,
}

pub(crate) fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// One live WebSocket connection.
///
/// All outbound frames (broadcast payloads, pings, close) are funneled
/// through `tx` into the connection's single writer task, so writes on a
/// socket can never interleave. `closed` aborts the connection handler's
/// read loop; the handler owns the actual socket teardown.
#[derive(Debug)]
pub struct Client {
    id: u64,
    peer: String,
    tx: mpsc::UnboundedSender<Message>,
    closed: Notify,
    /// Unix seconds of the last inbound edit frame.
    last_frame: AtomicU64,
    /// Unix seconds of the last ping we sent.
    last_ping: AtomicU64,
    strikes: AtomicU8,
}

impl Client {
    fn new(id: u64, peer: String, tx: mpsc::UnboundedSender<Message>) -> Self {
        let now = now_secs();
        Self {
            id,
            peer,
            tx,
            closed: Notify::new(),
            last_frame: AtomicU64::new(now),
            last_ping: AtomicU64::new(now),
            strikes: AtomicU8::new(0),
        }
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Enqueue a frame for the writer task. Returns false once the writer
    /// is gone, i.e. the connection is already being torn down.
    pub fn send(&self, msg: Message) -> bool {
        self.tx.send(msg).is_ok()
    }

    /// Ask the connection handler to close the socket.
    pub fn close(&self) {
        // notify_one stores a permit, so a close that races connection
        // setup is not lost.
        self.closed.notify_one();
    }

    pub async fn wait_closed(&self) {
        self.closed.notified().await;
    }

    /// Record an inbound edit frame.
    pub fn touch(&self) {
        self.last_frame.store(now_secs(), Ordering::Relaxed);
    }

    pub fn mark_pinged(&self) {
        self.last_ping.store(now_secs(), Ordering::Relaxed);
    }

    /// One strike-job evaluation: silent for longer than `window_secs`
    /// counts a strike, any recent frame resets the counter. Returns the
    /// counter after the update.
    pub fn evaluate_strike(&self, window_secs: u64, now: u64) -> u8 {
        let last = self.last_frame.load(Ordering::Relaxed);
        if now.saturating_sub(last) > window_secs {
            let prev = self.strikes.fetch_add(1, Ordering::Relaxed);
            prev.saturating_add(1)
        } else {
            self.strikes.store(0, Ordering::Relaxed);
            0
        }
    }

    #[cfg(test)]
    pub(crate) fn set_last_frame(&self, secs: u64) {
        self.last_frame.store(secs, Ordering::Relaxed);
    }
}

#[derive(Default)]
struct RegistryInner {
    peers: HashMap<String, Vec<Arc<Client>>>,
    total: usize,
}

/// Peer-id → live clients, guarded by a single mutex.
///
/// The lock is held only for structural reads and writes: admission
/// checks plus insert form one critical section, and it is never held
/// across socket I/O. Clients are removed by identity when their handler
/// exits (or liveness evicts them); an emptied bucket is dropped on the
/// spot, so there is no tombstone state to compact.
pub struct ClientRegistry {
    max_clients: usize,
    max_per_peer: usize,
    next_id: AtomicU64,
    inner: Mutex<RegistryInner>,
}

impl ClientRegistry {
    pub fn new(max_clients: usize, max_per_peer: usize) -> Self {
        Self {
            max_clients,
            max_per_peer,
            next_id: AtomicU64::new(1),
            inner: Mutex::new(RegistryInner::default()),
        }
    }

    /// Admit a new connection for `peer`, or refuse it before any upgrade
    /// happens. A peer with no bucket has zero existing connections.
    pub fn register(
        &self,
        peer: &str,
        tx: mpsc::UnboundedSender<Message>,
    ) -> Result<Arc<Client>, AdmissionError> {
        let mut inner = self.inner.lock().expect("registry lock poisoned");
        if inner.total >= self.max_clients {
            return Err(AdmissionError::ServerFull);
        }
        let existing = inner.peers.get(peer).map_or(0, Vec::len);
        if existing >= self.max_per_peer {
            return Err(AdmissionError::PeerLimit);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let client = Arc::new(Client::new(id, peer.to_string(), tx));
        inner
            .peers
            .entry(peer.to_string())
            .or_default()
            .push(client.clone());
        inner.total += 1;
        Ok(client)
    }

    /// Drop a client from its peer bucket. Idempotent: the connection
    /// handler and the liveness supervisor may both try.
    pub fn remove(&self, client: &Client) -> bool {
        let mut inner = self.inner.lock().expect("registry lock poisoned");
        let removed = match inner.peers.get_mut(&client.peer) {
            Some(bucket) => {
                let before = bucket.len();
                bucket.retain(|c| c.id != client.id);
                before - bucket.len()
            }
            None => return false,
        };
        inner.total -= removed;
        if inner.peers.get(&client.peer).map_or(false, Vec::is_empty) {
            inner.peers.remove(&client.peer);
        }
        removed > 0
    }

    /// Current number of live connections.
    pub fn total(&self) -> usize {
        self.inner.lock().expect("registry lock poisoned").total
    }

    /// Snapshot of every live client, taken under the lock and iterated
    /// outside it.
    pub fn clients(&self) -> Vec<Arc<Client>> {
        let inner = self.inner.lock().expect("registry lock poisoned");
        inner.peers.values().flatten().cloned().collect()
    }

    #[cfg(test)]
    pub(crate) fn peer_count(&self, peer: &str) -> usize {
        let inner = self.inner.lock().expect("registry lock poisoned");
        inner.peers.get(peer).map_or(0, Vec::len)
    }
}
