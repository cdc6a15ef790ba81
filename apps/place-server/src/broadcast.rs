//! Edit accumulation and the periodic fan-out tick.

use std::sync::Mutex;
use std::time::Duration;

use axum::extract::ws::Message;
use tokio::task::JoinHandle;

use crate::edit::RECORD_LEN;
use crate::state::SharedState;

/// How often the accumulated edits are flushed to every live client. One
/// frame per tick per client amortizes framing and syscall cost across
/// the whole edit population while keeping latency under 40 ms.
pub const BROADCAST_INTERVAL: Duration = Duration::from_millis(25);

/// Append-only accumulator of applied edit records since the last tick.
///
/// The mutex is a leaf lock, held for exactly one append or one swap.
/// Connection handlers append the raw 11-byte frame only after the canvas
/// write completed, so every record in the buffer reflects an applied
/// pixel.
pub struct ChangeBuffer {
    buf: Mutex<Vec<u8>>,
}

impl ChangeBuffer {
    pub fn new() -> Self {
        Self {
            buf: Mutex::new(Vec::new()),
        }
    }

    pub fn append(&self, record: &[u8]) {
        debug_assert_eq!(record.len(), RECORD_LEN);
        self.buf
            .lock()
            .expect("change buffer lock poisoned")
            .extend_from_slice(record);
    }

    /// Take the accumulated records, leaving the buffer empty. Returns
    /// None when nothing was appended since the last drain.
    pub fn drain(&self) -> Option<Vec<u8>> {
        let mut buf = self.buf.lock().expect("change buffer lock poisoned");
        if buf.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut *buf))
        }
    }

    pub fn pending_bytes(&self) -> usize {
        self.buf.lock().expect("change buffer lock poisoned").len()
    }
}

impl Default for ChangeBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Drive the broadcast tick: swap the buffer out and enqueue the drained
/// payload as one binary frame on every live client. The per-connection
/// writer tasks perform the actual socket writes concurrently; a client
/// whose writer is gone is asked to close.
pub fn spawn_broadcast_loop(state: SharedState) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(BROADCAST_INTERVAL);
        loop {
            ticker.tick().await;
            let Some(payload) = state.changes.drain() else {
                continue;
            };
            for client in state.registry.clients() {
                if !client.send(Message::Binary(payload.clone())) {
                    client.close();
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edit::EditRecord;

    fn record(x: u32, y: u32, r: u8, g: u8, b: u8) -> [u8; RECORD_LEN] {
        EditRecord { x, y, r, g, b }.encode()
    }

    #[test]
    fn length_is_always_a_multiple_of_record_len() {
        let buffer = ChangeBuffer::new();
        assert_eq!(buffer.pending_bytes(), 0);

        buffer.append(&record(1, 2, 3, 4, 5));
        assert_eq!(buffer.pending_bytes(), RECORD_LEN);

        buffer.append(&record(6, 7, 8, 9, 10));
        assert_eq!(buffer.pending_bytes(), 2 * RECORD_LEN);
    }

    #[test]
    fn drain_preserves_append_order_and_empties_the_buffer() {
        let buffer = ChangeBuffer::new();
        let first = record(0, 0, 1, 1, 1);
        let second = record(5, 7, 255, 0, 0);
        buffer.append(&first);
        buffer.append(&second);

        let payload = buffer.drain().expect("buffer was not empty");
        let mut expected = first.to_vec();
        expected.extend_from_slice(&second);
        assert_eq!(payload, expected);

        assert_eq!(buffer.pending_bytes(), 0);
        assert!(buffer.drain().is_none());
    }

    #[test]
    fn drain_on_empty_buffer_is_none() {
        let buffer = ChangeBuffer::new();
        assert!(buffer.drain().is_none());
    }
}
