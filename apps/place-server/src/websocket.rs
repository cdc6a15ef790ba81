//! WebSocket upgrade, admission, and the per-connection state machine.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{ConnectInfo, State, WebSocketUpgrade};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::debug;

use crate::edit::EditRecord;
use crate::registry::Client;
use crate::state::SharedState;

/// Headers a fronting proxy uses to convey the real client address, in
/// precedence order. Falls back to the socket's remote address.
const PEER_HEADERS: [&str; 3] = ["CF-Connecting-IPv6", "CF-Connecting-IP", "X-Real-IP"];

pub fn peer_identifier(headers: &HeaderMap, remote_addr: SocketAddr) -> String {
    for name in PEER_HEADERS {
        if let Some(value) = headers.get(name) {
            if let Ok(value) = value.to_str() {
                if !value.is_empty() {
                    return value.to_string();
                }
            }
        }
    }
    remote_addr.ip().to_string()
}

/// WebSocket upgrade handler. Admission is decided before the upgrade:
/// a full server or a saturated peer gets 429 and never opens a socket.
pub async fn ws_handler(
    State(state): State<SharedState>,
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let peer = peer_identifier(&headers, remote_addr);
    let (tx, rx) = mpsc::unbounded_channel();
    match state.registry.register(&peer, tx) {
        Ok(client) => ws.on_upgrade(move |socket| handle_socket(socket, state, client, rx)),
        Err(err) => {
            debug!(%peer, %err, "connection rejected");
            StatusCode::TOO_MANY_REQUESTS.into_response()
        }
    }
}

async fn handle_socket(
    socket: WebSocket,
    state: SharedState,
    client: Arc<Client>,
    mut rx: mpsc::UnboundedReceiver<Message>,
) {
    let (mut sender, mut receiver) = socket.split();

    // Writer task: the only place this socket is written. A failed write
    // asks the read loop below to tear the connection down.
    let writer_client = client.clone();
    let writer = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sender.send(msg).await.is_err() {
                writer_client.close();
                break;
            }
        }
    });

    debug!(peer = %client.peer(), "client connected");

    loop {
        tokio::select! {
            msg = receiver.next() => {
                let Some(Ok(msg)) = msg else {
                    break;
                };
                match msg {
                    Message::Binary(frame) => {
                        if !apply_edit(&state, &client, &frame) {
                            break;
                        }
                    }
                    // The transport answers pings for us; pongs carry no
                    // liveness weight (only edit frames do).
                    Message::Ping(_) | Message::Pong(_) => {}
                    // Text frames are protocol violations; Close ends the
                    // session either way.
                    Message::Text(_) | Message::Close(_) => break,
                }
            }
            _ = client.wait_closed() => break,
        }
    }

    state.registry.remove(&client);
    writer.abort();
    debug!(peer = %client.peer(), "client disconnected");
}

/// One inbound frame through the connection state machine. Returns false
/// when the frame is a protocol violation and the connection must close.
fn apply_edit(state: &SharedState, client: &Client, frame: &[u8]) -> bool {
    client.touch();

    let record = match EditRecord::decode(frame, state.config.width, state.config.height) {
        Ok(record) => record,
        Err(err) => {
            debug!(peer = %client.peer(), %err, "closing connection");
            return false;
        }
    };

    // An edit that would not change the pixel is dropped here and never
    // reaches the change buffer.
    if state.canvas.get_pixel(record.x, record.y) == (record.r, record.g, record.b) {
        return true;
    }

    // Canvas first, then buffer: a record in the buffer always refers to
    // an applied pixel.
    state
        .canvas
        .place_pixel(record.x, record.y, record.r, record.g, record.b);
    state.changes.append(frame);
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::state::ServerState;

    fn test_state() -> SharedState {
        let config = Config {
            width: 100,
            height: 100,
            ..Config::default()
        };
        Arc::new(ServerState::new(config))
    }

    fn test_client(state: &SharedState) -> Arc<Client> {
        let (tx, rx) = mpsc::unbounded_channel();
        std::mem::forget(rx);
        state.registry.register("1.2.3.4", tx).unwrap()
    }

    #[test]
    fn peer_identifier_prefers_proxy_headers_in_order() {
        let remote: SocketAddr = "10.0.0.9:1234".parse().unwrap();

        let mut headers = HeaderMap::new();
        headers.insert("CF-Connecting-IP", "2.2.2.2".parse().unwrap());
        headers.insert("CF-Connecting-IPv6", "::1".parse().unwrap());
        headers.insert("X-Real-IP", "3.3.3.3".parse().unwrap());
        assert_eq!(peer_identifier(&headers, remote), "::1");

        headers.remove("CF-Connecting-IPv6");
        assert_eq!(peer_identifier(&headers, remote), "2.2.2.2");

        headers.remove("CF-Connecting-IP");
        assert_eq!(peer_identifier(&headers, remote), "3.3.3.3");

        headers.remove("X-Real-IP");
        assert_eq!(peer_identifier(&headers, remote), "10.0.0.9");
    }

    #[test]
    fn empty_proxy_header_falls_through() {
        let remote: SocketAddr = "10.0.0.9:1234".parse().unwrap();
        let mut headers = HeaderMap::new();
        headers.insert("CF-Connecting-IP", "".parse().unwrap());
        headers.insert("X-Real-IP", "3.3.3.3".parse().unwrap());
        assert_eq!(peer_identifier(&headers, remote), "3.3.3.3");
    }

    #[test]
    fn valid_edit_mutates_canvas_and_buffer() {
        let state = test_state();
        let client = test_client(&state);

        let frame = EditRecord {
            x: 5,
            y: 7,
            r: 255,
            g: 0,
            b: 0,
        }
        .encode();
        assert!(apply_edit(&state, &client, &frame));
        assert_eq!(state.canvas.get_pixel(5, 7), (255, 0, 0));
        assert_eq!(state.changes.drain().unwrap(), frame.to_vec());
    }

    #[test]
    fn noop_edit_is_silently_dropped() {
        let state = test_state();
        let client = test_client(&state);

        // (0,0) is already white on a fresh canvas.
        let frame = EditRecord {
            x: 0,
            y: 0,
            r: 255,
            g: 255,
            b: 255,
        }
        .encode();
        assert!(apply_edit(&state, &client, &frame));
        assert!(state.changes.drain().is_none());
    }

    #[test]
    fn malformed_frames_close_without_touching_the_canvas() {
        let state = test_state();
        let client = test_client(&state);

        assert!(!apply_edit(&state, &client, &[0u8; 10]));
        assert!(!apply_edit(&state, &client, &[0u8; 12]));

        // x == width: out of range.
        let frame = EditRecord {
            x: 100,
            y: 0,
            r: 1,
            g: 2,
            b: 3,
        }
        .encode();
        assert!(!apply_edit(&state, &client, &frame));
        assert!(state.changes.drain().is_none());
        assert_eq!(state.canvas.get_pixel(0, 0), (255, 255, 255));
    }
}
