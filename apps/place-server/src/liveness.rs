//! Liveness supervision: periodic pings, strike-based eviction of silent
//! clients, and the overload watchdog.

use std::time::Duration;

use axum::extract::ws::Message;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::registry::now_secs;
use crate::state::SharedState;

/// Ping every live client once per `ping_interval`. The ping goes through
/// the client's outbound channel like any other frame, so it can never
/// interleave with a broadcast payload on the socket.
pub fn spawn_ping_job(state: SharedState) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(state.config.ping_interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            for client in state.registry.clients() {
                client.mark_pinged();
                if !client.send(Message::Ping(Vec::new())) {
                    client.close();
                }
            }
        }
    })
}

/// Count strikes against clients that sent nothing for a full strike
/// window; evict at the configured limit. A client that keeps sending
/// edits never accumulates a strike.
pub fn spawn_strike_job(state: SharedState) -> JoinHandle<()> {
    tokio::spawn(async move {
        let window = state.config.strike_interval.as_secs();
        let mut ticker = tokio::time::interval(state.config.strike_interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let now = now_secs();
            for client in state.registry.clients() {
                let strikes = client.evaluate_strike(window, now);
                if strikes >= state.config.strikes_limit {
                    debug!(peer = %client.peer(), strikes, "evicting silent client");
                    state.registry.remove(&client);
                    client.close();
                }
            }
        }
    })
}

/// Once a second: log load figures and pull the emergency brake when the
/// connection count closes in on the admission limit. The brake saves a
/// final snapshot and exits 0, expecting a supervisor to restart us.
pub fn spawn_watchdog(state: SharedState) -> JoinHandle<()> {
    tokio::spawn(async move {
        let brake = state.config.max_connections.saturating_sub(50);
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        loop {
            ticker.tick().await;
            let connections = state.registry.total();
            debug!(
                connections,
                pending_bytes = state.changes.pending_bytes(),
                "load"
            );

            if connections > brake {
                warn!(connections, "connection limit approaching, shedding load");
                if let Err(err) = state.snapshots.save(&state.canvas).await {
                    tracing::error!(%err, "final canvas save failed");
                }
                info!("exiting for supervisor restart");
                std::process::exit(0);
            }
        }
    })
}
