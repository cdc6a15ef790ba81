//! The single server value tying canvas, change buffer, registry, and
//! snapshot store together.

use std::sync::Arc;

use crate::broadcast::{self, ChangeBuffer};
use crate::canvas::Canvas;
use crate::config::Config;
use crate::liveness;
use crate::registry::ClientRegistry;
use crate::snapshot::{self, SnapshotError, SnapshotStore};

pub struct ServerState {
    pub config: Config,
    pub canvas: Canvas,
    pub changes: ChangeBuffer,
    pub registry: ClientRegistry,
    pub snapshots: SnapshotStore,
}

pub type SharedState = Arc<ServerState>;

impl ServerState {
    /// Assemble the server value without touching the disk.
    pub fn new(config: Config) -> Self {
        Self {
            canvas: Canvas::new(config.width, config.height),
            changes: ChangeBuffer::new(),
            registry: ClientRegistry::new(config.max_connections, config.max_connections_per_ip),
            snapshots: SnapshotStore::new(config.save_location.clone()),
            config,
        }
    }

    /// Assemble and run the snapshot init protocol. A failure here means
    /// the process must refuse to serve.
    pub async fn init(config: Config) -> Result<SharedState, SnapshotError> {
        let state = Arc::new(Self::new(config));
        state.snapshots.init(&state.canvas).await?;
        Ok(state)
    }
}

/// Spawn the periodic machinery: broadcast tick, save tick, ping and
/// strike jobs, and the load watchdog.
pub fn spawn_background_tasks(state: &SharedState) {
    broadcast::spawn_broadcast_loop(state.clone());
    snapshot::spawn_save_ticker(state.clone());
    liveness::spawn_ping_job(state.clone());
    liveness::spawn_strike_job(state.clone());
    liveness::spawn_watchdog(state.clone());
}
