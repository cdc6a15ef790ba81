//! Shared pixel-canvas broadcast server.
//!
//! Many clients view and edit one fixed-size raster over binary
//! WebSocket frames; every applied edit is batched and fanned out to all
//! live connections on a 25 ms tick, and the canvas is periodically
//! snapshotted to disk as PNG.

pub mod broadcast;
pub mod canvas;
pub mod cli;
pub mod config;
pub mod edit;
pub mod handlers;
pub mod liveness;
pub mod registry;
pub mod snapshot;
pub mod state;
pub mod websocket;

pub use cli::Cli;
pub use config::Config;
pub use state::{spawn_background_tasks, ServerState, SharedState};
