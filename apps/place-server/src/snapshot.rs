//! Durable PNG snapshots of the canvas: startup restore, serialized
//! saves, and out-of-band archival copies.

use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use image::ImageFormat;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::canvas::Canvas;
use crate::state::SharedState;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("canvas file i/o: {0}")]
    Io(#[from] io::Error),
    #[error("canvas image codec: {0}")]
    Image(#[from] image::ImageError),
}

/// Owns the snapshot path and serializes every save against the next.
pub struct SnapshotStore {
    path: PathBuf,
    save_lock: Mutex<()>,
}

impl SnapshotStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            save_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Startup protocol: restore the canvas from an existing snapshot, or
    /// write an initial all-white one. Any failure here is fatal to the
    /// caller; the process must not serve without durable state.
    pub async fn init(&self, canvas: &Canvas) -> Result<(), SnapshotError> {
        if self.path.exists() {
            let img = image::open(&self.path)?;
            canvas.load_from_image(&img);
            info!(path = %self.path.display(), "loaded canvas from snapshot");
        } else {
            canvas.clear();
            self.save(canvas).await?;
            info!(path = %self.path.display(), "created new canvas snapshot");
        }
        Ok(())
    }

    /// Render the canvas and write the primary snapshot file. At most one
    /// save is in flight at a time; the PNG encode runs on the blocking
    /// pool so connection handlers are never stalled.
    pub async fn save(&self, canvas: &Canvas) -> Result<(), SnapshotError> {
        let _guard = self.save_lock.lock().await;
        let img = canvas.to_image();
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || img.save_with_format(&path, ImageFormat::Png))
            .await
            .map_err(|err| io::Error::other(err))??;
        Ok(())
    }

    /// Save, then spawn a timestamped archival copy. The copy runs out of
    /// band and its failure is logged, never propagated.
    pub async fn save_and_archive(&self, canvas: &Canvas) -> Result<(), SnapshotError> {
        self.save(canvas).await?;

        let src = self.path.clone();
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let dst = PathBuf::from(format!("{}-{}", src.display(), stamp));
        tokio::spawn(async move {
            if let Err(err) = tokio::fs::copy(&src, &dst).await {
                warn!(dst = %dst.display(), %err, "archival snapshot copy failed");
            }
        });
        Ok(())
    }
}

/// Periodic save tick. Failures are logged and retried on the next tick.
pub fn spawn_save_ticker(state: SharedState) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(state.config.save_interval);
        // An interval's first tick completes immediately; the first save
        // belongs one full period after startup.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match state.snapshots.save_and_archive(&state.canvas).await {
                Ok(()) => debug!("canvas snapshot saved"),
                Err(err) => error!(%err, "periodic canvas save failed"),
            }
        }
    })
}
