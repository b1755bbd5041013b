//! Stop / pause / resume control channel.
//!
//! The channel is polled by workers before every dispatch and written by an
//! operator (the `control` subcommand, or anything else that can write the
//! file). The core only ever reads it.
//!
//! # File format
//!
//! ```json
//! {"state":"running"}
//! {"state":"stop_requested"}
//! {"state":"paused_until","until":"2025-05-06T12:00:00Z"}
//! ```
//!
//! A missing or unreadable file reads as `running`, so a broken control file
//! can never wedge a crawl.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, instrument, warn};

use crate::error::StoreError;
use crate::models::ControlSignal;

#[async_trait]
pub trait ControlChannel: Send + Sync {
    async fn read_state(&self) -> ControlSignal;

    async fn write_state(&self, signal: ControlSignal) -> Result<(), StoreError>;
}

/// Process-local channel; writes are immediately visible to all readers.
#[derive(Debug)]
pub struct MemoryControlChannel {
    state: RwLock<ControlSignal>,
}

impl MemoryControlChannel {
    pub fn new(initial: ControlSignal) -> Self {
        Self {
            state: RwLock::new(initial),
        }
    }
}

impl Default for MemoryControlChannel {
    fn default() -> Self {
        Self::new(ControlSignal::Running)
    }
}

#[async_trait]
impl ControlChannel for MemoryControlChannel {
    async fn read_state(&self) -> ControlSignal {
        *self.state.read()
    }

    async fn write_state(&self, signal: ControlSignal) -> Result<(), StoreError> {
        *self.state.write() = signal;
        Ok(())
    }
}

/// Channel backed by a small JSON file.
#[derive(Debug, Clone)]
pub struct FileControlChannel {
    path: PathBuf,
}

impl FileControlChannel {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ControlChannel for FileControlChannel {
    async fn read_state(&self) -> ControlSignal {
        let raw = match fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return ControlSignal::Running,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Control file unreadable; assuming running");
                return ControlSignal::Running;
            }
        };
        if raw.trim().is_empty() {
            return ControlSignal::Running;
        }
        match serde_json::from_str(&raw) {
            Ok(signal) => signal,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Control file malformed; assuming running");
                ControlSignal::Running
            }
        }
    }

    /// Write atomically: a reader sees either the old or the new signal, never half a file.
    #[instrument(level = "info", skip(self), fields(path = %self.path.display()))]
    async fn write_state(&self, signal: ControlSignal) -> Result<(), StoreError> {
        let json = serde_json::to_string(&signal)?;
        if let Some(dir) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(dir)
                .await
                .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        }
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, json)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        debug!(%signal, "Control signal written");
        Ok(())
    }
}
