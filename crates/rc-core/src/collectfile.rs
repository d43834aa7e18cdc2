//! Collect-only file sink.
//!
//! Archives collection input as one line per call, for deployments that want
//! the raw resolve stream on disk without running the cache. Same bounded
//! channel and single-writer design as the trace log, but with an explicit
//! start/stop lifecycle and a restartable file (each start truncates).

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rc_types::CacheError;
use tokio::fs::File;
use tokio::sync::mpsc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::writer::{compact_ts, run_writer, LineRecord};

/// In-flight record buffer capacity.
pub const BUFFER_SIZE: usize = 512;

struct Record {
    peer: Option<SocketAddr>,
    ts: DateTime<Utc>,
    client: IpAddr,
    name: String,
    resolved: Vec<IpAddr>,
}

impl LineRecord for Record {
    fn to_line(&self) -> String {
        let peer = self.peer.map(|p| p.to_string()).unwrap_or_default();
        let resolved = self
            .resolved
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",");
        format!(
            "{},{},{},{},{}\n",
            peer,
            compact_ts(self.ts),
            self.client,
            self.name,
            resolved
        )
    }
}

struct Running {
    tx: mpsc::Sender<Record>,
    stop: Arc<Notify>,
    writer: JoinHandle<()>,
}

/// Asynchronous collect archive.
pub struct CollectFile {
    path: PathBuf,
    state: Mutex<Option<Running>>,
}

impl CollectFile {
    /// A stopped sink; nothing touches the filesystem until [`CollectFile::start`].
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            state: Mutex::new(None),
        }
    }

    /// Create (truncate) the file and start the writer. Idempotent while
    /// running.
    pub async fn start(&self) -> Result<(), CacheError> {
        if self.state.lock().is_some() {
            return Ok(());
        }
        let file = File::create(&self.path).await?;
        let (tx, rx) = mpsc::channel(BUFFER_SIZE);
        let stop = Arc::new(Notify::new());
        let writer = tokio::spawn(run_writer(file, rx, stop.clone()));
        *self.state.lock() = Some(Running { tx, stop, writer });
        Ok(())
    }

    /// Append one collect record. Fails `LoggerClosed` unless started.
    pub async fn write(
        &self,
        peer: Option<SocketAddr>,
        ts: DateTime<Utc>,
        client: IpAddr,
        name: &str,
        resolved: &[IpAddr],
    ) -> Result<(), CacheError> {
        let tx = self
            .state
            .lock()
            .as_ref()
            .map(|r| r.tx.clone())
            .ok_or(CacheError::LoggerClosed)?;
        tx.send(Record {
            peer,
            ts,
            client,
            name: name.to_string(),
            resolved: resolved.to_vec(),
        })
        .await
        .map_err(|_| CacheError::LoggerClosed)
    }

    /// Drain buffered records, sync and close the file. No-op when not
    /// started.
    pub async fn stop(&self) {
        let running = self.state.lock().take();
        if let Some(running) = running {
            running.stop.notify_one();
            let _ = running.writer.await;
        }
    }
}
