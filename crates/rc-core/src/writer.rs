//! Shared single-writer loop for the append-only log files.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::sync::Notify;

/// Compact timestamp used by the trace and collect line formats.
pub(crate) fn compact_ts(ts: DateTime<Utc>) -> String {
    ts.format("%Y%m%d%H%M%S").to_string()
}

/// A record that serializes itself to one log line (newline included).
pub(crate) trait LineRecord: Send + 'static {
    fn to_line(&self) -> String;
}

/// Drain `rx` into `file` until the stop signal fires, then write whatever is
/// still buffered and sync the file. Exits immediately on the first write
/// error, leaving the remaining records undrained.
pub(crate) async fn run_writer<R: LineRecord>(
    mut file: File,
    mut rx: mpsc::Receiver<R>,
    stop: Arc<Notify>,
) {
    loop {
        tokio::select! {
            record = rx.recv() => match record {
                Some(record) => {
                    if file.write_all(record.to_line().as_bytes()).await.is_err() {
                        return;
                    }
                }
                None => break,
            },
            _ = stop.notified() => {
                while let Ok(record) = rx.try_recv() {
                    if file.write_all(record.to_line().as_bytes()).await.is_err() {
                        return;
                    }
                }
                break;
            }
        }
    }
    let _ = file.flush().await;
    let _ = file.sync_all().await;
}
