//! Asynchronous trace of every collect and check call.
//!
//! The data path only enqueues; a single writer task owns the file. The
//! channel is bounded so a failing disk cannot exhaust memory — once the
//! buffer fills, enqueue waits and the caller slows down instead.

use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rc_types::{CacheError, CacheResponse};
use tokio::fs::File;
use tokio::sync::mpsc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::writer::{compact_ts, run_writer, LineRecord};

/// In-flight record buffer capacity.
pub const BUFFER_SIZE: usize = 512;

/// Collection and check trace sink.
///
/// `peer` is the remote endpoint of the RPC caller when the transport knows
/// it; it is recorded verbatim and may be absent.
#[async_trait]
pub trait TraceLog: Send + Sync {
    async fn log_collect(
        &self,
        peer: Option<SocketAddr>,
        ts: DateTime<Utc>,
        client: IpAddr,
        name: &str,
        resolved: &[IpAddr],
        cnames: &[String],
    ) -> Result<(), CacheError>;

    async fn log_check(
        &self,
        peer: Option<SocketAddr>,
        ts: DateTime<Utc>,
        client: IpAddr,
        resolved: IpAddr,
        name: &str,
        response: &CacheResponse,
    ) -> Result<(), CacheError>;
}

enum Op {
    Collect,
    Check,
}

struct Record {
    op: Op,
    peer: Option<SocketAddr>,
    ts: DateTime<Utc>,
    client: IpAddr,
    name: String,
    resolved: Vec<IpAddr>,
    result: bool,
}

impl LineRecord for Record {
    fn to_line(&self) -> String {
        let ts = compact_ts(self.ts);
        let peer = self.peer.map(|p| p.to_string()).unwrap_or_default();
        match self.op {
            Op::Collect => {
                let resolved = self
                    .resolved
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(",");
                format!(
                    "{},collect,{},{},{},{}\n",
                    ts, peer, self.client, self.name, resolved
                )
            }
            Op::Check => {
                let resolved = self
                    .resolved
                    .first()
                    .map(ToString::to_string)
                    .unwrap_or_default();
                format!(
                    "{},check,{},{},{},{},{}\n",
                    ts, peer, self.client, self.name, resolved, self.result
                )
            }
        }
    }
}

/// File-backed [`TraceLog`].
///
/// Terminal state machine: open until [`FileTraceLog::close`], which drains
/// buffered records, syncs and closes the file. A second close and any
/// enqueue after close fail with `LoggerClosed`.
pub struct FileTraceLog {
    tx: mpsc::Sender<Record>,
    stop: Arc<Notify>,
    closed: AtomicBool,
    writer: Mutex<Option<JoinHandle<()>>>,
}

impl FileTraceLog {
    /// Create (truncate) the trace file and start the writer task.
    pub async fn create(path: impl AsRef<Path>) -> std::io::Result<Self> {
        Self::with_buffer(path, BUFFER_SIZE).await
    }

    /// Same as [`FileTraceLog::create`] with an explicit buffer capacity.
    pub async fn with_buffer(path: impl AsRef<Path>, buffer: usize) -> std::io::Result<Self> {
        let file = File::create(path).await?;
        let (tx, rx) = mpsc::channel(buffer);
        let stop = Arc::new(Notify::new());
        let writer = tokio::spawn(run_writer(file, rx, stop.clone()));
        Ok(Self {
            tx,
            stop,
            closed: AtomicBool::new(false),
            writer: Mutex::new(Some(writer)),
        })
    }

    /// Stop the writer after draining buffered records, then sync and close
    /// the file.
    pub async fn close(&self) -> Result<(), CacheError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(CacheError::LoggerClosed);
        }
        self.stop.notify_one();
        let writer = self.writer.lock().take();
        if let Some(writer) = writer {
            let _ = writer.await;
        }
        Ok(())
    }

    async fn enqueue(&self, record: Record) -> Result<(), CacheError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(CacheError::LoggerClosed);
        }
        // waits when the buffer is full
        self.tx
            .send(record)
            .await
            .map_err(|_| CacheError::LoggerClosed)
    }
}

#[async_trait]
impl TraceLog for FileTraceLog {
    async fn log_collect(
        &self,
        peer: Option<SocketAddr>,
        ts: DateTime<Utc>,
        client: IpAddr,
        name: &str,
        resolved: &[IpAddr],
        _cnames: &[String],
    ) -> Result<(), CacheError> {
        // the collect line records the queried name; aliases are not written
        self.enqueue(Record {
            op: Op::Collect,
            peer,
            ts,
            client,
            name: name.to_string(),
            resolved: resolved.to_vec(),
            result: false,
        })
        .await
    }

    async fn log_check(
        &self,
        peer: Option<SocketAddr>,
        ts: DateTime<Utc>,
        client: IpAddr,
        resolved: IpAddr,
        name: &str,
        response: &CacheResponse,
    ) -> Result<(), CacheError> {
        self.enqueue(Record {
            op: Op::Check,
            peer,
            ts,
            client,
            name: name.to_string(),
            resolved: vec![resolved],
            result: response.result,
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2019, 7, 24, 13, 5, 59).unwrap()
    }

    #[test]
    fn collect_line_format() {
        let record = Record {
            op: Op::Collect,
            peer: Some("10.9.8.7:4567".parse().unwrap()),
            ts: ts(),
            client: "192.168.1.5".parse().unwrap(),
            name: "www.example.com".into(),
            resolved: vec!["1.1.1.1".parse().unwrap(), "2.2.2.2".parse().unwrap()],
            result: false,
        };
        assert_eq!(
            record.to_line(),
            "20190724130559,collect,10.9.8.7:4567,192.168.1.5,www.example.com,1.1.1.1,2.2.2.2\n"
        );
    }

    #[test]
    fn check_line_format_with_empty_peer() {
        let record = Record {
            op: Op::Check,
            peer: None,
            ts: ts(),
            client: "192.168.1.5".parse().unwrap(),
            name: "www.example.com".into(),
            resolved: vec!["1.1.1.1".parse().unwrap()],
            result: true,
        };
        assert_eq!(
            record.to_line(),
            "20190724130559,check,,192.168.1.5,www.example.com,1.1.1.1,true\n"
        );
    }

    #[tokio::test]
    async fn write_close_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trace.log");
        let log = FileTraceLog::create(&path).await.unwrap();
        let client: IpAddr = "192.168.1.5".parse().unwrap();
        let resolved: Vec<IpAddr> = vec!["1.1.1.1".parse().unwrap()];
        log.log_collect(None, ts(), client, "www.example.com", &resolved, &[])
            .await
            .unwrap();
        let response = CacheResponse {
            result: true,
            last: Some(ts()),
            store: ts(),
        };
        log.log_check(None, ts(), client, resolved[0], "www.example.com", &response)
            .await
            .unwrap();
        log.close().await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains(",collect,"));
        assert!(lines[1].ends_with(",true"));
    }

    #[tokio::test]
    async fn close_is_terminal() {
        let dir = tempfile::tempdir().unwrap();
        let log = FileTraceLog::create(dir.path().join("trace.log"))
            .await
            .unwrap();
        log.close().await.unwrap();
        assert!(matches!(
            log.close().await,
            Err(CacheError::LoggerClosed)
        ));
        let err = log
            .log_collect(None, ts(), "192.168.1.5".parse().unwrap(), "a", &[], &[])
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::LoggerClosed));
    }
}
