//! Resolution cache service: public API, lifecycle and periodic maintenance.

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rc_types::{CacheError, CacheResponse};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::cache::Cache;
use crate::tracelog::TraceLog;

/// Tunables for the service's background maintenance.
#[derive(Clone, Debug)]
pub struct ServiceConfig {
    /// Sweep interval for expired entries.
    pub clean_interval: Duration,
    /// Snapshot interval; only used when `dump_file` is set.
    pub dump_interval: Duration,
    /// Debug snapshot target; the dump task is disabled when `None`.
    pub dump_file: Option<PathBuf>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            clean_interval: Duration::from_secs(60),
            dump_interval: Duration::from_secs(300),
            dump_file: None,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    New,
    Started,
    Shutdown,
}

struct State {
    lifecycle: Lifecycle,
    stop: Option<watch::Sender<bool>>,
    tasks: Vec<JoinHandle<()>>,
}

/// The resolution cache service.
///
/// Wraps a [`Cache`] with the collect/check/uptime API, an optional trace
/// sink, and the periodic clean and dump tasks. Lifecycle is
/// `new -> started -> shutdown`; shutdown is terminal.
pub struct ResolvCacheService {
    cache: Arc<Cache>,
    trace: Option<Arc<dyn TraceLog>>,
    cfg: ServiceConfig,
    started: AtomicBool,
    state: Mutex<State>,
}

impl ResolvCacheService {
    pub fn new(cache: Arc<Cache>, cfg: ServiceConfig) -> Self {
        Self {
            cache,
            trace: None,
            cfg,
            started: AtomicBool::new(false),
            state: Mutex::new(State {
                lifecycle: Lifecycle::New,
                stop: None,
                tasks: Vec::new(),
            }),
        }
    }

    /// Attach a collect/check trace sink.
    pub fn with_trace(mut self, trace: Arc<dyn TraceLog>) -> Self {
        self.trace = Some(trace);
        self
    }

    /// Spawn the maintenance tasks. Idempotent while running; fails
    /// `Unavailable` once the service has been shut down.
    pub fn start(&self) -> Result<(), CacheError> {
        let mut state = self.state.lock();
        match state.lifecycle {
            Lifecycle::Started => return Ok(()),
            Lifecycle::Shutdown => return Err(CacheError::Unavailable),
            Lifecycle::New => {}
        }
        tracing::info!(target: "rc_core::service", "starting cache service");
        let (stop_tx, stop_rx) = watch::channel(false);
        let mut tasks = Vec::new();
        if !self.cache.expires().is_zero() {
            tasks.push(tokio::spawn(run_clean(
                self.cache.clone(),
                self.cfg.clean_interval,
                stop_rx.clone(),
            )));
        }
        if let Some(path) = self.cfg.dump_file.clone() {
            tasks.push(tokio::spawn(run_dump(
                self.cache.clone(),
                self.cfg.dump_interval,
                path,
                stop_rx,
            )));
        }
        state.stop = Some(stop_tx);
        state.tasks = tasks;
        state.lifecycle = Lifecycle::Started;
        self.started.store(true, Ordering::Release);
        Ok(())
    }

    /// Stop the maintenance tasks and refuse further calls. Idempotent.
    pub async fn shutdown(&self) {
        let (stop, tasks) = {
            let mut state = self.state.lock();
            if state.lifecycle != Lifecycle::Started {
                return;
            }
            state.lifecycle = Lifecycle::Shutdown;
            self.started.store(false, Ordering::Release);
            (state.stop.take(), std::mem::take(&mut state.tasks))
        };
        tracing::info!(target: "rc_core::service", "shutting down cache service");
        if let Some(stop) = stop {
            let _ = stop.send(true);
        }
        for task in tasks {
            let _ = task.await;
        }
    }

    /// Record a DNS answer observed for `client`. Each name in the CNAME
    /// chain is associated to the same resolved addresses, so later checks
    /// match through aliases.
    ///
    /// Limit errors from the cache are returned (the last one when several
    /// inserts fail) so callers can raise abuse signals; they do not stop the
    /// remaining inserts or the trace record.
    pub async fn collect(
        &self,
        peer: Option<SocketAddr>,
        client: IpAddr,
        name: &str,
        resolved: &[IpAddr],
        cnames: &[String],
    ) -> Result<(), CacheError> {
        if !self.started.load(Ordering::Acquire) {
            return Err(CacheError::Unavailable);
        }
        let now = Utc::now();
        let mut last_err = None;
        if let Err(err) = self.cache.set(now, client, name, resolved) {
            tracing::warn!(
                target: "rc_core::service",
                %client, name, ?resolved, error = %err,
                "collect insert failed"
            );
            last_err = Some(err);
        }
        for cname in cnames {
            if let Err(err) = self.cache.set(now, client, cname, resolved) {
                tracing::warn!(
                    target: "rc_core::service",
                    %client, name = %cname, ?resolved, error = %err,
                    "collect insert failed"
                );
                last_err = Some(err);
            }
        }
        if let Some(trace) = &self.trace {
            if let Err(err) = trace
                .log_collect(peer, now, client, name, resolved, cnames)
                .await
            {
                tracing::warn!(
                    target: "rc_core::service",
                    %client, name, error = %err,
                    "trace collect failed"
                );
            }
        }
        match last_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Did `client` resolve `resolved` recently? `name` refines the match
    /// when non-empty. The trace record never affects the reply.
    pub async fn check(
        &self,
        peer: Option<SocketAddr>,
        client: IpAddr,
        resolved: IpAddr,
        name: &str,
    ) -> Result<CacheResponse, CacheError> {
        if !self.started.load(Ordering::Acquire) {
            return Err(CacheError::Unavailable);
        }
        let now = Utc::now();
        let last = self.cache.get(client, resolved, name);
        let response = CacheResponse {
            result: last.is_some(),
            last,
            store: self.cache.store(),
        };
        if let Some(trace) = &self.trace {
            if let Err(err) = trace
                .log_check(peer, now, client, resolved, name, &response)
                .await
            {
                tracing::warn!(
                    target: "rc_core::service",
                    %client, %resolved, name, error = %err,
                    "trace check failed"
                );
            }
        }
        Ok(response)
    }

    /// Flush horizon and expiration window, for observability endpoints.
    pub fn uptime(&self) -> Result<(DateTime<Utc>, Duration), CacheError> {
        if !self.started.load(Ordering::Acquire) {
            return Err(CacheError::Unavailable);
        }
        Ok((self.cache.flushed(), self.cache.expires()))
    }

    pub fn cache(&self) -> &Arc<Cache> {
        &self.cache
    }
}

async fn run_clean(cache: Arc<Cache>, every: Duration, mut stop: watch::Receiver<bool>) {
    let mut tick = tokio::time::interval(every);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // the interval yields once immediately; the first sweep waits a full period
    tick.tick().await;
    loop {
        tokio::select! {
            _ = tick.tick() => {
                tracing::debug!(target: "rc_core::service", "cleaning cache");
                cache.clean();
            }
            _ = stop.changed() => return,
        }
    }
}

async fn run_dump(
    cache: Arc<Cache>,
    every: Duration,
    path: PathBuf,
    mut stop: watch::Receiver<bool>,
) {
    let mut tick = tokio::time::interval(every);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    tick.tick().await;
    loop {
        tokio::select! {
            _ = tick.tick() => {
                tracing::debug!(target: "rc_core::service", path = %path.display(), "dumping cache");
                if let Err(err) = dump_to_file(cache.clone(), path.clone()).await {
                    tracing::warn!(
                        target: "rc_core::service",
                        path = %path.display(), error = %err,
                        "cache dump failed"
                    );
                }
            }
            _ = stop.changed() => return,
        }
    }
}

/// Rewrite the dump file from scratch. The dump holds cache-wide locks, so
/// it runs on the blocking pool.
async fn dump_to_file(cache: Arc<Cache>, path: PathBuf) -> io::Result<()> {
    tokio::task::spawn_blocking(move || {
        let file = std::fs::File::create(&path)?;
        let mut out = io::BufWriter::new(file);
        cache.dump(&mut out)?;
        let file = out.into_inner().map_err(io::IntoInnerError::into_error)?;
        file.sync_all()
    })
    .await
    .map_err(|_| io::Error::new(io::ErrorKind::Other, "dump task aborted"))?
}
