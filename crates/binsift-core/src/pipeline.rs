//! Event pipeline: one producer, N workers, N bounded queues
//!
//! The producer reads the source in order, filters, and pushes each event
//! into the queue picked by its partition key; a full queue blocks the
//! producer (backpressure, nothing is ever dropped). Each worker consumes
//! its own queue only, so events sharing a partition key retain their
//! source order all the way to the handlers.
//!
//! Workers resolve placeholder column names through the shared metadata
//! cache and materialize forward SQL before fanning out to handlers.
//! Handler errors are logged and counted, never fatal.
//!
//! Cancellation: the producer stops at its next suspension point and
//! closes the queues; workers drain what is already queued, then exit
//! (drain policy, applied uniformly). `finalize` runs exactly once after
//! every worker has joined.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::cache::MetaCache;
use crate::checkpoint::Position;
use crate::error::Result;
use crate::event::{Action, RowChange};
use crate::filter::RouteFilter;
use crate::handler::Handler;
use crate::monitor::{Monitor, MonitorStats};
use crate::source::Source;
use crate::sql::SqlGenerator;

/// Default per-worker queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 10_000;

/// Cooperative cancellation signal shared by producer and callers.
#[derive(Debug, Default)]
pub struct Shutdown {
    cancelled: AtomicBool,
    notify: Notify,
}

impl Shutdown {
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once cancellation is requested.
    pub async fn wait(&self) {
        while !self.is_cancelled() {
            let notified = self.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// The last event the producer dispatched, for explicit checkpointing.
#[derive(Debug, Clone)]
pub struct LastEvent {
    pub log_file: String,
    pub log_pos: u32,
    pub timestamp: DateTime<Utc>,
    pub action: Action,
    pub database: String,
    pub table: String,
}

impl LastEvent {
    fn from_event(ev: &RowChange) -> Self {
        Self {
            log_file: ev.log_file.clone(),
            log_pos: ev.log_pos,
            timestamp: ev.timestamp,
            action: ev.action,
            database: ev.database.clone(),
            table: ev.table.clone(),
        }
    }

    pub fn to_position(&self) -> Position {
        Position {
            log_file: self.log_file.clone(),
            position: self.log_pos,
            saved_at: Utc::now(),
            action: self.action.to_string(),
            database: self.database.clone(),
            table: self.table.clone(),
        }
    }
}

/// Final run accounting.
#[derive(Debug, Clone)]
pub struct PipelineSummary {
    /// Events the producer observed.
    pub produced: u64,
    /// Events rejected by the route filter.
    pub filtered: u64,
    /// Events pushed to worker queues.
    pub dispatched: u64,
    /// Events that reached handlers.
    pub processed: u64,
    pub last_event: Option<LastEvent>,
    pub monitor: MonitorStats,
}

/// Bounded producer / sharded-consumer scheduler.
pub struct Pipeline {
    source: Box<dyn Source>,
    filter: RouteFilter,
    workers: usize,
    queue_capacity: usize,
    handlers: Vec<Arc<dyn Handler>>,
    cache: Option<Arc<MetaCache>>,
    monitor: Arc<Monitor>,
    shutdown: Arc<Shutdown>,
}

impl Pipeline {
    pub fn new(source: Box<dyn Source>, filter: RouteFilter, workers: usize) -> Self {
        Self {
            source,
            filter,
            workers: workers.max(1),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            handlers: Vec::new(),
            cache: None,
            monitor: Arc::new(Monitor::default()),
            shutdown: Arc::new(Shutdown::default()),
        }
    }

    /// Handlers are append-only before start.
    pub fn add_handler(mut self, handler: Arc<dyn Handler>) -> Self {
        self.handlers.push(handler);
        self
    }

    pub fn with_cache(mut self, cache: Arc<MetaCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_monitor(mut self, monitor: Arc<Monitor>) -> Self {
        self.monitor = monitor;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    /// Handle for cancelling the run from another task.
    pub fn shutdown_handle(&self) -> Arc<Shutdown> {
        self.shutdown.clone()
    }

    /// Run to completion (end of stream, source error, or cancellation).
    pub async fn run(mut self) -> Result<PipelineSummary> {
        self.source.open().await?;

        let sweeper = self.cache.clone().map(|c| c.spawn_sweeper());

        let mut senders = Vec::with_capacity(self.workers);
        let mut worker_handles = Vec::with_capacity(self.workers);
        for worker_id in 0..self.workers {
            let (tx, rx) = mpsc::channel::<RowChange>(self.queue_capacity);
            senders.push(tx);
            worker_handles.push(tokio::spawn(worker_loop(
                worker_id,
                rx,
                self.handlers.clone(),
                self.cache.clone(),
                SqlGenerator::new().with_monitor(self.monitor.clone()),
                self.monitor.clone(),
            )));
        }

        info!(workers = self.workers, capacity = self.queue_capacity, "pipeline started");

        let mut produced = 0u64;
        let mut filtered = 0u64;
        let mut dispatched = 0u64;
        let mut last_event: Option<LastEvent> = None;

        loop {
            if self.shutdown.is_cancelled() {
                debug!("producer cancelled");
                break;
            }

            let next = tokio::select! {
                biased;
                _ = self.shutdown.wait() => break,
                next = self.source.next() => next,
            };

            match next {
                Ok(Some(event)) => {
                    produced += 1;
                    self.monitor.record_size(&event);

                    if !self.filter.accept(&event) {
                        filtered += 1;
                        continue;
                    }

                    last_event = Some(LastEvent::from_event(&event));
                    let index = self.filter.partition(&event, self.workers);

                    // A full queue blocks here; only cancellation abandons
                    // the push.
                    let sent = tokio::select! {
                        biased;
                        _ = self.shutdown.wait() => false,
                        res = senders[index].send(event) => res.is_ok(),
                    };
                    if !sent {
                        break;
                    }
                    dispatched += 1;
                }
                Ok(None) => {
                    if !self.source.has_more() {
                        debug!("end of stream");
                        break;
                    }
                    // Spurious empty read; back off briefly.
                    tokio::select! {
                        biased;
                        _ = self.shutdown.wait() => break,
                        _ = tokio::time::sleep(std::time::Duration::from_millis(100)) => {}
                    }
                }
                Err(e) => {
                    warn!(error = %e, "source error, stopping producer");
                    break;
                }
            }
        }

        // Close all queues; workers drain and exit.
        drop(senders);

        let mut processed = 0u64;
        for handle in worker_handles {
            match handle.await {
                Ok(count) => processed += count,
                Err(e) => warn!(error = %e, "worker task failed"),
            }
        }

        // Exactly once, after all workers have joined.
        for handler in &self.handlers {
            if let Err(e) = handler.finalize().await {
                warn!(handler = handler.name(), error = %e, "finalize failed");
                self.monitor.record_handler_error();
            }
        }

        if let Some(sweeper) = sweeper {
            sweeper.abort();
        }
        if let Err(e) = self.source.close().await {
            warn!(error = %e, "source close failed");
        }

        self.monitor.report();
        info!(produced, filtered, dispatched, processed, "pipeline finished");

        Ok(PipelineSummary {
            produced,
            filtered,
            dispatched,
            processed,
            last_event,
            monitor: self.monitor.stats(),
        })
    }
}

/// Per-worker consumer loop. Column renaming and SQL materialization are
/// CPU work done here, outside any shared critical section.
async fn worker_loop(
    worker_id: usize,
    mut rx: mpsc::Receiver<RowChange>,
    handlers: Vec<Arc<dyn Handler>>,
    cache: Option<Arc<MetaCache>>,
    generator: SqlGenerator,
    monitor: Arc<Monitor>,
) -> u64 {
    let mut processed = 0u64;

    while let Some(mut event) = rx.recv().await {
        if let Some(cache) = &cache {
            cache.rename_columns(&mut event).await;
        }

        if event.is_dml() && event.sql.is_none() {
            event.sql = generator.generate(&event);
        }

        for handler in &handlers {
            if let Err(e) = handler.accept(&event).await {
                warn!(worker_id, handler = handler.name(), error = %e, "handler error");
                monitor.record_handler_error();
            }
        }
        processed += 1;
    }

    debug!(worker_id, processed, "worker drained");
    processed
}
