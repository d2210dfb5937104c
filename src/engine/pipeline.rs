//! Pipeline driver: executes work items with bounded concurrency.
//!
//! For every item the driver calls the [`Executor`], queues the children it
//! asked for (one level deeper, dropped past `max_depth`), gates every
//! discovered entity through the ledger before writing it, and reports to
//! the monitor. All `spawned` events of an item are issued before that
//! item's own `completed`/`failed`, so the outstanding count can never hit
//! zero while a child is still being created.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use opentelemetry::KeyValue;
use serde::{Deserialize, Serialize};
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, warn};

use crate::error::{Error, Result};
use crate::ledger::Ledger;
use crate::model::{ChildSpec, Entity, LifecycleEvent, ResultRecord, WorkItem};
use crate::telemetry::metrics;
use crate::telemetry::work::{record_item_outcome, start_item_span};
use crate::writer::ResultWriter;

use super::monitor::QuiescenceMonitor;

/// What executing one work item produced.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Harvest {
    #[serde(default)]
    pub entities: Vec<Entity>,
    #[serde(default)]
    pub children: Vec<ChildSpec>,
}

/// The fetch-and-parse engine. One call per work item.
///
/// An `Err` marks the item failed; it is never retried here.
pub trait Executor: Send + Sync + 'static {
    fn execute(
        &self,
        item: &WorkItem,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<Harvest>> + Send;
}

/// Configuration for the pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Maximum items executing at once.
    pub concurrency: usize,
    /// Deepest level a spawned item may sit at.
    pub max_depth: u32,
    /// How long in-flight items get to finish after cancellation before
    /// they are aborted.
    pub drain_timeout: Duration,
}

/// Counters for one pipeline run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub executed: u64,
    pub completed: u64,
    pub failed: u64,
    pub spawned: u64,
    pub depth_dropped: u64,
    pub written: u64,
    pub duplicates: u64,
}

#[derive(Debug, Default)]
struct Stats {
    executed: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    spawned: AtomicU64,
    depth_dropped: AtomicU64,
    written: AtomicU64,
    duplicates: AtomicU64,
}

impl Stats {
    fn snapshot(&self) -> PipelineStats {
        PipelineStats {
            executed: self.executed.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            spawned: self.spawned.load(Ordering::Relaxed),
            depth_dropped: self.depth_dropped.load(Ordering::Relaxed),
            written: self.written.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
        }
    }
}

/// Drives work items from seeds to quiescence.
pub struct Pipeline<E, W> {
    executor: Arc<E>,
    writer: Arc<W>,
    ledger: Arc<Ledger>,
    monitor: Arc<QuiescenceMonitor>,
    config: PipelineConfig,
    stats: Arc<Stats>,
}

impl<E, W> Clone for Pipeline<E, W> {
    fn clone(&self) -> Self {
        Self {
            executor: Arc::clone(&self.executor),
            writer: Arc::clone(&self.writer),
            ledger: Arc::clone(&self.ledger),
            monitor: Arc::clone(&self.monitor),
            config: self.config.clone(),
            stats: Arc::clone(&self.stats),
        }
    }
}

impl<E, W> Pipeline<E, W>
where
    E: Executor,
    W: ResultWriter,
{
    pub fn new(
        executor: Arc<E>,
        writer: Arc<W>,
        ledger: Arc<Ledger>,
        monitor: Arc<QuiescenceMonitor>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            executor,
            writer,
            ledger,
            monitor,
            config,
            stats: Arc::new(Stats::default()),
        }
    }

    /// Execute `seeds` and everything they spawn until `cancel` fires.
    ///
    /// The pipeline never decides on its own that the run is over; the
    /// monitor does, through `cancel`. After cancellation no new item is
    /// started and in-flight items get `drain_timeout` to reach their
    /// natural end.
    pub async fn run(
        &self,
        seeds: Vec<WorkItem>,
        cancel: CancellationToken,
    ) -> Result<PipelineStats> {
        let (queue, mut pending) = mpsc::unbounded_channel::<WorkItem>();
        for seed in seeds {
            queue
                .send(seed)
                .map_err(|_| Error::Other("work queue closed".to_string()))?;
        }

        let permits = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let mut in_flight = JoinSet::new();

        info!(
            concurrency = self.config.concurrency,
            max_depth = self.config.max_depth,
            "pipeline started"
        );

        loop {
            let item = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    log_join(joined);
                    continue;
                }
                Some(item) = pending.recv() => item,
            };

            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                permit = Arc::clone(&permits).acquire_owned() => permit
                    .map_err(|e| Error::Other(format!("worker pool closed: {e}")))?,
            };

            let worker = self.clone();
            let queue = queue.clone();
            let cancel = cancel.clone();
            in_flight.spawn(async move {
                let _permit = permit;
                worker.process(item, queue, cancel).await;
            });
        }

        let abandoned = pending.len();
        info!(
            in_flight = in_flight.len(),
            abandoned, "pipeline stopping, waiting for in-flight items"
        );
        let drained = tokio::time::timeout(self.config.drain_timeout, async {
            while let Some(joined) = in_flight.join_next().await {
                log_join(joined);
            }
        })
        .await;
        if drained.is_err() {
            warn!(
                remaining = in_flight.len(),
                "in-flight items did not finish in time, aborting"
            );
            in_flight.shutdown().await;
        }

        Ok(self.stats.snapshot())
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats.snapshot()
    }

    /// Execute one item and report its lifecycle.
    async fn process(
        &self,
        item: WorkItem,
        queue: mpsc::UnboundedSender<WorkItem>,
        cancel: CancellationToken,
    ) {
        let span = start_item_span(&item);

        async {
            self.stats.executed.fetch_add(1, Ordering::Relaxed);
            let start = Instant::now();
            let result = self.executor.execute(&item, &cancel).await;
            metrics::item_duration_ms().record(start.elapsed().as_secs_f64() * 1000.0, &[]);

            let result = match result {
                Ok(harvest) => self.absorb(&item, harvest, &queue, &cancel).await,
                Err(e) => Err(e),
            };

            let event = match result {
                Ok(()) => {
                    self.stats.completed.fetch_add(1, Ordering::Relaxed);
                    record_item_outcome(&span, "completed");
                    LifecycleEvent::Completed { id: item.id }
                }
                Err(e) => {
                    self.stats.failed.fetch_add(1, Ordering::Relaxed);
                    record_item_outcome(&span, "failed");
                    warn!(id = %item.id, error = %e, "work item failed");
                    LifecycleEvent::Failed { id: item.id }
                }
            };
            metrics::items_terminal()
                .add(1, &[KeyValue::new("outcome", event.kind().to_string())]);
            self.report(event);
        }
        .instrument(span.clone())
        .await
    }

    /// Spawn the requested children, then write new entities.
    async fn absorb(
        &self,
        item: &WorkItem,
        harvest: Harvest,
        queue: &mpsc::UnboundedSender<WorkItem>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        for spec in harvest.children {
            if cancel.is_cancelled() {
                debug!(id = %item.id, target = %spec.target, "run cancelled, not spawning child");
                continue;
            }
            let Some(child) = item.spawn_child(spec, self.config.max_depth) else {
                self.stats.depth_dropped.fetch_add(1, Ordering::Relaxed);
                metrics::items_depth_dropped().add(1, &[]);
                continue;
            };

            // Count the child before it can be picked up and finish.
            self.report(LifecycleEvent::Spawned {
                id: child.id,
                parent_id: item.id,
            });
            self.stats.spawned.fetch_add(1, Ordering::Relaxed);
            metrics::items_spawned().add(1, &[KeyValue::new("depth", child.depth as i64)]);
            debug!(parent = %item.id, child = %child.id, depth = child.depth, "child spawned");

            if queue.send(child).is_err() {
                warn!(parent = %item.id, "work queue closed, child dropped");
            }
        }

        for entity in harvest.entities {
            let fingerprint = entity.fingerprint();
            if !self.ledger.check_and_mark(&fingerprint) {
                self.stats.duplicates.fetch_add(1, Ordering::Relaxed);
                metrics::entities_checked().add(1, &[KeyValue::new("result", "duplicate")]);
                debug!(id = %item.id, %fingerprint, "duplicate entity suppressed");
                continue;
            }

            // The mark is not rolled back: a later sighting stays suppressed.
            if let Err(e) = self.writer.write(&ResultRecord::new(item, entity)).await {
                warn!(
                    id = %item.id,
                    %fingerprint,
                    error = %e,
                    "result write failed, entity stays marked and is lost for this run"
                );
                return Err(e);
            }
            self.stats.written.fetch_add(1, Ordering::Relaxed);
            metrics::entities_checked().add(1, &[KeyValue::new("result", "written")]);
        }

        Ok(())
    }

    fn report(&self, event: LifecycleEvent) {
        if let Err(e) = self.monitor.notify(event) {
            error!(id = %event.id(), error = %e, "monitor rejected lifecycle event");
        }
    }
}

fn log_join(joined: std::result::Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        // A panicked item never reports a terminal event; the monitor's
        // inactivity window ends the run instead.
        error!(error = %e, "work item task aborted");
    }
}
