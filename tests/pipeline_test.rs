//! Pipeline driver tests, wired to a monitor by hand.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{MemoryWriter, ScriptedExecutor, Step};
use crawlq::engine::{Pipeline, PipelineConfig, QuiescenceMonitor};
use crawlq::error::{Error, Result};
use crawlq::ledger::Ledger;
use crawlq::model::{ExitReason, Fingerprint, Params, ResultRecord, RunState, WorkItem};
use crawlq::writer::ResultWriter;
use tokio_util::sync::CancellationToken;

const WINDOW: Duration = Duration::from_secs(30);

struct RejectingWriter;

impl ResultWriter for RejectingWriter {
    async fn write(&self, _record: &ResultRecord) -> Result<()> {
        Err(Error::Other("disk full".to_string()))
    }
}

fn config(max_depth: u32) -> PipelineConfig {
    PipelineConfig {
        concurrency: 2,
        max_depth,
        drain_timeout: WINDOW,
    }
}

fn seeds(targets: &[&str]) -> Vec<WorkItem> {
    targets
        .iter()
        .map(|t| WorkItem::seed(*t, Params::default(), None))
        .collect()
}

/// Prime a monitor for `seeds` and wire its hook to a fresh token.
fn wired_monitor(seeds: &[WorkItem]) -> (Arc<QuiescenceMonitor>, CancellationToken) {
    let monitor = Arc::new(QuiescenceMonitor::new(WINDOW));
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    monitor.register_cancel_hook(move || token.cancel());
    monitor.prime_seed_count(seeds.len()).unwrap();
    (monitor, cancel)
}

#[tokio::test]
async fn pipeline_runs_until_the_monitor_cancels() {
    let executor = Arc::new(ScriptedExecutor::new(|item: &WorkItem| {
        if item.depth == 0 {
            Step::children(&["a", "b", "c"])
        } else {
            Step::entities(&[item.target.as_str()])
        }
    }));
    let writer = Arc::new(MemoryWriter::default());
    let seeds = seeds(&["root"]);
    let (monitor, cancel) = wired_monitor(&seeds);

    let watcher = {
        let monitor = Arc::clone(&monitor);
        tokio::spawn(async move { monitor.run(CancellationToken::new()).await })
    };
    let pipeline = Pipeline::new(
        executor.clone(),
        writer.clone(),
        Arc::new(Ledger::new()),
        Arc::clone(&monitor),
        config(1),
    );
    let stats = pipeline.run(seeds, cancel).await.unwrap();

    assert_eq!(watcher.await.unwrap(), ExitReason::Quiescent);
    assert_eq!(monitor.state(), RunState::Closed);
    assert_eq!(stats.executed, 4);
    assert_eq!(stats.spawned, 3);
    assert_eq!(stats.completed, 4);
    assert_eq!(stats.written, 3);
    assert_eq!(pipeline.stats(), stats);

    let snap = monitor.snapshot();
    assert_eq!(snap.spawned, stats.spawned);
    assert_eq!(snap.completed, stats.completed);
}

#[tokio::test]
async fn children_are_counted_before_their_parent_finishes() {
    // Each child checks that it was counted while its parent was live.
    let monitor_slot: Arc<std::sync::OnceLock<Arc<QuiescenceMonitor>>> =
        Arc::new(std::sync::OnceLock::new());
    let slot = Arc::clone(&monitor_slot);
    let executor = Arc::new(ScriptedExecutor::new(move |item: &WorkItem| {
        let monitor = slot.get().unwrap();
        assert!(monitor.outstanding() >= 1);
        assert_ne!(monitor.state(), RunState::Closed);
        if item.depth < 3 {
            Step::children(&["left", "right"])
        } else {
            Step::nothing()
        }
    }));
    let seeds = seeds(&["root"]);
    let (monitor, cancel) = wired_monitor(&seeds);
    monitor_slot.set(Arc::clone(&monitor)).unwrap();

    let watcher = {
        let monitor = Arc::clone(&monitor);
        tokio::spawn(async move { monitor.run(CancellationToken::new()).await })
    };
    let pipeline = Pipeline::new(
        executor.clone(),
        Arc::new(MemoryWriter::default()),
        Arc::new(Ledger::new()),
        Arc::clone(&monitor),
        config(3),
    );
    let stats = pipeline.run(seeds, cancel).await.unwrap();

    assert_eq!(watcher.await.unwrap(), ExitReason::Quiescent);
    assert_eq!(executor.calls(), 15);
    assert_eq!(stats.spawned, 14);
    assert_eq!(monitor.outstanding(), 0);
}

#[tokio::test]
async fn write_failure_fails_the_item() {
    let executor = Arc::new(ScriptedExecutor::new(|_: &WorkItem| {
        Step::entities(&["place-1"])
    }));
    let seeds = seeds(&["q"]);
    let (monitor, cancel) = wired_monitor(&seeds);
    let ledger = Arc::new(Ledger::new());

    let watcher = {
        let monitor = Arc::clone(&monitor);
        tokio::spawn(async move { monitor.run(CancellationToken::new()).await })
    };
    let pipeline = Pipeline::new(
        executor,
        Arc::new(RejectingWriter),
        Arc::clone(&ledger),
        Arc::clone(&monitor),
        config(0),
    );
    let stats = pipeline.run(seeds, cancel).await.unwrap();

    assert_eq!(watcher.await.unwrap(), ExitReason::Quiescent);
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.written, 0);
    assert_eq!(monitor.snapshot().failed, 1);
    // The entity was marked before the write and stays marked.
    assert!(ledger.contains(&Fingerprint::entity("place-1")));
}

#[tokio::test]
async fn already_cancelled_pipeline_starts_nothing() {
    let executor = Arc::new(ScriptedExecutor::new(|_: &WorkItem| Step::nothing()));
    let cancel = CancellationToken::new();
    cancel.cancel();

    let pipeline = Pipeline::new(
        executor.clone(),
        Arc::new(MemoryWriter::default()),
        Arc::new(Ledger::new()),
        Arc::new(QuiescenceMonitor::new(WINDOW)),
        config(0),
    );
    let stats = pipeline.run(seeds(&["a", "b"]), cancel).await.unwrap();

    assert_eq!(stats.executed, 0);
    assert_eq!(executor.calls(), 0);
}
