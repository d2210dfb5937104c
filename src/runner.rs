//! One crawl run, end to end.
//!
//! Creates the run-scoped ledger and monitor, seeds the run, executes it
//! through the pipeline and waits for the monitor to close it. Nothing is
//! shared between two runners, so independent runs can coexist in one
//! process.

use std::sync::Arc;
use std::time::{Duration, Instant};

use opentelemetry::KeyValue;
use tokio::io::AsyncBufRead;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::RunConfig;
use crate::engine::{Executor, Pipeline, PipelineConfig, QuiescenceMonitor};
use crate::error::{Error, Result};
use crate::ledger::Ledger;
use crate::model::{ExitReason, Params};
use crate::seed::SeedGenerator;
use crate::telemetry::metrics;
use crate::writer::ResultWriter;

/// The settings a runner needs, extracted from a validated [`RunConfig`].
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub params: Params,
    pub max_depth: u32,
    pub concurrency: usize,
    pub inactivity: Duration,
    pub dedup_queries: bool,
}

impl RunSettings {
    pub fn from_config(config: &RunConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            params: config.params()?,
            max_depth: config.max_depth,
            concurrency: config.concurrency,
            inactivity: config.exit_on_inactivity,
            dedup_queries: config.dedup_queries,
        })
    }
}

/// Summary of a finished run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub seeds: usize,
    pub spawned: u64,
    pub completed: u64,
    pub failed: u64,
    pub depth_dropped: u64,
    pub written: u64,
    pub duplicates: u64,
    /// Items still counted as outstanding when the run closed.
    pub outstanding: u64,
    pub exit: ExitReason,
    pub duration: Duration,
}

pub struct Runner<E, W> {
    executor: Arc<E>,
    writer: Arc<W>,
    settings: RunSettings,
}

impl<E, W> Runner<E, W>
where
    E: Executor,
    W: ResultWriter,
{
    pub fn new(settings: RunSettings, executor: Arc<E>, writer: Arc<W>) -> Self {
        Self {
            executor,
            writer,
            settings,
        }
    }

    /// Run to completion.
    ///
    /// `shutdown` is the outer context (signals, callers). Returns an error
    /// only for fatal conditions such as unreadable input; stalls and
    /// interrupts are reported through [`RunReport::exit`].
    pub async fn run<R>(&self, input: R, shutdown: CancellationToken) -> Result<RunReport>
    where
        R: AsyncBufRead + Unpin,
    {
        let started = Instant::now();
        let s = &self.settings;
        info!(
            concurrency = s.concurrency,
            max_depth = s.max_depth,
            lang = %s.params.lang,
            fast_mode = s.params.fast_mode,
            inactivity_ms = s.inactivity.as_millis() as u64,
            "starting run"
        );

        let ledger = Arc::new(Ledger::new());
        let monitor = Arc::new(QuiescenceMonitor::new(s.inactivity));

        // Cancelled by the monitor when the run is over; the pipeline and
        // every executor observe it.
        let run_token = shutdown.child_token();
        let hook_token = run_token.clone();
        monitor.register_cancel_hook(move || hook_token.cancel());

        // Cancelled by us if the pipeline itself breaks.
        let interrupt = shutdown.child_token();

        let mut seeder = SeedGenerator::new(s.params.clone());
        if s.dedup_queries {
            seeder = seeder.with_query_dedup(Arc::clone(&ledger));
        }

        let seeds = match seeder.generate(input, &monitor, &shutdown).await {
            Ok(seeds) => seeds,
            Err(e) => {
                error!(error = %e, "seed generation failed");
                return Err(e);
            }
        };
        let seed_count = seeds.len();

        let watcher = {
            let monitor = Arc::clone(&monitor);
            let interrupt = interrupt.clone();
            tokio::spawn(async move { monitor.run(interrupt).await })
        };

        let pipeline = Pipeline::new(
            Arc::clone(&self.executor),
            Arc::clone(&self.writer),
            Arc::clone(&ledger),
            Arc::clone(&monitor),
            PipelineConfig {
                concurrency: s.concurrency,
                max_depth: s.max_depth,
                drain_timeout: s.inactivity,
            },
        );

        let stats = match pipeline.run(seeds, run_token).await {
            Ok(stats) => stats,
            Err(e) => {
                error!(error = %e, "pipeline failed");
                interrupt.cancel();
                let _ = watcher.await;
                return Err(e);
            }
        };

        let exit = watcher
            .await
            .map_err(|e| Error::Other(format!("monitor task failed: {e}")))?;

        self.writer.flush().await?;

        let snapshot = monitor.snapshot();
        let duration = started.elapsed();
        let report = RunReport {
            seeds: seed_count,
            spawned: stats.spawned,
            completed: stats.completed,
            failed: stats.failed,
            depth_dropped: stats.depth_dropped,
            written: stats.written,
            duplicates: stats.duplicates,
            outstanding: snapshot.outstanding,
            exit,
            duration,
        };

        let reason = [KeyValue::new("reason", exit.as_str())];
        metrics::run_exits().add(1, &reason);
        metrics::run_duration_ms().record(duration.as_secs_f64() * 1000.0, &reason);

        info!(
            job_count = report.seeds,
            spawned = report.spawned,
            completed = report.completed,
            failed = report.failed,
            written = report.written,
            duplicates = report.duplicates,
            outstanding = report.outstanding,
            exit = %report.exit,
            duration_ms = duration.as_millis() as u64,
            "run finished"
        );

        Ok(report)
    }
}
