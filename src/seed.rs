//! Seed generation: one query per input line becomes one depth-0 work item.
//!
//! Lines are trimmed; blank or non-UTF-8 lines are skipped. A line may carry
//! a caller-supplied id after the `#!#` separator. Once the input is
//! exhausted the monitor is primed with the number of seeds, exactly once.

use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::STDIN;
use crate::engine::QuiescenceMonitor;
use crate::error::{Error, Result};
use crate::ledger::Ledger;
use crate::model::{Fingerprint, Params, WorkItem};
use crate::telemetry::metrics;

/// Separates a query from its caller-supplied id: `coffee in berlin #!# c-17`.
pub const ID_SEPARATOR: &str = "#!#";

/// Boxed line reader for any seed source.
pub type SeedReader = Box<dyn AsyncBufRead + Unpin + Send>;

/// Open the seed source. `stdin` reads standard input; anything else is a
/// file path.
pub async fn open_input(source: &str) -> Result<SeedReader> {
    if source == STDIN {
        return Ok(Box::new(BufReader::new(tokio::io::stdin())));
    }

    let file = tokio::fs::File::open(source).await.map_err(Error::Input)?;
    Ok(Box::new(BufReader::new(file)))
}

/// One parsed input record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedLine {
    pub query: String,
    pub input_id: Option<String>,
}

impl SeedLine {
    /// Parse one raw line. Returns `None` for lines with no query text.
    pub fn parse(raw: &str) -> Option<Self> {
        let line = raw.trim();
        if line.is_empty() {
            return None;
        }

        let (query, input_id) = match line.split_once(ID_SEPARATOR) {
            Some((query, id)) => {
                let id = id.trim();
                (query.trim(), (!id.is_empty()).then(|| id.to_string()))
            }
            None => (line, None),
        };

        if query.is_empty() {
            return None;
        }

        Some(Self {
            query: query.to_string(),
            input_id,
        })
    }
}

/// Turns raw query input into seed work items.
#[derive(Debug)]
pub struct SeedGenerator {
    params: Params,
    query_ledger: Option<Arc<Ledger>>,
}

impl SeedGenerator {
    pub fn new(params: Params) -> Self {
        Self {
            params,
            query_ledger: None,
        }
    }

    /// Collapse queries that match once case and runs of whitespace are
    /// folded into one seed, using `ledger` to remember which queries were
    /// already seeded. The first spelling seen is kept.
    pub fn with_query_dedup(mut self, ledger: Arc<Ledger>) -> Self {
        self.query_ledger = Some(ledger);
        self
    }

    /// Read every record from `reader` and build the seed set.
    ///
    /// Does not touch the monitor. Use [`SeedGenerator::generate`] for a run.
    pub async fn read_seeds<R>(
        &self,
        mut reader: R,
        cancel: &CancellationToken,
    ) -> Result<Vec<WorkItem>>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut seeds = Vec::new();
        let mut buf = Vec::new();
        let mut line_no = 0usize;

        loop {
            buf.clear();
            let n = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    warn!(seeds = seeds.len(), "seed generation interrupted");
                    break;
                }
                read = reader.read_until(b'\n', &mut buf) => read.map_err(Error::Input)?,
            };
            if n == 0 {
                break;
            }
            line_no += 1;

            let Ok(raw) = std::str::from_utf8(&buf) else {
                warn!(line = line_no, "skipping seed line that is not valid UTF-8");
                continue;
            };
            let Some(line) = SeedLine::parse(raw) else {
                continue;
            };

            if let Some(ref ledger) = self.query_ledger
                && !ledger.check_and_mark(&Fingerprint::query(&line.query))
            {
                debug!(line = line_no, query = %line.query, "duplicate seed query collapsed");
                continue;
            }

            seeds.push(WorkItem::seed(line.query, self.params.clone(), line.input_id));
        }

        Ok(seeds)
    }

    /// Build the seed set and prime `monitor` with its size.
    ///
    /// An unreadable source fails before the monitor is primed. If `cancel`
    /// fires while reading, the monitor is left unprimed: the partial seed
    /// set is not a clean (possibly empty) run, and the monitor's own
    /// cancellation path closes it as interrupted.
    pub async fn generate<R>(
        &self,
        reader: R,
        monitor: &QuiescenceMonitor,
        cancel: &CancellationToken,
    ) -> Result<Vec<WorkItem>>
    where
        R: AsyncBufRead + Unpin,
    {
        let seeds = self.read_seeds(reader, cancel).await?;
        if cancel.is_cancelled() {
            return Ok(seeds);
        }

        for (i, seed) in seeds.iter().take(3).enumerate() {
            debug!(n = i + 1, id = %seed.id, target = %seed.target, "seed");
        }
        info!(seeds = seeds.len(), "seed generation complete");
        metrics::items_seeded().add(seeds.len() as u64, &[]);

        monitor.prime_seed_count(seeds.len())?;
        Ok(seeds)
    }
}
