//! Test doubles shared by the integration tests.

#![allow(dead_code)]

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crawlq::engine::{Executor, Harvest};
use crawlq::error::{Error, Result};
use crawlq::model::{ChildSpec, Entity, Params, ResultRecord, WorkItem};
use crawlq::runner::RunSettings;
use crawlq::writer::ResultWriter;
use tokio_util::sync::CancellationToken;

/// What a scripted executor does for one item.
pub enum Step {
    Harvest(Harvest),
    Fail(String),
    /// Never returns.
    Hang,
}

impl Step {
    pub fn nothing() -> Self {
        Step::Harvest(Harvest::default())
    }

    pub fn entities(keys: &[&str]) -> Self {
        Step::Harvest(Harvest {
            entities: keys.iter().map(|k| entity(k)).collect(),
            children: Vec::new(),
        })
    }

    pub fn children(targets: &[&str]) -> Self {
        Step::Harvest(Harvest {
            entities: Vec::new(),
            children: targets.iter().map(|t| ChildSpec::new(*t)).collect(),
        })
    }
}

pub fn entity(key: &str) -> Entity {
    Entity {
        key: key.to_string(),
        data: serde_json::json!({ "name": key }),
    }
}

/// Executor driven by a closure over the work item.
pub struct ScriptedExecutor<F> {
    script: F,
    calls: AtomicUsize,
}

impl<F> ScriptedExecutor<F>
where
    F: Fn(&WorkItem) -> Step + Send + Sync + 'static,
{
    pub fn new(script: F) -> Self {
        Self {
            script,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl<F> Executor for ScriptedExecutor<F>
where
    F: Fn(&WorkItem) -> Step + Send + Sync + 'static,
{
    async fn execute(&self, item: &WorkItem, _cancel: &CancellationToken) -> Result<Harvest> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let step = (self.script)(item);
        // Let other items interleave.
        tokio::task::yield_now().await;
        match step {
            Step::Harvest(harvest) => Ok(harvest),
            Step::Fail(msg) => Err(Error::Item(msg)),
            Step::Hang => std::future::pending().await,
        }
    }
}

/// Collects written records in memory.
#[derive(Default)]
pub struct MemoryWriter {
    records: Mutex<Vec<ResultRecord>>,
}

impl MemoryWriter {
    pub fn records(&self) -> Vec<ResultRecord> {
        self.records.lock().unwrap().clone()
    }
}

impl ResultWriter for MemoryWriter {
    async fn write(&self, record: &ResultRecord) -> Result<()> {
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }
}

pub fn settings(max_depth: u32, inactivity: Duration) -> RunSettings {
    RunSettings {
        params: Params::default(),
        max_depth,
        concurrency: 4,
        inactivity,
        dedup_queries: false,
    }
}
