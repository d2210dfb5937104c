//! Hook executor: runs an external command per work item.
//!
//! The fetch-and-parse engine lives outside this crate. For each item the
//! hook receives the item as JSON on stdin (and the main fields as
//! `CRAWLQ_*` environment variables) and prints a JSON [`Harvest`] on
//! stdout. Empty output means "nothing found". A non-zero exit fails the
//! item.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Instant;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::secrets::{SecretString, join_proxies};
use crate::error::{Error, Result};
use crate::model::WorkItem;

use super::pipeline::{Executor, Harvest};

#[derive(Debug)]
pub struct HookExecutor {
    command: PathBuf,
    proxies: Vec<SecretString>,
}

impl HookExecutor {
    /// Resolve `command` against the current directory if relative.
    pub fn new(command: &Path, proxies: Vec<SecretString>) -> Result<Self> {
        let command = if command.is_relative() {
            std::env::current_dir()?.join(command)
        } else {
            command.to_path_buf()
        };

        if !command.exists() {
            return Err(Error::Config(format!(
                "hook command not found: {}",
                command.display()
            )));
        }

        Ok(Self { command, proxies })
    }
}

impl Executor for HookExecutor {
    // In-flight hooks are allowed to finish after cancellation.
    async fn execute(&self, item: &WorkItem, _cancel: &CancellationToken) -> Result<Harvest> {
        let start = Instant::now();
        let payload = serde_json::to_vec(item)?;

        debug!(
            id = %item.id,
            command = %self.command.display(),
            "running hook"
        );

        let mut child = Command::new(&self.command)
            .env("CRAWLQ_WORK_ID", item.id.0.to_string())
            .env("CRAWLQ_DEPTH", item.depth.to_string())
            .env("CRAWLQ_TARGET", &item.target)
            .env("CRAWLQ_LANG", &item.params.lang)
            .env("CRAWLQ_PROXIES", join_proxies(&self.proxies))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        // Hooks may ignore stdin and exit early.
        if let Some(mut stdin) = child.stdin.take()
            && let Err(e) = stdin.write_all(&payload).await
            && e.kind() != std::io::ErrorKind::BrokenPipe
        {
            return Err(e.into());
        }

        let output = child.wait_with_output().await?;
        let duration_ms = start.elapsed().as_millis() as u64;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Item(format!(
                "hook exited with status {}: {}",
                output.status.code().unwrap_or(-1),
                stderr.trim()
            )));
        }

        let harvest = if output.stdout.iter().all(u8::is_ascii_whitespace) {
            Harvest::default()
        } else {
            serde_json::from_slice(&output.stdout)
                .map_err(|e| Error::Item(format!("bad hook output: {e}")))?
        };

        info!(
            id = %item.id,
            duration_ms,
            entities = harvest.entities.len(),
            children = harvest.children.len(),
            "hook completed"
        );

        Ok(harvest)
    }
}
