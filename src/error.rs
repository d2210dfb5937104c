//! Error types for crawlq.

use thiserror::Error;

use crate::model::{EventKind, RunState};

#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot read seed input: {0}")]
    Input(#[source] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid run state transition: {from} -> {to}")]
    InvalidTransition { from: RunState, to: RunState },

    #[error("monitor received {0} before the seed count was primed")]
    NotPrimed(EventKind),

    #[error("outstanding counter would go negative on {0}")]
    CounterUnderflow(EventKind),

    #[error("work item failed: {0}")]
    Item(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
