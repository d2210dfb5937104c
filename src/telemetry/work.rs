//! Run and work-item span helpers.
//!
//! One span per run carries the monitor's state transitions; one span per
//! executed work item wraps the executor call and the events it reports.

use std::time::Duration;

use tracing::Span;

use crate::model::WorkItem;

/// Start the span that lives as long as one quiescence monitor.
pub fn start_run_span(inactivity: Duration) -> Span {
    tracing::info_span!(
        "crawl.run",
        "run.inactivity_ms" = inactivity.as_millis() as u64,
        "run.exit" = tracing::field::Empty,
    )
}

/// Start a span for executing one work item.
///
/// The `item.outcome` field is declared empty and filled via
/// [`record_item_outcome`].
pub fn start_item_span(item: &WorkItem) -> Span {
    tracing::info_span!(
        "crawl.item",
        "item.id" = %item.id,
        "item.parent" = %item.parent_id.map(|p| p.to_string()).unwrap_or_default(),
        "item.depth" = item.depth,
        "item.target" = %item.target,
        "item.outcome" = tracing::field::Empty,
    )
}

/// Record how an item finished on its span.
pub fn record_item_outcome(span: &Span, outcome: &str) {
    span.record("item.outcome", outcome);
}

/// Record a run state transition on the given span.
///
/// Emits a tracing `info` event scoped to the span.
pub fn record_state_transition(span: &Span, from: &str, to: &str) {
    span.in_scope(|| {
        tracing::info!(from = from, to = to, "state_transition");
    });
}

/// Record the exit reason on the run span.
pub fn record_run_exit(span: &Span, reason: &str) {
    span.record("run.exit", reason);
}
