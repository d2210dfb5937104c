//! Metric instrument factories for crawlq.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"crawlq"` meter.

use opentelemetry::metrics::{Counter, Histogram, Meter};

/// Returns the shared meter for crawlq instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("crawlq")
}

/// Counter: seed items created from input.
pub fn items_seeded() -> Counter<u64> {
    meter()
        .u64_counter("crawlq.items.seeded")
        .with_description("Number of seed work items created")
        .build()
}

/// Counter: child items spawned by executed items.
/// Labels: `depth`.
pub fn items_spawned() -> Counter<u64> {
    meter()
        .u64_counter("crawlq.items.spawned")
        .with_description("Number of child work items spawned")
        .build()
}

/// Counter: child requests dropped for exceeding max depth.
pub fn items_depth_dropped() -> Counter<u64> {
    meter()
        .u64_counter("crawlq.items.depth_dropped")
        .with_description("Child requests dropped past the max depth")
        .build()
}

/// Counter: items that reached a terminal event.
/// Labels: `outcome` ("completed" | "failed").
pub fn items_terminal() -> Counter<u64> {
    meter()
        .u64_counter("crawlq.items.terminal")
        .with_description("Number of work items that finished")
        .build()
}

/// Counter: ledger checks for discovered entities.
/// Labels: `result` ("written" | "duplicate").
pub fn entities_checked() -> Counter<u64> {
    meter()
        .u64_counter("crawlq.entities.checked")
        .with_description("Number of discovered entities checked against the ledger")
        .build()
}

/// Counter: finished runs.
/// Labels: `reason` ("quiescent" | "stalled" | "interrupted").
pub fn run_exits() -> Counter<u64> {
    meter()
        .u64_counter("crawlq.run.exits")
        .with_description("Number of runs by exit reason")
        .build()
}

/// Histogram: executor duration per item in milliseconds.
pub fn item_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("crawlq.item.duration_ms")
        .with_description("Work item execution duration in milliseconds")
        .with_unit("ms")
        .build()
}

/// Histogram: whole-run duration in milliseconds.
/// Labels: `reason`.
pub fn run_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("crawlq.run.duration_ms")
        .with_description("Run duration in milliseconds")
        .with_unit("ms")
        .build()
}
