//! # crawlq
//!
//! Seeded crawl runner that knows when it is done.
//!
//! Seeds are read from a query list and expanded by an external
//! fetch-and-parse engine into child work items up to a maximum depth.
//! A quiescence monitor counts outstanding items and ends the run exactly
//! once, when the count drains to zero or when no progress is seen for the
//! inactivity window. A fingerprint ledger guarantees each discovered entity
//! is written at most once per run.

pub mod config;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod model;
pub mod runner;
pub mod seed;
pub mod telemetry;
pub mod writer;
