//! Run engine: quiescence monitor, pipeline driver, hook executor.

pub mod hook;
pub mod monitor;
pub mod pipeline;

pub use hook::HookExecutor;
pub use monitor::{MonitorSnapshot, QuiescenceMonitor};
pub use pipeline::{Executor, Harvest, Pipeline, PipelineConfig, PipelineStats};
