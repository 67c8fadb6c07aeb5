//! CLI option groups and logging setup shared by the petface binaries.

pub mod common;
pub mod logging;

pub use common::{ThresholdArgs, ThresholdOpts, WeightsArgs, WeightsOpts};
pub use logging::init_tracing;
