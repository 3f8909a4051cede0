//! Shared utilities for the Polity voting engine.

pub mod logging;
pub mod time;

pub use logging::{init_logging, LogFormat, LogFormatError};
pub use time::format_duration;
