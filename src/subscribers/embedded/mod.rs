//! # Built-in subscribers
//!
//! - [`LogWriter`]: renders bus events through `tracing` (demo/debug).

mod log;

pub use log::LogWriter;
