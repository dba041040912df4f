// Logs module - Output capture into per-app files

mod format;
mod writer;

pub use format::{DateFormat, DEFAULT_DATE_FORMAT};
pub use writer::{LogPumps, LogSink};
