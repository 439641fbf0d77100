//! Logging macros that set target to "roamdb_proxy" for all log calls.
//!
//! Without an explicit target, tracing uses the full module path
//! (e.g., "roamdb_proxy::server::connection"), creating overly verbose
//! logger names for embedders that route Rust targets into their own
//! logging hierarchy. These macros ensure all logs from this crate use a
//! single "roamdb_proxy" target.

macro_rules! trace {
    ($($arg:tt)*) => { ::tracing::trace!(target: "roamdb_proxy", $($arg)*) };
}

macro_rules! debug {
    ($($arg:tt)*) => { ::tracing::debug!(target: "roamdb_proxy", $($arg)*) };
}

macro_rules! info {
    ($($arg:tt)*) => { ::tracing::info!(target: "roamdb_proxy", $($arg)*) };
}

macro_rules! warn {
    ($($arg:tt)*) => { ::tracing::warn!(target: "roamdb_proxy", $($arg)*) };
}

macro_rules! error {
    ($($arg:tt)*) => { ::tracing::error!(target: "roamdb_proxy", $($arg)*) };
}
