//! Constants for the fetch layer.

/// Default HTTP connect timeout (30 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default HTTP read timeout (5 minutes for large bodies).
pub const READ_TIMEOUT_SECS: u64 = 300;

/// Default limit on fetches running at once.
pub const DEFAULT_MAX_CONCURRENT_FETCHES: usize = 4;
