//! Planning defaults shared by settings and the CLI

/// Shift teams are not expected to leave the depot right at shift start.
pub const DEFAULT_SHIFT_START_BUFFER_SEC: i64 = 15 * 60;

/// Distances older than this are refetched.
pub const DEFAULT_DISTANCE_VALIDITY_SEC: i64 = 30 * 24 * 60 * 60;

pub const DEFAULT_SECONDARY_FETCH_TIMEOUT_MS: u64 = 5_000;

pub const DEFAULT_UNREQUESTED_REST_BREAK_DURATION_SEC: i64 = 30 * 60;

pub const DEFAULT_LOGS_DIR: &str = "./logs";
