//! Health probe constants.

/// Interval between two checks when a health config leaves it unset.
pub const DEFAULT_PROBE_INTERVAL_SECS: u64 = 5;

/// Per-check timeout when a health config leaves it unset.
pub const DEFAULT_PROBE_TIMEOUT_SECS: u64 = 5;

/// Capacity of the channel shared by every probe of one manager.
pub const STATUS_CHANNEL_CAPACITY: usize = 100;

/// Capacity of each watcher's private channel.
pub const WATCHER_CHANNEL_CAPACITY: usize = 10;

/// HTTP responses at or above this code are reported as unhealthy.
pub const HTTP_UNHEALTHY_STATUS: u16 = 500;

/// Shell used to run `cmd` probes.
pub const PROBE_SHELL: &str = "sh";
