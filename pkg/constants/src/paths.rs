//! Filesystem path constants.

/// Default config file path for the worker.
pub const DEFAULT_WORKER_CONFIG: &str = "/etc/appm/worker.yaml";

/// Default data directory for the worker state store.
pub const DEFAULT_WORKER_DATA_DIR: &str = "/tmp/appm-data";
