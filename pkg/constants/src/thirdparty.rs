//! Third-party service reconciliation constants.

/// Stand-in address written into Endpoints for domain-valued members,
/// since endpoint addresses must be IPs.
pub const DOMAIN_PLACEHOLDER_IP: &str = "1.1.1.1";

/// Service annotation carrying the real domain behind the placeholder.
pub const DOMAIN_ANNOTATION: &str = "domain";

/// How many times a start is attempted before giving up until the next StartEvent.
pub const DEFAULT_START_ATTEMPTS: u32 = 3;

/// Pause between two start attempts, in seconds.
pub const DEFAULT_START_RETRY_INTERVAL_SECS: u64 = 3;

/// Capacity of the lifecycle and endpoint event channels.
pub const DEFAULT_EVENT_BUFFER: usize = 1024;

/// Failure threshold used when a service has no stored probe config.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;

/// Suffix appended to Endpoints/Service names exposed outside the tenant.
pub const OUTER_SERVICE_SUFFIX: &str = "-out";

/// Label carrying the owning service id on generated objects.
pub const SERVICE_ID_LABEL: &str = "service_id";
