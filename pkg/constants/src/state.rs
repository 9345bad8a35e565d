//! State store key layout.

/// Third-party service descriptors: `<prefix><sid>`.
pub const THIRDPARTY_SERVICES_PREFIX: &str = "/registry/thirdparty/services/";

/// Probe configs: `<prefix><sid>`.
pub const THIRDPARTY_PROBES_PREFIX: &str = "/registry/thirdparty/probes/";

/// Static endpoints: `<prefix><sid>/<uuid>`.
pub const THIRDPARTY_ENDPOINTS_PREFIX: &str = "/registry/thirdparty/endpoints/";

/// Discovery configs: `<prefix><sid>`.
pub const THIRDPARTY_DISCOVERY_PREFIX: &str = "/registry/thirdparty/discovery/";

/// Cluster Endpoints objects: `<prefix><namespace>/<name>`.
pub const CLUSTER_ENDPOINTS_PREFIX: &str = "/registry/endpoints/";

/// Cluster Service objects: `<prefix><namespace>/<name>`.
pub const CLUSTER_SERVICES_PREFIX: &str = "/registry/services/";
